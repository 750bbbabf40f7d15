// Helpers for turning user input into (host, port) requests.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Split `host:port`, `[v6]:port`, or a bare host. A bare IPv6 literal
/// (more than one colon, no brackets) is taken as a host.
pub fn parse_host_port(s: &str) -> (String, Option<String>) {
    if let Some(rest) = s.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').filter(|p| !p.is_empty());
            return (host.to_string(), port.map(str::to_string));
        }
    }
    match s.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && !host.is_empty() && !port.is_empty() => {
            (host.to_string(), Some(port.to_string()))
        }
        _ => (s.to_string(), None),
    }
}

/// Numeric port or one of the well-known TCP service names.
pub fn service_port(service: &str) -> Option<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Some(port);
    }
    let port = match service.to_ascii_lowercase().as_str() {
        "ftp" => 21,
        "ssh" => 22,
        "telnet" => 23,
        "smtp" => 25,
        "domain" => 53,
        "http" | "www" => 80,
        "pop3" => 110,
        "imap" => 143,
        "https" => 443,
        "submission" => 587,
        "imaps" => 993,
        "pop3s" => 995,
        "http-alt" => 8080,
        _ => return None,
    };
    Some(port)
}

/// Parse one line of a target file. Returns `None` for blanks and comments.
///
/// Accepted forms: `host`, `host port`, `host:port`, `[v6]:port`.
pub fn parse_target_line(line: &str) -> Option<(String, Option<String>)> {
    let line = line.split('#').next().unwrap_or("").trim();
    if line.is_empty() {
        return None;
    }
    let mut fields = line.split_whitespace();
    let first = fields.next()?;
    match fields.next() {
        Some(port) => Some((first.to_string(), Some(port.to_string()))),
        None => Some(parse_host_port(first)),
    }
}

pub fn read_targets_from(reader: impl BufRead) -> Result<Vec<(String, Option<String>)>> {
    let mut targets = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading target line {}", n + 1))?;
        if let Some(target) = parse_target_line(&line) {
            targets.push(target);
        }
    }
    Ok(targets)
}

/// Import targets from a file, or from stdin when `path` is `-`.
pub fn read_targets(path: &Path) -> Result<Vec<(String, Option<String>)>> {
    if path == Path::new("-") {
        return read_targets_from(std::io::stdin().lock());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening target file {}", path.display()))?;
    read_targets_from(BufReader::new(file))
        .with_context(|| format!("reading target file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(h: &str, p: Option<&str>) -> (String, Option<String>) {
        (h.to_string(), p.map(str::to_string))
    }

    #[test]
    fn host_port_forms() {
        assert_eq!(parse_host_port("example.com:443"), pair("example.com", Some("443")));
        assert_eq!(parse_host_port("example.com"), pair("example.com", None));
        assert_eq!(parse_host_port("[2001:db8::1]:8080"), pair("2001:db8::1", Some("8080")));
        assert_eq!(parse_host_port("[2001:db8::1]"), pair("2001:db8::1", None));
        assert_eq!(parse_host_port("2001:db8::1"), pair("2001:db8::1", None));
        assert_eq!(parse_host_port("host:http"), pair("host", Some("http")));
    }

    #[test]
    fn services() {
        assert_eq!(service_port("80"), Some(80));
        assert_eq!(service_port("HTTPS"), Some(443));
        assert_eq!(service_port("70000"), None);
        assert_eq!(service_port("nonsense"), None);
    }

    #[test]
    fn target_file_lines() {
        let input = "\
# resolvers
www.example.com
www.example.org 8443   # alt port
[::1]:22

mail.example.net:smtp
";
        let targets = read_targets_from(input.as_bytes()).unwrap();
        assert_eq!(
            targets,
            vec![
                pair("www.example.com", None),
                pair("www.example.org", Some("8443")),
                pair("::1", Some("22")),
                pair("mail.example.net", Some("smtp")),
            ]
        );
    }
}
