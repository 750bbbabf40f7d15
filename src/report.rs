use anyhow::Result;
use serde::Serialize;
use std::io::Write;

use crate::config::OutputFormat;
use crate::metrics;
use crate::model::{Endpoint, EndpointState, Outcome, Run, Target, Throughput};

const COLUMN: usize = 48;

/// `1234` µs as `1.234`.
fn ms(us: u64) -> String {
    format!("{}.{:03}", us / 1000, us % 1000)
}

fn avg_us(ep: &Endpoint) -> Option<u64> {
    (ep.successes() > 0).then(|| ep.sum_us() / u64::from(ep.successes()))
}

fn kbps(bytes_per_sec: f64) -> String {
    format!("{:.1}", bytes_per_sec / 1024.0)
}

pub fn write_report<W: Write>(out: &mut W, run: &Run, format: OutputFormat, now: u64) -> Result<()> {
    match format {
        OutputFormat::Text => write_text(out, run)?,
        OutputFormat::Semicolon => write_semicolon(out, run, now)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &json_view(run))?;
            writeln!(out)?;
        }
        OutputFormat::Prometheus => out.write_all(&metrics::render(run)?)?,
    }
    out.flush()?;
    Ok(())
}

fn write_text<W: Write>(out: &mut W, run: &Run) -> std::io::Result<()> {
    let with_throughput = run.endpoints().any(|ep| ep.throughput().is_some());

    for (i, target) in run.targets().iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        let title = format!("{}:{}", target.host, target.port);
        write!(out, "{title:<COLUMN$}  MIN ms   AVG ms   MAX ms  LOSS")?;
        if with_throughput {
            write!(out, "  TX KB/s  RX KB/s")?;
        }
        writeln!(out)?;

        if !target.cname_chain.is_empty() {
            writeln!(out, " (cname {})", target.cname_chain.join(" -> "))?;
        }
        if let Some(err) = &target.resolve_error {
            writeln!(out, " (resolution failed: {err})")?;
            continue;
        }

        for ep in &target.endpoints {
            let addr = format!(" {}", ep.addr().ip());
            write!(out, "{addr:<COLUMN$}")?;
            match (ep.min_us(), avg_us(ep), ep.max_us()) {
                (Some(min), Some(avg), Some(max)) => {
                    write!(out, "{:>8} {:>8} {:>8}", ms(min), ms(avg), ms(max))?
                }
                _ => write!(out, "{:>8} {:>8} {:>8}", "-", "-", "-")?,
            }
            let loss = format!("{}/{}", ep.failures(), ep.attempts());
            write!(out, "  {loss:>4}")?;
            if let Some(tp) = ep.throughput() {
                write!(out, "  {:>7}  {:>7}", kbps(tp.send_rate()), kbps(tp.recv_rate()))?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_semicolon<W: Write>(out: &mut W, run: &Run, now: u64) -> std::io::Result<()> {
    for target in run.targets() {
        let status = if target.is_resolved() { "OK" } else { "FAIL" };
        write!(out, "HAPPY.0;{now};{status};{};{}", target.host, target.port)?;
        for ep in &target.endpoints {
            write!(out, ";{}", ep.addr().ip())?;
            match (ep.min_us(), avg_us(ep), ep.max_us()) {
                (Some(min), Some(avg), Some(max)) => {
                    write!(out, ";{};{};{}", ms(min), ms(avg), ms(max))?
                }
                _ => write!(out, ";;;")?,
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct TargetView<'a> {
    host: &'a str,
    port: &'a str,
    resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "no_names")]
    cname_chain: &'a [String],
    endpoints: Vec<EndpointView>,
}

fn no_names(names: &&[String]) -> bool {
    names.is_empty()
}

#[derive(Serialize)]
struct SampleView {
    micros: i64,
    outcome: Outcome,
}

#[derive(Serialize)]
struct EndpointView {
    address: String,
    family: &'static str,
    state: EndpointState,
    attempts: usize,
    successes: u32,
    min_us: Option<u64>,
    avg_us: Option<f64>,
    max_us: Option<u64>,
    samples: Vec<SampleView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    throughput: Option<Throughput>,
}

fn json_view(run: &Run) -> Vec<TargetView<'_>> {
    run.targets().iter().map(target_view).collect()
}

fn target_view(target: &Target) -> TargetView<'_> {
    TargetView {
        host: &target.host,
        port: &target.port,
        resolved: target.is_resolved(),
        error: target.resolve_error.as_deref(),
        cname_chain: &target.cname_chain,
        endpoints: target
            .endpoints
            .iter()
            .map(|ep| EndpointView {
                address: ep.addr().ip().to_string(),
                family: if ep.addr().is_ipv6() { "ipv6" } else { "ipv4" },
                state: ep.state(),
                attempts: ep.attempts(),
                successes: ep.successes(),
                min_us: ep.min_us(),
                avg_us: ep.mean_us(),
                max_us: ep.max_us(),
                samples: ep
                    .samples()
                    .iter()
                    .map(|s| SampleView {
                        micros: s.signed_micros(),
                        outcome: s.outcome,
                    })
                    .collect(),
                throughput: ep.throughput().copied(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AddrInfo;
    use std::time::Duration;

    fn sample_run() -> Run {
        let mut run = Run::new(2);
        run.push(
            Target::new("dual.test", "80"),
            vec![
                AddrInfo::tcp("[2001:db8::1]:80".parse().unwrap()),
                AddrInfo::tcp("192.0.2.1:80".parse().unwrap()),
            ],
        );
        let mut missing = Target::new("gone.test", "443");
        missing.resolve_error = Some("no such host".into());
        run.push(missing, Vec::new());

        let eps = &mut run.targets_mut()[0].endpoints;
        eps[0].complete(Outcome::Success, Duration::from_micros(1500), false);
        eps[0].complete(Outcome::Success, Duration::from_micros(2500), false);
        eps[1].complete(Outcome::Timeout, Duration::from_millis(2000), false);
        eps[1].complete(Outcome::Refused(libc::ECONNREFUSED), Duration::from_micros(40), false);
        run
    }

    fn render(run: &Run, format: OutputFormat) -> String {
        let mut buf = Vec::new();
        write_report(&mut buf, run, format, 1_700_000_000).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn semicolon_lines() {
        let out = render(&sample_run(), OutputFormat::Semicolon);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "HAPPY.0;1700000000;OK;dual.test;80;2001:db8::1;1.500;2.000;2.500;192.0.2.1;;;"
        );
        assert_eq!(lines[1], "HAPPY.0;1700000000;FAIL;gone.test;443");
    }

    #[test]
    fn text_table() {
        let out = render(&sample_run(), OutputFormat::Text);
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].starts_with("dual.test:80"));
        assert!(lines[0].contains("MIN ms   AVG ms   MAX ms"));
        assert_eq!(lines[0].find("  MIN"), Some(COLUMN));
        assert!(lines[1].starts_with(" 2001:db8::1"));
        assert!(lines[1].contains("   1.500    2.000    2.500"));
        assert!(lines[1].trim_end().ends_with("0/2"));
        assert!(lines[2].contains("       -        -        -"));
        assert!(lines[2].trim_end().ends_with("2/2"));
        assert!(out.contains("gone.test:443"));
        assert!(out.contains("(resolution failed: no such host)"));
        assert!(!out.contains("TX KB/s"));
    }

    #[test]
    fn json_carries_samples() {
        let out = render(&sample_run(), OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        let eps = &value[0]["endpoints"];
        assert_eq!(eps[0]["family"], "ipv6");
        assert_eq!(eps[0]["avg_us"], 2000.0);
        assert_eq!(eps[1]["samples"][0]["micros"], -2_000_000);
        assert_eq!(eps[1]["samples"][0]["outcome"]["kind"], "timeout");
        assert_eq!(eps[1]["samples"][1]["outcome"]["errno"], libc::ECONNREFUSED);
        assert_eq!(value[1]["resolved"], false);
        assert_eq!(value[1]["error"], "no such host");
    }

    #[test]
    fn ms_formatting() {
        assert_eq!(ms(0), "0.000");
        assert_eq!(ms(1234), "1.234");
        assert_eq!(ms(2_000_005), "2000.005");
    }
}
