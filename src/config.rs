use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::cli::Cli;
use crate::util::{parse_host_port, read_targets};

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Semicolon,
    Json,
    Prometheus,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TargetConfig {
    pub host: String,
    /// Port or service name; targets without one use every configured port.
    #[serde(default)]
    pub port: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub queries: usize,
    pub timeout_ms: u64,
    pub delay_ms: u64,
    pub throughput: bool,
    pub throughput_timeout_ms: u64,
    pub cname: bool,
    pub format: OutputFormat,
    pub ports: Vec<String>,
    pub targets: Vec<TargetConfig>,
    pub log_level: String,
    pub lock_output: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            queries: 3,
            timeout_ms: 2000,
            delay_ms: 25,
            throughput: false,
            throughput_timeout_ms: 1000,
            cname: false,
            format: OutputFormat::Text,
            ports: vec!["80".to_string()],
            targets: Vec::new(),
            log_level: default_log_level(),
            lock_output: true,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl ProbeConfig {
    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", self.log_level))
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.get_tracing_level()?;
        if self.queries == 0 {
            anyhow::bail!("queries must be greater than zero");
        }
        if self.ports.is_empty() {
            anyhow::bail!("at least one port is required");
        }
        if self.targets.is_empty() {
            anyhow::bail!("no targets given");
        }
        Ok(())
    }

    /// Defaults, then the JSON file (`--config` or `$HAPPY_CONFIG`), then
    /// the command line.
    pub async fn load(cli: &Cli) -> Result<Self> {
        let path = cli
            .config
            .clone()
            .or_else(|| std::env::var_os("HAPPY_CONFIG").map(PathBuf::from));
        let mut config = match path {
            Some(path) => Self::load_file_config(&path).await?,
            None => Self::default(),
        };
        config.apply(cli)?;
        config.validate()?;
        Ok(config)
    }

    async fn load_file_config(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let config: ProbeConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    fn apply(&mut self, cli: &Cli) -> Result<()> {
        if let Some(q) = cli.queries {
            self.queries = q as usize;
        }
        if let Some(t) = cli.timeout_ms {
            self.timeout_ms = t;
        }
        if let Some(d) = cli.delay_ms {
            self.delay_ms = d;
        }
        if let Some(t) = cli.throughput_timeout_ms {
            self.throughput_timeout_ms = t;
        }
        if !cli.ports.is_empty() {
            self.ports = cli.ports.clone();
        }
        if cli.semicolon {
            self.format = OutputFormat::Semicolon;
        }
        if let Some(format) = cli.format {
            self.format = format;
        }
        self.throughput |= cli.throughput;
        self.cname |= cli.cname;
        if cli.no_lock {
            self.lock_output = false;
        }
        self.log_level = match cli.verbose {
            0 => std::mem::take(&mut self.log_level),
            1 => "info".to_string(),
            2 => "debug".to_string(),
            _ => "trace".to_string(),
        };

        let mut targets: Vec<TargetConfig> = cli
            .hosts
            .iter()
            .map(|h| {
                let (host, port) = parse_host_port(h);
                TargetConfig { host, port }
            })
            .collect();
        for file in &cli.files {
            targets.extend(
                read_targets(file)?
                    .into_iter()
                    .map(|(host, port)| TargetConfig { host, port }),
            );
        }
        if !targets.is_empty() {
            self.targets = targets;
        }
        Ok(())
    }

    /// Every (host, port) pair to resolve, hosts in order, each expanded
    /// against the configured ports unless it names its own.
    pub fn requests(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for target in &self.targets {
            match &target.port {
                Some(port) => out.push((target.host.clone(), port.clone())),
                None => out.extend(self.ports.iter().map(|p| (target.host.clone(), p.clone()))),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut all = vec!["happy"];
        all.extend_from_slice(args);
        Cli::try_parse_from(all).unwrap()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.queries, 3);
        assert_eq!(cfg.timeout_ms, 2000);
        assert_eq!(cfg.delay_ms, 25);
        assert_eq!(cfg.ports, vec!["80"]);
        assert_eq!(cfg.format, OutputFormat::Text);
        assert!(cfg.lock_output);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ProbeConfig = serde_json::from_str(
            r#"{"queries": 5, "format": "json", "targets": [{"host": "example.com", "port": "443"}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.queries, 5);
        assert_eq!(cfg.format, OutputFormat::Json);
        assert_eq!(cfg.timeout_ms, 2000);
        assert_eq!(cfg.targets[0].port.as_deref(), Some("443"));
    }

    #[test]
    fn command_line_overrides() {
        let mut cfg = ProbeConfig::default();
        cfg.apply(&cli(&["-p", "443", "-p", "80", "-s", "-v", "-t", "0", "a.test", "b.test:8080"]))
            .unwrap();
        assert_eq!(cfg.format, OutputFormat::Semicolon);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.timeout_ms, 0);
        assert_eq!(
            cfg.requests(),
            vec![
                ("a.test".to_string(), "443".to_string()),
                ("a.test".to_string(), "80".to_string()),
                ("b.test".to_string(), "8080".to_string()),
            ]
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = ProbeConfig::default();
        assert!(cfg.validate().is_err(), "no targets");
        cfg.targets.push(TargetConfig { host: "a.test".into(), port: None });
        cfg.validate().unwrap();
        cfg.queries = 0;
        assert!(cfg.validate().is_err());
        cfg.queries = 1;
        cfg.log_level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn missing_config_file_is_an_error() {
        let err = ProbeConfig::load_file_config(Path::new("/nonexistent/happy.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
