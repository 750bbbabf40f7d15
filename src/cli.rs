use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::OutputFormat;

#[derive(Parser, Debug, Default)]
#[command(name = "happy")]
#[command(about = "Race TCP connects to every address of a host to see which one a happy eyeballs client would pick.")]
pub struct Cli {
    /// Hosts to probe, optionally as host:port
    pub hosts: Vec<String>,

    /// Port or service name; repeat to probe several
    #[arg(short = 'p', long = "port")]
    pub ports: Vec<String>,

    /// Connection attempts per endpoint
    #[arg(short = 'q', long, value_parser = clap::value_parser!(u32).range(1..))]
    pub queries: Option<u32>,

    /// Per-attempt timeout in milliseconds (0 waits forever)
    #[arg(short = 't', long = "timeout")]
    pub timeout_ms: Option<u64>,

    /// Delay between attempt starts in milliseconds (0 disables pacing)
    #[arg(short = 'd', long = "delay")]
    pub delay_ms: Option<u64>,

    /// Semicolon separated output, same as --format semicolon
    #[arg(short = 's', long = "semicolon")]
    pub semicolon: bool,

    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Read targets from a file ('-' for stdin)
    #[arg(short = 'f', long = "file")]
    pub files: Vec<PathBuf>,

    /// Measure throughput over the final successful connections
    #[arg(short = 'T', long)]
    pub throughput: bool,

    /// Throughput phase budget in milliseconds
    #[arg(long = "throughput-timeout")]
    pub throughput_timeout_ms: Option<u64>,

    /// Show the CNAME chain of each host
    #[arg(short = 'c', long)]
    pub cname: bool,

    /// JSON configuration file (defaults to $HAPPY_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// More logging; repeat for more
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Do not lock the output stream while writing the report
    #[arg(long)]
    pub no_lock: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
