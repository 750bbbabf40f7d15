mod cli;
mod config;
mod error;
mod lock;
mod metrics;
mod model;
mod prober;
mod report;
mod resolve;
mod scheduler;
mod timestamp;
mod util;

use cli::Cli;
use config::ProbeConfig;
use lock::OutputLock;
use model::Run;
use prober::http::ThroughputProbe;
use prober::{Race, RaceSettings};
use resolve::{CnameIntrospector, SystemResolver};

use std::io::Write;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let config = ProbeConfig::load(&cli).await?;
    let log_level = config.get_tracing_level()?;

    // Init tracing with configured log level; stdout is reserved for the report.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("happy_probe={}", log_level.as_str().to_lowercase()).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let requests = config.requests();
    info!(targets = requests.len(), queries = config.queries, "starting happy");

    let mut run = Run::new(config.queries);
    let introspector = config.cname.then(CnameIntrospector::new);
    resolve::populate(&mut run, &SystemResolver, introspector.as_ref(), &requests).await;

    // The race is single threaded and blocking; nothing else runs meanwhile.
    let mut race = Race::new(RaceSettings::from(&config));
    if let Err(e) = race.run(&mut run) {
        error!(error = %e, "race aborted");
        return Err(e.into());
    }
    if config.throughput {
        ThroughputProbe::new(Duration::from_millis(config.throughput_timeout_ms)).run(&mut run)?;
    }
    run.rank();

    let stdout = std::io::stdout();
    let _guard = config
        .lock_output
        .then(|| OutputLock::try_acquire(&stdout))
        .flatten();
    let mut out = stdout.lock();
    report::write_report(&mut out, &run, config.format, timestamp::unix_seconds())?;
    out.flush()?;
    Ok(())
}
