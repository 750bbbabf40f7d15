//! The connection race: every resolved endpoint gets a non-blocking
//! connect per iteration, and a single poll loop drives them all to
//! completion or timeout.

use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

pub mod http;
pub mod readiness;
pub mod tcp_connect;
pub mod updater;

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::model::Run;
use crate::scheduler::Pacer;
use readiness::{Readiness, earliest};
use tcp_connect::{Begin, begin};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceSettings {
    pub repeat: usize,
    /// `None` waits for every connect to finish on its own.
    pub timeout: Option<Duration>,
    pub delay: Duration,
    /// Keep successful sockets of the final iteration for throughput probing.
    pub keep_connected: bool,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            repeat: 3,
            timeout: Some(Duration::from_millis(2000)),
            delay: Duration::from_millis(25),
            keep_connected: false,
        }
    }
}

impl From<&ProbeConfig> for RaceSettings {
    fn from(cfg: &ProbeConfig) -> Self {
        Self {
            repeat: cfg.queries,
            timeout: (cfg.timeout_ms > 0).then(|| Duration::from_millis(cfg.timeout_ms)),
            delay: Duration::from_millis(cfg.delay_ms),
            keep_connected: cfg.throughput,
        }
    }
}

pub struct Race {
    settings: RaceSettings,
    pacer: Pacer,
    readiness: Readiness,
}

impl Race {
    pub fn new(settings: RaceSettings) -> Self {
        let pacer = Pacer::new(settings.delay);
        Self {
            settings,
            pacer,
            readiness: Readiness::new(),
        }
    }

    /// Run all iterations. Iteration `i + 1` starts only once every
    /// endpoint has settled for iteration `i`.
    pub fn run(&mut self, run: &mut Run) -> Result<()> {
        let repeat = self.settings.repeat;
        for iteration in 0..repeat {
            let keep = self.settings.keep_connected && iteration + 1 == repeat;
            debug!(iteration, repeat, "starting iteration");
            self.prepare(run, keep)?;
            self.collect(run, keep)?;
        }
        info!(
            targets = run.targets().len(),
            endpoints = run.endpoints().count(),
            repeat,
            "race finished"
        );
        Ok(())
    }

    /// Start one attempt per endpoint in target-then-endpoint order,
    /// servicing in-flight attempts while waiting for each pacing slot.
    fn prepare(&mut self, run: &mut Run, keep: bool) -> Result<()> {
        for ep in run.endpoints_mut() {
            ep.reset();
        }
        self.pacer.reset();

        for t in 0..run.targets().len() {
            for e in 0..run.targets()[t].endpoints.len() {
                if run.targets()[t].endpoints[e].is_retired() {
                    continue;
                }
                self.pace(run, keep)?;

                let ep = &mut run.targets_mut()[t].endpoints[e];
                if let Begin::Started(at) = begin(ep) {
                    trace!(addr = %ep.addr(), "attempt started");
                    self.pacer.mark(at);
                }
            }
        }
        Ok(())
    }

    fn pace(&mut self, run: &mut Run, keep: bool) -> Result<()> {
        let Some(slot) = self.pacer.next_slot() else {
            return Ok(());
        };
        while !self.pacer.remaining(Instant::now()).is_zero() {
            self.service(run, Some(slot), keep)?;
        }
        Ok(())
    }

    /// Drive every outstanding attempt to a terminal state.
    fn collect(&mut self, run: &mut Run, keep: bool) -> Result<()> {
        while self.service(run, None, keep)? > 0 {}
        Ok(())
    }

    /// One wake-up of the readiness loop: wait until a descriptor is ready,
    /// the nearest attempt deadline, or `until`, then settle everything that
    /// finished. Returns how many attempts were outstanding.
    ///
    /// With nothing outstanding this sleeps until `until` instead of polling
    /// an empty set.
    fn service(&mut self, run: &mut Run, until: Option<Instant>, keep: bool) -> Result<usize> {
        let timeout = self.settings.timeout;
        let nearest = self.readiness.rebuild(run, timeout);
        let outstanding = self.readiness.len();

        if self.readiness.is_empty() {
            if let Some(until) = until {
                std::thread::sleep(until.saturating_duration_since(Instant::now()));
            }
            return Ok(0);
        }

        self.readiness.wait(earliest(nearest, until))?;
        let now = Instant::now();
        for (slot, ready) in self.readiness.outcomes() {
            let ep = &mut run.targets_mut()[slot.target].endpoints[slot.endpoint];
            updater::update(ep, now, ready, timeout, keep)?;
        }
        Ok(outstanding)
    }
}
