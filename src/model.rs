use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::cmp::Ordering;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::timestamp::duration_us;

/// One resolved (family, socket type, protocol, address) tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub family: Domain,
    pub socktype: Type,
    pub protocol: Option<Protocol>,
    pub addr: SocketAddr,
}

impl AddrInfo {
    /// A plain TCP stream tuple for `addr`.
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            family: Domain::for_address(addr),
            socktype: Type::STREAM,
            protocol: Some(Protocol::TCP),
            addr,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    New,
    Connecting,
    Connected,
    TimedOut,
    Failed,
}

/// How a single connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "errno", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// The connect completed with a non-zero socket error.
    Refused(i32),
    Timeout,
    /// Socket setup or the immediate connect call failed.
    Failed(i32),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => f.write_str("success"),
            Outcome::Refused(_) => f.write_str("refused"),
            Outcome::Timeout => f.write_str("timeout"),
            Outcome::Failed(_) => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl Sample {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn micros(&self) -> u64 {
        duration_us(self.elapsed)
    }

    /// Positive for a successful connect, the negated elapsed time otherwise.
    /// A failure before the connect was issued has zero elapsed and reads `0`;
    /// check `outcome` rather than the sign.
    pub fn signed_micros(&self) -> i64 {
        let us = i64::try_from(self.micros()).unwrap_or(i64::MAX);
        if self.is_success() { us } else { -us }
    }
}

/// Bytes moved over a kept connection during the throughput phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Throughput {
    pub sent: u64,
    pub received: u64,
    #[serde(rename = "duration_us", serialize_with = "serialize_us")]
    pub duration: Duration,
}

fn serialize_us<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(duration_us(*d))
}

impl Throughput {
    pub fn send_rate(&self) -> f64 {
        rate(self.sent, self.duration)
    }

    pub fn recv_rate(&self) -> f64 {
        rate(self.received, self.duration)
    }
}

fn rate(bytes: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

/// A concrete address of a target together with its attempt state and
/// measurement history.
#[derive(Debug)]
pub struct Endpoint {
    info: AddrInfo,
    socket: Option<Socket>,
    started: Option<Instant>,
    state: EndpointState,
    retired: bool,
    limit: usize,
    samples: Vec<Sample>,
    successes: u32,
    sum_us: u64,
    min_us: u64,
    max_us: u64,
    throughput: Option<Throughput>,
}

impl Endpoint {
    pub fn new(info: AddrInfo, repeat: usize) -> Self {
        Self {
            info,
            socket: None,
            started: None,
            state: EndpointState::New,
            retired: false,
            limit: repeat,
            samples: Vec::with_capacity(repeat),
            successes: 0,
            sum_us: 0,
            min_us: 0,
            max_us: 0,
            throughput: None,
        }
    }

    pub fn info(&self) -> &AddrInfo {
        &self.info
    }

    pub fn addr(&self) -> SocketAddr {
        self.info.addr
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn is_connecting(&self) -> bool {
        self.state == EndpointState::Connecting
    }

    /// Retired endpoints (unsupported family or protocol) are skipped by
    /// every later iteration.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub fn socket(&self) -> Option<&Socket> {
        self.socket.as_ref()
    }

    pub fn started(&self) -> Option<Instant> {
        self.started
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn attempts(&self) -> usize {
        self.samples.len()
    }

    pub fn successes(&self) -> u32 {
        self.successes
    }

    pub fn failures(&self) -> usize {
        self.samples.len() - self.successes as usize
    }

    pub fn sum_us(&self) -> u64 {
        self.sum_us
    }

    pub fn min_us(&self) -> Option<u64> {
        (self.successes > 0).then_some(self.min_us)
    }

    pub fn max_us(&self) -> Option<u64> {
        (self.successes > 0).then_some(self.max_us)
    }

    /// Mean latency over successful attempts only.
    pub fn mean_us(&self) -> Option<f64> {
        (self.successes > 0).then(|| self.sum_us as f64 / f64::from(self.successes))
    }

    pub fn throughput(&self) -> Option<&Throughput> {
        self.throughput.as_ref()
    }

    /// Prepare for a fresh iteration. Closes anything still held from the
    /// previous one.
    pub(crate) fn reset(&mut self) {
        self.socket = None;
        if !self.retired {
            self.state = EndpointState::New;
        }
    }

    /// The connect has been issued on `socket`; the attempt is now timed
    /// from `at`.
    pub(crate) fn start(&mut self, socket: Socket, at: Instant) {
        self.socket = Some(socket);
        self.started = Some(at);
        self.state = EndpointState::Connecting;
    }

    /// Record the single sample for the current iteration and move to the
    /// matching terminal state. The socket is closed unless the attempt
    /// succeeded and `keep_socket` is set.
    pub(crate) fn complete(&mut self, outcome: Outcome, elapsed: Duration, keep_socket: bool) {
        let sample = Sample { outcome, elapsed };
        if self.samples.len() >= self.limit {
            tracing::warn!(addr = %self.info.addr, "sample dropped, repeat count exhausted");
            self.socket = None;
            return;
        }
        self.samples.push(sample);

        self.state = match outcome {
            Outcome::Success | Outcome::Refused(_) => EndpointState::Connected,
            Outcome::Timeout => EndpointState::TimedOut,
            Outcome::Failed(_) => EndpointState::Failed,
        };

        if sample.is_success() {
            let us = sample.micros();
            self.successes += 1;
            self.sum_us = self.sum_us.saturating_add(us);
            if self.successes == 1 || us < self.min_us {
                self.min_us = us;
            }
            if self.successes == 1 || us > self.max_us {
                self.max_us = us;
            }
        }

        if !(keep_socket && sample.is_success()) {
            self.socket = None;
        }
    }

    /// Permanently exclude this endpoint; nothing is recorded.
    pub(crate) fn retire(&mut self) {
        self.socket = None;
        self.state = EndpointState::Failed;
        self.retired = true;
    }

    pub(crate) fn take_socket(&mut self) -> Option<Socket> {
        self.socket.take()
    }

    pub(crate) fn set_throughput(&mut self, throughput: Throughput) {
        self.throughput = Some(throughput);
    }
}

/// Orders endpoints by mean successful latency. Endpoints without any
/// success compare equal to each other and after all others.
pub fn by_mean_latency(a: &Endpoint, b: &Endpoint) -> Ordering {
    match (a.successes, b.successes) {
        (0, 0) => Ordering::Equal,
        (0, _) => Ordering::Greater,
        (_, 0) => Ordering::Less,
        // Cross-multiplied so the comparison stays exact.
        (na, nb) => {
            let lhs = u128::from(a.sum_us) * u128::from(nb);
            let rhs = u128::from(b.sum_us) * u128::from(na);
            lhs.cmp(&rhs)
        }
    }
}

/// One (host, port) pair and the endpoints its name resolved to.
#[derive(Debug)]
pub struct Target {
    pub host: String,
    pub port: String,
    pub endpoints: Vec<Endpoint>,
    pub resolve_error: Option<String>,
    pub cname_chain: Vec<String>,
}

impl Target {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            endpoints: Vec::new(),
            resolve_error: None,
            cname_chain: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.endpoints.is_empty()
    }

    /// Stable sort of the endpoints by mean successful latency.
    pub fn rank(&mut self) {
        self.endpoints.sort_by(by_mean_latency);
    }
}

/// Everything a single invocation probes, in discovery order.
#[derive(Debug)]
pub struct Run {
    repeat: usize,
    targets: Vec<Target>,
}

impl Run {
    pub fn new(repeat: usize) -> Self {
        Self {
            repeat,
            targets: Vec::new(),
        }
    }

    /// Append a target, turning its resolved addresses into endpoints.
    pub fn push(&mut self, mut target: Target, addrs: Vec<AddrInfo>) {
        target
            .endpoints
            .extend(addrs.into_iter().map(|info| Endpoint::new(info, self.repeat)));
        self.targets.push(target);
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut [Target] {
        &mut self.targets
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.targets.iter().flat_map(|t| t.endpoints.iter())
    }

    pub fn endpoints_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.targets.iter_mut().flat_map(|t| t.endpoints.iter_mut())
    }

    pub fn rank(&mut self) {
        for target in &mut self.targets {
            target.rank();
        }
    }
}
