use std::io;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};

use crate::error::{ProbeError, Result};
use crate::model::Run;
use crate::timestamp::poll_timeout_ms;

/// Location of an endpoint inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub target: usize,
    pub endpoint: usize,
}

/// The descriptor set handed to poll(2), rebuilt before every wait.
#[derive(Debug, Default)]
pub struct Readiness {
    fds: Vec<libc::pollfd>,
    slots: Vec<Slot>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every connecting endpoint of `run` and return the nearest
    /// attempt deadline among them.
    pub fn rebuild(&mut self, run: &Run, timeout: Option<Duration>) -> Option<Instant> {
        self.fds.clear();
        self.slots.clear();
        let mut nearest: Option<Instant> = None;

        for (t, target) in run.targets().iter().enumerate() {
            for (e, ep) in target.endpoints.iter().enumerate() {
                if !ep.is_connecting() {
                    continue;
                }
                let Some(socket) = ep.socket() else { continue };
                self.fds.push(libc::pollfd {
                    fd: socket.as_raw_fd(),
                    events: libc::POLLOUT,
                    revents: 0,
                });
                self.slots.push(Slot {
                    target: t,
                    endpoint: e,
                });

                if let (Some(timeout), Some(started)) = (timeout, ep.started()) {
                    let deadline = started + timeout;
                    nearest = Some(nearest.map_or(deadline, |n| n.min(deadline)));
                }
            }
        }
        nearest
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Block until a descriptor is writable (or errored) or `deadline`
    /// passes. `None` waits indefinitely.
    pub fn wait(&mut self, deadline: Option<Instant>) -> Result<usize> {
        poll_fds(&mut self.fds, deadline)
    }

    /// Slots paired with whether poll reported them ready.
    pub fn outcomes(&self) -> impl Iterator<Item = (Slot, bool)> + '_ {
        self.slots
            .iter()
            .zip(self.fds.iter())
            .map(|(slot, fd)| (*slot, fd.revents != 0))
    }
}

/// Earlier of two optional deadlines, where `None` means "never".
pub fn earliest(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// poll(2) over `fds` until `deadline`, retrying on EINTR with the time
/// that is left. Any other failure is fatal to the run.
pub fn poll_fds(fds: &mut [libc::pollfd], deadline: Option<Instant>) -> Result<usize> {
    loop {
        let wait = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let timeout = poll_timeout_ms(wait);
        // SAFETY: `fds` is a valid, exclusively borrowed slice of pollfd.
        let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        tracing::error!(error = %err, "poll failed");
        return Err(ProbeError::Poll(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AddrInfo, Target};
    use crate::prober::tcp_connect::{Begin, begin};
    use std::net::TcpListener;

    #[test]
    fn earliest_prefers_defined_deadlines() {
        let now = Instant::now();
        let later = now + Duration::from_secs(1);
        assert_eq!(earliest(None, None), None);
        assert_eq!(earliest(Some(now), None), Some(now));
        assert_eq!(earliest(None, Some(later)), Some(later));
        assert_eq!(earliest(Some(later), Some(now)), Some(now));
    }

    #[test]
    fn empty_run_builds_empty_set() {
        let run = Run::new(1);
        let mut readiness = Readiness::new();
        assert_eq!(readiness.rebuild(&run, Some(Duration::from_secs(2))), None);
        assert!(readiness.is_empty());
    }

    #[test]
    fn rebuild_tracks_connecting_endpoints_and_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut run = Run::new(1);
        run.push(Target::new("localhost", "0"), vec![AddrInfo::tcp(addr), AddrInfo::tcp(addr)]);

        let mut first = None;
        for ep in run.endpoints_mut() {
            if let Begin::Started(at) = begin(ep) {
                first.get_or_insert(at);
            }
        }
        let timeout = Duration::from_millis(500);
        let mut readiness = Readiness::new();
        let nearest = readiness.rebuild(&run, Some(timeout));

        assert_eq!(readiness.len(), 2);
        assert_eq!(nearest, first.map(|at| at + timeout));
        assert_eq!(readiness.rebuild(&run, None), None);

        let woke = readiness.wait(Some(Instant::now() + timeout)).unwrap();
        assert!(woke >= 1);
        let ready: Vec<_> = readiness.outcomes().filter(|(_, r)| *r).collect();
        assert!(!ready.is_empty());
        assert_eq!(ready[0].0.target, 0);
    }

    #[test]
    fn poll_with_no_descriptors_honours_deadline() {
        let start = Instant::now();
        let n = poll_fds(&mut [], Some(start + Duration::from_millis(20))).unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
