//! Throughput probing over the sockets the race left connected.

use socket2::Socket;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::Result;
use crate::model::{Run, Throughput};
use crate::prober::readiness::{Slot, poll_fds};

const READ_CHUNK: usize = 16 * 1024;

pub fn request_for(host: &str) -> Vec<u8> {
    format!("GET / HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n").into_bytes()
}

struct Session {
    slot: Slot,
    socket: Socket,
    request: Vec<u8>,
    written: usize,
    counters: Throughput,
    done: bool,
}

impl Session {
    fn finish(&mut self, elapsed: Duration) {
        self.done = true;
        self.counters.duration = elapsed;
    }

    fn events(&self) -> libc::c_short {
        if self.written < self.request.len() {
            libc::POLLIN | libc::POLLOUT
        } else {
            libc::POLLIN
        }
    }

    /// Push the unsent part of the request. Returns false once the
    /// exchange is over for this endpoint.
    fn on_writable(&mut self) -> bool {
        while self.written < self.request.len() {
            match (&self.socket).write(&self.request[self.written..]) {
                Ok(0) => return false,
                Ok(n) => {
                    self.written += n;
                    self.counters.sent += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ended(&e),
            }
        }
        true
    }

    /// Drain whatever the peer has sent so far.
    fn on_readable(&mut self, buf: &mut [u8]) -> bool {
        loop {
            match (&self.socket).read(buf) {
                Ok(0) => return false,
                Ok(n) => self.counters.received += n as u64,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ended(&e),
            }
        }
    }
}

fn ended(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
            debug!(error = %err, "peer went away during throughput phase");
        }
        _ => debug!(error = %err, "throughput exchange failed"),
    }
    false
}

/// Exchange one request per kept connection and count bytes in both
/// directions until `budget` runs out or the peer hangs up.
pub struct ThroughputProbe {
    budget: Duration,
}

impl ThroughputProbe {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub fn run(&self, run: &mut Run) -> Result<()> {
        let mut sessions = Vec::new();
        for (t, target) in run.targets_mut().iter_mut().enumerate() {
            let request = request_for(&target.host);
            for (e, ep) in target.endpoints.iter_mut().enumerate() {
                let Some(socket) = ep.take_socket() else { continue };
                sessions.push(Session {
                    slot: Slot {
                        target: t,
                        endpoint: e,
                    },
                    socket,
                    request: request.clone(),
                    written: 0,
                    counters: Throughput::default(),
                    done: false,
                });
            }
        }
        if sessions.is_empty() {
            return Ok(());
        }

        info!(connections = sessions.len(), budget = ?self.budget, "probing throughput");
        let start = Instant::now();
        let deadline = start + self.budget;
        let mut buf = vec![0u8; READ_CHUNK];
        let mut fds: Vec<libc::pollfd> = Vec::with_capacity(sessions.len());
        let mut active: Vec<usize> = Vec::with_capacity(sessions.len());

        loop {
            fds.clear();
            active.clear();
            for (i, s) in sessions.iter().enumerate().filter(|(_, s)| !s.done) {
                fds.push(libc::pollfd {
                    fd: s.socket.as_raw_fd(),
                    events: s.events(),
                    revents: 0,
                });
                active.push(i);
            }
            if active.is_empty() || Instant::now() >= deadline {
                break;
            }

            poll_fds(&mut fds, Some(deadline))?;
            let now = Instant::now();
            for (fd, &i) in fds.iter().zip(active.iter()) {
                let session = &mut sessions[i];
                let revents = fd.revents;
                if revents == 0 {
                    continue;
                }
                let mut open = true;
                if revents & libc::POLLOUT != 0 {
                    open = session.on_writable();
                }
                if open && revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                    open = session.on_readable(&mut buf);
                }
                if !open {
                    session.finish(now - start);
                }
            }
        }

        let end = Instant::now().min(deadline).max(start);
        for mut session in sessions {
            if !session.done {
                session.finish(end - start);
            }
            let ep = &mut run.targets_mut()[session.slot.target].endpoints[session.slot.endpoint];
            debug!(
                addr = %ep.addr(),
                sent = session.counters.sent,
                received = session.counters.received,
                "throughput measured"
            );
            ep.set_throughput(session.counters);
            // The socket closes as the session drops here.
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AddrInfo, Target};
    use crate::prober::{Race, RaceSettings};
    use std::net::TcpListener;
    use std::thread;

    fn connected_run(addr: std::net::SocketAddr) -> Run {
        let mut run = Run::new(1);
        run.push(Target::new("localhost", "0"), vec![AddrInfo::tcp(addr)]);
        let settings = RaceSettings {
            repeat: 1,
            timeout: Some(Duration::from_secs(2)),
            delay: Duration::ZERO,
            keep_connected: true,
        };
        Race::new(settings).run(&mut run).unwrap();
        run
    }

    #[test]
    fn request_names_the_host() {
        let req = String::from_utf8(request_for("example.org")).unwrap();
        assert!(req.starts_with("GET / HTTP/1.1\r\n"));
        assert!(req.contains("Host: example.org\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
    }

    #[test]
    fn counts_bytes_until_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut req = [0u8; 512];
            let n = conn.read(&mut req).unwrap();
            conn.write_all(&vec![b'x'; 64 * 1024]).unwrap();
            n
        });

        let mut run = connected_run(addr);
        ThroughputProbe::new(Duration::from_secs(2)).run(&mut run).unwrap();
        let got = server.join().unwrap();

        let ep = &run.targets()[0].endpoints[0];
        let tp = ep.throughput().copied().unwrap();
        assert_eq!(tp.sent, request_for("localhost").len() as u64);
        assert!(got > 0);
        assert_eq!(tp.received, 64 * 1024);
        assert!(tp.duration <= Duration::from_secs(2));
        assert!(ep.socket().is_none());
    }

    #[test]
    fn silent_peer_is_bounded_by_budget() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut run = connected_run(addr);
        // Accept but never answer.
        let (_conn, _) = listener.accept().unwrap();

        let budget = Duration::from_millis(100);
        let start = Instant::now();
        ThroughputProbe::new(budget).run(&mut run).unwrap();
        assert!(start.elapsed() >= budget);

        let tp = run.targets()[0].endpoints[0].throughput().copied().unwrap();
        assert_eq!(tp.received, 0);
        assert_eq!(tp.duration, budget);
    }

    #[test]
    fn nothing_kept_means_nothing_measured() {
        let mut run = Run::new(1);
        run.push(Target::new("nowhere.invalid", "80"), Vec::new());
        ThroughputProbe::new(Duration::from_millis(50)).run(&mut run).unwrap();
        assert!(run.endpoints().all(|ep| ep.throughput().is_none()));
    }
}
