use socket2::{SockAddr, Socket};
use std::io;
use std::time::Instant;
use tracing::{debug, info, trace};

use crate::error::{ProbeError, Result};
use crate::model::{AddrInfo, Endpoint, Outcome};

/// What happened when an attempt was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Begin {
    /// The connect is in flight (or already done); timed from the instant.
    Started(Instant),
    /// Setup or the immediate connect failed; one failed sample recorded.
    Failed,
    /// The address family or protocol is not available on this host.
    Unsupported,
}

fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(0)
}

fn is_unsupported(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EAFNOSUPPORT) | Some(libc::EPROTONOSUPPORT)
    )
}

fn is_in_progress(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINPROGRESS) | Some(libc::EINTR))
}

fn open(info: &AddrInfo) -> io::Result<Socket> {
    let socket = Socket::new(info.family, info.socktype, info.protocol)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Open a non-blocking socket for `ep` and issue the connect.
///
/// The attempt's start time is taken right before the connect call. Any
/// socket that does not end up owned by the endpoint is closed on return.
pub fn begin(ep: &mut Endpoint) -> Begin {
    let addr = ep.addr();
    let socket = match open(ep.info()) {
        Ok(socket) => socket,
        Err(e) if is_unsupported(&e) => {
            info!(%addr, error = %e, "address family not supported, skipping endpoint");
            ep.retire();
            return Begin::Unsupported;
        }
        Err(e) => {
            debug!(%addr, error = %e, "socket setup failed");
            ep.complete(Outcome::Failed(errno(&e)), Default::default(), false);
            return Begin::Failed;
        }
    };

    let started = Instant::now();
    match socket.connect(&SockAddr::from(addr)) {
        Ok(()) => {
            trace!(%addr, "connect completed immediately");
            ep.start(socket, started);
            Begin::Started(started)
        }
        Err(e) if is_in_progress(&e) => {
            trace!(%addr, "connect in progress");
            ep.start(socket, started);
            Begin::Started(started)
        }
        Err(e) => {
            debug!(%addr, error = %e, "connect failed");
            ep.complete(Outcome::Failed(errno(&e)), started.elapsed(), false);
            Begin::Failed
        }
    }
}

/// Read and clear the pending socket error of a finished connect.
///
/// A failing getsockopt is an environment fault, not an endpoint outcome.
pub fn pending_error(socket: &Socket) -> Result<Outcome> {
    match socket.take_error().map_err(ProbeError::SocketError)? {
        None => Ok(Outcome::Success),
        Some(e) => Ok(Outcome::Refused(errno(&e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EndpointState;
    use std::net::{SocketAddr, TcpListener};

    #[test]
    fn begin_starts_connect_to_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut ep = Endpoint::new(AddrInfo::tcp(listener.local_addr().unwrap()), 1);
        let before = Instant::now();

        let begun = begin(&mut ep);
        assert!(matches!(begun, Begin::Started(at) if at >= before));
        assert_eq!(ep.state(), EndpointState::Connecting);
        assert!(ep.socket().is_some());
        assert!(ep.samples().is_empty());
    }

    #[test]
    fn closed_port_never_leaks_socket() {
        // Grab a free port, then close it again so nothing listens there.
        let addr: SocketAddr = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap()
        };
        let mut ep = Endpoint::new(AddrInfo::tcp(addr), 1);
        match begin(&mut ep) {
            Begin::Started(_) => assert!(ep.socket().is_some()),
            Begin::Failed => {
                assert!(ep.socket().is_none());
                assert_eq!(ep.samples().len(), 1);
                assert!(!ep.samples()[0].is_success());
            }
            Begin::Unsupported => panic!("loopback IPv4 must be supported"),
        }
    }

    #[test]
    fn in_progress_detection() {
        assert!(is_in_progress(&io::Error::from_raw_os_error(libc::EINPROGRESS)));
        assert!(!is_in_progress(&io::Error::from_raw_os_error(libc::ECONNREFUSED)));
        assert!(is_unsupported(&io::Error::from_raw_os_error(libc::EAFNOSUPPORT)));
    }
}
