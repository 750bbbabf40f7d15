use std::io;
use thiserror::Error;

/// Failures that abort the whole run.
///
/// Everything that only affects a single endpoint (refused connects,
/// timeouts, unsupported families) is recorded as a sample instead.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
    #[error("getsockopt(SO_ERROR) failed: {0}")]
    SocketError(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
