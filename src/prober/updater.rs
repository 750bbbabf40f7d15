use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::Result;
use crate::model::{Endpoint, Outcome};
use crate::prober::tcp_connect::pending_error;

/// Settle a connecting endpoint observed at `now`.
///
/// An attempt outstanding for at least `timeout` is recorded as a timeout
/// whether or not poll reported it. Otherwise a ready descriptor is
/// classified by its pending socket error. Returns whether a sample was
/// recorded.
pub fn update(
    ep: &mut Endpoint,
    now: Instant,
    ready: bool,
    timeout: Option<Duration>,
    keep_connected: bool,
) -> Result<bool> {
    if !ep.is_connecting() {
        return Ok(false);
    }
    let Some(started) = ep.started() else {
        return Ok(false);
    };
    let elapsed = now.saturating_duration_since(started);

    if timeout.is_some_and(|t| elapsed >= t) {
        debug!(addr = %ep.addr(), ?elapsed, "connect timed out");
        ep.complete(Outcome::Timeout, elapsed, false);
        return Ok(true);
    }
    if !ready {
        return Ok(false);
    }

    let outcome = match ep.socket() {
        Some(socket) => pending_error(socket)?,
        None => return Ok(false),
    };
    debug!(addr = %ep.addr(), ?elapsed, %outcome, "connect finished");
    ep.complete(outcome, elapsed, keep_connected);
    Ok(true)
}
