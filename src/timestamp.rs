use std::time::{Duration, SystemTime};

pub fn duration_us(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Seconds since the epoch, used to stamp machine-readable reports.
pub fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Convert a wait interval into a poll(2) timeout.
///
/// Rounds up so a wake-up never lands before the deadline it was computed
/// from, and `None` maps to an infinite wait.
pub fn poll_timeout_ms(wait: Option<Duration>) -> libc::c_int {
    match wait {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(ms as u64) < d {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}
