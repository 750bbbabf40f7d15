use std::io;
use std::os::fd::{AsRawFd, RawFd};

/// Exclusive advisory lock on an output descriptor, so concurrent runs
/// writing into the same file do not interleave their reports.
///
/// Released when dropped.
#[derive(Debug)]
pub struct OutputLock {
    fd: RawFd,
}

impl OutputLock {
    /// Block until the exclusive lock on `out` is held.
    pub fn acquire(out: &impl AsRawFd) -> io::Result<Self> {
        let fd = out.as_raw_fd();
        loop {
            // SAFETY: flock only inspects the descriptor number.
            if unsafe { libc::flock(fd, libc::LOCK_EX) } == 0 {
                return Ok(Self { fd });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Like `acquire`, but descriptors that cannot be locked (terminals,
    /// some pipes) are written to unlocked.
    pub fn try_acquire(out: &impl AsRawFd) -> Option<Self> {
        match Self::acquire(out) {
            Ok(lock) => Some(lock),
            Err(e) => {
                tracing::debug!(error = %e, "output not lockable, writing unlocked");
                None
            }
        }
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        // SAFETY: see `acquire`.
        unsafe {
            libc::flock(self.fd, libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn scratch(name: &str) -> (std::path::PathBuf, File) {
        let path = std::env::temp_dir().join(format!("happy-lock-{}-{name}", std::process::id()));
        let file = File::create(&path).unwrap();
        (path, file)
    }

    fn try_lock(fd: RawFd) -> bool {
        unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) == 0 }
    }

    #[test]
    fn lock_excludes_other_descriptions_until_dropped() {
        let (path, file) = scratch("excl");
        let other = File::open(&path).unwrap();

        let guard = OutputLock::acquire(&file).unwrap();
        assert!(!try_lock(other.as_raw_fd()));
        drop(guard);
        assert!(try_lock(other.as_raw_fd()));

        std::fs::remove_file(path).unwrap();
    }
}
