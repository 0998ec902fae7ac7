//! Pipe-backed binary event.

use std::os::fd::RawFd;

use crate::error::{Result, SyncError};

/// An object one thread waits on while another sets it.
///
/// Backed by a non-blocking pipe so that waiting composes with `poll` and a
/// millisecond timeout. Setting writes a byte; waiting polls the read end
/// without consuming, so a set event stays set until [`Event::reset`].
#[derive(Debug)]
pub struct Event {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Event {
    pub fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK) } == -1 {
            return Err(SyncError::os("pipe2"));
        }
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// Sets the event, waking any waiter.
    pub fn set(&self) {
        let buf = [0u8; 1];
        unsafe { libc::write(self.write_fd, buf.as_ptr().cast(), 1) };
    }

    /// Clears the event by draining the pipe.
    pub fn reset(&self) {
        let mut buf = [0u8; 16];
        while unsafe { libc::read(self.read_fd, buf.as_mut_ptr().cast(), buf.len()) } > 0 {}
    }

    /// Waits up to `ms` milliseconds for the event to be set; `None` waits
    /// indefinitely. Returns whether the event is set.
    pub fn wait(&self, ms: Option<i32>) -> bool {
        let mut fds = [libc::pollfd {
            fd: self.read_fd,
            events: libc::POLLIN,
            revents: 0,
        }];
        loop {
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, ms.unwrap_or(-1)) };
            if rc > 0 {
                return true;
            }
            if rc == 0 {
                return false;
            }
            if std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
                return false;
            }
        }
    }

    /// Whether the event is currently set.
    pub fn is_set(&self) -> bool {
        self.wait(Some(0))
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn test_set_wait_reset() {
        let event = Event::new().unwrap();
        assert!(!event.is_set());
        event.set();
        assert!(event.is_set());
        // non-consuming: still set
        assert!(event.is_set());
        event.reset();
        assert!(!event.is_set());
    }

    #[test]
    fn test_wait_timeout() {
        let event = Event::new().unwrap();
        let start = Instant::now();
        assert!(!event.wait(Some(50)));
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[test]
    fn test_cross_thread_set() {
        let event = Arc::new(Event::new().unwrap());
        let event2 = Arc::clone(&event);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            event2.set();
        });
        assert!(event.wait(Some(1000)));
    }
}
