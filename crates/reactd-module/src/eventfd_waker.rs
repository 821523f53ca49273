//! `EventFdWaker` — wakes the reactor out of `epoll_wait`.
//!
//! Workers and the shutdown handle write to an eventfd that the reactor has
//! registered for read interest. Coalescing: multiple `wake()` calls before
//! the reactor drains the counter produce a single readiness event.

use std::io;
use std::os::unix::io::RawFd;

pub struct EventFdWaker {
    fd: RawFd,
}

impl EventFdWaker {
    /// Create a new non-blocking eventfd. The waker owns it and closes it
    /// on drop.
    pub fn create() -> io::Result<Self> {
        // Safety: plain syscall, no pointers involved.
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Bump the counter. Never blocks.
    pub fn wake(&self) -> io::Result<()> {
        let val: u64 = 1;
        // Safety: writes exactly 8 bytes from a live u64.
        let ret = unsafe {
            libc::write(
                self.fd,
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN: counter saturated, a wakeup is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Reset the counter. Returns how many wakes were coalesced.
    pub fn drain(&self) -> u64 {
        let mut val: u64 = 0;
        // Safety: reads exactly 8 bytes into a live u64.
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            0
        } else {
            val
        }
    }
}

impl Drop for EventFdWaker {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wakes_coalesce() {
        let w = EventFdWaker::create().unwrap();
        w.wake().unwrap();
        w.wake().unwrap();
        w.wake().unwrap();
        assert_eq!(w.drain(), 3);
        // Drained: nothing pending.
        assert_eq!(w.drain(), 0);
    }
}
