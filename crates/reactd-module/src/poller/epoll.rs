//! Linux `epoll` backend, edge-triggered.
//!
//! Every descriptor is registered with `EPOLLET`: a readiness event fires
//! once per transition, so the caller must drain reads and accepts until
//! `EAGAIN` before waiting again.
//!
//! The 64-bit event payload carries the caller's token in the high half
//! and the descriptor in the low half, so the reactor can resolve an event
//! without a side table.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};

use super::{Event, Interest};

pub struct EpollPoller {
    epoll: RawFd,
    /// Reusable kernel event buffer; its length is the batch size.
    events: Vec<epoll_event>,
}

impl EpollPoller {
    /// Create an epoll instance returning at most `max_events` per wait.
    pub fn new(max_events: usize) -> io::Result<Self> {
        // Safety: plain syscall.
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll,
            events: vec![epoll_event { events: 0, u64: 0 }; max_events.max(1)],
        })
    }

    pub fn register(&self, fd: RawFd, token: u32, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, interest)
    }

    pub fn reregister(&self, fd: RawFd, token: u32, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, interest)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        // Safety: a null event pointer is permitted for EPOLL_CTL_DEL.
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u32, interest: Interest) -> io::Result<()> {
        let mut flags = EPOLLET | EPOLLRDHUP;
        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }
        let mut event = epoll_event {
            events: flags as u32,
            u64: ((token as u64) << 32) | (fd as u32 as u64),
        };
        // Safety: `event` outlives the call.
        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait for readiness. `None` blocks indefinitely. An interrupted wait
    /// returns with no events.
    pub fn wait(&mut self, out: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<()> {
        out.clear();
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        // Safety: the buffer holds `len` initialized entries.
        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        for ev in &self.events[..n as usize] {
            let bits = ev.events;
            let data = ev.u64;
            out.push(Event {
                token: data >> 32,
                fd: (data & 0xffff_ffff) as u32 as RawFd,
                readable: bits & (EPOLLIN as u32) != 0,
                writable: bits & (EPOLLOUT as u32) != 0,
                hangup: bits & ((EPOLLHUP | EPOLLERR | EPOLLRDHUP) as u32) != 0,
            });
        }
        Ok(())
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}
