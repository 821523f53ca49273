//! Readiness facility.
//!
//! The reactor only needs edge-triggered readiness with per-descriptor
//! interest sets. Linux epoll is the only backend.

use std::os::unix::io::RawFd;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll;
        pub use epoll::EpollPoller as Poller;
    } else {
        compile_error!("reactd requires Linux epoll");
    }
}

/// Readiness interest for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest { read: true, write: false };
    pub const READ_WRITE: Interest = Interest { read: true, write: true };
}

/// One readiness report, already decoded from the backend's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: u64,
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the socket is in error.
    pub hangup: bool,
}

impl Event {
    /// Only writability changed: nothing to read, no hangup to observe.
    pub fn write_only(&self) -> bool {
        self.writable && !self.readable && !self.hangup
    }
}
