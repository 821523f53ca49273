//! Connection identity, lifecycle phase and metadata.

use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;

use crate::transport::TransportKind;

/// Identifies one connection lifetime.
///
/// The descriptor alone is not enough: the OS reuses descriptor numbers as
/// soon as they are closed, so a worker still holding the key of a torn-down
/// connection must not resolve to the newcomer that got the same fd. The
/// serial is assigned by the reactor at accept and never repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnKey {
    pub fd: RawFd,
    pub serial: u64,
}

impl ConnKey {
    #[inline]
    pub const fn new(fd: RawFd, serial: u64) -> Self {
        Self { fd, serial }
    }
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fd{}#{}", self.fd, self.serial)
    }
}

/// Connection lifecycle phase.
///
/// ```text
/// Accepting ──plain──────────────► Ready ──► Closing ──► Closed
///     │                              ▲
///     └──tls──► Handshaking ─────────┘
///                   │
///                   └──fatal──► Closing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Accepting,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

impl Phase {
    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Accepting, Handshaking)
                | (Accepting, Ready)
                | (Accepting, Closing)
                | (Handshaking, Ready)
                | (Handshaking, Closing)
                | (Ready, Closing)
                | (Closing, Closed)
        )
    }

    /// Closing or Closed.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closing | Phase::Closed)
    }
}

/// Read-only connection metadata handed to the request handler.
#[derive(Debug, Clone)]
pub struct ConnMeta {
    pub key: ConnKey,
    pub peer: Option<SocketAddr>,
    pub kind: TransportKind,
}
