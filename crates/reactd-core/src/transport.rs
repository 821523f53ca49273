//! Transport abstraction.
//!
//! A `Transport` is the capability set the reactor and the workers need from
//! a client socket: non-blocking read, write, flush, handshake progression
//! and close.
//!
//! # Implementors
//!
//! - `PlainTransport` (reactd-module): direct socket I/O. `handshake()` is
//!   immediately `Done`.
//! - `TlsTransport` (reactd-module): wraps the socket with a rustls
//!   `ServerConnection` and drives the handshake state machine.

use std::fmt;

use crate::error::TransportError;

pub type Result<T> = std::result::Result<T, TransportError>;

/// Which transport a connection runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Plain,
    Encrypted,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Plain => write!(f, "plain"),
            TransportKind::Encrypted => write!(f, "tls"),
        }
    }
}

/// Outcome of a non-blocking I/O call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// `n` bytes were transferred.
    Ready(usize),
    /// Nothing can be transferred right now. Not an error.
    WouldBlock,
    /// The peer closed its side (reads only).
    Eof,
}

/// Outcome of one handshake continuation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Handshake complete; application data may flow.
    Done,
    /// Needs more input from the peer: keep read interest.
    WantRead,
    /// Has output it could not flush: add write interest.
    WantWrite,
}

/// Polymorphic transport.
///
/// **Contract:**
/// - No method blocks. Socket back-pressure surfaces as `WouldBlock`.
/// - `handshake()` may be called repeatedly until it reports `Done`; repeated
///   calls never lose buffered data.
/// - `close()` is idempotent. The first call releases the session state and
///   the socket; later calls do nothing.
/// - Any method other than `close()`/`is_closed()` on a closed transport
///   returns `TransportError::Closed`.
pub trait Transport: Send {
    /// Plain or Encrypted.
    fn kind(&self) -> TransportKind;

    /// Advance the handshake by as much as the socket allows.
    fn handshake(&mut self) -> Result<HandshakeStatus>;

    /// Read application bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<IoStatus>;

    /// Write application bytes from `buf`.
    ///
    /// For encrypted transports `Ready(n)` means `n` plaintext bytes were
    /// accepted; ciphertext may still be pending (see `wants_flush`).
    fn write(&mut self, buf: &[u8]) -> Result<IoStatus>;

    /// Push buffered output to the socket.
    fn flush(&mut self) -> Result<IoStatus>;

    /// Whether buffered output remains after the last `write`/`flush`.
    fn wants_flush(&self) -> bool;

    /// Release the transport. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
