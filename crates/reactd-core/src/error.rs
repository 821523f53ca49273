//! reactd error types.
//!
//! One enum per layer. Lower layers (transport, table) only report what
//! happened; the reactor and the worker pool decide on teardown or retry.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Setup-fatal errors. Returned from reactor construction and from the
/// event loop itself when the readiness facility fails.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Binding or listening on the configured address failed.
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// epoll_create1 / epoll_ctl / epoll_wait failed.
    #[error("epoll {op} failed: {source}")]
    Poller {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    /// The wake-up eventfd could not be created.
    #[error("eventfd setup failed: {0}")]
    Waker(#[source] io::Error),
    /// Certificate or private key material could not be loaded.
    #[error("tls setup failed: {0}")]
    Tls(String),
    /// Configuration rejected by `ServerConfig::validate`.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Any other OS error during setup.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Per-connection fatal transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was already closed.
    #[error("transport closed")]
    Closed,
    /// The peer went away in the middle of a handshake.
    #[error("peer closed the connection during handshake")]
    HandshakeEof,
    /// TLS protocol violation.
    #[error("tls protocol error: {0}")]
    Protocol(String),
    /// Unrecoverable socket error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// A blocking write on a worker thread exceeded its deadline.
    #[error("write timed out")]
    WriteTimeout,
}

/// Worker pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Shutdown has been signaled; no new tasks are accepted.
    #[error("worker pool closed")]
    Closed,
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Connection table errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    /// No live connection matches the key.
    #[error("connection not found")]
    NotFound,
    /// A live connection already owns this descriptor.
    #[error("descriptor already registered")]
    Duplicate,
}

/// Errors raised from inside a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Other(String),
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be at least 1")]
    Zero { field: &'static str },
    #[error("tls {which} file not readable: {path}")]
    Unreadable { which: &'static str, path: PathBuf },
}

pub type Result<T> = std::result::Result<T, ReactorError>;
