//! # reactd-core — Trait definitions for reactd
//!
//! This crate defines the seams between the reactor, the transports, the
//! worker pool and the request/response boundary. It carries no OS code;
//! default implementations live in `reactd-module`.
//!
//! ## Modules
//!
//! - `conn` - connection identity, phase and metadata
//! - `transport` - plain / encrypted transport capability set
//! - `worker` - worker pool trait and the `Task` unit of work
//! - `handler` - request framing and handling boundary
//! - `config` - server configuration and `REACTD_*` overrides
//! - `error` - error types for every layer

pub mod conn;
pub mod transport;
pub mod worker;
pub mod handler;
pub mod config;
pub mod error;

// Re-exports for convenience
pub use conn::{ConnKey, ConnMeta, Phase};
pub use transport::{HandshakeStatus, IoStatus, Transport, TransportKind};
pub use worker::{Task, TaskOutcome, WorkerPool};
pub use handler::{Framing, RequestHandler};
pub use config::{ServerConfig, TlsPaths};
pub use error::{ConfigError, PoolError, ReactorError, TableError, TaskError, TransportError};
