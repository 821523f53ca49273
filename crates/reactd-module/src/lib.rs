//! # reactd-module — Default implementations
//!
//! This crate provides the default implementation for every reactd trait
//! plus the reactor that ties them together.
//!
//! ## Default stack
//!
//! | Trait / role      | Default Impl       |
//! |-------------------|--------------------|
//! | WorkerPool        | FixedPool          |
//! | Transport (plain) | PlainTransport     |
//! | Transport (tls)   | TlsTransport       |
//! | Readiness         | Poller (epoll, ET) |
//! | Reactor wake-up   | EventFdWaker       |
//! | Connection state  | ConnectionTable    |
//!
//! ## Threads
//!
//! ```text
//!   reactor thread                       worker threads (N)
//!   ──────────────                       ──────────────────
//!   epoll_wait ◄──── eventfd ◄────────── completion queue push
//!     │ listener: accept until EAGAIN         ▲
//!     │ client:   handshake / read            │ write response
//!     │           frame → submit(Task) ──► FIFO ─► Task::run
//!     │ wake:     teardown completed conns
//!     ▼
//!   ConnectionTable (insert / remove)  ◄──── get (workers)
//! ```

pub mod fixed_pool;
pub mod conn_table;
pub mod plain;
pub mod tls;
pub mod poller;
pub mod eventfd_waker;
pub mod reactor;

pub use fixed_pool::FixedPool;
pub use conn_table::{Connection, ConnectionTable, SharedConn};
pub use plain::PlainTransport;
pub use tls::{load_server_config, TlsPhase, TlsTransport};
pub use reactor::{Reactor, ReactorHandle};
