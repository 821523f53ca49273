//! # Reactor — the readiness loop
//!
//! Runs on one thread and owns the listener, the poller and the accept
//! path. It never blocks on anything but `epoll_wait`:
//!
//! 1. Listener readable → accept until `EAGAIN`, admit each client
//!    (limit check, non-blocking, table insert, edge-triggered register).
//! 2. Client event → drive the connection: TLS handshake steps, then
//!    drain reads into the connection's inbox and ask the handler to frame.
//!    A complete request is submitted to the worker pool as a `Task`.
//! 3. Waker readable → tear down every connection whose worker finished.
//!
//! Workers write the response themselves and then post the connection key
//! on the completion queue. Only the reactor removes connections from the
//! table and closes them, so deregistration always precedes the close and a
//! recycled descriptor can never receive a stale event.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use tracing::{debug, info, trace, warn};

use reactd_core::config::ServerConfig;
use reactd_core::conn::{ConnKey, ConnMeta, Phase};
use reactd_core::error::{ReactorError, Result, TaskError};
use reactd_core::handler::{Framing, RequestHandler};
use reactd_core::transport::{HandshakeStatus, IoStatus, Transport, TransportKind};
use reactd_core::worker::{Task, WorkerPool};

use crate::conn_table::{Connection, ConnectionTable};
use crate::eventfd_waker::EventFdWaker;
use crate::plain::PlainTransport;
use crate::poller::{Event, Interest, Poller};
use crate::tls::{load_server_config, TlsTransport};

const LISTENER: u32 = 0;
const WAKER: u32 = 1;
const CLIENT: u32 = 2;

/// State shared between the reactor thread, the workers and handles.
struct Shared {
    waker: EventFdWaker,
    /// Keys of connections whose response has been written (or abandoned).
    completions: SegQueue<ConnKey>,
    shutdown: AtomicBool,
}

impl Shared {
    fn complete(&self, key: ConnKey) {
        self.completions.push(key);
        if let Err(e) = self.waker.wake() {
            warn!(conn = %key, error = %e, "failed to wake reactor");
        }
    }
}

/// Posts the completion when dropped, so a panicking handler still gets
/// its connection torn down.
struct CompletionGuard {
    shared: Arc<Shared>,
    key: ConnKey,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.shared.complete(self.key);
    }
}

/// Cloneable control handle for a running reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
    table: Arc<ConnectionTable>,
}

impl ReactorHandle {
    /// Ask the loop to stop. Safe to call from any thread, any number of
    /// times.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            debug!("reactor shutdown requested");
        }
        if let Err(e) = self.shared.waker.wake() {
            warn!(error = %e, "failed to wake reactor");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Live connections right now.
    pub fn connections(&self) -> usize {
        self.table.len()
    }
}

/// What to do with a connection after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Keep,
    Teardown,
}

pub struct Reactor {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    poller: Poller,
    shared: Arc<Shared>,
    table: Arc<ConnectionTable>,
    handler: Arc<dyn RequestHandler>,
    pool: Arc<dyn WorkerPool>,
    tls: Option<Arc<rustls::ServerConfig>>,
    /// Source of `ConnKey::serial`.
    next_serial: u64,
    /// Read buffer reused for every socket read.
    scratch: Vec<u8>,
}

impl Reactor {
    /// Bind the listener and set up the poller, the waker and (optionally)
    /// TLS. Every failure here is fatal to startup.
    pub fn new(
        config: ServerConfig,
        handler: Arc<dyn RequestHandler>,
        pool: Arc<dyn WorkerPool>,
    ) -> Result<Self> {
        config.validate()?;

        let tls = config.tls.as_ref().map(load_server_config).transpose()?;

        let listener = TcpListener::bind(config.bind_addr)
            .map_err(|source| ReactorError::Bind { addr: config.bind_addr, source })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let poller = Poller::new(config.max_events)
            .map_err(|source| ReactorError::Poller { op: "create", source })?;
        let waker = EventFdWaker::create().map_err(ReactorError::Waker)?;

        poller
            .register(listener.as_raw_fd(), LISTENER, Interest::READ)
            .map_err(|source| ReactorError::Poller { op: "add listener", source })?;
        poller
            .register(waker.fd(), WAKER, Interest::READ)
            .map_err(|source| ReactorError::Poller { op: "add waker", source })?;

        info!(
            addr = %local_addr,
            tls = tls.is_some(),
            workers = pool.total_workers(),
            max_connections = config.max_connections,
            "listening"
        );

        let scratch = vec![0u8; config.read_chunk];
        Ok(Self {
            config,
            listener,
            local_addr,
            poller,
            shared: Arc::new(Shared {
                waker,
                completions: SegQueue::new(),
                shutdown: AtomicBool::new(false),
            }),
            table: Arc::new(ConnectionTable::new()),
            handler,
            pool,
            tls,
            next_serial: 0,
            scratch,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle { shared: Arc::clone(&self.shared), table: Arc::clone(&self.table) }
    }

    /// Run the event loop until `ReactorHandle::shutdown`. Returns an error
    /// only if the readiness facility itself fails.
    pub fn run(mut self) -> Result<()> {
        let mut events: Vec<Event> = Vec::with_capacity(self.config.max_events);
        let result = loop {
            if self.shared.shutdown.load(Ordering::Acquire) {
                break Ok(());
            }
            if let Err(source) = self.poller.wait(&mut events, None) {
                break Err(ReactorError::Poller { op: "wait", source });
            }
            for ev in &events {
                match ev.token as u32 {
                    LISTENER => self.accept_all(),
                    WAKER => {
                        self.shared.waker.drain();
                        self.reap_completions();
                    }
                    _ => self.on_client(ev),
                }
            }
        };
        self.stop();
        result
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => {
                    trace!("client gone before accept");
                }
                Err(e) => {
                    // EMFILE/ENFILE and friends: the pending clients stay
                    // queued until the next listener edge.
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.table.len() >= self.config.max_connections {
            warn!(%peer, limit = self.config.max_connections, "connection limit reached, dropping client");
            return;
        }
        if let Err(e) = stream.set_nonblocking(true) {
            warn!(%peer, error = %e, "set_nonblocking failed");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            trace!(%peer, error = %e, "set_nodelay failed");
        }

        let fd = stream.as_raw_fd();
        self.next_serial += 1;
        let key = ConnKey::new(fd, self.next_serial);

        let transport: Box<dyn Transport> = match &self.tls {
            Some(cfg) => match TlsTransport::new(Arc::clone(cfg), stream) {
                Ok(t) => Box::new(t),
                Err(e) => {
                    warn!(conn = %key, error = %e, "tls session setup failed");
                    return;
                }
            },
            None => Box::new(PlainTransport::new(stream)),
        };

        let shared = match self.table.insert(Connection::new(key, Some(peer), transport)) {
            Ok(c) => c,
            Err(e) => {
                warn!(conn = %key, error = %e, "connection table insert failed");
                return;
            }
        };
        if let Err(e) = self.poller.register(fd, CLIENT, Interest::READ) {
            warn!(conn = %key, error = %e, "epoll register failed");
            if let Err(e) = self.table.remove(key) {
                trace!(conn = %key, error = %e, "table remove after failed register");
            }
            shared.lock().close();
            return;
        }
        debug!(conn = %key, %peer, "accepted");

        let mut conn = shared.lock();
        if self.progress(&mut conn) == Next::Teardown {
            self.finish(&mut conn);
        }
    }

    fn on_client(&mut self, ev: &Event) {
        let Some((key, shared)) = self.table.find(ev.fd) else {
            trace!(fd = ev.fd, "event for unknown descriptor");
            return;
        };
        // A worker holds the lock while it writes the response; that
        // connection is the worker's until its completion arrives.
        let Some(mut conn) = shared.try_lock() else {
            trace!(conn = %key, "busy, skipping event");
            return;
        };
        if conn.is_dispatched() {
            return;
        }
        if ev.hangup {
            trace!(conn = %key, "hangup");
        }
        // Write interest is only armed during the handshake; a late
        // EPOLLOUT edge on a ready connection has nothing to drain.
        if ev.write_only() && conn.phase() == Phase::Ready {
            trace!(conn = %key, "write edge, nothing to read");
            return;
        }
        if self.progress(&mut conn) == Next::Teardown {
            self.finish(&mut conn);
        }
    }

    /// Advance a connection as far as the socket allows.
    fn progress(&mut self, conn: &mut Connection) -> Next {
        loop {
            match conn.phase() {
                Phase::Accepting => {
                    let next = match conn.kind() {
                        TransportKind::Plain => Phase::Ready,
                        TransportKind::Encrypted => Phase::Handshaking,
                    };
                    conn.advance(next);
                }
                Phase::Handshaking => match self.handshake_step(conn) {
                    Some(next) => return next,
                    None => {
                        conn.advance(Phase::Ready);
                        debug!(conn = %conn.key(), "handshake complete");
                    }
                },
                Phase::Ready => return self.read_request(conn),
                Phase::Closing | Phase::Closed => return Next::Teardown,
            }
        }
    }

    /// One handshake continuation. `None` means the handshake is done.
    fn handshake_step(&mut self, conn: &mut Connection) -> Option<Next> {
        let key = conn.key();
        let status = match conn.transport_mut().and_then(|t| t.handshake()) {
            Ok(s) => s,
            Err(e) => {
                debug!(conn = %key, error = %e, "handshake failed");
                return Some(Next::Teardown);
            }
        };
        let want_write = status == HandshakeStatus::WantWrite;
        if conn.write_armed() != want_write {
            let interest = if want_write { Interest::READ_WRITE } else { Interest::READ };
            if let Err(e) = self.poller.reregister(key.fd, CLIENT, interest) {
                warn!(conn = %key, error = %e, "epoll modify failed");
                return Some(Next::Teardown);
            }
            conn.set_write_armed(want_write);
        }
        match status {
            HandshakeStatus::Done => None,
            HandshakeStatus::WantRead | HandshakeStatus::WantWrite => Some(Next::Keep),
        }
    }

    /// Drain the socket into the inbox, then frame.
    fn read_request(&mut self, conn: &mut Connection) -> Next {
        let key = conn.key();
        let limit = self.config.max_request_bytes;
        let mut eof = false;
        loop {
            let status = match conn.transport_mut().and_then(|t| t.read(&mut self.scratch)) {
                Ok(s) => s,
                Err(e) => {
                    debug!(conn = %key, error = %e, "read failed");
                    return Next::Teardown;
                }
            };
            match status {
                IoStatus::Ready(n) => {
                    conn.inbox_mut().extend_from_slice(&self.scratch[..n]);
                    if conn.inbox().len() > limit {
                        warn!(conn = %key, limit, "request too large, closing");
                        return Next::Teardown;
                    }
                }
                IoStatus::WouldBlock => break,
                IoStatus::Eof => {
                    eof = true;
                    break;
                }
            }
        }

        if conn.inbox().is_empty() {
            return if eof { Next::Teardown } else { Next::Keep };
        }
        match self.handler.frame(conn.inbox()) {
            Framing::Complete(len) => {
                let request = conn.take_request(len);
                conn.mark_dispatched();
                self.dispatch(conn.meta(), request)
            }
            Framing::Incomplete if eof => {
                debug!(conn = %key, buffered = conn.inbox().len(), "peer closed mid-request");
                Next::Teardown
            }
            Framing::Incomplete => Next::Keep,
            Framing::Invalid(reason) => {
                warn!(conn = %key, reason, "malformed request, closing");
                Next::Teardown
            }
        }
    }

    /// Hand a complete request to the pool. The task produces the response,
    /// writes it, and always posts a completion.
    fn dispatch(&self, meta: ConnMeta, request: Vec<u8>) -> Next {
        let key = meta.key;
        let table = Arc::clone(&self.table);
        let handler = Arc::clone(&self.handler);
        let shared = Arc::clone(&self.shared);
        let timeout: Duration = self.config.write_timeout;

        let task = Task::new(move || {
            let _done = CompletionGuard { shared, key };
            let response = handler.handle(&request, &meta);
            let written = table
                .get(key)
                .map_err(TaskError::from)
                .and_then(|conn| conn.lock().send_all(&response, timeout).map_err(TaskError::from));
            match &written {
                Ok(()) => trace!(conn = %key, bytes = response.len(), "response written"),
                Err(e) => debug!(conn = %key, error = %e, "response not delivered"),
            }
            written
        });

        match self.pool.submit(task) {
            Ok(()) => {
                trace!(conn = %key, "dispatched");
                Next::Keep
            }
            Err(e) => {
                // The task never ran, so no completion will arrive.
                warn!(conn = %key, error = %e, "submit failed");
                Next::Teardown
            }
        }
    }

    /// Remove, deregister and close a connection the reactor holds locked.
    fn finish(&self, conn: &mut Connection) {
        let key = conn.key();
        if self.table.remove(key).is_err() {
            return;
        }
        self.close_locked(conn);
    }

    fn close_locked(&self, conn: &mut Connection) {
        let key = conn.key();
        // Deregister before the descriptor is released.
        if let Err(e) = self.deregister(key.fd) {
            trace!(conn = %key, error = %e, "epoll delete failed");
        }
        conn.advance(Phase::Closing);
        if conn.close() {
            debug!(conn = %key, "closed");
        }
    }

    fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.poller.deregister(fd)
    }

    fn reap_completions(&self) {
        while let Some(key) = self.shared.completions.pop() {
            // Stale keys (already torn down) are NotFound and skipped.
            if let Ok(shared) = self.table.remove(key) {
                let mut conn = shared.lock();
                self.close_locked(&mut conn);
            }
        }
    }

    /// Stop accepting, let queued work finish, close whatever is left.
    fn stop(&mut self) {
        info!("reactor stopping");
        if let Err(e) = self.deregister(self.listener.as_raw_fd()) {
            trace!(error = %e, "listener deregister failed");
        }
        self.pool.shutdown();
        self.reap_completions();

        let leftover = self.table.drain();
        let n = leftover.len();
        for (_, shared) in leftover {
            let mut conn = shared.lock();
            self.close_locked(&mut conn);
        }
        info!(closed = n, "reactor stopped");
    }
}
