//! Connection state and the connection table.
//!
//! The table is the only state shared between the reactor thread and the
//! worker threads. The reactor inserts on accept and removes on teardown;
//! workers look a connection up by `ConnKey` to write a response.
//!
//! Locking discipline:
//! - one table-wide lock makes `insert` / `remove` / `get` mutually
//!   exclusive; it is never held while a connection lock is taken;
//! - each connection has its own lock, held by whoever is doing I/O on it.
//!   The reactor only ever `try_lock`s a connection that has been handed to
//!   a worker, so a slow response write cannot stall the event loop.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

use reactd_core::conn::{ConnKey, ConnMeta, Phase};
use reactd_core::error::{TableError, TransportError};
use reactd_core::transport::{IoStatus, Transport, TransportKind};

pub type SharedConn = Arc<Mutex<Connection>>;

/// One accepted client socket.
pub struct Connection {
    key: ConnKey,
    peer: Option<SocketAddr>,
    phase: Phase,
    transport: Box<dyn Transport>,
    /// Accumulated request bytes, kept across readiness events.
    inbox: Vec<u8>,
    /// A complete request has been handed to the worker pool.
    dispatched: bool,
    /// Write interest is registered with the poller.
    write_armed: bool,
}

impl Connection {
    pub fn new(key: ConnKey, peer: Option<SocketAddr>, transport: Box<dyn Transport>) -> Self {
        Self {
            key,
            peer,
            phase: Phase::Accepting,
            transport,
            inbox: Vec::new(),
            dispatched: false,
            write_armed: false,
        }
    }

    #[inline]
    pub fn key(&self) -> ConnKey {
        self.key
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[inline]
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn meta(&self) -> ConnMeta {
        ConnMeta { key: self.key, peer: self.peer, kind: self.kind() }
    }

    /// Move to `next` if the state machine allows it.
    pub fn advance(&mut self, next: Phase) -> bool {
        if self.phase.can_advance_to(next) {
            trace!(conn = %self.key, from = ?self.phase, to = ?next, "phase");
            self.phase = next;
            true
        } else {
            false
        }
    }

    /// Transport access for live connections only.
    pub fn transport_mut(&mut self) -> Result<&mut dyn Transport, TransportError> {
        if self.phase.is_terminal() {
            return Err(TransportError::Closed);
        }
        Ok(self.transport.as_mut())
    }

    pub fn inbox(&self) -> &[u8] {
        &self.inbox
    }

    pub fn inbox_mut(&mut self) -> &mut Vec<u8> {
        &mut self.inbox
    }

    /// Split the first `len` bytes off the inbox.
    pub fn take_request(&mut self, len: usize) -> Vec<u8> {
        let len = len.min(self.inbox.len());
        let rest = self.inbox.split_off(len);
        std::mem::replace(&mut self.inbox, rest)
    }

    #[inline]
    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    pub fn mark_dispatched(&mut self) {
        self.dispatched = true;
    }

    pub(crate) fn write_armed(&self) -> bool {
        self.write_armed
    }

    pub(crate) fn set_write_armed(&mut self, on: bool) {
        self.write_armed = on;
    }

    /// Tear the connection down.
    ///
    /// Returns `true` for the call that actually released the transport and
    /// `false` for every later call.
    pub fn close(&mut self) -> bool {
        if self.phase == Phase::Closed {
            return false;
        }
        if self.phase != Phase::Closing {
            self.phase = Phase::Closing;
        }
        self.transport.close();
        self.inbox = Vec::new();
        self.phase = Phase::Closed;
        trace!(conn = %self.key, "closed");
        true
    }

    /// Write all of `data`, waiting for writability between attempts.
    ///
    /// Runs on worker threads, which may block. Gives up with
    /// `WriteTimeout` once `timeout` has elapsed.
    pub fn send_all(&mut self, data: &[u8], timeout: Duration) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let fd = self.key.fd;
        let transport = self.transport_mut()?;

        let mut off = 0;
        while off < data.len() {
            match transport.write(&data[off..])? {
                IoStatus::Ready(n) => off += n,
                IoStatus::WouldBlock => wait_writable(fd, deadline)?,
                IoStatus::Eof => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
            }
        }
        while transport.wants_flush() {
            if transport.flush()? == IoStatus::WouldBlock {
                wait_writable(fd, deadline)?;
            }
        }
        Ok(())
    }
}

/// Block until `fd` is writable or `deadline` passes.
fn wait_writable(fd: RawFd, deadline: Instant) -> Result<(), TransportError> {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(TransportError::WriteTimeout);
        }
        let ms = (deadline - now).as_millis().clamp(1, i32::MAX as u128) as libc::c_int;
        let mut pfd = libc::pollfd { fd, events: libc::POLLOUT, revents: 0 };
        // Safety: pfd is a valid pollfd for the duration of the call.
        let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
        if rc > 0 {
            // POLLERR / POLLHUP surface on the next write.
            return Ok(());
        }
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
    }
}

/// Thread-safe `ConnKey → Connection` map.
#[derive(Default)]
pub struct ConnectionTable {
    slots: Mutex<HashMap<RawFd, (u64, SharedConn)>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Fails if its descriptor is still live.
    pub fn insert(&self, conn: Connection) -> Result<SharedConn, TableError> {
        let key = conn.key();
        let mut slots = self.slots.lock();
        if slots.contains_key(&key.fd) {
            return Err(TableError::Duplicate);
        }
        let shared = Arc::new(Mutex::new(conn));
        slots.insert(key.fd, (key.serial, Arc::clone(&shared)));
        Ok(shared)
    }

    /// Look up a live connection. A stale key (removed, or its descriptor
    /// now belongs to a newer connection) is `NotFound`.
    pub fn get(&self, key: ConnKey) -> Result<SharedConn, TableError> {
        let slots = self.slots.lock();
        match slots.get(&key.fd) {
            Some((serial, conn)) if *serial == key.serial => Ok(Arc::clone(conn)),
            _ => Err(TableError::NotFound),
        }
    }

    /// Reactor-side lookup by descriptor.
    pub fn find(&self, fd: RawFd) -> Option<(ConnKey, SharedConn)> {
        let slots = self.slots.lock();
        slots
            .get(&fd)
            .map(|(serial, conn)| (ConnKey::new(fd, *serial), Arc::clone(conn)))
    }

    /// Remove a connection. Only the first remove of a key succeeds.
    pub fn remove(&self, key: ConnKey) -> Result<SharedConn, TableError> {
        let mut slots = self.slots.lock();
        match slots.get(&key.fd) {
            Some((serial, _)) if *serial == key.serial => {}
            _ => return Err(TableError::NotFound),
        }
        slots
            .remove(&key.fd)
            .map(|(_, conn)| conn)
            .ok_or(TableError::NotFound)
    }

    pub fn contains(&self, key: ConnKey) -> bool {
        self.get(key).is_ok()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Remove everything (shutdown path).
    pub fn drain(&self) -> Vec<(ConnKey, SharedConn)> {
        self.slots
            .lock()
            .drain()
            .map(|(fd, (serial, conn))| (ConnKey::new(fd, serial), conn))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactd_core::transport::{HandshakeStatus, Result as TResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Transport that counts how often it was released.
    struct CountingTransport {
        closes: Arc<AtomicUsize>,
        closed: bool,
        sink: Vec<u8>,
    }

    impl CountingTransport {
        fn boxed(closes: &Arc<AtomicUsize>) -> Box<dyn Transport> {
            Box::new(Self { closes: Arc::clone(closes), closed: false, sink: Vec::new() })
        }
    }

    impl Transport for CountingTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Plain
        }
        fn handshake(&mut self) -> TResult<HandshakeStatus> {
            Ok(HandshakeStatus::Done)
        }
        fn read(&mut self, _buf: &mut [u8]) -> TResult<IoStatus> {
            Ok(IoStatus::WouldBlock)
        }
        fn write(&mut self, buf: &[u8]) -> TResult<IoStatus> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            self.sink.extend_from_slice(buf);
            Ok(IoStatus::Ready(buf.len()))
        }
        fn flush(&mut self) -> TResult<IoStatus> {
            Ok(IoStatus::Ready(0))
        }
        fn wants_flush(&self) -> bool {
            false
        }
        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn conn(fd: RawFd, serial: u64, closes: &Arc<AtomicUsize>) -> Connection {
        Connection::new(ConnKey::new(fd, serial), None, CountingTransport::boxed(closes))
    }

    #[test]
    fn test_insert_get_remove() {
        let closes = Arc::new(AtomicUsize::new(0));
        let table = ConnectionTable::new();
        let key = ConnKey::new(10, 1);
        table.insert(conn(10, 1, &closes)).unwrap();
        assert!(table.get(key).is_ok());
        assert_eq!(table.len(), 1);

        table.remove(key).unwrap();
        assert_eq!(table.get(key).err(), Some(TableError::NotFound));
        assert_eq!(table.remove(key).err(), Some(TableError::NotFound));
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_fd_rejected() {
        let closes = Arc::new(AtomicUsize::new(0));
        let table = ConnectionTable::new();
        table.insert(conn(5, 1, &closes)).unwrap();
        assert_eq!(table.insert(conn(5, 2, &closes)).err(), Some(TableError::Duplicate));
    }

    #[test]
    fn test_stale_key_after_fd_reuse() {
        let closes = Arc::new(AtomicUsize::new(0));
        let table = ConnectionTable::new();
        let old = ConnKey::new(7, 1);
        let new = ConnKey::new(7, 2);
        table.insert(conn(7, 1, &closes)).unwrap();
        table.remove(old).unwrap();
        table.insert(conn(7, 2, &closes)).unwrap();

        assert_eq!(table.get(old).err(), Some(TableError::NotFound));
        assert_eq!(table.remove(old).err(), Some(TableError::NotFound));
        assert!(table.get(new).is_ok());
        let (found, _) = table.find(7).unwrap();
        assert_eq!(found, new);
    }

    #[test]
    fn test_close_is_idempotent() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut c = conn(3, 1, &closes);
        assert!(c.advance(Phase::Ready));
        assert!(c.close());
        assert_eq!(c.phase(), Phase::Closed);
        assert!(!c.close());
        assert!(!c.close());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closed_connection_rejects_io() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut c = conn(3, 1, &closes);
        c.advance(Phase::Ready);
        c.close();
        assert!(matches!(c.transport_mut(), Err(TransportError::Closed)));
        assert!(matches!(
            c.send_all(b"late", Duration::from_millis(10)),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_send_all_on_live_connection() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut c = conn(3, 1, &closes);
        c.advance(Phase::Ready);
        c.send_all(b"hello", Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_take_request_keeps_tail() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut c = conn(3, 1, &closes);
        c.inbox_mut().extend_from_slice(b"GET / HTTP/1.1\r\n\r\nextra");
        let req = c.take_request(18);
        assert_eq!(req, b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(c.inbox(), b"extra");
    }

    #[test]
    fn test_no_stale_reads_across_threads() {
        let closes = Arc::new(AtomicUsize::new(0));
        let table = Arc::new(ConnectionTable::new());
        let removed: Arc<Mutex<Vec<ConnKey>>> = Arc::new(Mutex::new(Vec::new()));

        // Reactor-like thread: insert then remove, recording removals.
        let writer = {
            let table = Arc::clone(&table);
            let removed = Arc::clone(&removed);
            let closes = Arc::clone(&closes);
            thread::spawn(move || {
                for serial in 0..2000u64 {
                    let fd = (serial % 16) as RawFd;
                    let key = ConnKey::new(fd, serial);
                    table.insert(conn(fd, serial, &closes)).unwrap();
                    table.remove(key).unwrap();
                    removed.lock().push(key);
                }
            })
        };

        // Worker-like threads: every key already recorded as removed must
        // stay NotFound forever.
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                let removed = Arc::clone(&removed);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot: Vec<ConnKey> = removed.lock().clone();
                        for key in snapshot {
                            assert_eq!(table.get(key).err(), Some(TableError::NotFound));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert!(table.is_empty());
    }
}
