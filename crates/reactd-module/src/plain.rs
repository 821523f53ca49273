//! `PlainTransport` — unencrypted socket I/O.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use reactd_core::error::TransportError;
use reactd_core::transport::{HandshakeStatus, IoStatus, Result, Transport, TransportKind};

/// Direct non-blocking socket I/O. There is nothing to negotiate, so the
/// handshake is immediately `Done`.
pub struct PlainTransport<S = TcpStream> {
    /// `None` once closed; dropping the socket closes the descriptor.
    sock: Option<S>,
}

impl<S: Read + Write + Send> PlainTransport<S> {
    /// Wrap a socket that is already in non-blocking mode.
    pub fn new(sock: S) -> Self {
        Self { sock: Some(sock) }
    }

    fn sock(&mut self) -> Result<&mut S> {
        self.sock.as_mut().ok_or(TransportError::Closed)
    }
}

/// Map one non-blocking read/write result. A zero-length transfer on a
/// non-empty buffer means the peer is gone.
pub(crate) fn io_status(res: io::Result<usize>, requested: usize) -> Option<Result<IoStatus>> {
    match res {
        Ok(0) if requested > 0 => Some(Ok(IoStatus::Eof)),
        Ok(n) => Some(Ok(IoStatus::Ready(n))),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Some(Ok(IoStatus::WouldBlock)),
        // Retry.
        Err(e) if e.kind() == io::ErrorKind::Interrupted => None,
        Err(e) => Some(Err(e.into())),
    }
}

impl<S: Read + Write + Send> Transport for PlainTransport<S> {
    fn kind(&self) -> TransportKind {
        TransportKind::Plain
    }

    fn handshake(&mut self) -> Result<HandshakeStatus> {
        self.sock()?;
        Ok(HandshakeStatus::Done)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<IoStatus> {
        let sock = self.sock()?;
        loop {
            if let Some(status) = io_status(sock.read(buf), buf.len()) {
                return status;
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<IoStatus> {
        let sock = self.sock()?;
        loop {
            if let Some(status) = io_status(sock.write(buf), buf.len()) {
                return status;
            }
        }
    }

    fn flush(&mut self) -> Result<IoStatus> {
        let sock = self.sock()?;
        match sock.flush() {
            Ok(()) => Ok(IoStatus::Ready(0)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoStatus::WouldBlock),
            Err(e) => Err(e.into()),
        }
    }

    fn wants_flush(&self) -> bool {
        false
    }

    fn close(&mut self) {
        self.sock = None;
    }

    fn is_closed(&self) -> bool {
        self.sock.is_none()
    }
}
