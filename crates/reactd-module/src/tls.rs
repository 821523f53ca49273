//! `TlsTransport` — TLS termination over a non-blocking socket (rustls).
//!
//! The handshake is resumable: each `handshake()` call pushes whatever
//! output rustls has, pulls whatever input the socket has, and reports
//! which direction it is blocked on. The reactor keeps calling it on every
//! readiness event until it reports `Done`.
//!
//! ```text
//! New ──► Handshaking ──► Established ──► Closing ──► Closed
//!              │                              ▲
//!              └──────────── fatal ───────────┘
//! ```

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ServerConfig, ServerConnection};
use tracing::{debug, trace};

use reactd_core::config::TlsPaths;
use reactd_core::error::{ReactorError, TransportError};
use reactd_core::transport::{HandshakeStatus, IoStatus, Result, Transport, TransportKind};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPhase {
    New,
    Handshaking,
    Established,
    Closing,
    Closed,
}

/// Load the certificate chain and private key into a server config shared
/// by every encrypted connection.
pub fn load_server_config(paths: &TlsPaths) -> std::result::Result<Arc<ServerConfig>, ReactorError> {
    let certs = load_certs(paths)?;
    let key = load_key(paths)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ReactorError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ReactorError::Tls(format!("certificate/key rejected: {}", e)))?;

    debug!(cert = %paths.cert.display(), "tls server config loaded");
    Ok(Arc::new(config))
}

fn open(path: &std::path::Path) -> std::result::Result<BufReader<File>, ReactorError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ReactorError::Tls(format!("{}: {}", path.display(), e)))
}

fn load_certs(paths: &TlsPaths) -> std::result::Result<Vec<CertificateDer<'static>>, ReactorError> {
    let mut reader = open(&paths.cert)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| ReactorError::Tls(format!("{}: {}", paths.cert.display(), e)))?;
    if certs.is_empty() {
        return Err(ReactorError::Tls(format!("no certificates in {}", paths.cert.display())));
    }
    Ok(certs)
}

fn load_key(paths: &TlsPaths) -> std::result::Result<PrivateKeyDer<'static>, ReactorError> {
    let mut reader = open(&paths.key)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ReactorError::Tls(format!("{}: {}", paths.key.display(), e)))?
        .ok_or_else(|| ReactorError::Tls(format!("no private key in {}", paths.key.display())))
}

pub struct TlsTransport<S = TcpStream> {
    /// `None` once closed.
    sock: Option<S>,
    session: ServerConnection,
    phase: TlsPhase,
}

impl<S: Read + Write + Send> TlsTransport<S> {
    /// Create a session over a socket already in non-blocking mode.
    pub fn new(config: Arc<ServerConfig>, sock: S) -> Result<Self> {
        let session =
            ServerConnection::new(config).map_err(|e| TransportError::Protocol(e.to_string()))?;
        Ok(Self { sock: Some(sock), session, phase: TlsPhase::New })
    }

    pub fn phase(&self) -> TlsPhase {
        self.phase
    }

    fn live(&self) -> Result<()> {
        if self.sock.is_none() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Push pending ciphertext to the socket.
    fn push_tls(&mut self) -> Result<IoStatus> {
        let sock = self.sock.as_mut().ok_or(TransportError::Closed)?;
        while self.session.wants_write() {
            match self.session.write_tls(sock) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(IoStatus::Ready(0))
    }

    /// Pull ciphertext from the socket and decrypt it.
    fn pull_tls(&mut self) -> Result<IoStatus> {
        let sock = self.sock.as_mut().ok_or(TransportError::Closed)?;
        let n = loop {
            match self.session.read_tls(sock) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(IoStatus::WouldBlock),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        };
        if n == 0 {
            return Ok(IoStatus::Eof);
        }
        if let Err(e) = self.session.process_new_packets() {
            // Best effort: let the peer see the alert.
            let _ = self.push_tls();
            return Err(TransportError::Protocol(e.to_string()));
        }
        Ok(IoStatus::Ready(n))
    }
}

impl<S: Read + Write + Send> Transport for TlsTransport<S> {
    fn kind(&self) -> TransportKind {
        TransportKind::Encrypted
    }

    fn handshake(&mut self) -> Result<HandshakeStatus> {
        self.live()?;
        match self.phase {
            TlsPhase::Established => return Ok(HandshakeStatus::Done),
            TlsPhase::New => self.phase = TlsPhase::Handshaking,
            _ => {}
        }
        loop {
            if self.push_tls()? == IoStatus::WouldBlock {
                return Ok(HandshakeStatus::WantWrite);
            }
            if !self.session.is_handshaking() {
                trace!(
                    version = ?self.session.protocol_version(),
                    suite = ?self.session.negotiated_cipher_suite().map(|s| s.suite()),
                    "tls established"
                );
                self.phase = TlsPhase::Established;
                return Ok(HandshakeStatus::Done);
            }
            match self.pull_tls()? {
                IoStatus::WouldBlock => return Ok(HandshakeStatus::WantRead),
                IoStatus::Eof => return Err(TransportError::HandshakeEof),
                IoStatus::Ready(_) => {}
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<IoStatus> {
        self.live()?;
        loop {
            // Plaintext may already be buffered from an earlier pull,
            // including data that arrived with the final handshake flight.
            match self.session.reader().read(buf) {
                Ok(0) if !buf.is_empty() => return Ok(IoStatus::Eof),
                Ok(n) => return Ok(IoStatus::Ready(n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                // Transport closed without close_notify.
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(IoStatus::Eof),
                Err(e) => return Err(e.into()),
            }
            match self.pull_tls()? {
                IoStatus::Ready(_) => {
                    // Post-handshake messages (key updates, tickets).
                    if self.session.wants_write() {
                        self.push_tls()?;
                    }
                }
                other => return Ok(other),
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<IoStatus> {
        self.live()?;
        // Make room in the session's send buffer first.
        self.push_tls()?;
        let n = self.session.writer().write(buf)?;
        self.push_tls()?;
        if n == 0 && !buf.is_empty() {
            return Ok(IoStatus::WouldBlock);
        }
        Ok(IoStatus::Ready(n))
    }

    fn flush(&mut self) -> Result<IoStatus> {
        self.live()?;
        self.push_tls()
    }

    fn wants_flush(&self) -> bool {
        self.sock.is_some() && self.session.wants_write()
    }

    fn close(&mut self) {
        if self.phase == TlsPhase::Closed {
            return;
        }
        self.phase = TlsPhase::Closing;
        if self.sock.is_some() {
            self.session.send_close_notify();
            let _ = self.push_tls();
        }
        self.sock = None;
        self.phase = TlsPhase::Closed;
    }

    fn is_closed(&self) -> bool {
        self.phase == TlsPhase::Closed
    }
}
