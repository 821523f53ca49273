//! Server configuration

use std::fs::File;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Certificate chain and private key, both PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Configuration for the reactor and its worker pool
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening address (default: 0.0.0.0:8080)
    pub bind_addr: SocketAddr,

    /// Maximum readiness events handled per epoll_wait batch
    pub max_events: usize,

    /// Number of worker threads
    pub workers: usize,

    /// Live connections beyond this are dropped at accept
    pub max_connections: usize,

    /// Requests larger than this close the connection
    pub max_request_bytes: usize,

    /// Scratch buffer size for one socket read
    pub read_chunk: usize,

    /// How long a worker waits for socket writability while sending a response
    pub write_timeout: Duration,

    /// Terminate TLS when set
    pub tls: Option<TlsPaths>,

    /// Directory holding login.html / register.html
    pub ui_dir: Option<PathBuf>,

    /// SQLite user database; users live in memory when unset
    pub db_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            max_events: 64,
            workers: 16,
            max_connections: 1024,
            max_request_bytes: 64 * 1024,
            read_chunk: 4096,
            write_timeout: Duration::from_secs(5),
            tls: None,
            ui_dir: None,
            db_path: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `REACTD_*` environment variables.
    ///
    /// | Variable                   | Field               |
    /// |----------------------------|---------------------|
    /// | `REACTD_PORT`              | `bind_addr` port    |
    /// | `REACTD_WORKERS`           | `workers`           |
    /// | `REACTD_MAX_EVENTS`        | `max_events`        |
    /// | `REACTD_MAX_CONNECTIONS`   | `max_connections`   |
    /// | `REACTD_MAX_REQUEST_BYTES` | `max_request_bytes` |
    /// | `REACTD_WRITE_TIMEOUT_MS`  | `write_timeout`     |
    /// | `REACTD_TLS_CERT` + `REACTD_TLS_KEY` | `tls`     |
    /// | `REACTD_UI_DIR`            | `ui_dir`            |
    /// | `REACTD_DB`                | `db_path`           |
    ///
    /// Unset and unparsable values both keep the default.
    pub fn from_env() -> Self {
        let d = Self::default();
        let port: u16 = env_get("REACTD_PORT", d.bind_addr.port());
        let tls = match (
            env_get_opt::<PathBuf>("REACTD_TLS_CERT"),
            env_get_opt::<PathBuf>("REACTD_TLS_KEY"),
        ) {
            (Some(cert), Some(key)) => Some(TlsPaths { cert, key }),
            _ => None,
        };
        Self {
            bind_addr: SocketAddr::new(d.bind_addr.ip(), port),
            max_events: env_get("REACTD_MAX_EVENTS", d.max_events),
            workers: env_get("REACTD_WORKERS", d.workers),
            max_connections: env_get("REACTD_MAX_CONNECTIONS", d.max_connections),
            max_request_bytes: env_get("REACTD_MAX_REQUEST_BYTES", d.max_request_bytes),
            read_chunk: d.read_chunk,
            write_timeout: Duration::from_millis(env_get(
                "REACTD_WRITE_TIMEOUT_MS",
                d.write_timeout.as_millis() as u64,
            )),
            tls,
            ui_dir: env_get_opt("REACTD_UI_DIR"),
            db_path: env_get_opt("REACTD_DB"),
        }
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn max_request_bytes(mut self, n: usize) -> Self {
        self.max_request_bytes = n;
        self
    }

    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.write_timeout = d;
        self
    }

    /// Enable TLS with the given PEM files
    pub fn tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsPaths { cert: cert.into(), key: key.into() });
        self
    }

    pub fn ui_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.ui_dir = Some(dir.into());
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::Zero { field: "max_events" });
        }
        if self.workers == 0 {
            return Err(ConfigError::Zero { field: "workers" });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero { field: "max_connections" });
        }
        if self.max_request_bytes == 0 {
            return Err(ConfigError::Zero { field: "max_request_bytes" });
        }
        if self.read_chunk == 0 {
            return Err(ConfigError::Zero { field: "read_chunk" });
        }
        if let Some(tls) = &self.tls {
            if File::open(&tls.cert).is_err() {
                return Err(ConfigError::Unreadable { which: "certificate", path: tls.cert.clone() });
            }
            if File::open(&tls.key).is_err() {
                return Err(ConfigError::Unreadable { which: "key", path: tls.key.clone() });
            }
        }
        Ok(())
    }
}

fn env_get<T: FromStr>(key: &str, default: T) -> T {
    env_get_opt(key).unwrap_or(default)
}

fn env_get_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let cfg = ServerConfig::new().port(9000).workers(4).max_events(10);
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.max_events, 10);
    }

    #[test]
    fn test_zero_rejected() {
        let err = ServerConfig::new().workers(0).validate().unwrap_err();
        assert_eq!(err, ConfigError::Zero { field: "workers" });

        let err = ServerConfig::new().max_events(0).validate().unwrap_err();
        assert_eq!(err, ConfigError::Zero { field: "max_events" });
    }

    #[test]
    fn test_missing_cert_rejected() {
        let cfg = ServerConfig::new().tls("/nonexistent/server.crt", "/nonexistent/server.key");
        match cfg.validate() {
            Err(ConfigError::Unreadable { which, .. }) => assert_eq!(which, "certificate"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    // One test owns every REACTD_* variable it touches; tests run in
    // parallel threads of one process.
    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("REACTD_PORT", "18181");
        std::env::set_var("REACTD_WORKERS", "not-a-number");
        std::env::set_var("REACTD_DB", "/var/lib/reactd/users.db");
        let cfg = ServerConfig::from_env();
        std::env::remove_var("REACTD_PORT");
        std::env::remove_var("REACTD_WORKERS");
        std::env::remove_var("REACTD_DB");

        assert_eq!(cfg.bind_addr.port(), 18181);
        assert_eq!(cfg.workers, ServerConfig::default().workers);
        assert_eq!(cfg.db_path, Some(PathBuf::from("/var/lib/reactd/users.db")));
        assert!(cfg.tls.is_none());
    }
}
