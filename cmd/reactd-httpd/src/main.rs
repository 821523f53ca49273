//! reactd-httpd — HTTP/1.1 server on the epoll reactor.
//!
//! Usage:
//!   reactd-httpd [PORT]
//!   reactd-httpd --port 8443 --cert server.crt --key server.key
//!   RUST_LOG=debug reactd-httpd --workers 4 --ui-dir ./UI
//!   reactd-httpd --db users.db --log-file server.log
//!
//! Defaults come from `REACTD_*` environment variables (see
//! `ServerConfig::from_env`); flags override them. Without `--db` users
//! are kept in memory only. SIGINT/SIGTERM stop the reactor, drain the
//! worker pool and close every live connection.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use nix::sys::signal::{SigSet, Signal};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use reactd_core::{ServerConfig, WorkerPool};
use reactd_http::{HttpService, MemoryStore, SqliteStore, UserStore};
use reactd_module::{FixedPool, Reactor, ReactorHandle};

#[derive(Parser, Debug)]
#[command(name = "reactd-httpd")]
#[command(about = "HTTP/1.1 server on an edge-triggered epoll reactor")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(value_name = "PORT")]
    port_arg: Option<u16>,

    /// Port to listen on
    #[arg(short, long, conflicts_with = "port_arg")]
    port: Option<u16>,

    /// Address to bind (default 0.0.0.0)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Readiness events handled per epoll_wait
    #[arg(long)]
    max_events: Option<usize>,

    /// Live connection limit
    #[arg(long)]
    max_connections: Option<usize>,

    /// Largest accepted request, in bytes
    #[arg(long)]
    max_request_bytes: Option<usize>,

    /// Response write timeout, in milliseconds
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// PEM certificate chain; enables TLS together with --key
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Directory holding login.html and register.html
    #[arg(long)]
    ui_dir: Option<PathBuf>,

    /// SQLite user database, created if missing
    #[arg(long)]
    db: Option<PathBuf>,

    /// Append logs to this file instead of stdout
    #[arg(long, env = "REACTD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Colored console output
    #[arg(
        long,
        env = "REACTD_LOG_ANSI",
        default_value_t = true,
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    log_ansi: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let mut cfg = ServerConfig::from_env();
        if let Some(ip) = self.bind {
            let port = cfg.bind_addr.port();
            cfg = cfg.bind_addr(SocketAddr::new(ip, port));
        }
        if let Some(port) = self.port.or(self.port_arg) {
            cfg = cfg.port(port);
        }
        if let Some(n) = self.workers {
            cfg = cfg.workers(n);
        }
        if let Some(n) = self.max_events {
            cfg = cfg.max_events(n);
        }
        if let Some(n) = self.max_connections {
            cfg = cfg.max_connections(n);
        }
        if let Some(n) = self.max_request_bytes {
            cfg = cfg.max_request_bytes(n);
        }
        if let Some(ms) = self.write_timeout_ms {
            cfg = cfg.write_timeout(Duration::from_millis(ms));
        }
        if let (Some(cert), Some(key)) = (self.cert, self.key) {
            cfg = cfg.tls(cert, key);
        }
        if let Some(dir) = self.ui_dir {
            cfg = cfg.ui_dir(dir);
        }
        if let Some(path) = self.db {
            cfg = cfg.db_path(path);
        }
        cfg
    }
}

/// Install the subscriber. With a log file, events go through a
/// non-blocking appender whose guard must outlive the server.
fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    let default = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    let Some(path) = &args.log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(args.log_ansi)
            .with_thread_names(true)
            .init();
        return Ok(None);
    };

    let (dir, file) = split_log_path(path)?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::never(&dir, file);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_thread_names(true)
        .with_writer(writer)
        .init();
    Ok(Some(guard))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, &std::ffi::OsStr)> {
    let file = path
        .file_name()
        .with_context(|| format!("log file {} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file))
}

fn open_store(config: &ServerConfig) -> Result<Arc<dyn UserStore>> {
    match &config.db_path {
        Some(path) => {
            let store = SqliteStore::open(path)?;
            info!(db = %path.display(), "user database opened");
            Ok(Arc::new(store))
        }
        None => {
            warn!("no user database configured, registrations are kept in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Block SIGINT/SIGTERM in every thread and hand them to a dedicated
/// waiter that stops the reactor. Must run before any other thread exists.
fn block_signals() -> Result<SigSet> {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set.thread_block().context("blocking shutdown signals")?;
    Ok(set)
}

fn spawn_signal_waiter(set: SigSet, handle: ReactorHandle) -> Result<()> {
    thread::Builder::new()
        .name("reactd-signal".into())
        .spawn(move || match set.wait() {
            Ok(sig) => {
                info!(signal = ?sig, "shutting down");
                handle.shutdown();
            }
            Err(e) => warn!(error = %e, "sigwait failed; signals will not stop the server"),
        })
        .context("spawning signal thread")?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args)?;
    let signals = block_signals()?;

    let config = args.into_config();
    let store = open_store(&config)?;
    let pool: Arc<dyn WorkerPool> =
        Arc::new(FixedPool::new(config.workers).context("starting worker pool")?);
    let service = HttpService::new(store, config.ui_dir.clone());

    let reactor = Reactor::new(config, Arc::new(service), pool).context("starting reactor")?;
    spawn_signal_waiter(signals, reactor.handle())?;

    reactor.run().context("reactor failed")?;
    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_port() {
        let cfg = Args::parse_from(["reactd-httpd", "9090"]).into_config();
        assert_eq!(cfg.bind_addr.port(), 9090);
    }

    #[test]
    fn test_flags_override() {
        let cfg = Args::parse_from([
            "reactd-httpd",
            "--port",
            "8443",
            "--workers",
            "3",
            "--cert",
            "a.crt",
            "--key",
            "a.key",
        ])
        .into_config();
        assert_eq!(cfg.bind_addr.port(), 8443);
        assert_eq!(cfg.workers, 3);
        let tls = cfg.tls.unwrap();
        assert_eq!(tls.cert, PathBuf::from("a.crt"));
    }

    #[test]
    fn test_bind_keeps_port() {
        let cfg = Args::parse_from(["reactd-httpd", "--bind", "127.0.0.1", "--port", "9091"])
            .into_config();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9091".parse::<SocketAddr>().unwrap());

        let cfg = Args::parse_from(["reactd-httpd", "--bind", "::1"]).into_config();
        assert_eq!(cfg.bind_addr.ip(), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(cfg.bind_addr.port(), ServerConfig::from_env().bind_addr.port());
    }

    #[test]
    fn test_db_flag_opens_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("users.db");
        let cfg = Args::parse_from(["reactd-httpd", "--db", db.to_str().unwrap()]).into_config();
        assert_eq!(cfg.db_path.as_deref(), Some(db.as_path()));

        let store = open_store(&cfg).unwrap();
        assert!(store.register("alice", "pw"));
        drop(store);
        assert!(open_store(&cfg).unwrap().login("alice", "pw"));
        assert!(db.exists());
    }

    #[test]
    fn test_log_file_path_split() {
        let (dir, file) = split_log_path(Path::new("logs/server.log")).unwrap();
        assert_eq!(dir, PathBuf::from("logs"));
        assert_eq!(file, "server.log");

        let (dir, _) = split_log_path(Path::new("server.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));

        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_log_flags() {
        let args = Args::parse_from(["reactd-httpd", "--log-file", "x.log", "--log-ansi", "off"]);
        assert_eq!(args.log_file, Some(PathBuf::from("x.log")));
        assert!(!args.log_ansi);
    }

    #[test]
    fn test_cert_requires_key() {
        assert!(Args::try_parse_from(["reactd-httpd", "--cert", "a.crt"]).is_err());
    }

    #[test]
    fn test_args_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
