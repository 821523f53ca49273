#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reactd_core::{ServerConfig, WorkerPool};
use reactd_http::{default_routes, HttpRequest, HttpResponse, HttpService, MemoryStore, Method};
use reactd_module::{FixedPool, Reactor, ReactorHandle};

pub struct Server {
    pub addr: SocketAddr,
    pub handle: ReactorHandle,
    join: Option<thread::JoinHandle<reactd_core::error::Result<()>>>,
}

impl Server {
    pub fn start(config: ServerConfig) -> Server {
        let routes = default_routes(Arc::new(MemoryStore::new()), None).route(
            Method::Post,
            "/echo",
            |req: &HttpRequest| HttpResponse::ok(req.body.clone()),
        );
        let service = HttpService::with_router(routes.build());
        let pool: Arc<dyn WorkerPool> = Arc::new(FixedPool::new(config.workers).unwrap());
        let reactor = Reactor::new(config, Arc::new(service), pool).unwrap();
        let addr = reactor.local_addr();
        let handle = reactor.handle();
        let join = thread::spawn(move || reactor.run());
        Server { addr, handle, join: Some(join) }
    }

    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    /// Teardown happens after the client sees EOF; poll for it.
    pub fn wait_idle(&self) -> bool {
        for _ in 0..200 {
            if self.handle.connections() == 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn shutdown_and_join(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            join.join().unwrap().unwrap();
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.shutdown_and_join();
        }
    }
}

pub fn loopback() -> ServerConfig {
    ServerConfig::new()
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .workers(4)
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn get(path: &str) -> Vec<u8> {
    format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).into_bytes()
}

pub fn post(path: &str, body: &str) -> Vec<u8> {
    format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
        path,
        body.len(),
        body
    )
    .into_bytes()
}

/// Status code of a raw response.
pub fn status(resp: &[u8]) -> u16 {
    let text = String::from_utf8_lossy(resp);
    text.split(' ').nth(1).and_then(|s| s.parse().ok()).unwrap_or(0)
}

/// Body of a raw response.
pub fn body(resp: &[u8]) -> &[u8] {
    match resp.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(i) => &resp[i + 4..],
        None => &[],
    }
}
