//! `HttpService` — the HTTP application behind `RequestHandler`.
//!
//! Default routes:
//!
//! | Method | Path        | Response                                   |
//! |--------|-------------|--------------------------------------------|
//! | GET    | `/`         | `Helloworld!`                              |
//! | GET    | `/login`    | login form (`ui_dir/login.html` if present) |
//! | GET    | `/register` | register form (`ui_dir/register.html`)     |
//! | POST   | `/register` | success page, or `400 Register Failed!`    |
//! | POST   | `/login`    | success page, or `401` failure page        |

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use reactd_core::conn::ConnMeta;
use reactd_core::handler::{Framing, RequestHandler};

use crate::pages;
use crate::request::{self, HttpRequest, Method};
use crate::response::HttpResponse;
use crate::router::{Router, RouterBuilder};
use crate::storage::UserStore;

pub struct HttpService {
    router: Router,
}

impl HttpService {
    /// Service with the default routes backed by `store`.
    pub fn new(store: Arc<dyn UserStore>, ui_dir: Option<PathBuf>) -> Self {
        Self::with_router(default_routes(store, ui_dir).build())
    }

    /// Service over a caller-built router.
    pub fn with_router(router: Router) -> Self {
        Self { router }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Parse, route and serialize. Handler panics become 500s.
    pub fn respond(&self, raw: &[u8]) -> HttpResponse {
        let req = match HttpRequest::parse(raw) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "unparseable request");
                return HttpResponse::error(400, "Bad Request");
            }
        };
        match panic::catch_unwind(AssertUnwindSafe(|| self.router.dispatch(&req))) {
            Ok(resp) => resp,
            Err(_) => {
                error!(method = %req.method, path = %req.path, "route handler panicked");
                HttpResponse::error(500, "Internal Server Error")
            }
        }
    }
}

impl RequestHandler for HttpService {
    fn frame(&self, buf: &[u8]) -> Framing {
        request::frame(buf)
    }

    fn handle(&self, request: &[u8], meta: &ConnMeta) -> Vec<u8> {
        let resp = self.respond(request);
        debug!(conn = %meta.key, transport = %meta.kind, status = resp.status(), "handled");
        resp.to_bytes()
    }
}

/// Page from `ui_dir` if readable, else the built-in fallback.
fn page(ui_dir: Option<&Path>, file: &str, fallback: &'static str) -> HttpResponse {
    if let Some(dir) = ui_dir {
        let path = dir.join(file);
        match fs::read(&path) {
            Ok(body) => return HttpResponse::html(200, body),
            Err(e) => debug!(path = %path.display(), error = %e, "ui page unavailable, using built-in"),
        }
    }
    HttpResponse::html(200, fallback)
}

fn credentials(req: &HttpRequest) -> (String, String) {
    let mut form = req.form();
    (
        form.remove("username").unwrap_or_default(),
        form.remove("password").unwrap_or_default(),
    )
}

/// The default route set, open for additions before `build()`.
pub fn default_routes(store: Arc<dyn UserStore>, ui_dir: Option<PathBuf>) -> RouterBuilder {
    let login_dir = ui_dir.clone();
    let register_dir = ui_dir;
    let register_store = Arc::clone(&store);
    let login_store = store;

    Router::builder()
        .route(Method::Get, "/", |_: &HttpRequest| HttpResponse::ok("Helloworld!"))
        .route(Method::Get, "/login", move |_: &HttpRequest| {
            page(login_dir.as_deref(), "login.html", pages::LOGIN_FORM)
        })
        .route(Method::Get, "/register", move |_: &HttpRequest| {
            page(register_dir.as_deref(), "register.html", pages::REGISTER_FORM)
        })
        .route(Method::Post, "/register", move |req: &HttpRequest| {
            let (user, pass) = credentials(req);
            if register_store.register(&user, &pass) {
                HttpResponse::html(200, pages::REGISTER_SUCCESS)
            } else {
                HttpResponse::error(400, "Register Failed!")
            }
        })
        .route(Method::Post, "/login", move |req: &HttpRequest| {
            let (user, pass) = credentials(req);
            if login_store.login(&user, &pass) {
                HttpResponse::html(200, pages::LOGIN_SUCCESS)
            } else {
                HttpResponse::html(401, pages::LOGIN_FAILED)
            }
        })
}
