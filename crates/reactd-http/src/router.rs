//! Method + path routing.
//!
//! Routes are registered on a `RouterBuilder`; `build()` freezes them into
//! an immutable `Router` that can be shared across worker threads.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::request::{HttpRequest, Method};
use crate::response::HttpResponse;

/// Produces a response for a routed request.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: &HttpRequest) -> HttpResponse;
}

impl<F> Handler for F
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    fn handle(&self, req: &HttpRequest) -> HttpResponse {
        self(req)
    }
}

#[derive(Default)]
pub struct RouterBuilder {
    routes: HashMap<(Method, String), Box<dyn Handler>>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration for the same method and
    /// path replaces the earlier one.
    pub fn route(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes.insert((method, path.to_string()), Box::new(handler));
        self
    }

    pub fn build(self) -> Router {
        Router { routes: self.routes }
    }
}

pub struct Router {
    routes: HashMap<(Method, String), Box<dyn Handler>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Run the matching handler, or answer 404.
    pub fn dispatch(&self, req: &HttpRequest) -> HttpResponse {
        match self.routes.get(&(req.method, req.path.clone())) {
            Some(handler) => handler.handle(req),
            None => {
                trace!(method = %req.method, path = %req.path, "no route");
                HttpResponse::error(404, "NotFound")
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> =
            self.routes.keys().map(|(m, p)| format!("{} {}", m, p)).collect();
        keys.sort();
        f.debug_struct("Router").field("routes", &keys).finish()
    }
}
