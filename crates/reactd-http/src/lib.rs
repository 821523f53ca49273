//! # reactd-http — HTTP/1.1 request/response collaborator
//!
//! Everything the reactor core treats as opaque: request framing and
//! parsing, routing, the user store and response serialization.
//! `HttpService` ties them together behind `reactd_core::RequestHandler`.
//!
//! One request per connection; bodies are framed by `Content-Length` only.

pub mod request;
pub mod response;
pub mod router;
pub mod storage;
pub mod pages;
pub mod service;

pub use request::{frame, HttpRequest, Method, ParseError};
pub use response::{reason_phrase, HttpResponse};
pub use router::{Handler, Router, RouterBuilder};
pub use storage::{MemoryStore, SqliteStore, StoreError, UserStore};
pub use service::{default_routes, HttpService};
