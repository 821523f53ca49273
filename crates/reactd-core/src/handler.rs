//! Request/response boundary.
//!
//! The core never looks inside request bytes. It asks the handler two
//! questions: "is this buffer a complete request yet?" (on the reactor
//! thread, must be cheap) and "what do I send back?" (on a worker thread,
//! may block).

use crate::conn::ConnMeta;

/// Result of framing an accumulated input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// More bytes are needed.
    Incomplete,
    /// The first `len` bytes form one complete request.
    Complete(usize),
    /// The buffer can never become a valid request.
    Invalid(&'static str),
}

/// Parser + router collaborator.
pub trait RequestHandler: Send + Sync + 'static {
    /// Decide whether `buf` holds a complete request. Called on the reactor
    /// thread after every read; must not block.
    fn frame(&self, buf: &[u8]) -> Framing;

    /// Produce the serialized response for one complete request. Called on
    /// a worker thread.
    fn handle(&self, request: &[u8], meta: &ConnMeta) -> Vec<u8>;
}
