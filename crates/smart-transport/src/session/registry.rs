//! Handler registry: request name → responder.
//!
//! Registration is last-write-wins: registering the same name again replaces
//! the earlier handler.  A missing name is not an error here; the dispatcher
//! answers such requests with `NOHANDLER`.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tracing::debug;

use crate::error::ProtocolError;
use crate::protocol::ResponsePayload;

/// A registered request handler.
///
/// Receives the request payload and a single-use [`Responder`].  The handler
/// may answer immediately or move the responder elsewhere (another task, a
/// queue) and answer later.
pub type Handler = Arc<dyn Fn(Value, Responder) + Send + Sync + 'static>;

/// Where a [`Responder`] delivers its answer.  Implemented by the session.
pub(crate) trait ResponseSink: Send + Sync {
    fn send_response(&self, payload: ResponsePayload);
}

/// Single-use completion handed to a handler for one inbound request.
///
/// Answering consumes the responder, so a request is answered at most once.
/// Dropping it without answering sends nothing; the requester then waits
/// until its own session closes or detaches.
pub struct Responder {
    id: Value,
    name: String,
    sink: Weak<dyn ResponseSink>,
    answered: bool,
}

impl Responder {
    pub(crate) fn new(id: Value, name: String, sink: Weak<dyn ResponseSink>) -> Self {
        Self {
            id,
            name,
            sink,
            answered: false,
        }
    }

    /// Correlation id of the request being answered, as the peer sent it.
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Name the request was addressed to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `{id, res}` on success or `{id, error}` on failure.
    pub fn respond(mut self, outcome: Result<Value, ProtocolError>) {
        self.answered = true;
        let payload = match outcome {
            Ok(res) => ResponsePayload::success(self.id.clone(), res),
            Err(error) => ResponsePayload::failure(self.id.clone(), error),
        };
        match self.sink.upgrade() {
            Some(sink) => sink.send_response(payload),
            None => debug!(
                "request {} ({}): session gone, response dropped",
                self.id, self.name
            ),
        }
    }

    /// Shorthand for `respond(Ok(res))`.
    pub fn ok(self, res: Value) {
        self.respond(Ok(res));
    }

    /// Shorthand for `respond(Err(error))`.
    pub fn err(self, error: ProtocolError) {
        self.respond(Err(error));
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.answered {
            debug!(
                "request {} ({}): responder dropped without an answer",
                self.id, self.name
            );
        }
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Name → handler map.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handler` under `name`, replacing any previous one.
    ///
    /// Returns `true` if an earlier handler was replaced.
    pub fn register(&mut self, name: impl Into<String>, handler: Handler) -> bool {
        self.handlers.insert(name.into(), handler).is_some()
    }

    /// Returns the handler for `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
