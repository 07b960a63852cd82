//! [`SmartTransport`]: the session facade layered over one transport.
//!
//! # Lifecycle
//!
//! ```text
//!            detach()                    close() / transport closed /
//!   Detached ◀──────── Open ────────▶   BADMESSAGE / UNEXPECTEDRESPONSE
//!                                        ──────────▶ Closed
//! ```
//!
//! Both exits are terminal and fail every pending request: with `DETACHED`
//! on detach, with the close error (or `CLOSED`) on close.  The close
//! observers fire exactly once, and only on the `Closed` path.
//!
//! # Locking
//!
//! Two mutexes guard the session:
//!
//! - `state` holds lifecycle, pending requests and handlers.
//! - `transport` holds the transport until it is detached.
//!
//! Neither is held while a completion, handler or observer runs, so any of
//! those may call back into the session.  `Transport::send` and
//! `Transport::close` run under the transport lock only; see the transport
//! module's re-entrancy contract.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::correlator::Correlator;
use super::events::{Events, Subscription};
use super::registry::{HandlerRegistry, ResponseSink, Responder};
use crate::error::{CallError, ProtocolError, SessionError};
use crate::protocol::{
    command_envelope, request_envelope, response_envelope, CommandEvent, RequestId,
    ResponsePayload,
};
use crate::transport::{InboundSink, SendAck, Transport, TransportListener};

/// Where a session is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Attached to a live transport; requests and responses flow.
    Open,
    /// The transport was handed back with [`SmartTransport::detach`].
    Detached,
    /// Closed locally, by the peer, or by a protocol violation.
    Closed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Lifecycle::Open => "open",
            Lifecycle::Detached => "detached",
            Lifecycle::Closed => "closed",
        })
    }
}

pub(super) struct State {
    pub(super) lifecycle: Lifecycle,
    pub(super) correlator: Correlator,
    pub(super) handlers: HandlerRegistry,
}

/// Everything a session owns.  Shared by every [`SmartTransport`] clone, and
/// reachable weakly from the transport listener and from responders.
pub(super) struct Shared<T: Transport> {
    pub(super) id: Uuid,
    pub(super) me: Weak<Shared<T>>,
    pub(super) state: Mutex<State>,
    pub(super) transport: Mutex<Option<T>>,
    pub(super) events: Events,
}

impl<T: Transport> Shared<T> {
    pub(super) fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_transport(&self) -> MutexGuard<'_, Option<T>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn lifecycle(&self) -> Lifecycle {
        self.lock_state().lifecycle
    }

    /// Hands `message` to the transport.  Returns `false` once detached.
    pub(super) fn transmit(&self, message: Value, ack: Option<SendAck>) -> bool {
        match self.lock_transport().as_mut() {
            Some(transport) => {
                transport.send(message, ack);
                true
            }
            None => false,
        }
    }

    /// Open → Closed: flush pending requests, notify close observers and,
    /// when `forward` is set, close the transport too.
    ///
    /// A no-op unless the session is open.
    pub(super) fn shutdown(&self, error: Option<ProtocolError>, forward: bool) {
        let mut drained = {
            let mut state = self.lock_state();
            if state.lifecycle != Lifecycle::Open {
                return;
            }
            state.lifecycle = Lifecycle::Closed;
            state.correlator.split_pending()
        };

        match &error {
            Some(e) => warn!("session {}: closed with {e}", self.id),
            None => info!("session {}: closed", self.id),
        }

        let flush_error = error.clone().unwrap_or_else(ProtocolError::closed);
        let failed = drained.flush_all(&flush_error);
        if failed > 0 {
            debug!(
                "session {}: failed {failed} pending request(s) with {}",
                self.id, flush_error.code
            );
        }

        self.events.close.emit(&error);

        if forward {
            // The state lock is free here: a synchronous close notification
            // re-enters `on_close`, which finds the session already closed.
            let mut slot = self.lock_transport();
            if let Some(transport) = slot.as_mut() {
                transport.close(error);
            }
        }
    }
}

impl<T: Transport> InboundSink for Shared<T> {
    fn on_message(&self, message: Value) {
        let lifecycle = self.lifecycle();
        if lifecycle != Lifecycle::Open {
            debug!("session {}: ignoring message while {lifecycle}", self.id);
            return;
        }
        self.dispatch(message);
    }

    fn on_close(&self, error: Option<ProtocolError>) {
        self.shutdown(error, false);
    }
}

impl<T: Transport> ResponseSink for Shared<T> {
    fn send_response(&self, payload: ResponsePayload) {
        let lifecycle = self.lifecycle();
        if lifecycle != Lifecycle::Open {
            debug!(
                "session {}: dropping response {} while {lifecycle}",
                self.id, payload.id
            );
            return;
        }
        self.transmit(response_envelope(&payload), None);
    }
}

// ── Facade ────────────────────────────────────────────────────────────────────

/// Request/response, extension commands and pass-through messages over one
/// [`Transport`].
///
/// Cheap to clone; all clones drive the same session.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use serde_json::json;
/// use smart_transport::{ChannelTransport, ErrorKind, ProtocolError, SmartTransport};
///
/// let (a, b) = ChannelTransport::pair();
/// let client = SmartTransport::new(a);
/// let server = SmartTransport::new(b);
///
/// server.handle("add", |req, responder| {
///     match (req["x"].as_i64(), req["y"].as_i64()) {
///         (Some(x), Some(y)) => responder.ok(json!(x + y)),
///         _ => responder.err(ProtocolError::new("EINVAL", "x and y must be integers")),
///     }
/// });
///
/// assert_eq!(client.call("add", json!({"x": 2, "y": 3})).await, Ok(json!(5)));
///
/// let missing = client.call("sub", json!(null)).await.unwrap_err();
/// assert!(missing.is(ErrorKind::NoHandler));
/// # }
/// ```
pub struct SmartTransport<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for SmartTransport<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> SmartTransport<T> {
    /// Takes ownership of `transport`, subscribes to it and opens the session.
    pub fn new(transport: T) -> Self {
        let shared = Arc::new_cyclic(|me| Shared {
            id: Uuid::new_v4(),
            me: me.clone(),
            state: Mutex::new(State {
                lifecycle: Lifecycle::Open,
                correlator: Correlator::new(),
                handlers: HandlerRegistry::new(),
            }),
            transport: Mutex::new(Some(transport)),
            events: Events::default(),
        });

        let listener = TransportListener::from_arc(&shared);
        if let Some(transport) = shared.lock_transport().as_mut() {
            transport.subscribe(listener);
        }
        info!("session {}: opened", shared.id);

        Self { shared }
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Identifier used in this session's log lines.
    pub fn session_id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    pub fn is_open(&self) -> bool {
        self.state() == Lifecycle::Open
    }

    /// Number of outbound requests still waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.shared.lock_state().correlator.pending_count()
    }

    // ── Requests ─────────────────────────────────────────────────────────────

    /// Sends a request to the peer's handler `name`.
    ///
    /// `completion` runs exactly once: with the peer's result or error, or
    /// with the error that ended the session before an answer arrived.  On a
    /// session that is no longer open it runs immediately with `CLOSED` and
    /// nothing is sent.
    ///
    /// Returns the correlation id, or `None` if the request was rejected.
    pub fn request<F>(&self, name: &str, req: Value, completion: F) -> Option<RequestId>
    where
        F: FnOnce(Result<Value, ProtocolError>) + Send + 'static,
    {
        let id = {
            let mut state = self.shared.lock_state();
            if state.lifecycle != Lifecycle::Open {
                let lifecycle = state.lifecycle;
                drop(state);
                debug!(
                    "session {}: request {name:?} rejected while {lifecycle}",
                    self.shared.id
                );
                completion(Err(ProtocolError::closed()));
                return None;
            }
            let id = state.correlator.next_id();
            state.correlator.register(id, Box::new(completion));
            id
        };

        debug!("session {}: request {id} → {name:?}", self.shared.id);
        // If a detach raced us, its flush has already failed this request.
        self.shared.transmit(request_envelope(name, id, req), None);
        Some(id)
    }

    /// Future-returning form of [`request`](Self::request).
    ///
    /// The request is registered and sent before this returns, not when the
    /// future is first polled.
    pub fn call(&self, name: &str, req: Value) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let id = self.request(name, req, move |outcome| {
            let _ = tx.send(outcome);
        });
        PendingCall { id, rx }
    }

    /// [`call`](Self::call) with a deadline.
    ///
    /// On timeout the request stays pending inside the session; a late
    /// response is accepted and discarded.
    pub fn call_timeout(
        &self,
        name: &str,
        req: Value,
        limit: Duration,
    ) -> impl Future<Output = Result<Value, CallError>> + Send + 'static {
        let pending = self.call(name, req);
        async move {
            match tokio::time::timeout(limit, pending).await {
                Ok(outcome) => outcome.map_err(CallError::from),
                Err(_) => Err(CallError::TimedOut(limit)),
            }
        }
    }

    // ── Handlers ─────────────────────────────────────────────────────────────

    /// Registers the handler for requests named `name`, replacing any earlier
    /// one.
    pub fn handle<F>(&self, name: &str, handler: F)
    where
        F: Fn(Value, Responder) + Send + Sync + 'static,
    {
        let replaced = self
            .shared
            .lock_state()
            .handlers
            .register(name, Arc::new(handler));
        if replaced {
            debug!("session {}: handler {name:?} replaced", self.shared.id);
        }
    }

    /// Registers an async handler.  Each request runs on its own Tokio task
    /// and the returned result is sent as the response.
    pub fn handle_async<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProtocolError>> + Send + 'static,
    {
        self.handle(name, move |req, responder| {
            let fut = handler(req);
            tokio::spawn(async move { responder.respond(fut.await) });
        });
    }

    // ── Raw traffic ──────────────────────────────────────────────────────────

    /// Sends an arbitrary message unchanged.
    ///
    /// Allowed on a closed session (the transport decides what happens);
    /// fails only once the transport has been detached.
    pub fn send(&self, message: Value, ack: Option<SendAck>) -> Result<(), SessionError> {
        if self.shared.transmit(message, ack) {
            Ok(())
        } else {
            Err(SessionError::Detached(self.shared.id))
        }
    }

    /// Sends the command envelope `{cmd, data}`.
    pub fn command(
        &self,
        cmd: &str,
        data: Value,
        ack: Option<SendAck>,
    ) -> Result<(), SessionError> {
        self.send(command_envelope(cmd, data), ack)
    }

    // ── Observers ────────────────────────────────────────────────────────────

    /// Observes inbound values that are not command envelopes.
    pub fn on_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.events.message.subscribe(callback)
    }

    /// Observes inbound extension commands.
    pub fn on_command<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CommandEvent) + Send + Sync + 'static,
    {
        self.shared.events.command.subscribe(callback)
    }

    /// Observes the terminal close.
    pub fn on_close<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Option<ProtocolError>) + Send + Sync + 'static,
    {
        self.shared.events.close.subscribe(callback)
    }

    /// Channel form of [`on_message`](Self::on_message).
    pub fn messages(&self) -> mpsc::UnboundedReceiver<Value> {
        self.shared.events.message.receiver()
    }

    /// Channel form of [`on_command`](Self::on_command).
    pub fn commands(&self) -> mpsc::UnboundedReceiver<CommandEvent> {
        self.shared.events.command.receiver()
    }

    /// Channel form of [`on_close`](Self::on_close).
    pub fn closed(&self) -> mpsc::UnboundedReceiver<Option<ProtocolError>> {
        self.shared.events.close.receiver()
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Closes the session and the transport beneath it.
    ///
    /// Pending requests fail with `error`, or `CLOSED` if none is given.
    /// Idempotent: only the first call has any effect.
    pub fn close(&self, error: Option<ProtocolError>) {
        self.shared.shutdown(error, true);
    }

    /// Unsubscribes from the transport and hands it back, still open.
    ///
    /// Pending requests fail with `DETACHED`.  Returns `None` if the
    /// transport was already detached.
    pub fn detach(&self) -> Option<T> {
        let transport = {
            let mut slot = self.shared.lock_transport();
            let mut transport = slot.take()?;
            transport.unsubscribe();
            transport
        };

        let mut drained = {
            let mut state = self.shared.lock_state();
            if state.lifecycle == Lifecycle::Open {
                state.lifecycle = Lifecycle::Detached;
            }
            state.correlator.split_pending()
        };

        info!("session {}: detached", self.shared.id);
        drained.flush_all(&ProtocolError::detached());
        Some(transport)
    }
}

impl<T: Transport> std::fmt::Debug for SmartTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartTransport")
            .field("session_id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}

// ── PendingCall ───────────────────────────────────────────────────────────────

/// Future returned by [`SmartTransport::call`].
///
/// Resolves exactly once.  Dropping it does not cancel the request; the
/// eventual response is discarded.
#[derive(Debug)]
pub struct PendingCall {
    id: Option<RequestId>,
    rx: oneshot::Receiver<Result<Value, ProtocolError>>,
}

impl PendingCall {
    /// Correlation id, or `None` if the session rejected the request.
    pub fn id(&self) -> Option<RequestId> {
        self.id
    }
}

impl Future for PendingCall {
    type Output = Result<Value, ProtocolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the session went away without flushing.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(ProtocolError::closed())))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
