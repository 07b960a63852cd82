//! The transport collaborator: the duplex channel a session is layered on.
//!
//! A transport already knows how to frame and parse messages; it hands the
//! session whole JSON values and accepts whole JSON values to send.  The
//! session talks to it through the [`Transport`] trait and receives inbound
//! traffic through the [`TransportListener`] it registers with
//! [`Transport::subscribe`].
//!
//! # Re-entrancy contract
//!
//! The session calls [`Transport::send`] while it holds its own transport
//! lock.  Implementations must therefore never invoke the listener or a send
//! acknowledgement synchronously from inside `send`; both are delivered later
//! from the transport's own task.  [`Transport::close`] is also called under
//! the transport lock; it may notify the listener's `on_close` immediately,
//! since that path never needs the transport again.

pub mod memory;

use std::sync::{Arc, Weak};

use serde_json::Value;

use crate::error::{ProtocolError, SendError};

pub use memory::ChannelTransport;

/// Callback invoked once the transport has (or has failed to) put a message
/// on the wire.  Unrelated to request/response correlation.
pub type SendAck = Box<dyn FnOnce(Result<(), SendError>) + Send + 'static>;

/// A duplex message channel carrying parsed JSON values.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + 'static {
    /// Starts delivering inbound messages and the terminal close to `listener`.
    ///
    /// A later call replaces the previous listener.
    fn subscribe(&mut self, listener: TransportListener);

    /// Stops delivering to the current listener.  Messages that arrive while
    /// no listener is registered are dropped.
    fn unsubscribe(&mut self);

    /// Queues `message` for delivery to the peer.
    fn send(&mut self, message: Value, ack: Option<SendAck>);

    /// Closes the channel, optionally telling the peer why.
    fn close(&mut self, error: Option<ProtocolError>);
}

/// Receiver side of a transport's notifications.
///
/// Implemented by the session; transports only ever see it behind a
/// [`TransportListener`].
pub trait InboundSink: Send + Sync {
    /// One parsed inbound message.
    fn on_message(&self, message: Value);

    /// The transport closed on its own, optionally with an error.
    fn on_close(&self, error: Option<ProtocolError>);
}

/// Handle a transport uses to notify its session.
///
/// Holds only a weak reference, so a transport kept alive elsewhere never
/// keeps a dropped session alive.  Notifications to a session that no longer
/// exists are ignored.
#[derive(Clone)]
pub struct TransportListener {
    sink: Weak<dyn InboundSink>,
}

impl TransportListener {
    pub fn new(sink: Weak<dyn InboundSink>) -> Self {
        Self { sink }
    }

    /// Builds a listener from a strong reference without keeping it alive.
    pub fn from_arc<S: InboundSink + 'static>(sink: &Arc<S>) -> Self {
        let sink: Arc<dyn InboundSink> = sink.clone();
        Self::new(Arc::downgrade(&sink))
    }

    /// Delivers one inbound message.
    pub fn on_message(&self, message: Value) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_message(message);
        }
    }

    /// Delivers the terminal close notification.
    pub fn on_close(&self, error: Option<ProtocolError>) {
        if let Some(sink) = self.sink.upgrade() {
            sink.on_close(error);
        }
    }

    /// Returns `true` while the session behind this listener still exists.
    pub fn is_alive(&self) -> bool {
        self.sink.strong_count() > 0
    }
}

impl std::fmt::Debug for TransportListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportListener")
            .field("alive", &self.is_alive())
            .finish()
    }
}
