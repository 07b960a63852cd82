//! In-process transport: two connected ends joined by Tokio channels.
//!
//! Useful for tests and for wiring two sessions together inside one process.
//! Each end runs a small pump task that delivers frames to that end's
//! listener, so sends never call back into the sender synchronously.
//!
//! ```text
//!   end A                           end B
//!   send() ──── frames for B ────▶ pump B ──▶ B's listener
//!   A's listener ◀── pump A ◀──── frames for A ──── send()
//! ```
//!
//! Closing either end (explicitly or by dropping it) delivers one close
//! notification, carrying the close error, to the listeners of *both* ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{SendAck, Transport, TransportListener};
use crate::error::{ProtocolError, SendError};

enum Frame {
    Message(Value, Option<SendAck>),
    Close(Option<ProtocolError>),
}

type ListenerSlot = Arc<Mutex<Option<TransportListener>>>;

/// One end of an in-process duplex channel.
pub struct ChannelTransport {
    name: String,
    to_peer: mpsc::UnboundedSender<Frame>,
    to_self: mpsc::UnboundedSender<Frame>,
    listener: ListenerSlot,
    closed: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Creates two connected ends, `"a"` and `"b"`.
    ///
    /// Must be called from within a Tokio runtime: each end spawns its pump task.
    ///
    /// # Example
    ///
    /// ```rust
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// use smart_transport::{ChannelTransport, SmartTransport};
    ///
    /// let (a, b) = ChannelTransport::pair();
    /// let left = SmartTransport::new(a);
    /// let right = SmartTransport::new(b);
    /// right.handle("echo", |req, responder| responder.ok(req));
    ///
    /// let res = left.call("echo", serde_json::json!(1)).await.unwrap();
    /// assert_eq!(res, serde_json::json!(1));
    /// # }
    /// ```
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let a_listener: ListenerSlot = Arc::new(Mutex::new(None));
        let b_listener: ListenerSlot = Arc::new(Mutex::new(None));

        tokio::spawn(pump("a", a_rx, Arc::clone(&a_listener)));
        tokio::spawn(pump("b", b_rx, Arc::clone(&b_listener)));

        let a = ChannelTransport {
            name: "a".to_string(),
            to_peer: b_tx.clone(),
            to_self: a_tx.clone(),
            listener: a_listener,
            closed: Arc::clone(&closed),
        };
        let b = ChannelTransport {
            name: "b".to_string(),
            to_peer: a_tx,
            to_self: b_tx,
            listener: b_listener,
            closed,
        };
        (a, b)
    }

    /// Name of this end (`"a"` or `"b"`), used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` once either end has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Transport for ChannelTransport {
    fn subscribe(&mut self, listener: TransportListener) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn unsubscribe(&mut self) {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn send(&mut self, message: Value, ack: Option<SendAck>) {
        if self.is_closed() {
            debug!("channel {}: send after close dropped", self.name);
            reject_later(ack);
            return;
        }
        if let Err(mpsc::error::SendError(Frame::Message(_, ack))) =
            self.to_peer.send(Frame::Message(message, ack))
        {
            reject_later(ack);
        }
    }

    fn close(&mut self, error: Option<ProtocolError>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("channel {}: closing ({error:?})", self.name);
        // Either pump may already be gone if the other end was dropped.
        let _ = self.to_peer.send(Frame::Close(error.clone()));
        let _ = self.to_self.send(Frame::Close(error));
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.close(None);
    }
}

/// Reports `SendError::Closed` to an ack from a separate task.
fn reject_later(ack: Option<SendAck>) {
    if let Some(ack) = ack {
        tokio::spawn(async move { ack(Err(SendError::Closed)) });
    }
}

/// Delivers frames addressed to one end until that end sees a close.
async fn pump(name: &'static str, mut rx: mpsc::UnboundedReceiver<Frame>, listener: ListenerSlot) {
    while let Some(frame) = rx.recv().await {
        // Clone the listener out so no lock is held while the session runs.
        let current = listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match frame {
            Frame::Message(message, ack) => {
                match current {
                    Some(l) => l.on_message(message),
                    None => debug!("channel {name}: no listener, message dropped"),
                }
                if let Some(ack) = ack {
                    ack(Ok(()));
                }
            }
            Frame::Close(error) => {
                if let Some(l) = current {
                    l.on_close(error);
                }
                break;
            }
        }
    }
    debug!("channel {name}: pump stopped");
}
