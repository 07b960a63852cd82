//! [`WsTransport`]: a smart-transport [`Transport`] over one WebSocket.
//!
//! Each envelope travels as one text frame holding its JSON.  The socket is
//! split into halves, each driven by its own Tokio task:
//!
//! ```text
//!   send()/close() ──▶ outbound queue ──▶ writer task ──▶ WebSocket sink
//!   listener       ◀── reader task    ◀── WebSocket stream
//! ```
//!
//! Because `send` only queues, it never calls the listener or the ack
//! synchronously.  The writer invokes acks after the frame is written.
//!
//! # Close handling
//!
//! - A local `close(error)` sends a close frame whose reason is the error's
//!   `{code,message}` JSON (see [`crate::domain::close_reason`]).
//! - A close frame from the peer is decoded the same way, and the listener
//!   receives the peer's error.
//! - The listener receives exactly one close notification per connection,
//!   whichever way the connection ends.
//!
//! Frames that are not valid JSON text are logged and skipped; they never
//! close the connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use smart_transport::{ProtocolError, SendAck, SendError, Transport, TransportListener};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::domain::{decode_close_reason, encode_close_reason};

enum Outbound {
    Message(Value, Option<SendAck>),
    Close(Option<ProtocolError>),
}

/// State shared between the handle and the reader task.
struct ReadSide {
    label: String,
    listener: Mutex<Option<TransportListener>>,
    close_delivered: AtomicBool,
}

impl ReadSide {
    fn current_listener(&self) -> Option<TransportListener> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delivers the terminal close, at most once per connection.
    fn deliver_close(&self, error: Option<ProtocolError>) {
        if self.close_delivered.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("ws {}: connection closed ({error:?})", self.label);
        if let Some(listener) = self.current_listener() {
            listener.on_close(error);
        }
    }
}

/// One WebSocket connection, usable as a session transport.
pub struct WsTransport {
    read_side: Arc<ReadSide>,
    outbound: mpsc::UnboundedSender<Outbound>,
    close_sent: bool,
    writer: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Takes over an established WebSocket and starts its reader and writer
    /// tasks.  `label` names the connection in log lines (typically the
    /// peer address or URL).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S>(stream: WebSocketStream<S>, label: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let read_side = Arc::new(ReadSide {
            label: label.into(),
            listener: Mutex::new(None),
            close_delivered: AtomicBool::new(false),
        });
        let (sink, source) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_frames(sink, rx, read_side.label.clone()));
        tokio::spawn(read_frames(source, Arc::clone(&read_side)));

        Self {
            read_side,
            outbound: tx,
            close_sent: false,
            writer: Some(writer),
        }
    }

    /// Name of this connection in log lines.
    pub fn label(&self) -> &str {
        &self.read_side.label
    }

    /// Closes the connection and waits until the close frame has been
    /// written (or the socket has failed).
    pub async fn finish(mut self, error: Option<ProtocolError>) {
        self.close(error);
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
    }
}

impl Transport for WsTransport {
    fn subscribe(&mut self, listener: TransportListener) {
        *self
            .read_side
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn unsubscribe(&mut self) {
        self.read_side
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn send(&mut self, message: Value, ack: Option<SendAck>) {
        if self.close_sent {
            debug!("ws {}: send after close dropped", self.read_side.label);
            reject_later(ack);
            return;
        }
        if let Err(mpsc::error::SendError(Outbound::Message(_, ack))) =
            self.outbound.send(Outbound::Message(message, ack))
        {
            reject_later(ack);
        }
    }

    fn close(&mut self, error: Option<ProtocolError>) {
        if self.close_sent {
            return;
        }
        self.close_sent = true;
        // The writer may already be gone if the socket failed.
        let _ = self.outbound.send(Outbound::Close(error));
    }
}

impl Drop for WsTransport {
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

fn close_frame(error: Option<&ProtocolError>) -> CloseFrame<'static> {
    CloseFrame {
        code: if error.is_some() {
            CloseCode::Error
        } else {
            CloseCode::Normal
        },
        reason: encode_close_reason(error).into(),
    }
}

// ── Writer task ───────────────────────────────────────────────────────────────

async fn write_frames<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    label: String,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Message(message, ack) => {
                let result = match serde_json::to_string(&message) {
                    Ok(text) => sink
                        .send(WsMessage::Text(text))
                        .await
                        .map_err(|e| SendError::Failed(e.to_string())),
                    Err(e) => Err(SendError::Failed(e.to_string())),
                };
                if let Err(e) = &result {
                    debug!("ws {label}: frame not written: {e}");
                }
                if let Some(ack) = ack {
                    ack(result);
                }
            }
            Outbound::Close(error) => {
                debug!("ws {label}: sending close frame");
                let frame = close_frame(error.as_ref());
                if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                    debug!("ws {label}: close frame not written: {e}");
                }
                break;
            }
        }
    }

    // Anything still queued after the close fails its ack.
    rx.close();
    while let Ok(item) = rx.try_recv() {
        if let Outbound::Message(_, Some(ack)) = item {
            ack(Err(SendError::Closed));
        }
    }
    debug!("ws {label}: writer stopped");
}

// ── Reader task ───────────────────────────────────────────────────────────────

async fn read_frames<S>(mut source: SplitStream<WebSocketStream<S>>, read_side: Arc<ReadSide>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let label = read_side.label.clone();
    let close_error = loop {
        let frame = match source.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                debug!("ws {label}: stream ended");
                break None;
            }
            Some(Err(e)) => {
                warn!("ws {label}: WebSocket error: {e}");
                break None;
            }
        };

        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(message) => match read_side.current_listener() {
                    Some(listener) => listener.on_message(message),
                    None => debug!("ws {label}: no listener, message dropped"),
                },
                Err(e) => warn!("ws {label}: invalid JSON frame skipped: {e}"),
            },
            WsMessage::Binary(bytes) => {
                warn!(
                    "ws {label}: unexpected binary frame ({} bytes) skipped",
                    bytes.len()
                );
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            WsMessage::Close(frame) => {
                debug!("ws {label}: close frame received");
                read_side.deliver_close(frame.and_then(|f| decode_close_reason(&f.reason)));
                // Keep polling so the close handshake reply gets flushed.
                while let Some(Ok(_)) = source.next().await {}
                break None;
            }
        }
    };

    read_side.deliver_close(close_error);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
