//! # smart-transport
//!
//! A session layer that turns a plain duplex JSON message channel into a
//! peer-to-peer RPC endpoint.
//!
//! Either side of a connection can register named request handlers and send
//! requests to the other side; each request is answered with exactly one
//! response, correlated by an id.  Messages that are not part of the
//! request/response protocol are passed through to observers untouched.
//!
//! # Architecture overview (for beginners)
//!
//! The crate never touches a socket.  It sits on top of a *transport*: any
//! type that can send and receive whole JSON values and report when it has
//! closed.  [`ChannelTransport`] is an in-process implementation; the
//! `smart-transport-ws` crate provides one over WebSocket.
//!
//! - **`protocol`** – The envelope format (`{cmd, data}`) and the decode step
//!   that sorts every inbound message into request, response, extension
//!   command, or pass-through.
//!
//! - **`session`** – [`SmartTransport`] itself: the lifecycle
//!   (open → detached | closed), the table of pending requests, the handler
//!   registry, and the observer channels.
//!
//! - **`transport`** – The [`Transport`] trait a channel must implement, and
//!   the in-memory [`ChannelTransport`].
//!
//! - **`error`** – The wire error taxonomy ([`ErrorKind`], [`ProtocolError`])
//!   plus the local error types of this crate's API.
//!
//! ```text
//!  your code ──request()/call()──▶ SmartTransport ──send()──▶ Transport ─▶ peer
//!  your code ◀──completion/observers── dispatcher ◀─on_message── Transport ◀─ peer
//! ```

pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-export the everyday types at the crate root so callers can write
// `smart_transport::SmartTransport` instead of the full module path.
pub use error::{CallError, ErrorKind, ProtocolError, SendError, SessionError};
pub use protocol::{CommandEvent, RequestId};
pub use session::{Lifecycle, PendingCall, Responder, SmartTransport, Subscription};
pub use transport::{ChannelTransport, InboundSink, SendAck, Transport, TransportListener};
