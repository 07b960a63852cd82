//! The session: lifecycle, correlation, handlers, observers and dispatch.
//!
//! - `facade`     – [`SmartTransport`], the public handle, and its lifecycle
//! - `dispatcher` – routing of decoded inbound envelopes
//! - `correlator` – request ids and pending completions
//! - `registry`   – request handlers and [`Responder`]
//! - `events`     – observer channels and [`Subscription`]

pub mod correlator;
mod dispatcher;
pub mod events;
pub mod facade;
pub mod registry;

pub use correlator::{Completion, Correlator};
pub use events::{Channel, Events, Subscription};
pub use facade::{Lifecycle, PendingCall, SmartTransport};
pub use registry::{Handler, HandlerRegistry, Responder};
