//! Envelope types and the decode step that classifies inbound messages.

pub mod envelope;

pub use envelope::{
    command_envelope, decode, request_envelope, response_envelope, CommandEvent, Inbound,
    RequestId, RequestPayload, ResponsePayload, CMD_REQUEST, CMD_RESPONSE,
};
