//! Routes decoded inbound envelopes.
//!
//! | Inbound          | Action                                                      |
//! |------------------|-------------------------------------------------------------|
//! | request          | run the named handler, or answer `NOHANDLER`                |
//! | response         | complete the pending request, or close `UNEXPECTEDRESPONSE` |
//! | extension        | emit on the command channel                                 |
//! | pass-through     | emit on the message channel                                 |
//! | no object `data` | close the session with `BADMESSAGE`                         |
//!
//! Handlers, completions and observers all run with no session lock held.

use std::sync::Weak;

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::facade::Shared;
use super::registry::{ResponseSink, Responder};
use crate::error::ProtocolError;
use crate::protocol::{decode, Inbound, RequestPayload, ResponsePayload};
use crate::transport::Transport;

impl<T: Transport> Shared<T> {
    /// Handles one inbound message on an open session.
    pub(super) fn dispatch(&self, message: Value) {
        match decode(message) {
            Ok(Inbound::Request(request)) => self.dispatch_request(request),
            Ok(Inbound::Response(response)) => self.dispatch_response(response),
            Ok(Inbound::Extension(event)) => {
                trace!("session {}: extension command {:?}", self.id, event.cmd);
                self.events.command.emit(&event);
            }
            Ok(Inbound::PassThrough(message)) => {
                trace!("session {}: pass-through message", self.id);
                self.events.message.emit(&message);
            }
            Err(error) => {
                warn!("session {}: malformed envelope, closing", self.id);
                self.shutdown(Some(error), true);
            }
        }
    }

    fn dispatch_request(&self, request: RequestPayload) {
        let RequestPayload { name, id, req } = request;
        let handler = name
            .as_deref()
            .and_then(|name| self.lock_state().handlers.lookup(name));
        match (handler, name) {
            (Some(handler), Some(name)) => {
                debug!("session {}: request {id} → handler {name:?}", self.id);
                let sink: Weak<dyn ResponseSink> = self.me.clone();
                handler(req, Responder::new(id, name, sink));
            }
            (_, name) => {
                debug!(
                    "session {}: request {id} for unknown handler {name:?}",
                    self.id
                );
                self.send_response(ResponsePayload::failure(id, ProtocolError::no_handler()));
            }
        }
    }

    fn dispatch_response(&self, response: ResponsePayload) {
        // An id we could never have issued is treated like an unknown one.
        let completion = response
            .request_id()
            .and_then(|id| self.lock_state().correlator.take(id));
        match completion {
            Some(completion) => {
                debug!("session {}: response for request {}", self.id, response.id);
                completion(response.into_outcome());
            }
            None => {
                warn!(
                    "session {}: response for unknown request {}, closing",
                    self.id, response.id
                );
                self.shutdown(Some(ProtocolError::unexpected_response()), true);
            }
        }
    }
}
