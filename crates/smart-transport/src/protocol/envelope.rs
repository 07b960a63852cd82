//! The envelope: the unit exchanged over the transport.
//!
//! An envelope is either a *command envelope* `{cmd, data}` or any other JSON
//! value, which is passed through untouched.  Two commands are built in:
//!
//! ```text
//! {"cmd":"request",  "data":{"name":"echo","id":0,"req":{"a":1}}}
//! {"cmd":"response", "data":{"id":0,"res":{"a":1}}}
//! {"cmd":"response", "data":{"id":0,"error":{"code":"X","message":"Y"}}}
//! ```
//!
//! Every other `cmd` value is an extension command and is surfaced to
//! observers unmodified.
//!
//! # Decoding
//!
//! [`decode`] turns a raw inbound value into the closed [`Inbound`] union so
//! the dispatcher can `match` exhaustively instead of looking commands up by
//! string.  The only failure is [`ErrorKind::BadMessage`]: a built-in command
//! whose `data` is missing or not an object.  Inside an object `data` the
//! fields are read leniently; a request without a usable `name` simply finds
//! no handler, and a response whose `id` matches nothing pending is the
//! dispatcher's concern.

use serde_json::{json, Map, Value};

use crate::error::{ErrorKind, ProtocolError};

/// Command name of an outbound or inbound request.
pub const CMD_REQUEST: &str = "request";

/// Command name of a response to an earlier request.
pub const CMD_RESPONSE: &str = "response";

/// Correlation id tying a request to its response.
///
/// Ids come from a per-session counter starting at 0.  At one request per
/// nanosecond a 64-bit counter lasts over 500 years, so no reuse policy is
/// needed within a session.
pub type RequestId = u64;

// ── Payloads ──────────────────────────────────────────────────────────────────

/// `data` of an inbound `request` command.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPayload {
    /// Handler to invoke; `None` when the peer sent no string `name`.
    pub name: Option<String>,
    /// Correlation id exactly as the peer sent it (`null` if absent).  It is
    /// echoed back unchanged in the response.
    pub id: Value,
    /// Request payload; absent on the wire means `null`.
    pub req: Value,
}

/// `data` of a `response` command.
///
/// A present `error` marks a failure, anything else is a success carrying
/// `res` (or `null`).
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePayload {
    /// Id of the request being answered, as it appears on the wire.
    pub id: Value,
    pub res: Option<Value>,
    pub error: Option<ProtocolError>,
}

impl ResponsePayload {
    /// Builds a success response.
    pub fn success(id: impl Into<Value>, res: Value) -> Self {
        Self {
            id: id.into(),
            res: Some(res),
            error: None,
        }
    }

    /// Builds an error response.
    pub fn failure(id: impl Into<Value>, error: ProtocolError) -> Self {
        Self {
            id: id.into(),
            res: None,
            error: Some(error),
        }
    }

    /// The id as one of our own correlation ids, if it can be one.
    pub fn request_id(&self) -> Option<RequestId> {
        self.id.as_u64()
    }

    /// Converts the payload into the value handed to the requester's completion.
    pub fn into_outcome(self) -> Result<Value, ProtocolError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.res.unwrap_or(Value::Null)),
        }
    }
}

/// An extension command: any `cmd` other than `request` / `response`.
///
/// A non-string `cmd` is carried as its JSON text (`7`, `true`, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    pub cmd: String,
    pub data: Option<Value>,
    pub error: Option<Value>,
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// An inbound envelope, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The peer asks us to run a handler.
    Request(RequestPayload),
    /// The peer answers one of our requests.
    Response(ResponsePayload),
    /// A command this crate does not interpret.
    Extension(CommandEvent),
    /// Not a command envelope at all.
    PassThrough(Value),
}

/// Classifies an inbound message.
///
/// A message is a command envelope only if it is a JSON object with a truthy
/// `cmd` (not `null`, `false`, `0` or `""`).  Everything else, including
/// non-objects, is [`Inbound::PassThrough`] and is returned unchanged.
///
/// # Errors
///
/// Returns a [`ErrorKind::BadMessage`] error when a `request` or `response`
/// envelope has no `data` or a non-object `data`.  The caller treats this as
/// fatal for the whole session.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use smart_transport::protocol::{decode, Inbound};
///
/// let inbound = decode(json!({"cmd": "request", "data": {"name": "echo", "id": 0, "req": 1}}))
///     .unwrap();
/// assert!(matches!(inbound, Inbound::Request(ref r) if r.name.as_deref() == Some("echo")));
///
/// let plain = decode(json!({"hello": "world"})).unwrap();
/// assert!(matches!(plain, Inbound::PassThrough(_)));
/// ```
pub fn decode(message: Value) -> Result<Inbound, ProtocolError> {
    let mut fields = match message {
        Value::Object(fields) => fields,
        other => return Ok(Inbound::PassThrough(other)),
    };

    let cmd = match fields.get("cmd") {
        Some(Value::String(cmd)) if !cmd.is_empty() => cmd.clone(),
        Some(other) if is_truthy(other) => other.to_string(),
        _ => return Ok(Inbound::PassThrough(Value::Object(fields))),
    };

    match cmd.as_str() {
        CMD_REQUEST => take_object_data(&mut fields)
            .map(request_payload)
            .map(Inbound::Request),
        CMD_RESPONSE => take_object_data(&mut fields)
            .map(response_payload)
            .map(Inbound::Response),
        _ => Ok(Inbound::Extension(CommandEvent {
            cmd,
            data: fields.remove("data"),
            error: fields.remove("error"),
        })),
    }
}

/// Removes `data` from a command envelope, requiring it to be an object.
fn take_object_data(fields: &mut Map<String, Value>) -> Result<Map<String, Value>, ProtocolError> {
    match fields.remove("data") {
        Some(Value::Object(data)) => Ok(data),
        _ => Err(ErrorKind::BadMessage.into()),
    }
}

fn request_payload(mut data: Map<String, Value>) -> RequestPayload {
    let name = match data.remove("name") {
        Some(Value::String(name)) => Some(name),
        _ => None,
    };
    RequestPayload {
        name,
        id: data.remove("id").unwrap_or(Value::Null),
        req: data.remove("req").unwrap_or(Value::Null),
    }
}

fn response_payload(mut data: Map<String, Value>) -> ResponsePayload {
    let error = data
        .remove("error")
        .filter(is_truthy)
        .map(error_from_wire);
    ResponsePayload {
        id: data.remove("id").unwrap_or(Value::Null),
        res: data.remove("res"),
        error,
    }
}

/// Rebuilds a peer's error from whatever `code` / `message` it carries.
///
/// A bare string becomes the message; any other non-object value becomes the
/// message as JSON text.  Missing fields are empty.
fn error_from_wire(error: Value) -> ProtocolError {
    match error {
        Value::Object(mut fields) => ProtocolError::new(
            text_field(fields.remove("code")),
            text_field(fields.remove("message")),
        ),
        Value::String(message) => ProtocolError::new("", message),
        other => ProtocolError::new("", other.to_string()),
    }
}

fn text_field(value: Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
    }
}

/// JSON-level truthiness: `null`, `false`, zero and `""` are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Builds `{cmd:"request", data:{name, id, req}}`.
pub fn request_envelope(name: &str, id: RequestId, req: Value) -> Value {
    json!({
        "cmd": CMD_REQUEST,
        "data": { "name": name, "id": id, "req": req },
    })
}

/// Builds `{cmd:"response", data:{id, res}}` or `{cmd:"response", data:{id, error}}`.
pub fn response_envelope(payload: &ResponsePayload) -> Value {
    let mut data = Map::new();
    data.insert("id".to_string(), payload.id.clone());
    match &payload.error {
        Some(error) => {
            data.insert(
                "error".to_string(),
                json!({ "code": error.code, "message": error.message }),
            );
        }
        None => {
            data.insert(
                "res".to_string(),
                payload.res.clone().unwrap_or(Value::Null),
            );
        }
    }
    json!({ "cmd": CMD_RESPONSE, "data": Value::Object(data) })
}

/// Builds a bare `{cmd, data}` envelope.
pub fn command_envelope(cmd: &str, data: Value) -> Value {
    json!({ "cmd": cmd, "data": data })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_bad_message(message: Value) {
        match decode(message.clone()) {
            Err(e) => assert!(e.is(ErrorKind::BadMessage), "got {e} for {message}"),
            Ok(other) => panic!("expected BADMESSAGE for {message}, got {other:?}"),
        }
    }

    // ── Pass-through ──────────────────────────────────────────────────────────

    #[test]
    fn test_object_without_cmd_passes_through_unchanged() {
        // Arrange
        let message = json!({"type": "chat", "text": "hi"});

        // Act
        let inbound = decode(message.clone()).unwrap();

        // Assert
        assert_eq!(inbound, Inbound::PassThrough(message));
    }

    #[test]
    fn test_non_object_messages_pass_through() {
        for message in [json!(42), json!("text"), json!([1, 2]), Value::Null] {
            assert_eq!(decode(message.clone()).unwrap(), Inbound::PassThrough(message));
        }
    }

    #[test]
    fn test_falsy_cmd_is_not_a_command() {
        for message in [
            json!({"cmd": "", "data": {}}),
            json!({"cmd": 0, "data": {}}),
            json!({"cmd": false}),
            json!({"cmd": null}),
        ] {
            assert_eq!(decode(message.clone()).unwrap(), Inbound::PassThrough(message));
        }
    }

    #[test]
    fn test_truthy_non_string_cmd_is_an_extension() {
        let inbound = decode(json!({"cmd": 7, "data": {"x": 1}})).unwrap();
        assert_eq!(
            inbound,
            Inbound::Extension(CommandEvent {
                cmd: "7".to_string(),
                data: Some(json!({"x": 1})),
                error: None,
            })
        );
    }

    // ── Requests ──────────────────────────────────────────────────────────────

    #[test]
    fn test_request_envelope_decodes_all_fields() {
        let inbound =
            decode(json!({"cmd": "request", "data": {"name": "echo", "id": 3, "req": {"a": 1}}}))
                .unwrap();

        assert_eq!(
            inbound,
            Inbound::Request(RequestPayload {
                name: Some("echo".to_string()),
                id: json!(3),
                req: json!({"a": 1}),
            })
        );
    }

    #[test]
    fn test_request_without_req_defaults_to_null() {
        let inbound = decode(json!({"cmd": "request", "data": {"name": "n", "id": 0}})).unwrap();
        match inbound {
            Inbound::Request(r) => assert_eq!(r.req, Value::Null),
            other => panic!("expected Request, got {other:?}"),
        }
    }

    #[test]
    fn test_request_with_missing_or_scalar_data_is_bad_message() {
        assert_bad_message(json!({"cmd": "request"}));
        assert_bad_message(json!({"cmd": "request", "data": null}));
        assert_bad_message(json!({"cmd": "request", "data": "oops"}));
        assert_bad_message(json!({"cmd": "request", "data": [1]}));
    }

    #[test]
    fn test_request_fields_are_read_leniently() {
        // Arrange: no name, a non-string name, a negative and a string id
        let nameless = json!({"cmd": "request", "data": {"id": 3, "req": 1}});
        let numeric_name = json!({"cmd": "request", "data": {"name": 5, "id": -1}});
        let text_id = json!({"cmd": "request", "data": {"name": "x", "id": "abc"}});

        // Act
        let decoded: Vec<_> = [nameless, numeric_name, text_id]
            .into_iter()
            .map(|m| decode(m).unwrap())
            .collect();

        // Assert
        assert_eq!(
            decoded,
            vec![
                Inbound::Request(RequestPayload { name: None, id: json!(3), req: json!(1) }),
                Inbound::Request(RequestPayload { name: None, id: json!(-1), req: Value::Null }),
                Inbound::Request(RequestPayload {
                    name: Some("x".to_string()),
                    id: json!("abc"),
                    req: Value::Null,
                }),
            ]
        );
    }

    // ── Responses ─────────────────────────────────────────────────────────────

    #[test]
    fn test_success_response_yields_res() {
        let inbound = decode(json!({"cmd": "response", "data": {"id": 0, "res": {"a": 1}}})).unwrap();
        match inbound {
            Inbound::Response(r) => {
                assert_eq!(r.request_id(), Some(0));
                assert_eq!(r.into_outcome(), Ok(json!({"a": 1})));
            }
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn test_error_response_reconstructs_code_and_message() {
        let inbound = decode(json!({
            "cmd": "response",
            "data": {"id": 9, "error": {"code": "X", "message": "Y"}}
        }))
        .unwrap();
        match inbound {
            Inbound::Response(r) => {
                assert_eq!(r.into_outcome(), Err(ProtocolError::new("X", "Y")));
            }
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn test_null_error_is_treated_as_success() {
        let inbound =
            decode(json!({"cmd": "response", "data": {"id": 1, "error": null, "res": 5}})).unwrap();
        match inbound {
            Inbound::Response(r) => assert_eq!(r.into_outcome(), Ok(json!(5))),
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn test_response_without_object_data_is_bad_message() {
        assert_bad_message(json!({"cmd": "response"}));
        assert_bad_message(json!({"cmd": "response", "data": 12}));
    }

    #[test]
    fn test_response_without_usable_id_still_decodes() {
        for data in [json!({"res": 1}), json!({"id": "zz"}), json!({"id": -4})] {
            let message = json!({"cmd": "response", "data": data});
            match decode(message).unwrap() {
                Inbound::Response(r) => assert_eq!(r.request_id(), None),
                other => panic!("expected Response, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_non_object_error_becomes_error_message() {
        let inbound = decode(json!({"cmd": "response", "data": {"id": 0, "error": "boom"}})).unwrap();
        match inbound {
            Inbound::Response(r) => assert_eq!(r.into_outcome(), Err(ProtocolError::new("", "boom"))),
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_error_object_keeps_present_fields() {
        let inbound =
            decode(json!({"cmd": "response", "data": {"id": 0, "error": {"code": "EX"}}})).unwrap();
        match inbound {
            Inbound::Response(r) => assert_eq!(r.into_outcome(), Err(ProtocolError::new("EX", ""))),
            other => panic!("expected Response, got {other:?}"),
        }
    }

    #[test]
    fn test_falsy_error_is_treated_as_success() {
        for error in [json!(false), json!(0), json!("")] {
            let message = json!({"cmd": "response", "data": {"id": 2, "error": error, "res": "ok"}});
            match decode(message).unwrap() {
                Inbound::Response(r) => assert_eq!(r.into_outcome(), Ok(json!("ok"))),
                other => panic!("expected Response, got {other:?}"),
            }
        }
    }

    // ── Extensions ────────────────────────────────────────────────────────────

    #[test]
    fn test_unknown_cmd_becomes_extension_with_data_and_error() {
        let inbound = decode(json!({"cmd": "subscribe", "data": {"topic": "t"}, "error": "e"})).unwrap();
        assert_eq!(
            inbound,
            Inbound::Extension(CommandEvent {
                cmd: "subscribe".to_string(),
                data: Some(json!({"topic": "t"})),
                error: Some(json!("e")),
            })
        );
    }

    #[test]
    fn test_extension_does_not_require_object_data() {
        let inbound = decode(json!({"cmd": "ping"})).unwrap();
        assert_eq!(
            inbound,
            Inbound::Extension(CommandEvent {
                cmd: "ping".to_string(),
                data: None,
                error: None,
            })
        );
    }

    // ── Encoding ──────────────────────────────────────────────────────────────

    #[test]
    fn test_request_envelope_shape() {
        assert_eq!(
            request_envelope("echo", 0, json!({"a": 1})),
            json!({"cmd": "request", "data": {"name": "echo", "id": 0, "req": {"a": 1}}})
        );
    }

    #[test]
    fn test_response_envelope_success_shape() {
        let payload = ResponsePayload::success(0, json!({"a": 1}));
        assert_eq!(
            response_envelope(&payload),
            json!({"cmd": "response", "data": {"id": 0, "res": {"a": 1}}})
        );
    }

    #[test]
    fn test_response_envelope_echoes_foreign_id() {
        let payload = ResponsePayload::success(json!("abc"), json!(1));
        assert_eq!(
            response_envelope(&payload),
            json!({"cmd": "response", "data": {"id": "abc", "res": 1}})
        );
    }

    #[test]
    fn test_response_envelope_error_shape() {
        let payload = ResponsePayload::failure(4, ProtocolError::no_handler());
        assert_eq!(
            response_envelope(&payload),
            json!({
                "cmd": "response",
                "data": {
                    "id": 4,
                    "error": {"code": "NOHANDLER", "message": "no handler registered for that request"}
                }
            })
        );
    }

    #[test]
    fn test_command_envelope_shape() {
        assert_eq!(
            command_envelope("subscribe", json!({"topic": "t"})),
            json!({"cmd": "subscribe", "data": {"topic": "t"}})
        );
    }
}
