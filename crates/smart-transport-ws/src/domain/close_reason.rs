//! Carrying a [`ProtocolError`] in a WebSocket close frame.
//!
//! RFC 6455 limits a close reason to 123 bytes of UTF-8.  The error travels
//! as its `{code, message}` JSON when that fits; otherwise the message is
//! shortened until it does.  An error that cannot fit at all (an absurdly
//! long code) is sent without a reason.

use smart_transport::ProtocolError;

/// Largest close reason a WebSocket close frame can carry, in bytes.
pub const MAX_CLOSE_REASON: usize = 123;

/// Encodes `error` as a close reason of at most [`MAX_CLOSE_REASON`] bytes.
///
/// Returns an empty string when there is no error or it cannot be made to fit.
pub fn encode_close_reason(error: Option<&ProtocolError>) -> String {
    let Some(error) = error else {
        return String::new();
    };

    let mut candidate = error.clone();
    loop {
        let text = serde_json::to_string(&candidate).unwrap_or_default();
        if text.len() <= MAX_CLOSE_REASON {
            return text;
        }
        if candidate.message.is_empty() {
            return String::new();
        }
        let overshoot = text.len() - MAX_CLOSE_REASON;
        let keep = candidate.message.len().saturating_sub(overshoot);
        candidate.message = truncate_at_char_boundary(&candidate.message, keep).to_string();
    }
}

/// Reads a close reason back into an error.
///
/// Anything that is not `{code, message}` JSON with a non-empty code yields
/// `None`: the peer closed without a protocol error.
pub fn decode_close_reason(reason: &str) -> Option<ProtocolError> {
    if reason.is_empty() {
        return None;
    }
    serde_json::from_str::<ProtocolError>(reason)
        .ok()
        .filter(|e| !e.code.is_empty())
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if max >= s.len() {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
