//! Integration tests for two sessions talking over an in-process channel.
//!
//! # Purpose
//!
//! These tests drive `SmartTransport` through its *public* API only, with a
//! real `ChannelTransport` pair underneath, the way an application wires two
//! peers together.  They verify:
//!
//! - Requests and responses in both directions, including handler errors
//!   and the `NOHANDLER` answer for unknown names.
//! - Async handlers and responders that answer later.
//! - Pass-through messages and extension commands reaching observers.
//! - The close and detach paths: pending requests fail with the right error,
//!   the peer sees the close, and a detached transport can be reused.
//!
//! ```text
//!   left session ── ChannelTransport "a" ═══ ChannelTransport "b" ── right session
//! ```
//!
//! Every await is wrapped in a timeout so a broken delivery path fails the
//! test instead of hanging it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use smart_transport::{
    ChannelTransport, ErrorKind, InboundSink, Lifecycle, ProtocolError, SendError, SmartTransport,
    Transport, TransportListener,
};
use tokio::sync::mpsc;

type Session = SmartTransport<ChannelTransport>;

const LIMIT: Duration = Duration::from_secs(2);

fn connected() -> (Session, Session) {
    let (a, b) = ChannelTransport::pair();
    (SmartTransport::new(a), SmartTransport::new(b))
}

/// Listener for a bare transport end: forwards every inbound message.
struct Forward(mpsc::UnboundedSender<Value>);

impl InboundSink for Forward {
    fn on_message(&self, message: Value) {
        let _ = self.0.send(message);
    }

    fn on_close(&self, _error: Option<ProtocolError>) {}
}

async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(LIMIT, fut)
        .await
        .expect("timed out waiting for the peer")
}

// ── Request / response ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_echo_round_trip() {
    // Arrange
    let (left, right) = connected();
    right.handle("echo", |req, responder| responder.ok(req));

    // Act
    let res = within(left.call("echo", json!({"a": 1}))).await;

    // Assert
    assert_eq!(res, Ok(json!({"a": 1})));
    assert_eq!(left.pending_count(), 0);
}

#[tokio::test]
async fn test_both_sides_can_serve_and_call() {
    let (left, right) = connected();
    left.handle("whoami", |_req, responder| responder.ok(json!("left")));
    right.handle("whoami", |_req, responder| responder.ok(json!("right")));

    let from_right = within(left.call("whoami", Value::Null)).await;
    let from_left = within(right.call("whoami", Value::Null)).await;

    assert_eq!(from_right, Ok(json!("right")));
    assert_eq!(from_left, Ok(json!("left")));
}

#[tokio::test]
async fn test_handler_error_reaches_caller() {
    let (left, right) = connected();
    right.handle("fail", |_req, responder| {
        responder.err(ProtocolError::new("EFAIL", "it broke"))
    });

    let res = within(left.call("fail", Value::Null)).await;

    assert_eq!(res, Err(ProtocolError::new("EFAIL", "it broke")));
    assert!(left.is_open() && right.is_open());
}

#[tokio::test]
async fn test_unknown_handler_yields_no_handler() {
    let (left, _right) = connected();

    let err = within(left.call("missing", Value::Null)).await.unwrap_err();

    assert!(err.is(ErrorKind::NoHandler));
    assert_eq!(err.message, "no handler registered for that request");
    assert!(left.is_open());
}

#[tokio::test]
async fn test_concurrent_calls_are_correlated_by_id() {
    // Arrange: the handler answers with the request payload doubled
    let (left, right) = connected();
    right.handle("double", |req, responder| {
        responder.ok(json!(req.as_i64().unwrap_or_default() * 2))
    });

    // Act: fire all calls before awaiting any of them
    let calls: Vec<_> = (0..20).map(|n| left.call("double", json!(n))).collect();
    assert_eq!(left.pending_count(), 20);
    let results = within(futures_join_all(calls)).await;

    // Assert
    for (n, res) in results.into_iter().enumerate() {
        assert_eq!(res, Ok(json!(n as i64 * 2)));
    }
}

async fn futures_join_all<F: Future>(futs: Vec<F>) -> Vec<F::Output> {
    let mut out = Vec::with_capacity(futs.len());
    for fut in futs {
        out.push(fut.await);
    }
    out
}

#[tokio::test]
async fn test_async_handler_answers_from_task() {
    let (left, right) = connected();
    right.handle_async("slow_add", |req| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        match (req["x"].as_i64(), req["y"].as_i64()) {
            (Some(x), Some(y)) => Ok(json!(x + y)),
            _ => Err(ProtocolError::new("EINVAL", "x and y required")),
        }
    });

    let ok = within(left.call("slow_add", json!({"x": 2, "y": 40}))).await;
    let bad = within(left.call("slow_add", json!({}))).await;

    assert_eq!(ok, Ok(json!(42)));
    assert_eq!(bad, Err(ProtocolError::new("EINVAL", "x and y required")));
}

#[tokio::test]
async fn test_responder_moved_to_another_task() {
    let (left, right) = connected();
    right.handle("later", |req, responder| {
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            responder.ok(req);
        });
    });

    let res = within(left.call("later", json!("eventually"))).await;

    assert_eq!(res, Ok(json!("eventually")));
}

#[tokio::test]
async fn test_request_callback_form() {
    let (left, right) = connected();
    right.handle("echo", |req, responder| responder.ok(req));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let id = left.request("echo", json!(7), move |res| {
        let _ = tx.send(res);
    });

    assert_eq!(id, Some(0));
    assert_eq!(within(rx).await.unwrap(), Ok(json!(7)));
}

// ── Observers ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plain_send_reaches_peer_message_observer() {
    let (left, right) = connected();
    let mut messages = right.messages();

    left.send(json!({"hello": "world"}), None).unwrap();

    assert_eq!(within(messages.recv()).await, Some(json!({"hello": "world"})));
}

#[tokio::test]
async fn test_command_reaches_peer_command_observer() {
    let (left, right) = connected();
    let mut commands = right.commands();

    left.command("progress", json!({"pct": 50}), None).unwrap();

    let event = within(commands.recv()).await.unwrap();
    assert_eq!(event.cmd, "progress");
    assert_eq!(event.data, Some(json!({"pct": 50})));
}

#[tokio::test]
async fn test_send_ack_fires_after_delivery() {
    let (left, _right) = connected();
    let (tx, rx) = tokio::sync::oneshot::channel();

    left.send(
        json!(1),
        Some(Box::new(move |r: Result<(), SendError>| {
            let _ = tx.send(r);
        })),
    )
    .unwrap();

    assert_eq!(within(rx).await.unwrap(), Ok(()));
}

// ── Close ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_close_fails_pending_and_closes_peer() {
    // Arrange: the peer never answers
    let (left, right) = connected();
    right.handle("hang", |_req, _responder| {});
    let mut right_closed = right.closed();
    let mut left_closed = left.closed();
    let pending = left.call("hang", Value::Null);

    // Act
    left.close(None);

    // Assert
    assert_eq!(within(pending).await, Err(ProtocolError::closed()));
    assert_eq!(within(left_closed.recv()).await, Some(None));
    assert_eq!(within(right_closed.recv()).await, Some(None));
    assert_eq!(left.state(), Lifecycle::Closed);
    assert_eq!(right.state(), Lifecycle::Closed);
}

#[tokio::test]
async fn test_close_error_propagates_to_peer_pending_requests() {
    let (left, right) = connected();
    left.handle("hang", |_req, _responder| {});
    let pending = right.call("hang", Value::Null);
    let reason = ProtocolError::new("SHUTDOWN", "going away");

    left.close(Some(reason.clone()));

    assert_eq!(within(pending).await, Err(reason));
}

#[tokio::test]
async fn test_close_notification_fires_once() {
    let (left, _right) = connected();
    let mut closed = left.closed();

    left.close(None);
    left.close(None);
    within(closed.recv()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(closed.try_recv().is_err(), "exactly one close notification");
}

#[tokio::test]
async fn test_calls_after_close_fail_with_closed() {
    let (left, _right) = connected();
    left.close(None);

    let err = within(left.call("echo", Value::Null)).await.unwrap_err();

    assert!(err.is(ErrorKind::Closed));
}

#[tokio::test]
async fn test_garbage_response_closes_receiver_with_unexpected_response() {
    // Arrange: a raw peer sends a response nobody asked for
    let (a, mut raw) = ChannelTransport::pair();
    let session = SmartTransport::new(a);
    let mut closed = session.closed();
    let pending = session.call("anything", Value::Null);

    // Act
    raw.send(json!({"cmd": "response", "data": {"id": 12345, "res": null}}), None);

    // Assert
    let expected = ProtocolError::unexpected_response();
    assert_eq!(within(pending).await, Err(expected.clone()));
    assert_eq!(within(closed.recv()).await, Some(Some(expected)));
}

#[tokio::test]
async fn test_malformed_request_closes_receiver_with_bad_message() {
    let (a, mut raw) = ChannelTransport::pair();
    let session = SmartTransport::new(a);
    let mut closed = session.closed();

    raw.send(json!({"cmd": "request", "data": [1]}), None);

    let reason = within(closed.recv()).await.flatten().unwrap();
    assert!(reason.is(ErrorKind::BadMessage));
    assert_eq!(session.state(), Lifecycle::Closed);
}

#[tokio::test]
async fn test_nameless_request_gets_no_handler_and_session_stays_open() {
    // Arrange: a raw peer that forwards whatever comes back
    let (a, mut raw) = ChannelTransport::pair();
    let session = SmartTransport::new(a);
    session.handle("echo", |req, responder| responder.ok(req));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = Arc::new(Forward(tx));
    raw.subscribe(TransportListener::from_arc(&sink));

    // Act
    raw.send(json!({"cmd": "request", "data": {"id": 4, "req": "x"}}), None);

    // Assert
    let reply = within(rx.recv()).await.unwrap();
    assert_eq!(reply["data"]["id"], json!(4));
    assert_eq!(reply["data"]["error"]["code"], json!("NOHANDLER"));
    assert!(session.is_open());
}

// ── Detach ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_detach_fails_pending_with_detached() {
    let (left, right) = connected();
    right.handle("hang", |_req, _responder| {});
    let pending = left.call("hang", Value::Null);

    let transport = left.detach();

    assert!(transport.is_some());
    let err = within(pending).await.unwrap_err();
    assert!(err.is(ErrorKind::Detached));
    assert_eq!(left.state(), Lifecycle::Detached);
    assert!(right.is_open(), "the peer is unaffected by a detach");
}

#[tokio::test]
async fn test_detached_transport_can_host_a_new_session() {
    // Arrange
    let (left, right) = connected();
    right.handle("echo", |req, responder| responder.ok(req));
    let transport = left.detach().unwrap();

    // Act
    let reborn = SmartTransport::new(transport);
    let res = within(reborn.call("echo", json!("again"))).await;

    // Assert
    assert_eq!(res, Ok(json!("again")));
    assert!(left.call("echo", Value::Null).id().is_none());
}

#[tokio::test]
async fn test_traffic_after_detach_never_reaches_old_session() {
    // Arrange
    let (left, right) = connected();
    let mut left_messages = left.messages();
    let _raw = left.detach().unwrap();

    // Act: a request and a plain message arrive on the detached transport
    let pending = right.call("echo", Value::Null);
    right.send(json!({"late": true}), None).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Assert
    assert!(left_messages.try_recv().is_err());
    assert_eq!(right.pending_count(), 1, "nobody answered the request");
    drop(pending);
}
