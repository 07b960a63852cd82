//! Pending-request table: correlation id → completion.
//!
//! Ids come from a monotonically increasing counter starting at 0; the first
//! request of a session is id 0, the next id 1, and so on.  Ids are never
//! reused within a session.
//!
//! Completions must never run under the session's state lock, since a
//! completion may issue new requests.  The session therefore splits the
//! removal from the invocation; see [`Correlator`].

use std::collections::HashMap;

use serde_json::Value;

use crate::error::ProtocolError;
use crate::protocol::RequestId;

/// Callback that receives the outcome of one outbound request.
pub type Completion = Box<dyn FnOnce(Result<Value, ProtocolError>) + Send + 'static>;

/// Id generator plus table of outstanding requests.
///
/// Each lookup comes in two forms:
///
/// | Removes only                           | Removes and invokes            |
/// |----------------------------------------|--------------------------------|
/// | [`take`](Self::take)                   | [`resolve`](Self::resolve)     |
/// | [`split_pending`](Self::split_pending) | [`flush_all`](Self::flush_all) |
///
/// The session takes a single completion under its lock and runs it after
/// unlocking.  On teardown it splits the whole table off under the lock and
/// calls `flush_all` on the detached half once unlocked.  `resolve` is for a
/// table the caller owns outright.
#[derive(Default)]
pub struct Correlator {
    next_id: RequestId,
    pending: HashMap<RequestId, Completion>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next unused id and advances the counter.
    pub fn next_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    /// Records `completion` as the waiter for `id`.
    pub fn register(&mut self, id: RequestId, completion: Completion) {
        self.pending.insert(id, completion);
    }

    /// Removes and returns the completion for `id` without invoking it.
    pub fn take(&mut self, id: RequestId) -> Option<Completion> {
        self.pending.remove(&id)
    }

    /// Moves every pending completion into a new table and returns it.
    ///
    /// The id counter stays behind, so ids are still never reused.
    pub fn split_pending(&mut self) -> Correlator {
        Correlator {
            next_id: 0,
            pending: std::mem::take(&mut self.pending),
        }
    }

    /// Removes every pending completion, leaving the table empty.
    pub fn drain(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    /// Invokes and removes the completion for `id`.
    ///
    /// Returns `false` if no request with that id is pending.
    pub fn resolve(&mut self, id: RequestId, outcome: Result<Value, ProtocolError>) -> bool {
        match self.take(id) {
            Some(completion) => {
                completion(outcome);
                true
            }
            None => false,
        }
    }

    /// Fails every pending request with `error` and empties the table.
    ///
    /// Returns the number of requests failed.
    pub fn flush_all(&mut self, error: &ProtocolError) -> usize {
        let drained = self.drain();
        let count = drained.len();
        for completion in drained {
            completion(Err(error.clone()));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}
