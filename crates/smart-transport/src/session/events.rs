//! Observer channels: pass-through messages, extension commands, close.
//!
//! Each [`Channel`] keeps a list of callbacks.  Emitting takes a snapshot of
//! the list and calls every callback with no lock held, so a callback may
//! subscribe, cancel, or call back into the session.
//!
//! Two ways to observe:
//!
//! - [`Channel::subscribe`] registers a closure and returns a
//!   [`Subscription`] handle.  Dropping the handle keeps the callback
//!   registered; call [`Subscription::cancel`] to remove it.
//! - [`Channel::receiver`] returns a Tokio unbounded receiver.  The
//!   subscription is removed automatically after the receiver is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ProtocolError;
use crate::protocol::CommandEvent;

/// Internal callback form.  Returning `false` removes the subscriber.
type Listener<E> = Arc<dyn Fn(&E) -> bool + Send + Sync + 'static>;

struct Subscribers<E> {
    next_key: u64,
    entries: Vec<(u64, Listener<E>)>,
}

trait Cancel: Send + Sync {
    fn cancel(&self, key: u64) -> bool;
}

impl<E: 'static> Cancel for Mutex<Subscribers<E>> {
    fn cancel(&self, key: u64) -> bool {
        let mut subs = self.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subs.entries.len();
        subs.entries.retain(|(k, _)| *k != key);
        subs.entries.len() != before
    }
}

/// One observer channel carrying events of type `E`.
pub struct Channel<E> {
    subscribers: Arc<Mutex<Subscribers<E>>>,
}

impl<E: Clone + Send + 'static> Channel<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_key: 0,
                entries: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers<E>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add(&self, listener: Listener<E>) -> Subscription {
        let key = {
            let mut subs = self.lock();
            let key = subs.next_key;
            subs.next_key += 1;
            subs.entries.push((key, listener));
            key
        };
        let target: Arc<dyn Cancel> = self.subscribers.clone();
        Subscription {
            key,
            target: Arc::downgrade(&target),
        }
    }

    /// Registers `callback` for every future event.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add(Arc::new(move |event: &E| {
            callback(event);
            true
        }))
    }

    /// Returns a receiver that gets a clone of every future event.
    pub fn receiver(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add(Arc::new(move |event: &E| tx.send(event.clone()).is_ok()));
        rx
    }

    /// Delivers `event` to every current subscriber.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<(u64, Listener<E>)> = self.lock().entries.clone();
        let mut gone = Vec::new();
        for (key, listener) in snapshot {
            if !listener(event) {
                gone.push(key);
            }
        }
        if !gone.is_empty() {
            self.lock().entries.retain(|(k, _)| !gone.contains(k));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().entries.len()
    }
}

impl<E: Clone + Send + 'static> Default for Channel<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to one registered observer.
///
/// Dropping it does **not** unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    key: u64,
    target: Weak<dyn Cancel>,
}

impl Subscription {
    /// Removes the observer.  Returns `false` if it was already gone.
    pub fn cancel(self) -> bool {
        match self.target.upgrade() {
            Some(target) => target.cancel(self.key),
            None => false,
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish()
    }
}

/// The three channels a session exposes.
#[derive(Default)]
pub struct Events {
    /// Inbound values that are not command envelopes.
    pub message: Channel<Value>,
    /// Inbound extension commands, unmodified.
    pub command: Channel<CommandEvent>,
    /// Terminal close, carrying the close error if there was one.
    pub close: Channel<Option<ProtocolError>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting(channel: &Channel<u32>) -> (Subscription, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = channel.subscribe(move |v| sink.lock().unwrap().push(*v));
        (sub, seen)
    }

    #[test]
    fn test_emit_reaches_every_subscriber() {
        // Arrange
        let channel = Channel::new();
        let (_s1, seen1) = counting(&channel);
        let (_s2, seen2) = counting(&channel);

        // Act
        channel.emit(&3);

        // Assert
        assert_eq!(seen1.lock().unwrap().as_slice(), &[3]);
        assert_eq!(seen2.lock().unwrap().as_slice(), &[3]);
    }

    #[test]
    fn test_cancelled_subscription_stops_receiving() {
        let channel = Channel::new();
        let (sub, seen) = counting(&channel);

        channel.emit(&1);
        assert!(sub.clone().cancel());
        channel.emit(&2);

        assert_eq!(seen.lock().unwrap().as_slice(), &[1]);
        assert!(!sub.cancel(), "second cancel is a no-op");
    }

    #[test]
    fn test_dropped_handle_keeps_subscription() {
        let channel = Channel::new();
        let (sub, seen) = counting(&channel);
        drop(sub);

        channel.emit(&9);

        assert_eq!(seen.lock().unwrap().as_slice(), &[9]);
    }

    #[test]
    fn test_receiver_is_removed_once_dropped() {
        let channel: Channel<u32> = Channel::new();
        let rx = channel.receiver();
        assert_eq!(channel.subscriber_count(), 1);

        drop(rx);
        channel.emit(&1);

        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn test_receiver_gets_clones() {
        let channel: Channel<u32> = Channel::new();
        let mut rx = channel.receiver();

        channel.emit(&4);
        channel.emit(&5);

        assert_eq!(rx.try_recv().unwrap(), 4);
        assert_eq!(rx.try_recv().unwrap(), 5);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let channel = Arc::new(Channel::<u32>::new());
        let inner = Arc::clone(&channel);
        channel.subscribe(move |_| {
            inner.subscribe(|_| {});
        });

        channel.emit(&0);

        assert_eq!(channel.subscriber_count(), 2);
    }
}
