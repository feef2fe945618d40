//! A named in-process pub/sub topic.
//!
//! Each subscriber owns a bounded queue. Publishing never blocks: a full
//! queue drops the message for that subscriber, and subscribers whose
//! receiving end is gone are pruned. Nothing is retained for subscribers
//! that join later.

use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::{ConsistencyError, ConsistencyResult};

/// Outcome of one publish across all subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fanout {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug)]
pub struct AlertChannel {
    name: String,
    capacity: usize,
    subscribers: Mutex<Vec<Sender<String>>>,
}

impl AlertChannel {
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes from now on; earlier messages are not replayed.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the subscriber list lock is poisoned.
    pub fn subscribe(&self) -> ConsistencyResult<AlertSubscription> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers
            .lock()
            .map_err(|_| ConsistencyError::internal("alert channel lock poisoned"))?
            .push(tx);
        Ok(AlertSubscription {
            channel: self.name.clone(),
            rx,
        })
    }

    /// Number of live subscribers as of the last publish.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Offers `payload` to every subscriber without blocking.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyError::Internal` if the subscriber list lock is poisoned.
    pub fn publish(&self, payload: &str) -> ConsistencyResult<Fanout> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| ConsistencyError::internal("alert channel lock poisoned"))?;
        let mut fanout = Fanout::default();
        subscribers.retain(|tx| match tx.try_send(payload.to_string()) {
            Ok(()) => {
                fanout.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                fanout.dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        Ok(fanout)
    }
}

/// Receiving end of an [`AlertChannel`] subscription.
#[derive(Debug)]
pub struct AlertSubscription {
    channel: String,
    rx: Receiver<String>,
}

impl AlertSubscription {
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits up to `timeout` for the next payload. `None` on timeout or if the
    /// channel itself was dropped.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        match self.rx.recv_timeout(timeout) {
            Ok(payload) => Some(payload),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    #[must_use]
    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    pub(super) fn receiver(&self) -> &Receiver<String> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_reaches_nobody() {
        let channel = AlertChannel::new("alerts", 4);
        assert_eq!(channel.publish("x").unwrap(), Fanout::default());
    }

    #[test]
    fn every_subscriber_gets_a_copy() {
        let channel = AlertChannel::new("alerts", 4);
        let a = channel.subscribe().unwrap();
        let b = channel.subscribe().unwrap();
        let fanout = channel.publish("hello").unwrap();
        assert_eq!(fanout.delivered, 2);
        assert_eq!(a.try_recv().as_deref(), Some("hello"));
        assert_eq!(b.try_recv().as_deref(), Some("hello"));
        assert_eq!(a.channel(), "alerts");
    }

    #[test]
    fn late_subscriber_misses_earlier_messages() {
        let channel = AlertChannel::new("alerts", 4);
        let _early = channel.subscribe().unwrap();
        channel.publish("first").unwrap();
        let late = channel.subscribe().unwrap();
        channel.publish("second").unwrap();
        assert_eq!(late.try_recv().as_deref(), Some("second"));
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn full_queue_drops_and_dead_subscribers_are_pruned() {
        let channel = AlertChannel::new("alerts", 1);
        let slow = channel.subscribe().unwrap();
        let gone = channel.subscribe().unwrap();
        drop(gone);

        let first = channel.publish("1").unwrap();
        assert_eq!(first.delivered, 1);
        assert_eq!(channel.subscriber_count(), 1);

        let second = channel.publish("2").unwrap();
        assert_eq!(second, Fanout { delivered: 0, dropped: 1 });
        assert_eq!(slow.try_recv().as_deref(), Some("1"));
    }
}
