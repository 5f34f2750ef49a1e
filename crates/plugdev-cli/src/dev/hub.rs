//! Live notification hub.
//!
//! Holds the last-change timestamp and the set of connected live clients
//! (WebSocket sockets and SSE streams). Each client owns a capacity-1
//! wakeup channel; a notification only says "look again", and the writer
//! reads the current timestamp when it gets to run. Missed wakeups therefore
//! collapse instead of queueing, and a client never goes backwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Process-wide live state. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct LiveHub {
    inner: Arc<HubInner>,
}

#[derive(Debug, Default)]
struct HubInner {
    last_change: AtomicI64,
    clients: RwLock<HashMap<usize, mpsc::Sender<()>>>,
    next_client_id: AtomicUsize,
}

impl LiveHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub that starts at a given timestamp.
    pub fn starting_at(ts: i64) -> Self {
        let hub = Self::default();
        hub.inner.last_change.store(ts, Ordering::SeqCst);
        hub
    }

    /// Current `lastChangeTimestamp` in milliseconds since the epoch.
    pub fn timestamp(&self) -> i64 {
        self.inner.last_change.load(Ordering::SeqCst)
    }

    /// Move the timestamp to "now", and always strictly forward.
    /// Called only after a successful rebuild.
    pub fn advance(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let previous = self
            .inner
            .last_change
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// Wake every client. Closed clients are dropped from the set; a client
    /// with a wakeup already queued needs nothing more.
    pub fn notify(&self) -> usize {
        let clients: Vec<(usize, mpsc::Sender<()>)> = self
            .inner
            .clients
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, tx) in &clients {
            if let Err(mpsc::error::TrySendError::Closed(())) = tx.try_send(()) {
                closed.push(*id);
            }
        }

        if !closed.is_empty() {
            let mut registry = self.inner.clients.write();
            for id in &closed {
                registry.remove(id);
            }
        }
        tracing::debug!(
            ts = self.timestamp(),
            clients = clients.len() - closed.len(),
            "Live clients notified"
        );
        clients.len() - closed.len()
    }

    /// Register a client. The subscription unregisters itself on drop.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(1);
        self.inner.clients.write().insert(id, tx);
        Subscription {
            id,
            rx,
            hub: self.clone(),
            last_sent: None,
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    fn unregister(&self, id: usize) {
        self.inner.clients.write().remove(&id);
    }
}

/// One connected live client.
#[derive(Debug)]
pub struct Subscription {
    id: usize,
    rx: mpsc::Receiver<()>,
    hub: LiveHub,
    last_sent: Option<i64>,
}

impl Subscription {
    pub fn id(&self) -> usize {
        self.id
    }

    /// The timestamp to send right now, if this client has not seen it.
    /// The first call always yields the current value.
    pub fn pending(&mut self) -> Option<i64> {
        let ts = self.hub.timestamp();
        match self.last_sent {
            Some(sent) if ts <= sent => None,
            _ => {
                self.last_sent = Some(ts);
                Some(ts)
            }
        }
    }

    /// Wait for the next timestamp newer than the last one sent.
    /// Returns `None` once the hub dropped this client.
    pub async fn next(&mut self) -> Option<i64> {
        loop {
            if let Some(ts) = self.pending() {
                return Some(ts);
            }
            self.rx.recv().await?;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

/// `{"ts": <ms>}`, the payload of every live channel.
pub fn ts_payload(ts: i64) -> String {
    serde_json::json!({ "ts": ts }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_advance_is_strictly_monotonic() {
        let far_future = chrono::Utc::now().timestamp_millis() + 60_000;
        let hub = LiveHub::starting_at(far_future);

        let a = hub.advance();
        let b = hub.advance();
        assert_eq!(a, far_future + 1);
        assert_eq!(b, far_future + 2);
        assert_eq!(hub.timestamp(), b);
    }

    #[test]
    fn test_advance_uses_wall_clock() {
        let hub = LiveHub::new();
        let before = chrono::Utc::now().timestamp_millis();
        assert!(hub.advance() >= before);
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_current_timestamp_first() {
        let hub = LiveHub::starting_at(1_000);
        hub.advance();
        hub.advance();
        let current = hub.advance();

        let mut sub = hub.subscribe();
        assert_eq!(sub.next().await, Some(current));
        assert_eq!(sub.pending(), None);
    }

    #[tokio::test]
    async fn test_notify_wakes_subscribers() {
        let hub = LiveHub::starting_at(1_000);
        let mut sub = hub.subscribe();
        assert_eq!(sub.next().await, Some(1_000));

        let ts = hub.advance();
        assert_eq!(hub.notify(), 1);

        let got = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap();
        assert_eq!(got, Some(ts));
    }

    #[tokio::test]
    async fn test_bursts_collapse_to_latest() {
        let hub = LiveHub::starting_at(1_000);
        let mut sub = hub.subscribe();
        sub.next().await;

        hub.advance();
        hub.notify();
        let last = hub.advance();
        hub.notify();

        assert_eq!(sub.next().await, Some(last));
        assert_eq!(sub.pending(), None);
    }

    #[test]
    fn test_drop_unregisters() {
        let hub = LiveHub::new();
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_ne!(a.id(), b.id());
        assert_eq!(hub.client_count(), 2);

        drop(a);
        assert_eq!(hub.client_count(), 1);
        drop(b);
        assert_eq!(hub.notify(), 0);
    }

    #[test]
    fn test_payload() {
        assert_eq!(ts_payload(42), r#"{"ts":42}"#);
    }
}
