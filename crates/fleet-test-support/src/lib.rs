//! `MockSession`: an in-memory `Session` double for integration tests,
//! playing the role the teacher's `rt-test-utils` mock WebSocket
//! server/client pair plays for the forwarder/server/receiver services. It
//! has no sockets — every `get()` reply and every subscriber delivery is
//! driven directly by the test, which is enough since the real transport is
//! out of scope (it is "referenced only by contract").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fleet_protocol::{
    GetReply, PublisherHandle, Sample, Session, SubscriberCallback, SubscriberHandle,
    TransportError,
};

type SubscriberMap = Arc<Mutex<HashMap<String, Vec<(u64, Arc<SubscriberCallback>)>>>>;

/// One canned answer queued for a future `get()` call against a specific
/// key.
enum QueuedReply {
    Ok(Vec<GetReply>),
    Timeout,
}

struct Inner {
    pending: Mutex<HashMap<String, std::collections::VecDeque<QueuedReply>>>,
    next_subscriber_id: AtomicU64,
    subscribers: SubscriberMap,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

/// Shared, cloneable handle onto the mock transport. Clone it freely —
/// every clone observes the same queued replies, subscribers, and publish
/// log.
#[derive(Clone)]
pub struct MockSession {
    inner: Arc<Inner>,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(0),
                subscribers: Arc::new(Mutex::new(HashMap::new())),
                published: Arc::new(Mutex::new(Vec::new())),
            }),
        }
    }

    /// Queues one `Ok` answer for the next `get()` call against `key`. If no
    /// reply (of any kind) is queued for a key, `get()` returns `Ok(vec![])`
    /// immediately — an empty reply set is a normal outcome, distinct from
    /// a transport error.
    pub fn queue_reply(&self, key: &str, replies: Vec<GetReply>) {
        self.inner
            .pending
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(QueuedReply::Ok(replies));
    }

    /// Queues a transport timeout for the next `get()` call against `key`.
    pub fn queue_timeout(&self, key: &str) {
        self.inner
            .pending
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(QueuedReply::Timeout);
    }

    /// Delivers one sample to every subscriber currently declared on the
    /// exact key `key`, in declaration order (the ordering the mux relies
    /// on for same-topic fan-out).
    pub fn deliver(&self, key: &str, payload: Vec<u8>) {
        let callbacks: Vec<Arc<SubscriberCallback>> = self
            .inner
            .subscribers
            .lock()
            .unwrap()
            .get(key)
            .map(|v| v.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        for cb in callbacks {
            cb(Sample {
                key: key.to_string(),
                payload: payload.clone(),
            });
        }
    }

    /// Number of transport-level subscribers currently live on `key`. Tests
    /// use this to assert dedup: at most one subscriber per
    /// `(endpoint, topic)`.
    #[must_use]
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Every payload ever `put()` through a declared publisher, in order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.published.lock().unwrap().clone()
    }
}

struct MockSubscriberHandle {
    key: String,
    id: u64,
    subscribers: SubscriberMap,
}

impl SubscriberHandle for MockSubscriberHandle {
    fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for MockSubscriberHandle {
    fn drop(&mut self) {
        if let Ok(mut map) = self.subscribers.lock() {
            if let Some(entries) = map.get_mut(&self.key) {
                entries.retain(|(id, _)| *id != self.id);
                if entries.is_empty() {
                    map.remove(&self.key);
                }
            }
        }
    }
}

struct MockPublisherHandle {
    key: String,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

#[async_trait]
impl PublisherHandle for MockPublisherHandle {
    fn key(&self) -> &str {
        &self.key
    }

    async fn put(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.published
            .lock()
            .unwrap()
            .push((self.key.clone(), payload));
        Ok(())
    }
}

#[async_trait]
impl Session for MockSession {
    async fn get(
        &self,
        key: &str,
        _timeout: std::time::Duration,
    ) -> Result<Vec<GetReply>, TransportError> {
        let mut pending = self.inner.pending.lock().unwrap();
        match pending
            .get_mut(key)
            .and_then(std::collections::VecDeque::pop_front)
        {
            Some(QueuedReply::Ok(replies)) => Ok(replies),
            Some(QueuedReply::Timeout) => Err(TransportError::Timeout),
            None => Ok(Vec::new()),
        }
    }

    async fn declare_subscriber(
        &self,
        key: &str,
        callback: SubscriberCallback,
    ) -> Result<Box<dyn SubscriberHandle>, TransportError> {
        let id = self
            .inner
            .next_subscriber_id
            .fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        Ok(Box::new(MockSubscriberHandle {
            key: key.to_string(),
            id,
            subscribers: self.inner.subscribers.clone(),
        }))
    }

    async fn declare_publisher(
        &self,
        key: &str,
    ) -> Result<Box<dyn PublisherHandle>, TransportError> {
        Ok(Box::new(MockPublisherHandle {
            key: key.to_string(),
            published: self.inner.published.clone(),
        }))
    }
}
