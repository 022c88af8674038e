//! The subscription multiplexer: owns every transport-level subscription,
//! deduplicates consumer interest across many UI listeners, tracks
//! per-topic rate statistics, and retracts deterministically.
//!
//! Ground: the teacher's `forwarder::local_fanout::FanoutServer` (many
//! consumers fanned out from one upstream source, consumer count tracked,
//! teardown on last-consumer-gone) generalized from "one TCP port" to "one
//! transport subscriber per `(endpoint, topic)`". Payload fan-out is inline
//! with no cross-topic queue, which is why listener callbacks are invoked
//! synchronously from the delivery callback rather than pushed through
//! another channel.

pub mod rate;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};

use fleet_protocol::session::{Sample, Session, SubscriberHandle};
use tracing::{debug, warn};
use uuid::Uuid;

use rate::RateEstimator;

pub const DEFAULT_ENDPOINT: &str = "default";

/// Opaque token returned by `subscribe()`, retracted by a matching
/// `unsubscribe()`. Intentionally not `Copy`-cheap-to-guess: callers must
/// hold on to the value they were given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// A consumer's interest in a topic.
pub type Listener = Arc<dyn Fn(Sample) + Send + Sync>;

/// Per-subscription observable counters.
#[derive(Debug, Clone)]
pub struct TopicStats {
    pub topic: String,
    pub message_count: u64,
    pub last_sample_ts: Option<std::time::Instant>,
    pub rate_hz: Option<f64>,
    pub bytes_total: u64,
}

struct ListenerEntry {
    id: ListenerId,
    callback: Listener,
    /// Monitoring listeners exist only to keep the transport subscriber
    /// alive and contribute to stats; they never receive payloads.
    monitoring: bool,
}

struct SubscriptionEntry {
    /// `None` means the entry is between transport sessions: its listeners
    /// are still registered, but nothing is currently declared against a
    /// live session. Set back to `Some` the next time a session becomes
    /// available (reconnect or a fresh `subscribe` on the same topic).
    handle: Option<Box<dyn SubscriberHandle>>,
    listeners: Vec<ListenerEntry>,
    message_count: u64,
    bytes_total: u64,
    last_sample_ts: Option<std::time::Instant>,
    rate: RateEstimator,
}

/// One endpoint's subscription table. `default` is implicit and always
/// present; additional endpoints are named bindings a host can add for a
/// remote dashboard session via `add_endpoint`.
#[derive(Default)]
struct EndpointState {
    subscriptions: HashMap<String, SubscriptionEntry>,
}

struct Inner {
    endpoints: HashMap<String, EndpointState>,
}

impl Inner {
    fn new() -> Self {
        let mut endpoints = HashMap::new();
        endpoints.insert(DEFAULT_ENDPOINT.to_string(), EndpointState::default());
        Self { endpoints }
    }
}

/// Owns every live pub/sub subscription on behalf of however many UI
/// consumers are interested in a given topic.
pub struct SubscriptionMux {
    session: crate::transport::SharedSession,
    inner: Mutex<Inner>,
    /// A weak self-reference so the `'static` closure handed to
    /// `declare_subscriber` can reach back into the mux without holding an
    /// `Arc` that would keep the mux alive past its last external owner.
    self_weak: Weak<SubscriptionMux>,
}

impl SubscriptionMux {
    #[must_use]
    pub fn new(session: crate::transport::SharedSession) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            session,
            inner: Mutex::new(Inner::new()),
            self_weak: weak.clone(),
        })
    }

    /// Registers a named endpoint with an empty subscription table.
    /// Re-adding an existing id is a no-op (its subscriptions are kept).
    pub fn add_endpoint(&self, endpoint_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .endpoints
            .entry(endpoint_id.to_string())
            .or_default();
    }

    /// Drops an endpoint and retracts every one of its transport
    /// subscribers.
    pub fn remove_endpoint(&self, endpoint_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.endpoints.remove(endpoint_id);
    }

    /// Injects (or drops) the transport session. On drop, every transport
    /// subscriber is retracted but the listener registry is preserved so a
    /// later reconnect can replay it.
    pub async fn set_session(&self, session: Option<Arc<dyn Session>>) {
        let previous = crate::transport::swap(&self.session, session.clone()).await;
        match (&previous, &session) {
            (None, Some(new_session)) => self.redeclare_all(new_session).await,
            (Some(_), Some(new_session)) => self.redeclare_all(new_session).await,
            (_, None) => self.release_all_handles(),
        }
    }

    /// Drops every transport handle in place, leaving each entry (and its
    /// listeners) in the map so a later reconnect has something to replay.
    fn release_all_handles(&self) {
        let mut inner = self.inner.lock().unwrap();
        for endpoint in inner.endpoints.values_mut() {
            for entry in endpoint.subscriptions.values_mut() {
                entry.handle = None;
            }
        }
    }

    /// Re-declares every previously active `(endpoint, topic)` against
    /// `session`, resetting rate counters (the new subscriber starts a
    /// fresh arrival history).
    async fn redeclare_all(&self, session: &Arc<dyn Session>) {
        let topics: Vec<(String, String, bool)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .endpoints
                .iter()
                .flat_map(|(endpoint_id, state)| {
                    state.subscriptions.keys().map(move |topic| {
                        let any_consumer = state.subscriptions[topic]
                            .listeners
                            .iter()
                            .any(|l| !l.monitoring);
                        (endpoint_id.clone(), topic.clone(), any_consumer)
                    })
                })
                .collect()
        };
        for (endpoint_id, topic, _) in topics {
            let Ok(handle) = self.declare(session, &endpoint_id, &topic).await else {
                continue;
            };
            let mut inner = self.inner.lock().unwrap();
            if let Some(state) = inner.endpoints.get_mut(&endpoint_id) {
                if let Some(entry) = state.subscriptions.get_mut(&topic) {
                    entry.handle = Some(handle);
                    entry.rate = RateEstimator::new();
                }
            }
        }
    }

    async fn declare(
        &self,
        session: &Arc<dyn Session>,
        endpoint_id: &str,
        topic: &str,
    ) -> Result<Box<dyn SubscriberHandle>, ()> {
        let endpoint_id = endpoint_id.to_string();
        let topic_owned = topic.to_string();
        let dispatch_endpoint = endpoint_id.clone();
        let dispatch_topic = topic_owned.clone();
        let weak = self.self_weak.clone();
        let callback: fleet_protocol::session::SubscriberCallback = Box::new(move |sample| {
            if let Some(this) = weak.upgrade() {
                this.dispatch(&dispatch_endpoint, &dispatch_topic, sample);
            }
        });
        session
            .declare_subscriber(topic, callback)
            .await
            .map_err(|err| warn!(%err, topic, "failed to declare transport subscriber"))
    }

    fn dispatch(&self, endpoint_id: &str, topic: &str, sample: Sample) {
        let (listeners, now) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(state) = inner.endpoints.get_mut(endpoint_id) else {
                return;
            };
            let Some(entry) = state.subscriptions.get_mut(topic) else {
                return;
            };
            let now = std::time::Instant::now();
            entry.message_count += 1;
            entry.bytes_total += sample.payload.len() as u64;
            entry.last_sample_ts = Some(now);
            entry.rate.record(now);
            let listeners: Vec<Listener> = entry
                .listeners
                .iter()
                .filter(|l| !l.monitoring)
                .map(|l| l.callback.clone())
                .collect();
            (listeners, now)
        };
        let _ = now;
        for listener in listeners {
            let sample = sample.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(sample)));
            if result.is_err() {
                warn!(topic, "subscriber callback panicked; continuing fan-out");
            }
        }
    }

    /// Registers interest in `topic` at `endpoint_id` (defaults to
    /// `"default"`). Returns an opaque token; `subscribe` is O(1) on the hot
    /// path since the cache key is `(endpoint_id, topic)`.
    pub async fn subscribe(
        &self,
        topic: &str,
        callback: Listener,
        endpoint_id: Option<&str>,
    ) -> ListenerId {
        self.register(topic, callback, endpoint_id, false).await
    }

    async fn register(
        &self,
        topic: &str,
        callback: Listener,
        endpoint_id: Option<&str>,
        monitoring: bool,
    ) -> ListenerId {
        let endpoint_id = endpoint_id.unwrap_or(DEFAULT_ENDPOINT).to_string();
        let id = ListenerId(Uuid::new_v4());
        // An existing entry with no live handle (session dropped since it was
        // created) still needs a fresh declare even though it already has
        // listeners, so a reconnect doesn't leave it silently undeclared.
        let needs_declare = {
            let mut inner = self.inner.lock().unwrap();
            let state = inner.endpoints.entry(endpoint_id.clone()).or_default();
            match state.subscriptions.get_mut(topic) {
                Some(entry) => {
                    entry.listeners.push(ListenerEntry {
                        id,
                        callback: callback.clone(),
                        monitoring,
                    });
                    entry.handle.is_none()
                }
                None => true,
            }
        };
        if needs_declare {
            let session = crate::transport::current(&self.session).await;
            if let Some(session) = session {
                if let Ok(handle) = self.declare(&session, &endpoint_id, topic).await {
                    let mut inner = self.inner.lock().unwrap();
                    let state = inner.endpoints.entry(endpoint_id.clone()).or_default();
                    match state.subscriptions.get_mut(topic) {
                        Some(entry) => entry.handle = Some(handle),
                        None => {
                            state.subscriptions.insert(
                                topic.to_string(),
                                SubscriptionEntry {
                                    handle: Some(handle),
                                    listeners: vec![ListenerEntry {
                                        id,
                                        callback,
                                        monitoring,
                                    }],
                                    message_count: 0,
                                    bytes_total: 0,
                                    last_sample_ts: None,
                                    rate: RateEstimator::new(),
                                },
                            );
                        }
                    }
                } else {
                    debug!(topic, "subscribe requested with no declarable session");
                }
            } else {
                debug!(topic, "subscribe requested with no active session");
            }
        }
        id
    }

    /// Removes one listener's interest. Retracts the transport subscriber
    /// if it was the last one. A second call with the same id is a no-op.
    pub fn unsubscribe(&self, topic: &str, listener_id: ListenerId, endpoint_id: Option<&str>) {
        let endpoint_id = endpoint_id.unwrap_or(DEFAULT_ENDPOINT);
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.endpoints.get_mut(endpoint_id) else {
            return;
        };
        let Some(entry) = state.subscriptions.get_mut(topic) else {
            return;
        };
        entry.listeners.retain(|l| l.id != listener_id);
        if entry.listeners.is_empty() {
            state.subscriptions.remove(topic);
        }
    }

    #[must_use]
    pub fn stats(&self, topic: &str, endpoint_id: Option<&str>) -> Option<TopicStats> {
        let endpoint_id = endpoint_id.unwrap_or(DEFAULT_ENDPOINT);
        let inner = self.inner.lock().unwrap();
        let entry = inner.endpoints.get(endpoint_id)?.subscriptions.get(topic)?;
        Some(TopicStats {
            topic: topic.to_string(),
            message_count: entry.message_count,
            last_sample_ts: entry.last_sample_ts,
            rate_hz: entry.rate.rate_hz(),
            bytes_total: entry.bytes_total,
        })
    }

    #[must_use]
    pub fn all_stats(&self) -> HashMap<String, TopicStats> {
        let inner = self.inner.lock().unwrap();
        let Some(state) = inner.endpoints.get(DEFAULT_ENDPOINT) else {
            return HashMap::new();
        };
        state
            .subscriptions
            .iter()
            .map(|(topic, entry)| {
                (
                    topic.clone(),
                    TopicStats {
                        topic: topic.clone(),
                        message_count: entry.message_count,
                        last_sample_ts: entry.last_sample_ts,
                        rate_hz: entry.rate.rate_hz(),
                        bytes_total: entry.bytes_total,
                    },
                )
            })
            .collect()
    }

    #[must_use]
    pub fn active_topics(&self, endpoint_id: Option<&str>) -> Vec<String> {
        let endpoint_id = endpoint_id.unwrap_or(DEFAULT_ENDPOINT);
        let inner = self.inner.lock().unwrap();
        inner
            .endpoints
            .get(endpoint_id)
            .map(|state| state.subscriptions.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Declares mass subscribers over `topics` purely to accumulate rate
    /// statistics for dashboard-wide display; these subscribers never
    /// deliver payloads to application callbacks — same subscription
    /// object as a consumer subscribe, distinct delivery path via
    /// `ListenerEntry::monitoring`.
    pub async fn start_monitoring(&self, topics: &[String], endpoint_id: Option<&str>) {
        for topic in topics {
            self.register(topic, Arc::new(|_| {}), endpoint_id, true)
                .await;
        }
    }

    /// Removes every monitoring listener at `endpoint_id` (default
    /// endpoint if `None`). Consumer-driven listeners are untouched.
    pub fn stop_monitoring(&self, endpoint_id: Option<&str>) {
        let endpoint_id = endpoint_id.unwrap_or(DEFAULT_ENDPOINT);
        let mut inner = self.inner.lock().unwrap();
        let Some(state) = inner.endpoints.get_mut(endpoint_id) else {
            return;
        };
        state.subscriptions.retain(|_, entry| {
            entry.listeners.retain(|l| !l.monitoring);
            !entry.listeners.is_empty()
        });
    }

    /// Retracts every subscriber and clears all state. Used at coordinator
    /// teardown; no unsubscribe is ever silently lost.
    pub fn destroy(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.endpoints.clear();
        inner
            .endpoints
            .insert(DEFAULT_ENDPOINT.to_string(), EndpointState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_protocol::GetReply;
    use fleet_test_support::MockSession;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn mux_with_session() -> (Arc<SubscriptionMux>, MockSession) {
        let shared = crate::transport::new_shared_session();
        let mux = SubscriptionMux::new(shared);
        let session = MockSession::new();
        mux.set_session(Some(Arc::new(session.clone()))).await;
        (mux, session)
    }

    #[tokio::test]
    async fn first_subscribe_declares_transport_subscriber() {
        let (mux, session) = mux_with_session().await;
        let _id = mux
            .subscribe("topic/a", Arc::new(|_| {}), None)
            .await;
        assert_eq!(session.subscriber_count("topic/a"), 1);
    }

    #[tokio::test]
    async fn second_listener_on_same_topic_does_not_redeclare() {
        let (mux, session) = mux_with_session().await;
        let _id1 = mux.subscribe("topic/a", Arc::new(|_| {}), None).await;
        let _id2 = mux.subscribe("topic/a", Arc::new(|_| {}), None).await;
        assert_eq!(session.subscriber_count("topic/a"), 1);
        assert_eq!(mux.active_topics(None), vec!["topic/a".to_string()]);
    }

    #[tokio::test]
    async fn both_listeners_receive_sample_in_registration_order() {
        let (mux, session) = mux_with_session().await;
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let _id1 = mux
            .subscribe("topic/a", Arc::new(move |_| o1.lock().unwrap().push(1)), None)
            .await;
        let o2 = order.clone();
        let _id2 = mux
            .subscribe("topic/a", Arc::new(move |_| o2.lock().unwrap().push(2)), None)
            .await;
        session.deliver("topic/a", vec![1, 2, 3]);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn unsubscribing_last_listener_retracts_transport_subscriber() {
        let (mux, session) = mux_with_session().await;
        let id1 = mux.subscribe("topic/a", Arc::new(|_| {}), None).await;
        let id2 = mux.subscribe("topic/a", Arc::new(|_| {}), None).await;
        mux.unsubscribe("topic/a", id1, None);
        assert_eq!(session.subscriber_count("topic/a"), 1);
        mux.unsubscribe("topic/a", id2, None);
        assert_eq!(session.subscriber_count("topic/a"), 0);
        assert!(mux.stats("topic/a", None).is_none());
    }

    #[tokio::test]
    async fn repeated_unsubscribe_is_a_no_op() {
        let (mux, _session) = mux_with_session().await;
        let id = mux.subscribe("topic/a", Arc::new(|_| {}), None).await;
        mux.unsubscribe("topic/a", id, None);
        mux.unsubscribe("topic/a", id, None);
        assert!(mux.active_topics(None).is_empty());
    }

    #[tokio::test]
    async fn stats_update_on_every_sample() {
        let (mux, session) = mux_with_session().await;
        let _id = mux.subscribe("topic/a", Arc::new(|_| {}), None).await;
        session.deliver("topic/a", vec![1, 2, 3]);
        session.deliver("topic/a", vec![1, 2]);
        let stats = mux.stats("topic/a", None).unwrap();
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.bytes_total, 5);
    }

    #[tokio::test]
    async fn broken_listener_does_not_block_others() {
        let (mux, session) = mux_with_session().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _id1 = mux
            .subscribe("topic/a", Arc::new(|_| panic!("boom")), None)
            .await;
        let _id2 = mux
            .subscribe(
                "topic/a",
                Arc::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
                None,
            )
            .await;
        session.deliver("topic/a", vec![0]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn monitoring_listener_never_receives_payload() {
        let (mux, session) = mux_with_session().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        mux.start_monitoring(&["topic/a".to_string()], None).await;
        let _consumer = mux
            .subscribe(
                "topic/a",
                Arc::new(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }),
                None,
            )
            .await;
        session.deliver("topic/a", vec![0]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        mux.stop_monitoring(None);
        // the consumer listener is untouched by stop_monitoring
        session.deliver("topic/a", vec![0]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reconnect_redeclares_active_subscriptions() {
        let shared = crate::transport::new_shared_session();
        let mux = SubscriptionMux::new(shared);
        let session_a = MockSession::new();
        mux.set_session(Some(Arc::new(session_a.clone()))).await;
        let _id = mux.subscribe("topic/a", Arc::new(|_| {}), None).await;
        assert_eq!(session_a.subscriber_count("topic/a"), 1);

        mux.set_session(None).await;
        assert_eq!(session_a.subscriber_count("topic/a"), 0);

        let session_b = MockSession::new();
        mux.set_session(Some(Arc::new(session_b.clone()))).await;
        assert_eq!(session_b.subscriber_count("topic/a"), 1);
        assert_eq!(mux.active_topics(None), vec!["topic/a".to_string()]);
    }

    #[tokio::test]
    async fn destroy_clears_all_subscriptions() {
        let (mux, session) = mux_with_session().await;
        let _id = mux.subscribe("topic/a", Arc::new(|_| {}), None).await;
        mux.destroy();
        assert_eq!(session.subscriber_count("topic/a"), 0);
        assert!(mux.active_topics(None).is_empty());
    }

    #[allow(dead_code)]
    fn unused_get_reply() -> GetReply {
        GetReply {
            key: String::new(),
            payload: Vec::new(),
        }
    }
}
