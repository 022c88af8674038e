//! The hybrid discovery engine: two independently-paced polling loops over
//! the daemon node-list and per-node manifests, merged into one
//! deduplicated `DiscoveredNode` inventory with staleness and eviction.
//!
//! Ground: the teacher's `forwarder::local_fanout` (an event-driven loop
//! owning its own retry/backoff state) and `receiver::local_proxy`'s
//! watch-driven shutdown, generalized into the epoch pattern in
//! [`crate::events::CancelEpoch`]. The inventory map, last-seen map, and
//! prev-nodes cache are kept together deliberately, which is why all of it
//! lives in a single `Mutex<Inner>` here rather than split across files.

pub mod constants;
pub mod merge;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant as StdInstant;

use fleet_protocol::daemon::{decode_node_list, DaemonNodeRecord};
use fleet_protocol::manifest::NodeManifest;
use fleet_protocol::node::DiscoveredNode;
use fleet_protocol::session::Session;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ResolvedTuning;
use crate::error::ErrorKind;
use crate::events::{CancelEpoch, EventBus};
use merge::{merge, DaemonViewEntry, ManifestEntry};

const DAEMON_KEY: &str = "bubbaloop/daemon/nodes";
const MANIFEST_KEY_WILDCARD: &str = "bubbaloop/**/manifest";

type NodeKey = (String, String);
pub use crate::transport::SharedSession;

/// One delta out of the discovery engine's event stream.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    NodeAdded(DiscoveredNode),
    NodeUpdated(DiscoveredNode),
    NodeStale { machine_id: String, name: String },
    NodeEvicted { machine_id: String, name: String },
    DaemonConnectedChanged(bool),
}

/// Current merged view, returned by `snapshot()`.
#[derive(Debug, Clone)]
pub struct DiscoverySnapshot {
    pub nodes: Vec<DiscoveredNode>,
    pub daemon_connected: bool,
    pub manifest_active: bool,
    pub loading: bool,
    pub last_error: Option<ErrorKind>,
}

struct Inner {
    last_daemon_reply: HashMap<String, StdInstant>,
    prev_daemon_nodes: HashMap<String, Vec<DaemonNodeRecord>>,
    daemon_connected: bool,
    manifests: HashMap<NodeKey, ManifestEntry>,
    manifest_idle_cycles: u32,
    nodes: HashMap<NodeKey, DiscoveredNode>,
    loading: bool,
    last_error: Option<ErrorKind>,
    any_data_received: bool,
    manifest_active: bool,
    /// Last-computed staleness per machine, so the manifest loop's merge
    /// (which doesn't recompute staleness itself) can reuse the daemon
    /// loop's most recent verdict instead of assuming every machine fresh.
    machine_stale: HashMap<String, bool>,
}

impl Inner {
    fn new() -> Self {
        Self {
            last_daemon_reply: HashMap::new(),
            prev_daemon_nodes: HashMap::new(),
            daemon_connected: false,
            manifests: HashMap::new(),
            manifest_idle_cycles: 0,
            nodes: HashMap::new(),
            loading: true,
            last_error: None,
            any_data_received: false,
            manifest_active: false,
            machine_stale: HashMap::new(),
        }
    }
}

/// Compares equality on every field except `stale` and `last_seen_ms`, which
/// change every cycle on their own and would otherwise turn every refresh
/// into a spurious `NodeUpdated`.
fn content_eq(a: &DiscoveredNode, b: &DiscoveredNode) -> bool {
    a.name == b.name
        && a.machine_id == b.machine_id
        && a.manifest == b.manifest
        && a.machine_hostname == b.machine_hostname
        && a.machine_ips == b.machine_ips
        && a.status == b.status
        && a.installed == b.installed
        && a.autostart_enabled == b.autostart_enabled
        && a.is_built == b.is_built
        && a.version == b.version
        && a.description == b.description
        && a.node_type == b.node_type
        && a.base_node == b.base_node
        && a.path == b.path
        && a.build_output == b.build_output
        && a.discovered_via == b.discovered_via
}

/// Diffs the previous merged map against a freshly merged one. Stale
/// transitions take priority over generic updates, and evictions are
/// always explicit rather than folded into an update.
fn diff_and_emit(
    old: &HashMap<NodeKey, DiscoveredNode>,
    new: &HashMap<NodeKey, DiscoveredNode>,
    bus: &EventBus<DiscoveryEvent>,
) {
    for (key, new_node) in new {
        match old.get(key) {
            None => bus.publish(DiscoveryEvent::NodeAdded(new_node.clone())),
            Some(old_node) => {
                if !old_node.stale && new_node.stale {
                    bus.publish(DiscoveryEvent::NodeStale {
                        machine_id: key.0.clone(),
                        name: key.1.clone(),
                    });
                } else if !content_eq(old_node, new_node) {
                    bus.publish(DiscoveryEvent::NodeUpdated(new_node.clone()));
                }
            }
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            bus.publish(DiscoveryEvent::NodeEvicted {
                machine_id: key.0.clone(),
                name: key.1.clone(),
            });
        }
    }
}

/// Produces a consistent, deduplicated `DiscoveredNode` inventory from two
/// independently-paced asynchronous sources.
pub struct DiscoveryEngine {
    tuning: ResolvedTuning,
    session: SharedSession,
    inner: AsyncMutex<Inner>,
    events: EventBus<DiscoveryEvent>,
    cancel: CancelEpoch,
    stopped: AtomicBool,
    tasks: AsyncMutex<Vec<JoinHandle<()>>>,
    start_time: AsyncMutex<Option<tokio::time::Instant>>,
}

impl DiscoveryEngine {
    #[must_use]
    pub fn new(tuning: ResolvedTuning, session: SharedSession) -> Arc<Self> {
        Arc::new(Self {
            tuning,
            session,
            inner: AsyncMutex::new(Inner::new()),
            events: EventBus::new(256),
            cancel: CancelEpoch::new(),
            stopped: AtomicBool::new(true),
            tasks: AsyncMutex::new(Vec::new()),
            start_time: AsyncMutex::new(None),
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Begins both loops. Idempotent: calling `start()` while already
    /// started is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if !self.stopped.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.start_time.lock().await = Some(tokio::time::Instant::now());
        let daemon_task = tokio::spawn(Self::daemon_loop(self.clone()));
        let manifest_task = tokio::spawn(Self::manifest_loop(self.clone()));
        let initial_timeout_task = tokio::spawn(Self::initial_connect_timeout_watch(self.clone()));
        *self.tasks.lock().await = vec![daemon_task, manifest_task, initial_timeout_task];
    }

    /// Cancels loops, releases resources, clears caches.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.bump();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            task.abort();
        }
        *self.inner.lock().await = Inner::new();
    }

    /// Cancels the outstanding delay and forces one immediate cycle of each
    /// loop. Two back-to-back calls coalesce into exactly one fresh cycle
    /// per loop (the epoch's `watch` channel only retains the latest
    /// value).
    pub fn refresh(&self) {
        self.cancel.bump();
    }

    pub async fn snapshot(&self) -> DiscoverySnapshot {
        let inner = self.inner.lock().await;
        DiscoverySnapshot {
            nodes: inner.nodes.values().cloned().collect(),
            daemon_connected: inner.daemon_connected,
            manifest_active: inner.manifest_active,
            loading: inner.loading,
            last_error: inner.last_error,
        }
    }

    async fn initial_connect_timeout_watch(self: Arc<Self>) {
        tokio::time::sleep(self.tuning.initial_connect_timeout).await;
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().await;
        if !inner.any_data_received {
            inner.loading = false;
            inner.last_error = Some(ErrorKind::InitialConnectTimeout);
            warn!("no data from either discovery channel within INITIAL_CONNECT_TIMEOUT");
        }
    }

    async fn current_session(&self) -> Option<Arc<dyn Session>> {
        self.session.read().await.clone()
    }

    async fn daemon_loop(self: Arc<Self>) {
        let mut wake = self.cancel.subscribe();
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let session = self.current_session().await;
            if let Some(session) = session {
                self.run_daemon_cycle(&session).await;
            }
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            tokio::select! {
                () = tokio::time::sleep(self.tuning.daemon_period) => {}
                res = wake.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn run_daemon_cycle(self: &Arc<Self>, session: &Arc<dyn Session>) {
        let replies = match session.get(DAEMON_KEY, self.tuning.daemon_timeout).await {
            Ok(replies) => replies,
            Err(err) => {
                warn!(%err, "daemon query failed, leaving caches intact");
                return;
            }
        };
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let now = tokio::time::Instant::now().into_std();
        let mut inner = self.inner.lock().await;

        let mut replied_machines: HashMap<String, Vec<DaemonNodeRecord>> = HashMap::new();
        for reply in &replies {
            match decode_node_list(&reply.payload) {
                Ok(records) => {
                    for record in records {
                        replied_machines
                            .entry(record.machine_id.clone())
                            .or_default()
                            .push(record);
                    }
                }
                Err(err) => {
                    warn!(%err, "dropping malformed NodeList reply");
                }
            }
        }

        for machine_id in replied_machines.keys() {
            inner.last_daemon_reply.insert(machine_id.clone(), now);
        }
        for (machine_id, records) in &replied_machines {
            inner
                .prev_daemon_nodes
                .insert(machine_id.clone(), records.clone());
        }

        let mut daemon_view = Vec::new();
        for (machine_id, records) in &replied_machines {
            inner.machine_stale.insert(machine_id.clone(), false);
            for record in records {
                daemon_view.push(DaemonViewEntry {
                    record: record.clone(),
                    stale: false,
                });
            }
        }

        let stale_window = self.tuning.stale_window;
        let evict_window = self.tuning.evict_window;
        let mut evicted_machines = Vec::new();
        for (machine_id, prev_records) in inner.prev_daemon_nodes.clone() {
            if replied_machines.contains_key(&machine_id) {
                continue;
            }
            let Some(&last_reply) = inner.last_daemon_reply.get(&machine_id) else {
                continue;
            };
            let silence = now.saturating_duration_since(last_reply);
            if silence > evict_window {
                evicted_machines.push(machine_id);
            } else if silence <= stale_window {
                inner.machine_stale.insert(machine_id.clone(), false);
                for record in prev_records {
                    daemon_view.push(DaemonViewEntry {
                        record,
                        stale: false,
                    });
                }
            } else {
                inner.machine_stale.insert(machine_id.clone(), true);
                for record in prev_records {
                    daemon_view.push(DaemonViewEntry {
                        record,
                        stale: true,
                    });
                }
            }
        }
        for machine_id in evicted_machines {
            inner.prev_daemon_nodes.remove(&machine_id);
            inner.last_daemon_reply.remove(&machine_id);
            inner.machine_stale.remove(&machine_id);
        }

        if !replies.is_empty() && !inner.daemon_connected {
            inner.daemon_connected = true;
            inner.last_error = None;
            inner.loading = false;
            self.events
                .publish(DiscoveryEvent::DaemonConnectedChanged(true));
        }
        if !replies.is_empty() {
            inner.any_data_received = true;
        }

        let manifest_ttl = self.tuning.manifest_ttl;
        let mut new_nodes = merge(&daemon_view, &inner.manifests, now, manifest_ttl);
        self.stamp_last_seen(&mut new_nodes).await;
        let old_nodes = std::mem::replace(&mut inner.nodes, new_nodes.clone());
        diff_and_emit(&old_nodes, &new_nodes, &self.events);
        inner.nodes = new_nodes;
    }

    /// Stamps every node with milliseconds elapsed since the engine
    /// started. There is no wall clock in this crate's test-friendly time
    /// model (`tokio::time::pause`), so `last_seen_ms` is session-relative
    /// rather than a Unix timestamp.
    async fn stamp_last_seen(&self, nodes: &mut HashMap<NodeKey, DiscoveredNode>) {
        let elapsed_ms = match *self.start_time.lock().await {
            Some(start) => tokio::time::Instant::now()
                .saturating_duration_since(start)
                .as_millis() as u64,
            None => 0,
        };
        for node in nodes.values_mut() {
            node.last_seen_ms = elapsed_ms;
        }
    }

    async fn manifest_loop(self: Arc<Self>) {
        let mut wake = self.cancel.subscribe();
        tokio::select! {
            () = tokio::time::sleep(self.tuning.manifest_initial_delay) => {}
            res = wake.changed() => {
                if res.is_err() {
                    return;
                }
            }
        }
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let mut period = self.tuning.manifest_period;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            let session = self.current_session().await;
            if let Some(session) = session {
                period = self.run_manifest_cycle(&session, period).await;
            }
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            tokio::select! {
                () = tokio::time::sleep(period) => {}
                res = wake.changed() => {
                    if res.is_err() {
                        return;
                    }
                    period = self.tuning.manifest_period;
                }
            }
        }
    }

    async fn run_manifest_cycle(
        self: &Arc<Self>,
        session: &Arc<dyn Session>,
        current_period: std::time::Duration,
    ) -> std::time::Duration {
        let replies = match session
            .get(MANIFEST_KEY_WILDCARD, self.tuning.manifest_timeout)
            .await
        {
            Ok(replies) => replies,
            Err(err) => {
                warn!(%err, "manifest query failed, leaving caches intact");
                return current_period;
            }
        };
        if self.stopped.load(Ordering::SeqCst) {
            return current_period;
        }

        let now = tokio::time::Instant::now().into_std();
        let mut inner = self.inner.lock().await;
        inner.manifest_active = true;

        let mut added = 0usize;
        for reply in &replies {
            let Some(manifest) = NodeManifest::parse(&reply.payload) else {
                continue;
            };
            let key = manifest.key();
            if !inner.manifests.contains_key(&key) {
                added += 1;
            }
            inner.manifests.insert(
                key,
                ManifestEntry {
                    manifest,
                    last_seen: now,
                },
            );
        }

        // Prune manifests past TTL so the merge step's own TTL check and
        // this bookkeeping never drift apart.
        let manifest_ttl = self.tuning.manifest_ttl;
        inner
            .manifests
            .retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= manifest_ttl);

        if added > 0 {
            inner.manifest_idle_cycles = 0;
        } else {
            inner.manifest_idle_cycles += 1;
        }
        let next_period = if inner.manifest_idle_cycles >= constants::IDLE_CYCLES_BEFORE_BACKOFF {
            self.tuning.manifest_idle_period
        } else {
            self.tuning.manifest_period
        };

        if !replies.is_empty() {
            inner.any_data_received = true;
        }

        if added > 0 {
            let machine_stale = inner.machine_stale.clone();
            let daemon_view: Vec<DaemonViewEntry> = inner
                .prev_daemon_nodes
                .iter()
                .flat_map(|(machine_id, records)| {
                    let stale = machine_stale.get(machine_id).copied().unwrap_or(false);
                    records
                        .iter()
                        .cloned()
                        .map(move |record| DaemonViewEntry { record, stale })
                })
                .collect();
            let new_nodes = merge(&daemon_view, &inner.manifests, now, manifest_ttl);
            let old_nodes = std::mem::replace(&mut inner.nodes, new_nodes.clone());
            diff_and_emit(&old_nodes, &new_nodes, &self.events);
            inner.nodes = new_nodes;
            debug!(added, "manifest cycle produced new manifests");
        }

        next_period
    }
}
