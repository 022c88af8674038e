//! The dynamic protobuf schema registry: fetches `FileDescriptorSet` bytes
//! at runtime, resolves message types by wildcard topic match, and decodes
//! payloads opportunistically.
//!
//! Ground: the teacher has no dynamic-protobuf analogue, so the *shape* of
//! this module (fetch → cache → serve, periodic re-discovery with the same
//! idle backoff as `discovery::manifest_loop`) is grounded on
//! `discovery::DiscoveryEngine`'s manifest loop, while the runtime
//! descriptor compilation itself uses `prost-reflect`, the crate the wider
//! example pack reaches for whenever a message type isn't known at compile
//! time.

pub mod matcher;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use fleet_protocol::session::Session;
use prost_reflect::{DescriptorPool, DynamicMessage};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::discovery::constants::{
    IDLE_CYCLES_BEFORE_BACKOFF, MANIFEST_IDLE_PERIOD, MANIFEST_PERIOD, MANIFEST_TIMEOUT,
};
use crate::error::ErrorKind;
use crate::events::CancelEpoch;
use crate::transport::SharedSession;
use matcher::best_match;

const CORE_SCHEMA_KEY: &str = "bubbaloop/daemon/schemas/**";
const NODE_SCHEMA_WILDCARD: &str = "bubbaloop/**/schema";

/// A successfully decoded message, represented as JSON so it can cross the
/// boundary to the UI layer without that layer linking `prost-reflect`
/// itself (the registry's `serde` feature on `prost-reflect` makes this
/// free).
#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub type_name: String,
    pub fields: serde_json::Value,
}

/// Why a decode attempt produced no result. Distinguishes "we don't have
/// this type yet" (retry once the version counter moves) from "the bytes
/// don't match a type we do have" (a real decode failure).
#[derive(Debug, Clone)]
pub struct UndecodableDetail {
    pub kind: ErrorKind,
    pub type_name: Option<String>,
}

impl std::fmt::Display for UndecodableDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.type_name {
            Some(t) => write!(f, "{}: {t}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

struct Inner {
    pool: DescriptorPool,
    /// `(full_topic pattern, schema_type)` pairs sourced from manifests'
    /// `publishes` entries, updated via [`SchemaRegistry::sync_patterns`].
    patterns: Vec<(String, String)>,
    known_machine_ids: Vec<String>,
    idle_cycles: u32,
}

impl Inner {
    fn new() -> Self {
        Self {
            pool: DescriptorPool::new(),
            patterns: Vec::new(),
            known_machine_ids: Vec::new(),
            idle_cycles: 0,
        }
    }
}

/// Turns opaque `FileDescriptorSet` payloads into runtime-decodable message
/// types and resolves which type applies to an arbitrary incoming topic.
pub struct SchemaRegistry {
    inner: AsyncMutex<Inner>,
    version: AtomicU64,
    stopped: AtomicBool,
    cancel: CancelEpoch,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: AsyncMutex::new(Inner::new()),
            version: AtomicU64::new(0),
            stopped: AtomicBool::new(true),
            cancel: CancelEpoch::new(),
            task: AsyncMutex::new(None),
        })
    }

    /// Monotonically non-decreasing version counter. Consumers re-attempt
    /// a cached "undecodable" result when this moves.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    /// Pure sync of the wildcard pattern table from the current discovery
    /// snapshot's manifests. Called by the coordinator's wiring loop
    /// whenever `DiscoveryEngine` emits a new snapshot; kept as a separate
    /// method (rather than folded into decode) so it can be unit tested
    /// without a session.
    pub async fn sync_patterns(&self, nodes: &[fleet_protocol::DiscoveredNode]) {
        let mut patterns = Vec::new();
        let mut machine_ids = Vec::new();
        for node in nodes {
            if !machine_ids.contains(&node.machine_id) {
                machine_ids.push(node.machine_id.clone());
            }
            let Some(manifest) = &node.manifest else {
                continue;
            };
            for publish in &manifest.publishes {
                if publish.full_topic.is_empty() {
                    continue;
                }
                let Some(schema_type) = &publish.schema_type else {
                    continue;
                };
                patterns.push((publish.full_topic.clone(), schema_type.clone()));
            }
        }
        let mut inner = self.inner.lock().await;
        inner.patterns = patterns;
        inner.known_machine_ids = machine_ids;
    }

    /// Queries the daemon's well-known descriptor endpoint (optionally
    /// scoped per machine) and loads any returned bytes.
    pub async fn fetch_core_schemas(
        &self,
        session: &Arc<dyn Session>,
        machine_ids: Option<&[String]>,
    ) -> bool {
        let keys: Vec<String> = match machine_ids {
            Some(ids) if !ids.is_empty() => ids
                .iter()
                .map(|id| format!("bubbaloop/daemon/schemas/{id}/**"))
                .collect(),
            _ => vec![CORE_SCHEMA_KEY.to_string()],
        };
        let mut loaded_any = false;
        for key in keys {
            match session.get(&key, MANIFEST_TIMEOUT).await {
                Ok(replies) => {
                    for reply in replies {
                        if self.load_descriptor_bytes(&reply.payload).await {
                            loaded_any = true;
                        }
                    }
                }
                Err(err) => warn!(%err, key, "core schema query failed"),
            }
        }
        loaded_any
    }

    /// Wildcard-queries every node's `{node_prefix}/schema` key, loading
    /// newly seen descriptors. Returns how many were freshly added.
    pub async fn discover_all_node_schemas(
        &self,
        session: &Arc<dyn Session>,
        machine_ids: Option<&[String]>,
    ) -> usize {
        let keys: Vec<String> = match machine_ids {
            Some(ids) if !ids.is_empty() => ids
                .iter()
                .map(|id| format!("bubbaloop/*/{id}/**/schema"))
                .collect(),
            _ => vec![NODE_SCHEMA_WILDCARD.to_string()],
        };
        let mut added = 0usize;
        for key in keys {
            match session.get(&key, MANIFEST_TIMEOUT).await {
                Ok(replies) => {
                    for reply in replies {
                        if self.load_descriptor_bytes(&reply.payload).await {
                            added += 1;
                        }
                    }
                }
                Err(err) => warn!(%err, key, "node schema discovery query failed"),
            }
        }
        added
    }

    /// Best-effort: derives a plausible schema key from the topic's path
    /// (replace the final segment with `schema`) and queries it.
    pub async fn discover_schema_for_topic(&self, session: &Arc<dyn Session>, topic: &str) -> bool {
        let Some(slash) = topic.rfind('/') else {
            return false;
        };
        let key = format!("{}/schema", &topic[..slash]);
        match session.get(&key, MANIFEST_TIMEOUT).await {
            Ok(replies) => {
                let mut loaded = false;
                for reply in replies {
                    if self.load_descriptor_bytes(&reply.payload).await {
                        loaded = true;
                    }
                }
                loaded
            }
            Err(err) => {
                warn!(%err, key, "schema-for-topic query failed");
                false
            }
        }
    }

    /// Loads one `FileDescriptorSet` payload; malformed bytes are logged
    /// and discarded, never propagated. Returns whether the pool actually
    /// gained new content.
    async fn load_descriptor_bytes(&self, bytes: &[u8]) -> bool {
        let fds = match <prost_types::FileDescriptorSet as prost::Message>::decode(bytes) {
            Ok(fds) => fds,
            Err(err) => {
                warn!(%err, "dropping malformed FileDescriptorSet payload");
                return false;
            }
        };
        if fds.file.is_empty() {
            return false;
        }
        let mut inner = self.inner.lock().await;
        match inner.pool.add_file_descriptor_set(fds) {
            Ok(()) => {
                drop(inner);
                self.bump_version();
                true
            }
            Err(err) => {
                warn!(%err, "descriptor set rejected by pool (duplicate or invalid)");
                false
            }
        }
    }

    /// Decodes `bytes` as `type_name`. `Ok` on success; `Err` with
    /// `UnknownSchema` if the type isn't loaded, or `DecodeFailed` if the
    /// bytes don't validate against a type we do have.
    pub async fn decode(&self, type_name: &str, bytes: &[u8]) -> Result<DecodeResult, UndecodableDetail> {
        let inner = self.inner.lock().await;
        let Some(message_desc) = inner.pool.get_message_by_name(type_name) else {
            return Err(UndecodableDetail {
                kind: ErrorKind::UnknownSchema,
                type_name: Some(type_name.to_string()),
            });
        };
        match DynamicMessage::decode(message_desc, bytes) {
            Ok(message) => {
                let fields = serde_json::to_value(&message).unwrap_or(serde_json::Value::Null);
                Ok(DecodeResult {
                    type_name: type_name.to_string(),
                    fields,
                })
            }
            Err(err) => {
                debug!(%err, type_name, "decode failed against known type");
                Err(UndecodableDetail {
                    kind: ErrorKind::DecodeFailed,
                    type_name: Some(type_name.to_string()),
                })
            }
        }
    }

    /// Matches `topic` against known manifest `publishes.full_topic`
    /// wildcards and decodes with the winning pattern's `schema_type`.
    pub async fn decode_for_topic(
        &self,
        topic: &str,
        bytes: &[u8],
    ) -> Result<DecodeResult, UndecodableDetail> {
        let patterns = self.inner.lock().await.patterns.clone();
        let Some((_, schema_type)) = best_match(topic, &patterns) else {
            return Err(UndecodableDetail {
                kind: ErrorKind::UnknownSchema,
                type_name: None,
            });
        };
        self.decode(schema_type, bytes).await
    }

    /// Drops all entries. Used on transport-session teardown.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        *inner = Inner::new();
    }

    /// Starts the periodic re-discovery loop: every `MANIFEST_PERIOD`,
    /// back off to `MANIFEST_IDLE_PERIOD` after `IDLE_CYCLES_BEFORE_BACKOFF`
    /// consecutive cycles that loaded nothing new, identical to the
    /// discovery engine's manifest loop cadence.
    pub async fn start(self: &Arc<Self>, session: SharedSession) {
        if !self.stopped.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = tokio::spawn(Self::rediscovery_loop(self.clone(), session));
        *self.task.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.bump();
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }

    async fn rediscovery_loop(self: Arc<Self>, session: SharedSession) {
        let mut wake = self.cancel.subscribe();
        let mut period = MANIFEST_PERIOD;
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }
            if let Some(session) = crate::transport::current(&session).await {
                let known = self.inner.lock().await.known_machine_ids.clone();
                let ids = if known.is_empty() { None } else { Some(known.as_slice()) };
                let added = self.discover_all_node_schemas(&session, ids).await;
                let mut inner = self.inner.lock().await;
                if added > 0 {
                    inner.idle_cycles = 0;
                } else {
                    inner.idle_cycles += 1;
                }
                period = if inner.idle_cycles >= IDLE_CYCLES_BEFORE_BACKOFF {
                    MANIFEST_IDLE_PERIOD
                } else {
                    MANIFEST_PERIOD
                };
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
                }
            }
        }
    }
}
