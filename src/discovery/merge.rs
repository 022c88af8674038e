//! The merge function: pure, takes a daemon view and a manifest map,
//! produces the canonical `DiscoveredNode` set. No timers, no session, no
//! side effects — this is the one piece of `DiscoveryEngine` that is plain
//! data transformation and is tested in isolation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use fleet_protocol::daemon::NodeStatus;
use fleet_protocol::manifest::NodeManifest;
use fleet_protocol::node::{DiscoveredNode, Provenance};
use fleet_protocol::daemon::DaemonNodeRecord;

/// One daemon-observed record for this merge cycle, already flagged stale
/// or not by the daemon loop's step 3.
#[derive(Debug, Clone)]
pub struct DaemonViewEntry {
    pub record: DaemonNodeRecord,
    pub stale: bool,
}

/// A manifest keyed by `(machine_id, name)`, remembering when it was last
/// seen so the merge can apply `MANIFEST_TTL`.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    pub manifest: NodeManifest,
    pub last_seen: Instant,
}

type NodeKey = (String, String);

/// The merge function:
/// 1. every daemon record is inserted, attaching a manifest if present.
/// 2. every manifest not claimed by a daemon record is inserted standalone
///    if still within `manifest_ttl`, otherwise dropped from the result
///    (eviction of the caller's own manifest bookkeeping is the caller's
///    responsibility, not this function's — see [`super::DiscoveryEngine`]).
#[must_use]
pub fn merge(
    daemon_view: &[DaemonViewEntry],
    manifests: &HashMap<NodeKey, ManifestEntry>,
    now: Instant,
    manifest_ttl: Duration,
) -> HashMap<NodeKey, DiscoveredNode> {
    let mut out: HashMap<NodeKey, DiscoveredNode> = HashMap::new();

    for entry in daemon_view {
        let machine_id = DiscoveredNode::normalize_machine_id(&entry.record.machine_id);
        let key = (machine_id.clone(), entry.record.name.clone());
        let manifest_entry = manifests.get(&key);
        let discovered_via = if manifest_entry.is_some() {
            Provenance::Both
        } else {
            Provenance::Daemon
        };
        out.insert(
            key,
            DiscoveredNode {
                name: entry.record.name.clone(),
                machine_id,
                manifest: manifest_entry.map(|m| m.manifest.clone()),
                machine_hostname: entry.record.machine_hostname.clone(),
                machine_ips: entry.record.machine_ips.clone(),
                status: entry.record.status,
                installed: entry.record.installed,
                autostart_enabled: entry.record.autostart_enabled,
                is_built: entry.record.is_built,
                version: entry.record.version.clone(),
                description: entry.record.description.clone(),
                node_type: entry.record.node_type.clone(),
                base_node: entry.record.base_node.clone(),
                path: entry.record.path.clone(),
                build_output: entry.record.build_output.clone(),
                discovered_via,
                stale: entry.stale,
                last_seen_ms: 0,
            },
        );
    }

    for (key, entry) in manifests {
        if out.contains_key(key) {
            continue;
        }
        if now.saturating_duration_since(entry.last_seen) <= manifest_ttl {
            out.insert(
                key.clone(),
                DiscoveredNode {
                    name: key.1.clone(),
                    machine_id: key.0.clone(),
                    manifest: Some(entry.manifest.clone()),
                    machine_hostname: String::new(),
                    machine_ips: Vec::new(),
                    status: NodeStatus::Unknown,
                    installed: false,
                    autostart_enabled: false,
                    is_built: false,
                    version: String::new(),
                    description: String::new(),
                    node_type: String::new(),
                    base_node: String::new(),
                    path: String::new(),
                    build_output: Vec::new(),
                    discovered_via: Provenance::Manifest,
                    stale: false,
                    last_seen_ms: 0,
                },
            );
        }
    }

    out
}
