//! The merged, canonical records surfaced to the UI: [`DiscoveredNode`] (one
//! node) and [`MachineInfo`] (one machine's aggregate). Both are plain data;
//! the merge and aggregation algorithms that produce them live in the root
//! `fleet-coordinator` crate's `discovery` and `fleet_state` modules.

use crate::daemon::NodeStatus;
use crate::manifest::NodeManifest;

/// Which discovery channel(s) have observed a node since its last eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    Manifest,
    Daemon,
    Both,
}

impl Provenance {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manifest => "manifest",
            Self::Daemon => "daemon",
            Self::Both => "both",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The merged, per-node record the coordinator hands to the UI layer.
///
/// `machine_id` is always normalized: an empty daemon/manifest machine id
/// becomes `"local"` here.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredNode {
    pub name: String,
    pub machine_id: String,
    pub manifest: Option<NodeManifest>,
    pub machine_hostname: String,
    pub machine_ips: Vec<String>,
    pub status: NodeStatus,
    pub installed: bool,
    pub autostart_enabled: bool,
    pub is_built: bool,
    pub version: String,
    pub description: String,
    pub node_type: String,
    pub base_node: String,
    pub path: String,
    pub build_output: Vec<String>,
    pub discovered_via: Provenance,
    pub stale: bool,
    pub last_seen_ms: u64,
}

impl DiscoveredNode {
    /// Normalizes an empty machine id the way every merge path must: `""`
    /// becomes `"local"`.
    #[must_use]
    pub fn normalize_machine_id(machine_id: &str) -> String {
        if machine_id.is_empty() {
            "local".to_string()
        } else {
            machine_id.to_string()
        }
    }

    /// The merge identity `(machine_id, name)`, already normalized.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.machine_id.clone(), self.name.clone())
    }
}

/// Per-machine aggregate derived from the current `DiscoveredNode` set.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineInfo {
    pub machine_id: String,
    pub hostname: String,
    pub ips: Vec<String>,
    pub node_count: usize,
    pub running_count: usize,
    pub is_online: bool,
}
