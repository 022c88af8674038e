//! The per-machine aggregate view, pure derivation over whatever
//! `DiscoveryEngine::snapshot()` currently reports. Ground: the teacher's
//! `AppState` (connection/session bookkeeping derived from lower-level
//! state) plays the analogous "cheap aggregate view over a bigger owned
//! state" role for the HTTP server.

use std::sync::Mutex;

use fleet_protocol::{DiscoveredNode, MachineInfo};

/// Groups `nodes` by `machine_id` (already normalized to `"local"` by the
/// merge step) into the per-machine aggregate the UI renders. Pure
/// function — no locking, no session, fully unit-testable.
#[must_use]
pub fn machines(nodes: &[DiscoveredNode]) -> Vec<MachineInfo> {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<&str, Vec<&DiscoveredNode>> = BTreeMap::new();
    for node in nodes {
        groups.entry(node.machine_id.as_str()).or_default().push(node);
    }

    groups
        .into_iter()
        .map(|(machine_id, group)| {
            let hostname = group
                .iter()
                .map(|n| n.machine_hostname.as_str())
                .find(|h| !h.is_empty())
                .unwrap_or("local")
                .to_string();
            let ips = group
                .iter()
                .map(|n| &n.machine_ips)
                .find(|ips| !ips.is_empty())
                .cloned()
                .unwrap_or_default();
            let running_count = group
                .iter()
                .filter(|n| n.status == fleet_protocol::daemon::NodeStatus::Running)
                .count();
            let is_online = group.iter().any(|n| !n.stale);
            MachineInfo {
                machine_id: machine_id.to_string(),
                hostname,
                ips,
                node_count: group.len(),
                running_count,
                is_online,
            }
        })
        .collect()
}

/// Holds the UI's current machine filter selection and applies it to a
/// `DiscoveredNode` slice. The aggregation itself ([`machines`]) is stateless;
/// this wrapper exists only because the filter is a piece of observable UI
/// state the coordinator needs to remember between calls.
#[derive(Default)]
pub struct FleetState {
    filter: Mutex<Option<String>>,
}

impl FleetState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_filter(&self, machine_id: Option<String>) {
        *self.filter.lock().unwrap() = machine_id;
    }

    #[must_use]
    pub fn filter(&self) -> Option<String> {
        self.filter.lock().unwrap().clone()
    }

    /// Applies the current filter (if any) to `nodes`, returning only those
    /// that belong to the selected machine.
    #[must_use]
    pub fn apply_filter(&self, nodes: &[DiscoveredNode]) -> Vec<DiscoveredNode> {
        match self.filter() {
            None => nodes.to_vec(),
            Some(machine_id) => nodes
                .iter()
                .filter(|n| n.machine_id == machine_id)
                .cloned()
                .collect(),
        }
    }

    /// Convenience: the machine aggregate over the currently filtered node
    /// set. Most UIs want the *unfiltered* machine list (so the picker
    /// itself doesn't disappear once a machine is selected) — callers that
    /// need that should call [`machines`] directly on an unfiltered slice.
    #[must_use]
    pub fn filtered_machines(&self, nodes: &[DiscoveredNode]) -> Vec<MachineInfo> {
        machines(&self.apply_filter(nodes))
    }
}
