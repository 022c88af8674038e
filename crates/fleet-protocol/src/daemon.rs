//! Daemon-provided node state: the protobuf side of discovery.
//!
//! The wire format is `fleet.daemon.v1.NodeList` (see `proto/daemon.proto`);
//! [`decode_node_list`] turns one reply into a flat `Vec<DaemonNodeRecord>`
//! with the machine_id inheritance rule already applied, since every caller
//! needs that and none of them want to touch the raw prost types.

use crate::daemon_proto;

/// Lifecycle status of one daemon-managed node.
///
/// Integer values on the wire are frozen (see `proto/daemon.proto`); this
/// type is the domain-level string-mapped counterpart used everywhere else
/// in the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    Unknown,
    Stopped,
    Running,
    Failed,
    Installing,
    Building,
    NotInstalled,
}

impl NodeStatus {
    /// Maps a raw `NodeStatus` protobuf integer to the domain enum.
    /// Unrecognized values (including the default `0`) map to `Unknown`.
    #[must_use]
    pub fn from_proto(value: i32) -> Self {
        match value {
            1 => Self::Stopped,
            2 => Self::Running,
            3 => Self::Failed,
            4 => Self::Installing,
            5 => Self::Building,
            6 => Self::NotInstalled,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Installing => "installing",
            Self::Building => "building",
            Self::NotInstalled => "not-installed",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node's daemon-reported state, with machine identity already resolved
/// (the `NodeState.machine_id` inheritance rule has been applied).
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonNodeRecord {
    pub name: String,
    /// Never inherited as anything other than `""`; callers normalize
    /// `""` to `"local"` at the point they key into a machine map.
    pub machine_id: String,
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
}

/// Decoding errors for a daemon node-list reply.
#[derive(Debug, thiserror::Error)]
pub enum DaemonDecodeError {
    #[error("malformed NodeList payload: {0}")]
    Prost(#[from] prost::DecodeError),
}

/// Decodes one `NodeList` reply into its flat record list, applying the
/// machine_id inheritance rule from the daemon loop's step 1: a node with an
/// empty `machine_id` inherits the enclosing list's `machine_id` (itself
/// possibly empty, i.e. `""`).
pub fn decode_node_list(bytes: &[u8]) -> Result<Vec<DaemonNodeRecord>, DaemonDecodeError> {
    use prost::Message;
    let list = daemon_proto::NodeList::decode(bytes)?;
    Ok(list
        .nodes
        .into_iter()
        .map(|n| {
            let machine_id = if n.machine_id.is_empty() {
                list.machine_id.clone()
            } else {
                n.machine_id
            };
            DaemonNodeRecord {
                name: n.name,
                machine_id,
                machine_hostname: list.machine_hostname.clone(),
                machine_ips: list.machine_ips.clone(),
                status: NodeStatus::from_proto(n.status),
                installed: n.installed,
                autostart_enabled: n.autostart_enabled,
                is_built: n.is_built,
                version: n.version,
                description: n.description,
                node_type: n.node_type,
                base_node: n.base_node,
                path: n.path,
                build_output: n.build_output,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    fn encode(list: daemon_proto::NodeList) -> Vec<u8> {
        let mut buf = Vec::new();
        list.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn status_mapping_matches_wire_contract() {
        assert_eq!(NodeStatus::from_proto(0), NodeStatus::Unknown);
        assert_eq!(NodeStatus::from_proto(1), NodeStatus::Stopped);
        assert_eq!(NodeStatus::from_proto(2), NodeStatus::Running);
        assert_eq!(NodeStatus::from_proto(3), NodeStatus::Failed);
        assert_eq!(NodeStatus::from_proto(4), NodeStatus::Installing);
        assert_eq!(NodeStatus::from_proto(5), NodeStatus::Building);
        assert_eq!(NodeStatus::from_proto(6), NodeStatus::NotInstalled);
        assert_eq!(NodeStatus::from_proto(99), NodeStatus::Unknown);
    }

    #[test]
    fn empty_node_machine_id_inherits_list_level() {
        let list = daemon_proto::NodeList {
            machine_id: "m1".into(),
            machine_hostname: "jetson1".into(),
            machine_ips: vec!["10.0.0.5".into()],
            nodes: vec![daemon_proto::NodeState {
                name: "rtsp-camera".into(),
                machine_id: String::new(),
                status: 2,
                ..Default::default()
            }],
        };
        let records = decode_node_list(&encode(list)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].machine_id, "m1");
        assert_eq!(records[0].machine_hostname, "jetson1");
        assert_eq!(records[0].status, NodeStatus::Running);
    }

    #[test]
    fn explicit_node_machine_id_is_not_overridden() {
        let list = daemon_proto::NodeList {
            machine_id: "m1".into(),
            nodes: vec![daemon_proto::NodeState {
                name: "shared-node".into(),
                machine_id: "m2".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let records = decode_node_list(&encode(list)).unwrap();
        assert_eq!(records[0].machine_id, "m2");
    }

    #[test]
    fn empty_list_level_machine_id_inherits_as_empty_string() {
        let list = daemon_proto::NodeList {
            nodes: vec![daemon_proto::NodeState {
                name: "n".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let records = decode_node_list(&encode(list)).unwrap();
        assert_eq!(records[0].machine_id, "");
    }
}
