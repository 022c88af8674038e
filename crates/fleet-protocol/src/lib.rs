// fleet-protocol: wire/data-model types shared by the discovery engine,
// subscription mux, and schema registry. No async, no I/O — this crate is
// pure data plus the `Session` trait that is the seam to the real transport.

pub mod daemon;
pub mod manifest;
pub mod node;
pub mod session;

pub use daemon::{decode_node_list, DaemonNodeRecord, NodeStatus};
pub use manifest::{NodeManifest, PublishEntry, SecurityInfo, TimeInfo};
pub use node::{DiscoveredNode, MachineInfo, Provenance};
pub use session::{
    GetReply, PublisherHandle, Sample, Session, SubscriberCallback, SubscriberHandle,
    TransportError,
};

/// Generated protobuf types for `fleet.daemon.v1` (`NodeList`, `NodeState`,
/// the raw `NodeStatus` enum). See [`daemon`] for the hand-written domain
/// wrapper most callers should use instead of these raw prost types.
pub mod daemon_proto {
    include!(concat!(env!("OUT_DIR"), "/fleet.daemon.v1.rs"));
}
