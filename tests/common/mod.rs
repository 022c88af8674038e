//! Shared fixtures for the coordinator's cross-component scenario tests.
//! Mirrors the role the teacher's `rt_test_utils` plays for the
//! forwarder/server/receiver integration suite: one place to build wire
//! fixtures and drive the mock transport, so each scenario file stays
//! focused on the behavior it's named for.

#![allow(dead_code)]

use std::time::Duration;

use fleet_coordinator::config::DiscoveryTuning;
use fleet_protocol::daemon_proto::{NodeList, NodeState};
use prost::Message;

/// Initializes a `tracing` subscriber the same way the teacher's service
/// binaries do (`services/forwarder/src/main.rs`), so a failing assertion's
/// surrounding `warn!`/`debug!` output is visible with `--nocapture`. Safe to
/// call once per test process; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Tuning with every window collapsed to milliseconds so a scenario can run
/// to completion under `tokio::time::pause`/`advance` without waiting on
/// real-world seconds-scale defaults. `stale_window` and `evict_window`
/// are deliberately kept distinct here (unlike the production default,
/// which sets them equal) so both the "became stale" and "got evicted"
/// transitions are independently observable within a single test run.
pub fn fast_tuning() -> DiscoveryTuning {
    DiscoveryTuning {
        daemon_period: Some(Duration::from_millis(10)),
        daemon_timeout: Some(Duration::from_millis(50)),
        manifest_period: Some(Duration::from_millis(15)),
        manifest_idle_period: Some(Duration::from_millis(40)),
        manifest_timeout: Some(Duration::from_millis(50)),
        manifest_initial_delay: Some(Duration::from_millis(5)),
        initial_connect_timeout: Some(Duration::from_millis(200)),
        stale_window: Some(Duration::from_millis(40)),
        manifest_ttl: Some(Duration::from_millis(100)),
        evict_window: Some(Duration::from_millis(90)),
    }
}

pub fn node_state(name: &str, status: i32) -> NodeState {
    NodeState {
        name: name.to_string(),
        status,
        installed: true,
        autostart_enabled: true,
        is_built: true,
        ..Default::default()
    }
}

pub fn node_list_bytes(
    machine_id: &str,
    hostname: &str,
    ips: &[&str],
    nodes: Vec<NodeState>,
) -> Vec<u8> {
    let list = NodeList {
        machine_id: machine_id.to_string(),
        machine_hostname: hostname.to_string(),
        machine_ips: ips.iter().map(|s| s.to_string()).collect(),
        nodes,
    };
    let mut buf = Vec::new();
    list.encode(&mut buf).unwrap();
    buf
}

pub fn manifest_json(name: &str, machine_id: &str) -> Vec<u8> {
    serde_json::json!({ "name": name, "machine_id": machine_id })
        .to_string()
        .into_bytes()
}

pub fn manifest_json_with_publish(
    name: &str,
    machine_id: &str,
    full_topic: &str,
    schema_type: &str,
) -> Vec<u8> {
    serde_json::json!({
        "name": name,
        "machine_id": machine_id,
        "publishes": [{
            "full_topic": full_topic,
            "schema_type": schema_type,
        }],
    })
    .to_string()
    .into_bytes()
}

/// Lets every runnable background task (the discovery loops, the schema
/// registry's rediscovery loop) make forward progress. Needed after
/// spawning and after `tokio::time::advance`, since a paused-clock
/// single-threaded runtime only advances tasks when the calling task itself
/// yields.
pub async fn pump() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

/// Builds a minimal proto3 `FileDescriptorSet` on the fly, describing one
/// message type with a single `int32` field, so schema-registry tests can
/// exercise real descriptor loading and decoding without a `protoc` build
/// step. Equivalent (by hand) to compiling a one-line `.proto` file.
pub fn ping_descriptor_set_bytes(package: &str, message_name: &str) -> Vec<u8> {
    use prost_types::{
        field_descriptor_proto::{Label, Type},
        DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    };

    let field = FieldDescriptorProto {
        name: Some("value".to_string()),
        number: Some(1),
        label: Some(Label::Optional as i32),
        r#type: Some(Type::Int32 as i32),
        json_name: Some("value".to_string()),
        ..Default::default()
    };
    let message = DescriptorProto {
        name: Some(message_name.to_string()),
        field: vec![field],
        ..Default::default()
    };
    let file = FileDescriptorProto {
        name: Some(format!("{message_name}.proto")),
        package: Some(package.to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![message],
        ..Default::default()
    };
    let set = FileDescriptorSet { file: vec![file] };
    let mut buf = Vec::new();
    set.encode(&mut buf).unwrap();
    buf
}

/// Hand-encodes `{ value: <value> }` for the message type built by
/// [`ping_descriptor_set_bytes`]: one varint field, tag `0x08`.
pub fn ping_message_bytes(value: i32) -> Vec<u8> {
    let mut buf = Vec::new();
    prost::encoding::int32::encode(1, &value, &mut buf);
    buf
}
