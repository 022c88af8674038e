//! A consumer tries to decode samples for a topic before its schema has
//! been fetched, gets `UnknownSchema` every time, and then the exact same
//! decode call succeeds the moment the descriptor arrives — coordinated
//! entirely through the registry's monotonic version counter.

mod common;

use std::sync::Arc;

use common::*;
use fleet_coordinator::schema::SchemaRegistry;
use fleet_protocol::manifest::{NodeManifest, PublishEntry};
use fleet_protocol::node::{DiscoveredNode, Provenance};
use fleet_protocol::{GetReply, NodeStatus};
use fleet_test_support::MockSession;

fn node_publishing(full_topic: &str, schema_type: &str) -> DiscoveredNode {
    let manifest = NodeManifest {
        name: "rtsp-camera".to_string(),
        machine_id: "m1".to_string(),
        publishes: vec![PublishEntry {
            full_topic: full_topic.to_string(),
            schema_type: Some(schema_type.to_string()),
            ..Default::default()
        }],
        ..Default::default()
    };
    DiscoveredNode {
        name: "rtsp-camera".to_string(),
        machine_id: "m1".to_string(),
        manifest: Some(manifest),
        machine_hostname: String::new(),
        machine_ips: Vec::new(),
        status: NodeStatus::Running,
        installed: true,
        autostart_enabled: true,
        is_built: true,
        version: String::new(),
        description: String::new(),
        node_type: String::new(),
        base_node: String::new(),
        path: String::new(),
        build_output: Vec::new(),
        discovered_via: Provenance::Both,
        stale: false,
        last_seen_ms: 0,
    }
}

#[tokio::test]
async fn decode_succeeds_once_schema_arrives_without_resubscribing() {
    init_tracing();
    let topic = "bubbaloop/local/m1/rtsp-camera/frame";
    let type_name = "bubbaloop.test.v1.Ping";

    let registry = SchemaRegistry::new();
    registry
        .sync_patterns(&[node_publishing(topic, type_name)])
        .await;

    let payload = ping_message_bytes(42);
    let version_before = registry.version();
    for _ in 0..5 {
        let err = registry
            .decode_for_topic(topic, &payload)
            .await
            .expect_err("schema hasn't been fetched yet");
        assert_eq!(err.type_name.as_deref(), Some(type_name));
    }
    assert_eq!(registry.version(), version_before);

    let session = MockSession::new();
    session.queue_reply(
        "bubbaloop/local/m1/rtsp-camera/schema",
        vec![GetReply {
            key: "bubbaloop/local/m1/rtsp-camera/schema".into(),
            payload: ping_descriptor_set_bytes("bubbaloop.test.v1", "Ping"),
        }],
    );

    let session: Arc<dyn fleet_protocol::Session> = Arc::new(session);
    let loaded = registry.discover_schema_for_topic(&session, topic).await;
    assert!(loaded, "descriptor set must be accepted");
    assert_eq!(registry.version(), version_before + 1);

    let decoded = registry
        .decode_for_topic(topic, &payload)
        .await
        .expect("decode must succeed now that the schema is loaded");
    assert_eq!(decoded.type_name, type_name);
    assert_eq!(decoded.fields["value"], 42);
}
