//! Many UI listeners subscribing to the same topic must collapse to
//! exactly one transport-level subscriber, independently per endpoint, and
//! a disconnect/reconnect cycle must replay every endpoint's active topics
//! without double-declaring.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fleet_coordinator::mux::SubscriptionMux;
use fleet_coordinator::transport;
use fleet_test_support::MockSession;

#[tokio::test]
async fn three_listeners_one_transport_subscriber_per_endpoint() {
    let shared = transport::new_shared_session();
    let mux = SubscriptionMux::new(shared);
    let session = MockSession::new();
    mux.set_session(Some(Arc::new(session.clone()))).await;

    let hits = Arc::new(AtomicUsize::new(0));
    let make_cb = |counter: Arc<AtomicUsize>| {
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }) as Arc<dyn Fn(fleet_protocol::Sample) + Send + Sync>
    };

    let id1 = mux
        .subscribe("bubbaloop/local/m1/cam/frame", make_cb(hits.clone()), None)
        .await;
    let _id2 = mux
        .subscribe("bubbaloop/local/m1/cam/frame", make_cb(hits.clone()), None)
        .await;
    let _id3 = mux
        .subscribe("bubbaloop/local/m1/cam/frame", make_cb(hits.clone()), None)
        .await;
    assert_eq!(session.subscriber_count("bubbaloop/local/m1/cam/frame"), 1);

    // A second dashboard endpoint subscribing to the same topic gets its
    // own transport subscriber: dedup is per-endpoint, not global.
    mux.add_endpoint("remote-1");
    let _id4 = mux
        .subscribe(
            "bubbaloop/local/m1/cam/frame",
            make_cb(hits.clone()),
            Some("remote-1"),
        )
        .await;
    assert_eq!(session.subscriber_count("bubbaloop/local/m1/cam/frame"), 2);

    session.deliver("bubbaloop/local/m1/cam/frame", vec![1, 2, 3]);
    assert_eq!(hits.load(Ordering::SeqCst), 4, "every listener on every endpoint fires");

    mux.unsubscribe("bubbaloop/local/m1/cam/frame", id1, None);
    assert_eq!(
        session.subscriber_count("bubbaloop/local/m1/cam/frame"),
        2,
        "two remaining default-endpoint listeners keep the subscriber alive"
    );

    mux.remove_endpoint("remote-1");
    assert_eq!(mux.active_topics(Some("remote-1")).len(), 0);
}

#[tokio::test]
async fn reconnect_replays_every_active_endpoint_without_duplicating() {
    let shared = transport::new_shared_session();
    let mux = SubscriptionMux::new(shared);
    let session_a = MockSession::new();
    mux.set_session(Some(Arc::new(session_a.clone()))).await;

    mux.add_endpoint("remote-1");
    let _default = mux
        .subscribe("topic/a", Arc::new(|_| {}), None)
        .await;
    let _remote = mux
        .subscribe("topic/b", Arc::new(|_| {}), Some("remote-1"))
        .await;
    assert_eq!(session_a.subscriber_count("topic/a"), 1);
    assert_eq!(session_a.subscriber_count("topic/b"), 1);

    mux.set_session(None).await;
    assert_eq!(session_a.subscriber_count("topic/a"), 0);
    assert_eq!(session_a.subscriber_count("topic/b"), 0);

    let session_b = MockSession::new();
    mux.set_session(Some(Arc::new(session_b.clone()))).await;
    assert_eq!(session_b.subscriber_count("topic/a"), 1);
    assert_eq!(session_b.subscriber_count("topic/b"), 1);
    assert_eq!(mux.active_topics(None), vec!["topic/a".to_string()]);
    assert_eq!(mux.active_topics(Some("remote-1")), vec!["topic/b".to_string()]);
}
