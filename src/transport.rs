//! The shared transport handle every coordinator component observes.
//!
//! `None` means "no session"; every component must tolerate that by
//! becoming a no-op rather than erroring. Factored into its own module
//! because `DiscoveryEngine`, `SubscriptionMux`, and
//! `SchemaRegistry` all need the same handle type — ground: the teacher's
//! `receiver::session` module plays the analogous "one connection, many
//! consumers" role for `local_proxy` and the HTTP forwarder client.

use std::sync::Arc;

use fleet_protocol::Session;
use tokio::sync::RwLock;

/// `Arc<RwLock<Option<Arc<dyn Session>>>>` spelled out once. Cloning a
/// `SharedSession` clones the `Arc`, not the session underneath it — every
/// clone observes the same ownership transitions.
pub type SharedSession = Arc<RwLock<Option<Arc<dyn Session>>>>;

#[must_use]
pub fn new_shared_session() -> SharedSession {
    Arc::new(RwLock::new(None))
}

/// Replaces the session, returning the previous one so callers (the mux's
/// reconnect discipline, in particular) can tell a `None -> Some`
/// transition apart from a `Some -> Some` one.
pub async fn swap(shared: &SharedSession, session: Option<Arc<dyn Session>>) -> Option<Arc<dyn Session>> {
    let mut guard = shared.write().await;
    std::mem::replace(&mut *guard, session)
}

pub async fn current(shared: &SharedSession) -> Option<Arc<dyn Session>> {
    shared.read().await.clone()
}
