//! [`Coordinator`]: the facade a host application constructs once. Owns the
//! shared transport session and the three long-lived components, and wires
//! discovery output into the schema registry's pattern table so
//! `decode_for_topic` stays current as nodes are discovered, updated, and
//! evicted.
//!
//! Ground: the teacher's `server::AppState` plays the same "one struct a
//! whole binary is built around, holding the long-lived subsystems and the
//! session state they share" role.

use std::sync::Arc;

use fleet_protocol::Session;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::CoordinatorConfig;
use crate::discovery::DiscoveryEngine;
use crate::fleet_state::FleetState;
use crate::mux::SubscriptionMux;
use crate::schema::SchemaRegistry;
use crate::transport::{self, SharedSession};

/// Owns the shared transport session and every long-lived coordinator
/// component. Construct once per dashboard session; `start()`/`shutdown()`
/// bracket its lifetime.
pub struct Coordinator {
    config: CoordinatorConfig,
    session: SharedSession,
    discovery: Arc<DiscoveryEngine>,
    mux: Arc<SubscriptionMux>,
    schema: Arc<SchemaRegistry>,
    fleet_state: Arc<FleetState>,
    wiring_task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Arc<Self> {
        let session = transport::new_shared_session();
        let tuning = config.tuning.resolve();
        Arc::new(Self {
            config,
            discovery: DiscoveryEngine::new(tuning, session.clone()),
            mux: SubscriptionMux::new(session.clone()),
            schema: SchemaRegistry::new(),
            fleet_state: Arc::new(FleetState::new()),
            session,
            wiring_task: AsyncMutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    #[must_use]
    pub fn discovery(&self) -> &Arc<DiscoveryEngine> {
        &self.discovery
    }

    #[must_use]
    pub fn mux(&self) -> &Arc<SubscriptionMux> {
        &self.mux
    }

    #[must_use]
    pub fn schema_registry(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    #[must_use]
    pub fn fleet_state(&self) -> &Arc<FleetState> {
        &self.fleet_state
    }

    /// Injects (or drops) the transport session. Observed by all three
    /// components: the mux re-declares or releases its subscribers, while
    /// the discovery loops and schema registry pick up the new session on
    /// their next cycle.
    pub async fn set_session(&self, session: Option<Arc<dyn Session>>) {
        self.mux.set_session(session.clone()).await;
        transport::swap(&self.session, session).await;
    }

    /// Starts both discovery loops, the schema registry's periodic
    /// re-discovery, and the wiring task that keeps the registry's pattern
    /// table in sync with newly discovered manifests.
    pub async fn start(self: &Arc<Self>) {
        self.discovery.start().await;
        self.schema.start(self.session.clone()).await;
        let mut rx = self.discovery.subscribe();
        let discovery = self.discovery.clone();
        let schema = self.schema.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(_event) => {
                        let snapshot = discovery.snapshot().await;
                        schema.sync_patterns(&snapshot.nodes).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        debug!(n, "discovery event wiring lagged, resyncing from snapshot");
                        let snapshot = discovery.snapshot().await;
                        schema.sync_patterns(&snapshot.nodes).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.wiring_task.lock().await = Some(handle);
    }

    /// Retracts every subscription and stops both discovery loops
    /// deterministically.
    pub async fn shutdown(&self) {
        if let Some(task) = self.wiring_task.lock().await.take() {
            task.abort();
        }
        self.discovery.stop().await;
        self.schema.stop().await;
        self.mux.destroy();
        self.schema.clear().await;
        transport::swap(&self.session, None).await;
    }
}
