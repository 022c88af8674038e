//! The abstracted pub/sub transport seam (stands in for a Zenoh-style
//! overlay). The coordinator never talks to a real transport directly;
//! every component takes an `Arc<dyn Session>` (or `None`) and becomes a
//! no-op when it is absent.

use async_trait::async_trait;

/// One reply to a `get()` query.
#[derive(Debug, Clone)]
pub struct GetReply {
    pub key: String,
    pub payload: Vec<u8>,
}

/// One delivered sample on a declared subscriber.
#[derive(Debug, Clone)]
pub struct Sample {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Invoked once per delivered sample. Implementations must not block; a
/// slow callback only slows delivery on its own subscription.
pub type SubscriberCallback = Box<dyn Fn(Sample) + Send + Sync>;

/// Disposing the handle (dropping it) retracts the transport-level
/// subscription. Implementations should make retraction idempotent.
pub trait SubscriberHandle: Send + Sync {
    fn key(&self) -> &str;
}

/// A declared publisher. `put` enqueues a message; delivery is best-effort
/// per the underlying transport.
#[async_trait]
pub trait PublisherHandle: Send + Sync {
    fn key(&self) -> &str;
    async fn put(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Transport-level failure kinds. These never propagate as `Result` errors
/// out of the coordinator's steady-state loops — each component catches
/// them and folds them into its own error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("query timed out")]
    Timeout,
    #[error("session unavailable")]
    Unavailable,
    #[error("transport error: {0}")]
    Other(String),
}

/// The abstracted pub/sub session. A real implementation wraps Zenoh (or an
/// equivalent overlay); `fleet-test-support::MockSession` is the in-memory
/// test double.
#[async_trait]
pub trait Session: Send + Sync {
    /// Queries `key`, collecting replies until the query naturally
    /// completes or `timeout` elapses. A timed-out query returns
    /// `Err(TransportError::Timeout)` with whatever replies, if any, have
    /// already arrived discarded — callers treat a timeout as "no new
    /// data this cycle", not as a fatal error.
    async fn get(
        &self,
        key: &str,
        timeout: std::time::Duration,
    ) -> Result<Vec<GetReply>, TransportError>;

    /// Declares a subscriber on `key`, invoking `callback` per delivered
    /// sample. The returned handle retracts the subscription on drop.
    async fn declare_subscriber(
        &self,
        key: &str,
        callback: SubscriberCallback,
    ) -> Result<Box<dyn SubscriberHandle>, TransportError>;

    /// Declares a publisher on `key`.
    async fn declare_publisher(&self, key: &str)
        -> Result<Box<dyn PublisherHandle>, TransportError>;
}
