//! Client-side discovery and subscription coordinator for the fleet
//! dashboard.
//!
//! This crate has no UI of its own: it owns the shared
//! transport session and exposes three long-lived components — the
//! [`discovery::DiscoveryEngine`], the [`mux::SubscriptionMux`], and the
//! [`schema::SchemaRegistry`] — plus the pure [`fleet_state`] derivation
//! over the engine's output. [`Coordinator`] is the facade a host
//! application constructs once and wires its transport session into.

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod events;
pub mod fleet_state;
pub mod mux;
pub mod schema;
pub mod transport;

pub use config::{CoordinatorConfig, DiscoveryTuning, ResolvedTuning};
pub use coordinator::Coordinator;
pub use discovery::{DiscoveryEngine, DiscoveryEvent, DiscoverySnapshot};
pub use error::{ConfigError, ErrorKind};
pub use fleet_state::FleetState;
pub use mux::{ListenerId, SubscriptionMux, TopicStats};
pub use schema::{DecodeResult, SchemaRegistry, UndecodableDetail};
