//! Fixed design parameters. Defaults here are what every `ResolvedTuning`
//! falls back to when a `DiscoveryTuning` override is absent.

use std::time::Duration;

pub const DAEMON_PERIOD: Duration = Duration::from_secs(3);
pub const DAEMON_TIMEOUT: Duration = Duration::from_secs(5);
pub const MANIFEST_PERIOD: Duration = Duration::from_secs(10);
pub const MANIFEST_IDLE_PERIOD: Duration = Duration::from_secs(30);
pub const MANIFEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const MANIFEST_INITIAL_DELAY: Duration = Duration::from_secs(2);
pub const INITIAL_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const STALE_WINDOW: Duration = Duration::from_secs(15);
pub const MANIFEST_TTL: Duration = Duration::from_secs(60);
pub const EVICT_WINDOW: Duration = STALE_WINDOW;

/// Consecutive empty manifest cycles before the manifest loop backs off to
/// `MANIFEST_IDLE_PERIOD`. Also the idle-cycle count the schema registry's
/// periodic re-discovery uses for its own identical backoff.
pub const IDLE_CYCLES_BEFORE_BACKOFF: u32 = 3;

/// Ring buffer size for the subscription mux's rate estimator.
pub const RATE_WINDOW: usize = 32;
