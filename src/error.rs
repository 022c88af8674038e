//! Error taxonomy and constructor-time config errors.
//!
//! The taxonomy below never propagates as a `Result` failure out of the
//! coordinator's steady-state loops (the loops themselves are the retry
//! mechanism) — it is surfaced only via `DiscoveryEngine::snapshot().last_error`
//! and via `DecodeResult`-shaped return values. `ConfigError` is the one
//! error that *does* return as a `Result`, since it only ever occurs at
//! construction time.

/// Kinds of recoverable runtime condition. Not a Rust error type in the
/// `std::error::Error` sense — it never gets wrapped in a `Result` that
/// reaches a caller outside the loop that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Session is null or handshake failed. All operations become no-ops.
    TransportUnavailable,
    /// A `get()` did not complete within its timeout.
    QueryTimeout,
    /// Manifest JSON invalid or descriptor bytes unparseable.
    MalformedPayload,
    /// Type known, bytes don't validate.
    DecodeFailed,
    /// No schema loaded for a required type.
    UnknownSchema,
    /// Neither discovery channel produced data within `INITIAL_CONNECT_TIMEOUT`.
    InitialConnectTimeout,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransportUnavailable => "transport_unavailable",
            Self::QueryTimeout => "query_timeout",
            Self::MalformedPayload => "malformed_payload",
            Self::DecodeFailed => "decode_failed",
            Self::UnknownSchema => "unknown_schema",
            Self::InitialConnectTimeout => "no data",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction-time configuration error. The only error in this crate that
/// returns as a `Result` to a caller, mirroring how the teacher's
/// `ForwarderConfig` loader is the one place that fails loudly.
#[derive(Debug)]
pub enum ConfigError {
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField(s) => write!(f, "missing required field: {s}"),
            Self::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
