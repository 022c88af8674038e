//! Per-node self-description manifests, discovered as JSON over the
//! `bubbaloop/**/manifest` wildcard. Parsing is defensive throughout: a
//! manifest missing `name` (or not an object at all) is rejected, but every
//! other field is optional and defaults sensibly.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// One entry in a manifest's `publishes` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishEntry {
    #[serde(default)]
    pub topic_suffix: String,
    #[serde(default)]
    pub full_topic: String,
    /// Kept as the raw JSON-reported value; callers that need a float can
    /// parse it themselves. Stored as a string so a manifest with an
    /// integer, a float, a quoted string, or a missing rate all parse
    /// without error — nodes in the wild report this field both ways.
    #[serde(default, deserialize_with = "rate_hz_as_string")]
    pub rate_hz: String,
    #[serde(default)]
    pub schema_type: Option<String>,
}

/// Accepts a JSON string or number for `rate_hz` and normalizes both to a
/// string, so a numeric literal (`30`) doesn't fail the whole manifest's
/// deserialize the way a strict `String` field would.
fn rate_hz_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// `security.*` sub-object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityInfo {
    #[serde(default)]
    pub acl_prefix: String,
    #[serde(default)]
    pub data_classification: String,
}

/// `time.*` sub-object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    #[serde(default)]
    pub clock_source: String,
    #[serde(default)]
    pub timestamp_field: String,
    #[serde(default)]
    pub timestamp_unit: String,
}

/// A validated, defaulted node manifest. Construct via [`NodeManifest::parse`]
/// rather than deserializing directly, so the `name`-required rule and
/// default-filling are applied uniformly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeManifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub machine_id: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub requires_hardware: Vec<String>,
    #[serde(default)]
    pub publishes: Vec<PublishEntry>,
    #[serde(default)]
    pub subscribes: Vec<String>,
    #[serde(default)]
    pub schema_key: String,
    #[serde(default)]
    pub health_key: String,
    #[serde(default)]
    pub config_key: String,
    #[serde(default)]
    pub security: SecurityInfo,
    #[serde(default)]
    pub time: TimeInfo,
}

fn default_scope() -> String {
    "local".to_string()
}

impl NodeManifest {
    /// Parses a raw manifest payload, dropping it silently (returning
    /// `None`) if it is not a JSON object or is missing a non-empty `name`.
    /// This is the only validation the manifest loop performs — everything
    /// else defaults.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_slice(raw).ok()?;
        Self::from_value(value)
    }

    /// Same as [`Self::parse`] but starting from an already-decoded value,
    /// for callers that batch-parse a wildcard reply stream.
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let manifest: Self = serde_json::from_value(value).ok()?;
        if manifest.name.is_empty() {
            return None;
        }
        Some(manifest)
    }

    /// Stable merge identity: `(machine_id || "local", name)`.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        let machine_id = if self.machine_id.is_empty() {
            "local".to_string()
        } else {
            self.machine_id.clone()
        };
        (machine_id, self.name.clone())
    }
}
