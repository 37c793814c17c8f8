// crates/alertpipe-core/src/alert.rs
// ============================================================================
// Module: Alert
// Description: The event a producer writes to `alerts.new`.
// Purpose: Model the alert shape matched against rule predicates.
// Dependencies: serde, serde_json
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use serde_json::Value;

use crate::ids::AlertId;
use crate::time::Timestamp;

/// Alert severity. Values outside this set are accepted on the wire (an
/// unrecognized severity still flows through the pipeline, per §8) but are
/// represented here as [`Severity::Other`].
///
/// # Invariants
/// - Comparison/ordering is not implied; severity is a label, not a scale,
///   for matching purposes (rules compare by equality or wildcard only).
///
/// Serializes and deserializes as a plain string (not an externally tagged
/// enum) so that an unrecognized value round-trips as itself rather than as
/// `{"Other": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Lowest recognized severity.
    Low,
    /// Default/ambiguous severity.
    Medium,
    /// Elevated severity.
    High,
    /// Highest recognized severity.
    Critical,
    /// Any value outside the recognized set. Still matchable by a literal
    /// rule on that exact string, or by a wildcard.
    Other(String),
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl Severity {
    /// Returns the canonical wire representation of this severity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
            Self::Other(value) => value.as_str(),
        }
    }

    /// Parses a severity from its wire representation. Never fails: an
    /// unrecognized value becomes [`Severity::Other`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "LOW" => Self::Low,
            "MEDIUM" => Self::Medium,
            "HIGH" => Self::High,
            "CRITICAL" => Self::Critical,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An alert event as received from an upstream producer.
///
/// # Invariants
/// - `alert_id` is stable across redeliveries of the same logical alert.
/// - `context` is opaque to the matcher; it is carried through to the
///   notification payload untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Caller-supplied identifier, stable across redeliveries.
    pub alert_id: AlertId,
    /// Wire schema version of this alert record.
    pub schema_version: u16,
    /// When the alert condition was observed upstream.
    pub event_ts: Timestamp,
    /// Severity as reported by the producer.
    pub severity: Severity,
    /// Source system or subsystem that raised the alert.
    pub source: String,
    /// Short name/category of the alert condition.
    pub name: String,
    /// Opaque producer-supplied context, carried through to delivery.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

/// Current wire schema version produced by this crate's encoder.
pub const ALERT_SCHEMA_VERSION: u16 = 1;
