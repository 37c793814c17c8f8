// crates/alertpipe-core/src/ids.rs
// ============================================================================
// Module: Identifiers
// Description: Newtype wrappers around the identifiers used across entities.
// Purpose: Prevent accidental mixing of tenant/rule/alert/endpoint ids at
//          call sites that take several string-shaped arguments.
// Dependencies: serde, uuid
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Opaque tenant identifier, assigned by the operator at tenant creation.
///
/// # Invariants
/// - Non-empty; CRUD is responsible for rejecting blank ids before they
///   reach the data plane.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TenantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Rule identifier. Server-assigned at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub Uuid);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Endpoint identifier. Server-assigned at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub Uuid);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Alert identifier, supplied by the producer (not server-assigned).
///
/// # Invariants
/// - Must be stable across redeliveries of the same logical alert; the
///   deduplication boundary is keyed on `(tenant_id, alert_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlertId(pub Uuid);

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Notification identifier, assigned by the Deduplicator on first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub Uuid);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl NotificationId {
    /// Generates a fresh random notification id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Dense integer alias for a rule id, used inside inverted indexes.
///
/// Rule-ints are assigned by the Snapshot Builder and are monotonically
/// growing: once assigned to a rule id, a rule-int is never reused for a
/// different rule within the lifetime of a snapshot lineage.
pub type RuleInt = u32;
