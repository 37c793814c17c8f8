// crates/alertpipe-core/src/notification.rs
// ============================================================================
// Module: Notification
// Description: The idempotency unit: one persisted delivery intent per
//              (tenant, alert).
// Purpose: Model the row the Deduplicator inserts and the Dispatcher
//          advances through its terminal states.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::alert::Alert;
use crate::ids::AlertId;
use crate::ids::NotificationId;
use crate::ids::RuleId;
use crate::ids::TenantId;
use crate::time::Timestamp;

/// Delivery status. Transitions are monotonic: `Received -> {Sent, Failed}`
/// and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    /// Persisted, not yet dispatched.
    Received,
    /// Dispatched to at least one endpoint successfully (or had none to
    /// dispatch to). Terminal.
    Sent,
    /// Every endpoint failed permanently after retries. Terminal; this is
    /// the system's dead-letter state.
    Failed,
}

impl NotificationStatus {
    /// Whether this status is terminal (the Dispatcher's idempotency gate
    /// skips delivery once a notification reaches a terminal status).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// Rejected at construction because the invariant "matched_rules is
/// non-empty" (§3) would be violated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    /// A notification must list at least one matched rule id.
    #[error("notification must have at least one matched rule id")]
    EmptyRuleIds,
}

/// A persisted notification: the idempotency unit for `(tenant_id,
/// alert_id)`.
///
/// # Invariants
/// - `matched_rule_ids` is non-empty.
/// - `status` only ever moves forward per [`NotificationStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Server-assigned identifier.
    pub notification_id: NotificationId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The alert this notification was raised for.
    pub alert_id: AlertId,
    /// Rule ids that matched, from the Matcher's output.
    pub matched_rule_ids: Vec<RuleId>,
    /// Snapshot of the alert payload at match time, used for delivery.
    pub payload: Value,
    /// Current delivery status.
    pub status: NotificationStatus,
    /// When the row was first inserted.
    pub created_at: Timestamp,
    /// When `status` last changed.
    pub updated_at: Timestamp,
}

impl Notification {
    /// Constructs a freshly-received notification intent.
    ///
    /// # Errors
    /// Returns [`NotificationError::EmptyRuleIds`] when `matched_rule_ids`
    /// is empty.
    pub fn new_received(
        notification_id: NotificationId,
        tenant_id: TenantId,
        alert: &Alert,
        matched_rule_ids: Vec<RuleId>,
        now: Timestamp,
    ) -> Result<Self, NotificationError> {
        if matched_rule_ids.is_empty() {
            return Err(NotificationError::EmptyRuleIds);
        }
        let payload = serde_json::to_value(alert).unwrap_or(Value::Null);
        Ok(Self {
            notification_id,
            tenant_id,
            alert_id: alert.alert_id,
            matched_rule_ids,
            payload,
            status: NotificationStatus::Received,
            created_at: now,
            updated_at: now,
        })
    }
}
