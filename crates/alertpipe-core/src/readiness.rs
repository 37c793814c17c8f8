// crates/alertpipe-core/src/readiness.rs
// ============================================================================
// Module: ReadinessEvent
// Description: The event the Deduplicator publishes to `notifications.ready`.
// Purpose: Tell the Dispatcher which persisted notification to load and
//          deliver, without carrying the notification body itself (the
//          Dispatcher re-loads it, so a stale readiness event can never
//          dispatch stale content).
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::AlertId;
use crate::ids::NotificationId;
use crate::ids::TenantId;

/// Published unconditionally on both `Inserted` and `AlreadyExists`
/// outcomes of the Deduplicator's insert attempt (§4.3); the Dispatcher's
/// idempotency gate is what makes the resulting duplicates harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessEvent {
    /// The notification row to load and dispatch.
    pub notification_id: NotificationId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// The alert the notification was raised for.
    pub alert_id: AlertId,
    /// Wire schema version of this event.
    pub schema_version: u16,
}

/// Current wire schema version produced by this crate's encoder.
pub const READINESS_SCHEMA_VERSION: u16 = 1;
