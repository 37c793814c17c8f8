// crates/alertpipe-core/src/matched_alert.rs
// ============================================================================
// Module: MatchedAlert
// Description: The event the Matcher publishes to `alerts.matched`.
// Purpose: Carry one tenant's view of a matched alert (the full alert body
//          plus every rule id of that tenant's that matched) downstream to
//          the Deduplicator.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::alert::Alert;
use crate::ids::RuleId;
use crate::ids::TenantId;

/// One tenant's matched-rule set for one alert, keyed by `tenant_id` on the
/// wire (§4.2, "one matched-record per tenant").
///
/// # Invariants
/// - `matched_rule_ids` is non-empty (a tenant with zero matches is never
///   emitted at all).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedAlert {
    /// The tenant this match set belongs to.
    pub tenant_id: TenantId,
    /// The alert that was matched.
    pub alert: Alert,
    /// Every rule id of `tenant_id`'s that matched `alert`.
    pub matched_rule_ids: Vec<RuleId>,
    /// Wire schema version of this event.
    pub schema_version: u16,
}

/// Current wire schema version produced by this crate's encoder.
pub const MATCHED_ALERT_SCHEMA_VERSION: u16 = 1;
