// crates/alertpipe-core/src/rule_change.rs
// ============================================================================
// Module: RuleChange
// Description: The event CRUD publishes to `rule.changed` after a commit.
// Purpose: Drive the Snapshot Builder's incremental update path.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::RuleId;
use crate::ids::TenantId;
use crate::time::Timestamp;

/// What happened to a rule. `Disabled` is distinct from `Updated` because
/// the Snapshot Builder treats both `Deleted` and `Disabled` identically
/// (remove from the snapshot) while the relational store keeps disabled
/// rules around for re-enabling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleChangeAction {
    /// A new rule was created.
    Created,
    /// An existing rule's predicate or enabled flag changed (other than via
    /// a dedicated disable).
    Updated,
    /// The rule row was deleted.
    Deleted,
    /// The rule was toggled off without deletion.
    Disabled,
}

impl RuleChangeAction {
    /// Whether the Snapshot Builder should fetch the current row and
    /// insert/replace it (`true`), or remove the rule from the snapshot
    /// (`false`).
    #[must_use]
    pub fn requires_fetch(self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

/// Event published to `rule.changed`, keyed by `rule_id`, only after the
/// originating CRUD transaction has durably committed (§3, "Event→commit
/// ordering").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChangeEvent {
    /// The rule this event concerns.
    pub rule_id: RuleId,
    /// The rule's owning tenant, included so the Snapshot Builder does not
    /// need a lookup just to attribute a deletion.
    pub tenant_id: TenantId,
    /// What happened.
    pub action: RuleChangeAction,
    /// The rule's version at the time of this change.
    pub version: u64,
    /// When the change was committed.
    pub updated_at: Timestamp,
    /// Wire schema version of this event.
    pub schema_version: u16,
}

/// Current wire schema version produced by this crate's encoder.
pub const RULE_CHANGE_SCHEMA_VERSION: u16 = 1;
