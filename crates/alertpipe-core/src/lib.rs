#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::use_debug)
)]
// crates/alertpipe-core/src/lib.rs
// ============================================================================
// Module: Alert Pipeline Core
// Description: Shared domain types for the alert notification pipeline.
// Purpose: Give every stage (snapshot builder, matcher, deduplicator,
//          dispatcher) one definition of Alert, Rule, Endpoint, Notification,
//          and the rule-change/snapshot shapes that flow between them.
// Dependencies: serde, serde_json, thiserror, time, uuid
// ============================================================================

//! ## Overview
//! This crate has no I/O of its own. It defines the entities in the data
//! model (§3) plus the invariants a caller is expected to uphold when
//! constructing them ([`Rule::new`] rejects an all-wildcard predicate, for
//! example). Every other crate in the workspace depends on this one.

pub mod alert;
pub mod endpoint;
pub mod ids;
pub mod matched_alert;
pub mod notification;
pub mod readiness;
pub mod rule;
pub mod rule_change;
pub mod snapshot;
pub mod time;

pub use alert::Alert;
pub use alert::Severity;
pub use endpoint::ChannelKind;
pub use endpoint::Endpoint;
pub use ids::AlertId;
pub use ids::EndpointId;
pub use ids::NotificationId;
pub use ids::RuleId;
pub use ids::TenantId;
pub use matched_alert::MATCHED_ALERT_SCHEMA_VERSION;
pub use matched_alert::MatchedAlert;
pub use notification::Notification;
pub use notification::NotificationStatus;
pub use readiness::READINESS_SCHEMA_VERSION;
pub use readiness::ReadinessEvent;
pub use rule::PredicateField;
pub use rule::Rule;
pub use rule_change::RuleChangeAction;
pub use rule_change::RuleChangeEvent;
pub use snapshot::RuleSnapshot;
pub use time::Timestamp;
