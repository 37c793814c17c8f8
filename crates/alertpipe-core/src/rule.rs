// crates/alertpipe-core/src/rule.rs
// ============================================================================
// Module: Rule
// Description: A tenant's predicate over alert fields.
// Purpose: Model the rule shape stored relationally and mirrored into the
//          rule snapshot.
// Dependencies: serde, thiserror
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::ids::RuleId;
use crate::ids::TenantId;

/// Wildcard literal recognized in any predicate field.
pub const WILDCARD: &str = "*";

/// One of the three predicate fields a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredicateField {
    /// Matches [`crate::alert::Severity`].
    Severity,
    /// Matches [`crate::alert::Alert::source`].
    Source,
    /// Matches [`crate::alert::Alert::name`].
    Name,
}

impl PredicateField {
    /// All predicate fields, in the fixed order used by snapshot dictionaries.
    pub const ALL: [PredicateField; 3] = [Self::Severity, Self::Source, Self::Name];
}

/// Rejected at construction time because the predicate would never do
/// anything useful, or because it collides with an invariant the relational
/// store also enforces via a unique index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    /// All three predicate fields are wildcards; the rule would match
    /// everything, which is rejected per §3 ("Predicate non-triviality").
    #[error("rule predicate must have at least one non-wildcard field")]
    AllWildcard,
}

/// A tenant's rule: a predicate over severity/source/name, each either a
/// literal string or the wildcard `*`.
///
/// # Invariants
/// - At least one of `severity`, `source`, `name` is not [`WILDCARD`]
///   (enforced by [`Rule::new`]).
/// - `version` increases by exactly one on every update (optimistic
///   concurrency; enforced by the CRUD layer, not by this type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Server-assigned identifier.
    pub rule_id: RuleId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Literal severity value or [`WILDCARD`].
    pub severity: String,
    /// Literal source value or [`WILDCARD`].
    pub source: String,
    /// Literal name value or [`WILDCARD`].
    pub name: String,
    /// Whether the rule currently participates in matching.
    pub enabled: bool,
    /// Monotonic version for optimistic concurrency.
    pub version: u64,
}

impl Rule {
    /// Constructs a rule, rejecting an all-wildcard predicate.
    ///
    /// # Errors
    /// Returns [`RuleError::AllWildcard`] when every field is [`WILDCARD`].
    pub fn new(
        rule_id: RuleId,
        tenant_id: TenantId,
        severity: String,
        source: String,
        name: String,
        enabled: bool,
        version: u64,
    ) -> Result<Self, RuleError> {
        if severity == WILDCARD && source == WILDCARD && name == WILDCARD {
            return Err(RuleError::AllWildcard);
        }
        Ok(Self {
            rule_id,
            tenant_id,
            severity,
            source,
            name,
            enabled,
            version,
        })
    }

    /// Returns the literal value (or [`WILDCARD`]) for the given field.
    #[must_use]
    pub fn field_value(&self, field: PredicateField) -> &str {
        match field {
            PredicateField::Severity => &self.severity,
            PredicateField::Source => &self.source,
            PredicateField::Name => &self.name,
        }
    }
}
