// crates/alertpipe-core/src/snapshot.rs
// ============================================================================
// Module: Rule Snapshot
// Description: The versioned, serializable rule index published by the
//              Snapshot Builder and consumed by the Matcher.
// Purpose: Give both sides of the KV boundary one definition of the
//          snapshot's on-the-wire shape, and the pure (no I/O) logic for
//          building/mutating it from rule rows.
// Dependencies: serde, serde_json, std collections
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::ids::RuleId;
use crate::ids::RuleInt;
use crate::ids::TenantId;
use crate::rule::Rule;
use crate::rule::WILDCARD;

/// Current schema version of the encoded snapshot blob. Bump this, and
/// extend [`RuleSnapshot`] with optional fields only, whenever the blob
/// shape changes (§6, "never reuse field numbers").
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// A dense, append-only string-to-int dictionary for one predicate field.
///
/// # Invariants
/// - Ids are assigned densely starting at 0, in first-seen order.
/// - Existing entries are never renumbered (§4.1, "Incremental updates must
///   leave dictionaries monotonically growing").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dictionary {
    /// Forward map: literal value -> dense id. `*` is an entry like any
    /// other.
    by_value: BTreeMap<String, u32>,
    /// Reverse map, rebuilt from `by_value` after deserialization rather
    /// than carried on the wire, to keep the blob smaller.
    #[serde(skip)]
    by_id: Vec<String>,
}

impl Dictionary {
    /// Returns the id for `value`, assigning a new one if unseen.
    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(&id) = self.by_value.get(value) {
            return id;
        }
        let id = self.by_value.len() as u32;
        self.by_value.insert(value.to_string(), id);
        self.sync_reverse();
        id
    }

    /// Looks up the id for `value` without assigning one.
    #[must_use]
    pub fn get(&self, value: &str) -> Option<u32> {
        self.by_value.get(value).copied()
    }

    /// Number of distinct values interned so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    /// Whether the dictionary has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }

    /// Rebuilds the id -> value reverse index. Callers that deserialize a
    /// [`Dictionary`] directly (bypassing [`Dictionary::intern`]) must call
    /// this once before using [`Dictionary::value_of`].
    pub fn rebuild_reverse_index(&mut self) {
        self.sync_reverse();
    }

    fn sync_reverse(&mut self) {
        self.by_id = vec![String::new(); self.by_value.len()];
        for (value, &id) in &self.by_value {
            if let Some(slot) = self.by_id.get_mut(id as usize) {
                *slot = value.clone();
            }
        }
    }

    /// Returns the literal value for an id, if present.
    #[must_use]
    pub fn value_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(id as usize).map(String::as_str)
    }
}

/// `rule-int -> (rule_id, tenant_id)`, the table every inverted-index hit is
/// resolved through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTableEntry {
    /// The rule this rule-int stands for.
    pub rule_id: RuleId,
    /// The rule's owning tenant.
    pub tenant_id: TenantId,
    /// The rule's predicate, as dictionary ids, kept alongside the id
    /// mapping so a full intersection re-check is possible without an extra
    /// indirection.
    pub predicate_ids: [u32; 3],
}

/// The versioned rule index. Immutable once published: the Snapshot
/// Builder always constructs a new value (or a deep-enough copy) before
/// publishing, never mutates a value a reader might be holding.
///
/// # Invariants
/// - `version` is monotonically non-decreasing across publications from the
///   same lineage.
/// - Every rule-int referenced by any inverted index entry exists as a key
///   in `rules` (§8, invariant 5).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    /// Schema version of this blob.
    pub schema_version: u32,
    /// Monotonic snapshot version.
    pub version: u64,
    /// Severity dictionary.
    pub severity_dict: Dictionary,
    /// Source dictionary.
    pub source_dict: Dictionary,
    /// Name dictionary.
    pub name_dict: Dictionary,
    /// Inverted index: severity dictionary id -> rule-ints.
    pub by_severity: HashMap<u32, Vec<RuleInt>>,
    /// Inverted index: source dictionary id -> rule-ints.
    pub by_source: HashMap<u32, Vec<RuleInt>>,
    /// Inverted index: name dictionary id -> rule-ints.
    pub by_name: HashMap<u32, Vec<RuleInt>>,
    /// `rule-int -> (rule_id, tenant_id, predicate)`.
    pub rules: HashMap<RuleInt, RuleTableEntry>,
    /// Next rule-int to assign. Monotonic: never reused, even after a
    /// rule is removed, so stale cached rule-ints in a Matcher mid-swap can
    /// never collide with a different rule.
    pub next_rule_int: RuleInt,
}

/// Errors raised while building or mutating a snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// A rule with an all-wildcard predicate was passed in. The Snapshot
    /// Builder treats this defensively (§8) even though CRUD should have
    /// rejected it already.
    #[error("rule {0} has an all-wildcard predicate and cannot be indexed")]
    AllWildcardRule(RuleId),
}

impl RuleSnapshot {
    /// Builds a fresh snapshot from scratch (cold start / full rebuild).
    ///
    /// # Errors
    /// Returns [`SnapshotError::AllWildcardRule`] if any input rule violates
    /// the predicate non-triviality invariant.
    pub fn build(rules: impl IntoIterator<Item = Rule>, version: u64) -> Result<Self, SnapshotError> {
        let mut snapshot = Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            version,
            ..Self::default()
        };
        for rule in rules {
            snapshot.upsert_rule(&rule)?;
        }
        Ok(snapshot)
    }

    /// Inserts or replaces a rule's entry in the snapshot (the `CREATED`/
    /// `UPDATED` incremental path). Dictionary growth is monotonic; removing
    /// a stale rule-int for the same rule id (on replace) does not free its
    /// dictionary entries.
    ///
    /// # Errors
    /// Returns [`SnapshotError::AllWildcardRule`] if `rule`'s predicate is
    /// all-wildcard.
    pub fn upsert_rule(&mut self, rule: &Rule) -> Result<(), SnapshotError> {
        if rule.severity == WILDCARD && rule.source == WILDCARD && rule.name == WILDCARD {
            return Err(SnapshotError::AllWildcardRule(rule.rule_id));
        }
        self.remove_rule(rule.rule_id);

        let severity_id = self.severity_dict.intern(&rule.severity);
        let source_id = self.source_dict.intern(&rule.source);
        let name_id = self.name_dict.intern(&rule.name);

        let rule_int = self.next_rule_int;
        self.next_rule_int += 1;

        self.by_severity.entry(severity_id).or_default().push(rule_int);
        self.by_source.entry(source_id).or_default().push(rule_int);
        self.by_name.entry(name_id).or_default().push(rule_int);

        self.rules.insert(
            rule_int,
            RuleTableEntry {
                rule_id: rule.rule_id,
                tenant_id: rule.tenant_id.clone(),
                predicate_ids: [severity_id, source_id, name_id],
            },
        );
        Ok(())
    }

    /// Removes a rule's entry from the snapshot (the `DELETED`/`DISABLED`
    /// incremental path, and CRUD's lookup-miss fallback per §4.1).
    /// A no-op if the rule is not currently present.
    pub fn remove_rule(&mut self, rule_id: RuleId) {
        let Some((&stale_int, entry)) = self.rules.iter().find(|(_, e)| e.rule_id == rule_id) else {
            return;
        };
        let [severity_id, source_id, name_id] = entry.predicate_ids;
        remove_from_index(&mut self.by_severity, severity_id, stale_int);
        remove_from_index(&mut self.by_source, source_id, stale_int);
        remove_from_index(&mut self.by_name, name_id, stale_int);
        self.rules.remove(&stale_int);
    }

    /// Rebuilds dictionary reverse indexes after deserializing a blob from
    /// the wire. Must be called once before the snapshot is used for
    /// anything beyond id lookups.
    pub fn rebuild_reverse_indexes(&mut self) {
        self.severity_dict.rebuild_reverse_index();
        self.source_dict.rebuild_reverse_index();
        self.name_dict.rebuild_reverse_index();
    }

    /// Checks invariant 5 from §8: every rule-int referenced by any
    /// inverted index exists in the rule table. Used by tests and by the
    /// Matcher's defensive validation after a refresh.
    #[must_use]
    pub fn is_internally_consistent(&self) -> bool {
        let indexes = [&self.by_severity, &self.by_source, &self.by_name];
        indexes.iter().all(|index| {
            index
                .values()
                .flatten()
                .all(|rule_int| self.rules.contains_key(rule_int))
        })
    }
}

fn remove_from_index(index: &mut HashMap<u32, Vec<RuleInt>>, key: u32, rule_int: RuleInt) {
    if let Some(list) = index.get_mut(&key) {
        list.retain(|&candidate| candidate != rule_int);
        if list.is_empty() {
            index.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn rule(severity: &str, source: &str, name: &str) -> Rule {
        Rule::new(
            RuleId(Uuid::new_v4()),
            TenantId::from("tenant-a"),
            severity.to_string(),
            source.to_string(),
            name.to_string(),
            true,
            1,
        )
        .expect("test rule predicate is not all-wildcard")
    }

    #[test]
    fn build_is_internally_consistent() {
        let snapshot =
            RuleSnapshot::build([rule("HIGH", "api", "timeout"), rule("LOW", "*", "*")], 1)
                .expect("rules are valid");
        assert!(snapshot.is_internally_consistent());
        assert_eq!(snapshot.version, 1);
    }

    #[test]
    fn dictionaries_grow_monotonically_on_upsert() {
        let mut snapshot = RuleSnapshot::build([rule("HIGH", "api", "timeout")], 1)
            .expect("rules are valid");
        let high_id = snapshot.severity_dict.get("HIGH");
        snapshot
            .upsert_rule(&rule("MEDIUM", "api", "timeout"))
            .expect("rule is valid");
        assert_eq!(snapshot.severity_dict.get("HIGH"), high_id);
    }

    #[test]
    fn remove_rule_is_a_noop_for_unknown_rule() {
        let mut snapshot = RuleSnapshot::default();
        snapshot.remove_rule(RuleId(Uuid::new_v4()));
        assert!(snapshot.rules.is_empty());
    }

    #[test]
    fn rejects_all_wildcard_rule_defensively() {
        let mut snapshot = RuleSnapshot::default();
        let bad = Rule {
            rule_id: RuleId(Uuid::new_v4()),
            tenant_id: TenantId::from("t"),
            severity: WILDCARD.to_string(),
            source: WILDCARD.to_string(),
            name: WILDCARD.to_string(),
            enabled: true,
            version: 1,
        };
        assert!(matches!(
            snapshot.upsert_rule(&bad),
            Err(SnapshotError::AllWildcardRule(_))
        ));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        // Small alphabets deliberately force repeated values across rules,
        // which is what exercises dictionary reuse rather than only growth.
        fn field_strategy() -> impl Strategy<Value = String> {
            prop_oneof![Just("HIGH".to_string()), Just("LOW".to_string()), Just("*".to_string()), Just("api".to_string())]
        }

        fn non_wildcard_rule() -> impl Strategy<Value = Rule> {
            (field_strategy(), field_strategy(), field_strategy()).prop_filter_map("all-wildcard", |(severity, source, name)| {
                if severity == WILDCARD && source == WILDCARD && name == WILDCARD {
                    return None;
                }
                Some(rule(&severity, &source, &name))
            })
        }

        proptest! {
            /// Every prefix of an upsert sequence leaves the snapshot
            /// internally consistent (§8, invariant 5) and never renumbers a
            /// dictionary entry already assigned to an earlier rule (§4.1,
            /// "dictionaries monotonically growing").
            #[test]
            fn upserts_stay_consistent_and_dictionaries_never_renumber(rules in prop::collection::vec(non_wildcard_rule(), 0..20)) {
                let mut snapshot = RuleSnapshot::default();
                let mut seen_severity_ids: HashMap<String, u32> = HashMap::new();

                for rule in &rules {
                    snapshot.upsert_rule(rule).expect("filtered to non-wildcard");
                    prop_assert!(snapshot.is_internally_consistent());

                    let id = snapshot.severity_dict.get(&rule.severity).expect("just interned");
                    match seen_severity_ids.get(&rule.severity) {
                        Some(&previous) => prop_assert_eq!(previous, id),
                        None => {
                            seen_severity_ids.insert(rule.severity.clone(), id);
                        }
                    }
                }
            }

            /// Removing a rule that was never inserted is always a no-op,
            /// regardless of what else is in the snapshot.
            #[test]
            fn remove_unknown_rule_is_always_a_noop(rules in prop::collection::vec(non_wildcard_rule(), 0..10)) {
                let mut snapshot = RuleSnapshot::default();
                for rule in &rules {
                    snapshot.upsert_rule(rule).expect("filtered to non-wildcard");
                }
                let before = snapshot.clone();
                snapshot.remove_rule(RuleId(Uuid::new_v4()));
                prop_assert_eq!(snapshot, before);
            }
        }
    }
}
