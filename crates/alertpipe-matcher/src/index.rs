// crates/alertpipe-matcher/src/index.rs
// ============================================================================
// Module: Matcher Index
// Description: The matching algorithm over a [`RuleSnapshot`], and the
//              atomically-swappable handle the hot path reads through.
// Purpose: Keep §4.2's three-way set-intersection pure and synchronous, so
//          it can be unit tested without touching the log bus or the KV
//          store, and shared behind a single writer pointer across however
//          many partition-consumers the Matcher runs.
// Dependencies: alertpipe-core, arc-swap, std collections
// ============================================================================

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use alertpipe_core::Alert;
use alertpipe_core::RuleSnapshot;
use alertpipe_core::TenantId;
use alertpipe_core::ids::RuleInt;
use alertpipe_core::rule::WILDCARD;
use arc_swap::ArcSwap;

/// Holds the currently-installed [`RuleSnapshot`] behind a single atomic
/// pointer. Readers on the hot path never block a concurrent swap and never
/// observe a partially-updated snapshot (§4.2, "never serve half-swapped
/// state").
pub struct SnapshotHandle(ArcSwap<RuleSnapshot>);

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self::new(RuleSnapshot::default())
    }
}

impl SnapshotHandle {
    /// Installs `snapshot` as the initial value.
    #[must_use]
    pub fn new(snapshot: RuleSnapshot) -> Self {
        Self(ArcSwap::new(Arc::new(snapshot)))
    }

    /// Atomically swaps in `snapshot`, replacing whatever was previously
    /// installed.
    pub fn swap(&self, snapshot: RuleSnapshot) {
        self.0.store(Arc::new(snapshot));
    }

    /// Returns the version of the currently-installed snapshot.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.0.load().version
    }

    /// Runs the three-way intersection for `alert` against the currently
    /// installed snapshot, grouping matched rule ids by tenant.
    #[must_use]
    pub fn match_alert(&self, alert: &Alert) -> HashMap<TenantId, Vec<alertpipe_core::RuleId>> {
        let snapshot = self.0.load();
        match_against(&snapshot, alert)
    }
}

/// Runs §4.2's matching algorithm against `snapshot` for `alert`.
#[must_use]
pub fn match_against(snapshot: &RuleSnapshot, alert: &Alert) -> HashMap<TenantId, Vec<alertpipe_core::RuleId>> {
    let severity_set = field_candidates(
        snapshot.severity_dict.get(alert.severity.as_str()),
        snapshot.severity_dict.get(WILDCARD),
        &snapshot.by_severity,
    );
    let source_set = field_candidates(
        snapshot.source_dict.get(&alert.source),
        snapshot.source_dict.get(WILDCARD),
        &snapshot.by_source,
    );
    let name_set =
        field_candidates(snapshot.name_dict.get(&alert.name), snapshot.name_dict.get(WILDCARD), &snapshot.by_name);

    let mut sets = [severity_set, source_set, name_set];
    sets.sort_by_key(HashSet::len);
    let [smallest, mid, largest] = sets;
    if smallest.is_empty() {
        return HashMap::new();
    }
    let surviving: Vec<RuleInt> = smallest
        .into_iter()
        .filter(|rule_int| mid.contains(rule_int) && largest.contains(rule_int))
        .collect();

    let mut by_tenant: HashMap<TenantId, Vec<alertpipe_core::RuleId>> = HashMap::new();
    for rule_int in surviving {
        if let Some(entry) = snapshot.rules.get(&rule_int) {
            by_tenant.entry(entry.tenant_id.clone()).or_default().push(entry.rule_id);
        }
    }
    by_tenant
}

fn field_candidates(literal_id: Option<u32>, wildcard_id: Option<u32>, index: &HashMap<u32, Vec<RuleInt>>) -> HashSet<RuleInt> {
    let mut set = HashSet::new();
    if let Some(id) = literal_id {
        if let Some(list) = index.get(&id) {
            set.extend(list.iter().copied());
        }
    }
    if let Some(id) = wildcard_id {
        if Some(id) != literal_id {
            if let Some(list) = index.get(&id) {
                set.extend(list.iter().copied());
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertpipe_core::Rule;
    use alertpipe_core::RuleId;
    use alertpipe_core::Severity;
    use alertpipe_core::Timestamp;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn rule(tenant: &str, severity: &str, source: &str, name: &str) -> Rule {
        Rule::new(RuleId(Uuid::new_v4()), TenantId::from(tenant), severity.to_string(), source.to_string(), name.to_string(), true, 1)
            .expect("valid predicate")
    }

    fn alert(severity: Severity, source: &str, name: &str) -> Alert {
        Alert {
            alert_id: alertpipe_core::AlertId(Uuid::new_v4()),
            schema_version: 1,
            event_ts: Timestamp::new(time::OffsetDateTime::now_utc()),
            severity,
            source: source.to_string(),
            name: name.to_string(),
            context: BTreeMap::new(),
        }
    }

    #[test]
    fn literal_rule_matches_exact_alert() {
        let snapshot = RuleSnapshot::build([rule("t1", "HIGH", "api", "timeout")], 1).expect("valid");
        let matches = match_against(&snapshot, &alert(Severity::High, "api", "timeout"));
        assert_eq!(matches.get(&TenantId::from("t1")).map(Vec::len), Some(1));
    }

    #[test]
    fn wildcard_rule_matches_any_literal() {
        let snapshot = RuleSnapshot::build([rule("t1", "*", "*", "timeout")], 1).expect("valid");
        let matches = match_against(&snapshot, &alert(Severity::Critical, "db", "timeout"));
        assert_eq!(matches.get(&TenantId::from("t1")).map(Vec::len), Some(1));
    }

    #[test]
    fn non_matching_field_excludes_rule() {
        let snapshot = RuleSnapshot::build([rule("t1", "HIGH", "api", "timeout")], 1).expect("valid");
        let matches = match_against(&snapshot, &alert(Severity::High, "api", "restart"));
        assert!(matches.is_empty());
    }

    #[test]
    fn multiple_rules_for_same_tenant_collapse_into_one_list() {
        let snapshot =
            RuleSnapshot::build([rule("t1", "HIGH", "*", "*"), rule("t1", "*", "api", "*")], 1).expect("valid");
        let matches = match_against(&snapshot, &alert(Severity::High, "api", "timeout"));
        assert_eq!(matches.get(&TenantId::from("t1")).map(Vec::len), Some(2));
    }

    #[test]
    fn rules_across_tenants_are_grouped_separately() {
        let snapshot =
            RuleSnapshot::build([rule("t1", "HIGH", "*", "*"), rule("t2", "HIGH", "*", "*")], 1).expect("valid");
        let matches = match_against(&snapshot, &alert(Severity::High, "api", "timeout"));
        assert_eq!(matches.len(), 2);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn field_strategy() -> impl Strategy<Value = String> {
            prop_oneof![Just("HIGH".to_string()), Just("LOW".to_string()), Just("*".to_string()), Just("api".to_string()), Just("db".to_string())]
        }

        fn non_wildcard_rule() -> impl Strategy<Value = (String, String, String, String)> {
            ("t1", field_strategy(), field_strategy(), field_strategy()).prop_filter_map("all-wildcard", |(tenant, severity, source, name)| {
                if severity == WILDCARD && source == WILDCARD && name == WILDCARD {
                    return None;
                }
                Some((tenant.to_string(), severity, source, name))
            })
        }

        fn matches_literally(predicate: (&str, &str, &str), fields: (&str, &str, &str)) -> bool {
            let (p_severity, p_source, p_name) = predicate;
            let (severity, source, name) = fields;
            (p_severity == WILDCARD || p_severity == severity)
                && (p_source == WILDCARD || p_source == source)
                && (p_name == WILDCARD || p_name == name)
        }

        proptest! {
            /// `match_against`'s inverted-index intersection agrees with a
            /// brute-force per-rule predicate check (§4.2's algorithm is an
            /// optimization of this, not a different contract).
            #[test]
            fn intersection_matches_brute_force_predicate_check(
                rules in prop::collection::vec(non_wildcard_rule(), 0..15),
                alert_severity in field_strategy().prop_filter("not wildcard", |v| v != WILDCARD),
                alert_source in field_strategy().prop_filter("not wildcard", |v| v != WILDCARD),
                alert_name in field_strategy().prop_filter("not wildcard", |v| v != WILDCARD),
            ) {
                let severity = Severity::parse(&alert_severity);
                let built: Vec<Rule> = rules.iter().map(|(t, s, so, n)| rule(t, s, so, n)).collect();
                let snapshot = RuleSnapshot::build(built.clone(), 1).expect("filtered to non-wildcard");
                let alert = alert(severity, &alert_source, &alert_name);

                let matched = match_against(&snapshot, &alert);
                let matched_rule_ids: HashSet<RuleId> = matched.values().flatten().copied().collect();

                for built_rule in &built {
                    let expected = matches_literally(
                        (&built_rule.severity, &built_rule.source, &built_rule.name),
                        (alert_severity.as_str(), &alert_source, &alert_name),
                    );
                    prop_assert_eq!(matched_rule_ids.contains(&built_rule.rule_id), expected);
                }
            }
        }
    }
}
