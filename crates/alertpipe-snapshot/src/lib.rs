#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-snapshot/src/lib.rs
// ============================================================================
// Module: Snapshot Builder
// Description: Maintains the versioned rule index published to the KV
//              store, consuming `rule.changed` and kept current by either
//              incremental updates or a full rebuild.
// Purpose: Implement §4.1 end to end: cold start, the incremental/
//          full-rebuild strategy choice, the singleton-writer posture, and
//          the "never serve a half-written snapshot" publish invariant.
// Dependencies: alertpipe-config, alertpipe-core, alertpipe-kv,
//               alertpipe-logbus, alertpipe-metrics, alertpipe-store,
//               alertpipe-wire, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! Only one [`SnapshotBuilder`] instance may run against a given KV store
//! at a time (§4.1, "Singleton-writer invariant"); this crate performs no
//! locking of its own; that guarantee is an operational/deployment
//! constraint. The snapshot blob is published with a single
//! [`alertpipe_kv::KvStore::compare_and_swap`] call, which is what makes
//! "readers see the old snapshot or the new one, never a partial write"
//! true without any cross-key transaction: the blob is one value.
//!
//! `rules:version` (published via an unconditional [`alertpipe_kv::KvStore::put`]
//! right after the blob CAS succeeds) is a cheap-poll convenience for the
//! Matcher: it lets the background refresh task check "did anything
//! change" without re-fetching and re-parsing the full blob every tick. The
//! snapshot blob's own embedded `version` field is the one callers must
//! trust for correctness; the separate version key can lag by the width of
//! one `put` call and that is fine, since the Matcher always follows it up
//! with a full re-read of the blob before swapping anything in.

use std::sync::Arc;

use alertpipe_config::SnapshotBuilderConfig;
use alertpipe_core::Rule;
use alertpipe_core::RuleChangeAction;
use alertpipe_core::RuleChangeEvent;
use alertpipe_core::RuleSnapshot;
use alertpipe_core::snapshot::SnapshotError;
use alertpipe_kv::CounterStore;
use alertpipe_kv::KvError;
use alertpipe_kv::KvStore;
use alertpipe_logbus::LogConsumer;
use alertpipe_logbus::LogError;
use alertpipe_metrics::AuditSink;
use alertpipe_metrics::CounterRegistry;
use alertpipe_metrics::PoisonMessageEvent;
use alertpipe_metrics::SnapshotPublishEvent;
use alertpipe_store::RuleStore;
use alertpipe_store::StoreError;
use alertpipe_wire::RawEnvelope;
use alertpipe_wire::WireError;
use thiserror::Error;

/// Wire schema version this builder's snapshot publications claim. Bumped
/// only when the blob shape changes (§6).
const PUBLISHED_SCHEMA_VERSION: u16 = 1;

/// Cheap-poll key holding the snapshot's domain version as an ASCII
/// integer. See the module overview for why this is separate from the
/// blob's own embedded version.
pub const VERSION_KV_KEY: &str = "rules:version";

/// Errors raised while building or maintaining the snapshot.
#[derive(Debug, Error)]
pub enum SnapshotBuilderError {
    /// The relational store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The KV store failed.
    #[error(transparent)]
    Kv(#[from] KvError),
    /// The log bus failed.
    #[error(transparent)]
    Log(#[from] LogError),
    /// A `rule.changed` envelope failed to decode. Treated as a poison
    /// message: logged, counted, and the offset is committed so it does
    /// not block the partition forever.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The in-memory snapshot mutation violated an invariant.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    /// A published snapshot blob failed to decode back. Callers fall back
    /// to a full rebuild rather than propagate this.
    #[error("snapshot blob decode failed: {0}")]
    BlobDecode(String),
    /// The blob CAS lost a race against another writer, which should never
    /// happen under the singleton-writer invariant; surfaced rather than
    /// silently retried so an operator notices a misconfigured deployment.
    #[error("snapshot publish lost a compare-and-swap race at expected version {expected:?}")]
    ConcurrentWriter {
        /// The version this writer expected to be current.
        expected: Option<u64>,
    },
}

/// Maintains the rule snapshot for one KV store, consuming `rule.changed`.
pub struct SnapshotBuilder<C: LogConsumer> {
    rule_store: Arc<dyn RuleStore>,
    kv: Arc<dyn KvStore>,
    counter_store: Arc<dyn CounterStore>,
    consumer: C,
    audit: Arc<dyn AuditSink>,
    counters: Arc<CounterRegistry>,
    config: SnapshotBuilderConfig,
    consecutive_incremental_failures: u32,
}

impl<C: LogConsumer> SnapshotBuilder<C> {
    /// Builds a Snapshot Builder reading rules from `rule_store`,
    /// publishing to `kv`, and consuming `rule.changed` through `consumer`.
    #[must_use]
    pub fn new(
        rule_store: Arc<dyn RuleStore>,
        kv: Arc<dyn KvStore>,
        counter_store: Arc<dyn CounterStore>,
        consumer: C,
        audit: Arc<dyn AuditSink>,
        counters: Arc<CounterRegistry>,
        config: SnapshotBuilderConfig,
    ) -> Self {
        Self {
            rule_store,
            kv,
            counter_store,
            consumer,
            audit,
            counters,
            config,
            consecutive_incremental_failures: 0,
        }
    }

    /// Runs cold start (if needed) followed by the consume loop forever.
    /// Callers that want a bounded run should drive [`SnapshotBuilder::cold_start`]
    /// and [`SnapshotBuilder::process_next`] directly instead (tests do).
    ///
    /// # Errors
    /// Returns an error only for failures cold start cannot recover from;
    /// the steady-state loop logs and continues past per-event failures.
    pub async fn run(&mut self) -> Result<(), SnapshotBuilderError> {
        self.cold_start().await?;
        loop {
            self.process_next().await?;
        }
    }

    /// If no snapshot exists yet, performs the cold-start full rebuild
    /// (§4.1, "Cold start"). A no-op otherwise.
    ///
    /// # Errors
    /// Propagates relational or KV failures.
    pub async fn cold_start(&mut self) -> Result<(), SnapshotBuilderError> {
        if self.kv.get(&self.config.snapshot_kv_key).await?.is_some() {
            return Ok(());
        }
        self.full_rebuild().await?;
        Ok(())
    }

    /// Polls the consumer for one record and processes it, or returns
    /// `Ok(())` immediately if none is available yet. Exposed separately
    /// from [`SnapshotBuilder::run`] so tests can drive one event at a
    /// time.
    ///
    /// # Errors
    /// Propagates log, relational, or KV failures that are not recoverable
    /// by falling back to a full rebuild.
    pub async fn process_next(&mut self) -> Result<(), SnapshotBuilderError> {
        let Some(record) = self.consumer.poll().await? else {
            return Ok(());
        };

        let event = match RawEnvelope::parse(&record.payload).and_then(|raw| raw.decode::<RuleChangeEvent>(PUBLISHED_SCHEMA_VERSION)) {
            Ok(event) => event,
            Err(error) => {
                self.audit.record_poison_message(&PoisonMessageEvent::new(
                    "snapshot-builder",
                    "rule.changed",
                    error.to_string(),
                ));
                self.counters.increment("poison_messages_total", 1);
                self.consumer.commit(&record).await?;
                return Ok(());
            }
        };

        if self.consecutive_incremental_failures >= self.config.max_incremental_failures_before_rebuild {
            self.full_rebuild().await?;
            self.consecutive_incremental_failures = 0;
        }

        match self.apply_incremental(&event).await {
            Ok(()) => {
                self.consecutive_incremental_failures = 0;
                self.consumer.commit(&record).await?;
            }
            Err(SnapshotBuilderError::BlobDecode(_)) => {
                self.full_rebuild().await?;
                self.consecutive_incremental_failures = 0;
                self.consumer.commit(&record).await?;
            }
            Err(SnapshotBuilderError::Kv(error)) => {
                // KV write failed: do not commit, let the log redeliver (§4.1, "Failures").
                return Err(SnapshotBuilderError::Kv(error));
            }
            Err(error) => {
                self.consecutive_incremental_failures += 1;
                return Err(error);
            }
        }

        Ok(())
    }

    /// Applies one `rule.changed` event to the current snapshot and
    /// publishes the result.
    async fn apply_incremental(&mut self, event: &RuleChangeEvent) -> Result<(), SnapshotBuilderError> {
        let current = self.kv.get(&self.config.snapshot_kv_key).await?;
        let Some(current) = current else {
            return self.full_rebuild().await;
        };

        let mut snapshot: RuleSnapshot = serde_json::from_slice(&current.value).map_err(|error| SnapshotBuilderError::BlobDecode(error.to_string()))?;
        snapshot.rebuild_reverse_indexes();

        if event.action.requires_fetch() {
            match self.rule_store.get_rule(event.rule_id).await? {
                Some(rule) if rule.enabled => snapshot.upsert_rule(&rule)?,
                _ => snapshot.remove_rule(event.rule_id),
            }
        } else {
            snapshot.remove_rule(event.rule_id);
        }
        snapshot.version += 1;

        self.publish(snapshot, Some(current.version)).await
    }

    /// Rebuilds the snapshot from scratch from every enabled rule in the
    /// relational store and publishes it (§4.1, "Full rebuild").
    ///
    /// # Errors
    /// Propagates relational or KV failures.
    pub async fn full_rebuild(&mut self) -> Result<(), SnapshotBuilderError> {
        let rules: Vec<Rule> = self.rule_store.list_enabled_rules().await?;
        let current = self.kv.get(&self.config.snapshot_kv_key).await?;
        let next_domain_version = current
            .as_ref()
            .and_then(|entry| serde_json::from_slice::<RuleSnapshot>(&entry.value).ok())
            .map_or(1, |snapshot| snapshot.version + 1);
        let snapshot = RuleSnapshot::build(rules, next_domain_version)?;
        let expected = current.map(|entry| entry.version);
        self.publish(snapshot, expected).await
    }

    async fn publish(&self, snapshot: RuleSnapshot, expected_kv_version: Option<u64>) -> Result<(), SnapshotBuilderError> {
        let rule_count = snapshot.rules.len();
        let version = snapshot.version;
        let bytes = serde_json::to_vec(&snapshot).map_err(|error| SnapshotBuilderError::BlobDecode(error.to_string()))?;

        let swapped = self
            .kv
            .compare_and_swap(&self.config.snapshot_kv_key, expected_kv_version, bytes.into())
            .await?;
        if !swapped {
            return Err(SnapshotBuilderError::ConcurrentWriter { expected: expected_kv_version });
        }

        self.kv.put(VERSION_KV_KEY, version.to_string().into_bytes().into()).await?;
        self.counter_store.increment("snapshot-builder", "snapshots_published_total", 1).await.ok();
        self.counters.increment("snapshots_published_total", 1);
        self.audit.record_snapshot_publish(&SnapshotPublishEvent::new(version, "incremental_or_rebuild", rule_count));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertpipe_core::RuleId;
    use alertpipe_core::TenantId;
    use alertpipe_core::Timestamp;
    use alertpipe_kv::InMemoryKv;
    use alertpipe_logbus::InMemoryLogBus;
    use alertpipe_logbus::LogProducer;
    use alertpipe_logbus::Topic;
    use alertpipe_metrics::NoopAuditSink;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeRuleStore {
        rules: Mutex<HashMap<RuleId, Rule>>,
    }

    #[async_trait]
    impl RuleStore for FakeRuleStore {
        async fn get_rule(&self, rule_id: RuleId) -> Result<Option<Rule>, StoreError> {
            Ok(self.rules.lock().expect("lock").get(&rule_id).cloned())
        }

        async fn list_enabled_rules(&self) -> Result<Vec<Rule>, StoreError> {
            Ok(self.rules.lock().expect("lock").values().filter(|r| r.enabled).cloned().collect())
        }
    }

    fn rule(enabled: bool) -> Rule {
        Rule::new(
            RuleId(Uuid::new_v4()),
            TenantId::from("tenant-a"),
            "HIGH".to_string(),
            "api".to_string(),
            "timeout".to_string(),
            enabled,
            1,
        )
        .expect("valid predicate")
    }

    async fn builder_with(
        rules: Vec<Rule>,
    ) -> (SnapshotBuilder<alertpipe_logbus::InMemoryLogConsumer>, Arc<InMemoryKv>, Arc<InMemoryLogBus>) {
        let store: HashMap<RuleId, Rule> = rules.into_iter().map(|r| (r.rule_id, r)).collect();
        let rule_store = Arc::new(FakeRuleStore { rules: Mutex::new(store) });
        let kv = Arc::new(InMemoryKv::new());
        let bus = Arc::new(InMemoryLogBus::new());
        let consumer = bus.consumer(Topic::RuleChanged, "snapshot-builder".into());
        let builder = SnapshotBuilder::new(
            rule_store,
            kv.clone(),
            kv.clone(),
            consumer,
            Arc::new(NoopAuditSink),
            Arc::new(CounterRegistry::new()),
            SnapshotBuilderConfig::default(),
        );
        (builder, kv, bus)
    }

    #[tokio::test]
    async fn cold_start_publishes_full_snapshot_from_enabled_rules() {
        let (mut builder, kv, _bus) = builder_with(vec![rule(true), rule(false)]).await;
        builder.cold_start().await.expect("cold start");

        let published = kv.get("rules:snapshot").await.expect("get").expect("present");
        let snapshot: RuleSnapshot = serde_json::from_slice(&published.value).expect("decode");
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.rules.len(), 1);

        let version_key = kv.get(VERSION_KV_KEY).await.expect("get").expect("present");
        assert_eq!(version_key.value.as_ref(), b"1");
    }

    #[tokio::test]
    async fn cold_start_is_a_noop_if_snapshot_already_exists() {
        let (mut builder, kv, _bus) = builder_with(vec![rule(true)]).await;
        builder.cold_start().await.expect("cold start");
        let first = kv.get("rules:snapshot").await.expect("get").expect("present").version;
        builder.cold_start().await.expect("second cold start is a no-op");
        let second = kv.get("rules:snapshot").await.expect("get").expect("present").version;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn incremental_created_event_adds_rule_to_snapshot() {
        let fresh = rule(true);
        let (mut builder, kv, bus) = builder_with(vec![]).await;
        builder.cold_start().await.expect("cold start");

        builder.rule_store = Arc::new(FakeRuleStore {
            rules: Mutex::new(HashMap::from([(fresh.rule_id, fresh.clone())])),
        });

        let event = RuleChangeEvent {
            rule_id: fresh.rule_id,
            tenant_id: fresh.tenant_id.clone(),
            action: RuleChangeAction::Created,
            version: 1,
            updated_at: Timestamp::new(time::OffsetDateTime::now_utc()),
            schema_version: 1,
        };
        let payload = RawEnvelope::encode(1, &event).expect("encode");
        bus.publish(Topic::RuleChanged, &fresh.rule_id.to_string(), payload).await.expect("publish");

        builder.process_next().await.expect("process");

        let published = kv.get("rules:snapshot").await.expect("get").expect("present");
        let snapshot: RuleSnapshot = serde_json::from_slice(&published.value).expect("decode");
        assert_eq!(snapshot.rules.len(), 1);
        assert_eq!(snapshot.version, 2);
    }

    #[tokio::test]
    async fn poison_event_is_committed_and_counted_without_mutating_snapshot() {
        let (mut builder, kv, bus) = builder_with(vec![rule(true)]).await;
        builder.cold_start().await.expect("cold start");
        let before = kv.get("rules:snapshot").await.expect("get").expect("present").version;

        bus.publish(Topic::RuleChanged, "bad", bytes::Bytes::from_static(b"not an envelope")).await.expect("publish");
        builder.process_next().await.expect("process handles poison gracefully");

        let after = kv.get("rules:snapshot").await.expect("get").expect("present").version;
        assert_eq!(before, after);
    }
}
