#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-dedup/src/lib.rs
// ============================================================================
// Module: Deduplicator
// Description: Consumes `alerts.matched`, persists each `(tenant_id,
//              alert_id)` notification intent exactly once, and emits a
//              readiness signal for the Dispatcher (§4.3).
// Purpose: Own the idempotency boundary for the whole pipeline: everything
//          upstream may redeliver freely, because this stage's insert is
//          the only place the "exactly once" guarantee is actually
//          enforced (as a database constraint, not in-process bookkeeping).
// Dependencies: alertpipe-config, alertpipe-core, alertpipe-logbus,
//               alertpipe-metrics, alertpipe-store, alertpipe-wire,
//               thiserror, tokio
// ============================================================================

//! ## Overview
//! The Deduplicator's insert outcome ([`InsertOutcome::Inserted`] or
//! [`InsertOutcome::AlreadyExists`]) is treated identically for the purpose
//! of committing the `alerts.matched` offset and emitting readiness: per
//! §4.3's resolved ordering caveat, readiness is published unconditionally
//! on both outcomes, and the Dispatcher's own idempotency gate (§4.4) is
//! what makes the resulting duplicate readiness events harmless. Only a
//! genuine database failure withholds the commit, so the log can redeliver.
//!
//! Readiness always carries [`InsertOutcome::notification_id`], not this
//! call's own freshly generated candidate id: on conflict those two ids
//! differ, and publishing the candidate's id would point the Dispatcher at
//! a row that was never written.

use std::sync::Arc;

use alertpipe_config::DeduplicatorConfig;
use alertpipe_core::MATCHED_ALERT_SCHEMA_VERSION;
use alertpipe_core::MatchedAlert;
use alertpipe_core::NotificationId;
use alertpipe_core::Notification;
use alertpipe_core::READINESS_SCHEMA_VERSION;
use alertpipe_core::ReadinessEvent;
use alertpipe_core::Timestamp;
use alertpipe_logbus::LogConsumer;
use alertpipe_logbus::LogError;
use alertpipe_logbus::LogProducer;
use alertpipe_logbus::Topic;
use alertpipe_metrics::AuditSink;
use alertpipe_metrics::CounterRegistry;
use alertpipe_metrics::PoisonMessageEvent;
use alertpipe_store::InsertOutcome;
use alertpipe_store::NotificationStore;
use alertpipe_store::StoreError;
use alertpipe_wire::RawEnvelope;
use alertpipe_wire::WireError;
use thiserror::Error;

/// Errors raised by the Deduplicator.
#[derive(Debug, Error)]
pub enum DeduplicatorError {
    /// Consuming or publishing to the log bus failed.
    #[error(transparent)]
    Log(#[from] LogError),
    /// The relational store failed at the transport level.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An outgoing envelope failed to encode.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// The Deduplicator service: one log consumer on `alerts.matched`, a
/// producer for `notifications.ready`, and the notification store the
/// insert-if-absent call lands in.
pub struct Deduplicator<C: LogConsumer> {
    notifications: Arc<dyn NotificationStore>,
    producer: Arc<dyn LogProducer>,
    consumer: C,
    audit: Arc<dyn AuditSink>,
    counters: Arc<CounterRegistry>,
    config: DeduplicatorConfig,
}

impl<C: LogConsumer> Deduplicator<C> {
    /// Builds a Deduplicator.
    #[must_use]
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        producer: Arc<dyn LogProducer>,
        consumer: C,
        audit: Arc<dyn AuditSink>,
        counters: Arc<CounterRegistry>,
        config: DeduplicatorConfig,
    ) -> Self {
        Self { notifications, producer, consumer, audit, counters, config }
    }

    /// Runs the consume loop forever, processing up to
    /// `config.batch_size` records between yields.
    ///
    /// # Errors
    /// Returns [`DeduplicatorError`] on a transport failure.
    pub async fn run(&mut self) -> Result<(), DeduplicatorError> {
        loop {
            self.process_batch().await?;
        }
    }

    /// Processes up to `config.batch_size` records, or until the topic is
    /// caught up, whichever comes first.
    ///
    /// # Errors
    /// Returns [`DeduplicatorError`] on a transport or store failure.
    pub async fn process_batch(&mut self) -> Result<usize, DeduplicatorError> {
        let mut processed = 0;
        while processed < self.config.batch_size {
            if !self.process_next().await? {
                break;
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// Processes a single `alerts.matched` record, if any is available.
    /// Returns `true` if a record was processed.
    ///
    /// # Errors
    /// Returns [`DeduplicatorError`] if the insert or the readiness
    /// publish fails at the transport level; the originating offset is
    /// then deliberately left uncommitted so the log redelivers.
    pub async fn process_next(&mut self) -> Result<bool, DeduplicatorError> {
        let Some(record) = self.consumer.poll().await? else {
            return Ok(false);
        };

        let matched = match RawEnvelope::parse(&record.payload).and_then(|raw| raw.decode::<MatchedAlert>(MATCHED_ALERT_SCHEMA_VERSION)) {
            Ok(matched) => matched,
            Err(error) => {
                self.audit.record_poison_message(&PoisonMessageEvent::new("deduplicator", "alerts.matched", error.to_string()));
                self.counters.increment("poison_messages_total", 1);
                self.consumer.commit(&record).await?;
                return Ok(true);
            }
        };

        let now = Timestamp::new(current_time());
        let notification = match Notification::new_received(
            NotificationId::generate(),
            matched.tenant_id.clone(),
            &matched.alert,
            matched.matched_rule_ids.clone(),
            now,
        ) {
            Ok(notification) => notification,
            Err(error) => {
                self.audit.record_poison_message(&PoisonMessageEvent::new("deduplicator", "alerts.matched", error.to_string()));
                self.counters.increment("poison_messages_total", 1);
                self.consumer.commit(&record).await?;
                return Ok(true);
            }
        };

        let outcome = self.notifications.insert_if_absent(&notification).await?;
        self.counters.increment(
            match outcome {
                InsertOutcome::Inserted(_) => "notifications_inserted_total",
                InsertOutcome::AlreadyExists(_) => "notifications_deduplicated_total",
            },
            1,
        );

        // On conflict, `outcome` carries the id of the row that actually
        // landed, which may not be `notification.notification_id` (this
        // call's own, freshly generated candidate). Readiness must point at
        // the persisted row or the Dispatcher can never find it (§4.3).
        let readiness = ReadinessEvent {
            notification_id: outcome.notification_id(),
            tenant_id: notification.tenant_id.clone(),
            alert_id: notification.alert_id,
            schema_version: READINESS_SCHEMA_VERSION,
        };
        let payload = RawEnvelope::encode(READINESS_SCHEMA_VERSION, &readiness)?;
        self.producer.publish(Topic::NotificationsReady, &notification.tenant_id.to_string(), payload).await?;

        self.consumer.commit(&record).await?;
        Ok(true)
    }
}

fn current_time() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertpipe_core::Alert;
    use alertpipe_core::RuleId;
    use alertpipe_core::Severity;
    use alertpipe_core::TenantId;
    use alertpipe_logbus::InMemoryLogBus;
    use alertpipe_logbus::LogProducer;
    use alertpipe_metrics::NoopAuditSink;
    use alertpipe_store::NotificationStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeNotificationStore {
        rows: Mutex<HashMap<(String, Uuid), Notification>>,
    }

    #[async_trait]
    impl NotificationStore for FakeNotificationStore {
        async fn insert_if_absent(&self, notification: &Notification) -> Result<InsertOutcome, StoreError> {
            let key = (notification.tenant_id.0.clone(), notification.alert_id.0);
            let mut rows = self.rows.lock().expect("lock");
            if let Some(existing) = rows.get(&key) {
                return Ok(InsertOutcome::AlreadyExists(existing.notification_id));
            }
            let id = notification.notification_id;
            rows.insert(key, notification.clone());
            Ok(InsertOutcome::Inserted(id))
        }

        async fn get_notification(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
            Ok(self.rows.lock().expect("lock").values().find(|n| n.notification_id == id).cloned())
        }

        async fn update_status(
            &self,
            _id: NotificationId,
            _status: alertpipe_core::NotificationStatus,
            _at: Timestamp,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn matched_alert(tenant: &str, alert_id: Uuid) -> MatchedAlert {
        MatchedAlert {
            tenant_id: TenantId::from(tenant),
            alert: Alert {
                alert_id: alertpipe_core::AlertId(alert_id),
                schema_version: 1,
                event_ts: Timestamp::new(time::OffsetDateTime::now_utc()),
                severity: Severity::High,
                source: "api".to_string(),
                name: "timeout".to_string(),
                context: BTreeMap::new(),
            },
            matched_rule_ids: vec![RuleId(Uuid::new_v4())],
            schema_version: MATCHED_ALERT_SCHEMA_VERSION,
        }
    }

    async fn dedup_with() -> (Deduplicator<alertpipe_logbus::InMemoryLogConsumer>, Arc<InMemoryLogBus>) {
        let store: Arc<dyn NotificationStore> = Arc::new(FakeNotificationStore::default());
        let bus = Arc::new(InMemoryLogBus::new());
        let consumer = bus.consumer(Topic::AlertsMatched, "deduplicator".into());
        let dedup = Deduplicator::new(
            store,
            bus.clone(),
            consumer,
            Arc::new(NoopAuditSink),
            Arc::new(CounterRegistry::new()),
            DeduplicatorConfig::default(),
        );
        (dedup, bus)
    }

    #[tokio::test]
    async fn first_delivery_inserts_and_emits_readiness() {
        let (mut dedup, bus) = dedup_with().await;
        let alert_id = Uuid::new_v4();
        let payload = RawEnvelope::encode(MATCHED_ALERT_SCHEMA_VERSION, &matched_alert("tenant-a", alert_id)).expect("encode");
        bus.publish(Topic::AlertsMatched, "tenant-a", payload).await.expect("publish");

        let mut ready = bus.consumer(Topic::NotificationsReady, "test-reader".into());
        assert!(dedup.process_next().await.expect("process"));

        let record = ready.poll().await.expect("poll").expect("present");
        assert_eq!(record.key, "tenant-a");
        assert_eq!(dedup.counters.totals_snapshot().get("notifications_inserted_total"), Some(&1));
    }

    #[tokio::test]
    async fn redelivered_match_still_emits_readiness_on_conflict() {
        let (mut dedup, bus) = dedup_with().await;
        let alert_id = Uuid::new_v4();
        let event = matched_alert("tenant-a", alert_id);

        for _ in 0..2 {
            let payload = RawEnvelope::encode(MATCHED_ALERT_SCHEMA_VERSION, &event).expect("encode");
            bus.publish(Topic::AlertsMatched, "tenant-a", payload).await.expect("publish");
        }

        let mut ready = bus.consumer(Topic::NotificationsReady, "test-reader".into());
        dedup.process_next().await.expect("first");
        dedup.process_next().await.expect("second");

        let first_record = ready.poll().await.expect("poll").expect("present");
        let second_record = ready.poll().await.expect("poll").expect("present");
        let first_event: ReadinessEvent =
            RawEnvelope::parse(&first_record.payload).expect("parse").decode(READINESS_SCHEMA_VERSION).expect("decode");
        let second_event: ReadinessEvent =
            RawEnvelope::parse(&second_record.payload).expect("parse").decode(READINESS_SCHEMA_VERSION).expect("decode");
        // The redelivered attempt's readiness must point at the row that
        // actually landed, not a fresh id it generated locally — otherwise
        // the Dispatcher can never find the notification it is for.
        assert_eq!(first_event.notification_id, second_event.notification_id);
        assert_eq!(dedup.counters.totals_snapshot().get("notifications_deduplicated_total"), Some(&1));
    }

    #[tokio::test]
    async fn poison_message_is_committed_and_counted() {
        let (mut dedup, bus) = dedup_with().await;
        bus.publish(Topic::AlertsMatched, "bad", bytes::Bytes::from_static(b"garbage")).await.expect("publish");
        assert!(dedup.process_next().await.expect("process handles poison gracefully"));
        assert_eq!(dedup.counters.totals_snapshot().get("poison_messages_total"), Some(&1));
    }

    #[tokio::test]
    async fn empty_matched_rule_ids_is_treated_as_poison_not_a_panic() {
        let (mut dedup, bus) = dedup_with().await;
        let mut event = matched_alert("tenant-a", Uuid::new_v4());
        event.matched_rule_ids = Vec::new();
        let payload = RawEnvelope::encode(MATCHED_ALERT_SCHEMA_VERSION, &event).expect("encode");
        bus.publish(Topic::AlertsMatched, "tenant-a", payload).await.expect("publish");

        assert!(dedup.process_next().await.expect("process handles empty rule ids gracefully"));
        assert_eq!(dedup.counters.totals_snapshot().get("poison_messages_total"), Some(&1));
    }
}
