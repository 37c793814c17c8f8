#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-matcher/src/lib.rs
// ============================================================================
// Module: Matcher
// Description: Consumes `alerts.new`, matches each alert against the
//              installed rule snapshot, and emits one matched-record per
//              tenant to `alerts.matched` (§4.2).
// Purpose: The pipeline's second stage: turn an opaque alert into the set
//          of tenants who should be notified, without knowing anything
//          about deduplication, persistence, or delivery.
// Dependencies: alertpipe-config, alertpipe-core, alertpipe-kv,
//               alertpipe-logbus, alertpipe-metrics, alertpipe-snapshot,
//               alertpipe-wire, arc-swap, serde_json, thiserror, tokio
// ============================================================================

//! ## Overview
//! Warm start blocks `alerts.new` consumption until a snapshot has been
//! installed at least once ([`Matcher::warm_start`]); once running, a
//! background task ([`refresh::spawn_refresh_task`]) keeps the installed
//! snapshot current by polling the cheap version counter the Snapshot
//! Builder writes, so the hot path ([`index::match_against`]) never does KV
//! I/O. This crate is lib-only: the `alertpipe-cli` binary owns process
//! wiring (reading config, constructing the KV/log-bus/store clients,
//! choosing when to run this stage).

pub mod index;
pub mod refresh;

use std::sync::Arc;
use std::time::Duration;

use alertpipe_config::MatcherConfig;
use alertpipe_core::ALERT_SCHEMA_VERSION;
use alertpipe_core::Alert;
use alertpipe_core::MATCHED_ALERT_SCHEMA_VERSION;
use alertpipe_core::MatchedAlert;
use alertpipe_kv::KvError;
use alertpipe_kv::KvStore;
use alertpipe_logbus::LogConsumer;
use alertpipe_logbus::LogError;
use alertpipe_logbus::LogProducer;
use alertpipe_logbus::Topic;
use alertpipe_metrics::AuditSink;
use alertpipe_metrics::CounterRegistry;
use alertpipe_metrics::PoisonMessageEvent;
use alertpipe_wire::RawEnvelope;
use alertpipe_wire::WireError;
use thiserror::Error;

pub use index::SnapshotHandle;

/// Errors raised by the Matcher.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// Consuming or publishing to the log bus failed.
    #[error(transparent)]
    Log(#[from] LogError),
    /// The KV store failed at the transport level.
    #[error(transparent)]
    Kv(#[from] KvError),
    /// An outgoing envelope failed to encode.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// Warm start exhausted its bounded retries without a snapshot
    /// appearing in the KV store.
    #[error("no snapshot available after {attempts} warm-start attempts")]
    WarmStartExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// The Matcher service: one log consumer on `alerts.new`, a producer for
/// `alerts.matched`, and the snapshot handle the background refresh task
/// also writes to.
pub struct Matcher<C: LogConsumer> {
    kv: Arc<dyn KvStore>,
    producer: Arc<dyn LogProducer>,
    consumer: C,
    handle: Arc<SnapshotHandle>,
    audit: Arc<dyn AuditSink>,
    counters: Arc<CounterRegistry>,
    config: MatcherConfig,
}

impl<C: LogConsumer> Matcher<C> {
    /// Builds a Matcher with an empty (version-0) snapshot installed; call
    /// [`Matcher::warm_start`] before consuming `alerts.new`.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        producer: Arc<dyn LogProducer>,
        consumer: C,
        audit: Arc<dyn AuditSink>,
        counters: Arc<CounterRegistry>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            kv,
            producer,
            consumer,
            handle: Arc::new(SnapshotHandle::default()),
            audit,
            counters,
            config,
        }
    }

    /// Returns the snapshot handle, shared with [`refresh::spawn_refresh_task`].
    #[must_use]
    pub fn snapshot_handle(&self) -> Arc<SnapshotHandle> {
        Arc::clone(&self.handle)
    }

    /// Blocks, with bounded retries, until a snapshot has been installed.
    ///
    /// # Errors
    /// Returns [`MatcherError::WarmStartExhausted`] if no snapshot appears
    /// within `config.warm_start_max_attempts` tries.
    pub async fn warm_start(&self) -> Result<(), MatcherError> {
        for attempt in 0..self.config.warm_start_max_attempts {
            match refresh::load_snapshot(self.kv.as_ref(), &self.config.snapshot_kv_key).await {
                Ok(snapshot) => {
                    self.handle.swap(snapshot);
                    return Ok(());
                }
                Err(_) if attempt + 1 < self.config.warm_start_max_attempts => {
                    tokio::time::sleep(Duration::from_millis(self.config.warm_start_retry_delay_ms)).await;
                }
                Err(_) => {}
            }
        }
        Err(MatcherError::WarmStartExhausted { attempts: self.config.warm_start_max_attempts })
    }

    /// Runs the consume loop forever. Callers typically also spawn
    /// [`refresh::spawn_refresh_task`] alongside this.
    ///
    /// # Errors
    /// Returns [`MatcherError`] on a transport failure from the log bus or
    /// KV store.
    pub async fn run(&mut self) -> Result<(), MatcherError> {
        loop {
            self.process_next().await?;
        }
    }

    /// Processes a single `alerts.new` record, if any is available.
    ///
    /// # Errors
    /// Returns [`MatcherError`] if publishing a matched-record fails (the
    /// originating offset is then deliberately left uncommitted) or if the
    /// log bus itself is unavailable.
    pub async fn process_next(&mut self) -> Result<(), MatcherError> {
        let Some(record) = self.consumer.poll().await? else {
            return Ok(());
        };

        let alert = match RawEnvelope::parse(&record.payload).and_then(|raw| raw.decode::<Alert>(ALERT_SCHEMA_VERSION)) {
            Ok(alert) => alert,
            Err(error) => {
                self.audit.record_poison_message(&PoisonMessageEvent::new("matcher", "alerts.new", error.to_string()));
                self.counters.increment("poison_messages_total", 1);
                self.consumer.commit(&record).await?;
                return Ok(());
            }
        };

        let matches = self.handle.match_alert(&alert);
        for (tenant_id, matched_rule_ids) in &matches {
            let matched = MatchedAlert {
                tenant_id: tenant_id.clone(),
                alert: alert.clone(),
                matched_rule_ids: matched_rule_ids.clone(),
                schema_version: MATCHED_ALERT_SCHEMA_VERSION,
            };
            let payload = RawEnvelope::encode(MATCHED_ALERT_SCHEMA_VERSION, &matched)?;
            self.producer.publish(Topic::AlertsMatched, &tenant_id.to_string(), payload).await?;
        }

        self.counters.increment("alerts_matched_total", matches.len() as i64);
        self.consumer.commit(&record).await?;
        Ok(())
    }
}
