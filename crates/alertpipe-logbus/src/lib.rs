#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-logbus/src/lib.rs
// ============================================================================
// Module: Log Bus
// Description: Producer/consumer traits over the partitioned log, plus an
//              in-memory implementation.
// Purpose: Give every stage one abstraction for "publish a keyed record to
//          a topic" / "consume a topic as a named consumer group, offsets
//          committed explicitly" so each stage's core logic is testable
//          without a real broker.
// Dependencies: alertpipe-wire, async-trait, bytes, thiserror, tokio
// ============================================================================

//! ## Overview
//! [`Topic`] enumerates the four topics from §6. [`LogProducer`] and
//! [`LogConsumer`] are the seam every stage programs against; the only
//! implementation in this crate is [`InMemoryLogBus`], used by every other
//! crate's integration tests. A production deployment backs the same
//! traits with a real broker client; that adapter lives outside this
//! workspace's scope (this crate does not assume Kafka, Redpanda, or
//! Pulsar specifically).
//!
//! Invariants:
//! - Within one partition, records are delivered to a consumer in the order
//!   they were published (§5, "per-partition offset-order consumption").
//! - A record is redelivered on the next `poll` until its consumer group
//!   calls [`LogConsumer::commit`] for it — this is what "at-least-once"
//!   means operationally in this crate.

mod memory;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use memory::InMemoryLogBus;
pub use memory::InMemoryLogConsumer;

/// The four topics named in §6, plus their routing key field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Producer-emitted alerts, keyed by `alert_id`.
    AlertsNew,
    /// CRUD-emitted rule changes, keyed by `rule_id`.
    RuleChanged,
    /// Matcher output, keyed by `tenant_id`.
    AlertsMatched,
    /// Deduplicator output, keyed by `tenant_id`.
    NotificationsReady,
}

impl Topic {
    /// Stable topic name, used for broker addressing and for the
    /// `metrics:<service>` KV key prefix's human-readable labels.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AlertsNew => "alerts.new",
            Self::RuleChanged => "rule.changed",
            Self::AlertsMatched => "alerts.matched",
            Self::NotificationsReady => "notifications.ready",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named consumer group. Each stage runs under its own fixed group name
/// so offsets are tracked independently per stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerGroup(pub String);

impl From<&str> for ConsumerGroup {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A record as delivered to a consumer: routing metadata plus the raw
/// envelope bytes from [`alertpipe_wire::RawEnvelope::encode`].
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    /// Topic the record was published to.
    pub topic: Topic,
    /// Partition the record landed in.
    pub partition: u32,
    /// Offset within that partition.
    pub offset: u64,
    /// Routing key as published.
    pub key: String,
    /// Raw envelope bytes; decode with [`alertpipe_wire::RawEnvelope`].
    pub payload: Bytes,
}

/// Errors raised by the log bus.
#[derive(Debug, Error)]
pub enum LogError {
    /// The broker connection/channel is unavailable. Transient; callers
    /// should refuse to commit and allow redelivery.
    #[error("log broker unavailable: {0}")]
    Unavailable(String),
    /// A commit was attempted for an offset that does not match the
    /// consumer's current position (out-of-order commit).
    #[error("commit offset {attempted} does not match expected offset {expected}")]
    OutOfOrderCommit {
        /// Offset the caller attempted to commit.
        attempted: u64,
        /// Offset the bus expected next.
        expected: u64,
    },
}

/// Publishes keyed records to a topic.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Publishes `payload` to `topic` under `key`. Returns once the broker
    /// has durably accepted the record.
    ///
    /// # Errors
    /// Returns [`LogError::Unavailable`] on a transient broker failure.
    async fn publish(&self, topic: Topic, key: &str, payload: Bytes) -> Result<(), LogError>;
}

/// Consumes one topic as one consumer group, with explicit offset commits.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Returns the next undelivered-or-uncommitted record, or `None` if the
    /// topic is caught up. A record already returned by a prior `poll` and
    /// not yet committed is returned again (redelivery).
    ///
    /// # Errors
    /// Returns [`LogError::Unavailable`] on a transient broker failure.
    async fn poll(&mut self) -> Result<Option<ConsumedRecord>, LogError>;

    /// Commits `record`, advancing this consumer group's position past it.
    /// Must be called with records in the order they were polled.
    ///
    /// # Errors
    /// Returns [`LogError::OutOfOrderCommit`] if `record` is not the next
    /// expected offset for its partition, or [`LogError::Unavailable`] on a
    /// transient broker failure.
    async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), LogError>;
}
