// crates/alertpipe-logbus/src/memory.rs
// ============================================================================
// Module: In-Memory Log Bus
// Description: Single-process LogProducer/LogConsumer implementation backed
//              by per-topic partitioned vectors.
// Purpose: Let every stage's tests exercise real publish/poll/commit
//          sequences, including redelivery and partition locality, without a
//          broker dependency.
// Dependencies: async-trait, bytes, std::sync
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::ConsumedRecord;
use crate::LogConsumer;
use crate::LogError;
use crate::LogProducer;
use crate::Topic;

/// Default partition count per topic. Arbitrary for an in-memory fake; real
/// deployments size this per broker topic configuration.
const DEFAULT_PARTITIONS: u32 = 8;

#[derive(Default)]
struct PartitionState {
    records: Vec<ConsumedRecord>,
}

struct Inner {
    partitions: Mutex<HashMap<Topic, Vec<Mutex<PartitionState>>>>,
    committed: Mutex<HashMap<(Topic, String, u32), u64>>,
    partition_count: u32,
}

impl Inner {
    /// Ensures `topic` has an initialized partition set and returns a count
    /// derived from within that same locked section, so callers never need
    /// a second lookup against the map to reach the partitions they just
    /// guaranteed exist.
    fn with_partitions<T>(&self, topic: Topic, f: impl FnOnce(&[Mutex<PartitionState>]) -> T) -> T {
        let mut guard = self.partitions.lock().unwrap_or_else(|poison| poison.into_inner());
        let entry = guard
            .entry(topic)
            .or_insert_with(|| (0..self.partition_count).map(|_| Mutex::new(PartitionState::default())).collect());
        f(entry)
    }

    fn partition_of(&self, key: &str) -> u32 {
        let mut hash: u64 = 1469598103934665603; // FNV offset basis
        for byte in key.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(1099511628211); // FNV prime
        }
        (hash % u64::from(self.partition_count)) as u32
    }
}

/// An in-memory, single-process log bus. Clones share the same underlying
/// partitions; every clone is a valid [`LogProducer`] handle.
///
/// # Invariants
/// - A key always hashes to the same partition within one bus instance
///   (§5, "partition locality").
/// - Records within a partition are appended in publish order and never
///   reordered.
#[derive(Clone)]
pub struct InMemoryLogBus {
    inner: Arc<Inner>,
}

impl Default for InMemoryLogBus {
    fn default() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }
}

impl InMemoryLogBus {
    /// Creates a bus with the default partition count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bus with an explicit partition count per topic.
    #[must_use]
    pub fn with_partitions(partition_count: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: Mutex::new(HashMap::new()),
                committed: Mutex::new(HashMap::new()),
                partition_count: partition_count.max(1),
            }),
        }
    }

    /// Opens a consumer for `topic` under `group`. Distinct groups track
    /// offsets independently; the same group reused across consumers shares
    /// committed position (simulating a restarted process rather than a
    /// second live member, since this fake assigns every partition to the
    /// single consumer instance rather than balancing across a group).
    #[must_use]
    pub fn consumer(&self, topic: Topic, group: impl Into<String>) -> InMemoryLogConsumer {
        InMemoryLogConsumer {
            inner: Arc::clone(&self.inner),
            topic,
            group: group.into(),
            next_partition: 0,
        }
    }
}

#[async_trait]
impl LogProducer for InMemoryLogBus {
    async fn publish(&self, topic: Topic, key: &str, payload: Bytes) -> Result<(), LogError> {
        self.inner.with_partitions(topic, |partitions| {
            let partition = self.inner.partition_of(key) % partitions.len() as u32;
            let mut state = partitions[partition as usize]
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            let offset = state.records.len() as u64;
            state.records.push(ConsumedRecord {
                topic,
                partition,
                offset,
                key: key.to_string(),
                payload,
            });
            Ok(())
        })
    }
}

/// Consumer handle returned by [`InMemoryLogBus::consumer`].
pub struct InMemoryLogConsumer {
    inner: Arc<Inner>,
    topic: Topic,
    group: String,
    next_partition: u32,
}

#[async_trait]
impl LogConsumer for InMemoryLogConsumer {
    async fn poll(&mut self) -> Result<Option<ConsumedRecord>, LogError> {
        let partition_count = self.inner.with_partitions(self.topic, |partitions| partitions.len());
        if partition_count == 0 {
            return Ok(None);
        }

        for attempt in 0..partition_count {
            let partition = (self.next_partition as usize + attempt) % partition_count;
            let committed = {
                let committed_guard = self.inner.committed.lock().unwrap_or_else(|poison| poison.into_inner());
                committed_guard
                    .get(&(self.topic, self.group.clone(), partition as u32))
                    .copied()
                    .unwrap_or(0)
            };

            let record = self.inner.with_partitions(self.topic, |partitions| {
                let state = partitions[partition].lock().unwrap_or_else(|poison| poison.into_inner());
                state.records.get(committed as usize).cloned()
            });
            if let Some(record) = record {
                self.next_partition = (partition as u32 + 1) % partition_count as u32;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn commit(&mut self, record: &ConsumedRecord) -> Result<(), LogError> {
        let key = (record.topic, self.group.clone(), record.partition);
        let mut committed_guard = self.inner.committed.lock().unwrap_or_else(|poison| poison.into_inner());
        let expected = committed_guard.get(&key).copied().unwrap_or(0);
        if record.offset != expected {
            return Err(LogError::OutOfOrderCommit {
                attempted: record.offset,
                expected,
            });
        }
        committed_guard.insert(key, expected + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_key(key: &str) -> Bytes {
        Bytes::from(key.to_string().into_bytes())
    }

    #[tokio::test]
    async fn publish_then_poll_round_trips() {
        let bus = InMemoryLogBus::with_partitions(1);
        bus.publish(Topic::AlertsNew, "alert-1", record_with_key("alert-1"))
            .await
            .expect("publish succeeds");

        let mut consumer = bus.consumer(Topic::AlertsNew, "snapshot-builder");
        let record = consumer.poll().await.expect("poll succeeds").expect("record present");
        assert_eq!(record.key, "alert-1");
        assert_eq!(record.offset, 0);
    }

    #[tokio::test]
    async fn uncommitted_record_is_redelivered() {
        let bus = InMemoryLogBus::with_partitions(1);
        bus.publish(Topic::AlertsNew, "a", record_with_key("a")).await.expect("publish");

        let mut consumer = bus.consumer(Topic::AlertsNew, "matcher");
        let first = consumer.poll().await.expect("poll").expect("record");
        let second = consumer.poll().await.expect("poll").expect("record");
        assert_eq!(first.offset, second.offset);
    }

    #[tokio::test]
    async fn commit_advances_past_message() {
        let bus = InMemoryLogBus::with_partitions(1);
        bus.publish(Topic::AlertsNew, "a", record_with_key("a")).await.expect("publish");
        bus.publish(Topic::AlertsNew, "a", record_with_key("a")).await.expect("publish");

        let mut consumer = bus.consumer(Topic::AlertsNew, "matcher");
        let first = consumer.poll().await.expect("poll").expect("record");
        assert_eq!(first.offset, 0);
        consumer.commit(&first).await.expect("commit succeeds");

        let second = consumer.poll().await.expect("poll").expect("record");
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn out_of_order_commit_is_rejected() {
        let bus = InMemoryLogBus::with_partitions(1);
        bus.publish(Topic::AlertsNew, "a", record_with_key("a")).await.expect("publish");
        bus.publish(Topic::AlertsNew, "a", record_with_key("a")).await.expect("publish");

        let mut consumer = bus.consumer(Topic::AlertsNew, "matcher");
        let first = consumer.poll().await.expect("poll").expect("record");
        let second = ConsumedRecord { offset: first.offset + 1, ..first.clone() };
        let err = consumer.commit(&second).await.unwrap_err();
        assert!(matches!(err, LogError::OutOfOrderCommit { .. }));
    }

    #[tokio::test]
    async fn same_key_always_routes_to_the_same_partition() {
        let bus = InMemoryLogBus::with_partitions(8);
        bus.publish(Topic::AlertsNew, "tenant-a", record_with_key("1")).await.expect("publish");
        bus.publish(Topic::AlertsNew, "tenant-a", record_with_key("2")).await.expect("publish");

        let mut consumer = bus.consumer(Topic::AlertsNew, "g");
        let first = consumer.poll().await.expect("poll").expect("record");
        consumer.commit(&first).await.expect("commit");
        let second = consumer.poll().await.expect("poll").expect("record");
        assert_eq!(first.partition, second.partition);
    }

    #[tokio::test]
    async fn distinct_consumer_groups_track_offsets_independently() {
        let bus = InMemoryLogBus::with_partitions(1);
        bus.publish(Topic::AlertsNew, "a", record_with_key("a")).await.expect("publish");

        let mut group_one = bus.consumer(Topic::AlertsNew, "group-one");
        let record = group_one.poll().await.expect("poll").expect("record");
        group_one.commit(&record).await.expect("commit");
        assert!(group_one.poll().await.expect("poll").is_none());

        let mut group_two = bus.consumer(Topic::AlertsNew, "group-two");
        assert!(group_two.poll().await.expect("poll").is_some());
    }
}
