// crates/alertpipe-metrics/src/counters.rs
// ============================================================================
// Module: Counter Registry
// Description: Process-local counters and the periodic flush task that
//              pushes them to the KV counter store.
// Purpose: Let every worker in a stage increment a named counter without
//          contending on a single cross-thread atomic map entry more than
//          necessary, and let the stage's main task own when those deltas
//          become visible outside the process (§9, "no cross-process
//          atomics").
// Dependencies: alertpipe-kv, dashmap, tokio
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use alertpipe_kv::CounterStore;
use dashmap::DashMap;

/// Process-local counters for one stage. Every increment is visible
/// immediately to [`CounterRegistry::totals_snapshot`] (used by the local
/// `/metrics` endpoint); [`CounterRegistry::drain_deltas`] is the separate
/// accumulator the periodic flush task consumes, so a slow flush interval
/// never loses counts between flushes.
#[derive(Default)]
pub struct CounterRegistry {
    totals: DashMap<String, AtomicI64>,
    deltas: DashMap<String, AtomicI64>,
}

impl CounterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to `name`, visible in both the live totals and the
    /// next flush's deltas.
    pub fn increment(&self, name: &str, delta: i64) {
        self.totals.entry(name.to_string()).or_insert_with(|| AtomicI64::new(0)).fetch_add(delta, Ordering::Relaxed);
        self.deltas.entry(name.to_string()).or_insert_with(|| AtomicI64::new(0)).fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns every counter's current cumulative total.
    #[must_use]
    pub fn totals_snapshot(&self) -> HashMap<String, i64> {
        self.totals.iter().map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed))).collect()
    }

    /// Drains accumulated deltas since the last call, resetting each to
    /// zero. Used by the flush task; a counter untouched since the last
    /// drain is omitted rather than reported as zero.
    pub fn drain_deltas(&self) -> HashMap<String, i64> {
        let mut drained = HashMap::new();
        for entry in self.deltas.iter() {
            let value = entry.value().swap(0, Ordering::Relaxed);
            if value != 0 {
                drained.insert(entry.key().clone(), value);
            }
        }
        drained
    }
}

/// Spawns a task that periodically drains `registry` and pushes each
/// nonzero delta into `counter_store` under `namespace`. Returns the task
/// handle so callers can abort it on shutdown.
pub fn spawn_flush_task(
    registry: Arc<CounterRegistry>,
    namespace: &'static str,
    counter_store: Arc<dyn CounterStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let deltas = registry.drain_deltas();
            for (name, delta) in deltas {
                let _ = counter_store.increment(namespace, &name, delta).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertpipe_kv::InMemoryKv;

    #[test]
    fn increment_updates_both_totals_and_deltas() {
        let registry = CounterRegistry::new();
        registry.increment("alerts_received_total", 3);
        registry.increment("alerts_received_total", 2);
        assert_eq!(registry.totals_snapshot().get("alerts_received_total"), Some(&5));

        let deltas = registry.drain_deltas();
        assert_eq!(deltas.get("alerts_received_total"), Some(&5));
        assert_eq!(registry.totals_snapshot().get("alerts_received_total"), Some(&5));
        assert!(registry.drain_deltas().is_empty());
    }

    #[tokio::test]
    async fn flush_task_pushes_deltas_into_counter_store() {
        let registry = Arc::new(CounterRegistry::new());
        registry.increment("errors_total", 7);
        let kv: Arc<dyn CounterStore> = Arc::new(InMemoryKv::new());

        let deltas = registry.drain_deltas();
        for (name, delta) in deltas {
            kv.increment("matcher", &name, delta).await.expect("increment");
        }

        let snapshot = kv.snapshot("matcher").await.expect("snapshot");
        assert_eq!(snapshot.get("errors_total"), Some(&7));
    }
}
