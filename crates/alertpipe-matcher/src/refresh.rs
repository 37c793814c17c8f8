// crates/alertpipe-matcher/src/refresh.rs
// ============================================================================
// Module: Snapshot Refresh
// Description: Background task that polls the KV store's version counter
//              and swaps in a freshly-decoded snapshot on observed increase.
// Purpose: Keep the Matcher's hot path lock-free by doing all the KV I/O and
//          dictionary-reverse-index rebuilding off to the side, only ever
//          touching [`SnapshotHandle`] with a value that is already fully
//          built (§4.2, "never serve half-swapped state").
// Dependencies: alertpipe-core, alertpipe-kv, alertpipe-metrics, std, tokio
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use alertpipe_core::RuleSnapshot;
use alertpipe_kv::KvStore;
use alertpipe_metrics::AuditSink;
use alertpipe_metrics::PoisonMessageEvent;

use crate::index::SnapshotHandle;

/// Decodes the snapshot blob at `snapshot_kv_key`, rebuilding its
/// dictionary reverse indexes so it is immediately usable for matching.
///
/// # Errors
/// Returns an error string if the key is absent or the blob fails to
/// deserialize.
pub async fn load_snapshot(kv: &dyn KvStore, snapshot_kv_key: &str) -> Result<RuleSnapshot, String> {
    let entry = kv
        .get(snapshot_kv_key)
        .await
        .map_err(|error| error.to_string())?
        .ok_or_else(|| "no snapshot published yet".to_string())?;
    let mut snapshot: RuleSnapshot = serde_json::from_slice(&entry.value).map_err(|error| error.to_string())?;
    snapshot.rebuild_reverse_indexes();
    Ok(snapshot)
}

/// Spawns the background refresh task. Polls `version_kv_key` every
/// `poll_interval`; on an observed version increase, re-reads
/// `snapshot_kv_key` and swaps the decoded result into `handle`. Logs via
/// `audit` and keeps serving the previously installed snapshot on any
/// failure to load consistently (§4.2, "Failures").
pub fn spawn_refresh_task(
    handle: Arc<SnapshotHandle>,
    kv: Arc<dyn KvStore>,
    audit: Arc<dyn AuditSink>,
    version_kv_key: String,
    snapshot_kv_key: String,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            let observed_version = match kv.get(&version_kv_key).await {
                Ok(Some(entry)) => String::from_utf8_lossy(&entry.value).parse::<u64>().ok(),
                Ok(None) => None,
                Err(_) => None,
            };
            let Some(observed_version) = observed_version else { continue };
            if observed_version <= handle.current_version() {
                continue;
            }
            match load_snapshot(kv.as_ref(), &snapshot_kv_key).await {
                Ok(snapshot) => handle.swap(snapshot),
                Err(reason) => {
                    audit.record_poison_message(&PoisonMessageEvent::new("matcher", "rules:snapshot", reason));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertpipe_kv::InMemoryKv;
    use alertpipe_metrics::NoopAuditSink;
    use std::time::Duration;

    #[tokio::test]
    async fn refresh_task_swaps_in_a_newer_snapshot() {
        let kv = Arc::new(InMemoryKv::new());
        let first = RuleSnapshot { version: 1, ..RuleSnapshot::default() };
        kv.compare_and_swap("rules:snapshot", None, serde_json::to_vec(&first).expect("encode").into())
            .await
            .expect("cas");
        kv.put("rules:version", b"1".to_vec().into()).await.expect("put");

        let handle = Arc::new(SnapshotHandle::new(first));
        let task = spawn_refresh_task(
            handle.clone(),
            kv.clone(),
            Arc::new(NoopAuditSink),
            "rules:version".to_string(),
            "rules:snapshot".to_string(),
            Duration::from_millis(5),
        );

        let second = RuleSnapshot { version: 2, ..RuleSnapshot::default() };
        let current = kv.get("rules:snapshot").await.expect("get").expect("present").version;
        kv.compare_and_swap("rules:snapshot", Some(current), serde_json::to_vec(&second).expect("encode").into())
            .await
            .expect("cas");
        kv.put("rules:version", b"2".to_vec().into()).await.expect("put");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.current_version(), 2);
        task.abort();
    }
}
