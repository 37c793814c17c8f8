#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::use_debug))]
// crates/alertpipe-metrics/src/lib.rs
// ============================================================================
// Module: Metrics & Audit
// Description: Process-local counters flushed to the KV store, plus the
//              structured audit-event trait every stage logs through.
// Purpose: Give every stage the same "counters + periodic flush + read
//          endpoint" shape (§4.5, §9, §10) without a cross-process metrics
//          dependency, and the same "log this interesting thing" seam
//          without a logging-framework dependency.
// Dependencies: alertpipe-kv, axum, dashmap, serde, serde_json, time, tokio
// ============================================================================

//! ## Overview
//! [`CounterRegistry`] is the per-process counter store every stage
//! increments on its hot path (received, processed, published, errors,
//! per-channel outcomes). [`spawn_flush_task`] periodically drains the
//! accumulated deltas into a [`alertpipe_kv::CounterStore`] under
//! `metrics:<service>` (§6); [`metrics_router`] exposes the same counters
//! read-only over HTTP for local inspection. Aggregating these across a
//! fleet is the cross-service scrape surface named out of scope in §4.5;
//! this crate only covers the per-process side of that boundary.
//!
//! [`AuditSink`] is this workspace's stand-in for a logging framework: the
//! rest of the corpus this crate is modeled on has none, and reaches for a
//! small trait with typed event structs instead. Each event carries an
//! [`EventSeverity`]; [`StderrAuditSink`] is constructed with the minimum
//! severity to forward (`metrics.log_level` in configuration, §6) and drops
//! anything below it before touching stderr. [`NoopAuditSink`] exists for
//! tests that don't want event noise at all.

mod audit;
mod counters;
mod http;

pub use audit::AuditSink;
pub use audit::DispatchOutcomeEvent;
pub use audit::EventSeverity;
pub use audit::NoopAuditSink;
pub use audit::NotificationStatusEvent;
pub use audit::PoisonMessageEvent;
pub use audit::SnapshotPublishEvent;
pub use audit::StderrAuditSink;
pub use counters::CounterRegistry;
pub use counters::spawn_flush_task;
pub use http::metrics_router;

/// Milliseconds since the Unix epoch, saturating rather than panicking if
/// the clock is somehow set before 1970.
#[must_use]
pub fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
