// crates/alertpipe-metrics/src/audit.rs
// ============================================================================
// Module: Audit Events
// Description: Typed per-stage event payloads and the sink trait that
//              records them.
// Purpose: Give each stage a structured, redaction-aware place to record
//          the handful of events worth a human's attention (poison
//          messages, snapshot publication, dispatch outcomes, status
//          transitions) without pulling in a logging framework.
// Dependencies: serde, serde_json
// ============================================================================

use std::io::Write;

use serde::Serialize;

use crate::now_millis;

/// Severity of an audit event, independent of which event class it is.
/// Ordered from least to most severe so a configured minimum gates
/// everything below it (§6, "log level"; §10, "ambient logging concern").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    /// Routine events worth keeping for reconstruction but not attention.
    Info,
    /// Events worth a human's attention but not a failure on their own.
    Warn,
    /// Events that represent a permanent failure of some unit of work.
    Error,
}

/// A message this stage could not process and chose to skip rather than
/// block the partition on (§7, "poison message").
#[derive(Debug, Clone, Serialize)]
pub struct PoisonMessageEvent {
    /// Event identifier, stable for downstream filtering.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity this event is recorded at.
    pub severity: EventSeverity,
    /// Stage that encountered the message.
    pub service: &'static str,
    /// Topic the message was read from.
    pub topic: &'static str,
    /// Human-readable reason, detailed enough to reconstruct the failure.
    pub reason: String,
}

impl PoisonMessageEvent {
    /// Builds a poison-message event stamped with the current time. Always
    /// `Warn`: a poison message is skipped, not silently ignored (§7).
    #[must_use]
    pub fn new(service: &'static str, topic: &'static str, reason: String) -> Self {
        Self {
            event: "poison_message",
            timestamp_ms: now_millis(),
            severity: EventSeverity::Warn,
            service,
            topic,
            reason,
        }
    }
}

/// A snapshot publication by the Snapshot Builder (§4.1).
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotPublishEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity this event is recorded at. Always `Info`.
    pub severity: EventSeverity,
    /// The published version.
    pub version: u64,
    /// Which update strategy produced this publication.
    pub strategy: &'static str,
    /// Number of rules in the published snapshot.
    pub rule_count: usize,
}

impl SnapshotPublishEvent {
    /// Builds a snapshot-publish event stamped with the current time.
    #[must_use]
    pub fn new(version: u64, strategy: &'static str, rule_count: usize) -> Self {
        Self {
            event: "snapshot_publish",
            timestamp_ms: now_millis(),
            severity: EventSeverity::Info,
            version,
            strategy,
            rule_count,
        }
    }
}

/// A single endpoint's delivery outcome from the Dispatcher (§4.4).
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcomeEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity this event is recorded at, derived from `outcome`.
    pub severity: EventSeverity,
    /// The notification this send was for.
    pub notification_id: String,
    /// Channel kind the send was attempted on.
    pub channel: &'static str,
    /// `sent`, `retryable_failure`, or `permanent_failure`.
    pub outcome: &'static str,
    /// Retry attempts made before this outcome, including the first.
    pub attempts: u32,
}

impl DispatchOutcomeEvent {
    /// Builds a dispatch-outcome event stamped with the current time.
    /// `sent` is `Info`, `retryable_failure` is `Warn`, anything else
    /// (`permanent_failure`) is `Error`.
    #[must_use]
    pub fn new(notification_id: String, channel: &'static str, outcome: &'static str, attempts: u32) -> Self {
        let severity = match outcome {
            "sent" => EventSeverity::Info,
            "retryable_failure" => EventSeverity::Warn,
            _ => EventSeverity::Error,
        };
        Self {
            event: "dispatch_outcome",
            timestamp_ms: now_millis(),
            severity,
            notification_id,
            channel,
            outcome,
            attempts,
        }
    }
}

/// A Notification status transition (§3, "status monotonicity").
#[derive(Debug, Clone, Serialize)]
pub struct NotificationStatusEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Severity this event is recorded at. `FAILED` is `Warn`, otherwise
    /// `Info`.
    pub severity: EventSeverity,
    /// The notification that transitioned.
    pub notification_id: String,
    /// New status: `RECEIVED`, `SENT`, or `FAILED`.
    pub status: &'static str,
}

impl NotificationStatusEvent {
    /// Builds a status-transition event stamped with the current time.
    #[must_use]
    pub fn new(notification_id: String, status: &'static str) -> Self {
        let severity = if status == "FAILED" { EventSeverity::Warn } else { EventSeverity::Info };
        Self {
            event: "notification_status",
            timestamp_ms: now_millis(),
            severity,
            notification_id,
            status,
        }
    }
}

/// Sink every stage records its audit events through. Only
/// [`AuditSink::record_poison_message`] is required; the rest default to a
/// no-op so a stage that never produces a given event class doesn't force
/// an implementation on sinks that don't care about it.
pub trait AuditSink: Send + Sync {
    /// Records a poison-message event.
    fn record_poison_message(&self, event: &PoisonMessageEvent);

    /// Records a snapshot-publish event.
    fn record_snapshot_publish(&self, _event: &SnapshotPublishEvent) {}

    /// Records a dispatch-outcome event.
    fn record_dispatch_outcome(&self, _event: &DispatchOutcomeEvent) {}

    /// Records a notification status transition.
    fn record_notification_status(&self, _event: &NotificationStatusEvent) {}
}

/// Writes every event at or above its configured minimum severity as a
/// JSON line to stderr. The default sink for every stage binary.
#[derive(Debug, Clone, Copy)]
pub struct StderrAuditSink {
    min_severity: EventSeverity,
}

impl Default for StderrAuditSink {
    fn default() -> Self {
        Self::new(EventSeverity::Info)
    }
}

impl StderrAuditSink {
    /// Builds a sink that only forwards events at or above `min_severity`
    /// (§6's `log_level` key, read at stage startup).
    #[must_use]
    pub fn new(min_severity: EventSeverity) -> Self {
        Self { min_severity }
    }

    fn write(&self, severity: EventSeverity, payload: &impl Serialize) {
        if severity < self.min_severity {
            return;
        }
        if let Ok(payload) = serde_json::to_string(payload) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

impl AuditSink for StderrAuditSink {
    fn record_poison_message(&self, event: &PoisonMessageEvent) {
        self.write(event.severity, event);
    }

    fn record_snapshot_publish(&self, event: &SnapshotPublishEvent) {
        self.write(event.severity, event);
    }

    fn record_dispatch_outcome(&self, event: &DispatchOutcomeEvent) {
        self.write(event.severity, event);
    }

    fn record_notification_status(&self, event: &NotificationStatusEvent) {
        self.write(event.severity, event);
    }
}

/// Discards every event. Used by tests that assert on behavior rather than
/// audit output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record_poison_message(&self, _event: &PoisonMessageEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_sink_does_not_panic_on_any_event() {
        let sink = StderrAuditSink::default();
        sink.record_poison_message(&PoisonMessageEvent::new("matcher", "alerts.new", "bad schema".to_string()));
        sink.record_snapshot_publish(&SnapshotPublishEvent::new(3, "incremental", 42));
        sink.record_dispatch_outcome(&DispatchOutcomeEvent::new("n-1".to_string(), "email", "sent", 1));
        sink.record_notification_status(&NotificationStatusEvent::new("n-1".to_string(), "SENT"));
    }

    #[test]
    fn event_severities_follow_outcome_and_status() {
        assert_eq!(PoisonMessageEvent::new("matcher", "alerts.new", "x".to_string()).severity, EventSeverity::Warn);
        assert_eq!(SnapshotPublishEvent::new(1, "full", 0).severity, EventSeverity::Info);
        assert_eq!(DispatchOutcomeEvent::new("n".to_string(), "email", "sent", 1).severity, EventSeverity::Info);
        assert_eq!(
            DispatchOutcomeEvent::new("n".to_string(), "email", "retryable_failure", 1).severity,
            EventSeverity::Warn
        );
        assert_eq!(
            DispatchOutcomeEvent::new("n".to_string(), "email", "permanent_failure", 1).severity,
            EventSeverity::Error
        );
        assert_eq!(NotificationStatusEvent::new("n".to_string(), "SENT").severity, EventSeverity::Info);
        assert_eq!(NotificationStatusEvent::new("n".to_string(), "FAILED").severity, EventSeverity::Warn);
    }

    #[test]
    fn sink_drops_events_below_configured_minimum() {
        // Below `min_severity`, `write` returns before touching stderr; we
        // can only assert it doesn't panic, since the sink has no output
        // hook to inspect in this crate's test setup.
        let sink = StderrAuditSink::new(EventSeverity::Error);
        sink.record_poison_message(&PoisonMessageEvent::new("matcher", "alerts.new", "x".to_string()));
        sink.record_dispatch_outcome(&DispatchOutcomeEvent::new("n".to_string(), "email", "permanent_failure", 1));
    }
}
