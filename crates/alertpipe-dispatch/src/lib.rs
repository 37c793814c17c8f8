#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-dispatch/src/lib.rs
// ============================================================================
// Module: Dispatcher
// Description: Consumes `notifications.ready`, resolves each notification's
//              endpoints, delivers per channel with bounded retries, and
//              advances the notification's terminal status (§4.4).
// Purpose: The pipeline's last stage: turn a persisted notification intent
//          into actual deliveries, absorbing the duplicate-readiness window
//          left open by the Deduplicator (§4.3) via its own idempotency
//          gate on notification status.
// Dependencies: alertpipe-channels, alertpipe-config, alertpipe-core,
//               alertpipe-logbus, alertpipe-metrics, alertpipe-store,
//               alertpipe-wire, thiserror, time, tokio
// ============================================================================

//! ## Overview
//! A configurable pool of workers drains `notifications.ready`
//! concurrently; each worker's own per-notification work (load, resolve
//! endpoints, dispatch, advance status) is serial (§4.4, "Concurrency").
//! Every endpoint send goes through
//! [`alertpipe_channels::retry_with_backoff`] with
//! [`alertpipe_channels::BackoffPolicy`], so this crate owns none of the
//! retry mechanics itself, only the terminal-state and offset-commit
//! policy layered on top of a send's final outcome.

use std::sync::Arc;

use alertpipe_channels::BackoffPolicy;
use alertpipe_channels::SendOutcome;
use alertpipe_channels::SendRequest;
use alertpipe_channels::SenderRegistry;
use alertpipe_channels::retry_with_backoff;
use alertpipe_config::DispatcherConfig;
use alertpipe_core::Endpoint;
use alertpipe_core::Notification;
use alertpipe_core::NotificationId;
use alertpipe_core::NotificationStatus;
use alertpipe_core::READINESS_SCHEMA_VERSION;
use alertpipe_core::ReadinessEvent;
use alertpipe_core::Timestamp;
use alertpipe_logbus::LogConsumer;
use alertpipe_logbus::LogError;
use alertpipe_metrics::AuditSink;
use alertpipe_metrics::CounterRegistry;
use alertpipe_metrics::DispatchOutcomeEvent;
use alertpipe_metrics::NotificationStatusEvent;
use alertpipe_metrics::PoisonMessageEvent;
use alertpipe_store::EndpointStore;
use alertpipe_store::NotificationStore;
use alertpipe_store::StoreError;
use alertpipe_store::dedupe_endpoints;
use alertpipe_wire::RawEnvelope;
use alertpipe_wire::WireError;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

/// Errors raised by the Dispatcher.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Consuming from the log bus failed.
    #[error(transparent)]
    Log(#[from] LogError),
    /// The relational store failed at the transport level.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An incoming envelope failed to decode at the transport level (not
    /// the poison-message path, which is handled inline).
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// The Dispatcher service. `C` is the log consumer type; every worker
/// shares one instance behind an async mutex, so polling is serialized but
/// the (far more expensive) per-notification delivery work is not.
pub struct Dispatcher<C: LogConsumer> {
    notifications: Arc<dyn NotificationStore>,
    endpoints: Arc<dyn EndpointStore>,
    consumer: AsyncMutex<C>,
    registry: Arc<SenderRegistry>,
    backoff: BackoffPolicy,
    audit: Arc<dyn AuditSink>,
    counters: Arc<CounterRegistry>,
}

/// Outcome of resolving and dispatching to one notification's endpoint set.
struct DeliveryResult {
    final_status: NotificationStatus,
}

impl<C: LogConsumer> Dispatcher<C> {
    /// Builds a Dispatcher. `config` supplies the retry policy
    /// (`max_retry_attempts`, `retry_base_delay_ms`, `retry_max_delay_ms`);
    /// worker count is the caller's concern (see [`Dispatcher::process_next`]
    /// and spawn `config.worker_count` tasks calling it in a loop).
    #[must_use]
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        endpoints: Arc<dyn EndpointStore>,
        consumer: C,
        registry: Arc<SenderRegistry>,
        audit: Arc<dyn AuditSink>,
        counters: Arc<CounterRegistry>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            notifications,
            endpoints,
            consumer: AsyncMutex::new(consumer),
            registry,
            backoff: BackoffPolicy {
                max_attempts: config.max_retry_attempts,
                base_delay: std::time::Duration::from_millis(config.retry_base_delay_ms),
                max_delay: std::time::Duration::from_millis(config.retry_max_delay_ms),
            },
            audit,
            counters,
        }
    }

    /// Runs this worker's consume loop forever.
    ///
    /// # Errors
    /// Returns [`DispatcherError`] on a transport failure.
    pub async fn run(&self) -> Result<(), DispatcherError> {
        loop {
            self.process_next().await?;
        }
    }

    /// Processes a single `notifications.ready` record, if any is
    /// available. Returns `true` if a record was processed.
    ///
    /// # Errors
    /// Returns [`DispatcherError`] if persistence fails after a successful
    /// dispatch attempt; the offset is then deliberately left uncommitted
    /// (§4.4, step 7 / "Failures").
    pub async fn process_next(&self) -> Result<bool, DispatcherError> {
        let Some(record) = self.consumer.lock().await.poll().await? else {
            return Ok(false);
        };

        let readiness = match RawEnvelope::parse(&record.payload).and_then(|raw| raw.decode::<ReadinessEvent>(READINESS_SCHEMA_VERSION)) {
            Ok(event) => event,
            Err(error) => {
                self.audit.record_poison_message(&PoisonMessageEvent::new("dispatcher", "notifications.ready", error.to_string()));
                self.counters.increment("poison_messages_total", 1);
                self.consumer.lock().await.commit(&record).await?;
                return Ok(true);
            }
        };

        let Some(notification) = self.notifications.get_notification(readiness.notification_id).await? else {
            self.audit.record_poison_message(&PoisonMessageEvent::new(
                "dispatcher",
                "notifications.ready",
                format!("no notification row for {}", readiness.notification_id),
            ));
            self.consumer.lock().await.commit(&record).await?;
            return Ok(true);
        };

        if notification.status.is_terminal() {
            self.counters.increment("notifications_already_terminal_total", 1);
            self.consumer.lock().await.commit(&record).await?;
            return Ok(true);
        }

        let rule_ids = &notification.matched_rule_ids;
        let candidates = self.endpoints.endpoints_for_rules(rule_ids).await?;
        let enabled: Vec<_> = candidates.into_iter().filter(|endpoint| endpoint.enabled).collect();
        let deduped = dedupe_endpoints(enabled);

        let result = self.dispatch_to(&notification, &deduped).await;

        let now = Timestamp::new(time::OffsetDateTime::now_utc());
        self.notifications.update_status(notification.notification_id, result.final_status, now).await?;
        self.audit.record_notification_status(&NotificationStatusEvent::new(
            notification.notification_id.to_string(),
            status_label(result.final_status),
        ));
        self.counters.increment(
            match result.final_status {
                NotificationStatus::Sent => "notifications_sent_total",
                NotificationStatus::Failed => "notifications_failed_total",
                NotificationStatus::Received => "notifications_unexpected_received_total",
            },
            1,
        );

        self.consumer.lock().await.commit(&record).await?;
        Ok(true)
    }

    async fn dispatch_to(&self, notification: &Notification, endpoints: &[Endpoint]) -> DeliveryResult {
        if endpoints.is_empty() {
            return DeliveryResult { final_status: NotificationStatus::Sent };
        }

        let mut any_succeeded = false;
        let mut any_known_sender = false;
        for endpoint in endpoints {
            let Some(sender) = self.registry.get(endpoint.kind) else {
                self.audit.record_poison_message(&PoisonMessageEvent::new(
                    "dispatcher",
                    "notifications.ready",
                    format!("no sender registered for channel kind {:?}", endpoint.kind),
                ));
                continue;
            };
            any_known_sender = true;

            let (outcome, attempts) = retry_with_backoff(self.backoff, || {
                let sender = Arc::clone(&sender);
                let request = SendRequest { endpoint, notification, payload: &notification.payload };
                async move { sender.send(request).await }
            })
            .await;

            self.audit.record_dispatch_outcome(&DispatchOutcomeEvent::new(
                notification.notification_id.to_string(),
                endpoint.kind.as_str(),
                outcome_label(&outcome),
                attempts,
            ));
            self.counters.increment(dispatch_counter_name(&outcome), 1);

            if matches!(outcome, SendOutcome::Sent) {
                any_succeeded = true;
            }
        }

        let final_status = if !any_known_sender || any_succeeded { NotificationStatus::Sent } else { NotificationStatus::Failed };
        DeliveryResult { final_status }
    }
}

fn status_label(status: NotificationStatus) -> &'static str {
    match status {
        NotificationStatus::Received => "RECEIVED",
        NotificationStatus::Sent => "SENT",
        NotificationStatus::Failed => "FAILED",
    }
}

fn outcome_label(outcome: &SendOutcome) -> &'static str {
    match outcome {
        SendOutcome::Sent => "sent",
        SendOutcome::RetryableFailure(_) => "retryable_failure",
        SendOutcome::PermanentFailure(_) => "permanent_failure",
    }
}

fn dispatch_counter_name(outcome: &SendOutcome) -> &'static str {
    match outcome {
        SendOutcome::Sent => "dispatch_sent_total",
        SendOutcome::RetryableFailure(_) => "dispatch_retryable_failure_total",
        SendOutcome::PermanentFailure(_) => "dispatch_permanent_failure_total",
    }
}
