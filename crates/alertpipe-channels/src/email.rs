// crates/alertpipe-channels/src/email.rs
// ============================================================================
// Module: Email Sender
// Description: Delivers notifications through a primary hosted-API email
//              provider with optional fallback, behind a shared rate
//              limiter.
// Purpose: Implement §4.4's email channel: provider-level fallback on
//          failure, global token-bucket rate limiting before every send,
//          and silent skip-as-success for obvious test domains so load
//          tests don't burn provider quota.
// Dependencies: alertpipe-channels::{rate_limit, sender}, async-trait,
//               reqwest, serde_json
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use crate::rate_limit::TokenBucket;
use crate::sender::SendOutcome;
use crate::sender::SendRequest;
use crate::sender::Sender;

/// Domains obviously used for load testing rather than real delivery.
/// Messages addressed here are counted as sent without contacting a
/// provider (§4.4).
const TEST_DOMAINS: [&str; 4] = ["example.com", "test.com", "localhost", "invalid"];

/// Returns whether `target`'s domain (the part after `@`, or the whole
/// string if there is no `@`) is a recognized test domain.
#[must_use]
pub fn is_test_domain(target: &str) -> bool {
    let domain = target.rsplit('@').next().unwrap_or(target).to_ascii_lowercase();
    TEST_DOMAINS.contains(&domain.as_str())
}

/// A backend capable of sending one email. Implemented once per provider
/// (SMTP relay, hosted API) so [`EmailSender`] can fall back from a
/// primary to a secondary without knowing which kind of backend either is.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Sends one email to `target` with `subject`/`body`.
    async fn send(&self, target: &str, subject: &str, body: &str) -> SendOutcome;

    /// A short name for this provider, used in audit events and logs.
    fn name(&self) -> &str;
}

/// Configuration for a hosted email API reachable over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEmailProviderConfig {
    /// Provider name, surfaced in audit events.
    pub name: String,
    /// API endpoint this provider POSTs messages to.
    pub endpoint: String,
    /// Bearer token presented on every request.
    pub api_key: String,
    /// The `from` address attached to every message.
    pub from_address: String,
}

/// An [`EmailProvider`] backed by a hosted HTTP email API (the "hosted API
/// providers" option named in §4.4, as opposed to an SMTP relay).
pub struct HttpEmailProvider {
    config: HttpEmailProviderConfig,
    client: reqwest::Client,
}

impl HttpEmailProvider {
    /// Builds a provider posting to `config.endpoint` using `client`.
    #[must_use]
    pub fn new(config: HttpEmailProviderConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    async fn send(&self, target: &str, subject: &str, body: &str) -> SendOutcome {
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "from": self.config.from_address,
                "to": target,
                "subject": subject,
                "body": body,
            }))
            .send()
            .await;

        match response {
            Ok(response) => classify_http_status(response.status()),
            Err(error) => SendOutcome::RetryableFailure(error.to_string()),
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

/// Maps a provider's HTTP status to a [`SendOutcome`] per §4.4/§8: 2xx is
/// success, 429 and 5xx are retryable, any other 4xx is permanent.
#[must_use]
pub fn classify_http_status(status: StatusCode) -> SendOutcome {
    if status.is_success() {
        SendOutcome::Sent
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SendOutcome::RetryableFailure(format!("http {status}"))
    } else {
        SendOutcome::PermanentFailure(format!("http {status}"))
    }
}

/// Delivers notifications by email: a primary provider, an optional
/// secondary fallback, and a shared rate limiter acquired before every
/// real send.
///
/// # Invariants
/// - `rate_limiter` is acquired once per [`Sender::send`] call, before the
///   primary attempt; a fallback to the secondary does not acquire again.
/// - Test-domain targets never touch `rate_limiter` or either provider.
pub struct EmailSender {
    primary: Arc<dyn EmailProvider>,
    secondary: Option<Arc<dyn EmailProvider>>,
    rate_limiter: Arc<TokenBucket>,
    subject: String,
}

impl EmailSender {
    /// Builds a sender with `primary` always tried first, falling back to
    /// `secondary` (if given) on any provider-level failure, rate limited
    /// by `rate_limiter`.
    #[must_use]
    pub fn new(primary: Arc<dyn EmailProvider>, secondary: Option<Arc<dyn EmailProvider>>, rate_limiter: Arc<TokenBucket>) -> Self {
        Self {
            primary,
            secondary,
            rate_limiter,
            subject: "Alert notification".to_string(),
        }
    }
}

#[async_trait]
impl Sender for EmailSender {
    async fn send(&self, request: SendRequest<'_>) -> SendOutcome {
        if is_test_domain(&request.endpoint.target) {
            return SendOutcome::Sent;
        }

        self.rate_limiter.acquire().await;

        let body = request.payload.to_string();
        let primary_outcome = self.primary.send(&request.endpoint.target, &self.subject, &body).await;
        if primary_outcome == SendOutcome::Sent {
            return primary_outcome;
        }

        match &self.secondary {
            Some(secondary) => secondary.send(&request.endpoint.target, &self.subject, &body).await,
            None => primary_outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alertpipe_core::AlertId;
    use alertpipe_core::ChannelKind;
    use alertpipe_core::Endpoint;
    use alertpipe_core::EndpointId;
    use alertpipe_core::Notification;
    use alertpipe_core::NotificationId;
    use alertpipe_core::NotificationStatus;
    use alertpipe_core::RuleId;
    use alertpipe_core::TenantId;
    use alertpipe_core::Timestamp;
    use serde_json::Value;
    use uuid::Uuid;

    struct StubProvider {
        name: String,
        outcome: SendOutcome,
    }

    #[async_trait]
    impl EmailProvider for StubProvider {
        async fn send(&self, _target: &str, _subject: &str, _body: &str) -> SendOutcome {
            self.outcome.clone()
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn endpoint(target: &str) -> Endpoint {
        Endpoint {
            endpoint_id: EndpointId(Uuid::new_v4()),
            rule_id: RuleId(Uuid::new_v4()),
            kind: ChannelKind::Email,
            target: target.to_string(),
            enabled: true,
        }
    }

    fn notification(now: Timestamp) -> Notification {
        Notification {
            notification_id: NotificationId::generate(),
            tenant_id: TenantId::from("tenant-1"),
            alert_id: AlertId(Uuid::new_v4()),
            matched_rule_ids: vec![RuleId(Uuid::new_v4())],
            payload: Value::Null,
            status: NotificationStatus::Received,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn recognizes_every_documented_test_domain() {
        assert!(is_test_domain("alerts@example.com"));
        assert!(is_test_domain("alerts@test.com"));
        assert!(is_test_domain("alerts@localhost"));
        assert!(is_test_domain("invalid"));
        assert!(!is_test_domain("oncall@acme.corp"));
    }

    #[tokio::test]
    async fn test_domain_skips_without_touching_rate_limiter() {
        let rate_limiter = Arc::new(TokenBucket::new(0, 0));
        let primary = Arc::new(StubProvider {
            name: "primary".to_string(),
            outcome: SendOutcome::PermanentFailure("should not be called".to_string()),
        });
        let sender = EmailSender::new(primary, None, rate_limiter);

        let now = Timestamp::new(time::OffsetDateTime::now_utc());
        let payload = Value::Null;
        let notif = notification(now);
        let ep = endpoint("load-test@example.com");
        let request = SendRequest {
            endpoint: &ep,
            notification: &notif,
            payload: &payload,
        };
        assert_eq!(sender.send(request).await, SendOutcome::Sent);
    }

    #[tokio::test]
    async fn falls_back_to_secondary_when_primary_fails() {
        let rate_limiter = Arc::new(TokenBucket::new(5, 5));
        let primary = Arc::new(StubProvider {
            name: "primary".to_string(),
            outcome: SendOutcome::RetryableFailure("429".to_string()),
        });
        let secondary = Arc::new(StubProvider {
            name: "secondary".to_string(),
            outcome: SendOutcome::Sent,
        });
        let sender = EmailSender::new(primary, Some(secondary), rate_limiter);

        let now = Timestamp::new(time::OffsetDateTime::now_utc());
        let payload = Value::Null;
        let notif = notification(now);
        let ep = endpoint("oncall@acme.corp");
        let request = SendRequest {
            endpoint: &ep,
            notification: &notif,
            payload: &payload,
        };
        assert_eq!(sender.send(request).await, SendOutcome::Sent);
    }
}
