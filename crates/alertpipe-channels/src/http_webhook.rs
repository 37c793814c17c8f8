// crates/alertpipe-channels/src/http_webhook.rs
// ============================================================================
// Module: HTTP Webhook Sender
// Description: Delivers the raw notification payload as a JSON HTTP POST.
// Purpose: Implement §4.4's generic HTTP webhook channel for integrations
//          that want the unshaped alert payload rather than a chat-specific
//          message format.
// Dependencies: alertpipe-channels::{email, sender}, async-trait, reqwest,
//               serde_json
// ============================================================================

use async_trait::async_trait;
use serde_json::json;

use crate::email::classify_http_status;
use crate::sender::SendOutcome;
use crate::sender::SendRequest;
use crate::sender::Sender;

/// Posts the raw alert payload, wrapped with a little delivery metadata, to
/// a webhook URL.
pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    /// Builds a sender issuing requests through `client`.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sender for HttpWebhookSender {
    async fn send(&self, request: SendRequest<'_>) -> SendOutcome {
        let body = json!({
            "notification_id": request.notification.notification_id.to_string(),
            "tenant_id": request.notification.tenant_id.to_string(),
            "alert": request.payload,
        });

        let response = self.client.post(&request.endpoint.target).json(&body).send().await;
        match response {
            Ok(response) => classify_http_status(response.status()),
            Err(error) => SendOutcome::RetryableFailure(error.to_string()),
        }
    }
}
