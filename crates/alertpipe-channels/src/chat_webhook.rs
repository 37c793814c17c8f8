// crates/alertpipe-channels/src/chat_webhook.rs
// ============================================================================
// Module: Chat Webhook Sender
// Description: Delivers a structured, severity-colored message to a chat
//              webhook URL.
// Purpose: Implement §4.4's chat-webhook channel: a single HTTP POST per
//          endpoint, colored by the alert's severity (CRITICAL=red,
//          HIGH/MEDIUM=yellow, LOW=green).
// Dependencies: alertpipe-channels::{email, sender}, async-trait, reqwest,
//               serde_json
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use crate::email::classify_http_status;
use crate::sender::SendOutcome;
use crate::sender::SendRequest;
use crate::sender::Sender;

/// Attachment color for a severity string, per §4.4. An unrecognized or
/// missing severity (e.g. [`alertpipe_core::Severity::Other`]) falls back
/// to yellow rather than failing the send.
#[must_use]
pub fn color_for_severity(severity: &str) -> &'static str {
    match severity {
        "CRITICAL" => "#FF0000",
        "LOW" => "#36A64F",
        _ => "#FFCC00",
    }
}

fn severity_of(payload: &Value) -> &str {
    payload.get("severity").and_then(Value::as_str).unwrap_or("MEDIUM")
}

/// Posts a structured chat message to a webhook URL.
pub struct ChatWebhookSender {
    client: reqwest::Client,
}

impl ChatWebhookSender {
    /// Builds a sender issuing requests through `client`.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Sender for ChatWebhookSender {
    async fn send(&self, request: SendRequest<'_>) -> SendOutcome {
        let severity = severity_of(request.payload);
        let color = color_for_severity(severity);
        let name = request.payload.get("name").and_then(Value::as_str).unwrap_or("alert");
        let source = request.payload.get("source").and_then(Value::as_str).unwrap_or("unknown");

        let body = json!({
            "text": format!("[{severity}] {name} from {source}"),
            "attachments": [{
                "color": color,
                "fields": [
                    { "title": "severity", "value": severity },
                    { "title": "source", "value": source },
                ],
            }],
        });

        let response = self.client.post(&request.endpoint.target).json(&body).send().await;
        match response {
            Ok(response) => classify_http_status(response.status()),
            Err(error) => SendOutcome::RetryableFailure(error.to_string()),
        }
    }
}
