// crates/alertpipe-core/src/endpoint.rs
// ============================================================================
// Module: Endpoint
// Description: A delivery address for one channel, owned by a rule.
// Purpose: Model the endpoint shape the Dispatcher resolves and deduplicates
//          before handing off to a channel sender.
// Dependencies: serde
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::ids::EndpointId;
use crate::ids::RuleId;

/// The channel a sender delivers through.
///
/// # Invariants
/// - The wire string form (`as_str`) is stable; it is used as the relational
///   `kind` column and as a registry key, not just a display label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// Delivered via an email provider (SMTP or a hosted API).
    Email,
    /// Delivered as a structured chat message via HTTP POST.
    ChatWebhook,
    /// Delivered as a raw JSON HTTP POST.
    HttpWebhook,
}

impl ChannelKind {
    /// Stable wire/registry key for this channel kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::ChatWebhook => "chat-webhook",
            Self::HttpWebhook => "http-webhook",
        }
    }

    /// Parses a channel kind from its wire key. Returns `None` for an
    /// unrecognized kind; callers (the Dispatcher's registry lookup) treat
    /// that as "log and skip", never as a hard error.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "chat-webhook" => Some(Self::ChatWebhook),
            "http-webhook" => Some(Self::HttpWebhook),
            _ => None,
        }
    }
}

/// A configured delivery address, owned by a [`crate::rule::Rule`].
///
/// # Invariants
/// - Cascades with its owning rule: deleting a rule deletes its endpoints.
/// - `(kind, target)` pairs are deduplicated by the Dispatcher across all of
///   a notification's matched rules before delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Server-assigned identifier.
    pub endpoint_id: EndpointId,
    /// The rule this endpoint belongs to.
    pub rule_id: RuleId,
    /// Delivery channel.
    pub kind: ChannelKind,
    /// Address within that channel (email address, webhook URL, ...).
    pub target: String,
    /// Whether delivery to this endpoint is currently active.
    pub enabled: bool,
}
