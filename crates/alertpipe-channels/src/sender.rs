// crates/alertpipe-channels/src/sender.rs
// ============================================================================
// Module: Sender Contract
// Description: The common request/outcome shape every channel sender
//              implements.
// Purpose: Let the Dispatcher's delivery loop (§4.4) treat email, chat
//          webhook, and HTTP webhook sends identically, dispatching on
//          channel kind only at the registry boundary.
// Dependencies: alertpipe-core, async-trait, serde_json
// ============================================================================

use alertpipe_core::Endpoint;
use alertpipe_core::Notification;
use async_trait::async_trait;
use serde_json::Value;

/// Everything a sender needs to deliver one notification to one endpoint.
/// Built fresh by the Dispatcher for each (notification, endpoint) pair; a
/// sender must not assume it sees the same request twice.
#[derive(Debug, Clone)]
pub struct SendRequest<'a> {
    /// The endpoint being delivered to.
    pub endpoint: &'a Endpoint,
    /// The notification this send is for.
    pub notification: &'a Notification,
    /// The alert payload captured at match time, handed to the sender
    /// verbatim so it can shape a channel-specific message body.
    pub payload: &'a Value,
}

/// The result of one delivery attempt, before any retry policy is applied.
///
/// # Invariants
/// - [`SendOutcome::PermanentFailure`] must never be retried by the caller;
///   the distinction between this and [`SendOutcome::RetryableFailure`] is
///   what separates "retry with backoff" from "count as a definitive
///   failure for this endpoint" (§4.4, step 5 / §8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered (or intentionally skipped, e.g. a test-domain email).
    Sent,
    /// Failed in a way worth retrying (HTTP 429, transient 5xx, timeout).
    RetryableFailure(String),
    /// Failed in a way retrying cannot fix (HTTP 4xx other than 429, a
    /// rejected recipient, an unparseable target address).
    PermanentFailure(String),
}

/// A channel-specific delivery mechanism, looked up by [`alertpipe_core::ChannelKind`]
/// through [`crate::registry::SenderRegistry`].
#[async_trait]
pub trait Sender: Send + Sync {
    /// Attempts one delivery of `request`. Callers (the Dispatcher's retry
    /// loop, see [`crate::backoff::retry_with_backoff`]) decide whether and
    /// how many times to call this again based on the returned outcome.
    async fn send(&self, request: SendRequest<'_>) -> SendOutcome;
}
