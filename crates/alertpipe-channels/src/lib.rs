#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-channels/src/lib.rs
// ============================================================================
// Module: Alert Pipeline Channels
// Description: Per-channel delivery senders, their shared contract, and the
//              supporting registry/rate-limit/backoff primitives.
// Purpose: Give the Dispatcher (§4.4) one sender per channel kind behind a
//          common trait, a registry to look them up by kind, a shared
//          rate limiter for the email channel, and the retry/backoff
//          policy every endpoint send runs under.
// Dependencies: alertpipe-core, async-trait, rand, reqwest, serde_json,
//               thiserror, tokio
// ============================================================================

//! ## Overview
//! This crate has no knowledge of the Dispatcher's worker pool, offset
//! commits, or notification persistence — it only knows how to attempt one
//! delivery and report whether that attempt succeeded, should be retried,
//! or failed for good. Everything about *how many times* and *how long to
//! wait between* lives in [`backoff`]; everything about *which sender*
//! lives in [`registry`].

pub mod backoff;
pub mod chat_webhook;
pub mod email;
pub mod http_webhook;
pub mod rate_limit;
pub mod registry;
pub mod sender;

pub use backoff::BackoffPolicy;
pub use backoff::retry_with_backoff;
pub use chat_webhook::ChatWebhookSender;
pub use email::EmailProvider;
pub use email::EmailSender;
pub use email::HttpEmailProvider;
pub use email::HttpEmailProviderConfig;
pub use http_webhook::HttpWebhookSender;
pub use rate_limit::TokenBucket;
pub use registry::SenderRegistry;
pub use sender::SendOutcome;
pub use sender::SendRequest;
pub use sender::Sender;
