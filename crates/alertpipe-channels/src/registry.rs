// crates/alertpipe-channels/src/registry.rs
// ============================================================================
// Module: Sender Registry
// Description: Looks up the configured sender for a channel kind.
// Purpose: Let the Dispatcher dispatch per endpoint without a match on
//          channel kind at every call site; unknown kinds resolve to
//          `None` so the caller can log and skip (§4.4, step 4) rather
//          than treat a missing registration as a hard error.
// Dependencies: alertpipe-core
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use alertpipe_core::ChannelKind;

use crate::sender::Sender;

/// Senders keyed by the channel kind they deliver. Built once at startup
/// from configuration and shared read-only across the Dispatcher's worker
/// pool.
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<ChannelKind, Arc<dyn Sender>>,
}

impl SenderRegistry {
    /// An empty registry. Every lookup returns `None` until senders are
    /// registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender` for `kind`, replacing any prior registration.
    #[must_use]
    pub fn with_sender(mut self, kind: ChannelKind, sender: Arc<dyn Sender>) -> Self {
        self.senders.insert(kind, sender);
        self
    }

    /// Returns the sender registered for `kind`, if any.
    #[must_use]
    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn Sender>> {
        self.senders.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::SendOutcome;
    use crate::sender::SendRequest;
    use async_trait::async_trait;

    struct AlwaysSent;

    #[async_trait]
    impl Sender for AlwaysSent {
        async fn send(&self, _request: SendRequest<'_>) -> SendOutcome {
            SendOutcome::Sent
        }
    }

    #[test]
    fn unregistered_kind_resolves_to_none() {
        let registry = SenderRegistry::new();
        assert!(registry.get(ChannelKind::Email).is_none());
    }

    #[test]
    fn registered_kind_resolves_to_its_sender() {
        let registry = SenderRegistry::new().with_sender(ChannelKind::HttpWebhook, Arc::new(AlwaysSent));
        assert!(registry.get(ChannelKind::HttpWebhook).is_some());
        assert!(registry.get(ChannelKind::Email).is_none());
    }
}
