//! Channel tag → sender lookup, populated at startup.

use delayline_core::sender::Sender;
use std::collections::HashMap;
use std::sync::Arc;

/// Registered channel senders, keyed by [`Sender::name`].
#[derive(Clone, Default)]
pub struct SenderRegistry {
    senders: HashMap<String, Arc<dyn Sender>>,
}

impl SenderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender under its own channel tag, replacing any previous
    /// sender for that tag.
    #[must_use]
    pub fn with_sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.register(sender);
        self
    }

    /// Register a sender under its own channel tag.
    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        let tag = sender.name().to_string();
        if self.senders.insert(tag.clone(), sender).is_some() {
            tracing::warn!(channel = %tag, "Replaced previously registered sender");
        }
    }

    /// Sender for `channel`, if one is registered.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<Arc<dyn Sender>> {
        self.senders.get(channel).cloned()
    }

    /// Registered channel tags, sorted.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.senders.keys().cloned().collect();
        tags.sort();
        tags
    }
}

impl std::fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderRegistry")
            .field("channels", &self.channels())
            .finish()
    }
}
