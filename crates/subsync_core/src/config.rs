//! Subscription store configuration.

/// Configuration for a [`SubscriptionStore`](crate::SubscriptionStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Whether to sync the backend after every record (safer but slower).
    pub sync_on_commit: bool,

    /// Number of log records after which the store compacts itself down to
    /// the latest set and state (0 = never).
    pub compact_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            compact_threshold: 256,
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the backend after every record.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the automatic compaction threshold.
    #[must_use]
    pub const fn compact_threshold(mut self, records: usize) -> Self {
        self.compact_threshold = records;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = StoreConfig::default();
        assert!(config.sync_on_commit);
        assert_eq!(config.compact_threshold, 256);
    }

    #[test]
    fn builder_pattern() {
        let config = StoreConfig::new()
            .sync_on_commit(false)
            .compact_threshold(0);

        assert!(!config.sync_on_commit);
        assert_eq!(config.compact_threshold, 0);
    }
}
