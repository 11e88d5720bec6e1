//! Registry configuration

/// Default per-session outbound queue depth, in chunks
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Configuration for the session registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Chunks a session may have queued before it is evicted as a slow consumer
    pub outbound_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl RegistryConfig {
    /// Set the per-session outbound queue depth (minimum 1)
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert_eq!(
            RegistryConfig::default().outbound_capacity,
            DEFAULT_OUTBOUND_CAPACITY
        );
    }

    #[test]
    fn test_capacity_never_zero() {
        let config = RegistryConfig::default().outbound_capacity(0);
        assert_eq!(config.outbound_capacity, 1);
    }
}
