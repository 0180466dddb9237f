//! Engine configuration.
//!
//! [`EngineConfig`] is the configuration surface of the execution core.
//! Everything else (HTTP options, index build settings) lives with its
//! owning subsystem.

/// Configuration for the planner and execution core.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Pin every intermediate result of a query.
    pub pin_subtrees: bool,
    /// Pin only the final result.
    pub pin_result: bool,
    /// Budget of the non-pinned LRU segment, in the `rows × columns`
    /// metric.
    pub cache_max_size: usize,
    /// Entries larger than this are never inserted.
    pub cache_max_size_single_entry: usize,
    /// Maximum number of non-pinned entries.
    pub cache_max_num_entries: usize,
    /// Enable the pattern-trick rewrite for predicate counting queries.
    pub enable_pattern_trick: bool,
    /// Optional TSV file of planning cost factors.
    pub cost_factors_file: Option<std::path::PathBuf>,
    /// Deterministic planner tie-breaking (by cache key).
    pub test_mode: bool,
    /// Global byte budget shared by all queries.
    pub memory_budget_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pin_subtrees: false,
            pin_result: false,
            cache_max_size: 1 << 24,
            cache_max_size_single_entry: 1 << 22,
            cache_max_num_entries: 1024,
            enable_pattern_trick: true,
            cost_factors_file: None,
            test_mode: false,
            memory_budget_bytes: 4 << 30,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pin_subtrees(mut self, pin: bool) -> Self {
        self.pin_subtrees = pin;
        self
    }

    pub fn with_pin_result(mut self, pin: bool) -> Self {
        self.pin_result = pin;
        self
    }

    pub fn with_cache_max_size(mut self, size: usize) -> Self {
        self.cache_max_size = size;
        self
    }

    pub fn with_cache_max_size_single_entry(mut self, size: usize) -> Self {
        self.cache_max_size_single_entry = size;
        self
    }

    pub fn with_cache_max_num_entries(mut self, n: usize) -> Self {
        self.cache_max_num_entries = n;
        self
    }

    pub fn with_pattern_trick(mut self, enable: bool) -> Self {
        self.enable_pattern_trick = enable;
        self
    }

    pub fn with_cost_factors_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.cost_factors_file = Some(path.into());
        self
    }

    pub fn with_test_mode(mut self) -> Self {
        self.test_mode = true;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_pin_result(true)
            .with_cache_max_num_entries(8)
            .with_test_mode();
        assert!(config.pin_result);
        assert!(!config.pin_subtrees);
        assert_eq!(config.cache_max_num_entries, 8);
        assert!(config.test_mode);
    }
}
