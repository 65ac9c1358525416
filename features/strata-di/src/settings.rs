use std::{num::NonZeroUsize, time::Duration};

/// Tunables of a [crate::Container]
///
/// None of the thresholds change what gets built, only how the work is spread over threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSettings {
    /// Size of the fixed worker pool
    pub fixed_pool_size: usize,
    /// Layers with at least this many nodes run on the fixed pool, smaller ones get a thread per node
    pub fixed_pool_threshold: usize,
    /// Dependency extraction runs on the worker pool above this candidate count
    pub graph_parallel_threshold: usize,
    /// Field values are resolved in parallel above this field count
    pub parallel_field_threshold: usize,
    /// Components and configurations restricted to profiles only load if one of them is active
    pub active_profiles: Vec<String>,
    /// Module path prefix handed to the type finder
    pub root_hint: String,
    /// Upper bound for a whole load cycle
    pub load_timeout: Option<Duration>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        ContainerSettings {
            fixed_pool_size: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            fixed_pool_threshold: 8,
            graph_parallel_threshold: 50,
            parallel_field_threshold: 8,
            active_profiles: Vec::new(),
            root_hint: String::new(),
            load_timeout: None,
        }
    }
}

impl ContainerSettings {
    pub fn with_fixed_pool_size(mut self, size: usize) -> Self {
        self.fixed_pool_size = size.max(1);
        self
    }

    pub fn with_fixed_pool_threshold(mut self, threshold: usize) -> Self {
        self.fixed_pool_threshold = threshold;
        self
    }

    pub fn with_graph_parallel_threshold(mut self, threshold: usize) -> Self {
        self.graph_parallel_threshold = threshold;
        self
    }

    pub fn with_parallel_field_threshold(mut self, threshold: usize) -> Self {
        self.parallel_field_threshold = threshold;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.active_profiles.push(profile.into());
        self
    }

    pub fn with_root_hint(mut self, root_hint: impl Into<String>) -> Self {
        self.root_hint = root_hint.into();
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = Some(timeout);
        self
    }

    /// Whether something restricted to `profiles` is active
    ///
    /// An empty restriction is always active.
    pub fn is_active(&self, profiles: &[String]) -> bool {
        profiles.is_empty()
            || profiles
                .iter()
                .any(|profile| self.active_profiles.contains(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_is_always_active() {
        let settings = ContainerSettings::default();
        assert!(settings.is_active(&[]));
        assert!(!settings.is_active(&["test".to_string()]));
    }

    #[test]
    fn restricted_needs_one_active_profile() {
        let settings = ContainerSettings::default().with_profile("test");
        assert!(settings.is_active(&["prod".to_string(), "test".to_string()]));
        assert!(!settings.is_active(&["prod".to_string()]));
    }
}
