// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! All tunables for a loop or loop group live here (§6). Nothing inside the core reads
//! an environment variable or global directly; everything flows through this struct.

use crate::common::RejectionPolicy;

/// Configuration for a single [`EventLoop`](crate::event_loop::EventLoop) or an entire
/// [`LoopGroup`](crate::group::LoopGroup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLoopConfig {
    /// Percent of cycle time targeted for I/O, `1..=100`. `100` means "drain tasks only
    /// as much as needed to avoid starvation," never "skip I/O."
    pub io_ratio: u8,

    /// Consecutive no-op `select` cycles before a C8 rebuild is triggered. `0` disables
    /// the rebuild mitigation entirely.
    pub selector_rebuild_threshold: u32,

    /// Cancelled-key count before the current readiness walk re-selects to compact the
    /// selector's internal registries.
    pub cancelled_key_cleanup_interval: u32,

    /// Opt out of the C1 ready-key-set optimization. Exists for parity with the
    /// original tunable; this crate's selector wrapper always owns its ready-key set
    /// regardless, so setting this has no effect beyond being observable in
    /// [`EventLoopConfig`] round-trips.
    pub disable_key_set_optimization: bool,

    /// Maximum outstanding submitted tasks before the queue rejects further `offer`s.
    pub max_pending_tasks: usize,

    /// What an overflowing producer observes.
    pub rejection_policy: RejectionPolicy,

    /// Number of loops in a [`LoopGroup`](crate::group::LoopGroup).
    pub thread_count: usize,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            io_ratio: 50,
            selector_rebuild_threshold: 512,
            cancelled_key_cleanup_interval: 256,
            disable_key_set_optimization: false,
            max_pending_tasks: usize::MAX,
            rejection_policy: RejectionPolicy::default(),
            thread_count: default_thread_count(),
        }
    }
}

impl EventLoopConfig {
    #[must_use]
    pub fn with_io_ratio(mut self, io_ratio: u8) -> Self {
        assert!((1..=100).contains(&io_ratio), "io_ratio must be in 1..=100");
        self.io_ratio = io_ratio;
        self
    }

    #[must_use]
    pub fn with_selector_rebuild_threshold(mut self, threshold: u32) -> Self {
        self.selector_rebuild_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_cancelled_key_cleanup_interval(mut self, interval: u32) -> Self {
        self.cancelled_key_cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_pending_tasks(mut self, max: usize) -> Self {
        self.max_pending_tasks = max;
        self
    }

    #[must_use]
    pub fn with_rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    #[must_use]
    pub fn with_thread_count(mut self, count: usize) -> Self {
        assert!(count > 0, "thread_count must be at least 1");
        self.thread_count = count;
        self
    }
}

fn default_thread_count() -> usize {
    std::thread::available_parallelism().map_or(2, |n| n.get() * 2)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn builder_produces_the_same_config_as_field_construction() {
        let built = EventLoopConfig::default().with_io_ratio(80).with_max_pending_tasks(64);
        let hand_assembled = EventLoopConfig { io_ratio: 80, max_pending_tasks: 64, ..EventLoopConfig::default() };
        assert_eq!(built, hand_assembled);
    }

    #[test]
    fn default_matches_spec_values() {
        let config = EventLoopConfig::default();
        assert_eq!(config.io_ratio, 50);
        assert_eq!(config.selector_rebuild_threshold, 512);
        assert_eq!(config.cancelled_key_cleanup_interval, 256);
        assert!(!config.disable_key_set_optimization);
        assert_eq!(config.max_pending_tasks, usize::MAX);
        assert_eq!(config.rejection_policy, RejectionPolicy::Reject);
        assert!(config.thread_count >= 2);
    }

    #[test]
    fn builder_methods_compose() {
        let config = EventLoopConfig::default()
            .with_io_ratio(80)
            .with_selector_rebuild_threshold(0)
            .with_max_pending_tasks(64);
        assert_eq!(config.io_ratio, 80);
        assert_eq!(config.selector_rebuild_threshold, 0);
        assert_eq!(config.max_pending_tasks, 64);
    }

    #[test]
    #[should_panic(expected = "io_ratio must be in 1..=100")]
    fn io_ratio_out_of_range_panics() {
        let _ = EventLoopConfig::default().with_io_ratio(0);
    }
}
