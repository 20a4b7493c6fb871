// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Per-loop observability counters (§6 "Observability").

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct LoopMetrics {
    pending_tasks: AtomicUsize,
    registered_channels: AtomicUsize,
    select_count_since_reset: AtomicU64,
    rebuild_count: AtomicU32,
}

impl LoopMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pending_tasks(&self, value: usize) {
        self.pending_tasks.store(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.pending_tasks.load(Ordering::Relaxed)
    }

    pub fn set_registered_channels(&self, value: usize) {
        self.registered_channels.store(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn registered_channels(&self) -> usize {
        self.registered_channels.load(Ordering::Relaxed)
    }

    pub fn increment_select_count(&self) -> u64 {
        self.select_count_since_reset.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_select_count(&self) {
        self.select_count_since_reset.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn select_count_since_reset(&self) -> u64 {
        self.select_count_since_reset.load(Ordering::Relaxed)
    }

    pub fn increment_rebuild_count(&self) -> u32 {
        self.rebuild_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[must_use]
    pub fn rebuild_count(&self) -> u32 {
        self.rebuild_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_count_increments_and_resets() {
        let metrics = LoopMetrics::new();
        assert_eq!(metrics.increment_select_count(), 1);
        assert_eq!(metrics.increment_select_count(), 2);
        metrics.reset_select_count();
        assert_eq!(metrics.select_count_since_reset(), 0);
    }

    #[test]
    fn gauges_reflect_last_set_value() {
        let metrics = LoopMetrics::new();
        metrics.set_pending_tasks(7);
        metrics.set_registered_channels(3);
        assert_eq!(metrics.pending_tasks(), 7);
        assert_eq!(metrics.registered_channels(), 3);
    }
}
