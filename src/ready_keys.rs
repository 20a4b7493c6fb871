// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Append-only ready-key set (C1). Readiness enumeration is index-based rather than
//! hash-set-based, so a cycle with N ready keys does zero allocation beyond the
//! initial `Vec` growth.

use crate::selector::SelectionKey;

/// A grow-on-demand array of keys that were ready in the current cycle, ordered by
/// insertion. Reused cycle over cycle; [`ReadyKeySet::reset`] clears it without
/// deallocating.
#[derive(Debug, Default)]
pub struct ReadyKeySet {
    keys: Vec<Option<SelectionKey>>,
    size: usize,
}

impl ReadyKeySet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a key that became ready this cycle.
    pub fn append(&mut self, key: SelectionKey) {
        if self.size < self.keys.len() {
            self.keys[self.size] = Some(key);
        } else {
            self.keys.push(Some(key));
        }
        self.size += 1;
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<SelectionKey> {
        if index < self.size {
            self.keys[index]
        } else {
            None
        }
    }

    /// Zeroes the size and nulls out every previously occupied slot, so a closed
    /// channel referenced through a prior ready key is dropped rather than pinned
    /// alive by a stale `Some` in an unused tail slot.
    pub fn reset(&mut self) {
        self.reset_from(0);
    }

    /// Nulls out slots `[0, from)` and truncates the live region to start at `from`.
    /// Used mid-cycle to let keys already dispatched this cycle be dropped before the
    /// remainder of the walk completes.
    pub fn reset_from(&mut self, from: usize) {
        for slot in self.keys.iter_mut().take(from.min(self.keys.len())) {
            *slot = None;
        }
        self.size = 0;
    }
}
