// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Scheduled-task min-heap (C4). A standard binary heap keyed by `(deadline,
//! sequence)`; no crate in the wider pack reaches for a priority-queue alternative, so
//! [`std::collections::BinaryHeap`] is the idiomatic choice here.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{
        atomic::{AtomicBool, Ordering as AtomicOrdering},
        Arc,
    },
    time::{Duration, Instant},
};

/// A callable that may run more than once (fixed-rate / fixed-delay repetitions), so it
/// is held behind an `Arc` rather than consumed by a single call.
pub type ScheduledTask = Arc<dyn Fn() + Send + Sync>;

/// Whether and how a scheduled task repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Runs once and is discarded.
    Once,
    /// Re-inserted with `deadline + period` computed *before* the task body runs, so
    /// drift does not accumulate from execution time.
    FixedRate(Duration),
    /// Re-inserted with `now + delay` computed *after* the task body runs.
    FixedDelay(Duration),
}

/// A handle that cancels a scheduled task lazily: the entry is marked and skipped the
/// next time it would be popped, rather than removed from the heap immediately.
#[derive(Clone)]
pub struct ScheduleHandle {
    cancelled: Arc<AtomicBool>,
}

impl ScheduleHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

pub struct ScheduledEntry {
    pub deadline: Instant,
    pub period: Period,
    pub task: ScheduledTask,
    sequence: u64,
    cancelled: Arc<AtomicBool>,
}

impl ScheduledEntry {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Acquire)
    }
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    /// Reversed so [`BinaryHeap`] (a max-heap) pops the *earliest* deadline first, tied
    /// broken by insertion sequence (§3 "Scheduled task").
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline).then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Default)]
pub struct ScheduledTaskHeap {
    heap: BinaryHeap<ScheduledEntry>,
    next_sequence: u64,
}

impl ScheduledTaskHeap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, deadline: Instant, period: Period, task: ScheduledTask) -> ScheduleHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEntry {
            deadline,
            period,
            task,
            sequence,
            cancelled: Arc::clone(&cancelled),
        });
        ScheduleHandle { cancelled }
    }

    /// Re-inserts an entry already popped from [`ScheduledTaskHeap::poll_if_due`] — used
    /// by the event loop to reschedule periodic tasks without minting a fresh
    /// [`ScheduleHandle`] (the original handle, and its cancellation flag, is reused).
    pub fn reinsert(&mut self, deadline: Instant, period: Period, task: ScheduledTask, cancelled: Arc<AtomicBool>) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEntry { deadline, period, task, sequence, cancelled });
    }

    /// The earliest pending deadline, used to compute the parking horizon. Cancelled
    /// entries are not filtered out here: they are lazily discarded when popped, so the
    /// loop may occasionally wake slightly early for an already-cancelled task. That is
    /// within the scenario 1 wakeup-latency bound and far simpler than a heap that
    /// supports arbitrary removal.
    #[must_use]
    pub fn peek_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Pops and returns the next entry if its deadline has passed, skipping (and
    /// discarding) any cancelled entries along the way. Returns `None` once the next
    /// live entry's deadline is still in the future, or the heap is empty.
    pub fn poll_if_due(&mut self, now: Instant) -> Option<ScheduledEntry> {
        while let Some(entry) = self.heap.peek() {
            if entry.deadline > now {
                return None;
            }
            let entry = self.heap.pop().expect("peeked Some above");
            if entry.is_cancelled() {
                continue;
            }
            return Some(entry);
        }
        None
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_tasks_pop_in_deadline_order_with_insertion_tiebreak() {
        let mut heap = ScheduledTaskHeap::new();
        let base = Instant::now();
        // Submitted A, B, C in that order; A@100ms, B@50ms, C@50ms (scenario 4).
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let push = |heap: &mut ScheduledTaskHeap, order: &Arc<std::sync::Mutex<Vec<&'static str>>>, label: &'static str, millis: u64| {
            let order = Arc::clone(order);
            heap.add(
                base + Duration::from_millis(millis),
                Period::Once,
                Arc::new(move || order.lock().expect("lock").push(label)),
            );
        };

        push(&mut heap, &order, "A", 100);
        push(&mut heap, &order, "B", 50);
        push(&mut heap, &order, "C", 50);

        let far_future = base + Duration::from_millis(1000);
        while let Some(entry) = heap.poll_if_due(far_future) {
            (entry.task)();
        }

        assert_eq!(*order.lock().expect("lock"), vec!["B", "C", "A"]);
    }

    #[test]
    fn not_yet_due_entries_are_not_popped() {
        let mut heap = ScheduledTaskHeap::new();
        let now = Instant::now();
        heap.add(now + Duration::from_secs(10), Period::Once, Arc::new(|| {}));
        assert!(heap.poll_if_due(now).is_none());
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn cancelled_entry_is_skipped_on_pop() {
        let mut heap = ScheduledTaskHeap::new();
        let now = Instant::now();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        let handle = heap.add(now, Period::Once, Arc::new(move || ran_clone.store(true, AtomicOrdering::SeqCst)));
        handle.cancel();

        assert!(heap.poll_if_due(now).is_none());
        assert!(!ran.load(AtomicOrdering::SeqCst));
        assert!(heap.is_empty());
    }

    #[test]
    fn peek_deadline_reports_the_earliest_entry() {
        let mut heap = ScheduledTaskHeap::new();
        let now = Instant::now();
        heap.add(now + Duration::from_millis(200), Period::Once, Arc::new(|| {}));
        heap.add(now + Duration::from_millis(50), Period::Once, Arc::new(|| {}));
        assert_eq!(heap.peek_deadline(), Some(now + Duration::from_millis(50)));
    }
}
