// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Multi-producer, single-consumer bounded task queue (C3).
//!
//! `offer` is wait-free even on rejection: capacity is enforced with an [`AtomicUsize`]
//! counter rather than a lock, backed by [`crossbeam_queue::SegQueue`] for the queue
//! itself.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::{
    common::RejectionPolicy,
    error::{EventLoopError, Result},
};

/// An immediate, one-shot callable submitted for execution on the loop thread.
pub type Task = Box<dyn FnOnce() + Send>;

pub struct TaskQueue {
    queue: SegQueue<Task>,
    len: AtomicUsize,
    capacity: usize,
    rejection_policy: RejectionPolicy,
}

impl TaskQueue {
    #[must_use]
    pub fn new(capacity: usize, rejection_policy: RejectionPolicy) -> Self {
        Self { queue: SegQueue::new(), len: AtomicUsize::new(0), capacity, rejection_policy }
    }

    /// Enqueues `task`. If the queue is at capacity, applies the configured
    /// [`RejectionPolicy`] instead: `Reject` returns an error, `Discard` drops the task
    /// silently, `RunOnCaller` runs it synchronously on the calling thread.
    pub fn offer(&self, task: Task) -> Result<()> {
        let observed = self.len.fetch_add(1, Ordering::AcqRel) + 1;
        if observed > self.capacity {
            self.len.fetch_sub(1, Ordering::AcqRel);
            return match self.rejection_policy {
                RejectionPolicy::Reject => Err(EventLoopError::Rejected {
                    reason: format!("task queue at capacity ({})", self.capacity),
                }),
                RejectionPolicy::Discard => Ok(()),
                RejectionPolicy::RunOnCaller => {
                    task();
                    Ok(())
                }
            };
        }
        self.queue.push(task);
        Ok(())
    }

    /// Called only by the loop thread.
    pub fn poll(&self) -> Option<Task> {
        let task = self.queue.pop();
        if task.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        task
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering as AtomicOrdering},
        Arc,
    };

    use super::*;

    #[test]
    fn offer_then_poll_runs_fifo() {
        let queue = TaskQueue::new(usize::MAX, RejectionPolicy::Reject);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            queue.offer(Box::new(move || order.lock().expect("lock").push(i))).expect("offer");
        }
        while let Some(task) = queue.poll() {
            task();
        }
        assert_eq!(*order.lock().expect("lock"), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn reject_policy_returns_error_at_capacity() {
        let queue = TaskQueue::new(1, RejectionPolicy::Reject);
        queue.offer(Box::new(|| {})).expect("first task fits");
        let result = queue.offer(Box::new(|| {}));
        assert!(result.is_err());
        assert_eq!(queue.len(), 1, "rejected task must not be counted");
    }

    #[test]
    fn discard_policy_drops_silently() {
        let queue = TaskQueue::new(0, RejectionPolicy::Discard);
        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = Arc::clone(&ran);
        queue.offer(Box::new(move || { ran_clone.fetch_add(1, AtomicOrdering::SeqCst); }))
            .expect("discard never errors");
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn run_on_caller_executes_synchronously() {
        let queue = TaskQueue::new(0, RejectionPolicy::RunOnCaller);
        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = Arc::clone(&ran);
        queue.offer(Box::new(move || { ran_clone.fetch_add(1, AtomicOrdering::SeqCst); }))
            .expect("run on caller never errors");
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(queue.len(), 0);
    }
}
