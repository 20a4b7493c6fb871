// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Small, self-documenting enums used throughout the loop in place of bare `bool`s and
//! magic sentinels.

use std::time::Instant;

/// What a loop iteration should do next, returned by the task and I/O dispatch steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Keep running the current cycle.
    Continue,
    /// Stop the loop (shutdown confirmed).
    Stop,
}

/// The loop's externally observable lifecycle. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoopLifecycleState {
    Running,
    ShuttingDown,
    Shutdown,
    Terminated,
}

impl LoopLifecycleState {
    #[must_use]
    pub fn is_shutting_down(self) -> bool {
        self >= Self::ShuttingDown
    }

    #[must_use]
    pub fn is_shutdown(self) -> bool {
        self >= Self::Shutdown
    }

    #[must_use]
    pub fn is_terminated(self) -> bool {
        self == Self::Terminated
    }
}

/// `next_wakeup_deadline` from §3: tells a foreign-thread producer whether the loop is
/// currently running, parked indefinitely, or parked until a specific instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupDeadline {
    /// The loop thread is running (not parked). A producer observing this need not wake
    /// the selector.
    Awake,
    /// Parked with no deadline; any submission must call `wakeup()`.
    None,
    /// Parked until this monotonic instant.
    At(Instant),
}

impl WakeupDeadline {
    #[must_use]
    pub fn is_awake(self) -> bool {
        matches!(self, Self::Awake)
    }
}

/// Result of calling the pluggable loop strategy with `has_tasks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Skip straight to the next iteration without touching the selector.
    Continue,
    /// Busy-poll for readiness. mio exposes no non-blocking busy-wait distinct from
    /// `select_now`, so the default strategy never returns this; it exists for
    /// custom strategies layered over a primitive that does support it.
    BusyWait,
    /// Block in `select(deadline)`.
    Select,
}

/// What happens to a producer's task when the queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectionPolicy {
    /// Return an error to the submitter synchronously (default).
    #[default]
    Reject,
    /// Silently drop the task.
    Discard,
    /// Run the task synchronously on the caller's thread instead of enqueuing it.
    RunOnCaller,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_ordering_matches_one_way_transitions() {
        assert!(LoopLifecycleState::Running < LoopLifecycleState::ShuttingDown);
        assert!(LoopLifecycleState::ShuttingDown < LoopLifecycleState::Shutdown);
        assert!(LoopLifecycleState::Shutdown < LoopLifecycleState::Terminated);
        assert!(!LoopLifecycleState::Running.is_shutting_down());
        assert!(LoopLifecycleState::ShuttingDown.is_shutting_down());
        assert!(LoopLifecycleState::Terminated.is_shutdown());
    }

    #[test]
    fn wakeup_deadline_awake_check() {
        assert!(WakeupDeadline::Awake.is_awake());
        assert!(!WakeupDeadline::None.is_awake());
        assert!(!WakeupDeadline::At(Instant::now()).is_awake());
    }

    #[test]
    fn rejection_policy_defaults_to_reject() {
        assert_eq!(RejectionPolicy::default(), RejectionPolicy::Reject);
    }
}
