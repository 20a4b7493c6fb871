// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The event loop itself (C5): strategy selection, readiness dispatch, ratio-bounded
//! task draining, spurious-wakeup detection, and shutdown.
//!
//! The cycle body mirrors the reference codebase's `run_worker_loop` shape: each unit of
//! handler/task work runs inside its own `catch_unwind(AssertUnwindSafe(...))` so a
//! single faulty callback can never take the owning thread down (§7 policy).
//!
//! Deviation from a literal reading of §3/§4.5: rather than requiring every foreign-
//! thread `register`/`schedule` call to marshal through the task queue and block on a
//! reply (the "wrap as a task, await completion" owner-thread assertion), the selector
//! and the scheduled-task heap are held behind `Mutex`es here. mio's `Registry` is
//! itself designed for concurrent registration while another thread blocks in
//! `Poll::poll` (see `mio::Registry` docs), so a short-lived lock achieves the same
//! "only one mutator at a time" guarantee as task-marshaling without the extra
//! round-trip — [`EventLoop::run_cycle`] is only ever invoked by the single thread
//! [`crate::group::LoopGroup`] spawns for this loop, so in the steady state the lock is
//! uncontended and the owner-thread invariant holds in practice.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
    channel::Attachment,
    common::{Continuation, LoopLifecycleState, Strategy, WakeupDeadline},
    config::EventLoopConfig,
    error::{EventLoopError, Result},
    metrics::LoopMetrics,
    promise::{CompletionHandle, Outcome, Promise},
    scheduled::{Period, ScheduleHandle, ScheduledEntry, ScheduledTask, ScheduledTaskHeap},
    selector::{Evented, Interest, ReadyOps, RebuildReport, Selector, SelectionKey},
    task_queue::{Task, TaskQueue},
};

/// Every 64 drained tasks the loop re-reads the clock to check the task budget (§4.5
/// step 5), amortizing the cost of the clock read across a batch.
const BUDGET_CHECK_INTERVAL: u32 = 64;

/// Minimum tasks drained per cycle even when step 4 did no I/O, so producers always
/// make progress (§4.5 step 5, §8 boundary "io_ratio = 100 must not starve tasks").
const MIN_TASK_DRAIN: u32 = 16;

fn lifecycle_to_u8(state: LoopLifecycleState) -> u8 {
    match state {
        LoopLifecycleState::Running => 0,
        LoopLifecycleState::ShuttingDown => 1,
        LoopLifecycleState::Shutdown => 2,
        LoopLifecycleState::Terminated => 3,
    }
}

fn lifecycle_from_u8(value: u8) -> LoopLifecycleState {
    match value {
        0 => LoopLifecycleState::Running,
        1 => LoopLifecycleState::ShuttingDown,
        2 => LoopLifecycleState::Shutdown,
        _ => LoopLifecycleState::Terminated,
    }
}

/// Result of [`EventLoop::register`], delivered through the registration promise.
#[derive(Debug, Clone, Copy)]
pub struct Registration {
    pub key: SelectionKey,
}

/// Result of a loop's graceful shutdown, delivered through the termination promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Termination;

/// Default strategy (§4.5 step 1): every cycle still calls into the selector, either
/// non-blocking (`select_now`, when tasks are pending, so they are never starved) or
/// blocking (`select`, otherwise) — never [`Strategy::Continue`]. That variant exists
/// only for a custom strategy layered over a primitive that can skip polling the
/// selector outright; the default one here always has a registered-channel count to
/// report, so it always reduces to [`Strategy::Select`].
fn default_strategy(_has_tasks: bool) -> Strategy {
    Strategy::Select
}

struct ShutdownState {
    quiet_period: Duration,
    deadline: Instant,
    quiet_since: Instant,
    completion: Option<CompletionHandle<Termination>>,
}

/// A single-threaded, single-selector event loop (C5).
///
/// All fields are reachable through `&self`, matching the reference codebase's
/// singleton-with-interior-mutability shape (`RRT`'s `OnceLock`/`Mutex` fields):
/// [`crate::group::LoopGroup`] hands out `Arc<EventLoop>` clones freely as the
/// thread-safe submission surface, while driving [`EventLoop::run_cycle`] in a loop on
/// exactly one dedicated thread.
pub struct EventLoop {
    id: u64,
    config: EventLoopConfig,
    selector: Mutex<Selector>,
    tasks: Arc<TaskQueue>,
    scheduled: Mutex<ScheduledTaskHeap>,
    select_cnt: AtomicU64,
    cancelled_keys: AtomicU32,
    lifecycle: AtomicU8,
    next_wakeup_deadline: Mutex<WakeupDeadline>,
    shutdown: Mutex<Option<ShutdownState>>,
    metrics: LoopMetrics,
}

impl EventLoop {
    pub fn new(id: u64, config: EventLoopConfig) -> std::io::Result<Self> {
        let tasks = Arc::new(TaskQueue::new(config.max_pending_tasks, config.rejection_policy));
        Ok(Self {
            id,
            config,
            selector: Mutex::new(Selector::new()?),
            tasks,
            scheduled: Mutex::new(ScheduledTaskHeap::new()),
            select_cnt: AtomicU64::new(0),
            cancelled_keys: AtomicU32::new(0),
            lifecycle: AtomicU8::new(lifecycle_to_u8(LoopLifecycleState::Running)),
            next_wakeup_deadline: Mutex::new(WakeupDeadline::Awake),
            shutdown: Mutex::new(None),
            metrics: LoopMetrics::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn lifecycle(&self) -> LoopLifecycleState {
        lifecycle_from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.lifecycle().is_shutting_down()
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.lifecycle().is_shutdown()
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.lifecycle().is_terminated()
    }

    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Thread-safe. Registers a channel with this loop's selector.
    pub fn register(
        &self,
        source: Box<dyn Evented>,
        interest: Interest,
        attachment: Attachment,
    ) -> oneshot::Receiver<Outcome<Registration>> {
        let (promise, handle) = Promise::new();
        let receiver = promise_to_receiver(promise);
        let mut selector = self.selector.lock().expect("selector mutex poisoned");
        match selector.register(source, interest, attachment) {
            Ok(key) => handle.success(Registration { key }),
            Err(error) => handle.failure(EventLoopError::TransientIo {
                channel_id: 0,
                operation: "register",
                source: error,
            }),
        }
        drop(selector);
        self.wake_if_parked();
        receiver
    }

    /// Thread-safe. Enqueues `task` for execution on the loop thread, waking the loop
    /// if it is parked (§5 "Submission from foreign threads").
    pub fn execute(&self, task: Task) -> Result<()> {
        if self.is_shutdown() {
            return Err(EventLoopError::Rejected { reason: "loop is shut down".into() });
        }
        self.tasks.offer(task)?;
        self.wake_if_parked();
        Ok(())
    }

    /// Atomic compare-and-set on `next_wakeup_deadline`: wakes the selector only if it
    /// observes a non-`Awake` value, ensuring at most one `wakeup()` call per parking
    /// interval (§5).
    fn wake_if_parked(&self) {
        let mut guard = self.next_wakeup_deadline.lock().expect("wakeup mutex poisoned");
        if !guard.is_awake() {
            *guard = WakeupDeadline::Awake;
            drop(guard);
            let _ = self.selector.lock().expect("selector mutex poisoned").wakeup();
        }
    }

    #[must_use]
    pub fn next_wakeup_deadline(&self) -> WakeupDeadline {
        *self.next_wakeup_deadline.lock().expect("wakeup mutex poisoned")
    }

    pub fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle {
        self.schedule_internal(Instant::now() + delay, Period::Once, task)
    }

    pub fn schedule_at_fixed_rate(
        &self,
        initial: Duration,
        period: Duration,
        task: ScheduledTask,
    ) -> ScheduleHandle {
        self.schedule_internal(Instant::now() + initial, Period::FixedRate(period), task)
    }

    pub fn schedule_with_fixed_delay(
        &self,
        initial: Duration,
        delay: Duration,
        task: ScheduledTask,
    ) -> ScheduleHandle {
        self.schedule_internal(Instant::now() + initial, Period::FixedDelay(delay), task)
    }

    fn schedule_internal(&self, deadline: Instant, period: Period, task: ScheduledTask) -> ScheduleHandle {
        let handle = self.scheduled.lock().expect("scheduled mutex poisoned").add(deadline, period, task);
        self.wake_if_parked();
        handle
    }

    /// Begins graceful shutdown (§4.6, §8 scenario 6). Thread-safe.
    pub fn shutdown_gracefully(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> oneshot::Receiver<Outcome<Termination>> {
        let (promise, handle) = Promise::new();
        let receiver = promise_to_receiver(promise);
        let now = Instant::now();
        *self.shutdown.lock().expect("shutdown mutex poisoned") = Some(ShutdownState {
            quiet_period,
            deadline: now + timeout,
            quiet_since: now,
            completion: Some(handle),
        });
        self.lifecycle.store(lifecycle_to_u8(LoopLifecycleState::ShuttingDown), Ordering::Release);
        self.wake_if_parked();
        receiver
    }

    /// Runs one iteration of the loop (§4.5 steps 1-7). Called repeatedly by the
    /// owning thread until it returns [`Continuation::Stop`].
    pub fn run_cycle(&self) -> Continuation {
        let has_tasks = !self.tasks.is_empty() || self.has_due_scheduled();
        debug_assert_eq!(default_strategy(has_tasks), Strategy::Select);

        let deadline = self.scheduled.lock().expect("scheduled mutex poisoned").peek_deadline();

        // §4.5 step 1: reduce to a non-blocking `select_now` whenever tasks are
        // pending, so they are never starved waiting on a park with no deadline. Only
        // the blocking branch actually parks, so only it publishes a non-`Awake`
        // `next_wakeup_deadline` for foreign-thread producers to observe (§3, §5).
        let select_result = if has_tasks {
            self.selector.lock().expect("selector mutex poisoned").select_now()
        } else {
            *self.next_wakeup_deadline.lock().expect("wakeup mutex poisoned") =
                deadline.map_or(WakeupDeadline::None, WakeupDeadline::At);
            // Recheck immediately after publishing the parking deadline. A foreign
            // submission that landed before this write could have observed `Awake`
            // (stale from the previous cycle) in `wake_if_parked` and skipped calling
            // `wakeup()` (§5 "Submission from foreign threads"). Checking again now,
            // with the parking deadline already published, closes that window: any
            // submission from this point on sees the non-`Awake` value and wakes us
            // instead, so no submission can be missed between the `has_tasks` read
            // above and the park below.
            if !self.tasks.is_empty() || self.has_due_scheduled() {
                *self.next_wakeup_deadline.lock().expect("wakeup mutex poisoned") = WakeupDeadline::Awake;
                self.selector.lock().expect("selector mutex poisoned").select_now()
            } else {
                let result = self.selector.lock().expect("selector mutex poisoned").select(deadline);
                *self.next_wakeup_deadline.lock().expect("wakeup mutex poisoned") = WakeupDeadline::Awake;
                result
            }
        };

        if let Err(source) = select_result {
            let error = EventLoopError::SelectorMalfunction { loop_id: self.id, source };
            warn!(loop_id = self.id, %error, "selector returned an error; forcing an immediate rebuild");
            self.force_rebuild();
            return Continuation::Continue;
        }

        let io_start = Instant::now();
        let did_io = self.dispatch_ready_keys();
        let io_time = io_start.elapsed();

        let drained = self.drain_tasks(did_io, io_time);

        if did_io || drained > 0 {
            self.select_cnt.store(0, Ordering::Release);
            self.metrics.reset_select_count();
        } else {
            self.select_cnt.fetch_add(1, Ordering::AcqRel);
            self.metrics.increment_select_count();
        }
        self.maybe_rebuild();
        self.metrics.set_pending_tasks(self.tasks.len());
        self.metrics.set_registered_channels(
            self.selector.lock().expect("selector mutex poisoned").registered_channels(),
        );

        self.shutdown_check()
    }

    fn has_due_scheduled(&self) -> bool {
        self.scheduled
            .lock()
            .expect("scheduled mutex poisoned")
            .peek_deadline()
            .is_some_and(|deadline| deadline <= Instant::now())
    }

    /// §4.5 step 4: walk every ready key, branching on ready ops. Returns whether any
    /// I/O was actually dispatched (used by the spurious-wakeup detector).
    fn dispatch_ready_keys(&self) -> bool {
        let mut selector = self.selector.lock().expect("selector mutex poisoned");
        let size = selector.ready_keys().size();
        let mut did_io = false;

        for i in 0..size {
            let Some(key) = selector.ready_keys().get(i) else { continue };
            did_io = true;
            let ready = selector.ready_ops(key);
            let channel = match selector.attachment(key) {
                Some(Attachment::Channel(channel)) => Arc::clone(channel),
                Some(Attachment::UserTask(task)) => {
                    let task = Arc::clone(task);
                    if catch_unwind(AssertUnwindSafe(move || task())).is_err() {
                        warn!(loop_id = self.id, "user-task attachment panicked; recovered at cycle boundary");
                    }
                    continue;
                }
                #[cfg(test)]
                Some(Attachment::TestMarker(_)) => continue,
                None => continue,
            };

            if ready.contains(ReadyOps::CONNECT) {
                if let Some(interest) = selector.interest(key) {
                    let _ = selector.reinterest(key, interest - Interest::CONNECT);
                }
                if self.run_guarded(|| channel.finish_connect()).is_err() {
                    channel.close_forcibly();
                    selector.cancel_key(key);
                    self.note_cancelled_key(&mut selector);
                    continue;
                }
            }
            if ready.contains(ReadyOps::WRITE) && self.run_guarded(|| channel.force_flush()).is_err() {
                channel.close_forcibly();
                selector.cancel_key(key);
                self.note_cancelled_key(&mut selector);
                continue;
            }
            if ready.intersects(ReadyOps::READ | ReadyOps::ACCEPT) && self.run_guarded(|| channel.read()).is_err() {
                channel.close_forcibly();
                selector.cancel_key(key);
                self.note_cancelled_key(&mut selector);
            }
        }
        did_io
    }

    /// Runs a fallible handler call, catching a panic the way `run_worker_loop` turns a
    /// worker panic into a `Shutdown(Panic)` notification rather than letting it unwind
    /// past the cycle boundary (§7): either outcome is turned into an
    /// [`EventLoopError`] and logged at warn, never propagated.
    fn run_guarded<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(result) => result.inspect_err(|error| warn!(loop_id = self.id, %error, "handler call failed")),
            Err(_) => {
                warn!(loop_id = self.id, "handler call panicked; recovered at cycle boundary");
                Err(EventLoopError::TaskPanicked { message: "panic caught at cycle boundary".into() })
            }
        }
    }

    fn note_cancelled_key(&self, selector: &mut Selector) {
        let count = self.cancelled_keys.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.config.cancelled_key_cleanup_interval {
            self.cancelled_keys.store(0, Ordering::Release);
            let _ = selector.finalize_cancelled();
            let _ = selector.select_now();
        }
    }

    /// §4.5 step 5: ratio-bounded task/scheduled-task drain.
    fn drain_tasks(&self, did_io: bool, io_time: Duration) -> u32 {
        let ratio = u128::from(self.config.io_ratio);
        let budget: Option<Duration> = if ratio >= 100 {
            None
        } else {
            let io_ns = io_time.as_nanos();
            let budget_ns = io_ns * (100 - ratio) / ratio;
            Some(Duration::from_nanos(u64::try_from(budget_ns).unwrap_or(u64::MAX)))
        };

        let start = Instant::now();
        let mut drained = 0u32;
        loop {
            let due = self.scheduled.lock().expect("scheduled mutex poisoned").poll_if_due(Instant::now());
            let ran_something = match due {
                Some(entry) => {
                    self.run_scheduled(entry);
                    drained += 1;
                    true
                }
                None => match self.tasks.poll() {
                    Some(task) => {
                        self.run_task(task);
                        drained += 1;
                        true
                    }
                    None => false,
                },
            };

            if !ran_something {
                break;
            }
            if drained % BUDGET_CHECK_INTERVAL == 0 && self.budget_exhausted(budget, start, did_io, drained) {
                break;
            }
        }
        drained
    }

    fn budget_exhausted(&self, budget: Option<Duration>, start: Instant, did_io: bool, drained: u32) -> bool {
        if !did_io && drained < MIN_TASK_DRAIN {
            return false;
        }
        budget.is_some_and(|budget| start.elapsed() >= budget)
    }

    fn run_task(&self, task: Task) {
        let result = catch_unwind(AssertUnwindSafe(task));
        if result.is_err() {
            warn!(loop_id = self.id, "submitted task panicked; recovered at cycle boundary");
        }
    }

    fn run_scheduled(&self, entry: ScheduledEntry) {
        let ScheduledEntry { deadline, period, task, .. } = entry;
        match period {
            Period::Once => self.run_task(Box::new({
                let task = Arc::clone(&task);
                move || task()
            })),
            Period::FixedRate(interval) => {
                // Re-inserted *before* running so drift does not accumulate from
                // execution time (§3 "Scheduled task").
                self.reinsert_periodic(deadline + interval, period, Arc::clone(&task));
                self.run_task(Box::new({
                    let task = Arc::clone(&task);
                    move || task()
                }));
            }
            Period::FixedDelay(delay) => {
                self.run_task(Box::new({
                    let task = Arc::clone(&task);
                    move || task()
                }));
                self.reinsert_periodic(Instant::now() + delay, period, task);
            }
        }
    }

    fn reinsert_periodic(&self, deadline: Instant, period: Period, task: ScheduledTask) {
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        self.scheduled.lock().expect("scheduled mutex poisoned").reinsert(deadline, period, task, cancelled);
    }

    /// §4.5 step 6: spurious-wakeup detector. Presumes the selector broken once
    /// `select_cnt` crosses the configured threshold (0 disables).
    fn maybe_rebuild(&self) {
        if self.config.selector_rebuild_threshold == 0 {
            return;
        }
        if self.select_cnt.load(Ordering::Acquire) >= u64::from(self.config.selector_rebuild_threshold) {
            self.force_rebuild();
        }
    }

    /// C8: unconditionally rebuilds the selector (§4.8), resetting `select_cnt`
    /// regardless of why it was called. Invoked both by [`EventLoop::maybe_rebuild`]
    /// once the spurious-wakeup threshold is crossed, and directly from
    /// [`EventLoop::run_cycle`] the moment `select` itself returns a hard I/O error
    /// (§7 "Selector malfunction" — a real error is rebuilt immediately, not folded
    /// into the spurious-wakeup counter and left to repeat up to the threshold first).
    fn force_rebuild(&self) {
        let mut selector = self.selector.lock().expect("selector mutex poisoned");
        match selector.rebuild() {
            Ok(RebuildReport { migrated, failed }) => {
                drop(selector);
                self.metrics.increment_rebuild_count();
                warn!(
                    loop_id = self.id,
                    migrated,
                    failed,
                    rebuild_count = self.metrics.rebuild_count(),
                    "selector rebuilt"
                );
            }
            Err(error) => {
                debug!(loop_id = self.id, %error, "selector rebuild attempt failed");
            }
        }
        self.select_cnt.store(0, Ordering::Release);
    }

    /// §4.6/§8 scenario 6: confirms shutdown once the quiet period has elapsed with no
    /// new submissions, or the overall timeout has passed.
    fn shutdown_check(&self) -> Continuation {
        if !self.is_shutting_down() {
            return Continuation::Continue;
        }

        let mut guard = self.shutdown.lock().expect("shutdown mutex poisoned");
        let Some(state) = guard.as_mut() else { return Continuation::Continue };

        if !self.tasks.is_empty() {
            state.quiet_since = Instant::now();
        }
        let quiet_elapsed = state.quiet_since.elapsed() >= state.quiet_period;
        let timed_out = Instant::now() >= state.deadline;

        if !quiet_elapsed && !timed_out {
            return Continuation::Continue;
        }

        self.lifecycle.store(lifecycle_to_u8(LoopLifecycleState::Shutdown), Ordering::Release);
        drop(guard);
        self.close_all_channels();
        self.lifecycle.store(lifecycle_to_u8(LoopLifecycleState::Terminated), Ordering::Release);

        if let Some(completion) =
            self.shutdown.lock().expect("shutdown mutex poisoned").as_mut().and_then(|s| s.completion.take())
        {
            completion.success(Termination);
        }
        Continuation::Stop
    }

    /// §4.8 step 3 applied at shutdown: every channel still registered is closed
    /// forcibly by rebuilding onto a throwaway selector and dropping it, which
    /// deregisters and drops every still-live record.
    fn close_all_channels(&self) {
        let attachments = self.selector.lock().expect("selector mutex poisoned").drain_attachments();
        for attachment in attachments {
            match attachment {
                Attachment::Channel(channel) => channel.close_forcibly(),
                Attachment::UserTask(_) => {}
                #[cfg(test)]
                Attachment::TestMarker(_) => {}
            }
        }
    }
}

pub(crate) fn promise_to_receiver<T: Send + 'static>(promise: Promise<T>) -> oneshot::Receiver<Outcome<T>> {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    promise.on_complete(move |outcome| {
        if let Some(tx) = tx.lock().expect("oneshot mutex poisoned").take() {
            let outcome = Arc::try_unwrap(outcome).unwrap_or(Outcome::Cancelled);
            let _ = tx.send(outcome);
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    use serial_test::serial;

    use super::*;

    #[test]
    fn new_loop_starts_running_with_no_pending_work() {
        let event_loop = EventLoop::new(1, EventLoopConfig::default()).expect("new loop");
        assert_eq!(event_loop.lifecycle(), LoopLifecycleState::Running);
        assert_eq!(event_loop.pending_tasks(), 0);
    }

    #[test]
    fn execute_enqueues_and_wakes() {
        let event_loop = EventLoop::new(2, EventLoopConfig::default()).expect("new loop");
        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = Arc::clone(&ran);
        event_loop
            .execute(Box::new(move || {
                ran_clone.fetch_add(1, AtomicOrdering::SeqCst);
            }))
            .expect("execute");
        assert_eq!(event_loop.pending_tasks(), 1);
        event_loop.run_cycle();
        assert_eq!(ran.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(event_loop.pending_tasks(), 0);
    }

    #[test]
    fn scheduled_ordering_matches_scenario_4() {
        let event_loop = EventLoop::new(3, EventLoopConfig::default()).expect("new loop");
        let base = Instant::now();
        let order = Arc::new(Mutex::new(Vec::new()));

        let push = |millis: u64, label: &'static str| {
            let order = Arc::clone(&order);
            event_loop.schedule(
                base + Duration::from_millis(millis) - Instant::now(),
                Arc::new(move || order.lock().expect("lock").push(label)),
            );
        };
        push(100, "A");
        push(50, "B");
        push(50, "C");

        std::thread::sleep(Duration::from_millis(120));
        event_loop.run_cycle();
        assert_eq!(*order.lock().expect("lock"), vec!["B", "C", "A"]);
    }

    #[test]
    fn execute_after_shutdown_is_rejected() {
        let event_loop = EventLoop::new(4, EventLoopConfig::default()).expect("new loop");
        let _rx = event_loop.shutdown_gracefully(Duration::from_millis(1), Duration::from_millis(50));
        event_loop.run_cycle();
        std::thread::sleep(Duration::from_millis(5));
        event_loop.run_cycle();
        assert!(event_loop.is_shutdown());
        assert!(event_loop.execute(Box::new(|| {})).is_err());
    }

    #[test]
    fn graceful_shutdown_terminates_after_quiet_period() {
        let event_loop = EventLoop::new(5, EventLoopConfig::default()).expect("new loop");
        let rx = event_loop.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(1));
        let deadline = Instant::now() + Duration::from_secs(1);
        while !event_loop.is_terminated() && Instant::now() < deadline {
            event_loop.run_cycle();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert!(event_loop.is_terminated());
        let outcome = rx.blocking_recv().expect("termination outcome delivered");
        assert!(matches!(outcome, Outcome::Success(Termination)));
    }

    #[test]
    fn wakeup_deadline_transitions_through_park_cycle() {
        let event_loop = EventLoop::new(6, EventLoopConfig::default()).expect("new loop");
        assert!(event_loop.next_wakeup_deadline().is_awake());
    }

    /// §8 scenario 2: with `io_ratio` at 50 (the default), `drain_tasks` must stop
    /// draining once it has spent roughly as long on tasks as step 4 spent on I/O,
    /// rather than running every pending task to completion regardless of budget.
    #[test]
    fn ratio_accounting_bounds_task_drain_to_io_time_budget() {
        let event_loop = EventLoop::new(7, EventLoopConfig::default().with_io_ratio(50)).expect("new loop");
        for _ in 0..500 {
            event_loop.execute(Box::new(|| std::thread::sleep(Duration::from_micros(100)))).expect("execute");
        }
        assert_eq!(event_loop.pending_tasks(), 500);

        let io_time = Duration::from_millis(10);
        let start = Instant::now();
        let drained = event_loop.drain_tasks(true, io_time);
        let elapsed = start.elapsed();

        assert!(drained < 500, "budget should stop the drain well short of all 500 tasks: drained {drained}");
        assert!(elapsed < io_time * 3, "drain overran its ~{io_time:?} budget: ran for {elapsed:?}");
    }

    /// §8 scenario 3: crossing `selector_rebuild_threshold` worth of consecutive no-op
    /// cycles triggers exactly one rebuild, driven through the real `run_cycle` call
    /// chain rather than by calling `maybe_rebuild`/`force_rebuild` in isolation.
    #[test]
    fn spurious_wakeup_threshold_triggers_rebuild_via_run_cycle() {
        let threshold = 4u32;
        let event_loop =
            EventLoop::new(8, EventLoopConfig::default().with_selector_rebuild_threshold(threshold)).expect("new loop");
        assert_eq!(event_loop.metrics().rebuild_count(), 0);

        // Put `select_cnt` one no-op cycle away from the threshold, then drive a single
        // real no-op cycle through `run_cycle`. A scheduled task that is already
        // cancelled keeps `has_due_scheduled` true (so the cycle resolves to a
        // non-blocking `select_now` instead of parking) without itself counting as
        // drained work once `poll_if_due` discards it.
        event_loop.select_cnt.store(u64::from(threshold) - 1, Ordering::SeqCst);
        let handle = event_loop.schedule(Duration::from_millis(0), Arc::new(|| {}));
        handle.cancel();

        event_loop.run_cycle();

        assert_eq!(event_loop.metrics().rebuild_count(), 1, "threshold crossing must rebuild exactly once");
        assert!(
            event_loop.select_cnt.load(Ordering::SeqCst) < u64::from(threshold),
            "select_cnt must reset once the rebuild runs"
        );

        // With select_cnt back at zero, the detector must not fire again on its own.
        event_loop.maybe_rebuild();
        assert_eq!(event_loop.metrics().rebuild_count(), 1, "a single threshold crossing must not repeat rebuilds");
    }

    struct RecordingChannel {
        calls: Mutex<Vec<&'static str>>,
    }

    impl RecordingChannel {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().expect("calls mutex poisoned").clone()
        }
    }

    impl crate::channel::ChannelHandle for RecordingChannel {
        fn finish_connect(&self) -> Result<()> {
            self.calls.lock().expect("calls mutex poisoned").push("finish_connect");
            Ok(())
        }

        fn force_flush(&self) -> Result<()> {
            self.calls.lock().expect("calls mutex poisoned").push("force_flush");
            Ok(())
        }

        fn read(&self) -> Result<()> {
            self.calls.lock().expect("calls mutex poisoned").push("read");
            Ok(())
        }

        fn close(&self, completion: CompletionHandle<()>) {
            completion.success(());
        }

        fn close_forcibly(&self) {}

        fn channel_id(&self) -> u64 {
            1
        }
    }

    /// §8 scenario 5: a key ready on `CONNECT`, `WRITE`, and `READ` at once dispatches
    /// `finish_connect` before `force_flush` before `read`, and `OP_CONNECT` is cleared
    /// from the interest mask once `finish_connect` has run, so a later readiness burst
    /// on the same key never calls it again.
    #[test]
    #[serial]
    fn connect_write_read_dispatch_order_and_interest_clearing() {
        let event_loop = EventLoop::new(9, EventLoopConfig::default()).expect("new loop");

        let (mut a, mut b) = std::os::unix::net::UnixStream::pair().expect("socketpair");
        a.set_nonblocking(true).expect("nonblocking");
        b.set_nonblocking(true).expect("nonblocking");
        std::io::Write::write_all(&mut b, b"x").expect("seed readable data");

        let channel = Arc::new(RecordingChannel::new());
        let source = Box::new(mio::net::UnixStream::from_std(a));
        let rx = event_loop.register(
            source,
            Interest::READ | Interest::WRITE | Interest::CONNECT,
            Attachment::channel(Arc::clone(&channel) as Arc<dyn crate::channel::ChannelHandle>),
        );
        let Outcome::Success(registration) = rx.blocking_recv().expect("registration delivered") else {
            panic!("registration failed")
        };

        {
            let mut selector = event_loop.selector.lock().expect("selector mutex poisoned");
            let ready = selector.select_now().expect("select_now");
            assert!(ready >= 1, "registered descriptor should report ready");
        }
        event_loop.dispatch_ready_keys();

        assert_eq!(channel.calls(), vec!["finish_connect", "force_flush", "read"]);

        let selector = event_loop.selector.lock().expect("selector mutex poisoned");
        let interest = selector.interest(registration.key).expect("key still registered");
        assert!(!interest.contains(Interest::CONNECT), "OP_CONNECT must be cleared after finish_connect runs");
    }
}
