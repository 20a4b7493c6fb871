// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Loop group (C6): owns N [`EventLoop`]s, each driven by its own dedicated OS thread,
//! and chooses one per newly registered channel.
//!
//! Grounded on the reference codebase's `resilient_reactor_thread` module for the
//! "supervising layer holds the workers and coordinates their shutdown" shape, adapted
//! from a single supervised thread to N independent ones since this crate's loops do not
//! restart each other on failure — each loop's own `catch_unwind` boundary (§7) already
//! keeps a faulty handler from taking its thread down.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use tokio::sync::oneshot;
use tracing::info;

use crate::{
    common::Continuation,
    config::EventLoopConfig,
    event_loop::{EventLoop, Termination, promise_to_receiver},
    promise::{Outcome, Promise},
};

/// Chooses which loop in a [`LoopGroup`] a new channel is assigned to.
pub trait LoopChooser: Send + Sync {
    fn choose(&self, loops: &[Arc<EventLoop>]) -> Arc<EventLoop>;
}

/// Round-robin with a power-of-two fast path (bitmask instead of modulo) when the group
/// size is a power of two — the default assignment policy (§4.6).
#[derive(Debug, Default)]
pub struct RoundRobinChooser {
    next: AtomicUsize,
}

impl LoopChooser for RoundRobinChooser {
    fn choose(&self, loops: &[Arc<EventLoop>]) -> Arc<EventLoop> {
        let len = loops.len();
        let index = if len.is_power_of_two() {
            self.next.fetch_add(1, Ordering::Relaxed) & (len - 1)
        } else {
            self.next.fetch_add(1, Ordering::Relaxed) % len
        };
        Arc::clone(&loops[index])
    }
}

/// Owns every loop in a group (C6). Created once; cheaply cloneable via `Arc` internals
/// so the submission surface can be handed to many callers.
pub struct LoopGroup {
    loops: Vec<Arc<EventLoop>>,
    chooser: Box<dyn LoopChooser>,
    threads: Vec<JoinHandle<()>>,
}

impl LoopGroup {
    /// Spawns `config.thread_count` loops, each on its own dedicated OS thread, using
    /// the default round-robin assignment policy.
    pub fn new(config: EventLoopConfig) -> std::io::Result<Self> {
        Self::with_chooser(config, Box::new(RoundRobinChooser::default()))
    }

    pub fn with_chooser(config: EventLoopConfig, chooser: Box<dyn LoopChooser>) -> std::io::Result<Self> {
        let mut loops = Vec::with_capacity(config.thread_count);
        let mut threads = Vec::with_capacity(config.thread_count);

        for id in 0..config.thread_count {
            let event_loop = Arc::new(EventLoop::new(id as u64, config.clone())?);
            let event_loop_for_thread = Arc::clone(&event_loop);
            let handle = std::thread::Builder::new()
                .name(format!("reactor-loop-{id}"))
                .spawn(move || drive(&event_loop_for_thread))
                .expect("spawning a loop thread");
            loops.push(event_loop);
            threads.push(handle);
        }

        Ok(Self { loops, chooser, threads })
    }

    #[must_use]
    pub fn loops(&self) -> &[Arc<EventLoop>] {
        &self.loops
    }

    /// Chooses a loop for a newly registered channel (§4.6).
    #[must_use]
    pub fn choose(&self) -> Arc<EventLoop> {
        self.chooser.choose(&self.loops)
    }

    /// Submits a task to whichever loop [`LoopGroup::choose`] would pick.
    pub fn execute(&self, task: crate::task_queue::Task) -> crate::error::Result<()> {
        self.choose().execute(task)
    }

    /// §4.6: asks every loop to enter `SHUTTING_DOWN`, staged by `quiet_period` and
    /// `timeout`; resolves the group-wide future once every loop has confirmed
    /// termination (§8 scenario 6).
    ///
    /// Fans the per-loop termination receivers in on a dedicated `std::thread` rather
    /// than `tokio::spawn`: nothing else in this crate ever constructs or enters a
    /// Tokio runtime (tokio is only used for the `oneshot` plumbing underneath
    /// [`Promise`]/[`CompletionHandle`](crate::promise::CompletionHandle)), so this
    /// thread-safe §6 submission-surface method must not require a caller to be
    /// running inside one. `oneshot::Receiver::blocking_recv` blocks the calling
    /// thread directly and needs no ambient executor.
    pub fn shutdown_gracefully(
        &self,
        quiet_period: Duration,
        timeout: Duration,
    ) -> oneshot::Receiver<Outcome<Termination>> {
        let per_loop: Vec<_> =
            self.loops.iter().map(|event_loop| event_loop.shutdown_gracefully(quiet_period, timeout)).collect();

        let (promise, handle) = Promise::new();
        let receiver = promise_to_receiver(promise);
        let loop_count = per_loop.len();

        std::thread::Builder::new()
            .name("reactor-group-shutdown".into())
            .spawn(move || {
                let mut all_succeeded = true;
                for rx in per_loop {
                    match rx.blocking_recv() {
                        Ok(outcome) => {
                            if !matches!(outcome, Outcome::Success(_)) {
                                all_succeeded = false;
                            }
                        }
                        Err(_) => all_succeeded = false,
                    }
                }
                info!(loop_count, all_succeeded, "loop group shutdown complete");
                if all_succeeded {
                    handle.success(Termination);
                } else {
                    handle.failure(crate::error::EventLoopError::Fatal {
                        message: "one or more loops failed to confirm termination".into(),
                    });
                }
            })
            .expect("spawning the group-shutdown fan-in thread");

        receiver
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.loops.iter().all(|l| l.is_shutting_down())
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.loops.iter().all(|l| l.is_shutdown())
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.loops.iter().all(|l| l.is_terminated())
    }

    /// Blocks the calling thread until every loop thread has exited or `timeout`
    /// elapses. Returns `true` if every thread joined within the timeout.
    pub fn await_termination(mut self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while !self.is_terminated() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let joined = self.is_terminated();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        joined
    }
}

/// Drives one loop's cycles on its dedicated thread until it signals [`Continuation::Stop`].
fn drive(event_loop: &Arc<EventLoop>) {
    loop {
        match event_loop.run_cycle() {
            Continuation::Continue => {}
            Continuation::Stop => break,
        }
    }
}
