// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Promise/future completion handles (§9 "Promise/future control flow").
//!
//! A [`Promise<T>`] is the read side: cheaply cloneable, any number of observers may
//! register a callback on it. A [`CompletionHandle<T>`] is the write side the loop
//! holds and consumes exactly once via [`CompletionHandle::complete`] (or the
//! `success`/`failure`/`cancel` shorthands).
//!
//! Ordering contract: a callback registered via [`Promise::on_complete`] *before*
//! completion is queued and run on the thread that calls [`CompletionHandle::complete`]
//! (the completing thread). A callback registered *after* completion runs inline, on the
//! caller's own thread, immediately — no hop to the completing thread is needed because
//! the outcome is already known.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::error::EventLoopError;

/// The result a promise can be completed with.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failure(EventLoopError),
    Cancelled,
}

type Callback<T> = Box<dyn FnOnce(Arc<Outcome<T>>) + Send>;

enum PromiseState<T> {
    Pending(Vec<Callback<T>>),
    Completed(Arc<Outcome<T>>),
}

pub struct Promise<T> {
    state: Arc<Mutex<PromiseState<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self { state: Arc::clone(&self.state) }
    }
}

impl<T> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

pub struct CompletionHandle<T> {
    state: Arc<Mutex<PromiseState<T>>>,
}

impl<T> std::fmt::Debug for CompletionHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Creates a linked promise/completion-handle pair.
    #[must_use]
    pub fn new() -> (Self, CompletionHandle<T>) {
        let state = Arc::new(Mutex::new(PromiseState::Pending(Vec::new())));
        (Self { state: Arc::clone(&state) }, CompletionHandle { state })
    }

    /// Registers a callback to run once this promise completes.
    pub fn on_complete(&self, callback: impl FnOnce(Arc<Outcome<T>>) + Send + 'static) {
        let mut guard = self.state.lock().expect("promise mutex poisoned");
        match &mut *guard {
            PromiseState::Pending(callbacks) => callbacks.push(Box::new(callback)),
            PromiseState::Completed(outcome) => {
                let outcome = Arc::clone(outcome);
                drop(guard);
                callback(outcome);
            }
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(&*self.state.lock().expect("promise mutex poisoned"), PromiseState::Completed(_))
    }

    /// Wraps this promise in an awaitable handle backed by a dedicated one-shot channel,
    /// for callers that would rather `.wait().await` than register a callback. Multiple
    /// independent [`SubmissionFuture`]s can be derived from clones of the same
    /// [`Promise`].
    #[must_use]
    pub fn into_future(self) -> SubmissionFuture<T> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.on_complete(move |outcome| {
            if let Some(tx) = tx.lock().expect("oneshot mutex poisoned").take() {
                let _ = tx.send(outcome);
            }
        });
        SubmissionFuture { receiver: rx }
    }
}

impl<T: Send + 'static> CompletionHandle<T> {
    /// Completes the promise exactly once, running any pre-registered callbacks inline
    /// on this (the completing) thread before returning.
    pub fn complete(self, outcome: Outcome<T>) {
        let outcome = Arc::new(outcome);
        let callbacks = {
            let mut guard = self.state.lock().expect("promise mutex poisoned");
            match std::mem::replace(&mut *guard, PromiseState::Completed(Arc::clone(&outcome))) {
                PromiseState::Pending(callbacks) => callbacks,
                PromiseState::Completed(_) => Vec::new(),
            }
        };
        for callback in callbacks {
            callback(Arc::clone(&outcome));
        }
    }

    pub fn success(self, value: T) {
        self.complete(Outcome::Success(value));
    }

    pub fn failure(self, error: EventLoopError) {
        self.complete(Outcome::Failure(error));
    }

    pub fn cancel(self) {
        self.complete(Outcome::Cancelled);
    }
}

/// An awaitable handle returned from the submission surface (`register`,
/// `shutdown_gracefully`, ...) for callers running inside an async runtime.
pub struct SubmissionFuture<T> {
    receiver: oneshot::Receiver<Arc<Outcome<T>>>,
}

impl<T> SubmissionFuture<T> {
    pub async fn wait(self) -> Option<Arc<Outcome<T>>> {
        self.receiver.await.ok()
    }
}

impl<T> std::fmt::Debug for SubmissionFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionFuture").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn callback_registered_before_completion_runs_on_completing_thread() {
        let (promise, handle) = Promise::<u32>::new();
        let (tx, rx) = mpsc::channel();
        promise.on_complete(move |outcome| {
            if let Outcome::Success(value) = &*outcome {
                tx.send(*value).expect("send");
            }
        });

        let completer = std::thread::spawn(move || handle.success(42));
        completer.join().expect("completer thread");

        assert_eq!(rx.recv().expect("callback ran"), 42);
    }

    #[test]
    fn callback_registered_after_completion_runs_inline() {
        let (promise, handle) = Promise::<u32>::new();
        handle.success(7);
        assert!(promise.is_completed());

        let (tx, rx) = mpsc::channel();
        promise.on_complete(move |outcome| {
            if let Outcome::Success(value) = &*outcome {
                tx.send(*value).expect("send");
            }
        });
        assert_eq!(rx.try_recv().expect("ran inline, no thread hop needed"), 7);
    }

    #[test]
    fn cancel_shorthand_produces_cancelled_outcome() {
        let (promise, handle) = Promise::<u32>::new();
        promise.on_complete(|outcome| assert!(matches!(&*outcome, Outcome::Cancelled)));
        handle.cancel();
    }

    #[test]
    fn failure_shorthand_carries_the_error() {
        let (promise, handle) = Promise::<u32>::new();
        promise.on_complete(|outcome| assert!(matches!(&*outcome, Outcome::Failure(_))));
        handle.failure(EventLoopError::Fatal { message: "boom".into() });
    }

    #[tokio::test]
    async fn into_future_resolves_after_completion() {
        let (promise, handle) = Promise::<u32>::new();
        let future = promise.into_future();
        handle.success(5);
        let outcome = future.wait().await.expect("completed");
        assert!(matches!(&*outcome, Outcome::Success(5)));
    }
}
