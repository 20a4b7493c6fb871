// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Error taxonomy for the event loop (§7). These are kinds, not raw exception types:
//! each variant corresponds to one of the five handling policies the loop applies.

use miette::Diagnostic;
use thiserror::Error;

/// Errors surfaced by the event loop core.
///
/// Most variants are recoverable from the loop's own perspective (it logs and
/// continues); [`EventLoopError::Fatal`] is the one kind that ends the loop.
#[derive(Debug, Error, Diagnostic)]
pub enum EventLoopError {
    /// A single channel failed a read/write/connect. Only that channel is closed; the
    /// loop continues.
    #[error("channel {channel_id} failed during {operation}")]
    #[diagnostic(
        code(reactor_core::transient_io),
        help("the channel has been closed; other channels on this loop are unaffected")
    )]
    TransientIo {
        channel_id: u64,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The selector itself misbehaved, either via a hard I/O error or by crossing the
    /// spurious-wakeup threshold. Triggers a C8 rebuild.
    #[error("selector malfunction on loop {loop_id}")]
    #[cfg_attr(
        target_os = "linux",
        diagnostic(
            code(reactor_core::selector_malfunction),
            help("epoll reported an error; a fresh epoll instance will be built and all \
                  channels re-registered")
        )
    )]
    #[cfg_attr(
        not(target_os = "linux"),
        diagnostic(
            code(reactor_core::selector_malfunction),
            help("the OS readiness primitive reported an error; a fresh selector will \
                  be built and all channels re-registered")
        )
    )]
    SelectorMalfunction {
        loop_id: u64,
        #[source]
        source: std::io::Error,
    },

    /// A task or handler callback panicked. Caught at the cycle boundary; the
    /// submitter's promise (if any) is completed with this error.
    #[error("task panicked: {message}")]
    #[diagnostic(
        code(reactor_core::task_panicked),
        help("the panic was caught at the cycle boundary; the loop continues running")
    )]
    TaskPanicked { message: String },

    /// An unrecoverable condition (allocation failure, interrupted during shutdown).
    /// The loop exits after closing all channels.
    #[error("fatal event loop error: {message}")]
    #[diagnostic(
        code(reactor_core::fatal),
        help("the loop is terminating; this is not recoverable")
    )]
    Fatal { message: String },

    /// A producer's submission was rejected, per the configured [`RejectionPolicy`].
    ///
    /// [`RejectionPolicy`]: crate::common::RejectionPolicy
    #[error("submission rejected: {reason}")]
    #[diagnostic(
        code(reactor_core::rejected),
        help("the task queue is at capacity or the loop is shutting down")
    )]
    Rejected { reason: String },
}

pub type Result<T> = std::result::Result<T, EventLoopError>;
