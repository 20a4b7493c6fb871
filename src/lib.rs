// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! A single-threaded event-loop reactor core: a non-blocking I/O channel multiplexer
//! (`mio`-backed), a wait-free submitted-task queue, and a scheduled-task min-heap,
//! sharing each cycle under a configurable I/O-to-task time ratio.
//!
//! Start at [`config::EventLoopConfig`] to tune a loop, [`event_loop::EventLoop`] to run
//! one directly, or [`group::LoopGroup`] to run a pool of them with round-robin channel
//! assignment.

// Connect to source file.
pub mod channel;
pub mod common;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod group;
pub mod log;
pub mod metrics;
pub mod promise;
pub mod ready_keys;
pub mod scheduled;
pub mod selector;
pub mod task_queue;

// Re-export.
pub use channel::*;
pub use common::*;
pub use config::*;
pub use error::*;
pub use event_loop::{EventLoop, Registration, Termination};
pub use group::*;
pub use log::*;
pub use metrics::*;
pub use promise::*;
pub use ready_keys::*;
pub use scheduled::*;
pub use selector::*;
pub use task_queue::*;
