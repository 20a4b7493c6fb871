// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Channel-side contract (C7) and the [`Attachment`] tagged variant that lets a
//! registered key carry either a framework channel or an opaque user task (§9 "Dynamic
//! dispatch over attachments").

use std::sync::Arc;

use crate::{error::Result, promise::CompletionHandle};

/// Contract every registered channel must satisfy. The loop never interprets payload
/// bytes; it only calls these lifecycle hooks in response to readiness.
pub trait ChannelHandle: Send + Sync {
    /// Completes a pending non-blocking connect. Called once, the cycle `CONNECT`
    /// becomes ready; the loop clears `OP_CONNECT` from the interest mask immediately
    /// before calling this (§4.5 step 4), since the channel cannot safely do so itself.
    fn finish_connect(&self) -> Result<()>;

    /// Flushes any buffered outbound data. Called when `WRITE` becomes ready.
    fn force_flush(&self) -> Result<()>;

    /// Reads available inbound data, or accepts a new connection for a listening
    /// channel. Called when `READ` or `ACCEPT` becomes ready.
    fn read(&self) -> Result<()>;

    /// Requests a graceful close; `completion` is completed once the channel has
    /// finished flushing and torn down.
    fn close(&self, completion: CompletionHandle<()>);

    /// Tears the channel down immediately, abandoning any buffered data.
    fn close_forcibly(&self);

    /// A stable identifier for logging and test assertions.
    fn channel_id(&self) -> u64;
}

/// What is bound to a registered selection key: either a channel satisfying [`ChannelHandle`],
/// or an opaque internal task (used for loop-internal registrations that aren't
/// user-facing channels, e.g. the self-pipe some selector implementations use — mio's
/// `Waker` makes that unnecessary here, but the variant is kept for any primitive the
/// contract might be run over in the future).
pub enum Attachment {
    Channel(Arc<dyn ChannelHandle>),
    UserTask(Arc<dyn Fn() + Send + Sync>),
    #[cfg(test)]
    TestMarker(u64),
}

impl Attachment {
    #[must_use]
    pub fn channel(handle: Arc<dyn ChannelHandle>) -> Self {
        Self::Channel(handle)
    }

    #[must_use]
    pub fn channel_id(&self) -> Option<u64> {
        match self {
            Self::Channel(handle) => Some(handle.channel_id()),
            Self::UserTask(_) => None,
            #[cfg(test)]
            Self::TestMarker(id) => Some(*id),
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn test_marker(id: u64) -> Self {
        Self::TestMarker(id)
    }

    #[cfg(test)]
    #[must_use]
    pub fn test_marker_id(&self) -> Option<u64> {
        match self {
            Self::TestMarker(id) => Some(*id),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel(handle) => {
                f.debug_tuple("Channel").field(&handle.channel_id()).finish()
            }
            Self::UserTask(_) => f.write_str("UserTask(..)"),
            #[cfg(test)]
            Self::TestMarker(id) => f.debug_tuple("TestMarker").field(id).finish(),
        }
    }
}
