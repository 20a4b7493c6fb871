// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Selector wrapper (C2) and rebuild mitigation (C8).
//!
//! Wraps [`mio::Poll`] directly rather than a reflection-tuned selector implementation.
//! The ready-key set (C1) is this wrapper's own field, populated by iterating (and then
//! discarding) `mio::Events` each cycle — see [`ReadyKeySet`].
//!
//! This crate binds mio's epoll (Linux) / kqueue (macOS, BSD) backend, which never
//! surfaces a zero-bit `Event`. The `readyOps == 0` defensive branch some selector
//! implementations need does not apply here; see `SPEC_FULL.md` §4.2 and §9.

use std::{
    collections::HashMap,
    io,
    sync::Arc,
    time::{Duration, Instant},
};

use bitflags::bitflags;
use mio::{event::Event, Events, Interest as MioInterest, Poll, Token, Waker};

use crate::{channel::Attachment, ready_keys::ReadyKeySet};

bitflags! {
    /// Subset of {READ, WRITE, CONNECT, ACCEPT} a channel is interested in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interest: u8 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const CONNECT = 0b0100;
        const ACCEPT = 0b1000;
    }
}

bitflags! {
    /// Subset of {READ, WRITE, CONNECT, ACCEPT} that were observed ready.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ReadyOps: u8 {
        const READ = 0b0001;
        const WRITE = 0b0010;
        const CONNECT = 0b0100;
        const ACCEPT = 0b1000;
    }
}

/// Anything registerable with a [`mio::Registry`] that can also be migrated to a fresh
/// one during a C8 rebuild.
pub trait Evented: mio::event::Source + Send {}
impl<T: mio::event::Source + Send> Evented for T {}

/// Identifies a registration. Doubles as the channel-side `KeyToken` from the design
/// notes: the channel holds only this opaque handle, never the descriptor or the
/// selector's internal record, breaking the channel/loop ownership cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SelectionKey(Token);

impl SelectionKey {
    #[cfg(test)]
    pub(crate) fn for_test(token: usize) -> Self {
        Self(Token(token))
    }
}

struct Record {
    source: Box<dyn Evented>,
    interest: Interest,
    ready: ReadyOps,
    attachment: Attachment,
    cancelled: bool,
}

/// Outcome of a C8 rebuild: how many registrations migrated cleanly vs. had to be
/// closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub migrated: u32,
    pub failed: u32,
}

/// A deadline within this long of "now" converts to a non-blocking `select_now` rather
/// than a sub-millisecond sleep (§4.2).
const NEAR_NOW_THRESHOLD: Duration = Duration::from_micros(5);

const WAKE_TOKEN: Token = Token(usize::MAX);
const DEFAULT_EVENTS_CAPACITY: usize = 1024;

pub struct Selector {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
    records: HashMap<Token, Record>,
    ready: ReadyKeySet,
    next_token: usize,
    cancelled_pending: usize,
}

impl Selector {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        Ok(Self {
            poll,
            events: Events::with_capacity(DEFAULT_EVENTS_CAPACITY),
            waker,
            records: HashMap::new(),
            ready: ReadyKeySet::new(),
            next_token: 0,
            cancelled_pending: 0,
        })
    }

    /// Registers a new descriptor, returning the key to reference it by.
    pub fn register(
        &mut self,
        mut source: Box<dyn Evented>,
        interest: Interest,
        attachment: Attachment,
    ) -> io::Result<SelectionKey> {
        let token = Token(self.next_token);
        self.next_token += 1;
        source.register(self.poll.registry(), token, to_mio_interest(interest))?;
        self.records.insert(
            token,
            Record {
                source,
                interest,
                ready: ReadyOps::empty(),
                attachment,
                cancelled: false,
            },
        );
        Ok(SelectionKey(token))
    }

    /// Changes a key's interest mask in place, e.g. clearing `CONNECT` once
    /// `finish_connect` has run (§4.5 step 4), or re-registering after a read side is
    /// closed.
    pub fn reinterest(&mut self, key: SelectionKey, interest: Interest) -> io::Result<()> {
        let record = self
            .records
            .get_mut(&key.0)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown selection key"))?;
        record
            .source
            .reregister(self.poll.registry(), key.0, to_mio_interest(interest))?;
        record.interest = interest;
        Ok(())
    }

    /// May be called from any thread: marks the key cancelled. Finalized (deregistered
    /// and dropped) on the owner thread during the next [`Selector::finalize_cancelled`]
    /// call.
    pub fn cancel_key(&mut self, key: SelectionKey) {
        if let Some(record) = self.records.get_mut(&key.0) {
            if !record.cancelled {
                record.cancelled = true;
                self.cancelled_pending += 1;
            }
        }
    }

    /// Deregisters and drops every key cancelled since the last call. Returns the
    /// number cleaned up.
    pub fn finalize_cancelled(&mut self) -> usize {
        if self.cancelled_pending == 0 {
            return 0;
        }
        let registry = self.poll.registry();
        let mut cleaned = 0usize;
        self.records.retain(|_, record| {
            if record.cancelled {
                let _ = record.source.deregister(registry);
                cleaned += 1;
                false
            } else {
                true
            }
        });
        self.cancelled_pending = 0;
        cleaned
    }

    pub fn ready_ops(&self, key: SelectionKey) -> ReadyOps {
        self.records.get(&key.0).map_or(ReadyOps::empty(), |r| r.ready)
    }

    pub fn interest(&self, key: SelectionKey) -> Option<Interest> {
        self.records.get(&key.0).map(|r| r.interest)
    }

    pub fn attachment(&self, key: SelectionKey) -> Option<&Attachment> {
        self.records.get(&key.0).map(|r| &r.attachment)
    }

    /// `registeredChannels = |selector.keys| - cancelledKeys` (§3 invariant).
    pub fn registered_channels(&self) -> usize {
        self.records.len() - self.cancelled_pending
    }

    pub fn ready_keys(&self) -> &ReadyKeySet {
        &self.ready
    }

    /// Deregisters every still-registered record and returns its attachment, for use
    /// during shutdown (§4.5 step 7) where every registered channel must be closed.
    /// Leaves the selector with no registrations; the underlying `Poll` itself is left
    /// intact and reusable.
    pub fn drain_attachments(&mut self) -> Vec<Attachment> {
        let registry = self.poll.registry();
        let records = std::mem::take(&mut self.records);
        self.cancelled_pending = 0;
        records
            .into_values()
            .map(|mut record| {
                let _ = record.source.deregister(registry);
                record.attachment
            })
            .collect()
    }

    /// Non-blocking poll. Returns the number of ready keys.
    pub fn select_now(&mut self) -> io::Result<usize> {
        self.poll_for(Some(Duration::ZERO))
    }

    /// Blocks until a descriptor is ready, `wakeup()` is called, or `deadline` is
    /// reached. `None` means block indefinitely. A deadline within
    /// [`NEAR_NOW_THRESHOLD`] of now is converted to a non-blocking poll.
    pub fn select(&mut self, deadline: Option<Instant>) -> io::Result<usize> {
        let timeout = match deadline {
            None => None,
            Some(instant) => {
                let now = Instant::now();
                if instant <= now + NEAR_NOW_THRESHOLD {
                    Some(Duration::ZERO)
                } else {
                    Some(instant.duration_since(now))
                }
            }
        };
        self.poll_for(timeout)
    }

    /// Idempotent; causes a concurrent (or subsequent) `select` to return promptly.
    pub fn wakeup(&self) -> io::Result<()> {
        self.waker.wake()
    }

    fn poll_for(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.ready.reset();
        self.poll.poll(&mut self.events, timeout)?;
        for event in &self.events {
            let token = event.token();
            if token == WAKE_TOKEN {
                continue;
            }
            if let Some(record) = self.records.get_mut(&token) {
                record.ready = ready_ops_from_event(event);
                self.ready.append(SelectionKey(token));
            }
        }
        Ok(self.ready.size())
    }

    /// C8: replace the underlying selector with a fresh one, migrating every
    /// non-cancelled registration across and preserving its interest mask and
    /// attachment. Registration tokens are kept stable across the swap, so channels
    /// never need to observe a new `SelectionKey` (a simplification over updating a
    /// mutable `selectionKey` field per channel: the token *is* the stable field).
    pub fn rebuild(&mut self) -> io::Result<RebuildReport> {
        let new_poll = Poll::new()?;
        let new_waker = Arc::new(Waker::new(new_poll.registry(), WAKE_TOKEN)?);

        let mut migrated = 0u32;
        let mut failed = 0u32;

        // Re-register requires the (token, record) pair, so iterate by key.
        let tokens: Vec<Token> = self
            .records
            .iter()
            .filter(|(_, r)| !r.cancelled)
            .map(|(t, _)| *t)
            .collect();
        for token in tokens {
            let record = self.records.get_mut(&token).expect("token came from records");
            match record
                .source
                .register(new_poll.registry(), token, to_mio_interest(record.interest))
            {
                Ok(()) => migrated += 1,
                Err(_) => {
                    record.cancelled = true;
                    self.cancelled_pending += 1;
                    failed += 1;
                }
            }
        }

        self.records.retain(|_, r| !r.cancelled);
        self.cancelled_pending = 0;
        self.poll = new_poll;
        self.waker = new_waker;
        self.ready.reset();

        Ok(RebuildReport { migrated, failed })
    }
}

fn to_mio_interest(interest: Interest) -> MioInterest {
    let mut mio_interest: Option<MioInterest> = None;
    if interest.intersects(Interest::READ | Interest::ACCEPT) {
        mio_interest = Some(MioInterest::READABLE);
    }
    if interest.intersects(Interest::WRITE | Interest::CONNECT) {
        mio_interest = Some(match mio_interest {
            Some(existing) => existing.add(MioInterest::WRITABLE),
            None => MioInterest::WRITABLE,
        });
    }
    mio_interest.unwrap_or(MioInterest::READABLE)
}

/// mio only distinguishes readable/writable; READ/ACCEPT and WRITE/CONNECT are
/// disambiguated by the dispatcher intersecting this with the channel's own interest
/// mask (§4.5 step 4).
fn ready_ops_from_event(event: &Event) -> ReadyOps {
    let mut ops = ReadyOps::empty();
    if event.is_readable() {
        ops |= ReadyOps::READ | ReadyOps::ACCEPT;
    }
    if event.is_writable() {
        ops |= ReadyOps::WRITE | ReadyOps::CONNECT;
    }
    ops
}
