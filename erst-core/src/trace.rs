// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small fixed-capacity ring buffer of recent events: entries are `Copy`,
//! the oldest is overwritten first, and the buffer is drained for
//! post-mortem inspection rather than streamed anywhere live. A plain owned
//! `VecDeque`-backed type, since this crate runs as a single host-owned
//! `Store` value rather than a task with its own static memory region.
//!
//! Every flash I/O and every write-engine step and recovery decision pushes
//! one entry here instead of scattering ad hoc logging calls through the
//! core.

use std::collections::VecDeque;

/// One traced event. Kept deliberately small and `Copy` so pushing an entry
/// is cheap enough to call unconditionally on every flash access.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Event {
    FlashRead { offset: u32, len: u32 },
    FlashWrite { offset: u32, len: u32 },
    FlashErase { offset: u32, len: u32 },
    WriteStep { step: crate::write::WriteStep, record_id: u64 },
    RecoveryDecision(RecoveryDecision),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecoveryDecision {
    BlockInvalidated { block: u16 },
    BlockReclaimed { block: u16 },
    IncomingInvalidated,
    OutgoingRelocated,
    OutgoingMergedIntoIncoming,
    OutgoingFinalized,
}

/// Fixed-capacity ring buffer. Pushing past capacity silently drops the
/// oldest entry, keeping only the most recent `N` events.
#[derive(Debug)]
pub struct Ringbuf<T, const N: usize> {
    entries: VecDeque<T>,
}

impl<T, const N: usize> Ringbuf<T, N> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(N),
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() == N {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T, const N: usize> Default for Ringbuf<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Capacity of the store's event trace. Arbitrary but generous enough to
/// cover a handful of full recovery passes.
pub const TRACE_CAPACITY: usize = 256;

pub type Trace = Ringbuf<Event, TRACE_CAPACITY>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_past_capacity() {
        let mut rb: Ringbuf<u32, 3> = Ringbuf::new();
        rb.push(1);
        rb.push(2);
        rb.push(3);
        rb.push(4);
        let collected: Vec<_> = rb.iter().copied().collect();
        assert_eq!(collected, vec![2, 3, 4]);
    }
}
