// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use zerocopy::{AsBytes, FromBytes, Unaligned};

/// Describes the separate error-log buffer used as payload scratch for
/// WRITE/DUMMY_WRITE/READ operations.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct ErrorLogAddressRange {
    pub physical_base: u64,
    pub length: u64,
    pub attributes: u64,
}

/// The mailbox: a single contiguous structure in shared memory through
/// which a caller and the store's mailbox handler exchange one operation
/// at a time, interlocked by the busy bit (outside this struct, in a
/// separate MMIO doorbell register pair — see `erst_core::mailbox`).
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Mailbox {
    pub operation: u32,
    pub status: u32,
    pub record_offset: u64,
    pub record_id: u64,
    pub record_count: u32,
    pub timings: u64,
    pub error_log_address_range: ErrorLogAddressRange,
}

static_assertions::assert_eq_size!(Mailbox, [u8; 4 + 4 + 8 + 8 + 4 + 8 + 24]);

/// The number of bits the `max` half of a packed `timings` word is shifted
/// by, above the `nominal` half.
pub const TIMINGS_MAX_SHIFT: u32 = 32;

/// Nominal and maximum operation-duration figures, as packed into the
/// mailbox's `timings` word: `(max << TIMINGS_MAX_SHIFT) | nominal`. These
/// are advisory only — the core has no timeout or cancellation of its own
///; the caller uses them to size its own polling budget.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Timings {
    pub nominal: u32,
    pub max: u32,
}

impl Timings {
    pub fn pack(self) -> u64 {
        ((self.max as u64) << TIMINGS_MAX_SHIFT) | self.nominal as u64
    }

    pub fn unpack(word: u64) -> Self {
        Timings {
            nominal: word as u32,
            max: (word >> TIMINGS_MAX_SHIFT) as u32,
        }
    }
}
