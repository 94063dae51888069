// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! On-flash record header layout: a CPER-style error record header with an
//! embedded persistence-info sub-structure, expressed as exact-byte-offset
//! `zerocopy` structs rather than bitfields so the header can be cast
//! directly onto a flash-backed byte buffer.

use num_derive::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned};

use erst_api::{RECORD_ID_FIRST, RECORD_ID_INVALID};

/// Required magic/version constants. The exact values are arbitrary (this
/// is a from-scratch re-implementation, not a byte-compatible one) but
/// fixed, each checked exactly on every header validation.
pub const SIGNATURE_START: u32 = 0x4552_4353; // "CSRE"
pub const REVISION: u16 = 0x0300;
pub const SIGNATURE_END: u32 = 0x4452_4353; // "CSRD"

/// Persistence-info signature, the two ASCII bytes `'E'`, `'R'`.
pub const PERSISTENCE_SIGNATURE: u16 = u16::from_le_bytes([b'E', b'R']);
pub const PERSISTENCE_MAJOR: u8 = 1;
pub const PERSISTENCE_MINOR: u8 = 1;

/// The persistence-info sub-structure: an 8-byte region whose second byte
/// (`status`) is the only part of a stored record that is ever mutated in
/// place. Field order is fixed so that `STATUS_OFFSET_IN_PERSISTENCE_INFO
/// == 2`.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
#[repr(C, packed)]
pub struct PersistenceInfo {
    pub signature: u16,
    pub status: u8,
    pub major: u8,
    pub minor: u8,
    pub reserved: [u8; 3],
}

static_assertions::assert_eq_size!(PersistenceInfo, [u8; 8]);

/// Offset of `status` within `PersistenceInfo`.
pub const STATUS_OFFSET_IN_PERSISTENCE_INFO: usize = 2;

impl PersistenceInfo {
    pub fn fresh(status: RecordStatus) -> Self {
        PersistenceInfo {
            signature: PERSISTENCE_SIGNATURE,
            status: status as u8,
            major: PERSISTENCE_MAJOR,
            minor: PERSISTENCE_MINOR,
            reserved: [0xFF; 3],
        }
    }
}

/// The 6-valued record lifecycle state. Legal transitions only ever clear
/// bits, which is what makes recovery's bitwise compatibility check
/// (`crate::recovery`) sound on erase-to-1 flash.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum RecordStatus {
    Free = 0xFF,
    Incoming = 0xFE,
    Valid = 0xF0,
    Outgoing = 0xE0,
    Deleted = 0x80,
    Invalid = 0x00,
}

impl RecordStatus {
    pub fn from_byte(byte: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(byte)
    }
}

/// Fixed-layout record header, 128 bytes.
/// Fields other than the three magics, `record_id`, `record_length`, and
/// `persistence_info` are opaque CPER fields (platform/partition/creator
/// ids, notification type, timestamp, flags) that this store never
/// interprets — they exist only so that header size and the status byte's
/// offset match a real CPER record header shape.
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
#[repr(C, packed)]
pub struct RecordHeader {
    pub signature_start: u32,
    pub revision: u16,
    pub signature_end: u32,
    pub section_count: u16,
    pub error_severity: u32,
    pub validation_bits: u32,
    pub record_length: u32,
    pub timestamp: u64,
    pub platform_id: [u8; 16],
    pub partition_id: [u8; 16],
    pub creator_id: [u8; 16],
    pub notification_type: [u8; 16],
    pub record_id: u64,
    pub flags: u32,
    pub persistence_info: PersistenceInfo,
    pub reserved: [u8; 12],
}

pub const HEADER_LEN: usize = 128;

static_assertions::assert_eq_size!(RecordHeader, [u8; HEADER_LEN]);

/// Offset of `persistence_info` within the header.
pub const PERSISTENCE_INFO_OFFSET: usize = 108;

/// Offset of the single mutable status byte within the header, per
/// `offsetof(persistence_info) + 2`.
pub const STATUS_OFFSET_IN_HEADER: usize =
    PERSISTENCE_INFO_OFFSET + STATUS_OFFSET_IN_PERSISTENCE_INFO;

impl RecordHeader {
    pub fn status(&self) -> Option<RecordStatus> {
        RecordStatus::from_byte(self.persistence_info.status)
    }

    pub fn is_reserved_id(id: u64) -> bool {
        id == RECORD_ID_FIRST || id == RECORD_ID_INVALID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_exactly_128_bytes() {
        assert_eq!(core::mem::size_of::<RecordHeader>(), HEADER_LEN);
    }

    #[test]
    fn status_offset_lands_inside_persistence_info() {
        assert_eq!(STATUS_OFFSET_IN_HEADER, 110);
    }

    #[test]
    fn reserved_ids_are_rejected() {
        assert!(RecordHeader::is_reserved_id(RECORD_ID_FIRST));
        assert!(RecordHeader::is_reserved_id(RECORD_ID_INVALID));
        assert!(!RecordHeader::is_reserved_id(0x1234));
    }
}
