// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The four record operations: Write, Dummy Write, Read, Clear. This is
//! the layer `erst-core/src/mailbox.rs` calls into
//! after decoding a `Mailbox` request, and the layer these tests call
//! directly without going through the wire protocol.

use erst_api::ErstError;
use zerocopy::AsBytes;

use crate::codec::read_header;
use crate::header::{
    PersistenceInfo, RecordHeader, RecordStatus, HEADER_LEN, REVISION, SIGNATURE_END,
    SIGNATURE_START,
};
use crate::store::{max_record_size, Store};

pub(crate) fn build_header(record_id: u64, record_length: u32) -> RecordHeader {
    RecordHeader {
        signature_start: SIGNATURE_START,
        revision: REVISION,
        signature_end: SIGNATURE_END,
        section_count: 1,
        error_severity: 0,
        validation_bits: 0,
        record_length,
        timestamp: 0,
        platform_id: [0; 16],
        partition_id: [0; 16],
        creator_id: [0; 16],
        notification_type: [0; 16],
        record_id,
        flags: 0,
        persistence_info: PersistenceInfo::fresh(RecordStatus::Incoming),
        reserved: [0; 12],
    }
}

/// Builds a complete on-wire record (header followed by payload) the way a
/// caller must stage one into the error-log buffer ahead of a mailbox
/// WRITE/DUMMY_WRITE request. `Store::write`/`Store::dummy_write` build this
/// same layout internally for direct callers; this is the equivalent for
/// anyone going through the mailbox instead.
pub fn format_record(record_id: u64, payload: &[u8]) -> Result<Vec<u8>, ErstError> {
    if RecordHeader::is_reserved_id(record_id) {
        return Err(ErstError::InvalidParameter);
    }
    let record_length = HEADER_LEN
        .checked_add(payload.len())
        .and_then(|n| u32::try_from(n).ok())
        .ok_or(ErstError::InvalidParameter)?;
    let header = build_header(record_id, record_length);
    let mut buf = vec![0u8; record_length as usize];
    header.write_to(&mut buf[..HEADER_LEN]);
    buf[HEADER_LEN..].copy_from_slice(payload);
    Ok(buf)
}

impl Store {
    /// Adds a new record, or replaces the existing one with the same id in
    /// place: if `record_id` is already tracked, this runs
    /// the seven-step replace sequence rather than a plain five-step add.
    pub fn write(&mut self, record_id: u64, payload: &[u8]) -> Result<(), ErstError> {
        self.init_status?;
        if RecordHeader::is_reserved_id(record_id) {
            return Err(ErstError::InvalidParameter);
        }
        let record_length = HEADER_LEN
            .checked_add(payload.len())
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(ErstError::InvalidParameter)?;
        if record_length as usize > max_record_size(&self.geometry) {
            return Err(ErstError::BufferTooSmall);
        }

        let header = build_header(record_id, record_length);
        let mut buf = vec![0u8; record_length as usize];
        header.write_to(&mut buf[..HEADER_LEN]);
        buf[HEADER_LEN..].copy_from_slice(payload);

        let current = self.tracker.find(record_id);
        self.write_record(&mut buf, current, false)?;
        Ok(())
    }

    /// Runs steps 1-2 of the write sequence and immediately undoes the
    /// allocation: proves a write of this size would succeed without
    /// persisting anything.
    pub fn dummy_write(&mut self, record_id: u64, payload_len: usize) -> Result<(), ErstError> {
        self.init_status?;
        if RecordHeader::is_reserved_id(record_id) {
            return Err(ErstError::InvalidParameter);
        }
        let record_length = HEADER_LEN
            .checked_add(payload_len)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(ErstError::InvalidParameter)?;
        if record_length as usize > max_record_size(&self.geometry) {
            return Err(ErstError::BufferTooSmall);
        }
        let header = build_header(record_id, record_length);
        let mut buf = vec![0u8; record_length as usize];
        header.write_to(&mut buf[..HEADER_LEN]);
        let current = self.tracker.find(record_id);
        self.write_record(&mut buf, current, true)?;
        Ok(())
    }

    /// Returns the payload (header stripped) of the named record.
    pub fn read(&mut self, record_id: u64) -> Result<Vec<u8>, ErstError> {
        let buf = self.read_raw(record_id)?;
        Ok(buf[HEADER_LEN..].to_vec())
    }

    /// Returns the full on-flash record, header included, for the mailbox
    /// READ path to place directly into the caller's buffer.
    pub(crate) fn read_raw(&mut self, record_id: u64) -> Result<Vec<u8>, ErstError> {
        self.init_status?;
        let r = self
            .tracker
            .find(record_id)
            .ok_or(ErstError::NotFound)?;
        let info = *self.tracker.get(r);
        let mut buf = vec![0u8; info.record_length as usize];
        self.read_bytes(info.record_offset, &mut buf)?;
        Ok(buf)
    }

    /// Writes a full caller-supplied record (header already filled in, as
    /// the mailbox WRITE/DUMMY_WRITE path hands over after copying it out of
    /// the error-log buffer): `record_id` and `record_length` come from the
    /// header itself rather than from separate mailbox fields. Returns the
    /// id that was written.
    pub(crate) fn write_raw_record(
        &mut self,
        record_bytes: &mut [u8],
        dummy: bool,
    ) -> Result<u64, ErstError> {
        self.init_status?;
        if record_bytes.len() < HEADER_LEN {
            return Err(ErstError::InvalidParameter);
        }
        if record_bytes.len() > max_record_size(&self.geometry) {
            return Err(ErstError::BufferTooSmall);
        }
        let header = read_header(record_bytes).ok_or(ErstError::InvalidParameter)?;
        if RecordHeader::is_reserved_id(header.record_id) {
            return Err(ErstError::InvalidParameter);
        }
        let record_id = header.record_id;
        let current = self.tracker.find(record_id);
        self.write_record(record_bytes, current, dummy)?;
        Ok(record_id)
    }

    /// Marks a record DELETED and frees its tracking slot.
    pub fn clear(&mut self, record_id: u64) -> Result<(), ErstError> {
        self.init_status?;
        let r = self
            .tracker
            .find(record_id)
            .ok_or(ErstError::NotFound)?;
        self.begin_mutation();
        self.write_cper_status(RecordStatus::Deleted, r)?;
        let info = *self.tracker.get(r);
        let block = self.block_index_of_offset(info.record_offset);
        self.charge_wasted(block, info.record_length);
        self.decr_valid_entries(block);
        self.tracker.deallocate(r);
        self.end_mutation();
        Ok(())
    }

    /// The id-traversal cursor backing `GetNext`/`GetStatus`:
    /// `RECORD_ID_FIRST` returns the first id, any other id returns
    /// whatever follows it in insertion order, wrapping.
    pub fn next_record_id(&self, current_id: u64) -> u64 {
        self.tracker.next_record_id(current_id)
    }

    /// Test/operator hook exposing block reclamation directly, bypassing
    /// the need to fill a block through `find_free_space`'s normal
    /// threshold.
    #[cfg(test)]
    pub(crate) fn force_reclaim(&mut self, block: u16) -> Result<(), ErstError> {
        self.reclaim_block(block)
    }
}
