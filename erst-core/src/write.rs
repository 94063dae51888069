// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Write Engine: the ordered write protocol that adds,
//! replaces, or relocates a record.
//!
//! Modeled as an explicit state machine (`WriteStep`) rather than inline
//! control flow so each step can be traced through [`crate::trace`] and so
//! the two failure paths (`undo_allocate` on step 2 failure;
//! abort-without-cleanup on any flash error after step 3) are structural
//! rather than easy to accidentally skip.

use erst_api::ErstError;
use zerocopy::{AsBytes, FromBytes};

use crate::codec::validate_header;
use crate::header::{PersistenceInfo, RecordHeader, RecordStatus, HEADER_LEN};
use crate::store::Store;
use crate::tracker::{CperInfo, RecordRef};
use crate::trace::Event;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WriteStep {
    Stamp,
    Allocate,
    WriteIncoming,
    WriteBody,
    WriteOutgoing,
    WriteValid,
    WriteDeleted,
}

impl Store {
    /// Executes the write sequence over `record_bytes`
    /// (a full record: header followed by payload). `current` names the
    /// existing record being replaced, if any. Returns the tracker
    /// reference identifying the resulting record, or `Ok` with `dummy`
    /// semantics (no flash touched, allocation undone) when `dummy` is
    /// set.
    pub(crate) fn write_record(
        &mut self,
        record_bytes: &mut [u8],
        current: Option<RecordRef>,
        dummy: bool,
    ) -> Result<RecordRef, ErstError> {
        if record_bytes.len() < HEADER_LEN {
            return Err(ErstError::InvalidParameter);
        }

        // Step 1: stamp persistence-info and validate.
        let mut header = RecordHeader::read_from(&record_bytes[..HEADER_LEN])
            .ok_or(ErstError::InvalidParameter)?;
        header.persistence_info = PersistenceInfo::fresh(RecordStatus::Incoming);
        header.write_to(&mut record_bytes[..HEADER_LEN]);
        validate_header(&header).map_err(ErstError::from)?;
        let record_id = header.record_id;
        let record_length = header.record_length;
        if record_length as usize != record_bytes.len() {
            return Err(ErstError::InvalidParameter);
        }
        self.trace_push(Event::WriteStep {
            step: WriteStep::Stamp,
            record_id,
        });

        if let Some(cur) = current {
            let existing = *self.tracker.get(cur);
            if existing.record_id != record_id {
                return Err(ErstError::InvalidParameter);
            }
        }

        // Step 2: allocate.
        let (block, offset) = self.find_free_space(record_length, dummy)?;
        let info = CperInfo {
            record_id,
            record_length,
            record_offset: offset,
        };
        let new_ref = match self.tracker.allocate_new(info) {
            Ok(r) => r,
            Err(e) => {
                self.undo_allocate(block, record_length);
                return Err(e);
            }
        };
        self.trace_push(Event::WriteStep {
            step: WriteStep::Allocate,
            record_id,
        });

        if dummy {
            // Dummy write: steps 1-2 only, then immediately undo step 2.
            self.tracker.deallocate(new_ref);
            self.undo_allocate(block, record_length);
            return Ok(new_ref);
        }

        self.begin_mutation();

        // Step 3: write INCOMING status.
        if let Err(e) = self.write_cper_status(RecordStatus::Incoming, new_ref) {
            self.abort_after_allocation(new_ref, block, record_length);
            return Err(e);
        }
        self.trace_push(Event::WriteStep {
            step: WriteStep::WriteIncoming,
            record_id,
        });

        // Step 4: write the full body (header, with status already
        // INCOMING, followed by payload).
        let flash = self.flash.as_mut();
        self.trace.push(Event::FlashWrite {
            offset,
            len: record_length,
        });
        if let Err(e) = self.cache.write(flash, offset, record_bytes) {
            // Past this point  says the whole operation aborts
            // without undoing tracking state; the Recovery Engine cleans
            // up the orphaned INCOMING on next init.
            return Err(e);
        }
        self.trace_push(Event::WriteStep {
            step: WriteStep::WriteBody,
            record_id,
        });

        // Step 5: supersede the old record, if replacing.
        if let Some(cur) = current {
            self.write_cper_status(RecordStatus::Outgoing, cur)?;
            self.trace_push(Event::WriteStep {
                step: WriteStep::WriteOutgoing,
                record_id,
            });
        }

        // Step 6: commit the new record.
        self.write_cper_status(RecordStatus::Valid, new_ref)?;
        self.trace_push(Event::WriteStep {
            step: WriteStep::WriteValid,
            record_id,
        });

        let final_ref = if let Some(cur) = current {
            // Step 7: retire the old record and consolidate tracking,
            // preserving `cur`'s position ( promises stable
            // ordering of surviving entries).
            self.write_cper_status(RecordStatus::Deleted, cur)?;
            self.trace_push(Event::WriteStep {
                step: WriteStep::WriteDeleted,
                record_id,
            });
            self.tracker.replace_entry(cur, info);
            self.tracker.deallocate(new_ref);
            self.end_mutation();
            cur
        } else {
            self.end_mutation();
            new_ref
        };

        Ok(final_ref)
    }

    fn abort_after_allocation(&mut self, new_ref: RecordRef, block: u16, length: u32) {
        self.tracker.deallocate(new_ref);
        self.undo_allocate(block, length);
        self.end_mutation();
    }

    /// Moves a tracked record (valid or outgoing) to a new location without
    /// changing its identity or length, by running it back through the
    /// same write protocol as a replace of itself: used by block
    /// reclamation and by `relocate_outgoing`.
    pub(crate) fn relocate_record(&mut self, record_ref: RecordRef) -> Result<(), ErstError> {
        let info = *self.tracker.get(record_ref);
        let mut buf = vec![0u8; info.record_length as usize];
        self.read_bytes(info.record_offset, &mut buf)?;
        self.write_record(&mut buf, Some(record_ref), false)?;
        Ok(())
    }
}
