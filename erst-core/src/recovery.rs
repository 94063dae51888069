// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recovery Engine: rebuilds the Record Tracker and Block
//! Manager tables from the flash contents at init, and repairs whatever a
//! crash left in an ambiguous state.
//!
//! Per-block scan first (`scan_block`), then cross-record reconciliation
//! (`reconcile`) once every block's tracker entries and OUTGOING/INCOMING
//! pointers are known, then a final cleanup pass reclaims or erases any
//! block left marked.

use erst_api::{ErstError, RECORD_ID_INVALID};

use crate::codec::{read_header, validate_header};
use crate::header::{RecordStatus, HEADER_LEN, STATUS_OFFSET_IN_HEADER};
use crate::store::Store;
use crate::tracker::{CperInfo, RecordRef, RecordTracker};
use crate::trace::{Event, RecoveryDecision};

impl Store {
    /// Rebuilds all in-RAM tables from scratch by scanning every block, then
    /// reconciles any OUTGOING/INCOMING pair or orphan a crash left behind.
    /// Runs at init and whenever the Mailbox Handler detects desync.
    pub(crate) fn collect_block_info(&mut self) -> Result<(), ErstError> {
        self.tracker = RecordTracker::new(self.tracker.capacity());
        self.init_blocks();

        for block in 0..self.geometry.num_blocks as u16 {
            self.scan_block(block)?;
        }

        self.reconcile()?;

        for block in 0..self.geometry.num_blocks as u16 {
            let entry = self.blocks[block as usize];
            if entry.is_marked_for_reclaim() {
                self.reclaim_block(block)?;
            } else if entry.valid_entries == 0 && entry.used_size > 0 {
                self.erase_block(block)?;
            }
        }

        Ok(())
    }

    /// Walks one block front-to-back, classifying each record by its status
    /// byte and adding it to the tracker. INCOMING and INVALID records are
    /// always the block's last entry, so both arms
    /// stop the walk rather than advance past them.
    fn scan_block(&mut self, block: u16) -> Result<(), ErstError> {
        let base = self.blocks[block as usize].base;
        let end = base + self.geometry.virtual_block_size;
        let mut cursor = base;

        while cursor < end {
            let remaining = end - cursor;
            let mut status_byte = [0u8; 1];
            self.read_bytes(cursor + STATUS_OFFSET_IN_HEADER as u32, &mut status_byte)?;

            match RecordStatus::from_byte(status_byte[0]) {
                Some(RecordStatus::Free) => {
                    let mut rest = vec![0u8; remaining as usize];
                    self.read_bytes(cursor, &mut rest)?;
                    if rest.iter().all(|&b| b == 0xFF) {
                        break;
                    }
                    self.invalidate_tail(block, remaining);
                    break;
                }
                Some(RecordStatus::Incoming) => {
                    let info = CperInfo {
                        record_id: RECORD_ID_INVALID,
                        record_length: remaining,
                        record_offset: cursor,
                    };
                    self.charge_used(block, remaining);
                    let r = self.tracker.allocate_new(info)?;
                    self.tracker.set_incoming(Some(r));
                    break;
                }
                Some(RecordStatus::Invalid) | None => {
                    self.invalidate_tail(block, remaining);
                    break;
                }
                Some(status @ (RecordStatus::Valid
                | RecordStatus::Outgoing
                | RecordStatus::Deleted)) => {
                    let mut header_bytes = vec![0u8; HEADER_LEN];
                    self.read_bytes(cursor, &mut header_bytes)?;
                    let header = read_header(&header_bytes)
                        .filter(|h| validate_header(h).is_ok())
                        .filter(|h| h.record_length > 0 && h.record_length <= remaining);
                    let Some(header) = header else {
                        self.invalidate_tail(block, remaining);
                        break;
                    };
                    let length = header.record_length;
                    self.charge_used(block, length);
                    let info = CperInfo {
                        record_id: header.record_id,
                        record_length: length,
                        record_offset: cursor,
                    };
                    match status {
                        RecordStatus::Valid => {
                            self.tracker.allocate_new(info)?;
                            self.incr_valid_entries(block);
                        }
                        RecordStatus::Outgoing => {
                            let r = self.tracker.allocate_new(info)?;
                            self.tracker.set_outgoing(Some(r));
                            self.incr_valid_entries(block);
                        }
                        RecordStatus::Deleted => {
                            self.charge_wasted(block, length);
                        }
                        _ => unreachable!(),
                    }
                    cursor += length;
                }
            }
        }
        Ok(())
    }

    fn invalidate_tail(&mut self, block: u16, remaining: u32) {
        self.charge_used(block, remaining);
        self.charge_wasted(block, remaining);
        self.mark_for_reclaim(block);
        self.trace_push(Event::RecoveryDecision(RecoveryDecision::BlockInvalidated {
            block,
        }));
    }

    /// Resolves the OUTGOING/INCOMING pointers a crash mid-write can leave
    /// behind.
    fn reconcile(&mut self) -> Result<(), ErstError> {
        let outgoing = self.tracker.outgoing();
        let incoming = self.tracker.incoming();

        match (outgoing, incoming) {
            (Some(out), Some(inc)) => {
                if self.outgoing_incoming_compatible(out, inc)? {
                    self.copy_outgoing_to_incoming(out, inc)?;
                } else {
                    self.invalidate_incoming(inc)?;
                    self.relocate_outgoing(out)?;
                }
            }
            (Some(out), None) => {
                let out_id = self.tracker.get(out).record_id;
                if self.tracker.find(out_id).is_some() {
                    // A VALID entry with the same id already exists: step 6
                    // landed before the crash, so finish step 7.
                    self.finish_outgoing_as_deleted(out)?;
                } else {
                    self.relocate_outgoing(out)?;
                }
            }
            (None, Some(inc)) => {
                self.invalidate_incoming(inc)?;
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// The OUTGOING/INCOMING bitwise compatibility check: the INCOMING copy is
    /// salvageable only if every byte it has already committed either
    /// matches the OUTGOING original or is still erased, and once a byte
    /// diverges, every byte after it is erased too (a single contiguous
    /// write prefix, consistent with NOR program order).
    fn outgoing_incoming_compatible(
        &mut self,
        outgoing: RecordRef,
        incoming: RecordRef,
    ) -> Result<bool, ErstError> {
        let out_info = *self.tracker.get(outgoing);
        let inc_info = *self.tracker.get(incoming);
        if inc_info.record_length < out_info.record_length {
            return Ok(false);
        }
        let mut out_bytes = vec![0u8; out_info.record_length as usize];
        self.read_bytes(out_info.record_offset, &mut out_bytes)?;
        let mut inc_bytes = vec![0u8; out_info.record_length as usize];
        self.read_bytes(inc_info.record_offset, &mut inc_bytes)?;

        match out_bytes.iter().zip(inc_bytes.iter()).position(|(o, i)| o != i) {
            None => Ok(true),
            Some(idx) => Ok(inc_bytes[idx..].iter().all(|&b| b == 0xFF)),
        }
    }

    /// Completes a compatible in-flight replace: copies the OUTGOING body
    /// over the INCOMING slot's erased suffix, promotes it to VALID, and
    /// retires the OUTGOING original.
    fn copy_outgoing_to_incoming(
        &mut self,
        outgoing: RecordRef,
        incoming: RecordRef,
    ) -> Result<(), ErstError> {
        let out_info = *self.tracker.get(outgoing);
        let inc_info = *self.tracker.get(incoming);

        let mut bytes = vec![0u8; out_info.record_length as usize];
        self.read_bytes(out_info.record_offset, &mut bytes)?;
        self.trace_write(inc_info.record_offset, out_info.record_length);
        self.cache
            .write(self.flash.as_mut(), inc_info.record_offset, &bytes)?;

        let inc_block = self.block_index_of_offset(inc_info.record_offset);
        let excess = inc_info.record_length - out_info.record_length;
        self.credit_used(inc_block, excess);
        self.tracker.replace_entry(
            incoming,
            CperInfo {
                record_id: out_info.record_id,
                record_length: out_info.record_length,
                record_offset: inc_info.record_offset,
            },
        );
        self.incr_valid_entries(inc_block);
        self.write_cper_status(RecordStatus::Valid, incoming)?;

        self.write_cper_status(RecordStatus::Deleted, outgoing)?;
        let out_block = self.block_index_of_offset(out_info.record_offset);
        self.charge_wasted(out_block, out_info.record_length);
        self.decr_valid_entries(out_block);
        self.tracker.deallocate(outgoing);

        self.trace_push(Event::RecoveryDecision(
            RecoveryDecision::OutgoingMergedIntoIncoming,
        ));
        Ok(())
    }

    /// Retires an INCOMING record that cannot be salvaged: marks it
    /// INVALID on flash, drops its tracker slot, and schedules its block
    /// for reclamation.
    fn invalidate_incoming(&mut self, incoming: RecordRef) -> Result<(), ErstError> {
        let info = *self.tracker.get(incoming);
        let block = self.block_index_of_offset(info.record_offset);
        self.write_cper_status(RecordStatus::Invalid, incoming)?;
        self.charge_wasted(block, info.record_length);
        self.mark_for_reclaim(block);
        self.tracker.deallocate(incoming);
        self.trace_push(Event::RecoveryDecision(RecoveryDecision::IncomingInvalidated));
        Ok(())
    }

    /// Finishes step 7 for an OUTGOING record whose replacement already
    /// reached VALID before the crash.
    fn finish_outgoing_as_deleted(&mut self, outgoing: RecordRef) -> Result<(), ErstError> {
        let info = *self.tracker.get(outgoing);
        let block = self.block_index_of_offset(info.record_offset);
        self.write_cper_status(RecordStatus::Deleted, outgoing)?;
        self.charge_wasted(block, info.record_length);
        self.decr_valid_entries(block);
        self.tracker.deallocate(outgoing);
        self.trace_push(Event::RecoveryDecision(RecoveryDecision::OutgoingFinalized));
        Ok(())
    }

    /// Moves an OUTGOING record whose INCOMING replacement was too corrupt
    /// to keep, by running it back through the write protocol as a
    /// replace-of-itself.
    fn relocate_outgoing(&mut self, outgoing: RecordRef) -> Result<(), ErstError> {
        self.relocate_record(outgoing)?;
        self.trace_push(Event::RecoveryDecision(RecoveryDecision::OutgoingRelocated));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::header::RecordStatus;
    use crate::test_support::test_store;

    #[test]
    fn recovers_incoming_without_outgoing_as_invalidated() {
        let mut store = test_store(4);
        store.write(0x10, &vec![0xAB; 256]).unwrap();
        let info = *store
            .tracker
            .get(store.tracker.find(0x10).unwrap());
        // Simulate a crash between step 3 (INCOMING written) and step 4: a
        // second record begins immediately after the first but never
        // finishes its body write.
        let second_offset = info.record_offset + info.record_length;
        store
            .sim_poke_status(second_offset, RecordStatus::Incoming)
            .unwrap();
        store.resync();
        assert!(store.init_status().is_ok());
        assert_eq!(store.read(0x10).unwrap(), vec![0xAB; 256]);
    }

    #[test]
    fn recovers_outgoing_with_matching_valid_by_finalizing_delete() {
        let mut store = test_store(4);
        store.write(0x20, &vec![0x11; 128]).unwrap();
        let old_offset = store
            .tracker
            .find(0x20)
            .map(|r| *store.tracker.get(r))
            .unwrap()
            .record_offset;
        store.write(0x20, &vec![0x22; 128]).unwrap();
        // Rewind the old slot's status back to OUTGOING to simulate a crash
        // between step 6 and step 7 of the replace that produced it.
        store.sim_poke_status(old_offset, RecordStatus::Outgoing).unwrap();
        store.resync();
        assert!(store.init_status().is_ok());
        assert_eq!(store.read(0x20).unwrap(), vec![0x22; 128]);
    }
}
