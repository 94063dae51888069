// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Block Manager: per virtual-block accounting, placement
//! of new/relocated records, and block reclamation.

use erst_api::ErstError;

use crate::store::Store;
use crate::tracker::RecordRef;

/// Per-block accounting. `valid_entries < 0` means "marked for reclaim";
/// its magnitude is the true entry count.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockInfoEntry {
    pub base: u32,
    pub used_size: u32,
    pub wasted_size: u32,
    pub valid_entries: i32,
}

impl BlockInfoEntry {
    fn fresh(base: u32) -> Self {
        BlockInfoEntry {
            base,
            used_size: 0,
            wasted_size: 0,
            valid_entries: 0,
        }
    }

    pub fn is_marked_for_reclaim(&self) -> bool {
        self.valid_entries < 0
    }

    pub fn entry_count(&self) -> u32 {
        self.valid_entries.unsigned_abs()
    }

    pub fn free_space(&self, block_size: u32) -> u32 {
        block_size.saturating_sub(self.used_size)
    }
}

impl Store {
    pub(crate) fn init_blocks(&mut self) {
        let geom = self.geometry;
        self.blocks = (0..geom.num_blocks as u16)
            .map(|b| BlockInfoEntry::fresh(geom.block_base(b)))
            .collect();
    }

    pub fn blocks(&self) -> &[BlockInfoEntry] {
        &self.blocks
    }

    pub(crate) fn block_index_of_offset(&self, offset: u32) -> u16 {
        let geom = self.geometry;
        ((offset - geom.partition_base) / geom.virtual_block_size) as u16
    }

    pub(crate) fn mark_for_reclaim(&mut self, block: u16) {
        let entry = &mut self.blocks[block as usize];
        if entry.valid_entries > 0 {
            entry.valid_entries = -entry.valid_entries;
        } else if entry.valid_entries == 0 {
            // A block can be marked for reclaim with zero valid entries
            // when it holds only DELETED/INVALID bytes; represent that with
            // a sentinel negative zero by borrowing one bit of `used_size`
            // is unnecessary here — an all-dead block is erased directly.
        }
    }

    /// Erases the underlying sectors and zeros the in-RAM counters.
    pub(crate) fn erase_block(&mut self, block: u16) -> Result<(), ErstError> {
        let base = self.blocks[block as usize].base;
        let len = self.geometry.virtual_block_size;
        self.trace_erase(base, len);
        self.cache.erase(self.flash.as_mut(), base, len)?;
        self.blocks[block as usize] = BlockInfoEntry::fresh(base);
        Ok(())
    }

    pub(crate) fn records_in_block(&self, block: u16) -> Vec<RecordRef> {
        let base = self.blocks[block as usize].base;
        let end = base + self.geometry.virtual_block_size;
        self.tracker
            .all()
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                (e.record_offset >= base && e.record_offset < end)
                    .then_some(i as u32)
            })
            .collect()
    }

    pub(crate) fn charge_used(&mut self, block: u16, bytes: u32) {
        self.blocks[block as usize].used_size += bytes;
    }

    pub(crate) fn charge_wasted(&mut self, block: u16, bytes: u32) {
        self.blocks[block as usize].wasted_size += bytes;
    }

    pub(crate) fn credit_used(&mut self, block: u16, bytes: u32) {
        self.blocks[block as usize].used_size -= bytes;
    }

    pub(crate) fn incr_valid_entries(&mut self, block: u16) {
        let entry = &mut self.blocks[block as usize];
        if entry.valid_entries >= 0 {
            entry.valid_entries += 1;
        } else {
            entry.valid_entries -= 1;
        }
    }

    pub(crate) fn decr_valid_entries(&mut self, block: u16) {
        let entry = &mut self.blocks[block as usize];
        if entry.valid_entries > 0 {
            entry.valid_entries -= 1;
        } else if entry.valid_entries < 0 {
            entry.valid_entries += 1;
        }
    }

    /// Placement policy, evaluated starting at
    /// `most_recent_block` and wrapping.
    ///
    /// 1. Prefer an in-use block whose trailing free space fits `length`.
    /// 2. Otherwise remember the first fully-empty block and the
    ///    most-wasted reclaimable block.
    /// 3. If more than one empty-or-reclaiming block exists, place at the
    ///    start of the free block.
    /// 4. Otherwise reclaim the most-wasted block and retry (never during
    ///    a dummy op, and never with a live OUTGOING — then
    ///    `OutOfResources`).
    ///
    /// On success, debits `used_size` and increments `valid_entries`
    /// in advance; the caller must call [`Store::undo_allocate`] if the
    /// subsequent flash write fails.
    pub(crate) fn find_free_space(
        &mut self,
        length: u32,
        dummy: bool,
    ) -> Result<(u16, u32), ErstError> {
        let num_blocks = self.geometry.num_blocks as u16;
        let block_size = self.geometry.virtual_block_size;

        let mut empty_candidate: Option<u16> = None;
        let mut reclaim_candidates: Vec<(u16, u32)> = Vec::new(); // (block, wasted)
        let mut reclaimable_count = 0u32;

        for i in 0..num_blocks {
            let block = (self.most_recent_block + i) % num_blocks;
            let entry = self.blocks[block as usize];

            if entry.valid_entries > 0 && entry.free_space(block_size) >= length
            {
                let base = entry.base;
                let offset = base + entry.used_size;
                self.commit_allocation(block, length);
                return Ok((block, offset));
            }

            if entry.valid_entries == 0 && entry.used_size == 0 {
                reclaimable_count += 1;
                if empty_candidate.is_none() {
                    empty_candidate = Some(block);
                }
            } else if entry.is_marked_for_reclaim() {
                reclaimable_count += 1;
                let after_reclaim_fits =
                    block_size.saturating_sub(entry.used_size - entry.wasted_size)
                        >= length;
                if after_reclaim_fits {
                    reclaim_candidates.push((block, entry.wasted_size));
                }
            }
        }

        if reclaimable_count > 1 {
            if let Some(block) = empty_candidate {
                self.most_recent_block = block;
                self.commit_allocation(block, length);
                return Ok((block, self.blocks[block as usize].base));
            }
        }

        if dummy {
            return Err(ErstError::OutOfResources);
        }
        if self.tracker.outgoing().is_some() {
            return Err(ErstError::OutOfResources);
        }

        reclaim_candidates.sort_by_key(|&(_, wasted)| core::cmp::Reverse(wasted));
        let Some((block, _)) = reclaim_candidates.first().copied() else {
            return Err(ErstError::OutOfResources);
        };
        self.reclaim_block(block)?;
        self.most_recent_block = block;
        self.commit_allocation(block, length);
        let base = self.blocks[block as usize].base;
        let used = self.blocks[block as usize].used_size;
        Ok((block, base + used - length))
    }

    fn commit_allocation(&mut self, block: u16, length: u32) {
        self.blocks[block as usize].used_size += length;
        self.incr_valid_entries(block);
    }

    /// Reverses a `find_free_space` allocation when the subsequent flash
    /// write fails.
    pub(crate) fn undo_allocate(&mut self, block: u16, length: u32) {
        self.blocks[block as usize].used_size -= length;
        self.decr_valid_entries(block);
    }

    /// Marks the block for reclaim, relocates its live OUTGOING (if any)
    /// and every remaining tracked record in the block, then erases it.
    pub(crate) fn reclaim_block(&mut self, block: u16) -> Result<(), ErstError> {
        self.mark_for_reclaim(block);

        if let Some(outgoing) = self.tracker.outgoing() {
            let offset = self.tracker.get(outgoing).record_offset;
            if self.block_index_of_offset(offset) == block {
                self.relocate_record(outgoing)?;
            }
        }

        for r in self.records_in_block(block) {
            self.relocate_record(r)?;
        }

        self.erase_block(block)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_store;

    #[test]
    fn reclaim_erases_and_relocates() {
        let mut store = test_store(8);
        let ids: Vec<u64> = (0..5).map(|i| 0x2000 + i).collect();
        for &id in &ids {
            store.write(id, &vec![0xAB; 4096]).unwrap();
        }
        // Clear all but the last record in block 0, leaving it wasted.
        for &id in &ids[..4] {
            store.clear(id).unwrap();
        }
        let last = *ids.last().unwrap();
        assert!(store.read(last).is_ok());
        store.force_reclaim(0).unwrap();
        assert_eq!(store.read(last).unwrap(), vec![0xAB; 4096]);
    }
}
