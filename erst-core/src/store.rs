// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Store`: the single value that owns every piece of state the error
//! record store needs, passed by exclusive reference into every operation
//! rather than reached through a process-wide singleton.

use erst_api::ErstError;

use crate::block::BlockInfoEntry;
use crate::flash::{FlashDevice, FlashGeometry, ShadowCache};
use crate::header::HEADER_LEN;
use crate::pool::PoolAllocator;
use crate::tracker::{CperInfo, RecordTracker};
use crate::trace::{Event, Trace};

/// A size big enough to hold any single record this store will ever place:
/// a record cannot exceed one virtual block, since records never span
/// blocks.
pub(crate) fn max_record_size(geometry: &FlashGeometry) -> usize {
    geometry.virtual_block_size as usize
}

pub struct Store {
    pub(crate) flash: Box<dyn FlashDevice>,
    pub(crate) cache: ShadowCache,
    pub(crate) geometry: FlashGeometry,
    pub(crate) blocks: Vec<BlockInfoEntry>,
    pub(crate) tracker: RecordTracker,
    pub(crate) pool: PoolAllocator,
    pub(crate) most_recent_block: u16,
    pub(crate) unsynced_spinor_changes: u16,
    pub(crate) init_status: Result<(), ErstError>,
    pub(crate) trace: Trace,
}

impl Store {
    /// Discovers geometry from the device, builds all in-RAM tables, and
    /// runs the Recovery Engine's initial `collect_block_info` pass.
    pub fn init(
        mut flash: Box<dyn FlashDevice>,
        partition_base: u32,
        partition_size: u32,
    ) -> Self {
        let attrs = flash.attributes();
        let geometry = match FlashGeometry::compute(attrs, partition_base, partition_size)
        {
            Ok(g) => g,
            Err(e) => {
                return Store {
                    cache: ShadowCache::try_new(flash.as_mut(), 0, 0),
                    flash,
                    geometry: FlashGeometry {
                        partition_base,
                        partition_size,
                        sector_size: attrs.sector_size.max(1),
                        virtual_block_size: erst_api::MIN_VIRTUAL_BLOCK_SIZE,
                        num_blocks: 0,
                    },
                    blocks: Vec::new(),
                    tracker: RecordTracker::new(0),
                    pool: PoolAllocator::new(HEADER_LEN, 0, 0, 0, 0),
                    most_recent_block: 0,
                    unsynced_spinor_changes: 0,
                    init_status: Err(e),
                    trace: Trace::new(),
                };
            }
        };

        let cache =
            ShadowCache::try_new(flash.as_mut(), geometry.partition_base, geometry.partition_size);

        let tracker_capacity = (geometry.num_blocks as usize
            * geometry.virtual_block_size as usize)
            / core::mem::size_of::<CperInfo>();

        let pool = PoolAllocator::new(
            HEADER_LEN,
            geometry.virtual_block_size as usize,
            geometry.num_blocks as usize * core::mem::size_of::<BlockInfoEntry>(),
            tracker_capacity * core::mem::size_of::<CperInfo>(),
            max_record_size(&geometry),
        );

        let mut store = Store {
            flash,
            cache,
            geometry,
            blocks: Vec::new(),
            tracker: RecordTracker::new(tracker_capacity),
            pool,
            most_recent_block: 0,
            unsynced_spinor_changes: 0,
            init_status: Ok(()),
            trace: Trace::new(),
        };
        store.init_blocks();
        store.init_status = store.collect_block_info();
        store
    }

    pub fn init_status(&self) -> Result<(), ErstError> {
        self.init_status
    }

    pub fn record_count(&self) -> u32 {
        self.tracker.len() as u32
    }

    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    pub(crate) fn begin_mutation(&mut self) {
        self.unsynced_spinor_changes += 1;
    }

    pub(crate) fn end_mutation(&mut self) {
        self.unsynced_spinor_changes = self.unsynced_spinor_changes.saturating_sub(1);
    }

    pub fn is_desynced(&self) -> bool {
        self.unsynced_spinor_changes != 0
            || self.tracker.incoming().is_some()
            || self.tracker.outgoing().is_some()
    }

    /// Forces a full re-init, as the Mailbox Handler does whenever desync
    /// is detected before dispatching the next request.
    pub fn resync(&mut self) {
        self.unsynced_spinor_changes = 0;
        self.tracker = RecordTracker::new(self.tracker.capacity());
        self.init_blocks();
        self.init_status = self.collect_block_info();
    }

    pub(crate) fn trace_read(&mut self, offset: u32, len: u32) {
        self.trace.push(Event::FlashRead { offset, len });
    }

    pub(crate) fn trace_write(&mut self, offset: u32, len: u32) {
        self.trace.push(Event::FlashWrite { offset, len });
    }

    pub(crate) fn trace_erase(&mut self, offset: u32, len: u32) {
        self.trace.push(Event::FlashErase { offset, len });
    }

    pub(crate) fn trace_push(&mut self, event: Event) {
        self.trace.push(event);
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub(crate) fn read_bytes(
        &mut self,
        offset: u32,
        out: &mut [u8],
    ) -> Result<(), ErstError> {
        self.trace_read(offset, out.len() as u32);
        let flash = self.flash.as_mut();
        self.cache.read(flash, offset, out)
    }

    /// Injects a crash-interrupted status byte directly on the simulated
    /// device, bypassing the write engine entirely, then refreshes the
    /// shadow cache so the tampering is visible to the next `resync`.
    #[cfg(test)]
    pub(crate) fn sim_poke_status(
        &mut self,
        offset: u32,
        status: crate::header::RecordStatus,
    ) -> Result<(), ErstError> {
        let byte = status as u8;
        let sim = self
            .flash
            .as_any_mut()
            .downcast_mut::<crate::sim_flash::SimFlash>()
            .ok_or(ErstError::Unsupported)?;
        sim.poke(
            offset + crate::header::STATUS_OFFSET_IN_HEADER as u32,
            &[byte],
        );
        self.cache = crate::flash::ShadowCache::try_new(
            self.flash.as_mut(),
            self.geometry.partition_base,
            self.geometry.partition_size,
        );
        Ok(())
    }
}
