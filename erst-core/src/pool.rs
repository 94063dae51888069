// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pool Allocator: a fixed set of named scratch pools, each holding at
//! most one live allocation, statically sized at startup and reused for
//! the life of the store rather than drawn from a general heap.

use erst_api::ErstError;

/// Identifies one of the eight physical pool slots: four singular pools
/// (CPER_HEADER, BLOCK, BLOCK_INFO, RECORD_INFO) plus a four-member RECORD
/// family, for eight physical slots total (see DESIGN.md for why the
/// enumeration is literal rather than "seven pools" as sometimes described).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PoolId {
    CperHeader,
    Block,
    BlockInfo,
    RecordInfo,
    Record(RecordSlot),
}

/// One of the four round-robin RECORD pool slots.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecordSlot(u8);

const RECORD_SLOTS: usize = 4;
const NUM_SINGULAR_POOLS: usize = 4;
const NUM_POOLS: usize = NUM_SINGULAR_POOLS + RECORD_SLOTS;

fn index_of(id: PoolId) -> usize {
    match id {
        PoolId::CperHeader => 0,
        PoolId::Block => 1,
        PoolId::BlockInfo => 2,
        PoolId::RecordInfo => 3,
        PoolId::Record(RecordSlot(n)) => NUM_SINGULAR_POOLS + n as usize,
    }
}

struct Pool {
    buf: Vec<u8>,
    in_use: bool,
}

/// An acquired allocation. Dropping it without calling
/// [`PoolAllocator::release`] is a logic error the allocator cannot detect
/// on its own — allocations are strictly owned by whoever acquired them,
/// and reentrant acquisition of an in-use pool is a caller bug, not a state
/// the allocator tries to recover from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PoolHandle(PoolId);

impl PoolHandle {
    pub fn id(&self) -> PoolId {
        self.0
    }
}

pub struct PoolAllocator {
    pools: Vec<Pool>,
    next_record_slot: u8,
}

impl PoolAllocator {
    /// Builds all eight pools sized to their respective upper bounds
    /// up front, so that later allocations can never fail for size
    /// reasons. Allocating the backing `Vec`s here is the only
    /// "reservation" needed; because every pool's buffer lives for the
    /// life of the allocator, there is no separate release step required
    /// to make the memory available again.
    pub fn new(
        header_size: usize,
        block_size: usize,
        block_info_table_size: usize,
        record_info_table_size: usize,
        max_record_size: usize,
    ) -> Self {
        let mut pools = Vec::with_capacity(NUM_POOLS);
        pools.push(Pool {
            buf: vec![0u8; header_size],
            in_use: false,
        });
        pools.push(Pool {
            buf: vec![0u8; block_size],
            in_use: false,
        });
        pools.push(Pool {
            buf: vec![0u8; block_info_table_size],
            in_use: false,
        });
        pools.push(Pool {
            buf: vec![0u8; record_info_table_size],
            in_use: false,
        });
        for _ in 0..RECORD_SLOTS {
            pools.push(Pool {
                buf: vec![0u8; max_record_size],
                in_use: false,
            });
        }
        PoolAllocator {
            pools,
            next_record_slot: 0,
        }
    }

    /// Acquires a singular (non-RECORD) pool. Fails `Unsupported` if a
    /// second request comes in while the pool is already in use.
    pub fn acquire(&mut self, id: PoolId) -> Result<PoolHandle, ErstError> {
        debug_assert!(!matches!(id, PoolId::Record(_)));
        let pool = &mut self.pools[index_of(id)];
        if pool.in_use {
            return Err(ErstError::Unsupported);
        }
        pool.in_use = true;
        Ok(PoolHandle(id))
    }

    /// Acquires the next RECORD slot round-robin. The RECORD family is
    /// spread over four slots so that a move or merge can hold more than
    /// one record in flight at a time; if all four are busy, the caller is
    /// trying to hold more records in flight than the protocol allows.
    pub fn acquire_record(&mut self) -> Result<PoolHandle, ErstError> {
        for _ in 0..RECORD_SLOTS {
            let slot = self.next_record_slot;
            self.next_record_slot = (slot + 1) % RECORD_SLOTS as u8;
            let id = PoolId::Record(RecordSlot(slot));
            if !self.pools[index_of(id)].in_use {
                self.pools[index_of(id)].in_use = true;
                return Ok(PoolHandle(id));
            }
        }
        Err(ErstError::OutOfResources)
    }

    pub fn release(&mut self, handle: PoolHandle) {
        self.pools[index_of(handle.0)].in_use = false;
    }

    pub fn buffer(&self, handle: &PoolHandle) -> &[u8] {
        &self.pools[index_of(handle.0)].buf
    }

    pub fn buffer_mut(&mut self, handle: &PoolHandle) -> &mut [u8] {
        &mut self.pools[index_of(handle.0)].buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> PoolAllocator {
        PoolAllocator::new(128, 4096, 256, 512, 4096)
    }

    #[test]
    fn second_acquire_of_a_singular_pool_fails() {
        let mut a = allocator();
        let h1 = a.acquire(PoolId::CperHeader).unwrap();
        assert!(a.acquire(PoolId::CperHeader).is_err());
        a.release(h1);
        assert!(a.acquire(PoolId::CperHeader).is_ok());
    }

    #[test]
    fn record_pool_round_robins_and_exhausts() {
        let mut a = allocator();
        let h0 = a.acquire_record().unwrap();
        let h1 = a.acquire_record().unwrap();
        let h2 = a.acquire_record().unwrap();
        let h3 = a.acquire_record().unwrap();
        assert!(a.acquire_record().is_err());
        assert_ne!(h0.id(), h1.id());
        assert_ne!(h1.id(), h2.id());
        assert_ne!(h2.id(), h3.id());
        a.release(h0);
        assert!(a.acquire_record().is_ok());
    }
}
