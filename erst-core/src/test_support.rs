// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test-only helpers shared by every module's `#[cfg(test)] mod tests`.

#![cfg(test)]

use crate::sim_flash::SimFlash;
use crate::store::Store;

pub const TEST_SECTOR_SIZE: u32 = 4096;
pub const TEST_BLOCK_SIZE: u32 = 16 * 1024;

/// Builds a `Store` over a fresh `SimFlash` with `num_blocks` virtual
/// blocks, sized so `TEST_BLOCK_SIZE == sector_size` (one sector per
/// block, the smallest legal geometry).
pub(crate) fn test_store(num_blocks: u32) -> Store {
    let capacity = num_blocks * TEST_BLOCK_SIZE;
    let flash = SimFlash::new(TEST_SECTOR_SIZE, capacity);
    let store = Store::init(Box::new(flash), 0, capacity);
    assert!(store.init_status().is_ok(), "test geometry must be valid");
    store
}
