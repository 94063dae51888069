// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Flash Adapter and the Shadow Cache that wraps it.
//!
//! `FlashDevice` is a thin trait a platform plugs a real NOR driver into:
//! read/write/erase plus a one-shot `attributes()` probe, minus anything
//! board-specific (GPIO setup, QSPI clock dividers, partition discovery),
//! which stays out of scope as platform glue.

use erst_api::ErstError;

/// Attributes of the underlying block device, probed once at init.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FlashAttributes {
    pub sector_size: u32,
    pub capacity: u64,
}

/// A raw NOR-like block device: bits erase to all-1s and can only be
/// cleared 1→0 between erases.
pub trait FlashDevice {
    fn attributes(&self) -> FlashAttributes;

    /// Fails with `InvalidParameter` when `offset + len` exceeds the
    /// partition.
    fn read(&mut self, offset: u32, out: &mut [u8]) -> Result<(), ErstError>;

    /// Same bounds rule as `read`. The underlying device may refuse
    /// bit-flips 0→1; that surfaces as `DeviceError`.
    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), ErstError>;

    /// `offset` and `len` must be multiples of the device sector size;
    /// fails `InvalidParameter` otherwise or when out of range.
    fn erase(&mut self, offset: u32, len: u32) -> Result<(), ErstError>;

    /// Downcast hook used only by tests to reach into `SimFlash` and inject
    /// a crash-interrupted on-flash state; no platform flash driver needs
    /// to implement this for anything but test doubles.
    #[cfg(test)]
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

/// Virtual block geometry, computed once at init from the device's
/// attributes and the externally-supplied partition base/size.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FlashGeometry {
    pub partition_base: u32,
    pub partition_size: u32,
    pub sector_size: u32,
    pub virtual_block_size: u32,
    pub num_blocks: u32,
}

impl FlashGeometry {
    /// Derives block/partition geometry from raw device attributes: virtual
    /// block size is `max(16 KiB, sector_size)` and must be an integer
    /// multiple of sector size; the partition must be an integer multiple
    /// of the virtual block size and hold at least two blocks; both
    /// partition base and size must be sector-aligned.
    pub fn compute(
        attrs: FlashAttributes,
        partition_base: u32,
        partition_size: u32,
    ) -> Result<Self, ErstError> {
        let sector_size = attrs.sector_size;
        if sector_size == 0 {
            return Err(ErstError::InvalidParameter);
        }
        if partition_base % sector_size != 0 || partition_size % sector_size != 0
        {
            return Err(ErstError::InvalidParameter);
        }

        let virtual_block_size =
            core::cmp::max(erst_api::MIN_VIRTUAL_BLOCK_SIZE, sector_size);
        if virtual_block_size % sector_size != 0 {
            return Err(ErstError::InvalidParameter);
        }
        if partition_size % virtual_block_size != 0 {
            return Err(ErstError::InvalidParameter);
        }

        let num_blocks = partition_size / virtual_block_size;
        if num_blocks < 2 {
            return Err(ErstError::InvalidParameter);
        }

        let partition_end = partition_base as u64 + partition_size as u64;
        if partition_end > attrs.capacity {
            return Err(ErstError::InvalidParameter);
        }

        Ok(FlashGeometry {
            partition_base,
            partition_size,
            sector_size,
            virtual_block_size,
            num_blocks,
        })
    }

    pub fn block_base(&self, block: u16) -> u32 {
        self.partition_base + block as u32 * self.virtual_block_size
    }
}

/// Optional in-RAM mirror of the partition. On init it
/// tries to pull the whole partition into RAM; on success every read is
/// served from RAM and every write updates RAM before flash. On failure to
/// allocate, the cache is simply absent and requests pass through — this
/// is why every `ShadowCache` method also needs the underlying device.
pub struct ShadowCache {
    mirror: Option<Vec<u8>>,
    base: u32,
}

impl ShadowCache {
    /// Attempts to mirror `len` bytes starting at `base` by reading them
    /// through `device`. Never fails outright: an allocation or read
    /// failure simply leaves the cache absent.
    pub fn try_new(
        device: &mut dyn FlashDevice,
        base: u32,
        len: u32,
    ) -> Self {
        let mut buf = vec![0u8; len as usize];
        match device.read(base, &mut buf) {
            Ok(()) => ShadowCache {
                mirror: Some(buf),
                base,
            },
            Err(_) => ShadowCache {
                mirror: None,
                base,
            },
        }
    }

    pub fn is_present(&self) -> bool {
        self.mirror.is_some()
    }

    pub fn read(
        &self,
        device: &mut dyn FlashDevice,
        offset: u32,
        out: &mut [u8],
    ) -> Result<(), ErstError> {
        if let Some(mirror) = &self.mirror {
            let start = (offset - self.base) as usize;
            let end = start + out.len();
            out.copy_from_slice(
                mirror
                    .get(start..end)
                    .ok_or(ErstError::InvalidParameter)?,
            );
            Ok(())
        } else {
            device.read(offset, out)
        }
    }

    /// Write-through: updates the RAM mirror by ANDing in the new bytes
    /// (matching the flash's own bit-clear-only semantics) before issuing
    /// the real write, so a cache hit is indistinguishable from reading the
    /// device directly.
    pub fn write(
        &mut self,
        device: &mut dyn FlashDevice,
        offset: u32,
        data: &[u8],
    ) -> Result<(), ErstError> {
        device.write(offset, data)?;
        if let Some(mirror) = &mut self.mirror {
            let start = (offset - self.base) as usize;
            let end = start + data.len();
            let region = mirror
                .get_mut(start..end)
                .ok_or(ErstError::InvalidParameter)?;
            for (m, d) in region.iter_mut().zip(data) {
                *m &= *d;
            }
        }
        Ok(())
    }

    pub fn erase(
        &mut self,
        device: &mut dyn FlashDevice,
        offset: u32,
        len: u32,
    ) -> Result<(), ErstError> {
        device.erase(offset, len)?;
        if let Some(mirror) = &mut self.mirror {
            let start = (offset - self.base) as usize;
            let end = start + len as usize;
            if let Some(region) = mirror.get_mut(start..end) {
                region.fill(0xFF);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim_flash::SimFlash;

    #[test]
    fn geometry_picks_16kib_floor_for_small_sectors() {
        let attrs = FlashAttributes {
            sector_size: 4096,
            capacity: 1024 * 1024,
        };
        let geom = FlashGeometry::compute(attrs, 0, 512 * 1024).unwrap();
        assert_eq!(geom.virtual_block_size, erst_api::MIN_VIRTUAL_BLOCK_SIZE);
        assert_eq!(geom.num_blocks, (512 * 1024) / (16 * 1024));
    }

    #[test]
    fn geometry_rejects_misaligned_partition() {
        let attrs = FlashAttributes {
            sector_size: 4096,
            capacity: 1024 * 1024,
        };
        assert!(FlashGeometry::compute(attrs, 100, 512 * 1024).is_err());
    }

    #[test]
    fn geometry_rejects_single_block_partitions() {
        let attrs = FlashAttributes {
            sector_size: 4096,
            capacity: 1024 * 1024,
        };
        assert!(FlashGeometry::compute(attrs, 0, 16 * 1024).is_err());
    }

    #[test]
    fn shadow_cache_write_is_bit_clear_only() {
        let mut dev = SimFlash::new(4096, 8 * 4096);
        let mut cache = ShadowCache::try_new(&mut dev, 0, 8 * 4096);
        assert!(cache.is_present());
        cache.write(&mut dev, 0, &[0b1010_1010]).unwrap();
        let mut out = [0u8; 1];
        cache.read(&mut dev, 0, &mut out).unwrap();
        assert_eq!(out[0], 0b1010_1010);
        // A second write can only clear further bits.
        cache.write(&mut dev, 0, &[0b1111_1111]).unwrap();
        cache.read(&mut dev, 0, &mut out).unwrap();
        assert_eq!(out[0], 0b1010_1010);
    }
}
