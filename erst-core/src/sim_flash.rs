// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory `FlashDevice` used by tests (and by hosts with no real NOR
//! part attached) in place of hardware. Unlike a bare stand-in that simply
//! refuses every call, this one actually implements erase-to-1 and
//! bit-clear-only semantics, since the whole point is to exercise the
//! store's crash-safety logic without real hardware.

use crate::flash::{FlashAttributes, FlashDevice};
use erst_api::ErstError;

pub struct SimFlash {
    sector_size: u32,
    bytes: Vec<u8>,
}

impl SimFlash {
    pub fn new(sector_size: u32, capacity: u32) -> Self {
        SimFlash {
            sector_size,
            bytes: vec![0xFFu8; capacity as usize],
        }
    }

    /// Directly pokes a byte, bypassing the bit-clear-only rule. Used by
    /// recovery tests to inject a crash-interrupted on-flash state.
    pub fn poke(&mut self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }
}

impl FlashDevice for SimFlash {
    fn attributes(&self) -> FlashAttributes {
        FlashAttributes {
            sector_size: self.sector_size,
            capacity: self.bytes.len() as u64,
        }
    }

    fn read(&mut self, offset: u32, out: &mut [u8]) -> Result<(), ErstError> {
        let start = offset as usize;
        let end = start
            .checked_add(out.len())
            .ok_or(ErstError::InvalidParameter)?;
        let region = self
            .bytes
            .get(start..end)
            .ok_or(ErstError::InvalidParameter)?;
        out.copy_from_slice(region);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), ErstError> {
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .ok_or(ErstError::InvalidParameter)?;
        let region = self
            .bytes
            .get_mut(start..end)
            .ok_or(ErstError::InvalidParameter)?;
        for (byte, new) in region.iter_mut().zip(data) {
            // Real NOR flash can only clear bits between erases; attempting
            // to set an already-cleared bit back to 1 is a device error.
            if *new & !*byte != 0 {
                return Err(ErstError::DeviceError);
            }
            *byte &= *new;
        }
        Ok(())
    }

    fn erase(&mut self, offset: u32, len: u32) -> Result<(), ErstError> {
        if offset % self.sector_size != 0 || len % self.sector_size != 0 {
            return Err(ErstError::InvalidParameter);
        }
        let start = offset as usize;
        let end = start
            .checked_add(len as usize)
            .ok_or(ErstError::InvalidParameter)?;
        let region = self
            .bytes
            .get_mut(start..end)
            .ok_or(ErstError::InvalidParameter)?;
        region.fill(0xFF);
        Ok(())
    }

    #[cfg(test)]
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_refuses_to_set_cleared_bits() {
        let mut flash = SimFlash::new(4096, 8192);
        flash.write(0, &[0b1100_0000]).unwrap();
        assert!(flash.write(0, &[0b1111_1111]).is_err());
    }

    #[test]
    fn erase_requires_sector_alignment() {
        let mut flash = SimFlash::new(4096, 8192);
        assert!(flash.erase(10, 4096).is_err());
        assert!(flash.erase(0, 10).is_err());
        assert!(flash.erase(0, 4096).is_ok());
    }
}
