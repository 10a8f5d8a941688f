//! Translates a logical sector index within a file to a physical sector,
//! grows a file's allocation to cover a target byte length, and walks a
//! file's full storage graph on deletion.
//!
//! Everything here is driven off a cursor-owned scratch buffer rather than
//! heap allocation: `lookup` takes a caller-supplied buffer and `allocate`
//! caches at most one single-indirect block and one double-indirect block
//! on the stack while it walks.

use log::{debug, error};

use crate::device::{BlockDevice, FreeMap};
use crate::disk::{
    IndirectBlock, InodeDisk, DIRECT_SECTORS, INDIRECT_SECTORS, MAX_BYTES, MAX_SECTORS,
    PTRS_PER_SECTOR, SECTOR_SIZE,
};
use crate::error::IxfsError;
use crate::sector::Sector;

/// Which region of the block map a logical index falls in, used only to
/// make diagnostics specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Direct,
    Indirect,
    DoubleIndirect,
}

fn ceil_div(n: u64, d: usize) -> usize {
    ((n + d as u64 - 1) / d as u64) as usize
}

/// Stateless view over a [`BlockDevice`] and [`FreeMap`] pair, for running
/// the block-map operations against a particular inode's [`InodeDisk`].
pub struct BlockMap<'a, D, F> {
    device: &'a D,
    free_map: &'a F,
}

impl<'a, D, F> std::fmt::Debug for BlockMap<'a, D, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockMap").finish_non_exhaustive()
    }
}

impl<'a, D: BlockDevice, F: FreeMap> BlockMap<'a, D, F> {
    pub fn new(device: &'a D, free_map: &'a F) -> Self {
        Self { device, free_map }
    }

    /// Returns the physical sector for logical index `i`, or `None` if the
    /// slot (or the structural sector that would contain it) is
    /// unallocated. Fails with [`IxfsError::OutOfRange`] if `i` is beyond
    /// the map's 17,016-sector capacity.
    ///
    /// Whether `None` here means "past EOF" (fine) or "a hole inside the
    /// logical length" (corrupt) is a judgment only the caller can make,
    /// since this function does not know the file's length.
    pub fn lookup(&self, disk: &InodeDisk, i: usize) -> Result<Option<Sector>, IxfsError> {
        if i < DIRECT_SECTORS {
            return Ok(disk.direct[i]);
        }
        if i < INDIRECT_SECTORS {
            let i1 = i - DIRECT_SECTORS;
            let q = i1 / PTRS_PER_SECTOR;
            let r = i1 % PTRS_PER_SECTOR;
            let Some(indirect_sector) = disk.indirect[q] else {
                return Ok(None);
            };
            return Ok(self.read_indirect(indirect_sector).slots[r]);
        }
        if i < MAX_SECTORS {
            let i1 = i - INDIRECT_SECTORS;
            let q = i1 / PTRS_PER_SECTOR;
            let r = i1 % PTRS_PER_SECTOR;
            let Some(double_sector) = disk.double_indirect else {
                return Ok(None);
            };
            let top = self.read_indirect(double_sector);
            let Some(leaf_sector) = top.slots[q] else {
                return Ok(None);
            };
            return Ok(self.read_indirect(leaf_sector).slots[r]);
        }
        Err(IxfsError::OutOfRange)
    }

    fn read_indirect(&self, sector: Sector) -> IndirectBlock {
        let mut buf = [0u8; SECTOR_SIZE];
        self.device.read_sector(sector, &mut buf);
        IndirectBlock::decode(&buf)
    }

    fn write_indirect(&self, sector: Sector, block: &IndirectBlock) {
        self.device.write_sector(sector, &block.encode());
    }

    fn alloc_zeroed(&self, region: Region) -> Result<Sector, IxfsError> {
        let sector = self.free_map.allocate_one().ok_or(IxfsError::OutOfSpace)?;
        self.device.write_sector(sector, &[0u8; SECTOR_SIZE]);
        debug!("allocated sector {} for {:?} slot", sector.raw(), region);
        Ok(sector)
    }

    /// Grows `disk`'s allocation to cover `target_bytes`, allocating any
    /// unallocated data slot and any unallocated structural (indirect,
    /// double-indirect) sector the walk passes through. Never shrinks and
    /// is idempotent for a target at or below the current allocation.
    ///
    /// `disk.length` is untouched; publishing the new length is the
    /// caller's job (see [`crate::io`]).
    ///
    /// On [`IxfsError::OutOfSpace`], sectors already allocated by this call
    /// are left in place, not rolled back. A caller that wants them freed
    /// marks the inode removed and closes it.
    pub fn allocate(&self, disk: &mut InodeDisk, target_bytes: u64) -> Result<(), IxfsError> {
        if target_bytes > MAX_BYTES {
            return Err(IxfsError::OutOfRange);
        }
        let n = ceil_div(target_bytes, SECTOR_SIZE);
        if n == 0 {
            return Ok(());
        }

        let direct_end = n.min(DIRECT_SECTORS);
        for slot in disk.direct[..direct_end].iter_mut() {
            if slot.is_none() {
                *slot = Some(self.alloc_zeroed(Region::Direct)?);
            }
        }
        if n <= DIRECT_SECTORS {
            return Ok(());
        }

        let indirect_end = n.min(INDIRECT_SECTORS);
        let mut cursor = direct_end.max(DIRECT_SECTORS);
        while cursor < indirect_end {
            let i1 = cursor - DIRECT_SECTORS;
            let q = i1 / PTRS_PER_SECTOR;
            let indirect_sector = match disk.indirect[q] {
                Some(s) => s,
                None => {
                    let s = self.alloc_zeroed(Region::Indirect)?;
                    disk.indirect[q] = Some(s);
                    s
                }
            };
            let mut block = self.read_indirect(indirect_sector);
            let slots_end = (DIRECT_SECTORS + (q + 1) * PTRS_PER_SECTOR).min(indirect_end);
            for r in (cursor - DIRECT_SECTORS - q * PTRS_PER_SECTOR)
                ..(slots_end - DIRECT_SECTORS - q * PTRS_PER_SECTOR)
            {
                if block.slots[r].is_none() {
                    block.slots[r] = Some(self.alloc_zeroed(Region::Indirect)?);
                }
            }
            self.write_indirect(indirect_sector, &block);
            cursor = slots_end;
        }
        if n <= INDIRECT_SECTORS {
            return Ok(());
        }

        let double_sector = match disk.double_indirect {
            Some(s) => s,
            None => {
                let s = self.alloc_zeroed(Region::DoubleIndirect)?;
                disk.double_indirect = Some(s);
                s
            }
        };
        let mut top = self.read_indirect(double_sector);

        let mut cursor = indirect_end.max(INDIRECT_SECTORS);
        while cursor < n {
            let i1 = cursor - INDIRECT_SECTORS;
            let q = i1 / PTRS_PER_SECTOR;
            let leaf_sector = match top.slots[q] {
                Some(s) => s,
                None => {
                    let s = self.alloc_zeroed(Region::DoubleIndirect)?;
                    top.slots[q] = Some(s);
                    s
                }
            };
            let mut leaf = self.read_indirect(leaf_sector);
            let slots_end = (INDIRECT_SECTORS + (q + 1) * PTRS_PER_SECTOR).min(n);
            for r in (cursor - INDIRECT_SECTORS - q * PTRS_PER_SECTOR)
                ..(slots_end - INDIRECT_SECTORS - q * PTRS_PER_SECTOR)
            {
                if leaf.slots[r].is_none() {
                    leaf.slots[r] = Some(self.alloc_zeroed(Region::DoubleIndirect)?);
                }
            }
            self.write_indirect(leaf_sector, &leaf);
            cursor = slots_end;
        }
        self.write_indirect(double_sector, &top);

        Ok(())
    }

    /// Releases every sector `disk` owns (home sector excluded, that is
    /// the caller's to release) back to the free map: data sectors within
    /// the logical length, and every structural sector (indirect,
    /// double-indirect) reached while getting there.
    pub fn deallocate(&self, disk: &InodeDisk) {
        let n = ceil_div(disk.length_bytes(), SECTOR_SIZE);

        for slot in disk.direct[..n.min(DIRECT_SECTORS)].iter() {
            if let Some(sector) = slot {
                self.free_map.release(*sector);
                debug!("released direct sector {}", sector.raw());
            }
        }
        if n <= DIRECT_SECTORS {
            return;
        }

        for (q, indirect_sector) in disk.indirect.iter().enumerate() {
            let base = DIRECT_SECTORS + q * PTRS_PER_SECTOR;
            if base >= n {
                break;
            }
            let Some(indirect_sector) = indirect_sector else {
                continue;
            };
            let block = self.read_indirect(*indirect_sector);
            let slots_end = (base + PTRS_PER_SECTOR).min(n) - base;
            for slot in block.slots[..slots_end].iter() {
                if let Some(sector) = slot {
                    self.free_map.release(*sector);
                }
            }
            self.free_map.release(*indirect_sector);
            debug!("released indirect sector {}", indirect_sector.raw());
        }
        if n <= INDIRECT_SECTORS {
            return;
        }

        let Some(double_sector) = disk.double_indirect else {
            return;
        };
        let top = self.read_indirect(double_sector);
        for (q, leaf_sector) in top.slots.iter().enumerate() {
            let base = INDIRECT_SECTORS + q * PTRS_PER_SECTOR;
            if base >= n {
                break;
            }
            let Some(leaf_sector) = leaf_sector else {
                continue;
            };
            let leaf = self.read_indirect(*leaf_sector);
            let slots_end = (base + PTRS_PER_SECTOR).min(n) - base;
            for slot in leaf.slots[..slots_end].iter() {
                if let Some(sector) = slot {
                    self.free_map.release(*sector);
                }
            }
            self.free_map.release(*leaf_sector);
        }
        self.free_map.release(double_sector);
        debug!("released double-indirect sector {}", double_sector.raw());
    }
}

/// Logs a corruption at `i` and turns it into [`IxfsError::Corrupt`], for
/// callers in [`crate::io`] that found a zero slot inside the logical
/// length.
pub(crate) fn corrupt_slot(home_sector: Sector, i: usize) -> IxfsError {
    error!("corrupt: home sector {} has a hole at logical index {}", home_sector.raw(), i);
    IxfsError::Corrupt
}
