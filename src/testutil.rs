//! Host-memory [`BlockDevice`] and [`FreeMap`] fixtures, for exercising the
//! inode core without a real block device. Not gated behind `#[cfg(test)]`:
//! callers embedding this crate without a real device (or a scratch harness
//! of their own) can use these directly.

use std::collections::{HashMap, HashSet};

use spin::Mutex;

use crate::device::{BlockDevice, FreeMap};
use crate::disk::SECTOR_SIZE;
use crate::sector::Sector;

/// A block device backed by a hash map from sector number to contents.
/// Unwritten sectors read as all zero, matching what a real device returns
/// for never-touched storage.
#[derive(Default)]
pub struct MemBlockDevice {
    sectors: Mutex<HashMap<u32, [u8; SECTOR_SIZE]>>,
}

impl MemBlockDevice {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemBlockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemBlockDevice")
            .field("sectors_written", &self.sectors.lock().len())
            .finish()
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_sector(&self, sector: Sector, out: &mut [u8; SECTOR_SIZE]) {
        let sectors = self.sectors.lock();
        match sectors.get(&sector.raw()) {
            Some(data) => *out = *data,
            None => *out = [0u8; SECTOR_SIZE],
        }
    }

    fn write_sector(&self, sector: Sector, data: &[u8; SECTOR_SIZE]) {
        self.sectors.lock().insert(sector.raw(), *data);
    }
}

struct MemFreeMapInner {
    next_candidate: u32,
    in_use: HashSet<u32>,
    remaining: Option<u32>,
}

/// A free map over an unbounded (or artificially capped) supply of sector
/// numbers starting at 1. Callers that pick a home sector
/// out of band (as the directory layer would) should call
/// [`MemFreeMap::reserve`] first so the map never hands out the same
/// number for a data block.
pub struct MemFreeMap {
    inner: Mutex<MemFreeMapInner>,
}

impl std::fmt::Debug for MemFreeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemFreeMap")
            .field("in_use", &inner.in_use.len())
            .field("remaining", &inner.remaining)
            .finish()
    }
}

impl MemFreeMap {
    /// An unbounded free map.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// A free map that can only hand out `capacity` more sectors, for
    /// exercising [`crate::error::IxfsError::OutOfSpace`]. `None` means
    /// unbounded.
    pub fn with_capacity(capacity: Option<u32>) -> Self {
        Self {
            inner: Mutex::new(MemFreeMapInner {
                next_candidate: 1,
                in_use: HashSet::new(),
                remaining: capacity,
            }),
        }
    }

    /// Marks `sector` as already in use, so `allocate_one` skips over it.
    /// Use this to reserve a home sector chosen out of band before
    /// creating an inode there.
    pub fn reserve(&self, sector: Sector) {
        self.inner.lock().in_use.insert(sector.raw());
    }

    /// How many more sectors this map can hand out, if capped.
    pub fn remaining(&self) -> Option<u32> {
        self.inner.lock().remaining
    }
}

impl Default for MemFreeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeMap for MemFreeMap {
    fn allocate_one(&self) -> Option<Sector> {
        let mut inner = self.inner.lock();
        if inner.remaining == Some(0) {
            return None;
        }
        loop {
            let candidate = inner.next_candidate;
            inner.next_candidate += 1;
            if inner.in_use.insert(candidate) {
                if let Some(remaining) = inner.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Sector::from_raw(candidate);
            }
        }
    }

    fn release(&self, sector: Sector) {
        let mut inner = self.inner.lock();
        inner.in_use.remove(&sector.raw());
        if let Some(remaining) = inner.remaining.as_mut() {
            *remaining += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_sector_reads_as_zero() {
        let device = MemBlockDevice::new();
        let mut buf = [0xffu8; SECTOR_SIZE];
        device.read_sector(Sector::from_raw(5).unwrap(), &mut buf);
        assert_eq!(buf, [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn free_map_skips_reserved_sectors() {
        let free_map = MemFreeMap::new();
        free_map.reserve(Sector::from_raw(1).unwrap());
        free_map.reserve(Sector::from_raw(2).unwrap());
        let got = free_map.allocate_one().unwrap();
        assert_eq!(got.raw(), 3);
    }

    #[test]
    fn free_map_capacity_runs_out() {
        let free_map = MemFreeMap::with_capacity(Some(1));
        assert!(free_map.allocate_one().is_some());
        assert!(free_map.allocate_one().is_none());
    }

    #[test]
    fn release_replenishes_capacity() {
        let free_map = MemFreeMap::with_capacity(Some(1));
        let s = free_map.allocate_one().unwrap();
        assert!(free_map.allocate_one().is_none());
        free_map.release(s);
        assert!(free_map.allocate_one().is_some());
    }
}
