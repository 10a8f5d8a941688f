//! The two external collaborators this subsystem is built against: a block
//! device and a persistent sector allocator. Neither is implemented here
//! (see [`crate::testutil`] for the host-memory fixtures used by the test
//! suite); the core only consumes these traits.

use crate::disk::SECTOR_SIZE;
use crate::sector::Sector;

/// A flat array of fixed-size sectors. Both operations are synchronous and
/// either complete in full or panic; there is no partial I/O.
pub trait BlockDevice {
    /// Reads sector `sector` into `out`.
    fn read_sector(&self, sector: Sector, out: &mut [u8; SECTOR_SIZE]);

    /// Writes `data` to sector `sector`.
    fn write_sector(&self, sector: Sector, data: &[u8; SECTOR_SIZE]);
}

/// A persistent allocator of sectors. `allocate_one` never returns sector
/// `0`: that value is reserved by the wire format to mean "not allocated".
pub trait FreeMap {
    /// Hands out one fresh sector, or `None` if the map is exhausted.
    fn allocate_one(&self) -> Option<Sector>;

    /// Returns a sector to the map. Releasing a sector that was never
    /// allocated, or releasing it twice, is a caller bug.
    fn release(&self, sector: Sector);
}
