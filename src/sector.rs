//! Sector numbers: the opaque pointer type that InodeDisk, IndirectBlock, and
//! the FreeMap all traffic in.

use core::fmt;
use core::num::NonZeroU32;

/// A 512-byte unit on the block device, addressed by a non-zero index.
///
/// Sector `0` is reserved by the wire format to mean "not allocated" in a
/// pointer slot, so `Sector` wraps a [`NonZeroU32`]: the only way to spell
/// "no sector here" is `Option<Sector>`, never a bare zero that could be
/// mistaken for a real one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sector(NonZeroU32);

impl Sector {
    /// Builds a `Sector` from a raw on-disk value, treating `0` as "absent".
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Sector)
    }

    /// The raw sector number, as it is written to a pointer slot.
    pub fn raw(self) -> u32 {
        self.0.get()
    }

    /// Encodes an `Option<Sector>` back to its on-disk representation.
    pub fn raw_of(slot: Option<Sector>) -> u32 {
        slot.map_or(0, Sector::raw)
    }
}

impl fmt::Debug for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sector({})", self.0.get())
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.get())
    }
}
