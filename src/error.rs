//! The error kinds shared by the block map and the disk codec.
//!
//! A write blocked by the deny-write interlock is not a variant here: it
//! never surfaces as a `Result::Err` on any internal boundary, only as the
//! zero-byte return [`crate::table::InodeTable::write_at`] gives a caller
//! while the interlock is held.

use thiserror::Error;

/// Failure modes internal to the block map and the inode-disk codec.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IxfsError {
    /// The free map has no sectors left to hand out.
    #[error("free map exhausted")]
    OutOfSpace,

    /// The request would address beyond the 17,016-sector block map.
    #[error("request exceeds maximum file size")]
    OutOfRange,

    /// A decoded record or slot did not look like what it claimed to be:
    /// a bad magic number, or a zero slot inside the logical length.
    #[error("corrupt on-disk record")]
    Corrupt,
}

impl From<crate::disk::Corrupt> for IxfsError {
    fn from(_: crate::disk::Corrupt) -> Self {
        IxfsError::Corrupt
    }
}
