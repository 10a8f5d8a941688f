//! ixfs: the indexed-block inode subsystem of a small teaching-grade
//! filesystem.
//!
//! Given a [`device::BlockDevice`] and a [`device::FreeMap`], this crate
//! provides file objects with random-access byte reads and writes,
//! implicit non-sparse growth, recursive deletion, and open-count sharing
//! across concurrent openers of the same home sector. See `DESIGN.md` for
//! the grounding behind each module; in short:
//!
//! - [`disk`], the bit-exact on-disk record and its codec.
//! - [`block_map`], logical-sector-to-physical-sector translation,
//!   allocation, and deallocation.
//! - [`table`], the open-inode table ([`table::InodeTable`] is the main
//!   entry point most callers want).
//! - [`io`], byte-range read and write on top of the block map.
//! - [`error`], the closed error enum shared by the above.
//! - [`testutil`], host-memory fixtures for [`device::BlockDevice`] and
//!   [`device::FreeMap`].
//!
//! ```
//! use ixfs::sector::Sector;
//! use ixfs::table::InodeTable;
//! use ixfs::testutil::{MemBlockDevice, MemFreeMap};
//!
//! let free_map = MemFreeMap::new();
//! let home = Sector::from_raw(17).unwrap();
//! free_map.reserve(home);
//! let table = InodeTable::new(MemBlockDevice::new(), free_map);
//!
//! assert!(table.create(home, 0, false));
//! let inode = table.open(home).unwrap();
//! assert_eq!(table.write_at(&inode, b"hello", 0), 5);
//!
//! let mut buf = [0u8; 5];
//! assert_eq!(table.read_at(&inode, &mut buf, 0), 5);
//! assert_eq!(&buf, b"hello");
//! table.close(inode);
//! ```

#![deny(rust_2018_idioms)]
#![deny(missing_debug_implementations)]
#![deny(unused_qualifications)]

pub mod block_map;
pub mod device;
pub mod disk;
pub mod error;
pub mod io;
pub mod sector;
pub mod table;
pub mod testutil;

pub use block_map::BlockMap;
pub use device::{BlockDevice, FreeMap};
pub use disk::{InodeDisk, MAX_BYTES, MAX_SECTORS, SECTOR_SIZE};
pub use error::IxfsError;
pub use sector::Sector;
pub use table::{InodeHandle, InodeTable};
