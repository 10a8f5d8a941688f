//! The process-wide set of currently-open inodes: reference-counted
//! sharing keyed by home sector, the removed-on-last-close rule, and the
//! deny-write interlock.
//!
//! Lock order is table-then-inode throughout: `open` and `close` take the
//! table lock first and only reach into an individual inode's lock nested
//! inside it, so no path ever needs to re-enter an inode lock it already
//! holds.

use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use spin::Mutex;

use crate::block_map::BlockMap;
use crate::device::{BlockDevice, FreeMap};
use crate::disk::InodeDisk;
use crate::disk::SECTOR_SIZE;
use crate::sector::Sector;

/// Every field an open inode carries besides its home sector, guarded by
/// a single lock.
pub(crate) struct InodeState {
    pub(crate) open_count: u32,
    pub(crate) removed: bool,
    pub(crate) deny_write_count: u32,
    pub(crate) disk: InodeDisk,
}

/// One open inode, shared by every caller currently holding a handle to
/// its home sector.
pub struct InodeEntry {
    home_sector: Sector,
    pub(crate) state: Mutex<InodeState>,
}

impl InodeEntry {
    /// The sector this inode's [`InodeDisk`] record lives at.
    pub fn home_sector(&self) -> Sector {
        self.home_sector
    }
}

impl std::fmt::Debug for InodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InodeEntry")
            .field("home_sector", &self.home_sector)
            .finish_non_exhaustive()
    }
}

/// A caller's handle to an open inode. Every caller that has `open`ed (or
/// `reopen`ed) the same home sector holds a clone of the same handle: one
/// in-memory object per home sector, however many openers it has.
pub type InodeHandle = Arc<InodeEntry>;

/// Process-wide table of open inodes, parameterized over the [`BlockDevice`]
/// and [`FreeMap`] the block map below it talks to.
pub struct InodeTable<D, F> {
    device: D,
    free_map: F,
    open: Mutex<HashMap<Sector, InodeHandle>>,
}

impl<D, F> std::fmt::Debug for InodeTable<D, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InodeTable")
            .field("open_count", &self.open.lock().len())
            .finish_non_exhaustive()
    }
}

impl<D: BlockDevice, F: FreeMap> InodeTable<D, F> {
    pub fn new(device: D, free_map: F) -> Self {
        Self {
            device,
            free_map,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn free_map(&self) -> &F {
        &self.free_map
    }

    pub(crate) fn block_map(&self) -> BlockMap<'_, D, F> {
        BlockMap::new(&self.device, &self.free_map)
    }

    /// Builds a fresh [`InodeDisk`], grows it to `length` bytes, and writes
    /// it to `home_sector`. `home_sector` itself must already have been
    /// allocated by the caller; the table never touches the free map for
    /// the home sector, only for the blocks the new file's length needs.
    ///
    /// On [`crate::error::IxfsError::OutOfSpace`] or `OutOfRange`, returns
    /// `false`; sectors the failed allocation reached are leaked per the
    /// non-rollback policy in [`BlockMap::allocate`], and releasing
    /// `home_sector` itself is left to the caller.
    pub fn create(&self, home_sector: Sector, length: i32, is_dir: bool) -> bool {
        let mut disk = InodeDisk::new(0, is_dir);
        if let Err(e) = self
            .block_map()
            .allocate(&mut disk, length.max(0) as u64)
        {
            log::warn!("create({home_sector:?}): allocate failed: {e}");
            return false;
        }
        disk.length = length;
        self.device.write_sector(home_sector, &disk.encode());
        true
    }

    /// Returns the in-memory inode for `home_sector`, opening it from the
    /// device if it is not already resident. Returns `None` if the sector
    /// decodes as corrupt, rather than aborting the process over a bad
    /// on-disk record.
    pub fn open(&self, home_sector: Sector) -> Option<InodeHandle> {
        let mut table = self.open.lock();
        if let Some(existing) = table.get(&home_sector) {
            existing.state.lock().open_count += 1;
            trace!("open({home_sector:?}): reused existing entry");
            return Some(existing.clone());
        }

        let mut buf = [0u8; SECTOR_SIZE];
        self.device.read_sector(home_sector, &mut buf);
        let disk = match InodeDisk::decode(&buf) {
            Ok(disk) => disk,
            Err(_) => {
                log::error!("open({home_sector:?}): corrupt record, magic mismatch");
                return None;
            }
        };

        let entry = Arc::new(InodeEntry {
            home_sector,
            state: Mutex::new(InodeState {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
                disk,
            }),
        });
        table.insert(home_sector, entry.clone());
        trace!("open({home_sector:?}): installed new entry");
        Some(entry)
    }

    /// Increments `inode`'s open count and returns the same handle.
    pub fn reopen(&self, inode: &InodeHandle) -> InodeHandle {
        inode.state.lock().open_count += 1;
        inode.clone()
    }

    /// Decrements `inode`'s open count. If it reaches zero, removes the
    /// entry from the table and, if `remove` had been called on it,
    /// deallocates every sector it owns (including its home sector).
    pub fn close(&self, inode: InodeHandle) {
        let home_sector = inode.home_sector;
        let mut table = self.open.lock();

        let should_free = {
            let mut state = inode.state.lock();
            debug_assert!(state.open_count > 0, "close on an already-closed inode");
            state.open_count -= 1;
            if state.open_count > 0 {
                return;
            }
            state.removed
        };
        let _ = table.remove(&home_sector);
        drop(table);
        trace!("close({home_sector:?}): last opener, removed from table (freed={should_free})");

        if should_free {
            self.block_map().deallocate(&inode.state.lock().disk);
            self.free_map.release(home_sector);
        }
    }

    /// Marks `inode` for deletion. Storage is not released until the
    /// final [`InodeTable::close`].
    pub fn remove(&self, inode: &InodeHandle) {
        inode.state.lock().removed = true;
    }

    /// `true` once [`InodeTable::remove`] has been called, even if other
    /// openers keep the file alive.
    pub fn is_removed(&self, inode: &InodeHandle) -> bool {
        inode.state.lock().removed
    }

    pub fn is_directory(&self, inode: &InodeHandle) -> bool {
        inode.state.lock().disk.is_dir
    }

    pub fn length(&self, inode: &InodeHandle) -> i32 {
        inode.state.lock().disk.length
    }

    pub fn get_inumber(&self, inode: &InodeHandle) -> Sector {
        inode.home_sector
    }

    /// Increments the deny-write interlock on `inode`. While it is above
    /// zero, every [`InodeTable::write_at`] returns 0 without touching the
    /// device.
    pub fn deny_write(&self, inode: &InodeHandle) {
        let mut state = inode.state.lock();
        debug_assert!(state.deny_write_count <= state.open_count);
        state.deny_write_count += 1;
        log::debug!(
            "deny_write({:?}): count now {}",
            inode.home_sector,
            state.deny_write_count
        );
    }

    /// Decrements the deny-write interlock on `inode`.
    pub fn allow_write(&self, inode: &InodeHandle) {
        let mut state = inode.state.lock();
        debug_assert!(state.deny_write_count > 0);
        state.deny_write_count -= 1;
    }

    /// Calls [`InodeTable::deny_write`] and returns a guard that calls
    /// [`InodeTable::allow_write`] when dropped, so callers cannot leak
    /// the interlock on an early return or a panic.
    pub fn deny_write_scoped<'a>(
        &'a self,
        inode: &InodeHandle,
    ) -> scopeguard::ScopeGuard<InodeHandle, impl FnOnce(InodeHandle) + 'a> {
        self.deny_write(inode);
        scopeguard::guard(inode.clone(), move |inode| self.allow_write(&inode))
    }
}
