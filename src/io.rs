//! Byte-range read and write on top of [`crate::block_map::BlockMap`],
//! including grow-on-write-past-EOF and length publication.
//!
//! Both operations hold the inode's lock for their full duration: a reader
//! never observes a length it does not also see the backing sectors for.

use crate::block_map::corrupt_slot;
use crate::device::{BlockDevice, FreeMap};
use crate::disk::SECTOR_SIZE;
use crate::table::{InodeHandle, InodeTable};

impl<D: BlockDevice, F: FreeMap> InodeTable<D, F> {
    /// Reads up to `buf.len()` bytes starting at `offset`, stopping at end
    /// of file or at the first corrupt block-map slot. Never short-reads
    /// for any other reason.
    pub fn read_at(&self, inode: &InodeHandle, buf: &mut [u8], offset: u64) -> usize {
        let state = inode.state.lock();
        let block_map = self.block_map();
        let length = state.disk.length_bytes();

        let mut off = offset;
        let mut read = 0usize;
        let mut scratch = [0u8; SECTOR_SIZE];

        while read < buf.len() && off < length {
            let i = (off / SECTOR_SIZE as u64) as usize;
            let s = (off % SECTOR_SIZE as u64) as usize;
            let chunk = (buf.len() - read)
                .min((length - off) as usize)
                .min(SECTOR_SIZE - s);
            if chunk == 0 {
                break;
            }

            let sector = match block_map.lookup(&state.disk, i) {
                Ok(Some(sector)) => sector,
                Ok(None) => {
                    let _ = corrupt_slot(inode.home_sector(), i);
                    break;
                }
                Err(e) => {
                    log::error!("read_at({:?}): {e}", inode.home_sector());
                    break;
                }
            };

            if s == 0 && chunk == SECTOR_SIZE {
                let dst: &mut [u8; SECTOR_SIZE] = (&mut buf[read..read + SECTOR_SIZE])
                    .try_into()
                    .expect("chunk == SECTOR_SIZE");
                self.device().read_sector(sector, dst);
            } else {
                self.device().read_sector(sector, &mut scratch);
                buf[read..read + chunk].copy_from_slice(&scratch[s..s + chunk]);
            }

            off += chunk as u64;
            read += chunk;
        }
        read
    }

    /// Writes `buf.len()` bytes starting at `offset`, growing the file
    /// (materializing intermediate bytes as zero) when the write extends
    /// past the current length. Returns 0 immediately if the deny-write
    /// interlock is held. Stops and returns a short count if growth fails
    /// partway through.
    pub fn write_at(&self, inode: &InodeHandle, buf: &[u8], offset: u64) -> usize {
        let mut state = inode.state.lock();
        if state.deny_write_count > 0 {
            log::debug!(
                "write_at({:?}): denied, deny_write_count={}",
                inode.home_sector(),
                state.deny_write_count
            );
            return 0;
        }

        let block_map = self.block_map();
        let mut off = offset;
        let mut written = 0usize;
        let mut scratch = [0u8; SECTOR_SIZE];

        while written < buf.len() {
            let length = state.disk.length_bytes();
            let i = (off / SECTOR_SIZE as u64) as usize;
            let s = (off % SECTOR_SIZE as u64) as usize;
            let chunk = (buf.len() - written)
                .min(length.saturating_sub(off) as usize)
                .min(SECTOR_SIZE - s);

            if chunk == 0 {
                let target = off + (buf.len() - written) as u64;
                match block_map.allocate(&mut state.disk, target) {
                    Ok(()) => {
                        state.disk.length = target as i32;
                        self.device()
                            .write_sector(inode.home_sector(), &state.disk.encode());
                        continue;
                    }
                    Err(e) => {
                        log::warn!("write_at({:?}): allocate failed: {e}", inode.home_sector());
                        break;
                    }
                }
            }

            let sector = match block_map.lookup(&state.disk, i) {
                Ok(Some(sector)) => sector,
                Ok(None) => {
                    let _ = corrupt_slot(inode.home_sector(), i);
                    break;
                }
                Err(e) => {
                    log::error!("write_at({:?}): {e}", inode.home_sector());
                    break;
                }
            };

            if s == 0 && chunk == SECTOR_SIZE {
                let src: &[u8; SECTOR_SIZE] = (&buf[written..written + SECTOR_SIZE])
                    .try_into()
                    .expect("chunk == SECTOR_SIZE");
                self.device().write_sector(sector, src);
            } else {
                self.device().read_sector(sector, &mut scratch);
                scratch[s..s + chunk].copy_from_slice(&buf[written..written + chunk]);
                self.device().write_sector(sector, &scratch);
            }

            off += chunk as u64;
            written += chunk;
        }
        written
    }
}
