//! Inode table (C4) and inode I/O (C5).
//!
//! The inode table is a fixed-capacity array of [`RawInode`] records packed
//! into the reserved inode-table blocks. This module also owns growing and
//! shrinking an inode's block list (direct slots plus one indirect block)
//! and the byte-granular read/write that spans block boundaries on top of
//! it.

use std::mem::size_of;

use log::{debug, trace};

use crate::alloc::NO_BLOCK;
use crate::bitmap::BitmapView;
use crate::error::{FsError, Result};
use crate::Filesystem;

/// Number of direct block pointers per inode.
pub const NUM_DIRECT: usize = 12;

/// POSIX mode bits marking a directory (the `S_IFDIR` family).
pub const S_IFDIR: u32 = libc::S_IFDIR as u32;
/// Mask isolating the file-type bits of a mode.
pub const S_IFMT: u32 = libc::S_IFMT as u32;

/// On-disk inode record. Fixed size so the inode table partitions evenly
/// into blocks (`BLOCK_SIZE / size_of::<RawInode>()` inodes per block).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct RawInode {
    pub refs: u32,
    pub mode: u32,
    pub size: u64,
    pub num_blocks: u32,
    pub direct: [i32; NUM_DIRECT],
    pub indirect: i32,
    // Both 8-byte fields precede both 4-byte fields so `repr(C)` doesn't
    // need to insert padding between them to satisfy `i64` alignment.
    pub atime_sec: i64,
    pub mtime_sec: i64,
    pub atime_nsec: i32,
    pub mtime_nsec: i32,
    _pad: [u8; 32],
}

const _: () = assert!(4096 % size_of::<RawInode>() == 0, "inode record must divide the block size evenly");

/// Inodes per inode-table block.
pub const INODES_PER_BLOCK: usize = 4096 / size_of::<RawInode>();

/// Capacity of the indirect block, in block-pointer entries.
pub const INDIRECT_CAPACITY: usize = 4096 / size_of::<i32>();

impl RawInode {
    fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

/// A `stat`-shaped snapshot of an inode, returned by [`Filesystem::stat`].
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub ino: u32,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: (i64, i32),
    pub mtime: (i64, i32),
}

impl Filesystem {
    fn inode_bitmap(&mut self) -> BitmapView<'_> {
        let half = self.image.block_size() / 2;
        BitmapView::new(&mut self.image.block_mut(0)[half..])
    }

    fn inode_capacity(&self) -> usize {
        INODES_PER_BLOCK * self.image.inode_table_blocks() as usize
    }

    fn inode_location(&self, inum: u32) -> (u32, usize) {
        let inum = inum as usize;
        assert!(inum < self.inode_capacity(), "inode number {inum} out of range");
        let block = 1 + (inum / INODES_PER_BLOCK) as u32;
        let offset = (inum % INODES_PER_BLOCK) * size_of::<RawInode>();
        (block, offset)
    }

    /// Reads the raw inode record for `inum`. Panics if `inum` is out of
    /// range: that is a programmer error, per the reference design.
    pub(crate) fn get_inode(&self, inum: u32) -> RawInode {
        let (block, offset) = self.inode_location(inum);
        self.image.read_struct(block, offset)
    }

    fn put_inode(&mut self, inum: u32, node: &RawInode) {
        let (block, offset) = self.inode_location(inum);
        self.image.write_struct(block, offset, node);
    }

    /// Allocates a fresh inode: claims the first clear inode-bitmap bit,
    /// initializes it with `refs = 0`, `size = 0`, one claimed direct
    /// block, and the given `mode`. The caller publishing the inode (via
    /// `directory_link`) is responsible for bumping `refs` to 1.
    pub(crate) fn alloc_inode(&mut self, mode: u32) -> Result<u32> {
        let capacity = self.inode_capacity();
        let inum = {
            let bitmap = self.inode_bitmap();
            bitmap.first_clear(capacity).ok_or(FsError::NoSpace)? as u32
        };
        self.inode_bitmap().set(inum as usize, true);

        let block0 = match self.alloc_block() {
            Ok(b) => b,
            Err(e) => {
                self.inode_bitmap().set(inum as usize, false);
                return Err(e);
            }
        };
        let now = now();
        let mut node = RawInode {
            refs: 0,
            mode,
            size: 0,
            num_blocks: 1,
            direct: [NO_BLOCK; NUM_DIRECT],
            indirect: NO_BLOCK,
            atime_sec: now.0,
            atime_nsec: now.1,
            mtime_sec: now.0,
            mtime_nsec: now.1,
            _pad: [0; 32],
        };
        node.direct[0] = block0 as i32;
        self.put_inode(inum, &node);
        trace!("alloc_inode(mode={mode:#o}) -> {inum}");
        Ok(inum)
    }

    /// Decrements `refs`; once it reaches zero, releases every block owned
    /// by the inode (direct slots, indirect entries, then the indirect
    /// block itself) and clears the inode-bitmap bit.
    pub(crate) fn free_inode(&mut self, inum: u32) -> Result<()> {
        let mut node = self.get_inode(inum);
        if node.refs > 1 {
            node.refs -= 1;
            self.put_inode(inum, &node);
            return Ok(());
        }

        debug!("free_inode({inum})");
        let direct_used = node.num_blocks.min(NUM_DIRECT as u32) as usize;
        if node.num_blocks as usize > NUM_DIRECT {
            if node.indirect != NO_BLOCK {
                let indirect_used = node.num_blocks as usize - NUM_DIRECT;
                for i in 0..indirect_used {
                    let entry: i32 = self.image.read_struct(node.indirect as u32, i * size_of::<i32>());
                    if entry != NO_BLOCK {
                        self.free_block(entry as u32);
                    }
                }
                self.free_block(node.indirect as u32);
            }
        }
        for slot in node.direct.iter().take(direct_used) {
            if *slot != NO_BLOCK {
                self.free_block(*slot as u32);
            }
        }

        node = RawInode::default();
        self.put_inode(inum, &node);
        self.inode_bitmap().set(inum as usize, false);
        Ok(())
    }

    /// Looks up the on-disk block number backing file-block index `fblk`
    /// of `node`, or `None` if `fblk` is beyond the inode's addressable
    /// range.
    fn inode_get_bnum(&self, node: &RawInode, fblk: usize) -> Option<i32> {
        if fblk < NUM_DIRECT {
            Some(node.direct[fblk])
        } else if fblk < NUM_DIRECT + INDIRECT_CAPACITY {
            if node.indirect == NO_BLOCK {
                return None;
            }
            let entry: i32 = self.image.read_struct(node.indirect as u32, (fblk - NUM_DIRECT) * size_of::<i32>());
            Some(entry)
        } else {
            None
        }
    }

    fn set_indirect_entry(&mut self, indirect_block: u32, slot: usize, value: i32) {
        self.image.write_struct(indirect_block, slot * size_of::<i32>(), &value);
    }

    /// Grows `node` by `delta` bytes, allocating additional blocks as
    /// needed. On allocation failure, any blocks claimed during this call
    /// are rolled back so the bitmap never leaks.
    fn grow_inode(&mut self, node: &mut RawInode, delta: u64) -> Result<()> {
        let block_size = self.image.block_size() as u64;
        let mut remaining = delta;
        let mut claimed: Vec<u32> = Vec::new();

        let result = (|| -> Result<()> {
            while remaining > 0 {
                let space_in_tail = node.num_blocks as u64 * block_size - node.size;
                if remaining <= space_in_tail {
                    node.size += remaining;
                    remaining = 0;
                    continue;
                }
                node.size += space_in_tail;
                remaining -= space_in_tail;

                let new_block = self.alloc_block()?;
                claimed.push(new_block);

                if (node.num_blocks as usize) < NUM_DIRECT {
                    node.direct[node.num_blocks as usize] = new_block as i32;
                    node.num_blocks += 1;
                } else if node.num_blocks as usize == NUM_DIRECT {
                    let indirect_block = new_block;
                    for i in 0..INDIRECT_CAPACITY {
                        self.set_indirect_entry(indirect_block, i, NO_BLOCK);
                    }
                    let data_block = self.alloc_block()?;
                    claimed.push(data_block);
                    node.indirect = indirect_block as i32;
                    self.set_indirect_entry(indirect_block, 0, data_block as i32);
                    node.num_blocks += 1;
                } else {
                    let slot = node.num_blocks as usize - NUM_DIRECT;
                    self.set_indirect_entry(node.indirect as u32, slot, new_block as i32);
                    node.num_blocks += 1;
                }
            }
            Ok(())
        })();

        if result.is_err() {
            // Roll back every block claimed during this call; `node` was
            // only mutated for blocks we are now about to free, so reset it
            // to what it was handed in with.
            for b in claimed.iter().rev() {
                self.free_block(*b);
            }
            return result;
        }
        Ok(())
    }

    /// Shrinks `node` by `delta` bytes, freeing blocks symmetrically to
    /// `grow_inode`: the last block is freed once it becomes fully unused,
    /// and the indirect block itself is freed when `num_blocks` falls back
    /// to `NUM_DIRECT`.
    fn shrink_inode(&mut self, node: &mut RawInode, delta: u64) -> Result<()> {
        if delta > node.size {
            return Err(FsError::Invalid);
        }
        let block_size = self.image.block_size() as u64;
        let mut remaining = delta;
        while remaining > 0 {
            let used_in_tail = node.size - (node.num_blocks as u64 - 1) * block_size;
            if remaining < used_in_tail {
                node.size -= remaining;
                remaining = 0;
                continue;
            }
            node.size -= used_in_tail;
            remaining -= used_in_tail;

            let last_idx = node.num_blocks as usize - 1;
            if last_idx < NUM_DIRECT {
                let b = node.direct[last_idx];
                if b != NO_BLOCK {
                    self.free_block(b as u32);
                }
                node.direct[last_idx] = NO_BLOCK;
            } else {
                let slot = last_idx - NUM_DIRECT;
                let b: i32 = self.image.read_struct(node.indirect as u32, slot * size_of::<i32>());
                if b != NO_BLOCK {
                    self.free_block(b as u32);
                }
                if last_idx == NUM_DIRECT {
                    self.free_block(node.indirect as u32);
                    node.indirect = NO_BLOCK;
                }
            }
            node.num_blocks -= 1;
            if node.num_blocks == 0 && remaining == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Copies up to `n` bytes starting at `offset` from `inum`'s content
    /// into `buf`. Returns the number of bytes actually copied; reading
    /// past `size` yields a short read.
    pub(crate) fn inode_read(&self, inum: u32, buf: &mut [u8], offset: u64) -> usize {
        let node = self.get_inode(inum);
        let n = buf.len() as u64;
        if node.size <= offset {
            return 0;
        }
        let n = n.min(node.size - offset);
        let block_size = self.image.block_size() as u64;
        let mut done = 0u64;
        while done < n {
            let fblk = ((offset + done) / block_size) as usize;
            let bofs = ((offset + done) % block_size) as usize;
            let chunk = (n - done).min(block_size - bofs as u64) as usize;
            let bnum = self.inode_get_bnum(&node, fblk).expect("inode content block missing within size");
            let src = self.image.block(bnum as u32);
            buf[done as usize..done as usize + chunk].copy_from_slice(&src[bofs..bofs + chunk]);
            done += chunk as u64;
        }
        done as usize
    }

    /// Writes `buf` into `inum`'s content starting at `offset`, growing the
    /// inode first if the write extends past the current size. Returns the
    /// number of bytes written.
    pub(crate) fn inode_write(&mut self, inum: u32, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut node = self.get_inode(inum);
        let end = offset + buf.len() as u64;
        if end > node.size {
            let grow_by = end - node.size;
            self.grow_inode(&mut node, grow_by)?;
        }
        let block_size = self.image.block_size() as u64;
        let mut done = 0u64;
        while done < buf.len() as u64 {
            let fblk = ((offset + done) / block_size) as usize;
            let bofs = ((offset + done) % block_size) as usize;
            let chunk = (buf.len() as u64 - done).min(block_size - bofs as u64) as usize;
            let bnum = self.inode_get_bnum(&node, fblk).expect("inode content block missing after grow");
            let dst = self.image.block_mut(bnum as u32);
            dst[bofs..bofs + chunk].copy_from_slice(&buf[done as usize..done as usize + chunk]);
            done += chunk as u64;
        }
        self.put_inode(inum, &node);
        Ok(done as usize)
    }

    /// Shrinks the content of `inum` by `delta` bytes (used by
    /// `truncate` and directory compaction).
    pub(crate) fn inode_shrink(&mut self, inum: u32, delta: u64) -> Result<()> {
        let mut node = self.get_inode(inum);
        self.shrink_inode(&mut node, delta)?;
        self.put_inode(inum, &node);
        Ok(())
    }

    /// Sets both access and modification timestamps on `inum`.
    pub(crate) fn set_times(&mut self, inum: u32, atime: (i64, i32), mtime: (i64, i32)) {
        let mut node = self.get_inode(inum);
        node.atime_sec = atime.0;
        node.atime_nsec = atime.1;
        node.mtime_sec = mtime.0;
        node.mtime_nsec = mtime.1;
        self.put_inode(inum, &node);
    }

    /// Builds a [`Stat`] snapshot for `inum`.
    pub(crate) fn inode_stat(&self, inum: u32) -> Stat {
        let node = self.get_inode(inum);
        Stat {
            ino: inum,
            mode: node.mode,
            nlink: node.refs,
            size: node.size,
            atime: (node.atime_sec, node.atime_nsec),
            mtime: (node.mtime_sec, node.mtime_nsec),
        }
    }

    pub(crate) fn inode_is_dir(&self, inum: u32) -> bool {
        self.get_inode(inum).is_dir()
    }

    pub(crate) fn inode_refs(&self, inum: u32) -> u32 {
        self.get_inode(inum).refs
    }

    pub(crate) fn inode_bump_refs(&mut self, inum: u32) {
        let mut node = self.get_inode(inum);
        node.refs += 1;
        self.put_inode(inum, &node);
    }

    pub(crate) fn inode_set_mode(&mut self, inum: u32, mode: u32) {
        let mut node = self.get_inode(inum);
        node.mode = mode;
        self.put_inode(inum, &node);
    }
}

fn now() -> (i64, i32) {
    let d = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs() as i64, d.subsec_nanos() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ImageOptions;
    use tempfile::NamedTempFile;

    fn fresh_fs() -> Filesystem {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        std::mem::forget(tmp);
        Filesystem::open_or_create(path, &ImageOptions::default()).unwrap()
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut fs = fresh_fs();
        let inum = fs.alloc_inode(0o100644).unwrap();
        let data = b"hello world";
        fs.inode_write(inum, data, 0).unwrap();
        let mut buf = [0u8; 11];
        let n = fs.inode_read(inum, &mut buf, 0);
        assert_eq!(n, data.len());
        assert_eq!(&buf, data);
    }

    #[test]
    fn read_past_eof_is_short() {
        let mut fs = fresh_fs();
        let inum = fs.alloc_inode(0o100644).unwrap();
        fs.inode_write(inum, b"hi", 0).unwrap();
        let mut buf = [0u8; 10];
        let n = fs.inode_read(inum, &mut buf, 0);
        assert_eq!(n, 2);
    }

    #[test]
    fn grow_crosses_indirect_boundary() {
        let mut fs = fresh_fs();
        let inum = fs.alloc_inode(0o100644).unwrap();
        let block_size = fs.image.block_size() as u64;
        // Grow to exactly NUM_DIRECT blocks, then one byte more: this must
        // allocate both the indirect block and its first data block.
        let boundary = (NUM_DIRECT as u64) * block_size;
        let zeros = vec![0u8; boundary as usize + 1];
        fs.inode_write(inum, &zeros, 0).unwrap();
        let node = fs.get_inode(inum);
        assert_eq!(node.size, boundary + 1);
        assert_ne!(node.indirect, NO_BLOCK);
        assert_eq!(node.num_blocks as usize, NUM_DIRECT + 1);
    }

    #[test]
    fn full_shrink_frees_every_block_including_indirect() {
        let mut fs = fresh_fs();
        let inum = fs.alloc_inode(0o100644).unwrap();
        let data = vec![7u8; 4096 * 13 + 1];
        fs.inode_write(inum, &data, 0).unwrap();
        fs.inode_shrink(inum, data.len() as u64).unwrap();
        let after = fs.get_inode(inum);
        assert_eq!(after.num_blocks, 0);
        assert_eq!(after.size, 0);
        assert_eq!(after.indirect, NO_BLOCK);
        assert!(after.direct.iter().all(|&b| b == NO_BLOCK));
    }

    #[test]
    fn partial_shrink_keeps_the_block_it_does_not_empty() {
        let mut fs = fresh_fs();
        let inum = fs.alloc_inode(0o100644).unwrap();
        fs.inode_write(inum, &vec![7u8; 200], 0).unwrap();
        fs.inode_shrink(inum, 50).unwrap();
        let after = fs.get_inode(inum);
        assert_eq!(after.num_blocks, 1);
        assert_eq!(after.size, 150);
    }
}
