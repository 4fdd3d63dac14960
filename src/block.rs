//! Image & block layer (C1).
//!
//! Memory-maps a fixed-size disk image and exposes it as a sequence of
//! fixed-size blocks. Field access on top of a block goes through typed
//! accessors (`read_struct`/`write_struct`) rather than raw pointer
//! dereferences scattered across callers, so directory entries and
//! indirect-slot arrays cannot be confused with one another.

use std::fs::{File, OpenOptions};
use std::mem::size_of;
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{FsError, Result};

/// Default block size in bytes.
pub const BLOCK_SIZE: usize = 4096;
/// Default image size: large enough for the reserved prefix plus a
/// comfortable amount of data blocks.
pub const DEFAULT_IMAGE_SIZE: u64 = 1 << 20;
/// Number of blocks reserved for the inode table.
pub const N_INO: u32 = 3;

/// Tunable parameters for creating a fresh image. The defaults match the
/// reference constants (`B = 4096`, image size `1 MiB`, 3 inode-table
/// blocks).
#[derive(Debug, Clone, Copy)]
pub struct ImageOptions {
    /// Size of one block, in bytes.
    pub block_size: usize,
    /// Total size of the image file, in bytes. Must be a multiple of
    /// `block_size`.
    pub image_size: u64,
    /// Number of blocks reserved for the inode table (block 1 onward).
    pub inode_table_blocks: u32,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            image_size: DEFAULT_IMAGE_SIZE,
            inode_table_blocks: N_INO,
        }
    }
}

/// A memory-mapped, block-addressed disk image.
pub struct Image {
    mmap: MmapMut,
    block_size: usize,
    total_blocks: u32,
    inode_table_blocks: u32,
}

impl Image {
    /// Opens an existing image at `path`, or creates and zero-fills one of
    /// `opts.image_size` bytes if absent.
    pub fn open_or_create(path: &Path, opts: &ImageOptions) -> Result<(Self, bool)> {
        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        if !existed {
            file.set_len(opts.image_size)?;
        }
        let image = Self::from_file(file, opts.block_size, opts.inode_table_blocks)?;
        Ok((image, existed))
    }

    fn from_file(file: File, block_size: usize, inode_table_blocks: u32) -> Result<Self> {
        let len = file.metadata()?.len();
        if len == 0 || len % block_size as u64 != 0 {
            return Err(FsError::Corrupt("image size is not a multiple of the block size"));
        }
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let total_blocks = (len / block_size as u64) as u32;
        Ok(Self {
            mmap,
            block_size,
            total_blocks,
            inode_table_blocks,
        })
    }

    /// The size of one block, in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The total number of blocks in the image.
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// The number of blocks reserved for the inode table (blocks
    /// `1..=inode_table_blocks`).
    pub fn inode_table_blocks(&self) -> u32 {
        self.inode_table_blocks
    }

    /// First data block, i.e. `N_INO + 1`.
    pub fn first_data_block(&self) -> u32 {
        self.inode_table_blocks + 1
    }

    fn block_range(&self, block: u32) -> std::ops::Range<usize> {
        let start = block as usize * self.block_size;
        start..start + self.block_size
    }

    /// Borrows block `block` as a byte slice. Panics if `block` is out of
    /// range: an out-of-range block index is a programmer error, not a
    /// recoverable one.
    pub fn block(&self, block: u32) -> &[u8] {
        assert!(block < self.total_blocks, "block {block} out of range");
        &self.mmap[self.block_range(block)]
    }

    /// Mutably borrows block `block`.
    pub fn block_mut(&mut self, block: u32) -> &mut [u8] {
        assert!(block < self.total_blocks, "block {block} out of range");
        let range = self.block_range(block);
        &mut self.mmap[range]
    }

    /// Reads a `repr(C)` value out of `block` at byte offset `offset`.
    ///
    /// # Safety invariant
    /// `T` must be a plain-old-data type (no padding-sensitive invariants,
    /// no interior pointers) whose size fits within the block starting at
    /// `offset`; every caller in this crate uses `#[repr(C)]` structs built
    /// for exactly this purpose.
    pub fn read_struct<T: Copy>(&self, block: u32, offset: usize) -> T {
        let bytes = self.block(block);
        assert!(offset + size_of::<T>() <= bytes.len(), "struct read out of block bounds");
        unsafe { std::ptr::read_unaligned(bytes[offset..].as_ptr() as *const T) }
    }

    /// Writes a `repr(C)` value into `block` at byte offset `offset`. See
    /// [`Image::read_struct`] for the safety invariant on `T`.
    pub fn write_struct<T: Copy>(&mut self, block: u32, offset: usize, value: &T) {
        let size = size_of::<T>();
        let bytes = self.block_mut(block);
        assert!(offset + size <= bytes.len(), "struct write out of block bounds");
        unsafe { std::ptr::write_unaligned(bytes[offset..].as_mut_ptr() as *mut T, *value) };
    }

    /// Flushes the mapped image to its backing file.
    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }
}
