//! Block allocator (C3).
//!
//! Allocates and frees data blocks through the data bitmap stored in the
//! first half of block 0. Ties always break towards the lowest-numbered
//! free block, which keeps allocation order (and therefore test fixtures)
//! deterministic.

use log::trace;

use crate::bitmap::BitmapView;
use crate::error::{FsError, Result};
use crate::Filesystem;

/// Sentinel stored in direct/indirect slots that do not reference a block.
pub const NO_BLOCK: i32 = -1;

impl Filesystem {
    fn data_bitmap(&mut self) -> BitmapView<'_> {
        let half = self.image.block_size() / 2;
        BitmapView::new(&mut self.image.block_mut(0)[..half])
    }

    /// Marks block `b` allocated in the data bitmap without going through
    /// the normal allocation path. Used once at image-format time to
    /// reserve block 0 and the inode table.
    pub(crate) fn mark_block_reserved(&mut self, b: u32) {
        self.data_bitmap().set(b as usize, true);
    }

    /// Scans the data bitmap for the first clear bit, sets it, and returns
    /// its index. Fails with [`FsError::NoSpace`] if every block covered by
    /// the image is in use.
    pub(crate) fn alloc_block(&mut self) -> Result<u32> {
        let total = self.image.total_blocks() as usize;
        let idx = {
            let bitmap = self.data_bitmap();
            bitmap.first_clear(total).ok_or(FsError::NoSpace)?
        };
        self.data_bitmap().set(idx, true);
        trace!("alloc_block -> {idx}");
        Ok(idx as u32)
    }

    /// Clears block `b`'s bit in the data bitmap. Block contents are not
    /// zeroed; the block is simply free to be reused.
    pub(crate) fn free_block(&mut self, b: u32) {
        trace!("free_block({b})");
        self.data_bitmap().set(b as usize, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::ImageOptions;
    use tempfile::NamedTempFile;

    fn fresh_fs() -> Filesystem {
        let tmp = NamedTempFile::new().unwrap();
        // Keep the file alive for the filesystem's lifetime by leaking the
        // guard; tests run in isolated temp files that are cleaned up by
        // the OS on process exit.
        let path = tmp.path().to_path_buf();
        std::mem::forget(tmp);
        Filesystem::open_or_create(path, &ImageOptions::default()).unwrap()
    }

    #[test]
    fn alloc_is_lowest_free_and_free_recycles() {
        let mut fs = fresh_fs();
        let a = fs.alloc_block().unwrap();
        let b = fs.alloc_block().unwrap();
        assert!(b > a);
        fs.free_block(a);
        let c = fs.alloc_block().unwrap();
        assert_eq!(c, a, "freed block must be the next one reused");
    }

    #[test]
    fn reserved_prefix_is_preallocated() {
        let mut fs = fresh_fs();
        let reserved = fs.image.first_data_block();
        let b = fs.alloc_block().unwrap();
        assert!(b >= reserved, "allocator must never hand out a reserved block");
    }
}
