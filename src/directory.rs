//! Directory (C6).
//!
//! A directory's content is a tightly packed array of fixed-size
//! [`DirEntry`] records, stored as ordinary inode content (so directory
//! content can span multiple blocks just like any other file). Entry order
//! is insertion order; deletion compacts the tail down by one slot.

use std::mem::size_of;

use log::trace;

use crate::error::{FsError, Result};
use crate::inode::{S_IFDIR, S_IFMT};
use crate::Filesystem;

/// Maximum length of a directory entry's name.
pub const DIR_NAME_LENGTH: usize = 128;

/// A packed directory entry: a fixed-size name/inum pair stored inline in a
/// directory's content.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirEntry {
    pub name: [u8; DIR_NAME_LENGTH],
    pub inum: i32,
    _reserved: [u8; 12],
}

const _: () = assert!(size_of::<DirEntry>() == 144);

impl DirEntry {
    fn new(name: &[u8], inum: u32) -> Self {
        let mut buf = [0u8; DIR_NAME_LENGTH];
        let len = name.len().min(DIR_NAME_LENGTH);
        buf[..len].copy_from_slice(&name[..len]);
        Self {
            name: buf,
            inum: inum as i32,
            _reserved: [0; 12],
        }
    }

    fn name_matches(&self, name: &[u8]) -> bool {
        let len = name.len().min(DIR_NAME_LENGTH);
        &self.name[..len] == &name[..len] && self.name.get(len).copied().unwrap_or(0) == 0
    }

    fn as_bytes(&self) -> [u8; size_of::<DirEntry>()] {
        unsafe { std::mem::transmute_copy(self) }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut arr = [0u8; size_of::<DirEntry>()];
        arr.copy_from_slice(bytes);
        unsafe { std::mem::transmute_copy(&arr) }
    }
}

impl Filesystem {
    fn dirent_count(&self, dir_inum: u32) -> usize {
        let size = self.get_inode(dir_inum).size;
        (size / size_of::<DirEntry>() as u64) as usize
    }

    fn read_dirent(&self, dir_inum: u32, index: usize) -> DirEntry {
        let mut buf = [0u8; size_of::<DirEntry>()];
        let offset = (index * size_of::<DirEntry>()) as u64;
        self.inode_read(dir_inum, &mut buf, offset);
        DirEntry::from_bytes(&buf)
    }

    /// Creates a new directory inode: allocates it, links `"."` to itself
    /// (which also serves as the inode's own baseline link count), and, if
    /// `parent` is given, links `".."` to it without bumping the parent's
    /// link count (the `st_nlink` convention is "1 + subdirectories", so
    /// `".."` is not counted).
    pub(crate) fn directory_init(&mut self, parent: Option<u32>) -> Result<u32> {
        let inum = self.alloc_inode(S_IFDIR | 0o755)?;
        self.directory_link(inum, b".", inum)?;
        debug_assert_eq!(self.get_inode(inum).refs, 1);
        if let Some(parent) = parent {
            self.link_dotdot(inum, parent)?;
        }
        trace!("directory_init(parent={parent:?}) -> {inum}");
        Ok(inum)
    }

    fn link_dotdot(&mut self, dir_inum: u32, parent: u32) -> Result<()> {
        let entry = DirEntry::new(b"..", parent);
        let bytes = entry.as_bytes();
        let offset = self.get_inode(dir_inum).size;
        self.inode_write(dir_inum, &bytes, offset)?;
        Ok(())
    }

    /// Returns the inum that `name` resolves to within `dir_inum`. An empty
    /// name resolves to `dir_inum` itself. Fails [`FsError::NoEnt`] if no
    /// entry matches.
    pub(crate) fn directory_lookup(&self, dir_inum: u32, name: &[u8]) -> Result<u32> {
        if name.is_empty() {
            return Ok(dir_inum);
        }
        let count = self.dirent_count(dir_inum);
        for i in 0..count {
            let entry = self.read_dirent(dir_inum, i);
            if entry.name_matches(name) {
                return Ok(entry.inum as u32);
            }
        }
        Err(FsError::NoEnt)
    }

    /// Appends a new entry named `name` pointing at `target_inum`, then
    /// bumps `target_inum`'s link count. Fails [`FsError::Exist`] if the
    /// name is already used in this directory.
    pub(crate) fn directory_link(&mut self, dir_inum: u32, name: &[u8], target_inum: u32) -> Result<u32> {
        if self.directory_lookup(dir_inum, name).is_ok() {
            return Err(FsError::Exist);
        }
        let entry = DirEntry::new(name, target_inum);
        let bytes = entry.as_bytes();
        let offset = self.get_inode(dir_inum).size;
        self.inode_write(dir_inum, &bytes, offset)?;
        self.inode_bump_refs(target_inum);
        trace!("directory_link({dir_inum}, {:?}, {target_inum})", String::from_utf8_lossy(name));
        Ok(target_inum)
    }

    /// Creates a new entry `name` in `dir_inum`. If `mode` carries the
    /// directory-type bit, creates a child directory (via
    /// [`Self::directory_init`]) and overrides its mode; otherwise
    /// allocates a plain inode.
    pub(crate) fn directory_put(&mut self, dir_inum: u32, name: &[u8], mode: u32) -> Result<u32> {
        let new_inum = if mode & S_IFMT == S_IFDIR {
            let inum = self.directory_init(Some(dir_inum))?;
            self.inode_set_mode(inum, mode);
            inum
        } else {
            self.alloc_inode(mode)?
        };
        self.directory_link(dir_inum, name, new_inum)
    }

    /// Removes the entry named `name` from `dir_inum`: frees the target
    /// inode (respecting its link count), then compacts the tail of the
    /// directory down by one slot, preserving the order of the remaining
    /// entries.
    pub(crate) fn directory_delete(&mut self, dir_inum: u32, name: &[u8]) -> Result<()> {
        let count = self.dirent_count(dir_inum);
        let slot = (0..count).find(|&i| self.read_dirent(dir_inum, i).name_matches(name));
        let Some(slot) = slot else {
            return Err(FsError::NoEnt);
        };
        let entry = self.read_dirent(dir_inum, slot);
        self.free_inode(entry.inum as u32)?;

        let entry_size = size_of::<DirEntry>() as u64;
        let dir_size = self.get_inode(dir_inum).size;
        let slot_offset = slot as u64 * entry_size;
        let tail_offset = slot_offset + entry_size;
        let tail_len = (dir_size - tail_offset) as usize;
        if tail_len > 0 {
            let mut scratch = vec![0u8; tail_len];
            self.inode_read(dir_inum, &mut scratch, tail_offset);
            self.inode_write(dir_inum, &scratch, slot_offset)?;
        }
        self.inode_shrink(dir_inum, entry_size)?;
        trace!("directory_delete({dir_inum}, {:?})", String::from_utf8_lossy(name));
        Ok(())
    }

    /// Iterates the entries of `dir_inum` in insertion order, yielding
    /// `(name, inum)` pairs.
    pub(crate) fn directory_entries(&self, dir_inum: u32) -> Vec<(Vec<u8>, u32)> {
        let count = self.dirent_count(dir_inum);
        (0..count)
            .map(|i| {
                let entry = self.read_dirent(dir_inum, i);
                let len = entry.name.iter().position(|&b| b == 0).unwrap_or(DIR_NAME_LENGTH);
                (entry.name[..len].to_vec(), entry.inum as u32)
            })
            .collect()
    }
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
    fn root_has_dot_only() {
        let fs = fresh_fs();
        let entries = fs.directory_entries(0);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, b".");
        assert_eq!(entries[0].1, 0);
    }

    #[test]
    fn put_and_lookup() {
        let mut fs = fresh_fs();
        let inum = fs.directory_put(0, b"a", 0o100644).unwrap();
        assert_eq!(fs.directory_lookup(0, b"a").unwrap(), inum);
        assert_eq!(fs.directory_lookup(0, b"missing").unwrap_err().to_string(), FsError::NoEnt.to_string());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut fs = fresh_fs();
        fs.directory_put(0, b"a", 0o100644).unwrap();
        let err = fs.directory_put(0, b"a", 0o100644).unwrap_err();
        assert!(matches!(err, FsError::Exist));
    }

    #[test]
    fn delete_preserves_order_of_remaining_entries() {
        let mut fs = fresh_fs();
        fs.directory_put(0, b"a", 0o100644).unwrap();
        fs.directory_put(0, b"b", 0o100644).unwrap();
        fs.directory_put(0, b"c", 0o100644).unwrap();
        fs.directory_delete(0, b"b").unwrap();
        let names: Vec<_> = fs.directory_entries(0).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![b".".to_vec(), b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn subdirectory_has_dot_and_dotdot() {
        let mut fs = fresh_fs();
        let d = fs.directory_put(0, b"d", S_IFDIR as u32 | 0o755).unwrap();
        let names: Vec<_> = fs.directory_entries(d).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![b".".to_vec(), b"..".to_vec()]);
        assert_eq!(fs.directory_lookup(d, b"..").unwrap(), 0);
    }
}
