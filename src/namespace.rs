//! Path resolution and namespace operations (C7).
//!
//! Turns POSIX paths into inode numbers by walking one path component at a
//! time through [`Filesystem::directory_lookup`], then exposes the
//! path-addressed facade (`stat`, `read`, `write`, `mknod`, `unlink`,
//! `link`, `rename`, ...) that an external adapter (a FUSE implementation,
//! a CLI) drives.

use log::debug;

use crate::error::{FsError, Result};
use crate::inode::Stat;
use crate::path;
use crate::Filesystem;
use crate::ROOT_INUM;

/// A single entry as seen through [`Filesystem::list`]: a name paired with
/// the `stat` of what it points to.
#[derive(Debug, Clone)]
pub struct DirEntryView {
    pub name: Vec<u8>,
    pub stat: Stat,
}

impl Filesystem {
    fn split_parent(path: &str) -> Result<(Vec<&[u8]>, &[u8])> {
        let mut parts = path::split(path);
        let name = parts.pop().ok_or(FsError::Invalid)?;
        Ok((parts, name))
    }

    /// Resolves `path` to an inode number by walking one component at a
    /// time from the root, following `"."` and `".."` entries like any
    /// other directory entry. Fails [`FsError::NoEnt`] if any component is
    /// missing, [`FsError::NotDir`] if a non-terminal component is not a
    /// directory.
    pub fn get_inum(&self, path: &str) -> Result<u32> {
        let mut inum = ROOT_INUM;
        for part in path::split(path) {
            if !self.inode_is_dir(inum) {
                return Err(FsError::NotDir);
            }
            inum = self.directory_lookup(inum, part)?;
        }
        Ok(inum)
    }

    fn resolve_parent(&self, path: &str) -> Result<(u32, Vec<u8>)> {
        let (parts, name) = Self::split_parent(path)?;
        let mut inum = ROOT_INUM;
        for part in parts {
            if !self.inode_is_dir(inum) {
                return Err(FsError::NotDir);
            }
            inum = self.directory_lookup(inum, part)?;
        }
        if !self.inode_is_dir(inum) {
            return Err(FsError::NotDir);
        }
        Ok((inum, name.to_vec()))
    }

    /// Returns a [`Stat`] snapshot for `path`.
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let inum = self.get_inum(path)?;
        Ok(self.inode_stat(inum))
    }

    /// Reads up to `buf.len()` bytes from `path` starting at `offset`.
    /// Returns the number of bytes actually read (short on EOF).
    pub fn read(&self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let inum = self.get_inum(path)?;
        if self.inode_is_dir(inum) {
            return Err(FsError::NotDir);
        }
        Ok(self.inode_read(inum, buf, offset))
    }

    /// Writes `buf` into `path` starting at `offset`, growing the file if
    /// needed. Returns the number of bytes written.
    pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize> {
        let inum = self.get_inum(path)?;
        if self.inode_is_dir(inum) {
            return Err(FsError::NotDir);
        }
        let n = self.inode_write(inum, buf, offset)?;
        let now = now();
        self.set_times(inum, now, now);
        Ok(n)
    }

    /// Shrinks `path` to `new_size` bytes. Growing via truncate is not
    /// supported; `new_size` must not exceed the current size.
    pub fn truncate(&mut self, path: &str, new_size: u64) -> Result<()> {
        let inum = self.get_inum(path)?;
        if self.inode_is_dir(inum) {
            return Err(FsError::NotDir);
        }
        let current = self.inode_stat(inum).size;
        if new_size > current {
            return Err(FsError::Invalid);
        }
        self.inode_shrink(inum, current - new_size)
    }

    /// Creates a new file or directory at `path` with the given `mode`.
    pub fn mknod(&mut self, path: &str, mode: u32) -> Result<u32> {
        let (dir_inum, name) = self.resolve_parent(path)?;
        self.directory_put(dir_inum, &name, mode)
    }

    /// Removes the entry at `path`, freeing the target inode once its link
    /// count drops to zero.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (dir_inum, name) = self.resolve_parent(path)?;
        self.directory_delete(dir_inum, &name)
    }

    /// Creates a new hard link at `new_path` pointing at the inode backing
    /// `old_path`.
    pub fn link(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let target = self.get_inum(old_path)?;
        if self.inode_is_dir(target) {
            return Err(FsError::Invalid);
        }
        let (dir_inum, name) = self.resolve_parent(new_path)?;
        self.directory_link(dir_inum, &name, target)?;
        Ok(())
    }

    /// Moves `old_path` to `new_path`. Implemented as link-then-unlink:
    /// not atomic with respect to a crash between the two steps, which
    /// mirrors the non-atomicity already inherent in a two-step rename
    /// over two independent directory entries. Idempotent when `old_path`
    /// and `new_path` resolve to the same inode: no link/unlink is
    /// performed and the call simply succeeds.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let target = self.get_inum(old_path)?;
        if self.get_inum(new_path).ok() == Some(target) {
            return Ok(());
        }
        let (dst_dir, dst_name) = self.resolve_parent(new_path)?;
        self.directory_link(dst_dir, &dst_name, target)?;
        let (src_dir, src_name) = self.resolve_parent(old_path)?;
        self.directory_delete(src_dir, &src_name)?;
        debug!("rename({old_path:?} -> {new_path:?})");
        Ok(())
    }

    /// Sets `path`'s access and modification times.
    pub fn utimens(&mut self, path: &str, atime: (i64, i32), mtime: (i64, i32)) -> Result<()> {
        let inum = self.get_inum(path)?;
        self.set_times(inum, atime, mtime);
        Ok(())
    }

    /// Lists the entries of the directory at `path`.
    pub fn list(&self, path: &str) -> Result<Vec<DirEntryView>> {
        let inum = self.get_inum(path)?;
        if !self.inode_is_dir(inum) {
            return Err(FsError::NotDir);
        }
        Ok(self
            .directory_entries(inum)
            .into_iter()
            .map(|(name, inum)| DirEntryView {
                name,
                stat: self.inode_stat(inum),
            })
            .collect())
    }
}

fn now() -> (i64, i32) {
    let d = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs() as i64, d.subsec_nanos() as i32)
}
