//! Error taxonomy for the storage engine.
//!
//! Mirrors the abstraction levels of the reference design: physical
//! exhaustion, lookup failures, naming conflicts, shape violations, and
//! programmer errors (invariant violations on a corrupt image).

use thiserror::Error;

/// The result type used throughout the engine.
pub type Result<T> = core::result::Result<T, FsError>;

/// An error surfaced by the storage engine.
///
/// Each variant corresponds to one of the POSIX-ish codes named in the
/// upcall surface: `NOENT`, `EXIST`, `NOSPC`, `NOTDIR`, `INVAL`. `Io` and
/// `Corrupt` are not part of that surface; they report collaborator
/// failures and invariant violations respectively.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path or directory entry does not exist.
    #[error("no such file or directory")]
    NoEnt,
    /// A directory entry with that name already exists.
    #[error("file exists")]
    Exist,
    /// The data or inode bitmap is exhausted.
    #[error("no space left on device")]
    NoSpace,
    /// An intermediate path component is not a directory.
    #[error("not a directory")]
    NotDir,
    /// Impossible offset, negative size, or other malformed argument.
    #[error("invalid argument")]
    Invalid,
    /// Underlying image I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// An invariant of the on-disk layout was violated; the image is
    /// corrupt or was addressed out of range. Not a user-facing error.
    #[error("corrupt filesystem image: {0}")]
    Corrupt(&'static str),
}

impl FsError {
    /// Maps the error onto the negative `errno` convention used by the
    /// kernel upcall surface (`0` on success, negative constants on
    /// failure). Provided for adapters, not used internally.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NoEnt => -libc::ENOENT,
            FsError::Exist => -libc::EEXIST,
            FsError::NoSpace => -libc::ENOSPC,
            FsError::NotDir => -libc::ENOTDIR,
            FsError::Invalid => -libc::EINVAL,
            FsError::Io(_) => -libc::EIO,
            FsError::Corrupt(_) => -libc::EIO,
        }
    }
}
