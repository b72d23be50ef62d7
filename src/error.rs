//! Error types surfaced by the filesystem's public operations.

use std::io;
use thiserror::Error;

/// Everything that can go wrong while operating on a volume.
///
/// Operations fail without recovery: no partial mutation is undone, and
/// the caller decides whether to retry, report or abort.
#[derive(Debug, Error)]
pub enum FsError {
    /// The block device has been closed, or was never opened.
    #[error("device is not open")]
    NotOpen,
    /// The volume has not been mounted yet.
    #[error("filesystem is not mounted")]
    NotMounted,
    /// A block transfer on the backing file failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The free bitmap has no free block left.
    #[error("no space left on device")]
    OutOfSpace,
    /// The inode table has no unused slot left.
    #[error("no free inode left")]
    OutOfInodes,
    /// Path resolution failed.
    #[error("no such file or directory: {0}")]
    NotFound(String),
    /// A path component or operand resolved to something that is not a
    /// directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),
    /// The operand resolved to something that is not a regular file.
    #[error("not a file: {0}")]
    NotAFile(String),
    /// The target directory already carries an entry of that name.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),
    /// The target directory's single block has no free entry slot.
    #[error("directory is full: {0}")]
    DirectoryFull(String),
    /// The file descriptor is out of range or not in use.
    #[error("invalid file descriptor: {0}")]
    InvalidFd(usize),
    /// Block 0 does not carry our superblock magic.
    #[error("not an imgfs image (bad magic)")]
    InvalidMagic,
}

/// Result alias used by every fallible filesystem operation.
pub type Result<T> = std::result::Result<T, FsError>;
