//! A miniature UNIX-style block filesystem stored inside a single image
//! file.
//!
//! The image is partitioned into a superblock, an inode table, a
//! free-block bitmap and a data region. [`fs::FileSystem`] persists a
//! hierarchical tree of files and directories on top of
//! [`device::Disk`] and exposes path-based create, read, write and
//! search operations together with an open-handle table.
//!
//! ```no_run
//! use imgfs::device::Disk;
//! use imgfs::fs::FileSystem;
//!
//! # fn main() -> imgfs::error::Result<()> {
//! let disk = Disk::open("disk.img", 1024, 512)?;
//! let mut fs = FileSystem::new(disk, 128);
//! if !fs.is_present()? {
//!     fs.initialize()?;
//! }
//! fs.mount()?;
//!
//! fs.create_directory("/docs")?;
//! fs.create_file("/docs/readme.md")?;
//! let fd = fs.open_file("/docs/readme.md")?;
//! fs.write_file(fd, b"hello")?;
//! fs.close_file(fd)?;
//! # Ok(())
//! # }
//! ```

pub mod bitmap;
pub mod device;
pub mod error;
pub mod fs;
pub mod layout;
pub mod util;
