//! The block device: a fixed array of blocks backed by a regular file.

use std::fs::{File, OpenOptions};
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A fixed-count, fixed-size array of blocks stored in a regular file.
///
/// The device performs no caching: every call maps to one positioned
/// read or write on the backing file. Blocks are addressed by number,
/// starting at 0.
pub struct Disk {
    /// The backing file. `None` once the device has been closed.
    file: Option<File>,
    /// The path to the backing file.
    path: PathBuf,
    /// The number of blocks on the device.
    total_blocks: i32,
    /// The size of a block in bytes.
    block_size: i32,
}

impl Disk {
    /// Opens the backing file at `path` for reading and writing,
    /// creating it if it does not exist.
    ///
    /// A file smaller than `total_blocks * block_size` bytes is extended
    /// with zeros up to that exact size. A larger file is left as is.
    pub fn open<P: AsRef<Path>>(path: P, total_blocks: i32, block_size: i32) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        ensure_size(
            &mut file,
            total_blocks as u64 * block_size as u64,
            block_size as u64,
        )?;
        Ok(Self {
            file: Some(file),
            path,
            total_blocks,
            block_size,
        })
    }

    /// Tells whether the device currently holds an open file handle.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Returns the path to the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of blocks on the device.
    pub fn total_blocks(&self) -> i32 {
        self.total_blocks
    }

    /// Returns the size of a block in bytes.
    pub fn block_size(&self) -> i32 {
        self.block_size
    }

    /// Validates `block_number` and returns the file handle along with
    /// the block's byte offset.
    fn checked_file(&mut self, block_number: i32) -> io::Result<(&mut File, u64)> {
        if block_number < 0 || block_number >= self.total_blocks {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block number {block_number} out of range"),
            ));
        }
        let offset = block_number as u64 * self.block_size as u64;
        match self.file.as_mut() {
            Some(file) => Ok((file, offset)),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "device is closed",
            )),
        }
    }

    /// Reads block `block_number` into `buffer`.
    ///
    /// `buffer` must be exactly one block long.
    pub fn read_block(&mut self, block_number: i32, buffer: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(buffer.len(), self.block_size as usize);
        let (file, offset) = self.checked_file(block_number)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buffer)
    }

    /// Writes `buffer` to block `block_number`.
    ///
    /// `buffer` must be exactly one block long.
    pub fn write_block(&mut self, block_number: i32, buffer: &[u8]) -> io::Result<()> {
        debug_assert_eq!(buffer.len(), self.block_size as usize);
        let (file, offset) = self.checked_file(block_number)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buffer)
    }

    /// Flushes pending writes and releases the file handle.
    ///
    /// Closing an already-closed device is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Appends zeros to `file` until it is at least `desired_size` bytes
/// long, writing `chunk_size` bytes at a time.
fn ensure_size(file: &mut File, desired_size: u64, chunk_size: u64) -> io::Result<()> {
    let mut current_size = file.metadata()?.len();
    if current_size >= desired_size {
        return Ok(());
    }

    file.seek(SeekFrom::End(0))?;
    let zeros = vec![0u8; chunk_size as usize];
    while current_size < desired_size {
        let chunk = (desired_size - current_size).min(chunk_size) as usize;
        file.write_all(&zeros[..chunk])?;
        current_size += chunk as u64;
    }
    file.sync_all()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn create_at_exact_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.img");

        let disk = Disk::open(&path, 16, 512).unwrap();
        assert!(disk.is_open());
        assert_eq!(fs::metadata(&path).unwrap().len(), 16 * 512);
    }

    #[test]
    fn extend_short_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.img");
        fs::write(&path, [0xabu8; 100]).unwrap();

        Disk::open(&path, 16, 512).unwrap();
        let contents = fs::read(&path).unwrap();
        assert_eq!(contents.len(), 16 * 512);
        // Existing bytes are preserved, the tail is zero-filled.
        assert_eq!(&contents[..100], &[0xabu8; 100]);
        assert!(contents[100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn never_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk.img");
        fs::write(&path, vec![0u8; 32 * 512]).unwrap();

        Disk::open(&path, 16, 512).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), 32 * 512);
    }

    #[test]
    fn block_round_trip() {
        let dir = tempdir().unwrap();
        let mut disk = Disk::open(dir.path().join("disk.img"), 16, 512).unwrap();

        let block: Vec<u8> = (0..512).map(|i| (i % 256) as u8).collect();
        disk.write_block(7, &block).unwrap();

        let mut out = vec![0u8; 512];
        disk.read_block(7, &mut out).unwrap();
        assert_eq!(out, block);

        // Neighbours are untouched.
        disk.read_block(6, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
        disk.read_block(8, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn rejects_out_of_range_blocks() {
        let dir = tempdir().unwrap();
        let mut disk = Disk::open(dir.path().join("disk.img"), 16, 512).unwrap();

        let mut buf = vec![0u8; 512];
        assert!(disk.read_block(-1, &mut buf).is_err());
        assert!(disk.read_block(16, &mut buf).is_err());
        assert!(disk.write_block(16, &buf).is_err());
        assert!(disk.read_block(15, &mut buf).is_ok());
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut disk = Disk::open(dir.path().join("disk.img"), 16, 512).unwrap();

        disk.close().unwrap();
        assert!(!disk.is_open());
        disk.close().unwrap();

        let mut buf = vec![0u8; 512];
        assert!(disk.read_block(0, &mut buf).is_err());
    }
}
