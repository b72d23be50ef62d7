//! The filesystem proper: volume lifecycle, namespace operations and
//! file I/O on top of the block device.
//!
//! A volume moves through three states: closed, open and mounted.
//! [`FileSystem::initialize`] formats an open device,
//! [`FileSystem::mount`] loads its metadata into memory, and every
//! namespace operation requires a mount. All metadata mutations are
//! written back immediately: the bitmap on every allocation, the inode
//! table after every metadata change. A block carrying a new pointer is
//! always written after the block it points to.

pub mod path;

use crate::bitmap::FreeBitmap;
use crate::device::Disk;
use crate::error::{FsError, Result};
use crate::layout::{
    self, DirectoryEntry, Inode, InodeKind, Layout, Superblock, NO_BLOCK, ROOT_INODE_INDEX,
    SUPERBLOCK_MAGIC,
};
use crate::util::ceil_division;
use log::{debug, info, warn};
use std::io;
use uuid::Uuid;

/// A file descriptor handed out by [`FileSystem::open_file`].
pub type Fd = usize;

/// An entry of the in-memory open-file table.
#[derive(Clone, Copy, Debug, Default)]
struct OpenFile {
    /// The inode the descriptor refers to.
    inode_index: i32,
    /// Reserved for positioned I/O; reads and writes currently always
    /// start at byte 0.
    #[allow(dead_code)]
    offset: i32,
    /// Tells whether the slot is currently assigned.
    in_use: bool,
}

/// A mountable filesystem over a block device.
pub struct FileSystem {
    /// The underlying block device.
    disk: Disk,
    /// In-memory copy of the superblock.
    superblock: Superblock,
    /// In-memory copy of the inode table, always `max_inodes` long
    /// once initialized or mounted.
    inode_table: Vec<Inode>,
    /// In-memory copy of the free-block bitmap.
    free_bitmap: FreeBitmap,
    /// The open-file table. Never persisted.
    open_files: Vec<OpenFile>,
    /// The number of inode slots on the volume.
    max_inodes: i32,
    /// Tells whether the on-disk metadata has been loaded.
    mounted: bool,
}

impl FileSystem {
    /// Wraps `disk`, sized for `max_inodes` namespace objects.
    ///
    /// The volume is unusable until [`Self::initialize`] and/or
    /// [`Self::mount`] have been called.
    pub fn new(disk: Disk, max_inodes: i32) -> Self {
        Self {
            disk,
            superblock: Superblock::default(),
            inode_table: Vec::new(),
            free_bitmap: FreeBitmap::empty(),
            open_files: Vec::new(),
            max_inodes,
            mounted: false,
        }
    }

    /// Read-only access to the superblock.
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Read-only access to the inode table.
    pub fn inode_table(&self) -> &[Inode] {
        &self.inode_table
    }

    /// Returns the number of inode slots on the volume.
    pub fn max_inodes(&self) -> i32 {
        self.max_inodes
    }

    /// Tells whether the volume is mounted.
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Tells whether the inode at `index` is a directory.
    pub fn is_directory_inode(&self, index: i32) -> bool {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.inode_table.get(i))
            .is_some_and(|inode| inode.kind == InodeKind::Directory)
    }

    /// Returns the number of blocks currently free.
    pub fn free_block_count(&self) -> i32 {
        self.free_bitmap.free_count()
    }

    /// Maximum payload size of one file, in bytes.
    ///
    /// A file has a single index block, so its payload is capped at
    /// `(block_size / 4) * block_size` bytes.
    pub fn max_file_size(&self) -> usize {
        layout::index_entries_per_block(self.superblock.block_size)
            * self.superblock.block_size as usize
    }

    /// Flushes and releases the block device. The volume is unmounted.
    pub fn close(&mut self) -> Result<()> {
        self.mounted = false;
        self.disk.close()?;
        Ok(())
    }

    // Volume lifecycle

    /// Reads block 0 and tells whether it carries an imgfs superblock.
    pub fn is_present(&mut self) -> Result<bool> {
        if !self.disk.is_open() {
            return Err(FsError::NotOpen);
        }
        let mut buf = self.block_buffer();
        self.disk.read_block(0, &mut buf)?;
        Ok(Superblock::read_from(&buf)?.magic == SUPERBLOCK_MAGIC)
    }

    /// Formats the device with a fresh, empty filesystem.
    ///
    /// Writes the superblock, a zeroed inode table with the root
    /// directory configured, an empty root directory block and the
    /// initial free bitmap. The volume is left unmounted; call
    /// [`Self::mount`] to start using it.
    pub fn initialize(&mut self) -> Result<()> {
        if !self.disk.is_open() {
            return Err(FsError::NotOpen);
        }
        let total_blocks = self.disk.total_blocks();
        let block_size = self.disk.block_size();
        let layout = Layout::compute(total_blocks, block_size, self.max_inodes);

        self.superblock = Superblock {
            magic: SUPERBLOCK_MAGIC,
            total_blocks,
            block_size,
            inode_table_start: layout.inode_table_start,
            inode_table_blocks: layout.inode_table_blocks,
            free_bitmap_start: layout.free_bitmap_start,
            free_bitmap_blocks: layout.free_bitmap_blocks,
            data_region_start: layout.data_region_start,
            root_inode_index: ROOT_INODE_INDEX,
            volume_id: *Uuid::new_v4().as_bytes(),
        };
        self.write_superblock_to_disk()?;

        // The root directory occupies inode 0 and the first data block.
        self.inode_table = vec![Inode::default(); self.max_inodes as usize];
        self.inode_table[ROOT_INODE_INDEX as usize] = Inode {
            kind: InodeKind::Directory,
            index_block: layout.data_region_start,
            size: 0,
        };
        self.write_inode_table_to_disk()?;

        let root_block = self.empty_directory_block()?;
        self.disk.write_block(layout.data_region_start, &root_block)?;

        self.free_bitmap = self.initial_bitmap(&layout);
        self.write_free_bitmap_to_disk()?;

        self.mounted = false;
        info!(
            "formatted {}: {} blocks of {} bytes, {} inodes, data region at block {}",
            self.disk.path().display(),
            total_blocks,
            block_size,
            self.max_inodes,
            layout.data_region_start,
        );
        Ok(())
    }

    /// Loads the on-disk metadata into memory.
    ///
    /// Fails with [`FsError::InvalidMagic`] when block 0 does not carry
    /// our superblock.
    pub fn mount(&mut self) -> Result<()> {
        if !self.disk.is_open() {
            return Err(FsError::NotOpen);
        }
        self.read_superblock_from_disk()?;
        self.read_inode_table_from_disk()?;
        self.read_free_bitmap_from_disk()?;
        self.mounted = true;
        info!(
            "mounted {}: volume {}",
            self.disk.path().display(),
            Uuid::from_bytes(self.superblock.volume_id),
        );
        Ok(())
    }

    // Namespace operations

    /// Creates an empty file at `path`.
    pub fn create_file(&mut self, path: &str) -> Result<()> {
        self.create_node(path, InodeKind::File)
    }

    /// Creates an empty directory at `path`.
    pub fn create_directory(&mut self, path: &str) -> Result<()> {
        self.create_node(path, InodeKind::Directory)
    }

    /// Returns the non-empty entries of the directory at `path`, in
    /// on-disk order.
    pub fn list_directory_entries(&mut self, path: &str) -> Result<Vec<DirectoryEntry>> {
        self.require_mounted()?;
        let inode_index = self.resolve_path(path)?;
        let inode = self.inode(inode_index)?;
        if inode.kind != InodeKind::Directory {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        let entries = self.read_directory_entries(inode)?;
        Ok(entries.into_iter().filter(|e| !e.is_free()).collect())
    }

    /// Opens the file at `path` and returns a descriptor for it.
    pub fn open_file(&mut self, path: &str) -> Result<Fd> {
        self.require_mounted()?;
        let inode_index = self.resolve_path(path)?;
        if self.inode(inode_index)?.kind != InodeKind::File {
            return Err(FsError::NotAFile(path.to_string()));
        }
        let entry = OpenFile {
            inode_index,
            offset: 0,
            in_use: true,
        };
        let fd = match self.open_files.iter().position(|f| !f.in_use) {
            Some(fd) => {
                self.open_files[fd] = entry;
                fd
            }
            None => {
                self.open_files.push(entry);
                self.open_files.len() - 1
            }
        };
        debug!("opened {path} as fd {fd} (inode {inode_index})");
        Ok(fd)
    }

    /// Releases a descriptor returned by [`Self::open_file`].
    pub fn close_file(&mut self, fd: Fd) -> Result<()> {
        self.require_mounted()?;
        let entry = self
            .open_files
            .get_mut(fd)
            .filter(|f| f.in_use)
            .ok_or(FsError::InvalidFd(fd))?;
        entry.in_use = false;
        Ok(())
    }

    /// Replaces the contents of the open file `fd` with `data`.
    ///
    /// Data blocks are allocated lazily as the payload grows. Payloads
    /// longer than [`Self::max_file_size`] are truncated.
    pub fn write_file(&mut self, fd: Fd, data: &[u8]) -> Result<()> {
        self.require_mounted()?;
        let inode_index = self.open_inode(fd)?;
        let inode = self.inode(inode_index)?;
        if inode.kind != InodeKind::File {
            return Err(FsError::NotAFile(format!("inode {inode_index}")));
        }

        let block_size = self.superblock.block_size as usize;
        let max_size = self.max_file_size();
        let data = if data.len() > max_size {
            warn!(
                "write of {} bytes to inode {inode_index} truncated to {max_size} bytes",
                data.len(),
            );
            &data[..max_size]
        } else {
            data
        };

        let mut index_buf = self.block_buffer();
        self.disk.read_block(inode.index_block, &mut index_buf)?;
        let mut slots = layout::read_index_block(&index_buf)?;

        // Data blocks are written before the index block that points at
        // them.
        let needed = ceil_division(data.len() as u64, block_size as u64) as usize;
        let mut block = vec![0u8; block_size];
        for i in 0..needed {
            if slots[i] == NO_BLOCK {
                slots[i] = self.allocate_block()?;
            }
            let chunk = &data[i * block_size..data.len().min((i + 1) * block_size)];
            block[..chunk.len()].copy_from_slice(chunk);
            block[chunk.len()..].fill(0);
            self.disk.write_block(slots[i], &block)?;
        }

        layout::write_index_block(&slots, &mut index_buf)?;
        self.disk.write_block(inode.index_block, &index_buf)?;

        self.inode_table[inode_index as usize].size = data.len() as i32;
        self.write_inode_table_to_disk()?;
        debug!("wrote {} bytes to inode {inode_index}", data.len());
        Ok(())
    }

    /// Appends the contents of the open file `fd` to `out`.
    ///
    /// A missing data block before the logical end of file stops the
    /// read early without error.
    pub fn read_file(&mut self, fd: Fd, out: &mut Vec<u8>) -> Result<()> {
        self.require_mounted()?;
        let inode_index = self.open_inode(fd)?;
        let inode = self.inode(inode_index)?;
        if inode.kind != InodeKind::File {
            return Err(FsError::NotAFile(format!("inode {inode_index}")));
        }

        let block_size = self.superblock.block_size as usize;
        let mut index_buf = self.block_buffer();
        self.disk.read_block(inode.index_block, &mut index_buf)?;
        let slots = layout::read_index_block(&index_buf)?;

        let mut remaining = inode.size as usize;
        let mut block = vec![0u8; block_size];
        for &slot in &slots {
            if remaining == 0 {
                break;
            }
            if slot == NO_BLOCK {
                warn!("inode {inode_index}: data block missing before end of file, read stops short");
                break;
            }
            self.disk.read_block(slot, &mut block)?;
            let chunk = remaining.min(block_size);
            out.extend_from_slice(&block[..chunk]);
            remaining -= chunk;
        }
        Ok(())
    }

    /// Finds every entry whose name contains `pattern` as a substring.
    ///
    /// Returns full absolute paths in depth-first pre-order of the
    /// namespace.
    pub fn search(&mut self, pattern: &str) -> Result<Vec<String>> {
        self.require_mounted()?;
        let mut matches = Vec::new();
        self.search_directory(self.superblock.root_inode_index, "/", pattern, &mut matches)?;
        Ok(matches)
    }

    fn search_directory(
        &mut self,
        directory_inode_index: i32,
        prefix: &str,
        pattern: &str,
        matches: &mut Vec<String>,
    ) -> Result<()> {
        let inode = self.inode(directory_inode_index)?;
        let entries = self.read_directory_entries(inode)?;
        for entry in entries.iter().filter(|e| !e.is_free()) {
            let name = entry.name();
            let entry_path = path::join_child(prefix, &name);
            if name.contains(pattern) {
                matches.push(entry_path.clone());
            }
            if self.is_directory_inode(entry.inode_index) {
                self.search_directory(entry.inode_index, &entry_path, pattern, matches)?;
            }
        }
        Ok(())
    }

    // Path resolution

    /// Resolves an absolute path to an inode index.
    fn resolve_path(&mut self, path: &str) -> Result<i32> {
        let components = path::split_path(path);
        self.walk(path, &components)
    }

    /// Splits `path` into its resolved parent directory and leaf name.
    fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(i32, &'p str)> {
        let mut components = path::split_path(path);
        let leaf = components
            .pop()
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        let parent = self.walk(path, &components)?;
        Ok((parent, leaf))
    }

    /// Walks `components` down from the root directory.
    fn walk(&mut self, full_path: &str, components: &[&str]) -> Result<i32> {
        let mut current = self.superblock.root_inode_index;
        for component in components {
            if self.inode(current)?.kind != InodeKind::Directory {
                return Err(FsError::NotADirectory(full_path.to_string()));
            }
            current = self
                .find_directory_entry(current, component)?
                .ok_or_else(|| FsError::NotFound(full_path.to_string()))?;
        }
        Ok(current)
    }

    // Directory layer

    /// Looks up `name` in the given directory.
    fn find_directory_entry(
        &mut self,
        directory_inode_index: i32,
        name: &str,
    ) -> Result<Option<i32>> {
        let inode = self.inode(directory_inode_index)?;
        let entries = self.read_directory_entries(inode)?;
        Ok(entries
            .into_iter()
            .find(|e| !e.is_free() && e.name_matches(name))
            .map(|e| e.inode_index))
    }

    /// Installs `(inode_index, name)` into the first free slot of the
    /// directory and bumps its entry count.
    ///
    /// The caller must have checked name uniqueness beforehand.
    fn add_directory_entry(
        &mut self,
        directory_inode_index: i32,
        inode_index: i32,
        name: &str,
    ) -> Result<()> {
        let dir = self.inode(directory_inode_index)?;
        if dir.kind != InodeKind::Directory {
            return Err(FsError::NotADirectory(format!(
                "inode {directory_inode_index}"
            )));
        }
        let mut buf = self.block_buffer();
        self.disk.read_block(dir.index_block, &mut buf)?;
        let mut entries = layout::read_directory_block(&buf)?;

        let slot = entries
            .iter()
            .position(|e| e.is_free())
            .ok_or_else(|| FsError::DirectoryFull(name.to_string()))?;
        entries[slot] = DirectoryEntry::new(inode_index, name);
        layout::write_directory_block(&entries, &mut buf)?;
        self.disk.write_block(dir.index_block, &buf)?;

        self.inode_table[directory_inode_index as usize].size += 1;
        self.write_inode_table_to_disk()?;
        Ok(())
    }

    /// Reads the entry slots of a directory's block.
    fn read_directory_entries(&mut self, inode: Inode) -> Result<Vec<DirectoryEntry>> {
        let mut buf = self.block_buffer();
        self.disk.read_block(inode.index_block, &mut buf)?;
        Ok(layout::read_directory_block(&buf)?)
    }

    // Creation

    fn create_node(&mut self, path: &str, kind: InodeKind) -> Result<()> {
        self.require_mounted()?;
        let (parent, leaf) = self.resolve_parent(path)?;
        if self.inode(parent)?.kind != InodeKind::Directory {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        if self.find_directory_entry(parent, leaf)?.is_some() {
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        let inode_index = self.allocate_inode()?;
        let metadata_block = self.allocate_block()?;

        // The metadata block is on disk before anything points at it.
        let buf = match kind {
            InodeKind::File => self.empty_index_block()?,
            InodeKind::Directory => self.empty_directory_block()?,
            InodeKind::Unused => unreachable!("nodes are created as files or directories"),
        };
        self.disk.write_block(metadata_block, &buf)?;

        self.inode_table[inode_index as usize] = Inode {
            kind,
            index_block: metadata_block,
            size: 0,
        };
        self.write_inode_table_to_disk()?;

        self.add_directory_entry(parent, inode_index, leaf)?;
        debug!(
            "created {} {path} (inode {inode_index}, metadata block {metadata_block})",
            match kind {
                InodeKind::Directory => "directory",
                _ => "file",
            },
        );
        Ok(())
    }

    /// Encodes a block-sized buffer holding an index block with every
    /// slot unallocated.
    fn empty_index_block(&self) -> Result<Vec<u8>> {
        let mut buf = self.block_buffer();
        let slots = vec![NO_BLOCK; layout::index_entries_per_block(self.disk.block_size())];
        layout::write_index_block(&slots, &mut buf)?;
        Ok(buf)
    }

    /// Encodes a block-sized buffer holding a directory block with
    /// every entry slot free.
    fn empty_directory_block(&self) -> Result<Vec<u8>> {
        let mut buf = self.block_buffer();
        let slots =
            vec![DirectoryEntry::default(); layout::directory_slots_per_block(self.disk.block_size())];
        layout::write_directory_block(&slots, &mut buf)?;
        Ok(buf)
    }

    // Allocation

    /// Grabs the lowest free block and persists the bitmap.
    fn allocate_block(&mut self) -> Result<i32> {
        let block = self.free_bitmap.find_free().ok_or(FsError::OutOfSpace)?;
        self.free_bitmap.mark_used(block);
        self.write_free_bitmap_to_disk()?;
        debug!("allocated block {block}");
        Ok(block)
    }

    /// Returns the lowest unused inode slot.
    ///
    /// The slot transitions out of `Unused` when the caller stores the
    /// new inode and persists the table.
    fn allocate_inode(&mut self) -> Result<i32> {
        self.inode_table
            .iter()
            .position(|inode| inode.kind == InodeKind::Unused)
            .map(|index| index as i32)
            .ok_or(FsError::OutOfInodes)
    }

    /// Builds the bitmap of a fresh volume: everything free except the
    /// superblock, the metadata regions and the root directory block.
    fn initial_bitmap(&self, layout: &Layout) -> FreeBitmap {
        let byte_len = layout.free_bitmap_blocks as usize * self.disk.block_size() as usize;
        let mut bitmap = FreeBitmap::all_free(self.disk.total_blocks(), byte_len);
        bitmap.mark_used(0);
        for block in layout.inode_table_start..layout.inode_table_start + layout.inode_table_blocks
        {
            bitmap.mark_used(block);
        }
        for block in layout.free_bitmap_start..layout.free_bitmap_start + layout.free_bitmap_blocks
        {
            bitmap.mark_used(block);
        }
        bitmap.mark_used(layout.data_region_start);
        bitmap
    }

    // Metadata persistence

    fn write_superblock_to_disk(&mut self) -> Result<()> {
        let mut buf = self.block_buffer();
        self.superblock.write_to(&mut buf)?;
        self.disk.write_block(0, &buf)?;
        Ok(())
    }

    fn read_superblock_from_disk(&mut self) -> Result<()> {
        let mut buf = self.block_buffer();
        self.disk.read_block(0, &mut buf)?;
        let superblock = Superblock::read_from(&buf)?;
        if superblock.magic != SUPERBLOCK_MAGIC {
            return Err(FsError::InvalidMagic);
        }
        self.superblock = superblock;
        Ok(())
    }

    fn write_inode_table_to_disk(&mut self) -> Result<()> {
        let start = self.superblock.inode_table_start;
        let blocks = self.superblock.inode_table_blocks;
        let block_size = self.superblock.block_size as usize;

        let mut buf = vec![0u8; blocks as usize * block_size];
        for (i, inode) in self.inode_table.iter().enumerate() {
            inode.write_to(&mut buf[i * Inode::DISK_SIZE..])?;
        }
        for i in 0..blocks {
            self.disk
                .write_block(start + i, &buf[i as usize * block_size..][..block_size])?;
        }
        Ok(())
    }

    fn read_inode_table_from_disk(&mut self) -> Result<()> {
        let start = self.superblock.inode_table_start;
        let blocks = self.superblock.inode_table_blocks;
        let block_size = self.superblock.block_size as usize;

        let mut buf = vec![0u8; blocks as usize * block_size];
        for i in 0..blocks {
            self.disk
                .read_block(start + i, &mut buf[i as usize * block_size..][..block_size])?;
        }
        self.inode_table = (0..self.max_inodes as usize)
            .map(|i| Inode::read_from(&buf[i * Inode::DISK_SIZE..]))
            .collect::<io::Result<_>>()?;
        Ok(())
    }

    fn write_free_bitmap_to_disk(&mut self) -> Result<()> {
        let start = self.superblock.free_bitmap_start;
        let blocks = self.superblock.free_bitmap_blocks;
        let block_size = self.superblock.block_size as usize;

        let Self {
            disk, free_bitmap, ..
        } = self;
        for i in 0..blocks {
            let chunk = &free_bitmap.as_bytes()[i as usize * block_size..][..block_size];
            disk.write_block(start + i, chunk)?;
        }
        Ok(())
    }

    fn read_free_bitmap_from_disk(&mut self) -> Result<()> {
        let start = self.superblock.free_bitmap_start;
        let blocks = self.superblock.free_bitmap_blocks;
        let block_size = self.superblock.block_size as usize;

        let mut bytes = vec![0u8; blocks as usize * block_size];
        for i in 0..blocks {
            self.disk
                .read_block(start + i, &mut bytes[i as usize * block_size..][..block_size])?;
        }
        self.free_bitmap = FreeBitmap::from_bytes(self.superblock.total_blocks, bytes);
        Ok(())
    }

    // Helpers

    fn require_mounted(&self) -> Result<()> {
        if self.mounted {
            Ok(())
        } else {
            Err(FsError::NotMounted)
        }
    }

    /// Returns a zeroed, block-sized buffer.
    fn block_buffer(&self) -> Vec<u8> {
        vec![0u8; self.disk.block_size() as usize]
    }

    /// Fetches the inode at `index`, validating the index against the
    /// table. An out-of-range index can only come from a corrupted
    /// image.
    fn inode(&self, index: i32) -> Result<Inode> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.inode_table.get(i).copied())
            .ok_or_else(|| {
                FsError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("inode index {index} out of range"),
                ))
            })
    }

    /// Looks up the inode behind an in-use descriptor.
    fn open_inode(&self, fd: Fd) -> Result<i32> {
        self.open_files
            .get(fd)
            .filter(|f| f.in_use)
            .map(|f| f.inode_index)
            .ok_or(FsError::InvalidFd(fd))
    }
}
