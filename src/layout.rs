//! On-disk record definitions and layout arithmetic.
//!
//! Every record has an explicit little-endian serialized form; block
//! buffers are never reinterpreted in place. Block numbers and inode
//! indices are signed 32-bit integers where `-1` means "none".

use crate::util::ceil_division;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::borrow::Cow;
use std::io;
use std::io::Cursor;
use std::io::Read;
use std::io::Write;

/// Magic number identifying an imgfs superblock, stored little-endian
/// at byte 0 of block 0.
pub const SUPERBLOCK_MAGIC: u32 = u32::from_le_bytes(*b"IMGF");

/// Sentinel block number meaning "no block".
pub const NO_BLOCK: i32 = -1;
/// Sentinel inode index meaning "no entry".
pub const NO_INODE: i32 = -1;

/// The inode index of the root directory.
pub const ROOT_INODE_INDEX: i32 = 0;

/// Size of a directory entry's name field in bytes, including the
/// terminating NUL.
pub const NAME_FIELD_LEN: usize = 56;
/// Maximum length of an entry name in bytes. Longer names are silently
/// truncated on insertion.
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;

/// The superblock, serialized at block 0 of the image.
///
/// Everything needed to locate the other regions is recorded here so a
/// mount only has to trust the geometry it was opened with.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Superblock {
    /// Filesystem magic; must equal [`SUPERBLOCK_MAGIC`].
    pub magic: u32,
    /// Total number of blocks in the image.
    pub total_blocks: i32,
    /// Size of a block in bytes.
    pub block_size: i32,
    /// First block of the inode table.
    pub inode_table_start: i32,
    /// Number of blocks the inode table occupies.
    pub inode_table_blocks: i32,
    /// First block of the free bitmap.
    pub free_bitmap_start: i32,
    /// Number of blocks the free bitmap occupies.
    pub free_bitmap_blocks: i32,
    /// First block of the data region.
    pub data_region_start: i32,
    /// Inode index of the root directory (always 0).
    pub root_inode_index: i32,
    /// Random identifier stamped at format time.
    pub volume_id: [u8; 16],
}

impl Superblock {
    /// Serialized size in bytes.
    pub const DISK_SIZE: usize = 9 * 4 + 16;

    /// Serializes the superblock at the beginning of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut cursor = Cursor::new(buf);
        cursor.write_u32::<LittleEndian>(self.magic)?;
        cursor.write_i32::<LittleEndian>(self.total_blocks)?;
        cursor.write_i32::<LittleEndian>(self.block_size)?;
        cursor.write_i32::<LittleEndian>(self.inode_table_start)?;
        cursor.write_i32::<LittleEndian>(self.inode_table_blocks)?;
        cursor.write_i32::<LittleEndian>(self.free_bitmap_start)?;
        cursor.write_i32::<LittleEndian>(self.free_bitmap_blocks)?;
        cursor.write_i32::<LittleEndian>(self.data_region_start)?;
        cursor.write_i32::<LittleEndian>(self.root_inode_index)?;
        cursor.write_all(&self.volume_id)
    }

    /// Deserializes a superblock from the beginning of `buf`.
    ///
    /// The magic is read back as-is; the caller decides whether a
    /// mismatch is an error.
    pub fn read_from(buf: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(buf);
        let magic = cursor.read_u32::<LittleEndian>()?;
        let total_blocks = cursor.read_i32::<LittleEndian>()?;
        let block_size = cursor.read_i32::<LittleEndian>()?;
        let inode_table_start = cursor.read_i32::<LittleEndian>()?;
        let inode_table_blocks = cursor.read_i32::<LittleEndian>()?;
        let free_bitmap_start = cursor.read_i32::<LittleEndian>()?;
        let free_bitmap_blocks = cursor.read_i32::<LittleEndian>()?;
        let data_region_start = cursor.read_i32::<LittleEndian>()?;
        let root_inode_index = cursor.read_i32::<LittleEndian>()?;
        let mut volume_id = [0u8; 16];
        cursor.read_exact(&mut volume_id)?;
        Ok(Self {
            magic,
            total_blocks,
            block_size,
            inode_table_start,
            inode_table_blocks,
            free_bitmap_start,
            free_bitmap_blocks,
            data_region_start,
            root_inode_index,
            volume_id,
        })
    }
}

/// What an inode slot currently describes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InodeKind {
    /// The slot is available for allocation.
    #[default]
    Unused,
    /// A regular file.
    File,
    /// A directory.
    Directory,
}

impl InodeKind {
    fn to_disk(self) -> i32 {
        match self {
            Self::Unused => 0,
            Self::File => 1,
            Self::Directory => 2,
        }
    }

    fn from_disk(raw: i32) -> io::Result<Self> {
        match raw {
            0 => Ok(Self::Unused),
            1 => Ok(Self::File),
            2 => Ok(Self::Directory),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid inode kind {raw}"),
            )),
        }
    }
}

/// Metadata record for one namespace object.
///
/// The records live packed in the inode table region and are addressed
/// by index; names live in directory entries, not here.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Inode {
    /// What this slot describes.
    pub kind: InodeKind,
    /// Block number of the inode's single metadata block: the entry
    /// slots for a directory, the index block for a file. Meaningless
    /// while the slot is unused.
    pub index_block: i32,
    /// Used entry count for a directory, payload byte length for a
    /// file.
    pub size: i32,
}

impl Inode {
    /// Serialized size in bytes.
    pub const DISK_SIZE: usize = 12;

    /// Serializes the inode at the beginning of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut cursor = Cursor::new(buf);
        cursor.write_i32::<LittleEndian>(self.kind.to_disk())?;
        cursor.write_i32::<LittleEndian>(self.index_block)?;
        cursor.write_i32::<LittleEndian>(self.size)
    }

    /// Deserializes an inode from the beginning of `buf`.
    pub fn read_from(buf: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(buf);
        let kind = InodeKind::from_disk(cursor.read_i32::<LittleEndian>()?)?;
        let index_block = cursor.read_i32::<LittleEndian>()?;
        let size = cursor.read_i32::<LittleEndian>()?;
        Ok(Self {
            kind,
            index_block,
            size,
        })
    }
}

/// One slot of a directory block: an inode index bound to a NUL-padded
/// name, or an empty slot when the index is [`NO_INODE`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DirectoryEntry {
    /// The inode the name binds to, or [`NO_INODE`] for a free slot.
    pub inode_index: i32,
    /// The entry name, NUL-padded to the field size.
    pub name: [u8; NAME_FIELD_LEN],
}

impl Default for DirectoryEntry {
    fn default() -> Self {
        Self {
            inode_index: NO_INODE,
            name: [0; NAME_FIELD_LEN],
        }
    }
}

impl DirectoryEntry {
    /// Serialized size in bytes.
    pub const DISK_SIZE: usize = 4 + NAME_FIELD_LEN;

    /// Builds an entry binding `name` to `inode_index`, truncating the
    /// name at [`MAX_NAME_LEN`] bytes.
    pub fn new(inode_index: i32, name: &str) -> Self {
        let mut field = [0u8; NAME_FIELD_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME_LEN);
        field[..len].copy_from_slice(&bytes[..len]);
        Self {
            inode_index,
            name: field,
        }
    }

    /// Tells whether this slot is empty.
    pub fn is_free(&self) -> bool {
        self.inode_index == NO_INODE
    }

    /// Compares `name` against the stored name, byte-exact over the
    /// whole field. The probe is truncated the same way insertion
    /// truncates, so trailing NULs compare equal.
    pub fn name_matches(&self, name: &str) -> bool {
        self.name == Self::new(NO_INODE, name).name
    }

    /// Returns the stored name up to the first NUL byte.
    pub fn name(&self) -> Cow<'_, str> {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end])
    }

    /// Serializes the entry at the beginning of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) -> io::Result<()> {
        let mut cursor = Cursor::new(buf);
        cursor.write_i32::<LittleEndian>(self.inode_index)?;
        cursor.write_all(&self.name)
    }

    /// Deserializes an entry from the beginning of `buf`.
    pub fn read_from(buf: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(buf);
        let inode_index = cursor.read_i32::<LittleEndian>()?;
        let mut name = [0u8; NAME_FIELD_LEN];
        cursor.read_exact(&mut name)?;
        Ok(Self { inode_index, name })
    }
}

/// Number of entry slots in a directory block.
pub fn directory_slots_per_block(block_size: i32) -> usize {
    block_size as usize / DirectoryEntry::DISK_SIZE
}

/// Number of data-block slots in a file's index block.
pub fn index_entries_per_block(block_size: i32) -> usize {
    block_size as usize / 4
}

/// Decodes a directory block into its entry slots, free ones included.
pub fn read_directory_block(buf: &[u8]) -> io::Result<Vec<DirectoryEntry>> {
    (0..buf.len() / DirectoryEntry::DISK_SIZE)
        .map(|i| DirectoryEntry::read_from(&buf[i * DirectoryEntry::DISK_SIZE..]))
        .collect()
}

/// Encodes directory entry slots into `buf`, zeroing the slack after
/// the last slot.
pub fn write_directory_block(entries: &[DirectoryEntry], buf: &mut [u8]) -> io::Result<()> {
    buf.fill(0);
    for (i, entry) in entries.iter().enumerate() {
        entry.write_to(&mut buf[i * DirectoryEntry::DISK_SIZE..])?;
    }
    Ok(())
}

/// Decodes a file index block into its data-block slots.
pub fn read_index_block(buf: &[u8]) -> io::Result<Vec<i32>> {
    let mut cursor = Cursor::new(buf);
    (0..buf.len() / 4)
        .map(|_| cursor.read_i32::<LittleEndian>())
        .collect()
}

/// Encodes data-block slots into `buf`.
pub fn write_index_block(slots: &[i32], buf: &mut [u8]) -> io::Result<()> {
    let mut cursor = Cursor::new(buf);
    for slot in slots {
        cursor.write_i32::<LittleEndian>(*slot)?;
    }
    Ok(())
}

/// Where each on-disk region lives, derived from the disk geometry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Layout {
    /// First block of the inode table; block 0 is the superblock.
    pub inode_table_start: i32,
    /// Number of blocks holding the inode table.
    pub inode_table_blocks: i32,
    /// First block of the free bitmap.
    pub free_bitmap_start: i32,
    /// Number of blocks holding the free bitmap.
    pub free_bitmap_blocks: i32,
    /// First block of the data region.
    pub data_region_start: i32,
}

impl Layout {
    /// Computes the region layout for the given geometry.
    pub fn compute(total_blocks: i32, block_size: i32, max_inodes: i32) -> Self {
        let inode_table_start = 1;
        let inode_table_blocks = ceil_division(
            max_inodes as u64 * Inode::DISK_SIZE as u64,
            block_size as u64,
        ) as i32;
        let free_bitmap_start = inode_table_start + inode_table_blocks;
        let free_bitmap_blocks =
            ceil_division(total_blocks as u64, block_size as u64 * 8) as i32;
        let data_region_start = free_bitmap_start + free_bitmap_blocks;
        Self {
            inode_table_start,
            inode_table_blocks,
            free_bitmap_start,
            free_bitmap_blocks,
            data_region_start,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn superblock_round_trip() {
        let superblock = Superblock {
            magic: SUPERBLOCK_MAGIC,
            total_blocks: 1024,
            block_size: 512,
            inode_table_start: 1,
            inode_table_blocks: 3,
            free_bitmap_start: 4,
            free_bitmap_blocks: 1,
            data_region_start: 5,
            root_inode_index: ROOT_INODE_INDEX,
            volume_id: *b"0123456789abcdef",
        };

        let mut buf = vec![0u8; 512];
        superblock.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..4], b"IMGF");
        assert_eq!(Superblock::read_from(&buf).unwrap(), superblock);
    }

    #[test]
    fn inode_round_trip() {
        let inode = Inode {
            kind: InodeKind::File,
            index_block: 17,
            size: 3000,
        };

        let mut buf = vec![0u8; Inode::DISK_SIZE];
        inode.write_to(&mut buf).unwrap();
        assert_eq!(Inode::read_from(&buf).unwrap(), inode);

        // A zeroed record is an unused inode.
        assert_eq!(
            Inode::read_from(&[0u8; Inode::DISK_SIZE]).unwrap().kind,
            InodeKind::Unused
        );
        assert!(Inode::read_from(&[9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn directory_entry_round_trip() {
        let entry = DirectoryEntry::new(42, "cat.txt");

        let mut buf = vec![0u8; DirectoryEntry::DISK_SIZE];
        entry.write_to(&mut buf).unwrap();
        let back = DirectoryEntry::read_from(&buf).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.name(), "cat.txt");
        assert!(!back.is_free());
        assert!(DirectoryEntry::default().is_free());
    }

    #[test]
    fn directory_entry_truncates_name() {
        let long = "x".repeat(80);
        let entry = DirectoryEntry::new(1, &long);

        assert_eq!(entry.name().len(), MAX_NAME_LEN);
        // Lookup with the untruncated name still matches.
        assert!(entry.name_matches(&long));
        assert!(!entry.name_matches("x"));
    }

    #[test]
    fn name_match_ignores_padding() {
        let entry = DirectoryEntry::new(3, "a");
        assert!(entry.name_matches("a"));
        assert!(!entry.name_matches("ab"));
        assert!(!entry.name_matches(""));
    }

    #[test]
    fn directory_block_codec() {
        let mut entries = vec![DirectoryEntry::default(); directory_slots_per_block(512)];
        assert_eq!(entries.len(), 8);
        entries[0] = DirectoryEntry::new(1, "a");
        entries[3] = DirectoryEntry::new(2, "b");

        let mut buf = vec![0u8; 512];
        write_directory_block(&entries, &mut buf).unwrap();
        assert_eq!(read_directory_block(&buf).unwrap(), entries);
    }

    #[test]
    fn index_block_codec() {
        let mut slots = vec![NO_BLOCK; index_entries_per_block(512)];
        assert_eq!(slots.len(), 128);
        slots[0] = 5;
        slots[1] = 9;

        let mut buf = vec![0u8; 512];
        write_index_block(&slots, &mut buf).unwrap();
        assert_eq!(read_index_block(&buf).unwrap(), slots);
    }

    #[test]
    fn layout_for_default_geometry() {
        let layout = Layout::compute(1024, 512, 128);
        assert_eq!(layout.inode_table_start, 1);
        // 128 inodes * 12 bytes = 1536 bytes = 3 blocks.
        assert_eq!(layout.inode_table_blocks, 3);
        assert_eq!(layout.free_bitmap_start, 4);
        // 1024 blocks need 128 bitmap bytes, fitting one block.
        assert_eq!(layout.free_bitmap_blocks, 1);
        assert_eq!(layout.data_region_start, 5);
    }
}
