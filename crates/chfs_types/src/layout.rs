//! On-disk record layouts.
//!
//! Every record here is a packed, `dataview::Pod` struct so it can be
//! cast directly onto a block's byte buffer, the way the teacher's
//! `ov6_fs_types` casts `SuperBlock`/`Inode`/`LogHeader` onto raw
//! `[u8; BLOCK_SIZE]` buffers instead of hand-rolling a byte-by-byte
//! (de)serializer for the filesystem metadata.

use std::fmt;

use dataview::Pod;

use crate::consts::{BLOCK_SIZE, NDIRECT};

/// Block number on the simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Pod)]
#[repr(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const NONE: Self = Self(0);

    #[must_use]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inode number == extent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Pod)]
#[repr(transparent)]
pub struct Inum(pub u32);

impl Inum {
    pub const ROOT: Self = Self(crate::consts::ROOT_INUM);

    #[must_use]
    pub fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Masks off the high bit of an id arriving over the public API
    /// (spec.md §6: "receivers mask with 0x7fffffff before use").
    #[must_use]
    pub fn from_public(id: u64) -> Self {
        Self((id as u32) & crate::consts::ID_MASK)
    }
}

impl fmt::Display for Inum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Extent type. `0` means "inode slot is free" (invariant I1).
pub type ExtentType = u32;
pub const T_FREE: ExtentType = 0;
pub const T_FILE: ExtentType = 1;
pub const T_DIR: ExtentType = 2;
pub const T_SYMLINK: ExtentType = 3;

/// Superblock, stored at block 0. Immutable after format.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub struct SuperBlock {
    pub total_bytes: u64,
    pub magic: u32,
    pub nblocks: u32,
    pub ninodes: u32,
    pub bitmap_start: u32,
    pub bitmap_blocks: u32,
    pub inode_start: u32,
    pub inode_blocks: u32,
    pub data_start: u32,
}

impl SuperBlock {
    pub const MAGIC: u32 = 0x4348_4653; // "CHFS"
    pub const BLOCK_NO: BlockId = BlockId(0);
}

/// Fixed-size on-disk inode record.
///
/// Fields beyond the addressing vector are padded out so that
/// `BLOCK_SIZE` is an exact multiple of `size_of::<Inode>()`
/// (`INODE_PER_BLOCK`, computed in `chfs_block`).
#[derive(Debug, Clone, Copy, Pod)]
#[repr(C)]
pub struct Inode {
    pub ty: ExtentType,
    pub size: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    /// `[0..NDIRECT)` are direct data blocks; `[NDIRECT]` is the
    /// indirect block.
    pub blocks: [u32; NDIRECT + 1],
    _reserved: [u8; Inode::PAD],
}

impl Inode {
    const RAW_LEN: usize = 4 + 4 + 8 + 8 + 8 + (NDIRECT + 1) * 4;
    const PAD: usize = 128 - Self::RAW_LEN;

    /// A zeroed, free inode record (`type == 0`, invariant I1).
    #[must_use]
    pub fn free_slot() -> Self {
        Self {
            ty: T_FREE,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            blocks: [0; NDIRECT + 1],
            _reserved: [0; Self::PAD],
        }
    }

    #[must_use]
    pub fn is_free(&self) -> bool {
        self.ty == T_FREE
    }

    #[must_use]
    pub fn block(&self, i: usize) -> BlockId {
        BlockId(self.blocks[i])
    }

    pub fn set_block(&mut self, i: usize, bn: BlockId) {
        self.blocks[i] = bn.0;
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        (self.size as usize).div_ceil(BLOCK_SIZE)
    }
}

const _: () = assert!(size_of::<Inode>() == 128);
const _: () = assert!(BLOCK_SIZE % size_of::<Inode>() == 0);
const _: () = assert!(size_of::<SuperBlock>() <= BLOCK_SIZE);

/// A block reused to hold an array of further block ids (indirect
/// block). `dataview`-cast directly onto a raw block buffer.
#[derive(Debug, Clone, Copy, Pod)]
#[repr(transparent)]
pub struct IndirectBlock([u32; BLOCK_SIZE / 4]);

impl IndirectBlock {
    #[must_use]
    pub fn zeroed() -> Self {
        Self([0; BLOCK_SIZE / 4])
    }

    #[must_use]
    pub fn get(&self, i: usize) -> BlockId {
        BlockId(self.0[i])
    }

    pub fn set(&mut self, i: usize, bn: BlockId) {
        self.0[i] = bn.0;
    }
}

/// Attribute record returned by `getattr`. Zeroed if the extent is free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attr {
    pub ty: ExtentType,
    pub size: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl From<&Inode> for Attr {
    fn from(ino: &Inode) -> Self {
        Self {
            ty: ino.ty,
            size: ino.size,
            atime: ino.atime,
            mtime: ino.mtime,
            ctime: ino.ctime,
        }
    }
}
