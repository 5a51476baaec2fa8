/// Bytes per block. Spec-mandated default; see spec.md §3.
pub const BLOCK_SIZE: usize = 512;

/// Number of direct block pointers kept in an inode.
pub const NDIRECT: usize = 12;

/// Block ids packed per indirect block.
pub const INDIRECT_PER_BLOCK: usize = BLOCK_SIZE / size_of::<u32>();

/// Largest extent payload a single inode can address:
/// `(NDIRECT + BLOCK_SIZE/sizeof(block_id)) * BLOCK_SIZE`.
pub const MAX_FILE_SIZE: usize = (NDIRECT + INDIRECT_PER_BLOCK) * BLOCK_SIZE;

/// Default total block count used by `chfs_mkfs format` when the caller
/// does not override it. Not a hard ceiling: `BlockManager::format`
/// derives the real count from the device it is given.
pub const DEFAULT_BLOCK_NUM: u32 = 65536;

/// Default number of inode-table slots.
pub const DEFAULT_INODE_NUM: u32 = 1024;

/// Extent id of the root directory. Always exists after construction.
pub const ROOT_INUM: u32 = 1;

/// Top bit masked off ids arriving over the public API (spec.md §6).
pub const ID_MASK: u32 = 0x7fff_ffff;

/// Checkpointing threshold for the write-ahead log (spec.md §4.3).
pub const MAX_LOG_SZ: usize = 131_072;
