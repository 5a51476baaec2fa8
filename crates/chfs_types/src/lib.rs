//! Shared constants, on-disk layout, and error types for `chfs`.

mod consts;
mod error;
mod layout;

pub use consts::{
    BLOCK_SIZE, DEFAULT_BLOCK_NUM, DEFAULT_INODE_NUM, ID_MASK, INDIRECT_PER_BLOCK, MAX_FILE_SIZE,
    MAX_LOG_SZ, NDIRECT, ROOT_INUM,
};
pub use error::{Error, Result};
pub use layout::{
    Attr, BlockId, ExtentType, IndirectBlock, Inode, Inum, SuperBlock, T_DIR, T_FILE, T_FREE,
    T_SYMLINK,
};
