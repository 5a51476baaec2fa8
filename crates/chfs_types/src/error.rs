use std::io;

/// Error taxonomy shared by every layer above the block/inode tier.
///
/// The inode and block managers never return this type directly; they
/// return sentinels (a zero block id, `None`) and it is the extent
/// service's job to lift those into [`Error::NotFound`] /
/// [`Error::OutOfSpace`] / [`Error::OutOfInodes`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no such extent")]
    NotFound,
    #[error("name already exists in directory")]
    Exist,
    #[error("invalid name: must not contain ':' or '/'")]
    InvalidName,
    #[error("out of inodes")]
    OutOfInodes,
    #[error("out of disk space")]
    OutOfSpace,
    #[error("rpc transport error")]
    Rpc,
    #[error("transient consensus state, retry")]
    Retry,
    #[error("log is corrupt: {0}")]
    CorruptLog(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
