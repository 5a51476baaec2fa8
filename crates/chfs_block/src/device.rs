//! Raw block device.
//!
//! Mirrors the teacher's `block_io::BlockDevice<const BLOCK_SIZE:
//! usize>` trait (`crates/block_io/src/lib.rs`), but over `std::fs`
//! instead of a no_std MMIO virtio queue: `read_block`/`write_block`
//! copy a whole `BLOCK_SIZE` buffer to/from a block, and are undefined
//! (panic, in this implementation) if `id` is out of range.

use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::Path,
    sync::Mutex,
};

use chfs_types::{BlockId, BLOCK_SIZE};
use fs4::fs_std::FileExt as _;

pub trait BlockDevice: Send + Sync {
    /// Total number of blocks backing this device.
    fn block_count(&self) -> u32;

    /// Copies `BLOCK_SIZE` bytes from `id` into `out`. Panics if
    /// `id >= block_count()`.
    fn read_block(&self, id: BlockId, out: &mut [u8; BLOCK_SIZE]);

    /// Copies `BLOCK_SIZE` bytes from `buf` to `id`. Panics if
    /// `id >= block_count()`.
    fn write_block(&self, id: BlockId, buf: &[u8; BLOCK_SIZE]);
}

/// In-memory block device, for tests.
pub struct MemBlockDevice {
    blocks: Mutex<Vec<[u8; BLOCK_SIZE]>>,
}

impl MemBlockDevice {
    #[must_use]
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: Mutex::new(vec![[0u8; BLOCK_SIZE]; block_count as usize]),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn block_count(&self) -> u32 {
        self.blocks.lock().unwrap().len() as u32
    }

    fn read_block(&self, id: BlockId, out: &mut [u8; BLOCK_SIZE]) {
        let blocks = self.blocks.lock().unwrap();
        out.copy_from_slice(&blocks[id.as_index()]);
    }

    fn write_block(&self, id: BlockId, buf: &[u8; BLOCK_SIZE]) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks[id.as_index()].copy_from_slice(buf);
    }
}

/// File-backed block device: `BLOCK_NUM * BLOCK_SIZE` bytes, accessed
/// at block-aligned offsets via `pread`/`pwrite` (`FileExt::read_at`/
/// `write_at`), matching spec.md §6's "simulated block device".
pub struct FileBlockDevice {
    file: File,
    block_count: u32,
}

impl FileBlockDevice {
    /// Opens (creating if absent) an image file and grows it to hold
    /// exactly `block_count` blocks. Takes an advisory exclusive lock
    /// on the file for the process lifetime, the way `fs4` is already
    /// used elsewhere in this corpus to keep a single writer per file
    /// (see `ov6_integration_tests`'s `fs4` dependency) -- two `chfs`
    /// processes must not share one image.
    pub fn open(path: impl AsRef<Path>, block_count: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.try_lock_exclusive().map_err(|e| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("block device already locked by another process: {e}"),
            )
        })?;
        let len = u64::from(block_count) * BLOCK_SIZE as u64;
        if file.metadata()?.len() != len {
            file.set_len(len)?;
        }
        Ok(Self { file, block_count })
    }

    /// Opens an already-formatted image without resizing it, deriving
    /// `block_count` from the file's current length. Used by tools
    /// that only ever read an existing device (`chfs_mkfs ls`).
    pub fn open_existing(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.try_lock_exclusive().map_err(|e| {
            io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("block device already locked by another process: {e}"),
            )
        })?;
        let len = file.metadata()?.len();
        let block_count = (len / BLOCK_SIZE as u64) as u32;
        Ok(Self { file, block_count })
    }
}

impl BlockDevice for FileBlockDevice {
    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read_block(&self, id: BlockId, out: &mut [u8; BLOCK_SIZE]) {
        assert!(id.0 < self.block_count, "block id {id} out of range");
        let offset = u64::from(id.0) * BLOCK_SIZE as u64;
        self.file
            .read_exact_at(out, offset)
            .unwrap_or_else(|e| panic!("read_block({id}) failed: {e}"));
    }

    fn write_block(&self, id: BlockId, buf: &[u8; BLOCK_SIZE]) {
        assert!(id.0 < self.block_count, "block id {id} out of range");
        let offset = u64::from(id.0) * BLOCK_SIZE as u64;
        self.file
            .write_all_at(buf, offset)
            .unwrap_or_else(|e| panic!("write_block({id}) failed: {e}"));
    }
}

impl Drop for FileBlockDevice {
    fn drop(&mut self) {
        let _ = fs4::fs_std::FileExt::unlock(&self.file);
    }
}
