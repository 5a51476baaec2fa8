//! Bitmap allocator over a [`BlockDevice`], plus device formatting.
//!
//! Grounded in the teacher's `kernel/src/fs/data_block.rs`
//! (`alloc`/`free` scanning a bitmap block-by-block) and
//! `kernel/src/fs/mod.rs`'s superblock layout math, adapted to a
//! single in-memory bitmap mirror per spec.md §9's "Allocator scan
//! cost" design note instead of re-reading bitmap blocks from disk on
//! every scan.

use chfs_types::{BlockId, Error, Result, SuperBlock, BLOCK_SIZE};
use dataview::PodMethods as _;
use log::warn;

use crate::device::BlockDevice;

/// Owns a [`BlockDevice`] plus the in-memory mirror of the free-block
/// bitmap. Not internally thread-safe; callers (the inode manager,
/// ultimately the extent service) hold the coarse service lock
/// (spec.md §4.1).
pub struct BlockManager<D: BlockDevice> {
    device: D,
    sb: SuperBlock,
    /// One bit per block; `true` == allocated. Seeded from the
    /// on-disk bitmap at construction, written back to disk on every
    /// `alloc_block`/`free_block` so the two stay consistent.
    bitmap: Vec<bool>,
}

impl<D: BlockDevice> BlockManager<D> {
    /// Formats `device` into
    /// `{superblock | free-block bitmap | inode table | data blocks}`
    /// and returns a manager over the freshly formatted layout.
    pub fn format(device: D, ninodes: u32) -> Result<Self> {
        let total_blocks = device.block_count();
        let inode_per_block = (BLOCK_SIZE / size_of::<chfs_types::Inode>()) as u32;
        let inode_blocks = ninodes.div_ceil(inode_per_block);
        let bitmap_blocks = total_blocks.div_ceil((BLOCK_SIZE * 8) as u32);

        let bitmap_start = 1;
        let inode_start = bitmap_start + bitmap_blocks;
        let data_start = inode_start + inode_blocks;
        assert!(
            data_start < total_blocks,
            "device too small for {ninodes} inodes over {total_blocks} blocks"
        );

        let sb = SuperBlock {
            magic: SuperBlock::MAGIC,
            total_bytes: u64::from(total_blocks) * BLOCK_SIZE as u64,
            nblocks: total_blocks,
            ninodes,
            bitmap_start,
            bitmap_blocks,
            inode_start,
            inode_blocks,
            data_start,
        };

        let mut mgr = Self {
            device,
            sb,
            bitmap: vec![false; total_blocks as usize],
        };

        // Permanently mark {superblock, bitmap, inode table} allocated
        // (spec.md §3: "bits for {superblock, bitmap itself, inode
        // table} are permanently marked allocated").
        for b in 0..data_start {
            mgr.bitmap[b as usize] = true;
        }

        mgr.write_superblock();
        mgr.zero_inode_table();
        mgr.flush_bitmap();
        Ok(mgr)
    }

    /// Opens a manager over an already-formatted device, reading the
    /// superblock and bitmap back into memory.
    pub fn open(device: D) -> Result<Self> {
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(SuperBlock::BLOCK_NO, &mut buf);
        let sb: SuperBlock = *buf.as_data_view().get(0);
        if sb.magic != SuperBlock::MAGIC {
            return Err(Error::CorruptLog(format!(
                "bad superblock magic {:#x}",
                sb.magic
            )));
        }

        let mut mgr = Self {
            device,
            sb,
            bitmap: vec![false; sb.nblocks as usize],
        };
        mgr.load_bitmap();
        Ok(mgr)
    }

    #[must_use]
    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn read_block(&self, id: BlockId, out: &mut [u8; BLOCK_SIZE]) {
        self.device.read_block(id, out);
    }

    pub fn write_block(&self, id: BlockId, buf: &[u8; BLOCK_SIZE]) {
        self.device.write_block(id, buf);
    }

    /// Linear first-fit scan starting at the first data block.
    /// Returns `BlockId(0)` (the sentinel) and logs on exhaustion.
    pub fn alloc_block(&mut self) -> BlockId {
        let start = self.sb.data_start as usize;
        let Some(idx) = (start..self.bitmap.len()).find(|&i| !self.bitmap[i]) else {
            warn!("chfs_block: out of blocks ({} total)", self.bitmap.len());
            return BlockId::NONE;
        };
        self.bitmap[idx] = true;
        self.flush_bitmap_bit(idx);
        let zero = [0u8; BLOCK_SIZE];
        let id = BlockId(idx as u32);
        self.device.write_block(id, &zero);
        id
    }

    /// Clears the bit for `id`. Idempotent; no double-free detection
    /// (spec.md §4.1).
    pub fn free_block(&mut self, id: BlockId) {
        if id.is_none() {
            return;
        }
        let idx = id.as_index();
        self.bitmap[idx] = false;
        self.flush_bitmap_bit(idx);
    }

    fn write_superblock(&self) {
        let mut buf = [0u8; BLOCK_SIZE];
        *buf.as_data_view_mut().get_mut(0) = self.sb;
        self.device.write_block(SuperBlock::BLOCK_NO, &buf);
    }

    fn zero_inode_table(&self) {
        let zero = [0u8; BLOCK_SIZE];
        for b in 0..self.sb.inode_blocks {
            self.device
                .write_block(BlockId(self.sb.inode_start + b), &zero);
        }
    }

    fn flush_bitmap(&self) {
        for block in 0..self.sb.bitmap_blocks {
            self.write_bitmap_block(block);
        }
    }

    fn flush_bitmap_bit(&self, bit_index: usize) {
        let block = bit_index / (BLOCK_SIZE * 8);
        self.write_bitmap_block(block as u32);
    }

    fn write_bitmap_block(&self, block: u32) {
        let mut buf = [0u8; BLOCK_SIZE];
        let base = block as usize * BLOCK_SIZE * 8;
        for i in 0..BLOCK_SIZE * 8 {
            let bit = base + i;
            if bit >= self.bitmap.len() {
                break;
            }
            if self.bitmap[bit] {
                buf[i / 8] |= 1 << (i % 8);
            }
        }
        self.device
            .write_block(BlockId(self.sb.bitmap_start + block), &buf);
    }

    fn load_bitmap(&mut self) {
        for block in 0..self.sb.bitmap_blocks {
            let mut buf = [0u8; BLOCK_SIZE];
            self.device
                .read_block(BlockId(self.sb.bitmap_start + block), &mut buf);
            let base = block as usize * BLOCK_SIZE * 8;
            for i in 0..BLOCK_SIZE * 8 {
                let bit = base + i;
                if bit >= self.bitmap.len() {
                    break;
                }
                self.bitmap[bit] = buf[i / 8] & (1 << (i % 8)) != 0;
            }
        }
    }
}
