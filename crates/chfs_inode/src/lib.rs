//! Inode manager: extent payload <-> blocks (spec.md §4.2).
//!
//! Grounded in the teacher's `kernel/src/fs/inode/content.rs`
//! (direct/indirect block indexing) and `kernel/src/fs/data_block.rs`
//! (alloc/free through the block manager), flattened from the
//! teacher's cached, reference-counted `LockedTxInode` into plain
//! read-modify-write calls: this layer has no internal concurrency of
//! its own (spec.md §4.2 says so explicitly), so there is nothing to
//! cache or lock here.

use std::time::{SystemTime, UNIX_EPOCH};

use chfs_block::{BlockDevice, BlockManager};
use chfs_types::{Attr, BlockId, ExtentType, IndirectBlock, Inode, Inum, BLOCK_SIZE, NDIRECT};
use dataview::PodMethods as _;

const INODE_PER_BLOCK: usize = BLOCK_SIZE / size_of::<Inode>();

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Maps `extent_id -> inode -> data bytes`.
pub struct InodeManager<D: BlockDevice> {
    blocks: BlockManager<D>,
    /// Rotating cursor used to spread allocations across the table.
    next_inum: u32,
}

impl<D: BlockDevice> InodeManager<D> {
    #[must_use]
    pub fn new(blocks: BlockManager<D>) -> Self {
        Self {
            blocks,
            next_inum: 1,
        }
    }

    #[must_use]
    pub fn block_manager(&self) -> &BlockManager<D> {
        &self.blocks
    }

    pub fn block_manager_mut(&mut self) -> &mut BlockManager<D> {
        &mut self.blocks
    }

    fn usable_inodes(&self) -> u32 {
        // Slot 0 is never allocated: `type == 0` doubles as the "free"
        // sentinel, so an inode numbered 0 would be indistinguishable
        // from an empty slot.
        self.blocks.superblock().ninodes.saturating_sub(1)
    }

    /// `None` when `inum` falls outside the table this device actually
    /// formatted -- a caller-supplied id (e.g. over the extent RPC
    /// surface) is not trusted to be in range. Mirrors the explicit
    /// bounds check `original_source/inode_manager.cc` does before
    /// indexing its inode table.
    fn inode_block_and_offset(&self, inum: Inum) -> Option<(BlockId, usize)> {
        let idx = inum.as_index();
        // Slot 0 is reserved (never allocated); valid inums run
        // 1..=usable_inodes().
        if idx == 0 || idx > self.usable_inodes() as usize {
            return None;
        }
        let sb = self.blocks.superblock();
        let block = sb.inode_start + (idx / INODE_PER_BLOCK) as u32;
        let offset = (idx % INODE_PER_BLOCK) * size_of::<Inode>();
        Some((BlockId(block), offset))
    }

    fn read_inode_raw(&self, inum: Inum) -> Option<Inode> {
        let (block, offset) = self.inode_block_and_offset(inum)?;
        let mut buf = [0u8; BLOCK_SIZE];
        self.blocks.read_block(block, &mut buf);
        Some(*buf.as_data_view().get(offset))
    }

    /// No-op when `inum` is out of range: there is no slot to write.
    fn write_inode_raw(&self, inum: Inum, inode: &Inode) -> bool {
        let Some((block, offset)) = self.inode_block_and_offset(inum) else {
            return false;
        };
        let mut buf = [0u8; BLOCK_SIZE];
        self.blocks.read_block(block, &mut buf);
        *buf.as_data_view_mut().get_mut(offset) = *inode;
        self.blocks.write_block(block, &buf);
        true
    }

    /// Walks up to `INODE_NUM` slots starting at `next_inum`; the
    /// first free slot found is initialized and returned. On a
    /// freshly formatted device the very first call must return
    /// inode 1 (the root) -- enforced by the caller's assertion, not
    /// here (spec.md §9 "Unused root inode assertion").
    pub fn alloc_inode(&mut self, ty: ExtentType) -> Option<Inum> {
        let usable = self.usable_inodes();
        if usable == 0 {
            return None;
        }
        for step in 0..usable {
            let candidate = 1 + (self.next_inum - 1 + step) % usable;
            let inum = Inum(candidate);
            if self.read_inode_raw(inum).is_some_and(|i| i.is_free()) {
                let mut inode = Inode::free_slot();
                inode.ty = ty;
                let now = now_secs();
                inode.atime = now;
                inode.mtime = now;
                inode.ctime = now;
                self.write_inode_raw(inum, &inode);
                self.next_inum = (candidate % usable) + 1;
                return Some(inum);
            }
        }
        None
    }

    /// Sets `type = 0` and writes the slot back. Does not free data
    /// blocks -- that is `remove_file`'s job.
    pub fn free_inode(&mut self, inum: Inum) {
        self.write_inode_raw(inum, &Inode::free_slot());
    }

    /// Installs a fresh inode of type `ty` at an exact `inum`,
    /// bypassing the free-slot scan. Used by recovery replay, where
    /// the id to recreate is dictated by a log record rather than
    /// chosen by the allocator.
    pub fn install_inode(&mut self, inum: Inum, ty: ExtentType) {
        let mut inode = Inode::free_slot();
        inode.ty = ty;
        let now = now_secs();
        inode.atime = now;
        inode.mtime = now;
        inode.ctime = now;
        self.write_inode_raw(inum, &inode);
    }

    #[must_use]
    pub fn get_inode(&self, inum: Inum) -> Option<Inode> {
        let inode = self.read_inode_raw(inum)?;
        if inode.is_free() {
            None
        } else {
            Some(inode)
        }
    }

    pub fn put_inode(&self, inum: Inum, inode: &Inode) {
        self.write_inode_raw(inum, inode);
    }

    #[must_use]
    pub fn get_attr(&self, inum: Inum) -> Attr {
        match self.get_inode(inum) {
            Some(inode) => Attr::from(&inode),
            None => Attr::default(),
        }
    }

    /// Returns the `n`th block id of `inode`, allocating it (and, if
    /// needed, the indirect block) when absent.
    fn alloc_nth_block(&mut self, inode: &mut Inode, n: usize) -> Option<BlockId> {
        if n < NDIRECT {
            let existing = inode.block(n);
            if !existing.is_none() {
                return Some(existing);
            }
            let bn = self.blocks.alloc_block();
            if bn.is_none() {
                return None;
            }
            inode.set_block(n, bn);
            return Some(bn);
        }

        let i = n - NDIRECT;
        let ind_bn = if inode.block(NDIRECT).is_none() {
            let bn = self.blocks.alloc_block();
            if bn.is_none() {
                return None;
            }
            inode.set_block(NDIRECT, bn);
            let zeroed = IndirectBlock::zeroed();
            let mut buf = [0u8; BLOCK_SIZE];
            *buf.as_data_view_mut().get_mut(0) = zeroed;
            self.blocks.write_block(bn, &buf);
            bn
        } else {
            inode.block(NDIRECT)
        };

        let mut buf = [0u8; BLOCK_SIZE];
        self.blocks.read_block(ind_bn, &mut buf);
        let ind: IndirectBlock = *buf.as_data_view().get(0);
        let existing = ind.get(i);
        if !existing.is_none() {
            return Some(existing);
        }

        let bn = self.blocks.alloc_block();
        if bn.is_none() {
            return None;
        }
        let mut ind = ind;
        ind.set(i, bn);
        *buf.as_data_view_mut().get_mut(0) = ind;
        self.blocks.write_block(ind_bn, &buf);
        Some(bn)
    }

    /// Returns the `n`th block id of `inode`, or `BlockId::NONE` if it
    /// has never been allocated.
    fn get_nth_blockid(&self, inode: &Inode, n: usize) -> BlockId {
        if n < NDIRECT {
            return inode.block(n);
        }
        let ind_bn = inode.block(NDIRECT);
        if ind_bn.is_none() {
            return BlockId::NONE;
        }
        let mut buf = [0u8; BLOCK_SIZE];
        self.blocks.read_block(ind_bn, &mut buf);
        let ind: IndirectBlock = *buf.as_data_view().get(0);
        ind.get(n - NDIRECT)
    }

    /// Returns exactly `inode.size` bytes.
    #[must_use]
    pub fn read_file(&self, inum: Inum) -> Vec<u8> {
        let Some(inode) = self.get_inode(inum) else {
            return Vec::new();
        };
        let size = inode.size as usize;
        let mut out = Vec::with_capacity(size);
        let mut buf = [0u8; BLOCK_SIZE];
        let mut remaining = size;
        let mut n = 0;
        while remaining > 0 {
            let bn = self.get_nth_blockid(&inode, n);
            let take = remaining.min(BLOCK_SIZE);
            if bn.is_none() {
                out.resize(out.len() + take, 0);
            } else {
                self.blocks.read_block(bn, &mut buf);
                out.extend_from_slice(&buf[..take]);
            }
            remaining -= take;
            n += 1;
        }
        out
    }

    /// Overwrites the extent's content with `bytes`, growing or
    /// shrinking the block allocation as needed. Returns `false`
    /// without touching the inode if `bytes` exceeds the addressable
    /// capacity (`chfs_types::MAX_FILE_SIZE`), or leaving allocation
    /// partially updated if the device runs out of space mid-write.
    pub fn write_file(&mut self, inum: Inum, bytes: &[u8]) -> bool {
        if bytes.len() > chfs_types::MAX_FILE_SIZE {
            return false;
        }
        let Some(mut inode) = self.get_inode(inum) else {
            return false;
        };

        let old_blocks = inode.block_count();
        inode.size = bytes.len() as u32;
        let new_blocks = inode.block_count();

        if new_blocks < old_blocks {
            self.free_tail_blocks(&mut inode, new_blocks, old_blocks);
        }

        let mut buf = [0u8; BLOCK_SIZE];
        let mut off = 0;
        let mut n = 0;
        while off < bytes.len() {
            let Some(bn) = self.alloc_nth_block(&mut inode, n) else {
                // Out of space partway through: persist what we have
                // and report failure.
                let now = now_secs();
                inode.mtime = now;
                inode.ctime = now;
                self.write_inode_raw(inum, &inode);
                return false;
            };
            let take = (bytes.len() - off).min(BLOCK_SIZE);
            if take < BLOCK_SIZE {
                self.blocks.read_block(bn, &mut buf);
            }
            buf[..take].copy_from_slice(&bytes[off..off + take]);
            if take < BLOCK_SIZE {
                buf[take..].fill(0);
            }
            self.blocks.write_block(bn, &buf);
            off += take;
            n += 1;
        }

        let now = now_secs();
        inode.atime = now;
        inode.mtime = now;
        inode.ctime = now;
        self.write_inode_raw(inum, &inode);
        true
    }

    fn free_tail_blocks(&mut self, inode: &mut Inode, new_blocks: usize, old_blocks: usize) {
        for n in new_blocks..old_blocks {
            if n < NDIRECT {
                let bn = inode.block(n);
                self.blocks.free_block(bn);
                inode.set_block(n, BlockId::NONE);
            } else {
                let i = n - NDIRECT;
                let ind_bn = inode.block(NDIRECT);
                if ind_bn.is_none() {
                    continue;
                }
                let mut buf = [0u8; BLOCK_SIZE];
                self.blocks.read_block(ind_bn, &mut buf);
                let mut ind: IndirectBlock = *buf.as_data_view().get(0);
                let bn = ind.get(i);
                self.blocks.free_block(bn);
                ind.set(i, BlockId::NONE);
                *buf.as_data_view_mut().get_mut(0) = ind;
                self.blocks.write_block(ind_bn, &buf);
            }
        }
        if new_blocks <= NDIRECT && old_blocks > NDIRECT {
            let ind_bn = inode.block(NDIRECT);
            if !ind_bn.is_none() {
                self.blocks.free_block(ind_bn);
                inode.set_block(NDIRECT, BlockId::NONE);
            }
        }
    }

    /// Frees all data blocks, then the indirect block if used, then
    /// the inode itself.
    pub fn remove_file(&mut self, inum: Inum) {
        let Some(mut inode) = self.get_inode(inum) else {
            return;
        };
        let old_blocks = inode.block_count();
        self.free_tail_blocks(&mut inode, 0, old_blocks);
        self.free_inode(inum);
    }
}

#[cfg(test)]
mod tests {
    use chfs_block::MemBlockDevice;
    use chfs_types::T_FILE;

    use super::*;

    fn new_manager(blocks: u32, inodes: u32) -> InodeManager<MemBlockDevice> {
        let dev = MemBlockDevice::new(blocks);
        let mgr = BlockManager::format(dev, inodes).unwrap();
        InodeManager::new(mgr)
    }

    #[test]
    fn first_alloc_is_inode_one() {
        let mut im = new_manager(512, 64);
        let root = im.alloc_inode(T_FILE).unwrap();
        assert_eq!(root, Inum(1));
    }

    #[test]
    fn put_get_roundtrip_small() {
        let mut im = new_manager(512, 64);
        let id = im.alloc_inode(T_FILE).unwrap();
        assert!(im.write_file(id, b"hello"));
        assert_eq!(im.read_file(id), b"hello");
        assert_eq!(im.get_attr(id).size, 5);
    }

    #[test]
    fn write_spanning_indirect_blocks() {
        let mut im = new_manager(8192, 64);
        let id = im.alloc_inode(T_FILE).unwrap();
        let payload = vec![0xABu8; chfs_types::MAX_FILE_SIZE];
        assert!(im.write_file(id, &payload));
        assert_eq!(im.read_file(id), payload);
    }

    #[test]
    fn shrink_then_grow_frees_and_reallocates() {
        let mut im = new_manager(8192, 64);
        let id = im.alloc_inode(T_FILE).unwrap();
        let big = vec![1u8; 20 * chfs_types::BLOCK_SIZE];
        assert!(im.write_file(id, &big));
        assert!(im.write_file(id, b"tiny"));
        assert_eq!(im.read_file(id), b"tiny");
        // growing back out should succeed (blocks were actually freed)
        assert!(im.write_file(id, &big));
        assert_eq!(im.read_file(id), big);
    }

    #[test]
    fn out_of_range_inum_reads_as_absent_instead_of_panicking() {
        let mut im = new_manager(512, 64);
        let _ = im.alloc_inode(T_FILE).unwrap();
        let bogus = Inum(1_000_000);
        assert!(im.get_inode(bogus).is_none());
        assert_eq!(im.get_attr(bogus), chfs_types::Attr::default());
        assert_eq!(im.read_file(bogus), Vec::<u8>::new());
        assert!(!im.write_file(bogus, b"x"));
        // Must not disturb real slots.
        im.remove_file(bogus);
        assert!(im.get_inode(Inum(1)).is_some());
    }

    #[test]
    fn remove_frees_blocks_and_getattr_reads_zero() {
        let mut im = new_manager(8192, 64);
        let id = im.alloc_inode(T_FILE).unwrap();
        assert!(im.write_file(id, &vec![1u8; 20 * chfs_types::BLOCK_SIZE]));
        im.remove_file(id);
        assert_eq!(im.get_attr(id), chfs_types::Attr::default());
        assert!(im.get_inode(id).is_none());
    }

    #[test]
    fn alloc_ids_not_currently_allocated() {
        let mut im = new_manager(512, 64);
        let a = im.alloc_inode(T_FILE).unwrap();
        let b = im.alloc_inode(T_FILE).unwrap();
        assert_ne!(a, b);
    }

    /// All block ids currently reachable from `id`'s direct pointers
    /// and indirect block, if any.
    fn owned_blocks(im: &InodeManager<MemBlockDevice>, id: Inum) -> std::collections::HashSet<u32> {
        let inode = im.get_inode(id).unwrap();
        (0..inode.block_count())
            .map(|n| im.get_nth_blockid(&inode, n).0)
            .collect()
    }

    // P1: no two live inodes ever claim the same block.
    #[test]
    fn p1_live_inodes_have_disjoint_blocks() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut im = new_manager(4096, 32);
        let mut rng = StdRng::seed_from_u64(1);
        let mut live: Vec<Inum> = Vec::new();

        for _ in 0..200 {
            match rng.gen_range(0..3) {
                0 => {
                    if let Some(id) = im.alloc_inode(T_FILE) {
                        live.push(id);
                    }
                }
                1 if !live.is_empty() => {
                    let idx = rng.gen_range(0..live.len());
                    let id = live[idx];
                    let len = rng.gen_range(0..4000);
                    im.write_file(id, &vec![0xCDu8; len]);
                }
                2 if !live.is_empty() => {
                    let idx = rng.gen_range(0..live.len());
                    let id = live.remove(idx);
                    im.remove_file(id);
                }
                _ => {}
            }

            let mut seen = std::collections::HashSet::new();
            for &id in &live {
                for bn in owned_blocks(&im, id) {
                    assert!(seen.insert(bn), "block {bn} owned by two live inodes");
                }
            }
        }
    }

    // P2: no write ever produces a file larger than the layout's
    // addressable capacity, `(NDIRECT + BLOCK_SIZE/4) * BLOCK_SIZE`.
    #[test]
    fn p2_size_never_exceeds_addressable_capacity() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut im = new_manager(8192, 8);
        let id = im.alloc_inode(T_FILE).unwrap();
        let mut rng = StdRng::seed_from_u64(2);

        for _ in 0..50 {
            let len = rng.gen_range(0..chfs_types::MAX_FILE_SIZE + chfs_types::BLOCK_SIZE);
            let ok = im.write_file(id, &vec![0xEFu8; len]);
            let attr = im.get_attr(id);
            assert!(attr.size as usize <= chfs_types::MAX_FILE_SIZE);
            if len > chfs_types::MAX_FILE_SIZE {
                assert!(!ok, "write beyond addressable capacity must fail");
            }
        }
    }

}
