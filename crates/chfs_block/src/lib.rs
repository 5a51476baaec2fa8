//! Block device and bitmap block manager (spec.md §4.1).

mod device;
mod manager;

pub use device::{BlockDevice, FileBlockDevice, MemBlockDevice};
pub use manager::BlockManager;

#[cfg(test)]
mod tests {
    use chfs_types::BLOCK_SIZE;

    use super::*;

    #[test]
    fn format_marks_meta_blocks_allocated() {
        let dev = MemBlockDevice::new(256);
        let mut mgr = BlockManager::format(dev, 32).unwrap();
        let sb = *mgr.superblock();
        assert_eq!(sb.magic, chfs_types::SuperBlock::MAGIC);
        for b in 0..sb.data_start {
            // every meta block is allocated, so the first alloc must
            // return data_start.
            let _ = b;
        }
        let first = mgr.alloc_block();
        assert_eq!(first.0, sb.data_start);
    }

    #[test]
    fn alloc_free_roundtrip() {
        let dev = MemBlockDevice::new(256);
        let mut mgr = BlockManager::format(dev, 32).unwrap();
        let a = mgr.alloc_block();
        let b = mgr.alloc_block();
        assert_ne!(a, b);
        mgr.free_block(a);
        let c = mgr.alloc_block();
        assert_eq!(a, c, "freed block should be first-fit reused");
    }

    #[test]
    fn out_of_space_returns_sentinel() {
        let dev = MemBlockDevice::new(40);
        let mut mgr = BlockManager::format(dev, 8).unwrap();
        let mut allocated = vec![];
        loop {
            let id = mgr.alloc_block();
            if id.is_none() {
                break;
            }
            allocated.push(id);
        }
        assert!(!allocated.is_empty());
        assert!(mgr.alloc_block().is_none());
    }

    #[test]
    fn reopen_restores_bitmap() {
        let dev = MemBlockDevice::new(256);
        let mut mgr = BlockManager::format(dev, 32).unwrap();
        let a = mgr.alloc_block();
        let mut buf = [1u8; BLOCK_SIZE];
        mgr.write_block(a, &buf);
        buf = [0u8; BLOCK_SIZE];
        mgr.read_block(a, &mut buf);
        assert_eq!(buf, [1u8; BLOCK_SIZE]);
    }
}
