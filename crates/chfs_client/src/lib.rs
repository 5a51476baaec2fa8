//! Filesystem client: POSIX-like operations over an [`ExtentStore`]
//! (spec.md §4.6).
//!
//! Each operation here is a short script against the extent service,
//! bracketed by an advisory per-id lock (spec.md §4.7) so the
//! non-replicated direct-RPC deployment gets the same external
//! serialization the replicated deployment gets for free from
//! `apply_log`'s single linearization point.

pub mod dirent;
mod lock;

pub use chfs_extent::ExtentStore;
pub use lock::{LocalLockService, LockService};

use chfs_types::{Error, ExtentType, Result, T_DIR, T_FILE, T_SYMLINK};
use lock::LockGuard;

pub struct FsClient<S: ExtentStore, L: LockService = LocalLockService> {
    extent: S,
    locks: L,
}

impl<S: ExtentStore> FsClient<S, LocalLockService> {
    pub fn new(extent: S) -> Self {
        Self {
            extent,
            locks: LocalLockService::new(),
        }
    }
}

impl<S: ExtentStore, L: LockService> FsClient<S, L> {
    pub fn with_locks(extent: S, locks: L) -> Self {
        Self { extent, locks }
    }

    #[must_use]
    pub fn extent_store(&self) -> &S {
        &self.extent
    }

    pub fn lookup(&self, parent: u64, name: &str) -> Result<Option<u64>> {
        let _guard = LockGuard::new(&self.locks, parent);
        let payload = self.extent.get(parent)?;
        Ok(dirent::parse(&payload)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| id))
    }

    fn create_entry(
        &self,
        parent: u64,
        name: &str,
        ty: ExtentType,
        content: Option<&[u8]>,
    ) -> Result<u64> {
        if !dirent::validate_name(name) {
            return Err(Error::InvalidName);
        }
        let _guard = LockGuard::new(&self.locks, parent);
        let mut payload = self.extent.get(parent)?;
        if dirent::parse(&payload).iter().any(|(n, _)| n == name) {
            return Err(Error::Exist);
        }
        let tx_id = self.extent.begin_tx()?;
        let id = self.extent.create(ty, Some(tx_id))?;
        if let Some(c) = content {
            self.extent.put(id, c, Some(tx_id))?;
        }
        dirent::append_entry(&mut payload, name, id);
        self.extent.put(parent, &payload, Some(tx_id))?;
        self.extent.commit_tx(tx_id)?;
        Ok(id)
    }

    /// `mode` is accepted for interface symmetry with POSIX `create`
    /// but unused -- permission bits are out of scope (spec.md §1
    /// Non-goals: "access control").
    pub fn create(&self, parent: u64, name: &str, _mode: u32) -> Result<u64> {
        self.create_entry(parent, name, T_FILE, None)
    }

    pub fn mkdir(&self, parent: u64, name: &str) -> Result<u64> {
        self.create_entry(parent, name, T_DIR, None)
    }

    pub fn symlink(&self, parent: u64, name: &str, link: &[u8]) -> Result<u64> {
        self.create_entry(parent, name, T_SYMLINK, Some(link))
    }

    pub fn read(&self, ino: u64, size: usize, off: usize) -> Result<Vec<u8>> {
        let _guard = LockGuard::new(&self.locks, ino);
        let content = self.extent.get(ino)?;
        if off > content.len() {
            return Ok(Vec::new());
        }
        let end = (off + size).min(content.len());
        Ok(content[off..end].to_vec())
    }

    /// Grows the extent (zero-filling the gap between its old end and
    /// `off`) when `off + size` exceeds the current length, then
    /// overwrites `[off, off + size)` with `data`. Returns `size`.
    pub fn write(&self, ino: u64, size: usize, off: usize, data: &[u8]) -> Result<usize> {
        let _guard = LockGuard::new(&self.locks, ino);
        let mut content = self.extent.get(ino)?;
        let end = off + size;
        if end > content.len() {
            content.resize(end, 0);
        }
        let n = size.min(data.len());
        content[off..off + n].copy_from_slice(&data[..n]);
        if n < size {
            content[off + n..end].fill(0);
        }
        self.extent.put(ino, &content, None)?;
        Ok(size)
    }

    pub fn setattr(&self, ino: u64, new_size: usize) -> Result<()> {
        let _guard = LockGuard::new(&self.locks, ino);
        let mut content = self.extent.get(ino)?;
        content.resize(new_size, 0);
        self.extent.put(ino, &content, None)
    }

    pub fn unlink(&self, parent: u64, name: &str) -> Result<()> {
        let _guard = LockGuard::new(&self.locks, parent);
        let payload = self.extent.get(parent)?;
        let inum = dirent::parse(&payload)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| id)
            .ok_or(Error::NotFound)?;
        let tx_id = self.extent.begin_tx()?;
        self.extent.remove(inum, Some(tx_id))?;
        let updated = dirent::remove_entry(&payload, name).unwrap_or(payload);
        self.extent.put(parent, &updated, Some(tx_id))?;
        self.extent.commit_tx(tx_id)
    }

    pub fn readdir(&self, dir: u64) -> Result<Vec<(String, u64)>> {
        let _guard = LockGuard::new(&self.locks, dir);
        let payload = self.extent.get(dir)?;
        Ok(dirent::parse(&payload))
    }

    pub fn readlink(&self, ino: u64) -> Result<Vec<u8>> {
        let _guard = LockGuard::new(&self.locks, ino);
        self.extent.get(ino)
    }

    /// Ignores `getattr` failures per spec.md §9 -- moot in this
    /// implementation since `getattr` has no error path (spec.md
    /// §4.3: a free or missing id just reads back a zeroed `Attr`).
    #[must_use]
    pub fn isfile(&self, ino: u64) -> bool {
        self.extent.getattr(ino).ty == T_FILE
    }

    #[must_use]
    pub fn isdir(&self, ino: u64) -> bool {
        self.extent.getattr(ino).ty == T_DIR
    }
}

#[cfg(test)]
mod tests {
    use chfs_block::{BlockManager, MemBlockDevice};
    use chfs_extent::ExtentService;
    use chfs_inode::InodeManager;

    use super::*;

    fn new_client() -> FsClient<ExtentService<MemBlockDevice>> {
        let dir = tempfile::tempdir().unwrap().into_path();
        let dev = MemBlockDevice::new(8192);
        let mgr = BlockManager::format(dev, 256).unwrap();
        let inodes = InodeManager::new(mgr);
        let extent = ExtentService::open(inodes, dir).unwrap();
        FsClient::new(extent)
    }

    #[test]
    fn create_then_lookup_then_duplicate_fails() {
        let client = new_client();
        let id = client.create(1, "a", 0o644).unwrap();
        assert_eq!(client.lookup(1, "a").unwrap(), Some(id));
        assert!(matches!(client.create(1, "a", 0o644), Err(Error::Exist)));
    }

    #[test]
    fn write_past_end_zero_fills_gap() {
        let client = new_client();
        let id = client.create(1, "f", 0o644).unwrap();
        client.write(id, 5, 0, b"hello").unwrap();
        client.write(id, 5, 10, b"world").unwrap();
        assert_eq!(client.read(id, 100, 0).unwrap(), b"hello\0\0\0\0\0world");
    }

    #[test]
    fn unlink_removes_entry_and_frees_extent() {
        let client = new_client();
        let id = client.create(1, "a", 0).unwrap();
        client.unlink(1, "a").unwrap();
        assert_eq!(client.lookup(1, "a").unwrap(), None);
        assert!(matches!(client.read(id, 10, 0), Err(Error::NotFound)));
    }

    #[test]
    fn reject_names_with_reserved_characters() {
        let client = new_client();
        assert!(matches!(
            client.create(1, "a:b", 0),
            Err(Error::InvalidName)
        ));
        assert!(matches!(
            client.create(1, "a/b", 0),
            Err(Error::InvalidName)
        ));
    }

    // P5: readdir(mkdir -> create a, create b, unlink a) == [b], and
    // creation order is preserved among survivors.
    #[test]
    fn p5_readdir_after_partial_unlink_preserves_order() {
        let client = new_client();
        let dir = client.mkdir(1, "sub").unwrap();
        client.create(dir, "a", 0).unwrap();
        client.create(dir, "b", 0).unwrap();
        client.unlink(dir, "a").unwrap();

        let names: Vec<String> = client
            .readdir(dir)
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["b".to_string()]);
    }
}
