//! Advisory per-extent lock (spec.md §4.7/§5).
//!
//! Stands in, in-process, for the out-of-scope lock RPC service of
//! spec.md §6 (`acquire`/`release`/`stat`): `LockService` is the same
//! mutual-exclusion surface, implemented here with a `Mutex` +
//! `Condvar` instead of a network round trip. Like the real lock
//! service, it serializes readers and writers identically -- this is
//! a mutex, not a reader-writer lock (spec.md §5 "Resource policy").

use std::{
    collections::HashSet,
    sync::{Condvar, Mutex},
};

pub trait LockService: Send + Sync {
    fn acquire(&self, id: u64);
    fn release(&self, id: u64);
}

#[derive(Default)]
pub struct LocalLockService {
    held: Mutex<HashSet<u64>>,
    cv: Condvar,
}

impl LocalLockService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockService for LocalLockService {
    fn acquire(&self, id: u64) {
        let mut held = self.held.lock().unwrap();
        while held.contains(&id) {
            held = self.cv.wait(held).unwrap();
        }
        held.insert(id);
    }

    fn release(&self, id: u64) {
        let mut held = self.held.lock().unwrap();
        held.remove(&id);
        self.cv.notify_all();
    }
}

/// Releases `id` on drop, so a lock taken at the top of a client
/// method is released on every return path -- including the early
/// `EXIST`/`NOENT` returns spec.md §4.7 calls out -- without every
/// method having to remember to call `release` explicitly.
pub struct LockGuard<'a, L: LockService> {
    locks: &'a L,
    id: u64,
}

impl<'a, L: LockService> LockGuard<'a, L> {
    #[must_use]
    pub fn new(locks: &'a L, id: u64) -> Self {
        locks.acquire(id);
        Self { locks, id }
    }
}

impl<L: LockService> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        self.locks.release(self.id);
    }
}
