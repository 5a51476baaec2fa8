//! Replicated state-machine wrapper (spec.md §4.5).
//!
//! `apply_log` is the single linearization point (spec.md §5): the
//! consensus module calls it, in agreed order, once per command. The
//! consensus module itself is out of scope (spec.md §1); this crate
//! only supplies the `ConsensusLog` seam and a `SingleNodeLog` stand-in
//! that applies synchronously, enough to exercise the command dispatch
//! and the client above it end to end.

mod command;

use std::{
    sync::{Arc, Condvar, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

pub use command::{CmdType, CommandData, MarshalledCommand};
use chfs_extent::ExtentStore;
use chfs_types::{Attr, Error, ExtentType, Result};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Collapsed error status carried across the command/result boundary,
/// mirroring spec.md §6/§7's `{OK, NOENT, EXIST, IOERR, RPCERR,
/// RETRY}` taxonomy. Coarser than [`chfs_types::Error`] by design: a
/// wire status enum does not carry a `CorruptLog` message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Ok,
    NoEnt,
    Exist,
    IoErr,
    RpcErr,
    Retry,
}

impl Status {
    fn from_error(e: &Error) -> Self {
        match e {
            Error::NotFound => Self::NoEnt,
            Error::Exist => Self::Exist,
            Error::Retry => Self::Retry,
            Error::Rpc => Self::RpcErr,
            Error::InvalidName
            | Error::OutOfInodes
            | Error::OutOfSpace
            | Error::CorruptLog(_)
            | Error::Io(_) => Self::IoErr,
        }
    }

    fn into_result(self) -> Result<()> {
        match self {
            Self::Ok => Ok(()),
            Self::NoEnt => Err(Error::NotFound),
            Self::Exist => Err(Error::Exist),
            Self::Retry => Err(Error::Retry),
            Self::RpcErr => Err(Error::Rpc),
            Self::IoErr => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "extent service error",
            ))),
        }
    }
}

/// Fields the applier fills in and the submitter reads back, guarded
/// by [`CommandResult`]'s mutex (spec.md §4.5/§9: "a shared result
/// object with a mutex, condition variable, and `done` flag").
#[derive(Debug, Clone, Default)]
pub struct CommandResultState {
    pub done: bool,
    pub start: u64,
    pub status: Status,
    pub id: u64,
    pub buf: Vec<u8>,
    pub attr: Attr,
}

/// Shared, reference-counted rendezvous point between the submitting
/// thread and the applier thread. Outlives both (spec.md §9:
/// "per-command shared result ownership"), hence `Arc`.
#[derive(Debug, Default)]
pub struct CommandResult {
    state: Mutex<CommandResultState>,
    cv: Condvar,
}

impl CommandResult {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling thread until the applier has set `done`,
    /// then returns a snapshot of the final state.
    #[must_use]
    pub fn wait_done(&self) -> CommandResultState {
        let mut guard = self.state.lock().unwrap();
        while !guard.done {
            guard = self.cv.wait(guard).unwrap();
        }
        guard.clone()
    }
}

/// A command plus its still-pending result handle.
#[derive(Debug)]
pub struct Command {
    pub data: CommandData,
    pub result: Arc<CommandResult>,
}

impl Command {
    #[must_use]
    pub fn new(cmd_tp: CmdType, ty: ExtentType, id: u64, tx_id: u64, buf: Vec<u8>) -> Self {
        Self {
            data: CommandData {
                cmd_tp,
                ty,
                id,
                tx_id,
                buf,
            },
            result: Arc::new(CommandResult::new()),
        }
    }
}

/// `0` on the wire means "no explicit transaction"; everything else is
/// a real id assigned by a prior `Begin`.
fn tx_id_opt(tx_id: u64) -> Option<u64> {
    (tx_id != 0).then_some(tx_id)
}

/// The out-of-scope consensus module's interface onto this state
/// machine (spec.md §6 "Consensus state-machine interface"):
/// `submit` hands a command to whatever agreement protocol is in use
/// and returns once it is either applied or known to never be.
pub trait ConsensusLog: Send + Sync {
    fn submit(&self, cmd: Arc<Command>) -> Result<()>;
}

/// Wraps an [`ExtentStore`] and dispatches commands into it in the
/// order `apply_log` is called -- the replication wrapper of spec.md
/// §4.5.
pub struct ReplicatedExtentService<S: ExtentStore> {
    extent: S,
}

impl<S: ExtentStore> ReplicatedExtentService<S> {
    pub fn new(extent: S) -> Self {
        Self { extent }
    }

    /// Applies one command to the wrapped extent service and
    /// publishes the result, waking anyone blocked in `wait_done`.
    /// Callers (a real consensus module, or [`SingleNodeLog`] here)
    /// must serialize calls to this per command stream -- this is the
    /// filesystem's linearization point (spec.md §5).
    pub fn apply_log(&self, cmd: &Command) {
        let mut state = cmd.result.state.lock().unwrap();
        state.start = now_secs();
        match cmd.data.cmd_tp {
            CmdType::None => state.status = Status::Ok,
            CmdType::Crt => match self.extent.create(cmd.data.ty, tx_id_opt(cmd.data.tx_id)) {
                Ok(id) => {
                    state.id = id;
                    state.status = Status::Ok;
                }
                Err(e) => state.status = Status::from_error(&e),
            },
            CmdType::Put => {
                match self
                    .extent
                    .put(cmd.data.id, &cmd.data.buf, tx_id_opt(cmd.data.tx_id))
                {
                    Ok(()) => state.status = Status::Ok,
                    Err(e) => state.status = Status::from_error(&e),
                }
            }
            CmdType::Get => match self.extent.get(cmd.data.id) {
                Ok(buf) => {
                    state.buf = buf;
                    state.status = Status::Ok;
                }
                Err(e) => state.status = Status::from_error(&e),
            },
            CmdType::Geta => {
                state.attr = self.extent.getattr(cmd.data.id);
                state.status = Status::Ok;
            }
            CmdType::Rmv => match self.extent.remove(cmd.data.id, tx_id_opt(cmd.data.tx_id)) {
                Ok(()) => state.status = Status::Ok,
                Err(e) => state.status = Status::from_error(&e),
            },
            CmdType::Begin => match self.extent.begin_tx() {
                Ok(tx_id) => {
                    state.id = tx_id;
                    state.status = Status::Ok;
                }
                Err(e) => state.status = Status::from_error(&e),
            },
            CmdType::Commit => match self.extent.commit_tx(cmd.data.tx_id) {
                Ok(()) => state.status = Status::Ok,
                Err(e) => state.status = Status::from_error(&e),
            },
        }
        state.done = true;
        drop(state);
        cmd.result.cv.notify_all();
    }
}

/// A single-replica stand-in for the out-of-scope consensus module:
/// there is nothing to agree on with one replica, so `submit` applies
/// synchronously on the caller's thread, under a mutex that serializes
/// concurrent submitters the way a real log would serialize appliers.
pub struct SingleNodeLog<S: ExtentStore> {
    service: Arc<ReplicatedExtentService<S>>,
    apply_lock: Mutex<()>,
}

impl<S: ExtentStore> SingleNodeLog<S> {
    #[must_use]
    pub fn new(service: Arc<ReplicatedExtentService<S>>) -> Self {
        Self {
            service,
            apply_lock: Mutex::new(()),
        }
    }
}

impl<S: ExtentStore> ConsensusLog for SingleNodeLog<S> {
    fn submit(&self, cmd: Arc<Command>) -> Result<()> {
        let _guard = self.apply_lock.lock().unwrap();
        self.service.apply_log(&cmd);
        Ok(())
    }
}

/// The client-facing side of the replicated deployment: builds a
/// command per [`ExtentStore`] call, submits it through a
/// [`ConsensusLog`], and blocks on the result's condvar -- the
/// suspension point spec.md §5 describes ("command submission blocks
/// the client thread on `result.cv` until `apply_log` sets `done`").
pub struct ReplicatedClient<L: ConsensusLog> {
    log: L,
}

impl<L: ConsensusLog> ReplicatedClient<L> {
    pub fn new(log: L) -> Self {
        Self { log }
    }

    fn submit(
        &self,
        cmd_tp: CmdType,
        ty: ExtentType,
        id: u64,
        tx_id: u64,
        buf: Vec<u8>,
    ) -> Result<CommandResultState> {
        let cmd = Arc::new(Command::new(cmd_tp, ty, id, tx_id, buf));
        self.log.submit(Arc::clone(&cmd))?;
        let state = cmd.result.wait_done();
        state.status.into_result()?;
        Ok(state)
    }
}

impl<L: ConsensusLog> ExtentStore for ReplicatedClient<L> {
    fn create(&self, ty: ExtentType, tx_id: Option<u64>) -> Result<u64> {
        self.submit(CmdType::Crt, ty, 0, tx_id.unwrap_or(0), Vec::new())
            .map(|s| s.id)
    }

    fn put(&self, id: u64, bytes: &[u8], tx_id: Option<u64>) -> Result<()> {
        self.submit(CmdType::Put, 0, id, tx_id.unwrap_or(0), bytes.to_vec())
            .map(|_| ())
    }

    fn get(&self, id: u64) -> Result<Vec<u8>> {
        self.submit(CmdType::Get, 0, id, 0, Vec::new())
            .map(|s| s.buf)
    }

    fn getattr(&self, id: u64) -> Attr {
        self.submit(CmdType::Geta, 0, id, 0, Vec::new())
            .map(|s| s.attr)
            .unwrap_or_default()
    }

    fn remove(&self, id: u64, tx_id: Option<u64>) -> Result<()> {
        self.submit(CmdType::Rmv, 0, id, tx_id.unwrap_or(0), Vec::new())
            .map(|_| ())
    }

    fn begin_tx(&self) -> Result<u64> {
        self.submit(CmdType::Begin, 0, 0, 0, Vec::new()).map(|s| s.id)
    }

    fn commit_tx(&self, tx_id: u64) -> Result<()> {
        self.submit(CmdType::Commit, 0, 0, tx_id, Vec::new())
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use chfs_block::{BlockManager, MemBlockDevice};
    use chfs_extent::ExtentService;
    use chfs_inode::InodeManager;
    use chfs_types::T_FILE;

    use super::*;

    fn new_replicated() -> SingleNodeLog<ExtentService<MemBlockDevice>> {
        // `into_path` hands ownership of the directory to the
        // persister instead of deleting it when the guard drops --
        // fine for a test process that exits right after.
        let dir = tempfile::tempdir().unwrap().into_path();
        let dev = MemBlockDevice::new(8192);
        let mgr = BlockManager::format(dev, 256).unwrap();
        let inodes = InodeManager::new(mgr);
        let extent = ExtentService::open(inodes, dir).unwrap();
        SingleNodeLog::new(Arc::new(ReplicatedExtentService::new(extent)))
    }

    #[test]
    fn apply_log_dispatches_crt_put_get() {
        let log = new_replicated();
        let client = ReplicatedClient::new(log);
        let id = client.create(T_FILE, None).unwrap();
        client.put(id, b"rsm", None).unwrap();
        assert_eq!(client.get(id).unwrap(), b"rsm");
        assert_eq!(client.getattr(id).size, 3);
        client.remove(id, None).unwrap();
        assert!(matches!(client.get(id), Err(Error::NotFound)));
    }

    #[test]
    fn get_missing_id_maps_to_not_found() {
        let log = new_replicated();
        let client = ReplicatedClient::new(log);
        assert!(matches!(client.get(999), Err(Error::NotFound)));
    }

    #[test]
    fn explicit_transaction_groups_create_and_put() {
        let log = new_replicated();
        let client = ReplicatedClient::new(log);
        let tx_id = client.begin_tx().unwrap();
        let id = client.create(T_FILE, Some(tx_id)).unwrap();
        client.put(id, b"grouped", Some(tx_id)).unwrap();
        client.commit_tx(tx_id).unwrap();
        assert_eq!(client.get(id).unwrap(), b"grouped");
    }
}
