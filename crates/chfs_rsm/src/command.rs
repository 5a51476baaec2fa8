//! Command wire encoding (spec.md §4.5).
//!
//! Two forms of the same five fields: a hand-rolled little-endian raw
//! layout for on-disk/snapshot use, and a `serde`-derived marshalled
//! form for "the consensus RPC" spec.md calls for.

use chfs_types::ExtentType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdType {
    None,
    Crt,
    Put,
    Get,
    Geta,
    Rmv,
    /// Opens an explicit transaction spanning the `Crt`/`Put`/`Rmv`
    /// commands that follow it carrying the same `tx_id`, until a
    /// matching `Commit` (spec.md §4.3's client-owned transaction
    /// bracketing, carried over the replicated command log).
    Begin,
    /// Closes the transaction named by `tx_id`.
    Commit,
}

impl CmdType {
    fn to_u32(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Crt => 1,
            Self::Put => 2,
            Self::Get => 3,
            Self::Geta => 4,
            Self::Rmv => 5,
            Self::Begin => 6,
            Self::Commit => 7,
        }
    }

    fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Crt),
            2 => Some(Self::Put),
            3 => Some(Self::Get),
            4 => Some(Self::Geta),
            5 => Some(Self::Rmv),
            6 => Some(Self::Begin),
            7 => Some(Self::Commit),
            _ => None,
        }
    }
}

/// The raw fields of a command, with no attached result handle --
/// this is what actually goes over the wire/into a snapshot.
///
/// `tx_id` is `0` when the command runs as its own one-operation
/// transaction; a nonzero value (always returned by a prior `Begin`)
/// groups it under that caller-managed transaction instead. Transaction
/// ids are assigned starting at 1 (spec.md §4.4), so `0` is never a
/// real one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandData {
    pub cmd_tp: CmdType,
    pub ty: ExtentType,
    pub id: u64,
    pub tx_id: u64,
    pub buf: Vec<u8>,
}

impl CommandData {
    #[must_use]
    pub fn size(&self) -> usize {
        4 + 4 + 8 + 8 + 8 + self.buf.len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.cmd_tp.to_u32().to_le_bytes());
        out.extend_from_slice(&self.ty.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.tx_id.to_le_bytes());
        out.extend_from_slice(&(self.buf.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.buf);
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        self.encode_into(&mut out);
        out
    }

    #[must_use]
    pub fn decode(input: &[u8]) -> Option<Self> {
        if input.len() < 32 {
            return None;
        }
        let cmd_tp = CmdType::from_u32(u32::from_le_bytes(input[0..4].try_into().ok()?))?;
        let ty = u32::from_le_bytes(input[4..8].try_into().ok()?);
        let id = u64::from_le_bytes(input[8..16].try_into().ok()?);
        let tx_id = u64::from_le_bytes(input[16..24].try_into().ok()?);
        let buf_len = u64::from_le_bytes(input[24..32].try_into().ok()?) as usize;
        let buf = input.get(32..32 + buf_len)?.to_vec();
        Some(Self {
            cmd_tp,
            ty,
            id,
            tx_id,
            buf,
        })
    }

    #[must_use]
    pub fn to_marshalled(&self) -> MarshalledCommand {
        MarshalledCommand {
            cmd_tp: self.cmd_tp.to_u32(),
            ty: self.ty,
            id: self.id,
            tx_id: self.tx_id,
            buf: self.buf.clone(),
        }
    }

    #[must_use]
    pub fn from_marshalled(m: &MarshalledCommand) -> Option<Self> {
        Some(Self {
            cmd_tp: CmdType::from_u32(m.cmd_tp)?,
            ty: m.ty,
            id: m.id,
            tx_id: m.tx_id,
            buf: m.buf.clone(),
        })
    }
}

/// The equivalent marshalled form spec.md §4.5 calls for, for the
/// consensus append-entries RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarshalledCommand {
    pub cmd_tp: u32,
    #[serde(rename = "type")]
    pub ty: u32,
    pub id: u64,
    pub tx_id: u64,
    pub buf: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_roundtrip() {
        let cmd = CommandData {
            cmd_tp: CmdType::Put,
            ty: 0,
            id: 42,
            tx_id: 7,
            buf: b"payload".to_vec(),
        };
        let encoded = cmd.encode();
        assert_eq!(encoded.len(), cmd.size());
        assert_eq!(CommandData::decode(&encoded).unwrap(), cmd);
    }

    #[test]
    fn marshalled_roundtrip() {
        let cmd = CommandData {
            cmd_tp: CmdType::Crt,
            ty: 2,
            id: 0,
            tx_id: 0,
            buf: Vec::new(),
        };
        let m = cmd.to_marshalled();
        let json = serde_json_like(&m);
        let _ = json;
        assert_eq!(CommandData::from_marshalled(&m).unwrap(), cmd);
    }

    // A stand-in to exercise `to_marshalled`/`from_marshalled` without
    // pulling in `serde_json` as a dependency just for this test.
    fn serde_json_like(m: &MarshalledCommand) -> String {
        format!("{m:?}")
    }
}
