//! On-disk log record encoding (spec.md §3 "Log record").
//!
//! Hand-rolled little-endian packed encoding, matching the header
//! block approach in the teacher's `kernel/src/fs/log.rs` (a fixed
//! header struct followed by body blocks) but logical rather than
//! physical: each record names the operation it re-does, not a raw
//! disk block.

const KIND_BEGIN: u32 = 0;
const KIND_COMMIT: u32 = 1;
const KIND_CREATE: u32 = 2;
const KIND_PUT: u32 = 3;
const KIND_REMOVE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Begin { tx_id: u64 },
    Commit { tx_id: u64 },
    Create { tx_id: u64, file_type: u32, inum: u64 },
    Put { tx_id: u64, inum: u64, content: Vec<u8> },
    Remove { tx_id: u64, inum: u64 },
}

impl Record {
    #[must_use]
    pub fn tx_id(&self) -> u64 {
        match *self {
            Self::Begin { tx_id }
            | Self::Commit { tx_id }
            | Self::Create { tx_id, .. }
            | Self::Put { tx_id, .. }
            | Self::Remove { tx_id, .. } => tx_id,
        }
    }

    #[must_use]
    pub fn is_mutation(&self) -> bool {
        matches!(self, Self::Create { .. } | Self::Put { .. } | Self::Remove { .. })
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Begin { tx_id } => {
                buf.extend_from_slice(&tx_id.to_le_bytes());
                buf.extend_from_slice(&KIND_BEGIN.to_le_bytes());
            }
            Self::Commit { tx_id } => {
                buf.extend_from_slice(&tx_id.to_le_bytes());
                buf.extend_from_slice(&KIND_COMMIT.to_le_bytes());
            }
            Self::Create {
                tx_id,
                file_type,
                inum,
            } => {
                buf.extend_from_slice(&tx_id.to_le_bytes());
                buf.extend_from_slice(&KIND_CREATE.to_le_bytes());
                buf.extend_from_slice(&file_type.to_le_bytes());
                buf.extend_from_slice(&inum.to_le_bytes());
            }
            Self::Put { tx_id, inum, content } => {
                buf.extend_from_slice(&tx_id.to_le_bytes());
                buf.extend_from_slice(&KIND_PUT.to_le_bytes());
                buf.extend_from_slice(&inum.to_le_bytes());
                buf.extend_from_slice(&(content.len() as u64).to_le_bytes());
                buf.extend_from_slice(content);
            }
            Self::Remove { tx_id, inum } => {
                buf.extend_from_slice(&tx_id.to_le_bytes());
                buf.extend_from_slice(&KIND_REMOVE.to_le_bytes());
                buf.extend_from_slice(&inum.to_le_bytes());
            }
        }
    }

    #[must_use]
    pub fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Decodes a single record from the front of `input`, advancing
    /// it past the bytes consumed. Returns `None` (without advancing)
    /// on a truncated or unrecognized record -- callers drop the rest
    /// of the stream, matching spec.md §7's "malformed records are
    /// dropped, not fatal".
    pub fn decode(input: &mut &[u8]) -> Option<Self> {
        let tx_id = take_u64(input)?;
        let kind = take_u32(input)?;
        match kind {
            KIND_BEGIN => Some(Self::Begin { tx_id }),
            KIND_COMMIT => Some(Self::Commit { tx_id }),
            KIND_CREATE => {
                let file_type = take_u32(input)?;
                let inum = take_u64(input)?;
                Some(Self::Create {
                    tx_id,
                    file_type,
                    inum,
                })
            }
            KIND_PUT => {
                let inum = take_u64(input)?;
                let len = take_u64(input)? as usize;
                let content = take_bytes(input, len)?.to_vec();
                Some(Self::Put {
                    tx_id,
                    inum,
                    content,
                })
            }
            KIND_REMOVE => {
                let inum = take_u64(input)?;
                Some(Self::Remove { tx_id, inum })
            }
            _ => None,
        }
    }

    /// Decodes every well-formed record in `input`, in order, dropping
    /// anything after the first malformed/truncated record.
    #[must_use]
    pub fn decode_all(mut input: &[u8]) -> Vec<Self> {
        let mut out = Vec::new();
        while !input.is_empty() {
            match Self::decode(&mut input) {
                Some(record) => out.push(record),
                None => break,
            }
        }
        out
    }
}

fn take_u64(input: &mut &[u8]) -> Option<u64> {
    let bytes = take_bytes(input, 8)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

fn take_u32(input: &mut &[u8]) -> Option<u32> {
    let bytes = take_bytes(input, 4)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn take_bytes<'a>(input: &mut &'a [u8], len: usize) -> Option<&'a [u8]> {
    if input.len() < len {
        return None;
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Some(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_kinds() {
        let records = vec![
            Record::Begin { tx_id: 1 },
            Record::Create {
                tx_id: 1,
                file_type: 2,
                inum: 5,
            },
            Record::Put {
                tx_id: 1,
                inum: 5,
                content: b"hello".to_vec(),
            },
            Record::Remove { tx_id: 1, inum: 5 },
            Record::Commit { tx_id: 1 },
        ];
        let mut buf = Vec::new();
        for r in &records {
            r.encode_into(&mut buf);
        }
        assert_eq!(Record::decode_all(&buf), records);
    }

    #[test]
    fn truncated_trailing_record_is_dropped() {
        let mut buf = Record::Begin { tx_id: 1 }.encoded();
        let full_commit = Record::Commit { tx_id: 1 }.encoded();
        buf.extend_from_slice(&full_commit[..full_commit.len() - 2]);
        let decoded = Record::decode_all(&buf);
        assert_eq!(decoded, vec![Record::Begin { tx_id: 1 }]);
    }
}
