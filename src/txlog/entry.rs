use crate::extent::{FileType, InodeId};
use bytes::{Buf, BufMut, Bytes};
use std::convert::TryFrom;
use std::io;

pub type TxId = u64;

const TAG_BEGIN: u8 = 1;
const TAG_COMMIT: u8 = 2;
const TAG_CREATE: u8 = 3;
const TAG_PUT: u8 = 4;
const TAG_REMOVE: u8 = 5;

// len prefix, then txid and tag.
const LEN_PREFIX: usize = 4;
const HEADER: usize = 8 + 1;

#[derive(Debug, thiserror::Error)]
pub enum TxLogError {
    #[error("I/O failure on transaction log")]
    Io(#[from] io::Error),
    #[error("Record at byte {offset} is cut short")]
    Torn { offset: usize },
    #[error("Record at byte {offset} is malformed: {reason}")]
    Corrupt { offset: usize, reason: String },
    #[error("Corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),
}

/// One mutation (or transaction bracket) with the before-image needed to undo it.
#[derive(Clone, Debug, PartialEq)]
pub enum TxOp {
    Begin,
    Commit,
    Create { inode: InodeId, file_type: FileType },
    Put { inode: InodeId, old: Bytes, new: Bytes },
    Remove { inode: InodeId, file_type: FileType, old: Bytes },
}

/// A record of the write-ahead transaction log:
///
/// | len: u32 | txid: u64 | tag: u8 | body |
///
/// `len` counts everything after itself. Bodies (big-endian):
/// - BEGIN, COMMIT: empty
/// - CREATE: inode u64, type u32
/// - PUT: inode u64, old_len u32, old, new_len u32, new
/// - REMOVE: inode u64, type u32, old_len u32, old
#[derive(Clone, Debug, PartialEq)]
pub struct TxLogEntry {
    pub txid: TxId,
    pub op: TxOp,
}

impl TxLogEntry {
    pub fn new(txid: TxId, op: TxOp) -> Self {
        TxLogEntry { txid, op }
    }

    fn body_len(&self) -> usize {
        match &self.op {
            TxOp::Begin | TxOp::Commit => 0,
            TxOp::Create { .. } => 8 + 4,
            TxOp::Put { old, new, .. } => 8 + 4 + old.len() + 4 + new.len(),
            TxOp::Remove { old, .. } => 8 + 4 + 4 + old.len(),
        }
    }

    /// Bytes this record takes in the log file, length prefix included.
    pub fn encoded_len(&self) -> usize {
        LEN_PREFIX + HEADER + self.body_len()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32((HEADER + self.body_len()) as u32);
        buf.put_u64(self.txid);
        match &self.op {
            TxOp::Begin => buf.put_u8(TAG_BEGIN),
            TxOp::Commit => buf.put_u8(TAG_COMMIT),
            TxOp::Create { inode, file_type } => {
                buf.put_u8(TAG_CREATE);
                buf.put_u64(*inode);
                buf.put_u32(file_type.as_u32());
            }
            TxOp::Put { inode, old, new } => {
                buf.put_u8(TAG_PUT);
                buf.put_u64(*inode);
                buf.put_u32(old.len() as u32);
                buf.put_slice(old);
                buf.put_u32(new.len() as u32);
                buf.put_slice(new);
            }
            TxOp::Remove { inode, file_type, old } => {
                buf.put_u8(TAG_REMOVE);
                buf.put_u64(*inode);
                buf.put_u32(file_type.as_u32());
                buf.put_u32(old.len() as u32);
                buf.put_slice(old);
            }
        }
    }

    /// Decode every record in `log`. A record cut short at the end of the file (a crash mid
    /// append) is reported as `Torn` together with the records before it.
    pub fn decode_all(log: &[u8]) -> (Vec<TxLogEntry>, Option<TxLogError>) {
        let mut entries = Vec::new();
        let mut offset = 0;
        while offset < log.len() {
            match Self::decode_at(log, offset) {
                Ok((entry, next_offset)) => {
                    entries.push(entry);
                    offset = next_offset;
                }
                Err(e) => return (entries, Some(e)),
            }
        }
        (entries, None)
    }

    fn decode_at(log: &[u8], offset: usize) -> Result<(TxLogEntry, usize), TxLogError> {
        let mut buf = &log[offset..];
        if buf.remaining() < LEN_PREFIX {
            return Err(TxLogError::Torn { offset });
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(TxLogError::Torn { offset });
        }

        let corrupt = |reason: &str| TxLogError::Corrupt {
            offset,
            reason: reason.to_string(),
        };
        let mut record = &buf[..len];
        if record.remaining() < HEADER {
            return Err(corrupt("shorter than its header"));
        }
        let txid = record.get_u64();
        let tag = record.get_u8();

        let op = match tag {
            TAG_BEGIN => TxOp::Begin,
            TAG_COMMIT => TxOp::Commit,
            TAG_CREATE => {
                let inode = read_u64(&mut record).ok_or_else(|| corrupt("CREATE inode"))?;
                let file_type = read_file_type(&mut record).ok_or_else(|| corrupt("CREATE type"))?;
                TxOp::Create { inode, file_type }
            }
            TAG_PUT => {
                let inode = read_u64(&mut record).ok_or_else(|| corrupt("PUT inode"))?;
                let old = read_bytes(&mut record).ok_or_else(|| corrupt("PUT old content"))?;
                let new = read_bytes(&mut record).ok_or_else(|| corrupt("PUT new content"))?;
                TxOp::Put { inode, old, new }
            }
            TAG_REMOVE => {
                let inode = read_u64(&mut record).ok_or_else(|| corrupt("REMOVE inode"))?;
                let file_type = read_file_type(&mut record).ok_or_else(|| corrupt("REMOVE type"))?;
                let old = read_bytes(&mut record).ok_or_else(|| corrupt("REMOVE old content"))?;
                TxOp::Remove { inode, file_type, old }
            }
            other => return Err(corrupt(&format!("unknown tag {}", other))),
        };

        if record.has_remaining() {
            return Err(corrupt("trailing bytes in record"));
        }

        Ok((TxLogEntry { txid, op }, offset + LEN_PREFIX + len))
    }
}

fn read_u64(buf: &mut &[u8]) -> Option<u64> {
    if buf.remaining() < 8 {
        return None;
    }
    Some(buf.get_u64())
}

fn read_file_type(buf: &mut &[u8]) -> Option<FileType> {
    if buf.remaining() < 4 {
        return None;
    }
    FileType::try_from(buf.get_u32()).ok()
}

fn read_bytes(buf: &mut &[u8]) -> Option<Bytes> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return None;
    }
    Some(buf.copy_to_bytes(len))
}
