use crate::extent::{FileType, InodeId};
use bytes::{Buf, BufMut, Bytes};
use std::convert::TryFrom;

const TAG_NOOP: u8 = 0;
const TAG_CREATE: u8 = 1;
const TAG_PUT: u8 = 2;
const TAG_GET: u8 = 3;
const TAG_GETATTR: u8 = 4;
const TAG_REMOVE: u8 = 5;

/// A command replicated through the raft log and applied to the extent store.
///
/// Wire format, all integers big-endian:
///
/// | Command | Bytes                                 |
/// |---------|---------------------------------------|
/// | Noop    | (empty)                               |
/// | Create  | `[tag:1][file_type:4]`                |
/// | Put     | `[tag:1][inode:8][payload...]`        |
/// | Get     | `[tag:1][inode:8]`                    |
/// | GetAttr | `[tag:1][inode:8]`                    |
/// | Remove  | `[tag:1][inode:8]`                    |
///
/// A Put payload runs to the end of the buffer, so the decoder must be handed exactly one
/// encoded command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Carried by the sentinel log entry.
    Noop,
    Create { file_type: FileType },
    Put { inode: InodeId, data: Bytes },
    Get { inode: InodeId },
    GetAttr { inode: InodeId },
    Remove { inode: InodeId },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CodecError {
    #[error("Command truncated: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },
    #[error("Unknown command tag {0}")]
    UnknownTag(u8),
    #[error("Unknown file type {0}")]
    UnknownFileType(u32),
}

impl Command {
    pub fn encoded_len(&self) -> usize {
        match self {
            Command::Noop => 0,
            Command::Create { .. } => 1 + 4,
            Command::Put { data, .. } => 1 + 8 + data.len(),
            Command::Get { .. } | Command::GetAttr { .. } | Command::Remove { .. } => 1 + 8,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        match self {
            Command::Noop => {}
            Command::Create { file_type } => {
                buf.put_u8(TAG_CREATE);
                buf.put_u32(file_type.as_u32());
            }
            Command::Put { inode, data } => {
                buf.put_u8(TAG_PUT);
                buf.put_u64(*inode);
                buf.put_slice(data);
            }
            Command::Get { inode } => {
                buf.put_u8(TAG_GET);
                buf.put_u64(*inode);
            }
            Command::GetAttr { inode } => {
                buf.put_u8(TAG_GETATTR);
                buf.put_u64(*inode);
            }
            Command::Remove { inode } => {
                buf.put_u8(TAG_REMOVE);
                buf.put_u64(*inode);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        Bytes::from(buf)
    }

    pub fn decode(mut buf: &[u8]) -> Result<Command, CodecError> {
        if !buf.has_remaining() {
            return Ok(Command::Noop);
        }

        let total = buf.len();
        let tag = buf.get_u8();
        match tag {
            TAG_NOOP => Ok(Command::Noop),
            TAG_CREATE => {
                ensure_len(total, 1 + 4)?;
                let raw = buf.get_u32();
                let file_type = FileType::try_from(raw).map_err(|_| CodecError::UnknownFileType(raw))?;
                Ok(Command::Create { file_type })
            }
            TAG_PUT => {
                ensure_len(total, 1 + 8)?;
                let inode = buf.get_u64();
                Ok(Command::Put {
                    inode,
                    data: Bytes::copy_from_slice(buf),
                })
            }
            TAG_GET | TAG_GETATTR | TAG_REMOVE => {
                ensure_len(total, 1 + 8)?;
                let inode = buf.get_u64();
                Ok(match tag {
                    TAG_GET => Command::Get { inode },
                    TAG_GETATTR => Command::GetAttr { inode },
                    _ => Command::Remove { inode },
                })
            }
            unknown => Err(CodecError::UnknownTag(unknown)),
        }
    }
}

fn ensure_len(available: usize, needed: usize) -> Result<(), CodecError> {
    if available < needed {
        Err(CodecError::Truncated { needed, available })
    } else {
        Ok(())
    }
}
