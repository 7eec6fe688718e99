use crate::command::{CodecError, Command};
use crate::commitlog::{Index, LogEntry, RaftLog};
use crate::replica::{ReplicaId, Term};
use bytes::{Buf, BufMut, BytesMut};
use std::convert::TryFrom;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LOG_FILE_NAME: &str = "raftlog";
const LOG_TMP_FILE_NAME: &str = "raftlog.tmp";
const NO_VOTE: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O failure on raft log file")]
    Io(#[from] io::Error),
    #[error("Value {field} = {value} doesn't fit the on-disk i32 field")]
    OutOfRange { field: &'static str, value: u64 },
    #[error("Truncated raft log file")]
    Truncated,
    #[error("Corrupt raft log file: {0}")]
    Corrupt(String),
    #[error("Undecodable command payload in raft log file")]
    Codec(#[from] CodecError),
}

/// DurableState is everything a replica must have on disk before it answers an RPC: the current
/// term, the vote cast in that term, and the log.
#[derive(Clone, Debug)]
pub(crate) struct DurableState {
    pub(crate) current_term: Term,
    pub(crate) voted_for: Option<ReplicaId>,
    pub(crate) log: RaftLog,
}

impl DurableState {
    pub(crate) fn empty() -> Self {
        DurableState {
            current_term: Term::new(0),
            voted_for: None,
            log: RaftLog::new(),
        }
    }
}

/// RaftStorage reads and writes the replica's `DurableState` as a single file. The on-disk layout
/// is (all big-endian i32):
///
/// | current_term | voted_for (-1 = none) | entry_count | entry * entry_count |
///
/// and every entry is:
///
/// | index | term | payload_len | payload (command encoding) |
///
/// Flushes replace the whole file: write and fsync a temp file, then rename it over the old one.
pub(crate) struct RaftStorage {
    logger: slog::Logger,
    directory: PathBuf,
    // Serializes file writers (event loop and shutdown path).
    file_lock: Mutex<()>,
}

impl RaftStorage {
    pub(crate) fn new(logger: slog::Logger, directory: impl AsRef<Path>) -> Result<Self, StorageError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;

        Ok(RaftStorage {
            logger,
            directory,
            file_lock: Mutex::new(()),
        })
    }

    pub(crate) fn flush(&self, state: &DurableState) -> Result<(), StorageError> {
        let encoded = encode(state)?;

        let _guard = self.file_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tmp_path = self.directory.join(LOG_TMP_FILE_NAME);
        let mut file = File::create(&tmp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        fs::rename(&tmp_path, self.directory.join(LOG_FILE_NAME))?;

        slog::debug!(
            self.logger,
            "Flushed raft state: term={:?}, voted_for={:?}, last_index={:?}",
            state.current_term,
            state.voted_for,
            state.log.last_index()
        );
        Ok(())
    }

    /// Load the previously flushed state. A missing or unreadable file means no prior state.
    pub(crate) fn restore(&self) -> DurableState {
        let _guard = self.file_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let path = self.directory.join(LOG_FILE_NAME);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                slog::info!(self.logger, "No raft state at {:?}. Starting fresh.", path);
                return DurableState::empty();
            }
            Err(e) => {
                slog::warn!(self.logger, "Failed to read raft state at {:?}: {:?}. Starting fresh.", path, e);
                return DurableState::empty();
            }
        };

        match decode(&bytes) {
            Ok(state) => {
                slog::info!(
                    self.logger,
                    "Restored raft state: term={:?}, voted_for={:?}, last_index={:?}",
                    state.current_term,
                    state.voted_for,
                    state.log.last_index()
                );
                state
            }
            Err(e) => {
                slog::warn!(self.logger, "Discarding malformed raft state at {:?}: {}", path, e);
                DurableState::empty()
            }
        }
    }
}

fn to_i32(field: &'static str, value: u64) -> Result<i32, StorageError> {
    i32::try_from(value).map_err(|_| StorageError::OutOfRange { field, value })
}

fn encode(state: &DurableState) -> Result<BytesMut, StorageError> {
    let mut buf = BytesMut::with_capacity(12 + state.log.len() * 16);
    buf.put_i32(to_i32("current_term", state.current_term.as_u64())?);
    let voted_for = match &state.voted_for {
        None => NO_VOTE,
        Some(id) => to_i32("voted_for", u64::from(id.as_u32()))?,
    };
    buf.put_i32(voted_for);
    buf.put_i32(to_i32("entry_count", state.log.len() as u64)?);

    for entry in state.log.iter() {
        buf.put_i32(to_i32("index", entry.index.as_u64())?);
        buf.put_i32(to_i32("term", entry.term.as_u64())?);
        buf.put_i32(to_i32("payload_len", entry.command.encoded_len() as u64)?);
        entry.command.encode(&mut buf);
    }

    Ok(buf)
}

fn read_i32(buf: &mut &[u8]) -> Result<i32, StorageError> {
    if buf.remaining() < 4 {
        return Err(StorageError::Truncated);
    }
    Ok(buf.get_i32())
}

fn read_non_negative(buf: &mut &[u8], field: &str) -> Result<u64, StorageError> {
    let value = read_i32(buf)?;
    u64::try_from(value).map_err(|_| StorageError::Corrupt(format!("negative {}: {}", field, value)))
}

fn decode(mut buf: &[u8]) -> Result<DurableState, StorageError> {
    let current_term = Term::new(read_non_negative(&mut buf, "current_term")?);
    let voted_for = match read_i32(&mut buf)? {
        NO_VOTE => None,
        id => Some(ReplicaId::new(
            u32::try_from(id).map_err(|_| StorageError::Corrupt(format!("voted_for: {}", id)))?,
        )),
    };
    let entry_count = read_non_negative(&mut buf, "entry_count")? as usize;

    // Each entry takes at least 12 bytes; a corrupt count must not drive the allocation.
    let mut entries = Vec::with_capacity(entry_count.min(buf.remaining() / 12));
    for _ in 0..entry_count {
        let index = Index::new(read_non_negative(&mut buf, "index")?);
        let term = Term::new(read_non_negative(&mut buf, "term")?);
        let payload_len = read_non_negative(&mut buf, "payload_len")? as usize;
        if buf.remaining() < payload_len {
            return Err(StorageError::Truncated);
        }
        let command = Command::decode(&buf[..payload_len])?;
        buf.advance(payload_len);
        entries.push(LogEntry { index, term, command });
    }

    if buf.has_remaining() {
        return Err(StorageError::Corrupt(format!("{} trailing bytes", buf.remaining())));
    }
    let log = RaftLog::from_entries(entries)
        .ok_or_else(|| StorageError::Corrupt("log entries out of position or missing sentinel".into()))?;

    Ok(DurableState {
        current_term,
        voted_for,
        log,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::discard_logger;
    use crate::extent::FileType;
    use bytes::Bytes;

    fn sample_state() -> DurableState {
        let mut log = RaftLog::new();
        log.append(Term::new(1), Command::Create { file_type: FileType::File });
        log.append(
            Term::new(2),
            Command::Put {
                inode: 2,
                data: Bytes::from_static(b"hello"),
            },
        );
        DurableState {
            current_term: Term::new(2),
            voted_for: Some(ReplicaId::new(3)),
            log,
        }
    }

    #[test]
    fn restore_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RaftStorage::new(discard_logger(), dir.path()).unwrap();

        let state = storage.restore();
        assert_eq!(state.current_term, Term::new(0));
        assert_eq!(state.voted_for, None);
        assert_eq!(state.log.last_index(), Index::sentinel());
    }

    #[test]
    fn flush_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RaftStorage::new(discard_logger(), dir.path()).unwrap();
        let state = sample_state();
        storage.flush(&state).unwrap();

        // A fresh handle on the same directory, as after a restart.
        let storage = RaftStorage::new(discard_logger(), dir.path()).unwrap();
        let restored = storage.restore();
        assert_eq!(restored.current_term, Term::new(2));
        assert_eq!(restored.voted_for, Some(ReplicaId::new(3)));
        let restored_entries: Vec<_> = restored.log.iter().cloned().collect();
        let expected_entries: Vec<_> = state.log.iter().cloned().collect();
        assert_eq!(restored_entries, expected_entries);
    }

    #[test]
    fn file_layout_is_big_endian_i32() {
        let mut state = DurableState::empty();
        state.current_term = Term::new(7);
        let bytes = encode(&state).unwrap();
        // term, vote, count, then the sentinel's index/term/len with an empty payload.
        assert_eq!(
            &bytes[..],
            &[0, 0, 0, 7, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0][..]
        );
    }

    #[test]
    fn truncated_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RaftStorage::new(discard_logger(), dir.path()).unwrap();
        storage.flush(&sample_state()).unwrap();

        let path = dir.path().join(LOG_FILE_NAME);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let restored = storage.restore();
        assert_eq!(restored.current_term, Term::new(0));
        assert_eq!(restored.log.last_index(), Index::sentinel());
    }

    #[test]
    fn failed_flush_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = RaftStorage::new(discard_logger(), dir.path()).unwrap();
        storage.flush(&sample_state()).unwrap();

        // A directory in the temp file's place makes every flush fail.
        fs::create_dir(dir.path().join(LOG_TMP_FILE_NAME)).unwrap();
        let mut newer = sample_state();
        newer.current_term = Term::new(9);
        assert!(matches!(storage.flush(&newer), Err(StorageError::Io(_))));

        let restored = storage.restore();
        assert_eq!(restored.current_term, Term::new(2));
        assert_eq!(restored.voted_for, Some(ReplicaId::new(3)));
    }

    #[test]
    fn term_out_of_i32_range_is_rejected() {
        let mut state = DurableState::empty();
        state.current_term = Term::new(u64::from(u32::MAX));
        assert!(matches!(encode(&state), Err(StorageError::OutOfRange { .. })));
    }
}
