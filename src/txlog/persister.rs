use crate::extent::ExtentStore;
use crate::txlog::{checkpoint, TxId, TxLogEntry, TxLogError};
use bytes::BytesMut;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const LOG_FILE_NAME: &str = "logdata.bin";
const CHECKPOINT_FILE_NAME: &str = "checkpoint.bin";

/// Appending a record past this many bytes of log calls for a checkpoint first.
pub const MAX_LOG_BYTES: u64 = 131_072;

/// TxPersister owns the two files of a local extent server: the append-only transaction log and
/// the checkpoint image the log applies on top of.
pub(crate) struct TxPersister {
    logger: slog::Logger,
    directory: PathBuf,
    log_len: u64,
}

impl TxPersister {
    pub(crate) fn open(logger: slog::Logger, directory: impl AsRef<Path>) -> Result<Self, TxLogError> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        let log_len = match fs::metadata(directory.join(LOG_FILE_NAME)) {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(TxPersister {
            logger,
            directory,
            log_len,
        })
    }

    pub(crate) fn log_len(&self) -> u64 {
        self.log_len
    }

    pub(crate) fn fits(&self, entry: &TxLogEntry) -> bool {
        self.log_len + entry.encoded_len() as u64 <= MAX_LOG_BYTES
    }

    /// Durably append one record.
    pub(crate) fn append(&mut self, entry: &TxLogEntry) -> Result<(), TxLogError> {
        let mut buf = BytesMut::with_capacity(entry.encoded_len());
        entry.encode(&mut buf);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.directory.join(LOG_FILE_NAME))?;
        file.write_all(&buf)?;
        file.sync_data()?;

        self.log_len += buf.len() as u64;
        Ok(())
    }

    /// Every complete record in the log. A torn or corrupt tail is logged and dropped.
    pub(crate) fn read_log(&self) -> Result<Vec<TxLogEntry>, TxLogError> {
        let bytes = match fs::read(self.directory.join(LOG_FILE_NAME)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let (entries, tail_error) = TxLogEntry::decode_all(&bytes);
        if let Some(e) = tail_error {
            slog::warn!(
                self.logger,
                "Ignoring transaction log tail: {}. Kept {} records.",
                e,
                entries.len()
            );
        }
        Ok(entries)
    }

    /// Replace the log with exactly `entries`.
    pub(crate) fn rewrite_log(&mut self, entries: &[TxLogEntry]) -> Result<(), TxLogError> {
        let mut buf = BytesMut::new();
        for entry in entries {
            entry.encode(&mut buf);
        }
        self.replace_file(LOG_FILE_NAME, &buf)?;
        self.log_len = buf.len() as u64;
        Ok(())
    }

    pub(crate) fn write_checkpoint(&self, store: &ExtentStore, next_txid: TxId) -> Result<(), TxLogError> {
        let buf = checkpoint::encode(store, next_txid);
        self.replace_file(CHECKPOINT_FILE_NAME, &buf)?;
        slog::debug!(self.logger, "Wrote checkpoint of {} bytes", buf.len());
        Ok(())
    }

    /// None if no checkpoint was ever written.
    pub(crate) fn read_checkpoint(&self) -> Result<Option<(ExtentStore, TxId)>, TxLogError> {
        match fs::read(self.directory.join(CHECKPOINT_FILE_NAME)) {
            Ok(bytes) => checkpoint::decode(&bytes).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn replace_file(&self, file_name: &str, contents: &[u8]) -> Result<(), TxLogError> {
        let final_path = self.directory.join(file_name);
        let tmp_path = self.directory.join(format!("{}.tmp", file_name));

        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::discard_logger;
    use crate::extent::FileType;
    use crate::txlog::TxOp;
    use bytes::Bytes;

    fn put(txid: TxId, size: usize) -> TxLogEntry {
        TxLogEntry::new(
            txid,
            TxOp::Put {
                inode: 2,
                old: Bytes::new(),
                new: Bytes::from(vec![7u8; size]),
            },
        )
    }

    #[test]
    fn appended_records_are_read_back_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![TxLogEntry::new(1, TxOp::Begin), put(1, 10), TxLogEntry::new(1, TxOp::Commit)];
        {
            let mut persister = TxPersister::open(discard_logger(), dir.path()).unwrap();
            for entry in &entries {
                persister.append(entry).unwrap();
            }
        }

        let persister = TxPersister::open(discard_logger(), dir.path()).unwrap();
        let expected_len: usize = entries.iter().map(TxLogEntry::encoded_len).sum();
        assert_eq!(persister.log_len(), expected_len as u64);
        assert_eq!(persister.read_log().unwrap(), entries);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = TxPersister::open(discard_logger(), dir.path()).unwrap();
        persister.append(&TxLogEntry::new(1, TxOp::Begin)).unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join(LOG_FILE_NAME))
            .unwrap();
        file.write_all(&[0, 0, 0, 50, 1, 2]).unwrap();

        assert_eq!(persister.read_log().unwrap(), vec![TxLogEntry::new(1, TxOp::Begin)]);
    }

    #[test]
    fn fits_respects_the_bound() {
        let dir = tempfile::tempdir().unwrap();
        let mut persister = TxPersister::open(discard_logger(), dir.path()).unwrap();
        let big = put(1, (MAX_LOG_BYTES / 2) as usize);
        assert!(persister.fits(&big));
        persister.append(&big).unwrap();
        assert!(!persister.fits(&big));

        persister.rewrite_log(&[]).unwrap();
        assert_eq!(persister.log_len(), 0);
        assert!(persister.fits(&big));
        assert!(persister.read_log().unwrap().is_empty());
    }

    #[test]
    fn checkpoint_replaces_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let persister = TxPersister::open(discard_logger(), dir.path()).unwrap();
        assert!(persister.read_checkpoint().unwrap().is_none());

        let mut store = ExtentStore::new();
        persister.write_checkpoint(&store, 1).unwrap();
        store.create(FileType::Dir).unwrap();
        persister.write_checkpoint(&store, 5).unwrap();

        let (restored, next_txid) = persister.read_checkpoint().unwrap().unwrap();
        assert_eq!(restored.contents(), store.contents());
        assert_eq!(next_txid, 5);
    }
}
