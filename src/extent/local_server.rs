use crate::extent::{Attr, ExtentError, ExtentStore, FileType, InodeId};
use crate::txlog::{TxId, TxLogEntry, TxLogError, TxOp, TxPersister};
use bytes::Bytes;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LocalServerError {
    #[error(transparent)]
    Extent(#[from] ExtentError),
    #[error(transparent)]
    Log(#[from] TxLogError),
    #[error("Transaction {0} is still open")]
    TxAlreadyOpen(TxId),
    #[error("No transaction is open")]
    NoOpenTx,
}

struct OpenTx {
    txid: TxId,
    // Mutations already applied to the store, in the order they were logged.
    ops: Vec<TxOp>,
}

/// LocalExtentServer is the single-machine extent server. Every mutation is logged with its
/// before-image ahead of being applied, inside a BEGIN/COMMIT bracket, so that a crash loses
/// exactly the transactions that never committed.
pub struct LocalExtentServer {
    logger: slog::Logger,
    store: ExtentStore,
    persister: TxPersister,
    next_txid: TxId,
    open_tx: Option<OpenTx>,
}

impl LocalExtentServer {
    /// Open (or create) the server stored in `directory`. The checkpoint is loaded, committed
    /// transactions in the log are replayed on top of it, and the result is checkpointed again.
    pub fn open(logger: slog::Logger, directory: impl AsRef<Path>) -> Result<Self, LocalServerError> {
        let persister = TxPersister::open(logger.clone(), directory)?;
        let (mut store, checkpoint_txid) = match persister.read_checkpoint()? {
            Some(checkpoint) => checkpoint,
            None => (ExtentStore::new(), 1),
        };

        let entries = persister.read_log()?;
        let committed: HashSet<TxId> = entries
            .iter()
            .filter(|entry| entry.op == TxOp::Commit)
            .map(|entry| entry.txid)
            .collect();
        let next_txid = entries
            .iter()
            .map(|entry| entry.txid + 1)
            .fold(checkpoint_txid, TxId::max);

        let mut replayed = 0;
        let mut dropped = 0;
        for entry in entries.iter().filter(|entry| is_mutation(&entry.op)) {
            if committed.contains(&entry.txid) {
                redo(&mut store, &entry.op);
                replayed += 1;
            } else {
                dropped += 1;
            }
        }

        slog::info!(
            logger,
            "Recovered extent store: replayed {} records of {} committed transactions, dropped {} uncommitted records",
            replayed,
            committed.len(),
            dropped
        );

        let mut server = LocalExtentServer {
            logger,
            store,
            persister,
            next_txid,
            open_tx: None,
        };
        server.checkpoint()?;
        Ok(server)
    }

    pub fn begin_tx(&mut self) -> Result<TxId, LocalServerError> {
        if let Some(tx) = &self.open_tx {
            return Err(LocalServerError::TxAlreadyOpen(tx.txid));
        }

        let txid = self.next_txid;
        self.next_txid += 1;
        self.append(TxLogEntry::new(txid, TxOp::Begin))?;
        self.open_tx = Some(OpenTx { txid, ops: Vec::new() });

        slog::debug!(self.logger, "Began transaction {}", txid);
        Ok(txid)
    }

    pub fn commit_tx(&mut self) -> Result<(), LocalServerError> {
        let txid = self.open_txid().ok_or(LocalServerError::NoOpenTx)?;
        // Still open while appending: a checkpoint on the way must see its ops.
        self.append(TxLogEntry::new(txid, TxOp::Commit))?;
        self.open_tx = None;

        slog::debug!(self.logger, "Committed transaction {}", txid);
        Ok(())
    }

    pub fn open_txid(&self) -> Option<TxId> {
        self.open_tx.as_ref().map(|tx| tx.txid)
    }

    pub fn create(&mut self, file_type: FileType) -> Result<InodeId, LocalServerError> {
        let inode = self.store.next_free_inode()?;
        self.mutate(TxOp::Create { inode, file_type })?;
        Ok(inode)
    }

    pub fn put(&mut self, inode: InodeId, data: Bytes) -> Result<(), LocalServerError> {
        let old = self.store.get(inode)?;
        self.mutate(TxOp::Put { inode, old, new: data })
    }

    pub fn remove(&mut self, inode: InodeId) -> Result<(), LocalServerError> {
        let file_type = self.store.getattr(inode)?.file_type;
        let old = self.store.get(inode)?;
        self.mutate(TxOp::Remove { inode, file_type, old })
    }

    pub fn get(&self, inode: InodeId) -> Result<Bytes, LocalServerError> {
        Ok(self.store.get(inode)?)
    }

    pub fn getattr(&self, inode: InodeId) -> Result<Attr, LocalServerError> {
        Ok(self.store.getattr(inode)?)
    }

    pub fn store(&self) -> &ExtentStore {
        &self.store
    }

    /// Persist the current committed state and shrink the log. An open transaction is undone
    /// for the image, kept in the log, and redone, so it can still commit or be lost in a crash.
    pub fn checkpoint(&mut self) -> Result<(), LocalServerError> {
        let open_tx = self.open_tx.as_ref().map(|tx| (tx.txid, tx.ops.clone()));

        if let Some((_, ops)) = &open_tx {
            for op in ops.iter().rev() {
                undo(&mut self.store, op)?;
            }
        }

        self.persister.write_checkpoint(&self.store, self.next_txid)?;

        match open_tx {
            None => self.persister.rewrite_log(&[])?,
            Some((txid, ops)) => {
                let mut entries = Vec::with_capacity(ops.len() + 1);
                entries.push(TxLogEntry::new(txid, TxOp::Begin));
                entries.extend(ops.iter().cloned().map(|op| TxLogEntry::new(txid, op)));
                self.persister.rewrite_log(&entries)?;

                for op in &ops {
                    apply(&mut self.store, op)?;
                }
            }
        }

        slog::info!(
            self.logger,
            "Checkpointed extent store";
            "OpenTx" => ?self.open_txid(),
            "LogBytes" => self.persister.log_len()
        );
        Ok(())
    }

    // Mutations are validated by the caller before they get here, so applying a logged op only
    // fails on a bug.
    fn mutate(&mut self, op: TxOp) -> Result<(), LocalServerError> {
        let implicit = self.open_tx.is_none();
        if implicit {
            self.begin_tx()?;
        }
        let txid = self.open_txid().ok_or(LocalServerError::NoOpenTx)?;

        self.append(TxLogEntry::new(txid, op.clone()))?;
        apply(&mut self.store, &op)?;
        if let Some(tx) = self.open_tx.as_mut() {
            tx.ops.push(op);
        }

        if implicit {
            self.commit_tx()?;
        }
        Ok(())
    }

    fn append(&mut self, entry: TxLogEntry) -> Result<(), LocalServerError> {
        if !self.persister.fits(&entry) {
            self.checkpoint()?;
        }
        // A record bigger than the whole bound still goes in, onto an empty log.
        self.persister.append(&entry)?;
        Ok(())
    }
}

fn is_mutation(op: &TxOp) -> bool {
    !matches!(op, TxOp::Begin | TxOp::Commit)
}

fn apply(store: &mut ExtentStore, op: &TxOp) -> Result<(), ExtentError> {
    match op {
        TxOp::Begin | TxOp::Commit => Ok(()),
        TxOp::Create { inode, file_type } => store.create_at(*inode, *file_type),
        TxOp::Put { inode, new, .. } => store.put(*inode, new.clone()),
        TxOp::Remove { inode, .. } => store.remove(*inode),
    }
}

fn undo(store: &mut ExtentStore, op: &TxOp) -> Result<(), ExtentError> {
    match op {
        TxOp::Begin | TxOp::Commit => Ok(()),
        TxOp::Create { inode, .. } => store.remove(*inode),
        TxOp::Put { inode, old, .. } => store.put(*inode, old.clone()),
        TxOp::Remove { inode, file_type, old } => {
            store.create_at(*inode, *file_type)?;
            store.put(*inode, old.clone())
        }
    }
}

// Replay of a committed record. The checkpoint may already contain its effect (crash after the
// checkpoint was written but before the log was emptied), so every record is applied as
// "make it so" rather than checked.
fn redo(store: &mut ExtentStore, op: &TxOp) {
    match op {
        TxOp::Begin | TxOp::Commit => {}
        TxOp::Create { inode, file_type } => {
            let _ = store.remove(*inode);
            let _ = store.create_at(*inode, *file_type);
        }
        TxOp::Put { inode, new, .. } => {
            let _ = store.put(*inode, new.clone());
        }
        TxOp::Remove { inode, .. } => {
            let _ = store.remove(*inode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::discard_logger;
    use crate::extent::ROOT_INODE;
    use crate::txlog::MAX_LOG_BYTES;

    fn open(dir: &tempfile::TempDir) -> LocalExtentServer {
        LocalExtentServer::open(discard_logger(), dir.path()).unwrap()
    }

    #[test]
    fn fresh_server_has_only_root() {
        let dir = tempfile::tempdir().unwrap();
        let server = open(&dir);
        assert_eq!(server.store().contents().len(), 1);
        assert_eq!(server.getattr(ROOT_INODE).unwrap().file_type, FileType::Dir);
        assert_eq!(server.open_txid(), None);
    }

    #[test]
    fn implicit_transactions_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let inode = {
            let mut server = open(&dir);
            let inode = server.create(FileType::File).unwrap();
            server.put(inode, Bytes::from_static(b"one")).unwrap();
            server.put(inode, Bytes::from_static(b"two")).unwrap();
            inode
        };

        let server = open(&dir);
        assert_eq!(server.get(inode).unwrap(), Bytes::from_static(b"two"));
        assert_eq!(server.getattr(inode).unwrap().size, 3);
    }

    #[test]
    fn transaction_bracket_rules() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = open(&dir);
        assert!(matches!(server.commit_tx(), Err(LocalServerError::NoOpenTx)));

        let txid = server.begin_tx().unwrap();
        assert_eq!(server.open_txid(), Some(txid));
        assert!(matches!(server.begin_tx(), Err(LocalServerError::TxAlreadyOpen(open)) if open == txid));

        server.commit_tx().unwrap();
        assert_eq!(server.open_txid(), None);
        assert!(server.begin_tx().unwrap() > txid);
    }

    #[test]
    fn invalid_mutation_is_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = open(&dir);
        assert!(matches!(
            server.put(42, Bytes::from_static(b"x")),
            Err(LocalServerError::Extent(ExtentError::NoEntry(42)))
        ));
        assert!(matches!(
            server.remove(42),
            Err(LocalServerError::Extent(ExtentError::NoEntry(42)))
        ));
        assert_eq!(server.persister.log_len(), 0);
        assert_eq!(server.open_txid(), None);
    }

    #[test]
    fn uncommitted_transaction_is_lost_on_crash() {
        let dir = tempfile::tempdir().unwrap();
        let inode = {
            let mut server = open(&dir);
            let inode = server.create(FileType::File).unwrap();
            server.put(inode, Bytes::from_static(b"committed")).unwrap();

            server.begin_tx().unwrap();
            server.put(inode, Bytes::from_static(b"uncommitted")).unwrap();
            server.remove(ROOT_INODE).unwrap();
            assert_eq!(server.get(inode).unwrap(), Bytes::from_static(b"uncommitted"));
            inode
        };

        let server = open(&dir);
        assert_eq!(server.get(inode).unwrap(), Bytes::from_static(b"committed"));
        assert!(server.store().contains(ROOT_INODE));
    }

    #[test]
    fn checkpoint_inside_transaction_keeps_it_open() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = open(&dir);
        let inode = server.create(FileType::File).unwrap();
        server.put(inode, Bytes::from_static(b"before")).unwrap();

        let txid = server.begin_tx().unwrap();
        server.put(inode, Bytes::from_static(b"during")).unwrap();
        let created = server.create(FileType::Symlink).unwrap();
        server.checkpoint().unwrap();

        // Visible state is unchanged by the checkpoint.
        assert_eq!(server.open_txid(), Some(txid));
        assert_eq!(server.get(inode).unwrap(), Bytes::from_static(b"during"));
        assert!(server.store().contains(created));

        // The image on disk holds only committed state.
        let (image, _) = server.persister.read_checkpoint().unwrap().unwrap();
        assert_eq!(image.get(inode).unwrap(), Bytes::from_static(b"before"));
        assert!(!image.contains(created));

        server.commit_tx().unwrap();
        drop(server);

        let server = open(&dir);
        assert_eq!(server.get(inode).unwrap(), Bytes::from_static(b"during"));
        assert!(server.store().contains(created));
    }

    #[test]
    fn undo_restores_removed_content() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = open(&dir);
        let inode = server.create(FileType::File).unwrap();
        server.put(inode, Bytes::from_static(b"keep me")).unwrap();

        server.begin_tx().unwrap();
        server.remove(inode).unwrap();
        server.checkpoint().unwrap();
        assert!(!server.store().contains(inode));

        let (image, _) = server.persister.read_checkpoint().unwrap().unwrap();
        assert_eq!(image.get(inode).unwrap(), Bytes::from_static(b"keep me"));
        assert_eq!(image.getattr(inode).unwrap().file_type, FileType::File);
    }

    #[test]
    fn log_growth_triggers_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = open(&dir);
        let inode = server.create(FileType::File).unwrap();

        let chunk = (MAX_LOG_BYTES / 8) as usize;
        for round in 0..20u8 {
            server.put(inode, Bytes::from(vec![round; chunk])).unwrap();
            assert!(server.persister.log_len() <= MAX_LOG_BYTES);
        }
        drop(server);

        let server = open(&dir);
        assert_eq!(server.get(inode).unwrap(), Bytes::from(vec![19u8; chunk]));
    }

    #[test]
    fn txids_are_not_reused_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let mut server = open(&dir);
            server.create(FileType::Dir).unwrap();
            let txid = server.begin_tx().unwrap();
            server.commit_tx().unwrap();
            txid
        };

        let mut server = open(&dir);
        assert!(server.begin_tx().unwrap() > first);
    }

    #[test]
    fn redo_is_idempotent() {
        let mut once = ExtentStore::new();
        let ops = vec![
            TxOp::Create {
                inode: 2,
                file_type: FileType::File,
            },
            TxOp::Put {
                inode: 2,
                old: Bytes::new(),
                new: Bytes::from_static(b"a"),
            },
            TxOp::Remove {
                inode: 2,
                file_type: FileType::File,
                old: Bytes::from_static(b"a"),
            },
            TxOp::Create {
                inode: 2,
                file_type: FileType::Symlink,
            },
            TxOp::Put {
                inode: 2,
                old: Bytes::new(),
                new: Bytes::from_static(b"target"),
            },
        ];
        for op in &ops {
            redo(&mut once, op);
        }
        let mut twice = once.clone();
        for op in &ops {
            redo(&mut twice, op);
        }

        assert_eq!(once.contents(), twice.contents());
        assert_eq!(once.getattr(2).unwrap().file_type, FileType::Symlink);
    }
}
