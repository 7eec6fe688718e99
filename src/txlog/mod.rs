//! Write-ahead transaction log for the local extent server: undo/redo records bracketed by
//! BEGIN/COMMIT, and the checkpoint image they apply on top of.
mod checkpoint;
mod entry;
mod persister;

pub use entry::TxId;
pub use entry::TxLogEntry;
pub use entry::TxLogError;
pub use entry::TxOp;
pub use persister::MAX_LOG_BYTES;

pub(crate) use persister::TxPersister;
