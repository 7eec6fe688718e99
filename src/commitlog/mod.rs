mod log;
mod storage;

pub use log::Index;
pub use log::LogEntry;
pub(crate) use log::RaftLog;
pub use storage::StorageError;
pub(crate) use storage::{DurableState, RaftStorage};
