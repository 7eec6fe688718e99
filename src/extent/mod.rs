//! Extent storage: the inode table, its replicated (raft) front end, and its local
//! transactional front end.
mod dist_server;
mod local_server;
mod state_machine;
mod store;

pub use dist_server::DistExtentServer;
pub use dist_server::ExtentClientError;
pub use local_server::LocalExtentServer;
pub use local_server::LocalServerError;
pub use state_machine::ExtentStateMachine;
pub use store::Attr;
pub use store::ExtentError;
pub use store::ExtentStore;
pub use store::FileType;
pub use store::InodeId;
pub use store::MAX_INODES;
pub use store::ROOT_INODE;

pub(crate) use store::Extent;
