mod actor;
mod api;
mod command;
mod commitlog;
mod extent;
mod replica;
mod server;
mod transport;
mod txlog;

pub use api::discard_logger;
pub use api::file_logger;
pub use api::stdout_logger;
pub use api::NodeStopped;
pub use api::RaftClient;
pub use api::RaftElectionState;
pub use api::RaftEvent;
pub use api::RaftEventListener;
pub use api::RaftNode;
pub use api::RaftNodeConfig;
pub use api::RaftNodeCreationError;
pub use api::RaftOptions;
pub use command::ApplyError;
pub use command::CodecError;
pub use command::Command;
pub use command::CommandOutput;
pub use command::CommandResult;
pub use command::CommandWaitError;
pub use commitlog::Index;
pub use commitlog::LogEntry;
pub use commitlog::StorageError;
pub use extent::Attr;
pub use extent::DistExtentServer;
pub use extent::ExtentClientError;
pub use extent::ExtentError;
pub use extent::ExtentStateMachine;
pub use extent::ExtentStore;
pub use extent::FileType;
pub use extent::InodeId;
pub use extent::LocalExtentServer;
pub use extent::LocalServerError;
pub use extent::MAX_INODES;
pub use extent::ROOT_INODE;
pub use replica::AppendEntriesArgs;
pub use replica::AppendEntriesReply;
pub use replica::InstallSnapshotArgs;
pub use replica::InstallSnapshotReply;
pub use replica::NodeStatus;
pub use replica::ReplicaId;
pub use replica::RequestVoteArgs;
pub use replica::RequestVoteReply;
pub use replica::Role;
pub use replica::StateMachine;
pub use replica::SubmitError;
pub use replica::SubmittedCommand;
pub use replica::Term;
pub use server::RaftRpcServer;
pub use transport::LocalNetwork;
pub use transport::LocalTransport;
pub use transport::RaftTransport;
pub use transport::TransportError;
pub use txlog::TxId;
pub use txlog::TxLogEntry;
pub use txlog::TxLogError;
pub use txlog::TxOp;
pub use txlog::MAX_LOG_BYTES;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
