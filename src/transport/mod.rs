//! How replicas reach each other. The raft core only ever sees the `RaftTransport` trait.
mod local;

pub use local::LocalNetwork;
pub use local::LocalTransport;

use crate::replica::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, ReplicaId, RequestVoteArgs,
    RequestVoteReply,
};

/// RaftTransport carries the three raft RPCs from this replica to a peer.
#[async_trait::async_trait]
pub trait RaftTransport: Send + Sync + 'static {
    async fn request_vote(&self, target: ReplicaId, args: RequestVoteArgs) -> Result<RequestVoteReply, TransportError>;

    async fn append_entries(
        &self,
        target: ReplicaId,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesReply, TransportError>;

    async fn install_snapshot(
        &self,
        target: ReplicaId,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply, TransportError>;
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("{0:?} is unreachable")]
    Unreachable(ReplicaId),
    #[error("{0:?} did not reply in time")]
    Timeout(ReplicaId),
    #[error("{0:?} has shut down")]
    ServerExited(ReplicaId),
}
