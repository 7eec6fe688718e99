use crate::actor::WeakActorClient;
use crate::replica::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, ReplicaId, RequestVoteArgs,
    RequestVoteReply,
};
use crate::transport::TransportError;

/// RaftRpcServer is the inbound side of a replica: transports hand it the RPCs addressed to this
/// replica, and it forwards them to the replica's event loop.
#[derive(Clone)]
pub struct RaftRpcServer {
    logger: slog::Logger,
    replica_id: ReplicaId,
    local_replica: WeakActorClient,
}

impl RaftRpcServer {
    pub(crate) fn new(logger: slog::Logger, replica_id: ReplicaId, local_replica: WeakActorClient) -> Self {
        RaftRpcServer {
            logger,
            replica_id,
            local_replica,
        }
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    pub async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, TransportError> {
        slog::trace!(self.logger, "RequestVote from {:?} for term {:?}", args.candidate_id, args.term);
        self.local_replica
            .request_vote(args)
            .await
            .map_err(|_| self.exited())
    }

    pub async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply, TransportError> {
        slog::trace!(
            self.logger,
            "AppendEntries from {:?}: prev {:?}, {} entries",
            args.leader_id,
            args.prev_log_index,
            args.entries.len()
        );
        self.local_replica
            .append_entries(args)
            .await
            .map_err(|_| self.exited())
    }

    pub async fn install_snapshot(&self, args: InstallSnapshotArgs) -> Result<InstallSnapshotReply, TransportError> {
        self.local_replica
            .install_snapshot(args)
            .await
            .map_err(|_| self.exited())
    }

    fn exited(&self) -> TransportError {
        slog::debug!(self.logger, "Replica event loop has exited; refusing RPC");
        TransportError::ServerExited(self.replica_id)
    }
}
