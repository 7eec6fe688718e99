use crate::actor::ActorClient;
use crate::command::Command;
use crate::commitlog::Index;
use crate::replica::{NodeStatus, ReplicaId, Role, SubmitError, SubmittedCommand, Term};

/// RaftClient is the application's handle on one local raft node. Clones share the same node.
#[derive(Clone)]
pub struct RaftClient {
    replica_id: ReplicaId,
    actor_client: ActorClient,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("Raft node {0:?} has stopped")]
pub struct NodeStopped(pub ReplicaId);

impl RaftClient {
    pub(crate) fn new(replica_id: ReplicaId, actor_client: ActorClient) -> Self {
        RaftClient {
            replica_id,
            actor_client,
        }
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Appends `command` to the log if this node is leader. The returned handle completes once
    /// the entry is applied on this node, or fails if the entry is lost to a new leader.
    pub async fn new_command(&self, command: Command) -> Result<SubmittedCommand, SubmitError> {
        self.actor_client.submit(command).await
    }

    /// Current term, and whether this node believes it is leader for it.
    pub async fn is_leader(&self) -> Result<(bool, Term), NodeStopped> {
        let status = self.status().await?;
        Ok((status.role == Role::Leader, status.term))
    }

    pub async fn status(&self) -> Result<NodeStatus, NodeStopped> {
        self.actor_client.status().await.map_err(|_| self.stopped())
    }

    /// `(index, term)` of every entry, sentinel included.
    pub async fn log_summary(&self) -> Result<Vec<(Index, Term)>, NodeStopped> {
        self.actor_client.log_summary().await.map_err(|_| self.stopped())
    }

    pub async fn save_snapshot(&self) -> Result<bool, NodeStopped> {
        self.actor_client.save_snapshot().await.map_err(|_| self.stopped())
    }

    pub(crate) async fn shutdown(&self) -> Result<(), NodeStopped> {
        self.actor_client.shutdown().await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> NodeStopped {
        NodeStopped(self.replica_id)
    }
}
