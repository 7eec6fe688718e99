use crate::replica::{
    AppendEntriesArgs, AppendEntriesReply, InstallSnapshotArgs, InstallSnapshotReply, ReplicaId, RequestVoteArgs,
    RequestVoteReply,
};
use crate::server::RaftRpcServer;
use crate::transport::{RaftTransport, TransportError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// LocalNetwork connects replicas living in one process. Replicas can be cut off and reconnected
/// to simulate partitions; a message is dropped if either end is cut off when it is sent or when
/// the reply comes back.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

#[derive(Default)]
struct NetworkState {
    servers: HashMap<ReplicaId, RaftRpcServer>,
    disconnected: HashSet<ReplicaId>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `server` reachable as `replica_id`, replacing any previous registration.
    pub fn register(&self, replica_id: ReplicaId, server: RaftRpcServer) {
        self.lock().servers.insert(replica_id, server);
    }

    pub fn unregister(&self, replica_id: ReplicaId) {
        self.lock().servers.remove(&replica_id);
    }

    pub fn disconnect(&self, replica_id: ReplicaId) {
        self.lock().disconnected.insert(replica_id);
    }

    pub fn reconnect(&self, replica_id: ReplicaId) {
        self.lock().disconnected.remove(&replica_id);
    }

    pub fn is_connected(&self, replica_id: ReplicaId) -> bool {
        !self.lock().disconnected.contains(&replica_id)
    }

    /// The transport `replica_id` uses to reach everyone else.
    pub fn transport_for(&self, replica_id: ReplicaId) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            from: replica_id,
        }
    }

    fn route(&self, from: ReplicaId, target: ReplicaId) -> Result<RaftRpcServer, TransportError> {
        let state = self.lock();
        if state.disconnected.contains(&from) || state.disconnected.contains(&target) {
            return Err(TransportError::Unreachable(target));
        }

        state
            .servers
            .get(&target)
            .cloned()
            .ok_or(TransportError::Unreachable(target))
    }

    fn check_reply_path(&self, from: ReplicaId, target: ReplicaId) -> Result<(), TransportError> {
        let state = self.lock();
        if state.disconnected.contains(&from) || state.disconnected.contains(&target) {
            return Err(TransportError::Unreachable(target));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone)]
pub struct LocalTransport {
    network: LocalNetwork,
    from: ReplicaId,
}

#[async_trait::async_trait]
impl RaftTransport for LocalTransport {
    async fn request_vote(&self, target: ReplicaId, args: RequestVoteArgs) -> Result<RequestVoteReply, TransportError> {
        let server = self.network.route(self.from, target)?;
        let reply = server.request_vote(args).await?;
        self.network.check_reply_path(self.from, target)?;
        Ok(reply)
    }

    async fn append_entries(
        &self,
        target: ReplicaId,
        args: AppendEntriesArgs,
    ) -> Result<AppendEntriesReply, TransportError> {
        let server = self.network.route(self.from, target)?;
        let reply = server.append_entries(args).await?;
        self.network.check_reply_path(self.from, target)?;
        Ok(reply)
    }

    async fn install_snapshot(
        &self,
        target: ReplicaId,
        args: InstallSnapshotArgs,
    ) -> Result<InstallSnapshotReply, TransportError> {
        let server = self.network.route(self.from, target)?;
        let reply = server.install_snapshot(args).await?;
        self.network.check_reply_path(self.from, target)?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::Index;
    use crate::replica::Term;

    fn vote_args() -> RequestVoteArgs {
        RequestVoteArgs {
            term: Term::new(1),
            candidate_id: ReplicaId::new(1),
            last_log_index: Index::new(0),
            last_log_term: Term::new(0),
        }
    }

    #[tokio::test]
    async fn unknown_and_disconnected_targets_are_unreachable() {
        let network = LocalNetwork::new();
        let transport = network.transport_for(ReplicaId::new(1));

        let err = transport.request_vote(ReplicaId::new(2), vote_args()).await.unwrap_err();
        assert_eq!(err, TransportError::Unreachable(ReplicaId::new(2)));

        network.disconnect(ReplicaId::new(1));
        assert!(!network.is_connected(ReplicaId::new(1)));
        let err = transport.request_vote(ReplicaId::new(2), vote_args()).await.unwrap_err();
        assert_eq!(err, TransportError::Unreachable(ReplicaId::new(2)));

        network.reconnect(ReplicaId::new(1));
        assert!(network.is_connected(ReplicaId::new(1)));
    }
}
