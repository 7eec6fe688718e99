use crate::actor::{ActorClient, ReplicaActor, ReplicaActorConfig};
use crate::api::client::RaftClient;
use crate::api::event_bus::RaftEventListener;
use crate::api::options::RaftOptionsValidated;
use crate::api::RaftOptions;
use crate::commitlog::{RaftStorage, StorageError};
use crate::replica::{
    self, ClusterTracker, Replica, ReplicaConfig, ReplicaId, StateMachine, Stopper, Tick, TickerTask,
};
use crate::server::RaftRpcServer;
use crate::transport::RaftTransport;
use std::convert::TryFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const ACTOR_QUEUE_SIZE: usize = 256;

pub struct RaftNodeConfig {
    pub my_replica_id: ReplicaId,
    pub cluster_members: Vec<ReplicaId>,
    // A directory where this node can keep its durable raft state.
    pub storage_directory: PathBuf,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftNodeCreationError {
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Storage initialization failure")]
    StorageInitialization(#[source] StorageError),
    // We will need to relax this later when adding membership changes.
    #[error("my replica ID not in cluster config")]
    MeNotInCluster,
}

/// RaftNode owns the running pieces of one replica: the event loop and its tick tasks.
pub struct RaftNode {
    logger: slog::Logger,
    client: RaftClient,
    rpc_server: RaftRpcServer,
    event_listener: RaftEventListener,
    stopper: Stopper,
    ticker_tasks: Vec<JoinHandle<()>>,
    actor_task: JoinHandle<()>,
}

impl RaftNode {
    /// Restores durable state from `config.storage_directory` and starts the replica as a
    /// follower. Must be called from within a tokio runtime.
    pub fn start<M: StateMachine>(
        config: RaftNodeConfig,
        transport: Arc<dyn RaftTransport>,
        state_machine: M,
    ) -> Result<RaftNode, RaftNodeCreationError> {
        let options = RaftOptionsValidated::try_from(config.options)
            .map_err(|e| RaftNodeCreationError::IllegalOptions(e.to_string()))?;

        let my_replica_id = config.my_replica_id;
        let cluster_tracker = ClusterTracker::new(my_replica_id, config.cluster_members)
            .ok_or(RaftNodeCreationError::MeNotInCluster)?;

        let logger = config.info_logger;
        let storage = RaftStorage::new(logger.new(slog::o!("Component" => "storage")), &config.storage_directory)
            .map_err(RaftNodeCreationError::StorageInitialization)?;

        let (replica, election_state_change_listener) = Replica::new(
            ReplicaConfig {
                logger: logger.clone(),
                cluster_tracker,
                storage: Arc::new(storage),
                state_machine,
                election_timeout_min: options.election_timeout_min,
                election_timeout_max: options.election_timeout_max,
            },
            Instant::now(),
        );

        let (actor_client, actor_queue_rx) = ActorClient::new(ACTOR_QUEUE_SIZE);
        let replica_actor = ReplicaActor::new(
            ReplicaActorConfig {
                logger: logger.clone(),
                transport,
                rpc_timeout: options.rpc_timeout,
                rpc_worker_count: options.rpc_worker_pool_size,
            },
            actor_queue_rx,
            actor_client.weak(),
            replica,
        );
        let actor_task = tokio::spawn(replica_actor.run_event_loop());

        let (stopper, stop_check) = replica::new_stop_signal();
        let ticker_tasks = vec![
            (Tick::Election, options.election_check_interval),
            (Tick::Heartbeat, options.heartbeat_interval),
            (Tick::Replication, options.replication_interval),
            (Tick::Apply, options.apply_interval),
        ]
        .into_iter()
        .map(|(tick, period)| TickerTask::spawn(tick, period, actor_client.weak(), stop_check.clone()))
        .collect();

        let rpc_server = RaftRpcServer::new(logger.clone(), my_replica_id, actor_client.weak());
        slog::info!(logger, "Raft node started");

        Ok(RaftNode {
            logger,
            client: RaftClient::new(my_replica_id, actor_client),
            rpc_server,
            event_listener: RaftEventListener::new(election_state_change_listener),
            stopper,
            ticker_tasks,
            actor_task,
        })
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.client.replica_id()
    }

    pub fn client(&self) -> RaftClient {
        self.client.clone()
    }

    /// The inbound side of this node, to be registered with whatever transport peers use.
    pub fn rpc_server(&self) -> RaftRpcServer {
        self.rpc_server.clone()
    }

    pub fn event_listener(&self) -> RaftEventListener {
        self.event_listener.clone()
    }

    /// Stops the tick tasks, then flushes durable state and exits the event loop. Clients of
    /// this node get `NodeStopped`/`ActorExited` from then on.
    pub async fn stop(self) {
        self.stopper.stop();
        for task in self.ticker_tasks {
            if let Err(e) = task.await {
                slog::warn!(self.logger, "Ticker task failed: {}", e);
            }
        }

        if self.client.shutdown().await.is_err() {
            slog::warn!(self.logger, "Replica event loop had already exited");
        }
        if let Err(e) = self.actor_task.await {
            slog::warn!(self.logger, "Replica event loop failed: {}", e);
        }
        slog::info!(self.logger, "Raft node stopped");
    }
}
