use crate::command::Command;
use crate::commitlog::Index;
use crate::replica::{
    AppendEntriesArgs, AppendEntriesReply, AppendEntriesReplyFromPeer, InstallSnapshotArgs, InstallSnapshotReply,
    NodeStatus, OutboundRpc, Replica, RequestVoteArgs, RequestVoteReply, RequestVoteReplyFromPeer, StateMachine,
    SubmitError, SubmittedCommand, Term, Tick,
};
use crate::transport::{RaftTransport, TransportError};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::{Duration, Instant};

// Design choice: Disk interaction is synchronous, inside the event loop. Every handler persists
// before it replies, so a reply never promises state that a crash could lose.
#[derive(Debug)]
pub(crate) enum Event {
    // Leader: Append to log, persist, register the result cell.
    // Candidate/Follower: Reject with leader hint.
    Submit(Command, Callback<Result<SubmittedCommand, SubmitError>>),

    // Server side of the raft RPCs, from a peer via the transport.
    RequestVote(RequestVoteArgs, Callback<RequestVoteReply>),
    AppendEntries(AppendEntriesArgs, Callback<AppendEntriesReply>),
    InstallSnapshot(InstallSnapshotArgs, Callback<InstallSnapshotReply>),

    // Client side of the raft RPCs: the peer's reply (or the failure to get one).
    RequestVoteReply(RequestVoteReplyFromPeer),
    AppendEntriesReply(AppendEntriesReplyFromPeer),

    Tick(Tick),

    Status(Callback<NodeStatus>),
    LogSummary(Callback<Vec<(Index, Term)>>),
    SaveSnapshot(Callback<bool>),

    // Flush and exit the event loop.
    Shutdown(Callback<()>),
}

pub(crate) struct Callback<T>(oneshot::Sender<T>);

impl<T> Callback<T> {
    pub(crate) fn send(self, message: T) {
        // The caller gave up waiting.
        let _ = self.0.send(message);
    }
}

impl<T> Debug for Callback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Callback")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("Replica event loop has exited")]
pub(crate) struct ActorExited;

/// ActorClient keeps the replica event loop alive and is the only way to talk to it.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// WeakActorClient is for background tasks, which shouldn't keep the event loop alive on their own.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn submit(&self, command: Command) -> Result<SubmittedCommand, SubmitError> {
        self.call(|cb| Event::Submit(command, cb))
            .await
            .map_err(|_| SubmitError::ActorExited)?
    }

    pub(crate) async fn status(&self) -> Result<NodeStatus, ActorExited> {
        self.call(Event::Status).await
    }

    pub(crate) async fn log_summary(&self) -> Result<Vec<(Index, Term)>, ActorExited> {
        self.call(Event::LogSummary).await
    }

    pub(crate) async fn save_snapshot(&self) -> Result<bool, ActorExited> {
        self.call(Event::SaveSnapshot).await
    }

    pub(crate) async fn shutdown(&self) -> Result<(), ActorExited> {
        self.call(Event::Shutdown).await
    }

    pub(crate) async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, ActorExited> {
        self.call(|cb| Event::RequestVote(args, cb)).await
    }

    pub(crate) async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply, ActorExited> {
        self.call(|cb| Event::AppendEntries(args, cb)).await
    }

    pub(crate) async fn install_snapshot(&self, args: InstallSnapshotArgs) -> Result<InstallSnapshotReply, ActorExited> {
        self.call(|cb| Event::InstallSnapshot(args, cb)).await
    }

    async fn call<T>(&self, event_fn: impl FnOnce(Callback<T>) -> Event) -> Result<T, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(event_fn(Callback(tx))).await?;
        rx.await.map_err(|_| ActorExited)
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        self.sender.send(event).await.map_err(|_| ActorExited)
    }
}

impl WeakActorClient {
    fn upgrade(&self) -> Result<ActorClient, ActorExited> {
        self.sender
            .upgrade()
            .map(|sender| ActorClient { sender })
            .ok_or(ActorExited)
    }

    pub(crate) async fn request_vote(&self, args: RequestVoteArgs) -> Result<RequestVoteReply, ActorExited> {
        self.upgrade()?.request_vote(args).await
    }

    pub(crate) async fn append_entries(&self, args: AppendEntriesArgs) -> Result<AppendEntriesReply, ActorExited> {
        self.upgrade()?.append_entries(args).await
    }

    pub(crate) async fn install_snapshot(&self, args: InstallSnapshotArgs) -> Result<InstallSnapshotReply, ActorExited> {
        self.upgrade()?.install_snapshot(args).await
    }

    pub(crate) async fn request_vote_reply(&self, reply: RequestVoteReplyFromPeer) -> Result<(), ActorExited> {
        self.upgrade()?.send(Event::RequestVoteReply(reply)).await
    }

    pub(crate) async fn append_entries_reply(&self, reply: AppendEntriesReplyFromPeer) -> Result<(), ActorExited> {
        self.upgrade()?.send(Event::AppendEntriesReply(reply)).await
    }

    pub(crate) async fn tick(&self, tick: Tick) -> Result<(), ActorExited> {
        self.upgrade()?.send(Event::Tick(tick)).await
    }
}

pub(crate) struct ReplicaActorConfig {
    pub logger: slog::Logger,
    pub transport: Arc<dyn RaftTransport>,
    pub rpc_timeout: Duration,
    pub rpc_worker_count: usize,
}

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<M: StateMachine> {
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    weak_self: WeakActorClient,
    replica: Replica<M>,
    transport: Arc<dyn RaftTransport>,
    // Bounds how many outbound RPCs are in flight at once.
    rpc_workers: Arc<Semaphore>,
    rpc_timeout: Duration,
}

impl<M: StateMachine> ReplicaActor<M> {
    pub(crate) fn new(
        config: ReplicaActorConfig,
        receiver: mpsc::Receiver<Event>,
        weak_self: WeakActorClient,
        replica: Replica<M>,
    ) -> Self {
        ReplicaActor {
            logger: config.logger,
            receiver,
            weak_self,
            replica,
            transport: config.transport,
            rpc_workers: Arc::new(Semaphore::new(config.rpc_worker_count)),
            rpc_timeout: config.rpc_timeout,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        // Covers the case where every client dropped without calling shutdown.
        self.replica.shutdown();
        slog::info!(self.logger, "Replica event loop exited");
    }

    // This must NOT be async. Any long running work must be spawned on another task
    // and/or come back as an event to this actor.
    //
    // Returns false when the loop should exit.
    fn handle_event(&mut self, event: Event) -> bool {
        let now = Instant::now();
        match event {
            Event::Submit(command, callback) => {
                callback.send(self.replica.handle_submit_command(command));
            }
            Event::RequestVote(args, callback) => {
                callback.send(self.replica.server_handle_request_vote(args, now));
            }
            Event::AppendEntries(args, callback) => {
                callback.send(self.replica.server_handle_append_entries(args, now));
            }
            Event::InstallSnapshot(args, callback) => {
                callback.send(self.replica.server_handle_install_snapshot(args, now));
            }
            Event::RequestVoteReply(reply) => {
                let rpcs = self.replica.handle_request_vote_reply_from_peer(reply, now);
                self.dispatch(rpcs);
            }
            Event::AppendEntriesReply(reply) => {
                self.replica.handle_append_entries_reply_from_peer(reply, now);
            }
            Event::Tick(Tick::Election) => {
                let rpcs = self.replica.handle_election_tick(now);
                self.dispatch(rpcs);
            }
            Event::Tick(Tick::Heartbeat) => {
                let rpcs = self.replica.handle_heartbeat_tick();
                self.dispatch(rpcs);
            }
            Event::Tick(Tick::Replication) => {
                let rpcs = self.replica.handle_replication_tick();
                self.dispatch(rpcs);
            }
            Event::Tick(Tick::Apply) => {
                self.replica.handle_apply_tick();
            }
            Event::Status(callback) => callback.send(self.replica.status()),
            Event::LogSummary(callback) => callback.send(self.replica.log_summary()),
            Event::SaveSnapshot(callback) => callback.send(self.replica.save_snapshot()),
            Event::Shutdown(callback) => {
                self.replica.shutdown();
                callback.send(());
                return false;
            }
        }

        true
    }

    /// Send each RPC on its own task. Replies come back to this actor as events.
    fn dispatch(&self, rpcs: Vec<OutboundRpc>) {
        for rpc in rpcs {
            let transport = self.transport.clone();
            let workers = self.rpc_workers.clone();
            let actor_client = self.weak_self.clone();
            let rpc_timeout = self.rpc_timeout;
            let logger = self.logger.clone();

            tokio::spawn(async move {
                let permit = match workers.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let sent = match rpc {
                    OutboundRpc::RequestVote { peer_id, args } => {
                        let request_term = args.term;
                        let result = tokio::time::timeout(rpc_timeout, transport.request_vote(peer_id, args))
                            .await
                            .unwrap_or(Err(TransportError::Timeout(peer_id)));
                        drop(permit);

                        actor_client
                            .request_vote_reply(RequestVoteReplyFromPeer {
                                peer_id,
                                request_term,
                                result,
                            })
                            .await
                    }
                    OutboundRpc::AppendEntries { descriptor, args } => {
                        let peer_id = descriptor.peer_id;
                        let result = tokio::time::timeout(rpc_timeout, transport.append_entries(peer_id, args))
                            .await
                            .unwrap_or(Err(TransportError::Timeout(peer_id)));
                        drop(permit);

                        actor_client
                            .append_entries_reply(AppendEntriesReplyFromPeer { descriptor, result })
                            .await
                    }
                };

                if sent.is_err() {
                    slog::debug!(logger, "Dropping peer reply; replica event loop has exited");
                }
            });
        }
    }
}
