mod election;
mod local_state;
mod peers;
mod replica;
mod replica_api;
mod state_machine;
mod timers;

pub use election::ElectionStateChangeListener;
pub use election::ElectionStateSnapshot;
pub use local_state::Term;
pub use peers::ReplicaId;
pub use replica_api::AppendEntriesArgs;
pub use replica_api::AppendEntriesReply;
pub use replica_api::InstallSnapshotArgs;
pub use replica_api::InstallSnapshotReply;
pub use replica_api::NodeStatus;
pub use replica_api::RequestVoteArgs;
pub use replica_api::RequestVoteReply;
pub use replica_api::Role;
pub use replica_api::SubmitError;
pub use replica_api::SubmittedCommand;
pub use state_machine::StateMachine;

pub(crate) use peers::ClusterTracker;
pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub(crate) use replica_api::AppendEntriesReplyFromPeer;
pub(crate) use replica_api::OutboundRpc;
pub(crate) use replica_api::RequestVoteReplyFromPeer;
pub(crate) use timers::new_stop_signal;
pub(crate) use timers::StopCheck;
pub(crate) use timers::Stopper;
pub(crate) use timers::Tick;
pub(crate) use timers::TickerTask;
