use crate::command::CommandResult;
use crate::commitlog::{Index, LogEntry};
use crate::replica::local_state::Term;
use crate::replica::peers::ReplicaId;
use crate::transport::TransportError;
use bytes::Bytes;

// ------- Peer RPCs --------

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteArgs {
    pub term: Term,
    pub candidate_id: ReplicaId,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
    pub leader_hint: Option<ReplicaId>,
}

/// AppendEntries carries new entries, or none at all when the leader only sends a heartbeat.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesArgs {
    pub term: Term,
    pub leader_id: ReplicaId,
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: Index,
    pub is_heartbeat: bool,
}

/// On failure, `conflict_index` is the first index the leader should resend and `conflict_term`
/// is the term of the follower's entry at `prev_log_index` (None if the follower's log is
/// shorter than that).
#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
    pub leader_hint: Option<ReplicaId>,
    pub conflict_index: Index,
    pub conflict_term: Option<Term>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstallSnapshotArgs {
    pub term: Term,
    pub leader_id: ReplicaId,
    pub last_included_index: Index,
    pub last_included_term: Term,
    pub data: Bytes,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstallSnapshotReply {
    pub term: Term,
    pub success: bool,
}

// ------- Client submission --------

/// A command the leader accepted into its log. `result` completes once the entry is applied.
#[derive(Debug)]
pub struct SubmittedCommand {
    pub term: Term,
    pub index: Index,
    pub result: CommandResult,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SubmitError {
    #[error("I'm not leader. Current term {term:?}, last known leader {leader_hint:?}")]
    NotLeader { term: Term, leader_hint: Option<ReplicaId> },
    #[error("Failed to persist the new entry: {0}")]
    Persistence(String),
    #[error("Replica actor is dead RIP")]
    ActorExited,
}

// ------- Introspection --------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeStatus {
    pub id: ReplicaId,
    pub role: Role,
    pub term: Term,
    pub leader: Option<ReplicaId>,
    pub commit_index: Index,
    pub applied_index: Index,
    pub last_log_index: Index,
    pub last_log_term: Term,
}

// ------- Internal: replies coming back from peers --------

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer_id: ReplicaId,
    pub(crate) request_term: Term,
    pub(crate) result: Result<RequestVoteReply, TransportError>,
}

/// What the leader needs to remember about an AppendEntries request to interpret its reply.
#[derive(Clone, Debug)]
pub(crate) struct AppendEntriesReplyFromPeerDescriptor {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    // None for heartbeats, which aren't sequenced.
    pub(crate) seq_no: Option<u64>,
    pub(crate) prev_log_index: Index,
    pub(crate) num_entries: usize,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeer {
    pub(crate) descriptor: AppendEntriesReplyFromPeerDescriptor,
    pub(crate) result: Result<AppendEntriesReply, TransportError>,
}

/// An RPC the replica wants sent. The actor dispatches these so that replica logic stays
/// synchronous.
#[derive(Debug)]
pub(crate) enum OutboundRpc {
    RequestVote {
        peer_id: ReplicaId,
        args: RequestVoteArgs,
    },
    AppendEntries {
        descriptor: AppendEntriesReplyFromPeerDescriptor,
        args: AppendEntriesArgs,
    },
}
