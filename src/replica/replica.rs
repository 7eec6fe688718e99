use crate::command::{ApplyError, Command, CommandResult};
use crate::commitlog::{DurableState, Index, LogEntry, RaftLog, RaftStorage, StorageError};
use crate::replica::election::{ElectionConfig, ElectionState, PeerStateUpdate};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::peers::{ClusterTracker, ReplicaId};
use crate::replica::replica_api::{
    AppendEntriesArgs, AppendEntriesReply, AppendEntriesReplyFromPeer, AppendEntriesReplyFromPeerDescriptor,
    InstallSnapshotArgs, InstallSnapshotReply, NodeStatus, OutboundRpc, RequestVoteArgs, RequestVoteReply,
    RequestVoteReplyFromPeer, Role, SubmitError, SubmittedCommand,
};
use crate::replica::{ElectionStateChangeListener, StateMachine};
use std::cmp;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

pub(crate) struct ReplicaConfig<M: StateMachine> {
    pub logger: slog::Logger,
    pub cluster_tracker: ClusterTracker,
    pub storage: Arc<RaftStorage>,
    pub state_machine: M,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
}

/// Replica is the raft algorithm for one node. Every method runs to completion without awaiting;
/// the actor owning it is what serializes handlers, ticks, and replies against each other.
/// Methods that need to talk to peers return the RPCs to send instead of sending them.
pub(crate) struct Replica<M: StateMachine> {
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    cluster_tracker: ClusterTracker,
    storage: Arc<RaftStorage>,
    // Term, vote, and log. Flushed to `storage` before replying whenever `dirty`.
    durable: DurableState,
    dirty: bool,
    election_state: ElectionState,
    commit_index: Index,
    applied_index: Index,
    state_machine: M,
    // Results the local leader handed out, keyed by log index.
    pending: HashMap<Index, PendingCommand>,
}

struct PendingCommand {
    term: Term,
    result: CommandResult,
}

impl<M: StateMachine> Replica<M> {
    pub(crate) fn new(config: ReplicaConfig<M>, now: Instant) -> (Self, ElectionStateChangeListener) {
        let my_replica_id = config.cluster_tracker.my_replica_id();
        let durable = config.storage.restore();
        let (election_state, listener) = ElectionState::new_follower(
            ElectionConfig {
                my_replica_id,
                election_timeout_min: config.election_timeout_min,
                election_timeout_max: config.election_timeout_max,
            },
            now,
        );

        let replica = Replica {
            logger: config.logger,
            my_replica_id,
            cluster_tracker: config.cluster_tracker,
            storage: config.storage,
            durable,
            dirty: false,
            election_state,
            commit_index: Index::sentinel(),
            applied_index: Index::sentinel(),
            state_machine: config.state_machine,
            pending: HashMap::new(),
        };

        (replica, listener)
    }

    // ------- Client facing --------

    pub(crate) fn handle_submit_command(&mut self, command: Command) -> Result<SubmittedCommand, SubmitError> {
        if !self.election_state.is_leader() {
            return Err(SubmitError::NotLeader {
                term: self.durable.current_term(),
                leader_hint: self.election_state.current_leader(),
            });
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let term = self.durable.current_term();
        let index = self.durable.log.append(term, command);
        self.dirty = true;
        if let Err(e) = self.persist() {
            // Never acknowledged, so it must not count towards a majority either.
            self.durable.log.truncate(index);
            return Err(SubmitError::Persistence(e.to_string()));
        }

        let result = CommandResult::new();
        self.pending.insert(
            index,
            PendingCommand {
                term,
                result: result.clone(),
            },
        );
        slog::debug!(self.logger, "Accepted command at index {:?}, term {:?}", index, term);

        // A lone replica is its own majority.
        self.try_advance_commit_index();

        Ok(SubmittedCommand { term, index, result })
    }

    pub(crate) fn is_leader(&self) -> (bool, Term) {
        (self.election_state.is_leader(), self.durable.current_term())
    }

    pub(crate) fn status(&self) -> NodeStatus {
        let (last_log_term, last_log_index) = self.durable.log.latest_entry();
        NodeStatus {
            id: self.my_replica_id,
            role: self.election_state.role(),
            term: self.durable.current_term(),
            leader: self.election_state.current_leader(),
            commit_index: self.commit_index,
            applied_index: self.applied_index,
            last_log_index,
            last_log_term,
        }
    }

    pub(crate) fn log_summary(&self) -> Vec<(Index, Term)> {
        self.durable.log.iter().map(|entry| (entry.index, entry.term)).collect()
    }

    /// Snapshots aren't taken yet; the log is kept whole.
    pub(crate) fn save_snapshot(&mut self) -> bool {
        slog::debug!(self.logger, "Snapshot requested. Log is retained in full.");
        true
    }

    pub(crate) fn shutdown(&mut self) {
        match self.storage.flush(&self.durable) {
            Ok(()) => self.dirty = false,
            Err(e) => slog::error!(self.logger, "Failed final flush of raft state: {}", e),
        }
    }

    // ------- Server handlers --------

    pub(crate) fn server_handle_request_vote(&mut self, args: RequestVoteArgs, now: Instant) -> RequestVoteReply {
        // Ensure candidate is known member.
        if !self.cluster_tracker.contains_member(&args.candidate_id) {
            slog::warn!(self.logger, "RequestVote from unknown replica {:?}", args.candidate_id);
            return self.request_vote_reply(false);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        if args.term < self.durable.current_term() {
            slog::info!(self.logger, "Not granting vote. Client term is out of date.");
            return self.request_vote_reply(false);
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        self.observe_term(args.term, None, now);

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        let (_, opt_voted_for) = self.durable.voted_for_current_term();
        if let Some(voted_for) = opt_voted_for {
            if voted_for != args.candidate_id {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                let _ = self.persist();
                return self.request_vote_reply(false);
            }
        }

        if !self.is_candidate_log_gte_mine(args.last_log_term, args.last_log_index) {
            slog::info!(self.logger, "Not granting vote. Candidate log is out of date.");
            let _ = self.persist();
            return self.request_vote_reply(false);
        }

        let granted = self
            .durable
            .store_vote_for_term_if_unvoted(args.term, args.candidate_id);
        if granted {
            self.dirty = true;
        }
        // A vote only counts once it would survive a restart.
        if self.persist().is_err() {
            slog::warn!(self.logger, "Withholding vote for {:?}. Raft state isn't on disk.", args.candidate_id);
            return self.request_vote_reply(false);
        }
        if granted {
            slog::info!(self.logger, "Voting for {:?} in term {:?}.", args.candidate_id, args.term);
            self.election_state.reset_election_deadline(now);
        }

        self.request_vote_reply(granted)
    }

    fn request_vote_reply(&self, vote_granted: bool) -> RequestVoteReply {
        RequestVoteReply {
            term: self.durable.current_term(),
            vote_granted,
            leader_hint: self.election_state.current_leader(),
        }
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_term: Term, candidate_last_index: Index) -> bool {
        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        let (my_last_term, my_last_index) = self.durable.log.latest_entry();
        if candidate_last_term != my_last_term {
            return candidate_last_term > my_last_term;
        }

        candidate_last_index >= my_last_index
    }

    pub(crate) fn server_handle_append_entries(&mut self, args: AppendEntriesArgs, now: Instant) -> AppendEntriesReply {
        if !self.cluster_tracker.contains_member(&args.leader_id) {
            slog::warn!(self.logger, "AppendEntries from unknown replica {:?}", args.leader_id);
            return self.append_entries_failure(None);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        if args.term < self.durable.current_term() {
            return self.append_entries_failure(None);
        }

        // Self-addressed calls are no-ops.
        if args.leader_id == self.my_replica_id {
            return self.append_entries_success();
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        if !self.observe_term(args.term, Some(args.leader_id), now) {
            match self.election_state.role() {
                Role::Leader => {
                    slog::error!(
                        self.logger,
                        "Two leaders in term {:?}: me and {:?}. Rejecting.",
                        args.term,
                        args.leader_id
                    );
                    return self.append_entries_failure(None);
                }
                // > If AppendEntries RPC received from new leader: convert to follower
                Role::Candidate => self.election_state.transition_to_follower(Some(args.leader_id)),
                Role::Follower => self.election_state.set_leader_if_unknown(args.leader_id),
            }
        }
        self.election_state.reset_election_deadline(now);

        // 2. Reply false if [my] log doesn't contain an entry at [leader's]
        // prevLogIndex whose term matches [leader's] prevLogTerm (§5.3)
        match self.durable.log.term_at(args.prev_log_index) {
            None => {
                let _ = self.persist();
                return self.append_entries_failure(None);
            }
            Some(my_prev_term) if my_prev_term != args.prev_log_term => {
                let _ = self.persist();
                let conflict_index = self.durable.log.first_index_of_term_run(args.prev_log_index);
                return self.append_entries_failure(Some((my_prev_term, conflict_index)));
            }
            Some(_) => {}
        }

        // 3. If [my] existing entry conflicts with [leader's new entries]
        // (same index but different terms), delete [my] existing entry and
        // all that follow it (§5.3)
        // 4. Append any new entries not already in the log
        let num_new_entries = args.entries.len();
        let mut next_entry_index = args.prev_log_index.plus(1);
        for new_entry in args.entries {
            match self.durable.log.term_at(next_entry_index) {
                Some(existing_term) if existing_term == new_entry.term => {
                    // 4. (no-op)
                }
                existing => {
                    if existing.is_some() {
                        // 3. (delete)
                        slog::info!(self.logger, "Truncating conflicting log suffix from {:?}", next_entry_index);
                        self.durable.log.truncate(next_entry_index);
                        self.fail_pending_from(next_entry_index);
                    }
                    // 4. (append)
                    self.durable.log.append_entry(LogEntry {
                        index: next_entry_index,
                        term: new_entry.term,
                        command: new_entry.command,
                    });
                    self.dirty = true;
                }
            }
            next_entry_index = next_entry_index.plus(1);
        }

        // The leader counts our ack towards commitment, so it waits for the disk.
        if self.persist().is_err() {
            return self.append_entries_failure(None);
        }

        // 5. If leaderCommit > commitIndex, set commitIndex = min(leaderCommit, index of last new entry)
        let index_of_last_new_entry = args.prev_log_index.plus(num_new_entries as u64);
        let new_commit_index = cmp::min(args.leader_commit, index_of_last_new_entry);
        if new_commit_index > self.commit_index {
            slog::debug!(self.logger, "Follower commit index {:?}", new_commit_index);
            self.commit_index = new_commit_index;
        }

        self.append_entries_success()
    }

    fn append_entries_success(&self) -> AppendEntriesReply {
        AppendEntriesReply {
            term: self.durable.current_term(),
            success: true,
            leader_hint: self.election_state.current_leader(),
            conflict_index: self.durable.log.last_index().plus(1),
            conflict_term: None,
        }
    }

    /// `conflict` is the term found at prevLogIndex and the first index of its run. None means
    /// our log is too short (or the request was rejected before looking at the log).
    fn append_entries_failure(&self, conflict: Option<(Term, Index)>) -> AppendEntriesReply {
        let (conflict_term, conflict_index) = match conflict {
            Some((term, index)) => (Some(term), index),
            None => (None, self.durable.log.last_index().plus(1)),
        };

        AppendEntriesReply {
            term: self.durable.current_term(),
            success: false,
            leader_hint: self.election_state.current_leader(),
            conflict_index,
            conflict_term,
        }
    }

    /// Accepted and acknowledged, but snapshots don't carry state yet.
    pub(crate) fn server_handle_install_snapshot(
        &mut self,
        args: InstallSnapshotArgs,
        now: Instant,
    ) -> InstallSnapshotReply {
        if args.term < self.durable.current_term() {
            return InstallSnapshotReply {
                term: self.durable.current_term(),
                success: false,
            };
        }
        self.observe_term(args.term, Some(args.leader_id), now);
        if !self.election_state.is_leader() {
            self.election_state.reset_election_deadline(now);
        }

        InstallSnapshotReply {
            term: self.durable.current_term(),
            success: self.persist().is_ok(),
        }
    }

    // ------- Replies from peers --------

    pub(crate) fn handle_request_vote_reply_from_peer(
        &mut self,
        reply: RequestVoteReplyFromPeer,
        now: Instant,
    ) -> Vec<OutboundRpc> {
        let result = match reply.result {
            Ok(result) => result,
            Err(e) => {
                // The next election timeout retries.
                slog::debug!(self.logger, "RequestVote to {:?} failed: {}", reply.peer_id, e);
                return Vec::new();
            }
        };

        if self.observe_term(result.term, None, now) {
            slog::info!(self.logger, "Peer {:?} has newer term {:?}. Stepping down.", reply.peer_id, result.term);
            let _ = self.persist();
            return Vec::new();
        }

        let current_term = self.durable.current_term();
        if current_term != reply.request_term {
            slog::info!(
                self.logger,
                "Received vote for outdated term {:?}, current term: {:?}.",
                reply.request_term,
                current_term,
            );
            return Vec::new();
        }

        if !result.vote_granted {
            slog::info!(
                self.logger,
                "Vote not granted from {:?} for term {:?}",
                reply.peer_id,
                reply.request_term,
            );
            return Vec::new();
        }

        let num_votes_received = match self.election_state.add_vote_if_candidate(reply.peer_id) {
            Some(v) => v,
            None => {
                slog::debug!(
                    self.logger,
                    "Received vote for term {:?} after transitioning to election state: {:?}",
                    reply.request_term,
                    self.election_state,
                );
                return Vec::new();
            }
        };

        let num_voting_replicas = self.cluster_tracker.num_voting_replicas();
        slog::info!(
            self.logger,
            "Received {}/{} votes for term {:?}",
            num_votes_received,
            num_voting_replicas,
            reply.request_term,
        );

        if num_votes_received >= Self::get_majority_vote_count(num_voting_replicas) {
            return self.become_leader();
        }

        Vec::new()
    }

    fn get_majority_vote_count(num_voting_replicas: usize) -> usize {
        (num_voting_replicas / 2) + 1
    }

    fn become_leader(&mut self) -> Vec<OutboundRpc> {
        self.election_state
            .transition_to_leader(self.cluster_tracker.peer_ids(), self.durable.log.last_index());
        slog::info!(
            self.logger,
            "Elected leader for term {:?}. Last log index {:?}.",
            self.durable.current_term(),
            self.durable.log.last_index()
        );

        // Assert leadership right away instead of waiting for the heartbeat tick.
        self.handle_heartbeat_tick()
    }

    pub(crate) fn handle_append_entries_reply_from_peer(&mut self, reply: AppendEntriesReplyFromPeer, now: Instant) {
        let descriptor = reply.descriptor;
        let logger = self.logger.new(slog::o!(
            "Peer" => format!("{:?}", descriptor.peer_id),
            "SeqNo" => format!("{:?}", descriptor.seq_no)
        ));

        let peer_log_update = match reply.result {
            Err(e) => {
                slog::debug!(logger, "AE failure: {}", e);
                PeerStateUpdate::OtherError
            }
            Ok(result) => {
                if self.observe_term(result.term, None, now) {
                    slog::info!(logger, "Rejected by peer because my term is stale. Transitioned to follower.");
                    let _ = self.persist();
                    return;
                }
                if result.success {
                    PeerStateUpdate::Success {
                        prev_log_index: descriptor.prev_log_index,
                        num_entries: descriptor.num_entries,
                    }
                } else {
                    let new_cursor = Self::rewind_target(&self.durable.log, descriptor.prev_log_index, &result);
                    slog::info!(
                        logger,
                        "Peer rejected prev index {:?} (conflict term {:?}, index {:?}). Rewinding to {:?}.",
                        descriptor.prev_log_index,
                        result.conflict_term,
                        result.conflict_index,
                        new_cursor
                    );
                    PeerStateUpdate::Rewind {
                        failed_prev_log_index: descriptor.prev_log_index,
                        new_cursor,
                    }
                }
            }
        };

        if self.durable.current_term() != descriptor.term {
            slog::info!(
                logger,
                "Received AE reply for outdated term {:?}, but we're on term {:?}",
                descriptor.term,
                self.durable.current_term()
            );
            return;
        }

        match self.election_state.leader_state_mut() {
            None => slog::info!(logger, "No longer leader"),
            Some(leader_state) => match leader_state.peer_state_mut(&descriptor.peer_id) {
                None => slog::warn!(logger, "Peer {:?} not found while handling AE reply", descriptor.peer_id),
                Some(peer_state) => {
                    peer_state.handle_append_entries_result(&logger, descriptor.seq_no, peer_log_update)
                }
            },
        }

        self.try_advance_commit_index();
    }

    /// Where to probe next after a peer rejected `failed_prev_log_index`. Always strictly below
    /// the failed probe so the leader makes progress.
    fn rewind_target(log: &RaftLog, failed_prev_log_index: Index, reply: &AppendEntriesReply) -> Index {
        let hinted = match reply.conflict_term.and_then(|term| log.last_index_of_term(term)) {
            // We have entries from the follower's conflicting term; resume after our last one.
            Some(last_index_of_conflict_term) => last_index_of_conflict_term,
            // Skip the follower's whole conflicting run, or jump to the end of its shorter log.
            None => reply.conflict_index.saturating_minus(1),
        };

        cmp::min(hinted, failed_prev_log_index.saturating_minus(1))
    }

    fn try_advance_commit_index(&mut self) {
        let leader_state = match self.election_state.leader_state() {
            Some(ls) => ls,
            None => return,
        };

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        // See also:
        // > Figure 8: A time sequence showing why a leader cannot determine
        // > commitment using log entries from older terms.
        let peers_matched_index: Vec<_> = leader_state.peers_iter().map(|peer_state| peer_state.matched()).collect();
        let tentative_new_commit_index = if peers_matched_index.is_empty() {
            self.durable.log.last_index()
        } else {
            Self::get_cluster_commit_index(peers_matched_index)
        };

        if tentative_new_commit_index <= self.commit_index {
            return;
        }
        let current_term = self.durable.current_term();
        if self.durable.log.term_at(tentative_new_commit_index) != Some(current_term) {
            slog::debug!(
                self.logger,
                "Majority has {:?}, but it isn't from current term {:?}. Not committing yet.",
                tentative_new_commit_index,
                current_term
            );
            return;
        }

        slog::debug!(self.logger, "Leader commit index {:?}", tentative_new_commit_index);
        self.commit_index = tentative_new_commit_index;
    }

    fn get_cluster_commit_index(mut peers_matched_indexes: Vec<Index>) -> Index {
        peers_matched_indexes.sort();

        // Overview of why algo is correct:
        // We are always at the tail of the array, because our log is same/longest.
        // 1. add "me"
        //let cluster_size = peers_matched_indexes.len() + 1;
        // 2. calculate majority
        //let majority = (cluster_size / 2) + 1;
        // 3. subtract "me"
        //let num_peers_to_achieve_majority = majority - 1;
        // 4. take `i`th index from the right
        //let quorum_idx = peers_matched_indexes.len() - num_peers_to_achieve_majority;

        // Or just use this simplified equation which is harder to understand at a glance why it
        // works. When in doubt, just read the unit tests.
        let quorum_idx = peers_matched_indexes.len() / 2;

        peers_matched_indexes.remove(quorum_idx)
    }

    // ------- Background ticks --------

    pub(crate) fn handle_election_tick(&mut self, now: Instant) -> Vec<OutboundRpc> {
        if self.election_state.is_leader() || !self.election_state.election_deadline_passed(now) {
            return Vec::new();
        }

        // Write-ahead style: vote for self on local state before transitioning to candidate.
        let new_term = self.durable.increment_term_and_vote_for_self(self.my_replica_id);
        self.dirty = true;
        self.election_state.transition_to_candidate_and_vote_for_self();
        self.election_state.reset_election_deadline(now);
        slog::info!(
            self.logger,
            "Election timeout. Changed to candidate for term {:?}. Election state: {:?}",
            new_term,
            self.election_state,
        );
        if self.persist().is_err() {
            // The next election timeout retries with a fresh term.
            return Vec::new();
        }

        if Self::get_majority_vote_count(self.cluster_tracker.num_voting_replicas()) <= 1 {
            return self.become_leader();
        }

        let (last_log_term, last_log_index) = self.durable.log.latest_entry();
        self.cluster_tracker
            .peer_ids()
            .map(|peer_id| OutboundRpc::RequestVote {
                peer_id,
                args: RequestVoteArgs {
                    term: new_term,
                    candidate_id: self.my_replica_id,
                    last_log_index,
                    last_log_term,
                },
            })
            .collect()
    }

    /// Empty AppendEntries to every peer, probing at each peer's cursor.
    pub(crate) fn handle_heartbeat_tick(&mut self) -> Vec<OutboundRpc> {
        let current_term = self.durable.current_term();
        let leader_state = match self.election_state.leader_state() {
            Some(ls) => ls,
            None => return Vec::new(),
        };

        let mut rpcs = Vec::new();
        for peer_id in self.cluster_tracker.peer_ids() {
            let cursor = match leader_state.peer_state(&peer_id) {
                Some(peer_state) => peer_state.cursor(),
                None => continue,
            };
            let prev_log_term = match self.durable.log.term_at(cursor) {
                Some(term) => term,
                None => {
                    slog::error!(self.logger, "Cursor {:?} for {:?} is past the end of my log", cursor, peer_id);
                    continue;
                }
            };

            rpcs.push(OutboundRpc::AppendEntries {
                descriptor: AppendEntriesReplyFromPeerDescriptor {
                    peer_id,
                    term: current_term,
                    seq_no: None,
                    prev_log_index: cursor,
                    num_entries: 0,
                },
                args: AppendEntriesArgs {
                    term: current_term,
                    leader_id: self.my_replica_id,
                    prev_log_index: cursor,
                    prev_log_term,
                    entries: Vec::new(),
                    leader_commit: self.commit_index,
                    is_heartbeat: true,
                },
            });
        }

        rpcs
    }

    /// > If last log index ≥ nextIndex for a follower: send
    /// > AppendEntries RPC with log entries starting at nextIndex
    ///
    /// At most one replication request per peer is in flight; heartbeats aren't counted.
    pub(crate) fn handle_replication_tick(&mut self) -> Vec<OutboundRpc> {
        let current_term = self.durable.current_term();
        let my_replica_id = self.my_replica_id;
        let commit_index = self.commit_index;
        let log = &self.durable.log;
        let last_log_index = log.last_index();
        let leader_state = match self.election_state.leader_state_mut() {
            Some(ls) => ls,
            None => return Vec::new(),
        };

        let mut rpcs = Vec::new();
        for peer_id in self.cluster_tracker.peer_ids() {
            let peer_state = match leader_state.peer_state_mut(&peer_id) {
                Some(peer_state) => peer_state,
                None => continue,
            };
            let cursor = peer_state.cursor();
            if cursor >= last_log_index || peer_state.has_outstanding_request() {
                continue;
            }
            let prev_log_term = match log.term_at(cursor) {
                Some(term) => term,
                None => continue,
            };

            let entries = log.entries_after(cursor);
            let seq_no = peer_state.next_seq_no();
            rpcs.push(OutboundRpc::AppendEntries {
                descriptor: AppendEntriesReplyFromPeerDescriptor {
                    peer_id,
                    term: current_term,
                    seq_no: Some(seq_no),
                    prev_log_index: cursor,
                    num_entries: entries.len(),
                },
                args: AppendEntriesArgs {
                    term: current_term,
                    leader_id: my_replica_id,
                    prev_log_index: cursor,
                    prev_log_term,
                    entries,
                    leader_commit: commit_index,
                    is_heartbeat: false,
                },
            });
        }

        self.try_advance_commit_index();
        rpcs
    }

    /// > If commitIndex > lastApplied: increment lastApplied, apply
    /// > log[lastApplied] to state machine (§5.3)
    pub(crate) fn handle_apply_tick(&mut self) {
        while self.applied_index < self.commit_index {
            let index = self.applied_index.plus(1);
            let entry = match self.durable.log.read(index) {
                Some(entry) => entry,
                None => {
                    slog::error!(self.logger, "Committed index {:?} is missing from the log", index);
                    return;
                }
            };

            let outcome = self.state_machine.apply_command(&entry.command);
            self.applied_index = index;

            if let Some(pending) = self.pending.remove(&index) {
                if pending.term == entry.term {
                    pending.result.complete(outcome);
                } else {
                    pending.result.complete(Err(ApplyError::Superseded { index }));
                }
            }
        }
    }

    // ------- Helpers --------

    /// Adopt `term` if it is newer than ours: clear the vote, become follower, and restart the
    /// election clock. Returns true if the term increased.
    fn observe_term(&mut self, term: Term, leader: Option<ReplicaId>, now: Instant) -> bool {
        if !self.durable.store_term_if_increased(term) {
            return false;
        }

        self.dirty = true;
        self.election_state.transition_to_follower(leader);
        self.election_state.reset_election_deadline(now);
        slog::info!(
            self.logger,
            "Observed newer term {:?}. Election state: {:?}",
            term,
            self.election_state
        );
        true
    }

    fn fail_pending_from(&mut self, truncated_from: Index) {
        let superseded: Vec<Index> = self
            .pending
            .keys()
            .filter(|index| **index >= truncated_from)
            .copied()
            .collect();
        for index in superseded {
            if let Some(pending) = self.pending.remove(&index) {
                pending.result.complete(Err(ApplyError::Superseded { index }));
            }
        }
    }

    /// Flush term, vote, and log if they changed. On failure the state stays dirty and the
    /// caller must not promise anything that depends on it.
    fn persist(&mut self) -> Result<(), StorageError> {
        if !self.dirty {
            return Ok(());
        }
        match self.storage.flush(&self.durable) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to persist raft state: {}", e);
                Err(e)
            }
        }
    }
}
