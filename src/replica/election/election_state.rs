use crate::commitlog::Index;
use crate::replica::election::state_change_listener::{self, ElectionStateChangeNotifier};
use crate::replica::election::LeaderStateTracker;
use crate::replica::{ElectionStateChangeListener, ElectionStateSnapshot, ReplicaId, Role};
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;
use tokio::time::{Duration, Instant};

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_replica_id: ReplicaId,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
}

/// ElectionState is responsible for holding state specific to the stage in an election. Its
/// methods are responsible for "what" to do. It is NOT responsible for validating anything
/// specific to logs, terms, peers, etc. or knowing "when" to do something.
pub(crate) struct ElectionState {
    state: State,
    my_replica_id: ReplicaId,
    timeout_range: RangeInclusive<Duration>,
    election_deadline: Instant,
    state_change_notifier: ElectionStateChangeNotifier,
}

impl ElectionState {
    /// `new_follower()` creates a new ElectionState instance that starts out as a follower with
    /// a fresh election deadline.
    pub(crate) fn new_follower(config: ElectionConfig, now: Instant) -> (Self, ElectionStateChangeListener) {
        let initial_state = State::Follower(FollowerState { leader: None });
        let (notifier, listener) = state_change_listener::new(Self::current_state_impl(&initial_state));

        let mut election_state = Self {
            state: initial_state,
            my_replica_id: config.my_replica_id,
            timeout_range: RangeInclusive::new(config.election_timeout_min, config.election_timeout_max),
            election_deadline: now,
            state_change_notifier: notifier,
        };
        election_state.reset_election_deadline(now);

        (election_state, listener)
    }

    pub(crate) fn transition_to_follower(&mut self, new_leader: Option<ReplicaId>) {
        self.state = State::Follower(FollowerState { leader: new_leader });
        self.notify_new_state();
    }

    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self) {
        let mut cs = CandidateState {
            received_votes_from: HashSet::with_capacity(3),
        };

        // Vote for self
        cs.add_received_vote(self.my_replica_id);

        self.state = State::Candidate(cs);
        self.notify_new_state();
    }

    pub(crate) fn transition_to_leader(
        &mut self,
        peer_ids: impl Iterator<Item = ReplicaId>,
        leader_last_log_index: Index,
    ) {
        self.state = State::Leader(LeaderState {
            tracker: LeaderStateTracker::new(peer_ids, leader_last_log_index),
        });
        self.notify_new_state();
    }

    fn current_state_impl(state: &State) -> ElectionStateSnapshot {
        match state {
            State::Leader(_) => ElectionStateSnapshot::Leader,
            State::Candidate(_) => ElectionStateSnapshot::Candidate,
            State::Follower(FollowerState { leader: None }) => ElectionStateSnapshot::FollowerNoLeader,
            State::Follower(FollowerState { leader: Some(leader) }) => ElectionStateSnapshot::Follower(*leader),
        }
    }

    fn notify_new_state(&self) {
        self.state_change_notifier
            .notify_new_state(Self::current_state_impl(&self.state));
    }

    pub(crate) fn role(&self) -> Role {
        match self.state {
            State::Leader(_) => Role::Leader,
            State::Candidate(_) => Role::Candidate,
            State::Follower(_) => Role::Follower,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    /// Who we believe leads the current term, including ourselves.
    pub(crate) fn current_leader(&self) -> Option<ReplicaId> {
        match &self.state {
            State::Leader(_) => Some(self.my_replica_id),
            State::Candidate(_) => None,
            State::Follower(fs) => fs.leader,
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, leader: ReplicaId) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader.replace(leader);
                self.notify_new_state();
            }
        }
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: ReplicaId) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            Some(cs.add_received_vote(vote_from))
        } else {
            None
        }
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderStateTracker> {
        if let State::Leader(ls) = &self.state {
            Some(&ls.tracker)
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(ls) = &mut self.state {
            Some(&mut ls.tracker)
        } else {
            None
        }
    }

    pub(crate) fn reset_election_deadline(&mut self, now: Instant) {
        let rand_timeout = rand::thread_rng().gen_range(self.timeout_range.clone());
        self.election_deadline = now + rand_timeout;
    }

    pub(crate) fn election_deadline_passed(&self, now: Instant) -> bool {
        now >= self.election_deadline
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(cs) => write!(f, "Candidate(Votes={})", cs.received_votes_from.len()),
            State::Follower(FollowerState { leader: Some(leader) }) => write!(f, "Follower(Leader={:?})", leader),
            State::Follower(FollowerState { leader: None }) => write!(f, "Follower(Leader=None)"),
        }
    }
}

enum State {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct LeaderState {
    tracker: LeaderStateTracker,
}

struct CandidateState {
    received_votes_from: HashSet<ReplicaId>,
}

struct FollowerState {
    leader: Option<ReplicaId>,
}

impl CandidateState {
    /// `add_received_vote()` returns the number of unique votes we've received after adding the
    /// provided `vote_from`
    fn add_received_vote(&mut self, vote_from: ReplicaId) -> usize {
        self.received_votes_from.insert(vote_from);
        self.received_votes_from.len()
    }
}
