use crate::commitlog::Index;
use crate::replica::ReplicaId;
use std::collections::HashMap;

pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<ReplicaId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new(peer_ids: impl Iterator<Item = ReplicaId>, leader_last_log_index: Index) -> Self {
        let peer_state = peer_ids
            .map(|peer_id| (peer_id, PeerState::new(leader_last_log_index)))
            .collect();

        LeaderStateTracker { peer_state }
    }

    pub(crate) fn peer_state(&self, peer_id: &ReplicaId) -> Option<&PeerState> {
        self.peer_state.get(peer_id)
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &ReplicaId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peers_iter(&self) -> impl Iterator<Item = &PeerState> {
        self.peer_state.values()
    }
}

pub(crate) struct PeerState {
    // Where the next AppendEntries probes: the leader's guess at the peer's last matching index.
    // Only moves forward on success, and backward on a conflict hint.
    cursor: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Index,

    // SeqNo is a logical clock over one leader term's replication requests to this peer. Each
    // request gets the next SeqNo; a reply older than one already received is discarded.
    // Heartbeats are not sequenced.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
}

impl PeerState {
    fn new(leader_last_log_index: Index) -> Self {
        PeerState {
            cursor: leader_last_log_index,
            matched: Index::sentinel(),
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
        }
    }

    pub(crate) fn cursor(&self) -> Index {
        self.cursor
    }

    pub(crate) fn matched(&self) -> Index {
        self.matched
    }

    pub(crate) fn handle_append_entries_result(
        &mut self,
        logger: &slog::Logger,
        received_seq_no: Option<u64>,
        update: PeerStateUpdate,
    ) {
        if let Some(seq_no) = received_seq_no {
            if !self.ratchet_fwd_received_seq_no(seq_no) {
                slog::warn!(logger, "Dropping out of date seq-no({:?}): {:?}", seq_no, update);
                return;
            }
        }

        match update {
            PeerStateUpdate::OtherError => { /* No action */ }
            PeerStateUpdate::Success {
                prev_log_index,
                num_entries,
            } => self.update_log(prev_log_index, num_entries),
            PeerStateUpdate::Rewind {
                failed_prev_log_index,
                new_cursor,
            } => self.rewind_log(logger, failed_prev_log_index, new_cursor),
        }
    }

    fn update_log(&mut self, prev_log_index: Index, num_entries: usize) {
        let confirmed = prev_log_index.plus(num_entries as u64);
        if confirmed > self.matched {
            self.matched = confirmed;
        }
        if confirmed > self.cursor {
            self.cursor = confirmed;
        }
    }

    fn rewind_log(&mut self, logger: &slog::Logger, failed_prev_log_index: Index, new_cursor: Index) {
        // The peer rejected a probe we've since moved past; the rejection no longer applies.
        if failed_prev_log_index != self.cursor {
            slog::debug!(
                logger,
                "Ignoring stale rewind. Probe={:?}, Cursor={:?}",
                failed_prev_log_index,
                self.cursor
            );
            return;
        }

        // Don't panic here, because peer could return garbage data.
        if new_cursor < self.matched {
            slog::warn!(
                logger,
                "Peer asked to rewind to {:?} below its confirmed match {:?}. Clamping.",
                new_cursor,
                self.matched
            );
            self.cursor = self.matched;
            return;
        }

        self.cursor = new_cursor;
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    /// returns true if the state was mutated.
    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub(crate) enum PeerStateUpdate {
    Success {
        prev_log_index: Index,
        num_entries: usize,
    },
    Rewind {
        failed_prev_log_index: Index,
        new_cursor: Index,
    },
    OtherError,
}
