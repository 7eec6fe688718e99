use std::collections::BTreeSet;
use std::fmt;

/// ReplicaId identifies a node in the cluster. It is persisted as a signed 32 bit integer, so ids
/// above `i32::MAX` can't be stored as a vote.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ReplicaId(u32);

impl ReplicaId {
    pub fn new(id: u32) -> Self {
        ReplicaId(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "replica-{}", self.0)
    }
}

/// ClusterTracker knows the fixed membership of the cluster and which member we are.
#[derive(Clone, Debug)]
pub(crate) struct ClusterTracker {
    my_replica_id: ReplicaId,
    members: BTreeSet<ReplicaId>,
}

impl ClusterTracker {
    /// Returns None if `my_replica_id` isn't one of `members`.
    pub(crate) fn new(my_replica_id: ReplicaId, members: impl IntoIterator<Item = ReplicaId>) -> Option<Self> {
        let members: BTreeSet<_> = members.into_iter().collect();
        if !members.contains(&my_replica_id) {
            return None;
        }

        Some(ClusterTracker { my_replica_id, members })
    }

    pub(crate) fn my_replica_id(&self) -> ReplicaId {
        self.my_replica_id
    }

    pub(crate) fn contains_member(&self, id: &ReplicaId) -> bool {
        self.members.contains(id)
    }

    pub(crate) fn num_voting_replicas(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn peer_ids(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        let me = self.my_replica_id;
        self.members.iter().copied().filter(move |id| *id != me)
    }
}
