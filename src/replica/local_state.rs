use crate::commitlog::DurableState;
use crate::replica::peers::ReplicaId;
use std::fmt;

#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct Term(u64);

impl Term {
    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState covers the term/vote transitions the raft algorithm requires to be
/// durable before the replica answers anyone. Each store method is CAS-like and returns true if
/// it mutated state; the caller flushes afterwards.
pub(crate) trait PersistentLocalState {
    /// Set current term to `new_term` iff it is larger than the current term. Clears the vote.
    fn store_term_if_increased(&mut self, new_term: Term) -> bool;

    /// Record `vote` iff the current term is `expected_current_term` and we haven't voted in it
    /// yet, or already voted for `vote` (a retried request).
    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: ReplicaId) -> bool;

    /// Used when becoming candidate. Returns the new term.
    fn increment_term_and_vote_for_self(&mut self, my_replica_id: ReplicaId) -> Term;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<ReplicaId>);
}

impl PersistentLocalState for DurableState {
    fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        if new_term <= self.current_term {
            return false;
        }
        self.current_term = new_term;
        self.voted_for = None;
        true
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: ReplicaId) -> bool {
        if expected_current_term != self.current_term {
            return false;
        }
        match self.voted_for {
            None => {
                self.voted_for.replace(vote);
                true
            }
            Some(existing) => existing == vote,
        }
    }

    fn increment_term_and_vote_for_self(&mut self, my_replica_id: ReplicaId) -> Term {
        self.current_term.incr();
        self.voted_for.replace(my_replica_id);
        self.current_term
    }

    fn current_term(&self) -> Term {
        self.current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<ReplicaId>) {
        (self.current_term, self.voted_for)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_increase_clears_vote() {
        let mut state = DurableState::empty();
        assert!(state.store_vote_for_term_if_unvoted(Term::new(0), ReplicaId::new(2)));
        assert!(!state.store_term_if_increased(Term::new(0)));
        assert!(state.store_term_if_increased(Term::new(3)));
        assert_eq!(state.voted_for_current_term(), (Term::new(3), None));
    }

    #[test]
    fn one_vote_per_term() {
        let mut state = DurableState::empty();
        state.store_term_if_increased(Term::new(1));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(2), ReplicaId::new(2)));
        assert!(state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new(2)));
        assert!(state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new(2)));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new(3)));
    }

    #[test]
    fn candidate_votes_for_self() {
        let mut state = DurableState::empty();
        let term = state.increment_term_and_vote_for_self(ReplicaId::new(1));
        assert_eq!(term, Term::new(1));
        assert_eq!(state.voted_for_current_term(), (Term::new(1), Some(ReplicaId::new(1))));
    }
}
