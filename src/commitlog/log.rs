use crate::command::Command;
use crate::replica::Term;
use std::fmt;

/// Index is the position of an entry in the log. Index 0 always holds the sentinel entry, so the
/// first real entry lives at index 1.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(u64);

impl Index {
    pub fn new(index: u64) -> Self {
        Index(index)
    }

    pub fn sentinel() -> Self {
        Index(0)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index(self.0 + delta)
    }

    pub fn saturating_minus(&self, delta: u64) -> Index {
        Index(self.0.saturating_sub(delta))
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub index: Index,
    pub term: Term,
    pub command: Command,
}

impl LogEntry {
    pub(crate) fn sentinel() -> Self {
        LogEntry {
            index: Index::sentinel(),
            term: Term::new(0),
            command: Command::Noop,
        }
    }
}

/// RaftLog is the in-memory copy of a replica's log. It is never empty: position 0 is a sentinel
/// entry with term 0, which makes `prevLogIndex = 0` match on every replica.
///
/// Invariant: `entries[i].index == i` for every `i`.
#[derive(Clone, Debug)]
pub(crate) struct RaftLog {
    entries: Vec<LogEntry>,
}

impl RaftLog {
    pub(crate) fn new() -> Self {
        RaftLog {
            entries: vec![LogEntry::sentinel()],
        }
    }

    /// Rebuild from restored entries. Returns None when the positional invariant doesn't hold.
    pub(crate) fn from_entries(entries: Vec<LogEntry>) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        for (i, entry) in entries.iter().enumerate() {
            if entry.index.as_usize() != i {
                return None;
            }
        }
        if entries[0].term != Term::new(0) {
            return None;
        }

        Some(RaftLog { entries })
    }

    pub(crate) fn last_index(&self) -> Index {
        Index::new((self.entries.len() - 1) as u64)
    }

    pub(crate) fn last_term(&self) -> Term {
        self.entries[self.entries.len() - 1].term
    }

    pub(crate) fn latest_entry(&self) -> (Term, Index) {
        (self.last_term(), self.last_index())
    }

    pub(crate) fn read(&self, index: Index) -> Option<&LogEntry> {
        self.entries.get(index.as_usize())
    }

    pub(crate) fn term_at(&self, index: Index) -> Option<Term> {
        self.read(index).map(|entry| entry.term)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Append at the next index and return that index.
    pub(crate) fn append(&mut self, term: Term, command: Command) -> Index {
        let index = self.last_index().plus(1);
        self.entries.push(LogEntry { index, term, command });
        index
    }

    /// Append an entry produced by another replica's log. Panics if the index isn't the next one,
    /// because that means the caller is tracking positions wrong.
    pub(crate) fn append_entry(&mut self, entry: LogEntry) {
        assert_eq!(
            entry.index,
            self.last_index().plus(1),
            "Appended log entry to unexpected index."
        );
        self.entries.push(entry);
    }

    /// Remove the entry at `index` and everything after it. The sentinel is never removed.
    pub(crate) fn truncate(&mut self, index: Index) {
        assert!(index.as_u64() > 0, "Can't truncate the sentinel entry");
        self.entries.truncate(index.as_usize());
    }

    /// Clone every entry strictly after `index`.
    pub(crate) fn entries_after(&self, index: Index) -> Vec<LogEntry> {
        self.entries
            .get(index.as_usize() + 1..)
            .map(|suffix| suffix.to_vec())
            .unwrap_or_default()
    }

    /// First index of the run of equal terms that contains `index`.
    pub(crate) fn first_index_of_term_run(&self, index: Index) -> Index {
        let term = match self.term_at(index) {
            Some(term) => term,
            None => return index,
        };
        let mut i = index.as_usize();
        while i > 0 && self.entries[i - 1].term == term {
            i -= 1;
        }

        Index::new(i as u64)
    }

    pub(crate) fn last_index_of_term(&self, term: Term) -> Option<Index> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.term == term)
            .map(|entry| entry.index)
    }
}
