use crate::message::LogEntry;

/// The replicated log. Index 0 is always the sentinel entry (L1); terms are
/// non-decreasing along the log (L2).
#[derive(Debug, Clone)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new(self_id: &str) -> Self {
        Log {
            entries: vec![LogEntry::sentinel(self_id)],
        }
    }

    pub fn last_index(&self) -> u64 {
        (self.entries.len() - 1) as u64
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().expect("sentinel always present").term
    }

    pub fn term_at(&self, index: u64) -> Option<u64> {
        self.entries.get(index as usize).map(|e| e.term)
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false // the sentinel is always present
    }

    /// Entries at `[from, from + limit)`, used to build an AppendEntries
    /// batch.
    pub fn slice_from(&self, from: u64, limit: usize) -> Vec<LogEntry> {
        let start = from as usize;
        if start >= self.entries.len() {
            return Vec::new();
        }
        let end = (start + limit).min(self.entries.len());
        self.entries[start..end].to_vec()
    }

    /// Append a brand-new entry at the tail (leader only).
    pub fn append(&mut self, entry: LogEntry) -> u64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Follower-side conflict resolution and append.
    ///
    /// Walks the local log from `prev_log_index + 1`, truncating at the
    /// first position where it runs out of local entries or the terms
    /// disagree, then appends whatever of `new_entries` lies beyond the
    /// (possibly truncated) tail. Returns the index of the last entry now
    /// covered by this call (`prev_log_index + new_entries.len()`).
    pub fn reconcile(&mut self, prev_log_index: u64, new_entries: &[LogEntry]) -> u64 {
        let mut i = (prev_log_index + 1) as usize;
        let mut j = 0usize;
        while j < new_entries.len() {
            match self.entries.get(i) {
                Some(existing) if existing.term == new_entries[j].term => {
                    // Entries match; Log Matching (L3) guarantees the rest
                    // of the fields match too. Nothing to do at this index.
                }
                _ => {
                    self.entries.truncate(i);
                    self.entries.extend_from_slice(&new_entries[j..]);
                    break;
                }
            }
            i += 1;
            j += 1;
        }
        prev_log_index + new_entries.len() as u64
    }
}
