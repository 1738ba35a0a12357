//! Per-origin append-only message log. Entries for an origin are always 1..=N with no gaps.

use std::collections::{BTreeMap, HashMap};

use crate::protocol::LogEntry;

#[derive(Debug, Default)]
pub struct MessageLog {
    entries: HashMap<String, Vec<Option<String>>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held for `origin`.
    pub fn count(&self, origin: &str) -> u32 {
        self.entries.get(origin).map_or(0, |v| v.len() as u32)
    }

    /// Sequence number this node expects next from `origin`.
    pub fn next_seqno(&self, origin: &str) -> u32 {
        self.count(origin) + 1
    }

    /// True if `seqno` is beyond what we hold for `origin`.
    pub fn is_new_entry(&self, origin: &str, seqno: u32) -> bool {
        seqno > self.count(origin)
    }

    /// True if `seqno` is exactly the next one for `origin`.
    pub fn is_next_entry(&self, origin: &str, seqno: u32) -> bool {
        seqno == self.next_seqno(origin)
    }

    /// Append an entry. Returns false (and leaves the log unchanged) unless it is the next one.
    pub fn append(&mut self, entry: &LogEntry) -> bool {
        if !self.is_next_entry(&entry.origin, entry.seqno) {
            return false;
        }
        self.entries
            .entry(entry.origin.clone())
            .or_default()
            .push(entry.text.clone());
        true
    }

    pub fn get(&self, origin: &str, seqno: u32) -> Option<LogEntry> {
        let index = usize::try_from(seqno.checked_sub(1)?).ok()?;
        let text = self.entries.get(origin)?.get(index)?;
        Some(LogEntry {
            origin: origin.to_string(),
            seqno,
            text: text.clone(),
        })
    }

    /// Entries for `origin` with seqno in `from..=count`.
    pub fn entries_from(&self, origin: &str, from: u32) -> Vec<LogEntry> {
        let from = from.max(1);
        (from..=self.count(origin))
            .filter_map(|n| self.get(origin, n))
            .collect()
    }

    /// Chat texts for `origin`, route entries skipped.
    pub fn texts(&self, origin: &str) -> Vec<&str> {
        self.entries
            .get(origin)
            .map(|v| v.iter().flatten().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Want vector: every origin with entries -> next expected seqno.
    pub fn want_vector(&self) -> BTreeMap<String, u32> {
        self.entries
            .iter()
            .map(|(o, v)| (o.clone(), v.len() as u32 + 1))
            .collect()
    }
}
