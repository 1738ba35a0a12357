//! Anti-entropy: compare a peer's want vector with our log.

use std::collections::BTreeMap;

use crate::log::MessageLog;
use crate::protocol::LogEntry;

/// What a received status asks of us.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// The peer has entries we lack: answer with our own status.
    pub pull: bool,
    /// Entries the peer lacks, in origin/seqno order.
    pub push: Vec<LogEntry>,
}

impl Reconciliation {
    /// Neither side needed anything.
    pub fn is_in_sync(&self) -> bool {
        !self.pull && self.push.is_empty()
    }
}

/// Compare `want` (origin -> next seqno the peer expects) against `log`.
/// Pushes for origins the peer already tracks only happen with `forwarding`;
/// origins missing from `want` are always pushed in full.
pub fn reconcile(log: &MessageLog, want: &BTreeMap<String, u32>, forwarding: bool) -> Reconciliation {
    let mut out = Reconciliation::default();
    for (origin, &their_next) in want {
        let my_next = log.next_seqno(origin);
        if my_next < their_next {
            out.pull = true;
        }
        if my_next > their_next && forwarding {
            out.push.extend(log.entries_from(origin, their_next));
        }
    }
    let mut missing: Vec<&str> = log.origins().filter(|o| !want.contains_key(*o)).collect();
    missing.sort_unstable();
    for origin in missing {
        out.push.extend(log.entries_from(origin, 1));
    }
    out
}
