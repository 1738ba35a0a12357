//! Rumor mongering: push new log entries one at a time to random peers, wait for a
//! status as acknowledgment, resend to another peer on timeout.

use std::collections::VecDeque;
use std::net::SocketAddr;

use rand::Rng;

use crate::peer::PeerDirectory;
use crate::protocol::{LogEntry, Rumor};

/// The single rumor awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub target: SocketAddr,
    pub rumor: Rumor,
    /// Tick at which the rumor is resent if no status arrived.
    pub deadline: u64,
    pub resends: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MongerState {
    Idle,
    Mongering(InFlight),
}

/// Send decision for the host to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Route rumor: one copy to every peer, no acknowledgment tracked.
    Flood(Rumor),
    Send(SocketAddr, Rumor),
}

/// Result of checking the rumor timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutOutcome {
    Pending,
    Resend(SocketAddr, Rumor),
    /// Resend cap reached; the rumor was dropped.
    Abandoned(Rumor),
}

pub struct RumorMonger {
    state: MongerState,
    queue: VecDeque<Rumor>,
    timeout_ticks: u64,
    max_resends: Option<u32>,
}

impl RumorMonger {
    pub fn new(timeout_ticks: u64, max_resends: Option<u32>) -> Self {
        Self {
            state: MongerState::Idle,
            queue: VecDeque::new(),
            timeout_ticks: timeout_ticks.max(1),
            max_resends,
        }
    }

    pub fn state(&self) -> &MongerState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, MongerState::Idle)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queue a newly accepted entry behind the one in flight.
    pub fn enqueue(&mut self, rumor: Rumor) {
        self.queue.push_back(rumor);
    }

    /// While idle, pop queued rumors and start sending them. Entries rejected by
    /// `accept` are discarded. With no peers the head of the queue waits.
    pub fn drain<R: Rng>(
        &mut self,
        peers: &PeerDirectory,
        rng: &mut R,
        now: u64,
        mut accept: impl FnMut(&LogEntry) -> bool,
    ) -> Vec<Dispatch> {
        let mut out = Vec::new();
        while self.is_idle() {
            let Some(head) = self.queue.front() else {
                break;
            };
            if !accept(&head.entry) {
                self.queue.pop_front();
                continue;
            }
            if head.entry.is_route() {
                if let Some(rumor) = self.queue.pop_front() {
                    out.push(Dispatch::Flood(rumor));
                }
                continue;
            }
            let Some(target) = peers.random_peer(rng) else {
                break;
            };
            if let Some(rumor) = self.queue.pop_front() {
                out.push(self.start(target, rumor, now));
            }
        }
        out
    }

    fn start(&mut self, target: SocketAddr, rumor: Rumor, now: u64) -> Dispatch {
        self.state = MongerState::Mongering(InFlight {
            target,
            rumor: rumor.clone(),
            deadline: now + self.timeout_ticks,
            resends: 0,
        });
        Dispatch::Send(target, rumor)
    }

    /// Any status ends the current round. Returns the rumor that was in flight.
    pub fn on_status(&mut self, from: SocketAddr) -> Option<Rumor> {
        match std::mem::replace(&mut self.state, MongerState::Idle) {
            MongerState::Idle => None,
            MongerState::Mongering(inflight) => {
                if inflight.target != from {
                    tracing::trace!(%from, awaited = %inflight.target, "status from other peer ends round");
                }
                Some(inflight.rumor)
            }
        }
    }

    /// Resend to a new random peer once the deadline passes.
    pub fn on_tick<R: Rng>(&mut self, peers: &PeerDirectory, rng: &mut R, now: u64) -> TimeoutOutcome {
        let MongerState::Mongering(inflight) = &mut self.state else {
            return TimeoutOutcome::Pending;
        };
        if now < inflight.deadline {
            return TimeoutOutcome::Pending;
        }
        if self.max_resends.is_some_and(|max| inflight.resends >= max) {
            let rumor = inflight.rumor.clone();
            self.state = MongerState::Idle;
            tracing::debug!(origin = %rumor.entry.origin, seqno = rumor.entry.seqno, "rumor abandoned after resend cap");
            return TimeoutOutcome::Abandoned(rumor);
        }
        let Some(target) = peers.random_peer_except(rng, inflight.target) else {
            return TimeoutOutcome::Pending;
        };
        inflight.target = target;
        inflight.deadline = now + self.timeout_ticks;
        inflight.resends += 1;
        TimeoutOutcome::Resend(target, inflight.rumor.clone())
    }

    /// Coin-flip continuation: monger `previous` to a fresh random peer if idle.
    pub fn resume<R: Rng>(
        &mut self,
        previous: Rumor,
        peers: &PeerDirectory,
        rng: &mut R,
        now: u64,
    ) -> Option<Dispatch> {
        if !self.is_idle() {
            return None;
        }
        let target = peers.random_peer(rng)?;
        Some(self.start(target, previous, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dir_with(ports: &[u16]) -> PeerDirectory {
        let mut dir = PeerDirectory::new();
        for p in ports {
            dir.find_or_add_peer(SocketAddr::from(([127, 0, 0, 1], *p)));
        }
        dir
    }

    fn chat(seqno: u32) -> Rumor {
        Rumor::direct(LogEntry::chat("me", seqno, format!("m{seqno}")))
    }

    #[test]
    fn one_rumor_in_flight_at_a_time() {
        let dir = dir_with(&[1, 2, 3]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut m = RumorMonger::new(1, None);
        m.enqueue(chat(1));
        m.enqueue(chat(2));
        let out = m.drain(&dir, &mut rng, 0, |_| true);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Dispatch::Send(_, r) if r.entry.seqno == 1));
        assert_eq!(m.queue_len(), 1);
        assert!(m.drain(&dir, &mut rng, 0, |_| true).is_empty());
    }

    #[test]
    fn status_returns_to_idle_and_unblocks_queue() {
        let dir = dir_with(&[1, 2]);
        let mut rng = StdRng::seed_from_u64(4);
        let mut m = RumorMonger::new(1, None);
        m.enqueue(chat(1));
        m.enqueue(chat(2));
        let target = match &m.drain(&dir, &mut rng, 0, |_| true)[0] {
            Dispatch::Send(t, _) => *t,
            other => panic!("unexpected {other:?}"),
        };
        let prev = m.on_status(target).unwrap();
        assert_eq!(prev.entry.seqno, 1);
        assert!(m.is_idle());
        let out = m.drain(&dir, &mut rng, 0, |_| true);
        assert!(matches!(&out[0], Dispatch::Send(_, r) if r.entry.seqno == 2));
    }

    #[test]
    fn route_rumors_flood_without_occupying_slot() {
        let dir = dir_with(&[1]);
        let mut rng = StdRng::seed_from_u64(5);
        let mut m = RumorMonger::new(1, None);
        m.enqueue(Rumor::direct(LogEntry::route("me", 1)));
        m.enqueue(chat(2));
        let out = m.drain(&dir, &mut rng, 0, |_| true);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Dispatch::Flood(_)));
        assert!(matches!(out[1], Dispatch::Send(..)));
    }

    #[test]
    fn rejected_entries_are_discarded() {
        let dir = dir_with(&[1]);
        let mut rng = StdRng::seed_from_u64(6);
        let mut m = RumorMonger::new(1, None);
        m.enqueue(Rumor::direct(LogEntry::chat("other", 1, "x")));
        let out = m.drain(&dir, &mut rng, 0, |e| e.origin == "me");
        assert!(out.is_empty());
        assert_eq!(m.queue_len(), 0);
    }

    #[test]
    fn no_peers_keeps_rumor_queued() {
        let empty = PeerDirectory::new();
        let mut rng = StdRng::seed_from_u64(7);
        let mut m = RumorMonger::new(1, None);
        m.enqueue(chat(1));
        assert!(m.drain(&empty, &mut rng, 0, |_| true).is_empty());
        assert_eq!(m.queue_len(), 1);
        let dir = dir_with(&[9]);
        assert_eq!(m.drain(&dir, &mut rng, 1, |_| true).len(), 1);
    }

    #[test]
    fn timeout_resends_to_different_peer() {
        let dir = dir_with(&[1, 2]);
        let mut rng = StdRng::seed_from_u64(8);
        let mut m = RumorMonger::new(1, None);
        m.enqueue(chat(1));
        let first = match &m.drain(&dir, &mut rng, 10, |_| true)[0] {
            Dispatch::Send(t, _) => *t,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(m.on_tick(&dir, &mut rng, 10), TimeoutOutcome::Pending);
        match m.on_tick(&dir, &mut rng, 11) {
            TimeoutOutcome::Resend(t, r) => {
                assert_ne!(t, first);
                assert_eq!(r.entry.seqno, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(m.state(), MongerState::Mongering(f) if f.resends == 1 && f.deadline == 12));
    }

    #[test]
    fn resend_cap_abandons_rumor() {
        let dir = dir_with(&[1, 2]);
        let mut rng = StdRng::seed_from_u64(9);
        let mut m = RumorMonger::new(1, Some(2));
        m.enqueue(chat(1));
        m.drain(&dir, &mut rng, 0, |_| true);
        assert!(matches!(m.on_tick(&dir, &mut rng, 1), TimeoutOutcome::Resend(..)));
        assert!(matches!(m.on_tick(&dir, &mut rng, 2), TimeoutOutcome::Resend(..)));
        assert!(matches!(m.on_tick(&dir, &mut rng, 3), TimeoutOutcome::Abandoned(_)));
        assert!(m.is_idle());
    }

    #[test]
    fn resume_only_when_idle() {
        let dir = dir_with(&[1, 2]);
        let mut rng = StdRng::seed_from_u64(10);
        let mut m = RumorMonger::new(1, None);
        assert!(matches!(m.resume(chat(1), &dir, &mut rng, 0), Some(Dispatch::Send(..))));
        assert!(m.resume(chat(2), &dir, &mut rng, 0).is_none());
        assert!(m.resume(chat(2), &PeerDirectory::new(), &mut rng, 0).is_none());
    }
}
