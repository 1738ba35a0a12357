//! File search: expanding-budget flooding from the searcher, budget splitting at
//! each receiver, and a per-query result cache.

use std::collections::HashMap;
use std::net::SocketAddr;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::protocol::BlockHash;

pub const INITIAL_BUDGET: u32 = 2;
pub const MAX_BUDGET: u32 = 128;
/// The search keeps expanding while at most this many matches are known.
pub const MAX_MATCHES: u32 = 10;

/// Where to download a search hit from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub top_hash: BlockHash,
    pub origin: String,
}

/// What the search timer asks for on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchTick {
    /// Timer not due (or already stopped).
    Wait,
    /// Send a request carrying this budget to every peer.
    Broadcast(u32),
    /// Cap reached; the timer is now disarmed.
    Stopped,
}

/// The one outstanding query and its results.
#[derive(Debug)]
pub struct Search {
    query: String,
    budget: u32,
    matches: u32,
    results: HashMap<String, SearchResult>,
    armed: bool,
    interval: u64,
    next_tick: u64,
}

impl Search {
    pub fn new(query: impl Into<String>, now: u64, interval: u64) -> Self {
        let interval = interval.max(1);
        Self {
            query: query.into(),
            budget: INITIAL_BUDGET,
            matches: 0,
            results: HashMap::new(),
            armed: true,
            interval,
            next_tick: now + interval,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn matches(&self) -> u32 {
        self.matches
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn result(&self, filename: &str) -> Option<&SearchResult> {
        self.results.get(filename)
    }

    pub fn results(&self) -> impl Iterator<Item = (&str, &SearchResult)> {
        self.results.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn on_tick(&mut self, now: u64) -> SearchTick {
        if !self.armed || now < self.next_tick {
            return SearchTick::Wait;
        }
        if self.budget >= MAX_BUDGET || self.matches > MAX_MATCHES {
            self.armed = false;
            return SearchTick::Stopped;
        }
        self.budget = self.budget.saturating_mul(2).min(MAX_BUDGET);
        self.next_tick = now + self.interval;
        SearchTick::Broadcast(self.budget)
    }

    /// Record a reply for the outstanding query. Returns the filenames not seen before.
    pub fn record_reply(
        &mut self,
        uploader: &str,
        query: &str,
        names: &[String],
        hashes: &[BlockHash],
    ) -> Vec<String> {
        if query != self.query {
            return Vec::new();
        }
        let mut fresh = Vec::new();
        for (name, hash) in names.iter().zip(hashes) {
            if self.results.contains_key(name) {
                continue;
            }
            self.matches += 1;
            self.results.insert(
                name.clone(),
                SearchResult {
                    top_hash: *hash,
                    origin: uploader.to_string(),
                },
            );
            fresh.push(name.clone());
        }
        fresh
    }
}

/// Split `remaining` budget (what is left after the local lookup) over `peers`.
///
/// Fewer units than peers: that many distinct random peers get 1 each.
/// Otherwise every peer gets `remaining / k`, and `remaining % k` random peers get
/// one more. No peer receives two copies and the budgets sent sum to `remaining`.
pub fn split_budget<R: Rng>(remaining: u32, peers: &[SocketAddr], rng: &mut R) -> Vec<(SocketAddr, u32)> {
    let k = peers.len() as u32;
    if remaining == 0 || k == 0 {
        return Vec::new();
    }
    if remaining < k {
        return peers
            .choose_multiple(rng, remaining as usize)
            .map(|p| (*p, 1))
            .collect();
    }
    let base = remaining / k;
    let extra = (remaining % k) as usize;
    let mut order: Vec<SocketAddr> = peers.to_vec();
    order.shuffle(rng);
    order
        .into_iter()
        .enumerate()
        .map(|(i, p)| (p, if i < extra { base + 1 } else { base }))
        .collect()
}
