//! Host-driven API: RumorCore receives events from the host, returns actions.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::chunk::{FileRecord, FileStore};
use crate::config::CoreConfig;
use crate::identity::{self, OriginError};
use crate::integrity;
use crate::log::MessageLog;
use crate::peer::{AddPeer, PeerAddrError, PeerDirectory, RouteUpdate};
use crate::protocol::{BlockHash, LogEntry, Message, Rumor};
use crate::rumor::{Dispatch, RumorMonger, TimeoutOutcome};
use crate::search::{self, Search, SearchTick};
use crate::status;
use crate::transfer::{BlockOutcome, Download, RetransmitOutcome, TransferFailure, TransferState};
use crate::wire::{self, FrameDecodeError};

/// Main coordinator. Host passes events; core returns actions.
pub struct RumorCore {
    config: CoreConfig,
    origin: String,
    log: MessageLog,
    directory: PeerDirectory,
    monger: RumorMonger,
    search: Option<Search>,
    download: Option<Download>,
    files: FileStore,
    rng: StdRng,
    tick_count: u64,
    next_anti_entropy: u64,
    next_route_rumor: u64,
}

impl RumorCore {
    pub fn new(config: CoreConfig) -> Result<Self, OriginError> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic peer choices, for tests and simulations.
    pub fn with_seed(config: CoreConfig, seed: u64) -> Result<Self, OriginError> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: CoreConfig, rng: StdRng) -> Result<Self, OriginError> {
        let origin = identity::resolve_origin(config.origin.as_deref())?;
        Ok(Self {
            monger: RumorMonger::new(config.rumor_timeout_ticks, config.max_rumor_resends),
            next_anti_entropy: config.anti_entropy_ticks.max(1),
            next_route_rumor: config.route_rumor_ticks.max(1),
            config,
            origin,
            log: MessageLog::new(),
            directory: PeerDirectory::new(),
            search: None,
            download: None,
            files: FileStore::new(),
            rng,
            tick_count: 0,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn directory(&self) -> &PeerDirectory {
        &self.directory
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn search(&self) -> Option<&Search> {
        self.search.as_ref()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn transfer_state(&self) -> TransferState {
        self.download
            .as_ref()
            .map_or(TransferState::Idle, Download::state)
    }

    /// Our bound socket address. Forwarding hints naming it are ignored, and peers
    /// outside its address family are refused.
    pub fn set_local_addr(&mut self, addr: SocketAddr) {
        self.directory.set_local_addr(addr);
    }

    /// Another address this node is reachable at, such as a LAN interface.
    pub fn add_local_alias(&mut self, addr: SocketAddr) {
        self.directory.add_local_alias(addr);
    }

    /// User or config asked for a peer (`host:port`). Hostnames come back as `ResolveHost`.
    pub fn add_peer(&mut self, spec: &str) -> Result<Vec<OutboundAction>, PeerAddrError> {
        Ok(match self.directory.add_peer_by_address_or_hostname(spec)? {
            AddPeer::Added(addr) => {
                tracing::info!(%addr, "peer added");
                self.drain()
            }
            AddPeer::Lookup { host, port } => vec![OutboundAction::ResolveHost { host, port }],
            AddPeer::AlreadyKnown(_) | AddPeer::LookupPending => Vec::new(),
        })
    }

    /// Host finished resolving a hostname from a `ResolveHost` action.
    pub fn on_host_resolved(
        &mut self,
        host: &str,
        result: Result<Vec<IpAddr>, String>,
    ) -> Vec<OutboundAction> {
        let added = self.directory.on_host_resolved(host, result);
        if added.is_empty() {
            return Vec::new();
        }
        for addr in &added {
            tracing::info!(host, %addr, "peer added");
        }
        self.drain()
    }

    /// Hash and index a file so it can be found and downloaded.
    pub fn share_file(&mut self, path: &str, content: &[u8]) -> &FileRecord {
        let record = self.files.share(path, content);
        tracing::info!(
            path,
            size = record.size,
            blocks = record.block_hashes.len(),
            top = %integrity::short_hex(&record.top_hash),
            "sharing file"
        );
        record
    }

    /// Append a chat entry under our origin and start mongering it.
    pub fn send_chat(&mut self, text: impl Into<String>) -> Vec<OutboundAction> {
        self.originate(Some(text.into()))
    }

    /// Announce ourselves so other nodes learn a route to this origin.
    pub fn originate_route_rumor(&mut self) -> Vec<OutboundAction> {
        self.originate(None)
    }

    fn originate(&mut self, text: Option<String>) -> Vec<OutboundAction> {
        let entry = LogEntry {
            origin: self.origin.clone(),
            seqno: self.log.next_seqno(&self.origin),
            text,
        };
        self.log.append(&entry);
        self.monger.enqueue(Rumor::direct(entry));
        self.drain()
    }

    /// Point-to-point chat along the routing table. Dropped when no route is known.
    pub fn send_private(&mut self, dest: &str, text: impl Into<String>) -> Vec<OutboundAction> {
        let msg = Message::Private {
            origin: self.origin.clone(),
            dest: dest.to_string(),
            hop_limit: self.config.hop_limit,
            text: text.into(),
        };
        let mut out = Vec::new();
        self.route_to(dest, &msg, &mut out);
        out
    }

    /// Replace any outstanding search. Requests go out from the next search tick.
    pub fn start_search(&mut self, query: impl Into<String>) {
        let search = Search::new(query, self.tick_count, self.config.search_tick_ticks);
        tracing::info!(query = search.query(), "search started");
        self.search = Some(search);
    }

    /// Download a file found by the current search.
    pub fn start_download(&mut self, filename: &str) -> Result<Vec<OutboundAction>, TransferError> {
        let hit = self
            .search
            .as_ref()
            .and_then(|s| s.result(filename))
            .cloned()
            .ok_or_else(|| TransferError::UnknownFile(filename.to_string()))?;
        Ok(self.fetch(filename, &hit.origin, hit.top_hash))
    }

    /// Download the file with top-level hash `top_hash` from `uploader`, superseding
    /// any download in progress.
    pub fn fetch(&mut self, filename: &str, uploader: &str, top_hash: BlockHash) -> Vec<OutboundAction> {
        let download = Download::start(
            filename,
            uploader,
            top_hash,
            self.tick_count,
            self.config.block_retransmit_ticks,
            self.config.max_block_retransmits,
        );
        if let Some(old) = self.download.replace(download) {
            tracing::debug!(filename = old.filename(), "download superseded");
        }
        let mut out = Vec::new();
        self.request_block(uploader, top_hash, &mut out);
        out
    }

    /// Process a received datagram. Undecodable or unrecognized datagrams are an error
    /// the host should log and drop.
    pub fn on_datagram(&mut self, from: SocketAddr, bytes: &[u8]) -> Result<Vec<OutboundAction>, MessageError> {
        let msg = wire::decode_datagram(bytes)?;
        Ok(self.on_message(from, msg))
    }

    pub fn on_message(&mut self, from: SocketAddr, msg: Message) -> Vec<OutboundAction> {
        self.directory.find_or_add_peer(from);
        match msg {
            Message::Rumor(rumor) => self.on_rumor(from, rumor),
            Message::Status { want } => self.on_status(from, &want),
            Message::SearchRequest { origin, query, budget } => {
                self.on_search_request(origin, query, budget)
            }
            addressed => self.on_addressed(addressed),
        }
    }

    fn on_rumor(&mut self, from: SocketAddr, rumor: Rumor) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        let Rumor { entry, last_hop } = rumor;
        if let Some(hint) = last_hop {
            self.directory.find_or_add_peer(hint);
        }
        if entry.origin != self.origin {
            let update = self
                .directory
                .update_route(&entry.origin, from, entry.seqno, last_hop.is_none());
            if update == RouteUpdate::Created {
                out.push(OutboundAction::OriginDiscovered(entry.origin.clone()));
            }
        }
        if self.log.is_new_entry(&entry.origin, entry.seqno) {
            if self.log.append(&entry) {
                if let (Some(text), false) = (&entry.text, entry.origin == self.origin) {
                    out.push(OutboundAction::ChatReceived {
                        origin: entry.origin.clone(),
                        text: text.clone(),
                    });
                }
                self.monger.enqueue(Rumor::relayed(entry, from));
            } else {
                tracing::debug!(
                    origin = %entry.origin,
                    seqno = entry.seqno,
                    expected = self.log.next_seqno(&entry.origin),
                    "rumor out of order, waiting for anti-entropy"
                );
            }
        }
        self.send_status(from, &mut out);
        out.extend(self.drain());
        out
    }

    fn on_status(&mut self, from: SocketAddr, want: &BTreeMap<String, u32>) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        let previous = self.monger.on_status(from);
        let reconciliation = status::reconcile(&self.log, want, self.config.forwarding);
        if reconciliation.pull {
            self.send_status(from, &mut out);
        }
        for entry in &reconciliation.push {
            self.send(from, &Message::Rumor(Rumor::direct(entry.clone())), &mut out);
        }
        out.extend(self.drain());
        if reconciliation.is_in_sync() {
            if let Some(previous) = previous {
                if self.rng.gen_bool(0.5) {
                    let now = self.tick_count;
                    if let Some(dispatch) = self.monger.resume(previous, &self.directory, &mut self.rng, now) {
                        self.dispatch(dispatch, &mut out);
                    }
                }
            }
        }
        out
    }

    fn on_search_request(&mut self, origin: String, query: String, budget: u32) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        if origin == self.origin {
            return out;
        }
        let matches = self.files.find_matches(&query);
        if !matches.is_empty() {
            let reply = Message::SearchReply {
                dest: origin.clone(),
                origin: self.origin.clone(),
                hop_limit: self.config.hop_limit,
                query: query.clone(),
                match_names: matches.iter().map(|f| f.name().to_string()).collect(),
                match_hashes: matches.iter().map(|f| f.top_hash).collect(),
            };
            self.route_to(&origin, &reply, &mut out);
        }
        let shares = search::split_budget(budget.saturating_sub(1), self.directory.peers(), &mut self.rng);
        for (peer, budget) in shares {
            let forward = Message::SearchRequest {
                origin: origin.clone(),
                query: query.clone(),
                budget,
            };
            self.send(peer, &forward, &mut out);
        }
        out
    }

    fn on_addressed(&mut self, mut msg: Message) -> Vec<OutboundAction> {
        let mut out = Vec::new();
        let Some(dest) = msg.dest().map(str::to_string) else {
            return out;
        };
        if dest != self.origin {
            if !self.config.forwarding {
                tracing::debug!(%dest, kind = ?msg.kind(), "forwarding disabled, dropping");
                return out;
            }
            match msg.decrement_hop_limit() {
                Some(hops) if hops > 0 => {
                    self.route_to(&dest, &msg, &mut out);
                }
                _ => tracing::debug!(%dest, kind = ?msg.kind(), "hop limit exhausted, dropping"),
            }
            return out;
        }
        match msg {
            Message::Private { origin, text, .. } => {
                out.push(OutboundAction::PrivateReceived { origin, text });
            }
            Message::SearchReply {
                origin,
                query,
                match_names,
                match_hashes,
                ..
            } => {
                if let Some(search) = &mut self.search {
                    for filename in search.record_reply(&origin, &query, &match_names, &match_hashes) {
                        out.push(OutboundAction::SearchMatch {
                            filename,
                            origin: origin.clone(),
                        });
                    }
                }
            }
            Message::BlockRequest { origin, block_hash, .. } => {
                self.serve_block(&origin, block_hash, &mut out);
            }
            Message::BlockReply { block_hash, data, .. } => {
                self.on_block_reply(&block_hash, &data, &mut out);
            }
            _ => {}
        }
        out
    }

    fn serve_block(&self, requester: &str, block_hash: BlockHash, out: &mut Vec<OutboundAction>) {
        let Some(data) = self.files.lookup_block(&block_hash) else {
            tracing::debug!(requester, hash = %integrity::short_hex(&block_hash), "no such block");
            return;
        };
        let reply = Message::BlockReply {
            dest: requester.to_string(),
            origin: self.origin.clone(),
            hop_limit: self.config.hop_limit,
            block_hash,
            data,
        };
        self.route_to(requester, &reply, out);
    }

    fn on_block_reply(&mut self, claimed: &BlockHash, data: &[u8], out: &mut Vec<OutboundAction>) {
        let Some(download) = &mut self.download else {
            tracing::debug!(hash = %integrity::short_hex(claimed), "block reply with no download active");
            return;
        };
        let outcome = download.on_reply(claimed, data, self.tick_count);
        let uploader = download.uploader().to_string();
        let filename = download.filename().to_string();
        match outcome {
            BlockOutcome::Ignored => {
                tracing::debug!(%filename, hash = %integrity::short_hex(claimed), "unexpected or corrupt block ignored");
            }
            BlockOutcome::Request(next) => self.request_block(&uploader, next, out),
            BlockOutcome::Complete(data) => {
                self.download = None;
                tracing::info!(%filename, size = data.len(), "download complete");
                out.push(OutboundAction::TransferComplete { filename, data });
            }
            BlockOutcome::Malformed => {
                self.download = None;
                let reason = TransferFailure::MalformedMetafile;
                tracing::warn!(%filename, %reason, "download failed");
                out.push(OutboundAction::TransferFailed { filename, reason });
            }
        }
    }

    fn request_block(&self, uploader: &str, block_hash: BlockHash, out: &mut Vec<OutboundAction>) {
        let msg = Message::BlockRequest {
            dest: uploader.to_string(),
            origin: self.origin.clone(),
            hop_limit: self.config.hop_limit,
            block_hash,
        };
        self.route_to(uploader, &msg, out);
    }

    /// Periodic tick: anti-entropy, route rumor, rumor timeout, search and block retransmit timers.
    pub fn tick(&mut self) -> Vec<OutboundAction> {
        self.tick_count = self.tick_count.saturating_add(1);
        let now = self.tick_count;
        let mut out = Vec::new();

        if now >= self.next_anti_entropy {
            self.next_anti_entropy = now + self.config.anti_entropy_ticks.max(1);
            if let Some(peer) = self.directory.random_peer(&mut self.rng) {
                self.send_status(peer, &mut out);
            }
        }

        if now >= self.next_route_rumor {
            self.next_route_rumor = now + self.config.route_rumor_ticks.max(1);
            out.extend(self.originate_route_rumor());
        }

        match self.monger.on_tick(&self.directory, &mut self.rng, now) {
            TimeoutOutcome::Pending => {}
            TimeoutOutcome::Resend(to, rumor) => self.send(to, &Message::Rumor(rumor), &mut out),
            TimeoutOutcome::Abandoned(_) => {}
        }

        self.tick_search(now, &mut out);
        self.tick_download(now, &mut out);
        out.extend(self.drain());
        out
    }

    fn tick_search(&mut self, now: u64, out: &mut Vec<OutboundAction>) {
        let Some(search) = &mut self.search else {
            return;
        };
        let msg = match search.on_tick(now) {
            SearchTick::Wait => return,
            SearchTick::Stopped => {
                tracing::debug!(query = search.query(), matches = search.matches(), "search stopped");
                return;
            }
            SearchTick::Broadcast(budget) => Message::SearchRequest {
                origin: self.origin.clone(),
                query: search.query().to_string(),
                budget,
            },
        };
        for &peer in self.directory.peers() {
            self.send(peer, &msg, out);
        }
    }

    fn tick_download(&mut self, now: u64, out: &mut Vec<OutboundAction>) {
        let Some(download) = &mut self.download else {
            return;
        };
        match download.on_tick(now) {
            RetransmitOutcome::Wait => {}
            RetransmitOutcome::Resend(hash) => {
                let uploader = download.uploader().to_string();
                tracing::debug!(%uploader, hash = %integrity::short_hex(&hash), "retransmitting block request");
                self.request_block(&uploader, hash, out);
            }
            RetransmitOutcome::GiveUp => {
                let filename = download.filename().to_string();
                self.download = None;
                let reason = TransferFailure::RetransmitLimit;
                tracing::warn!(%filename, %reason, "download failed");
                out.push(OutboundAction::TransferFailed { filename, reason });
            }
        }
    }

    fn drain(&mut self) -> Vec<OutboundAction> {
        let origin = &self.origin;
        let forwarding = self.config.forwarding;
        let dispatches = self.monger.drain(&self.directory, &mut self.rng, self.tick_count, |entry| {
            forwarding || entry.is_route() || entry.origin == *origin
        });
        let mut out = Vec::new();
        for dispatch in dispatches {
            self.dispatch(dispatch, &mut out);
        }
        out
    }

    fn dispatch(&self, dispatch: Dispatch, out: &mut Vec<OutboundAction>) {
        match dispatch {
            Dispatch::Flood(rumor) => {
                let msg = Message::Rumor(rumor);
                for &peer in self.directory.peers() {
                    self.send(peer, &msg, out);
                }
            }
            Dispatch::Send(to, rumor) => self.send(to, &Message::Rumor(rumor), out),
        }
    }

    fn send_status(&self, to: SocketAddr, out: &mut Vec<OutboundAction>) {
        let msg = Message::Status {
            want: self.log.want_vector(),
        };
        self.send(to, &msg, out);
    }

    fn route_to(&self, dest: &str, msg: &Message, out: &mut Vec<OutboundAction>) {
        match self.directory.next_hop(dest) {
            Some(hop) => self.send(hop, msg, out),
            None => tracing::debug!(dest, kind = ?msg.kind(), "no route, dropping"),
        }
    }

    fn send(&self, to: SocketAddr, msg: &Message, out: &mut Vec<OutboundAction>) {
        match wire::encode_datagram(msg) {
            Ok(bytes) => out.push(OutboundAction::SendDatagram(to, bytes)),
            Err(e) => tracing::warn!(%to, kind = ?msg.kind(), error = %e, "message not sent"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to decode datagram: {0}")]
    Decode(#[from] FrameDecodeError),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransferError {
    #[error("no search result named {0:?}")]
    UnknownFile(String),
}

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    SendDatagram(SocketAddr, Vec<u8>),
    /// Resolve `host` and report back through `on_host_resolved`.
    ResolveHost { host: String, port: u16 },
    ChatReceived { origin: String, text: String },
    PrivateReceived { origin: String, text: String },
    /// A route to a previously unknown origin.
    OriginDiscovered(String),
    SearchMatch { filename: String, origin: String },
    TransferComplete { filename: String, data: Vec<u8> },
    TransferFailed { filename: String, reason: TransferFailure },
}
