//! Rumor wire protocol: message kinds as an explicit tagged union.

use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Hop limit stamped on every addressed message this node authors.
pub const DEFAULT_HOP_LIMIT: u32 = 10;

/// Content hash of a block or a metafile (20 bytes).
pub type BlockHash = [u8; 20];

/// One entry of a per-origin log. `text == None` is a route rumor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub origin: String,
    pub seqno: u32,
    pub text: Option<String>,
}

impl LogEntry {
    pub fn chat(origin: impl Into<String>, seqno: u32, text: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            seqno,
            text: Some(text.into()),
        }
    }

    pub fn route(origin: impl Into<String>, seqno: u32) -> Self {
        Self {
            origin: origin.into(),
            seqno,
            text: None,
        }
    }

    pub fn is_route(&self) -> bool {
        self.text.is_none()
    }
}

/// A log entry in transit, optionally stamped with the address of the node that relayed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rumor {
    pub entry: LogEntry,
    /// Forwarding hint (lastIp, lastPort). `None` means the sender sent it directly.
    pub last_hop: Option<SocketAddr>,
}

impl Rumor {
    pub fn direct(entry: LogEntry) -> Self {
        Self {
            entry,
            last_hop: None,
        }
    }

    pub fn relayed(entry: LogEntry, via: SocketAddr) -> Self {
        Self {
            entry,
            last_hop: Some(via),
        }
    }
}

/// All message kinds exchanged between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Chat or route rumor.
    Rumor(Rumor),
    /// Point-to-point chat routed along the routing table.
    Private {
        origin: String,
        dest: String,
        hop_limit: u32,
        text: String,
    },
    /// Flooded file search with a splitting budget.
    SearchRequest {
        origin: String,
        query: String,
        budget: u32,
    },
    /// Matches for `query`, routed back to the searcher. `match_hashes[i]` belongs to `match_names[i]`.
    SearchReply {
        dest: String,
        origin: String,
        hop_limit: u32,
        query: String,
        match_names: Vec<String>,
        match_hashes: Vec<BlockHash>,
    },
    BlockRequest {
        dest: String,
        origin: String,
        hop_limit: u32,
        block_hash: BlockHash,
    },
    BlockReply {
        dest: String,
        origin: String,
        hop_limit: u32,
        block_hash: BlockHash,
        data: Vec<u8>,
    },
    /// Anti-entropy want vector: origin -> next expected seqno.
    Status { want: BTreeMap<String, u32> },
}

/// Kinds recognized by the classifier. Rumors split into route and chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    RouteRumor,
    ChatRumor,
    PrivateMessage,
    SearchRequest,
    SearchReply,
    BlockRequest,
    BlockReply,
    StatusMessage,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Rumor(r) if r.entry.is_route() => MessageKind::RouteRumor,
            Message::Rumor(_) => MessageKind::ChatRumor,
            Message::Private { .. } => MessageKind::PrivateMessage,
            Message::SearchRequest { .. } => MessageKind::SearchRequest,
            Message::SearchReply { .. } => MessageKind::SearchReply,
            Message::BlockRequest { .. } => MessageKind::BlockRequest,
            Message::BlockReply { .. } => MessageKind::BlockReply,
            Message::Status { .. } => MessageKind::StatusMessage,
        }
    }

    /// Destination origin for kinds routed point-to-point.
    pub fn dest(&self) -> Option<&str> {
        match self {
            Message::Private { dest, .. }
            | Message::SearchReply { dest, .. }
            | Message::BlockRequest { dest, .. }
            | Message::BlockReply { dest, .. } => Some(dest),
            _ => None,
        }
    }

    /// Decrement the hop limit of an addressed message. Returns the remaining hops
    /// (`None` for flooded kinds).
    pub fn decrement_hop_limit(&mut self) -> Option<u32> {
        match self {
            Message::Private { hop_limit, .. }
            | Message::SearchReply { hop_limit, .. }
            | Message::BlockRequest { hop_limit, .. }
            | Message::BlockReply { hop_limit, .. } => {
                *hop_limit = hop_limit.saturating_sub(1);
                Some(*hop_limit)
            }
            _ => None,
        }
    }
}
