//! Structural envelope: a field map with no kind tag. Classification infers the
//! message kind from which fields are present and how many there are.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::protocol::{BlockHash, LogEntry, Message, Rumor};

pub const ORIGIN: &str = "origin";
pub const SEQNO: &str = "seqno";
pub const TEXT: &str = "text";
pub const DEST: &str = "dest";
pub const HOP_LIMIT: &str = "hopLimit";
pub const QUERY: &str = "query";
pub const BUDGET: &str = "budget";
pub const MATCH_NAMES: &str = "matchNames";
pub const MATCH_HASHES: &str = "matchHashes";
pub const BLOCK_HASH: &str = "blockHash";
pub const DATA: &str = "data";
pub const WANT: &str = "want";
pub const LAST_IP: &str = "lastIp";
pub const LAST_PORT: &str = "lastPort";

const HASH_LEN: usize = 20;

/// Typed field value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Key-ordered field map; iteration order (and therefore encoding) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    fields: BTreeMap<String, Value>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: Value) -> &mut Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn has_exactly(&self, keys: &[&str]) -> bool {
        self.fields.len() == keys.len() && keys.iter().all(|k| self.fields.contains_key(*k))
    }

    fn uint(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::UInt(n) => Some(*n),
            _ => None,
        }
    }

    fn u32(&self, key: &str) -> Option<u32> {
        u32::try_from(self.uint(key)?).ok()
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn bytes(&self, key: &str) -> Option<&[u8]> {
        match self.get(key)? {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    fn hash(&self, key: &str) -> Option<BlockHash> {
        self.bytes(key)?.try_into().ok()
    }

    /// Classify by field set. Returns `None` for anything unrecognized or mistyped.
    pub fn classify(&self) -> Option<Message> {
        if self.has_exactly(&[WANT]) {
            return self.status();
        }
        if self.has_exactly(&[TEXT, ORIGIN, DEST, HOP_LIMIT]) {
            return Some(Message::Private {
                origin: self.string(ORIGIN)?,
                dest: self.string(DEST)?,
                hop_limit: self.u32(HOP_LIMIT)?,
                text: self.string(TEXT)?,
            });
        }
        if self.has_exactly(&[ORIGIN, QUERY, BUDGET]) {
            return Some(Message::SearchRequest {
                origin: self.string(ORIGIN)?,
                query: self.string(QUERY)?,
                budget: self.u32(BUDGET)?,
            });
        }
        if self.has_exactly(&[DEST, ORIGIN, HOP_LIMIT, QUERY, MATCH_NAMES, MATCH_HASHES]) {
            return self.search_reply();
        }
        if self.has_exactly(&[DEST, ORIGIN, HOP_LIMIT, BLOCK_HASH]) {
            return Some(Message::BlockRequest {
                dest: self.string(DEST)?,
                origin: self.string(ORIGIN)?,
                hop_limit: self.u32(HOP_LIMIT)?,
                block_hash: self.hash(BLOCK_HASH)?,
            });
        }
        if self.has_exactly(&[DEST, ORIGIN, HOP_LIMIT, BLOCK_HASH, DATA]) {
            return Some(Message::BlockReply {
                dest: self.string(DEST)?,
                origin: self.string(ORIGIN)?,
                hop_limit: self.u32(HOP_LIMIT)?,
                block_hash: self.hash(BLOCK_HASH)?,
                data: self.bytes(DATA)?.to_vec(),
            });
        }
        self.rumor()
    }

    fn status(&self) -> Option<Message> {
        let Value::Map(map) = self.get(WANT)? else {
            return None;
        };
        let mut want = BTreeMap::new();
        for (origin, v) in map {
            let Value::UInt(n) = v else {
                return None;
            };
            want.insert(origin.clone(), u32::try_from(*n).ok()?);
        }
        Some(Message::Status { want })
    }

    fn search_reply(&self) -> Option<Message> {
        let Value::List(names) = self.get(MATCH_NAMES)? else {
            return None;
        };
        let match_names = names
            .iter()
            .map(|v| match v {
                Value::Str(s) => Some(s.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        let hashes = self.bytes(MATCH_HASHES)?;
        if hashes.len() != match_names.len() * HASH_LEN {
            return None;
        }
        let match_hashes = hashes
            .chunks_exact(HASH_LEN)
            .map(|c| c.try_into().ok())
            .collect::<Option<Vec<BlockHash>>>()?;
        Some(Message::SearchReply {
            dest: self.string(DEST)?,
            origin: self.string(ORIGIN)?,
            hop_limit: self.u32(HOP_LIMIT)?,
            query: self.string(QUERY)?,
            match_names,
            match_hashes,
        })
    }

    /// Route/chat rumor: `origin` + `seqno`, optional `text`, optional hint pair.
    /// Hints are stamped after classification, so they are tolerated here only.
    fn rumor(&self) -> Option<Message> {
        let allowed: BTreeSet<&str> = [ORIGIN, SEQNO, TEXT, LAST_IP, LAST_PORT].into();
        if !self.fields.keys().all(|k| allowed.contains(k.as_str())) {
            return None;
        }
        let origin = self.string(ORIGIN)?;
        let seqno = self.u32(SEQNO)?;
        if seqno == 0 {
            return None;
        }
        let text = match self.get(TEXT) {
            None => None,
            Some(Value::Str(s)) => Some(s.clone()),
            Some(_) => return None,
        };
        let last_hop = match (self.get(LAST_IP), self.get(LAST_PORT)) {
            (None, None) => None,
            (Some(_), Some(_)) => {
                let ip: IpAddr = self.string(LAST_IP)?.parse().ok()?;
                let port = u16::try_from(self.uint(LAST_PORT)?).ok()?;
                Some(SocketAddr::new(ip, port))
            }
            _ => return None,
        };
        Some(Message::Rumor(Rumor {
            entry: LogEntry {
                origin,
                seqno,
                text,
            },
            last_hop,
        }))
    }
}

impl Message {
    /// Canonical field set for this message.
    pub fn to_envelope(&self) -> Envelope {
        let mut env = Envelope::new();
        match self {
            Message::Rumor(r) => {
                env.insert(ORIGIN, Value::Str(r.entry.origin.clone()))
                    .insert(SEQNO, Value::UInt(r.entry.seqno.into()));
                if let Some(text) = &r.entry.text {
                    env.insert(TEXT, Value::Str(text.clone()));
                }
                if let Some(hop) = r.last_hop {
                    env.insert(LAST_IP, Value::Str(hop.ip().to_string()))
                        .insert(LAST_PORT, Value::UInt(hop.port().into()));
                }
            }
            Message::Private {
                origin,
                dest,
                hop_limit,
                text,
            } => {
                env.insert(TEXT, Value::Str(text.clone()))
                    .insert(ORIGIN, Value::Str(origin.clone()))
                    .insert(DEST, Value::Str(dest.clone()))
                    .insert(HOP_LIMIT, Value::UInt((*hop_limit).into()));
            }
            Message::SearchRequest {
                origin,
                query,
                budget,
            } => {
                env.insert(ORIGIN, Value::Str(origin.clone()))
                    .insert(QUERY, Value::Str(query.clone()))
                    .insert(BUDGET, Value::UInt((*budget).into()));
            }
            Message::SearchReply {
                dest,
                origin,
                hop_limit,
                query,
                match_names,
                match_hashes,
            } => {
                env.insert(DEST, Value::Str(dest.clone()))
                    .insert(ORIGIN, Value::Str(origin.clone()))
                    .insert(HOP_LIMIT, Value::UInt((*hop_limit).into()))
                    .insert(QUERY, Value::Str(query.clone()))
                    .insert(
                        MATCH_NAMES,
                        Value::List(match_names.iter().cloned().map(Value::Str).collect()),
                    )
                    .insert(MATCH_HASHES, Value::Bytes(match_hashes.concat()));
            }
            Message::BlockRequest {
                dest,
                origin,
                hop_limit,
                block_hash,
            } => {
                env.insert(DEST, Value::Str(dest.clone()))
                    .insert(ORIGIN, Value::Str(origin.clone()))
                    .insert(HOP_LIMIT, Value::UInt((*hop_limit).into()))
                    .insert(BLOCK_HASH, Value::Bytes(block_hash.to_vec()));
            }
            Message::BlockReply {
                dest,
                origin,
                hop_limit,
                block_hash,
                data,
            } => {
                env.insert(DEST, Value::Str(dest.clone()))
                    .insert(ORIGIN, Value::Str(origin.clone()))
                    .insert(HOP_LIMIT, Value::UInt((*hop_limit).into()))
                    .insert(BLOCK_HASH, Value::Bytes(block_hash.to_vec()))
                    .insert(DATA, Value::Bytes(data.clone()));
            }
            Message::Status { want } => {
                let map = want
                    .iter()
                    .map(|(o, n)| (o.clone(), Value::UInt((*n).into())))
                    .collect();
                env.insert(WANT, Value::Map(map));
            }
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;

    fn samples() -> Vec<Message> {
        let hop: SocketAddr = "10.0.0.7:40001".parse().unwrap();
        vec![
            Message::Rumor(Rumor::direct(LogEntry::route("A", 1))),
            Message::Rumor(Rumor::relayed(LogEntry::chat("A", 2, "hello"), hop)),
            Message::Private {
                origin: "A".into(),
                dest: "B".into(),
                hop_limit: 10,
                text: "psst".into(),
            },
            Message::SearchRequest {
                origin: "A".into(),
                query: "a.txt".into(),
                budget: 4,
            },
            Message::SearchReply {
                dest: "A".into(),
                origin: "B".into(),
                hop_limit: 10,
                query: "a.txt".into(),
                match_names: vec!["a.txt".into(), "b.txt".into()],
                match_hashes: vec![[1; 20], [2; 20]],
            },
            Message::BlockRequest {
                dest: "B".into(),
                origin: "A".into(),
                hop_limit: 9,
                block_hash: [3; 20],
            },
            Message::BlockReply {
                dest: "A".into(),
                origin: "B".into(),
                hop_limit: 10,
                block_hash: [4; 20],
                data: vec![9, 8, 7],
            },
            Message::Status {
                want: [("A".to_string(), 3), ("B".to_string(), 1)].into(),
            },
        ]
    }

    #[test]
    fn classify_inverts_to_envelope() {
        for msg in samples() {
            let classified = msg.to_envelope().classify();
            assert_eq!(classified.as_ref(), Some(&msg), "kind {:?}", msg.kind());
        }
    }

    #[test]
    fn rumor_with_hints_is_still_a_rumor() {
        let hop: SocketAddr = "[::1]:5000".parse().unwrap();
        let msg = Message::Rumor(Rumor::relayed(LogEntry::route("X", 4), hop));
        let env = msg.to_envelope();
        assert_eq!(env.len(), 4);
        assert_eq!(env.classify().map(|m| m.kind()), Some(MessageKind::RouteRumor));
    }

    #[test]
    fn unknown_field_set_is_dropped() {
        let mut env = Envelope::new();
        env.insert(ORIGIN, Value::Str("A".into()))
            .insert("color", Value::Str("red".into()));
        assert_eq!(env.classify(), None);
        assert_eq!(Envelope::new().classify(), None);
    }

    #[test]
    fn extra_field_breaks_exact_kinds() {
        let mut env = Message::SearchRequest {
            origin: "A".into(),
            query: "q".into(),
            budget: 2,
        }
        .to_envelope();
        env.insert(DEST, Value::Str("B".into()));
        assert_eq!(env.classify(), None);
    }

    #[test]
    fn mistyped_fields_are_rejected() {
        let mut env = Envelope::new();
        env.insert(ORIGIN, Value::Str("A".into()))
            .insert(SEQNO, Value::Str("1".into()));
        assert_eq!(env.classify(), None);

        let mut env = Envelope::new();
        env.insert(ORIGIN, Value::Str("A".into()))
            .insert(SEQNO, Value::UInt(u64::from(u32::MAX) + 1));
        assert_eq!(env.classify(), None);
    }

    #[test]
    fn seqno_zero_and_half_hint_are_rejected() {
        let mut env = Envelope::new();
        env.insert(ORIGIN, Value::Str("A".into()))
            .insert(SEQNO, Value::UInt(0));
        assert_eq!(env.classify(), None);

        let mut env = Envelope::new();
        env.insert(ORIGIN, Value::Str("A".into()))
            .insert(SEQNO, Value::UInt(1))
            .insert(LAST_PORT, Value::UInt(4000));
        assert_eq!(env.classify(), None);
    }

    #[test]
    fn search_reply_hash_count_must_match_names() {
        let mut env = samples()[4].to_envelope();
        env.insert(MATCH_HASHES, Value::Bytes(vec![0; 30]));
        assert_eq!(env.classify(), None);
    }
}
