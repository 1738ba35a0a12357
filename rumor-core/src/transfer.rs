//! Download state machine: fetch the metafile for a top-level hash, then each block
//! in order, verifying every reply against the hash we asked for.

use std::collections::VecDeque;

use crate::chunk;
use crate::integrity;
use crate::protocol::BlockHash;

#[derive(Debug)]
enum Phase {
    Metafile,
    Blocks {
        remaining: VecDeque<BlockHash>,
        data: Vec<u8>,
    },
}

/// Observable transfer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    FetchingMetafile { filename: String, expected: BlockHash },
    FetchingBlocks { filename: String, remaining: usize, received: usize },
}

/// Result of feeding a block reply into the download.
#[derive(Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Not the block we wait for, or its content does not hash to what it claims.
    Ignored,
    /// Verified; request this hash next.
    Request(BlockHash),
    /// All blocks received; the reassembled file.
    Complete(Vec<u8>),
    /// Verified metafile that is not a whole number of hashes.
    Malformed,
}

/// Why a download was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferFailure {
    MalformedMetafile,
    RetransmitLimit,
}

impl std::fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferFailure::MalformedMetafile => f.write_str("metafile is not a list of block hashes"),
            TransferFailure::RetransmitLimit => f.write_str("uploader stopped answering"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitOutcome {
    Wait,
    Resend(BlockHash),
    /// Retransmit cap reached.
    GiveUp,
}

/// The single active download.
#[derive(Debug)]
pub struct Download {
    filename: String,
    uploader: String,
    awaiting: BlockHash,
    phase: Phase,
    interval: u64,
    max_retransmits: Option<u32>,
    next_retransmit: u64,
    retransmits: u32,
}

impl Download {
    pub fn start(
        filename: impl Into<String>,
        uploader: impl Into<String>,
        top_hash: BlockHash,
        now: u64,
        interval: u64,
        max_retransmits: Option<u32>,
    ) -> Self {
        let interval = interval.max(1);
        Self {
            filename: filename.into(),
            uploader: uploader.into(),
            awaiting: top_hash,
            phase: Phase::Metafile,
            interval,
            max_retransmits,
            next_retransmit: now + interval,
            retransmits: 0,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn uploader(&self) -> &str {
        &self.uploader
    }

    /// Hash of the block currently requested.
    pub fn awaiting(&self) -> BlockHash {
        self.awaiting
    }

    pub fn state(&self) -> TransferState {
        match &self.phase {
            Phase::Metafile => TransferState::FetchingMetafile {
                filename: self.filename.clone(),
                expected: self.awaiting,
            },
            Phase::Blocks { remaining, data } => TransferState::FetchingBlocks {
                filename: self.filename.clone(),
                remaining: remaining.len() + 1,
                received: data.len(),
            },
        }
    }

    fn rearm(&mut self, now: u64) {
        self.next_retransmit = now + self.interval;
        self.retransmits = 0;
    }

    pub fn on_reply(&mut self, claimed: &BlockHash, data: &[u8], now: u64) -> BlockOutcome {
        if *claimed != self.awaiting || !integrity::verify_block(data, claimed) {
            return BlockOutcome::Ignored;
        }
        match &mut self.phase {
            Phase::Metafile => {
                let Some(hashes) = chunk::parse_metafile(data) else {
                    return BlockOutcome::Malformed;
                };
                let mut remaining: VecDeque<BlockHash> = hashes.into();
                let Some(first) = remaining.pop_front() else {
                    return BlockOutcome::Complete(Vec::new());
                };
                let capacity = (remaining.len() + 1) * chunk::BLOCK_SIZE;
                self.phase = Phase::Blocks {
                    remaining,
                    data: Vec::with_capacity(capacity),
                };
                self.awaiting = first;
                self.rearm(now);
                BlockOutcome::Request(first)
            }
            Phase::Blocks { remaining, data: acc } => {
                acc.extend_from_slice(data);
                match remaining.pop_front() {
                    Some(next) => {
                        self.awaiting = next;
                        self.rearm(now);
                        BlockOutcome::Request(next)
                    }
                    None => BlockOutcome::Complete(std::mem::take(acc)),
                }
            }
        }
    }

    pub fn on_tick(&mut self, now: u64) -> RetransmitOutcome {
        if now < self.next_retransmit {
            return RetransmitOutcome::Wait;
        }
        if self.max_retransmits.is_some_and(|max| self.retransmits >= max) {
            return RetransmitOutcome::GiveUp;
        }
        self.retransmits += 1;
        self.next_retransmit = now + self.interval;
        RetransmitOutcome::Resend(self.awaiting)
    }
}
