//! Gossip chat and file-sharing protocol core.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod config;
pub mod envelope;
pub mod identity;
pub mod log;
pub mod peer;
pub mod protocol;
pub mod wire;

pub use config::CoreConfig;
pub use core::{MessageError, OutboundAction, RumorCore, TransferError};
pub use peer::PeerAddrError;
pub use protocol::{BlockHash, LogEntry, Message, MessageKind, Rumor, DEFAULT_HOP_LIMIT};
pub use transfer::{TransferFailure, TransferState};
pub use wire::{decode_datagram, encode_datagram, FrameDecodeError, FrameEncodeError};

// Engines driven by the coordinator.
pub mod chunk;
pub mod core;
pub mod integrity;
pub mod rumor;
pub mod search;
pub mod status;
pub mod transfer;

#[cfg(test)]
mod sim;
