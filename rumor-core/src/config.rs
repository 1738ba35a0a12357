//! Core tunables. All intervals are in ticks; the host decides how long a tick is.

use crate::protocol::DEFAULT_HOP_LIMIT;

pub const DEFAULT_ANTI_ENTROPY_TICKS: u64 = 10;
pub const DEFAULT_ROUTE_RUMOR_TICKS: u64 = 60;
pub const DEFAULT_RUMOR_TIMEOUT_TICKS: u64 = 1;
pub const DEFAULT_SEARCH_TICKS: u64 = 1;
pub const DEFAULT_BLOCK_RETRANSMIT_TICKS: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// Origin name; a random one is generated when unset.
    pub origin: Option<String>,
    /// Relay rumors and addressed messages authored by others.
    pub forwarding: bool,
    /// Hop limit stamped on addressed messages we author.
    pub hop_limit: u32,
    pub anti_entropy_ticks: u64,
    pub route_rumor_ticks: u64,
    pub rumor_timeout_ticks: u64,
    pub search_tick_ticks: u64,
    pub block_retransmit_ticks: u64,
    /// `None` resends forever.
    pub max_rumor_resends: Option<u32>,
    /// `None` retransmits forever.
    pub max_block_retransmits: Option<u32>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            origin: None,
            forwarding: true,
            hop_limit: DEFAULT_HOP_LIMIT,
            anti_entropy_ticks: DEFAULT_ANTI_ENTROPY_TICKS,
            route_rumor_ticks: DEFAULT_ROUTE_RUMOR_TICKS,
            rumor_timeout_ticks: DEFAULT_RUMOR_TIMEOUT_TICKS,
            search_tick_ticks: DEFAULT_SEARCH_TICKS,
            block_retransmit_ticks: DEFAULT_BLOCK_RETRANSMIT_TICKS,
            max_rumor_resends: None,
            max_block_retransmits: None,
        }
    }
}

impl CoreConfig {
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..Self::default()
        }
    }
}
