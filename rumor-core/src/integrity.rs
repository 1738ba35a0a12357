//! Integrity: 20-byte content hashes for blocks and metafiles, verified on receive.

use sha2::{Digest, Sha256};

use crate::protocol::BlockHash;

/// Hash a block payload: SHA-256 truncated to 20 bytes.
pub fn hash_block(payload: &[u8]) -> BlockHash {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest[..20]);
    out
}

/// Verify a block payload against an expected hash.
pub fn verify_block(payload: &[u8], expected: &BlockHash) -> bool {
    hash_block(payload) == *expected
}

/// Lowercase hex, for logs.
pub fn short_hex(hash: &BlockHash) -> String {
    hash[..6].iter().map(|b| format!("{b:02x}")).collect()
}
