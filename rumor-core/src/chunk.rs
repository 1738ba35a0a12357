//! Chunk manager: split shared files into fixed-size blocks, build metafiles, serve blocks by hash.

use std::collections::BTreeMap;

use crate::integrity;
use crate::protocol::BlockHash;

/// Block size in bytes. Every block but the last is exactly this long.
pub const BLOCK_SIZE: usize = 8192;

/// Length of one metafile entry.
pub const HASH_LEN: usize = 20;

/// A locally shared file: content split into blocks plus its two-level hash tree.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    /// Block hashes in file order (the metafile).
    pub block_hashes: Vec<BlockHash>,
    /// Hash of the concatenated block hashes; the file's identifier.
    pub top_hash: BlockHash,
    blocks: Vec<Vec<u8>>,
}

impl FileRecord {
    pub fn from_content(path: impl Into<String>, content: &[u8]) -> Self {
        let blocks: Vec<Vec<u8>> = content.chunks(BLOCK_SIZE).map(<[u8]>::to_vec).collect();
        let block_hashes: Vec<BlockHash> = blocks.iter().map(|b| integrity::hash_block(b)).collect();
        let top_hash = integrity::hash_block(&block_hashes.concat());
        Self {
            path: path.into(),
            size: content.len() as u64,
            block_hashes,
            top_hash,
            blocks,
        }
    }

    /// Serialized metafile: block hashes concatenated.
    pub fn metafile(&self) -> Vec<u8> {
        self.block_hashes.concat()
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        bare_name(&self.path)
    }

    pub fn block(&self, index: usize) -> Option<&[u8]> {
        self.blocks.get(index).map(Vec::as_slice)
    }
}

/// Final component of a `/`-separated path.
pub fn bare_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parse a metafile into block hashes. `None` if its length is not a multiple of 20.
pub fn parse_metafile(bytes: &[u8]) -> Option<Vec<BlockHash>> {
    if bytes.len() % HASH_LEN != 0 {
        return None;
    }
    bytes
        .chunks_exact(HASH_LEN)
        .map(|c| c.try_into().ok())
        .collect()
}

/// All files this node shares, keyed by path. Sharing a path again replaces it.
#[derive(Debug, Default)]
pub struct FileStore {
    files: BTreeMap<String, FileRecord>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn share(&mut self, path: &str, content: &[u8]) -> &FileRecord {
        let record = FileRecord::from_content(path, content);
        self.files.insert(path.to_string(), record);
        &self.files[path]
    }

    /// Files whose final path component equals `query`.
    pub fn find_matches(&self, query: &str) -> Vec<&FileRecord> {
        self.files
            .values()
            .filter(|f| f.name() == query)
            .collect()
    }

    /// Bytes whose hash is `hash`: a metafile if it matches a top-level hash,
    /// otherwise a data block. Top-level hashes are scanned first.
    pub fn lookup_block(&self, hash: &BlockHash) -> Option<Vec<u8>> {
        if let Some(f) = self.files.values().find(|f| f.top_hash == *hash) {
            return Some(f.metafile());
        }
        self.files.values().find_map(|f| {
            f.block_hashes
                .iter()
                .position(|h| h == hash)
                .and_then(|i| f.block(i))
                .map(<[u8]>::to_vec)
        })
    }
}
