//! Shared data model: file records, chunks, vectors, keyword postings, and
//! index/daemon status snapshots.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub type FileId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    /// Canonical project-relative path; the file's identity.
    pub path: String,
    /// Hex-encoded SHA-256 over the raw file bytes.
    pub content_hash: String,
    pub language: String,
    pub size_bytes: u64,
    pub mtime_unix: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkLevel {
    File,
    Class,
    Section,
    Method,
    Block,
    Line,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: String,
    pub name: Option<String>,
    pub level: ChunkLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from file id + byte range + content digest.
    pub id: String,
    pub file_id: FileId,
    pub level: ChunkLevel,
    pub name: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    /// Identity of the larger semantic unit this chunk was split from, if any.
    pub parent_chunk_id: Option<String>,
    pub parent: Option<ParentRef>,
}

/// Derives a chunk's stable id from its file id, byte range, and content.
pub fn derive_chunk_id(file_id: FileId, start_byte: usize, end_byte: usize, content: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(file_id.to_le_bytes());
    hasher.update(start_byte.to_le_bytes());
    hasher.update(end_byte.to_le_bytes());
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    hex_encode(&digest[..16])
}

/// A stable numeric stand-in for a file's identity (its path), usable as the
/// "file id" component of a chunk id before the repository has assigned one
/// — derivation must not depend on storage insertion order.
pub fn path_identity(path: &str) -> u64 {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

pub fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub files_discovered: usize,
    pub files_processed: usize,
    pub started_at_unix: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub last_indexed_at_unix: Option<u64>,
    pub indexing_active: bool,
    pub progress: Progress,
}

pub fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_chunk_id_is_deterministic() {
        let a = derive_chunk_id(1, 0, 10, "hello");
        let b = derive_chunk_id(1, 0, 10, "hello");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_chunk_id_differs_on_range() {
        let a = derive_chunk_id(1, 0, 10, "hello");
        let b = derive_chunk_id(1, 0, 11, "hello");
        assert_ne!(a, b);
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }
}
