//! The structural chunker is an external collaborator; this module defines
//! the contract and a reference implementation that splits on blank lines
//! and a max-size cap, standing in for real language-aware parsing.

use crate::model::{derive_chunk_id, Chunk, ChunkLevel, FileId};

#[derive(Debug, Clone)]
pub struct ChunkInput {
    pub path: String,
    pub content: String,
    pub mtime_unix: u64,
}

#[derive(Debug, Clone)]
pub struct ChunkError {
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkOutput {
    pub language: String,
    pub chunks: Vec<Chunk>,
    pub errors: Vec<ChunkError>,
}

pub trait Chunker: Send + Sync {
    fn chunk(&self, input: &ChunkInput, file_id: FileId) -> ChunkOutput;
}

pub const MAX_CHUNK_CHARS: usize = 2000;

/// Groups non-blank-line runs into `Block`-level chunks, splitting at blank
/// lines or once a run exceeds `MAX_CHUNK_CHARS`.
pub struct LineChunker;

impl Chunker for LineChunker {
    fn chunk(&self, input: &ChunkInput, file_id: FileId) -> ChunkOutput {
        let language = detect_language(&input.path);
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut start_line = 1u32;
        let mut line_num = 1u32;
        let mut byte_offset = 0usize;
        let mut chunk_start_byte = 0usize;

        let flush = |current: &mut String, start_line: u32, end_line: u32, chunk_start_byte: usize, end_byte: usize, chunks: &mut Vec<Chunk>| {
            if current.trim().is_empty() {
                current.clear();
                return;
            }
            let id = derive_chunk_id(file_id, chunk_start_byte, end_byte, current);
            chunks.push(Chunk {
                id,
                file_id,
                level: ChunkLevel::Block,
                name: None,
                start_line,
                end_line,
                content: current.clone(),
                parent_chunk_id: None,
                parent: None,
            });
            current.clear();
        };

        for line in input.content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() && !current.trim().is_empty() {
                flush(&mut current, start_line, line_num.saturating_sub(1).max(start_line), chunk_start_byte, byte_offset, &mut chunks);
                start_line = line_num + 1;
                chunk_start_byte = byte_offset + line.len() + 1;
            } else if !trimmed.is_empty() {
                if current.len() + line.len() + 1 > MAX_CHUNK_CHARS && !current.is_empty() {
                    flush(&mut current, start_line, line_num.saturating_sub(1).max(start_line), chunk_start_byte, byte_offset, &mut chunks);
                    start_line = line_num;
                    chunk_start_byte = byte_offset;
                }
                if current.is_empty() {
                    chunk_start_byte = byte_offset;
                }
                current.push_str(line);
                current.push('\n');
            }
            byte_offset += line.len() + 1;
            line_num += 1;
        }
        if !current.trim().is_empty() {
            flush(&mut current, start_line, line_num.saturating_sub(1).max(start_line), chunk_start_byte, byte_offset, &mut chunks);
        }

        ChunkOutput { language, chunks, errors: Vec::new() }
    }
}

fn detect_language(path: &str) -> String {
    match path.rsplit('.').next().unwrap_or("") {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        _ => "text",
    }
    .to_string()
}
