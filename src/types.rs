//! Core data model: files, chunks, structure rows, change sets.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// A tracked source file and its classification metadata.
///
/// `file_path` is root-relative and is the primary key in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: String,
    pub language: String,
    pub module_path: String,
    pub is_test: bool,
    pub line_count_total: i64,
    pub line_count_code: i64,
    pub line_count_comment: i64,
    pub line_count_blank: i64,
    pub size_bytes: i64,
    pub file_hash: String,
    pub last_modified: i64,
    pub indexed_at: i64,
}

/// The kind of chunk stored in `chunks.chunk_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkType {
    Symbols,
    Definitions,
    Data,
    Documentation,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Symbols => "symbols",
            ChunkType::Definitions => "definitions",
            ChunkType::Data => "data",
            ChunkType::Documentation => "documentation",
        }
    }
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrievable unit of text with an embedding, keyed by a stable chunk_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub file_path: String,
    pub chunk_type: ChunkType,
    pub title: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub start_line: i64,
    pub end_line: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A type/struct/interface definition extracted from source.
#[derive(Debug, Clone)]
pub struct TypeRow {
    pub id: String,
    pub file_path: String,
    pub name: String,
    pub kind: String,
    pub start_line: i64,
    pub end_line: i64,
}

#[derive(Debug, Clone)]
pub struct TypeFieldRow {
    pub type_id: String,
    pub name: String,
    pub field_type: String,
}

#[derive(Debug, Clone)]
pub struct FunctionRow {
    pub id: String,
    pub file_path: String,
    pub name: String,
    pub receiver_type: Option<String>,
    pub start_line: i64,
    pub end_line: i64,
}

#[derive(Debug, Clone)]
pub struct FunctionParameterRow {
    pub function_id: String,
    pub position: i64,
    pub name: String,
    pub param_type: String,
}

#[derive(Debug, Clone)]
pub struct FunctionCallRow {
    pub id: String,
    pub function_id: String,
    pub callee_name: String,
    pub line: i64,
}

#[derive(Debug, Clone)]
pub struct ImportRow {
    pub file_path: String,
    pub path: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TypeRelationshipRow {
    pub type_id: String,
    pub implements_type_id: String,
}

/// Everything the GraphExtractor produced for one file.
#[derive(Debug, Clone, Default)]
pub struct CodeStructure {
    pub types: Vec<TypeRow>,
    pub type_fields: Vec<TypeFieldRow>,
    pub functions: Vec<FunctionRow>,
    pub function_parameters: Vec<FunctionParameterRow>,
    pub function_calls: Vec<FunctionCallRow>,
    pub imports: Vec<ImportRow>,
}

/// Per-branch metadata tracked in `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchMetadata {
    pub last_accessed: i64,
    pub size_mb: f64,
    pub chunk_count: i64,
    pub is_immortal: bool,
}

/// The outcome of `ChangeDetector::detect`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: HashSet<String>,
    pub modified: HashSet<String>,
    pub deleted: HashSet<String>,
    pub unchanged: HashSet<String>,
    /// Subset of `unchanged` whose on-disk mtime no longer matches the
    /// stored mtime even though the content hash is unchanged.
    pub mtime_drift: HashSet<String>,
}

impl ChangeSet {
    pub fn is_empty_of_work(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Statistics returned by `IndexerCore::index`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_deleted: usize,
    pub files_unchanged: usize,
    pub code_files_processed: usize,
    pub docs_processed: usize,
    pub total_code_chunks: usize,
    pub total_doc_chunks: usize,
    pub indexing_time_ms: u128,
}

/// A resolved, absolute-path unit of work handed to the Processor.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
}
