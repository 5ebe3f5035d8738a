//! SQL schema for a branch database.
//!
//! Every table that references `files` or another structure table does so
//! with `ON DELETE CASCADE`; `PRAGMA foreign_keys = ON` is set on every
//! connection opened against this schema, not just at creation time,
//! since SQLite enforces foreign keys per-connection.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, strftime('%s', 'now'));

CREATE TABLE IF NOT EXISTS files (
    file_path TEXT PRIMARY KEY,
    language TEXT NOT NULL,
    module_path TEXT NOT NULL,
    is_test INTEGER NOT NULL,
    line_count_total INTEGER NOT NULL,
    line_count_code INTEGER NOT NULL,
    line_count_comment INTEGER NOT NULL,
    line_count_blank INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    file_hash TEXT NOT NULL,
    last_modified INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    file_path,
    content
);

CREATE TABLE IF NOT EXISTS chunks (
    chunk_id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL REFERENCES files(file_path) ON DELETE CASCADE,
    chunk_type TEXT NOT NULL,
    title TEXT NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_file_path ON chunks(file_path);

CREATE TABLE IF NOT EXISTS types (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL REFERENCES files(file_path) ON DELETE CASCADE,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_types_file_path ON types(file_path);

CREATE TABLE IF NOT EXISTS type_fields (
    type_id TEXT NOT NULL REFERENCES types(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    field_type TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_type_fields_type_id ON type_fields(type_id);

CREATE TABLE IF NOT EXISTS functions (
    id TEXT PRIMARY KEY,
    file_path TEXT NOT NULL REFERENCES files(file_path) ON DELETE CASCADE,
    name TEXT NOT NULL,
    receiver_type TEXT,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_functions_file_path ON functions(file_path);

CREATE TABLE IF NOT EXISTS function_parameters (
    function_id TEXT NOT NULL REFERENCES functions(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    param_type TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_function_parameters_fn ON function_parameters(function_id);

CREATE TABLE IF NOT EXISTS function_calls (
    id TEXT PRIMARY KEY,
    function_id TEXT NOT NULL REFERENCES functions(id) ON DELETE CASCADE,
    callee_name TEXT NOT NULL,
    line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_function_calls_fn ON function_calls(function_id);

CREATE TABLE IF NOT EXISTS imports (
    file_path TEXT NOT NULL REFERENCES files(file_path) ON DELETE CASCADE,
    path TEXT NOT NULL,
    alias TEXT
);
CREATE INDEX IF NOT EXISTS idx_imports_file_path ON imports(file_path);

CREATE TABLE IF NOT EXISTS type_relationships (
    type_id TEXT NOT NULL REFERENCES types(id) ON DELETE CASCADE,
    implements_type_id TEXT NOT NULL REFERENCES types(id) ON DELETE CASCADE,
    PRIMARY KEY (type_id, implements_type_id)
);
"#;

/// Pack a float vector as raw little-endian bytes for the `embedding`
/// BLOB column.
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Inverse of [`encode_embedding`].
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_round_trips() {
        let v = vec![1.0_f32, -2.5, 0.0, 3.25];
        let bytes = encode_embedding(&v);
        assert_eq!(bytes.len(), 16);
        let back = decode_embedding(&bytes);
        assert_eq!(back, v);
    }
}
