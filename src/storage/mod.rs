//! Storage: typed reader/writer abstractions over a single branch database.
//!
//! `rusqlite::Connection` is not `Send + Sync`; we wrap it in `Arc<Mutex<>>`
//! and run every call through `spawn_blocking`, recovering from mutex
//! poisoning the same way as an interrupted transaction: by checking
//! `is_autocommit()` and issuing a manual `ROLLBACK` if needed.

pub mod schema;

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::params;
use tokio::task::spawn_blocking;

use crate::error::IndexError;
use crate::error::Result;
use crate::types::Chunk;
use crate::types::ChunkType;
use crate::types::FileRecord;
use crate::types::FunctionCallRow;
use crate::types::FunctionParameterRow;
use crate::types::FunctionRow;
use crate::types::ImportRow;
use crate::types::TypeFieldRow;
use crate::types::TypeRelationshipRow;
use crate::types::TypeRow;

/// Async-safe handle to one branch's SQLite database.
pub struct BranchStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    closed: Arc<AtomicBool>,
}

fn recover<'a>(
    poisoned: std::sync::PoisonError<std::sync::MutexGuard<'a, Connection>>,
    path: &Path,
) -> std::sync::MutexGuard<'a, Connection> {
    tracing::warn!(path = %path.display(), "mutex poisoned, recovering");
    let inner = poisoned.into_inner();
    if !inner.is_autocommit() {
        tracing::warn!(path = %path.display(), "connection not in autocommit after poisoning, rolling back");
        match inner.execute("ROLLBACK", []) {
            Ok(_) => tracing::info!(path = %path.display(), "rolled back pending transaction"),
            Err(e) => tracing::error!(path = %path.display(), error = %e, "rollback failed, connection may be inconsistent"),
        }
    }
    inner
}

impl BranchStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn, path)?;
        conn.execute_batch(schema::SCHEMA)
            .map_err(|e| IndexError::SchemaFailure {
                path: path.to_path_buf(),
                cause: e.to_string(),
            })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Opens an existing database read-only; fails with `SchemaFailure`
    /// if it has no `schema_version` row.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let has_schema: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        if has_schema == 0 {
            return Err(IndexError::SchemaFailure {
                path: path.to_path_buf(),
                cause: "missing schema_version table".to_string(),
            });
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn configure(conn: &Connection, path: &Path) -> Result<()> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| IndexError::SchemaFailure {
                path: path.to_path_buf(),
                cause: e.to_string(),
            })?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Database file size on disk, in bytes. 0 if the file does not
    /// exist (e.g. in-memory databases used by tests).
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Idempotent: repeated calls are no-ops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();
        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|p| recover(p, &path));
            f(&guard)
        })
        .await
        .map_err(|e| IndexError::storage("spawn_blocking", e))?
    }

    async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();
        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|p| recover(p, &path));
            let tx = guard.transaction().map_err(|e| IndexError::StorageFailure {
                phase: "transaction-start".to_string(),
                cause: e.to_string(),
            })?;
            let result = f(&tx)?;
            tx.commit().map_err(|e| IndexError::StorageFailure {
                phase: "transaction-commit".to_string(),
                cause: e.to_string(),
            })?;
            Ok(result)
        })
        .await
        .map_err(|e| IndexError::storage("spawn_blocking", e))?
    }

    // ---- files ----

    pub async fn write_file(&self, record: FileRecord, content: Option<String>) -> Result<()> {
        self.write_file_batch(vec![(record, content)]).await
    }

    pub async fn write_file_batch(&self, records: Vec<(FileRecord, Option<String>)>) -> Result<()> {
        self.transaction(move |tx| {
            for (r, content) in records {
                tx.execute(
                    "INSERT INTO files (file_path, language, module_path, is_test,
                        line_count_total, line_count_code, line_count_comment, line_count_blank,
                        size_bytes, file_hash, last_modified, indexed_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                     ON CONFLICT(file_path) DO UPDATE SET
                        language=excluded.language, module_path=excluded.module_path,
                        is_test=excluded.is_test, line_count_total=excluded.line_count_total,
                        line_count_code=excluded.line_count_code, line_count_comment=excluded.line_count_comment,
                        line_count_blank=excluded.line_count_blank, size_bytes=excluded.size_bytes,
                        file_hash=excluded.file_hash, last_modified=excluded.last_modified,
                        indexed_at=excluded.indexed_at",
                    params![
                        r.file_path, r.language, r.module_path, r.is_test,
                        r.line_count_total, r.line_count_code, r.line_count_comment, r.line_count_blank,
                        r.size_bytes, r.file_hash, r.last_modified, r.indexed_at,
                    ],
                )?;
                tx.execute("DELETE FROM files_fts WHERE file_path = ?1", params![r.file_path])?;
                if let Some(text) = content {
                    tx.execute(
                        "INSERT INTO files_fts (file_path, content) VALUES (?1, ?2)",
                        params![r.file_path, text],
                    )?;
                }
            }
            Ok(())
        })
        .await
    }

    /// Refresh only `last_modified`; content, hash, and chunks untouched.
    pub async fn update_file_mtimes(&self, updates: Vec<(String, i64)>) -> Result<()> {
        self.transaction(move |tx| {
            for (path, mtime) in updates {
                tx.execute(
                    "UPDATE files SET last_modified = ?1 WHERE file_path = ?2",
                    params![mtime, path],
                )?;
            }
            Ok(())
        })
        .await
    }

    /// Cascades to chunks and structure rows.
    pub async fn delete_file(&self, path: String) -> Result<()> {
        self.transaction(move |tx| {
            tx.execute("DELETE FROM files WHERE file_path = ?1", params![path])?;
            tx.execute("DELETE FROM files_fts WHERE file_path = ?1", params![path])?;
            Ok(())
        })
        .await
    }

    pub async fn get_all_files(&self) -> Result<HashMap<String, FileRecord>> {
        self.query(|conn| {
            let mut stmt = conn.prepare(
                "SELECT file_path, language, module_path, is_test,
                    line_count_total, line_count_code, line_count_comment, line_count_blank,
                    size_bytes, file_hash, last_modified, indexed_at FROM files",
            )?;
            let rows = stmt.query_map([], row_to_file_record)?;
            let mut out = HashMap::new();
            for r in rows {
                let r = r?;
                out.insert(r.file_path.clone(), r);
            }
            Ok(out)
        })
        .await
    }

    pub async fn get_file_record(&self, path: String) -> Result<Option<FileRecord>> {
        self.query(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT file_path, language, module_path, is_test,
                    line_count_total, line_count_code, line_count_comment, line_count_blank,
                    size_bytes, file_hash, last_modified, indexed_at FROM files WHERE file_path = ?1",
            )?;
            let mut rows = stmt.query_map(params![path], row_to_file_record)?;
            match rows.next() {
                Some(r) => Ok(Some(r?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn get_file_content(&self, path: String) -> Result<Option<String>> {
        self.query(move |conn| {
            let mut stmt = conn.prepare("SELECT content FROM files_fts WHERE file_path = ?1")?;
            let mut rows = stmt.query_map(params![path], |row| row.get::<_, String>(0))?;
            match rows.next() {
                Some(r) => Ok(Some(r?)),
                None => Ok(None),
            }
        })
        .await
    }

    // ---- chunks ----

    /// For each file_path present in the batch, delete its existing
    /// chunks then insert the new ones, atomically per batch.
    pub async fn write_chunks_incremental(&self, chunks: Vec<Chunk>) -> Result<()> {
        self.transaction(move |tx| {
            let mut touched: Vec<String> = chunks.iter().map(|c| c.file_path.clone()).collect();
            touched.sort();
            touched.dedup();
            for path in &touched {
                tx.execute("DELETE FROM chunks WHERE file_path = ?1", params![path])?;
            }
            for c in &chunks {
                tx.execute(
                    "INSERT INTO chunks (chunk_id, file_path, chunk_type, title, text, embedding,
                        start_line, end_line, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                    params![
                        c.chunk_id, c.file_path, c.chunk_type.as_str(), c.title, c.text,
                        schema::encode_embedding(&c.embedding), c.start_line, c.end_line,
                        c.created_at, c.updated_at,
                    ],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn get_chunks_for_file(&self, path: String) -> Result<Vec<Chunk>> {
        self.query(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT chunk_id, file_path, chunk_type, title, text, embedding,
                    start_line, end_line, created_at, updated_at
                 FROM chunks WHERE file_path = ?1",
            )?;
            let rows = stmt.query_map(params![path], row_to_chunk)?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })
        .await
    }

    pub async fn get_file_hashes(&self) -> Result<HashMap<String, String>> {
        self.query(|conn| {
            let mut stmt = conn.prepare("SELECT file_path, file_hash FROM files")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = HashMap::new();
            for r in rows {
                let (p, h) = r?;
                out.insert(p, h);
            }
            Ok(out)
        })
        .await
    }

    /// Ancestor-branch chunk transplant (BranchSynchronizer step 8): copy
    /// each FileRecord verbatim, stream its chunks preserving everything
    /// except `updated_at` (set to `now`), inside a single transaction.
    pub async fn transplant_unchanged(
        &self,
        entries: Vec<(FileRecord, Vec<Chunk>)>,
        now: i64,
    ) -> Result<(usize, usize)> {
        self.transaction(move |tx| {
            let mut files_copied = 0usize;
            let mut chunks_copied = 0usize;
            for (r, chunks) in entries {
                tx.execute(
                    "INSERT INTO files (file_path, language, module_path, is_test,
                        line_count_total, line_count_code, line_count_comment, line_count_blank,
                        size_bytes, file_hash, last_modified, indexed_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                     ON CONFLICT(file_path) DO NOTHING",
                    params![
                        r.file_path, r.language, r.module_path, r.is_test,
                        r.line_count_total, r.line_count_code, r.line_count_comment, r.line_count_blank,
                        r.size_bytes, r.file_hash, r.last_modified, r.indexed_at,
                    ],
                )?;
                files_copied += 1;
                for c in chunks {
                    tx.execute(
                        "INSERT INTO chunks (chunk_id, file_path, chunk_type, title, text, embedding,
                            start_line, end_line, created_at, updated_at)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)
                         ON CONFLICT(chunk_id) DO NOTHING",
                        params![
                            c.chunk_id, c.file_path, c.chunk_type.as_str(), c.title, c.text,
                            schema::encode_embedding(&c.embedding), c.start_line, c.end_line,
                            c.created_at, now,
                        ],
                    )?;
                    chunks_copied += 1;
                }
            }
            Ok((files_copied, chunks_copied))
        })
        .await
    }

    // ---- structure tables (GraphUpdater) ----

    /// Deletes rows from the three structure roots for `path`; cascades
    /// remove type_fields, function_parameters, function_calls.
    pub async fn delete_structure_for_file(&self, path: String) -> Result<()> {
        self.transaction(move |tx| {
            tx.execute("DELETE FROM types WHERE file_path = ?1", params![path])?;
            tx.execute("DELETE FROM functions WHERE file_path = ?1", params![path])?;
            tx.execute("DELETE FROM imports WHERE file_path = ?1", params![path])?;
            Ok(())
        })
        .await
    }

    /// `INSERT OR IGNORE` of a placeholder record — see DESIGN.md on why
    /// this hazard exists and when it is exercised.
    pub async fn ensure_placeholder_file(&self, path: String, language: String, now: i64) -> Result<()> {
        self.transaction(move |tx| {
            tx.execute(
                "INSERT OR IGNORE INTO files (file_path, language, module_path, is_test,
                    line_count_total, line_count_code, line_count_comment, line_count_blank,
                    size_bytes, file_hash, last_modified, indexed_at)
                 VALUES (?1, ?2, '', 0, 0, 0, 0, 0, 0, '', ?3, ?3)",
                params![path, language, now],
            )?;
            Ok(())
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn write_structure(
        &self,
        types: Vec<TypeRow>,
        type_fields: Vec<TypeFieldRow>,
        functions: Vec<FunctionRow>,
        function_parameters: Vec<FunctionParameterRow>,
        function_calls: Vec<FunctionCallRow>,
        imports: Vec<ImportRow>,
    ) -> Result<()> {
        self.transaction(move |tx| {
            for t in &types {
                tx.execute(
                    "INSERT INTO types (id, file_path, name, kind, start_line, end_line)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    params![t.id, t.file_path, t.name, t.kind, t.start_line, t.end_line],
                )?;
            }
            for f in &type_fields {
                tx.execute(
                    "INSERT INTO type_fields (type_id, name, field_type) VALUES (?1,?2,?3)",
                    params![f.type_id, f.name, f.field_type],
                )?;
            }
            for f in &functions {
                tx.execute(
                    "INSERT INTO functions (id, file_path, name, receiver_type, start_line, end_line)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    params![f.id, f.file_path, f.name, f.receiver_type, f.start_line, f.end_line],
                )?;
            }
            for p in &function_parameters {
                tx.execute(
                    "INSERT INTO function_parameters (function_id, position, name, param_type)
                     VALUES (?1,?2,?3,?4)",
                    params![p.function_id, p.position, p.name, p.param_type],
                )?;
            }
            for c in &function_calls {
                tx.execute(
                    "INSERT INTO function_calls (id, function_id, callee_name, line) VALUES (?1,?2,?3,?4)",
                    params![c.id, c.function_id, c.callee_name, c.line],
                )?;
            }
            for i in &imports {
                tx.execute(
                    "INSERT INTO imports (file_path, path, alias) VALUES (?1,?2,?3)",
                    params![i.file_path, i.path, i.alias],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn write_type_relationships(&self, rows: Vec<TypeRelationshipRow>) -> Result<()> {
        self.transaction(move |tx| {
            tx.execute("DELETE FROM type_relationships", [])?;
            for r in &rows {
                tx.execute(
                    "INSERT OR IGNORE INTO type_relationships (type_id, implements_type_id) VALUES (?1,?2)",
                    params![r.type_id, r.implements_type_id],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn count_chunks(&self) -> Result<i64> {
        self.query(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?)
        })
        .await
    }

    pub async fn count_types_for_file(&self, path: String) -> Result<i64> {
        self.query(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM types WHERE file_path = ?1",
                params![path],
                |row| row.get(0),
            )?)
        })
        .await
    }

    pub async fn count_functions_for_file(&self, path: String) -> Result<i64> {
        self.query(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM functions WHERE file_path = ?1",
                params![path],
                |row| row.get(0),
            )?)
        })
        .await
    }
}

fn row_to_file_record(row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_path: row.get(0)?,
        language: row.get(1)?,
        module_path: row.get(2)?,
        is_test: row.get(3)?,
        line_count_total: row.get(4)?,
        line_count_code: row.get(5)?,
        line_count_comment: row.get(6)?,
        line_count_blank: row.get(7)?,
        size_bytes: row.get(8)?,
        file_hash: row.get(9)?,
        last_modified: row.get(10)?,
        indexed_at: row.get(11)?,
    })
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let chunk_type: String = row.get(2)?;
    let embedding_bytes: Vec<u8> = row.get(5)?;
    Ok(Chunk {
        chunk_id: row.get(0)?,
        file_path: row.get(1)?,
        chunk_type: match chunk_type.as_str() {
            "symbols" => ChunkType::Symbols,
            "definitions" => ChunkType::Definitions,
            "data" => ChunkType::Data,
            _ => ChunkType::Documentation,
        },
        title: row.get(3)?,
        text: row.get(4)?,
        embedding: schema::decode_embedding(&embedding_bytes),
        start_line: row.get(6)?,
        end_line: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_record(path: &str) -> FileRecord {
        FileRecord {
            file_path: path.to_string(),
            language: "go".to_string(),
            module_path: "".to_string(),
            is_test: false,
            line_count_total: 1,
            line_count_code: 1,
            line_count_comment: 0,
            line_count_blank: 0,
            size_bytes: 10,
            file_hash: "abc".to_string(),
            last_modified: 100,
            indexed_at: 100,
        }
    }

    #[tokio::test]
    async fn write_and_read_file_record() {
        let dir = TempDir::new().unwrap();
        let store = BranchStore::open(&dir.path().join("b.db")).unwrap();
        store
            .write_file(new_record("a.go"), Some("package x".to_string()))
            .await
            .unwrap();
        let got = store.get_file_record("a.go".to_string()).await.unwrap().unwrap();
        assert_eq!(got.file_hash, "abc");
        let content = store.get_file_content("a.go".to_string()).await.unwrap().unwrap();
        assert_eq!(content, "package x");
    }

    #[tokio::test]
    async fn delete_cascades_to_chunks() {
        let dir = TempDir::new().unwrap();
        let store = BranchStore::open(&dir.path().join("b.db")).unwrap();
        store.write_file(new_record("a.go"), None).await.unwrap();
        let chunk = Chunk {
            chunk_id: "code-symbols-a.go".to_string(),
            file_path: "a.go".to_string(),
            chunk_type: ChunkType::Symbols,
            title: "a.go".to_string(),
            text: "package x".to_string(),
            embedding: vec![0.1, 0.2],
            start_line: 1,
            end_line: 1,
            created_at: 100,
            updated_at: 100,
        };
        store.write_chunks_incremental(vec![chunk]).await.unwrap();
        assert_eq!(store.count_chunks().await.unwrap(), 1);

        store.delete_file("a.go".to_string()).await.unwrap();
        assert_eq!(store.count_chunks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn incremental_write_replaces_only_touched_file() {
        let dir = TempDir::new().unwrap();
        let store = BranchStore::open(&dir.path().join("b.db")).unwrap();
        store.write_file(new_record("a.go"), None).await.unwrap();
        store.write_file(new_record("b.go"), None).await.unwrap();

        let mk = |path: &str, id: &str| Chunk {
            chunk_id: id.to_string(),
            file_path: path.to_string(),
            chunk_type: ChunkType::Symbols,
            title: path.to_string(),
            text: "x".to_string(),
            embedding: vec![1.0],
            start_line: 1,
            end_line: 1,
            created_at: 1,
            updated_at: 1,
        };
        store
            .write_chunks_incremental(vec![mk("a.go", "code-symbols-a.go"), mk("b.go", "code-symbols-b.go")])
            .await
            .unwrap();
        store
            .write_chunks_incremental(vec![mk("a.go", "code-symbols-a.go")])
            .await
            .unwrap();

        let b_chunks = store.get_chunks_for_file("b.go".to_string()).await.unwrap();
        assert_eq!(b_chunks.len(), 1);
        let a_chunks = store.get_chunks_for_file("a.go".to_string()).await.unwrap();
        assert_eq!(a_chunks.len(), 1);
    }
}
