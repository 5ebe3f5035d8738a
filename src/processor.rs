//! Processor: parse -> chunk -> embed -> write pipeline.
//!
//! Phase order matters: file metadata is written before any chunk
//! referencing it, satisfying the FK precondition on `chunks.file_path`.

use std::sync::Arc;

use tokio::sync::watch;

use crate::chunking;
use crate::error::IndexError;
use crate::error::Result;
use crate::hasher;
use crate::storage::BranchStore;
use crate::traits::EmbedMode;
use crate::traits::Parser;
use crate::traits::Provider;
use crate::types::Chunk;
use crate::types::ChunkType;
use crate::types::FileRecord;
use crate::types::PendingFile;

const EMBED_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub code_files_processed: usize,
    pub docs_processed: usize,
    pub total_code_chunks: usize,
    pub total_doc_chunks: usize,
}

pub struct Processor {
    store: Arc<BranchStore>,
    parser: Arc<dyn Parser>,
    provider: Arc<dyn Provider>,
    doc_chunk_size: u32,
    overlap: u32,
}

struct CollectedFile {
    pending: PendingFile,
    record: FileRecord,
    content: Option<String>,
}

fn check_cancel(cancel: &watch::Receiver<bool>, phase: &str) -> Result<()> {
    if *cancel.borrow() {
        return Err(IndexError::Cancelled {
            phase: phase.to_string(),
        });
    }
    Ok(())
}

fn module_path_of(rel_path: &str) -> String {
    match rel_path.rfind('/') {
        Some(idx) => rel_path[..idx].to_string(),
        None => String::new(),
    }
}

impl Processor {
    pub fn new(
        store: Arc<BranchStore>,
        parser: Arc<dyn Parser>,
        provider: Arc<dyn Provider>,
        doc_chunk_size: u32,
        overlap: u32,
    ) -> Self {
        Self {
            store,
            parser,
            provider,
            doc_chunk_size,
            overlap,
        }
    }

    pub async fn process(
        &self,
        pending: Vec<PendingFile>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<ProcessOutcome> {
        let now = chrono::Utc::now().timestamp();

        // Phase 1: metadata collection.
        check_cancel(cancel, "metadata-collection")?;
        let mut collected = Vec::new();
        for file in pending {
            check_cancel(cancel, "metadata-collection")?;
            match self.collect_metadata(&file, now) {
                Ok(c) => collected.push(c),
                Err(e) => {
                    tracing::warn!(path = %file.rel_path, error = %e, "metadata collection failed, skipping file");
                }
            }
        }

        // Phase 2: file write.
        check_cancel(cancel, "file-write")?;
        let batch: Vec<(FileRecord, Option<String>)> = collected
            .iter()
            .map(|c| (c.record.clone(), c.content.clone()))
            .collect();
        if !batch.is_empty() {
            self.store.write_file_batch(batch).await?;
        }

        // Phase 3: parse code files.
        check_cancel(cancel, "parse-code")?;
        let mut code_chunks = Vec::new();
        let mut code_files_processed = 0usize;
        for file in &collected {
            check_cancel(cancel, "parse-code")?;
            if file.content.is_none() {
                continue;
            }
            match self.parser.parse(&file.pending.abs_path) {
                Ok(Some(extraction)) => {
                    code_files_processed += 1;
                    code_chunks.extend(build_code_chunks(&file.record, &file.pending.rel_path, &extraction, now));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %file.pending.rel_path, error = %e, "parse failed, skipping file");
                }
            }
        }

        // Phase 4: chunk markdown docs.
        check_cancel(cancel, "chunk-docs")?;
        let mut doc_chunks = Vec::new();
        let mut docs_processed = 0usize;
        for file in &collected {
            check_cancel(cancel, "chunk-docs")?;
            if file.record.language != "markdown" {
                continue;
            }
            let Some(content) = &file.content else {
                continue;
            };
            let candidates = chunking::chunk_markdown(content, self.doc_chunk_size, self.overlap);
            if candidates.is_empty() {
                continue;
            }
            docs_processed += 1;
            for c in candidates {
                let chunk_id = if c.chunk_index == 0 {
                    format!("doc-{}-s{}", file.pending.rel_path, c.section_index)
                } else {
                    format!("doc-{}-s{}-c{}", file.pending.rel_path, c.section_index, c.chunk_index)
                };
                doc_chunks.push(Chunk {
                    chunk_id,
                    file_path: file.pending.rel_path.clone(),
                    chunk_type: ChunkType::Documentation,
                    title: c.title,
                    text: c.text,
                    embedding: Vec::new(),
                    start_line: c.start_line,
                    end_line: c.end_line,
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        // Phase 5: embed.
        let mut all_chunks = code_chunks;
        all_chunks.append(&mut doc_chunks);
        self.embed_in_batches(&mut all_chunks, cancel).await?;

        let total_code_chunks = all_chunks
            .iter()
            .filter(|c| c.chunk_type != ChunkType::Documentation)
            .count();
        let total_doc_chunks = all_chunks.len() - total_code_chunks;

        // Phase 6: write chunks.
        check_cancel(cancel, "write-chunks")?;
        if !all_chunks.is_empty() {
            self.store.write_chunks_incremental(all_chunks).await?;
        }

        Ok(ProcessOutcome {
            code_files_processed,
            docs_processed,
            total_code_chunks,
            total_doc_chunks,
        })
    }

    fn collect_metadata(&self, file: &PendingFile, now: i64) -> Result<CollectedFile> {
        let path = &file.abs_path;
        let hash = hasher::hash_file(path)?;
        let is_text = hasher::is_text(path)?;
        let language = hasher::detect_language(path);
        let is_test = hasher::is_test(path);
        let counts = hasher::line_counts(path, &language).unwrap_or(hasher::LineCounts {
            total: 0,
            code: 0,
            comment: 0,
            blank: 0,
        });
        let size_bytes = std::fs::metadata(path).map_err(|e| IndexError::io(path, e))?.len() as i64;
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(now);

        let content = if is_text {
            std::fs::read_to_string(path).ok()
        } else {
            None
        };

        let record = FileRecord {
            file_path: file.rel_path.clone(),
            language,
            module_path: module_path_of(&file.rel_path),
            is_test,
            line_count_total: counts.total,
            line_count_code: counts.code,
            line_count_comment: counts.comment,
            line_count_blank: counts.blank,
            size_bytes,
            file_hash: hash,
            last_modified: mtime,
            indexed_at: now,
        };

        Ok(CollectedFile {
            pending: file.clone(),
            record,
            content,
        })
    }

    async fn embed_in_batches(&self, chunks: &mut [Chunk], cancel: &watch::Receiver<bool>) -> Result<()> {
        for batch in chunks.chunks_mut(EMBED_BATCH_SIZE) {
            check_cancel(cancel, "embed")?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.provider.embed(&texts, EmbedMode::Passage).await?;
            if vectors.len() != batch.len() {
                return Err(IndexError::ProviderFailure {
                    cause: format!(
                        "provider returned {} vectors for {} inputs",
                        vectors.len(),
                        batch.len()
                    ),
                });
            }
            for (chunk, vector) in batch.iter_mut().zip(vectors) {
                chunk.embedding = vector;
            }
            tracing::debug!(batch_size = batch.len(), "embedded chunk batch");
        }
        Ok(())
    }
}

fn build_code_chunks(
    record: &FileRecord,
    rel_path: &str,
    extraction: &crate::traits::ParseExtraction,
    now: i64,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    let has_symbols =
        extraction.package_name.is_some() || !extraction.types.is_empty() || !extraction.functions.is_empty();
    if has_symbols {
        let mut text = String::new();
        if let Some(pkg) = &extraction.package_name {
            text.push_str(&format!("package: {pkg}\n"));
        }
        text.push_str(&format!("imports: {}\n", extraction.import_count));
        if !extraction.types.is_empty() {
            text.push_str(&format!("types: {}\n", extraction.types.join(", ")));
        }
        if !extraction.functions.is_empty() {
            text.push_str(&format!("functions: {}\n", extraction.functions.join(", ")));
        }
        chunks.push(Chunk {
            chunk_id: format!("code-symbols-{rel_path}"),
            file_path: rel_path.to_string(),
            chunk_type: ChunkType::Symbols,
            title: rel_path.to_string(),
            text,
            embedding: Vec::new(),
            start_line: 1,
            end_line: record.line_count_total,
            created_at: now,
            updated_at: now,
        });
    }

    if !extraction.type_definitions.is_empty() || !extraction.function_signatures.is_empty() {
        let mut parts = Vec::new();
        parts.extend(extraction.type_definitions.iter().cloned());
        parts.extend(extraction.function_signatures.iter().cloned());
        chunks.push(Chunk {
            chunk_id: format!("code-definitions-{rel_path}"),
            file_path: rel_path.to_string(),
            chunk_type: ChunkType::Definitions,
            title: rel_path.to_string(),
            text: parts.join("\n\n"),
            embedding: Vec::new(),
            start_line: 1,
            end_line: record.line_count_total,
            created_at: now,
            updated_at: now,
        });
    }

    if !extraction.data_blocks.is_empty() {
        chunks.push(Chunk {
            chunk_id: format!("code-data-{rel_path}"),
            file_path: rel_path.to_string(),
            chunk_type: ChunkType::Data,
            title: rel_path.to_string(),
            text: extraction.data_blocks.join("\n\n"),
            embedding: Vec::new(),
            start_line: 1,
            end_line: record.line_count_total,
            created_at: now,
            updated_at: now,
        });
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::DeterministicTestProvider;
    use crate::testutil::LineScanGoParser;
    use tempfile::TempDir;

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn processes_code_and_doc_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.go"), "package x\nfunc F() {}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# T\n\npara one\n").unwrap();

        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        let processor = Processor::new(store.clone(), Arc::new(LineScanGoParser), Arc::new(DeterministicTestProvider::new(8)), 800, 100);

        let pending = vec![
            PendingFile {
                rel_path: "a.go".to_string(),
                abs_path: dir.path().join("a.go"),
            },
            PendingFile {
                rel_path: "README.md".to_string(),
                abs_path: dir.path().join("README.md"),
            },
        ];

        let outcome = processor.process(pending, &no_cancel()).await.unwrap();
        assert_eq!(outcome.code_files_processed, 1);
        assert_eq!(outcome.docs_processed, 1);
        assert!(outcome.total_code_chunks >= 1);
        assert!(outcome.total_doc_chunks >= 1);

        let chunks = store.get_chunks_for_file("a.go".to_string()).await.unwrap();
        assert!(chunks.iter().any(|c| c.chunk_id == "code-symbols-a.go"));
        assert!(chunks.iter().all(|c| !c.embedding.is_empty()));
    }

    #[tokio::test]
    async fn file_record_written_before_chunks_in_same_batch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.go"), "package x\nfunc F() {}\n").unwrap();
        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        let processor = Processor::new(store.clone(), Arc::new(LineScanGoParser), Arc::new(DeterministicTestProvider::new(8)), 800, 100);
        let pending = vec![PendingFile {
            rel_path: "a.go".to_string(),
            abs_path: dir.path().join("a.go"),
        }];
        processor.process(pending, &no_cancel()).await.unwrap();
        assert!(store.get_file_record("a.go".to_string()).await.unwrap().is_some());
    }
}
