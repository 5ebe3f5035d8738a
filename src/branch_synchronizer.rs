//! BranchSynchronizer: prepares a branch's database, transplanting
//! unchanged chunks from its ancestor branch on first index.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex as AsyncMutex;

use crate::error::Result;
use crate::hasher;
use crate::storage::BranchStore;
use crate::traits::GitOps;

/// Guards one branch database at a time; the map of per-branch locks is
/// itself guarded by an outer lock, acquisition order outer -> inner,
/// never reversed.
pub struct BranchSynchronizer {
    cache_root: PathBuf,
    git: Arc<dyn GitOps>,
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl BranchSynchronizer {
    pub fn new(cache_root: PathBuf, git: Arc<dyn GitOps>) -> Self {
        Self {
            cache_root,
            git,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn branch_db_path(&self, branch: &str) -> PathBuf {
        self.cache_root.join("branches").join(format!("{branch}.db"))
    }

    fn lock_for(&self, branch: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(branch.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Ensures `branch`'s database exists with a valid schema, optionally
    /// transplanting unchanged ancestor chunks the first time it is
    /// created. Idempotent: a second call against an already-prepared
    /// branch is a cheap no-op.
    pub async fn prepare(&self, repo_root: &Path, branch: &str) -> Result<()> {
        let branch_lock = self.lock_for(branch);
        let _guard = branch_lock.lock().await;

        let db_path = self.branch_db_path(branch);
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::error::IndexError::io(parent, e))?;
        }

        if db_path.exists() && BranchStore::open_readonly(&db_path).is_ok() {
            tracing::debug!(branch, "branch db already prepared");
            return Ok(());
        }

        let store = BranchStore::open(&db_path)?;
        tracing::info!(branch, path = %db_path.display(), "created branch db");

        let ancestor = match self.git.find_ancestor(repo_root, branch).await {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(branch, error = %e, "could not determine ancestor branch, skipping transplant");
                return Ok(());
            }
        };
        if ancestor.is_empty() {
            return Ok(());
        }

        let ancestor_path = self.branch_db_path(&ancestor);
        if !ancestor_path.exists() {
            tracing::debug!(branch, ancestor = %ancestor, "ancestor db absent, nothing to transplant");
            return Ok(());
        }

        let ancestor_store = match BranchStore::open_readonly(&ancestor_path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(branch, ancestor = %ancestor, error = %e, "ancestor db unreadable, skipping transplant");
                return Ok(());
            }
        };

        let hashes = match ancestor_store.get_file_hashes().await {
            Ok(h) => h,
            Err(e) => {
                tracing::warn!(branch, error = %e, "could not read ancestor file hashes");
                return Ok(());
            }
        };

        let mut entries = Vec::new();
        for (rel_path, ancestor_hash) in hashes {
            let abs_path = repo_root.join(&rel_path);
            let on_disk_hash = match hasher::hash_file(&abs_path) {
                Ok(h) => h,
                Err(_) => continue, // file no longer exists or unreadable; skip
            };
            if on_disk_hash != ancestor_hash {
                continue;
            }
            let record = match ancestor_store.get_file_record(rel_path.clone()).await {
                Ok(Some(r)) => r,
                _ => continue,
            };
            let chunks = match ancestor_store.get_chunks_for_file(rel_path.clone()).await {
                Ok(c) => c,
                Err(_) => continue,
            };
            entries.push((record, chunks));
        }

        let now = chrono::Utc::now().timestamp();
        match store.transplant_unchanged(entries, now).await {
            Ok((files, chunks)) => {
                tracing::info!(branch, ancestor = %ancestor, files, chunks, "transplanted unchanged ancestor chunks");
            }
            Err(e) => {
                tracing::warn!(branch, ancestor = %ancestor, error = %e, "chunk transplant failed, proceeding without it");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedAncestor(String);

    #[async_trait]
    impl GitOps for FixedAncestor {
        async fn current_branch(&self, _repo_root: &Path) -> Result<String> {
            Ok("feat".to_string())
        }
        async fn find_ancestor(&self, _repo_root: &Path, _branch: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn creates_db_with_no_ancestor() {
        let cache = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let sync = BranchSynchronizer::new(cache.path().to_path_buf(), Arc::new(FixedAncestor(String::new())));
        sync.prepare(repo.path(), "main").await.unwrap();
        assert!(sync.branch_db_path("main").exists());
    }

    #[tokio::test]
    async fn second_prepare_is_noop() {
        let cache = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let sync = BranchSynchronizer::new(cache.path().to_path_buf(), Arc::new(FixedAncestor(String::new())));
        sync.prepare(repo.path(), "main").await.unwrap();
        sync.prepare(repo.path(), "main").await.unwrap();
    }

    struct CountingAncestor(std::sync::atomic::AtomicUsize);

    #[async_trait]
    impl GitOps for CountingAncestor {
        async fn current_branch(&self, _repo_root: &Path) -> Result<String> {
            Ok("feat".to_string())
        }
        async fn find_ancestor(&self, _repo_root: &Path, _branch: &str) -> Result<String> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn concurrent_prepare_creates_db_exactly_once() {
        let cache = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        let git = Arc::new(CountingAncestor(std::sync::atomic::AtomicUsize::new(0)));
        let sync = Arc::new(BranchSynchronizer::new(cache.path().to_path_buf(), git.clone()));

        let repo_a = repo.path().to_path_buf();
        let repo_b = repo.path().to_path_buf();
        let sync_a = sync.clone();
        let sync_b = sync.clone();

        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { sync_a.prepare(&repo_a, "main").await }),
            tokio::spawn(async move { sync_b.prepare(&repo_b, "main").await }),
        );
        r1.unwrap().unwrap();
        r2.unwrap().unwrap();

        assert!(sync.branch_db_path("main").exists());
        assert_eq!(git.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transplants_unchanged_chunks_from_ancestor() {
        let cache = TempDir::new().unwrap();
        let repo = TempDir::new().unwrap();
        std::fs::write(repo.path().join("a.go"), "package x").unwrap();
        let hash = hasher::hash_file(&repo.path().join("a.go")).unwrap();

        let sync = BranchSynchronizer::new(cache.path().to_path_buf(), Arc::new(FixedAncestor(String::new())));
        sync.prepare(repo.path(), "main").await.unwrap();

        let main_store = BranchStore::open(&sync.branch_db_path("main")).unwrap();
        main_store
            .write_file(
                crate::types::FileRecord {
                    file_path: "a.go".to_string(),
                    language: "go".to_string(),
                    module_path: String::new(),
                    is_test: false,
                    line_count_total: 1,
                    line_count_code: 1,
                    line_count_comment: 0,
                    line_count_blank: 0,
                    size_bytes: 9,
                    file_hash: hash,
                    last_modified: 1,
                    indexed_at: 1,
                },
                Some("package x".to_string()),
            )
            .await
            .unwrap();
        let chunk = crate::types::Chunk {
            chunk_id: "code-symbols-a.go".to_string(),
            file_path: "a.go".to_string(),
            chunk_type: crate::types::ChunkType::Symbols,
            title: "a.go".to_string(),
            text: "package x".to_string(),
            embedding: vec![0.5, 0.25],
            start_line: 1,
            end_line: 1,
            created_at: 1,
            updated_at: 1,
        };
        main_store.write_chunks_incremental(vec![chunk]).await.unwrap();
        drop(main_store);

        let sync2 = BranchSynchronizer::new(cache.path().to_path_buf(), Arc::new(FixedAncestor("main".to_string())));
        sync2.prepare(repo.path(), "feat").await.unwrap();

        let feat_store = BranchStore::open_readonly(&sync2.branch_db_path("feat")).unwrap();
        let chunks = feat_store.get_chunks_for_file("a.go".to_string()).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].created_at, 1);
        assert!(chunks[0].updated_at >= 1);
        assert_eq!(chunks[0].embedding, vec![0.5, 0.25]);
    }
}
