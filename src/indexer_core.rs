//! IndexerCore: the single orchestration entry point tying together
//! change detection, file writes, the Processor pipeline, the graph
//! update, and cache maintenance.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::branch_synchronizer::BranchSynchronizer;
use crate::cache::CacheMaintenance;
use crate::change_detector::ChangeDetector;
use crate::discovery::FileDiscovery;
use crate::error::Result;
use crate::graph_updater::GraphUpdater;
use crate::processor::Processor;
use crate::storage::BranchStore;
use crate::types::ChangeSet;
use crate::types::IndexStats;
use crate::types::PendingFile;

pub struct IndexerCore {
    root: PathBuf,
    branch: String,
    store: Arc<BranchStore>,
    detector: ChangeDetector,
    processor: Processor,
    graph_updater: GraphUpdater,
    cache: Option<Arc<CacheMaintenance>>,
    synchronizer: Option<Arc<BranchSynchronizer>>,
    first_run: std::sync::atomic::AtomicBool,
}

#[allow(clippy::too_many_arguments)]
impl IndexerCore {
    pub fn new(
        root: PathBuf,
        branch: String,
        store: Arc<BranchStore>,
        discovery: FileDiscovery,
        processor: Processor,
        graph_updater: GraphUpdater,
        cache: Option<Arc<CacheMaintenance>>,
        synchronizer: Option<Arc<BranchSynchronizer>>,
    ) -> Self {
        let detector = ChangeDetector::new(store.clone(), discovery, root.clone());
        Self {
            root,
            branch,
            store,
            detector,
            processor,
            graph_updater,
            cache,
            synchronizer,
            first_run: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub async fn index(
        &self,
        hint: Option<std::collections::HashSet<String>>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<IndexStats> {
        let start = Instant::now();

        if self.first_run.swap(false, std::sync::atomic::Ordering::SeqCst) {
            if let Some(sync) = &self.synchronizer {
                if let Err(e) = sync.prepare(&self.root, &self.branch).await {
                    tracing::warn!(branch = %self.branch, error = %e, "branch synchronizer prepare failed");
                }
            }
        }

        let changes = self.detector.detect(hint.as_ref(), cancel).await?;

        for path in &changes.deleted {
            if let Err(e) = self.store.delete_file(path.clone()).await {
                tracing::warn!(path = %path, error = %e, "failed deleting file record");
            }
        }

        if !changes.unchanged.is_empty() {
            let updates = self.mtime_updates(&changes)?;
            if !updates.is_empty() {
                self.store.update_file_mtimes(updates).await?;
            }
        }

        let mut stats = IndexStats {
            files_added: changes.added.len(),
            files_modified: changes.modified.len(),
            files_deleted: changes.deleted.len(),
            files_unchanged: changes.unchanged.len(),
            ..Default::default()
        };

        let to_process = self.resolve_pending(&changes);
        if !to_process.is_empty() {
            let outcome = self.processor.process(to_process, cancel).await?;
            stats.code_files_processed = outcome.code_files_processed;
            stats.docs_processed = outcome.docs_processed;
            stats.total_code_chunks = outcome.total_code_chunks;
            stats.total_doc_chunks = outcome.total_doc_chunks;
        }

        self.graph_updater.update(&self.root, &changes).await;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.after_index(&self.branch, &self.store).await {
                tracing::warn!(branch = %self.branch, error = %e, "cache maintenance failed");
            }
        }

        stats.indexing_time_ms = start.elapsed().as_millis();
        Ok(stats)
    }

    fn resolve_pending(&self, changes: &ChangeSet) -> Vec<PendingFile> {
        changes
            .added
            .iter()
            .chain(changes.modified.iter())
            .map(|rel| PendingFile {
                rel_path: rel.clone(),
                abs_path: self.root.join(rel),
            })
            .collect()
    }

    /// Refresh `last_modified` for files whose mtime drifted but whose
    /// content hash did not change.
    fn mtime_updates(&self, changes: &ChangeSet) -> Result<Vec<(String, i64)>> {
        let mut updates = Vec::new();
        for rel in &changes.mtime_drift {
            let abs = self.root.join(rel);
            let meta = match std::fs::metadata(&abs) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let mtime = meta
                .modified()
                .ok()
                .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            updates.push((rel.clone(), mtime));
        }
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::DeterministicTestProvider;
    use crate::testutil::LineScanGoParser;
    use crate::traits::GraphExtractor;
    use crate::traits::NoopInterfaceInferencer;
    use tempfile::TempDir;

    struct NoopExtractor;
    impl GraphExtractor for NoopExtractor {
        fn extract(&self, _absolute_path: &Path) -> Result<Option<crate::types::CodeStructure>> {
            Ok(None)
        }
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn discovery() -> FileDiscovery {
        FileDiscovery::new(
            &["**/*.go".to_string()],
            &["**/*.md".to_string()],
            &["**/.git/**".to_string()],
        )
        .unwrap()
    }

    fn make_core(dir: &TempDir) -> IndexerCore {
        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        let processor = Processor::new(store.clone(), Arc::new(LineScanGoParser), Arc::new(DeterministicTestProvider::new(8)), 800, 100);
        let graph_updater = GraphUpdater::new(store.clone(), Arc::new(NoopExtractor), Arc::new(NoopInterfaceInferencer));
        IndexerCore::new(
            dir.path().to_path_buf(),
            "main".to_string(),
            store,
            discovery(),
            processor,
            graph_updater,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn first_index_reports_added_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.go"), "package x\nfunc F(){}\n").unwrap();
        let core = make_core(&dir);
        let stats = core.index(None, &no_cancel()).await.unwrap();
        assert_eq!(stats.files_added, 1);
        assert!(stats.total_code_chunks >= 1);
    }

    #[tokio::test]
    async fn reindex_with_no_changes_does_no_work() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.go"), "package x\nfunc F(){}\n").unwrap();
        let core = make_core(&dir);
        core.index(None, &no_cancel()).await.unwrap();
        let stats = core.index(None, &no_cancel()).await.unwrap();
        assert_eq!(stats.files_unchanged, 1);
        assert_eq!(stats.files_added, 0);
        assert_eq!(stats.total_code_chunks, 0);
    }

    #[tokio::test]
    async fn deleted_file_removed_from_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.go");
        std::fs::write(&path, "package x\nfunc F(){}\n").unwrap();
        let core = make_core(&dir);
        core.index(None, &no_cancel()).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        let stats = core.index(None, &no_cancel()).await.unwrap();
        assert_eq!(stats.files_deleted, 1);
    }
}
