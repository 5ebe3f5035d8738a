//! GraphUpdater: incremental maintenance of the code-structure tables.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::storage::BranchStore;
use crate::traits::GraphExtractor;
use crate::traits::InterfaceInferencer;
use crate::types::ChangeSet;

pub struct GraphUpdater {
    store: Arc<BranchStore>,
    extractor: Arc<dyn GraphExtractor>,
    inferencer: Arc<dyn InterfaceInferencer>,
}

impl GraphUpdater {
    pub fn new(
        store: Arc<BranchStore>,
        extractor: Arc<dyn GraphExtractor>,
        inferencer: Arc<dyn InterfaceInferencer>,
    ) -> Self {
        Self {
            store,
            extractor,
            inferencer,
        }
    }

    /// Best-effort: every error is logged and swallowed, graph data is
    /// supplementary to the core index.
    pub async fn update(&self, root: &Path, changes: &ChangeSet) {
        let mut types_changed = false;

        for path in &changes.deleted {
            if let Err(e) = self.store.delete_structure_for_file(path.clone()).await {
                tracing::warn!(path = %path, error = %e, "graph: failed deleting structure rows");
            } else {
                types_changed = true;
            }
        }

        let mut touched = changes.added.iter().chain(changes.modified.iter()).collect::<Vec<_>>();
        touched.sort();
        for path in touched {
            let abs = root.join(path);
            let mut structure = match self.extractor.extract(&abs) {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "graph: extraction failed, skipping file");
                    continue;
                }
            };
            // The extractor only sees an absolute path and stamps its rows
            // with it; rewrite to the root-relative path so file_path
            // matches the files table's primary key (the FK the structure
            // tables declare).
            for t in &mut structure.types {
                t.file_path = path.clone();
            }
            for f in &mut structure.functions {
                f.file_path = path.clone();
            }
            for i in &mut structure.imports {
                i.file_path = path.clone();
            }
            if !structure.types.is_empty() {
                types_changed = true;
            }

            if let Err(e) = self.store.delete_structure_for_file(path.clone()).await {
                tracing::warn!(path = %path, error = %e, "graph: failed clearing old structure rows");
                continue;
            }

            let now = chrono::Utc::now().timestamp();
            let language = crate::hasher::detect_language(&abs);
            if let Err(e) = self.store.ensure_placeholder_file(path.clone(), language, now).await {
                tracing::warn!(path = %path, error = %e, "graph: failed ensuring placeholder file row");
                continue;
            }

            if let Err(e) = self
                .store
                .write_structure(
                    structure.types,
                    structure.type_fields,
                    structure.functions,
                    structure.function_parameters,
                    structure.function_calls,
                    structure.imports,
                )
                .await
            {
                tracing::warn!(path = %path, error = %e, "graph: failed writing structure rows");
            }
        }

        if types_changed {
            if let Err(e) = self.inferencer.infer().await {
                tracing::warn!(error = %e, "graph: interface inference failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::go_source::GoTagGraphExtractor;
    use crate::traits::NoopInterfaceInferencer;
    use tempfile::TempDir;

    #[tokio::test]
    async fn extracts_structure_for_added_go_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.go"), "package x\n\nfunc F() {}\n").unwrap();
        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        let updater = GraphUpdater::new(
            store.clone(),
            Arc::new(GoTagGraphExtractor::new().unwrap()),
            Arc::new(NoopInterfaceInferencer),
        );

        let mut changes = ChangeSet::default();
        changes.added.insert("a.go".to_string());
        updater.update(dir.path(), &changes).await;

        let functions = store.count_functions_for_file("a.go".to_string()).await.unwrap();
        assert_eq!(functions, 1);
    }

    #[tokio::test]
    async fn skips_unsupported_extensions_silently() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {}").unwrap();
        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        let updater = GraphUpdater::new(
            store,
            Arc::new(GoTagGraphExtractor::new().unwrap()),
            Arc::new(NoopInterfaceInferencer),
        );
        let mut changes = ChangeSet::default();
        changes.added.insert("a.rs".to_string());
        updater.update(dir.path(), &changes).await; // must not panic
    }

    #[tokio::test]
    async fn deleted_paths_clear_structure_rows() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        let updater = GraphUpdater::new(
            store,
            Arc::new(GoTagGraphExtractor::new().unwrap()),
            Arc::new(NoopInterfaceInferencer),
        );
        let mut changes = ChangeSet::default();
        changes.deleted.insert("gone.go".to_string());
        updater.update(dir.path(), &changes).await; // must not panic, no file present
    }
}
