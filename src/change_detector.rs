//! ChangeDetector: two-stage diff (mtime fast-path, hash verification)
//! between disk and the files table.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::discovery::FileDiscovery;
use crate::error::IndexError;
use crate::error::Result;
use crate::hasher;
use crate::storage::BranchStore;
use crate::types::ChangeSet;

pub struct ChangeDetector {
    store: Arc<BranchStore>,
    discovery: FileDiscovery,
    root: std::path::PathBuf,
}

fn mtime_secs(path: &Path) -> Result<i64> {
    let meta = std::fs::metadata(path).map_err(|e| IndexError::io(path, e))?;
    let modified = meta.modified().map_err(|e| IndexError::io(path, e))?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

impl ChangeDetector {
    pub fn new(store: Arc<BranchStore>, discovery: FileDiscovery, root: std::path::PathBuf) -> Self {
        Self {
            store,
            discovery,
            root,
        }
    }

    /// `hint`: `None` means full scan (deletions reported); `Some(paths)`
    /// means only those paths are checked (no deletions reported, the
    /// watcher is assumed authoritative about adds/modifies).
    pub async fn detect(
        &self,
        hint: Option<&HashSet<String>>,
        cancel: &tokio::sync::watch::Receiver<bool>,
    ) -> Result<ChangeSet> {
        let db_files = self.store.get_all_files().await?;

        let candidates: Vec<String> = match hint {
            Some(paths) => paths.iter().cloned().collect(),
            None => {
                let found = self.discovery.walk(&self.root)?;
                found
                    .code
                    .into_iter()
                    .chain(found.docs)
                    .filter_map(|p| {
                        p.strip_prefix(&self.root)
                            .ok()
                            .map(|r| r.to_string_lossy().replace('\\', "/"))
                    })
                    .collect()
            }
        };

        let mut set = ChangeSet::default();
        let mut visited: HashSet<String> = HashSet::new();

        for rel in candidates {
            if *cancel.borrow() {
                return Err(IndexError::Cancelled {
                    phase: "change-detection".to_string(),
                });
            }
            visited.insert(rel.clone());
            let abs = self.root.join(&rel);
            let disk_stat = std::fs::metadata(&abs);

            let in_db = db_files.get(&rel);

            let disk_meta = match disk_stat {
                Ok(m) => m,
                Err(_) => {
                    // File disappeared; deletes are handled by separate
                    // events (full-scan path only reports what it can
                    // still stat).
                    continue;
                }
            };

            let disk_mtime = disk_meta
                .modified()
                .ok()
                .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            match in_db {
                None => {
                    set.added.insert(rel);
                }
                Some(record) => {
                    if disk_mtime == record.last_modified {
                        set.unchanged.insert(rel);
                        continue;
                    }
                    let hash = hasher::hash_file(&abs)?;
                    if hash == record.file_hash {
                        set.unchanged.insert(rel.clone());
                        set.mtime_drift.insert(rel);
                    } else {
                        set.modified.insert(rel);
                    }
                }
            }
        }

        if hint.is_none() {
            for path in db_files.keys() {
                if !visited.contains(path) {
                    set.deleted.insert(path.clone());
                }
            }
        }

        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileRecord;
    use tempfile::TempDir;

    fn discovery() -> FileDiscovery {
        FileDiscovery::new(
            &["**/*.go".to_string()],
            &["**/*.md".to_string()],
            &["**/.git/**".to_string()],
        )
        .unwrap()
    }

    fn no_cancel() -> tokio::sync::watch::Receiver<bool> {
        tokio::sync::watch::channel(false).1
    }

    #[tokio::test]
    async fn reports_added_for_new_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.go"), "package x").unwrap();
        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        let detector = ChangeDetector::new(store, discovery(), dir.path().to_path_buf());

        let changes = detector.detect(None, &no_cancel()).await.unwrap();
        assert!(changes.added.contains("a.go"));
    }

    #[tokio::test]
    async fn equal_mtime_is_unchanged_without_hashing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.go");
        std::fs::write(&path, "package x").unwrap();
        let mtime = mtime_secs(&path).unwrap();

        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        store
            .write_file(
                FileRecord {
                    file_path: "a.go".to_string(),
                    language: "go".to_string(),
                    module_path: "".to_string(),
                    is_test: false,
                    line_count_total: 1,
                    line_count_code: 1,
                    line_count_comment: 0,
                    line_count_blank: 0,
                    size_bytes: 9,
                    file_hash: "deadbeef".to_string(), // deliberately wrong; must not be checked
                    last_modified: mtime,
                    indexed_at: mtime,
                },
                None,
            )
            .await
            .unwrap();

        let detector = ChangeDetector::new(store, discovery(), dir.path().to_path_buf());
        let changes = detector.detect(None, &no_cancel()).await.unwrap();
        assert!(changes.unchanged.contains("a.go"));
        assert!(changes.modified.is_empty());
    }

    #[tokio::test]
    async fn mtime_drift_with_same_hash_is_unchanged_but_flagged() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.go");
        std::fs::write(&path, "package x").unwrap();
        let hash = hasher::hash_file(&path).unwrap();
        let mtime = mtime_secs(&path).unwrap();

        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        store
            .write_file(
                FileRecord {
                    file_path: "a.go".to_string(),
                    language: "go".to_string(),
                    module_path: "".to_string(),
                    is_test: false,
                    line_count_total: 1,
                    line_count_code: 1,
                    line_count_comment: 0,
                    line_count_blank: 0,
                    size_bytes: 9,
                    file_hash: hash,
                    last_modified: mtime - 1000, // stale mtime, same content
                    indexed_at: mtime,
                },
                None,
            )
            .await
            .unwrap();

        let detector = ChangeDetector::new(store, discovery(), dir.path().to_path_buf());
        let changes = detector.detect(None, &no_cancel()).await.unwrap();
        assert!(changes.unchanged.contains("a.go"));
        assert!(changes.mtime_drift.contains("a.go"));
    }

    #[tokio::test]
    async fn deleted_reported_only_on_full_scan() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BranchStore::open(&dir.path().join("idx.db")).unwrap());
        store
            .write_file(
                FileRecord {
                    file_path: "gone.go".to_string(),
                    language: "go".to_string(),
                    module_path: "".to_string(),
                    is_test: false,
                    line_count_total: 1,
                    line_count_code: 1,
                    line_count_comment: 0,
                    line_count_blank: 0,
                    size_bytes: 1,
                    file_hash: "x".to_string(),
                    last_modified: 1,
                    indexed_at: 1,
                },
                None,
            )
            .await
            .unwrap();

        let detector = ChangeDetector::new(store.clone(), discovery(), dir.path().to_path_buf());
        let changes = detector.detect(None, &no_cancel()).await.unwrap();
        assert!(changes.deleted.contains("gone.go"));

        let mut hint = HashSet::new();
        hint.insert("gone.go".to_string());
        let changes_hint = detector.detect(Some(&hint), &no_cancel()).await.unwrap();
        assert!(changes_hint.deleted.is_empty());
    }
}
