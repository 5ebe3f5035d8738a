//! CacheMaintenance: per-branch metadata tracking and age/size eviction.
//!
//! On-disk layout:
//! ```text
//! <cache-root>/<project-key>/
//!   branches/
//!     <branch>.db
//!   metadata.json
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::config::EvictionConfig;
use crate::error::IndexError;
use crate::error::Result;
use crate::storage::BranchStore;
use crate::types::BranchMetadata;

/// A stable, filesystem-safe key derived from a project's canonical path.
pub fn project_key(root: &Path) -> String {
    let canonical = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

pub fn project_cache_dir(cache_root: &Path, root: &Path) -> PathBuf {
    cache_root.join(project_key(root))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadataFile {
    version: u32,
    project_key: String,
    branches: HashMap<String, BranchMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub freed_mb: f64,
    pub remaining_mb: f64,
}

pub struct CacheMaintenance {
    project_dir: PathBuf,
    project_key: String,
    eviction: EvictionConfig,
    base_branch: String,
}

impl CacheMaintenance {
    pub fn new(project_dir: PathBuf, project_key: String, eviction: EvictionConfig, base_branch: String) -> Self {
        Self {
            project_dir,
            project_key,
            eviction,
            base_branch,
        }
    }

    fn metadata_path(&self) -> PathBuf {
        self.project_dir.join("metadata.json")
    }

    pub fn branches_dir(&self) -> PathBuf {
        self.project_dir.join("branches")
    }

    fn load_metadata(&self) -> Result<CacheMetadataFile> {
        let path = self.metadata_path();
        if !path.exists() {
            return Ok(CacheMetadataFile {
                version: 1,
                project_key: self.project_key.clone(),
                branches: HashMap::new(),
            });
        }
        let text = std::fs::read_to_string(&path).map_err(|e| IndexError::io(&path, e))?;
        serde_json::from_str(&text).map_err(|e| IndexError::CacheFailure {
            cause: format!("parsing {}: {e}", path.display()),
        })
    }

    fn save_metadata(&self, meta: &CacheMetadataFile) -> Result<()> {
        std::fs::create_dir_all(&self.project_dir).map_err(|e| IndexError::io(&self.project_dir, e))?;
        let text = serde_json::to_string_pretty(meta).map_err(|e| IndexError::CacheFailure {
            cause: format!("serializing metadata.json: {e}"),
        })?;
        std::fs::write(self.metadata_path(), text).map_err(|e| IndexError::io(self.metadata_path(), e))
    }

    pub fn status(&self) -> Result<HashMap<String, BranchMetadata>> {
        Ok(self.load_metadata()?.branches)
    }

    /// Runs after every successful index: refreshes this branch's
    /// metadata row, then evicts if the policy is enabled. Errors here
    /// are expected to be logged and swallowed by the caller.
    pub async fn after_index(&self, branch: &str, store: &BranchStore) -> Result<()> {
        let mut meta = self.load_metadata()?;

        if self.eviction.update_metadata {
            let size_mb = store.size_bytes() as f64 / (1024.0 * 1024.0);
            let chunk_count = store.count_chunks().await?;
            let now = chrono::Utc::now().timestamp();
            meta.branches.insert(
                branch.to_string(),
                BranchMetadata {
                    last_accessed: now,
                    size_mb,
                    chunk_count,
                    is_immortal: branch == self.base_branch,
                },
            );
            self.save_metadata(&meta)?;
        }

        if self.eviction.enabled {
            self.evict(&mut meta)?;
        }
        Ok(())
    }

    /// Walks branches oldest-`last_accessed`-first, skipping immortals,
    /// deleting branch DBs while total size exceeds `max_size_mb` or an
    /// individual branch is older than `max_age_days`.
    pub fn evict(&self, meta: &mut CacheMetadataFile) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        let max_age_secs = self.eviction.policy.max_age_days as i64 * 86_400;
        let now = chrono::Utc::now().timestamp();

        let mut ordered: Vec<(String, BranchMetadata)> =
            meta.branches.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        ordered.sort_by_key(|(_, m)| m.last_accessed);

        let mut total_mb: f64 = ordered.iter().map(|(_, m)| m.size_mb).sum();

        for (branch, info) in &ordered {
            if info.is_immortal {
                continue;
            }
            let too_old = now - info.last_accessed > max_age_secs;
            let too_big = total_mb > self.eviction.policy.max_size_mb as f64;
            if !too_old && !too_big {
                continue;
            }
            let db_path = self.branches_dir().join(format!("{branch}.db"));
            if db_path.exists() {
                if let Err(e) = std::fs::remove_file(&db_path) {
                    tracing::warn!(branch = %branch, error = %e, "cache: failed deleting evicted branch db");
                    continue;
                }
            }
            total_mb -= info.size_mb;
            report.freed_mb += info.size_mb;
            report.evicted.push(branch.clone());
            meta.branches.remove(branch);
        }
        report.remaining_mb = total_mb;

        if !report.evicted.is_empty() {
            self.save_metadata(meta)?;
            tracing::info!(evicted = report.evicted.len(), freed_mb = report.freed_mb, "cache: evicted branches");
        }
        Ok(report)
    }

    /// Forces an eviction pass outside of an indexing run (the CLI's
    /// `evict` subcommand).
    pub fn force_evict(&self) -> Result<EvictionReport> {
        let mut meta = self.load_metadata()?;
        self.evict(&mut meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn project_key_is_stable_for_same_path() {
        let dir = TempDir::new().unwrap();
        let a = project_key(dir.path());
        let b = project_key(dir.path());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn after_index_writes_metadata_for_branch() {
        let project_dir = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let store = BranchStore::open(&db_dir.path().join("main.db")).unwrap();
        let cache = CacheMaintenance::new(
            project_dir.path().to_path_buf(),
            "key".to_string(),
            EvictionConfig::default(),
            "main".to_string(),
        );
        cache.after_index("main", &store).await.unwrap();
        let status = cache.status().unwrap();
        assert!(status.contains_key("main"));
        assert!(status["main"].is_immortal);
    }

    #[tokio::test]
    async fn after_index_skips_metadata_write_when_disabled() {
        let project_dir = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let store = BranchStore::open(&db_dir.path().join("main.db")).unwrap();
        let mut eviction = EvictionConfig::default();
        eviction.update_metadata = false;
        let cache = CacheMaintenance::new(
            project_dir.path().to_path_buf(),
            "key".to_string(),
            eviction,
            "main".to_string(),
        );
        cache.after_index("main", &store).await.unwrap();
        let status = cache.status().unwrap();
        assert!(!status.contains_key("main"));
    }

    #[test]
    fn evict_skips_immortal_branches() {
        let project_dir = TempDir::new().unwrap();
        let mut eviction = EvictionConfig::default();
        eviction.policy.max_age_days = 0;
        eviction.policy.max_size_mb = 0;
        let cache = CacheMaintenance::new(project_dir.path().to_path_buf(), "key".to_string(), eviction, "main".to_string());

        let mut meta = CacheMetadataFile {
            version: 1,
            project_key: "key".to_string(),
            branches: HashMap::new(),
        };
        meta.branches.insert(
            "main".to_string(),
            BranchMetadata {
                last_accessed: 1,
                size_mb: 100.0,
                chunk_count: 1,
                is_immortal: true,
            },
        );
        let report = cache.evict(&mut meta).unwrap();
        assert!(report.evicted.is_empty());
        assert!(meta.branches.contains_key("main"));
    }

    #[test]
    fn evict_removes_aged_out_branch() {
        let project_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(project_dir.path().join("branches")).unwrap();
        std::fs::write(project_dir.path().join("branches/feat.db"), b"x").unwrap();
        let mut eviction = EvictionConfig::default();
        eviction.policy.max_age_days = 0;
        let cache = CacheMaintenance::new(project_dir.path().to_path_buf(), "key".to_string(), eviction, "main".to_string());

        let mut meta = CacheMetadataFile {
            version: 1,
            project_key: "key".to_string(),
            branches: HashMap::new(),
        };
        meta.branches.insert(
            "feat".to_string(),
            BranchMetadata {
                last_accessed: 1,
                size_mb: 1.0,
                chunk_count: 1,
                is_immortal: false,
            },
        );
        let report = cache.evict(&mut meta).unwrap();
        assert_eq!(report.evicted, vec!["feat".to_string()]);
        assert!(!project_dir.path().join("branches/feat.db").exists());
    }
}
