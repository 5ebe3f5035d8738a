//! Indexing configuration.
//!
//! Loaded from TOML, project-first (`<root>/.cortex/index.toml`) then the
//! global `~/.cortex/index.toml`. Every optional field carries a serde
//! default so a partial file still produces a usable config.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::error::IndexError;
use crate::error::Result;

fn default_code_patterns() -> Vec<String> {
    vec!["**/*.go".to_string()]
}

fn default_docs_patterns() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/vendor/**".to_string(),
    ]
}

fn default_doc_chunk_size() -> u32 {
    800
}

fn default_overlap() -> u32 {
    100
}

fn default_embedding_dims() -> usize {
    768
}

fn default_true() -> bool {
    true
}

fn default_max_age_days() -> u32 {
    30
}

fn default_max_size_mb() -> u64 {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionPolicy {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            max_size_mb: default_max_size_mb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub update_metadata: bool,
    #[serde(default)]
    pub policy: EvictionPolicy,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_metadata: true,
            policy: EvictionPolicy::default(),
        }
    }
}

/// Top-level indexing configuration, matching the recognized options of
/// the external-interfaces contract exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub root_dir: PathBuf,
    pub output_dir: PathBuf,

    #[serde(default = "default_code_patterns")]
    pub code_patterns: Vec<String>,
    #[serde(default = "default_docs_patterns")]
    pub docs_patterns: Vec<String>,
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    #[serde(default = "default_doc_chunk_size")]
    pub doc_chunk_size: u32,
    #[serde(default = "default_overlap")]
    pub overlap: u32,

    #[serde(default)]
    pub embedding_provider: Option<String>,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub embedding_dims: usize,
    #[serde(default)]
    pub embedding_endpoint: Option<String>,

    #[serde(default)]
    pub eviction: EvictionConfig,
}

impl IndexConfig {
    /// Load from `<root>/.cortex/index.toml`, falling back to
    /// `~/.cortex/index.toml`, falling back to built-in defaults rooted
    /// at `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let project_path = root.join(".cortex").join("index.toml");
        if project_path.exists() {
            return Self::from_file(&project_path, root);
        }
        if let Some(home) = dirs::home_dir() {
            let global_path = home.join(".cortex").join("index.toml");
            if global_path.exists() {
                return Self::from_file(&global_path, root);
            }
        }
        let cfg = IndexConfig {
            root_dir: root.to_path_buf(),
            output_dir: root.join(".cortex"),
            code_patterns: default_code_patterns(),
            docs_patterns: default_docs_patterns(),
            ignore_patterns: default_ignore_patterns(),
            doc_chunk_size: default_doc_chunk_size(),
            overlap: default_overlap(),
            embedding_provider: None,
            embedding_model: None,
            embedding_dims: default_embedding_dims(),
            embedding_endpoint: None,
            eviction: EvictionConfig::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(path: &Path, root: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| IndexError::ConfigFailure {
            cause: format!("reading {}: {e}", path.display()),
        })?;
        let mut cfg: IndexConfig = toml::from_str(&text).map_err(|e| IndexError::ConfigFailure {
            cause: format!("parsing {}: {e}", path.display()),
        })?;
        if cfg.root_dir.as_os_str().is_empty() {
            cfg.root_dir = root.to_path_buf();
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Eagerly validate rather than fail lazily at first use.
    pub fn validate(&self) -> Result<()> {
        if self.doc_chunk_size == 0 {
            return Err(IndexError::ConfigFailure {
                cause: "doc_chunk_size must be > 0".to_string(),
            });
        }
        if self.overlap >= self.doc_chunk_size {
            return Err(IndexError::ConfigFailure {
                cause: "overlap must be smaller than doc_chunk_size".to_string(),
            });
        }
        if self.embedding_dims == 0 {
            return Err(IndexError::ConfigFailure {
                cause: "embedding_dims must be > 0".to_string(),
            });
        }
        if self.eviction.policy.max_size_mb == 0 {
            return Err(IndexError::ConfigFailure {
                cause: "eviction.policy.max_size_mb must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let dir = TempDir::new().unwrap();
        let cfg = IndexConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.doc_chunk_size, 800);
        assert_eq!(cfg.overlap, 100);
        assert!(cfg.eviction.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        let dir = TempDir::new().unwrap();
        let mut cfg = IndexConfig::load(dir.path()).unwrap();
        cfg.overlap = cfg.doc_chunk_size;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_project_override() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".cortex")).unwrap();
        std::fs::write(
            dir.path().join(".cortex/index.toml"),
            r#"
            root_dir = ""
            output_dir = ".cortex"
            doc_chunk_size = 400
            overlap = 50
            "#,
        )
        .unwrap();
        let cfg = IndexConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.doc_chunk_size, 400);
        assert_eq!(cfg.overlap, 50);
        assert_eq!(cfg.root_dir, dir.path());
    }
}
