//! External capability contracts consumed by the core.
//!
//! None of these traits are implemented by network- or VCS-specific
//! dependencies inside this crate beyond the thin default adapters below;
//! a host application is expected to supply its own `Provider` and, where
//! needed, its own `Parser`.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::CodeStructure;

/// Version-control interrogation, used by BranchSynchronizer.
#[async_trait]
pub trait GitOps: Send + Sync {
    /// Current branch name at `repo_root`, or `detached-<short-hash>`.
    async fn current_branch(&self, repo_root: &Path) -> Result<String>;

    /// "" if `branch` is itself a base branch, else "main" or "master" if
    /// either is an ancestor, else "".
    async fn find_ancestor(&self, repo_root: &Path, branch: &str) -> Result<String>;
}

/// Embedding mode, passed through to the Provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedMode {
    Passage,
    Query,
}

/// Text -> dense vector embedding capability.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    async fn close(&self) -> Result<()>;
}

/// The outcome of parsing one source file for code-chunk extraction.
#[derive(Debug, Clone, Default)]
pub struct ParseExtraction {
    pub package_name: Option<String>,
    pub import_count: usize,
    pub types: Vec<String>,
    pub functions: Vec<String>,
    /// Full source text of each type definition, in `types` order.
    pub type_definitions: Vec<String>,
    /// Signature-only text of each function, in `functions` order.
    pub function_signatures: Vec<String>,
    /// One block of text per top-level constant/variable.
    pub data_blocks: Vec<String>,
}

/// Language-specific source parsing, used by the Processor to build
/// symbols/definitions/data chunk candidates.
pub trait Parser: Send + Sync {
    /// `None` means "unsupported language", not an error.
    fn parse(&self, path: &Path) -> Result<Option<ParseExtraction>>;
}

/// Code-structure extraction, used by GraphUpdater.
pub trait GraphExtractor: Send + Sync {
    /// `None` means "unsupported extension", not an error.
    fn extract(&self, absolute_path: &Path) -> Result<Option<CodeStructure>>;
}

/// Interface-implementation re-inference, invoked after a graph update
/// that changed any type definitions.
#[async_trait]
pub trait InterfaceInferencer: Send + Sync {
    async fn infer(&self) -> Result<()>;
}

/// Shells out to `git` for `GitOps`. No library dependency of its own.
pub struct GitCliOps;

#[async_trait]
impl GitOps for GitCliOps {
    async fn current_branch(&self, repo_root: &Path) -> Result<String> {
        let root = repo_root.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let out = std::process::Command::new("git")
                .arg("-C")
                .arg(&root)
                .args(["rev-parse", "--abbrev-ref", "HEAD"])
                .output()
                .map_err(|e| crate::error::IndexError::io(&root, e))?;
            if !out.status.success() {
                let short = std::process::Command::new("git")
                    .arg("-C")
                    .arg(&root)
                    .args(["rev-parse", "--short", "HEAD"])
                    .output()
                    .ok()
                    .and_then(|o| String::from_utf8(o.stdout).ok())
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                return Ok(format!("detached-{short}"));
            }
            let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if name == "HEAD" {
                let short = std::process::Command::new("git")
                    .arg("-C")
                    .arg(&root)
                    .args(["rev-parse", "--short", "HEAD"])
                    .output()
                    .ok()
                    .and_then(|o| String::from_utf8(o.stdout).ok())
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Ok(format!("detached-{short}"))
            } else {
                Ok(name)
            }
        })
        .await
        .map_err(|e| crate::error::IndexError::io(repo_root, e))?
    }

    async fn find_ancestor(&self, repo_root: &Path, branch: &str) -> Result<String> {
        if branch == "main" || branch == "master" {
            return Ok(String::new());
        }
        let root = repo_root.to_path_buf();
        tokio::task::spawn_blocking(move || {
            for candidate in ["main", "master"] {
                let ok = std::process::Command::new("git")
                    .arg("-C")
                    .arg(&root)
                    .args(["merge-base", candidate, "HEAD"])
                    .output()
                    .map(|o| o.status.success())
                    .unwrap_or(false);
                if ok {
                    return Ok(candidate.to_string());
                }
            }
            Ok(String::new())
        })
        .await
        .map_err(|e| crate::error::IndexError::io(repo_root, e))?
    }
}

/// A placeholder implementation so `GraphUpdater` always has *an*
/// inferencer to call, even when no real type-relationship analysis is
/// wired up.
pub struct NoopInterfaceInferencer;

#[async_trait]
impl InterfaceInferencer for NoopInterfaceInferencer {
    async fn infer(&self) -> Result<()> {
        tracing::debug!("no-op interface inference");
        Ok(())
    }
}
