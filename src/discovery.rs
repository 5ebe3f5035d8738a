//! FileDiscovery: walks the working tree and partitions files by glob set.

use std::path::Path;
use std::path::PathBuf;

use globset::Glob;
use globset::GlobSet;
use globset::GlobSetBuilder;

use crate::error::IndexError;
use crate::error::Result;

pub struct DiscoveredFiles {
    pub code: Vec<PathBuf>,
    pub docs: Vec<PathBuf>,
}

pub struct FileDiscovery {
    code_patterns: GlobSet,
    docs_patterns: GlobSet,
    ignore_patterns: GlobSet,
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        let glob = Glob::new(p).map_err(|e| IndexError::ConfigFailure {
            cause: format!("invalid glob pattern {p}: {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| IndexError::ConfigFailure {
        cause: format!("building glob set: {e}"),
    })
}

impl FileDiscovery {
    pub fn new(
        code_patterns: &[String],
        docs_patterns: &[String],
        ignore_patterns: &[String],
    ) -> Result<Self> {
        Ok(Self {
            code_patterns: build_set(code_patterns)?,
            docs_patterns: build_set(docs_patterns)?,
            ignore_patterns: build_set(ignore_patterns)?,
        })
    }

    /// `rel` uses `/` separators regardless of platform.
    fn is_ignored(&self, rel: &str) -> bool {
        if rel == ".cortex" || rel.starts_with(".cortex/") {
            return true;
        }
        if self.ignore_patterns.is_match(rel) {
            return true;
        }
        self.ignore_patterns.is_match(format!("{rel}/**"))
    }

    fn matches_top_level(set: &GlobSet, rel: &str) -> bool {
        if set.is_match(rel) {
            return true;
        }
        // A root-level file "foo.go" should still satisfy a pattern like
        // "**/*.go" as if the "**/" prefix were dropped for depth-0 paths.
        set.is_match(format!("./{rel}"))
    }

    /// True if `rel` is not ignored and matches either the code or docs
    /// glob set. Used by the watcher to filter raw filesystem events
    /// without a full tree walk.
    pub fn is_in_scope(&self, rel: &str) -> bool {
        if self.is_ignored(rel) {
            return false;
        }
        Self::matches_top_level(&self.code_patterns, rel) || Self::matches_top_level(&self.docs_patterns, rel)
    }

    /// True if a directory at `rel` should be excluded from a recursive
    /// watch (e.g. `.git`, `vendor`).
    pub fn is_ignored_dir(&self, rel: &str) -> bool {
        self.is_ignored(rel)
    }

    pub fn walk(&self, root: &Path) -> Result<DiscoveredFiles> {
        let mut code = Vec::new();
        let mut docs = Vec::new();
        self.walk_dir(root, root, &mut code, &mut docs)?;
        Ok(DiscoveredFiles { code, docs })
    }

    fn walk_dir(
        &self,
        root: &Path,
        dir: &Path,
        code: &mut Vec<PathBuf>,
        docs: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => return Err(IndexError::io(dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| IndexError::io(dir, e))?;
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if self.is_ignored(&rel) {
                continue;
            }
            let file_type = entry.file_type().map_err(|e| IndexError::io(&path, e))?;
            if file_type.is_dir() {
                self.walk_dir(root, &path, code, docs)?;
            } else if file_type.is_file() {
                if Self::matches_top_level(&self.code_patterns, &rel) {
                    code.push(path);
                } else if Self::matches_top_level(&self.docs_patterns, &rel) {
                    docs.push(path);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn discovery() -> FileDiscovery {
        FileDiscovery::new(
            &["**/*.go".to_string()],
            &["**/*.md".to_string()],
            &["**/.git/**".to_string(), "**/vendor/**".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn partitions_code_and_docs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.go"), "package x").unwrap();
        std::fs::write(dir.path().join("README.md"), "# T").unwrap();
        std::fs::write(dir.path().join("data.bin"), "x").unwrap();

        let found = discovery().walk(dir.path()).unwrap();
        assert_eq!(found.code.len(), 1);
        assert_eq!(found.docs.len(), 1);
    }

    #[test]
    fn ignores_cortex_and_vendor() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".cortex")).unwrap();
        std::fs::write(dir.path().join(".cortex/index.toml"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("vendor/pkg")).unwrap();
        std::fs::write(dir.path().join("vendor/pkg/a.go"), "package x").unwrap();
        std::fs::write(dir.path().join("a.go"), "package x").unwrap();

        let found = discovery().walk(dir.path()).unwrap();
        assert_eq!(found.code.len(), 1);
        assert_eq!(found.code[0].file_name().unwrap(), "a.go");
    }

    #[test]
    fn recurses_into_subdirectories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/sub")).unwrap();
        std::fs::write(dir.path().join("pkg/sub/b.go"), "package sub").unwrap();

        let found = discovery().walk(dir.path()).unwrap();
        assert_eq!(found.code.len(), 1);
    }
}
