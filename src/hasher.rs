//! Hasher/Classifier: content hashing and cheap per-file classification.

use std::io::Read;
use std::path::Path;

use sha2::Digest;
use sha2::Sha256;

use crate::error::IndexError;
use crate::error::Result;

pub struct LineCounts {
    pub total: i64,
    pub code: i64,
    pub comment: i64,
    pub blank: i64,
}

/// SHA-256 over the full file contents. Deterministic, no salting.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| IndexError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| IndexError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Reads up to 512 bytes; a null byte anywhere in that prefix marks the
/// file as binary. A read error propagates rather than guessing.
pub fn is_text(path: &Path) -> Result<bool> {
    let mut file = std::fs::File::open(path).map_err(|e| IndexError::io(path, e))?;
    let mut buf = [0u8; 512];
    let n = file.read(&mut buf).map_err(|e| IndexError::io(path, e))?;
    Ok(!buf[..n].contains(&0u8))
}

/// Extension -> language tag. Unknown extensions map to "unknown".
pub fn detect_language(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "go" => "go",
        "rs" => "rust",
        "py" => "python",
        "java" => "java",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "md" | "markdown" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "c" => "c",
        "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "sh" => "shell",
        _ => "unknown",
    }
    .to_string()
}

/// True if the path looks like a test file by extension or path-segment
/// convention.
pub fn is_test(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with("_test.go")
        || name.ends_with(".test.ts")
        || name.ends_with(".test.js")
        || name.ends_with(".spec.ts")
        || name.ends_with(".spec.js")
    {
        return true;
    }
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str(),
            Some("test") | Some("tests") | Some("__tests__")
        )
    })
}

fn comment_prefixes_for(language: &str) -> &'static [&'static str] {
    match language {
        "go" | "rust" | "java" | "typescript" | "javascript" | "c" | "cpp" => {
            &["//", "/*", "*"]
        }
        "python" | "shell" | "toml" | "yaml" => &["#"],
        _ => &[],
    }
}

/// Line-oriented scan classifying each line as code, comment, or blank.
/// Only single-line prefix matching is performed — no block-comment
/// state tracking across lines.
pub fn line_counts(path: &Path, language: &str) -> Result<LineCounts> {
    let text = std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;
    let prefixes = comment_prefixes_for(language);
    let mut total = 0i64;
    let mut code = 0i64;
    let mut comment = 0i64;
    let mut blank = 0i64;
    for line in text.lines() {
        total += 1;
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            blank += 1;
        } else if prefixes.iter().any(|p| trimmed.starts_with(p)) {
            comment += 1;
        } else {
            code += 1;
        }
    }
    Ok(LineCounts {
        total,
        code,
        comment,
        blank,
    })
}
