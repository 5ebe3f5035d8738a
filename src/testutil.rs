//! Test doubles shared across module test suites.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::traits::EmbedMode;
use crate::traits::Provider;

/// A hash-based fixed-dimension embedding provider. Deterministic so
/// round-trip assertions (same text -> same vector) don't need a real
/// model: each float is derived from a rolling FNV-1a hash of the input
/// text combined with its position in the output vector.
pub struct DeterministicTestProvider {
    dims: usize,
}

impl DeterministicTestProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in text.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (0..self.dims)
            .map(|i| {
                let mixed = hash.wrapping_add(i as u64).wrapping_mul(0x2545F4914F6CDD1D);
                ((mixed % 2000) as f32 / 1000.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl Provider for DeterministicTestProvider {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A parser that recognizes `.go` files by a trivial line scan, good
/// enough for exercising the Processor pipeline without a real grammar.
pub struct LineScanGoParser;

impl crate::traits::Parser for LineScanGoParser {
    fn parse(&self, path: &Path) -> Result<Option<crate::traits::ParseExtraction>> {
        if path.extension().and_then(|e| e.to_str()) != Some("go") {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path).map_err(|e| crate::error::IndexError::io(path, e))?;
        let mut functions = Vec::new();
        let mut function_signatures = Vec::new();
        for line in text.lines() {
            if let Some(rest) = line.trim_start().strip_prefix("func ") {
                let name = rest.split(['(', ' ']).next().unwrap_or("").to_string();
                if !name.is_empty() {
                    functions.push(name);
                    function_signatures.push(line.trim().to_string());
                }
            }
        }
        Ok(Some(crate::traits::ParseExtraction {
            package_name: None,
            import_count: 0,
            types: vec![],
            functions,
            type_definitions: vec![],
            function_signatures,
            data_blocks: vec![],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_yields_same_vector() {
        let provider = DeterministicTestProvider::new(8);
        let a = provider.embed(&["hello".to_string()], EmbedMode::Passage).await.unwrap();
        let b = provider.embed(&["hello".to_string()], EmbedMode::Passage).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
    }

    #[tokio::test]
    async fn different_text_yields_different_vector() {
        let provider = DeterministicTestProvider::new(8);
        let a = provider.embed(&["hello".to_string()], EmbedMode::Passage).await.unwrap();
        let b = provider.embed(&["goodbye".to_string()], EmbedMode::Passage).await.unwrap();
        assert_ne!(a, b);
    }
}
