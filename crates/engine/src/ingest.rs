//! File ingestion: files and directories -> documents with text chunks

use crate::builder::Document;
use crate::{EngineError, Result};
use serde_json::json;
use std::path::Path;
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

/// Chunks shorter than this are dropped as noise
const MIN_CHUNK_LEN: usize = 20;

/// A processed file with its paragraph chunks
#[derive(Debug, Clone)]
pub struct IngestedFile {
    pub path: String,
    pub content: String,
    pub chunks: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Turns files and directories into raw text chunks
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader;

impl DocumentLoader {
    pub fn new() -> Self {
        Self
    }

    /// Read one file and chunk it by blank lines.
    ///
    /// Very short chunks are skipped; a file without usable chunks is
    /// kept whole as a single chunk.
    #[instrument(skip(self))]
    pub fn process_file(&self, path: &Path) -> Result<IngestedFile> {
        let content = std::fs::read_to_string(path)?;

        let chunks: Vec<String> = content
            .split("\n\n")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && s.len() >= MIN_CHUNK_LEN)
            .map(|s| s.to_string())
            .collect();

        let chunks = if chunks.is_empty() && !content.trim().is_empty() {
            vec![content.trim().to_string()]
        } else {
            chunks
        };

        debug!("Chunked {} into {} pieces", path.display(), chunks.len());

        Ok(IngestedFile {
            path: path.display().to_string(),
            metadata: json!({
                "bytes": content.len(),
                "chunks": chunks.len(),
            }),
            content,
            chunks,
        })
    }

    /// Walk a directory and process every matching file.
    ///
    /// `patterns` are file-name suffixes (".md", ".txt"); an empty list
    /// matches everything. Unreadable files are skipped with a warning.
    #[instrument(skip(self))]
    pub fn process_directory(
        &self,
        path: &Path,
        recursive: bool,
        patterns: &[String],
    ) -> Result<Vec<IngestedFile>> {
        if !path.is_dir() {
            return Err(EngineError::NotFound(format!(
                "Not a directory: {}",
                path.display()
            )));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files = Vec::new();

        for entry in WalkDir::new(path)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !patterns.is_empty() && !patterns.iter().any(|p| name.ends_with(p.as_str())) {
                continue;
            }
            match self.process_file(entry.path()) {
                Ok(file) => files.push(file),
                Err(e) => warn!("Skipping unreadable file {}: {}", entry.path().display(), e),
            }
        }

        Ok(files)
    }

    /// One document per chunk, ids derived from the file path
    pub fn to_documents(files: Vec<IngestedFile>) -> Vec<Document> {
        let mut documents = Vec::new();
        for file in files {
            for (i, chunk) in file.chunks.into_iter().enumerate() {
                documents.push(
                    Document::new(format!("{}#{}", file.path, i), chunk)
                        .with_source(file.path.clone()),
                );
            }
        }
        documents
    }
}
