//! In-memory vector index over a markdown corpus.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ragflow_core::{CollaboratorError, Embedder, IndexStats, Retriever, ScoredChunk};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunker::Chunker;
use crate::vector::nearest;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Failed to read {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("Embedding failed: {0}")]
    Embedding(#[from] CollaboratorError),

    #[error("Embedder returned {got} vectors for {expected} chunks")]
    EmbeddingCount { expected: usize, got: usize },
}

struct IndexedChunk {
    source: String,
    chunk_index: usize,
    text: String,
    embedding: Vec<f32>,
}

/// Chunks and their embeddings, in insertion (corpus) order.
pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    chunker: Chunker,
    chunks: RwLock<Vec<IndexedChunk>>,
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>, chunker: Chunker) -> Self {
        Self { embedder, chunker, chunks: RwLock::new(Vec::new()) }
    }

    /// Index every `*.md` file under `dir`, recursively, in path order.
    ///
    /// A missing directory yields an empty index. Returns the number of
    /// documents indexed.
    pub async fn load_dir(&self, dir: &Path) -> Result<usize, IndexError> {
        if !dir.exists() {
            warn!(path = %dir.display(), "Data directory not found, index is empty");
            return Ok(0);
        }

        let files = collect_markdown(dir)?;

        let mut loaded = 0;
        for path in &files {
            let text = std::fs::read_to_string(path).map_err(|e| IndexError::Io {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let source = source_name(dir, path);
            let added = self.add_document(&source, &text).await?;
            debug!(source = %source, chunks = added, "Indexed document");
            loaded += 1;
        }

        let chunks = self.chunks.read().await.len();
        info!(path = %dir.display(), documents = loaded, chunks, "Corpus indexed");
        Ok(loaded)
    }

    /// Chunk, embed, and append one document. Returns the number of chunks added.
    pub async fn add_document(&self, source: &str, text: &str) -> Result<usize, IndexError> {
        let pieces = self.chunker.split(text);
        if pieces.is_empty() {
            return Ok(0);
        }

        let embeddings = self.embedder.embed(&pieces).await?;
        if embeddings.len() != pieces.len() {
            return Err(IndexError::EmbeddingCount { expected: pieces.len(), got: embeddings.len() });
        }

        let count = pieces.len();
        let mut chunks = self.chunks.write().await;
        for (chunk_index, (text, embedding)) in pieces.into_iter().zip(embeddings).enumerate() {
            chunks.push(IndexedChunk { source: source.to_string(), chunk_index, text, embedding });
        }
        Ok(count)
    }

    pub async fn len(&self) -> usize {
        self.chunks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Retriever for VectorIndex {
    fn name(&self) -> &str {
        "local-index"
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, CollaboratorError> {
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_vec = vectors
            .pop()
            .ok_or_else(|| CollaboratorError::InvalidRequest("embedder returned no vector for query".into()))?;

        let chunks = self.chunks.read().await;
        let ranked = nearest(&query_vec, chunks.iter().map(|c| c.embedding.as_slice()), k);

        Ok(ranked
            .into_iter()
            .map(|(i, distance)| {
                let c = &chunks[i];
                ScoredChunk {
                    source: c.source.clone(),
                    chunk_index: c.chunk_index,
                    text: c.text.clone(),
                    distance,
                }
            })
            .collect())
    }

    async fn stats(&self) -> IndexStats {
        let chunks = self.chunks.read().await;
        let documents: BTreeSet<&str> = chunks.iter().map(|c| c.source.as_str()).collect();
        IndexStats::new(documents.len(), chunks.len(), self.embedder.model())
    }
}

/// Every `*.md` file under `dir`, in path order.
fn collect_markdown(dir: &Path) -> Result<Vec<PathBuf>, IndexError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| IndexError::Io {
            path: e.path().unwrap_or(dir).to_path_buf(),
            reason: e.to_string(),
        })?;
        let is_markdown = entry.path().extension().is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
        if entry.file_type().is_file() && is_markdown {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Path relative to the corpus root, with `/` separators.
fn source_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
