//! Retrieved chunks and index statistics.

use serde::{Deserialize, Serialize};

/// A chunk returned by a retriever, with its distance to the query.
///
/// Lower distance means more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// Source document identifier (file name)
    pub source: String,

    /// Position of the chunk within its source document
    #[serde(default)]
    pub chunk_index: usize,

    pub text: String,

    pub distance: f32,
}

impl ScoredChunk {
    pub fn new(source: impl Into<String>, text: impl Into<String>, distance: f32) -> Self {
        Self {
            source: source.into(),
            chunk_index: 0,
            text: text.into(),
            distance,
        }
    }

    pub fn document_ref(&self) -> DocumentRef {
        DocumentRef {
            source: self.source.clone(),
            score: self.distance,
            preview: Some(self.preview(DocumentRef::PREVIEW_CHARS)),
        }
    }

    /// First `max_chars` characters of the text, for display.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut out: String = self.text.chars().take(max_chars).collect();
        if self.text.chars().count() > max_chars {
            out.push_str("...");
        }
        out
    }
}

/// A context document as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub source: String,
    pub score: f32,

    /// Leading text of the chunk, for display
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl DocumentRef {
    pub const PREVIEW_CHARS: usize = 200;
}

/// How chunks tying at the best distance are treated when cutting to top-K.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Strict top-K; ties keep retriever order.
    #[default]
    Stable,
    /// Every chunk tying the best distance is kept, even beyond K.
    IncludeTies,
}

/// Size and readiness of a retrieval index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// "ready" or "empty"
    pub status: String,
    pub documents: usize,
    pub chunks: usize,
    pub embedding_model: String,
}

impl IndexStats {
    pub fn new(documents: usize, chunks: usize, embedding_model: impl Into<String>) -> Self {
        Self {
            status: if chunks == 0 { "empty".into() } else { "ready".into() },
            documents,
            chunks,
            embedding_model: embedding_model.into(),
        }
    }
}
