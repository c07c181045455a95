//! Local corpus index for RAGFlow.
//!
//! Loads markdown documents from a directory, splits them into overlapping
//! chunks, embeds every chunk, and answers nearest-neighbour queries by
//! squared L2 distance. Implements [`ragflow_core::Retriever`].

pub mod chunker;
pub mod embedding;
pub mod store;
pub mod vector;

pub use chunker::Chunker;
pub use embedding::HashingEmbedder;
pub use store::{IndexError, VectorIndex};
pub use vector::{normalize, squared_l2};
