//! # RAGFlow Core
//!
//! Domain types, collaborator traits, and error definitions for the RAGFlow
//! retrieval-augmented workflow engine. This crate has **no framework
//! dependencies**: it defines the model that every other crate implements
//! against.
//!
//! ## Layout
//!
//! External collaborators (similarity search, text generation, embeddings)
//! are traits here. Implementations live in their own crates, which keeps
//! the engine testable with scripted stand-ins and keeps the dependency
//! graph pointing inward.

pub mod error;
pub mod message;
pub mod query;
pub mod chunk;
pub mod retriever;
pub mod generator;
pub mod embedding;
pub mod turn;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{CollaboratorError, WorkflowError};
pub use message::{Message, Role};
pub use query::{Query, SessionId};
pub use chunk::{DocumentRef, IndexStats, ScoredChunk, TieBreak};
pub use retriever::Retriever;
pub use generator::{GenerationRequest, Generator, StreamChunk};
pub use embedding::Embedder;
pub use turn::{Outcome, Step, StepState, StepStatus, Turn};
pub use event::{DomainEvent, EventBus};
