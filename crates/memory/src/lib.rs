//! Session memory for RAGFlow.
//!
//! Each session keeps a bounded, ordered list of completed turns. The store
//! hands out one exclusive guard per session at a time, which serializes the
//! queries of one session while letting different sessions run in parallel.

pub mod session;
pub mod store;

pub use session::Session;
pub use store::{SessionGuard, SessionStore};
