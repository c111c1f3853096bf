//! Retrieval-augmented question answering over uploaded documents.

pub mod completion;
pub mod indexer;
pub mod metrics;
pub mod models;
pub mod rag;
pub mod rate_limiter;
pub mod server;
