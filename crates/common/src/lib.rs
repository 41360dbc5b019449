//! Unigraph Common Library
//!
//! Shared code for the Unigraph services including:
//! - Graph store abstraction (Neo4j over HTTP, in-memory snapshot)
//! - Text generation client abstraction
//! - The Graph-RAG query engine
//! - Error types and handling
//! - Configuration management
//! - Row caching
//! - Metrics and observability

pub mod cache;
pub mod config;
pub mod engine;
pub mod errors;
pub mod graph;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use engine::{QueryEngine, QueryOutcome};
pub use errors::{AppError, Result};
pub use graph::{EntityKind, GraphStore};
pub use llm::TextGenerator;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
