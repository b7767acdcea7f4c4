//! # semantic-code-adapters
//!
//! Adapter implementations for ports (filesystem, embedding, vectordb, etc.).
//! This crate depends on `ports`, `shared`, and `vector`.

/// External embedding adapters.
pub mod embedding;

pub mod bm25;
pub mod cache;
/// Deterministic embedding adapter for tests.
pub mod embedding_test;
pub mod file_sync;
pub mod fs;
pub mod ignore;
pub mod log_sink;
pub mod logger;
pub mod registry;
pub mod self_check;
pub mod splitter;
pub mod telemetry;
pub mod vectordb;
pub mod vectordb_local;

/// Placeholder module for adapters.
pub mod placeholder {
    /// Placeholder function to verify the crate compiles.
    #[must_use]
    pub const fn adapters_crate_version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

pub use placeholder::adapters_crate_version;
