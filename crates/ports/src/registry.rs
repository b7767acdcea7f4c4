//! Codebase collection registry boundary contract.

use crate::BoxFuture;
use semantic_code_domain::CodebaseRegistryEntry;
use semantic_code_shared::{RequestContext, Result};

/// Boundary contract for the codebase collection registry.
///
/// The registry tracks, per codebase root path, the last known indexing
/// status. Implementations are expected to keep an in-memory view as the
/// authoritative source of truth and persist it to disk on a best-effort
/// basis; a failed or delayed disk write must never be allowed to regress
/// the in-memory state (see `semantic-code-adapters::registry`).
pub trait RegistryPort: Send + Sync {
    /// Look up the current entry for a codebase root path.
    fn get(&self, ctx: &RequestContext, codebase_root: &str) -> BoxFuture<'_, Result<Option<CodebaseRegistryEntry>>>;

    /// Insert or replace the entry for a codebase root path.
    fn set(
        &self,
        ctx: &RequestContext,
        codebase_root: &str,
        entry: CodebaseRegistryEntry,
    ) -> BoxFuture<'_, Result<()>>;

    /// Remove the entry for a codebase root path, if present.
    fn remove(&self, ctx: &RequestContext, codebase_root: &str) -> BoxFuture<'_, Result<()>>;

    /// List all known `(codebase_root, entry)` pairs.
    fn list(&self, ctx: &RequestContext) -> BoxFuture<'_, Result<Vec<(Box<str>, CodebaseRegistryEntry)>>>;

    /// Reconcile persisted entries against codebase roots that currently
    /// have a backing collection.
    ///
    /// `indexed` entries for a root absent from `existing_roots` are
    /// dropped (the collection was removed out from under the registry,
    /// e.g. by a manual `clear_index` outside this process). `indexing`
    /// entries are never dropped by reconciliation, even when their root
    /// is absent from `existing_roots` — they may describe a
    /// freshly-created collection that is still being populated, and
    /// dropping them would reopen the race between "indexing complete"
    /// and "search says not indexed" that the registry exists to close.
    fn reconcile(
        &self,
        ctx: &RequestContext,
        existing_roots: &[Box<str>],
    ) -> BoxFuture<'_, Result<()>>;
}
