//! Local, file-backed codebase collection registry adapter.
//!
//! The in-memory map is the authoritative source of truth for the lifetime
//! of a process; disk persistence is best-effort and happens out-of-band
//! after each mutation so a slow or failing disk write never regresses a
//! reader's view of the in-memory state (see `semantic-code-ports::registry`).

use semantic_code_domain::CodebaseRegistryEntry;
use semantic_code_ports::{BoxFuture, LogFields, LoggerPort, RegistryPort};
use semantic_code_shared::{ErrorEnvelope, RequestContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    codebases: BTreeMap<Box<str>, CodebaseRegistryEntry>,
}

/// File-backed registry tracking indexing status per codebase root path.
pub struct LocalRegistry {
    path: Option<PathBuf>,
    state: Arc<RwLock<BTreeMap<Box<str>, CodebaseRegistryEntry>>>,
    logger: Option<Arc<dyn LoggerPort>>,
}

impl LocalRegistry {
    /// Build a registry persisted at `path`, seeding the in-memory view
    /// from any existing file. A missing file is treated as an empty
    /// registry; a corrupt file is surfaced as an error.
    pub async fn load(path: Option<PathBuf>, logger: Option<Arc<dyn LoggerPort>>) -> Result<Self> {
        let codebases = match &path {
            Some(path) => read_registry_file(path).await?.codebases,
            None => BTreeMap::new(),
        };
        Ok(Self {
            path,
            state: Arc::new(RwLock::new(codebases)),
            logger,
        })
    }

    /// An in-memory-only registry with no disk persistence.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Arc::new(RwLock::new(BTreeMap::new())),
            logger: None,
        }
    }

    fn spawn_persist(&self) {
        let Some(path) = self.path.clone() else {
            return;
        };
        let state = Arc::clone(&self.state);
        let logger = self.logger.clone();
        tokio::spawn(async move {
            let snapshot = { state.read().await.clone() };
            if let Err(error) = write_registry_file(&path, &snapshot).await
                && let Some(logger) = logger
            {
                let mut fields = LogFields::new();
                fields.insert("path".into(), path.display().to_string().into());
                logger.warn(
                    "registry.persist_failed",
                    &format!("failed to persist collection registry: {error}"),
                    Some(fields),
                );
            }
        });
    }
}

async fn read_registry_file(path: &Path) -> Result<RegistryFile> {
    match tokio::fs::read(path).await {
        Ok(payload) => serde_json::from_slice(&payload).map_err(|error| {
            ErrorEnvelope::unexpected(
                semantic_code_shared::ErrorCode::new("registry", "parse_failed"),
                format!("failed to parse collection registry: {error}"),
                semantic_code_shared::ErrorClass::NonRetriable,
            )
        }),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(RegistryFile::default()),
        Err(error) => Err(ErrorEnvelope::from(error)),
    }
}

async fn write_registry_file(
    path: &Path,
    codebases: &BTreeMap<Box<str>, CodebaseRegistryEntry>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(ErrorEnvelope::from)?;
    }
    let file = RegistryFile {
        codebases: codebases.clone(),
    };
    let payload = serde_json::to_vec_pretty(&file).map_err(|error| {
        ErrorEnvelope::unexpected(
            semantic_code_shared::ErrorCode::new("registry", "serialize_failed"),
            format!("failed to serialize collection registry: {error}"),
            semantic_code_shared::ErrorClass::NonRetriable,
        )
    })?;
    tokio::fs::write(path, payload)
        .await
        .map_err(ErrorEnvelope::from)
}

impl RegistryPort for LocalRegistry {
    fn get(
        &self,
        _ctx: &RequestContext,
        codebase_root: &str,
    ) -> BoxFuture<'_, Result<Option<CodebaseRegistryEntry>>> {
        let codebase_root = codebase_root.to_owned();
        Box::pin(async move { Ok(self.state.read().await.get(codebase_root.as_str()).cloned()) })
    }

    fn set(
        &self,
        _ctx: &RequestContext,
        codebase_root: &str,
        entry: CodebaseRegistryEntry,
    ) -> BoxFuture<'_, Result<()>> {
        let codebase_root: Box<str> = codebase_root.into();
        Box::pin(async move {
            self.state.write().await.insert(codebase_root, entry);
            self.spawn_persist();
            Ok(())
        })
    }

    fn remove(&self, _ctx: &RequestContext, codebase_root: &str) -> BoxFuture<'_, Result<()>> {
        let codebase_root = codebase_root.to_owned();
        Box::pin(async move {
            self.state.write().await.remove(codebase_root.as_str());
            self.spawn_persist();
            Ok(())
        })
    }

    fn list(
        &self,
        _ctx: &RequestContext,
    ) -> BoxFuture<'_, Result<Vec<(Box<str>, CodebaseRegistryEntry)>>> {
        Box::pin(async move {
            Ok(self
                .state
                .read()
                .await
                .iter()
                .map(|(path, entry)| (path.clone(), entry.clone()))
                .collect())
        })
    }

    fn reconcile(
        &self,
        _ctx: &RequestContext,
        existing_roots: &[Box<str>],
    ) -> BoxFuture<'_, Result<()>> {
        let existing: std::collections::BTreeSet<Box<str>> = existing_roots.iter().cloned().collect();
        Box::pin(async move {
            let mut dropped = false;
            {
                let mut state = self.state.write().await;
                let stale: Vec<Box<str>> = state
                    .iter()
                    .filter(|(root, entry)| {
                        matches!(entry, CodebaseRegistryEntry::Indexed { .. })
                            && !existing.contains(root.as_ref())
                    })
                    .map(|(root, _)| root.clone())
                    .collect();
                for root in stale {
                    state.remove(&root);
                    dropped = true;
                }
            }
            if dropped {
                self.spawn_persist();
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semantic_code_domain::{CompletionKind, ProgressEvent};

    fn ctx() -> RequestContext {
        RequestContext::new_request()
    }

    fn indexed(files: u64) -> CodebaseRegistryEntry {
        CodebaseRegistryEntry::Indexed {
            files,
            chunks: files * 10,
            completion: CompletionKind::Completed,
            last_updated: 0,
        }
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_in_memory() -> Result<()> {
        let registry = LocalRegistry::in_memory();
        registry.set(&ctx(), "/repo/a", indexed(3)).await?;

        let entry = registry.get(&ctx(), "/repo/a").await?;
        assert_eq!(entry, Some(indexed(3)));
        Ok(())
    }

    #[tokio::test]
    async fn get_is_immediately_consistent_after_set_without_disk() -> Result<()> {
        // Regresses the registry-race property: readers must observe a
        // `set` the instant it returns, independent of disk flush timing.
        let registry = LocalRegistry::in_memory();
        registry.set(&ctx(), "/repo/race", indexed(1)).await?;
        assert!(registry.get(&ctx(), "/repo/race").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn remove_clears_entry() -> Result<()> {
        let registry = LocalRegistry::in_memory();
        registry.set(&ctx(), "/repo/a", indexed(3)).await?;
        registry.remove(&ctx(), "/repo/a").await?;
        assert_eq!(registry.get(&ctx(), "/repo/a").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn list_returns_all_entries() -> Result<()> {
        let registry = LocalRegistry::in_memory();
        registry.set(&ctx(), "/repo/a", indexed(1)).await?;
        registry.set(&ctx(), "/repo/b", indexed(2)).await?;

        let mut entries = registry.list(&ctx()).await?;
        entries.sort_by(|left, right| left.0.cmp(&right.0));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.as_ref(), "/repo/a");
        assert_eq!(entries[1].0.as_ref(), "/repo/b");
        Ok(())
    }

    fn indexing(progress: Option<ProgressEvent>) -> CodebaseRegistryEntry {
        CodebaseRegistryEntry::Indexing {
            progress,
            last_updated: 0,
        }
    }

    #[tokio::test]
    async fn reconcile_drops_indexed_entry_with_no_backing_collection() -> Result<()> {
        let registry = LocalRegistry::in_memory();
        registry.set(&ctx(), "/repo/gone", indexed(3)).await?;
        registry.set(&ctx(), "/repo/kept", indexed(5)).await?;

        registry
            .reconcile(&ctx(), &["/repo/kept".into()])
            .await?;

        assert_eq!(registry.get(&ctx(), "/repo/gone").await?, None);
        assert_eq!(registry.get(&ctx(), "/repo/kept").await?, Some(indexed(5)));
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_never_drops_indexing_entries() -> Result<()> {
        let registry = LocalRegistry::in_memory();
        registry
            .set(&ctx(), "/repo/still-indexing", indexing(None))
            .await?;

        registry.reconcile(&ctx(), &[]).await?;

        assert!(registry.get(&ctx(), "/repo/still-indexing").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn load_seeds_from_existing_file_and_persists_new_writes() -> Result<()> {
        let dir = std::env::temp_dir().join(format!(
            "semantic-code-registry-test-{}",
            std::process::id()
        ));
        let path = dir.join("registry.json");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(ErrorEnvelope::from)?;

        let seeded = LocalRegistry::load(Some(path.clone()), None).await?;
        seeded.set(&ctx(), "/repo/seed", indexed(5)).await?;
        // spawn_persist is fire-and-forget; give the runtime a chance to run it.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let reloaded = LocalRegistry::load(Some(path.clone()), None).await?;
        assert_eq!(reloaded.get(&ctx(), "/repo/seed").await?, Some(indexed(5)));

        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(ErrorEnvelope::from)?;
        Ok(())
    }
}
