//! Clear an index collection and associated sync snapshot.

use semantic_code_domain::CollectionName;
use semantic_code_ports::{FileSyncPort, LoggerPort, RegistryPort, TelemetryPort, VectorDbPort};
use semantic_code_shared::{ErrorEnvelope, RequestContext, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Input payload for clearing an index.
#[derive(Debug, Clone)]
pub struct ClearIndexInput {
    /// Codebase root (absolute path).
    pub codebase_root: PathBuf,
    /// Target collection name.
    pub collection_name: CollectionName,
}

/// Dependencies required by clear-index.
#[derive(Clone)]
pub struct ClearIndexDeps {
    /// Vector DB adapter.
    pub vectordb: Arc<dyn VectorDbPort>,
    /// File sync adapter (snapshot delete).
    pub file_sync: Arc<dyn FileSyncPort>,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
    /// Optional telemetry sink.
    pub telemetry: Option<Arc<dyn TelemetryPort>>,
    /// Collection registry, cleared alongside the vector collection.
    pub registry: Option<Arc<dyn RegistryPort>>,
}

/// Clear the collection and delete any sync snapshot.
pub async fn clear_index(
    ctx: &RequestContext,
    deps: &ClearIndexDeps,
    input: ClearIndexInput,
) -> Result<()> {
    let started_at = Instant::now();
    let total_timer = deps
        .telemetry
        .as_ref()
        .map(|telemetry| telemetry.start_timer("backend.clearIndex.total", None));

    if let Some(logger) = deps.logger.as_ref() {
        logger.info(
            "backend.clearIndex.start",
            "Clear index started",
            Some(log_fields_start(&input)),
        );
    }

    let result: Result<()> = (async {
        ctx.ensure_not_cancelled("clear_index.start")?;

        let provider_tags = tags_provider(deps.vectordb.provider().id.as_str());
        let has_collection_timer = deps.telemetry.as_ref().map(|telemetry| {
            telemetry.start_timer("backend.clearIndex.hasCollection", Some(&provider_tags))
        });
        let exists = deps
            .vectordb
            .has_collection(ctx, input.collection_name.clone())
            .await?;
        if let Some(timer) = has_collection_timer.as_ref() {
            timer.stop();
        }

        if exists {
            ctx.ensure_not_cancelled("clear_index.drop_collection")?;
            let drop_tags = tags_provider(deps.vectordb.provider().id.as_str());
            let drop_timer = deps.telemetry.as_ref().map(|telemetry| {
                telemetry.start_timer("backend.clearIndex.dropCollection", Some(&drop_tags))
            });
            deps.vectordb
                .drop_collection(ctx, input.collection_name.clone())
                .await?;
            if let Some(timer) = drop_timer.as_ref() {
                timer.stop();
            }
        }

        ctx.ensure_not_cancelled("clear_index.delete_snapshot")?;
        let snapshot_timer = deps
            .telemetry
            .as_ref()
            .map(|telemetry| telemetry.start_timer("backend.clearIndex.deleteSnapshot", None));
        deps.file_sync
            .delete_snapshot(ctx, input.codebase_root.clone())
            .await?;
        if let Some(timer) = snapshot_timer.as_ref() {
            timer.stop();
        }

        if let Some(registry) = deps.registry.as_ref() {
            let codebase_root = input.codebase_root.to_string_lossy();
            registry.remove(ctx, codebase_root.as_ref()).await?;
        }

        if let Some(telemetry) = deps.telemetry.as_ref() {
            telemetry.increment_counter("backend.clearIndex.executed", 1, None);
        }

        if let Some(logger) = deps.logger.as_ref() {
            logger.info(
                "backend.clearIndex.completed",
                "Clear index completed",
                Some(log_fields_completed(&input, started_at)),
            );
        }

        Ok(())
    })
    .await;

    if let Some(timer) = total_timer.as_ref() {
        timer.stop();
    }

    match result {
        Ok(()) => Ok(()),
        Err(error) => {
            let duration_ms = duration_ms(started_at);
            if error.is_cancelled() {
                if let Some(telemetry) = deps.telemetry.as_ref() {
                    telemetry.increment_counter("backend.clearIndex.aborted", 1, None);
                }
                if let Some(logger) = deps.logger.as_ref() {
                    logger.info(
                        "backend.clearIndex.aborted",
                        "Clear index aborted",
                        Some(log_fields_abort(duration_ms)),
                    );
                }
            } else {
                if let Some(telemetry) = deps.telemetry.as_ref() {
                    telemetry.increment_counter("backend.clearIndex.failed", 1, None);
                }
                if let Some(logger) = deps.logger.as_ref() {
                    logger.error(
                        "backend.clearIndex.failed",
                        "Clear index failed",
                        Some(log_fields_error(&input, duration_ms, &error)),
                    );
                }
            }
            Err(error)
        },
    }
}

fn duration_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn tags_provider(provider_id: &str) -> BTreeMap<Box<str>, Box<str>> {
    let mut tags = BTreeMap::new();
    tags.insert(
        "providerId".to_owned().into_boxed_str(),
        provider_id.to_owned().into_boxed_str(),
    );
    tags
}

fn log_fields_start(input: &ClearIndexInput) -> BTreeMap<Box<str>, Value> {
    let mut fields = BTreeMap::new();
    fields.insert(
        "codebaseRoot".to_owned().into_boxed_str(),
        Value::String(input.codebase_root.to_string_lossy().to_string()),
    );
    fields.insert(
        "collectionName".to_owned().into_boxed_str(),
        Value::String(input.collection_name.as_str().to_owned()),
    );
    fields
}

fn log_fields_completed(input: &ClearIndexInput, started_at: Instant) -> BTreeMap<Box<str>, Value> {
    let mut fields = log_fields_start(input);
    fields.insert(
        "durationMs".to_owned().into_boxed_str(),
        Value::from(duration_ms(started_at)),
    );
    fields
}

fn log_fields_abort(duration_ms: u64) -> BTreeMap<Box<str>, Value> {
    let mut fields = BTreeMap::new();
    fields.insert(
        "durationMs".to_owned().into_boxed_str(),
        Value::from(duration_ms),
    );
    fields
}

fn log_fields_error(
    input: &ClearIndexInput,
    duration_ms: u64,
    error: &ErrorEnvelope,
) -> BTreeMap<Box<str>, Value> {
    let mut fields = log_fields_abort(duration_ms);
    fields.insert(
        "collectionName".to_owned().into_boxed_str(),
        Value::String(input.collection_name.as_str().to_owned()),
    );
    fields.insert(
        "error".to_owned().into_boxed_str(),
        Value::String(error.to_string()),
    );
    fields
}
