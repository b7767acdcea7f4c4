//! Local vector database adapter backed by HNSW.

use crate::bm25::Bm25Vectorizer;
use semantic_code_config::SnapshotStorageMode;
use semantic_code_domain::{IndexMode, Language, SparseVector};
use semantic_code_ports::{
    Bm25ModelSnapshot, Bm25Port, CollectionName, HybridSearchBatchRequest, HybridSearchData,
    HybridSearchResult, LogFields, LoggerPort, VectorDbPort, VectorDbProviderId,
    VectorDbProviderInfo, VectorDbRow, VectorDocument, VectorDocumentForInsert,
    VectorDocumentMetadata, VectorSearchRequest, VectorSearchResult,
};
use semantic_code_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use semantic_code_vector::{HnswParams, VectorIndex, VectorRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

const LOCAL_SNAPSHOT_VERSION: u32 = 2;
const LOCAL_SNAPSHOT_DIR: &str = "vector";
const LOCAL_COLLECTIONS_DIR: &str = "collections";
/// RRF fusion constant (spec default), shared across hybrid search fusion.
const RRF_K: f32 = 60.0;
/// Oversampling multiplier applied before per-request filter + limit truncation.
const SEARCH_OVERSAMPLE: usize = 5;

/// Local vector DB backed by an HNSW index.
pub struct LocalVectorDb {
    provider: VectorDbProviderInfo,
    codebase_root: PathBuf,
    storage_mode: SnapshotStorageMode,
    collections: Arc<RwLock<HashMap<CollectionName, LocalCollection>>>,
    logger: Option<Arc<dyn LoggerPort>>,
}

impl LocalVectorDb {
    /// Create a local vector DB adapter scoped to a codebase root.
    pub fn new(codebase_root: PathBuf, storage_mode: SnapshotStorageMode) -> Result<Self> {
        let provider = VectorDbProviderInfo {
            id: VectorDbProviderId::parse("local").map_err(ErrorEnvelope::from)?,
            name: "Local".into(),
        };
        Ok(Self {
            provider,
            codebase_root,
            storage_mode,
            collections: Arc::new(RwLock::new(HashMap::new())),
            logger: None,
        })
    }

    /// Attach a logger used to warn on unparseable filter expressions instead
    /// of failing the request.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn LoggerPort>) -> Self {
        self.logger = Some(logger);
        self
    }

    fn snapshot_root(&self) -> Option<PathBuf> {
        self.storage_mode
            .resolve_root(&self.codebase_root)
            .map(|root| root.join(LOCAL_SNAPSHOT_DIR).join(LOCAL_COLLECTIONS_DIR))
    }

    fn snapshot_path(&self, collection_name: &CollectionName) -> Option<PathBuf> {
        let root = self.snapshot_root()?;
        Some(root.join(format!("{}.json", collection_name.as_str())))
    }

    fn bm25_snapshot_path(&self, collection_name: &CollectionName) -> Option<PathBuf> {
        let root = self.snapshot_root()?;
        Some(root.join(format!("{}_bm25.json", collection_name.as_str())))
    }

    /// Parse a filter expression, warning and falling back to unfiltered
    /// results instead of raising when it cannot be parsed.
    fn parse_filter_or_warn(&self, expr: Option<&str>) -> Option<FilterCondition> {
        match parse_filter_expr(expr) {
            Ok(filter) => filter,
            Err(error) => {
                if let Some(logger) = self.logger.as_ref() {
                    let mut fields = LogFields::new();
                    fields.insert(
                        "filterExpr".to_owned().into_boxed_str(),
                        Value::String(expr.unwrap_or_default().to_owned()),
                    );
                    logger.warn(
                        "vectordb_local.filter_expr_unparseable",
                        &format!(
                            "filterExpr could not be parsed, falling back to unfiltered results: {}",
                            error.message
                        ),
                        Some(fields),
                    );
                }
                None
            },
        }
    }

    async fn ensure_loaded(&self, collection_name: &CollectionName) -> Result<()> {
        {
            let collections = self.collections.read().await;
            if collections.contains_key(collection_name) {
                return Ok(());
            }
        }

        let snapshot = self.read_snapshot(collection_name).await?;
        let Some(snapshot) = snapshot else {
            return Ok(());
        };
        let bm25_snapshot = self.read_bm25_snapshot(collection_name).await?;
        let collection = LocalCollection::from_snapshot(snapshot, bm25_snapshot).await?;
        self.collections
            .write()
            .await
            .entry(collection_name.clone())
            .or_insert(collection);
        Ok(())
    }

    async fn read_bm25_snapshot(
        &self,
        collection_name: &CollectionName,
    ) -> Result<Option<Bm25ModelSnapshot>> {
        let Some(path) = self.bm25_snapshot_path(collection_name) else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(payload) => {
                let snapshot = serde_json::from_slice(&payload).map_err(|error| {
                    snapshot_error("bm25_snapshot_parse_failed", "failed to parse BM25 model", error)
                })?;
                Ok(Some(snapshot))
            },
            Err(error) => {
                if error.kind() == std::io::ErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(ErrorEnvelope::from(error))
                }
            },
        }
    }

    async fn write_bm25_snapshot(
        &self,
        collection_name: &CollectionName,
        snapshot: &Bm25ModelSnapshot,
    ) -> Result<()> {
        let Some(path) = self.bm25_snapshot_path(collection_name) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ErrorEnvelope::from)?;
        }
        let payload = serde_json::to_vec_pretty(snapshot).map_err(|error| {
            snapshot_error(
                "bm25_snapshot_serialize_failed",
                "failed to serialize BM25 model",
                error,
            )
        })?;
        tokio::fs::write(&path, payload)
            .await
            .map_err(ErrorEnvelope::from)?;
        Ok(())
    }

    async fn read_snapshot(
        &self,
        collection_name: &CollectionName,
    ) -> Result<Option<CollectionSnapshot>> {
        let Some(path) = self.snapshot_path(collection_name) else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(payload) => {
                let snapshot = serde_json::from_slice(&payload).map_err(|error| {
                    snapshot_error("snapshot_parse_failed", "failed to parse snapshot", error)
                })?;
                Ok(Some(snapshot))
            },
            Err(error) => {
                if error.kind() == std::io::ErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(ErrorEnvelope::from(error))
                }
            },
        }
    }

    async fn write_snapshot(
        &self,
        collection_name: &CollectionName,
        snapshot: &CollectionSnapshot,
    ) -> Result<()> {
        let Some(path) = self.snapshot_path(collection_name) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(ErrorEnvelope::from)?;
        }
        let payload = serde_json::to_vec_pretty(snapshot).map_err(|error| {
            snapshot_error(
                "snapshot_serialize_failed",
                "failed to serialize snapshot",
                error,
            )
        })?;
        tokio::fs::write(&path, payload)
            .await
            .map_err(ErrorEnvelope::from)?;
        Ok(())
    }
}

impl VectorDbPort for LocalVectorDb {
    fn provider(&self) -> &VectorDbProviderInfo {
        &self.provider
    }

    fn create_collection(
        &self,
        ctx: &RequestContext,
        collection_name: CollectionName,
        dimension: u32,
        _description: Option<Box<str>>,
    ) -> semantic_code_ports::BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        let db = self.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.create_collection")?;
            let collection = LocalCollection::new(dimension, IndexMode::Dense)?;
            let mut guard = db.collections.write().await;
            guard.insert(collection_name.clone(), collection);
            let snapshot = guard.get(&collection_name).map(LocalCollection::snapshot);
            drop(guard);
            let Some(snapshot) = snapshot else {
                return Ok(());
            };
            db.write_snapshot(&collection_name, &snapshot).await
        })
    }

    fn create_hybrid_collection(
        &self,
        ctx: &RequestContext,
        collection_name: CollectionName,
        dimension: u32,
        _description: Option<Box<str>>,
    ) -> semantic_code_ports::BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        let db = self.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.create_hybrid_collection")?;
            let collection = LocalCollection::new(dimension, IndexMode::Hybrid)?;
            let mut guard = db.collections.write().await;
            guard.insert(collection_name.clone(), collection);
            let entry = guard.get(&collection_name);
            let snapshot = entry.map(LocalCollection::snapshot);
            let bm25_snapshot = entry.map(LocalCollection::bm25_snapshot).transpose()?.flatten();
            drop(guard);
            let Some(snapshot) = snapshot else {
                return Ok(());
            };
            db.write_snapshot(&collection_name, &snapshot).await?;
            if let Some(bm25_snapshot) = bm25_snapshot {
                db.write_bm25_snapshot(&collection_name, &bm25_snapshot).await?;
            }
            Ok(())
        })
    }

    fn drop_collection(
        &self,
        ctx: &RequestContext,
        collection_name: CollectionName,
    ) -> semantic_code_ports::BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        let collections = Arc::clone(&self.collections);
        let snapshot = self.snapshot_path(&collection_name);
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.drop_collection")?;
            let mut guard = collections.write().await;
            guard.remove(&collection_name);
            drop(guard);

            if let Some(path) = snapshot {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => (),
                    Err(error) => {
                        if error.kind() != std::io::ErrorKind::NotFound {
                            return Err(ErrorEnvelope::from(error));
                        }
                    },
                }
            }
            Ok(())
        })
    }

    fn has_collection(
        &self,
        ctx: &RequestContext,
        collection_name: CollectionName,
    ) -> semantic_code_ports::BoxFuture<'_, Result<bool>> {
        let ctx = ctx.clone();
        let collections = Arc::clone(&self.collections);
        let snapshot = self.snapshot_path(&collection_name);
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.has_collection")?;
            let guard = collections.read().await;
            if guard.contains_key(&collection_name) {
                return Ok(true);
            }
            drop(guard);

            let Some(path) = snapshot else {
                return Ok(false);
            };

            match tokio::fs::metadata(&path).await {
                Ok(metadata) => Ok(metadata.is_file()),
                Err(error) => {
                    if error.kind() == std::io::ErrorKind::NotFound {
                        Ok(false)
                    } else {
                        Err(ErrorEnvelope::from(error))
                    }
                },
            }
        })
    }

    fn list_collections(
        &self,
        ctx: &RequestContext,
    ) -> semantic_code_ports::BoxFuture<'_, Result<Vec<CollectionName>>> {
        let ctx = ctx.clone();
        let collections = Arc::clone(&self.collections);
        let snapshot_root = self.snapshot_root();
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.list_collections")?;
            let guard = collections.read().await;
            let mut names: BTreeMap<Box<str>, CollectionName> = guard
                .keys()
                .map(|name| (name.as_str().into(), name.clone()))
                .collect();
            drop(guard);

            let Some(root) = snapshot_root else {
                return Ok(names.into_values().collect());
            };

            let mut dir = match tokio::fs::read_dir(&root).await {
                Ok(dir) => dir,
                Err(error) => {
                    if error.kind() == std::io::ErrorKind::NotFound {
                        return Ok(names.into_values().collect());
                    }
                    return Err(ErrorEnvelope::from(error));
                },
            };

            while let Some(entry) = dir.next_entry().await.map_err(ErrorEnvelope::from)? {
                let name = entry.file_name().to_string_lossy().to_string();
                if let Some(collection) = collection_name_from_filename(&name) {
                    names
                        .entry(collection.as_str().into())
                        .or_insert(collection);
                }
            }

            Ok(names.into_values().collect())
        })
    }

    fn insert(
        &self,
        ctx: &RequestContext,
        collection_name: CollectionName,
        documents: Vec<VectorDocumentForInsert>,
    ) -> semantic_code_ports::BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        let db = self.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.insert")?;
            db.ensure_loaded(&collection_name).await?;
            let mut guard = db.collections.write().await;
            let Some(collection) = guard.get_mut(&collection_name) else {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::not_found(),
                    "collection not found",
                ));
            };

            collection.insert(documents).await?;
            let snapshot = collection.snapshot();
            let bm25_snapshot = collection.bm25_snapshot()?;
            drop(guard);
            db.write_snapshot(&collection_name, &snapshot).await?;
            if let Some(bm25_snapshot) = bm25_snapshot {
                db.write_bm25_snapshot(&collection_name, &bm25_snapshot).await?;
            }
            Ok(())
        })
    }

    fn insert_hybrid(
        &self,
        ctx: &RequestContext,
        collection_name: CollectionName,
        documents: Vec<VectorDocumentForInsert>,
    ) -> semantic_code_ports::BoxFuture<'_, Result<()>> {
        self.insert(ctx, collection_name, documents)
    }

    fn search(
        &self,
        ctx: &RequestContext,
        request: VectorSearchRequest,
    ) -> semantic_code_ports::BoxFuture<'_, Result<Vec<VectorSearchResult>>> {
        let ctx = ctx.clone();
        let db = self.clone();
        let VectorSearchRequest {
            collection_name,
            query_vector,
            options,
        } = request;
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.search")?;
            db.ensure_loaded(&collection_name).await?;
            let top_k = options.top_k.unwrap_or(10).max(1) as usize;
            let threshold = options.threshold;
            let filter = db.parse_filter_or_warn(options.filter_expr.as_deref());

            let results = {
                let guard = db.collections.read().await;
                let Some(collection) = guard.get(&collection_name) else {
                    return Err(ErrorEnvelope::expected(
                        ErrorCode::not_found(),
                        "collection not found",
                    ));
                };

                let matches = collection
                    .index
                    .search(query_vector.as_ref(), top_k.saturating_mul(5))?;

                let mut results = Vec::new();
                for candidate in matches {
                    let Some(doc) = collection.documents.get(candidate.id.as_ref()) else {
                        continue;
                    };
                    if !filter_matches(filter.as_ref(), doc) {
                        continue;
                    }
                    let score = candidate.score;
                    if threshold.is_some_and(|value| score < value) {
                        continue;
                    }
                    results.push(VectorSearchResult {
                        document: VectorDocument {
                            id: candidate.id,
                            vector: None,
                            content: doc.content.clone(),
                            metadata: doc.metadata.clone(),
                        },
                        score,
                    });
                    if results.len() >= top_k {
                        break;
                    }
                }

                drop(guard);
                results
            };

            Ok(results)
        })
    }

    fn hybrid_search(
        &self,
        ctx: &RequestContext,
        request: HybridSearchBatchRequest,
    ) -> semantic_code_ports::BoxFuture<'_, Result<Vec<HybridSearchResult>>> {
        let ctx = ctx.clone();
        let db = self.clone();
        let HybridSearchBatchRequest {
            collection_name,
            search_requests,
            options,
        } = request;
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.hybrid_search")?;
            db.ensure_loaded(&collection_name).await?;
            let global_limit = options.limit.map(|value| value.max(1) as usize);
            let filter = db.parse_filter_or_warn(options.filter_expr.as_deref());

            // Reciprocal Rank Fusion: each sub-query contributes 1/(k + rank) per
            // document it ranks; a sparse sub-query that cannot be run (untrained
            // model, empty/unknown query text) is skipped, falling back to
            // dense-only fusion rather than failing the whole search.
            let mut rrf: HashMap<Box<str>, f32> = HashMap::new();
            let mut documents: HashMap<Box<str>, VectorDocument> = HashMap::new();

            {
                let guard = db.collections.read().await;
                let Some(collection) = guard.get(&collection_name) else {
                    return Err(ErrorEnvelope::expected(
                        ErrorCode::not_found(),
                        "collection not found",
                    ));
                };

                for req in search_requests {
                    let limit = req.limit.max(1) as usize;
                    let ranked: Vec<(Box<str>, &StoredDocument)> = match req.data {
                        HybridSearchData::DenseVector(vector) => {
                            let matches = collection
                                .index
                                .search(vector.as_ref(), limit.saturating_mul(SEARCH_OVERSAMPLE))?;
                            matches
                                .into_iter()
                                .filter_map(|candidate| {
                                    let doc = collection.documents.get(candidate.id.as_ref())?;
                                    filter_matches(filter.as_ref(), doc).then(|| (candidate.id, doc))
                                })
                                .take(limit)
                                .collect()
                        },
                        HybridSearchData::SparseQuery(text) => {
                            collection
                                .rank_by_sparse_query(&text, filter.as_ref(), limit)
                                .await?
                        },
                    };

                    for (rank, (id, doc)) in ranked.into_iter().enumerate() {
                        #[allow(clippy::cast_precision_loss)]
                        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
                        *rrf.entry(id.clone()).or_insert(0.0) += contribution;
                        documents.entry(id.clone()).or_insert_with(|| VectorDocument {
                            id,
                            vector: None,
                            content: doc.content.clone(),
                            metadata: doc.metadata.clone(),
                        });
                    }
                }
                drop(guard);
            }

            let mut out: Vec<HybridSearchResult> = rrf
                .into_iter()
                .filter_map(|(id, score)| {
                    documents
                        .remove(&id)
                        .map(|document| HybridSearchResult { document, score })
                })
                .collect();
            out.sort_by(|a, b| {
                let score = b.score.total_cmp(&a.score);
                if score != std::cmp::Ordering::Equal {
                    return score;
                }
                a.document.id.cmp(&b.document.id)
            });

            if let Some(limit) = global_limit {
                out.truncate(limit);
            }

            Ok(out)
        })
    }

    fn delete(
        &self,
        ctx: &RequestContext,
        collection_name: CollectionName,
        ids: Vec<Box<str>>,
    ) -> semantic_code_ports::BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        let db = self.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.delete")?;
            db.ensure_loaded(&collection_name).await?;
            let mut guard = db.collections.write().await;
            let Some(collection) = guard.get_mut(&collection_name) else {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::not_found(),
                    "collection not found",
                ));
            };
            collection.delete(&ids).await?;
            let snapshot = collection.snapshot();
            let bm25_snapshot = collection.bm25_snapshot()?;
            drop(guard);
            db.write_snapshot(&collection_name, &snapshot).await?;
            if let Some(bm25_snapshot) = bm25_snapshot {
                db.write_bm25_snapshot(&collection_name, &bm25_snapshot).await?;
            }
            Ok(())
        })
    }

    fn query(
        &self,
        ctx: &RequestContext,
        collection_name: CollectionName,
        filter: Box<str>,
        output_fields: Vec<Box<str>>,
        limit: Option<u32>,
    ) -> semantic_code_ports::BoxFuture<'_, Result<Vec<VectorDbRow>>> {
        let ctx = ctx.clone();
        let db = self.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("vectordb_local.query")?;
            db.ensure_loaded(&collection_name).await?;
            let limit = limit.map(|value| value.max(1) as usize);
            let filter = db.parse_filter_or_warn(Some(filter.as_ref()));

            let rows = {
                let guard = db.collections.read().await;
                let Some(collection) = guard.get(&collection_name) else {
                    return Err(ErrorEnvelope::expected(
                        ErrorCode::not_found(),
                        "collection not found",
                    ));
                };
                let mut rows = Vec::new();
                for (id, doc) in &collection.documents {
                    if !filter_matches(filter.as_ref(), doc) {
                        continue;
                    }
                    rows.push(build_row(id, doc, &output_fields));
                    if limit.is_some_and(|value| rows.len() >= value) {
                        break;
                    }
                }
                drop(guard);
                rows
            };

            Ok(rows)
        })
    }
}

impl Clone for LocalVectorDb {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            codebase_root: self.codebase_root.clone(),
            storage_mode: self.storage_mode.clone(),
            collections: Arc::clone(&self.collections),
            logger: self.logger.clone(),
        }
    }
}

struct LocalCollection {
    dimension: u32,
    index_mode: IndexMode,
    index: VectorIndex,
    documents: BTreeMap<Box<str>, StoredDocument>,
    /// Lexical model trained from this collection's own document corpus.
    /// `Some` only for hybrid collections; kept in sync with `documents` by
    /// `retrain_bm25` so index-time and query-time vocabularies always agree.
    bm25: Option<Bm25Vectorizer>,
}

impl LocalCollection {
    fn new(dimension: u32, index_mode: IndexMode) -> Result<Self> {
        let params = HnswParams::default();
        let index = VectorIndex::new(dimension, params)?;
        let bm25 = matches!(index_mode, IndexMode::Hybrid).then(Bm25Vectorizer::new);
        Ok(Self {
            dimension,
            index_mode,
            index,
            documents: BTreeMap::new(),
            bm25,
        })
    }

    async fn insert(&mut self, documents: Vec<VectorDocumentForInsert>) -> Result<()> {
        let mut records = Vec::new();
        let mut docs = BTreeMap::new();
        for doc in documents {
            let id = doc.id.clone();
            records.push(VectorRecord {
                id: id.clone(),
                vector: doc.vector.as_ref().to_vec(),
            });
            docs.insert(
                id,
                StoredDocument {
                    content: doc.content,
                    metadata: doc.metadata,
                    sparse_vector: None,
                },
            );
        }

        self.index.insert(records)?;
        for (id, doc) in docs {
            self.documents.insert(id, doc);
        }
        self.retrain_bm25().await
    }

    async fn delete(&mut self, ids: &[Box<str>]) -> Result<()> {
        self.index.delete(ids)?;
        for id in ids {
            self.documents.remove(id.as_ref());
        }
        self.retrain_bm25().await
    }

    /// Retrain the lexical model from the current document corpus and
    /// regenerate every document's cached sparse vector. No-op for dense
    /// collections.
    async fn retrain_bm25(&mut self) -> Result<()> {
        let Some(bm25) = self.bm25.as_ref() else {
            return Ok(());
        };

        if self.documents.is_empty() {
            for doc in self.documents.values_mut() {
                doc.sparse_vector = None;
            }
            return Ok(());
        }

        let corpus: Vec<Box<str>> = self
            .documents
            .values()
            .map(|doc| doc.content.clone())
            .collect();
        bm25.learn(&corpus).await?;

        for doc in self.documents.values_mut() {
            doc.sparse_vector = Some(bm25.generate(doc.content.as_ref()).await?);
        }
        Ok(())
    }

    /// Rank documents by BM25 relevance to `text`, returning at most `limit`
    /// matches sorted by score descending. Returns an empty ranking (rather
    /// than an error) when this collection has no lexical model, the model
    /// is untrained, or the query has no recognized terms, so hybrid search
    /// can fall back to dense-only fusion.
    async fn rank_by_sparse_query<'a>(
        &'a self,
        text: &str,
        filter: Option<&FilterCondition>,
        limit: usize,
    ) -> Result<Vec<(Box<str>, &'a StoredDocument)>> {
        let Some(bm25) = self.bm25.as_ref() else {
            return Ok(Vec::new());
        };
        if !bm25.is_trained() {
            return Ok(Vec::new());
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let query_sparse = bm25.generate(trimmed).await?;
        if query_sparse.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(Box<str>, f32)> = Vec::new();
        for (id, doc) in &self.documents {
            let Some(sparse) = doc.sparse_vector.as_ref() else {
                continue;
            };
            if !filter_matches(filter, doc) {
                continue;
            }
            let score = query_sparse.dot(sparse);
            if score <= 0.0 {
                continue;
            }
            scored.push((id.clone(), score));
        }

        scored.sort_by(|left, right| {
            let order = right.1.total_cmp(&left.1);
            if order != std::cmp::Ordering::Equal {
                return order;
            }
            left.0.cmp(&right.0)
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .filter_map(|(id, _)| self.documents.get(id.as_ref()).map(|doc| (id, doc)))
            .collect())
    }

    fn snapshot(&self) -> CollectionSnapshot {
        let mut records = Vec::new();
        for (id, doc) in &self.documents {
            if let Some(record) = self.index.record_for_id(id.as_ref()) {
                records.push(CollectionRecord {
                    id: id.clone(),
                    vector: record.vector.clone(),
                    sparse_vector: doc.sparse_vector.clone(),
                    content: doc.content.clone(),
                    metadata: doc.metadata.clone(),
                });
            }
        }

        CollectionSnapshot {
            version: LOCAL_SNAPSHOT_VERSION,
            dimension: self.dimension,
            index_mode: self.index_mode,
            records,
        }
    }

    /// Snapshot the trained BM25 model, if this is a hybrid collection with
    /// one. `Ok(None)` for dense collections or an untrained model.
    fn bm25_snapshot(&self) -> Result<Option<Bm25ModelSnapshot>> {
        let Some(bm25) = self.bm25.as_ref() else {
            return Ok(None);
        };
        let snapshot = Bm25Port::snapshot(bm25)?;
        Ok(snapshot.trained.then_some(snapshot))
    }

    /// Rebuild a collection from its document snapshot and, for hybrid
    /// collections, its companion BM25 model snapshot. A trained companion
    /// snapshot is restored directly (no retraining); its absence (e.g. an
    /// older snapshot predating the companion file) falls back to
    /// retraining the lexical model from the restored corpus.
    async fn from_snapshot(
        snapshot: CollectionSnapshot,
        bm25_snapshot: Option<Bm25ModelSnapshot>,
    ) -> Result<Self> {
        if snapshot.version != LOCAL_SNAPSHOT_VERSION {
            return Err(ErrorEnvelope::expected(
                ErrorCode::new("vector", "snapshot_version_mismatch"),
                "snapshot version mismatch",
            )
            .with_metadata("found", snapshot.version.to_string())
            .with_metadata("expected", LOCAL_SNAPSHOT_VERSION.to_string()));
        }
        let params = HnswParams::default();
        let mut index = VectorIndex::new(snapshot.dimension, params)?;
        let mut documents = BTreeMap::new();
        let mut records = Vec::new();
        for record in snapshot.records {
            records.push(VectorRecord {
                id: record.id.clone(),
                vector: record.vector.clone(),
            });
            documents.insert(
                record.id.clone(),
                StoredDocument {
                    content: record.content,
                    metadata: record.metadata,
                    sparse_vector: record.sparse_vector,
                },
            );
        }
        index.insert(records)?;
        let is_hybrid = matches!(snapshot.index_mode, IndexMode::Hybrid);
        let bm25 = is_hybrid.then(Bm25Vectorizer::new);
        let mut collection = Self {
            dimension: snapshot.dimension,
            index_mode: snapshot.index_mode,
            index,
            documents,
            bm25,
        };

        if is_hybrid {
            match bm25_snapshot {
                Some(bm25_snapshot) if bm25_snapshot.trained => {
                    if let Some(bm25) = collection.bm25.as_ref() {
                        bm25.restore(bm25_snapshot)?;
                    }
                },
                _ => collection.retrain_bm25().await?,
            }
        }

        Ok(collection)
    }
}

#[derive(Debug, Clone)]
struct StoredDocument {
    content: Box<str>,
    metadata: VectorDocumentMetadata,
    sparse_vector: Option<SparseVector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionSnapshot {
    version: u32,
    dimension: u32,
    index_mode: IndexMode,
    records: Vec<CollectionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectionRecord {
    id: Box<str>,
    vector: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sparse_vector: Option<SparseVector>,
    content: Box<str>,
    metadata: VectorDocumentMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    NotEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterField {
    RelativePath,
    Language,
    FileExtension,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterCondition {
    Compare {
        field: FilterField,
        op: FilterOp,
        value: Box<str>,
    },
    In {
        field: FilterField,
        values: Vec<Box<str>>,
    },
}

fn parse_filter_expr(expr: Option<&str>) -> Result<Option<FilterCondition>> {
    let Some(expr) = expr else {
        return Ok(None);
    };
    let expr = expr.trim();
    if expr.is_empty() {
        return Ok(None);
    }
    if expr.contains('\n') || expr.contains('\r') {
        return Err(invalid_filter_expr(expr));
    }

    if let Some((field, values)) = parse_in_comparison(expr) {
        let field = parse_field(field).ok_or_else(|| invalid_filter_expr(expr))?;
        if values.is_empty() {
            return Err(invalid_filter_expr(expr));
        }
        return Ok(Some(FilterCondition::In { field, values }));
    }

    let (field, op, value) =
        parse_simple_comparison(expr).ok_or_else(|| invalid_filter_expr(expr))?;
    let field = parse_field(field).ok_or_else(|| invalid_filter_expr(expr))?;
    let op = match op {
        "==" => FilterOp::Eq,
        "!=" => FilterOp::NotEq,
        _ => return Err(invalid_filter_expr(expr)),
    };
    if value.is_empty() {
        return Err(invalid_filter_expr(expr));
    }

    Ok(Some(FilterCondition::Compare {
        field,
        op,
        value: value.to_owned().into_boxed_str(),
    }))
}

fn parse_field(field: &str) -> Option<FilterField> {
    match field {
        "relativePath" => Some(FilterField::RelativePath),
        "language" => Some(FilterField::Language),
        "fileExtension" => Some(FilterField::FileExtension),
        _ => None,
    }
}

fn parse_simple_comparison(input: &str) -> Option<(&str, &str, &str)> {
    let input = input.trim();
    let (field, rest) = split_once_ws(input)?;
    let rest = rest.trim_start();

    let (op, rest) = if let Some(rest) = rest.strip_prefix("==") {
        ("==", rest)
    } else if let Some(rest) = rest.strip_prefix("!=") {
        ("!=", rest)
    } else {
        return None;
    };

    let value = rest.trim_start();
    let unquoted = strip_quotes(value)?;
    Some((field, op, unquoted))
}

/// Parse `field in ['lit1', 'lit2', ...]` set-membership filters.
fn parse_in_comparison(input: &str) -> Option<(&str, Vec<Box<str>>)> {
    let input = input.trim();
    let (field, rest) = split_once_ws(input)?;
    let rest = rest.trim_start().strip_prefix("in")?;
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('[')?;
    let rest = rest.strip_suffix(']')?;

    let mut values = Vec::new();
    for item in split_list_items(rest) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let unquoted = strip_quotes(item)?;
        values.push(unquoted.to_owned().into_boxed_str());
    }
    Some((field, values))
}

/// Split a comma-separated list on top-level commas, ignoring commas inside
/// quoted literals.
fn split_list_items(input: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, ch) in input.char_indices() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => {},
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch == ',' => {
                items.push(&input[start..idx]);
                start = idx + ch.len_utf8();
            },
            None => {},
        }
    }
    items.push(&input[start..]);
    items
}

fn split_once_ws(input: &str) -> Option<(&str, &str)> {
    for (idx, ch) in input.char_indices() {
        if ch.is_whitespace() {
            let (left, right) = input.split_at(idx);
            return Some((left, right));
        }
    }
    None
}

fn strip_quotes(input: &str) -> Option<&str> {
    let input = input.trim();
    if input.len() < 2 {
        return None;
    }
    let bytes = input.as_bytes();
    let first = *bytes.first()?;
    let last = *bytes.last()?;
    if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
        Some(&input[1..input.len() - 1])
    } else {
        None
    }
}

fn field_value(field: FilterField, doc: &StoredDocument) -> Option<&str> {
    match field {
        FilterField::RelativePath => Some(doc.metadata.relative_path.as_ref()),
        FilterField::Language => doc.metadata.language.map(Language::as_str),
        FilterField::FileExtension => doc.metadata.file_extension.as_deref(),
    }
}

fn filter_matches(filter: Option<&FilterCondition>, doc: &StoredDocument) -> bool {
    let Some(filter) = filter else {
        return true;
    };

    match filter {
        FilterCondition::Compare { field, op, value } => {
            let observed = field_value(*field, doc);
            match op {
                FilterOp::Eq => observed.is_some_and(|v| v == value.as_ref()),
                FilterOp::NotEq => observed.is_none_or(|v| v != value.as_ref()),
            }
        },
        FilterCondition::In { field, values } => {
            let observed = field_value(*field, doc);
            observed.is_some_and(|v| values.iter().any(|candidate| candidate.as_ref() == v))
        },
    }
}

fn build_row(id: &str, doc: &StoredDocument, output_fields: &[Box<str>]) -> VectorDbRow {
    let mut row = BTreeMap::new();
    for field in output_fields {
        match field.as_ref() {
            "id" => {
                row.insert(field.clone(), Value::String(id.to_owned()));
            },
            "relativePath" => {
                row.insert(
                    field.clone(),
                    Value::String(doc.metadata.relative_path.as_ref().to_owned()),
                );
            },
            "language" => {
                if let Some(language) = doc.metadata.language {
                    row.insert(field.clone(), Value::String(language.as_str().to_owned()));
                }
            },
            "fileExtension" => {
                if let Some(ext) = doc.metadata.file_extension.as_ref() {
                    row.insert(field.clone(), Value::String(ext.as_ref().to_owned()));
                }
            },
            "startLine" => {
                row.insert(field.clone(), Value::from(doc.metadata.span.start_line()));
            },
            "endLine" => {
                row.insert(field.clone(), Value::from(doc.metadata.span.end_line()));
            },
            "content" => {
                row.insert(
                    field.clone(),
                    Value::String(doc.content.as_ref().to_owned()),
                );
            },
            _ => {},
        }
    }
    row
}

fn invalid_filter_expr(expr: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::new("vector", "invalid_filter_expr"),
        format!("filterExpr is not supported: {expr}"),
    )
}

fn snapshot_error(
    code: &'static str,
    message: &str,
    error: impl std::error::Error,
) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::new("vector", code),
        format!("{message}: {error}"),
        ErrorClass::NonRetriable,
    )
}

fn collection_name_from_filename(filename: &str) -> Option<CollectionName> {
    let trimmed = filename.strip_suffix(".json")?;
    CollectionName::parse(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use semantic_code_domain::LineSpan;
    use semantic_code_ports::{LogEvent, LogLevel, VectorSearchOptions};
    use std::sync::Mutex;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn sample_metadata(path: &str) -> Result<VectorDocumentMetadata> {
        Ok(VectorDocumentMetadata {
            relative_path: path.into(),
            language: None,
            file_extension: Some("rs".into()),
            span: LineSpan::new(1, 1)?,
            node_kind: None,
        })
    }

    #[derive(Default)]
    struct SpyLogger {
        warnings: Mutex<Vec<Box<str>>>,
    }

    impl SpyLogger {
        fn warnings(&self) -> Vec<Box<str>> {
            self.warnings.lock().expect("spy logger lock").clone()
        }
    }

    impl LoggerPort for SpyLogger {
        fn log(&self, event: LogEvent) {
            if event.level == LogLevel::Warn {
                self.warnings
                    .lock()
                    .expect("spy logger lock")
                    .push(event.event.clone());
            }
        }

        fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
            Box::new(Self::default())
        }
    }

    #[tokio::test]
    async fn filter_expr_allowlist_accepts_valid_inputs() -> Result<()> {
        let parsed = parse_filter_expr(Some("relativePath == 'src/lib.rs'"))?;
        assert!(parsed.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn filter_expr_allowlist_accepts_in_membership() -> Result<()> {
        let parsed = parse_filter_expr(Some("fileExtension in ['rs', 'toml']"))?;
        assert!(matches!(parsed, Some(FilterCondition::In { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn unparseable_filter_expr_warns_and_falls_back_to_unfiltered() -> Result<()> {
        let tmp = std::env::temp_dir().join(format!(
            "sca-localdb-badfilter-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|duration| duration.as_nanos())
                .unwrap_or(0)
        ));
        let logger = Arc::new(SpyLogger::default());
        let db = LocalVectorDb::new(tmp.clone(), SnapshotStorageMode::Custom(tmp))?
            .with_logger(logger.clone());
        let collection = CollectionName::parse("local_badfilter")?;
        let ctx = RequestContext::new_request();
        db.create_collection(&ctx, collection.clone(), 3, None)
            .await?;
        db.insert(
            &ctx,
            collection.clone(),
            vec![VectorDocumentForInsert {
                id: "doc1".into(),
                vector: Arc::from(vec![0.1, 0.2, 0.3]),
                sparse_vector: None,
                content: "hello".into(),
                metadata: sample_metadata("src/lib.rs")?,
            }],
        )
        .await?;

        let results = db
            .search(
                &ctx,
                VectorSearchRequest {
                    collection_name: collection,
                    query_vector: Arc::from(vec![0.1, 0.2, 0.3]),
                    options: VectorSearchOptions {
                        top_k: Some(10),
                        filter_expr: Some("score > 0.5".into()),
                        threshold: None,
                    },
                },
            )
            .await?;

        assert_eq!(results.len(), 1);
        assert_eq!(logger.warnings().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_roundtrip_persists_records() -> Result<()> {
        let tmp = std::env::temp_dir().join(format!(
            "sca-localdb-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|duration| duration.as_nanos())
                .unwrap_or(0)
        ));
        let db = LocalVectorDb::new(tmp.clone(), SnapshotStorageMode::Custom(tmp.clone()))?;
        let collection = CollectionName::parse("local_snapshot")?;
        let ctx = RequestContext::new_request();
        db.create_collection(&ctx, collection.clone(), 3, None)
            .await?;
        db.insert(
            &ctx,
            collection.clone(),
            vec![VectorDocumentForInsert {
                id: "doc1".into(),
                vector: Arc::from(vec![0.1, 0.2, 0.3]),
                sparse_vector: None,
                content: "hello".into(),
                metadata: sample_metadata("src/lib.rs")?,
            }],
        )
        .await?;

        let restored = LocalVectorDb::new(tmp.clone(), SnapshotStorageMode::Custom(tmp.clone()))?;
        let results = restored
            .search(
                &ctx,
                VectorSearchRequest {
                    collection_name: collection,
                    query_vector: Arc::from(vec![0.1, 0.2, 0.3]),
                    options: VectorSearchOptions {
                        top_k: Some(1),
                        filter_expr: None,
                        threshold: None,
                    },
                },
            )
            .await?;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "doc1".into());
        Ok(())
    }

    #[tokio::test]
    async fn hybrid_search_fuses_dense_and_sparse_rankings() -> Result<()> {
        use semantic_code_ports::{
            HybridSearchBatchRequest, HybridSearchData, HybridSearchOptions, HybridSearchRequest,
        };

        let tmp = std::env::temp_dir().join(format!(
            "sca-localdb-hybrid-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|duration| duration.as_nanos())
                .unwrap_or(0)
        ));
        let db = LocalVectorDb::new(tmp.clone(), SnapshotStorageMode::Custom(tmp.clone()))?;
        let collection = CollectionName::parse("local_hybrid")?;
        let ctx = RequestContext::new_request();
        db.create_hybrid_collection(&ctx, collection.clone(), 2, None)
            .await?;

        db.insert_hybrid(
            &ctx,
            collection.clone(),
            vec![
                VectorDocumentForInsert {
                    id: "needle".into(),
                    vector: Arc::from(vec![1.0, 0.0]),
                    sparse_vector: None,
                    content: "parse query tokens for the search index".into(),
                    metadata: sample_metadata("src/search.rs")?,
                },
                VectorDocumentForInsert {
                    id: "haystack".into(),
                    vector: Arc::from(vec![0.0, 1.0]),
                    sparse_vector: None,
                    content: "render dashboard widgets for the admin panel".into(),
                    metadata: sample_metadata("src/admin.rs")?,
                },
            ],
        )
        .await?;

        let results = db
            .hybrid_search(
                &ctx,
                HybridSearchBatchRequest {
                    collection_name: collection,
                    search_requests: vec![
                        HybridSearchRequest {
                            data: HybridSearchData::DenseVector(Arc::from(vec![0.0, 1.0])),
                            anns_field: "vector".into(),
                            params: BTreeMap::new(),
                            limit: 10,
                        },
                        HybridSearchRequest {
                            data: HybridSearchData::SparseQuery("parse search index".into()),
                            anns_field: "sparse_vector".into(),
                            params: BTreeMap::new(),
                            limit: 10,
                        },
                    ],
                    options: HybridSearchOptions {
                        rerank: None,
                        limit: Some(10),
                        filter_expr: None,
                    },
                },
            )
            .await?;

        assert_eq!(results.len(), 2);
        // "needle" wins both a lexical top rank and the RRF sum, despite
        // "haystack" being the closer dense match.
        assert_eq!(results[0].document.id, "needle".into());
        Ok(())
    }

    #[tokio::test]
    async fn hybrid_search_falls_back_to_dense_when_sparse_query_is_blank() -> Result<()> {
        use semantic_code_ports::{
            HybridSearchBatchRequest, HybridSearchData, HybridSearchOptions, HybridSearchRequest,
        };

        let tmp = std::env::temp_dir().join(format!(
            "sca-localdb-hybrid-blank-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|duration| duration.as_nanos())
                .unwrap_or(0)
        ));
        let db = LocalVectorDb::new(tmp.clone(), SnapshotStorageMode::Custom(tmp.clone()))?;
        let collection = CollectionName::parse("local_hybrid_blank")?;
        let ctx = RequestContext::new_request();
        db.create_hybrid_collection(&ctx, collection.clone(), 2, None)
            .await?;

        db.insert_hybrid(
            &ctx,
            collection.clone(),
            vec![VectorDocumentForInsert {
                id: "only".into(),
                vector: Arc::from(vec![1.0, 0.0]),
                sparse_vector: None,
                content: "a single document".into(),
                metadata: sample_metadata("src/only.rs")?,
            }],
        )
        .await?;

        let results = db
            .hybrid_search(
                &ctx,
                HybridSearchBatchRequest {
                    collection_name: collection,
                    search_requests: vec![
                        HybridSearchRequest {
                            data: HybridSearchData::DenseVector(Arc::from(vec![1.0, 0.0])),
                            anns_field: "vector".into(),
                            params: BTreeMap::new(),
                            limit: 10,
                        },
                        HybridSearchRequest {
                            data: HybridSearchData::SparseQuery("   ".into()),
                            anns_field: "sparse_vector".into(),
                            params: BTreeMap::new(),
                            limit: 10,
                        },
                    ],
                    options: HybridSearchOptions::default(),
                },
            )
            .await?;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "only".into());
        Ok(())
    }
}
