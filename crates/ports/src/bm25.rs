//! BM25 sparse vectorization boundary contract.

use crate::BoxFuture;
use semantic_code_domain::SparseVector;
use semantic_code_shared::Result;
use serde::{Deserialize, Serialize};

/// Tunable BM25 parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation parameter.
    pub k1: f32,
    /// Length-normalization parameter.
    pub b: f32,
    /// Minimum term length kept during tokenization.
    pub min_term_length: usize,
    /// Stop words dropped during tokenization.
    pub stop_words: Vec<Box<str>>,
    /// Minimum weight kept in a generated sparse vector; terms below this are dropped.
    pub min_score: Option<f32>,
    /// Maximum number of terms kept in a generated sparse vector (highest weight first).
    pub max_terms: Option<usize>,
    /// Whether to L2-normalize the generated sparse vector.
    pub l2_normalize: bool,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            min_term_length: 2,
            stop_words: Vec::new(),
            min_score: None,
            max_terms: None,
            l2_normalize: false,
        }
    }
}

/// Persisted representation of a trained (or untrained) BM25 model.
///
/// `vocabulary` and `idf` are carried as `(term, value)` pairs rather than
/// maps so the companion file round-trips through JSON without relying on
/// object-key ordering. An untrained model serializes with `trained: false`
/// and empty `vocabulary`/`idf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bm25ModelSnapshot {
    /// Term-frequency saturation parameter.
    pub k1: f32,
    /// Length-normalization parameter.
    pub b: f32,
    /// Minimum term length kept during tokenization.
    pub min_term_length: usize,
    /// Stop words dropped during tokenization.
    pub stop_words: Vec<Box<str>>,
    /// `(term, termId)` pairs, one per vocabulary entry.
    pub vocabulary: Vec<(Box<str>, u32)>,
    /// `(term, idf)` pairs, one per vocabulary entry.
    pub idf: Vec<(Box<str>, f32)>,
    /// Mean token count across the trained corpus.
    pub avg_doc_length: f32,
    /// Whether a model has been trained.
    pub trained: bool,
}

/// Boundary contract for BM25 sparse vectorization.
///
/// Implementations own a trained vocabulary/idf table. `learn` (re)trains
/// the model from a full document corpus; `generate` produces a sparse
/// vector for a single piece of text against the current trained model.
pub trait Bm25Port: Send + Sync {
    /// Train (or retrain) the model from a full corpus of document texts.
    ///
    /// Errors if `documents` is empty.
    fn learn<'a>(&'a self, documents: &'a [Box<str>]) -> BoxFuture<'a, Result<()>>;

    /// Generate a sparse vector for a document or query string.
    ///
    /// Errors if the model has not been trained yet.
    fn generate<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<SparseVector>>;

    /// Whether the model has been trained.
    fn is_trained(&self) -> bool;

    /// Snapshot the current model (params plus trained vocabulary/idf, if any).
    fn snapshot(&self) -> Result<Bm25ModelSnapshot>;

    /// Replace the current model with a previously snapshotted one.
    fn restore(&self, snapshot: Bm25ModelSnapshot) -> Result<()>;
}
