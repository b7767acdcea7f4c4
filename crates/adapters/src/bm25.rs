//! In-process BM25 sparse vectorizer adapter.

use semantic_code_domain::SparseVector;
use semantic_code_ports::{Bm25ModelSnapshot, Bm25Params, Bm25Port, BoxFuture};
use semantic_code_shared::{ErrorClass, ErrorCode, ErrorEnvelope, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

const POSITIVITY_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Default)]
struct TrainedModel {
    /// Term -> stable sparse-vector index, assigned alphabetically for determinism.
    vocabulary: BTreeMap<Box<str>, u32>,
    idf: Vec<f32>,
    avg_doc_length: f32,
}

/// Hand-rolled BM25 sparse vectorizer; owns its own trained vocabulary/idf table.
///
/// Tokenization: lowercase, non-word characters become whitespace, split on
/// whitespace, drop tokens shorter than `min_term_length` or present in
/// `stop_words`.
pub struct Bm25Vectorizer {
    params: Bm25Params,
    model: RwLock<Option<TrainedModel>>,
}

impl Bm25Vectorizer {
    /// Build a vectorizer with default parameters (`k1=1.2`, `b=0.75`).
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(Bm25Params::default())
    }

    /// Build a vectorizer with explicit parameters.
    #[must_use]
    pub const fn with_params(params: Bm25Params) -> Self {
        Self {
            params,
            model: RwLock::new(None),
        }
    }

    fn tokenize(&self, text: &str) -> Vec<Box<str>> {
        let stop_words: HashSet<&str> = self.params.stop_words.iter().map(AsRef::as_ref).collect();
        let mut tokens = Vec::new();
        let mut current = String::new();

        let mut flush = |current: &mut String, tokens: &mut Vec<Box<str>>| {
            if current.is_empty() {
                return;
            }
            let word = std::mem::take(current);
            if word.chars().count() >= self.params.min_term_length
                && !stop_words.contains(word.as_str())
            {
                tokens.push(word.into_boxed_str());
            }
        };

        for ch in text.chars() {
            if ch.is_alphanumeric() {
                current.extend(ch.to_lowercase());
            } else {
                flush(&mut current, &mut tokens);
            }
        }
        flush(&mut current, &mut tokens);

        tokens
    }

    fn term_frequencies(&self, text: &str) -> HashMap<Box<str>, u32> {
        let mut counts = HashMap::new();
        for token in self.tokenize(text) {
            *counts.entry(token).or_insert(0_u32) += 1;
        }
        counts
    }

    fn read_model(&self) -> Result<Option<TrainedModel>> {
        let guard = self
            .model
            .read()
            .map_err(|_| lock_poisoned("read BM25 model"))?;
        Ok(guard.clone())
    }
}

impl Default for Bm25Vectorizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Port for Bm25Vectorizer {
    fn learn<'a>(&'a self, documents: &'a [Box<str>]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if documents.is_empty() {
                return Err(ErrorEnvelope::expected(
                    ErrorCode::new("bm25", "empty_corpus"),
                    "cannot train BM25 model on an empty corpus",
                ));
            }

            let per_doc_counts: Vec<HashMap<Box<str>, u32>> = documents
                .iter()
                .map(|document| self.term_frequencies(document))
                .collect();

            let mut vocabulary_set: HashSet<Box<str>> = HashSet::new();
            for counts in &per_doc_counts {
                vocabulary_set.extend(counts.keys().cloned());
            }

            let vocabulary: BTreeMap<Box<str>, u32> = vocabulary_set
                .into_iter()
                .collect::<Vec<_>>()
                .into_iter()
                .enumerate()
                .map(|(index, term)| (term, u32::try_from(index).unwrap_or(u32::MAX)))
                .collect();

            let document_count = documents.len();
            #[allow(clippy::cast_precision_loss)]
            let total_doc_length: f32 = per_doc_counts
                .iter()
                .map(|counts| counts.values().sum::<u32>() as f32)
                .sum();
            #[allow(clippy::cast_precision_loss)]
            let avg_doc_length = total_doc_length / document_count as f32;

            let mut idf = vec![0.0_f32; vocabulary.len()];
            for counts in &per_doc_counts {
                for term in counts.keys() {
                    if let Some(&index) = vocabulary.get(term) {
                        idf[index as usize] += 1.0;
                    }
                }
            }
            #[allow(clippy::cast_precision_loss)]
            let n = document_count as f32;
            for value in &mut idf {
                let df = *value;
                *value = ((n - df + 0.5) / (df + 0.5)).ln();
            }

            let trained = TrainedModel {
                vocabulary,
                idf,
                avg_doc_length: avg_doc_length.max(1.0),
            };

            let mut guard = self
                .model
                .write()
                .map_err(|_| lock_poisoned("write BM25 model"))?;
            *guard = Some(trained);
            Ok(())
        })
    }

    fn generate<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<SparseVector>> {
        Box::pin(async move {
            let Some(model) = self.read_model()? else {
                return Err(ErrorEnvelope::invariant(
                    ErrorCode::new("bm25", "model_not_trained"),
                    "BM25 model must be trained before generate() is called",
                ));
            };

            let term_counts = self.term_frequencies(text);
            #[allow(clippy::cast_precision_loss)]
            let doc_length: f32 = term_counts.values().map(|&count| count as f32).sum();

            let mut raw: Vec<(u32, f32)> = Vec::new();
            for (term, &tf) in &term_counts {
                let Some(&index) = model.vocabulary.get(term) else {
                    continue;
                };
                let idf = model.idf[index as usize];
                #[allow(clippy::cast_precision_loss)]
                let tf = tf as f32;
                let denominator = tf
                    + self.params.k1
                        * (1.0 - self.params.b
                            + self.params.b * doc_length / model.avg_doc_length);
                let weight = idf * (tf * (self.params.k1 + 1.0)) / denominator;
                raw.push((index, weight));
            }

            if raw.is_empty() {
                return Ok(SparseVector::empty());
            }

            let min = raw.iter().map(|(_, weight)| *weight).fold(f32::INFINITY, f32::min);
            if min <= 0.0 {
                let shift = -min + POSITIVITY_EPSILON;
                for (_, weight) in &mut raw {
                    *weight += shift;
                }
            }

            if let Some(min_score) = self.params.min_score {
                raw.retain(|(_, weight)| *weight >= min_score);
            }

            raw.sort_by(|left, right| {
                right
                    .1
                    .partial_cmp(&left.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            if let Some(max_terms) = self.params.max_terms {
                raw.truncate(max_terms);
            }

            if self.params.l2_normalize {
                let norm = raw
                    .iter()
                    .map(|(_, weight)| weight * weight)
                    .sum::<f32>()
                    .sqrt();
                if norm > 0.0 {
                    for (_, weight) in &mut raw {
                        *weight /= norm;
                    }
                }
            }

            if raw.is_empty() {
                return Ok(SparseVector::empty());
            }

            let (indices, values): (Vec<u32>, Vec<f32>) = raw.into_iter().unzip();
            SparseVector::new(indices, values).map_err(ErrorEnvelope::from)
        })
    }

    fn is_trained(&self) -> bool {
        self.model.read().is_ok_and(|guard| guard.is_some())
    }

    fn snapshot(&self) -> Result<Bm25ModelSnapshot> {
        let model = self.read_model()?;
        let (vocabulary, idf, avg_doc_length, trained) = match model {
            Some(model) => {
                let vocabulary: Vec<(Box<str>, u32)> = model
                    .vocabulary
                    .iter()
                    .map(|(term, &id)| (term.clone(), id))
                    .collect();
                let idf: Vec<(Box<str>, f32)> = model
                    .vocabulary
                    .iter()
                    .map(|(term, &id)| (term.clone(), model.idf[id as usize]))
                    .collect();
                (vocabulary, idf, model.avg_doc_length, true)
            },
            None => (Vec::new(), Vec::new(), 0.0, false),
        };

        Ok(Bm25ModelSnapshot {
            k1: self.params.k1,
            b: self.params.b,
            min_term_length: self.params.min_term_length,
            stop_words: self.params.stop_words.clone(),
            vocabulary,
            idf,
            avg_doc_length,
            trained,
        })
    }

    fn restore(&self, snapshot: Bm25ModelSnapshot) -> Result<()> {
        let mut guard = self
            .model
            .write()
            .map_err(|_| lock_poisoned("write BM25 model"))?;

        if !snapshot.trained {
            *guard = None;
            return Ok(());
        }

        let vocabulary: BTreeMap<Box<str>, u32> = snapshot.vocabulary.into_iter().collect();
        let idf_by_term: HashMap<Box<str>, f32> = snapshot.idf.into_iter().collect();
        let mut idf = vec![0.0_f32; vocabulary.len()];
        for (term, &id) in &vocabulary {
            if let Some(&value) = idf_by_term.get(term) {
                idf[id as usize] = value;
            }
        }

        *guard = Some(TrainedModel {
            vocabulary,
            idf,
            avg_doc_length: snapshot.avg_doc_length,
        });
        Ok(())
    }
}

fn lock_poisoned(action: &str) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::internal(),
        format!("failed to {action}: lock poisoned"),
        ErrorClass::NonRetriable,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn learn_rejects_empty_corpus() -> Result<()> {
        let bm25 = Bm25Vectorizer::new();
        let error = bm25.learn(&[]).await.unwrap_err();
        assert_eq!(error.code, ErrorCode::new("bm25", "empty_corpus"));
        Ok(())
    }

    #[tokio::test]
    async fn generate_fails_before_training() -> Result<()> {
        let bm25 = Bm25Vectorizer::new();
        let error = bm25.generate("fn main() {}").await.unwrap_err();
        assert_eq!(error.code, ErrorCode::new("bm25", "model_not_trained"));
        Ok(())
    }

    #[tokio::test]
    async fn learn_then_generate_produces_positive_weights() -> Result<()> {
        let bm25 = Bm25Vectorizer::new();
        let docs: Vec<Box<str>> = vec![
            "fn search_index(query: &str) -> Vec<Result>".into(),
            "fn parse_query(text: &str) -> Query".into(),
            "struct Result { id: String, score: f32 }".into(),
        ];
        bm25.learn(&docs).await?;
        assert!(bm25.is_trained());

        let sparse = bm25.generate("fn search_index(query: &str)").await?;
        assert!(!sparse.is_empty());
        for value in sparse.values() {
            assert!(*value > 0.0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn generate_is_deterministic_for_same_text() -> Result<()> {
        let bm25 = Bm25Vectorizer::new();
        let docs: Vec<Box<str>> = vec!["alpha beta gamma".into(), "beta delta".into()];
        bm25.learn(&docs).await?;

        let first = bm25.generate("alpha beta").await?;
        let second = bm25.generate("alpha beta").await?;
        assert_eq!(first, second);
        Ok(())
    }

    #[tokio::test]
    async fn generate_drops_unknown_terms() -> Result<()> {
        let bm25 = Bm25Vectorizer::new();
        let docs: Vec<Box<str>> = vec!["alpha beta".into(), "beta gamma".into()];
        bm25.learn(&docs).await?;

        let sparse = bm25.generate("alpha zzz_unseen_term").await?;
        assert_eq!(sparse.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_restore_round_trip_preserves_vocabulary_and_idf() -> Result<()> {
        let bm25 = Bm25Vectorizer::new();
        let docs: Vec<Box<str>> = vec![
            "fn search_index(query: &str) -> Vec<Result>".into(),
            "fn parse_query(text: &str) -> Query".into(),
            "struct Result { id: String, score: f32 }".into(),
        ];
        bm25.learn(&docs).await?;

        let snapshot = bm25.snapshot()?;
        assert!(snapshot.trained);
        assert_eq!(snapshot.k1, Bm25Params::default().k1);
        assert_eq!(snapshot.b, Bm25Params::default().b);

        let restored = Bm25Vectorizer::with_params(Bm25Params {
            k1: snapshot.k1,
            b: snapshot.b,
            min_term_length: snapshot.min_term_length,
            stop_words: snapshot.stop_words.clone(),
            ..Bm25Params::default()
        });
        restored.restore(snapshot.clone())?;
        assert!(restored.is_trained());

        let restored_snapshot = restored.snapshot()?;
        assert_eq!(restored_snapshot.vocabulary.len(), snapshot.vocabulary.len());
        assert_eq!(restored_snapshot.avg_doc_length, snapshot.avg_doc_length);

        let original_idf: HashMap<Box<str>, f32> = snapshot.idf.into_iter().collect();
        let restored_idf: HashMap<Box<str>, f32> = restored_snapshot.idf.into_iter().collect();
        assert_eq!(original_idf.len(), restored_idf.len());
        for (term, value) in &original_idf {
            let other = restored_idf.get(term).copied().unwrap_or(f32::NAN);
            assert!((value - other).abs() < 1e-5, "idf mismatch for {term}");
        }

        let before = bm25.generate("fn search_index(query: &str)").await?;
        let after = restored.generate("fn search_index(query: &str)").await?;
        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_of_untrained_model_round_trips_cleanly() -> Result<()> {
        let bm25 = Bm25Vectorizer::new();
        let snapshot = bm25.snapshot()?;
        assert!(!snapshot.trained);
        assert!(snapshot.vocabulary.is_empty());
        assert!(snapshot.idf.is_empty());

        let restored = Bm25Vectorizer::new();
        restored.restore(snapshot)?;
        assert!(!restored.is_trained());
        Ok(())
    }

    #[tokio::test]
    async fn max_terms_keeps_highest_weighted() -> Result<()> {
        let bm25 = Bm25Vectorizer::with_params(Bm25Params {
            max_terms: Some(1),
            ..Bm25Params::default()
        });
        let docs: Vec<Box<str>> = vec![
            "common common common rare".into(),
            "common common".into(),
            "common".into(),
        ];
        bm25.learn(&docs).await?;

        let sparse = bm25.generate("common rare").await?;
        assert_eq!(sparse.len(), 1);
        Ok(())
    }
}
