//! Sparse vector value object used by lexical (BM25) retrieval.

use semantic_code_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation failures for `SparseVector`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SparseVectorError {
    /// `indices` and `values` have different lengths.
    LengthMismatch {
        /// Number of indices provided.
        indices_len: usize,
        /// Number of values provided.
        values_len: usize,
    },
    /// `indices` contains a duplicate term index.
    DuplicateIndex {
        /// The duplicated index.
        index: u32,
    },
    /// `values` contains a non-positive weight.
    NonPositiveValue {
        /// The offending index.
        index: u32,
    },
}

impl fmt::Display for SparseVectorError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LengthMismatch {
                indices_len,
                values_len,
            } => write!(
                formatter,
                "SparseVector indices ({indices_len}) and values ({values_len}) must have the same length"
            ),
            Self::DuplicateIndex { index } => {
                write!(formatter, "SparseVector index {index} appears more than once")
            },
            Self::NonPositiveValue { index } => write!(
                formatter,
                "SparseVector value at index {index} must be strictly positive"
            ),
        }
    }
}

impl std::error::Error for SparseVectorError {}

impl From<SparseVectorError> for ErrorEnvelope {
    fn from(error: SparseVectorError) -> Self {
        let code = ErrorCode::new("domain", "invalid_sparse_vector");
        let envelope = Self::expected(code, error.to_string());
        match error {
            SparseVectorError::LengthMismatch {
                indices_len,
                values_len,
            } => envelope
                .with_metadata("indices_len", indices_len.to_string())
                .with_metadata("values_len", values_len.to_string()),
            SparseVectorError::DuplicateIndex { index }
            | SparseVectorError::NonPositiveValue { index } => {
                envelope.with_metadata("index", index.to_string())
            },
        }
    }
}

/// A sparse (term-index, weight) vector, e.g. a BM25 document or query representation.
///
/// Invariants: `indices` contains no duplicates and `values` are all strictly
/// positive. Entries are not required to be sorted by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparseVector {
    indices: Vec<u32>,
    values: Vec<f32>,
}

impl SparseVector {
    /// Construct a `SparseVector`, validating uniqueness and positivity.
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Result<Self, SparseVectorError> {
        if indices.len() != values.len() {
            return Err(SparseVectorError::LengthMismatch {
                indices_len: indices.len(),
                values_len: values.len(),
            });
        }

        let mut seen = std::collections::HashSet::with_capacity(indices.len());
        for (index, value) in indices.iter().zip(values.iter()) {
            if !seen.insert(*index) {
                return Err(SparseVectorError::DuplicateIndex { index: *index });
            }
            if *value <= 0.0 {
                return Err(SparseVectorError::NonPositiveValue { index: *index });
            }
        }

        Ok(Self { indices, values })
    }

    /// An empty sparse vector (no terms).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Term indices.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Term weights, aligned with `indices`.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Number of non-zero terms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether this vector has no terms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Iterate over `(index, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    /// Dot product against another sparse vector over the shared index set.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f32 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }

        let mut other_map = std::collections::HashMap::with_capacity(other.len());
        for (index, value) in other.iter() {
            other_map.insert(index, value);
        }

        self.iter()
            .filter_map(|(index, value)| other_map.get(&index).map(|other_value| value * other_value))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_lengths() {
        let error = SparseVector::new(vec![1, 2], vec![1.0]).unwrap_err();
        assert!(matches!(error, SparseVectorError::LengthMismatch { .. }));
    }

    #[test]
    fn rejects_duplicate_indices() {
        let error = SparseVector::new(vec![1, 1], vec![1.0, 2.0]).unwrap_err();
        assert!(matches!(error, SparseVectorError::DuplicateIndex { index: 1 }));
    }

    #[test]
    fn rejects_non_positive_values() {
        let error = SparseVector::new(vec![1], vec![0.0]).unwrap_err();
        assert!(matches!(error, SparseVectorError::NonPositiveValue { index: 1 }));
    }

    #[test]
    fn dot_product_considers_only_shared_indices() -> Result<(), SparseVectorError> {
        let left = SparseVector::new(vec![1, 2, 3], vec![1.0, 2.0, 3.0])?;
        let right = SparseVector::new(vec![2, 3, 4], vec![5.0, 1.0, 9.0])?;
        assert!((left.dot(&right) - (2.0 * 5.0 + 3.0 * 1.0)).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn empty_vector_has_zero_dot_product() -> Result<(), SparseVectorError> {
        let empty = SparseVector::empty();
        let other = SparseVector::new(vec![1], vec![1.0])?;
        assert_eq!(empty.dot(&other), 0.0);
        Ok(())
    }
}
