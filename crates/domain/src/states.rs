//! Domain state machine types.

use semantic_code_shared::ErrorEnvelope;
use serde::{Deserialize, Serialize};

/// High-level indexing state for orchestration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexingState {
    /// Idle (no index in progress).
    Idle,
    /// Indexing in progress.
    Indexing,
    /// Indexing completed successfully.
    Ready,
    /// Indexing failed with a human-readable reason.
    Error {
        /// Human-readable reason for the failure.
        reason: Box<str>,
    },
}

/// Detailed indexing status for UI consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexStatus {
    /// No index exists for the codebase.
    NotIndexed,
    /// Indexing in progress.
    Indexing,
    /// Indexing completed successfully.
    Indexed,
    /// Indexing stopped due to resource limits.
    LimitReached,
    /// Indexing failed with an error envelope.
    Failed {
        /// Error envelope describing the failure.
        error: ErrorEnvelope,
    },
}

/// Progress events emitted during indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Progress update for a named phase.
    Progress {
        /// Phase identifier (e.g. "scan").
        phase: Box<str>,
        /// Current item count.
        current: u64,
        /// Total item count.
        total: u64,
        /// Completion percentage (0-100).
        percentage: u8,
    },
    /// Index status update.
    Status {
        /// Current status snapshot.
        status: IndexStatus,
    },
}

impl ProgressEvent {
    /// Build a progress event with computed percentage.
    #[must_use]
    pub fn progress(phase: impl AsRef<str>, current: u64, total: u64) -> Self {
        Self::Progress {
            phase: phase.as_ref().to_owned().into_boxed_str(),
            current,
            total,
            percentage: progress_percentage(current, total),
        }
    }

    /// Build a status event.
    #[must_use]
    pub const fn status(status: IndexStatus) -> Self {
        Self::Status { status }
    }
}

/// How a completed indexing run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// The full codebase was indexed.
    Completed,
    /// Indexing stopped early because a resource limit was hit (some chunks
    /// were still committed).
    LimitReached,
}

/// Registry entry tracking the last known state of a codebase collection.
///
/// Distinct from [`IndexStatus`]: this is the durable, per-codebase record
/// kept by the collection registry (see `semantic-code-ports::registry`),
/// not a transient progress stream. `last_updated` is a Unix epoch
/// millisecond timestamp, matching this crate family's existing timestamp
/// convention (see `semantic_code_infra::cli_manifest::now_epoch_ms`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CodebaseRegistryEntry {
    /// Indexing is currently in progress.
    Indexing {
        /// Last observed progress event, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<ProgressEvent>,
        /// Unix epoch millisecond timestamp of this update.
        last_updated: u64,
    },
    /// Indexing completed successfully.
    Indexed {
        /// Number of files indexed.
        files: u64,
        /// Number of chunks indexed.
        chunks: u64,
        /// Whether the run completed fully or stopped at a resource limit.
        completion: CompletionKind,
        /// Unix epoch millisecond timestamp of this update.
        last_updated: u64,
    },
    /// Indexing failed.
    Failed {
        /// Human-readable failure message.
        message: Box<str>,
        /// Last progress observed before the failure, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        last_progress: Option<ProgressEvent>,
        /// Unix epoch millisecond timestamp of this update.
        last_updated: u64,
    },
}

impl CodebaseRegistryEntry {
    /// Whether this entry represents an in-progress indexing run.
    #[must_use]
    pub const fn is_indexing(&self) -> bool {
        matches!(self, Self::Indexing { .. })
    }

    /// The Unix epoch millisecond timestamp of this entry's last update.
    #[must_use]
    pub const fn last_updated(&self) -> u64 {
        match self {
            Self::Indexing { last_updated, .. }
            | Self::Indexed { last_updated, .. }
            | Self::Failed { last_updated, .. } => *last_updated,
        }
    }
}

fn progress_percentage(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let capped = if current > total { total } else { current };
    let percent = (capped.saturating_mul(100)) / total;
    u8::try_from(percent).unwrap_or(u8::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use semantic_code_shared::{ErrorCode, ErrorEnvelope};
    use std::error::Error;

    #[test]
    fn progress_event_computes_percentage() {
        let event = ProgressEvent::progress("scan", 1, 2);
        let percentage = match event {
            ProgressEvent::Progress { percentage, .. } => Some(percentage),
            ProgressEvent::Status { .. } => None,
        };
        assert_eq!(percentage, Some(50));
    }

    #[test]
    fn status_and_progress_serialization_shape() -> Result<(), Box<dyn Error>> {
        let status = IndexStatus::Failed {
            error: ErrorEnvelope::expected(ErrorCode::invalid_input(), "bad input"),
        };
        let event = ProgressEvent::status(status);

        let value = serde_json::to_value(&event)?;
        let expected = serde_json::json!({
            "type": "status",
            "status": {
                "status": "failed",
                "error": {
                    "kind": "Expected",
                    "class": "NonRetriable",
                    "code": { "namespace": "core", "code": "invalid_input" },
                    "message": "bad input"
                }
            }
        });
        assert_eq!(value, expected);
        Ok(())
    }

    #[test]
    fn registry_entry_indexing_has_no_terminal_counts() {
        let entry = CodebaseRegistryEntry::Indexing {
            progress: None,
            last_updated: 1_800_000_000_000,
        };
        assert!(entry.is_indexing());
        assert_eq!(entry.last_updated(), 1_800_000_000_000);
    }

    #[test]
    fn registry_entry_serialization_shape() -> Result<(), Box<dyn Error>> {
        let entry = CodebaseRegistryEntry::Indexed {
            files: 12,
            chunks: 340,
            completion: CompletionKind::LimitReached,
            last_updated: 1_800_000_000_000,
        };

        let value = serde_json::to_value(&entry)?;
        let expected = serde_json::json!({
            "status": "indexed",
            "files": 12,
            "chunks": 340,
            "completion": "limit_reached",
            "last_updated": 1_800_000_000_000_u64
        });
        assert_eq!(value, expected);
        Ok(())
    }
}
