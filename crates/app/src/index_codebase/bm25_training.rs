//! BM25 training pre-pass for hybrid indexing.
//!
//! Hybrid collections require a BM25 model trained on the *full* current
//! corpus before any sparse vectors are generated and inserted (see the
//! ordering guarantee: retrain completes before the affected batch's sparse
//! vectors are upserted). `index_codebase` may be called with a restricted
//! `file_list` (e.g. from `reindex_by_change`), so this pre-pass always
//! performs its own independent full-tree scan rather than reusing the
//! scan results used for embedding.

use super::scanner::{file_extension_of, load_ignore_patterns, scan_code_files};
use super::types::{IndexCodebaseDeps, IndexCodebaseInput};
use semantic_code_domain::{IndexMode, Language};
use semantic_code_ports::SplitOptions;
use semantic_code_shared::{RequestContext, Result};

/// Train the BM25 model on the full corpus, if this run targets a hybrid
/// collection and a BM25 port is configured. No-op for dense indexing.
pub async fn train_bm25_if_needed(
    ctx: &RequestContext,
    deps: &IndexCodebaseDeps,
    input: &IndexCodebaseInput,
) -> Result<()> {
    if input.index_mode != IndexMode::Hybrid {
        return Ok(());
    }
    let Some(bm25) = deps.bm25.as_ref() else {
        return Ok(());
    };

    ctx.ensure_not_cancelled("index_codebase.bm25_train")?;

    let ignore_patterns = load_ignore_patterns(ctx, deps, input).await?;
    let files = scan_code_files(ctx, deps, input, &ignore_patterns).await?;

    let mut documents = Vec::new();
    let fs = deps.filesystem.session(input.codebase_root.clone());
    for relative_path in &files {
        ctx.ensure_not_cancelled("index_codebase.bm25_train")?;

        let safe_file = deps.path_policy.to_safe_relative_path(relative_path.as_ref())?;
        let code = match fs.read_file_text(ctx, safe_file).await {
            Ok(code) => code,
            Err(error) => {
                if error.is_cancelled() {
                    return Err(error);
                }
                continue;
            },
        };

        let ext = file_extension_of(relative_path.as_ref());
        let language = ext
            .as_deref()
            .map_or(Language::Text, Language::from_extension);

        let chunks = match deps
            .splitter
            .split(
                ctx,
                code,
                language,
                SplitOptions {
                    file_path: Some(relative_path.clone()),
                },
            )
            .await
        {
            Ok(chunks) => chunks,
            Err(error) => {
                if error.is_cancelled() {
                    return Err(error);
                }
                continue;
            },
        };

        documents.extend(chunks.into_iter().map(|chunk| chunk.content));
    }

    if documents.is_empty() {
        return Ok(());
    }

    bm25.learn(&documents).await
}
