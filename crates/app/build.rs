//! Generates the indexing pipeline's finite-state-machine definitions.
//!
//! The states and legal transitions are a fixed property of the index
//! use-case (see `index_codebase::mod`), not configuration, so they are
//! emitted as a small generated module rather than hand-maintained twice.

use std::env;
use std::fs;
use std::path::Path;

const STATES: &[&str] = &["Prepared", "Scanned", "Embedded", "Inserted", "Completed"];

const TRANSITIONS: &[(&str, &str)] = &[
    ("Prepared", "Scanned"),
    ("Scanned", "Embedded"),
    ("Embedded", "Inserted"),
    ("Inserted", "Completed"),
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR set by cargo");
    let dest = Path::new(&out_dir).join("index_pipeline_fsm.rs");

    let mut source = String::new();
    source.push_str("/// Indexing pipeline state (generated).\n");
    source.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq)]\n");
    source.push_str("pub enum IndexPipelineState {\n");
    for state in STATES {
        source.push_str(&format!("    {state},\n"));
    }
    source.push_str("}\n\n");

    source.push_str("impl IndexPipelineState {\n");
    source.push_str("    /// Stable lowercase name, used in logs and error messages.\n");
    source.push_str("    #[must_use]\n");
    source.push_str("    pub const fn as_str(self) -> &'static str {\n");
    source.push_str("        match self {\n");
    for state in STATES {
        source.push_str(&format!(
            "            Self::{state} => \"{}\",\n",
            state.to_lowercase()
        ));
    }
    source.push_str("        }\n    }\n}\n\n");

    source.push_str(&format!(
        "/// All pipeline states, in the order they are entered.\npub const INDEX_PIPELINE_STATES: [IndexPipelineState; {}] = [\n",
        STATES.len()
    ));
    for state in STATES {
        source.push_str(&format!("    IndexPipelineState::{state},\n"));
    }
    source.push_str("];\n\n");

    source.push_str(&format!(
        "/// Legal `(from, to)` pipeline transitions.\npub const INDEX_PIPELINE_TRANSITIONS: [(IndexPipelineState, IndexPipelineState); {}] = [\n",
        TRANSITIONS.len()
    ));
    for (from, to) in TRANSITIONS {
        source.push_str(&format!(
            "    (IndexPipelineState::{from}, IndexPipelineState::{to}),\n"
        ));
    }
    source.push_str("];\n");

    fs::write(&dest, source).expect("write generated index_pipeline_fsm.rs");
}
