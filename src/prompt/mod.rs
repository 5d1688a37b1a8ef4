// Declare submodules
mod common;
mod enrichment;

pub use common::*;
pub use enrichment::{cluster_enrichment_prompt, ENRICHMENT_SYSTEM_PROMPT, MAX_PROMPT_ARTICLES};
