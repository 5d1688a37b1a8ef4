// Module declarations
pub mod assignment;
pub mod dedup;
pub mod hdbscan;
pub mod materialize;
pub mod pipeline;
#[cfg(test)]
mod tests;
pub mod types;

pub use types::*;

pub use assignment::{AssignmentOutcome, ClusterAssigner};
pub use dedup::{Deduplicated, Deduplicator};
pub use hdbscan::{DensityClusterer, DensityParams};
pub use materialize::{
    confidence_score, materialize, severity_score, ClusterMaterializer, MaterializedCluster,
};
pub use pipeline::ClusterPipeline;
