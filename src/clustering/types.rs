use serde::Serialize;
use std::collections::BTreeMap;

use crate::vector::ClusterMatch;

/// Label reserved for points that belong to no dense group
pub const NOISE_LABEL: i32 = -1;

/// Cluster label to article ids, produced by one clustering run
pub type ClusterAssignments = BTreeMap<i32, Vec<i64>>;

/// Two articles whose embeddings are at least the dedup threshold apart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicatePair {
    pub id1: i64,
    pub id2: i64,
    pub similarity: f32,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Unclustered articles fetched for this run
    pub processed: usize,
    /// New clusters materialized
    pub created: usize,
    /// Articles attached to existing clusters
    pub assigned: usize,
    /// Articles dropped as near-duplicates
    pub duplicates: usize,
    /// Articles left unclustered by the density clusterer
    pub outliers: usize,
    /// Clusters that received enrichment
    pub enriched: usize,
    pub cluster_ids: Vec<i64>,
}

/// What a reset removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResetSummary {
    pub articles_unlinked: u64,
    pub clusters_deleted: u64,
    pub centroids_deleted: u64,
    pub article_embeddings_deleted: u64,
}

/// Best existing cluster for an ad-hoc article, with runner-up candidates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterLookup {
    pub best: ClusterMatch,
    pub alternatives: Vec<ClusterMatch>,
}

/// Similarity of two free texts
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TextSimilarity {
    pub similarity: f32,
    pub is_similar: bool,
}
