use serde::Serialize;

/// A persisted cluster whose centroid is close to a query vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMatch {
    pub cluster_id: i64,
    pub similarity: f32,
}
