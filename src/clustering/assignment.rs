use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::vector::{ClusterMatch, VectorStore};
use crate::TARGET_CLUSTER;

/// Articles matched to existing clusters, and the ones left for fresh clustering
#[derive(Debug, Default)]
pub struct AssignmentOutcome {
    pub assigned: Vec<(i64, ClusterMatch)>,
    pub remaining_ids: Vec<i64>,
    pub remaining_embeddings: Vec<Vec<f32>>,
}

/// Attaches articles to the closest recent cluster above a similarity threshold.
///
/// The vector store is best effort: once a search fails, the rest of the batch is
/// treated as unmatched instead of failing the run.
pub struct ClusterAssigner<'a> {
    store: &'a dyn VectorStore,
    threshold: f32,
    limit: u64,
    recency_days: i64,
}

impl<'a> ClusterAssigner<'a> {
    pub fn new(store: &'a dyn VectorStore, threshold: f32, limit: u64, recency_days: i64) -> Self {
        Self {
            store,
            threshold,
            limit,
            recency_days,
        }
    }

    /// Candidate clusters for one embedding, best first. `Err` means the store is unavailable.
    pub async fn candidates(&self, embedding: &[f32]) -> Result<Vec<ClusterMatch>> {
        self.store
            .nearest_clusters(embedding, self.threshold, self.limit, self.recency_days)
            .await
    }

    /// Matches each article against stored centroids and persists every match immediately.
    ///
    /// # Arguments
    /// * `db` - store receiving the article-to-cluster links
    /// * `ids` - article ids, parallel to `embeddings`
    /// * `embeddings` - unit-normalized article embeddings
    ///
    /// # Returns
    /// * Matched articles plus the ids and embeddings that found no cluster, in input order
    pub async fn assign(
        &self,
        db: &Database,
        ids: &[i64],
        embeddings: &[Vec<f32>],
    ) -> Result<AssignmentOutcome> {
        let mut outcome = AssignmentOutcome::default();
        let mut store_available = true;

        for (id, embedding) in ids.iter().zip(embeddings) {
            let best = if store_available {
                match self.candidates(embedding).await {
                    Ok(matches) => matches
                        .into_iter()
                        .max_by(|a, b| a.similarity.total_cmp(&b.similarity)),
                    Err(e) => {
                        warn!(target: TARGET_CLUSTER,
                            "Cluster search unavailable, continuing without incremental matching: {:#}", e);
                        store_available = false;
                        None
                    }
                }
            } else {
                None
            };

            match best {
                Some(found) => {
                    db.assign_article_to_cluster(*id, found.cluster_id)
                        .await
                        .with_context(|| {
                            format!("Failed to assign article {} to cluster {}", id, found.cluster_id)
                        })?;
                    debug!(target: TARGET_CLUSTER,
                        "Article {} joined cluster {} (similarity {:.4})", id, found.cluster_id, found.similarity);
                    outcome.assigned.push((*id, found));
                }
                None => {
                    outcome.remaining_ids.push(*id);
                    outcome.remaining_embeddings.push(embedding.clone());
                }
            }
        }

        if !outcome.assigned.is_empty() {
            info!(target: TARGET_CLUSTER,
                "Assigned {} articles to existing clusters, {} left for new clusters",
                outcome.assigned.len(), outcome.remaining_ids.len());
        }
        Ok(outcome)
    }
}
