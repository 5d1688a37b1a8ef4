use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DatetimeRange, DeleteCollectionBuilder,
    Distance, Filter, PointStruct, SearchPointsBuilder, Timestamp, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::vector::{types::ClusterMatch, TARGET_VECTOR};

pub const ARTICLE_COLLECTION: &str = "article_embeddings";
pub const CLUSTER_COLLECTION: &str = "cluster_centroids";

/// Vector index holding article embeddings and cluster centroids.
///
/// Every operation may fail when the index is not provisioned; callers treat those
/// failures as a degraded capability, never as a reason to abort a run.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn health_check(&self) -> Result<()>;

    async fn upsert_article_embeddings(&self, items: &[(i64, Vec<f32>)]) -> Result<()>;

    async fn upsert_cluster_centroid(
        &self,
        cluster_id: i64,
        centroid: &[f32],
        window_end: DateTime<Utc>,
    ) -> Result<()>;

    /// Clusters whose centroid similarity is at least `threshold` and whose window ended
    /// within the last `recency_days`, best match first
    async fn nearest_clusters(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: u64,
        recency_days: i64,
    ) -> Result<Vec<ClusterMatch>>;

    /// Removes every centroid, returning how many were stored
    async fn clear_cluster_centroids(&self) -> Result<u64>;

    /// Removes every article embedding, returning how many were stored
    async fn clear_article_embeddings(&self) -> Result<u64>;
}

/// Cut-off for the recency horizon used by cluster searches
pub fn recency_cutoff(recency_days: i64) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(ChronoDuration::days(recency_days))
        .unwrap_or_else(Utc::now)
}

fn point_id(id: i64) -> Result<u64> {
    u64::try_from(id).map_err(|_| anyhow!("Negative id {} cannot be used as a point id", id))
}

/// Qdrant-backed vector store
pub struct QdrantVectorStore {
    url: String,
    dimensions: u64,
    client: RwLock<Qdrant>,
}

impl QdrantVectorStore {
    fn build_client(url: &str) -> Result<Qdrant> {
        Qdrant::from_url(url)
            .timeout(Duration::from_secs(60))
            .build()
            .with_context(|| format!("Failed to build Qdrant client for {}", url))
    }

    /// Connects and makes sure both collections exist
    pub async fn connect(url: &str, dimensions: usize) -> Result<Self> {
        let store = Self {
            url: url.to_string(),
            dimensions: dimensions as u64,
            client: RwLock::new(Self::build_client(url)?),
        };
        store.ensure_connected().await?;
        store.ensure_collection(ARTICLE_COLLECTION).await?;
        store.ensure_collection(CLUSTER_COLLECTION).await?;
        info!(target: TARGET_VECTOR, "Connected to Qdrant at {}", url);
        Ok(store)
    }

    /// Health check first; on failure the client is recreated once and checked again
    pub async fn ensure_connected(&self) -> Result<()> {
        if self.client.read().await.health_check().await.is_ok() {
            return Ok(());
        }

        warn!(target: TARGET_VECTOR, "Qdrant health check failed, recreating client for {}", self.url);
        let fresh = Self::build_client(&self.url)?;
        fresh
            .health_check()
            .await
            .with_context(|| format!("Qdrant at {} is unavailable", self.url))?;
        *self.client.write().await = fresh;
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<()> {
        let client = self.client.read().await;
        if client.collection_exists(name).await? {
            return Ok(());
        }
        info!(target: TARGET_VECTOR, "Creating Qdrant collection {}", name);
        client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(self.dimensions, Distance::Cosine)),
            )
            .await
            .with_context(|| format!("Failed to create collection {}", name))?;
        Ok(())
    }

    async fn count_points(&self, name: &str) -> Result<u64> {
        let response = self
            .client
            .read()
            .await
            .count(CountPointsBuilder::new(name).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    /// Drops and recreates a collection, returning the number of points it held
    async fn reset_collection(&self, name: &str) -> Result<u64> {
        let count = self.count_points(name).await.unwrap_or(0);
        self.client
            .read()
            .await
            .delete_collection(DeleteCollectionBuilder::new(name))
            .await
            .with_context(|| format!("Failed to delete collection {}", name))?;
        self.ensure_collection(name).await?;
        Ok(count)
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn health_check(&self) -> Result<()> {
        self.ensure_connected().await
    }

    async fn upsert_article_embeddings(&self, items: &[(i64, Vec<f32>)]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut points = Vec::with_capacity(items.len());
        for (article_id, embedding) in items {
            let mut payload = Payload::new();
            payload.insert("article_id", *article_id);
            points.push(PointStruct::new(point_id(*article_id)?, embedding.clone(), payload));
        }

        match self
            .client
            .read()
            .await
            .upsert_points(UpsertPointsBuilder::new(ARTICLE_COLLECTION, points).wait(true))
            .await
        {
            Ok(_) => {
                info!(target: TARGET_VECTOR, "Stored {} article embeddings", items.len());
                Ok(())
            }
            Err(e) => {
                error!(target: TARGET_VECTOR, "Failed to store {} article embeddings: {:?}", items.len(), e);
                Err(anyhow!("Failed to store article embeddings: {:?}", e))
            }
        }
    }

    async fn upsert_cluster_centroid(
        &self,
        cluster_id: i64,
        centroid: &[f32],
        window_end: DateTime<Utc>,
    ) -> Result<()> {
        let mut payload = Payload::new();
        payload.insert("cluster_id", cluster_id);
        payload.insert("window_end", window_end.to_rfc3339());

        let point = PointStruct::new(point_id(cluster_id)?, centroid.to_vec(), payload);
        self.client
            .read()
            .await
            .upsert_points(UpsertPointsBuilder::new(CLUSTER_COLLECTION, vec![point]).wait(true))
            .await
            .map_err(|e| anyhow!("Failed to store centroid for cluster {}: {:?}", cluster_id, e))?;

        debug!(target: TARGET_VECTOR, "Stored centroid for cluster {}", cluster_id);
        Ok(())
    }

    async fn nearest_clusters(
        &self,
        embedding: &[f32],
        threshold: f32,
        limit: u64,
        recency_days: i64,
    ) -> Result<Vec<ClusterMatch>> {
        let cutoff = recency_cutoff(recency_days);
        let recent = Condition::datetime_range(
            "window_end",
            DatetimeRange {
                gt: Some(Timestamp {
                    seconds: cutoff.timestamp(),
                    nanos: 0,
                }),
                ..Default::default()
            },
        );

        let request = SearchPointsBuilder::new(CLUSTER_COLLECTION, embedding.to_vec(), limit)
            .filter(Filter::must([recent]))
            .score_threshold(threshold)
            .with_payload(false);

        let response = self
            .client
            .read()
            .await
            .search_points(request)
            .await
            .map_err(|e| anyhow!("Failed to search cluster centroids: {:?}", e))?;

        let mut matches: Vec<ClusterMatch> = response
            .result
            .into_iter()
            .filter_map(|scored_point| {
                match scored_point.id.and_then(|id| id.point_id_options) {
                    Some(PointIdOptions::Num(num)) => Some(ClusterMatch {
                        cluster_id: num as i64,
                        similarity: scored_point.score,
                    }),
                    other => {
                        warn!(target: TARGET_VECTOR, "Ignoring centroid with unexpected point id {:?}", other);
                        None
                    }
                }
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        Ok(matches)
    }

    async fn clear_cluster_centroids(&self) -> Result<u64> {
        self.reset_collection(CLUSTER_COLLECTION).await
    }

    async fn clear_article_embeddings(&self) -> Result<u64> {
        self.reset_collection(ARTICLE_COLLECTION).await
    }
}
