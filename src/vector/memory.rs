use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::vector::{
    similarity::dot,
    storage::{recency_cutoff, VectorStore},
    types::ClusterMatch,
    TARGET_VECTOR,
};

struct StoredCentroid {
    vector: Vec<f32>,
    window_end: DateTime<Utc>,
}

/// In-process brute force vector store.
///
/// Used by tests and by one-off runs that do not need persistence across processes.
#[derive(Default)]
pub struct MemoryVectorStore {
    articles: Mutex<HashMap<i64, Vec<f32>>>,
    clusters: Mutex<HashMap<i64, StoredCentroid>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn article_count(&self) -> usize {
        self.articles.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.lock().map(|c| c.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("Memory vector store lock poisoned")
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_article_embeddings(&self, items: &[(i64, Vec<f32>)]) -> Result<()> {
        let mut articles = self.articles.lock().map_err(poisoned)?;
        for (id, vector) in items {
            articles.insert(*id, vector.clone());
        }
        Ok(())
    }

    async fn upsert_cluster_centroid(
        &self,
        cluster_id: i64,
        centroid: &[f32],
        window_end: DateTime<Utc>,
    ) -> Result<()> {
        self.clusters.lock().map_err(poisoned)?.insert(
            cluster_id,
            StoredCentroid {
                vector: centroid.to_vec(),
                window_end,
            },
        );
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
        let clusters = self.clusters.lock().map_err(poisoned)?;

        let mut matches: Vec<ClusterMatch> = clusters
            .iter()
            .filter(|(_, stored)| stored.window_end > cutoff)
            .filter(|(_, stored)| stored.vector.len() == embedding.len())
            .map(|(id, stored)| ClusterMatch {
                cluster_id: *id,
                similarity: dot(embedding, &stored.vector),
            })
            .filter(|m| m.similarity >= threshold)
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.cluster_id.cmp(&b.cluster_id))
        });
        matches.truncate(limit as usize);

        debug!(target: TARGET_VECTOR, "Memory store matched {} clusters", matches.len());
        Ok(matches)
    }

    async fn clear_cluster_centroids(&self) -> Result<u64> {
        let mut clusters = self.clusters.lock().map_err(poisoned)?;
        let count = clusters.len() as u64;
        clusters.clear();
        Ok(count)
    }

    async fn clear_article_embeddings(&self) -> Result<u64> {
        let mut articles = self.articles.lock().map_err(poisoned)?;
        let count = articles.len() as u64;
        articles.clear();
        Ok(count)
    }
}

/// Stand-in used when no vector index is configured: searches find nothing and
/// writes are dropped.
pub struct DisabledVectorStore;

#[async_trait]
impl VectorStore for DisabledVectorStore {
    async fn health_check(&self) -> Result<()> {
        Err(anyhow!("Vector index is not configured"))
    }

    async fn upsert_article_embeddings(&self, _items: &[(i64, Vec<f32>)]) -> Result<()> {
        Ok(())
    }

    async fn upsert_cluster_centroid(
        &self,
        _cluster_id: i64,
        _centroid: &[f32],
        _window_end: DateTime<Utc>,
    ) -> Result<()> {
        Ok(())
    }

    async fn nearest_clusters(
        &self,
        _embedding: &[f32],
        _threshold: f32,
        _limit: u64,
        _recency_days: i64,
    ) -> Result<Vec<ClusterMatch>> {
        Ok(Vec::new())
    }

    async fn clear_cluster_centroids(&self) -> Result<u64> {
        Ok(0)
    }

    async fn clear_article_embeddings(&self) -> Result<u64> {
        Ok(0)
    }
}
