use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clustering::assignment::{AssignmentOutcome, ClusterAssigner};
use crate::clustering::dedup::Deduplicator;
use crate::clustering::hdbscan::DensityClusterer;
use crate::clustering::materialize::{materialize, ClusterMaterializer};
use crate::clustering::types::{
    ClusterLookup, DuplicatePair, ResetSummary, RunSummary, TextSimilarity, NOISE_LABEL,
};
use crate::config::AppConfig;
use crate::db::{Article, Database, NewArticle};
use crate::enrichment::{Annotator, LlmAnnotator};
use crate::vector::{
    article_text, prepare_article_text, similarity::dot, BertEmbedder, DisabledVectorStore,
    EmbeddingConfig, EmbeddingProvider, QdrantVectorStore, VectorStore,
};
use crate::{LLMParams, TARGET_CLUSTER};

/// End-to-end clustering over unclustered articles.
///
/// Owns every collaborator it talks to. The binaries build one of these at startup
/// and tests build one from stubs.
pub struct ClusterPipeline {
    db: Database,
    embedder: Box<dyn EmbeddingProvider>,
    store: Box<dyn VectorStore>,
    annotator: Option<Box<dyn Annotator>>,
    config: AppConfig,
}

impl ClusterPipeline {
    pub fn new(
        db: Database,
        embedder: Box<dyn EmbeddingProvider>,
        store: Box<dyn VectorStore>,
        annotator: Option<Box<dyn Annotator>>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            embedder,
            store,
            annotator,
            config,
        }
    }

    /// Builds the production collaborators from configuration.
    ///
    /// The database and the embedding model are required. A missing or unreachable
    /// Qdrant, or a disabled LLM backend, only turns the matching feature off.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.database_path)
            .await
            .with_context(|| format!("Failed to open database {}", config.database_path))?;

        let embedder = BertEmbedder::load(EmbeddingConfig::from_app_config(&config))
            .await
            .context("Failed to load embedding model")?;

        let store: Box<dyn VectorStore> = match config.qdrant_url.as_deref() {
            Some(url) => match QdrantVectorStore::connect(url, config.embedding_dim).await {
                Ok(store) => Box::new(store),
                Err(e) => {
                    warn!(target: TARGET_CLUSTER,
                        "Qdrant at {} unavailable, incremental matching disabled: {:#}", url, e);
                    Box::new(DisabledVectorStore)
                }
            },
            None => {
                info!(target: TARGET_CLUSTER, "QDRANT_URL not set, incremental matching disabled");
                Box::new(DisabledVectorStore)
            }
        };

        let annotator: Option<Box<dyn Annotator>> = config.llm.client().map(|llm_client| {
            Box::new(LlmAnnotator::new(LLMParams {
                llm_client,
                model: config.llm.model.clone(),
                temperature: config.llm.temperature,
                require_json: true,
            })) as Box<dyn Annotator>
        });

        Ok(Self::new(db, Box::new(embedder), store, annotator, config))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Fetch, embed, dedup, match against existing clusters, then form new ones
    pub async fn run(&self, days: i64, limit: i64) -> Result<RunSummary> {
        self.process(days, limit, true).await
    }

    /// Like [`Self::run`] but without matching against existing clusters,
    /// optionally after wiping all clusters first.
    pub async fn recluster(&self, days: i64, limit: i64, reset_first: bool) -> Result<RunSummary> {
        if reset_first {
            let reset = self.reset(true, false).await?;
            info!(target: TARGET_CLUSTER,
                "Reset before reclustering: {} clusters deleted, {} articles unlinked",
                reset.clusters_deleted, reset.articles_unlinked);
        }
        self.process(days, limit, false).await
    }

    async fn fetch_batch(&self, days: i64, limit: i64) -> Result<Vec<Article>> {
        self.db
            .health_check()
            .await
            .context("Database unavailable")?;
        self.db
            .get_unclustered_articles(days, limit)
            .await
            .with_context(|| format!("Failed to fetch unclustered articles from the last {} days", days))
    }

    fn embed_articles(&self, articles: &[Article]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = articles.iter().map(article_text).collect();
        let embeddings = self
            .embedder
            .encode(&texts)
            .with_context(|| format!("Failed to embed {} articles", articles.len()))?;
        if embeddings.len() != articles.len() {
            return Err(anyhow!(
                "Embedding provider returned {} vectors for {} articles",
                embeddings.len(),
                articles.len()
            ));
        }
        Ok(embeddings)
    }

    async fn process(&self, days: i64, limit: i64, incremental: bool) -> Result<RunSummary> {
        let start_time = Instant::now();
        let mut summary = RunSummary::default();

        let articles = self.fetch_batch(days, limit).await?;
        summary.processed = articles.len();
        if articles.is_empty() {
            info!(target: TARGET_CLUSTER, "No unclustered articles in the last {} days", days);
            return Ok(summary);
        }

        let embeddings = self.embed_articles(&articles)?;
        let ids: Vec<i64> = articles.iter().map(|a| a.id).collect();

        let points: Vec<(i64, Vec<f32>)> = ids.iter().copied().zip(embeddings.iter().cloned()).collect();
        if let Err(e) = self.store.upsert_article_embeddings(&points).await {
            warn!(target: TARGET_CLUSTER, "Article embeddings not persisted: {:#}", e);
        }

        let kept = Deduplicator::new(self.config.dedup_threshold).deduplicate(&embeddings, &ids);
        summary.duplicates = kept.removed.len();

        let outcome = if incremental {
            ClusterAssigner::new(
                self.store.as_ref(),
                self.config.similarity_threshold,
                self.config.nearest_cluster_limit,
                self.config.recency_days,
            )
            .assign(&self.db, &kept.ids, &kept.embeddings)
            .await?
        } else {
            AssignmentOutcome {
                assigned: Vec::new(),
                remaining_ids: kept.ids,
                remaining_embeddings: kept.embeddings,
            }
        };
        summary.assigned = outcome.assigned.len();

        let assignments = DensityClusterer::new(self.config.density.clone())
            .cluster_embeddings(&outcome.remaining_embeddings, &outcome.remaining_ids)?;

        let by_id: HashMap<i64, &Article> = articles.iter().map(|a| (a.id, a)).collect();
        let embedding_by_id: HashMap<i64, &[f32]> = outcome
            .remaining_ids
            .iter()
            .copied()
            .zip(outcome.remaining_embeddings.iter().map(Vec::as_slice))
            .collect();

        let materializer = ClusterMaterializer::new(
            &self.db,
            self.store.as_ref(),
            self.annotator.as_deref(),
            self.config.write_batch_size,
        );
        let now = Utc::now();

        for (label, member_ids) in &assignments {
            if *label == NOISE_LABEL || member_ids.len() < 2 {
                summary.outliers += member_ids.len();
                continue;
            }

            let mut members = Vec::with_capacity(member_ids.len());
            let mut member_embeddings = Vec::with_capacity(member_ids.len());
            for id in member_ids {
                if let (Some(article), Some(embedding)) = (by_id.get(id), embedding_by_id.get(id)) {
                    members.push(*article);
                    member_embeddings.push(*embedding);
                }
            }

            let cluster = materialize(&members, &member_embeddings, now)
                .with_context(|| format!("Failed to materialize cluster label {}", label))?;
            let (cluster_id, enriched) = materializer
                .persist(&cluster, &members)
                .await
                .with_context(|| format!("Failed to persist cluster for articles {:?}", member_ids))?;

            summary.created += 1;
            if enriched {
                summary.enriched += 1;
            }
            summary.cluster_ids.push(cluster_id);
        }

        info!(target: TARGET_CLUSTER,
            "Clustering run finished in {:?}: {} processed, {} duplicates, {} assigned, {} new clusters, {} outliers, {} enriched",
            start_time.elapsed(),
            summary.processed,
            summary.duplicates,
            summary.assigned,
            summary.created,
            summary.outliers,
            summary.enriched
        );
        Ok(summary)
    }

    /// Near-duplicate pairs among unclustered articles, without changing anything
    pub async fn duplicate_report(&self, days: i64, limit: i64) -> Result<Vec<DuplicatePair>> {
        let articles = self.fetch_batch(days, limit).await?;
        if articles.len() < 2 {
            return Ok(Vec::new());
        }
        let embeddings = self.embed_articles(&articles)?;
        let ids: Vec<i64> = articles.iter().map(|a| a.id).collect();
        Ok(Deduplicator::new(self.config.dedup_threshold).find_duplicates(&embeddings, &ids))
    }

    /// Closest recent cluster for an article that has not been stored
    pub async fn find_cluster(&self, article: &NewArticle) -> Result<Option<ClusterLookup>> {
        let text = prepare_article_text(
            &article.title,
            article.snippet.as_deref(),
            article.full_content.as_deref(),
            &article.countries,
            &article.topics,
        );
        let embedding = self
            .embedder
            .encode_single(&text)
            .with_context(|| format!("Failed to embed article '{}'", article.title))?;

        let assigner = ClusterAssigner::new(
            self.store.as_ref(),
            self.config.similarity_threshold,
            self.config.nearest_cluster_limit,
            self.config.recency_days,
        );
        let mut candidates = match assigner.candidates(&embedding).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(target: TARGET_CLUSTER, "Cluster search unavailable: {:#}", e);
                return Ok(None);
            }
        };
        candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        if candidates.is_empty() {
            return Ok(None);
        }
        let best = candidates.remove(0);
        debug!(target: TARGET_CLUSTER,
            "Best cluster for '{}' is {} ({:.4}), {} alternatives",
            article.title, best.cluster_id, best.similarity, candidates.len());
        Ok(Some(ClusterLookup {
            best,
            alternatives: candidates,
        }))
    }

    /// Cosine similarity of two texts, judged against the assignment threshold
    pub fn similarity(&self, text1: &str, text2: &str) -> Result<TextSimilarity> {
        let embeddings = self
            .embedder
            .encode(&[text1.to_string(), text2.to_string()])
            .context("Failed to embed texts for comparison")?;
        let [first, second] = embeddings.as_slice() else {
            return Err(anyhow!("Expected 2 embeddings, got {}", embeddings.len()));
        };
        let similarity = dot(first, second);
        Ok(TextSimilarity {
            similarity,
            is_similar: similarity >= self.config.similarity_threshold,
        })
    }

    /// Unlinks every article, deletes every cluster and its centroid, and optionally
    /// the stored article embeddings. Refuses to do anything without `confirm`.
    pub async fn reset(&self, confirm: bool, clear_article_embeddings: bool) -> Result<ResetSummary> {
        if !confirm {
            return Err(anyhow!("Refusing to reset clusters without confirmation"));
        }

        let batch_size = self.config.write_batch_size;
        let mut summary = ResetSummary {
            articles_unlinked: self
                .db
                .unlink_all_articles(batch_size)
                .await
                .context("Failed to unlink articles")?,
            clusters_deleted: self.db.delete_all_clusters(batch_size).await?,
            ..Default::default()
        };

        match self.store.clear_cluster_centroids().await {
            Ok(count) => summary.centroids_deleted = count,
            Err(e) => warn!(target: TARGET_CLUSTER, "Cluster centroids not cleared: {:#}", e),
        }

        if clear_article_embeddings {
            match self.store.clear_article_embeddings().await {
                Ok(count) => summary.article_embeddings_deleted = count,
                Err(e) => warn!(target: TARGET_CLUSTER, "Article embeddings not cleared: {:#}", e),
            }
        }

        warn!(target: TARGET_CLUSTER,
            "Reset removed {} clusters, {} centroids, unlinked {} articles",
            summary.clusters_deleted, summary.centroids_deleted, summary.articles_unlinked);
        Ok(summary)
    }
}
