use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::clustering::ClusterPipeline;
use crate::config::AppConfig;
use crate::db::{format_timestamp, parse_timestamp, Article, Cluster, Database, NewArticle};
use crate::enrichment::{Annotator, ClusterAnalysis};
use crate::vector::similarity::normalize;
use crate::vector::{ClusterMatch, EmbeddingProvider, MemoryVectorStore, VectorStore};

/// Vector store whose every call fails, like an unreachable Qdrant
pub(crate) struct FailingStore;

#[async_trait]
impl VectorStore for FailingStore {
    async fn health_check(&self) -> Result<()> {
        Err(anyhow!("vector store unavailable"))
    }
    async fn upsert_article_embeddings(&self, _items: &[(i64, Vec<f32>)]) -> Result<()> {
        Err(anyhow!("vector store unavailable"))
    }
    async fn upsert_cluster_centroid(&self, _id: i64, _c: &[f32], _w: DateTime<Utc>) -> Result<()> {
        Err(anyhow!("vector store unavailable"))
    }
    async fn nearest_clusters(&self, _e: &[f32], _t: f32, _l: u64, _r: i64) -> Result<Vec<ClusterMatch>> {
        Err(anyhow!("vector store unavailable"))
    }
    async fn clear_cluster_centroids(&self) -> Result<u64> {
        Err(anyhow!("vector store unavailable"))
    }
    async fn clear_article_embeddings(&self) -> Result<u64> {
        Err(anyhow!("vector store unavailable"))
    }
}

const DIM: usize = 8;

fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i] = 1.0;
    v
}

/// Embeds by the first keyword found in the text; unknown text lands on the last axis
pub(crate) struct KeywordEmbedder {
    table: Vec<(&'static str, Vec<f32>)>,
}

impl KeywordEmbedder {
    fn news() -> Self {
        Self {
            table: vec![
                ("earthquake-original", axis(0)),
                ("earthquake-copy", normalize(&[1.0, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])),
                ("summit-day-one", normalize(&[0.0, 1.0, 0.3, 0.0, 0.0, 0.0, 0.0, 0.0])),
                ("summit-day-two", normalize(&[0.0, 1.0, 0.0, 0.3, 0.0, 0.0, 0.0, 0.0])),
                ("summit-follow-up", normalize(&[0.0, 1.0, 0.15, 0.15, 0.0, 0.0, 0.0, 0.0])),
            ],
        }
    }
}

impl EmbeddingProvider for KeywordEmbedder {
    fn dimension(&self) -> usize {
        DIM
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                self.table
                    .iter()
                    .find(|(keyword, _)| text.contains(keyword))
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| axis(DIM - 1))
            })
            .collect())
    }
}

struct FixedAnnotator;

#[async_trait]
impl Annotator for FixedAnnotator {
    async fn enrich(&self, cluster: &Cluster, articles: &[Article]) -> Option<ClusterAnalysis> {
        let raw = format!(
            r#"{{"canonical_title": "Leaders meet at summit", "summary": "{} reports", "severity": 64, "confidence": 71,
                "countries": ["Norway"], "entities": {{"events": ["summit"]}}}}"#,
            articles.len()
        );
        ClusterAnalysis::from_response(&raw).map(|a| a.sanitize(&cluster.canonical_title))
    }
}

struct SilentAnnotator;

#[async_trait]
impl Annotator for SilentAnnotator {
    async fn enrich(&self, _cluster: &Cluster, _articles: &[Article]) -> Option<ClusterAnalysis> {
        None
    }
}

/// Publish time of the i-th seeded article; later articles are more recent
fn published(i: usize) -> String {
    format_timestamp(Utc::now() - Duration::hours(10 - i as i64))
}

async fn seed(db: &Database, titles: &[&str]) -> Vec<i64> {
    let mut ids = Vec::new();
    for (i, title) in titles.iter().enumerate() {
        ids.push(
            db.add_article(&NewArticle {
                title: title.to_string(),
                source_id: Some(format!("source-{}", i)),
                published_at: Some(published(i)),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
    }
    ids
}

async fn pipeline_with(
    store: Box<dyn VectorStore>,
    annotator: Option<Box<dyn Annotator>>,
) -> (ClusterPipeline, Vec<i64>) {
    let db = Database::in_memory().await.unwrap();
    let ids = seed(
        &db,
        &["earthquake-original", "earthquake-copy", "summit-day-one", "summit-day-two"],
    )
    .await;
    let pipeline = ClusterPipeline::new(
        db,
        Box::new(KeywordEmbedder::news()),
        store,
        annotator,
        AppConfig::default(),
    );
    (pipeline, ids)
}

fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_full_run_dedups_and_forms_one_cluster() {
    let (pipeline, ids) = pipeline_with(Box::new(MemoryVectorStore::new()), None).await;

    let summary = pipeline.run(7, 500).await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.assigned, 0);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.outliers, 1);
    assert_eq!(summary.enriched, 0);

    let cluster_id = summary.cluster_ids[0];
    let members = pipeline.db().get_cluster_articles(cluster_id).await.unwrap();
    assert_eq!(sorted(members.iter().map(|a| a.id).collect()), vec![ids[2], ids[3]]);

    let cluster = pipeline.db().get_cluster(cluster_id).await.unwrap().unwrap();
    assert_eq!(cluster.article_count, 2);
    assert_eq!(cluster.source_count, 2);
    assert_eq!(cluster.severity, 60);
    assert_eq!(cluster.confidence, 68);
    let start = parse_timestamp(&cluster.window_start).unwrap();
    let end = parse_timestamp(&cluster.window_end).unwrap();
    assert_eq!(end - start, Duration::hours(1));
    assert!(end <= Utc::now());
    assert!(!cluster.enriched);
}

#[tokio::test]
async fn test_unavailable_vector_store_still_creates_clusters() {
    let (pipeline, ids) = pipeline_with(Box::new(FailingStore), None).await;

    let summary = pipeline.run(7, 500).await.unwrap();
    assert_eq!(summary.assigned, 0);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.created, 1);

    let members = pipeline
        .db()
        .get_cluster_articles(summary.cluster_ids[0])
        .await
        .unwrap();
    assert_eq!(sorted(members.iter().map(|a| a.id).collect()), vec![ids[2], ids[3]]);
}

#[tokio::test]
async fn test_second_run_assigns_to_existing_cluster() {
    let (pipeline, _) = pipeline_with(Box::new(MemoryVectorStore::new()), None).await;
    let first = pipeline.run(7, 500).await.unwrap();
    let cluster_id = first.cluster_ids[0];

    let late = pipeline
        .db()
        .add_article(&NewArticle {
            title: "summit-follow-up".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let second = pipeline.run(7, 500).await.unwrap();
    // The earthquake pair is still unclustered and is seen again
    assert_eq!(second.processed, 3);
    assert_eq!(second.duplicates, 1);
    assert_eq!(second.assigned, 1);
    assert_eq!(second.created, 0);
    assert_eq!(second.outliers, 1);

    let members = pipeline.db().get_cluster_articles(cluster_id).await.unwrap();
    assert!(members.iter().any(|a| a.id == late));
    assert_eq!(members.len(), 3);

    // Counts are fixed at creation
    let cluster = pipeline.db().get_cluster(cluster_id).await.unwrap().unwrap();
    assert_eq!(cluster.article_count, 2);
}

#[tokio::test]
async fn test_rerun_without_new_articles_creates_nothing() {
    let (pipeline, _) = pipeline_with(Box::new(MemoryVectorStore::new()), None).await;
    pipeline.run(7, 500).await.unwrap();

    let again = pipeline.run(7, 500).await.unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(again.assigned, 0);
    assert_eq!(again.processed, 2);
    assert_eq!(pipeline.db().list_clusters(3650, 100).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_enrichment_replaces_provisional_fields() {
    let (pipeline, _) =
        pipeline_with(Box::new(MemoryVectorStore::new()), Some(Box::new(FixedAnnotator))).await;

    let summary = pipeline.run(7, 500).await.unwrap();
    assert_eq!(summary.enriched, 1);

    let cluster = pipeline
        .db()
        .get_cluster(summary.cluster_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert!(cluster.enriched);
    assert_eq!(cluster.canonical_title, "Leaders meet at summit");
    assert_eq!(cluster.summary, "2 reports");
    assert_eq!(cluster.severity, 64);
    assert_eq!(cluster.confidence, 71);
    assert_eq!(cluster.countries, vec!["Norway".to_string()]);
    assert_eq!(cluster.entities.events, vec!["summit".to_string()]);
}

#[tokio::test]
async fn test_failed_enrichment_keeps_provisional_fields() {
    let (pipeline, _) =
        pipeline_with(Box::new(MemoryVectorStore::new()), Some(Box::new(SilentAnnotator))).await;

    let summary = pipeline.run(7, 500).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.enriched, 0);

    let cluster = pipeline
        .db()
        .get_cluster(summary.cluster_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert!(!cluster.enriched);
    assert_eq!(cluster.summary, "Event covered by 2 articles from 2 sources");
}

#[tokio::test]
async fn test_duplicate_report_is_read_only() {
    let (pipeline, ids) = pipeline_with(Box::new(MemoryVectorStore::new()), None).await;

    let pairs = pipeline.duplicate_report(7, 500).await.unwrap();
    assert_eq!(pairs.len(), 1);
    let pair = &pairs[0];
    assert_eq!(sorted(vec![pair.id1, pair.id2]), vec![ids[0], ids[1]]);
    assert!(pair.similarity >= 0.92);

    let (_, clustered) = pipeline.db().count_articles().await.unwrap();
    assert_eq!(clustered, 0);
}

#[tokio::test]
async fn test_find_cluster_and_similarity() {
    let (pipeline, _) = pipeline_with(Box::new(MemoryVectorStore::new()), None).await;
    let summary = pipeline.run(7, 500).await.unwrap();

    let lookup = pipeline
        .find_cluster(&NewArticle {
            title: "summit-follow-up".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lookup.best.cluster_id, summary.cluster_ids[0]);
    assert!(lookup.alternatives.is_empty());

    let unrelated = pipeline
        .find_cluster(&NewArticle {
            title: "earthquake-original".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(unrelated.is_none());

    let close = pipeline.similarity("summit-day-one", "summit-day-two").unwrap();
    assert!(close.is_similar);
    let far = pipeline.similarity("summit-day-one", "earthquake-original").unwrap();
    assert!(!far.is_similar);
    assert!(far.similarity.abs() < 1e-6);
}

#[tokio::test]
async fn test_reset_requires_confirmation() {
    let store = std::sync::Arc::new(MemoryVectorStore::new());
    let (pipeline, _) = pipeline_with(Box::new(SharedStore(store.clone())), None).await;
    pipeline.run(7, 500).await.unwrap();
    assert_eq!(store.cluster_count(), 1);
    assert_eq!(store.article_count(), 4);

    assert!(pipeline.reset(false, true).await.is_err());
    assert_eq!(pipeline.db().count_articles().await.unwrap(), (4, 2));

    let reset = pipeline.reset(true, true).await.unwrap();
    assert_eq!(reset.articles_unlinked, 2);
    assert_eq!(reset.clusters_deleted, 1);
    assert_eq!(reset.centroids_deleted, 1);
    assert_eq!(reset.article_embeddings_deleted, 4);
    assert_eq!(store.cluster_count(), 0);
    assert_eq!(pipeline.db().count_articles().await.unwrap(), (4, 0));
}

#[tokio::test]
async fn test_recluster_ignores_existing_centroids() {
    let (pipeline, _) = pipeline_with(Box::new(MemoryVectorStore::new()), None).await;
    let first = pipeline.run(7, 500).await.unwrap();

    let again = pipeline.recluster(7, 500, true).await.unwrap();
    assert_eq!(again.processed, 4);
    assert_eq!(again.assigned, 0);
    assert_eq!(again.created, 1);
    assert_ne!(again.cluster_ids, first.cluster_ids);
    assert!(pipeline.db().get_cluster(first.cluster_ids[0]).await.unwrap().is_none());
}

/// Lets a test keep a handle on the store it gives to the pipeline
struct SharedStore(std::sync::Arc<MemoryVectorStore>);

#[async_trait]
impl VectorStore for SharedStore {
    async fn health_check(&self) -> Result<()> {
        self.0.health_check().await
    }
    async fn upsert_article_embeddings(&self, items: &[(i64, Vec<f32>)]) -> Result<()> {
        self.0.upsert_article_embeddings(items).await
    }
    async fn upsert_cluster_centroid(&self, id: i64, c: &[f32], w: DateTime<Utc>) -> Result<()> {
        self.0.upsert_cluster_centroid(id, c, w).await
    }
    async fn nearest_clusters(&self, e: &[f32], t: f32, l: u64, r: i64) -> Result<Vec<ClusterMatch>> {
        self.0.nearest_clusters(e, t, l, r).await
    }
    async fn clear_cluster_centroids(&self) -> Result<u64> {
        self.0.clear_cluster_centroids().await
    }
    async fn clear_article_embeddings(&self) -> Result<u64> {
        self.0.clear_article_embeddings().await
    }
}
