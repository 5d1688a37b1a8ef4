use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{info, warn};

use crate::db::{parse_timestamp, Article, Database, NewCluster};
use crate::enrichment::Annotator;
use crate::vector::{similarity::centroid, VectorStore};
use crate::TARGET_CLUSTER;

/// Cap on the aggregated country and topic lists of a new cluster
pub const MAX_CLUSTER_TAGS: usize = 10;

/// `min(100, 30 + 10 * articles + 5 * sources)`
pub fn severity_score(article_count: usize, source_count: usize) -> i64 {
    (30 + 10 * article_count as i64 + 5 * source_count as i64).min(100)
}

/// `min(100, 40 + 8 * articles + 6 * sources)`
pub fn confidence_score(article_count: usize, source_count: usize) -> i64 {
    (40 + 8 * article_count as i64 + 6 * source_count as i64).min(100)
}

pub fn provisional_summary(article_count: usize, source_count: usize) -> String {
    format!(
        "Event covered by {} articles from {} sources",
        article_count, source_count
    )
}

/// Distinct values in first-seen order, at most `cap` of them
fn aggregate_tags<'a>(lists: impl Iterator<Item = &'a Vec<String>>, cap: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for value in lists.flatten() {
        if tags.len() >= cap {
            break;
        }
        let value = value.trim();
        if !value.is_empty() && seen.insert(value.to_string()) {
            tags.push(value.to_string());
        }
    }
    tags
}

/// A new cluster ready to persist, with the data needed to link and index it
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedCluster {
    pub record: NewCluster,
    pub centroid: Vec<f32>,
    pub article_ids: Vec<i64>,
}

/// Derives the provisional cluster record from its members.
///
/// # Arguments
/// * `members` - member articles in batch order
/// * `embeddings` - their embeddings, same order
/// * `now` - window used when no member has a usable publish time
pub fn materialize(
    members: &[&Article],
    embeddings: &[&[f32]],
    now: DateTime<Utc>,
) -> Result<MaterializedCluster> {
    if members.is_empty() || members.len() != embeddings.len() {
        return Err(anyhow!(
            "Cannot materialize a cluster from {} articles and {} embeddings",
            members.len(),
            embeddings.len()
        ));
    }

    let centroid = centroid(embeddings).ok_or_else(|| {
        anyhow!(
            "Embeddings of articles {:?} have mismatched dimensions",
            members.iter().map(|a| a.id).collect::<Vec<_>>()
        )
    })?;

    let published: Vec<DateTime<Utc>> = members
        .iter()
        .filter_map(|a| a.published_at.as_deref().and_then(parse_timestamp))
        .collect();
    let window_start = published.iter().min().copied().unwrap_or(now);
    let window_end = published.iter().max().copied().unwrap_or(now);

    let sources: HashSet<&str> = members
        .iter()
        .filter_map(|a| a.source_id.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let article_count = members.len();
    let source_count = sources.len();

    Ok(MaterializedCluster {
        record: NewCluster {
            canonical_title: members[0].title.clone(),
            summary: provisional_summary(article_count, source_count),
            countries: aggregate_tags(members.iter().map(|a| &a.countries), MAX_CLUSTER_TAGS),
            topics: aggregate_tags(members.iter().map(|a| &a.topics), MAX_CLUSTER_TAGS),
            article_count: article_count as i64,
            source_count: source_count as i64,
            window_start,
            window_end,
            severity: severity_score(article_count, source_count),
            confidence: confidence_score(article_count, source_count),
        },
        centroid,
        article_ids: members.iter().map(|a| a.id).collect(),
    })
}

/// Persists materialized clusters: row, member links, centroid, then enrichment
pub struct ClusterMaterializer<'a> {
    db: &'a Database,
    store: &'a dyn VectorStore,
    annotator: Option<&'a dyn Annotator>,
    batch_size: usize,
}

impl<'a> ClusterMaterializer<'a> {
    pub fn new(
        db: &'a Database,
        store: &'a dyn VectorStore,
        annotator: Option<&'a dyn Annotator>,
        batch_size: usize,
    ) -> Self {
        Self {
            db,
            store,
            annotator,
            batch_size,
        }
    }

    /// Only the cluster row itself is required to succeed. Link chunks, the centroid
    /// and enrichment each degrade with a warning.
    ///
    /// # Returns
    /// * The new cluster id and whether enrichment was applied
    pub async fn persist(
        &self,
        cluster: &MaterializedCluster,
        members: &[&Article],
    ) -> Result<(i64, bool)> {
        let cluster_id = self.db.create_cluster(&cluster.record).await?;

        let linked = self
            .db
            .assign_articles_to_cluster(&cluster.article_ids, cluster_id, self.batch_size)
            .await;
        if linked < cluster.article_ids.len() as u64 {
            warn!(target: TARGET_CLUSTER,
                "Only {} of {} articles linked to cluster {}", linked, cluster.article_ids.len(), cluster_id);
        }

        if let Err(e) = self
            .store
            .upsert_cluster_centroid(cluster_id, &cluster.centroid, cluster.record.window_end)
            .await
        {
            warn!(target: TARGET_CLUSTER, "Centroid for cluster {} not indexed: {:#}", cluster_id, e);
        }

        info!(target: TARGET_CLUSTER,
            "Created cluster {} '{}' with {} articles from {} sources (severity {}, confidence {})",
            cluster_id,
            cluster.record.canonical_title,
            cluster.record.article_count,
            cluster.record.source_count,
            cluster.record.severity,
            cluster.record.confidence
        );

        let enriched = self.enrich(cluster_id, members).await;
        Ok((cluster_id, enriched))
    }

    async fn enrich(&self, cluster_id: i64, members: &[&Article]) -> bool {
        let Some(annotator) = self.annotator else {
            return false;
        };

        let cluster = match self.db.get_cluster(cluster_id).await {
            Ok(Some(cluster)) => cluster,
            Ok(None) => return false,
            Err(e) => {
                warn!(target: TARGET_CLUSTER, "Could not reload cluster {} for enrichment: {:#}", cluster_id, e);
                return false;
            }
        };

        let articles: Vec<Article> = members.iter().map(|a| (*a).clone()).collect();
        let Some(analysis) = annotator.enrich(&cluster, &articles).await else {
            warn!(target: TARGET_CLUSTER, "Enrichment unavailable for cluster {}, keeping provisional fields", cluster_id);
            return false;
        };

        match self.db.apply_enrichment(cluster_id, &analysis).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: TARGET_CLUSTER, "{:#}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(id: i64, published_at: Option<&str>, source: Option<&str>, countries: &[&str]) -> Article {
        Article {
            id,
            title: format!("title {}", id),
            snippet: None,
            full_content: None,
            url: None,
            countries: countries.iter().map(|c| c.to_string()).collect(),
            topics: vec!["conflict".to_string()],
            published_at: published_at.map(str::to_string),
            source_id: source.map(str::to_string),
            created_at: "2025-01-01T00:00:00Z".to_string(),
            cluster_id: None,
        }
    }

    #[test]
    fn test_scores_follow_formulas() {
        assert_eq!(severity_score(3, 2), 70);
        assert_eq!(confidence_score(3, 2), 76);
        assert_eq!(severity_score(2, 1), 55);
        assert_eq!(confidence_score(2, 1), 62);
        assert_eq!(severity_score(8, 5), 100);
        assert_eq!(confidence_score(6, 2), 100);
    }

    #[test]
    fn test_materialize_aggregates_members() {
        let a = article(1, Some("2025-02-01T10:00:00Z"), Some("reuters"), &["Ukraine", "Russia"]);
        let b = article(2, Some("2025-02-03T08:30:00Z"), Some("ap"), &["Russia"]);
        let c = article(3, Some("2025-02-02T00:00:00Z"), Some("reuters"), &["Poland"]);
        let embeddings: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let refs: Vec<&[f32]> = embeddings.iter().map(|e| e.as_slice()).collect();

        let now = Utc::now();
        let cluster = materialize(&[&a, &b, &c], &refs, now).unwrap();
        let record = &cluster.record;

        assert_eq!(record.canonical_title, "title 1");
        assert_eq!(record.article_count, 3);
        assert_eq!(record.source_count, 2);
        assert_eq!(record.severity, 70);
        assert_eq!(record.confidence, 76);
        assert_eq!(record.summary, "Event covered by 3 articles from 2 sources");
        assert_eq!(record.countries, vec!["Ukraine", "Russia", "Poland"]);
        assert_eq!(record.topics, vec!["conflict"]);
        assert_eq!(record.window_start, Utc.with_ymd_and_hms(2025, 2, 1, 10, 0, 0).unwrap());
        assert_eq!(record.window_end, Utc.with_ymd_and_hms(2025, 2, 3, 8, 30, 0).unwrap());
        assert_eq!(cluster.article_ids, vec![1, 2, 3]);

        let norm: f32 = cluster.centroid.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((cluster.centroid[0] - cluster.centroid[1]).abs() < 1e-6);
    }

    #[test]
    fn test_window_falls_back_to_now_without_timestamps() {
        let a = article(1, None, None, &[]);
        let b = article(2, Some("garbage"), None, &[]);
        let embeddings = [vec![1.0, 0.0], vec![1.0, 0.0]];
        let refs: Vec<&[f32]> = embeddings.iter().map(|e| e.as_slice()).collect();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        let cluster = materialize(&[&a, &b], &refs, now).unwrap();
        assert_eq!(cluster.record.window_start, now);
        assert_eq!(cluster.record.window_end, now);
        assert_eq!(cluster.record.source_count, 0);
        assert_eq!(cluster.record.severity, 50);
        assert_eq!(cluster.record.confidence, 56);
    }

    #[test]
    fn test_tags_are_capped() {
        let countries: Vec<String> = (0..8).map(|i| format!("country {}", i)).collect();
        let more: Vec<String> = (5..14).map(|i| format!("country {}", i)).collect();
        let mut a = article(1, None, None, &[]);
        a.countries = countries;
        let mut b = article(2, None, None, &[]);
        b.countries = more;
        let embeddings = [vec![1.0], vec![1.0]];
        let refs: Vec<&[f32]> = embeddings.iter().map(|e| e.as_slice()).collect();

        let cluster = materialize(&[&a, &b], &refs, Utc::now()).unwrap();
        assert_eq!(cluster.record.countries.len(), MAX_CLUSTER_TAGS);
        assert_eq!(cluster.record.countries[9], "country 9");
    }

    #[test]
    fn test_rejects_mismatched_input() {
        let a = article(1, None, None, &[]);
        assert!(materialize(&[&a], &[], Utc::now()).is_err());
        assert!(materialize(&[], &[], Utc::now()).is_err());
    }
}
