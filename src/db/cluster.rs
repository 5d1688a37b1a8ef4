use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info, warn};

use super::article::{decode_list, encode_list};
use super::core::{format_timestamp, Database};
use crate::enrichment::{ClusterAnalysis, ClusterEntities};
use crate::TARGET_DB;

/// A stored event cluster
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: i64,
    pub canonical_title: String,
    pub summary: String,
    pub countries: Vec<String>,
    pub topics: Vec<String>,
    pub entities: ClusterEntities,
    pub analysis: Option<ClusterAnalysis>,
    /// Member count at creation; later incremental assignments do not update it
    pub article_count: i64,
    pub source_count: i64,
    pub window_start: String,
    pub window_end: String,
    pub severity: i64,
    pub confidence: i64,
    pub enriched: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Provisional cluster fields computed at materialization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCluster {
    pub canonical_title: String,
    pub summary: String,
    pub countries: Vec<String>,
    pub topics: Vec<String>,
    pub article_count: i64,
    pub source_count: i64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub severity: i64,
    pub confidence: i64,
}

const CLUSTER_COLUMNS: &str = "id, canonical_title, summary, countries, topics, entities, analysis, \
     article_count, source_count, window_start, window_end, severity, confidence, enriched, \
     created_at, updated_at";

fn cluster_from_row(row: &SqliteRow) -> Cluster {
    let entities: Option<String> = row.get("entities");
    let analysis: Option<String> = row.get("analysis");
    Cluster {
        id: row.get("id"),
        canonical_title: row.get("canonical_title"),
        summary: row.get("summary"),
        countries: decode_list(row.get("countries")),
        topics: decode_list(row.get("topics")),
        entities: entities
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
        analysis: analysis.and_then(|raw| serde_json::from_str(&raw).ok()),
        article_count: row.get("article_count"),
        source_count: row.get("source_count"),
        window_start: row.get("window_start"),
        window_end: row.get("window_end"),
        severity: row.get("severity"),
        confidence: row.get("confidence"),
        enriched: row.get("enriched"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

impl Database {
    /// Inserts a provisional cluster row
    ///
    /// # Returns
    /// * The new cluster id
    pub async fn create_cluster(&self, cluster: &NewCluster) -> Result<i64> {
        let now = format_timestamp(Utc::now());
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO clusters (canonical_title, summary, countries, topics, entities, article_count,
                                  source_count, window_start, window_end, severity, confidence,
                                  enriched, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?6, ?7, ?8, ?9, ?10, FALSE, ?11, ?11)
            RETURNING id
            "#,
        )
        .bind(&cluster.canonical_title)
        .bind(&cluster.summary)
        .bind(encode_list(&cluster.countries))
        .bind(encode_list(&cluster.topics))
        .bind(cluster.article_count)
        .bind(cluster.source_count)
        .bind(format_timestamp(cluster.window_start))
        .bind(format_timestamp(cluster.window_end))
        .bind(cluster.severity)
        .bind(cluster.confidence)
        .bind(&now)
        .fetch_one(self.pool())
        .await
        .with_context(|| format!("Failed to create cluster '{}'", cluster.canonical_title))?;

        debug!(target: TARGET_DB, "Created cluster {} ({} articles)", id, cluster.article_count);
        Ok(id)
    }

    /// Replaces every enrichable field of a cluster in one statement
    pub async fn apply_enrichment(&self, cluster_id: i64, analysis: &ClusterAnalysis) -> Result<()> {
        let entities = serde_json::to_string(&analysis.entities)?;
        let full = serde_json::to_string(analysis)?;

        let result = sqlx::query(
            r#"
            UPDATE clusters
            SET canonical_title = ?, summary = ?, countries = ?, topics = ?, entities = ?,
                analysis = ?, severity = ?, confidence = ?, enriched = TRUE, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&analysis.canonical_title)
        .bind(&analysis.summary)
        .bind(encode_list(&analysis.countries))
        .bind(encode_list(&analysis.topics))
        .bind(&entities)
        .bind(&full)
        .bind(analysis.severity)
        .bind(analysis.confidence)
        .bind(format_timestamp(Utc::now()))
        .bind(cluster_id)
        .execute(self.pool())
        .await
        .with_context(|| format!("Failed to store enrichment for cluster {}", cluster_id))?;

        if result.rows_affected() == 0 {
            warn!(target: TARGET_DB, "Enrichment for unknown cluster {}", cluster_id);
        }
        Ok(())
    }

    pub async fn get_cluster(&self, cluster_id: i64) -> Result<Option<Cluster>> {
        let row = sqlx::query(&format!("SELECT {CLUSTER_COLUMNS} FROM clusters WHERE id = ?"))
            .bind(cluster_id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.as_ref().map(cluster_from_row))
    }

    /// Clusters whose window ended within the last `days`, most recently updated first
    pub async fn list_clusters(&self, days: i64, limit: i64) -> Result<Vec<Cluster>> {
        let cutoff = format_timestamp(Utc::now() - ChronoDuration::days(days));
        let rows = sqlx::query(&format!(
            r#"
            SELECT {CLUSTER_COLUMNS} FROM clusters
            WHERE window_end >= ?
            ORDER BY updated_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(&cutoff)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(cluster_from_row).collect())
    }

    /// Deletes every cluster row in chunks of `batch_size`
    pub async fn delete_all_clusters(&self, batch_size: usize) -> Result<u64> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM clusters ORDER BY id")
            .fetch_all(self.pool())
            .await?;

        let mut deleted = 0;
        for chunk in ids.chunks(batch_size.max(1)) {
            let sql = format!(
                "DELETE FROM clusters WHERE id IN ({})",
                vec!["?"; chunk.len()].join(", ")
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            match query.execute(self.pool()).await {
                Ok(result) => deleted += result.rows_affected(),
                Err(e) => warn!(target: TARGET_DB, "Failed to delete {} clusters: {}", chunk.len(), e),
            }
        }

        info!(target: TARGET_DB, "Deleted {} clusters", deleted);
        Ok(deleted)
    }
}
