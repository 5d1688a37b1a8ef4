use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument, warn};

use super::core::{format_timestamp, Database, DbLockErrorExt};
use crate::TARGET_DB;

/// A stored news article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub snippet: Option<String>,
    pub full_content: Option<String>,
    pub url: Option<String>,
    pub countries: Vec<String>,
    pub topics: Vec<String>,
    pub published_at: Option<String>,
    pub source_id: Option<String>,
    pub created_at: String,
    pub cluster_id: Option<i64>,
}

/// Article fields supplied by whoever ingests articles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewArticle {
    pub title: String,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub full_content: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
}

pub(crate) fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn decode_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn article_from_row(row: &SqliteRow) -> Article {
    Article {
        id: row.get("id"),
        title: row.get("title"),
        snippet: row.get("snippet"),
        full_content: row.get("full_content"),
        url: row.get("url"),
        countries: decode_list(row.get("countries")),
        topics: decode_list(row.get("topics")),
        published_at: row.get("published_at"),
        source_id: row.get("source_id"),
        created_at: row.get("created_at"),
        cluster_id: row.get("cluster_id"),
    }
}

const ARTICLE_COLUMNS: &str = "id, title, snippet, full_content, url, countries, topics, \
     published_at, source_id, created_at, cluster_id";

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Database {
    /// Inserts an article, retrying with backoff while the database is locked
    #[instrument(target = "db", level = "info", skip(self, article), fields(title = %article.title))]
    pub async fn add_article(&self, article: &NewArticle) -> Result<i64, sqlx::Error> {
        let created_at = format_timestamp(Utc::now());
        let countries = encode_list(&article.countries);
        let topics = encode_list(&article.topics);

        let mut backoff = 100; // initial delay in milliseconds
        let max_retries = 5;

        for attempt in 1..=max_retries {
            match sqlx::query_as::<_, (i64,)>(
                r#"
                INSERT INTO articles (title, snippet, full_content, url, countries, topics, published_at, source_id, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                RETURNING id
                "#,
            )
            .bind(&article.title)
            .bind(&article.snippet)
            .bind(&article.full_content)
            .bind(&article.url)
            .bind(&countries)
            .bind(&topics)
            .bind(&article.published_at)
            .bind(&article.source_id)
            .bind(&created_at)
            .fetch_one(self.pool())
            .await
            {
                Ok((id,)) => {
                    debug!(target: TARGET_DB, "Article added with id {}", id);
                    return Ok(id);
                }
                Err(err) if err.is_database_lock_error() => {
                    info!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying attempt {}/{}", backoff, attempt, max_retries);
                    sleep(Duration::from_millis(backoff)).await;
                    // Jitter keeps concurrent writers from retrying in lockstep
                    backoff = backoff.saturating_mul(2) + rand::rng().random_range(0..100);
                }
                Err(err) => {
                    error!(target: TARGET_DB, "Failed to add article: {}", err);
                    return Err(err);
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for adding article".into(),
        ))
    }

    /// Articles without a cluster, created within the last `days`, newest published first
    pub async fn get_unclustered_articles(
        &self,
        days: i64,
        limit: i64,
    ) -> Result<Vec<Article>, sqlx::Error> {
        let cutoff = format_timestamp(Utc::now() - ChronoDuration::days(days));
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS} FROM articles
            WHERE cluster_id IS NULL AND created_at >= ?
            ORDER BY published_at IS NULL, published_at DESC, id ASC
            LIMIT ?
            "#
        ))
        .bind(&cutoff)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;

        debug!(target: TARGET_DB, "Fetched {} unclustered articles since {}", rows.len(), cutoff);
        Ok(rows.iter().map(article_from_row).collect())
    }

    /// Articles with the given ids, in the order the ids were given. Unknown ids are skipped.
    pub async fn get_articles_by_ids(&self, ids: &[i64]) -> Result<Vec<Article>, sqlx::Error> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(self.pool()).await?;

        let mut articles: Vec<Article> = rows.iter().map(article_from_row).collect();
        articles.sort_by_key(|a| ids.iter().position(|id| *id == a.id));
        Ok(articles)
    }

    pub async fn get_cluster_articles(&self, cluster_id: i64) -> Result<Vec<Article>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE cluster_id = ? ORDER BY published_at DESC, id ASC"
        ))
        .bind(cluster_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(article_from_row).collect())
    }

    pub async fn assign_article_to_cluster(
        &self,
        article_id: i64,
        cluster_id: i64,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query("UPDATE articles SET cluster_id = ? WHERE id = ?")
            .bind(cluster_id)
            .bind(article_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            warn!(target: TARGET_DB, "No article with id {} to assign to cluster {}", article_id, cluster_id);
        }
        Ok(())
    }

    /// Links articles to a cluster in chunks of `batch_size`.
    ///
    /// A failing chunk is logged and skipped; earlier chunks stay committed.
    ///
    /// # Returns
    /// * Number of articles actually updated
    pub async fn assign_articles_to_cluster(
        &self,
        article_ids: &[i64],
        cluster_id: i64,
        batch_size: usize,
    ) -> u64 {
        let mut updated = 0;
        for chunk in article_ids.chunks(batch_size.max(1)) {
            let sql = format!(
                "UPDATE articles SET cluster_id = ? WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql).bind(cluster_id);
            for id in chunk {
                query = query.bind(id);
            }
            match query.execute(self.pool()).await {
                Ok(result) => updated += result.rows_affected(),
                Err(e) => {
                    warn!(target: TARGET_DB,
                        "Failed to link articles {:?} to cluster {}: {}", chunk, cluster_id, e);
                }
            }
        }
        updated
    }

    /// Clears the cluster reference of every clustered article, in chunks
    pub async fn unlink_all_articles(&self, batch_size: usize) -> Result<u64, sqlx::Error> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM articles WHERE cluster_id IS NOT NULL ORDER BY id")
                .fetch_all(self.pool())
                .await?;

        let mut unlinked = 0;
        for chunk in ids.chunks(batch_size.max(1)) {
            let sql = format!(
                "UPDATE articles SET cluster_id = NULL WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            match query.execute(self.pool()).await {
                Ok(result) => unlinked += result.rows_affected(),
                Err(e) => warn!(target: TARGET_DB, "Failed to unlink {} articles: {}", chunk.len(), e),
            }
        }

        info!(target: TARGET_DB, "Unlinked {} articles from their clusters", unlinked);
        Ok(unlinked)
    }

    pub async fn count_articles(&self) -> Result<(i64, i64), sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(cluster_id) AS clustered FROM articles",
        )
        .fetch_one(self.pool())
        .await?;
        Ok((row.get("total"), row.get("clustered")))
    }
}
