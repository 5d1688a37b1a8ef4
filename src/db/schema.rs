use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                snippet TEXT,
                full_content TEXT,
                url TEXT,
                countries TEXT NOT NULL DEFAULT '[]', -- JSON array
                topics TEXT NOT NULL DEFAULT '[]', -- JSON array
                published_at TEXT,
                source_id TEXT,
                created_at TEXT NOT NULL,
                cluster_id INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_articles_cluster_id ON articles (cluster_id);
            CREATE INDEX IF NOT EXISTS idx_articles_created_at ON articles (created_at);
            CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles (published_at);

            CREATE TABLE IF NOT EXISTS clusters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                canonical_title TEXT NOT NULL,
                summary TEXT NOT NULL,
                countries TEXT NOT NULL DEFAULT '[]', -- JSON array
                topics TEXT NOT NULL DEFAULT '[]', -- JSON array
                entities TEXT NOT NULL DEFAULT '{}', -- JSON object
                analysis TEXT, -- full enrichment result, JSON
                article_count INTEGER NOT NULL,
                source_count INTEGER NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                severity INTEGER NOT NULL,
                confidence INTEGER NOT NULL,
                enriched BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_clusters_window_end ON clusters (window_end);
            CREATE INDEX IF NOT EXISTS idx_clusters_updated_at ON clusters (updated_at);
            "#,
        )
        .execute(&mut *conn)
        .await?;
        info!(target: TARGET_DB, "Tables ensured to exist");

        Ok(())
    }
}
