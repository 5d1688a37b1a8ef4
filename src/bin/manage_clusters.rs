use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use colored::Colorize;
use prettytable::{Cell, Row as PrettyRow, Table};
use std::collections::HashMap;
use std::path::PathBuf;

use clusterdesk::clustering::ClusterPipeline;
use clusterdesk::config::AppConfig;
use clusterdesk::db::{parse_timestamp, Cluster, Database, NewArticle};
use clusterdesk::logging::configure_logging;
use clusterdesk::vector::text::truncate_chars;

#[derive(Parser)]
#[clap(name = "cluster-manager", about = "Manage article clusters")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster unclustered articles, matching against existing clusters first
    Run {
        #[clap(long, default_value = "7")]
        days: i64,

        #[clap(long, default_value = "500")]
        limit: i64,
    },

    /// Cluster from scratch without matching against existing clusters
    Recluster {
        #[clap(long, default_value = "7")]
        days: i64,

        #[clap(long, default_value = "500")]
        limit: i64,

        /// Delete every cluster before reclustering
        #[clap(long)]
        reset: bool,
    },

    /// List near-duplicate pairs among unclustered articles
    Duplicates {
        #[clap(long, default_value = "7")]
        days: i64,

        #[clap(long, default_value = "500")]
        limit: i64,
    },

    /// Find the closest existing cluster for an ad-hoc article
    FindCluster {
        #[clap(required = true)]
        title: String,

        #[clap(short, long)]
        snippet: Option<String>,

        /// Country tag, repeatable
        #[clap(short, long)]
        country: Vec<String>,

        /// Topic tag, repeatable
        #[clap(short, long)]
        topic: Vec<String>,
    },

    /// Compare two texts
    Similarity {
        #[clap(required = true)]
        text1: String,

        #[clap(required = true)]
        text2: String,
    },

    /// Unlink all articles and delete all clusters
    Reset {
        /// Required, nothing happens without it
        #[clap(long)]
        confirm: bool,

        /// Also delete stored article embeddings
        #[clap(long)]
        clear_embeddings: bool,
    },

    /// List recent clusters
    List {
        /// Only clusters whose window ended within this many days
        #[clap(long, default_value = "7")]
        days: i64,

        /// Number of clusters to show
        #[clap(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show details about a specific cluster
    Show {
        /// Cluster ID
        #[clap(required = true)]
        id: i64,

        /// Show articles in this cluster
        #[clap(short, long)]
        articles: bool,
    },

    /// Import articles from a JSON array file
    Import {
        #[clap(required = true)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging("manage_clusters");
    let args = Cli::parse();
    let config = AppConfig::from_env();

    // Read-only and import commands do not need the embedding model
    match args.command {
        Commands::List { days, limit } => {
            let db = open_db(&config).await?;
            return list_clusters(&db, days, limit).await;
        }
        Commands::Show { id, articles } => {
            let db = open_db(&config).await?;
            return show_cluster(&db, id, articles).await;
        }
        Commands::Import { file } => {
            let db = open_db(&config).await?;
            return import_articles(&db, &file).await;
        }
        command => {
            let pipeline = ClusterPipeline::from_config(config).await?;
            run_pipeline_command(&pipeline, command).await
        }
    }
}

async fn open_db(config: &AppConfig) -> Result<Database> {
    Database::new(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database {}", config.database_path))
}

async fn run_pipeline_command(pipeline: &ClusterPipeline, command: Commands) -> Result<()> {
    match command {
        Commands::Run { days, limit } => {
            let summary = pipeline.run(days, limit).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Recluster { days, limit, reset } => {
            let summary = pipeline.recluster(days, limit, reset).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Duplicates { days, limit } => {
            let pairs = pipeline.duplicate_report(days, limit).await?;
            if pairs.is_empty() {
                println!("{}", "No near-duplicates found".green());
                return Ok(());
            }

            let mut ids: Vec<i64> = pairs.iter().flat_map(|p| [p.id1, p.id2]).collect();
            ids.sort_unstable();
            ids.dedup();
            let titles: HashMap<i64, String> = pipeline
                .db()
                .get_articles_by_ids(&ids)
                .await?
                .into_iter()
                .map(|a| (a.id, a.title))
                .collect();
            let title_of = |id: i64| {
                titles
                    .get(&id)
                    .map(|t| truncate_chars(t, 50).to_string())
                    .unwrap_or_default()
            };

            let mut table = Table::new();
            table.add_row(PrettyRow::new(vec![
                Cell::new("Article"),
                Cell::new("Title"),
                Cell::new("Duplicate"),
                Cell::new("Title"),
                Cell::new("Similarity"),
            ]));
            for pair in &pairs {
                table.add_row(PrettyRow::new(vec![
                    Cell::new(&pair.id1.to_string()),
                    Cell::new(&title_of(pair.id1)),
                    Cell::new(&pair.id2.to_string()),
                    Cell::new(&title_of(pair.id2)),
                    Cell::new(&format!("{:.4}", pair.similarity)),
                ]));
            }
            table.printstd();
            println!("{} pairs", pairs.len());
        }
        Commands::FindCluster {
            title,
            snippet,
            country,
            topic,
        } => {
            let article = NewArticle {
                title,
                snippet,
                countries: country,
                topics: topic,
                ..Default::default()
            };
            match pipeline.find_cluster(&article).await? {
                Some(lookup) => {
                    println!(
                        "{} cluster #{} ({:.4})",
                        "Best match:".green(),
                        lookup.best.cluster_id,
                        lookup.best.similarity
                    );
                    for alternative in &lookup.alternatives {
                        println!(
                            "  also #{} ({:.4})",
                            alternative.cluster_id, alternative.similarity
                        );
                    }
                }
                None => println!("{}", "No cluster above the similarity threshold".yellow()),
            }
        }
        Commands::Similarity { text1, text2 } => {
            let result = pipeline.similarity(&text1, &text2)?;
            let verdict = if result.is_similar {
                "similar".green()
            } else {
                "not similar".red()
            };
            println!("{:.4} ({})", result.similarity, verdict);
        }
        Commands::Reset {
            confirm,
            clear_embeddings,
        } => {
            if !confirm {
                println!("{}", "Refusing to reset without --confirm".red());
                return Ok(());
            }
            let summary = pipeline.reset(true, clear_embeddings).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::List { .. } | Commands::Show { .. } | Commands::Import { .. } => {}
    }
    Ok(())
}

fn local_time(value: &str) -> String {
    parse_timestamp(value)
        .map(|dt| dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| value.to_string())
}

fn severity_cell(severity: i64) -> String {
    let text = severity.to_string();
    match severity {
        s if s >= 80 => text.red().to_string(),
        s if s >= 60 => text.yellow().to_string(),
        _ => text,
    }
}

/// Lists clusters in a formatted table
async fn list_clusters(db: &Database, days: i64, limit: i64) -> Result<()> {
    let clusters = db.list_clusters(days, limit).await?;

    let mut table = Table::new();
    table.add_row(PrettyRow::new(vec![
        Cell::new("ID"),
        Cell::new("Window end"),
        Cell::new("Articles"),
        Cell::new("Sources"),
        Cell::new("Severity"),
        Cell::new("Confidence"),
        Cell::new("Enriched"),
        Cell::new("Title"),
    ]));

    for cluster in &clusters {
        table.add_row(PrettyRow::new(vec![
            Cell::new(&cluster.id.to_string()),
            Cell::new(&local_time(&cluster.window_end)),
            Cell::new(&cluster.article_count.to_string()),
            Cell::new(&cluster.source_count.to_string()),
            Cell::new(&severity_cell(cluster.severity)),
            Cell::new(&cluster.confidence.to_string()),
            Cell::new(if cluster.enriched { "yes" } else { "no" }),
            Cell::new(truncate_chars(&cluster.canonical_title, 80)),
        ]));
    }

    table.printstd();
    Ok(())
}

fn print_cluster(cluster: &Cluster) {
    println!("=== CLUSTER #{} ===", cluster.id);
    println!("Title: {}", cluster.canonical_title.bold());
    println!(
        "Window: {} to {}",
        local_time(&cluster.window_start),
        local_time(&cluster.window_end)
    );
    println!(
        "Articles: {} from {} sources",
        cluster.article_count, cluster.source_count
    );
    println!("Severity: {}", severity_cell(cluster.severity));
    println!("Confidence: {}", cluster.confidence);
    println!("Countries: {}", cluster.countries.join(", "));
    println!("Topics: {}", cluster.topics.join(", "));
    println!(
        "Enriched: {}",
        if cluster.enriched {
            "yes".green()
        } else {
            "no".yellow()
        }
    );

    let entities = &cluster.entities;
    for (label, values) in [
        ("People", &entities.people),
        ("Organizations", &entities.organizations),
        ("Locations", &entities.locations),
        ("Events", &entities.events),
    ] {
        if !values.is_empty() {
            println!("{}: {}", label, values.join(", "));
        }
    }

    println!("\n=== SUMMARY ===");
    println!("{}", cluster.summary);

    if let Some(analysis) = &cluster.analysis {
        if !analysis.key_signals.is_empty() {
            println!("\n=== KEY SIGNALS ===");
            for signal in &analysis.key_signals {
                println!(" - {}", signal);
            }
        }
        if let Some(market) = &analysis.market_impact {
            println!("\n=== MARKET IMPACT ===");
            println!(
                "Risk: {} ({})",
                market.risk_level.as_deref().unwrap_or("unknown"),
                market.timeframe.as_deref().unwrap_or("unspecified")
            );
            println!("Sectors: {}", market.affected_sectors.join(", "));
        }
    }
}

/// Shows detailed information about a specific cluster
async fn show_cluster(db: &Database, cluster_id: i64, show_articles: bool) -> Result<()> {
    let Some(cluster) = db.get_cluster(cluster_id).await? else {
        println!("{} Cluster {} not found", "❌".red(), cluster_id);
        return Ok(());
    };

    print_cluster(&cluster);

    if show_articles {
        let articles = db.get_cluster_articles(cluster_id).await?;
        println!("\n=== ARTICLES ({}) ===", articles.len());
        let mut table = Table::new();
        table.add_row(PrettyRow::new(vec![
            Cell::new("ID"),
            Cell::new("Published"),
            Cell::new("Source"),
            Cell::new("Title"),
        ]));
        for article in &articles {
            table.add_row(PrettyRow::new(vec![
                Cell::new(&article.id.to_string()),
                Cell::new(&article.published_at.as_deref().map(local_time).unwrap_or_default()),
                Cell::new(article.source_id.as_deref().unwrap_or("")),
                Cell::new(truncate_chars(&article.title, 80)),
            ]));
        }
        table.printstd();
    }

    Ok(())
}

/// Loads a JSON array of articles and stores them unclustered
async fn import_articles(db: &Database, file: &PathBuf) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let articles: Vec<NewArticle> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of articles", file.display()))?;

    let mut imported = 0;
    for article in &articles {
        match db.add_article(article).await {
            Ok(_) => imported += 1,
            Err(e) => println!("{} '{}': {}", "Skipped".yellow(), article.title, e),
        }
    }

    println!("Imported {} of {} articles", imported, articles.len());
    Ok(())
}
