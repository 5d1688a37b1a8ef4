use anyhow::Result;
use clap::Parser;
use tracing::info;

use clusterdesk::clustering::ClusterPipeline;
use clusterdesk::config::AppConfig;
use clusterdesk::logging::configure_logging;

/// Utility to cluster unclustered articles once.
///
/// This tool:
/// 1. Fetches articles without a cluster from the last DAYS days
/// 2. Drops near-duplicates and attaches the rest to existing clusters where possible
/// 3. Forms new clusters from what is left and prints the run summary as JSON
///
/// Usage:
///    cargo run --bin cluster_articles -- [--days 7] [--limit 500] [--fresh]
#[derive(Parser)]
#[clap(name = "cluster-articles", about = "Run one clustering pass")]
struct Cli {
    #[clap(long, default_value = "7")]
    days: i64,

    #[clap(long, default_value = "500")]
    limit: i64,

    /// Skip matching against existing clusters
    #[clap(long)]
    fresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging("cluster_articles");
    let args = Cli::parse();

    let config = AppConfig::from_env();
    config.log_summary();
    let pipeline = ClusterPipeline::from_config(config).await?;

    info!("Clustering articles from the last {} days (limit {})", args.days, args.limit);
    let summary = if args.fresh {
        pipeline.recluster(args.days, args.limit, false).await?
    } else {
        pipeline.run(args.days, args.limit).await?
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
