use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use clusterdesk::clustering::ClusterPipeline;
use clusterdesk::config::AppConfig;
use clusterdesk::logging::configure_logging;
use clusterdesk::TARGET_CLUSTER;

/// Periodically clusters newly ingested articles until interrupted
#[derive(Parser)]
#[clap(name = "clusterdesk", about = "Incremental news clustering daemon")]
struct Cli {
    /// Only consider articles created within this many days
    #[clap(long, default_value = "7")]
    days: i64,

    /// Maximum articles per run
    #[clap(long, default_value = "500")]
    limit: i64,

    /// Seconds between runs, overrides CLUSTER_INTERVAL_SECS
    #[clap(long)]
    interval: Option<u64>,

    /// Run once and exit
    #[clap(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging("clusterdesk");
    let args = Cli::parse();

    let config = AppConfig::from_env();
    config.log_summary();
    let interval = Duration::from_secs(args.interval.unwrap_or(config.interval_secs).max(1));

    let pipeline = ClusterPipeline::from_config(config).await?;

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_err() {
            error!("Failed to listen for ctrl-c");
        }
        let _ = cancel_tx.send(true);
    });

    loop {
        match pipeline.run(args.days, args.limit).await {
            Ok(summary) => info!(target: TARGET_CLUSTER,
                "Run complete: {} new clusters, {} assigned, {} duplicates",
                summary.created, summary.assigned, summary.duplicates),
            // Safe to retry: only unclustered articles are fetched next time
            Err(e) => error!(target: TARGET_CLUSTER, "Clustering run failed: {:#}", e),
        }

        if args.once {
            break;
        }

        tokio::select! {
            _ = sleep(interval) => {}
            _ = cancel_rx.changed() => {
                info!("Shutdown requested, exiting");
                break;
            }
        }
    }

    Ok(())
}
