use std::io;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::filter::FilterFn;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_STDOUT_FILTER: &str =
    "info,clustering=info,vector=info,llm_request=info,db_query=warn,sqlx=off";

pub fn configure_logging(log_name: &str) {
    // Candle and tokenizers are noisy at debug; keep them out of stdout entirely
    let custom_filter = FilterFn::new(|metadata| {
        !(metadata.level() > &Level::INFO
            && (metadata.target().starts_with("candle") || metadata.target().starts_with("tokenizers")))
    });

    // RUST_LOG wins over the built-in defaults
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDOUT_FILTER));

    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_filter(stdout_filter)
        .with_filter(custom_filter);

    let file_appender = rolling::daily("logs", format!("{}.log", log_name));
    let file_log = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_filter(EnvFilter::new(
            "info,clustering=debug,vector=debug,llm_request=debug,sqlx=warn",
        ));

    // A second init (e.g. a binary calling this twice) is not fatal
    let _ = tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .try_init();
}
