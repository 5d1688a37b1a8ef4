use anyhow::{anyhow, Result};
use async_openai::{config::OpenAIConfig, Client as OpenAIClient};
use ollama_rs::Ollama;
use reqwest::Url;
use tracing::{info, warn};

use crate::clustering::hdbscan::DensityParams;
use crate::environment::{get_env_bool, get_env_opt, get_env_parsed};
use crate::LLMClient;

pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.75;
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.92;
pub const DEFAULT_RECENCY_DAYS: i64 = 7;
pub const DEFAULT_NEAREST_CLUSTER_LIMIT: u64 = 5;

/// Maximum number of ids sent in one bulk write
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 50;

/// Which backend, if any, enriches newly created clusters
#[derive(Debug, Clone, PartialEq)]
pub enum LlmBackend {
    Ollama { host: String, port: u16 },
    OpenAI { api_key: String },
    Disabled,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub backend: LlmBackend,
    pub model: String,
    pub temperature: f32,
}

impl LlmSettings {
    /// Builds the client for the configured backend, `None` when enrichment is disabled
    pub fn client(&self) -> Option<LLMClient> {
        match &self.backend {
            LlmBackend::Ollama { host, port } => match ollama_url(host, *port) {
                Ok(url) => Some(LLMClient::Ollama(Ollama::from_url(url))),
                Err(e) => {
                    warn!("Invalid Ollama host {:?}, cluster enrichment disabled: {}", host, e);
                    None
                }
            },
            LlmBackend::OpenAI { api_key } => {
                let config = OpenAIConfig::new().with_api_key(api_key);
                Some(LLMClient::OpenAI(OpenAIClient::with_config(config)))
            }
            LlmBackend::Disabled => None,
        }
    }
}

/// Base URL for an Ollama server; a bare host name is treated as plain http
pub fn ollama_url(host: &str, port: u16) -> Result<Url> {
    let host = host.trim().trim_end_matches('/');
    let mut url = if host.contains("://") {
        Url::parse(host)?
    } else {
        Url::parse(&format!("http://{}", host))?
    };
    url.set_port(Some(port))
        .map_err(|_| anyhow!("{} cannot carry a port", host))?;
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub qdrant_url: Option<String>,
    pub embedding_model: String,
    pub embedding_model_dir: String,
    pub embedding_dim: usize,
    pub density: DensityParams,
    pub similarity_threshold: f32,
    pub dedup_threshold: f32,
    pub recency_days: i64,
    pub nearest_cluster_limit: u64,
    pub write_batch_size: usize,
    pub llm: LlmSettings,
    pub interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "clusterdesk.db".to_string(),
            qdrant_url: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_model_dir: "models".to_string(),
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            density: DensityParams::default(),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            dedup_threshold: DEFAULT_DEDUP_THRESHOLD,
            recency_days: DEFAULT_RECENCY_DAYS,
            nearest_cluster_limit: DEFAULT_NEAREST_CLUSTER_LIMIT,
            write_batch_size: DEFAULT_WRITE_BATCH_SIZE,
            llm: LlmSettings {
                backend: LlmBackend::Disabled,
                model: String::new(),
                temperature: 0.3,
            },
            interval_secs: 900,
        }
    }
}

impl AppConfig {
    /// Loads the configuration from environment variables, using defaults for anything unset
    pub fn from_env() -> Self {
        let defaults = AppConfig::default();

        let density = DensityParams {
            min_cluster_size: get_env_parsed("MIN_CLUSTER_SIZE", defaults.density.min_cluster_size),
            min_samples: get_env_parsed("MIN_SAMPLES", defaults.density.min_samples),
            cluster_selection_epsilon: get_env_parsed(
                "CLUSTER_SELECTION_EPSILON",
                defaults.density.cluster_selection_epsilon,
            ),
            allow_single_cluster: get_env_bool(
                "ALLOW_SINGLE_CLUSTER",
                defaults.density.allow_single_cluster,
            ),
        };

        let temperature = get_env_parsed("LLM_TEMPERATURE", defaults.llm.temperature);
        let llm_type = get_env_opt("LLM_TYPE").unwrap_or_else(|| "ollama".to_string());
        let llm = match llm_type.to_lowercase().as_str() {
            "openai" => match get_env_opt("OPENAI_API_KEY") {
                Some(api_key) => LlmSettings {
                    backend: LlmBackend::OpenAI { api_key },
                    model: get_env_opt("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                    temperature,
                },
                None => {
                    warn!("OPENAI_API_KEY not set - cluster enrichment will be unavailable");
                    LlmSettings {
                        backend: LlmBackend::Disabled,
                        model: String::new(),
                        temperature,
                    }
                }
            },
            "none" | "disabled" => LlmSettings {
                backend: LlmBackend::Disabled,
                model: String::new(),
                temperature,
            },
            _ => LlmSettings {
                backend: LlmBackend::Ollama {
                    host: get_env_opt("OLLAMA_HOST")
                        .unwrap_or_else(|| "http://localhost".to_string()),
                    port: get_env_parsed("OLLAMA_PORT", 11434u16),
                },
                model: get_env_opt("OLLAMA_MODEL").unwrap_or_else(|| "llama3.1".to_string()),
                temperature,
            },
        };

        Self {
            database_path: get_env_opt("DATABASE_PATH").unwrap_or(defaults.database_path),
            qdrant_url: get_env_opt("QDRANT_URL"),
            embedding_model: get_env_opt("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            embedding_model_dir: get_env_opt("EMBEDDING_MODEL_DIR")
                .unwrap_or(defaults.embedding_model_dir),
            embedding_dim: get_env_parsed("EMBEDDING_DIM", defaults.embedding_dim),
            density,
            similarity_threshold: get_env_parsed(
                "SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            ),
            dedup_threshold: get_env_parsed("DEDUP_THRESHOLD", defaults.dedup_threshold),
            recency_days: get_env_parsed("CLUSTER_RECENCY_DAYS", defaults.recency_days),
            nearest_cluster_limit: get_env_parsed(
                "NEAREST_CLUSTER_LIMIT",
                defaults.nearest_cluster_limit,
            ),
            write_batch_size: get_env_parsed("WRITE_BATCH_SIZE", defaults.write_batch_size),
            llm,
            interval_secs: get_env_parsed("CLUSTER_INTERVAL_SECS", defaults.interval_secs),
        }
    }

    /// Rejects values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.density.validate()?;

        for (name, value) in [
            ("SIMILARITY_THRESHOLD", self.similarity_threshold),
            ("DEDUP_THRESHOLD", self.dedup_threshold),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [-1, 1], got {}", name, value));
            }
        }
        if self.embedding_dim == 0 {
            return Err(anyhow!("EMBEDDING_DIM must be positive"));
        }
        if self.write_batch_size == 0 {
            return Err(anyhow!("WRITE_BATCH_SIZE must be positive"));
        }
        if self.recency_days < 0 {
            return Err(anyhow!("CLUSTER_RECENCY_DAYS must not be negative"));
        }
        if self.nearest_cluster_limit == 0 {
            return Err(anyhow!("NEAREST_CLUSTER_LIMIT must be positive"));
        }
        Ok(())
    }

    /// Logs the effective settings without secrets
    pub fn log_summary(&self) {
        info!(
            "Config: database={}, qdrant={}, model={} ({} dims), min_cluster_size={}, min_samples={}, similarity={:.2}, dedup={:.2}, recency={}d",
            self.database_path,
            self.qdrant_url.as_deref().unwrap_or("disabled"),
            self.embedding_model,
            self.embedding_dim,
            self.density.min_cluster_size,
            self.density.min_samples,
            self.similarity_threshold,
            self.dedup_threshold,
            self.recency_days
        );
        match &self.llm.backend {
            LlmBackend::Ollama { host, port } => {
                info!("Enrichment: Ollama at {}:{} using {}", host, port, self.llm.model)
            }
            LlmBackend::OpenAI { .. } => info!("Enrichment: OpenAI using {}", self.llm.model),
            LlmBackend::Disabled => info!("Enrichment: disabled"),
        }
    }
}
