use anyhow::{Context, Result};
use candle_core::Device;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::vector::TARGET_VECTOR;

const HF_BASE_URL: &str = "https://huggingface.co";
const MODEL_FILES: [&str; 3] = ["model.safetensors", "tokenizer.json", "config.json"];

/// Configuration for the sentence embedding model
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Hugging Face repository, e.g. `sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2`
    pub model_repo: String,
    pub model_dir: PathBuf,
    pub dimensions: usize,
    pub max_length: usize,
    pub device: Device,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_repo: crate::config::DEFAULT_EMBEDDING_MODEL.to_string(),
            model_dir: PathBuf::from("models"),
            dimensions: crate::config::DEFAULT_EMBEDDING_DIM,
            max_length: 128,
            device: Device::Cpu,
        }
    }
}

impl EmbeddingConfig {
    pub fn from_app_config(config: &crate::config::AppConfig) -> Self {
        Self {
            model_repo: config.embedding_model.clone(),
            model_dir: PathBuf::from(&config.embedding_model_dir),
            dimensions: config.embedding_dim,
            ..Default::default()
        }
    }

    /// Local directory holding this model's files
    pub fn local_dir(&self) -> PathBuf {
        self.model_dir.join(self.model_repo.replace('/', "--"))
    }

    pub fn weights_path(&self) -> PathBuf {
        self.local_dir().join("model.safetensors")
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.local_dir().join("tokenizer.json")
    }

    pub fn bert_config_path(&self) -> PathBuf {
        self.local_dir().join("config.json")
    }

    fn file_url(&self, file: &str) -> String {
        format!("{}/{}/resolve/main/{}", HF_BASE_URL, self.model_repo, file)
    }

    /// Downloads any missing model file into the local cache
    pub async fn ensure_models_exist(&self) -> Result<()> {
        let dir = self.local_dir();
        if !Path::new(&dir).exists() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create model directory {}", dir.display()))?;
        }

        for file in MODEL_FILES {
            let path = dir.join(file);
            if path.exists() {
                continue;
            }
            let url = self.file_url(file);
            info!(target: TARGET_VECTOR, "Downloading {} from {}", file, url);
            let response = reqwest::get(&url)
                .await
                .and_then(|r| r.error_for_status())
                .with_context(|| format!("Failed to download {}", url))?;
            let bytes = response.bytes().await?;
            fs::write(&path, bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(target: TARGET_VECTOR, "Downloaded {} to {}", file, path.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_scoped_by_repo() {
        let config = EmbeddingConfig::default();
        let dir = config.local_dir();
        assert!(dir.ends_with("sentence-transformers--paraphrase-multilingual-MiniLM-L12-v2"));
        assert_eq!(config.weights_path(), dir.join("model.safetensors"));
        assert_eq!(
            config.file_url("tokenizer.json"),
            "https://huggingface.co/sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2/resolve/main/tokenizer.json"
        );
    }
}
