use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use tokenizers::Tokenizer;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::vector::{config::EmbeddingConfig, similarity::magnitude, TARGET_VECTOR};

/// Turns text into unit-normalized vectors of a fixed dimension.
///
/// Implementations are constructed by the binary that owns them and passed to the
/// pipeline explicitly; nothing here is a process-wide singleton.
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Encodes a batch of texts, one vector per text, in input order
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn encode_single(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow!("Embedding provider returned no vector"))
    }
}

/// Sentence embedder backed by a BERT model running on candle.
///
/// Mean pooling over the attention mask followed by L2 normalization, which is
/// what sentence-transformers checkpoints expect.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    config: EmbeddingConfig,
}

impl BertEmbedder {
    /// Downloads the model files if needed and loads them
    pub async fn load(config: EmbeddingConfig) -> Result<Self> {
        config.ensure_models_exist().await?;
        info!(target: TARGET_VECTOR, "Loading embedding model {}", config.model_repo);

        let raw_config = std::fs::read_to_string(config.bert_config_path())
            .with_context(|| format!("Failed to read {}", config.bert_config_path().display()))?;
        let bert_config: BertConfig =
            serde_json::from_str(&raw_config).context("Invalid BERT config.json")?;

        let tensors = match candle_core::safetensors::load_buffer(
            &std::fs::read(config.weights_path())?,
            &config.device,
        ) {
            Ok(t) => t,
            Err(e) => {
                error!(target: TARGET_VECTOR, "!!! Failed to load model tensors: {}", e);
                return Err(anyhow!("Failed to load model tensors: {}", e));
            }
        };
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &config.device);

        let model = BertModel::load(vb, &bert_config).map_err(|e| {
            error!(target: TARGET_VECTOR, "!!! Failed to load BERT model: {}", e);
            anyhow!("Failed to load BERT model: {}", e)
        })?;

        let tokenizer = Tokenizer::from_file(config.tokenizer_path()).map_err(|e| {
            error!(target: TARGET_VECTOR, "!!! Failed to load tokenizer: {}", e);
            anyhow!("Failed to load tokenizer: {}", e)
        })?;

        if bert_config.hidden_size != config.dimensions {
            return Err(anyhow!(
                "Model {} produces {} dimensions but EMBEDDING_DIM is {}",
                config.model_repo,
                bert_config.hidden_size,
                config.dimensions
            ));
        }

        info!(target: TARGET_VECTOR, "Embedding model loaded. Dimension: {}", config.dimensions);
        Ok(Self {
            model,
            tokenizer,
            config,
        })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let start_time = Instant::now();
        let device = &self.config.device;

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let max_len = self.config.max_length;
        let input_ids: Vec<u32> = encoding.get_ids().iter().take(max_len).copied().collect();
        let attention_mask: Vec<u32> = encoding
            .get_attention_mask()
            .iter()
            .take(max_len)
            .copied()
            .collect();
        let token_count = input_ids.len();

        let input_ids = Tensor::new(input_ids, device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(attention_mask, device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden_state = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Mean pooling over real tokens only
        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = hidden_state.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1.0, f32::MAX)?;
        let mean_pooled = summed.broadcast_div(&counts)?;

        let norm = mean_pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = mean_pooled.broadcast_div(&norm)?;
        let vector = normalized.squeeze(0)?.to_vec1::<f32>()?;

        debug!(target: TARGET_VECTOR,
            "Embedded {} tokens in {:?}; dimensions: {}; magnitude: {:.6}; text length: {} chars",
            token_count,
            start_time.elapsed(),
            vector.len(),
            magnitude(&vector),
            text.len()
        );

        Ok(vector)
    }
}

impl EmbeddingProvider for BertEmbedder {
    fn dimension(&self) -> usize {
        self.config.dimensions
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start_time = Instant::now();
        let vectors = texts
            .iter()
            .enumerate()
            .map(|(idx, text)| {
                self.embed_one(text)
                    .with_context(|| format!("Failed to embed text #{}", idx))
            })
            .collect::<Result<Vec<_>>>()?;

        if !texts.is_empty() {
            info!(target: TARGET_VECTOR, "Encoded {} texts in {:?}", texts.len(), start_time.elapsed());
        }
        Ok(vectors)
    }
}
