// Embeddings, similarity and the vector index
pub const TARGET_VECTOR: &str = "vector";

pub mod config;
pub mod embedding;
pub mod memory;
pub mod similarity;
pub mod storage;
pub mod text;
pub mod types;

// Re-export main components
pub use config::EmbeddingConfig;
pub use embedding::{BertEmbedder, EmbeddingProvider};
pub use memory::{DisabledVectorStore, MemoryVectorStore};
pub use similarity::*;
pub use storage::{QdrantVectorStore, VectorStore};
pub use text::{article_text, prepare_article_text};
pub use types::ClusterMatch;
