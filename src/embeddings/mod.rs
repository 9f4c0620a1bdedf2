// Embeddings module
// Note chunking, embedding model backends and the isolated embedding engine

pub mod chunking;
pub mod engine;
pub mod model;
pub mod ollama;

pub use chunking::{ChunkingConfig, chunk_note, estimate_token_count};
pub use engine::{EmbeddedNote, EmbeddingEngine, EngineInfo};
pub use model::{EmbeddingModel, HashingModel, load_model};
pub use ollama::OllamaEmbedder;
