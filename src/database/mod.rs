pub mod sqlite;
pub mod vector_store;

pub use sqlite::{Database, DbPool, EmbeddingQueries};
pub use vector_store::{ScoredResult, SearchOptions, SearchScope, VectorStore};
