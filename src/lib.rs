pub mod config;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod models;
pub mod preprocess;
pub mod search;
pub mod store;
pub mod system;

pub use error::{ ImageSearchError, Result };
pub use extractor::{ ClipExtractor, ExtractorConfig, FeatureExtractor };
pub use indexer::Indexer;
pub use models::{ ImageRecord, IndexReport, QueryResult, SearchHit };
pub use search::QueryEngine;
pub use store::{ Distance, SurrealStore, VectorStore };
pub use system::ImageSearchSystem;
