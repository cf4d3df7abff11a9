use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageSearchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Embedding error: {0}")]
    Embedding(String),
    #[error("Failed to load model: {0}")]
    ModelLoad(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Invalid collection name: {0:?} (expected [A-Za-z0-9_]+)")]
    InvalidCollection(String),
    #[error("Image id already indexed: {0}")]
    DuplicateId(String),
    #[error("WalkDir error: {0}")]
    WalkDir(#[from] walkdir::Error),
}

pub type Result<T, E = ImageSearchError> = std::result::Result<T, E>;
