use std::collections::BTreeMap;

use serde::{ Deserialize, Serialize };

/// Metadata key holding the source path of an indexed image.
pub const PATH_KEY: &str = "path";
pub const MIME_TYPE_KEY: &str = "mime_type";
pub const INDEXED_AT_KEY: &str = "indexed_at";

/// One indexed image. Written once, never updated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImageRecord {
    /// Dedup key, the file name inside the indexed directory.
    pub image_id: String,
    pub path: String,
    pub embedding: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
}

impl ImageRecord {
    pub fn new(image_id: impl Into<String>, path: impl Into<String>, embedding: Vec<f32>) -> Self {
        let path = path.into();
        let mut metadata = BTreeMap::new();
        metadata.insert(PATH_KEY.to_string(), path.clone());
        Self {
            image_id: image_id.into(),
            path,
            embedding,
            metadata,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchHit {
    pub image_id: String,
    pub metadata: BTreeMap<String, String>,
    /// Smaller is more similar.
    pub distance: f32,
}

impl SearchHit {
    pub fn path(&self) -> Option<&str> {
        self.metadata.get(PATH_KEY).map(String::as_str)
    }
}

/// Hits sorted by ascending distance.
pub type QueryResult = Vec<SearchHit>;

/// Counts reported by one indexing run.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub total: usize,
    pub newly_indexed: usize,
    pub skipped: usize,
    pub failed: Vec<FailedImage>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FailedImage {
    pub image_id: String,
    pub reason: String,
}

/// What happened to a single file during an indexing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Indexed,
    Skipped,
    Failed(String),
}

/// Passed to the progress callback after every file.
#[derive(Debug, Clone)]
pub struct IndexProgress<'a> {
    pub processed: usize,
    pub total: usize,
    pub image_id: &'a str,
    pub outcome: &'a ItemOutcome,
}

impl<'a> IndexProgress<'a> {
    pub fn fraction(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed as f32 / self.total as f32
    }
}
