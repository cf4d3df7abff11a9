use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::extractor::FeatureExtractor;
use crate::indexer::Indexer;
use crate::models::{ ImageRecord, IndexProgress, IndexReport, QueryResult };
use crate::search::QueryEngine;
use crate::store::{ SurrealStore, VectorStore };

/// One extractor and one store, wired for indexing and search.
pub struct ImageSearchSystem<S: VectorStore = SurrealStore> {
    extractor: Arc<dyn FeatureExtractor>,
    store: S,
}

impl<S: VectorStore> ImageSearchSystem<S> {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, store: S) -> Self {
        Self { extractor, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn index_directory(&self, dir: &Path) -> Result<IndexReport> {
        Indexer::new(self.extractor.as_ref(), &self.store).index_directory(dir).await
    }

    pub async fn index_directory_with_progress<F>(&self, dir: &Path, on_progress: F) -> Result<IndexReport>
        where F: FnMut(&IndexProgress<'_>)
    {
        Indexer::new(self.extractor.as_ref(), &self.store).index_directory_with_progress(dir, on_progress).await
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<QueryResult> {
        QueryEngine::new(self.extractor.as_ref(), &self.store).search(query, k).await
    }

    pub async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>> {
        self.store.get(image_id).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }
}
