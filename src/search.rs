use log::debug;

use crate::error::{ ImageSearchError, Result };
use crate::extractor::FeatureExtractor;
use crate::models::QueryResult;
use crate::store::VectorStore;

/// Text-to-image retrieval over a [`VectorStore`].
pub struct QueryEngine<'a> {
    extractor: &'a dyn FeatureExtractor,
    store: &'a dyn VectorStore,
}

impl<'a> QueryEngine<'a> {
    pub fn new(extractor: &'a dyn FeatureExtractor, store: &'a dyn VectorStore) -> Self {
        Self { extractor, store }
    }

    /// The `k` stored images nearest to `text`, or all of them if the store
    /// holds fewer. Empty text is embedded like any other string.
    pub async fn search(&self, text: &str, k: usize) -> Result<QueryResult> {
        if k == 0 {
            return Err(ImageSearchError::InvalidQuery("result count must be at least 1".into()));
        }

        let query_embedding = self.extractor.embed_text(text)?;
        let results = self.store.query(&query_embedding, k).await?;

        debug!("Found {} results for {:?}", results.len(), text);
        for result in results.iter() {
            debug!("Id: {}, Distance: {:.4}", result.image_id, result.distance);
        }
        Ok(results)
    }
}
