use std::path::PathBuf;
use std::sync::{ Mutex, MutexGuard };

use fastembed::{
    EmbeddingModel,
    ImageEmbedding,
    ImageEmbeddingModel,
    ImageInitOptions,
    InitOptions,
    TextEmbedding,
};
use image::{ ImageFormat, RgbImage };
use log::{ debug, info };

use crate::error::{ ImageSearchError, Result };

/// Dimension of the CLIP ViT-B/32 embedding space.
pub const CLIP_VIT_B32_DIM: usize = 512;

/// Maps images and text into one unit-normalized vector space.
///
/// Built once at startup and shared read-only between the indexer and the
/// query engine.
pub trait FeatureExtractor: Send + Sync {
    fn dimension(&self) -> usize;

    /// Embeds an image that already went through [`crate::preprocess::preprocess`].
    fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>>;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Scales `vector` to unit length.
pub fn l2_normalize(mut vector: Vec<f32>) -> Result<Vec<f32>> {
    let norm = vector
        .iter()
        .map(|x| x * x)
        .sum::<f32>()
        .sqrt();

    if !norm.is_finite() || norm == 0.0 {
        return Err(ImageSearchError::Embedding(format!("cannot normalize vector with norm {norm}")));
    }

    vector.iter_mut().for_each(|x| {
        *x /= norm;
    });
    Ok(vector)
}

#[derive(Debug, Clone, Default)]
pub struct ExtractorConfig {
    /// Where model weights are cached. `None` keeps the fastembed default.
    pub cache_dir: Option<PathBuf>,
    pub show_download_progress: bool,
}

/// CLIP ViT-B/32 vision and text towers served by fastembed.
///
/// The sessions sit behind mutexes so one handle can be shared between tasks.
pub struct ClipExtractor {
    image_model: Mutex<ImageEmbedding>,
    text_model: Mutex<TextEmbedding>,
}

impl ClipExtractor {
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        info!("Loading CLIP ViT-B/32 image and text models");

        let mut image_options = ImageInitOptions::new(
            ImageEmbeddingModel::ClipVitB32
        ).with_show_download_progress(config.show_download_progress);
        let mut text_options = InitOptions::new(
            EmbeddingModel::ClipVitB32
        ).with_show_download_progress(config.show_download_progress);
        if let Some(cache_dir) = &config.cache_dir {
            image_options = image_options.with_cache_dir(cache_dir.clone());
            text_options = text_options.with_cache_dir(cache_dir.clone());
        }

        let image_model = ImageEmbedding::try_new(image_options).map_err(|e|
            ImageSearchError::ModelLoad(e.to_string())
        )?;
        let text_model = TextEmbedding::try_new(text_options).map_err(|e|
            ImageSearchError::ModelLoad(e.to_string())
        )?;

        Ok(Self {
            image_model: Mutex::new(image_model),
            text_model: Mutex::new(text_model),
        })
    }
}

fn lock<T>(model: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    model.lock().map_err(|_| ImageSearchError::Embedding("model lock poisoned".into()))
}

impl FeatureExtractor for ClipExtractor {
    fn dimension(&self) -> usize {
        CLIP_VIT_B32_DIM
    }

    fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
        // fastembed reads images from disk; PNG keeps the preprocessed pixels exact.
        let file = tempfile::Builder::new().prefix("image-embeddings-").suffix(".png").tempfile()?;
        image.save_with_format(file.path(), ImageFormat::Png)?;

        let embeddings = lock(&self.image_model)?
            .embed(vec![file.path()], None)
            .map_err(|e| ImageSearchError::Embedding(e.to_string()))?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ImageSearchError::Embedding("model returned no image embedding".into()))?;

        debug!("Generated image embedding with size: {}", embedding.len());
        l2_normalize(embedding)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = lock(&self.text_model)?
            .embed(vec![text.to_string()], None)
            .map_err(|e| ImageSearchError::Embedding(e.to_string()))?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ImageSearchError::Embedding("model returned no text embedding".into()))?;

        debug!("Query embedding size: {}", embedding.len());
        l2_normalize(embedding)
    }
}

/// Deterministic extractor for tests that must not download model weights.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{ AtomicUsize, Ordering };

    pub const STUB_DIM: usize = 8;

    /// Embeds images by per-channel means and text by byte histogram.
    #[derive(Default)]
    pub struct StubExtractor {
        pub image_calls: AtomicUsize,
    }

    impl StubExtractor {
        pub fn image_calls(&self) -> usize {
            self.image_calls.load(Ordering::SeqCst)
        }
    }

    impl FeatureExtractor for StubExtractor {
        fn dimension(&self) -> usize {
            STUB_DIM
        }

        fn embed_image(&self, image: &RgbImage) -> Result<Vec<f32>> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            let mut vector = vec![0.0f32; STUB_DIM];
            let count = (image.width() * image.height()).max(1) as f32;
            for pixel in image.pixels() {
                for c in 0..3 {
                    vector[c] += (pixel.0[c] as f32) / 255.0 / count;
                }
            }
            vector[STUB_DIM - 1] = 1.0;
            l2_normalize(vector)
        }

        fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            let mut vector = vec![0.0f32; STUB_DIM];
            for byte in text.bytes() {
                vector[(byte as usize) % (STUB_DIM - 1)] += 1.0;
            }
            vector[STUB_DIM - 1] = 1.0;
            l2_normalize(vector)
        }
    }
}
