use std::path::{ Path, PathBuf };

use chrono::Utc;
use log::{ debug, info, warn };
use walkdir::WalkDir;

use crate::error::{ ImageSearchError, Result };
use crate::extractor::FeatureExtractor;
use crate::models::{
    FailedImage,
    ImageRecord,
    IndexProgress,
    IndexReport,
    ItemOutcome,
    INDEXED_AT_KEY,
    MIME_TYPE_KEY,
};
use crate::preprocess;
use crate::store::VectorStore;

/// Case-sensitive file name suffixes picked up by the indexer.
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg"];

pub fn is_supported_image(file_name: &str) -> bool {
    SUPPORTED_IMAGE_EXTENSIONS.iter().any(|ext| file_name.ends_with(ext))
}

/// A candidate file found while listing a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedImage {
    pub image_id: String,
    pub path: PathBuf,
    /// Set when the entry could not be read at listing time, e.g. a dangling symlink.
    pub listing_error: Option<String>,
}

/// Image files directly inside `dir`, in listing order.
///
/// Only a failure to read `dir` itself is an error. Unreadable entries are
/// logged; those with an image name are kept with their `listing_error`.
pub fn list_images(dir: &Path) -> Result<Vec<ListedImage>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e.into());
            }
            Err(e) => {
                let name = e
                    .path()
                    .and_then(|p| p.file_name())
                    .and_then(|n| n.to_str())
                    .map(str::to_string);
                warn!("Cannot read directory entry: {}", e);
                if let Some(name) = name.filter(|n| is_supported_image(n)) {
                    images.push(ListedImage {
                        path: dir.join(&name),
                        image_id: name,
                        listing_error: Some(e.to_string()),
                    });
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            warn!("Ignoring file with non UTF-8 name: {}", entry.path().display());
            continue;
        };
        if is_supported_image(name) {
            images.push(ListedImage {
                image_id: name.to_string(),
                path: dir.join(name),
                listing_error: None,
            });
        }
    }
    Ok(images)
}

/// Adds every not-yet-stored image of a directory to a [`VectorStore`].
pub struct Indexer<'a> {
    extractor: &'a dyn FeatureExtractor,
    store: &'a dyn VectorStore,
}

impl<'a> Indexer<'a> {
    pub fn new(extractor: &'a dyn FeatureExtractor, store: &'a dyn VectorStore) -> Self {
        Self { extractor, store }
    }

    pub async fn index_directory(&self, dir: &Path) -> Result<IndexReport> {
        self.index_directory_with_progress(dir, |_| {}).await
    }

    /// Indexes `dir`, calling `on_progress` after each file.
    ///
    /// Unreadable images are logged and reported in [`IndexReport::failed`];
    /// store errors abort the run. Records inserted before an abort stay, and
    /// the next run skips them.
    pub async fn index_directory_with_progress<F>(
        &self,
        dir: &Path,
        mut on_progress: F
    ) -> Result<IndexReport>
        where F: FnMut(&IndexProgress<'_>)
    {
        let existing = self.store.existing_ids().await?;
        info!("{} images already indexed", existing.len());

        let images = list_images(dir)?;
        let mut report = IndexReport {
            total: images.len(),
            ..Default::default()
        };

        for (processed, image) in images.iter().enumerate() {
            let outcome = if existing.contains(&image.image_id) {
                debug!("Skipping already indexed: {}", image.image_id);
                ItemOutcome::Skipped
            } else {
                self.index_one(image).await?
            };

            match &outcome {
                ItemOutcome::Indexed => {
                    report.newly_indexed += 1;
                }
                ItemOutcome::Skipped => {
                    report.skipped += 1;
                }
                ItemOutcome::Failed(reason) =>
                    report.failed.push(FailedImage {
                        image_id: image.image_id.clone(),
                        reason: reason.clone(),
                    }),
            }

            on_progress(
                &(IndexProgress {
                    processed: processed + 1,
                    total: report.total,
                    image_id: &image.image_id,
                    outcome: &outcome,
                })
            );
        }

        info!(
            "Indexing complete: total {}, new {}, skipped {}, failed {}",
            report.total,
            report.newly_indexed,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    /// Embeds and stores one file not present in the existing-ids snapshot.
    async fn index_one(&self, image: &ListedImage) -> Result<ItemOutcome> {
        if let Some(reason) = &image.listing_error {
            warn!("Error processing {}: {}", image.path.display(), reason);
            return Ok(ItemOutcome::Failed(reason.clone()));
        }

        let embedding = match self.embed_file(&image.path) {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Error processing {}: {}", image.path.display(), e);
                return Ok(ItemOutcome::Failed(e.to_string()));
            }
        };

        let record = self.new_record(&image.image_id, &image.path, embedding);
        match self.store.insert(record).await {
            Ok(()) => {
                info!("Indexed {}", image.path.display());
                Ok(ItemOutcome::Indexed)
            }
            // Another writer stored it after the snapshot was taken.
            Err(ImageSearchError::DuplicateId(id)) => {
                warn!("{} was indexed concurrently, skipping", id);
                Ok(ItemOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    /// Load, preprocess and embed one file.
    pub fn embed_file(&self, path: &Path) -> Result<Vec<f32>> {
        let image = preprocess::load(path)?;
        let normalized = preprocess::preprocess(&image);
        self.extractor.embed_image(&normalized)
    }

    fn new_record(&self, image_id: &str, path: &Path, embedding: Vec<f32>) -> ImageRecord {
        let mut record = ImageRecord::new(image_id, path.to_string_lossy(), embedding).with_metadata(
            INDEXED_AT_KEY,
            Utc::now().to_rfc3339()
        );
        if let Some(mime) = mime_guess::from_path(path).first() {
            record = record.with_metadata(MIME_TYPE_KEY, mime.to_string());
        }
        record
    }
}
