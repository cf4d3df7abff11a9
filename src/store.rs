use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use log::{ debug, info };
use serde::Deserialize;
use surrealdb::engine::local::{ Db, Mem, RocksDb };
use surrealdb::Surreal;

use crate::error::{ ImageSearchError, Result };
use crate::models::{ ImageRecord, QueryResult, SearchHit };

pub const DEFAULT_COLLECTION: &str = "image_embeddings";
const NAMESPACE: &str = "images";
const DATABASE: &str = "embeddings";

/// Persistent, identifier-keyed collection of image embeddings.
///
/// There is no locking across calls: at most one indexing run should write to
/// a collection at a time. Every `insert` commits on its own.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// All identifiers currently stored.
    async fn existing_ids(&self) -> Result<HashSet<String>>;

    /// Adds a record whose identifier is not stored yet. A duplicate is
    /// rejected with [`ImageSearchError::DuplicateId`] and leaves the stored
    /// record untouched.
    async fn insert(&self, record: ImageRecord) -> Result<()>;

    /// Up to `k` records nearest to `vector`, ascending by distance.
    async fn query(&self, vector: &[f32], k: usize) -> Result<QueryResult>;

    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>>;

    async fn count(&self) -> Result<usize>;
}

/// Distance between two embeddings. Smaller means more similar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Distance {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - cos(a, b)`.
    Cosine,
    /// `1 - a·b`.
    InnerProduct,
}

impl Distance {
    pub fn between(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::L2 =>
                a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum(),
            Distance::Cosine => 1.0 - cosine_similarity(a, b),
            Distance::InnerProduct => 1.0 - dot(a, b),
        }
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Distance::L2 => "l2",
            Distance::Cosine => "cosine",
            Distance::InnerProduct => "ip",
        };
        f.write_str(name)
    }
}

impl FromStr for Distance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" => Ok(Distance::L2),
            "cosine" => Ok(Distance::Cosine),
            "ip" => Ok(Distance::InnerProduct),
            other => Err(format!("unknown distance {other:?}, expected one of l2, cosine, ip")),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| x * y)
        .sum()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let magnitude_a = dot(a, a).sqrt();
    let magnitude_b = dot(b, b).sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (magnitude_a * magnitude_b)
}

fn validate_collection(name: &str) -> Result<()> {
    let valid =
        !name.is_empty() && name.chars().all(|c| (c.is_ascii_alphanumeric() || c == '_'));
    if valid {
        Ok(())
    } else {
        Err(ImageSearchError::InvalidCollection(name.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct IdRow {
    image_id: String,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

/// [`VectorStore`] backed by embedded SurrealDB. One table per collection.
pub struct SurrealStore {
    db: Surreal<Db>,
    table: String,
    distance: Distance,
}

impl SurrealStore {
    /// Opens or creates `collection` in the RocksDB directory at `location`.
    pub async fn open(location: impl AsRef<Path>, collection: &str) -> Result<Self> {
        Self::open_with_distance(location, collection, Distance::default()).await
    }

    pub async fn open_with_distance(
        location: impl AsRef<Path>,
        collection: &str,
        distance: Distance
    ) -> Result<Self> {
        validate_collection(collection)?;
        let location = location.as_ref();
        fs::create_dir_all(location)?;

        info!("Opening vector store at {} (collection {})", location.display(), collection);
        let path = location.to_string_lossy().to_string();
        let db = Surreal::new::<RocksDb>(path.as_str()).await?;
        Self::init(db, collection, distance).await
    }

    /// Non-persistent store, mainly for tests.
    pub async fn open_in_memory(collection: &str) -> Result<Self> {
        Self::open_in_memory_with_distance(collection, Distance::default()).await
    }

    pub async fn open_in_memory_with_distance(collection: &str, distance: Distance) -> Result<Self> {
        validate_collection(collection)?;
        let db = Surreal::new::<Mem>(()).await?;
        Self::init(db, collection, distance).await
    }

    async fn init(db: Surreal<Db>, collection: &str, distance: Distance) -> Result<Self> {
        db.use_ns(NAMESPACE).use_db(DATABASE).await?;
        // DEFINE is idempotent, so reopening an existing collection keeps its records.
        db.query(
            format!(
                "
            DEFINE TABLE {table} SCHEMAFUL;
            DEFINE FIELD image_id ON {table} TYPE string;
            DEFINE FIELD path ON {table} TYPE string;
            DEFINE FIELD embedding ON {table} TYPE array<float>;
            DEFINE FIELD metadata ON {table} FLEXIBLE TYPE object;

            DEFINE INDEX idx_{table}_image_id ON {table} FIELDS image_id UNIQUE;
        ",
                table = collection
            )
        ).await?.check()?;

        Ok(Self {
            db,
            table: collection.to_string(),
            distance,
        })
    }

    pub fn collection(&self) -> &str {
        &self.table
    }

    pub fn distance(&self) -> Distance {
        self.distance
    }

    async fn all_records(&self) -> Result<Vec<ImageRecord>> {
        let records: Vec<ImageRecord> = self.db
            .query("SELECT image_id, path, embedding, metadata FROM type::table($table)")
            .bind(("table", self.table.clone())).await?
            .take(0)?;
        Ok(records)
    }
}

#[async_trait]
impl VectorStore for SurrealStore {
    async fn existing_ids(&self) -> Result<HashSet<String>> {
        let rows: Vec<IdRow> = self.db
            .query("SELECT image_id FROM type::table($table)")
            .bind(("table", self.table.clone())).await?
            .take(0)?;
        Ok(
            rows
                .into_iter()
                .map(|row| row.image_id)
                .collect()
        )
    }

    async fn insert(&self, record: ImageRecord) -> Result<()> {
        if self.get(&record.image_id).await?.is_some() {
            return Err(ImageSearchError::DuplicateId(record.image_id));
        }

        let created: Option<ImageRecord> = self.db
            .create((self.table.as_str(), record.image_id.as_str()))
            .content(&record).await?;

        match created {
            Some(_) => debug!("Stored {} ({} dims)", record.image_id, record.embedding.len()),
            None => debug!("Stored {} but no record was returned", record.image_id),
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<QueryResult> {
        // Brute-force scan; the collection is read once per query.
        let records = self.all_records().await?;
        debug!("Scoring {} records in {}", records.len(), self.table);

        let mut hits = Vec::with_capacity(records.len());
        for record in records {
            if record.embedding.len() != vector.len() {
                return Err(
                    ImageSearchError::Embedding(
                        format!(
                            "query has {} dimensions but {} has {}",
                            vector.len(),
                            record.image_id,
                            record.embedding.len()
                        )
                    )
                );
            }
            hits.push(SearchHit {
                distance: self.distance.between(vector, &record.embedding),
                image_id: record.image_id,
                metadata: record.metadata,
            });
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.image_id.cmp(&b.image_id)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>> {
        let record: Option<ImageRecord> = self.db.select((self.table.as_str(), image_id)).await?;
        Ok(record)
    }

    async fn count(&self) -> Result<usize> {
        let rows: Vec<CountRow> = self.db
            .query("SELECT count() AS count FROM type::table($table) GROUP ALL")
            .bind(("table", self.table.clone())).await?
            .take(0)?;
        Ok(
            rows
                .first()
                .map_or(0, |row| row.count as usize)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::l2_normalize;
    use std::time::Duration;
    use tempfile::TempDir;

    fn record(id: &str, vector: Vec<f32>) -> ImageRecord {
        ImageRecord::new(id, format!("/photos/{id}"), l2_normalize(vector).unwrap())
    }

    async fn seeded_store() -> SurrealStore {
        seeded_store_with(Distance::L2).await
    }

    async fn seeded_store_with(distance: Distance) -> SurrealStore {
        let store = SurrealStore::open_in_memory_with_distance(DEFAULT_COLLECTION, distance).await.expect(
            "Failed to open in-memory store"
        );
        for (id, v) in [
            ("a.jpg", vec![1.0, 0.0, 0.0]),
            ("b.jpg", vec![0.8, 0.2, 0.0]),
            ("c.png", vec![0.0, 1.0, 0.0]),
            ("d.jpeg", vec![0.0, 0.0, 1.0]),
        ] {
            store.insert(record(id, v)).await.unwrap();
        }
        store
    }

    /// RocksDB releases its lock when the background router shuts down,
    /// which happens shortly after the last handle is dropped.
    async fn reopen(location: &Path) -> SurrealStore {
        for _ in 0..50 {
            match SurrealStore::open(location, DEFAULT_COLLECTION).await {
                Ok(store) => {
                    return store;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
        panic!("store at {} never became available", location.display());
    }

    #[tokio::test]
    async fn test_empty_store_query_returns_nothing() -> Result<()> {
        let store = SurrealStore::open_in_memory(DEFAULT_COLLECTION).await?;
        assert_eq!(store.count().await?, 0);
        assert!(store.existing_ids().await?.is_empty());
        assert!(store.query(&[1.0, 0.0, 0.0], 5).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_query_orders_by_distance_and_bounds_length() -> Result<()> {
        let store = seeded_store().await;
        let query = l2_normalize(vec![1.0, 0.1, 0.0])?;

        for k in 1..=6 {
            let hits = store.query(&query, k).await?;
            assert_eq!(hits.len(), k.min(4), "k = {k}");
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        }

        let hits = store.query(&query, 2).await?;
        assert_eq!(hits[0].image_id, "a.jpg");
        assert_eq!(hits[1].image_id, "b.jpg");
        assert_eq!(hits[0].path(), Some("/photos/a.jpg"));
        Ok(())
    }

    #[tokio::test]
    async fn test_query_does_not_mutate() -> Result<()> {
        let store = seeded_store().await;
        let before = store.existing_ids().await?;
        store.query(&l2_normalize(vec![0.0, 1.0, 0.0])?, 10).await?;
        assert_eq!(store.existing_ids().await?, before);
        assert_eq!(store.count().await?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected_without_overwrite() -> Result<()> {
        let store = seeded_store().await;
        let original = store.get("a.jpg").await?.expect("a.jpg should be stored");

        let result = store.insert(record("a.jpg", vec![0.0, 0.0, 1.0])).await;
        assert!(matches!(result, Err(ImageSearchError::DuplicateId(ref id)) if id == "a.jpg"));

        assert_eq!(store.get("a.jpg").await?, Some(original));
        assert_eq!(store.count().await?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_existing_ids_and_metadata_round_trip() -> Result<()> {
        let store = seeded_store().await;
        let ids = store.existing_ids().await?;
        assert_eq!(ids.len(), 4);
        assert!(ids.contains("c.png"));

        let stored = store.get("d.jpeg").await?.unwrap();
        assert_eq!(stored.path, "/photos/d.jpeg");
        assert_eq!(stored.metadata.get("path").map(String::as_str), Some("/photos/d.jpeg"));
        assert!(store.get("missing.png").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_an_error() -> Result<()> {
        let store = seeded_store().await;
        let result = store.query(&[1.0, 0.0], 3).await;
        assert!(matches!(result, Err(ImageSearchError::Embedding(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_collection_name() {
        let result = SurrealStore::open_in_memory("images; REMOVE TABLE x").await;
        assert!(matches!(result, Err(ImageSearchError::InvalidCollection(_))));
    }

    #[test]
    fn test_distances_agree_on_unit_vectors() {
        let a = l2_normalize(vec![1.0, 2.0, 3.0]).unwrap();
        let b = l2_normalize(vec![3.0, 2.0, 1.0]).unwrap();
        let cosine = Distance::Cosine.between(&a, &b);
        // |a - b|^2 = 2 - 2cos for unit vectors.
        assert!((Distance::L2.between(&a, &b) - 2.0 * cosine).abs() < 1e-5);
        assert!((Distance::InnerProduct.between(&a, &b) - cosine).abs() < 1e-5);
        assert_eq!("COSINE".parse::<Distance>().unwrap(), Distance::Cosine);
        assert!("manhattan".parse::<Distance>().is_err());
    }

    #[tokio::test]
    async fn test_all_metrics_rank_unit_vectors_alike() -> Result<()> {
        let query = l2_normalize(vec![0.6, 0.5, 0.2])?;
        let l2_hits = seeded_store_with(Distance::L2).await.query(&query, 4).await?;
        let l2_order: Vec<&str> = l2_hits
            .iter()
            .map(|h| h.image_id.as_str())
            .collect();

        for distance in [Distance::Cosine, Distance::InnerProduct] {
            let store = seeded_store_with(distance).await;
            assert_eq!(store.distance(), distance);
            let hits = store.query(&query, 4).await?;
            let order: Vec<&str> = hits
                .iter()
                .map(|h| h.image_id.as_str())
                .collect();
            assert_eq!(order, l2_order, "{distance} ranks differently from l2");
            for (hit, l2_hit) in hits.iter().zip(&l2_hits) {
                assert!((2.0 * hit.distance - l2_hit.distance).abs() < 1e-5);
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_sees_same_records() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let location = temp_dir.path().join("store");

        {
            let store = SurrealStore::open(&location, DEFAULT_COLLECTION).await?;
            store.insert(record("kept.png", vec![0.3, 0.4, 0.5])).await?;
        }

        let store = reopen(&location).await;
        assert_eq!(store.existing_ids().await?, HashSet::from(["kept.png".to_string()]));
        assert_eq!(store.count().await?, 1);
        Ok(())
    }
}
