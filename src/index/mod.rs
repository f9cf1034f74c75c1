//! Partitioned in-memory vector index.
//!
//! Each partition sits behind its own `RwLock`: inserts take the write lock for a single
//! append, searches share the read lock. Vectors from different partitions are never
//! compared, so the text and image partitions may use different dimensions.

mod assets;
mod partition;
pub mod snapshot;

pub use assets::AssetStore;
pub use partition::PartitionSnapshot;
pub use snapshot::IndexSnapshot;

use crate::model::{DocumentId, EmbeddingRecord, FragmentId, Partition};
use partition::PartitionStore;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

/// Errors raised by the vector index and its snapshot.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The vector does not match the partition's fixed dimension.
    #[error("dimension mismatch in {partition} partition: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Partition that rejected the vector.
        partition: Partition,
        /// Dimension fixed by the first insert.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// A record for this fragment is already indexed.
    #[error("fragment {0} is already indexed")]
    DuplicateFragment(FragmentId),
    /// A writer panicked while holding a lock.
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    /// Reading or writing a snapshot file failed.
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A snapshot could not be encoded or decoded.
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The snapshot was written by an incompatible version.
    #[error("unsupported snapshot version {0}")]
    UnsupportedSnapshot(u32),
}

/// Restricts a search to a subset of records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Only consider records from this document.
    pub document_id: Option<DocumentId>,
}

impl SearchFilter {
    /// Filter accepting records of one document.
    pub fn document(document_id: DocumentId) -> Self {
        Self {
            document_id: Some(document_id),
        }
    }

    fn matches(&self, record: &EmbeddingRecord) -> bool {
        self.document_id
            .is_none_or(|document_id| record.document_id == document_id)
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// Matching record.
    pub record: EmbeddingRecord,
    /// Cosine distance to the query (`1 - cos`); smaller is closer.
    pub distance: f32,
}

/// Vector index with one partition per modality.
#[derive(Debug)]
pub struct VectorIndex {
    text: RwLock<PartitionStore>,
    image: RwLock<PartitionStore>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            text: RwLock::new(PartitionStore::new(Partition::Text)),
            image: RwLock::new(PartitionStore::new(Partition::Image)),
        }
    }

    fn store(&self, partition: Partition) -> &RwLock<PartitionStore> {
        match partition {
            Partition::Text => &self.text,
            Partition::Image => &self.image,
        }
    }

    /// Append `record` to the partition of its modality and return its offset there.
    pub fn insert(&self, record: EmbeddingRecord) -> Result<usize, IndexError> {
        let partition = record.modality.partition();
        let mut store = self
            .store(partition)
            .write()
            .map_err(|_| IndexError::LockPoisoned("index partition"))?;
        store.insert(record)
    }

    /// The `k` records of `partition` closest to `query`, closest first, ties in insertion
    /// order. An empty partition yields no hits.
    pub fn search(
        &self,
        partition: Partition,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        let store = self
            .store(partition)
            .read()
            .map_err(|_| IndexError::LockPoisoned("index partition"))?;
        store.search(query, k, filter)
    }

    /// Number of records in `partition`.
    pub fn len(&self, partition: Partition) -> usize {
        self.store(partition)
            .read()
            .map(|store| store.len())
            .unwrap_or(0)
    }

    /// True when both partitions are empty.
    pub fn is_empty(&self) -> bool {
        Partition::ALL.iter().all(|partition| self.len(*partition) == 0)
    }

    /// Dimension fixed for `partition`, if any record was inserted.
    pub fn dimension(&self, partition: Partition) -> Option<usize> {
        self.store(partition)
            .read()
            .ok()
            .and_then(|store| store.dimension())
    }

    /// Copy the current contents for persistence.
    pub fn snapshot(&self) -> Result<IndexSnapshot, IndexError> {
        let partitions = Partition::ALL
            .iter()
            .map(|partition| {
                self.store(*partition)
                    .read()
                    .map(|store| store.snapshot())
                    .map_err(|_| IndexError::LockPoisoned("index partition"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(IndexSnapshot {
            version: snapshot::SNAPSHOT_VERSION,
            partitions,
        })
    }

    /// Rebuild an index from a snapshot, re-validating every record.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self, IndexError> {
        let index = Self::new();
        for partition in snapshot.partitions {
            let target = partition.partition;
            let restored = PartitionStore::restore(partition)?;
            *index
                .store(target)
                .write()
                .map_err(|_| IndexError::LockPoisoned("index partition"))? = restored;
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FragmentModality;
    use uuid::Uuid;

    fn record(modality: FragmentModality, vector: Vec<f32>) -> EmbeddingRecord {
        record_for(Uuid::new_v4(), modality, vector)
    }

    fn record_for(document_id: DocumentId, modality: FragmentModality, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            fragment_id: Uuid::new_v4(),
            document_id,
            document_name: "doc.txt".into(),
            modality,
            excerpt: "excerpt".into(),
            vector,
            page: None,
            sequence: 0,
            content_hash: "hash".into(),
        }
    }

    #[test]
    fn search_orders_by_distance_then_insertion() {
        let index = VectorIndex::new();
        let far = record(FragmentModality::Text, vec![0.0, 1.0]);
        let near_first = record(FragmentModality::Text, vec![1.0, 0.0]);
        let near_second = record(FragmentModality::OcrText, vec![2.0, 0.0]);
        for r in [&far, &near_first, &near_second] {
            index.insert(r.clone()).expect("insert");
        }

        let hits = index
            .search(Partition::Text, &[1.0, 0.0], 10, &SearchFilter::default())
            .expect("search");
        let ids: Vec<_> = hits.iter().map(|hit| hit.record.fragment_id).collect();
        assert_eq!(ids, vec![near_first.fragment_id, near_second.fragment_id, far.fragment_id]);
        assert!(hits.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        assert!(hits[0].distance.abs() < 1e-6);
    }

    #[test]
    fn k_limits_hits_and_empty_partition_returns_nothing() {
        let index = VectorIndex::new();
        for _ in 0..3 {
            index.insert(record(FragmentModality::Text, vec![1.0, 0.0])).expect("insert");
        }
        let hits = index
            .search(Partition::Text, &[1.0, 0.0], 2, &SearchFilter::default())
            .expect("search");
        assert_eq!(hits.len(), 2);
        let none = index
            .search(Partition::Image, &[1.0, 0.0, 0.0], 5, &SearchFilter::default())
            .expect("search");
        assert!(none.is_empty());
    }

    #[test]
    fn partitions_keep_independent_dimensions() {
        let index = VectorIndex::new();
        index.insert(record(FragmentModality::Text, vec![1.0, 0.0])).expect("text");
        index.insert(record(FragmentModality::Image, vec![1.0, 0.0, 0.0])).expect("image");

        let error = index
            .insert(record(FragmentModality::OcrText, vec![1.0, 0.0, 0.0]))
            .unwrap_err();
        assert!(matches!(
            error,
            IndexError::DimensionMismatch { partition: Partition::Text, expected: 2, actual: 3 }
        ));
        assert_eq!(index.len(Partition::Text), 1);
        assert_eq!(index.dimension(Partition::Image), Some(3));
    }

    #[test]
    fn duplicate_fragments_are_rejected() {
        let index = VectorIndex::new();
        let r = record(FragmentModality::Text, vec![1.0]);
        index.insert(r.clone()).expect("first");
        assert!(matches!(index.insert(r), Err(IndexError::DuplicateFragment(_))));
    }

    #[test]
    fn filter_restricts_to_one_document() {
        let index = VectorIndex::new();
        let wanted = Uuid::new_v4();
        index.insert(record(FragmentModality::Text, vec![1.0, 0.0])).expect("other");
        let own = record_for(wanted, FragmentModality::Text, vec![0.0, 1.0]);
        index.insert(own.clone()).expect("own");

        let hits = index
            .search(Partition::Text, &[1.0, 0.0], 5, &SearchFilter::document(wanted))
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.fragment_id, own.fragment_id);
    }

    #[test]
    fn snapshot_roundtrips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index = VectorIndex::new();
        let text = record(FragmentModality::Text, vec![0.6, 0.8]);
        let image = record(FragmentModality::Image, vec![1.0, 0.0, 0.0]);
        index.insert(text.clone()).expect("text");
        index.insert(image.clone()).expect("image");
        let assets = AssetStore::new();
        assets.insert(image.fragment_id, vec![137, 80, 78, 71]).expect("asset");

        let taken = index.snapshot().expect("snapshot");
        snapshot::save(dir.path(), &taken, &assets.entries().expect("entries")).expect("save");
        let (loaded, loaded_assets) = snapshot::load(dir.path()).expect("load").expect("present");
        assert_eq!(loaded, taken);
        assert_eq!(loaded_assets, vec![(image.fragment_id, vec![137, 80, 78, 71])]);

        let restored = VectorIndex::from_snapshot(loaded).expect("restore");
        assert_eq!(restored.len(Partition::Text), 1);
        assert_eq!(restored.len(Partition::Image), 1);
        let hits = restored
            .search(Partition::Text, &[0.6, 0.8], 1, &SearchFilter::default())
            .expect("search");
        assert_eq!(hits[0].record, text);
    }

    #[test]
    fn missing_snapshot_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(snapshot::load(dir.path()).expect("load").is_none());
    }
}
