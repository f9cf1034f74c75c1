use super::{IndexError, ScoredRecord, SearchFilter};
use crate::model::{EmbeddingRecord, FragmentId, Partition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Append-only storage for one partition. Offsets are insertion order.
#[derive(Debug)]
pub(crate) struct PartitionStore {
    partition: Partition,
    dimension: Option<usize>,
    records: Vec<EmbeddingRecord>,
    fragment_ids: HashSet<FragmentId>,
}

/// Serialized form of one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    /// Which partition the records belong to.
    pub partition: Partition,
    /// Fixed vector dimension, unset while the partition is empty.
    pub dimension: Option<usize>,
    /// Records in insertion order.
    pub records: Vec<EmbeddingRecord>,
}

impl PartitionStore {
    pub(crate) fn new(partition: Partition) -> Self {
        Self {
            partition,
            dimension: None,
            records: Vec::new(),
            fragment_ids: HashSet::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub(crate) fn insert(&mut self, record: EmbeddingRecord) -> Result<usize, IndexError> {
        let actual = record.vector.len();
        match self.dimension {
            Some(expected) if expected != actual => {
                return Err(IndexError::DimensionMismatch {
                    partition: self.partition,
                    expected,
                    actual,
                });
            }
            Some(_) => {}
            None if actual == 0 => {
                return Err(IndexError::DimensionMismatch {
                    partition: self.partition,
                    expected: 1,
                    actual,
                });
            }
            None => self.dimension = Some(actual),
        }
        if !self.fragment_ids.insert(record.fragment_id) {
            return Err(IndexError::DuplicateFragment(record.fragment_id));
        }

        let offset = self.records.len();
        self.records.push(record);
        Ok(offset)
    }

    pub(crate) fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredRecord>, IndexError> {
        let Some(dimension) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dimension {
            return Err(IndexError::DimensionMismatch {
                partition: self.partition,
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, record)| filter.matches(record))
            .map(|(offset, record)| (offset, cosine_distance(query, &record.vector)))
            .collect();
        scored.sort_by(|(left_offset, left), (right_offset, right)| {
            left.total_cmp(right).then(left_offset.cmp(right_offset))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(offset, distance)| ScoredRecord {
                record: self.records[offset].clone(),
                distance,
            })
            .collect())
    }

    pub(crate) fn snapshot(&self) -> PartitionSnapshot {
        PartitionSnapshot {
            partition: self.partition,
            dimension: self.dimension,
            records: self.records.clone(),
        }
    }

    pub(crate) fn restore(snapshot: PartitionSnapshot) -> Result<Self, IndexError> {
        let mut store = Self::new(snapshot.partition);
        store.dimension = snapshot.dimension;
        for record in snapshot.records {
            store.insert(record)?;
        }
        Ok(store)
    }
}

/// `1 - cos(a, b)`; zero-length vectors are treated as orthogonal.
pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
