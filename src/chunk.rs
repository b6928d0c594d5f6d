// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use bitvec::prelude::BitVec;
use smallvec::SmallVec;

use crate::array::{ArrayBuilderImpl, ArrayImpl, DataChunk};

pub type PackedVec<T> = SmallVec<[T; 16]>;

/// A batch read from a rowset: pointers to one array per projected column,
/// a visibility map produced by the delta track, and the rowid of the
/// first row. Rows masked out by the visibility map are deleted under the
/// iterator's snapshot but still occupy their ordinal position.
#[derive(Clone)]
pub struct StorageChunk {
    /// Rowid of the first row in this chunk.
    first_rowid: u32,

    /// Per-row visibility under the iterator's snapshot; `None` when no
    /// delta touched the batch.
    visibility: Option<BitVec>,

    /// One array per projected column, deltas already applied.
    arrays: PackedVec<Arc<ArrayImpl>>,

    /// Number of visible rows.
    cardinality: usize,
}

impl StorageChunk {
    pub fn new(first_rowid: u32, visibility: Option<BitVec>, arrays: PackedVec<Arc<ArrayImpl>>) -> Self {
        assert!(!arrays.is_empty());
        let first_length = arrays[0].len();
        for array in &arrays {
            assert_eq!(first_length, array.len());
        }
        let cardinality = if let Some(ref visibility) = visibility {
            assert_eq!(visibility.len(), first_length);
            visibility.count_ones()
        } else {
            first_length
        };
        Self {
            first_rowid,
            visibility,
            arrays,
            cardinality,
        }
    }

    pub fn first_rowid(&self) -> u32 {
        self.first_rowid
    }

    /// Number of rows in the chunk, visible or not.
    pub fn row_count(&self) -> usize {
        self.arrays[0].len()
    }

    pub fn cardinality(&self) -> usize {
        self.cardinality
    }

    pub fn column_count(&self) -> usize {
        self.arrays.len()
    }

    pub fn array_at(&self, idx: usize) -> &Arc<ArrayImpl> {
        &self.arrays[idx]
    }

    pub fn visibility(&self) -> &Option<BitVec> {
        &self.visibility
    }

    pub fn row_visible(&self, idx: usize) -> bool {
        match &self.visibility {
            Some(vis) => vis[idx],
            None => true,
        }
    }

    /// Compact the visible rows into a plain [`DataChunk`].
    pub fn to_data_chunk(&self) -> DataChunk {
        let mut builders = self
            .arrays
            .iter()
            .map(|a| ArrayBuilderImpl::with_capacity(a.datatype(), self.cardinality))
            .collect::<Vec<_>>();
        for row in 0..self.row_count() {
            if self.row_visible(row) {
                for (builder, array) in builders.iter_mut().zip(self.arrays.iter()) {
                    builder.push(&array.value(row));
                }
            }
        }
        builders.into_iter().map(|b| b.finish()).collect()
    }
}

#[cfg(test)]
mod tests {
    use bitvec::prelude::*;
    use smallvec::smallvec;

    use super::*;

    #[test]
    fn test_compact_visible_rows() {
        let array = Arc::new(ArrayImpl::UInt32([10, 20, 30].into_iter().collect()));
        let chunk = StorageChunk::new(0, Some(bitvec![1, 0, 1]), smallvec![array]);
        assert_eq!(chunk.cardinality(), 2);
        let compacted = chunk.to_data_chunk();
        assert_eq!(compacted.cardinality(), 2);
        assert_eq!(compacted.array_at(0).value(1), crate::types::Value::UInt32(30));
    }
}
