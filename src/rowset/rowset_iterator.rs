// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use bitvec::prelude::BitVec;
use smallvec::SmallVec;

use super::base_data::BaseDataIterator;
use super::delta::RowChange;
use super::delta_tracker::DeltaSnapshot;
use crate::chunk::StorageChunk;
use crate::error::StorageResult;
use crate::mvcc::MvccSnapshot;

/// Iterates one rowset: base column blocks with the applicable deltas
/// applied on top.
///
/// For each base batch, every delta whose txid is committed per the
/// iterator's MVCC snapshot and whose rowid falls in the batch is applied
/// in ascending txid order. An update overwrites the projected cells (and
/// makes a previously-deleted row visible again); a delete clears the
/// row's visibility bit.
pub struct RowsetIterator {
    base: BaseDataIterator,
    deltas: DeltaSnapshot,
    snap: MvccSnapshot,
    projection: Arc<[usize]>,
}

impl RowsetIterator {
    pub(super) fn new(
        base: BaseDataIterator,
        deltas: DeltaSnapshot,
        snap: MvccSnapshot,
        projection: Arc<[usize]>,
    ) -> Self {
        Self {
            base,
            deltas,
            snap,
            projection,
        }
    }

    pub async fn next_batch(
        &mut self,
        expected_size: Option<usize>,
    ) -> StorageResult<Option<StorageChunk>> {
        let (first_rowid, mut arrays) = match self.base.next_batch(expected_size).await? {
            Some(batch) => batch,
            None => return Ok(None),
        };
        let row_count = arrays[0].len();
        let end_rowid = first_rowid + row_count as u32;

        let deltas =
            self.deltas
                .collect_range_committed(first_rowid, end_rowid, &self.snap);

        let visibility = if deltas.is_empty() {
            None
        } else {
            let mut vis = BitVec::new();
            vis.resize(row_count, true);
            for (key, change) in &deltas {
                let offset = (key.rowid - first_rowid) as usize;
                match change {
                    RowChange::Delete => vis.set(offset, false),
                    RowChange::Update(columns) => {
                        // The latest applicable delta wins: an update
                        // after a delete resurrects the row.
                        vis.set(offset, true);
                        for (col_idx, value) in columns {
                            if let Some(slot) =
                                self.projection.iter().position(|p| p == col_idx)
                            {
                                arrays[slot].set(offset, value);
                            }
                        }
                    }
                }
            }
            Some(vis)
        };

        Ok(Some(StorageChunk::new(
            first_rowid,
            visibility,
            arrays.into_iter().map(Arc::new).collect::<SmallVec<_>>(),
        )))
    }
}

/// Concatenates iterators over non-overlapping rowsets, yielding their
/// batches one rowset at a time. Used by [`super::DuplicatingRowset`] to
/// mirror the read semantics of the rowset set being replaced.
pub struct ConcatIterator {
    iters: Vec<RowsetIteratorImpl>,
    current_iter: usize,
}

impl ConcatIterator {
    pub fn new(iters: Vec<RowsetIteratorImpl>) -> Self {
        Self {
            iters,
            current_iter: 0,
        }
    }

    pub async fn next_batch(
        &mut self,
        expected_size: Option<usize>,
    ) -> StorageResult<Option<StorageChunk>> {
        loop {
            if self.current_iter >= self.iters.len() {
                return Ok(None);
            }
            if let Some(chunk) = self.iters[self.current_iter]
                .next_batch(expected_size)
                .await?
            {
                return Ok(Some(chunk));
            }
            self.current_iter += 1;
        }
    }
}

/// Iterator over any rowset variant.
pub enum RowsetIteratorImpl {
    Disk(RowsetIterator),
    Concat(ConcatIterator),
}

impl RowsetIteratorImpl {
    pub async fn next_batch(
        &mut self,
        expected_size: Option<usize>,
    ) -> StorageResult<Option<StorageChunk>> {
        match self {
            Self::Disk(iter) => iter.next_batch(expected_size).await,
            // Boxed to break the async recursion through nested
            // concatenation.
            Self::Concat(iter) => Box::pin(iter.next_batch(expected_size)).await,
        }
    }

    /// Drain the iterator and compact all visible rows into row-major
    /// form. Test and debug helper.
    pub async fn collect_rows(&mut self) -> StorageResult<Vec<Vec<crate::types::Value>>> {
        let mut rows = vec![];
        while let Some(chunk) = self.next_batch(None).await? {
            let chunk = chunk.to_data_chunk();
            for row in 0..chunk.cardinality() {
                rows.push(chunk.row_at(row));
            }
        }
        Ok(rows)
    }
}

impl From<RowsetIterator> for RowsetIteratorImpl {
    fn from(iter: RowsetIterator) -> Self {
        Self::Disk(iter)
    }
}

impl From<ConcatIterator> for RowsetIteratorImpl {
    fn from(iter: ConcatIterator) -> Self {
        Self::Concat(iter)
    }
}
