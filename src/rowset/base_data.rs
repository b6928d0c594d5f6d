// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::path::Path;
use std::sync::Arc;

use moka::future::Cache;

use super::{path_of_bloom, path_of_column, KeyProbe};
use crate::array::ArrayImpl;
use crate::block::{Block, BlockCacheKey};
use crate::bloom::BloomFilter;
use crate::column::{Column, ColumnIteratorImpl};
use crate::error::{StorageResult, TracedStorageError};
use crate::index::KeyIndex;
use crate::options::IOBackend;
use crate::schema::Schema;
use crate::types::Value;

/// Read-side view over the immutable files of one rowset: one column
/// reader per column, the loaded bloom filter, and the sparse key index
/// carried by the first key column's file.
///
/// All file handles live for the lifetime of this object and are freely
/// shared across reader threads.
pub struct BaseData {
    schema: Arc<Schema>,
    columns: Vec<Column>,
    bloom: BloomFilter,
    bloom_file_size: u64,
    key_index: KeyIndex,
    row_count: u32,
}

impl BaseData {
    /// Open readers for every column file and the bloom file, verifying
    /// that all columns agree on the row count.
    pub async fn open(
        dir: impl AsRef<Path>,
        schema: Arc<Schema>,
        block_cache: Cache<BlockCacheKey, Block>,
        rowset_id: u32,
        io_backend: IOBackend,
    ) -> StorageResult<Self> {
        let dir = dir.as_ref();
        let mut columns = vec![];
        for column_idx in 0..schema.num_columns() {
            let column = Column::open(
                path_of_column(dir, column_idx),
                block_cache.clone(),
                BlockCacheKey::new(rowset_id, column_idx as u32),
                io_backend,
            )
            .await?;
            columns.push(column);
        }

        let row_count = columns[0].row_count();
        for (column_idx, column) in columns.iter().enumerate() {
            if column.row_count() != row_count {
                return Err(TracedStorageError::corruption(format!(
                    "column {} of {} has {} rows, column 0 has {}",
                    column_idx,
                    dir.display(),
                    column.row_count(),
                    row_count
                )));
            }
        }

        let bloom_path = path_of_bloom(dir);
        let bloom_file_size = tokio::fs::metadata(&bloom_path).await?.len();
        let bloom = BloomFilter::open(&bloom_path).await?;
        let key_index = columns[0].key_index().clone();
        if row_count > 0 && key_index.is_empty() {
            return Err(TracedStorageError::corruption(format!(
                "rowset {} has {} rows but no key index",
                dir.display(),
                row_count
            )));
        }

        Ok(Self {
            schema,
            columns,
            bloom,
            bloom_file_size,
            key_index,
            row_count,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn count_rows(&self) -> u32 {
        self.row_count
    }

    pub fn estimate_on_disk_size(&self) -> u64 {
        // Base files only; flushed delta files are deliberately not
        // counted here.
        self.columns
            .iter()
            .map(|column| column.on_disk_size())
            .sum::<u64>()
            + self.bloom_file_size
    }

    pub fn column(&self, column_idx: usize) -> Column {
        self.columns[column_idx].clone()
    }

    /// Consult the bloom filter, then the key index. A bloom negative
    /// answers with no further I/O; the key index is authoritative on a
    /// positive.
    pub async fn check_row_present(&self, probe: &KeyProbe<'_>) -> StorageResult<bool> {
        if !self.bloom.check_probe(probe.bloom_probe()) {
            return Ok(false);
        }
        match self.find_row(probe.encoded_key()).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Exact seek on the key index: resolve an encoded key to its rowid.
    pub async fn find_row(&self, encoded_key: &[u8]) -> StorageResult<u32> {
        let not_found = || TracedStorageError::not_found("key", format!("{:02x?}", encoded_key));
        let (start, end) = match self.key_index.candidate_range(encoded_key, self.row_count) {
            Some(range) => range,
            None => return Err(not_found()),
        };

        // Materialize the key columns of the candidate block range and
        // binary search the encoded keys.
        let keys = self.materialize_keys(start, end).await?;
        match keys.binary_search_by(|key| key.as_slice().cmp(encoded_key)) {
            Ok(pos) => Ok(start + pos as u32),
            Err(_) => Err(not_found()),
        }
    }

    async fn materialize_keys(&self, start: u32, end: u32) -> StorageResult<Vec<Vec<u8>>> {
        let count = (end - start) as usize;
        let mut key_arrays: Vec<ArrayImpl> = vec![];
        for column_idx in 0..self.schema.num_key_columns() {
            let mut iter = ColumnIteratorImpl::new(
                self.columns[column_idx].clone(),
                self.schema.column(column_idx).datatype(),
                start,
            )
            .await?;
            let (_, array) = iter
                .next_batch(Some(count))
                .await?
                .expect("key range out of bounds");
            assert_eq!(array.len(), count);
            key_arrays.push(array);
        }

        Ok((0..count)
            .map(|row| {
                let values: Vec<Value> =
                    key_arrays.iter().map(|array| array.value(row)).collect();
                self.schema
                    .encode_key(&values)
                    .expect("stored key does not match schema")
            })
            .collect())
    }

    /// A columnwise iterator over the base image, materializing only the
    /// projected columns, in rowid order.
    pub async fn new_iterator(&self, projection: Arc<[usize]>) -> StorageResult<BaseDataIterator> {
        BaseDataIterator::new(self, projection, 0).await
    }
}

/// Yields the projected base columns block by block, in rowid order.
pub struct BaseDataIterator {
    column_iterators: Vec<ColumnIteratorImpl>,
}

impl BaseDataIterator {
    async fn new(
        base: &BaseData,
        projection: Arc<[usize]>,
        start_rowid: u32,
    ) -> StorageResult<Self> {
        assert!(!projection.is_empty(), "no column to iterate");
        let mut column_iterators = vec![];
        for &column_idx in projection.iter() {
            column_iterators.push(
                ColumnIteratorImpl::new(
                    base.column(column_idx),
                    base.schema.column(column_idx).datatype(),
                    start_rowid,
                )
                .await?,
            );
        }
        Ok(Self { column_iterators })
    }

    /// Fetch the next batch of projected columns. All arrays share the
    /// same rowid range.
    pub async fn next_batch(
        &mut self,
        expected_size: Option<usize>,
    ) -> StorageResult<Option<(u32, Vec<ArrayImpl>)>> {
        let fetch_size = if let Some(x) = expected_size {
            x
        } else {
            // Dispatch as little I/O as possible: take the minimum fetch
            // hint over the column iterators.
            let mut min = None;
            for iter in &self.column_iterators {
                let hint = iter.fetch_hint();
                if hint != 0 {
                    min = Some(min.map_or(hint, |m: usize| m.min(hint)));
                }
            }
            match min {
                Some(min) => min,
                None => 65536,
            }
        };

        let mut arrays = vec![];
        let mut common_chunk_range: Option<(u32, usize)> = None;
        for iter in &mut self.column_iterators {
            match iter.next_batch(Some(fetch_size)).await? {
                Some((rowid, array)) => {
                    if let Some(range) = common_chunk_range {
                        assert_eq!(
                            range,
                            (rowid, array.len()),
                            "unmatched rowid range from column iterator"
                        );
                    }
                    common_chunk_range = Some((rowid, array.len()));
                    arrays.push(array);
                }
                None => return Ok(None),
            }
        }

        match common_chunk_range {
            Some((first_rowid, _)) => Ok(Some((first_rowid, arrays))),
            None => Ok(None),
        }
    }
}
