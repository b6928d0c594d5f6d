// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use itertools::Itertools;

use crate::array::DataChunk;
use crate::bloom::BloomFilterBuilder;
use crate::column::ColumnBuilderImpl;
use crate::error::StorageResult;
use crate::index::KeyIndexEntry;
use crate::index_builder::IndexBuilder;
use crate::options::ColumnBuilderOptions;
use crate::schema::Schema;

/// One encoded column file: blocks, index regions and footer.
pub struct EncodedColumn {
    pub data: Vec<u8>,
}

/// In-memory encoded form of a complete rowset, ready to be piped to a
/// directory by the writer.
pub struct EncodedRowset {
    pub size: usize,
    pub columns: Vec<EncodedColumn>,
    pub bloom: Vec<u8>,
}

impl EncodedRowset {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Builds the columnar base image of a rowset from [`DataChunk`]s.
///
/// Rowids are assigned in arrival order; callers intending a sorted base
/// deliver rows in ascending encoded-key order. The builder also encodes
/// every row's composite key, feeding the bloom filter and the sparse key
/// index that is embedded in the first key column's file.
pub struct RowsetBuilder {
    /// Schema of the rowset.
    schema: Arc<Schema>,

    /// Column data builders.
    builders: Vec<ColumnBuilderImpl>,

    /// Encoded composite key of every row appended so far.
    encoded_keys: Vec<Vec<u8>>,

    /// Count of rows in this rowset.
    row_cnt: u32,

    /// Column builder options.
    options: ColumnBuilderOptions,
}

impl RowsetBuilder {
    pub fn new(schema: Arc<Schema>, options: ColumnBuilderOptions) -> Self {
        Self {
            builders: schema
                .columns()
                .iter()
                .map(|column| ColumnBuilderImpl::new_from_datatype(column.datatype(), &options))
                .collect_vec(),
            schema,
            encoded_keys: vec![],
            row_cnt: 0,
            options,
        }
    }

    /// Append a chunk. Returns `InvalidArgument` if it does not match the
    /// schema.
    pub fn append(&mut self, chunk: DataChunk) -> StorageResult<()> {
        self.schema.check_chunk(&chunk)?;

        for row in 0..chunk.cardinality() {
            self.encoded_keys.push(self.schema.encode_key_of_row(&chunk, row));
        }
        self.row_cnt += chunk.cardinality() as u32;
        for idx in 0..chunk.column_count() {
            self.builders[idx].append(chunk.array_at(idx));
        }
        Ok(())
    }

    pub fn row_count(&self) -> u32 {
        self.row_cnt
    }

    pub fn finish(self) -> EncodedRowset {
        let checksum_type = self.options.checksum_type;

        let mut bloom_builder = BloomFilterBuilder::new(
            self.options.bloom_sizing,
            self.encoded_keys.len(),
            checksum_type,
        );
        for key in &self.encoded_keys {
            bloom_builder.append_key(key);
        }

        EncodedRowset {
            size: self.row_cnt as usize,
            bloom: bloom_builder.finish(),
            columns: self
                .builders
                .into_iter()
                .enumerate()
                .map(|(col_idx, builder)| {
                    let (block_indices, mut data) = builder.finish();

                    let mut index_builder = IndexBuilder::new(checksum_type);
                    for index in &block_indices {
                        index_builder.append(index);
                    }
                    // The first key column also carries the sparse key
                    // index: the composite key at each of its block
                    // boundaries.
                    if col_idx == 0 {
                        for index in &block_indices {
                            index_builder.append_key(&KeyIndexEntry {
                                first_rowid: index.first_rowid,
                                key: self.encoded_keys[index.first_rowid as usize].clone(),
                            });
                        }
                    }
                    data.extend(index_builder.finish());

                    EncodedColumn { data }
                })
                .collect_vec(),
        }
    }
}
