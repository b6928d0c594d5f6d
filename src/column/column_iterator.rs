// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::marker::PhantomData;

use super::Column;
use crate::array::{Array, ArrayBuilder, ArrayImpl, UInt32Array, UInt64Array, Utf8Array};
use crate::block::{
    Block, BlockHeader, BlockIterator, PlainBytesBlockIterator, PlainPrimitiveBlockIterator,
};
use crate::encode::PrimitiveFixedWidthEncode;
use crate::error::StorageResult;
use crate::types::DataType;

/// Creates the block iterator matching a column's concrete type, stepped
/// past the first `skip` rows of the block.
pub trait BlockIteratorFactory<A: Array>: Send + Sync + 'static {
    /// The block iterator this factory produces for its array type.
    type BlockIteratorImpl: BlockIterator<A> + Send;

    fn seek(&self, block: Block, header: &BlockHeader, skip: usize) -> Self::BlockIteratorImpl;
}

pub struct PrimitiveBlockIteratorFactory<T: PrimitiveFixedWidthEncode> {
    _phantom: PhantomData<T>,
}

impl<T: PrimitiveFixedWidthEncode> PrimitiveBlockIteratorFactory<T> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: PrimitiveFixedWidthEncode> BlockIteratorFactory<T::ArrayType>
    for PrimitiveBlockIteratorFactory<T>
{
    type BlockIteratorImpl = PlainPrimitiveBlockIterator<T>;

    fn seek(&self, block: Block, header: &BlockHeader, skip: usize) -> Self::BlockIteratorImpl {
        let mut iter = PlainPrimitiveBlockIterator::new(block, header.row_count as usize);
        iter.skip(skip);
        iter
    }
}

pub struct BytesBlockIteratorFactory;

impl BlockIteratorFactory<Utf8Array> for BytesBlockIteratorFactory {
    type BlockIteratorImpl = PlainBytesBlockIterator;

    fn seek(&self, block: Block, header: &BlockHeader, skip: usize) -> Self::BlockIteratorImpl {
        let mut iter = PlainBytesBlockIterator::new(block, header.row_count as usize);
        iter.skip(skip);
        iter
    }
}

/// Walks one column's blocks in rowid order, loading each frame through
/// the block cache as iteration reaches it.
pub struct ConcreteColumnIterator<A: Array, F: BlockIteratorFactory<A>> {
    /// Column being scanned.
    column: Column,

    /// Block currently under the cursor.
    current_block_id: u32,

    /// Iterator over the current block; `None` once the column is
    /// exhausted.
    block_iterator: Option<F::BlockIteratorImpl>,

    /// Rowid of the next row to fetch.
    current_row_id: u32,

    /// Set when the last block has been drained.
    finished: bool,

    /// Builds a block iterator per loaded frame.
    factory: F,
}

impl<A: Array, F: BlockIteratorFactory<A>> ConcreteColumnIterator<A, F> {
    pub async fn new(column: Column, start_pos: u32, factory: F) -> StorageResult<Self> {
        if start_pos >= column.row_count() {
            return Ok(Self {
                column,
                current_block_id: 0,
                block_iterator: None,
                current_row_id: start_pos,
                finished: true,
                factory,
            });
        }
        let current_block_id = column.index().block_of_row(start_pos);
        let (header, block) = column.get_block(current_block_id).await?;
        let skip = start_pos - column.index().index(current_block_id).first_rowid;
        let block_iterator = Some(factory.seek(block, &header, skip as usize));
        Ok(Self {
            column,
            current_block_id,
            block_iterator,
            current_row_id: start_pos,
            finished: false,
            factory,
        })
    }

    pub async fn next_batch(
        &mut self,
        expected_size: Option<usize>,
    ) -> StorageResult<Option<(u32, A)>> {
        if self.finished {
            return Ok(None);
        }

        let capacity = if let Some(expected_size) = expected_size {
            expected_size
        } else {
            self.block_iterator
                .as_ref()
                .map(|iter| iter.remaining())
                .unwrap_or(0)
        };

        let mut builder = A::Builder::with_capacity(capacity);
        let mut total_cnt = 0;
        let first_row_id = self.current_row_id;

        loop {
            let limit = expected_size.map_or(usize::MAX, |x| x - total_cnt);
            let cnt = self
                .block_iterator
                .as_mut()
                .expect("no block iterator")
                .fill(&mut builder, limit);

            total_cnt += cnt;
            self.current_row_id += cnt as u32;

            if let Some(expected_size) = expected_size {
                if total_cnt >= expected_size {
                    break;
                }
            } else if total_cnt != 0 {
                break;
            }

            self.current_block_id += 1;
            if self.current_block_id as usize >= self.column.index().len() {
                self.finished = true;
                break;
            }

            let (header, block) = self.column.get_block(self.current_block_id).await?;
            self.block_iterator = Some(self.factory.seek(block, &header, 0));
        }

        if total_cnt == 0 {
            Ok(None)
        } else {
            Ok(Some((first_row_id, builder.finish())))
        }
    }

    /// How many rows the current block can still serve from memory.
    /// Batch sizing uses this to avoid dispatching extra I/O.
    pub fn fetch_hint(&self) -> usize {
        if self.finished {
            return 0;
        }
        self.block_iterator
            .as_ref()
            .map(|iter| iter.remaining())
            .unwrap_or(0)
    }
}

pub type UInt32ColumnIterator = ConcreteColumnIterator<UInt32Array, PrimitiveBlockIteratorFactory<u32>>;
pub type UInt64ColumnIterator = ConcreteColumnIterator<UInt64Array, PrimitiveBlockIteratorFactory<u64>>;
pub type Utf8ColumnIterator = ConcreteColumnIterator<Utf8Array, BytesBlockIteratorFactory>;

/// [`ConcreteColumnIterator`] of all types.
pub enum ColumnIteratorImpl {
    UInt32(UInt32ColumnIterator),
    UInt64(UInt64ColumnIterator),
    Utf8(Utf8ColumnIterator),
}

impl ColumnIteratorImpl {
    pub async fn new(column: Column, datatype: DataType, start_pos: u32) -> StorageResult<Self> {
        let iter = match datatype {
            DataType::UInt32 => Self::UInt32(
                ConcreteColumnIterator::new(column, start_pos, PrimitiveBlockIteratorFactory::new())
                    .await?,
            ),
            DataType::UInt64 => Self::UInt64(
                ConcreteColumnIterator::new(column, start_pos, PrimitiveBlockIteratorFactory::new())
                    .await?,
            ),
            DataType::Utf8 => Self::Utf8(
                ConcreteColumnIterator::new(column, start_pos, BytesBlockIteratorFactory).await?,
            ),
        };
        Ok(iter)
    }

    pub async fn next_batch(
        &mut self,
        expected_size: Option<usize>,
    ) -> StorageResult<Option<(u32, ArrayImpl)>> {
        let batch = match self {
            Self::UInt32(iter) => iter
                .next_batch(expected_size)
                .await?
                .map(|(rowid, array)| (rowid, ArrayImpl::UInt32(array))),
            Self::UInt64(iter) => iter
                .next_batch(expected_size)
                .await?
                .map(|(rowid, array)| (rowid, ArrayImpl::UInt64(array))),
            Self::Utf8(iter) => iter
                .next_batch(expected_size)
                .await?
                .map(|(rowid, array)| (rowid, ArrayImpl::Utf8(array))),
        };
        Ok(batch)
    }

    pub fn fetch_hint(&self) -> usize {
        match self {
            Self::UInt32(iter) => iter.fetch_hint(),
            Self::UInt64(iter) => iter.fetch_hint(),
            Self::Utf8(iter) => iter.fetch_hint(),
        }
    }
}
