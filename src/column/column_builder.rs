// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use bytes::BufMut;

use crate::array::{Array, ArrayImpl, UInt32Array, UInt64Array, Utf8Array};
use crate::block::{
    BlockBuilder, BlockType, PlainBytesBlockBuilder, PlainPrimitiveBlockBuilder,
    BLOCK_HEADER_SIZE,
};
use crate::checksum::{build_checksum, ChecksumType};
use crate::index::BlockIndex;
use crate::options::ColumnBuilderOptions;
use crate::types::DataType;

/// Builds one column file body. The builder feeds values to a block
/// builder until it reports itself full, then seals the block: the frame
/// header (checksum first, then type, checksum type and row count) is
/// written in front of the payload and an index entry is recorded.
pub trait ColumnBuilder<A: Array> {
    /// Append an array to the column, sealing blocks as they fill up.
    fn append(&mut self, array: &A);

    /// Seal the trailing block and return the index entries with the
    /// encoded block frames.
    fn finish(self) -> (Vec<BlockIndex>, Vec<u8>);
}

/// Column builder over one concrete block builder type.
pub struct ConcreteColumnBuilder<A: Array, B: BlockBuilder<A>> {
    /// Sealed block frames.
    buf: Vec<u8>,

    /// Index entries of the sealed blocks.
    indexes: Vec<BlockIndex>,

    /// Block currently being filled.
    current: Option<B>,

    /// Rows in sealed blocks; the first rowid of the next seal.
    rows_sealed: u32,

    block_type: BlockType,
    checksum_type: ChecksumType,
    target_block_size: usize,
    make_builder: fn(usize) -> B,

    _marker: std::marker::PhantomData<A>,
}

impl<A: Array, B: BlockBuilder<A>> ConcreteColumnBuilder<A, B> {
    pub fn new(
        options: &ColumnBuilderOptions,
        block_type: BlockType,
        make_builder: fn(usize) -> B,
    ) -> Self {
        Self {
            buf: vec![],
            indexes: vec![],
            current: None,
            rows_sealed: 0,
            block_type,
            checksum_type: options.checksum_type,
            target_block_size: options.target_block_size,
            make_builder,
            _marker: std::marker::PhantomData,
        }
    }

    /// Freeze the current block into a frame and record its index entry.
    fn seal(&mut self) {
        let builder = match self.current.take() {
            Some(builder) => builder,
            None => return,
        };
        let rows = builder.row_count() as u32;
        let payload = builder.finish();

        let offset = self.buf.len() as u64;
        let mut frame = Vec::with_capacity(BLOCK_HEADER_SIZE + payload.len());
        frame.put_u64(0); // checksum, patched once the frame is complete
        frame.put_u8(self.block_type as u8);
        frame.put_u8(self.checksum_type as u8);
        frame.put_u32(rows);
        frame.extend_from_slice(&payload);
        let checksum = build_checksum(self.checksum_type, &frame[8..]);
        frame[..8].copy_from_slice(&checksum.to_be_bytes());

        self.indexes.push(BlockIndex {
            offset,
            length: frame.len() as u64,
            first_rowid: self.rows_sealed,
            row_count: rows,
        });
        self.rows_sealed += rows;
        self.buf.extend_from_slice(&frame);
    }
}

impl<A: Array, B: BlockBuilder<A>> ColumnBuilder<A> for ConcreteColumnBuilder<A, B> {
    fn append(&mut self, array: &A) {
        for idx in 0..array.len() {
            let item = array.get(idx);
            loop {
                let make_builder = self.make_builder;
                let target_block_size = self.target_block_size;
                let builder = self
                    .current
                    .get_or_insert_with(|| make_builder(target_block_size));
                if builder.try_push(item) {
                    break;
                }
                self.seal();
            }
        }
    }

    fn finish(mut self) -> (Vec<BlockIndex>, Vec<u8>) {
        self.seal();
        (self.indexes, self.buf)
    }
}

pub type UInt32ColumnBuilder = ConcreteColumnBuilder<UInt32Array, PlainPrimitiveBlockBuilder<u32>>;
pub type UInt64ColumnBuilder = ConcreteColumnBuilder<UInt64Array, PlainPrimitiveBlockBuilder<u64>>;
pub type Utf8ColumnBuilder = ConcreteColumnBuilder<Utf8Array, PlainBytesBlockBuilder>;

/// [`ColumnBuilder`] of all types.
pub enum ColumnBuilderImpl {
    UInt32(UInt32ColumnBuilder),
    UInt64(UInt64ColumnBuilder),
    Utf8(Utf8ColumnBuilder),
}

impl ColumnBuilderImpl {
    pub fn new_from_datatype(datatype: DataType, options: &ColumnBuilderOptions) -> Self {
        match datatype {
            DataType::UInt32 => Self::UInt32(ConcreteColumnBuilder::new(
                options,
                BlockType::Plain,
                PlainPrimitiveBlockBuilder::new,
            )),
            DataType::UInt64 => Self::UInt64(ConcreteColumnBuilder::new(
                options,
                BlockType::Plain,
                PlainPrimitiveBlockBuilder::new,
            )),
            DataType::Utf8 => Self::Utf8(ConcreteColumnBuilder::new(
                options,
                BlockType::PlainBytes,
                PlainBytesBlockBuilder::new,
            )),
        }
    }

    /// Append an array of the matching type. Chunks are schema-checked
    /// before they reach the builders, so a mismatch here is a logic
    /// error.
    pub fn append(&mut self, array: &ArrayImpl) {
        match (self, array) {
            (Self::UInt32(builder), ArrayImpl::UInt32(array)) => builder.append(array),
            (Self::UInt64(builder), ArrayImpl::UInt64(array)) => builder.append(array),
            (Self::Utf8(builder), ArrayImpl::Utf8(array)) => builder.append(array),
            (_, array) => panic!("column builder type mismatch: {:?}", array.datatype()),
        }
    }

    pub fn finish(self) -> (Vec<BlockIndex>, Vec<u8>) {
        match self {
            Self::UInt32(builder) => builder.finish(),
            Self::UInt64(builder) => builder.finish(),
            Self::Utf8(builder) => builder.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_seals_blocks() {
        let options = ColumnBuilderOptions::default_for_test();
        let mut builder = ColumnBuilderImpl::new_from_datatype(DataType::UInt32, &options);
        // 128-byte target and 4-byte items: 100 values span several blocks.
        builder.append(&ArrayImpl::UInt32((0..100u32).collect()));
        let (indexes, data) = builder.finish();
        assert!(indexes.len() > 1);
        assert_eq!(indexes.iter().map(|idx| idx.row_count).sum::<u32>(), 100);
        assert_eq!(indexes[1].first_rowid, indexes[0].row_count);
        assert_eq!(
            data.len() as u64,
            indexes.last().map(|idx| idx.offset + idx.length).unwrap()
        );
    }
}
