// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

//! Blocks: the unit of column file I/O.
//!
//! A column file body is a sequence of self-describing frames. Each frame
//! opens with a fixed header and carries one encoded run of values:
//!
//! ```plain
//! | checksum (8B) | block type (1B) | checksum type (1B) | row count (4B) | payload |
//! ```
//!
//! The checksum covers everything after its own field, so a frame is
//! verified before any of it is interpreted. Because the row count rides
//! in the header, a frame can be iterated without consulting the block
//! index that located it.

mod bytes_block_builder;
mod bytes_block_iterator;
mod primitive_block_builder;
mod primitive_block_iterator;

pub use bytes_block_builder::*;
pub use bytes_block_iterator::*;
use bytes::{Buf, Bytes};
pub use primitive_block_builder::*;
pub use primitive_block_iterator::*;

use crate::array::Array;
use crate::checksum::ChecksumType;
use crate::error::{StorageResult, TracedStorageError};

/// Loaded block contents, reference-counted for the cache.
pub type Block = Bytes;

pub const BLOCK_HEADER_SIZE: usize = 8 + 1 + 1 + 4;

/// Accumulates values for one block payload.
///
/// A builder has a capacity derived from the target block size. `try_push`
/// refuses an item only when the block is full, and never refuses the
/// first item, so oversized single values still land somewhere.
pub trait BlockBuilder<A: Array> {
    /// Offer one item. `false` means the block is full and the item must
    /// open a new block.
    fn try_push(&mut self, item: &A::Item) -> bool;

    /// Items accepted so far.
    fn row_count(&self) -> usize;

    /// Encode the payload. The frame header is written by the column
    /// builder that seals the block.
    fn finish(self) -> Vec<u8>;
}

/// Decodes values back out of one block payload, front to back.
pub trait BlockIterator<A: Array> {
    /// Move up to `limit` items into the builder, returning how many were
    /// moved. `0` means the block is drained.
    fn fill(&mut self, builder: &mut A::Builder, limit: usize) -> usize;

    /// Step over `cnt` items without decoding them into an array.
    fn skip(&mut self, cnt: usize);

    /// Items left in this block.
    fn remaining(&self) -> usize;
}

/// Identifies one block of one column of one rowset in the shared cache.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct BlockCacheKey {
    pub rowset_id: u32,
    pub column_id: u32,
    pub block_id: u32,
}

impl BlockCacheKey {
    pub fn new(rowset_id: u32, column_id: u32) -> Self {
        Self {
            rowset_id,
            column_id,
            block_id: 0,
        }
    }

    pub fn with_block(&self, block_id: u32) -> Self {
        Self {
            rowset_id: self.rowset_id,
            column_id: self.column_id,
            block_id,
        }
    }
}

/// Payload encoding of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Plain = 1,
    PlainBytes = 2,
}

impl BlockType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Plain),
            2 => Some(Self::PlainBytes),
            _ => None,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub checksum: u64,
    pub block_type: BlockType,
    pub checksum_type: ChecksumType,
    pub row_count: u32,
}

impl BlockHeader {
    pub fn decode(buf: &mut impl Buf) -> StorageResult<Self> {
        if buf.remaining() < BLOCK_HEADER_SIZE {
            return Err(TracedStorageError::decode("truncated block header"));
        }
        let checksum = buf.get_u64();
        let block_type = BlockType::from_u8(buf.get_u8())
            .ok_or_else(|| TracedStorageError::decode("unknown block type"))?;
        let checksum_type = ChecksumType::from_u8(buf.get_u8())
            .ok_or_else(|| TracedStorageError::decode("unknown checksum type"))?;
        let row_count = buf.get_u32();
        Ok(Self {
            checksum,
            block_type,
            checksum_type,
            row_count,
        })
    }
}
