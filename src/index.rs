// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::checksum::{verify_checksum, ChecksumType};
use crate::error::{StorageResult, TracedStorageError};
use crate::index_builder::{COLUMN_FOOTER_SIZE, COLUMN_INDEX_MAGIC};

/// Location of one block inside a column file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndex {
    pub offset: u64,
    pub length: u64,
    pub first_rowid: u32,
    pub row_count: u32,
}

pub const BLOCK_INDEX_ENTRY_SIZE: usize = 8 + 8 + 4 + 4;

impl BlockIndex {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.offset);
        buf.put_u64(self.length);
        buf.put_u32(self.first_rowid);
        buf.put_u32(self.row_count);
    }

    pub fn decode(buf: &mut impl Buf) -> StorageResult<Self> {
        if buf.remaining() < BLOCK_INDEX_ENTRY_SIZE {
            return Err(TracedStorageError::decode("truncated block index entry"));
        }
        Ok(Self {
            offset: buf.get_u64(),
            length: buf.get_u64(),
            first_rowid: buf.get_u32(),
            row_count: buf.get_u32(),
        })
    }
}

/// One entry of the sparse key index: the encoded composite key of the
/// first row of a block of the first key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyIndexEntry {
    pub first_rowid: u32,
    pub key: Vec<u8>,
}

impl KeyIndexEntry {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.first_rowid);
        buf.put_u32(self.key.len() as u32);
        buf.put_slice(&self.key);
    }

    pub fn decode(buf: &mut impl Buf) -> StorageResult<Self> {
        if buf.remaining() < 8 {
            return Err(TracedStorageError::decode("truncated key index entry"));
        }
        let first_rowid = buf.get_u32();
        let key_len = buf.get_u32() as usize;
        if buf.remaining() < key_len {
            return Err(TracedStorageError::decode("truncated key index entry"));
        }
        let mut key = vec![0; key_len];
        buf.copy_to_slice(&mut key);
        Ok(Self { first_rowid, key })
    }
}

/// The block index of one column, ordered by rowid.
#[derive(Clone)]
pub struct ColumnIndex {
    indexes: Arc<[BlockIndex]>,
}

impl ColumnIndex {
    pub fn new(indexes: Vec<BlockIndex>) -> Self {
        Self {
            indexes: indexes.into(),
        }
    }

    pub fn index(&self, block_id: u32) -> &BlockIndex {
        &self.indexes[block_id as usize]
    }

    pub fn indexes(&self) -> &[BlockIndex] {
        &self.indexes
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Total number of rows in the column.
    pub fn row_count(&self) -> u32 {
        self.indexes
            .last()
            .map(|idx| idx.first_rowid + idx.row_count)
            .unwrap_or(0)
    }

    /// Find the block containing a row.
    pub fn block_of_row(&self, rowid: u32) -> u32 {
        // A row x is in block i if first_rowid[i] <= x < first_rowid[i+1],
        // so partition the blocks by `first_rowid <= x` and take the block
        // before the partition point.
        let pp = self
            .indexes
            .partition_point(|index| index.first_rowid <= rowid) as u32;
        assert!(pp > 0, "rowid {} before first block", rowid);
        pp - 1
    }
}

/// The sparse key index of a rowset, ordered by encoded key.
#[derive(Clone)]
pub struct KeyIndex {
    entries: Arc<[KeyIndexEntry]>,
}

impl KeyIndex {
    pub fn new(entries: Vec<KeyIndexEntry>) -> Self {
        Self {
            entries: entries.into(),
        }
    }

    pub fn entries(&self) -> &[KeyIndexEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rowid range `[start, end)` that may contain the given encoded key,
    /// or `None` if the key is out of the indexed key space. `row_count`
    /// bounds the final range.
    pub fn candidate_range(&self, encoded_key: &[u8], row_count: u32) -> Option<(u32, u32)> {
        if self.entries.is_empty() {
            return None;
        }
        // The candidate block is the last entry whose first key is <= the
        // probe key.
        let pp = self
            .entries
            .partition_point(|entry| entry.key.as_slice() <= encoded_key);
        if pp == 0 {
            return None;
        }
        let start = self.entries[pp - 1].first_rowid;
        let end = self
            .entries
            .get(pp)
            .map(|entry| entry.first_rowid)
            .unwrap_or(row_count);
        Some((start, end))
    }
}

/// Parse the index regions of a column file: `data` holds the block index
/// region followed by the key index region, `footer` the trailing
/// [`COLUMN_FOOTER_SIZE`] bytes of the file.
pub fn decode_column_index(
    mut data: &[u8],
    mut footer: &[u8],
) -> StorageResult<(ColumnIndex, KeyIndex)> {
    assert_eq!(footer.len(), COLUMN_FOOTER_SIZE);
    if footer.get_u32() != COLUMN_INDEX_MAGIC {
        return Err(TracedStorageError::decode(
            "failed to decode column index: invalid magic",
        ));
    }
    let index_len = footer.get_u64() as usize;
    let index_count = footer.get_u64() as usize;
    let key_index_count = footer.get_u64() as usize;
    let checksum_type = ChecksumType::from_i32(footer.get_i32())
        .ok_or_else(|| TracedStorageError::decode("invalid checksum type"))?;
    let checksum = footer.get_u64();

    if data.len() != index_len {
        return Err(TracedStorageError::decode("column index length mismatch"));
    }
    verify_checksum(checksum_type, data, checksum)?;

    let mut indexes = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        indexes.push(BlockIndex::decode(&mut data)?);
    }
    let mut entries = Vec::with_capacity(key_index_count);
    for _ in 0..key_index_count {
        entries.push(KeyIndexEntry::decode(&mut data)?);
    }
    if data.has_remaining() {
        return Err(TracedStorageError::decode("trailing bytes in column index"));
    }

    Ok((ColumnIndex::new(indexes), KeyIndex::new(entries)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(counts: &[u32]) -> ColumnIndex {
        let mut indexes = vec![];
        let mut first_rowid = 0;
        for &row_count in counts {
            indexes.push(BlockIndex {
                offset: 0,
                length: 0,
                first_rowid,
                row_count,
            });
            first_rowid += row_count;
        }
        ColumnIndex::new(indexes)
    }

    #[test]
    fn test_block_of_row() {
        let index = index_of(&[100, 50, 25]);
        assert_eq!(index.row_count(), 175);
        assert_eq!(index.block_of_row(0), 0);
        assert_eq!(index.block_of_row(99), 0);
        assert_eq!(index.block_of_row(100), 1);
        assert_eq!(index.block_of_row(149), 1);
        assert_eq!(index.block_of_row(150), 2);
        assert_eq!(index.block_of_row(174), 2);
    }

    #[test]
    fn test_candidate_range() {
        let entries = vec![
            KeyIndexEntry {
                first_rowid: 0,
                key: vec![10],
            },
            KeyIndexEntry {
                first_rowid: 100,
                key: vec![20],
            },
        ];
        let index = KeyIndex::new(entries);
        assert_eq!(index.candidate_range(&[5], 150), None);
        assert_eq!(index.candidate_range(&[10], 150), Some((0, 100)));
        assert_eq!(index.candidate_range(&[15], 150), Some((0, 100)));
        assert_eq!(index.candidate_range(&[20], 150), Some((100, 150)));
        assert_eq!(index.candidate_range(&[99], 150), Some((100, 150)));
    }
}
