use bytes::BufMut;

use crate::checksum::{build_checksum, ChecksumType};
use crate::index::{BlockIndex, KeyIndexEntry};

pub const COLUMN_INDEX_MAGIC: u32 = 0x5349_4C43;
pub const COLUMN_FOOTER_SIZE: usize = 4 + 8 + 8 + 8 + 4 + 8;

/// Builds the trailing index regions of a column file.
///
/// A column file ends with the block index region, the key index region
/// (only populated for the first key column) and a fixed-size footer:
///
/// ```plain
/// | blocks... | block index | key index | magic (4B) | index len (8B) |
///   block count (8B) | key count (8B) | checksum type (4B) | checksum (8B) |
/// ```
pub struct IndexBuilder {
    data: Vec<u8>,
    cnt: usize,
    key_cnt: usize,
    checksum_type: ChecksumType,
}

impl IndexBuilder {
    pub fn new(checksum_type: ChecksumType) -> Self {
        Self {
            data: vec![],
            cnt: 0,
            key_cnt: 0,
            checksum_type,
        }
    }

    pub fn append(&mut self, index: &BlockIndex) {
        self.cnt += 1;
        index.encode(&mut self.data);
    }

    /// Key index entries must all be appended after the block index
    /// entries.
    pub fn append_key(&mut self, entry: &KeyIndexEntry) {
        self.key_cnt += 1;
        entry.encode(&mut self.data);
    }

    pub fn finish(self) -> Vec<u8> {
        let mut data = self.data;
        let index_len = data.len() as u64;
        let checksum = build_checksum(self.checksum_type, &data);

        data.put_u32(COLUMN_INDEX_MAGIC);
        data.put_u64(index_len);
        data.put_u64(self.cnt as u64);
        data.put_u64(self.key_cnt as u64);
        data.put_i32(self.checksum_type as i32);
        data.put_u64(checksum);

        data
    }
}
