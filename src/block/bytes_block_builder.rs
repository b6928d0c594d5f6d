// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use bytes::BufMut;

use super::BlockBuilder;
use crate::array::Utf8Array;

/// Collects variable-width strings for one block. Each value is written
/// as a length-prefixed record, so the payload is a byte stream that can
/// be decoded with a plain cursor:
///
/// ```plain
/// | len (4B) | bytes | len (4B) | bytes | ...
/// ```
pub struct PlainBytesBlockBuilder {
    payload: Vec<u8>,
    rows: usize,
    target_size: usize,
}

impl PlainBytesBlockBuilder {
    pub fn new(target_size: usize) -> Self {
        Self {
            payload: Vec::with_capacity(target_size),
            rows: 0,
            target_size,
        }
    }
}

impl BlockBuilder<Utf8Array> for PlainBytesBlockBuilder {
    fn try_push(&mut self, item: &str) -> bool {
        let record_size = std::mem::size_of::<u32>() + item.len();
        if self.rows > 0 && self.payload.len() + record_size > self.target_size {
            return false;
        }
        self.payload.put_u32_le(item.len() as u32);
        self.payload.extend_from_slice(item.as_bytes());
        self.rows += 1;
        true
    }

    fn row_count(&self) -> usize {
        self.rows
    }

    fn finish(self) -> Vec<u8> {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefixed_payload() {
        let mut builder = PlainBytesBlockBuilder::new(128);
        for value in ["aa", "", "bee"] {
            assert!(builder.try_push(value));
        }
        assert_eq!(builder.row_count(), 3);
        // Three length prefixes plus five bytes of string data.
        assert_eq!(builder.finish().len(), 3 * 4 + 5);
    }

    #[test]
    fn test_full_block_refuses() {
        let mut builder = PlainBytesBlockBuilder::new(10);
        assert!(builder.try_push("abcdef"));
        assert!(!builder.try_push("g"));
        // A value larger than the whole target still opens a block.
        let mut builder = PlainBytesBlockBuilder::new(4);
        assert!(builder.try_push("much longer than the target"));
    }
}
