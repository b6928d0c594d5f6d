// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use bytes::Buf;

use super::{Block, BlockIterator};
use crate::array::{ArrayBuilder, Utf8Array, Utf8ArrayBuilder};

/// Streams strings out of a length-prefixed bytes block. Each record is
/// split off the front of the payload cursor; skipping advances past
/// records without materializing them.
pub struct PlainBytesBlockIterator {
    payload: Block,
    left: usize,
}

impl PlainBytesBlockIterator {
    pub fn new(payload: Block, rows: usize) -> Self {
        Self {
            payload,
            left: rows,
        }
    }

    fn record_len(&mut self) -> usize {
        self.payload.get_u32_le() as usize
    }
}

impl BlockIterator<Utf8Array> for PlainBytesBlockIterator {
    fn fill(&mut self, builder: &mut Utf8ArrayBuilder, limit: usize) -> usize {
        let mut moved = 0;
        while moved < limit && self.left > 0 {
            let len = self.record_len();
            let bytes = self.payload.split_to(len);
            builder.push(std::str::from_utf8(&bytes).expect("invalid utf8 in block"));
            moved += 1;
            self.left -= 1;
        }
        moved
    }

    fn skip(&mut self, cnt: usize) {
        let step = self.left.min(cnt);
        for _ in 0..step {
            let len = self.record_len();
            self.payload.advance(len);
        }
        self.left -= step;
    }

    fn remaining(&self) -> usize {
        self.left
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::array::Array;
    use crate::block::{BlockBuilder, PlainBytesBlockBuilder};

    #[test]
    fn test_fill_and_skip() {
        let mut builder = PlainBytesBlockBuilder::new(128);
        for value in ["one", "", "three", "four"] {
            assert!(builder.try_push(value));
        }
        let payload = Bytes::from(builder.finish());

        let mut iter = PlainBytesBlockIterator::new(payload, 4);
        let mut out = Utf8ArrayBuilder::with_capacity(4);
        assert_eq!(iter.fill(&mut out, 2), 2);
        iter.skip(1);
        assert_eq!(iter.remaining(), 1);
        assert_eq!(iter.fill(&mut out, usize::MAX), 1);
        assert_eq!(iter.fill(&mut out, usize::MAX), 0);

        let array = out.finish();
        assert_eq!(array.get(0), "one");
        assert_eq!(array.get(1), "");
        assert_eq!(array.get(2), "four");
    }
}
