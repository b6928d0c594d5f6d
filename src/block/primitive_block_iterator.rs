// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::marker::PhantomData;

use bytes::Buf;

use super::{Block, BlockIterator};
use crate::array::ArrayBuilder;
use crate::encode::PrimitiveFixedWidthEncode;

/// Streams fixed-width values out of a plain block payload. The payload
/// is consumed as a cursor; position is whatever has not been decoded or
/// skipped yet.
pub struct PlainPrimitiveBlockIterator<T: PrimitiveFixedWidthEncode> {
    payload: Block,
    left: usize,
    _marker: PhantomData<T>,
}

impl<T: PrimitiveFixedWidthEncode> PlainPrimitiveBlockIterator<T> {
    pub fn new(payload: Block, rows: usize) -> Self {
        Self {
            payload,
            left: rows,
            _marker: PhantomData,
        }
    }
}

impl<T: PrimitiveFixedWidthEncode> BlockIterator<T::ArrayType>
    for PlainPrimitiveBlockIterator<T>
{
    fn fill(
        &mut self,
        builder: &mut <T::ArrayType as crate::array::Array>::Builder,
        limit: usize,
    ) -> usize {
        let take = self.left.min(limit);
        for _ in 0..take {
            builder.push(&T::decode(&mut self.payload));
        }
        self.left -= take;
        take
    }

    fn skip(&mut self, cnt: usize) {
        let step = self.left.min(cnt);
        self.payload.advance(step * T::WIDTH);
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
    use crate::array::{Array, ArrayBuilder, UInt32ArrayBuilder};
    use crate::block::{BlockBuilder, PlainPrimitiveBlockBuilder};

    #[test]
    fn test_fill_and_skip() {
        let mut builder = PlainPrimitiveBlockBuilder::<u32>::new(128);
        for value in 10..15u32 {
            assert!(builder.try_push(&value));
        }
        let payload = Bytes::from(builder.finish());

        let mut iter = PlainPrimitiveBlockIterator::<u32>::new(payload, 5);
        iter.skip(2);
        assert_eq!(iter.remaining(), 3);

        let mut out = UInt32ArrayBuilder::with_capacity(3);
        assert_eq!(iter.fill(&mut out, 2), 2);
        assert_eq!(iter.fill(&mut out, usize::MAX), 1);
        assert_eq!(iter.fill(&mut out, usize::MAX), 0);

        let array = out.finish();
        assert_eq!(array.get(0), &12);
        assert_eq!(array.get(2), &14);
    }
}
