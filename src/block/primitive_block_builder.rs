// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use super::BlockBuilder;
use crate::encode::PrimitiveFixedWidthEncode;

/// Collects fixed-width values for one block. Values are kept typed until
/// [`finish`](BlockBuilder::finish) lays them out as a little-endian
/// array, so capacity is a plain row budget computed once from the target
/// block size.
pub struct PlainPrimitiveBlockBuilder<T: PrimitiveFixedWidthEncode> {
    values: Vec<T>,
    max_rows: usize,
}

impl<T: PrimitiveFixedWidthEncode> PlainPrimitiveBlockBuilder<T> {
    pub fn new(target_size: usize) -> Self {
        let max_rows = (target_size / T::WIDTH).max(1);
        Self {
            values: Vec::with_capacity(max_rows),
            max_rows,
        }
    }
}

impl<T: PrimitiveFixedWidthEncode> BlockBuilder<T::ArrayType> for PlainPrimitiveBlockBuilder<T> {
    fn try_push(&mut self, item: &T) -> bool {
        if self.values.len() >= self.max_rows {
            return false;
        }
        self.values.push(*item);
        true
    }

    fn row_count(&self) -> usize {
        self.values.len()
    }

    fn finish(self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.values.len() * T::WIDTH);
        for value in &self.values {
            value.encode(&mut payload);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_budget() {
        // 8 bytes of target space hold two u32 values.
        let mut builder = PlainPrimitiveBlockBuilder::<u32>::new(8);
        assert!(builder.try_push(&1));
        assert!(builder.try_push(&2));
        assert!(!builder.try_push(&3));
        assert_eq!(builder.row_count(), 2);
        assert_eq!(builder.finish().len(), 8);
    }

    #[test]
    fn test_first_item_always_accepted() {
        let mut builder = PlainPrimitiveBlockBuilder::<u64>::new(1);
        assert!(builder.try_push(&7));
        assert!(!builder.try_push(&8));
    }
}
