// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use bytes::{Buf, BufMut};

use crate::array::{Array, UInt32Array, UInt64Array};

/// Encode a primitive value into a fixed-width buffer.
pub trait PrimitiveFixedWidthEncode: Copy + Clone + 'static + Send + Sync {
    /// Width of each element.
    const WIDTH: usize;

    type ArrayType: Array<Item = Self>;

    /// Encode the value to the end of the buffer.
    fn encode(&self, buffer: &mut impl BufMut);

    /// Decode a value from the front of the buffer.
    fn decode(buffer: &mut impl Buf) -> Self;
}

impl PrimitiveFixedWidthEncode for u32 {
    const WIDTH: usize = std::mem::size_of::<u32>();

    type ArrayType = UInt32Array;

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u32_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_u32_le()
    }
}

impl PrimitiveFixedWidthEncode for u64 {
    const WIDTH: usize = std::mem::size_of::<u64>();

    type ArrayType = UInt64Array;

    fn encode(&self, buffer: &mut impl BufMut) {
        buffer.put_u64_le(*self);
    }

    fn decode(buffer: &mut impl Buf) -> Self {
        buffer.get_u64_le()
    }
}
