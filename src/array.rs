// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

//! In-memory columnar arrays.
//!
//! An [`Array`] stores values of one type contiguously. [`ArrayImpl`] and
//! [`ArrayBuilderImpl`] are the dynamically typed dispatch wrappers, and a
//! [`DataChunk`] bundles one array per column for a batch of rows.

use crate::types::{DataType, Value};

/// A collection of values of the same type.
pub trait Array: Sized + Send + Sync + 'static {
    /// Corresponding builder of this array.
    type Builder: ArrayBuilder<Array = Self>;

    /// Type of the item held by this array.
    type Item: ?Sized;

    fn get(&self, idx: usize) -> &Self::Item;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds an [`Array`] item by item.
pub trait ArrayBuilder: Send + Sync + 'static {
    type Array: Array<Builder = Self>;

    fn with_capacity(capacity: usize) -> Self;

    fn push(&mut self, item: &<Self::Array as Array>::Item);

    fn finish(self) -> Self::Array;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UInt32Array {
    data: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UInt64Array {
    data: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utf8Array {
    data: Vec<String>,
}

macro_rules! impl_primitive_array {
    ($array:ty, $builder:ident, $item:ty) => {
        impl Array for $array {
            type Builder = $builder;
            type Item = $item;

            fn get(&self, idx: usize) -> &$item {
                &self.data[idx]
            }

            fn len(&self) -> usize {
                self.data.len()
            }
        }

        impl FromIterator<$item> for $array {
            fn from_iter<I: IntoIterator<Item = $item>>(iter: I) -> Self {
                Self {
                    data: iter.into_iter().collect(),
                }
            }
        }

        pub struct $builder {
            data: Vec<$item>,
        }

        impl ArrayBuilder for $builder {
            type Array = $array;

            fn with_capacity(capacity: usize) -> Self {
                Self {
                    data: Vec::with_capacity(capacity),
                }
            }

            fn push(&mut self, item: &$item) {
                self.data.push(*item);
            }

            fn finish(self) -> $array {
                <$array>::from_iter(self.data)
            }
        }
    };
}

impl_primitive_array!(UInt32Array, UInt32ArrayBuilder, u32);
impl_primitive_array!(UInt64Array, UInt64ArrayBuilder, u64);

impl Array for Utf8Array {
    type Builder = Utf8ArrayBuilder;
    type Item = str;

    fn get(&self, idx: usize) -> &str {
        &self.data[idx]
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

impl<S: Into<String>> FromIterator<S> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().map(Into::into).collect(),
        }
    }
}

pub struct Utf8ArrayBuilder {
    data: Vec<String>,
}

impl ArrayBuilder for Utf8ArrayBuilder {
    type Array = Utf8Array;

    fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, item: &str) {
        self.data.push(item.to_string());
    }

    fn finish(self) -> Utf8Array {
        Utf8Array { data: self.data }
    }
}

/// Dynamically typed array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrayImpl {
    UInt32(UInt32Array),
    UInt64(UInt64Array),
    Utf8(Utf8Array),
}

impl ArrayImpl {
    pub fn len(&self) -> usize {
        match self {
            Self::UInt32(a) => a.len(),
            Self::UInt64(a) => a.len(),
            Self::Utf8(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn datatype(&self) -> DataType {
        match self {
            Self::UInt32(_) => DataType::UInt32,
            Self::UInt64(_) => DataType::UInt64,
            Self::Utf8(_) => DataType::Utf8,
        }
    }

    pub fn value(&self, idx: usize) -> Value {
        match self {
            Self::UInt32(a) => Value::UInt32(*a.get(idx)),
            Self::UInt64(a) => Value::UInt64(*a.get(idx)),
            Self::Utf8(a) => Value::Utf8(a.get(idx).to_string()),
        }
    }

    /// Overwrite one cell. Panics if the value type does not match; callers
    /// validate types against the schema before reaching the array.
    pub fn set(&mut self, idx: usize, value: &Value) {
        match (self, value) {
            (Self::UInt32(a), Value::UInt32(v)) => a.data[idx] = *v,
            (Self::UInt64(a), Value::UInt64(v)) => a.data[idx] = *v,
            (Self::Utf8(a), Value::Utf8(v)) => a.data[idx] = v.clone(),
            (arr, v) => panic!("cannot set {:?} cell to {:?}", arr.datatype(), v.datatype()),
        }
    }
}

/// Dynamically typed array builder.
pub enum ArrayBuilderImpl {
    UInt32(UInt32ArrayBuilder),
    UInt64(UInt64ArrayBuilder),
    Utf8(Utf8ArrayBuilder),
}

impl ArrayBuilderImpl {
    pub fn new(datatype: DataType) -> Self {
        Self::with_capacity(datatype, 0)
    }

    pub fn with_capacity(datatype: DataType, capacity: usize) -> Self {
        match datatype {
            DataType::UInt32 => Self::UInt32(UInt32ArrayBuilder::with_capacity(capacity)),
            DataType::UInt64 => Self::UInt64(UInt64ArrayBuilder::with_capacity(capacity)),
            DataType::Utf8 => Self::Utf8(Utf8ArrayBuilder::with_capacity(capacity)),
        }
    }

    /// Append a value of the matching type. Panics on mismatch; callers
    /// validate against the schema first.
    pub fn push(&mut self, value: &Value) {
        match (self, value) {
            (Self::UInt32(b), Value::UInt32(v)) => b.push(v),
            (Self::UInt64(b), Value::UInt64(v)) => b.push(v),
            (Self::Utf8(b), Value::Utf8(v)) => b.push(v),
            (_, v) => panic!("cannot push {:?} into builder", v.datatype()),
        }
    }

    /// Append all items of an array of the matching type.
    pub fn append(&mut self, array: &ArrayImpl) {
        match (self, array) {
            (Self::UInt32(b), ArrayImpl::UInt32(a)) => {
                for idx in 0..a.len() {
                    b.push(a.get(idx));
                }
            }
            (Self::UInt64(b), ArrayImpl::UInt64(a)) => {
                for idx in 0..a.len() {
                    b.push(a.get(idx));
                }
            }
            (Self::Utf8(b), ArrayImpl::Utf8(a)) => {
                for idx in 0..a.len() {
                    b.push(a.get(idx));
                }
            }
            (_, a) => panic!("cannot append {:?} array into builder", a.datatype()),
        }
    }

    pub fn finish(self) -> ArrayImpl {
        match self {
            Self::UInt32(b) => ArrayImpl::UInt32(b.finish()),
            Self::UInt64(b) => ArrayImpl::UInt64(b.finish()),
            Self::Utf8(b) => ArrayImpl::Utf8(b.finish()),
        }
    }
}

/// A batch of rows stored column-wise, one array per column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChunk {
    arrays: Vec<ArrayImpl>,
}

impl DataChunk {
    pub fn new(arrays: Vec<ArrayImpl>) -> Self {
        assert!(!arrays.is_empty(), "empty chunk");
        let cardinality = arrays[0].len();
        for array in &arrays {
            assert_eq!(array.len(), cardinality, "arrays of unequal length");
        }
        Self { arrays }
    }

    /// Build a chunk from row-major values, one `Vec<Value>` per row.
    pub fn from_rows(rows: &[Vec<Value>], datatypes: &[DataType]) -> Self {
        let mut builders = datatypes
            .iter()
            .map(|ty| ArrayBuilderImpl::with_capacity(*ty, rows.len()))
            .collect::<Vec<_>>();
        for row in rows {
            assert_eq!(row.len(), builders.len(), "row arity mismatch");
            for (builder, value) in builders.iter_mut().zip(row.iter()) {
                builder.push(value);
            }
        }
        Self::new(builders.into_iter().map(|b| b.finish()).collect())
    }

    pub fn cardinality(&self) -> usize {
        self.arrays[0].len()
    }

    pub fn column_count(&self) -> usize {
        self.arrays.len()
    }

    pub fn array_at(&self, idx: usize) -> &ArrayImpl {
        &self.arrays[idx]
    }

    pub fn arrays(&self) -> &[ArrayImpl] {
        &self.arrays
    }

    pub fn row_at(&self, idx: usize) -> Vec<Value> {
        self.arrays.iter().map(|a| a.value(idx)).collect()
    }
}

impl FromIterator<ArrayImpl> for DataChunk {
    fn from_iter<I: IntoIterator<Item = ArrayImpl>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_from_rows() {
        let chunk = DataChunk::from_rows(
            &[
                vec![Value::UInt32(1), Value::Utf8("a".into())],
                vec![Value::UInt32(2), Value::Utf8("b".into())],
            ],
            &[DataType::UInt32, DataType::Utf8],
        );
        assert_eq!(chunk.cardinality(), 2);
        assert_eq!(chunk.row_at(1), vec![Value::UInt32(2), Value::Utf8("b".into())]);
    }

    #[test]
    fn test_array_set() {
        let mut array = ArrayImpl::UInt32([1, 2, 3].into_iter().collect());
        array.set(1, &Value::UInt32(99));
        assert_eq!(array.value(1), Value::UInt32(99));
    }
}
