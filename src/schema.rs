// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use crate::array::DataChunk;
use crate::error::{StorageResult, TracedStorageError};
use crate::keycode::{put_escaped_bytes, put_memcmpable_varint64};
use crate::types::{DataType, Value};

/// Description of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    name: String,
    datatype: DataType,
}

impl ColumnDesc {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }
}

/// An ordered sequence of typed columns, a prefix of which constitutes
/// the primary key. Within one rowset the schema is invariant.
///
/// The schema also owns the key encoding: the composite key of a row is
/// the concatenation of the order-preserving encodings of its key-prefix
/// columns, so that `memcmp` over encoded keys matches the tuple
/// comparison of the original keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<ColumnDesc>,
    num_key_columns: usize,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDesc>, num_key_columns: usize) -> Self {
        assert!(!columns.is_empty(), "schema without columns");
        assert!(
            (1..=columns.len()).contains(&num_key_columns),
            "key prefix out of range"
        );
        Self {
            columns,
            num_key_columns,
        }
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    pub fn column(&self, idx: usize) -> &ColumnDesc {
        &self.columns[idx]
    }

    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    pub fn is_key_column(&self, idx: usize) -> bool {
        idx < self.num_key_columns
    }

    /// Encode a key tuple into its byte-comparable form.
    ///
    /// Returns `InvalidArgument` if the tuple does not match the key
    /// prefix in arity or types.
    pub fn encode_key(&self, key: &[Value]) -> StorageResult<Vec<u8>> {
        if key.len() != self.num_key_columns {
            return Err(TracedStorageError::invalid_argument(format!(
                "key has {} columns, schema expects {}",
                key.len(),
                self.num_key_columns
            )));
        }
        let mut encoded = vec![];
        for (idx, value) in key.iter().enumerate() {
            if value.datatype() != self.columns[idx].datatype() {
                return Err(TracedStorageError::invalid_argument(format!(
                    "key column {} is {:?}, got {:?}",
                    idx,
                    self.columns[idx].datatype(),
                    value.datatype()
                )));
            }
            encode_key_value(&mut encoded, value);
        }
        Ok(encoded)
    }

    /// Encode the key of one row of a chunk. The chunk is assumed to be
    /// schema-checked already.
    pub fn encode_key_of_row(&self, chunk: &DataChunk, row: usize) -> Vec<u8> {
        let mut encoded = vec![];
        for col in 0..self.num_key_columns {
            encode_key_value(&mut encoded, &chunk.array_at(col).value(row));
        }
        encoded
    }

    /// Encode the key prefix of a row-major value slice covering the full
    /// schema.
    pub fn encode_key_of_values(&self, values: &[Value]) -> Vec<u8> {
        let mut encoded = vec![];
        for value in &values[..self.num_key_columns] {
            encode_key_value(&mut encoded, value);
        }
        encoded
    }

    /// Check a chunk against the schema.
    pub fn check_chunk(&self, chunk: &DataChunk) -> StorageResult<()> {
        if chunk.column_count() != self.num_columns() {
            return Err(TracedStorageError::invalid_argument(format!(
                "chunk has {} columns, schema expects {}",
                chunk.column_count(),
                self.num_columns()
            )));
        }
        for idx in 0..self.num_columns() {
            if chunk.array_at(idx).datatype() != self.columns[idx].datatype() {
                return Err(TracedStorageError::invalid_argument(format!(
                    "column {} is {:?}, chunk has {:?}",
                    idx,
                    self.columns[idx].datatype(),
                    chunk.array_at(idx).datatype()
                )));
            }
        }
        Ok(())
    }
}

fn encode_key_value(dst: &mut Vec<u8>, value: &Value) {
    match value {
        Value::UInt32(v) => put_memcmpable_varint64(dst, *v as u64),
        Value::UInt64(v) => put_memcmpable_varint64(dst, *v),
        Value::Utf8(v) => put_escaped_bytes(dst, v.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composite_schema() -> Schema {
        Schema::new(
            vec![
                ColumnDesc::new("region", DataType::UInt64),
                ColumnDesc::new("name", DataType::Utf8),
                ColumnDesc::new("count", DataType::UInt32),
            ],
            2,
        )
    }

    #[test]
    fn test_key_encoding_matches_tuple_order() {
        let schema = composite_schema();
        let keys: Vec<Vec<Value>> = [
            (0u64, ""),
            (0, "a"),
            (1, "a"),
            (1, "ab"),
            (1, "b"),
            (2, "a"),
            (255, ""),
            (256, ""),
            (70000, "zzz"),
        ]
        .into_iter()
        .map(|(region, name)| vec![Value::UInt64(region), Value::Utf8(name.into())])
        .collect();

        for a in &keys {
            for b in &keys {
                let ea = schema.encode_key(a).unwrap();
                let eb = schema.encode_key(b).unwrap();
                assert_eq!(a.cmp(b), ea.cmp(&eb), "order mismatch for {:?} vs {:?}", a, b);
                assert_eq!(a == b, ea == eb);
            }
        }
    }

    #[test]
    fn test_key_arity_and_type_check() {
        let schema = composite_schema();
        assert!(schema.encode_key(&[Value::UInt64(1)]).is_err());
        assert!(schema
            .encode_key(&[Value::UInt32(1), Value::Utf8("a".into())])
            .is_err());
    }
}
