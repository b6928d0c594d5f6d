// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use bytes::{Buf, BufMut};

use crate::error::{StorageResult, TracedStorageError};
use crate::mvcc::TxId;
use crate::schema::Schema;
use crate::types::{DataType, Value};

/// Sort key of a delta record. Deltas for one row apply in ascending txid
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeltaKey {
    pub rowid: u32,
    pub txid: TxId,
}

/// One recorded change to a base row: a per-column update list or a
/// delete marker. Updates never touch key columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowChange {
    Update(Vec<(usize, Value)>),
    Delete,
}

impl RowChange {
    pub fn update(columns: Vec<(usize, Value)>) -> Self {
        Self::Update(columns)
    }

    pub fn delete() -> Self {
        Self::Delete
    }

    /// Validate a change against a schema: only existing, non-key columns
    /// with matching value types may be touched.
    pub fn validate(&self, schema: &Schema) -> StorageResult<()> {
        let columns = match self {
            Self::Delete => return Ok(()),
            Self::Update(columns) => columns,
        };
        if columns.is_empty() {
            return Err(TracedStorageError::invalid_argument("empty update"));
        }
        for (col_idx, value) in columns {
            if *col_idx >= schema.num_columns() {
                return Err(TracedStorageError::invalid_argument(format!(
                    "update targets column {} of {}",
                    col_idx,
                    schema.num_columns()
                )));
            }
            if schema.is_key_column(*col_idx) {
                return Err(TracedStorageError::invalid_argument(format!(
                    "update targets key column {}",
                    col_idx
                )));
            }
            if value.datatype() != schema.column(*col_idx).datatype() {
                return Err(TracedStorageError::invalid_argument(format!(
                    "update value for column {} is {:?}, schema expects {:?}",
                    col_idx,
                    value.datatype(),
                    schema.column(*col_idx).datatype()
                )));
            }
        }
        Ok(())
    }

    /// Fold a newer change for the same `(rowid, txid)` into this one.
    pub fn merge(&mut self, newer: &RowChange) {
        match (&mut *self, newer) {
            (_, RowChange::Delete) => *self = RowChange::Delete,
            (RowChange::Delete, RowChange::Update(_)) => *self = newer.clone(),
            (RowChange::Update(mine), RowChange::Update(theirs)) => {
                for (col_idx, value) in theirs {
                    match mine.iter_mut().find(|(mine_idx, _)| mine_idx == col_idx) {
                        Some((_, slot)) => *slot = value.clone(),
                        None => mine.push((*col_idx, value.clone())),
                    }
                }
            }
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Update(columns) => {
                buf.put_u8(1);
                buf.put_u16(columns.len() as u16);
                for (col_idx, value) in columns {
                    buf.put_u32(*col_idx as u32);
                    match value {
                        Value::UInt32(v) => buf.put_u32_le(*v),
                        Value::UInt64(v) => buf.put_u64_le(*v),
                        Value::Utf8(v) => {
                            buf.put_u32_le(v.len() as u32);
                            buf.put_slice(v.as_bytes());
                        }
                    }
                }
            }
            Self::Delete => buf.put_u8(2),
        }
    }

    pub fn decode(buf: &mut &[u8], schema: &Schema) -> StorageResult<Self> {
        if !buf.has_remaining() {
            return Err(TracedStorageError::decode("truncated delta change"));
        }
        match buf.get_u8() {
            1 => {
                if buf.remaining() < 2 {
                    return Err(TracedStorageError::decode("truncated delta change"));
                }
                let ncols = buf.get_u16() as usize;
                let mut columns = Vec::with_capacity(ncols);
                for _ in 0..ncols {
                    if buf.remaining() < 4 {
                        return Err(TracedStorageError::decode("truncated delta change"));
                    }
                    let col_idx = buf.get_u32() as usize;
                    if col_idx >= schema.num_columns() {
                        return Err(TracedStorageError::decode(format!(
                            "delta targets column {} of {}",
                            col_idx,
                            schema.num_columns()
                        )));
                    }
                    let value = match schema.column(col_idx).datatype() {
                        DataType::UInt32 => {
                            if buf.remaining() < 4 {
                                return Err(TracedStorageError::decode("truncated delta value"));
                            }
                            Value::UInt32(buf.get_u32_le())
                        }
                        DataType::UInt64 => {
                            if buf.remaining() < 8 {
                                return Err(TracedStorageError::decode("truncated delta value"));
                            }
                            Value::UInt64(buf.get_u64_le())
                        }
                        DataType::Utf8 => {
                            if buf.remaining() < 4 {
                                return Err(TracedStorageError::decode("truncated delta value"));
                            }
                            let len = buf.get_u32_le() as usize;
                            if buf.remaining() < len {
                                return Err(TracedStorageError::decode("truncated delta value"));
                            }
                            let mut bytes = vec![0; len];
                            buf.copy_to_slice(&mut bytes);
                            Value::Utf8(String::from_utf8(bytes).map_err(|_| {
                                TracedStorageError::decode("delta value is not valid utf8")
                            })?)
                        }
                    };
                    columns.push((col_idx, value));
                }
                Ok(Self::Update(columns))
            }
            2 => Ok(Self::Delete),
            tag => Err(TracedStorageError::decode(format!(
                "invalid delta change tag {}",
                tag
            ))),
        }
    }
}

impl std::fmt::Display for RowChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "DELETE"),
            Self::Update(columns) => {
                write!(f, "SET ")?;
                for (i, (col_idx, value)) in columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "col {}={}", col_idx, value)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDesc;

    fn schema() -> Schema {
        Schema::new(
            vec![
                ColumnDesc::new("k", DataType::UInt32),
                ColumnDesc::new("v", DataType::UInt32),
                ColumnDesc::new("s", DataType::Utf8),
            ],
            1,
        )
    }

    #[test]
    fn test_validate_rejects_key_column() {
        let schema = schema();
        let change = RowChange::update(vec![(0, Value::UInt32(1))]);
        assert!(change.validate(&schema).is_err());
        let change = RowChange::update(vec![(1, Value::UInt32(1))]);
        assert!(change.validate(&schema).is_ok());
        let change = RowChange::update(vec![(1, Value::Utf8("x".into()))]);
        assert!(change.validate(&schema).is_err());
    }

    #[test]
    fn test_encode_decode() {
        let schema = schema();
        for change in [
            RowChange::delete(),
            RowChange::update(vec![(1, Value::UInt32(42)), (2, Value::Utf8("hi".into()))]),
        ] {
            let mut buf = vec![];
            change.encode(&mut buf);
            let mut slice = &buf[..];
            assert_eq!(RowChange::decode(&mut slice, &schema).unwrap(), change);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn test_merge() {
        let mut change = RowChange::update(vec![(1, Value::UInt32(1))]);
        change.merge(&RowChange::update(vec![
            (1, Value::UInt32(2)),
            (2, Value::Utf8("x".into())),
        ]));
        assert_eq!(
            change,
            RowChange::update(vec![(1, Value::UInt32(2)), (2, Value::Utf8("x".into()))])
        );
        change.merge(&RowChange::delete());
        assert_eq!(change, RowChange::Delete);
    }
}
