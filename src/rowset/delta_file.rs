// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::path::Path;

use bytes::{Buf, BufMut};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::delta::{DeltaKey, RowChange};
use crate::checksum::{build_checksum, verify_checksum, ChecksumType};
use crate::error::{StorageResult, TracedStorageError};
use crate::schema::Schema;

const DELTA_FILE_MAGIC: u32 = 0x5349_4C44;
const DELTA_FOOTER_SIZE: usize = 4 + 8 + 4 + 8;

/// Write one delta file: records in `(rowid, txid)` order followed by a
/// footer with count and checksum.
///
/// ```plain
/// | record | ... | magic (4B) | count (8B) | checksum type (4B) | checksum (8B) |
/// ```
pub async fn write_delta_file(
    path: impl AsRef<Path>,
    records: &[(DeltaKey, RowChange)],
    checksum_type: ChecksumType,
) -> StorageResult<()> {
    debug_assert!(records.windows(2).all(|pair| pair[0].0 < pair[1].0));

    let mut data = vec![];
    for (key, change) in records {
        data.put_u32(key.rowid);
        data.put_u64(key.txid);
        change.encode(&mut data);
    }
    let checksum = build_checksum(checksum_type, &data);
    data.put_u32(DELTA_FILE_MAGIC);
    data.put_u64(records.len() as u64);
    data.put_i32(checksum_type as i32);
    data.put_u64(checksum);

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path.as_ref())
        .await?;
    file.write_all(&data).await?;
    file.sync_data().await?;
    Ok(())
}

/// An immutable, sorted collection of delta records read back from one
/// `delta_<k>` file.
#[derive(Debug)]
pub struct DeltaFileReader {
    delta_id: u32,
    records: Vec<(DeltaKey, RowChange)>,
}

impl DeltaFileReader {
    /// Read a delta file fully into memory, verifying its checksum, sort
    /// order and rowid range against the base.
    pub async fn open(
        delta_id: u32,
        path: impl AsRef<Path>,
        schema: &Schema,
        base_rows: u32,
    ) -> StorageResult<Self> {
        let mut data = Vec::new();
        tokio::fs::File::open(path.as_ref())
            .await?
            .read_to_end(&mut data)
            .await?;

        if data.len() < DELTA_FOOTER_SIZE {
            return Err(TracedStorageError::corruption(format!(
                "delta file {} too small",
                path.as_ref().display()
            )));
        }
        let body = &data[..data.len() - DELTA_FOOTER_SIZE];
        let mut footer = &data[data.len() - DELTA_FOOTER_SIZE..];
        if footer.get_u32() != DELTA_FILE_MAGIC {
            return Err(TracedStorageError::decode(
                "failed to decode delta file: invalid magic",
            ));
        }
        let count = footer.get_u64() as usize;
        let checksum_type = ChecksumType::from_i32(footer.get_i32())
            .ok_or_else(|| TracedStorageError::decode("invalid checksum type"))?;
        let checksum = footer.get_u64();
        verify_checksum(checksum_type, body, checksum)?;

        let mut buf = body;
        let mut records = Vec::with_capacity(count);
        for _ in 0..count {
            if buf.remaining() < 12 {
                return Err(TracedStorageError::decode("truncated delta record"));
            }
            let rowid = buf.get_u32();
            let txid = buf.get_u64();
            let change = RowChange::decode(&mut buf, schema)?;
            records.push((DeltaKey { rowid, txid }, change));
        }
        if buf.has_remaining() {
            return Err(TracedStorageError::decode("trailing bytes in delta file"));
        }

        // The file is immutable and produced sorted; anything else is
        // corruption, as is a record outside the base's rowid range.
        if !records.windows(2).all(|pair| pair[0].0 < pair[1].0) {
            return Err(TracedStorageError::corruption(format!(
                "delta file {} is not sorted",
                path.as_ref().display()
            )));
        }
        if let Some((key, _)) = records.iter().find(|(key, _)| key.rowid >= base_rows) {
            return Err(TracedStorageError::corruption(format!(
                "delta file {} references rowid {} beyond base of {} rows",
                path.as_ref().display(),
                key.rowid,
                base_rows
            )));
        }

        Ok(Self { delta_id, records })
    }

    pub fn delta_id(&self) -> u32 {
        self.delta_id
    }

    pub fn records(&self) -> &[(DeltaKey, RowChange)] {
        &self.records
    }

    /// Records whose rowid falls within `[start, end)`.
    pub fn records_in_range(&self, start: u32, end: u32) -> &[(DeltaKey, RowChange)] {
        let from = self.records.partition_point(|(key, _)| key.rowid < start);
        let to = self.records.partition_point(|(key, _)| key.rowid < end);
        &self.records[from..to]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDesc;
    use crate::types::{DataType, Value};

    fn schema() -> Schema {
        Schema::new(
            vec![
                ColumnDesc::new("k", DataType::UInt32),
                ColumnDesc::new("v", DataType::UInt32),
            ],
            1,
        )
    }

    fn sample_records() -> Vec<(DeltaKey, RowChange)> {
        vec![
            (
                DeltaKey { rowid: 0, txid: 3 },
                RowChange::update(vec![(1, Value::UInt32(30))]),
            ),
            (DeltaKey { rowid: 0, txid: 7 }, RowChange::delete()),
            (
                DeltaKey { rowid: 5, txid: 2 },
                RowChange::update(vec![(1, Value::UInt32(50))]),
            ),
        ]
    }

    #[tokio::test]
    async fn test_delta_file_roundtrip() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("delta_0");
        let records = sample_records();
        write_delta_file(&path, &records, ChecksumType::Crc32)
            .await
            .unwrap();

        let reader = DeltaFileReader::open(0, &path, &schema(), 10).await.unwrap();
        assert_eq!(reader.records(), &records[..]);
        assert_eq!(reader.records_in_range(0, 1).len(), 2);
        assert_eq!(reader.records_in_range(1, 5).len(), 0);
        assert_eq!(reader.records_in_range(5, 6).len(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_delta_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("delta_0");
        write_delta_file(&path, &sample_records(), ChecksumType::Crc32)
            .await
            .unwrap();

        let mut data = tokio::fs::read(&path).await.unwrap();
        data[0] ^= 0xff;
        tokio::fs::write(&path, &data).await.unwrap();
        let err = DeltaFileReader::open(0, &path, &schema(), 10)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::StorageError::Checksum(..)
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_rowid_is_corruption() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("delta_0");
        write_delta_file(&path, &sample_records(), ChecksumType::Crc32)
            .await
            .unwrap();
        // Base smaller than the referenced rowids.
        let err = DeltaFileReader::open(0, &path, &schema(), 3)
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::StorageError::Corruption(..)
        ));
    }
}
