use crate::error::{StorageResult, TracedStorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ChecksumType {
    None = 0,
    Crc32 = 1,
}

impl ChecksumType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Crc32),
            _ => None,
        }
    }

    /// Block frame headers store the tag in a single byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        Self::from_i32(value as i32)
    }
}

pub fn build_checksum(checksum_type: ChecksumType, block_data: &[u8]) -> u64 {
    match checksum_type {
        ChecksumType::None => 0,
        ChecksumType::Crc32 => crc32fast::hash(block_data) as u64,
    }
}

pub fn verify_checksum(
    checksum_type: ChecksumType,
    data: &[u8],
    checksum: u64,
) -> StorageResult<()> {
    match checksum_type {
        ChecksumType::None => Ok(()),
        ChecksumType::Crc32 => {
            let found = crc32fast::hash(data) as u64;
            if found != checksum {
                return Err(TracedStorageError::checksum(found, checksum));
            }
            Ok(())
        }
    }
}
