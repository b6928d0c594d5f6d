// Copyright 2024 Silt Project Authors. Licensed under Apache-2.0.

use std::backtrace::Backtrace;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{0}({1}) not found")]
    NotFound(&'static str, String),
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error("invalid checksum: found {0}, expected {1}")]
    Checksum(u64, u64),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for TracedStorageError {
    #[inline]
    fn from(e: std::io::Error) -> TracedStorageError {
        StorageError::Io(e.into()).into()
    }
}

/// [`StorageError`] with backtrace.
pub struct TracedStorageError {
    source: StorageError,
    backtrace: Backtrace,
}

impl std::fmt::Display for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for TracedStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl std::fmt::Debug for TracedStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n{}", self.source, self.backtrace)
    }
}

impl From<StorageError> for TracedStorageError {
    fn from(source: StorageError) -> Self {
        Self {
            source,
            backtrace: Backtrace::capture(),
        }
    }
}

impl TracedStorageError {
    pub fn not_found(ty: &'static str, item: impl ToString) -> Self {
        StorageError::NotFound(ty, item.to_string()).into()
    }

    pub fn corruption(message: impl ToString) -> Self {
        StorageError::Corruption(message.to_string()).into()
    }

    pub fn decode(message: impl ToString) -> Self {
        StorageError::Decode(message.to_string()).into()
    }

    pub fn checksum(found: u64, expected: u64) -> Self {
        StorageError::Checksum(found, expected).into()
    }

    pub fn invalid_argument(message: impl ToString) -> Self {
        StorageError::InvalidArgument(message.to_string()).into()
    }

    pub fn kind(&self) -> &StorageError {
        &self.source
    }

    /// Whether this error is a non-fatal key miss, which callers probing
    /// multiple rowsets are expected to tolerate.
    pub fn is_not_found(&self) -> bool {
        matches!(self.source, StorageError::NotFound(..))
    }
}

pub type StorageResult<T> = std::result::Result<T, TracedStorageError>;
