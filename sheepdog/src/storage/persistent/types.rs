// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Key-value driver types and errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which key-value engine backs the graph and the transaction log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StorageType {
    /// Sled - embedded, persistent, pure Rust
    Sled,

    /// Memory - process-local, for tests and dry tooling
    Memory,
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Sled
    }
}

impl std::str::FromStr for StorageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sled" => Ok(StorageType::Sled),
            "memory" => Ok(StorageType::Memory),
            _ => Err(format!(
                "Unknown storage type: {}. Valid options: sled, memory",
                s
            )),
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageType::Sled => "sled",
            StorageType::Memory => "memory",
        };
        write!(f, "{}", name)
    }
}

/// Error raised by a key-value driver
#[derive(Error, Debug)]
pub enum StorageDriverError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Engine-specific failure (sled, ...)
    #[error("Storage driver error: {0}")]
    BackendSpecific(String),

    #[error("Storage backend not available: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StorageDriverError {
    fn from(e: serde_json::Error) -> Self {
        StorageDriverError::SerializationError(e.to_string())
    }
}

/// Result type for driver operations
pub type StorageResult<T> = Result<T, StorageDriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_storage_type() {
        assert_eq!("SLED".parse::<StorageType>(), Ok(StorageType::Sled));
        assert_eq!("memory".parse::<StorageType>(), Ok(StorageType::Memory));
        assert!("rocksdb".parse::<StorageType>().is_err());
    }
}
