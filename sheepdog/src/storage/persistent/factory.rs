// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Storage driver factory

use super::memory::MemoryStorageDriver;
use super::traits::DynStorageDriver;
use super::types::{StorageResult, StorageType};
use std::path::Path;

/// Create the driver selected by `storage_type`
///
/// `path` is only used by persistent backends.
pub fn create_storage_driver<P: AsRef<Path>>(
    storage_type: StorageType,
    path: P,
) -> StorageResult<DynStorageDriver> {
    match storage_type {
        #[cfg(feature = "sled-backend")]
        StorageType::Sled => {
            use super::sled::SledDriver;
            let driver = SledDriver::open(path)?;
            Ok(Box::new(driver) as DynStorageDriver)
        }
        #[cfg(not(feature = "sled-backend"))]
        StorageType::Sled => {
            let _ = path;
            Err(super::types::StorageDriverError::Unavailable(
                "sled backend not compiled in (enable the `sled-backend` feature)".to_string(),
            ))
        }
        StorageType::Memory => {
            let driver = MemoryStorageDriver::new();
            Ok(Box::new(driver) as DynStorageDriver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::persistent::traits::{StorageDriver, StorageTree, TreeWrite};
    use tempfile::TempDir;

    #[cfg(feature = "sled-backend")]
    #[test]
    fn test_create_sled_driver() {
        let temp_dir = TempDir::new().unwrap();
        let driver = create_storage_driver(StorageType::Sled, temp_dir.path()).unwrap();
        assert_eq!(driver.storage_type(), StorageType::Sled);
        let tree = driver.open_tree("nodes").unwrap();
        tree.insert(b"a", b"1").unwrap();
        assert!(driver.list_trees().unwrap().contains(&"nodes".to_string()));
    }

    #[cfg(feature = "sled-backend")]
    #[test]
    fn test_sled_writes_span_trees() {
        let temp_dir = TempDir::new().unwrap();
        let driver = create_storage_driver(StorageType::Sled, temp_dir.path()).unwrap();
        let nodes = driver.open_tree("nodes").unwrap();
        nodes.insert(b"old", b"1").unwrap();

        let node_inserts = [(b"new".to_vec(), b"2".to_vec())];
        let node_removes = [b"old".to_vec()];
        let edge_inserts = [(b"new\0cases\0c1".to_vec(), b"{}".to_vec())];
        driver
            .apply_writes(&[
                TreeWrite::new("nodes", &node_inserts, &node_removes),
                TreeWrite::new("edges_out", &edge_inserts, &[]),
            ])
            .unwrap();

        assert!(nodes.get(b"old").unwrap().is_none());
        assert_eq!(nodes.get(b"new").unwrap(), Some(b"2".to_vec()));
        let edges = driver.open_tree("edges_out").unwrap();
        assert_eq!(edges.iter().unwrap().count(), 1);
    }

    #[test]
    fn test_create_memory_driver() {
        let temp_dir = TempDir::new().unwrap();
        let driver = create_storage_driver(StorageType::Memory, temp_dir.path()).unwrap();
        assert_eq!(driver.storage_type(), StorageType::Memory);
    }
}
