// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Sled storage driver implementation

use super::traits::{StorageDriver, StorageTree, TreeIter, TreeWrite};
use super::types::{StorageDriverError, StorageResult, StorageType};
use sled::transaction::{TransactionError, TransactionResult, Transactional};
use std::path::Path;

fn backend_err(e: sled::Error) -> StorageDriverError {
    StorageDriverError::BackendSpecific(e.to_string())
}

/// Sled driver implementation
pub struct SledDriver {
    db: sled::Db,
}

/// Sled tree wrapper that implements StorageTree trait
pub struct SledTree {
    tree: sled::Tree,
}

impl SledDriver {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path).map_err(backend_err)?;
        Ok(SledDriver { db })
    }
}

impl StorageTree for SledTree {
    fn insert(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.tree.insert(key, value).map_err(backend_err)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.tree
            .get(key)
            .map_err(backend_err)
            .map(|opt| opt.map(|v| v.to_vec()))
    }

    fn remove(&self, key: &[u8]) -> StorageResult<()> {
        self.tree.remove(key).map_err(backend_err)?;
        Ok(())
    }

    fn contains_key(&self, key: &[u8]) -> StorageResult<bool> {
        self.tree.contains_key(key).map_err(backend_err)
    }

    fn iter(&self) -> StorageResult<TreeIter<'_>> {
        let iter = self.tree.iter().map(|result| {
            result
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(backend_err)
        });
        Ok(Box::new(iter))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<TreeIter<'_>> {
        let iter = self.tree.scan_prefix(prefix).map(|result| {
            result
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(backend_err)
        });
        Ok(Box::new(iter))
    }

    fn flush(&self) -> StorageResult<()> {
        self.tree.flush().map_err(backend_err)?;
        Ok(())
    }
}

impl StorageDriver for SledDriver {
    type Tree = Box<dyn StorageTree>;

    fn open_tree(&self, name: &str) -> StorageResult<Self::Tree> {
        let tree = self.db.open_tree(name).map_err(backend_err)?;
        Ok(Box::new(SledTree { tree }) as Box<dyn StorageTree>)
    }

    fn list_trees(&self) -> StorageResult<Vec<String>> {
        let tree_names = self
            .db
            .tree_names()
            .into_iter()
            .map(|name| String::from_utf8_lossy(&name).to_string())
            .collect();
        Ok(tree_names)
    }

    fn apply_writes(&self, writes: &[TreeWrite<'_>]) -> StorageResult<()> {
        let trees = writes
            .iter()
            .map(|w| self.db.open_tree(w.tree))
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend_err)?;

        let result: TransactionResult<(), ()> = trees.as_slice().transaction(|views| {
            for (view, write) in views.iter().zip(writes) {
                for key in write.removes {
                    view.remove(key.as_slice())?;
                }
                for (key, value) in write.inserts {
                    view.insert(key.as_slice(), value.as_slice())?;
                }
            }
            Ok(())
        });
        result.map_err(|e| match e {
            TransactionError::Storage(e) => backend_err(e),
            TransactionError::Abort(()) => {
                StorageDriverError::BackendSpecific("multi-tree write aborted".to_string())
            }
        })
    }

    fn flush(&self) -> StorageResult<()> {
        self.db.flush().map_err(backend_err)?;
        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Sled
    }
}
