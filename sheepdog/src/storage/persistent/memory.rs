// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory storage driver implementation for testing

use super::traits::{StorageDriver, StorageTree, TreeIter, TreeWrite};
use super::types::{StorageResult, StorageType};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type TreeData = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// In-memory storage driver; trees live as long as the driver
#[derive(Default)]
pub struct MemoryStorageDriver {
    trees: RwLock<HashMap<String, TreeData>>,
}

/// Handle onto one in-memory tree
pub struct MemoryTree {
    data: TreeData,
}

impl MemoryStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryTree {
    fn snapshot<F>(&self, keep: F) -> TreeIter<'_>
    where
        F: Fn(&[u8]) -> bool,
    {
        let items: Vec<_> = self
            .data
            .read()
            .iter()
            .filter(|(k, _)| keep(k))
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        Box::new(items.into_iter())
    }
}

impl StorageTree for MemoryTree {
    fn insert(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn remove(&self, key: &[u8]) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn contains_key(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.data.read().contains_key(key))
    }

    fn iter(&self) -> StorageResult<TreeIter<'_>> {
        Ok(self.snapshot(|_| true))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<TreeIter<'_>> {
        Ok(self.snapshot(|k| k.starts_with(prefix)))
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }
}

impl MemoryStorageDriver {
    fn tree_data(&self, name: &str) -> TreeData {
        self.trees
            .write()
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

impl StorageDriver for MemoryStorageDriver {
    type Tree = Box<dyn StorageTree>;

    fn open_tree(&self, name: &str) -> StorageResult<Self::Tree> {
        let data = self.tree_data(name);
        Ok(Box::new(MemoryTree { data }) as Box<dyn StorageTree>)
    }

    fn apply_writes(&self, writes: &[TreeWrite<'_>]) -> StorageResult<()> {
        let trees: BTreeMap<&str, TreeData> = writes
            .iter()
            .map(|w| (w.tree, self.tree_data(w.tree)))
            .collect();
        // all locks are taken, in name order, before the first write
        let mut guards: BTreeMap<&str, RwLockWriteGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> = trees
            .iter()
            .map(|(name, data)| (*name, data.write()))
            .collect();
        for write in writes {
            if let Some(data) = guards.get_mut(write.tree) {
                for key in write.removes {
                    data.remove(key);
                }
                for (key, value) in write.inserts {
                    data.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    fn list_trees(&self) -> StorageResult<Vec<String>> {
        Ok(self.trees.read().keys().cloned().collect())
    }

    fn flush(&self) -> StorageResult<()> {
        Ok(())
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }
}
