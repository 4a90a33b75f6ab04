// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Storage driver traits
//!
//! A driver owns named trees; a tree is an ordered byte-keyed map. The graph
//! store and the transaction log store are both built on these two traits.
//! Writes spanning several trees go through the driver so that they commit
//! together.

use super::types::{StorageResult, StorageType};

/// Iterator over `(key, value)` pairs of a tree
pub type TreeIter<'a> = Box<dyn Iterator<Item = StorageResult<(Vec<u8>, Vec<u8>)>> + 'a>;

/// Removals then inserts destined for one named tree
#[derive(Debug, Clone, Copy)]
pub struct TreeWrite<'a> {
    pub tree: &'a str,
    pub inserts: &'a [(Vec<u8>, Vec<u8>)],
    pub removes: &'a [Vec<u8>],
}

impl<'a> TreeWrite<'a> {
    pub fn new(tree: &'a str, inserts: &'a [(Vec<u8>, Vec<u8>)], removes: &'a [Vec<u8>]) -> Self {
        Self {
            tree,
            inserts,
            removes,
        }
    }
}

/// A named collection of key-value pairs within a driver
pub trait StorageTree: Send + Sync {
    fn insert(&self, key: &[u8], value: &[u8]) -> StorageResult<()>;

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    fn remove(&self, key: &[u8]) -> StorageResult<()>;

    fn contains_key(&self, key: &[u8]) -> StorageResult<bool>;

    /// Iterate over all pairs in key order
    fn iter(&self) -> StorageResult<TreeIter<'_>>;

    /// Iterate over pairs whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<TreeIter<'_>>;

    /// Flush any pending writes to disk
    fn flush(&self) -> StorageResult<()>;
}

/// Main storage driver trait
pub trait StorageDriver: Send + Sync {
    /// Type of tree used by this driver
    type Tree: StorageTree;

    /// Open or create a named tree
    fn open_tree(&self, name: &str) -> StorageResult<Self::Tree>;

    /// List all available trees
    fn list_trees(&self) -> StorageResult<Vec<String>>;

    /// Apply writes to several trees as one unit
    ///
    /// Either every write lands or none does. Within a tree, removals are
    /// applied before inserts.
    fn apply_writes(&self, writes: &[TreeWrite<'_>]) -> StorageResult<()>;

    /// Flush all pending writes to disk
    fn flush(&self) -> StorageResult<()>;

    fn storage_type(&self) -> StorageType;
}

impl StorageTree for Box<dyn StorageTree> {
    fn insert(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        (**self).insert(key, value)
    }

    fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn remove(&self, key: &[u8]) -> StorageResult<()> {
        (**self).remove(key)
    }

    fn contains_key(&self, key: &[u8]) -> StorageResult<bool> {
        (**self).contains_key(key)
    }

    fn iter(&self) -> StorageResult<TreeIter<'_>> {
        (**self).iter()
    }

    fn scan_prefix(&self, prefix: &[u8]) -> StorageResult<TreeIter<'_>> {
        (**self).scan_prefix(prefix)
    }

    fn flush(&self) -> StorageResult<()> {
        (**self).flush()
    }
}

/// Boxed driver handle as returned by the factory
pub type DynStorageDriver = Box<dyn StorageDriver<Tree = Box<dyn StorageTree>>>;
