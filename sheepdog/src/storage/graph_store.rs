// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Durable node/edge store
//!
//! Nodes, edges, a label index, a secondary-key index and the versioned-node
//! table each live in their own tree of a shared driver. Mutations only reach
//! the store through [`GraphStore::apply`], which re-checks uniqueness and
//! referential integrity under a commit lock before writing. There is no
//! cross-transaction locking beyond that: concurrent sessions race
//! optimistically and the loser sees a constraint violation at commit.

use super::persistent::{
    create_storage_driver, DynStorageDriver, StorageTree, StorageType, TreeWrite,
};
use super::types::{Edge, Node, StorageError, StorageResult, UniqueViolation, VersionedNode};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

const NODES_TREE: &str = "nodes";
const LABELS_TREE: &str = "node_labels";
const EDGES_OUT_TREE: &str = "edges_out";
const EDGES_IN_TREE: &str = "edges_in";
const UNIQUE_KEYS_TREE: &str = "unique_keys";
const VERSIONED_NODES_TREE: &str = "versioned_nodes";

const SEP: &str = "\u{0}";

/// Supplies the secondary unique-key tuples declared for a node label
pub trait UniqueKeyResolver: Send + Sync {
    /// Property-name tuples that must be unique per label, excluding the bare
    /// node id (node ids are unique by construction)
    fn unique_keys(&self, label: &str) -> Vec<Vec<String>>;
}

/// A pending change to one node
#[derive(Debug, Clone, PartialEq)]
pub enum StagedNode {
    /// New node; the id must not exist at commit
    Insert(Node),
    /// Replacement of an existing node's properties
    Update(Node),
    Delete,
}

impl StagedNode {
    pub fn node(&self) -> Option<&Node> {
        match self {
            StagedNode::Insert(node) | StagedNode::Update(node) => Some(node),
            StagedNode::Delete => None,
        }
    }
}

/// Everything a session has staged but not yet committed
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub nodes: BTreeMap<String, StagedNode>,
    pub added_edges: BTreeSet<Edge>,
    pub removed_edges: BTreeSet<Edge>,
    pub versioned: Vec<VersionedNode>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.added_edges.is_empty()
            && self.removed_edges.is_empty()
            && self.versioned.is_empty()
    }
}

struct UniqueEntry {
    keys: Vec<String>,
    values: Vec<Value>,
    index_key: Vec<u8>,
}

fn key(parts: &[&str]) -> Vec<u8> {
    parts.join(SEP).into_bytes()
}

fn prefix(parts: &[&str]) -> Vec<u8> {
    let mut k = key(parts);
    k.extend_from_slice(SEP.as_bytes());
    k
}

fn unique_entries(node: &Node, resolver: &dyn UniqueKeyResolver) -> Vec<UniqueEntry> {
    let mut entries = Vec::new();
    for keys in resolver.unique_keys(&node.label) {
        let values: Option<Vec<Value>> = keys
            .iter()
            .map(|k| {
                if k == "id" {
                    Some(Value::String(node.node_id.clone()))
                } else {
                    node.get(k).cloned()
                }
            })
            .collect();
        // A tuple with a missing member never collides, as with SQL NULLs
        let Some(values) = values else { continue };
        let encoded = Value::Array(values.clone()).to_string();
        let index_key = key(&[&node.label, &keys.join(","), &encoded]);
        entries.push(UniqueEntry {
            keys,
            values,
            index_key,
        });
    }
    entries
}

/// Node/edge store shared by every session
pub struct GraphStore {
    driver: Arc<DynStorageDriver>,
    nodes: Box<dyn StorageTree>,
    labels: Box<dyn StorageTree>,
    edges_out: Box<dyn StorageTree>,
    edges_in: Box<dyn StorageTree>,
    unique_keys: Box<dyn StorageTree>,
    versioned_nodes: Box<dyn StorageTree>,
    commit_lock: Mutex<()>,
}

impl GraphStore {
    /// Open a store on a fresh driver of the given type
    pub fn open<P: AsRef<Path>>(storage_type: StorageType, path: P) -> StorageResult<Self> {
        let driver = create_storage_driver(storage_type, path)?;
        Self::with_driver(Arc::new(driver))
    }

    /// Open a store on an existing driver, sharing it with other stores
    pub fn with_driver(driver: Arc<DynStorageDriver>) -> StorageResult<Self> {
        Ok(Self {
            nodes: driver.open_tree(NODES_TREE)?,
            labels: driver.open_tree(LABELS_TREE)?,
            edges_out: driver.open_tree(EDGES_OUT_TREE)?,
            edges_in: driver.open_tree(EDGES_IN_TREE)?,
            unique_keys: driver.open_tree(UNIQUE_KEYS_TREE)?,
            versioned_nodes: driver.open_tree(VERSIONED_NODES_TREE)?,
            driver,
            commit_lock: Mutex::new(()),
        })
    }

    pub fn driver(&self) -> &Arc<DynStorageDriver> {
        &self.driver
    }

    pub fn get_node(&self, node_id: &str) -> StorageResult<Option<Node>> {
        match self.nodes.get(node_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains_node(&self, node_id: &str) -> StorageResult<bool> {
        Ok(self.nodes.contains_key(node_id.as_bytes())?)
    }

    pub fn node_ids_with_label(&self, label: &str) -> StorageResult<Vec<String>> {
        let scan_prefix = prefix(&[label]);
        let mut ids = Vec::new();
        for item in self.labels.scan_prefix(&scan_prefix)? {
            let (k, _) = item?;
            ids.push(String::from_utf8_lossy(&k[scan_prefix.len()..]).to_string());
        }
        Ok(ids)
    }

    pub fn all_nodes(&self) -> StorageResult<Vec<Node>> {
        let mut nodes = Vec::new();
        for item in self.nodes.iter()? {
            let (_, v) = item?;
            nodes.push(serde_json::from_slice(&v)?);
        }
        Ok(nodes)
    }

    fn scan_edges(tree: &dyn StorageTree, node_id: &str) -> StorageResult<Vec<Edge>> {
        let mut edges = Vec::new();
        for item in tree.scan_prefix(&prefix(&[node_id]))? {
            let (_, v) = item?;
            edges.push(serde_json::from_slice(&v)?);
        }
        Ok(edges)
    }

    pub fn edges_out(&self, node_id: &str) -> StorageResult<Vec<Edge>> {
        Self::scan_edges(self.edges_out.as_ref(), node_id)
    }

    pub fn edges_in(&self, node_id: &str) -> StorageResult<Vec<Edge>> {
        Self::scan_edges(self.edges_in.as_ref(), node_id)
    }

    pub fn contains_edge(&self, edge: &Edge) -> StorageResult<bool> {
        Ok(self
            .edges_out
            .contains_key(&key(&[&edge.src_id, &edge.label, &edge.dst_id]))?)
    }

    /// Versioned snapshots recorded for a node, oldest first
    pub fn versions_of(&self, node_id: &str) -> StorageResult<Vec<VersionedNode>> {
        let mut versions = Vec::new();
        for item in self.versioned_nodes.scan_prefix(&prefix(&[node_id]))? {
            let (_, v) = item?;
            versions.push(serde_json::from_slice(&v)?);
        }
        Ok(versions)
    }

    /// Secondary-key collisions `changes` would cause if applied now
    pub fn find_unique_violations(
        &self,
        changes: &ChangeSet,
        resolver: &dyn UniqueKeyResolver,
    ) -> StorageResult<Vec<UniqueViolation>> {
        struct Claim {
            label: String,
            keys: Vec<String>,
            values: Vec<Value>,
            ids: Vec<String>,
        }

        let mut claims: BTreeMap<Vec<u8>, Claim> = BTreeMap::new();
        for (node_id, staged) in &changes.nodes {
            let Some(node) = staged.node() else { continue };
            for entry in unique_entries(node, resolver) {
                claims
                    .entry(entry.index_key)
                    .or_insert_with(|| Claim {
                        label: node.label.clone(),
                        keys: entry.keys,
                        values: entry.values,
                        ids: Vec::new(),
                    })
                    .ids
                    .push(node_id.clone());
            }
        }

        let mut violations = Vec::new();
        for (index_key, mut claim) in claims {
            if let Some(owner) = self.unique_keys.get(&index_key)? {
                let owner = String::from_utf8_lossy(&owner).to_string();
                if !claim.ids.contains(&owner) {
                    // The stored owner keeps the key unless this change set
                    // deletes it or moves it to different key values
                    let keeps_key = match changes.nodes.get(&owner) {
                        Some(StagedNode::Delete) => false,
                        Some(staged) => staged.node().is_some_and(|n| {
                            unique_entries(n, resolver)
                                .iter()
                                .any(|e| e.index_key == index_key)
                        }),
                        None => true,
                    };
                    if keeps_key {
                        claim.ids.push(owner);
                    }
                }
            }
            if claim.ids.len() > 1 {
                violations.push(UniqueViolation {
                    label: claim.label,
                    keys: claim.keys,
                    values: claim.values,
                    node_ids: claim.ids,
                });
            }
        }
        Ok(violations)
    }

    fn node_alive_after(&self, changes: &ChangeSet, node_id: &str) -> StorageResult<bool> {
        match changes.nodes.get(node_id) {
            Some(StagedNode::Delete) => Ok(false),
            Some(_) => Ok(true),
            None => self.contains_node(node_id),
        }
    }

    /// Validate a change set, then write every tree it touches in one unit
    pub fn apply(&self, changes: &ChangeSet, resolver: &dyn UniqueKeyResolver) -> StorageResult<()> {
        let _guard = self.commit_lock.lock();

        let violations = self.find_unique_violations(changes, resolver)?;
        if !violations.is_empty() {
            return Err(StorageError::UniqueViolation(violations));
        }
        for (node_id, staged) in &changes.nodes {
            if matches!(staged, StagedNode::Insert(_)) && self.contains_node(node_id)? {
                return Err(StorageError::NodeExists(node_id.clone()));
            }
        }
        for edge in &changes.added_edges {
            for end in [&edge.src_id, &edge.dst_id] {
                if !self.node_alive_after(changes, end)? {
                    return Err(StorageError::DanglingEdge {
                        label: edge.label.clone(),
                        missing: end.clone(),
                    });
                }
            }
        }

        let mut batch = WriteBatch::default();
        for (node_id, staged) in &changes.nodes {
            if let Some(old) = self.get_node(node_id)? {
                batch.labels_rm.push(key(&[&old.label, node_id]));
                for entry in unique_entries(&old, resolver) {
                    batch.unique_rm.push(entry.index_key);
                }
            }
            match staged {
                StagedNode::Delete => {
                    for edge in self.edges_out(node_id)?.iter().chain(&self.edges_in(node_id)?) {
                        batch.remove_edge(edge);
                    }
                    batch.nodes_rm.push(node_id.as_bytes().to_vec());
                }
                StagedNode::Insert(node) | StagedNode::Update(node) => {
                    batch
                        .nodes_ins
                        .push((node_id.as_bytes().to_vec(), serde_json::to_vec(node)?));
                    batch.labels_ins.push((key(&[&node.label, node_id]), Vec::new()));
                    for entry in unique_entries(node, resolver) {
                        batch
                            .unique_ins
                            .push((entry.index_key, node_id.as_bytes().to_vec()));
                    }
                }
            }
        }
        for edge in &changes.removed_edges {
            batch.remove_edge(edge);
        }
        for edge in &changes.added_edges {
            let value = serde_json::to_vec(edge)?;
            batch.out_ins.push((key(&[&edge.src_id, &edge.label, &edge.dst_id]), value.clone()));
            batch.in_ins.push((key(&[&edge.dst_id, &edge.label, &edge.src_id]), value));
        }
        for version in &changes.versioned {
            let stamp = format!("{:020}", version.versioned.timestamp_micros());
            let suffix = uuid::Uuid::new_v4().to_string();
            batch.versioned_ins.push((
                key(&[&version.node_id, &stamp, &suffix]),
                serde_json::to_vec(version)?,
            ));
        }

        self.driver.apply_writes(&[
            TreeWrite::new(NODES_TREE, &batch.nodes_ins, &batch.nodes_rm),
            TreeWrite::new(LABELS_TREE, &batch.labels_ins, &batch.labels_rm),
            TreeWrite::new(UNIQUE_KEYS_TREE, &batch.unique_ins, &batch.unique_rm),
            TreeWrite::new(EDGES_OUT_TREE, &batch.out_ins, &batch.out_rm),
            TreeWrite::new(EDGES_IN_TREE, &batch.in_ins, &batch.in_rm),
            TreeWrite::new(VERSIONED_NODES_TREE, &batch.versioned_ins, &[]),
        ])?;
        self.driver.flush()?;

        log::debug!(
            "applied change set: {} nodes, +{} -{} edges, {} versions",
            changes.nodes.len(),
            changes.added_edges.len(),
            changes.removed_edges.len(),
            changes.versioned.len()
        );
        Ok(())
    }
}

#[derive(Default)]
struct WriteBatch {
    nodes_ins: Vec<(Vec<u8>, Vec<u8>)>,
    nodes_rm: Vec<Vec<u8>>,
    labels_ins: Vec<(Vec<u8>, Vec<u8>)>,
    labels_rm: Vec<Vec<u8>>,
    unique_ins: Vec<(Vec<u8>, Vec<u8>)>,
    unique_rm: Vec<Vec<u8>>,
    out_ins: Vec<(Vec<u8>, Vec<u8>)>,
    out_rm: Vec<Vec<u8>>,
    in_ins: Vec<(Vec<u8>, Vec<u8>)>,
    in_rm: Vec<Vec<u8>>,
    versioned_ins: Vec<(Vec<u8>, Vec<u8>)>,
}

impl WriteBatch {
    fn remove_edge(&mut self, edge: &Edge) {
        self.out_rm.push(key(&[&edge.src_id, &edge.label, &edge.dst_id]));
        self.in_rm.push(key(&[&edge.dst_id, &edge.label, &edge.src_id]));
    }
}
