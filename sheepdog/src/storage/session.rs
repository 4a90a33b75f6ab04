// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Primary graph session
//!
//! A session overlays staged node and edge changes on top of the store.
//! Reads see the staged state. Nothing reaches the store until
//! [`GraphSession::commit`]; [`GraphSession::rollback`] discards everything.

use super::graph_store::{ChangeSet, GraphStore, StagedNode, UniqueKeyResolver};
use super::types::{Edge, Node, StorageError, StorageResult, VersionedNode};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct GraphSession {
    store: Arc<GraphStore>,
    resolver: Arc<dyn UniqueKeyResolver>,
    changes: ChangeSet,
}

impl GraphSession {
    pub fn new(store: Arc<GraphStore>, resolver: Arc<dyn UniqueKeyResolver>) -> Self {
        Self {
            store,
            resolver,
            changes: ChangeSet::default(),
        }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn get_node(&self, node_id: &str) -> StorageResult<Option<Node>> {
        match self.changes.nodes.get(node_id) {
            Some(staged) => Ok(staged.node().cloned()),
            None => self.store.get_node(node_id),
        }
    }

    pub fn contains_node(&self, node_id: &str) -> StorageResult<bool> {
        Ok(self.get_node(node_id)?.is_some())
    }

    /// Stage a new node; fails if the id is already visible
    pub fn add(&mut self, node: Node) -> StorageResult<()> {
        if self.contains_node(&node.node_id)? {
            return Err(StorageError::NodeExists(node.node_id));
        }
        let staged = if self.store.contains_node(&node.node_id)? {
            // Deleted earlier in this session and re-created
            StagedNode::Update(node.clone())
        } else {
            StagedNode::Insert(node.clone())
        };
        self.changes.nodes.insert(node.node_id, staged);
        Ok(())
    }

    /// Stage a node, inserting or replacing as needed
    pub fn merge(&mut self, node: Node) -> StorageResult<()> {
        let staged = match self.changes.nodes.get(&node.node_id) {
            Some(StagedNode::Insert(_)) => StagedNode::Insert(node.clone()),
            _ if self.store.contains_node(&node.node_id)? => StagedNode::Update(node.clone()),
            _ => StagedNode::Insert(node.clone()),
        };
        self.changes.nodes.insert(node.node_id, staged);
        Ok(())
    }

    /// Stage deletion of a node together with every edge touching it
    pub fn delete(&mut self, node_id: &str) -> StorageResult<()> {
        if !self.contains_node(node_id)? {
            return Err(StorageError::NodeNotFound(node_id.to_string()));
        }
        let edges: Vec<Edge> = self
            .edges_out(node_id)?
            .into_iter()
            .chain(self.edges_in(node_id)?)
            .collect();
        for edge in edges {
            self.remove_edge(&edge)?;
        }
        if self.store.contains_node(node_id)? {
            self.changes
                .nodes
                .insert(node_id.to_string(), StagedNode::Delete);
        } else {
            self.changes.nodes.remove(node_id);
        }
        Ok(())
    }

    pub fn add_edge(&mut self, edge: Edge) -> StorageResult<()> {
        let was_removed = self.changes.removed_edges.remove(&edge);
        if !was_removed && !self.store.contains_edge(&edge)? {
            self.changes.added_edges.insert(edge);
        }
        Ok(())
    }

    pub fn remove_edge(&mut self, edge: &Edge) -> StorageResult<()> {
        if self.changes.added_edges.remove(edge) {
            return Ok(());
        }
        if self.store.contains_edge(edge)? {
            self.changes.removed_edges.insert(edge.clone());
        }
        Ok(())
    }

    fn overlay_edges<F>(&self, stored: Vec<Edge>, keep: F) -> Vec<Edge>
    where
        F: Fn(&Edge) -> bool,
    {
        let mut edges: BTreeSet<Edge> = stored
            .into_iter()
            .filter(|e| !self.changes.removed_edges.contains(e))
            .collect();
        edges.extend(self.changes.added_edges.iter().filter(|e| keep(e)).cloned());
        edges.into_iter().collect()
    }

    /// Edges leaving `node_id`
    pub fn edges_out(&self, node_id: &str) -> StorageResult<Vec<Edge>> {
        let stored = self.store.edges_out(node_id)?;
        Ok(self.overlay_edges(stored, |e| e.src_id == node_id))
    }

    /// Edges arriving at `node_id`
    pub fn edges_in(&self, node_id: &str) -> StorageResult<Vec<Edge>> {
        let stored = self.store.edges_in(node_id)?;
        Ok(self.overlay_edges(stored, |e| e.dst_id == node_id))
    }

    /// Targets of the `link` edges leaving `node_id`
    pub fn neighbors_out(&self, node_id: &str, link: &str) -> StorageResult<Vec<Node>> {
        let mut nodes = Vec::new();
        for edge in self.edges_out(node_id)? {
            if edge.label == link {
                if let Some(node) = self.get_node(&edge.dst_id)? {
                    nodes.push(node);
                }
            }
        }
        Ok(nodes)
    }

    pub fn nodes_with_label(&self, label: &str) -> StorageResult<Vec<Node>> {
        let mut nodes = Vec::new();
        for node_id in self.store.node_ids_with_label(label)? {
            if self.changes.nodes.contains_key(&node_id) {
                continue;
            }
            if let Some(node) = self.store.get_node(&node_id)? {
                nodes.push(node);
            }
        }
        nodes.extend(
            self.changes
                .nodes
                .values()
                .filter_map(StagedNode::node)
                .filter(|n| n.label == label)
                .cloned(),
        );
        Ok(nodes)
    }

    /// Every visible node whose `project_id` is `project_id`
    pub fn nodes_in_project(&self, project_id: &str) -> StorageResult<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .store
            .all_nodes()?
            .into_iter()
            .filter(|n| !self.changes.nodes.contains_key(&n.node_id))
            .collect();
        nodes.extend(self.changes.nodes.values().filter_map(StagedNode::node).cloned());
        nodes.retain(|n| n.project_id() == Some(project_id));
        Ok(nodes)
    }

    /// Nodes of `label` matching an optional id and every given property
    pub fn lookup_nodes(
        &self,
        label: &str,
        node_id: Option<&str>,
        props: &Map<String, Value>,
    ) -> StorageResult<Vec<Node>> {
        let candidates = match node_id {
            Some(id) => self
                .get_node(id)?
                .into_iter()
                .filter(|n| n.label == label)
                .collect(),
            None => self.nodes_with_label(label)?,
        };
        Ok(candidates
            .into_iter()
            .filter(|n| props.iter().all(|(k, v)| n.props.get(k) == Some(v)))
            .collect())
    }

    /// Stage a snapshot into the versioned-node table
    pub fn record_version(&mut self, node: &Node) {
        self.changes.versioned.push(VersionedNode::snapshot(node));
    }

    /// Check staged state against constraints without writing
    pub fn flush(&self) -> StorageResult<()> {
        let violations = self
            .store
            .find_unique_violations(&self.changes, self.resolver.as_ref())?;
        if violations.is_empty() {
            Ok(())
        } else {
            Err(StorageError::UniqueViolation(violations))
        }
    }

    /// Copy of the staged state, for tentative work that is undone later
    pub fn savepoint(&self) -> ChangeSet {
        self.changes.clone()
    }

    pub fn restore(&mut self, savepoint: ChangeSet) {
        self.changes = savepoint;
    }

    /// Write staged changes; the session is empty afterwards either way
    pub fn commit(&mut self) -> StorageResult<()> {
        let changes = std::mem::take(&mut self.changes);
        if changes.is_empty() {
            return Ok(());
        }
        self.store.apply(&changes, self.resolver.as_ref())
    }

    pub fn rollback(&mut self) {
        if self.has_changes() {
            log::debug!(
                "rolling back {} staged nodes",
                self.changes.nodes.len()
            );
        }
        self.changes = ChangeSet::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::persistent::StorageType;
    use serde_json::json;

    struct SubmitterKeys;

    impl UniqueKeyResolver for SubmitterKeys {
        fn unique_keys(&self, _label: &str) -> Vec<Vec<String>> {
            vec![vec!["project_id".into(), "submitter_id".into()]]
        }
    }

    fn session() -> GraphSession {
        let store = GraphStore::open(StorageType::Memory, "unused").unwrap();
        GraphSession::new(Arc::new(store), Arc::new(SubmitterKeys))
    }

    fn node(id: &str, label: &str, submitter_id: &str) -> Node {
        let mut node = Node::new(id, label);
        node.set("project_id", json!("P-1"));
        node.set("submitter_id", json!(submitter_id));
        node
    }

    #[test]
    fn test_reads_see_staged_state_until_rollback() {
        let mut session = session();
        session.add(node("a", "case", "c1")).unwrap();
        assert!(session.contains_node("a").unwrap());
        assert_eq!(session.nodes_with_label("case").unwrap().len(), 1);
        session.rollback();
        assert!(!session.contains_node("a").unwrap());
    }

    #[test]
    fn test_delete_cascades_edges() {
        let mut session = session();
        session.add(node("a", "case", "c1")).unwrap();
        session.add(node("b", "sample", "s1")).unwrap();
        session.add_edge(Edge::new("b", "cases", "a")).unwrap();
        session.commit().unwrap();

        session.delete("a").unwrap();
        assert!(session.edges_out("b").unwrap().is_empty());
        session.commit().unwrap();
        assert!(session.store().edges_out("b").unwrap().is_empty());
        assert!(session.get_node("a").unwrap().is_none());
    }

    #[test]
    fn test_lookup_by_secondary_keys() {
        let mut session = session();
        session.add(node("a", "case", "c1")).unwrap();
        session.add(node("b", "case", "c2")).unwrap();
        let mut keys = Map::new();
        keys.insert("submitter_id".into(), json!("c2"));
        let found = session.lookup_nodes("case", None, &keys).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].node_id, "b");
        assert!(session.lookup_nodes("case", Some("a"), &keys).unwrap().is_empty());
    }

    #[test]
    fn test_flush_reports_in_batch_duplicates() {
        let mut session = session();
        session.add(node("a", "case", "c1")).unwrap();
        session.add(node("b", "case", "c1")).unwrap();
        assert!(matches!(
            session.flush(),
            Err(StorageError::UniqueViolation(_))
        ));
    }

    #[test]
    fn test_savepoint_restore() {
        let mut session = session();
        session.add(node("a", "case", "c1")).unwrap();
        let savepoint = session.savepoint();
        session.delete("a").unwrap();
        assert!(!session.contains_node("a").unwrap());
        session.restore(savepoint);
        assert!(session.contains_node("a").unwrap());
    }
}
