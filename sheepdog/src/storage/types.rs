// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Graph data types: nodes, edges, versioned snapshots and graph-level errors

use super::persistent::StorageDriverError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A typed graph vertex
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    /// Entity type, e.g. `case`, `submitted_aligned_reads`
    pub label: String,
    #[serde(default)]
    pub acl: Vec<String>,
    /// Property bag conforming to the dictionary schema for `label`
    #[serde(default)]
    pub props: Map<String, Value>,
}

impl Node {
    pub fn new(node_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            label: label.into(),
            acl: Vec::new(),
            props: Map::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.props.get(key).filter(|v| !v.is_null())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.props.insert(key.into(), value);
    }

    pub fn project_id(&self) -> Option<&str> {
        self.get_str("project_id")
    }

    /// Entity lifecycle state (`validated`, `submitted`, `released`, ...)
    pub fn state(&self) -> Option<&str> {
        self.get_str("state")
    }

    pub fn file_state(&self) -> Option<&str> {
        self.get_str("file_state")
    }

    pub fn submitter_id(&self) -> Option<&str> {
        self.get_str("submitter_id")
    }
}

/// Directed relationship `src -[label]-> dst`
///
/// `label` is the link name declared on the source type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub src_id: String,
    pub dst_id: String,
    pub label: String,
}

impl Edge {
    pub fn new(
        src_id: impl Into<String>,
        label: impl Into<String>,
        dst_id: impl Into<String>,
    ) -> Self {
        Self {
            src_id: src_id.into(),
            dst_id: dst_id.into(),
            label: label.into(),
        }
    }
}

/// Pre-mutation copy of a node kept when it is submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedNode {
    pub node_id: String,
    pub label: String,
    pub project_id: Option<String>,
    pub props: Map<String, Value>,
    pub versioned: chrono::DateTime<chrono::Utc>,
}

impl VersionedNode {
    pub fn snapshot(node: &Node) -> Self {
        Self {
            node_id: node.node_id.clone(),
            label: node.label.clone(),
            project_id: node.project_id().map(str::to_string),
            props: node.props.clone(),
            versioned: chrono::Utc::now(),
        }
    }
}

/// A secondary-key collision detected at flush or commit time
///
/// Carries the structured key columns and values instead of engine text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniqueViolation {
    pub label: String,
    pub keys: Vec<String>,
    pub values: Vec<Value>,
    /// Every node id claiming the key, staged and stored
    pub node_ids: Vec<String>,
}

impl std::fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let values: Vec<String> = self.values.iter().map(Value::to_string).collect();
        write!(
            f,
            "{} ({})=({}) claimed by [{}]",
            self.label,
            self.keys.join(", "),
            values.join(", "),
            self.node_ids.join(", ")
        )
    }
}

/// Graph-level storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("driver: {0}")]
    Driver(#[from] StorageDriverError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("edge {label} references missing node {missing}")]
    DanglingEdge { label: String, missing: String },

    #[error("unique constraint violated: {}", format_violations(.0))]
    UniqueViolation(Vec<UniqueViolation>),
}

fn format_violations(violations: &[UniqueViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for graph operations
pub type StorageResult<T> = Result<T, StorageError>;
