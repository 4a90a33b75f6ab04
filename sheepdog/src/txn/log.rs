// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction log records
//!
//! A log row outlives the mutation it describes: it is written whether the
//! transaction committed, failed, errored or was a dry run, and it keeps the
//! submitted documents so that a successful dry run can be replayed later.

use super::state::{TransactionId, TransactionLogState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A submitted document and the response it produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDocument {
    #[serde(default)]
    pub name: Option<String>,
    pub doc_format: String,
    pub doc: String,
    #[serde(default)]
    pub response_json: Option<Value>,
}

impl TransactionDocument {
    pub fn json(doc: &Value) -> Self {
        Self {
            name: None,
            doc_format: "json".to_string(),
            doc: doc.to_string(),
            response_json: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Before and after properties of one mutated entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub entity_id: String,
    #[serde(default)]
    pub old_props: Option<Map<String, Value>>,
    #[serde(default)]
    pub new_props: Option<Map<String, Value>>,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub id: TransactionId,
    pub program: String,
    pub project: String,
    pub role: String,
    pub is_dry_run: bool,
    pub state: TransactionLogState,
    pub submitter: Option<String>,
    /// Input documents in a form that can be fed back to the transaction
    #[serde(default)]
    pub canonical_json: Vec<Value>,
    #[serde(default)]
    pub closed: bool,
    /// Transaction that replayed this dry run
    #[serde(default)]
    pub committed_by: Option<TransactionId>,
    pub created_datetime: DateTime<Utc>,
    /// When the outcome was last written
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub documents: Vec<TransactionDocument>,
    #[serde(default)]
    pub entities: Vec<TransactionSnapshot>,
}

impl TransactionLog {
    pub fn new(
        id: TransactionId,
        program: impl Into<String>,
        project: impl Into<String>,
        role: impl Into<String>,
        is_dry_run: bool,
    ) -> Self {
        Self {
            id,
            program: program.into(),
            project: project.into(),
            role: role.into(),
            is_dry_run,
            state: TransactionLogState::Pending,
            submitter: None,
            canonical_json: Vec::new(),
            closed: false,
            committed_by: None,
            created_datetime: Utc::now(),
            timestamp: None,
            documents: Vec::new(),
            entities: Vec::new(),
        }
    }

    pub fn project_id(&self) -> String {
        format!("{}-{}", self.program, self.project)
    }

    /// Response of the first document, if one was recorded
    pub fn response_json(&self) -> Option<&Value> {
        self.documents.first().and_then(|d| d.response_json.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_log_is_pending_and_open() {
        let log = TransactionLog::new(TransactionId::from_u64(1), "CGCI", "BLGSP", "update", true);
        assert_eq!(log.state, TransactionLogState::Pending);
        assert!(!log.closed);
        assert!(log.committed_by.is_none());
        assert_eq!(log.project_id(), "CGCI-BLGSP");
    }

    #[test]
    fn test_document_keeps_raw_text() {
        let doc = TransactionDocument::json(&json!({"type": "case"})).named("case.json");
        assert_eq!(doc.doc_format, "json");
        assert_eq!(doc.name.as_deref(), Some("case.json"));
        let parsed: Value = serde_json::from_str(&doc.doc).unwrap();
        assert_eq!(parsed["type"], "case");
    }
}
