// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! One node requested for deletion and the policy checks on it

use crate::auth::ROLE_DELETE;
use crate::dictionary::GraphValidator;
use crate::storage::{Node, StorageResult};
use crate::transactions::base::TransactionBase;
use crate::transactions::entity::{keys, EntityAction, EntityBase, EntityError, EntityErrorType};
use crate::transactions::ALLOWED_DELETION_STATES;
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub struct DeletionEntity {
    pub base: EntityBase,
    /// Sources of edges pointing at the node, captured before any delete
    neighbors: Vec<String>,
    /// Nodes left invalid by this deletion: id to label
    pub dependents: BTreeMap<String, String>,
}

impl DeletionEntity {
    pub fn new(tx: &TransactionBase, node: Node) -> StorageResult<Self> {
        let neighbors = tx
            .session
            .edges_in(&node.node_id)?
            .into_iter()
            .map(|e| e.src_id)
            .collect();

        let mut cases = Vec::new();
        if let Some(schema) = tx.ctx.dictionary.schema(&node.label) {
            for link in schema.all_links().into_iter().filter(|l| l.target_type == "case") {
                cases.extend(tx.session.neighbors_out(&node.node_id, &link.name)?);
            }
        }

        let mut base = EntityBase::for_node(node, EntityAction::Delete);
        base.related_cases = EntityBase::related_cases_from(&cases);
        if !tx.has_role(ROLE_DELETE) {
            base.record_error(
                format!("You do not have delete permission for project {}", tx.project_id()),
                vec![],
                EntityErrorType::InvalidPermissions,
            );
        }
        Ok(Self {
            base,
            neighbors,
            dependents: BTreeMap::new(),
        })
    }

    /// Placeholder for an id that matched no node in the project
    pub fn missing(id: &str) -> Self {
        let mut base = EntityBase::new();
        base.action = Some(EntityAction::Delete);
        base.push_error(
            EntityError::new("Entity not found.", keys(["id"]), EntityErrorType::NotFound)
                .with_extra("id", json!(id)),
        );
        Self {
            base,
            neighbors: Vec::new(),
            dependents: BTreeMap::new(),
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.base.node.as_ref().map(|n| n.node_id.as_str())
    }

    fn error_for_state(&mut self) {
        let Some(node) = self.base.node.as_ref() else {
            return;
        };
        let state = node.state();
        if ALLOWED_DELETION_STATES.contains(&state) {
            return;
        }
        let message = match state {
            Some("submitted") => "This node has been submitted. Deletion is disallowed for \
                                  submitted entities. This node must be redacted."
                .to_string(),
            other => format!(
                "Unable to delete entity because it is in state '{}'.",
                other.unwrap_or("None")
            ),
        };
        self.base
            .record_error(message, keys(["state"]), EntityErrorType::InvalidPermissions);
    }

    fn error_for_file_state(&mut self, tx: &TransactionBase) {
        let Some(node) = self.base.node.as_ref() else {
            return;
        };
        let Some(schema) = tx.ctx.dictionary.schema(&node.label) else {
            return;
        };
        let Some(definition) = schema.properties.get("file_state") else {
            return;
        };
        let initial = definition.get("default").and_then(Value::as_str);
        let file_state = node.file_state();
        if file_state.is_none() || file_state == initial {
            return;
        }
        let message = format!(
            "This node has file_state '{}'. Deletion is disallowed for entities that have raw \
             data uploaded to the GDC.  In order to delete this node you must first delete the \
             raw data with the Data Transfer Tool.",
            file_state.unwrap_or_default()
        );
        self.base.record_error(
            message,
            keys(["file_state"]),
            EntityErrorType::InvalidPermissions,
        );
    }

    /// Delete every node the deletion would leave invalid, transitively
    ///
    /// Runs against a session in which the requested nodes are already gone.
    /// Dependents are deleted as they are found; the caller restores the
    /// session so other requested entities see them again.
    fn collect_dependents(&mut self, tx: &mut TransactionBase) -> StorageResult<()> {
        let mut pending = self.neighbors.clone();
        while let Some(node_id) = pending.pop() {
            if self.dependents.contains_key(&node_id) {
                continue;
            }
            let Some(node) = tx.session.get_node(&node_id)? else {
                continue;
            };
            let violations = GraphValidator::new(&tx.ctx.dictionary).validate(&tx.session, &node)?;
            if violations.is_empty() {
                continue;
            }
            log::debug!("{} depends on {:?}", node.node_id, self.node_id());
            pending.extend(
                tx.session
                    .edges_in(&node.node_id)?
                    .into_iter()
                    .map(|e| e.src_id),
            );
            tx.session.delete(&node.node_id)?;
            self.dependents.insert(node.node_id, node.label);
        }
        Ok(())
    }

    fn error_for_dependents(&mut self, tx: &mut TransactionBase) -> StorageResult<()> {
        let savepoint = tx.session.savepoint();
        let collected = self.collect_dependents(tx);
        tx.session.restore(savepoint);
        collected?;
        if self.dependents.is_empty() {
            return Ok(());
        }
        let listed: Vec<Value> = self
            .dependents
            .iter()
            .map(|(id, label)| json!({"id": id, "type": label}))
            .collect();
        self.base.push_error(
            EntityError::new(
                format!(
                    "Unable to delete entity because at least {} other(s) directly or indirectly \
                     depend on it. You can only delete this entity by deleting its dependents \
                     prior to, or during the same transaction as this one.",
                    self.dependents.len()
                ),
                vec![],
                EntityErrorType::InvalidLink,
            )
            .with_extra("dependents", Value::Array(listed)),
        );
        Ok(())
    }

    /// Policy checks, with the requested nodes deleted in `tx.session`
    pub fn test_deletion(&mut self, tx: &mut TransactionBase) -> StorageResult<()> {
        log::info!("testing deletion tree from {:?}", self.node_id());
        self.error_for_state();
        self.error_for_file_state(tx);
        self.error_for_dependents(tx)
    }
}
