// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Deletion entry points
//!
//! Feasibility is tested by performing the deletion in the session and
//! restoring a savepoint afterwards; only then is the deletion applied for
//! real and committed.

use super::entity::DeletionEntity;
use crate::auth::ROLE_DELETE;
use crate::error::{SubmissionError, SubmissionResult};
use crate::transactions::base::{IndexOp, Transaction, TransactionBase};
use crate::transactions::context::{TransactionContext, TransactionOptions};
use crate::transactions::entity::{keys, EntityAction, EntityBase, EntityErrorType};
use crate::transactions::TransactionResult;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

const REQUIRED_PROJECT_STATES: &[&str] = &["open"];

/// The request as stored on the log: bare ids, or `{id, fields}` objects
/// for a field deletion
fn canonical_request(ids: &[String], fields: Option<&[String]>) -> Vec<Value> {
    ids.iter()
        .map(|id| match fields {
            Some(fields) => json!({"id": id, "fields": fields}),
            None => json!(id),
        })
        .collect()
}

fn malformed_request(item: &Value) -> SubmissionError {
    SubmissionError::user(format!(
        "Unable to resubmit deletion request, unexpected item {}",
        item
    ))
}

pub struct DeletionTransaction {
    base: TransactionBase,
    entities: Vec<DeletionEntity>,
    /// Set when only these properties are removed
    fields: Option<Vec<String>>,
}

impl DeletionTransaction {
    /// Delete the nodes with `ids`, all or nothing
    pub fn run(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
        ids: &[String],
    ) -> SubmissionResult<TransactionResult> {
        Self::start(ctx, opts, ids, None)
    }

    /// Null the optional properties `fields` on the nodes with `ids`
    pub fn run_fields(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
        ids: &[String],
        fields: &[String],
    ) -> SubmissionResult<TransactionResult> {
        Self::start(ctx, opts, ids, Some(fields.to_vec()))
    }

    /// Run again the request recorded by [`canonical_request`]
    pub fn replay(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
        canonical: &[Value],
    ) -> SubmissionResult<TransactionResult> {
        let mut ids = Vec::with_capacity(canonical.len());
        let mut fields: Option<Vec<String>> = None;
        for item in canonical {
            match item {
                Value::String(id) => ids.push(id.clone()),
                Value::Object(map) => {
                    let id = map.get("id").and_then(Value::as_str);
                    let listed = map.get("fields").and_then(Value::as_array);
                    let (Some(id), Some(listed)) = (id, listed) else {
                        return Err(malformed_request(item));
                    };
                    ids.push(id.to_string());
                    fields = Some(
                        listed
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect(),
                    );
                }
                other => return Err(malformed_request(other)),
            }
        }
        Self::start(ctx, opts, &ids, fields)
    }

    fn start(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
        ids: &[String],
        fields: Option<Vec<String>>,
    ) -> SubmissionResult<TransactionResult> {
        let mut base = TransactionBase::new(ctx, opts.role(ROLE_DELETE), REQUIRED_PROJECT_STATES)?;
        base.log.canonical_json = canonical_request(ids, fields.as_deref());
        let mut tx = Self {
            base,
            entities: Vec::new(),
            fields,
        };
        let outcome = tx.execute(ids);
        Ok(tx.finish(outcome))
    }

    fn execute(&mut self, ids: &[String]) -> SubmissionResult<()> {
        self.get_nodes(ids)?;
        match self.fields.clone() {
            Some(fields) => self.delete_fields(&fields)?,
            None => {
                self.test_deletion()?;
                if self.success() {
                    self.delete_entities()?;
                }
            }
        }
        self.commit(true)
    }

    fn get_nodes(&mut self, ids: &[String]) -> SubmissionResult<()> {
        let project_id = self.base.project_id();
        let mut seen = BTreeSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let node = self
                .base
                .session
                .get_node(id)?
                .filter(|n| n.project_id() == Some(project_id.as_str()));
            let entity = match node {
                Some(node) => DeletionEntity::new(&self.base, node)?,
                None => DeletionEntity::missing(id),
            };
            self.entities.push(entity);
        }
        Ok(())
    }

    fn stage_deletes(&mut self) -> SubmissionResult<()> {
        for entity in self.entities.iter().filter(|e| e.base.is_valid()) {
            if let Some(node_id) = entity.node_id() {
                self.base.session.delete(node_id)?;
            }
        }
        Ok(())
    }

    fn test_deletion(&mut self) -> SubmissionResult<()> {
        let savepoint = self.base.session.savepoint();
        let outcome = self.stage_deletes().and_then(|()| {
            for entity in self.entities.iter_mut().filter(|e| e.base.is_valid()) {
                entity.test_deletion(&mut self.base)?;
            }
            Ok(())
        });
        self.base.session.restore(savepoint);
        outcome
    }

    fn delete_entities(&mut self) -> SubmissionResult<()> {
        self.stage_deletes()?;
        let dictionary = Arc::clone(&self.base.ctx.dictionary);
        for entity in &self.entities {
            let Some(node) = entity.base.node.as_ref() else {
                continue;
            };
            if dictionary.schema(&node.label).map_or(false, |s| s.is_file()) {
                self.base
                    .index_ops
                    .push(IndexOp::MarkDeleted(node.node_id.clone()));
            }
        }
        Ok(())
    }

    fn delete_fields(&mut self, fields: &[String]) -> SubmissionResult<()> {
        let dictionary = Arc::clone(&self.base.ctx.dictionary);
        for entity in self.entities.iter_mut().filter(|e| e.base.is_valid()) {
            let Some(mut node) = entity.base.node.take() else {
                continue;
            };
            if let Some(schema) = dictionary.schema(&node.label) {
                for field in fields {
                    if !schema.has_property(field) {
                        entity.base.record_error(
                            format!(
                                "Attempted to delete non-existing field \"{}\" in a node {}",
                                field, node.node_id
                            ),
                            keys([field.as_str()]),
                            EntityErrorType::InvalidProperty,
                        );
                    } else if schema.is_protected(field) {
                        entity.base.record_error(
                            format!(
                                "Unable to delete protected field \"{}\" in a {} node",
                                field, node.label
                            ),
                            keys([field.as_str()]),
                            EntityErrorType::InvalidPermissions,
                        );
                    } else {
                        node.set(field.as_str(), Value::Null);
                    }
                }
            }
            entity.base.action = Some(EntityAction::Update);
            entity.base.node = Some(node);
        }

        if self.success() {
            for entity in &self.entities {
                if let Some(node) = entity.base.node.as_ref() {
                    self.base.session.merge(node.clone())?;
                }
            }
        }
        Ok(())
    }

    fn deleted_entity_count(&self) -> usize {
        if self.success() {
            self.entities.len()
        } else {
            0
        }
    }

    fn dependent_ids(&self) -> String {
        self.entities
            .iter()
            .flat_map(|e| e.dependents.keys().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Transaction for DeletionTransaction {
    fn base(&self) -> &TransactionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TransactionBase {
        &mut self.base
    }

    fn entities(&self) -> Vec<&EntityBase> {
        self.entities.iter().map(|e| &e.base).collect()
    }

    fn message(&self) -> String {
        let count = self.entities.len();
        match (self.success(), self.base.dry_run) {
            (true, false) => format!("Successfully deleted {} entities", count),
            (true, true) => format!("Dry run successful. Would have deleted {} entities", count),
            (false, _) => "Deletion transaction failed.".to_string(),
        }
    }

    fn json(&self) -> Value {
        let mut doc = self.base_json();
        if let Value::Object(map) = &mut doc {
            map.insert("deleted_entity_count".into(), json!(self.deleted_entity_count()));
            map.insert("dependent_ids".into(), json!(self.dependent_ids()));
        }
        doc
    }
}
