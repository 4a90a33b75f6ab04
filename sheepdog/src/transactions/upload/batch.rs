// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! The entities of one submitted document, processed as a set

use super::entity::UploadEntity;
use crate::auth::ROLE_CREATE;
use crate::dictionary::Dictionary;
use crate::error::SubmissionResult;
use crate::storage::UniqueViolation;
use crate::transactions::base::{TransactionBase, TransactionalError};
use crate::transactions::entity::{secondary_keys, EntityAction, EntityErrorType};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Documents parsed from one request body (or one bulk wrapper)
#[derive(Default)]
pub struct UploadBatch {
    /// Bulk wrapper name
    pub name: Option<String>,
    pub entities: Vec<UploadEntity>,
    pub transactional_errors: Vec<TransactionalError>,
}

impl UploadBatch {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    /// Parse, instantiate and schema-validate a document or list of documents
    pub fn parse_documents(&mut self, tx: &mut TransactionBase, docs: Value) -> SubmissionResult<()> {
        let docs = match docs {
            Value::Array(docs) => docs,
            doc @ Value::Object(_) => vec![doc],
            _ => {
                self.transactional_errors.push(TransactionalError::Message(
                    "Unable to parse document: expected a JSON object or a list of JSON objects"
                        .to_string(),
                ));
                return Ok(());
            }
        };
        tx.log.canonical_json.extend(docs.iter().cloned());

        for doc in docs {
            let entity = UploadEntity::parse(tx, doc);
            self.entities.push(entity);
        }
        for entity in self.entities.iter_mut() {
            entity.instantiate(tx)?;
        }
        for entity in self.entities.iter_mut() {
            entity.pre_validate(tx);
        }
        log::debug!(
            "transaction {}: parsed {} entities",
            tx.log.id,
            self.entities.len()
        );
        Ok(())
    }

    pub fn stage(&mut self, tx: &mut TransactionBase) -> SubmissionResult<()> {
        for entity in self.entities.iter_mut() {
            entity.flush_to_session(tx)?;
        }
        Ok(())
    }

    pub fn create_links(&mut self, tx: &mut TransactionBase) -> SubmissionResult<()> {
        for entity in self.entities.iter_mut() {
            entity.create_links(tx)?;
        }
        Ok(())
    }

    pub fn post_validate(&mut self, tx: &TransactionBase) -> SubmissionResult<()> {
        for entity in self.entities.iter_mut() {
            entity.post_validate(tx)?;
        }
        Ok(())
    }

    pub fn record_if_empty(&mut self) {
        if self.entities.is_empty() {
            self.transactional_errors
                .push(TransactionalError::Message("Nothing to submit".to_string()));
        }
    }

    pub fn entity_error_count(&self) -> usize {
        self.entities.iter().filter(|e| !e.is_valid()).count()
    }

    fn action_count(&self, success: bool, actions: &[EntityAction]) -> usize {
        if !success {
            return 0;
        }
        self.entities
            .iter()
            .filter(|e| e.base.action.map_or(false, |a| actions.contains(&a)))
            .count()
    }

    pub fn created_entity_count(&self, success: bool) -> usize {
        self.action_count(success, &[EntityAction::Create])
    }

    pub fn updated_entity_count(&self, success: bool) -> usize {
        self.action_count(success, &[EntityAction::Update, EntityAction::Version])
    }

    fn related_case_count(&self, actions: &[EntityAction]) -> usize {
        self.entities
            .iter()
            .filter(|e| e.base.action.map_or(false, |a| actions.contains(&a)))
            .flat_map(|e| e.base.related_cases.iter())
            .filter_map(|case| case.get("id").and_then(Value::as_str))
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Upload response for this batch given its effective transactional errors
    pub fn json(&self, tx: &TransactionBase, errors: &[TransactionalError], code: u16) -> Value {
        let entity_error_count = self.entity_error_count();
        let success = errors.is_empty() && entity_error_count == 0;
        let dictionary = &tx.ctx.dictionary;
        json!({
            "transaction_id": tx.transaction_id(),
            "success": success,
            "entity_error_count": entity_error_count,
            "transactional_error_count": errors.len(),
            "entities": self.entities.iter().map(|e| e.base.to_json(dictionary)).collect::<Vec<_>>(),
            "code": code,
            "message": upload_message(success, tx.dry_run, entity_error_count, errors.len()),
            "transactional_errors": errors,
            "created_entity_count": self.created_entity_count(success),
            "updated_entity_count": self.updated_entity_count(success),
            "cases_related_to_created_entities_count": self.related_case_count(&[EntityAction::Create]),
            "cases_related_to_updated_entities_count":
                self.related_case_count(&[EntityAction::Update, EntityAction::Version]),
        })
    }
}

/// Status of an upload: 201 for a committed create, 400 for any failure
pub fn upload_status(success: bool, dry_run: bool, role: &str) -> u16 {
    match (success, dry_run) {
        (false, _) => 400,
        (true, false) if role == ROLE_CREATE => 201,
        _ => 200,
    }
}

pub fn upload_message(
    success: bool,
    dry_run: bool,
    entity_error_count: usize,
    transactional_error_count: usize,
) -> String {
    if success {
        return if dry_run {
            "Transaction would have been successful. User selected dry run option, transaction \
             aborted, no data written to database."
                .to_string()
        } else {
            "Transaction successful.".to_string()
        };
    }
    let mut message = "Transaction aborted due to ".to_string();
    if entity_error_count > 0 {
        let noun = if entity_error_count > 1 { "entities" } else { "entity" };
        message.push_str(&format!("{} invalid {}", entity_error_count, noun));
    }
    if entity_error_count > 0 && transactional_error_count > 0 {
        message.push_str(" and ");
    }
    if transactional_error_count > 0 {
        message.push_str(&format!("{} transactional error(s)", transactional_error_count));
    }
    message.push('.');
    message
}

/// Flag entities that resolve to the same node, key tuple or file content
pub(crate) fn flag_duplicates(
    entities: &mut [&mut UploadEntity],
    dictionary: &Dictionary,
    check_file_hashes: bool,
    message: &str,
) {
    let mut claims: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut file_claims: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for (i, entity) in entities.iter().enumerate() {
        let Some(node) = entity.base.node.as_ref() else {
            continue;
        };
        claims.entry(format!("id:{}", node.node_id)).or_default().push(i);
        if let Some(schema) = dictionary.schema(&node.label) {
            for sk in secondary_keys(schema, &node.props) {
                let key = format!("key:{}:{}", node.label, Value::Object(sk));
                claims.entry(key).or_default().push(i);
            }
        }
        if check_file_hashes && entity.is_file() {
            if let (Some(md5), Some(size)) = (node.get_str("md5sum"), node.get("file_size")) {
                file_claims
                    .entry(format!("{}:{}", md5, size))
                    .or_default()
                    .push(i);
            }
        }
    }

    let duplicated = |claims: BTreeMap<String, Vec<usize>>| -> BTreeSet<usize> {
        claims
            .into_values()
            .filter(|holders| holders.len() > 1)
            .flatten()
            .collect()
    };
    for i in duplicated(claims) {
        entities[i]
            .base
            .record_error(message, vec![], EntityErrorType::NotUnique);
    }
    for i in duplicated(file_claims) {
        entities[i].base.record_error(
            "File with the same md5sum and file_size is duplicated elsewhere in transaction",
            vec!["md5sum".to_string(), "file_size".to_string()],
            EntityErrorType::NotUnique,
        );
    }
}

/// Attach flush-time key collisions to the entities that caused them
///
/// Violations that no entity of the transaction owns come back as
/// transactional errors.
pub(crate) fn attribute_violations(
    entities: &mut [&mut UploadEntity],
    violations: Vec<UniqueViolation>,
) -> Vec<TransactionalError> {
    let mut unattributed = Vec::new();
    for violation in violations {
        let values: Vec<String> = violation.values.iter().map(Value::to_string).collect();
        let message = format!(
            "Entity is not unique, {} with ({})=({}) already exists",
            violation.label,
            violation.keys.join(", "),
            values.join(", ")
        );
        let mut attributed = false;
        for entity in entities.iter_mut() {
            let owns = entity
                .base
                .node
                .as_ref()
                .map_or(false, |n| violation.node_ids.contains(&n.node_id));
            if owns {
                entity.base.record_error(
                    message.clone(),
                    violation.keys.clone(),
                    EntityErrorType::NotUnique,
                );
                attributed = true;
            }
        }
        if !attributed {
            log::warn!("unique violation not owned by any entity: {}", violation);
            let mut extra = Map::new();
            extra.insert("keys".to_string(), json!(violation.keys));
            extra.insert("values".to_string(), json!(violation.values));
            unattributed.push(TransactionalError::Detailed { message, extra });
        }
    }
    unattributed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_status() {
        assert_eq!(upload_status(true, false, "create"), 201);
        assert_eq!(upload_status(true, false, "update"), 200);
        assert_eq!(upload_status(true, true, "create"), 200);
        assert_eq!(upload_status(false, true, "create"), 400);
        assert_eq!(upload_status(false, false, "update"), 400);
    }

    #[test]
    fn test_upload_message() {
        assert_eq!(upload_message(true, false, 0, 0), "Transaction successful.");
        assert!(upload_message(true, true, 0, 0).contains("no data written to database"));
        assert_eq!(
            upload_message(false, false, 1, 0),
            "Transaction aborted due to 1 invalid entity."
        );
        assert_eq!(
            upload_message(false, false, 3, 2),
            "Transaction aborted due to 3 invalid entities and 2 transactional error(s)."
        );
        assert_eq!(
            upload_message(false, false, 0, 1),
            "Transaction aborted due to 1 transactional error(s)."
        );
    }
}
