// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Upload and bulk upload entry points

use super::batch::{attribute_violations, flag_duplicates, upload_status, UploadBatch};
use super::entity::UploadEntity;
use crate::error::{SubmissionError, SubmissionResult};
use crate::storage::StorageError;
use crate::transactions::base::{Transaction, TransactionBase, TransactionalError};
use crate::transactions::context::{TransactionContext, TransactionOptions};
use crate::transactions::entity::EntityBase;
use crate::transactions::TransactionResult;
use crate::txn::TransactionDocument;
use serde_json::{json, Map, Value};
use std::sync::Arc;

const REQUIRED_PROJECT_STATES: &[&str] = &["open"];

const BULK_FORMAT_MESSAGE: &str = "Bulk transfers must be an array of JSON objects of format: {\n    \
                                   \"name\": string,\n    \"doc_format\": string,\n    \"doc\": string,\n}";

/// Stage, link, flush and graph-validate every batch in one session
///
/// Link targets created anywhere in the transaction are visible because all
/// nodes are staged before any link is resolved.
fn process_batches(
    tx: &mut TransactionBase,
    batches: &mut [UploadBatch],
    duplicate_message: &str,
) -> SubmissionResult<()> {
    {
        let dictionary = Arc::clone(&tx.ctx.dictionary);
        let check_file_hashes = tx.ctx.config.enforce_file_hash_size_uniqueness;
        let mut all: Vec<&mut UploadEntity> = batches
            .iter_mut()
            .flat_map(|b| b.entities.iter_mut())
            .collect();
        flag_duplicates(&mut all, &dictionary, check_file_hashes, duplicate_message);
    }

    for batch in batches.iter_mut() {
        batch.stage(tx)?;
    }
    for batch in batches.iter_mut() {
        batch.create_links(tx)?;
    }

    match tx.session.flush() {
        Ok(()) => {}
        Err(StorageError::UniqueViolation(violations)) => {
            let mut all: Vec<&mut UploadEntity> = batches
                .iter_mut()
                .flat_map(|b| b.entities.iter_mut())
                .collect();
            let unattributed = attribute_violations(&mut all, violations);
            tx.transactional_errors.extend(unattributed);
        }
        Err(e) => return Err(e.into()),
    }

    for batch in batches.iter_mut() {
        batch.post_validate(tx)?;
    }
    Ok(())
}

/// Create or update entities from one JSON document or list of documents
pub struct UploadTransaction {
    base: TransactionBase,
    batch: UploadBatch,
}

impl UploadTransaction {
    pub fn run(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
        docs: Value,
    ) -> SubmissionResult<TransactionResult> {
        let mut base = TransactionBase::new(ctx, opts, REQUIRED_PROJECT_STATES)?;
        base.log.documents.push(TransactionDocument::json(&docs));
        let mut tx = Self {
            base,
            batch: UploadBatch::new(None),
        };
        let outcome = tx.execute(docs);
        Ok(tx.finish(outcome))
    }

    fn execute(&mut self, docs: Value) -> SubmissionResult<()> {
        self.batch.parse_documents(&mut self.base, docs)?;
        process_batches(
            &mut self.base,
            std::slice::from_mut(&mut self.batch),
            "Entity is duplicated elsewhere in transaction",
        )?;
        self.commit(true)
    }
}

impl Transaction for UploadTransaction {
    fn base(&self) -> &TransactionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TransactionBase {
        &mut self.base
    }

    fn entities(&self) -> Vec<&EntityBase> {
        self.batch.entities.iter().map(|e| &e.base).collect()
    }

    fn transactional_errors(&self) -> Vec<TransactionalError> {
        let mut errors = self.base.transactional_errors.clone();
        errors.extend(self.batch.transactional_errors.iter().cloned());
        errors
    }

    fn status_code(&self) -> u16 {
        upload_status(self.success(), self.base.dry_run, &self.base.role)
    }

    fn json(&self) -> Value {
        self.batch
            .json(&self.base, &self.transactional_errors(), self.code())
    }
}

/// Several named documents validated together and committed all-or-nothing
pub struct BulkUploadTransaction {
    base: TransactionBase,
    batches: Vec<UploadBatch>,
}

/// A validated bulk wrapper: `{name, doc_format, doc}`
struct BulkDocument {
    name: String,
    doc_format: String,
    doc: Value,
}

impl BulkDocument {
    fn from_wrapper(index: usize, wrapper: &Map<String, Value>) -> SubmissionResult<Self> {
        let missing: Vec<&str> = ["doc_format", "doc", "name"]
            .into_iter()
            .filter(|key| !wrapper.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(SubmissionError::user(format!(
                "Missing required field in document {}: {:?}",
                index, missing
            )));
        }
        let text = |key: &str| match wrapper.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Ok(Self {
            name: text("name"),
            doc_format: text("doc_format").to_lowercase(),
            doc: wrapper.get("doc").cloned().unwrap_or(Value::Null),
        })
    }

    fn raw(&self) -> String {
        match &self.doc {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn parse(&self) -> SubmissionResult<Value> {
        if self.doc_format != "json" {
            return Err(SubmissionError::user_with_code(
                format!("Unsupported document format: {}", self.doc_format),
                415,
            ));
        }
        match &self.doc {
            Value::String(raw) => serde_json::from_str(raw).map_err(|e| {
                SubmissionError::user(format!("Unable to parse doc {}: {}", self.name, e))
            }),
            other => Ok(other.clone()),
        }
    }
}

impl BulkUploadTransaction {
    pub fn run(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
        wrappers: Value,
    ) -> SubmissionResult<TransactionResult> {
        let wrappers = match wrappers {
            Value::Array(items) if items.iter().all(Value::is_object) => items,
            _ => return Err(SubmissionError::user(BULK_FORMAT_MESSAGE)),
        };
        let base = TransactionBase::new(ctx, opts, REQUIRED_PROJECT_STATES)?;
        let mut tx = Self {
            base,
            batches: Vec::new(),
        };
        let outcome = tx.execute(wrappers);
        Ok(tx.finish(outcome))
    }

    fn execute(&mut self, wrappers: Vec<Value>) -> SubmissionResult<()> {
        for (index, wrapper) in wrappers.iter().enumerate() {
            let Value::Object(wrapper) = wrapper else {
                continue;
            };
            self.add_document(index, wrapper)?;
        }

        process_batches(
            &mut self.base,
            &mut self.batches,
            "Entity is duplicated elsewhere in bulk transaction",
        )?;
        for batch in self.batches.iter_mut() {
            batch.record_if_empty();
        }
        self.commit(true)
    }

    fn add_document(&mut self, index: usize, wrapper: &Map<String, Value>) -> SubmissionResult<()> {
        let document = BulkDocument::from_wrapper(index, wrapper)?;
        self.base.log.documents.push(
            TransactionDocument {
                name: None,
                doc_format: document.doc_format.clone(),
                doc: document.raw(),
                response_json: None,
            }
            .named(document.name.clone()),
        );
        let mut batch = UploadBatch::new(Some(document.name.clone()));
        let outcome = document
            .parse()
            .and_then(|docs| batch.parse_documents(&mut self.base, docs));
        self.batches.push(batch);
        outcome
    }

    fn subtransaction_json(&self) -> Vec<Value> {
        self.batches
            .iter()
            .map(|batch| {
                let errors = &batch.transactional_errors;
                let success = errors.is_empty() && batch.entity_error_count() == 0;
                let code = upload_status(success, self.base.dry_run, &self.base.role);
                batch.json(&self.base, errors, code)
            })
            .collect()
    }
}

impl Transaction for BulkUploadTransaction {
    fn base(&self) -> &TransactionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TransactionBase {
        &mut self.base
    }

    fn entities(&self) -> Vec<&EntityBase> {
        self.batches
            .iter()
            .flat_map(|b| b.entities.iter().map(|e| &e.base))
            .collect()
    }

    fn success(&self) -> bool {
        self.base.transactional_errors.is_empty()
            && self.batches.iter().all(|b| {
                !b.entities.is_empty()
                    && b.transactional_errors.is_empty()
                    && b.entity_error_count() == 0
            })
    }

    fn status_code(&self) -> u16 {
        upload_status(self.success(), self.base.dry_run, &self.base.role)
    }

    fn message(&self) -> String {
        if self.success() {
            "Bulk Transaction succeeded.".to_string()
        } else {
            "Bulk Transaction failed.".to_string()
        }
    }

    fn json(&self) -> Value {
        let subtransactions = self.subtransaction_json();
        let sum = |key: &str| -> u64 {
            subtransactions
                .iter()
                .filter_map(|j| j.get(key).and_then(Value::as_u64))
                .sum()
        };
        let document_error_count = subtransactions
            .iter()
            .filter(|j| j.get("success") != Some(&Value::Bool(true)))
            .count();
        json!({
            "transaction_id": self.base.transaction_id(),
            "transactional_errors": self.base.transactional_errors,
            "success": self.success(),
            "message": self.message(),
            "entity_error_count": sum("entity_error_count"),
            "updated_entity_count": sum("updated_entity_count"),
            "created_entity_count": sum("created_entity_count"),
            "document_error_count": document_error_count,
            "code": self.code(),
            "subtransactions": self
                .batches
                .iter()
                .zip(subtransactions.iter())
                .map(|(batch, response)| json!({"name": batch.name, "response_json": response}))
                .collect::<Vec<_>>(),
        })
    }

    /// Snapshots only for a successful transaction; one response per document
    fn write_transaction_log(&mut self) -> SubmissionResult<()> {
        let snapshots = if self.success() {
            self.entities().iter().filter_map(|e| e.snapshot()).collect()
        } else {
            Vec::new()
        };
        let responses = self.subtransaction_json();
        let base = self.base_mut();
        base.log.entities = snapshots;
        for (document, response) in base.log.documents.iter_mut().zip(responses) {
            document.response_json = Some(response);
        }
        base.add_stub_document();
        base.save_log()
    }
}
