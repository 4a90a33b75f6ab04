// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction skeleton: log claim, commit flow and response shape

use super::context::{TransactionContext, TransactionOptions};
use super::entity::EntityBase;
use super::{TransactionResult, MESSAGE_500};
use crate::error::{SubmissionError, SubmissionResult};
use crate::index::{IndexAlias, IndexDocument, IndexVersionHelper};
use crate::storage::{GraphSession, Node};
use crate::txn::{TransactionDocument, TransactionId, TransactionLog, TransactionLogState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// An error that concerns the transaction as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransactionalError {
    Detailed {
        message: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Message(String),
}

impl TransactionalError {
    pub fn message(&self) -> &str {
        match self {
            TransactionalError::Message(message) => message,
            TransactionalError::Detailed { message, .. } => message,
        }
    }
}

/// Index-service write deferred until the graph commit
///
/// Dry runs and failed transactions never reach the index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOp {
    Create {
        doc: IndexDocument,
        alias: Option<IndexAlias>,
    },
    Patch(IndexDocument),
    /// New content for the family of `family_did`
    AddVersion {
        family_did: String,
        doc: IndexDocument,
    },
    Release {
        release_number: String,
        node_id: String,
    },
    /// Flag a record deleted once its node is gone
    MarkDeleted(String),
}

impl IndexOp {
    fn is_post_commit(&self) -> bool {
        matches!(self, IndexOp::MarkDeleted(_))
    }
}

/// State every transaction kind carries
pub struct TransactionBase {
    pub ctx: Arc<TransactionContext>,
    pub program: String,
    pub project: String,
    pub role: String,
    pub dry_run: bool,
    pub user: String,
    pub log: TransactionLog,
    pub session: GraphSession,
    pub transactional_errors: Vec<TransactionalError>,
    pub index_ops: Vec<IndexOp>,
    /// Status forced by an aborting error
    pub error_code: Option<u16>,
}

impl TransactionBase {
    /// Check the project state, then durably claim a transaction log
    pub fn new(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
        required_states: &[&str],
    ) -> SubmissionResult<Self> {
        let session = ctx.session();
        let project = ctx.lookup_project(&session, &opts.program, &opts.project)?;
        let state = ctx.project_state(&project);
        if !required_states.contains(&state.as_str()) {
            return Err(SubmissionError::user(format!(
                "Project is in state '{}', which prevents {}. In order to perform this action, \
                 the project must be in state <{}>.",
                state,
                opts.role,
                required_states.join(" or ")
            )));
        }

        let mut log = match opts.transaction_id {
            Some(id) => ctx.logs.get(id)?.ok_or_else(|| {
                SubmissionError::internal(format!("transaction log {} was never claimed", id))
            })?,
            None => ctx
                .logs
                .claim(&opts.program, &opts.project, &opts.role, opts.dry_run)?,
        };
        if !opts.user.is_empty() {
            log.submitter = Some(opts.user.clone());
        }
        log::info!(
            "transaction {} started: {} on {} (dry_run={})",
            log.id,
            opts.role,
            opts.project_id(),
            opts.dry_run
        );

        Ok(Self {
            ctx: ctx.clone(),
            program: opts.program,
            project: opts.project,
            role: opts.role,
            dry_run: opts.dry_run,
            user: opts.user,
            log,
            session,
            transactional_errors: Vec::new(),
            index_ops: Vec::new(),
            error_code: None,
        })
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.log.id
    }

    pub fn project_id(&self) -> String {
        format!("{}-{}", self.program, self.project)
    }

    pub fn project_node(&self) -> SubmissionResult<Node> {
        self.ctx
            .lookup_project(&self.session, &self.program, &self.project)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.ctx
            .authz
            .has_role(&self.user, &self.program, &self.project, role)
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.transactional_errors
            .push(TransactionalError::Message(message.into()));
    }

    pub fn set_state(&mut self, state: TransactionLogState) {
        self.log.state = state;
    }

    /// Document placeholder for transactions without a submitted body
    pub fn add_stub_document(&mut self) {
        if self.log.documents.is_empty() {
            self.log.documents.push(TransactionDocument {
                name: None,
                doc_format: "N/A".to_string(),
                doc: String::new(),
                response_json: None,
            });
        }
    }

    pub fn save_log(&mut self) -> SubmissionResult<()> {
        self.log.timestamp = Some(Utc::now());
        self.ctx.logs.save(&self.log)?;
        Ok(())
    }

    /// Discard staged graph changes and pending index writes
    pub fn rollback(&mut self) {
        self.session.rollback();
        self.index_ops.clear();
    }

    /// Apply pending index writes, then commit the session
    ///
    /// Records created in the index are removed again if the graph commit
    /// fails.
    pub fn commit_changes(&mut self) -> Result<(), String> {
        let ops = std::mem::take(&mut self.index_ops);
        let (pre, post): (Vec<IndexOp>, Vec<IndexOp>) =
            ops.into_iter().partition(|op| !op.is_post_commit());

        let mut created = Vec::new();
        for op in pre {
            if let Err(e) = self.apply_index_op(op, &mut created) {
                self.compensate(&created);
                return Err(e);
            }
        }

        if let Err(e) = self.session.commit() {
            self.compensate(&created);
            return Err(e.to_string());
        }

        for op in post {
            let mut ignored = Vec::new();
            if let Err(e) = self.apply_index_op(op, &mut ignored) {
                log::warn!("transaction {}: post-commit index update failed: {}", self.log.id, e);
            }
        }
        Ok(())
    }

    fn apply_index_op(&self, op: IndexOp, created: &mut Vec<String>) -> Result<(), String> {
        let index = &self.ctx.index;
        match op {
            IndexOp::Create { doc, alias } => {
                let record = index.create(doc).map_err(|e| e.to_string())?;
                created.push(record.did.clone());
                if let Some(alias) = alias {
                    if let Err(e) = index.create_alias(alias) {
                        log::warn!("unable to alias index record {}: {}", record.did, e);
                    }
                }
            }
            IndexOp::Patch(doc) => {
                index.patch(&doc).map_err(|e| e.to_string())?;
            }
            IndexOp::AddVersion { family_did, doc } => {
                let helper = IndexVersionHelper::new(index.clone());
                let record = helper
                    .add_node_version(&family_did, doc)
                    .map_err(|e| e.to_string())?;
                if record.did != family_did {
                    created.push(record.did);
                }
            }
            IndexOp::Release {
                release_number,
                node_id,
            } => {
                let helper = IndexVersionHelper::new(index.clone());
                helper
                    .release_node(&release_number, &node_id, false)
                    .map_err(|e| e.to_string())?;
            }
            IndexOp::MarkDeleted(did) => {
                if let Some(mut record) = index.get(&did).map_err(|e| e.to_string())? {
                    record.metadata.insert("deleted".into(), json!("True"));
                    index.patch(&record).map_err(|e| e.to_string())?;
                }
            }
        }
        Ok(())
    }

    fn compensate(&self, created: &[String]) {
        for did in created {
            if let Err(e) = self.ctx.index.delete(did) {
                log::error!("unable to remove index record {} after failed commit: {}", did, e);
            }
        }
    }
}

impl Drop for TransactionBase {
    fn drop(&mut self) {
        self.rollback();
        if self.log.state == TransactionLogState::Pending {
            log::warn!("transaction {} dropped while pending", self.log.id);
            self.log.state = TransactionLogState::Errored;
            if let Err(e) = self.save_log() {
                log::error!("unable to close transaction log {}: {}", self.log.id, e);
            }
        }
    }
}

/// Behavior shared by every transaction kind
pub trait Transaction {
    fn base(&self) -> &TransactionBase;

    fn base_mut(&mut self) -> &mut TransactionBase;

    fn entities(&self) -> Vec<&EntityBase>;

    fn transactional_errors(&self) -> Vec<TransactionalError> {
        self.base().transactional_errors.clone()
    }

    fn entity_error_count(&self) -> usize {
        self.entities().iter().filter(|e| !e.is_valid()).count()
    }

    fn success(&self) -> bool {
        self.transactional_errors().is_empty() && self.entity_error_count() == 0
    }

    fn status_code(&self) -> u16 {
        if self.success() {
            200
        } else {
            400
        }
    }

    fn code(&self) -> u16 {
        self.base().error_code.unwrap_or_else(|| self.status_code())
    }

    fn message(&self) -> String {
        let count = self.entities().len();
        match (self.success(), self.base().dry_run) {
            (true, true) => format!("Dry run successful with {} entities", count),
            (true, false) => format!("Transaction successful with {} entities", count),
            (false, _) => "Transaction failed.".to_string(),
        }
    }

    fn entities_json(&self) -> Vec<Value> {
        let dictionary = &self.base().ctx.dictionary;
        self.entities()
            .iter()
            .map(|e| e.to_json(dictionary))
            .collect()
    }

    fn base_json(&self) -> Value {
        let errors = self.transactional_errors();
        json!({
            "transaction_id": self.base().transaction_id(),
            "success": self.success(),
            "entity_error_count": self.entity_error_count(),
            "transactional_error_count": errors.len(),
            "entities": self.entities_json(),
            "code": self.code(),
            "message": self.message(),
            "transactional_errors": errors,
        })
    }

    fn json(&self) -> Value {
        self.base_json()
    }

    /// Store snapshots and the response on the log
    fn write_transaction_log(&mut self) -> SubmissionResult<()> {
        let snapshots = self
            .entities()
            .iter()
            .filter_map(|e| e.snapshot())
            .collect();
        let response = self.json();
        let base = self.base_mut();
        base.log.entities = snapshots;
        base.add_stub_document();
        if let Some(first) = base.log.documents.first_mut() {
            first.response_json = Some(response);
        }
        base.save_log()
    }

    /// Commit, roll back or fail according to validity and dry-run mode
    fn commit(&mut self, assert_has_entities: bool) -> SubmissionResult<()> {
        if assert_has_entities && self.entities().is_empty() {
            self.base_mut().record_error("Nothing to submit");
        }

        if !self.success() {
            let base = self.base_mut();
            log::info!("transaction {} failed validation", base.log.id);
            base.set_state(TransactionLogState::Failed);
            base.rollback();
        } else if self.base().dry_run {
            let base = self.base_mut();
            log::info!("transaction {} dry run succeeded, rolling back", base.log.id);
            base.set_state(TransactionLogState::Succeeded);
            base.rollback();
        } else {
            let base = self.base_mut();
            match base.commit_changes() {
                Ok(()) => {
                    log::info!("transaction {} committed", base.log.id);
                    base.set_state(TransactionLogState::Succeeded);
                }
                Err(e) => {
                    log::error!("transaction {} commit failed: {}", base.log.id, e);
                    base.record_error("Unable to write to database, please try again");
                    base.set_state(TransactionLogState::Errored);
                    base.rollback();
                }
            }
        }
        self.write_transaction_log()
    }

    /// Record a caller error that aborted the transaction
    fn record_user_error(&mut self, err: &SubmissionError) {
        let base = self.base_mut();
        let message = err.to_string();
        if !message.is_empty() {
            base.record_error(message);
        }
        base.error_code = Some(err.status_code());
        base.set_state(TransactionLogState::Failed);
        base.rollback();
        if let Err(e) = self.write_transaction_log() {
            log::error!("unable to write transaction log: {}", e);
        }
    }

    /// Record an unexpected failure without exposing its details
    fn record_internal_error(&mut self, err: &SubmissionError) {
        let base = self.base_mut();
        log::error!("transaction {} errored: {}", base.log.id, err);
        base.record_error(MESSAGE_500);
        base.error_code = Some(500);
        base.set_state(TransactionLogState::Errored);
        base.rollback();
        if let Err(e) = self.write_transaction_log() {
            log::error!("unable to write transaction log: {}", e);
        }
    }

    fn result(&self) -> TransactionResult {
        TransactionResult {
            transaction_id: self.base().transaction_id(),
            code: self.code(),
            json: self.json(),
        }
    }

    /// Turn the outcome of the transaction body into a response
    ///
    /// Aborting errors are recorded on the log and reported in the body.
    fn finish(&mut self, outcome: SubmissionResult<()>) -> TransactionResult {
        match outcome {
            Ok(()) => {}
            Err(err) if err.is_user_error() => self.record_user_error(&err),
            Err(err) => self.record_internal_error(&err),
        }
        self.result()
    }
}
