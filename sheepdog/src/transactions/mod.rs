// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Submission transactions
//!
//! Every mutation of a project's graph runs as one transaction:
//! - claim a transaction log (durably, before any work)
//! - stage changes in a [`GraphSession`](crate::storage::GraphSession)
//! - validate, then commit or roll back
//! - write the outcome back to the log
//!
//! Entity problems are accumulated and reported, never raised. Only caller
//! errors that abort the whole transaction surface as
//! [`SubmissionError`](crate::SubmissionError).

pub mod base;
pub mod close;
pub mod context;
pub mod deletion;
pub mod entity;
pub mod release;
pub mod review;
pub mod submission;
pub mod upload;

pub use base::{IndexOp, Transaction, TransactionBase, TransactionalError};
pub use context::{TransactionContext, TransactionOptions};
pub use entity::{EntityAction, EntityBase, EntityError, EntityErrorType};

use crate::txn::TransactionId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const MESSAGE_500: &str = "Internal server error. Sorry, something unexpected went wrong!";

/// Categories whose nodes carry a `state` and move through submission
pub const ENTITY_STATE_CATEGORIES: &[&str] = &["biospecimen", "clinical", "data_file"];

/// Node states from which a node may be submitted
pub const SUBMITTABLE_STATES: &[Option<&str>] = &[Some("validated"), None];

/// Node states from which a node may be deleted
pub const ALLOWED_DELETION_STATES: &[Option<&str>] = &[Some("validated"), None];

static REGEX_UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12}$",
    )
    .expect("static uuid pattern")
});

pub fn is_uuid(value: &str) -> bool {
    REGEX_UUID.is_match(value)
}

/// Outcome of a transaction entry point
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub transaction_id: TransactionId,
    /// HTTP-style status
    pub code: u16,
    pub json: Value,
}

impl TransactionResult {
    pub fn success(&self) -> bool {
        self.json
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(self.code < 400)
    }
}
