// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Closing dry-run logs and committing them by replay

use super::context::{TransactionContext, TransactionOptions};
use super::deletion::DeletionTransaction;
use super::release::ReleaseTransaction;
use super::review::{OpenTransaction, ReviewTransaction};
use super::submission::SubmissionTransaction;
use super::upload::UploadTransaction;
use super::TransactionResult;
use crate::auth::{ROLE_CREATE, ROLE_DELETE, ROLE_UPDATE};
use crate::error::{SubmissionError, SubmissionResult};
use crate::txn::{TransactionId, TransactionLog, TransactionLogState};
use serde_json::{json, Value};
use std::sync::Arc;

fn find_log(
    ctx: &TransactionContext,
    program: &str,
    project: &str,
    id: TransactionId,
) -> SubmissionResult<TransactionLog> {
    ctx.logs.get(id)?.ok_or_else(|| {
        SubmissionError::NotFound(format!(
            "Unable to find transaction_log with id {} for project {}-{}",
            id, program, project
        ))
    })
}

/// Mark a dry-run log so that it can never be committed
pub fn close_transaction(
    ctx: &Arc<TransactionContext>,
    program: &str,
    project: &str,
    id: TransactionId,
) -> SubmissionResult<Value> {
    let mut log = find_log(ctx, program, project, id)?;
    if log.closed {
        return Err(SubmissionError::user("This transaction log is already closed."));
    }
    if !log.is_dry_run {
        return Err(SubmissionError::user(
            "This transaction log is not a dry run. Closing it would have no effect.",
        ));
    }
    if log.committed_by.is_some() {
        return Err(SubmissionError::user(
            "This transaction log has already been committed. Closing it would have no effect.",
        ));
    }
    log.closed = true;
    ctx.logs.save(&log)?;
    log::info!("closed transaction {}", id);
    Ok(json!({
        "code": 200,
        "message": "Closed transaction.",
        "transaction_id": id,
    }))
}

/// Run a successful dry run again for real
///
/// `opts` names the project and the user; the role is taken from the log.
pub fn commit_dry_run(
    ctx: &Arc<TransactionContext>,
    opts: TransactionOptions,
    id: TransactionId,
) -> SubmissionResult<TransactionResult> {
    let mut log = find_log(ctx, &opts.program, &opts.project, id)?;
    if log.state != TransactionLogState::Succeeded {
        return Err(SubmissionError::user(format!(
            "Unable to commit transaction log in state {}.",
            log.state
        )));
    }
    if log.closed {
        return Err(SubmissionError::user("Unable to commit closed transaction log."));
    }
    if let Some(committed_by) = log.committed_by {
        return Err(SubmissionError::user(format!(
            "This transaction_log was committed already by transaction '{}'.",
            committed_by
        )));
    }
    if !log.is_dry_run {
        return Err(SubmissionError::user(format!(
            "Cannot submit transaction_log '{}', not a dry_run.",
            log.id
        )));
    }
    if log.program != opts.program || log.project != opts.project {
        return Err(SubmissionError::user(format!(
            "Cannot submit transaction_log '{}', in project {}.",
            log.id,
            opts.project_id()
        )));
    }

    let result = resubmit(ctx, &log, opts)?;
    log.committed_by = Some(result.transaction_id);
    ctx.logs.save(&log)?;
    log::info!("dry run {} committed by {}", id, result.transaction_id);
    Ok(result)
}

fn resubmit(
    ctx: &Arc<TransactionContext>,
    log: &TransactionLog,
    opts: TransactionOptions,
) -> SubmissionResult<TransactionResult> {
    let opts = opts.role(log.role.clone()).dry_run(false);
    match log.role.as_str() {
        ROLE_CREATE | ROLE_UPDATE => {
            UploadTransaction::run(ctx, opts, Value::Array(log.canonical_json.clone()))
        }
        ROLE_DELETE => DeletionTransaction::replay(ctx, opts, &log.canonical_json),
        "review" => ReviewTransaction::run(ctx, opts),
        "open" => OpenTransaction::run(ctx, opts),
        "submit" => SubmissionTransaction::run(ctx, opts),
        "release" => ReleaseTransaction::run(ctx, opts),
        other => Err(SubmissionError::user(format!(
            "Unable to resubmit transaction log with role '{}'",
            other
        ))),
    }
}
