// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Asynchronous transaction execution
//!
//! The worker claims the transaction log up front so that callers get a
//! transaction id immediately, then runs the transaction on a blocking task.
//! The number of queued and running transactions is bounded; once the bound
//! is reached new submissions are refused rather than queued.

use crate::auth::ROLE_DELETE;
use crate::error::{SubmissionError, SubmissionResult};
use crate::transactions::deletion::DeletionTransaction;
use crate::transactions::upload::{BulkUploadTransaction, UploadTransaction};
use crate::transactions::{TransactionContext, TransactionOptions, TransactionResult};
use crate::txn::{TransactionId, TransactionLogState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Semaphore;

pub const ERR_ASYNC_SCHEDULING: &str = "The API is currently under heavy load and currently has \
                                        too many asynchronous tasks. Please try again later.";

pub struct TransactionWorker {
    ctx: Arc<TransactionContext>,
    runtime: Runtime,
    slots: Arc<Semaphore>,
}

impl TransactionWorker {
    pub fn new(ctx: Arc<TransactionContext>) -> SubmissionResult<Self> {
        let runtime = Builder::new_multi_thread()
            .thread_name("sheepdog-worker")
            .enable_all()
            .build()
            .map_err(|e| SubmissionError::internal(format!("unable to start worker runtime: {}", e)))?;
        let slots = Arc::new(Semaphore::new(ctx.config.async_max_queue_len.max(1)));
        Ok(Self {
            ctx,
            runtime,
            slots,
        })
    }

    /// Transactions that can still be accepted
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Schedule `job` and return the id of its transaction log
    ///
    /// With `use_async_workers` off the job runs inline and its response is
    /// returned instead.
    pub fn submit<F>(&self, opts: TransactionOptions, job: F) -> SubmissionResult<Value>
    where
        F: FnOnce(&Arc<TransactionContext>, TransactionOptions) -> SubmissionResult<TransactionResult>
            + Send
            + 'static,
    {
        let permit = Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
            log::warn!("refusing asynchronous transaction: queue is full");
            SubmissionError::user_with_code(ERR_ASYNC_SCHEDULING, 503)
        })?;

        let log = self
            .ctx
            .logs
            .claim(&opts.program, &opts.project, &opts.role, opts.dry_run)?;
        let id = log.id;
        let opts = opts.claimed(id);
        let ctx = Arc::clone(&self.ctx);

        if !ctx.config.use_async_workers {
            drop(permit);
            return match job(&ctx, opts) {
                Ok(result) => Ok(result.json),
                Err(e) => {
                    abandon(&ctx, id, &e);
                    Err(e)
                }
            };
        }

        self.runtime.spawn_blocking(move || {
            let _permit = permit;
            match job(&ctx, opts) {
                Ok(result) => log::info!(
                    "asynchronous transaction {} finished with code {}",
                    result.transaction_id,
                    result.code
                ),
                Err(e) => {
                    log::warn!("asynchronous transaction {} aborted: {}", id, e);
                    abandon(&ctx, id, &e);
                }
            }
        });

        log::info!("transaction {} submitted", id);
        Ok(json!({
            "code": 200,
            "message": "Transaction submitted.",
            "transaction_id": id,
        }))
    }

    pub fn upload(&self, opts: TransactionOptions, docs: Value) -> SubmissionResult<Value> {
        self.submit(opts, move |ctx, opts| UploadTransaction::run(ctx, opts, docs))
    }

    pub fn bulk_upload(&self, opts: TransactionOptions, wrappers: Value) -> SubmissionResult<Value> {
        self.submit(opts, move |ctx, opts| {
            BulkUploadTransaction::run(ctx, opts, wrappers)
        })
    }

    pub fn delete(&self, opts: TransactionOptions, ids: Vec<String>) -> SubmissionResult<Value> {
        self.submit(opts.role(ROLE_DELETE), move |ctx, opts| {
            DeletionTransaction::run(ctx, opts, &ids)
        })
    }

    /// Wait up to `timeout` for running transactions, then stop
    pub fn shutdown(self, timeout: Duration) {
        self.runtime.shutdown_timeout(timeout);
    }
}

/// Close a claimed log whose transaction never started
fn abandon(ctx: &TransactionContext, id: TransactionId, err: &SubmissionError) {
    let mut log = match ctx.logs.get(id) {
        Ok(Some(log)) => log,
        Ok(None) => return,
        Err(e) => {
            log::error!("unable to load transaction log {}: {}", id, e);
            return;
        }
    };
    if log.state != TransactionLogState::Pending {
        return;
    }
    log.state = if err.is_user_error() {
        TransactionLogState::Failed
    } else {
        TransactionLogState::Errored
    };
    log.timestamp = Some(chrono::Utc::now());
    if let Err(e) = ctx.logs.save(&log) {
        log::error!("unable to close transaction log {}: {}", id, e);
    }
}
