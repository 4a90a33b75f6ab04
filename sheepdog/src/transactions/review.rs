// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Moving a project between `open` and `review`

use super::base::{Transaction, TransactionBase};
use super::context::{TransactionContext, TransactionOptions};
use super::entity::EntityBase;
use super::TransactionResult;
use crate::auth::ROLE_RELEASE;
use crate::error::SubmissionResult;
use serde_json::json;
use std::sync::Arc;

/// Sets the project state to `to_state` without touching its entities
struct StateTransition {
    base: TransactionBase,
    to_state: &'static str,
}

impl StateTransition {
    fn run(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
        required_states: &[&str],
        to_state: &'static str,
    ) -> SubmissionResult<TransactionResult> {
        let base = TransactionBase::new(ctx, opts, required_states)?;
        let mut tx = Self { base, to_state };
        let outcome = tx.take_action();
        Ok(tx.finish(outcome))
    }

    fn take_action(&mut self) -> SubmissionResult<()> {
        if !self.base.has_role(ROLE_RELEASE) {
            let message = format!(
                "You do not have {} permission for project {}",
                self.base.role,
                self.base.project_id()
            );
            self.base.record_error(message);
        } else {
            let mut project = self.base.project_node()?;
            project.set("state", json!(self.to_state));
            self.base.session.merge(project)?;
        }
        self.commit(false)
    }
}

impl Transaction for StateTransition {
    fn base(&self) -> &TransactionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TransactionBase {
        &mut self.base
    }

    fn entities(&self) -> Vec<&EntityBase> {
        Vec::new()
    }

    fn message(&self) -> String {
        match (self.success(), self.base.dry_run) {
            (true, false) => format!(
                "Successfully transitioned project state to '{}'",
                self.to_state
            ),
            (true, true) => format!(
                "Dry run successful. Would have successfully transitioned project state to '{}'",
                self.to_state
            ),
            (false, _) => "Transaction failed.".to_string(),
        }
    }
}

/// Lock an `open` project for review
pub struct ReviewTransaction;

impl ReviewTransaction {
    pub fn run(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
    ) -> SubmissionResult<TransactionResult> {
        StateTransition::run(ctx, opts.role("review"), &["open"], "review")
    }
}

/// Reopen a project under review for mutation
pub struct OpenTransaction;

impl OpenTransaction {
    pub fn run(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
    ) -> SubmissionResult<TransactionResult> {
        StateTransition::run(ctx, opts.role("open"), &["review"], "open")
    }
}
