// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Releasing the submitted entities of a project

use super::base::{IndexOp, Transaction, TransactionBase};
use super::context::{TransactionContext, TransactionOptions};
use super::entity::{EntityAction, EntityBase};
use super::TransactionResult;
use crate::auth::ROLE_RELEASE;
use crate::error::{SubmissionError, SubmissionResult};
use crate::index::IndexVersionHelper;
use crate::storage::Node;
use serde_json::{json, Value};
use std::sync::Arc;

const REQUIRED_PROJECT_STATES: &[&str] = &["open", "review", "submitted", "processing"];

pub struct ReleaseTransaction {
    base: TransactionBase,
    entities: Vec<EntityBase>,
    released_count: usize,
}

impl ReleaseTransaction {
    pub fn run(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
    ) -> SubmissionResult<TransactionResult> {
        let base = TransactionBase::new(ctx, opts.role("release"), REQUIRED_PROJECT_STATES)?;
        let mut tx = Self {
            base,
            entities: Vec::new(),
            released_count: 0,
        };
        let outcome = tx.take_action();
        Ok(tx.finish(outcome))
    }

    /// `major.minor` of the data release in preparation
    fn latest_release_number(&self) -> SubmissionResult<String> {
        let release = self
            .base
            .session
            .nodes_with_label("data_release")?
            .into_iter()
            .filter(|n| !n.get_bool("released"))
            .max_by_key(|n| {
                let part = |key: &str| n.get(key).and_then(Value::as_u64).unwrap_or(0);
                (part("major_version"), part("minor_version"))
            })
            .ok_or_else(|| SubmissionError::user("No unreleased data release found"))?;
        let part = |key: &str| match release.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "0".to_string(),
        };
        Ok(format!("{}.{}", part("major_version"), part("minor_version")))
    }

    fn take_action(&mut self) -> SubmissionResult<()> {
        let mut project = self.base.project_node()?;
        if !self.base.has_role(ROLE_RELEASE) {
            let message = format!(
                "You do not have release permission for project {}",
                self.base.project_id()
            );
            self.base.record_error(message);
        } else if project.get_bool("released") {
            self.base.record_error("Project is already released.");
        } else if !project.get_bool("releasable") {
            self.base.record_error(
                "Project is not releasable. Project must be submitted at least once first.",
            );
        } else {
            let submitted: Vec<Node> = self
                .base
                .session
                .nodes_in_project(&self.base.project_id())?
                .into_iter()
                .filter(|n| n.state() == Some("submitted"))
                .collect();
            let total = submitted.len();
            self.perform_release(submitted)?;
            if self.released_count == total {
                project.set("released", json!(true));
                self.base.session.merge(project)?;
            } else {
                let message = format!("Incomplete release {}/{}", self.released_count, total);
                self.base.record_error(message);
            }
        }
        self.commit(false)
    }

    /// Release every node, staging index updates for file nodes
    fn perform_release(&mut self, submitted: Vec<Node>) -> SubmissionResult<()> {
        let release_number = self.latest_release_number()?;
        let helper = IndexVersionHelper::new(self.base.ctx.index.clone());
        let dictionary = Arc::clone(&self.base.ctx.dictionary);

        for mut node in submitted {
            let is_file = dictionary.schema(&node.label).map_or(false, |s| s.is_file());
            if is_file {
                match helper.release_node(&release_number, &node.node_id, true) {
                    Ok((pending, Some(number))) if number == release_number => {
                        if pending {
                            self.base.index_ops.push(IndexOp::Release {
                                release_number: release_number.clone(),
                                node_id: node.node_id.clone(),
                            });
                        }
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        log::error!("node {} could not be loaded from the index: {}", node.node_id, e);
                        self.base.record_error(format!(
                            "Node ID: {} could not be loaded from the index service",
                            node.node_id
                        ));
                        continue;
                    }
                }
            }
            let mut entity = EntityBase::for_node(node.clone(), EntityAction::Release);
            node.set("state", json!("released"));
            self.base.session.merge(node.clone())?;
            entity.node = Some(node);
            self.entities.push(entity);
            self.released_count += 1;
        }
        Ok(())
    }
}

impl Transaction for ReleaseTransaction {
    fn base(&self) -> &TransactionBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TransactionBase {
        &mut self.base
    }

    fn entities(&self) -> Vec<&EntityBase> {
        self.entities.iter().collect()
    }

    fn message(&self) -> String {
        match (self.success(), self.base.dry_run) {
            (true, false) => "Successfully released project".to_string(),
            (true, true) => format!(
                "Dry run successful. {} project files would have been released.",
                self.released_count
            ),
            (false, _) => "Release transaction failed.".to_string(),
        }
    }
}
