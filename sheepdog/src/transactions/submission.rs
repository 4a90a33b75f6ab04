// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Submitting every draft entity of a project under review

use super::base::{Transaction, TransactionBase};
use super::context::{TransactionContext, TransactionOptions};
use super::entity::{EntityAction, EntityBase};
use super::{TransactionResult, ENTITY_STATE_CATEGORIES, SUBMITTABLE_STATES};
use crate::auth::ROLE_RELEASE;
use crate::error::SubmissionResult;
use crate::storage::Node;
use serde_json::{json, Value};
use std::sync::Arc;

const REQUIRED_PROJECT_STATES: &[&str] = &["review"];

pub struct SubmissionTransaction {
    base: TransactionBase,
    entities: Vec<EntityBase>,
}

impl SubmissionTransaction {
    pub fn run(
        ctx: &Arc<TransactionContext>,
        opts: TransactionOptions,
    ) -> SubmissionResult<TransactionResult> {
        let base = TransactionBase::new(ctx, opts.role("submit"), REQUIRED_PROJECT_STATES)?;
        let mut tx = Self {
            base,
            entities: Vec::new(),
        };
        let outcome = tx.take_action();
        Ok(tx.finish(outcome))
    }

    /// Nodes of the project in a state category whose state allows submission
    fn lookup_submittable_nodes(&self) -> SubmissionResult<Vec<Node>> {
        let dictionary = &self.base.ctx.dictionary;
        let nodes: Vec<Node> = self
            .base
            .session
            .nodes_in_project(&self.base.project_id())?
            .into_iter()
            .filter(|n| {
                dictionary
                    .category(&n.label)
                    .map_or(false, |c| ENTITY_STATE_CATEGORIES.contains(&c))
            })
            .filter(|n| SUBMITTABLE_STATES.contains(&n.state()))
            .collect();
        log::info!("found {} nodes to submit", nodes.len());
        Ok(nodes)
    }

    fn take_action(&mut self) -> SubmissionResult<()> {
        if !self.base.has_role(ROLE_RELEASE) {
            let message = format!(
                "You do not have submit permission for project {}",
                self.base.project_id()
            );
            self.base.record_error(message);
            return self.commit(false);
        }

        for mut node in self.lookup_submittable_nodes()? {
            self.base.session.record_version(&node);
            let mut entity = EntityBase::for_node(node.clone(), EntityAction::Submit);
            node.set("state", json!("submitted"));
            self.base.session.merge(node.clone())?;
            entity.node = Some(node);
            self.entities.push(entity);
        }

        let mut project = self.base.project_node()?;
        project.set("state", json!("submitted"));
        project.set("releasable", json!(true));
        self.base.session.merge(project)?;

        self.commit(true)
    }

    fn submitted_entity_count(&self) -> usize {
        if self.success() {
            self.entities.len()
        } else {
            0
        }
    }
}

impl Transaction for SubmissionTransaction {
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
        let count = self.entities.len();
        match (self.success(), self.base.dry_run) {
            (true, false) => format!("Successfully submitted {} entities.", count),
            (true, true) => format!("Dry run successful. Would have submitted {} entities.", count),
            (false, _) => "Submit transaction failed.".to_string(),
        }
    }

    fn json(&self) -> Value {
        let mut doc = self.base_json();
        if let Value::Object(map) = &mut doc {
            map.insert(
                "submitted_entity_count".into(),
                json!(self.submitted_entity_count()),
            );
        }
        doc
    }
}
