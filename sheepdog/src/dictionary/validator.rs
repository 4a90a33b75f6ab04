// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Graph-level validation of staged nodes
//!
//! Checks what a JSON schema cannot see: required links, link multiplicity
//! on both ends, and exclusive or required link groups.

use super::schema::{Link, LinkEntry, LinkGroup};
use super::{Dictionary, Violation};
use crate::storage::{GraphSession, Node, StorageResult};

pub struct GraphValidator<'a> {
    dictionary: &'a Dictionary,
}

impl<'a> GraphValidator<'a> {
    pub fn new(dictionary: &'a Dictionary) -> Self {
        Self { dictionary }
    }

    /// Validate the links of `node` as currently visible through `session`
    pub fn validate(&self, session: &GraphSession, node: &Node) -> StorageResult<Vec<Violation>> {
        let mut violations = Vec::new();
        let Some(schema) = self.dictionary.schema(&node.label) else {
            return Ok(violations);
        };
        for entry in &schema.links {
            match entry {
                LinkEntry::Link(link) => {
                    self.check_link(session, node, link, &mut violations)?;
                }
                LinkEntry::Group(group) => {
                    self.check_group(session, node, group, &mut violations)?;
                }
            }
        }
        Ok(violations)
    }

    fn targets(&self, session: &GraphSession, node: &Node, name: &str) -> StorageResult<Vec<Node>> {
        session.neighbors_out(&node.node_id, name)
    }

    /// Returns whether any edge exists for the link
    fn check_link(
        &self,
        session: &GraphSession,
        node: &Node,
        link: &Link,
        violations: &mut Vec<Violation>,
    ) -> StorageResult<bool> {
        let targets = self.targets(session, node, &link.name)?;
        let keys = vec![link.name.clone()];

        if link.required && targets.is_empty() {
            violations.push(Violation::new(
                format!("Entity is missing required link to {}", link.name),
                keys.clone(),
            ));
        }
        if link.multiplicity.single_target() && targets.len() > 1 {
            violations.push(Violation::new(
                format!(
                    "'{}' link has to be {}",
                    link.name,
                    link.multiplicity.as_str()
                ),
                keys.clone(),
            ));
        }
        if link.multiplicity.single_source() {
            for target in &targets {
                let mut sources = 0;
                for edge in session.edges_in(&target.node_id)? {
                    if edge.label != link.name {
                        continue;
                    }
                    // other types may use the same link name
                    if let Some(source) = session.get_node(&edge.src_id)? {
                        if source.label == node.label {
                            sources += 1;
                        }
                    }
                }
                if sources > 1 {
                    violations.push(Violation::new(
                        format!(
                            "'{}' link has to be {}, target node {} already has {}",
                            link.name,
                            link.multiplicity.as_str(),
                            target.label,
                            link.backref
                        ),
                        keys.clone(),
                    ));
                }
            }
        }
        Ok(!targets.is_empty())
    }

    fn check_group(
        &self,
        session: &GraphSession,
        node: &Node,
        group: &LinkGroup,
        violations: &mut Vec<Violation>,
    ) -> StorageResult<bool> {
        let mut names = Vec::new();
        let mut provided = Vec::new();
        for entry in &group.subgroup {
            let (name, present) = match entry {
                LinkEntry::Link(link) => {
                    (link.name.clone(), self.check_link(session, node, link, violations)?)
                }
                LinkEntry::Group(inner) => {
                    let inner_names = group_names(inner).join(", ");
                    (inner_names, self.check_group(session, node, inner, violations)?)
                }
            };
            if present {
                provided.push(name.clone());
            }
            names.push(name);
        }

        let keys = group_names(group);
        if group.exclusive && provided.len() > 1 {
            violations.push(Violation::new(
                format!(
                    "Links to {:?} are exclusive.  More than one was provided: {:?}",
                    names, provided
                ),
                keys.clone(),
            ));
        }
        if group.required && provided.is_empty() {
            violations.push(Violation::new(
                format!("Entity is missing a required link to {:?}", names),
                keys,
            ));
        }
        Ok(!provided.is_empty())
    }
}

fn group_names(group: &LinkGroup) -> Vec<String> {
    let mut out = Vec::new();
    for entry in &group.subgroup {
        match entry {
            LinkEntry::Link(link) => out.push(link.name.clone()),
            LinkEntry::Group(inner) => out.extend(group_names(inner)),
        }
    }
    out
}
