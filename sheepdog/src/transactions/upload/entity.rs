// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! One submitted document on its way to a graph node
//!
//! Lifecycle: `parse` → `instantiate` → `pre_validate` → `flush_to_session`
//! → `create_links` → `post_validate`. Each step skips entities that already
//! carry errors, except the final error classification.

use super::file::FileUpload;
use crate::auth::{ROLE_CREATE, ROLE_UPDATE};
use crate::dictionary::{suggestion, EntitySchema, GraphValidator};
use crate::error::SubmissionResult;
use crate::storage::{Edge, Node, StorageError, StorageResult};
use crate::transactions::base::TransactionBase;
use crate::transactions::entity::{
    keys, secondary_keys, skeleton_props, EntityAction, EntityBase, EntityErrorType,
};
use crate::transactions::is_uuid;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Keys that are accepted on every document but never stored as properties
const SPECIAL_KEYS: &[&str] = &["type", "id", "created_datetime", "updated_datetime"];

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Plain rendering of a property value for messages
pub(crate) fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "None".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn merge_keys(keys: &[Map<String, Value>]) -> Map<String, Value> {
    keys.iter().flat_map(|m| m.clone()).collect()
}

pub struct UploadEntity {
    pub base: EntityBase,
    /// Working copy of the document; gains defaults and preserved links
    pub doc: Map<String, Value>,
    pub(super) file: Option<FileUpload>,
}

impl UploadEntity {
    /// Build an entity from one document, recording parse problems on it
    pub fn parse(tx: &TransactionBase, doc: Value) -> Self {
        let mut entity = Self {
            base: EntityBase::new(),
            doc: Map::new(),
            file: None,
        };
        let doc = match doc {
            Value::Object(doc) => doc,
            other => {
                entity.base.record_error(
                    format!(
                        "Entity document must be an object, not a {}",
                        json_type_name(&other)
                    ),
                    vec![],
                    EntityErrorType::InvalidValue,
                );
                return entity;
            }
        };
        entity.doc = doc
            .into_iter()
            .map(|(key, value)| (key.trim_start_matches('*').to_string(), value))
            .collect();

        entity.parse_type(tx);
        if entity.base.entity_type.is_some() && entity.base.is_valid() {
            entity.parse_id(tx);
        }
        entity
    }

    fn parse_type(&mut self, tx: &TransactionBase) {
        let Some(entity_type) = self.doc.get("type").and_then(Value::as_str) else {
            self.base.record_error("missing 'type'", keys(["type"]), EntityErrorType::InvalidType);
            return;
        };
        let entity_type = entity_type.to_string();
        self.base.entity_type = Some(entity_type.clone());

        let dictionary = &tx.ctx.dictionary;
        let Some(schema) = dictionary.schema(&entity_type) else {
            self.base.record_error(
                format!(
                    "Invalid entity type: {}.{}",
                    entity_type,
                    suggestion(&entity_type, dictionary.labels())
                ),
                keys(["type"]),
                EntityErrorType::InvalidType,
            );
            return;
        };
        if !schema.has_project_id() {
            self.base.record_error(
                format!(
                    "{} is not an entity that can be upload via the project endpoint.",
                    entity_type
                ),
                keys(["id"]),
                EntityErrorType::InvalidType,
            );
            return;
        }
        if schema.is_file() {
            log::debug!("identified {} as a data file entity", entity_type);
            self.file = Some(FileUpload::from_doc(&mut self.doc));
        }
    }

    fn parse_id(&mut self, tx: &TransactionBase) {
        match self.doc.get("id") {
            None | Some(Value::Null) => {}
            Some(Value::String(id)) => {
                if tx.role == ROLE_CREATE && !is_uuid(id) {
                    self.base.record_error(
                        "Cannot create entity with custom id that is not a UUID.",
                        keys(["id"]),
                        EntityErrorType::InvalidValue,
                    );
                }
                self.base.entity_id = Some(id.clone());
            }
            Some(other) => self.base.record_error(
                format!("Entity id must be a string, not a {}", json_type_name(other)),
                keys(["id"]),
                EntityErrorType::InvalidValue,
            ),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.base.is_valid()
    }

    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }

    pub(super) fn label(&self) -> &str {
        self.base.entity_type.as_deref().unwrap_or_default()
    }

    /// Secondary keys taken from the node, or from the document before one exists
    pub fn secondary_keys(&self, schema: &EntitySchema, project_id: &str) -> Vec<Map<String, Value>> {
        match &self.base.node {
            Some(node) => secondary_keys(schema, &node.props),
            None => secondary_keys(schema, &skeleton_props(schema, &self.doc, project_id)),
        }
    }

    pub(super) fn lookup(
        &self,
        tx: &TransactionBase,
        node_id: Option<&str>,
        keys: &[Map<String, Value>],
    ) -> StorageResult<Vec<Node>> {
        if node_id.is_none() && keys.is_empty() {
            return Ok(Vec::new());
        }
        tx.session
            .lookup_nodes(self.label(), node_id, &merge_keys(keys))
    }

    /// Resolve the document to a new or existing node
    pub fn instantiate(&mut self, tx: &mut TransactionBase) -> SubmissionResult<()> {
        if !self.is_valid() {
            return Ok(());
        }
        let ctx = Arc::clone(&tx.ctx);
        let Some(schema) = ctx.dictionary.schema(self.label()) else {
            return Ok(());
        };
        let project_id = tx.project_id();
        let sk = self.secondary_keys(schema, &project_id);

        if self.base.entity_id.is_none() && sk.is_empty() {
            let key_names: Vec<String> = schema
                .secondary_unique_keys()
                .into_iter()
                .flatten()
                .collect();
            if key_names.is_empty() {
                self.base.record_error(
                    format!(
                        "There are no unique keys defined on type {} except for the official GDC \
                         id.  To upload this entity you must add a UUID",
                        self.label()
                    ),
                    keys(["id"]),
                    EntityErrorType::MissingProperty,
                );
            } else {
                self.base.record_error(
                    format!(
                        "Either an id or required unique fields ({}) required",
                        key_names.join(", ")
                    ),
                    key_names,
                    EntityErrorType::MissingProperty,
                );
            }
            return Ok(());
        }

        let node = match tx.role.as_str() {
            ROLE_CREATE => self.get_node_create(tx, schema, &sk)?,
            ROLE_UPDATE => self.get_node_merge(tx, schema, &sk)?,
            other => {
                self.base.record_error(
                    format!("Unknown role '{}'", other),
                    vec![],
                    EntityErrorType::InvalidPermissions,
                );
                None
            }
        };
        if let Some(node) = node {
            self.base.node = Some(node);
            self.set_node_properties(tx, schema);
        }
        Ok(())
    }

    pub(super) fn get_node_create(
        &mut self,
        tx: &mut TransactionBase,
        schema: &EntitySchema,
        sk: &[Map<String, Value>],
    ) -> SubmissionResult<Option<Node>> {
        if self.is_file() {
            self.resolve_file_create(tx, sk)?;
        }

        if !tx.has_role(ROLE_CREATE) {
            let roles = tx
                .ctx
                .authz
                .project_roles(&tx.user, &tx.program, &tx.project);
            self.base.record_error(
                format!(
                    "You do not have create permission for project {} only {:?}",
                    tx.project_id(),
                    roles
                ),
                vec![],
                EntityErrorType::InvalidPermissions,
            );
            return Ok(None);
        }

        let entity_id = self
            .base
            .entity_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        let exists = !self.lookup(tx, Some(&entity_id), &[])?.is_empty()
            || !self.lookup(tx, None, sk)?.is_empty();
        if exists {
            self.base.record_error(
                "Cannot create entity that already exists. Try updating entity (PUT instead of POST)",
                keys(["id"]),
                EntityErrorType::NotUnique,
            );
            return Ok(None);
        }

        for (key, default) in schema.system_property_defaults() {
            if self.doc.get(&key).map_or(true, Value::is_null) {
                self.doc.insert(key, default);
            }
        }

        let mut node = Node::new(entity_id, self.label());
        if self.is_file() {
            let project = tx.project_node()?;
            node.acl = tx.ctx.phsids(&tx.session, &project)?;
        }
        self.base.action = Some(EntityAction::Create);
        log::debug!("creating new {} {}", node.label, node.node_id);
        Ok(Some(node))
    }

    fn get_node_merge(
        &mut self,
        tx: &mut TransactionBase,
        schema: &EntitySchema,
        sk: &[Map<String, Value>],
    ) -> SubmissionResult<Option<Node>> {
        let mut nodes = self.lookup(tx, self.base.entity_id.as_deref(), sk)?;
        let mut node = match nodes.len() {
            0 => return self.get_node_create(tx, schema, sk),
            1 => nodes.remove(0),
            _ => {
                self.base.record_error(
                    format!(
                        "Entity is not unique, multiple entities found with {}",
                        Value::Array(sk.iter().cloned().map(Value::Object).collect())
                    ),
                    vec![],
                    EntityErrorType::NotUnique,
                );
                return Ok(None);
            }
        };

        if !tx.has_role(ROLE_UPDATE) {
            self.base.record_error(
                format!("You do not have update permission for project {}", tx.project_id()),
                vec![],
                EntityErrorType::InvalidPermissions,
            );
            return Ok(None);
        }

        self.base.old_props = Some(node.props.clone());

        let project_id = tx.project_id();
        if node.project_id() != Some(project_id.as_str()) {
            self.base.record_error(
                format!(
                    "Entity is owned by project {}, not {}",
                    display_value(node.get("project_id")),
                    project_id
                ),
                vec![],
                EntityErrorType::InvalidPermissions,
            );
        }
        self.merge_doc_links(tx, schema, &node)?;

        // An updated node is a draft again until the next submission
        if schema.has_property("state") && node.state().is_none() {
            node.set("state", json!("validated"));
        }

        for key in schema.system_property_defaults().keys() {
            let current = node.get(key).cloned();
            if let Some(given) = self.doc.get(key) {
                if is_truthy(given) && Some(given) != current.as_ref() {
                    let message = format!(
                        "Property '{}' ({}) is a system property and will be ignored.",
                        key,
                        display_value(Some(given))
                    );
                    self.base.record_warning(message, keys([key.as_str()]));
                }
            }
            match current {
                Some(value) if !value.is_null() => {
                    self.doc.insert(key.clone(), value);
                }
                _ => {
                    self.doc.remove(key);
                }
            }
        }

        self.base.action = Some(EntityAction::Update);
        self.base.entity_id = Some(node.node_id.clone());

        if self.is_file() {
            node = self.reconcile_file_update(tx, schema, sk, node)?;
        }
        Ok(Some(node))
    }

    /// Carry links stored on `node` into the document unless it names them
    fn merge_doc_links(
        &mut self,
        tx: &TransactionBase,
        schema: &EntitySchema,
        node: &Node,
    ) -> SubmissionResult<()> {
        let project_id = tx.project_id();
        for link in schema.all_links() {
            let mut doc_links = match self.doc.remove(&link.name) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items,
                Some(Value::Object(item)) => vec![Value::Object(item)],
                Some(other) => {
                    // left for schema validation to report
                    self.doc.insert(link.name.clone(), other);
                    continue;
                }
            };
            let target_schema = tx.ctx.dictionary.schema(&link.target_type);

            let doc_ids: BTreeSet<&str> = doc_links
                .iter()
                .filter_map(|l| l.get("id").and_then(Value::as_str))
                .collect();
            let doc_keys: Vec<Vec<Map<String, Value>>> = match target_schema {
                Some(ts) => doc_links
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|l| secondary_keys(ts, &skeleton_props(ts, l, &project_id)))
                    .filter(|k| !k.is_empty())
                    .collect(),
                None => Vec::new(),
            };

            let mut missing = Vec::new();
            for existing in tx.session.neighbors_out(&node.node_id, &link.name)? {
                let by_keys = target_schema
                    .map(|ts| secondary_keys(ts, &existing.props))
                    .filter(|k| !k.is_empty())
                    .map_or(false, |k| doc_keys.contains(&k));
                if !by_keys && !doc_ids.contains(existing.node_id.as_str()) {
                    missing.push(json!({"id": existing.node_id}));
                }
            }
            doc_links.extend(missing);

            if !doc_links.is_empty() {
                self.doc.insert(link.name.clone(), Value::Array(doc_links));
            }
        }
        Ok(())
    }

    /// Copy document values onto the node, guarding system properties
    fn set_node_properties(&mut self, tx: &TransactionBase, schema: &EntitySchema) {
        let Some(mut node) = self.base.node.take() else {
            return;
        };
        if schema.has_project_id() {
            node.set("project_id", json!(tx.project_id()));
        }
        let defaults = schema.system_property_defaults();

        for (key, value) in &self.doc {
            let key = key.as_str();
            let known = schema.has_property(key) || schema.is_link(key) || SPECIAL_KEYS.contains(&key);
            if !known {
                let candidates = schema
                    .properties
                    .keys()
                    .map(String::as_str)
                    .chain(SPECIAL_KEYS.iter().copied());
                self.base.record_error(
                    format!(
                        "Key '{}' is not a valid property for type '{}'.{}",
                        key,
                        node.label,
                        suggestion(key, candidates)
                    ),
                    keys([key]),
                    EntityErrorType::InvalidProperty,
                );
            } else if SPECIAL_KEYS.contains(&key) || schema.is_link(key) {
                continue;
            } else if schema.is_system_property(key) {
                match node.get(key) {
                    None | Some(Value::Null) => {
                        let default = defaults.get(key).cloned().unwrap_or(Value::Null);
                        log::debug!("{}: setting null system property '{}'", node.node_id, key);
                        node.set(key, default);
                    }
                    Some(current) if current != value => {
                        let message = format!(
                            "Key '{}' is a system property and cannot be updated from '{}' to '{}'",
                            key,
                            display_value(Some(current)),
                            display_value(Some(value))
                        );
                        self.base.record_error(
                            message,
                            keys([key]),
                            EntityErrorType::InvalidPermissions,
                        );
                    }
                    Some(_) => {}
                }
            } else {
                node.set(key, value.clone());
            }
        }
        self.base.node = Some(node);
    }

    /// JSON-schema validation of the working document
    pub fn pre_validate(&mut self, tx: &TransactionBase) {
        if !self.is_valid() {
            return;
        }
        let Some(schema) = tx.ctx.dictionary.schema(self.label()) else {
            return;
        };
        let violations = schema.validate_document(&Value::Object(self.doc.clone()));
        self.base.record_violations(violations);
    }

    /// Stage the node, and its index record for file entities
    pub fn flush_to_session(&mut self, tx: &mut TransactionBase) -> SubmissionResult<()> {
        if !self.is_valid() {
            return Ok(());
        }
        let Some(mut node) = self.base.node.take() else {
            return Ok(());
        };
        if self.is_file() {
            self.stage_file_index(tx, &node)?;
        }

        let now = json!(Utc::now().to_rfc3339());
        let has_timestamps = tx
            .ctx
            .dictionary
            .schema(&node.label)
            .map_or(false, |s| s.has_property("updated_datetime"));
        if has_timestamps {
            if self.base.action != Some(EntityAction::Update) {
                node.set("created_datetime", now.clone());
            }
            node.set("updated_datetime", now);
        }

        let staged = match self.base.action {
            Some(EntityAction::Create) => tx.session.add(node.clone()),
            Some(EntityAction::Update) => tx.session.merge(node.clone()),
            Some(EntityAction::Version) => self.stage_version(tx, &node),
            other => {
                let message = format!("Unknown role {:?}", other);
                log::error!("{}", message);
                self.base
                    .record_error(message, vec![], EntityErrorType::InvalidPermissions);
                Ok(())
            }
        };
        match staged {
            Ok(()) => {}
            Err(StorageError::NodeExists(id)) => self.base.record_error(
                format!("Entity with id {} already exists", id),
                keys(["id"]),
                EntityErrorType::NotUnique,
            ),
            Err(e) => return Err(e.into()),
        }
        self.base.node = Some(node);
        Ok(())
    }

    /// Resolve every link in the document to an edge
    pub fn create_links(&mut self, tx: &mut TransactionBase) -> SubmissionResult<()> {
        if !self.is_valid() {
            return Ok(());
        }
        let Some(node_id) = self.base.node.as_ref().map(|n| n.node_id.clone()) else {
            return Ok(());
        };
        let ctx = Arc::clone(&tx.ctx);
        let Some(schema) = ctx.dictionary.schema(self.label()) else {
            return Ok(());
        };
        let project_id = tx.project_id();

        for link in schema.all_links() {
            let items = match self.doc.get(&link.name) {
                None | Some(Value::Null) => continue,
                Some(Value::Array(items)) => items.clone(),
                Some(item @ Value::Object(_)) => vec![item.clone()],
                Some(_) => {
                    self.base.record_error(
                        format!("Link '{}' must be an object or a list of objects", link.name),
                        keys([link.name.as_str()]),
                        EntityErrorType::InvalidLink,
                    );
                    continue;
                }
            };
            let Some(target_schema) = ctx.dictionary.schema(&link.target_type) else {
                log::error!("link {} targets unknown type {}", link.name, link.target_type);
                continue;
            };

            for item in items {
                let Value::Object(item) = item else {
                    self.base.record_error(
                        format!("Link '{}' must be an object or a list of objects", link.name),
                        keys([link.name.as_str()]),
                        EntityErrorType::InvalidLink,
                    );
                    continue;
                };
                let target_id = item.get("id").and_then(Value::as_str);
                let skeleton = skeleton_props(target_schema, &item, &project_id);
                let target_keys = secondary_keys(target_schema, &skeleton);

                if link.target_type == "project" {
                    if let Some(code) = item.get("code").and_then(Value::as_str) {
                        if code != tx.project {
                            self.base.record_error(
                                format!(
                                    "Cannot link entity to project {} under {} endpoint",
                                    code,
                                    project_id
                                ),
                                keys([link.name.as_str()]),
                                EntityErrorType::InvalidPermissions,
                            );
                            continue;
                        }
                    }
                }

                let targets = if target_id.is_none() && target_keys.is_empty() {
                    Vec::new()
                } else {
                    tx.session
                        .lookup_nodes(&link.target_type, target_id, &merge_keys(&target_keys))?
                };

                let target = match targets.len() {
                    0 => {
                        let id_part = target_id
                            .map(|id| format!(", id='{}'", id))
                            .unwrap_or_default();
                        let keys_part = Value::Array(
                            target_keys.into_iter().map(Value::Object).collect(),
                        );
                        self.base.record_error(
                            format!(
                                "No link destination found for {}{}, unique_keys='{}'",
                                link.name, id_part, keys_part
                            ),
                            keys([link.name.as_str()]),
                            EntityErrorType::InvalidLink,
                        );
                        continue;
                    }
                    1 => &targets[0],
                    _ => {
                        self.base.record_error(
                            format!("More than one link destination found for {}", link.name),
                            keys([link.name.as_str()]),
                            EntityErrorType::InvalidLink,
                        );
                        continue;
                    }
                };

                if target.label == "project" && target.get_str("code") != Some(tx.project.as_str()) {
                    self.base.record_error(
                        format!(
                            "Cannot link entity to project {} under {} endpoint",
                            display_value(target.get("code")),
                            project_id
                        ),
                        keys([link.name.as_str()]),
                        EntityErrorType::InvalidPermissions,
                    );
                    continue;
                }
                if let Some(target_project) = target.project_id() {
                    if target_project != project_id {
                        self.base.record_error(
                            format!(
                                "Relationship to {} {} in project {} not allowed",
                                target.label, target.node_id, target_project
                            ),
                            keys([link.name.as_str()]),
                            EntityErrorType::InvalidLink,
                        );
                        continue;
                    }
                }
                tx.session
                    .add_edge(Edge::new(&node_id, &link.name, &target.node_id))?;
            }
        }
        Ok(())
    }

    /// Graph validation and error classification
    pub fn post_validate(&mut self, tx: &TransactionBase) -> SubmissionResult<()> {
        let dictionary = &tx.ctx.dictionary;
        let schema = dictionary.schema(self.label());

        if let Some(node_id) = self.base.node.as_ref().map(|n| n.node_id.clone()) {
            if self.is_valid() {
                if let Some(staged) = tx.session.get_node(&node_id)? {
                    let violations = GraphValidator::new(dictionary).validate(&tx.session, &staged)?;
                    self.base.record_violations(violations);
                }
            }
            if let Some(schema) = schema {
                let mut cases = Vec::new();
                for link in schema.all_links().into_iter().filter(|l| l.target_type == "case") {
                    cases.extend(tx.session.neighbors_out(&node_id, &link.name)?);
                }
                self.base.related_cases = EntityBase::related_cases_from(&cases);
            }
        }
        self.base.specify_errors(schema);
        Ok(())
    }
}
