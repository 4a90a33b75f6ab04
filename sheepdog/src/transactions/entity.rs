// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Per-entity state shared by every transaction kind

use crate::dictionary::{Dictionary, EntitySchema, Violation};
use crate::storage::Node;
use crate::txn::TransactionSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Classification of an entity error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityErrorType {
    InvalidLink,
    InvalidNumeric,
    InvalidPermissions,
    InvalidProperty,
    InvalidType,
    InvalidValue,
    MissingProperty,
    NotUnique,
    NotFound,
    #[serde(rename = "ERROR")]
    Uncategorized,
}

/// An error or warning attached to one entity of a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityError {
    pub message: String,
    pub keys: Vec<String>,
    /// Absent on warnings
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<EntityErrorType>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityError {
    pub fn new(message: impl Into<String>, keys: Vec<String>, error_type: EntityErrorType) -> Self {
        Self {
            message: message.into(),
            keys,
            error_type: Some(error_type),
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// What a transaction did, or would do, to an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityAction {
    Create,
    Update,
    /// Replaced by a new version node
    Version,
    Delete,
    Submit,
    Release,
}

impl EntityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityAction::Create => "create",
            EntityAction::Update => "update",
            EntityAction::Version => "version",
            EntityAction::Delete => "delete",
            EntityAction::Submit => "submit",
            EntityAction::Release => "release",
        }
    }
}

pub(crate) fn keys<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    keys.into_iter().map(Into::into).collect()
}

/// Values of every secondary unique-key tuple of `schema` found in `props`
///
/// Tuples with a missing or null component are skipped.
pub fn secondary_keys(schema: &EntitySchema, props: &Map<String, Value>) -> Vec<Map<String, Value>> {
    schema
        .secondary_unique_keys()
        .into_iter()
        .filter_map(|tuple| {
            let mut values = Map::new();
            for key in tuple {
                match props.get(&key) {
                    Some(value) if !value.is_null() => {
                        values.insert(key, value.clone());
                    }
                    _ => return None,
                }
            }
            Some(values)
        })
        .collect()
}

/// Document properties known to `schema`, plus the owning project
pub fn skeleton_props(schema: &EntitySchema, doc: &Map<String, Value>, project_id: &str) -> Map<String, Value> {
    let mut props: Map<String, Value> = doc
        .iter()
        .filter(|(key, _)| schema.has_property(key) && !schema.is_link(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if schema.has_project_id() && !props.contains_key("project_id") {
        props.insert("project_id".to_string(), json!(project_id));
    }
    props
}

/// State common to upload, deletion, submission and release entities
#[derive(Debug, Clone, Default)]
pub struct EntityBase {
    pub node: Option<Node>,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub action: Option<EntityAction>,
    pub errors: Vec<EntityError>,
    pub warnings: Vec<EntityError>,
    /// Properties before this transaction touched the node
    pub old_props: Option<Map<String, Value>>,
    pub related_cases: Vec<Value>,
}

impl EntityBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity wrapping an existing node
    pub fn for_node(node: Node, action: EntityAction) -> Self {
        Self {
            entity_id: Some(node.node_id.clone()),
            entity_type: Some(node.label.clone()),
            old_props: Some(node.props.clone()),
            action: Some(action),
            node: Some(node),
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn record_error(
        &mut self,
        message: impl Into<String>,
        keys: Vec<String>,
        error_type: EntityErrorType,
    ) {
        self.push_error(EntityError::new(message, keys, error_type));
    }

    pub fn push_error(&mut self, error: EntityError) {
        log::debug!(
            "entity {} error: {}",
            self.entity_id.as_deref().unwrap_or("<new>"),
            error.message
        );
        self.errors.push(error);
    }

    pub fn record_warning(&mut self, message: impl Into<String>, keys: Vec<String>) {
        self.warnings.push(EntityError {
            message: message.into(),
            keys,
            error_type: None,
            extra: Map::new(),
        });
    }

    /// Record dictionary violations as uncategorized errors
    pub fn record_violations(&mut self, violations: Vec<Violation>) {
        for violation in violations {
            self.record_error(violation.message, violation.keys, EntityErrorType::Uncategorized);
        }
    }

    /// Give uncategorized validator errors a specific type
    pub fn specify_errors(&mut self, schema: Option<&EntitySchema>) {
        for error in self.errors.iter_mut() {
            if error.error_type != Some(EntityErrorType::Uncategorized) {
                continue;
            }
            if error.message.contains("is not of type") {
                error.error_type = Some(EntityErrorType::InvalidValue);
            } else if error.message.contains("is a required property") {
                error.error_type = Some(EntityErrorType::MissingProperty);
            } else if let (Some(schema), Some(key)) = (schema, error.keys.first()) {
                if schema.is_link(key) {
                    error.error_type = Some(EntityErrorType::InvalidLink);
                }
            }
        }
    }

    /// Secondary keys of the node, if one has been resolved
    pub fn unique_keys(&self, dictionary: &Dictionary) -> Vec<Map<String, Value>> {
        match (&self.node, self.entity_type.as_deref().and_then(|t| dictionary.schema(t))) {
            (Some(node), Some(schema)) => secondary_keys(schema, &node.props),
            _ => Vec::new(),
        }
    }

    /// Response representation
    pub fn to_json(&self, dictionary: &Dictionary) -> Value {
        json!({
            "valid": self.is_valid(),
            "action": self.action.map(|a| a.as_str()),
            "type": self.entity_type,
            "id": self.entity_id,
            "related_cases": self.related_cases,
            "errors": self.errors,
            "warnings": self.warnings,
            "unique_keys": self.unique_keys(dictionary),
        })
    }

    /// Log snapshot, for entities that resolved to a node
    pub fn snapshot(&self) -> Option<TransactionSnapshot> {
        let node = self.node.as_ref()?;
        let new_props = match self.action {
            Some(EntityAction::Delete) => None,
            _ => Some(node.props.clone()),
        };
        Some(TransactionSnapshot {
            entity_id: node.node_id.clone(),
            old_props: self.old_props.clone(),
            new_props,
            action: self.action.map(|a| a.as_str()).unwrap_or("none").to_string(),
        })
    }

    /// `{id, submitter_id}` of the cases this node links to directly
    pub fn related_cases_from(cases: &[Node]) -> Vec<Value> {
        cases
            .iter()
            .map(|case| json!({"id": case.node_id, "submitter_id": case.submitter_id()}))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case_schema() -> EntitySchema {
        EntitySchema::from_value(
            "case",
            &json!({
                "category": "administrative",
                "required": ["submitter_id", "type", "projects"],
                "systemProperties": ["id", "project_id", "state"],
                "uniqueKeys": [["id"], ["project_id", "submitter_id"]],
                "links": [{
                    "name": "projects",
                    "backref": "cases",
                    "target_type": "project",
                    "multiplicity": "many_to_one",
                    "required": true
                }],
                "properties": {
                    "type": {"type": "string"},
                    "id": {"type": "string"},
                    "submitter_id": {"type": "string"},
                    "project_id": {"type": "string"},
                    "state": {"type": "string", "default": "validated"},
                    "projects": {"type": ["object", "array"]}
                }
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_specify_errors() {
        let schema = case_schema();
        let mut entity = EntityBase::new();
        entity.record_error("5 is not of type 'string'", keys(["submitter_id"]), EntityErrorType::Uncategorized);
        entity.record_error("'projects' is a required property", keys(["projects"]), EntityErrorType::Uncategorized);
        entity.record_error("bad link", keys(["projects"]), EntityErrorType::Uncategorized);
        entity.record_error("odd", keys(["submitter_id"]), EntityErrorType::Uncategorized);
        entity.record_error("dup", keys(["id"]), EntityErrorType::NotUnique);
        entity.specify_errors(Some(&schema));

        let types: Vec<_> = entity.errors.iter().map(|e| e.error_type.unwrap()).collect();
        assert_eq!(
            types,
            vec![
                EntityErrorType::InvalidValue,
                EntityErrorType::MissingProperty,
                EntityErrorType::InvalidLink,
                EntityErrorType::Uncategorized,
                EntityErrorType::NotUnique,
            ]
        );
    }

    #[test]
    fn test_error_serialization() {
        let error = EntityError::new("Entity not found.", keys(["id"]), EntityErrorType::NotFound)
            .with_extra("id", json!("abc"));
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["type"], "NOT_FOUND");
        assert_eq!(value["id"], "abc");
        assert_eq!(
            serde_json::to_value(EntityErrorType::Uncategorized).unwrap(),
            json!("ERROR")
        );

        let mut entity = EntityBase::new();
        entity.record_warning("ignored", keys(["state"]));
        let value = serde_json::to_value(&entity.warnings[0]).unwrap();
        assert!(value.get("type").is_none());
    }

    #[test]
    fn test_secondary_keys_skip_incomplete_tuples() {
        let schema = case_schema();
        let props = json!({"submitter_id": "case-1"});
        assert!(secondary_keys(&schema, props.as_object().unwrap()).is_empty());

        let skeleton = skeleton_props(&schema, props.as_object().unwrap(), "CGCI-BLGSP");
        let found = secondary_keys(&schema, &skeleton);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["project_id"], "CGCI-BLGSP");
    }

    #[test]
    fn test_to_json_shape() {
        let mut node = Node::new("n1", "case");
        node.set("submitter_id", json!("case-1"));
        node.set("project_id", json!("CGCI-BLGSP"));
        let mut entity = EntityBase::for_node(node, EntityAction::Update);
        entity.record_error("nope", vec![], EntityErrorType::InvalidValue);

        let dictionary = Dictionary::from_value(&json!({})).unwrap();
        let value = entity.to_json(&dictionary);
        assert_eq!(value["valid"], false);
        assert_eq!(value["action"], "update");
        assert_eq!(value["id"], "n1");
        assert_eq!(value["type"], "case");
        assert_eq!(value["errors"][0]["type"], "INVALID_VALUE");
    }
}
