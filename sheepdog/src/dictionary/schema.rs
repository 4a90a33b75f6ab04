// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Per-type dictionary definitions

use super::{DictionaryError, DictionaryResult, Violation};
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Cardinality of a link, read source-to-target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl Multiplicity {
    /// A source may link to at most one target
    pub fn single_target(&self) -> bool {
        matches!(self, Multiplicity::OneToOne | Multiplicity::ManyToOne)
    }

    /// A target may be linked from at most one source
    pub fn single_source(&self) -> bool {
        matches!(self, Multiplicity::OneToOne | Multiplicity::OneToMany)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Multiplicity::OneToOne => "one_to_one",
            Multiplicity::OneToMany => "one_to_many",
            Multiplicity::ManyToOne => "many_to_one",
            Multiplicity::ManyToMany => "many_to_many",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Link {
    /// Property name on the source document, e.g. `cases`
    pub name: String,
    /// Name of the reverse association on the target type
    pub backref: String,
    #[serde(default)]
    pub label: String,
    pub target_type: String,
    pub multiplicity: Multiplicity,
    #[serde(default)]
    pub required: bool,
}

/// Links of which at least one (`required`) or at most one (`exclusive`) applies
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkGroup {
    pub subgroup: Vec<LinkEntry>,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LinkEntry {
    Group(LinkGroup),
    Link(Link),
}

impl LinkEntry {
    fn collect<'a>(&'a self, out: &mut Vec<&'a Link>) {
        match self {
            LinkEntry::Link(link) => out.push(link),
            LinkEntry::Group(group) => group.subgroup.iter().for_each(|e| e.collect(out)),
        }
    }
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    category: String,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(default, rename = "systemProperties")]
    system_properties: Vec<String>,
    #[serde(default, rename = "uniqueKeys")]
    unique_keys: Vec<Vec<String>>,
    #[serde(default)]
    links: Vec<LinkEntry>,
}

/// Keys of a definition that are dictionary metadata, not JSON schema
const NON_SCHEMA_KEYS: &[&str] = &[
    "id",
    "$schema",
    "category",
    "links",
    "uniqueKeys",
    "systemProperties",
    "validators",
    "submittable",
    "downloadable",
    "previous_version_downloadable",
    "namespace",
    "program",
    "project",
];

/// Properties never taken from a document when filling system defaults
const IGNORED_SYSTEM_DEFAULTS: &[&str] = &[
    "id",
    "type",
    "created_datetime",
    "updated_datetime",
    "project_id",
];

pub struct EntitySchema {
    pub id: String,
    pub category: String,
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
    pub system_properties: Vec<String>,
    pub unique_keys: Vec<Vec<String>>,
    pub links: Vec<LinkEntry>,
    validator: JSONSchema,
}

impl std::fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySchema")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl EntitySchema {
    pub fn from_value(label: &str, definition: &Value) -> DictionaryResult<Self> {
        let invalid = |message: String| DictionaryError::InvalidSchema {
            label: label.to_string(),
            message,
        };
        let raw: RawSchema =
            serde_json::from_value(definition.clone()).map_err(|e| invalid(e.to_string()))?;

        let mut schema_doc = definition
            .as_object()
            .cloned()
            .ok_or_else(|| invalid("definition must be an object".to_string()))?;
        for key in NON_SCHEMA_KEYS {
            schema_doc.remove(*key);
        }
        let schema_doc = Value::Object(schema_doc);
        let validator = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&schema_doc)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            id: label.to_string(),
            category: raw.category,
            properties: raw.properties,
            required: raw.required,
            system_properties: raw.system_properties,
            unique_keys: raw.unique_keys,
            links: raw.links,
            validator,
        })
    }

    /// Every link, with groups flattened
    pub fn all_links(&self) -> Vec<&Link> {
        let mut out = Vec::new();
        self.links.iter().for_each(|e| e.collect(&mut out));
        out
    }

    pub fn link(&self, name: &str) -> Option<&Link> {
        self.all_links().into_iter().find(|l| l.name == name)
    }

    pub fn is_link(&self, name: &str) -> bool {
        self.link(name).is_some()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn is_system_property(&self, name: &str) -> bool {
        self.system_properties.iter().any(|p| p == name)
    }

    /// Required or system properties, which may not be removed from a node
    pub fn is_protected(&self, name: &str) -> bool {
        self.required.iter().any(|p| p == name) || self.is_system_property(name)
    }

    /// Entities of this type belong to a project
    pub fn has_project_id(&self) -> bool {
        self.has_property("project_id")
    }

    pub fn is_file(&self) -> bool {
        self.category.ends_with("_file")
    }

    /// Unique-key tuples other than the bare `id`
    pub fn secondary_unique_keys(&self) -> Vec<Vec<String>> {
        self.unique_keys
            .iter()
            .filter(|keys| keys.as_slice() != ["id"])
            .cloned()
            .collect()
    }

    /// Dictionary defaults for system properties
    pub fn system_property_defaults(&self) -> Map<String, Value> {
        let mut defaults = Map::new();
        for key in &self.system_properties {
            if IGNORED_SYSTEM_DEFAULTS.contains(&key.as_str()) {
                continue;
            }
            match self.properties.get(key) {
                Some(prop) => {
                    if let Some(default) = prop.get("default") {
                        defaults.insert(key.clone(), default.clone());
                    }
                }
                None => log::error!(
                    "'{}' has systemProperty '{}' that is not a property",
                    self.id,
                    key
                ),
            }
        }
        defaults
    }

    /// JSON-schema validation of a submitted document
    pub fn validate_document(&self, doc: &Value) -> Vec<Violation> {
        let Err(errors) = self.validator.validate(doc) else {
            return Vec::new();
        };
        errors
            .map(|error| {
                let path = error.instance_path.to_string();
                let mut keys: Vec<String> = if path.is_empty() {
                    Vec::new()
                } else {
                    vec![path.trim_start_matches('/').replace('/', ".")]
                };
                if keys.is_empty() {
                    if let ValidationErrorKind::Required { property } = &error.kind {
                        keys.push(property.as_str().unwrap_or_default().to_string());
                    }
                }
                Violation::new(error.to_string(), keys)
            })
            .collect()
    }
}
