// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Data dictionary
//!
//! A read-only mapping from entity type to its JSON-schema definition, links,
//! required and system properties, unique keys and category. The dictionary is
//! loaded once and shared by every transaction.

pub mod schema;
pub mod validator;

pub use schema::{EntitySchema, Link, LinkEntry, LinkGroup, Multiplicity};
pub use validator::GraphValidator;

use crate::storage::UniqueKeyResolver;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DictionaryError {
    #[error("Dictionary parse error: {0}")]
    Parse(String),

    #[error("Invalid schema for '{label}': {message}")]
    InvalidSchema { label: String, message: String },
}

pub type DictionaryResult<T> = Result<T, DictionaryError>;

/// A validation problem found against the dictionary
///
/// Carries the raw validator phrasing; the upload pipeline classifies it.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub message: String,
    pub keys: Vec<String>,
}

impl Violation {
    pub fn new(message: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            message: message.into(),
            keys,
        }
    }
}

pub struct Dictionary {
    schemas: BTreeMap<String, EntitySchema>,
}

impl Dictionary {
    /// Build from a `{type_name: definition}` JSON object
    pub fn from_value(value: &Value) -> DictionaryResult<Self> {
        let entries = value
            .as_object()
            .ok_or_else(|| DictionaryError::Parse("dictionary must be an object".to_string()))?;
        let mut schemas = BTreeMap::new();
        for (label, definition) in entries {
            // `_definitions`, `_settings` and similar are shared fragments
            if label.starts_with('_') {
                continue;
            }
            schemas.insert(label.clone(), EntitySchema::from_value(label, definition)?);
        }
        log::debug!("loaded dictionary with {} entity types", schemas.len());
        Ok(Self { schemas })
    }

    pub fn from_json_str(raw: &str) -> DictionaryResult<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| DictionaryError::Parse(e.to_string()))?;
        Self::from_value(&value)
    }

    pub fn schema(&self, label: &str) -> Option<&EntitySchema> {
        self.schemas.get(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn category(&self, label: &str) -> Option<&str> {
        self.schema(label).map(|s| s.category.as_str())
    }
}

impl UniqueKeyResolver for Dictionary {
    fn unique_keys(&self, label: &str) -> Vec<Vec<String>> {
        self.schema(label)
            .map(EntitySchema::secondary_unique_keys)
            .unwrap_or_default()
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1];
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row.push((prev[j] + cost).min(prev[j + 1] + 1).min(row[j] + 1));
        }
        prev = row;
    }
    prev[b_chars.len()]
}

/// " Did you mean 'x'?" for the closest candidate more than half similar
pub fn suggestion<'a, I>(value: &str, candidates: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let best = candidates
        .into_iter()
        .map(|c| {
            let longest = value.chars().count().max(c.chars().count()).max(1);
            let similarity = 100 * (longest - edit_distance(value, c)) / longest;
            (similarity, c)
        })
        .max_by_key(|(similarity, _)| *similarity);
    match best {
        Some((similarity, candidate)) if similarity > 50 => {
            format!(" Did you mean '{}'?", candidate)
        }
        _ => String::new(),
    }
}
