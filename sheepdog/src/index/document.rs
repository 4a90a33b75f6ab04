// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
// Index record types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One record of the content-index service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub did: String,
    /// Shared by every version of the same file
    #[serde(default)]
    pub baseid: Option<String>,
    #[serde(default)]
    pub rev: Option<String>,
    /// `None` for the single unreleased record of a family
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub urls_metadata: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub acl: Vec<String>,
}

impl IndexDocument {
    pub fn new(did: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            ..Self::default()
        }
    }

    /// Append urls not already present, keeping order; returns whether any were added
    pub fn merge_urls(&mut self, urls: &[String]) -> bool {
        let mut added = false;
        for url in urls {
            if !self.urls.contains(url) {
                self.urls.push(url.clone());
                added = true;
            }
        }
        added
    }

    /// Whether this record matches every given hash and, if given, the size
    pub fn matches(&self, hashes: &BTreeMap<String, String>, size: Option<u64>) -> bool {
        let hashes_match = hashes
            .iter()
            .all(|(algo, digest)| self.hashes.get(algo) == Some(digest));
        let size_matches = size.map_or(true, |s| self.size == Some(s));
        hashes_match && size_matches
    }

    pub fn version_number(&self) -> Option<u64> {
        self.version.as_deref().and_then(|v| v.parse().ok())
    }
}

/// Human-readable alias pointing at a record's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAlias {
    pub record: String,
    pub hashes: BTreeMap<String, String>,
    pub size: Option<u64>,
    pub release: String,
}
