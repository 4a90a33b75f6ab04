// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Release versioning of index records
//!
//! Every file family has at most one unversioned record: the content that has
//! been submitted but not yet released. Releasing stamps that record with the
//! next version number and the release it went out in.

use super::client::IndexClient;
use super::document::IndexDocument;
use super::IndexResult;
use serde_json::Value;
use std::sync::Arc;

pub struct IndexVersionHelper {
    index: Arc<dyn IndexClient>,
}

impl IndexVersionHelper {
    pub fn new(index: Arc<dyn IndexClient>) -> Self {
        Self { index }
    }

    /// Record new content for the family of `family_did`
    ///
    /// A released family gets a new unversioned record; an unreleased one has
    /// its unversioned record updated in place.
    pub fn add_node_version(
        &self,
        family_did: &str,
        new_version: IndexDocument,
    ) -> IndexResult<IndexDocument> {
        let latest = self
            .index
            .get(family_did)?
            .ok_or_else(|| super::IndexError::NotFound(family_did.to_string()))?;
        if latest.version.is_some() {
            return self.index.add_version(family_did, new_version);
        }
        let mut updated = latest;
        updated.hashes = new_version.hashes;
        updated.size = new_version.size;
        updated.file_name = new_version.file_name;
        updated.merge_urls(&new_version.urls);
        updated.metadata.extend(new_version.metadata);
        self.index.patch(&updated)
    }

    /// Release the node's unreleased record as `release_number`
    ///
    /// Returns whether a record was released and the release number the node
    /// is now at. Releasing an already released node changes nothing and
    /// reports the release its latest version went out in.
    pub fn release_node(
        &self,
        release_number: &str,
        node_id: &str,
        dry_run: bool,
    ) -> IndexResult<(bool, Option<String>)> {
        let versions = self.index.list_versions(node_id)?;
        let mut latest_number = 0u64;
        let mut latest_version: Option<&IndexDocument> = None;
        let mut unversioned: Option<&IndexDocument> = None;

        for version in &versions {
            match version.version_number() {
                None if version.version.is_none() => unversioned = Some(version),
                Some(n) if n >= latest_number => {
                    latest_number = n;
                    latest_version = Some(version);
                }
                _ => {}
            }
        }

        if let Some(record) = unversioned {
            let mut released = record.clone();
            released.version = Some((latest_number + 1).to_string());
            released
                .metadata
                .insert("file_state".into(), Value::String("submitted".into()));
            released.metadata.insert(
                "release_number".into(),
                Value::String(release_number.to_string()),
            );
            if !dry_run {
                self.index.patch(&released)?;
            }
            log::info!("release updated for: {}", released.did);
            return Ok((true, Some(release_number.to_string())));
        }

        Ok((
            false,
            latest_version
                .and_then(|v| v.metadata.get("release_number"))
                .and_then(Value::as_str)
                .map(str::to_string),
        ))
    }
}
