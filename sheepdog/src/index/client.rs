// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Content-index client interface

use super::document::{IndexAlias, IndexDocument};
use super::IndexResult;
use std::collections::BTreeMap;

/// Operations the submission service consumes from the index service
pub trait IndexClient: Send + Sync {
    /// Record by its did
    fn get(&self, did: &str) -> IndexResult<Option<IndexDocument>>;

    /// First record matching every given hash and the size, if given
    fn get_with_params(
        &self,
        hashes: &BTreeMap<String, String>,
        size: Option<u64>,
    ) -> IndexResult<Option<IndexDocument>>;

    /// Register a new record; an empty `did` asks the service to mint one
    fn create(&self, doc: IndexDocument) -> IndexResult<IndexDocument>;

    fn create_alias(&self, alias: IndexAlias) -> IndexResult<()>;

    /// Add a record to the family of `family_did`
    fn add_version(&self, family_did: &str, doc: IndexDocument) -> IndexResult<IndexDocument>;

    /// Every record in the family of `did`, including `did` itself
    fn list_versions(&self, did: &str) -> IndexResult<Vec<IndexDocument>>;

    /// Replace the mutable fields of an existing record
    fn patch(&self, doc: &IndexDocument) -> IndexResult<IndexDocument>;

    fn delete(&self, did: &str) -> IndexResult<()>;
}
