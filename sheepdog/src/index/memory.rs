// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! In-process index service, used for tests and single-node deployments

use super::client::IndexClient;
use super::document::{IndexAlias, IndexDocument};
use super::{IndexError, IndexResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
pub struct InMemoryIndexClient {
    /// Records in creation order
    records: RwLock<Vec<IndexDocument>>,
    aliases: RwLock<Vec<IndexAlias>>,
}

fn new_rev() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl InMemoryIndexClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record
    pub fn records(&self) -> Vec<IndexDocument> {
        self.records.read().clone()
    }

    pub fn aliases(&self) -> Vec<IndexAlias> {
        self.aliases.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn insert(&self, mut doc: IndexDocument) -> IndexResult<IndexDocument> {
        let mut records = self.records.write();
        if doc.did.is_empty() {
            doc.did = uuid::Uuid::new_v4().to_string();
        }
        if records.iter().any(|r| r.did == doc.did) {
            return Err(IndexError::Conflict(doc.did));
        }
        if doc.baseid.is_none() {
            doc.baseid = Some(uuid::Uuid::new_v4().to_string());
        }
        doc.rev = Some(new_rev());
        records.push(doc.clone());
        Ok(doc)
    }
}

impl IndexClient for InMemoryIndexClient {
    fn get(&self, did: &str) -> IndexResult<Option<IndexDocument>> {
        Ok(self.records.read().iter().find(|r| r.did == did).cloned())
    }

    fn get_with_params(
        &self,
        hashes: &BTreeMap<String, String>,
        size: Option<u64>,
    ) -> IndexResult<Option<IndexDocument>> {
        if hashes.is_empty() && size.is_none() {
            return Err(IndexError::InvalidRequest(
                "hashes or size required".to_string(),
            ));
        }
        Ok(self
            .records
            .read()
            .iter()
            .find(|r| r.matches(hashes, size))
            .cloned())
    }

    fn create(&self, doc: IndexDocument) -> IndexResult<IndexDocument> {
        if doc.hashes.is_empty() {
            return Err(IndexError::InvalidRequest(format!(
                "record {} has no hashes",
                doc.did
            )));
        }
        let created = self.insert(doc)?;
        log::debug!("index: created record {}", created.did);
        Ok(created)
    }

    fn create_alias(&self, alias: IndexAlias) -> IndexResult<()> {
        let mut aliases = self.aliases.write();
        if aliases.iter().any(|a| a.record == alias.record) {
            return Err(IndexError::Conflict(alias.record));
        }
        aliases.push(alias);
        Ok(())
    }

    fn add_version(&self, family_did: &str, mut doc: IndexDocument) -> IndexResult<IndexDocument> {
        let family = self
            .get(family_did)?
            .ok_or_else(|| IndexError::NotFound(family_did.to_string()))?;
        doc.baseid = family.baseid;
        let created = self.insert(doc)?;
        log::debug!("index: added version {} to {}", created.did, family_did);
        Ok(created)
    }

    fn list_versions(&self, did: &str) -> IndexResult<Vec<IndexDocument>> {
        let records = self.records.read();
        let baseid = records
            .iter()
            .find(|r| r.did == did)
            .map(|r| r.baseid.clone())
            .ok_or_else(|| IndexError::NotFound(did.to_string()))?;
        Ok(records
            .iter()
            .filter(|r| r.baseid == baseid)
            .cloned()
            .collect())
    }

    fn patch(&self, doc: &IndexDocument) -> IndexResult<IndexDocument> {
        let mut records = self.records.write();
        let record = records
            .iter_mut()
            .find(|r| r.did == doc.did)
            .ok_or_else(|| IndexError::NotFound(doc.did.clone()))?;
        let baseid = record.baseid.clone();
        *record = doc.clone();
        record.baseid = baseid;
        record.rev = Some(new_rev());
        Ok(record.clone())
    }

    fn delete(&self, did: &str) -> IndexResult<()> {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| r.did != did);
        if records.len() == before {
            return Err(IndexError::NotFound(did.to_string()));
        }
        Ok(())
    }
}
