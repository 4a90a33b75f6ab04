// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Isolated transaction log store
//!
//! Logs live in their own trees of the shared driver and every write is
//! applied and flushed immediately. Nothing here goes through a
//! [`GraphSession`](crate::storage::GraphSession), so rolling back a
//! mutation never rolls back its log.

use super::log::TransactionLog;
use super::state::TransactionId;
use crate::storage::persistent::{DynStorageDriver, StorageTree};
use crate::storage::StorageResult;
use parking_lot::Mutex;

const LOGS_TREE: &str = "transaction_logs";
const SEQ_TREE: &str = "transaction_log_seq";
const SEQ_KEY: &[u8] = b"next";

pub struct TransactionLogStore {
    logs: Box<dyn StorageTree>,
    seq: Box<dyn StorageTree>,
    claim_lock: Mutex<()>,
}

impl TransactionLogStore {
    pub fn new(driver: &DynStorageDriver) -> StorageResult<Self> {
        Ok(Self {
            logs: driver.open_tree(LOGS_TREE)?,
            seq: driver.open_tree(SEQ_TREE)?,
            claim_lock: Mutex::new(()),
        })
    }

    fn next_id(&self) -> StorageResult<TransactionId> {
        let current = match self.seq.get(SEQ_KEY)? {
            Some(raw) => {
                let mut bytes = [0u8; 8];
                if raw.len() == 8 {
                    bytes.copy_from_slice(&raw);
                }
                u64::from_be_bytes(bytes)
            }
            None => 0,
        };
        let next = current + 1;
        self.seq.insert(SEQ_KEY, &next.to_be_bytes())?;
        Ok(TransactionId::from_u64(next))
    }

    /// Allocate an id and durably write a pending log
    pub fn claim(
        &self,
        program: &str,
        project: &str,
        role: &str,
        dry_run: bool,
    ) -> StorageResult<TransactionLog> {
        let _guard = self.claim_lock.lock();
        let id = self.next_id()?;
        let log = TransactionLog::new(id, program, project, role, dry_run);
        self.write(&log)?;
        log::debug!(
            "claimed transaction log {} for {}-{} role={} dry_run={}",
            id,
            program,
            project,
            role,
            dry_run
        );
        Ok(log)
    }

    fn write(&self, log: &TransactionLog) -> StorageResult<()> {
        let value = serde_json::to_vec(log)?;
        self.logs.insert(&log.id.to_key(), &value)?;
        self.logs.flush()?;
        self.seq.flush()?;
        Ok(())
    }

    /// Overwrite a log with its current contents
    pub fn save(&self, log: &TransactionLog) -> StorageResult<()> {
        self.write(log)
    }

    pub fn get(&self, id: TransactionId) -> StorageResult<Option<TransactionLog>> {
        match self.logs.get(&id.to_key())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Logs of one project, oldest first
    pub fn list(&self, program: &str, project: &str) -> StorageResult<Vec<TransactionLog>> {
        let mut logs = Vec::new();
        for entry in self.logs.iter()? {
            let (_, raw) = entry?;
            let log: TransactionLog = serde_json::from_slice(&raw)?;
            if log.program == program && log.project == project {
                logs.push(log);
            }
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::persistent::{create_storage_driver, StorageType};
    use crate::txn::TransactionLogState;

    fn store() -> TransactionLogStore {
        let driver = create_storage_driver(StorageType::Memory, "unused").unwrap();
        TransactionLogStore::new(&driver).unwrap()
    }

    #[test]
    fn test_claim_allocates_sequential_ids() {
        let store = store();
        let first = store.claim("CGCI", "BLGSP", "create", false).unwrap();
        let second = store.claim("CGCI", "BLGSP", "update", true).unwrap();
        assert_eq!(first.id.id() + 1, second.id.id());

        let stored = store.get(second.id).unwrap().unwrap();
        assert!(stored.is_dry_run);
        assert_eq!(stored.state, TransactionLogState::Pending);
    }

    #[test]
    fn test_save_overwrites_and_list_filters_by_project() {
        let store = store();
        let mut log = store.claim("CGCI", "BLGSP", "create", false).unwrap();
        store.claim("TCGA", "LUAD", "create", false).unwrap();

        log.state = TransactionLogState::Failed;
        store.save(&log).unwrap();

        let listed = store.list("CGCI", "BLGSP").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, TransactionLogState::Failed);
    }
}
