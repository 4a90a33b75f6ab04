// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction identifiers and log states

use serde::{Deserialize, Serialize};

/// Sequential identifier of a transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn id(&self) -> u64 {
        self.0
    }

    pub fn from_u64(id: u64) -> Self {
        TransactionId(id)
    }

    /// Big-endian key so that tree order is id order
    pub(crate) fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome recorded on a transaction log
///
/// Every log starts `Pending` and moves exactly once to a terminal state.
/// `Failed` means the caller's input was rejected; `Errored` means the
/// service failed while the input was acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionLogState {
    Pending,
    Succeeded,
    Failed,
    Errored,
}

impl TransactionLogState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionLogState::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionLogState::Pending => "PENDING",
            TransactionLogState::Succeeded => "SUCCEEDED",
            TransactionLogState::Failed => "FAILED",
            TransactionLogState::Errored => "ERRORED",
        }
    }
}

impl std::fmt::Display for TransactionLogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_serializes_uppercase() {
        let json = serde_json::to_string(&TransactionLogState::Succeeded).unwrap();
        assert_eq!(json, "\"SUCCEEDED\"");
        assert!(!TransactionLogState::Pending.is_terminal());
        assert!(TransactionLogState::Errored.is_terminal());
    }

    #[test]
    fn test_key_order_matches_id_order() {
        let a = TransactionId::from_u64(9).to_key();
        let b = TransactionId::from_u64(10).to_key();
        assert!(a < b);
    }
}
