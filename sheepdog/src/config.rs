// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Submission service configuration

use crate::error::{SubmissionError, SubmissionResult};
use crate::storage::persistent::StorageType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Object-store location used to build generated file URLs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionBucket {
    pub host: String,
    pub bucket: String,
}

/// Configuration shared by every transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// At most one index record may share a (hash, size) pair
    pub enforce_file_hash_size_uniqueness: bool,

    /// Updating a released file node with new content creates a new version
    pub create_replaceable: bool,

    /// File nodes may only be created for content already in the index
    pub require_file_index_exists: bool,

    /// Gates open-access ACLs on file types
    pub is_gdc: bool,

    /// Components of generated object-store URLs
    pub submission: SubmissionBucket,

    /// Backend used for the graph and transaction log
    pub storage_type: StorageType,

    /// Directory for persistent backends
    pub data_path: PathBuf,

    /// Whether the async entry points use the worker pool
    pub use_async_workers: bool,

    /// Maximum number of transactions queued on the worker pool
    pub async_max_queue_len: usize,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            enforce_file_hash_size_uniqueness: true,
            create_replaceable: false,
            require_file_index_exists: false,
            is_gdc: false,
            submission: SubmissionBucket::default(),
            storage_type: StorageType::default(),
            data_path: PathBuf::from("./sheepdog-data"),
            use_async_workers: true,
            async_max_queue_len: 128,
        }
    }
}

impl SubmissionConfig {
    /// In-memory configuration for tests and local tooling
    pub fn testing() -> Self {
        Self {
            storage_type: StorageType::Memory,
            submission: SubmissionBucket {
                host: "localhost".to_string(),
                bucket: "test_submission".to_string(),
            },
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document; absent keys keep their defaults
    pub fn from_json_str(raw: &str) -> SubmissionResult<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SubmissionError::internal(format!("invalid configuration: {}", e)))
    }

    /// URL for a file node whose submitter supplied none
    pub fn generated_file_url(&self, node_id: &str, file_name: &str) -> String {
        format!(
            "s3://{}/{}/{}/{}",
            self.submission.host, self.submission.bucket, node_id, file_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SubmissionConfig::default();
        assert!(config.enforce_file_hash_size_uniqueness);
        assert!(!config.create_replaceable);
        assert_eq!(config.async_max_queue_len, 128);
        assert_eq!(config.storage_type, StorageType::Sled);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SubmissionConfig::from_json_str(
            r#"{"create_replaceable": true, "storage_type": "Memory",
                "submission": {"host": "s3.example.org", "bucket": "subs"}}"#,
        )
        .expect("config should parse");
        assert!(config.create_replaceable);
        assert!(config.enforce_file_hash_size_uniqueness);
        assert_eq!(config.storage_type, StorageType::Memory);
        assert_eq!(
            config.generated_file_url("abc", "reads.bam"),
            "s3://s3.example.org/subs/abc/reads.bam"
        );
    }
}
