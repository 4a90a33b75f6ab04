// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Content-index service integration
//!
//! The index service maps file identity (UUID, hashes and size) to storage
//! URLs and release metadata. Graph file nodes and index records are kept
//! 1:1 by the upload pipeline; this module only defines the consumed
//! interface, an in-process implementation and the release versioning helper.

pub mod client;
pub mod document;
pub mod memory;
pub mod versioning;

pub use client::IndexClient;
pub use document::{IndexAlias, IndexDocument};
pub use memory::InMemoryIndexClient;
pub use versioning::IndexVersionHelper;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    #[error("index record not found: {0}")]
    NotFound(String),

    #[error("index record already exists: {0}")]
    Conflict(String),

    #[error("invalid index request: {0}")]
    InvalidRequest(String),

    #[error("index service unavailable: {0}")]
    Unavailable(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
