// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Graph storage: key-value drivers, the durable store and staged sessions

pub mod graph_store;
pub mod persistent;
pub mod session;
pub mod types;

pub use graph_store::{ChangeSet, GraphStore, StagedNode, UniqueKeyResolver};
pub use session::GraphSession;
pub use types::{Edge, Node, StorageError, StorageResult, UniqueViolation, VersionedNode};
