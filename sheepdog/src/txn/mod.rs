// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction logs
//!
//! Durable audit records of every submission transaction, kept apart from
//! the graph session so they survive its rollback.

pub mod log;
pub mod state;
pub mod store;

pub use log::{TransactionDocument, TransactionLog, TransactionSnapshot};
pub use state::{TransactionId, TransactionLogState};
pub use store::TransactionLogStore;
