// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Sheepdog - graph metadata submission for a biomedical data commons
//!
//! Clients submit, update, delete, review, submit and release graph-structured
//! metadata entities (cases, samples, files, clinical records) that belong to
//! `program/project` containers. Every mutation runs inside a transaction that
//! validates documents against a dictionary, reconciles file identity with a
//! content-index service, and leaves a durable transaction log behind.
//!
//! # Usage
//!
//! ```ignore
//! use sheepdog::{SubmissionConfig, TransactionContext, TransactionOptions};
//! use sheepdog::transactions::upload::UploadTransaction;
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(TransactionContext::open(config, dictionary, index, authz)?);
//! let opts = TransactionOptions::new("CGCI", "BLGSP", "update").user("alice");
//! let result = UploadTransaction::run(&ctx, opts, docs)?;
//! println!("{} {}", result.code, result.json);
//! ```
//!
//! The web layer is a thin adapter: it builds the transaction options, calls
//! one of the transaction entry points and serializes `json`/`code` back.

pub mod auth;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod index;
pub mod storage;
pub mod transactions;
pub mod txn;
pub mod worker;

pub use config::{SubmissionBucket, SubmissionConfig};
pub use error::{SubmissionError, SubmissionResult};
pub use transactions::context::{TransactionContext, TransactionOptions};
pub use transactions::TransactionResult;

/// Sheepdog version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sheepdog crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");

/// Install an `env_logger` backend honoring `RUST_LOG`.
///
/// Intended for binaries and tests embedding the crate; calling it more than
/// once is harmless.
pub fn init_logging(default_level: log::LevelFilter) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(default_level)
        .is_test(cfg!(test))
        .try_init();
}
