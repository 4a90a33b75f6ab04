// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Document upload: create and update entities from JSON documents

pub mod batch;
pub mod entity;
mod file;
pub mod transaction;

pub use batch::UploadBatch;
pub use entity::UploadEntity;
pub use transaction::{BulkUploadTransaction, UploadTransaction};
