// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Deletion of entities, or of optional fields on them

pub mod entity;
pub mod transaction;

pub use entity::DeletionEntity;
pub use transaction::DeletionTransaction;
