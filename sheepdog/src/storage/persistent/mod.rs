// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Persistent key-value backends
//!
//! ```text
//! GraphStore / TransactionLogStore (records)
//!     ↓
//! StorageDriver (named trees of byte keys)
//!     ↓
//! Sled | Memory
//! ```

pub mod factory;
pub mod memory;
#[cfg(feature = "sled-backend")]
pub mod sled;
pub mod traits;
pub mod types;

pub use factory::create_storage_driver;
pub use traits::{DynStorageDriver, StorageDriver, StorageTree, TreeWrite};
pub use types::{StorageDriverError, StorageType};
