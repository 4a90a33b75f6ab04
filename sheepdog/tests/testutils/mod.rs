//! Test utilities for sheepdog integration tests
//!
//! `TestFixture` wires a transaction context over an in-memory store, an
//! in-process index service and a permissive authorizer.

#![allow(dead_code)]

pub mod dictionary;
pub mod test_fixture;
