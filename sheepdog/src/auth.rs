// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Project-scoped authorization
//!
//! Authentication happens outside this crate. Transactions only ask which
//! roles (`create`, `update`, `delete`, `release`, ...) a user holds
//! on a `program/project`.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

pub const ROLE_CREATE: &str = "create";
pub const ROLE_READ: &str = "read";
pub const ROLE_UPDATE: &str = "update";
pub const ROLE_DELETE: &str = "delete";
pub const ROLE_UPLOAD: &str = "upload";
pub const ROLE_ADMIN: &str = "admin";
/// Review, open, submit and release of a whole project
pub const ROLE_RELEASE: &str = "release";

/// Every role a project administrator holds
pub const ALL_ROLES: &[&str] = &[
    ROLE_CREATE,
    ROLE_READ,
    ROLE_UPDATE,
    ROLE_DELETE,
    ROLE_UPLOAD,
    ROLE_ADMIN,
    ROLE_RELEASE,
];

pub trait Authorizer: Send + Sync {
    /// Roles `user` holds on `program-project`
    fn project_roles(&self, user: &str, program: &str, project: &str) -> Vec<String>;

    fn has_role(&self, user: &str, program: &str, project: &str, role: &str) -> bool {
        self.project_roles(user, program, project)
            .iter()
            .any(|r| r == role)
    }
}

/// In-process grant table
#[derive(Default)]
pub struct StaticAuthorizer {
    grants: RwLock<HashMap<(String, String), BTreeSet<String>>>,
    superusers: RwLock<BTreeSet<String>>,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `roles` on `project_id` (`program-project`) to `user`
    pub fn grant(&self, user: &str, project_id: &str, roles: &[&str]) {
        let mut grants = self.grants.write();
        grants
            .entry((user.to_string(), project_id.to_string()))
            .or_default()
            .extend(roles.iter().map(|r| r.to_string()));
    }

    pub fn revoke_all(&self, user: &str, project_id: &str) {
        self.grants
            .write()
            .remove(&(user.to_string(), project_id.to_string()));
    }

    /// Give `user` every role on every project
    pub fn allow_all(&self, user: &str) {
        self.superusers.write().insert(user.to_string());
    }
}

impl Authorizer for StaticAuthorizer {
    fn project_roles(&self, user: &str, program: &str, project: &str) -> Vec<String> {
        if self.superusers.read().contains(user) {
            return ALL_ROLES.iter().map(|r| r.to_string()).collect();
        }
        let project_id = format!("{}-{}", program, project);
        self.grants
            .read()
            .get(&(user.to_string(), project_id))
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grants_are_per_project() {
        let authz = StaticAuthorizer::new();
        authz.grant("alice", "CGCI-BLGSP", &[ROLE_CREATE, ROLE_UPDATE]);
        assert!(authz.has_role("alice", "CGCI", "BLGSP", ROLE_UPDATE));
        assert!(!authz.has_role("alice", "CGCI", "BLGSP", ROLE_DELETE));
        assert!(authz.project_roles("alice", "TCGA", "LUAD").is_empty());

        authz.revoke_all("alice", "CGCI-BLGSP");
        assert!(authz.project_roles("alice", "CGCI", "BLGSP").is_empty());
    }

    #[test]
    fn test_superuser_holds_every_role() {
        let authz = StaticAuthorizer::new();
        authz.allow_all("admin");
        assert_eq!(authz.project_roles("admin", "TCGA", "LUAD").len(), ALL_ROLES.len());
    }
}
