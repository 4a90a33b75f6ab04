// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! Shared services of every transaction

use crate::auth::Authorizer;
use crate::config::SubmissionConfig;
use crate::dictionary::Dictionary;
use crate::error::{SubmissionError, SubmissionResult};
use crate::index::IndexClient;
use crate::storage::persistent::create_storage_driver;
use crate::storage::{Edge, GraphSession, GraphStore, Node, StorageError};
use crate::txn::{TransactionId, TransactionLogStore};
use serde_json::{json, Value};
use std::sync::Arc;

/// Caller-supplied parameters of one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOptions {
    pub program: String,
    pub project: String,
    pub role: String,
    pub dry_run: bool,
    pub user: String,
    /// Log claimed ahead of time by an asynchronous caller
    pub transaction_id: Option<TransactionId>,
}

impl TransactionOptions {
    pub fn new(
        program: impl Into<String>,
        project: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            project: project.into(),
            role: role.into(),
            dry_run: false,
            user: String::new(),
            transaction_id: None,
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn claimed(mut self, id: TransactionId) -> Self {
        self.transaction_id = Some(id);
        self
    }

    pub fn project_id(&self) -> String {
        format!("{}-{}", self.program, self.project)
    }
}

/// Dictionary, graph store, log store, index client and authorizer
///
/// Cheap to share; every transaction holds an `Arc` of it.
pub struct TransactionContext {
    pub config: SubmissionConfig,
    pub dictionary: Arc<Dictionary>,
    pub store: Arc<GraphStore>,
    pub logs: Arc<TransactionLogStore>,
    pub index: Arc<dyn IndexClient>,
    pub authz: Arc<dyn Authorizer>,
}

impl TransactionContext {
    /// Open the configured storage backend and wire the services together
    pub fn open(
        config: SubmissionConfig,
        dictionary: Arc<Dictionary>,
        index: Arc<dyn IndexClient>,
        authz: Arc<dyn Authorizer>,
    ) -> SubmissionResult<Self> {
        let driver = create_storage_driver(config.storage_type, &config.data_path)
            .map_err(StorageError::from)?;
        let driver = Arc::new(driver);
        let store = Arc::new(GraphStore::with_driver(driver.clone())?);
        let logs = Arc::new(TransactionLogStore::new(&driver)?);
        log::info!(
            "submission context opened ({:?} storage at {})",
            config.storage_type,
            config.data_path.display()
        );
        Ok(Self {
            config,
            dictionary,
            store,
            logs,
            index,
            authz,
        })
    }

    /// A fresh session over the shared store
    pub fn session(&self) -> GraphSession {
        GraphSession::new(self.store.clone(), self.dictionary.clone())
    }

    /// The project node of `program/project`
    pub fn lookup_project(
        &self,
        session: &GraphSession,
        program: &str,
        project: &str,
    ) -> SubmissionResult<Node> {
        for node in session.nodes_with_label("project")? {
            if node.get_str("code") != Some(project) {
                continue;
            }
            let owned = session
                .neighbors_out(&node.node_id, "programs")?
                .iter()
                .any(|p| p.get_str("name") == Some(program));
            if owned {
                return Ok(node);
            }
        }
        Err(SubmissionError::NotFound(format!(
            "Project {} not found in program {}",
            project, program
        )))
    }

    /// Current state of a project; an unset state is `open`
    pub fn project_state(&self, project: &Node) -> String {
        project.get_str("state").unwrap_or("open").to_string()
    }

    /// dbGaP accessions guarding the project's files
    pub fn phsids(&self, session: &GraphSession, project: &Node) -> SubmissionResult<Vec<String>> {
        let mut phsids = Vec::new();
        if let Some(phsid) = project.get_str("dbgap_accession_number") {
            phsids.push(phsid.to_string());
        }
        for program in session.neighbors_out(&project.node_id, "programs")? {
            if let Some(phsid) = program.get_str("dbgap_accession_number") {
                if !phsids.iter().any(|p| p == phsid) {
                    phsids.push(phsid.to_string());
                }
            }
        }
        Ok(phsids)
    }

    pub fn is_project_public(&self, project: &Node) -> bool {
        project.get_str("availability_type") == Some("Open")
    }

    /// Register a program; returns its node id
    pub fn create_program(&self, name: &str, dbgap_accession_number: &str) -> SubmissionResult<String> {
        let mut session = self.session();
        let mut node = Node::new(uuid::Uuid::new_v4().to_string(), "program");
        node.set("name", json!(name));
        node.set("dbgap_accession_number", json!(dbgap_accession_number));
        let node_id = node.node_id.clone();
        session.add(node)?;
        session.commit()?;
        log::info!("created program {} ({})", name, node_id);
        Ok(node_id)
    }

    /// Register a project under an existing program; returns its node id
    ///
    /// `extra` props (e.g. `availability_type`) are set on the node as given.
    pub fn create_project(
        &self,
        program: &str,
        code: &str,
        dbgap_accession_number: &str,
        extra: Value,
    ) -> SubmissionResult<String> {
        let mut session = self.session();
        let program_node = session
            .nodes_with_label("program")?
            .into_iter()
            .find(|n| n.get_str("name") == Some(program))
            .ok_or_else(|| SubmissionError::NotFound(format!("Program {} not found", program)))?;

        let mut node = Node::new(uuid::Uuid::new_v4().to_string(), "project");
        node.set("code", json!(code));
        node.set("name", json!(code));
        node.set("state", json!("open"));
        node.set("releasable", json!(false));
        node.set("released", json!(false));
        node.set("dbgap_accession_number", json!(dbgap_accession_number));
        if let Value::Object(extra) = extra {
            node.props.extend(extra);
        }
        let node_id = node.node_id.clone();
        session.add(node)?;
        session.add_edge(Edge::new(&node_id, "programs", &program_node.node_id))?;
        session.commit()?;
        log::info!("created project {}-{} ({})", program, code, node_id);
        Ok(node_id)
    }

    /// Register an unreleased data release `major.minor`
    pub fn create_data_release(&self, major: u64, minor: u64) -> SubmissionResult<String> {
        let mut session = self.session();
        let mut node = Node::new(uuid::Uuid::new_v4().to_string(), "data_release");
        node.set("name", json!(format!("{}.{}", major, minor)));
        node.set("major_version", json!(major));
        node.set("minor_version", json!(minor));
        node.set("released", json!(false));
        let node_id = node.node_id.clone();
        session.add(node)?;
        session.commit()?;
        Ok(node_id)
    }
}
