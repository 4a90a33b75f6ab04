//! Test fixture for sheepdog integration tests
//!
//! Every fixture owns an isolated store, index and grant table with one
//! program, one open project and one unreleased data release.

use super::dictionary::dictionary;
use serde_json::{json, Map, Value};
use sheepdog::auth::StaticAuthorizer;
use sheepdog::dictionary::Dictionary;
use sheepdog::index::{InMemoryIndexClient, IndexClient};
use sheepdog::storage::{Node, StorageError};
use sheepdog::transactions::deletion::DeletionTransaction;
use sheepdog::transactions::upload::UploadTransaction;
use sheepdog::txn::TransactionLog;
use sheepdog::{
    SubmissionConfig, SubmissionResult, TransactionContext, TransactionOptions, TransactionResult,
};
use std::sync::Arc;

pub const ADMIN: &str = "admin";
pub const PROJECT: &str = "TEST";
pub const PROJECT_PHSID: &str = "phs000002";
pub const PROGRAM_PHSID: &str = "phs000001";

pub struct TestFixture {
    pub ctx: Arc<TransactionContext>,
    pub index: Arc<InMemoryIndexClient>,
    pub authz: Arc<StaticAuthorizer>,
    pub program: String,
    pub project: String,
    _temp_dir: tempfile::TempDir,
}

impl TestFixture {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_config(SubmissionConfig::testing())
    }

    /// Fixture over `config`; its data directory is replaced by a temporary one
    pub fn with_config(config: SubmissionConfig) -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_index(config, |index| index as Arc<dyn IndexClient>)
    }

    /// Fixture whose context talks to `wrap(index)` instead of the bare index
    pub fn with_index(
        mut config: SubmissionConfig,
        wrap: impl FnOnce(Arc<InMemoryIndexClient>) -> Arc<dyn IndexClient>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        sheepdog::init_logging(log::LevelFilter::Warn);
        let temp_dir = tempfile::tempdir()?;
        config.data_path = temp_dir.path().join("sheepdog_test");

        let dictionary = Arc::new(Dictionary::from_value(&dictionary())?);
        let index = Arc::new(InMemoryIndexClient::new());
        let authz = Arc::new(StaticAuthorizer::new());
        authz.allow_all(ADMIN);

        let ctx = TransactionContext::open(config, dictionary, wrap(index.clone()), authz.clone())?;
        let ctx = Arc::new(ctx);

        // unique per fixture so that log listings never mix
        let program = format!("PROG{}", fastrand::u32(..));
        ctx.create_program(&program, PROGRAM_PHSID)?;
        ctx.create_project(&program, PROJECT, PROJECT_PHSID, json!({}))?;
        ctx.create_data_release(1, 0)?;

        Ok(Self {
            ctx,
            index,
            authz,
            program,
            project: PROJECT.to_string(),
            _temp_dir: temp_dir,
        })
    }

    pub fn project_id(&self) -> String {
        format!("{}-{}", self.program, self.project)
    }

    /// Options for `role`, acting as the all-powerful test user
    pub fn opts(&self, role: &str) -> TransactionOptions {
        TransactionOptions::new(&self.program, &self.project, role).user(ADMIN)
    }

    pub fn upload(&self, role: &str, docs: Value) -> SubmissionResult<TransactionResult> {
        UploadTransaction::run(&self.ctx, self.opts(role), docs)
    }

    /// Upload that must succeed; returns the created or updated ids in order
    pub fn must_upload(&self, docs: Value) -> Vec<String> {
        let result = self.upload("update", docs).expect("upload should run");
        assert!(result.success(), "upload failed: {}", result.json);
        result.json["entities"]
            .as_array()
            .expect("entities array")
            .iter()
            .map(|e| e["id"].as_str().expect("entity id").to_string())
            .collect()
    }

    pub fn delete(&self, ids: &[&str]) -> SubmissionResult<TransactionResult> {
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        DeletionTransaction::run(&self.ctx, self.opts("delete"), &ids)
    }

    pub fn node(&self, node_id: &str) -> Option<Node> {
        self.ctx.session().get_node(node_id).expect("node lookup")
    }

    pub fn find(&self, label: &str, submitter_id: &str) -> Option<Node> {
        let mut props = Map::new();
        props.insert("project_id".into(), json!(self.project_id()));
        props.insert("submitter_id".into(), json!(submitter_id));
        self.ctx
            .session()
            .lookup_nodes(label, None, &props)
            .expect("node lookup")
            .into_iter()
            .next()
    }

    pub fn project_node(&self) -> Node {
        let session = self.ctx.session();
        self.ctx
            .lookup_project(&session, &self.program, &self.project)
            .expect("project exists")
    }

    /// Overwrite properties directly in the store
    pub fn set_props(&self, node_id: &str, props: Value) -> Result<(), StorageError> {
        let mut session = self.ctx.session();
        let mut node = session
            .get_node(node_id)?
            .ok_or_else(|| StorageError::NodeNotFound(node_id.to_string()))?;
        if let Value::Object(props) = props {
            node.props.extend(props);
        }
        session.merge(node)?;
        session.commit()
    }

    pub fn log(&self, result: &TransactionResult) -> TransactionLog {
        self.ctx
            .logs
            .get(result.transaction_id)
            .expect("log lookup")
            .expect("log exists")
    }

    pub fn case_doc(&self, submitter_id: &str) -> Value {
        json!({
            "type": "case",
            "submitter_id": submitter_id,
            "projects": {"code": self.project}
        })
    }

    pub fn sample_doc(&self, submitter_id: &str, case: &str) -> Value {
        json!({
            "type": "sample",
            "submitter_id": submitter_id,
            "sample_type": "Primary Tumor",
            "cases": {"submitter_id": case}
        })
    }

    pub fn aliquot_doc(&self, submitter_id: &str, sample: &str) -> Value {
        json!({
            "type": "aliquot",
            "submitter_id": submitter_id,
            "samples": {"submitter_id": sample}
        })
    }

    pub fn file_doc(&self, submitter_id: &str, case: &str, md5sum: &str, file_size: u64) -> Value {
        json!({
            "type": "submitted_unaligned_reads",
            "submitter_id": submitter_id,
            "file_name": format!("{}.fastq", submitter_id),
            "file_size": file_size,
            "md5sum": md5sum,
            "data_format": "FASTQ",
            "cases": {"submitter_id": case}
        })
    }
}

/// Error types of the entity at `index` in a transaction response
pub fn error_types(json: &Value, index: usize) -> Vec<String> {
    json["entities"][index]["errors"]
        .as_array()
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e["type"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
