// Copyright (c) 2024-2025 Sheepdog Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! File identity reconciliation with the content-index service
//!
//! A file node and its index record share one id. On create the id comes
//! from, in order of precedence, the document, an index record with the same
//! (md5, size), or a fresh UUID. On update the record's urls are merged, or
//! with `create_replaceable` new content replaces the record in place or, for
//! released files, becomes a new version node and record.

use super::entity::{display_value, UploadEntity};
use crate::dictionary::EntitySchema;
use crate::error::SubmissionResult;
use crate::index::{IndexAlias, IndexDocument};
use crate::storage::{Edge, Node, StorageResult};
use crate::transactions::base::{IndexOp, TransactionBase};
use crate::transactions::entity::{keys, EntityAction, EntityErrorType};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// File states in which the node's content may still change
const UPDATABLE_FILE_STATES: &[&str] = &["registered", "uploading", "uploaded", "validating", "error"];

const PRIMARY_URL_TYPE: &str = "cleversafe";

#[derive(Debug, Clone, Default)]
pub(crate) struct FileUpload {
    pub urls: Vec<String>,
    pub by_uuid: Option<IndexDocument>,
    pub by_hash: Option<IndexDocument>,
    /// Whether `by_hash` was looked up at all
    pub hash_checked: bool,
    /// did for a record registered by this entity
    pub file_index: Option<String>,
    /// Node superseded by a new version and the edges it had
    pub replaced: Option<(String, Vec<Edge>)>,
    /// Existing record receives the new content in place
    pub content_patch: bool,
}

impl FileUpload {
    /// Take the comma-separated `urls` field out of the document
    pub fn from_doc(doc: &mut Map<String, Value>) -> Self {
        let urls = match doc.remove("urls") {
            Some(Value::String(raw)) => raw
                .trim()
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        Self {
            urls,
            ..Self::default()
        }
    }

    pub fn exists(&self) -> bool {
        self.by_uuid.is_some() || self.by_hash.is_some()
    }
}

fn file_hashes(props: &Map<String, Value>) -> BTreeMap<String, String> {
    let mut hashes = BTreeMap::new();
    if let Some(md5) = props.get("md5sum").and_then(Value::as_str) {
        if !md5.is_empty() {
            hashes.insert("md5".to_string(), md5.to_string());
        }
    }
    hashes
}

fn file_size(props: &Map<String, Value>) -> Option<u64> {
    props.get("file_size").and_then(Value::as_u64).filter(|s| *s > 0)
}

fn url_metadata() -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("type".to_string(), json!(PRIMARY_URL_TYPE));
    meta.insert("state".to_string(), json!("registered"));
    meta
}

impl UploadEntity {
    fn populate_files_from_index(&mut self, tx: &TransactionBase) -> SubmissionResult<()> {
        let hashes = file_hashes(&self.doc);
        let size = file_size(&self.doc);
        let index = &tx.ctx.index;

        let hash_checked = tx.ctx.config.enforce_file_hash_size_uniqueness && !hashes.is_empty();
        let by_hash = if hash_checked {
            index.get_with_params(&hashes, size)?
        } else {
            None
        };
        let by_uuid = match self.base.entity_id.as_deref() {
            Some(id) => index.get(id)?,
            None => None,
        };
        if let Some(file) = self.file.as_mut() {
            file.by_hash = by_hash;
            file.by_uuid = by_uuid;
            file.hash_checked = hash_checked;
        }
        Ok(())
    }

    /// Pick the node and record id for a new file node
    pub(super) fn resolve_file_create(
        &mut self,
        tx: &TransactionBase,
        sk: &[Map<String, Value>],
    ) -> SubmissionResult<()> {
        self.populate_files_from_index(tx)?;
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        let exists = file.exists();
        let hash_did = file.by_hash.as_ref().map(|d| d.did.clone());

        if !exists {
            let id = self
                .base
                .entity_id
                .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
                .clone();
            if let Some(file) = self.file.as_mut() {
                file.file_index = Some(id);
            }
        } else if self.base.entity_id.is_some() {
            self.check_index_matches_id(tx, sk)?;
        } else if self.check_index_matches_node(tx, sk)? {
            log::debug!("adopting indexed id {:?} for new file node", hash_did);
            self.base.entity_id = hash_did;
        }
        Ok(())
    }

    /// The supplied id and the (hash, size) lookup must find the same record
    fn check_index_matches_id(
        &mut self,
        tx: &TransactionBase,
        sk: &[Map<String, Value>],
    ) -> SubmissionResult<bool> {
        let Some(file) = self.file.clone() else {
            return Ok(true);
        };
        let mut valid = true;
        match (&file.by_hash, &file.by_uuid) {
            (Some(by_hash), Some(by_uuid)) => {
                if by_hash.did != by_uuid.did {
                    self.base.record_error(
                        format!(
                            "Provided id for indexed file {} does not match the id for the file \
                             discovered in the index by hash/size (id: {}). Updating a previous \
                             index with new file is currently NOT SUPPORTED.",
                            by_uuid.did, by_hash.did
                        ),
                        keys(["id"]),
                        EntityErrorType::NotUnique,
                    );
                    valid = false;
                }
            }
            (by_hash, by_uuid) => {
                let mut message = format!(
                    "Could not find exact file match in index for id: {} AND `hashes - size`: `{} - {}`. ",
                    self.base.entity_id.as_deref().unwrap_or_default(),
                    json!(file_hashes(&self.doc)),
                    display_value(self.doc.get("file_size"))
                );
                if by_hash.is_some() {
                    message.push_str("A file was found matching `hash / size` but NOT id.");
                } else if by_uuid.is_some() {
                    message.push_str("A file was found matching id but NOT `hash / size`.");
                }
                self.base
                    .record_error(message, vec![], EntityErrorType::InvalidValue);
                valid = false;
            }
        }
        if valid {
            valid = self.check_index_matches_node(tx, sk)?;
        }
        Ok(valid)
    }

    /// A node already in the graph must have the id of its index record
    fn check_index_matches_node(
        &mut self,
        tx: &TransactionBase,
        sk: &[Map<String, Value>],
    ) -> StorageResult<bool> {
        let Some(file) = self.file.as_ref() else {
            return Ok(true);
        };
        if !file.exists() {
            return Ok(true);
        }
        let uuid_did = file.by_uuid.as_ref().map(|d| d.did.clone());
        let hash_did = file.by_hash.as_ref().map(|d| d.did.clone());
        let hash_checked = file.hash_checked;

        let nodes = self.lookup(tx, self.base.entity_id.as_deref(), sk)?;
        if nodes.len() != 1 {
            return Ok(true);
        }
        let node_id = nodes[0].node_id.as_str();
        let mismatch = uuid_did.as_deref() != Some(node_id)
            || (hash_checked && hash_did.as_deref() != Some(node_id));
        if mismatch {
            self.base.record_error(
                format!(
                    "Graph ID and index file ID found in index service do not match, which is \
                     currently not permitted. Graph ID: {}. Index ID: {}. Index ID found using \
                     hash/size: {}.",
                    node_id,
                    uuid_did.as_deref().unwrap_or("None"),
                    hash_did.as_deref().unwrap_or("None")
                ),
                vec![],
                EntityErrorType::NotUnique,
            );
        }
        Ok(!mismatch)
    }

    fn content_changed(&self, node: &Node) -> bool {
        let md5_changed = self
            .doc
            .get("md5sum")
            .map_or(false, |md5| Some(md5) != node.get("md5sum"));
        let size_changed = self
            .doc
            .get("file_size")
            .map_or(false, |size| Some(size) != node.get("file_size"));
        md5_changed || size_changed
    }

    /// File-specific checks once an existing node has been found
    pub(super) fn reconcile_file_update(
        &mut self,
        tx: &TransactionBase,
        schema: &EntitySchema,
        sk: &[Map<String, Value>],
        node: Node,
    ) -> SubmissionResult<Node> {
        if schema.has_property("file_state") {
            if let Some(file_state) = node.file_state() {
                if !UPDATABLE_FILE_STATES.contains(&file_state) {
                    self.base.record_error(
                        format!(
                            "This file is already in file_state '{}' and cannot be updated. The \
                             raw data exists in the file storage and modifying the Entity now is \
                             unsafe and may cause problems for any processes or users consuming \
                             this data.",
                            file_state
                        ),
                        keys(["file_state"]),
                        EntityErrorType::InvalidPermissions,
                    );
                }
            }
        }

        self.populate_files_from_index(tx)?;

        if tx.ctx.config.create_replaceable && self.content_changed(&node) {
            return self.replace_file_content(tx, schema, node);
        }
        self.check_index_matches_node(tx, sk)?;
        Ok(node)
    }

    fn replace_file_content(
        &mut self,
        tx: &TransactionBase,
        schema: &EntitySchema,
        node: Node,
    ) -> SubmissionResult<Node> {
        let Some(file) = self.file.as_ref() else {
            return Ok(node);
        };
        if let Some(by_hash) = &file.by_hash {
            if by_hash.did != node.node_id {
                self.base.record_error(
                    format!(
                        "Graph ID and index file ID found in index service do not match, which is \
                         currently not permitted. Graph ID: {}. Index ID: {}. Index ID found \
                         using hash/size: {}.",
                        node.node_id,
                        file.by_uuid.as_ref().map_or("None", |d| d.did.as_str()),
                        by_hash.did
                    ),
                    vec![],
                    EntityErrorType::NotUnique,
                );
                return Ok(node);
            }
        }

        if node.state() == Some("submitted") {
            self.base.record_error(
                "This file is in state 'submitted' and its content cannot be replaced until it is released.",
                keys(["state"]),
                EntityErrorType::InvalidPermissions,
            );
            return Ok(node);
        }

        let released = node.state() == Some("released")
            || file.by_uuid.as_ref().map_or(false, |r| r.version.is_some());
        if !released {
            if let Some(file) = self.file.as_mut() {
                file.content_patch = file.by_uuid.is_some();
            }
            return Ok(node);
        }

        let new_id = uuid::Uuid::new_v4().to_string();
        let mut replacement = Node::new(&new_id, &node.label);
        replacement.acl = node.acl.clone();
        replacement.props = node.props.clone();
        replacement.props.remove("created_datetime");
        for (key, default) in schema.system_property_defaults() {
            replacement.set(key.clone(), default.clone());
            self.doc.insert(key, default);
        }

        let mut edges = tx.session.edges_out(&node.node_id)?;
        edges.extend(tx.session.edges_in(&node.node_id)?);
        log::info!(
            "file {} has new content after release, replacing with version {}",
            node.node_id,
            new_id
        );
        if let Some(file) = self.file.as_mut() {
            file.replaced = Some((node.node_id.clone(), edges));
            file.file_index = Some(new_id.clone());
        }
        self.base.action = Some(EntityAction::Version);
        self.base.entity_id = Some(new_id);
        Ok(replacement)
    }

    fn index_document(&self, tx: &TransactionBase, node: &Node, did: &str) -> SubmissionResult<IndexDocument> {
        let ctx = &tx.ctx;
        let project = tx.project_node()?;
        let acl = if ctx.is_project_public(&project) {
            vec![if ctx.config.is_gdc { "open" } else { "*" }.to_string()]
        } else {
            ctx.phsids(&tx.session, &project)?
        };

        let mut doc = IndexDocument::new(did);
        doc.hashes = file_hashes(&node.props);
        doc.size = file_size(&node.props);
        doc.file_name = node.get_str("file_name").map(str::to_string);
        doc.acl = acl;
        doc.urls = match self.file.as_ref() {
            Some(file) if !file.urls.is_empty() => file.urls.clone(),
            _ => vec![ctx
                .config
                .generated_file_url(did, doc.file_name.as_deref().unwrap_or_default())],
        };
        doc.urls_metadata = doc
            .urls
            .iter()
            .map(|url| (url.clone(), url_metadata()))
            .collect();
        Ok(doc)
    }

    /// Stage the index write matching the node's action
    pub(super) fn stage_file_index(&mut self, tx: &mut TransactionBase, node: &Node) -> SubmissionResult<()> {
        let Some(file) = self.file.clone() else {
            return Ok(());
        };
        match self.base.action {
            Some(EntityAction::Create) => {
                if file.exists() {
                    return Ok(());
                }
                if tx.ctx.config.require_file_index_exists {
                    self.base.record_error(
                        format!(
                            "Existing index is required for file creation. File id {} has no index record.",
                            node.node_id
                        ),
                        keys(["id"]),
                        EntityErrorType::NotFound,
                    );
                    return Ok(());
                }
                let did = file.file_index.unwrap_or_else(|| node.node_id.clone());
                let doc = self.index_document(tx, node, &did)?;
                let alias = IndexAlias {
                    record: format!(
                        "{}/{}",
                        tx.project_id(),
                        node.submitter_id().unwrap_or_default()
                    ),
                    hashes: doc.hashes.clone(),
                    size: doc.size,
                    release: "private".to_string(),
                };
                tx.index_ops.push(IndexOp::Create {
                    doc,
                    alias: Some(alias),
                });
            }
            Some(EntityAction::Update) => {
                let Some(mut record) = file.by_uuid.clone().or(file.by_hash.clone()) else {
                    return Ok(());
                };
                if file.content_patch {
                    record.hashes = file_hashes(&node.props);
                    record.size = file_size(&node.props);
                    record.file_name = node.get_str("file_name").map(str::to_string);
                    if !file.urls.is_empty() {
                        record.urls = file.urls.clone();
                    }
                    record.urls_metadata = record
                        .urls
                        .iter()
                        .map(|url| (url.clone(), url_metadata()))
                        .collect();
                    tx.index_ops.push(IndexOp::Patch(record));
                } else if record.merge_urls(&file.urls) {
                    for url in &file.urls {
                        record
                            .urls_metadata
                            .entry(url.clone())
                            .or_insert_with(url_metadata);
                    }
                    tx.index_ops.push(IndexOp::Patch(record));
                }
            }
            Some(EntityAction::Version) => {
                let doc = self.index_document(tx, node, &node.node_id)?;
                match file.by_uuid {
                    Some(previous) => tx.index_ops.push(IndexOp::AddVersion {
                        family_did: previous.did,
                        doc,
                    }),
                    None => tx.index_ops.push(IndexOp::Create { doc, alias: None }),
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Swap the superseded node for its replacement, keeping its edges
    pub(super) fn stage_version(&mut self, tx: &mut TransactionBase, node: &Node) -> StorageResult<()> {
        let Some((old_id, edges)) = self.file.as_ref().and_then(|f| f.replaced.clone()) else {
            return tx.session.add(node.clone());
        };
        if let Some(old) = tx.session.get_node(&old_id)? {
            tx.session.record_version(&old);
        }
        tx.session.delete(&old_id)?;
        tx.session.add(node.clone())?;
        for edge in edges {
            let src = if edge.src_id == old_id { node.node_id.clone() } else { edge.src_id };
            let dst = if edge.dst_id == old_id { node.node_id.clone() } else { edge.dst_id };
            tx.session.add_edge(Edge::new(src, edge.label, dst))?;
        }
        Ok(())
    }
}
