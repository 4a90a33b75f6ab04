//! Deletion of entities and of optional fields

#[path = "testutils/mod.rs"]
mod testutils;

use serde_json::json;
use sheepdog::index::IndexClient;
use sheepdog::transactions::deletion::DeletionTransaction;
use sheepdog::txn::TransactionLogState;
use testutils::test_fixture::{error_types, TestFixture};

/// case <- sample <- aliquot; returns their ids in that order
fn biospecimen_chain(fixture: &TestFixture) -> Vec<String> {
    fixture.must_upload(json!([
        fixture.case_doc("case-1"),
        fixture.sample_doc("sample-1", "case-1"),
        fixture.aliquot_doc("aliquot-1", "sample-1")
    ]))
}

#[test]
fn test_delete_validated_entity() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = biospecimen_chain(&fixture);

    let result = fixture.delete(&[&ids[2]]).expect("deletion should run");

    assert_eq!(result.code, 200, "{}", result.json);
    assert_eq!(result.json["message"], "Successfully deleted 1 entities");
    assert_eq!(result.json["deleted_entity_count"], 1);
    assert!(fixture.node(&ids[2]).is_none());
    assert!(fixture.node(&ids[1]).is_some());

    let log = fixture.log(&result);
    assert_eq!(log.role, "delete");
    assert_eq!(log.entities[0].action, "delete");
    assert!(log.entities[0].new_props.is_none());
}

#[test]
fn test_dependents_block_deletion_transitively() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = biospecimen_chain(&fixture);

    let result = fixture.delete(&[&ids[0]]).expect("deletion should run");

    assert_eq!(result.code, 400);
    assert_eq!(result.json["deleted_entity_count"], 0);
    assert_eq!(error_types(&result.json, 0), vec!["INVALID_LINK".to_string()]);
    let dependents = result.json["entities"][0]["errors"][0]["dependents"]
        .as_array()
        .expect("dependents listed");
    assert_eq!(dependents.len(), 2);
    assert!(dependents.contains(&json!({"id": ids[1], "type": "sample"})));
    assert!(dependents.contains(&json!({"id": ids[2], "type": "aliquot"})));

    let dependent_ids = result.json["dependent_ids"].as_str().unwrap();
    assert!(dependent_ids.contains(&ids[1]) && dependent_ids.contains(&ids[2]));
    for id in &ids {
        assert!(fixture.node(id).is_some());
    }
}

#[test]
fn test_delete_with_dependents_in_same_transaction() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = biospecimen_chain(&fixture);

    let result = fixture
        .delete(&[&ids[0], &ids[1], &ids[2]])
        .expect("deletion should run");

    assert_eq!(result.code, 200, "{}", result.json);
    assert_eq!(result.json["deleted_entity_count"], 3);
    for id in &ids {
        assert!(fixture.node(id).is_none());
    }
}

/// case <- sample-1, sample-2 <- aliquot linked to both samples
fn shared_aliquot(fixture: &TestFixture) -> Vec<String> {
    let mut aliquot = fixture.aliquot_doc("aliquot-1", "sample-1");
    aliquot["samples"] = json!([{"submitter_id": "sample-1"}, {"submitter_id": "sample-2"}]);
    fixture.must_upload(json!([
        fixture.case_doc("case-1"),
        fixture.sample_doc("sample-1", "case-1"),
        fixture.sample_doc("sample-2", "case-1"),
        aliquot
    ]))
}

#[test]
fn test_shared_dependent_reported_for_each_entity() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = shared_aliquot(&fixture);

    let result = fixture
        .delete(&[&ids[1], &ids[2]])
        .expect("deletion should run");

    assert_eq!(result.code, 400, "{}", result.json);
    let expected = json!([{"id": ids[3], "type": "aliquot"}]);
    for i in 0..2 {
        assert_eq!(error_types(&result.json, i), vec!["INVALID_LINK".to_string()]);
        assert_eq!(result.json["entities"][i]["errors"][0]["dependents"], expected);
    }
    for id in &ids {
        assert!(fixture.node(id).is_some());
    }
}

#[test]
fn test_remaining_link_keeps_dependent_valid() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = shared_aliquot(&fixture);

    let result = fixture.delete(&[&ids[1]]).expect("deletion should run");

    assert_eq!(result.code, 200, "{}", result.json);
    assert!(fixture.node(&ids[1]).is_none());
    assert!(fixture.node(&ids[3]).is_some());
}

#[test]
fn test_submitted_entity_must_be_redacted() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = biospecimen_chain(&fixture);
    fixture
        .set_props(&ids[2], json!({"state": "submitted"}))
        .unwrap();

    let result = fixture.delete(&[&ids[2]]).expect("deletion should run");

    assert_eq!(result.code, 400);
    assert_eq!(
        error_types(&result.json, 0),
        vec!["INVALID_PERMISSIONS".to_string()]
    );
    assert!(result.json["entities"][0]["errors"][0]["message"]
        .as_str()
        .unwrap()
        .contains("must be redacted"));
    assert!(fixture.node(&ids[2]).is_some());
}

#[test]
fn test_unknown_id_is_not_found() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = biospecimen_chain(&fixture);

    let result = fixture
        .delete(&[&ids[2], "00000000-0000-0000-0000-000000000000"])
        .expect("deletion should run");

    assert_eq!(result.code, 400);
    assert_eq!(error_types(&result.json, 1), vec!["NOT_FOUND".to_string()]);
    assert!(fixture.node(&ids[2]).is_some());
    assert_eq!(fixture.log(&result).state, TransactionLogState::Failed);
}

#[test]
fn test_uploaded_file_cannot_be_deleted() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    fixture.must_upload(json!(fixture.case_doc("case-1")));
    let ids = fixture.must_upload(fixture.file_doc("reads-1", "case-1", "abc", 3));
    fixture
        .set_props(&ids[0], json!({"file_state": "uploaded"}))
        .unwrap();

    let result = fixture.delete(&[&ids[0]]).expect("deletion should run");

    assert_eq!(result.code, 400);
    assert!(result.json["entities"][0]["errors"][0]["message"]
        .as_str()
        .unwrap()
        .contains("Data Transfer Tool"));
}

#[test]
fn test_deleted_file_record_is_flagged() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    fixture.must_upload(json!(fixture.case_doc("case-1")));
    let ids = fixture.must_upload(fixture.file_doc("reads-1", "case-1", "abc", 3));

    let result = fixture.delete(&[&ids[0]]).expect("deletion should run");

    assert_eq!(result.code, 200, "{}", result.json);
    let record = fixture.index.get(&ids[0]).unwrap().expect("record kept");
    assert_eq!(record.metadata.get("deleted"), Some(&json!("True")));
}

#[test]
fn test_dry_run_deletion_keeps_nodes() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = biospecimen_chain(&fixture);

    let result = DeletionTransaction::run(
        &fixture.ctx,
        fixture.opts("delete").dry_run(true),
        &[ids[2].clone()],
    )
    .expect("deletion should run");

    assert_eq!(result.code, 200);
    assert_eq!(
        result.json["message"],
        "Dry run successful. Would have deleted 1 entities"
    );
    assert!(fixture.node(&ids[2]).is_some());
}

#[test]
fn test_delete_permission_is_required() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = biospecimen_chain(&fixture);
    fixture.authz.grant("bob", &fixture.project_id(), &["read", "update"]);

    let result = DeletionTransaction::run(
        &fixture.ctx,
        fixture.opts("delete").user("bob"),
        &[ids[2].clone()],
    )
    .expect("deletion should run");

    assert_eq!(result.code, 400);
    assert!(error_types(&result.json, 0).contains(&"INVALID_PERMISSIONS".to_string()));
}

#[test]
fn test_delete_optional_field() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let mut doc = fixture.case_doc("case-1");
    doc["disease_type"] = json!("Glioma");
    let ids = fixture.must_upload(doc);

    let result = DeletionTransaction::run_fields(
        &fixture.ctx,
        fixture.opts("delete"),
        &[ids[0].clone()],
        &["disease_type".to_string()],
    )
    .expect("field deletion should run");

    assert_eq!(result.code, 200, "{}", result.json);
    let case = fixture.node(&ids[0]).expect("node kept");
    assert_eq!(case.get("disease_type"), None);
    assert_eq!(case.submitter_id(), Some("case-1"));
}

#[test]
fn test_delete_protected_or_unknown_field() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = fixture.must_upload(json!(fixture.case_doc("case-1")));

    let result = DeletionTransaction::run_fields(
        &fixture.ctx,
        fixture.opts("delete"),
        &[ids[0].clone()],
        &["submitter_id".to_string(), "shoe_size".to_string()],
    )
    .expect("field deletion should run");

    assert_eq!(result.code, 400);
    assert_eq!(
        error_types(&result.json, 0),
        vec!["INVALID_PERMISSIONS".to_string(), "INVALID_PROPERTY".to_string()]
    );
    assert_eq!(fixture.node(&ids[0]).unwrap().submitter_id(), Some("case-1"));
}
