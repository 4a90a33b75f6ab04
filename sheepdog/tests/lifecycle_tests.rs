//! Project state machine: review, open, submit and release

#[path = "testutils/mod.rs"]
mod testutils;

use serde_json::json;
use sheepdog::index::IndexClient;
use sheepdog::transactions::release::ReleaseTransaction;
use sheepdog::transactions::review::{OpenTransaction, ReviewTransaction};
use sheepdog::transactions::submission::SubmissionTransaction;
use testutils::test_fixture::TestFixture;

fn populated() -> (TestFixture, Vec<String>) {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = fixture.must_upload(json!([
        fixture.case_doc("case-1"),
        fixture.sample_doc("sample-1", "case-1"),
        fixture.file_doc("reads-1", "case-1", "abc", 3)
    ]));
    (fixture, ids)
}

#[test]
fn test_review_locks_project_until_reopened() {
    let (fixture, _) = populated();

    let review = ReviewTransaction::run(&fixture.ctx, fixture.opts("review")).unwrap();
    assert_eq!(review.code, 200, "{}", review.json);
    assert_eq!(
        review.json["message"],
        "Successfully transitioned project state to 'review'"
    );
    assert_eq!(fixture.project_node().get_str("state"), Some("review"));

    let err = fixture
        .upload("update", json!(fixture.case_doc("case-2")))
        .expect_err("project under review rejects uploads");
    assert!(err.to_string().contains("state 'review'"), "{}", err);

    let err = ReviewTransaction::run(&fixture.ctx, fixture.opts("review"))
        .expect_err("cannot review twice");
    assert_eq!(err.status_code(), 400);

    let open = OpenTransaction::run(&fixture.ctx, fixture.opts("open")).unwrap();
    assert_eq!(open.code, 200);
    assert_eq!(fixture.project_node().get_str("state"), Some("open"));
    assert!(fixture
        .upload("update", json!(fixture.case_doc("case-2")))
        .unwrap()
        .success());
}

#[test]
fn test_dry_run_review_keeps_state() {
    let (fixture, _) = populated();
    let review =
        ReviewTransaction::run(&fixture.ctx, fixture.opts("review").dry_run(true)).unwrap();
    assert!(review.success());
    assert_eq!(fixture.project_node().get_str("state"), Some("open"));
}

#[test]
fn test_state_changes_require_release_role() {
    let (fixture, _) = populated();
    fixture
        .authz
        .grant("bob", &fixture.project_id(), &["create", "update", "delete"]);

    let review = ReviewTransaction::run(&fixture.ctx, fixture.opts("review").user("bob")).unwrap();
    assert_eq!(review.code, 400);
    assert!(review.json["transactional_errors"][0]
        .as_str()
        .unwrap()
        .starts_with("You do not have review permission"));
    assert_eq!(fixture.project_node().get_str("state"), Some("open"));
}

#[test]
fn test_submit_requires_review() {
    let (fixture, _) = populated();
    let err = SubmissionTransaction::run(&fixture.ctx, fixture.opts("submit"))
        .expect_err("open project cannot be submitted");
    assert!(err.to_string().contains("<review>"), "{}", err);
}

#[test]
fn test_submit_then_release() {
    let (fixture, ids) = populated();
    let (case_id, sample_id, file_id) = (&ids[0], &ids[1], &ids[2]);

    ReviewTransaction::run(&fixture.ctx, fixture.opts("review")).unwrap();
    let submit = SubmissionTransaction::run(&fixture.ctx, fixture.opts("submit")).unwrap();
    assert_eq!(submit.code, 200, "{}", submit.json);
    assert_eq!(submit.json["submitted_entity_count"], 2);
    assert_eq!(submit.json["message"], "Successfully submitted 2 entities.");

    assert_eq!(fixture.node(sample_id).unwrap().state(), Some("submitted"));
    assert_eq!(fixture.node(file_id).unwrap().state(), Some("submitted"));
    // administrative entities are not part of submission
    assert_eq!(fixture.node(case_id).unwrap().state(), Some("validated"));
    let project = fixture.project_node();
    assert_eq!(project.get_str("state"), Some("submitted"));
    assert!(project.get_bool("releasable"));

    let versions = fixture.ctx.store.versions_of(sample_id).unwrap();
    assert_eq!(versions.len(), 1);

    let release = ReleaseTransaction::run(&fixture.ctx, fixture.opts("release")).unwrap();
    assert_eq!(release.code, 200, "{}", release.json);
    assert_eq!(release.json["message"], "Successfully released project");
    assert_eq!(fixture.node(sample_id).unwrap().state(), Some("released"));
    assert_eq!(fixture.node(file_id).unwrap().state(), Some("released"));
    assert!(fixture.project_node().get_bool("released"));

    let record = fixture.index.get(file_id).unwrap().expect("file record");
    assert_eq!(record.version.as_deref(), Some("1"));
    assert_eq!(record.metadata.get("release_number"), Some(&json!("1.0")));

    let again = ReleaseTransaction::run(&fixture.ctx, fixture.opts("release")).unwrap();
    assert_eq!(again.code, 400);
    assert_eq!(
        again.json["transactional_errors"][0],
        "Project is already released."
    );
    assert_eq!(
        fixture.index.get(file_id).unwrap().unwrap().version.as_deref(),
        Some("1")
    );
}

#[test]
fn test_release_requires_prior_submission() {
    let (fixture, _) = populated();
    let release = ReleaseTransaction::run(&fixture.ctx, fixture.opts("release")).unwrap();
    assert_eq!(release.code, 400);
    assert!(release.json["transactional_errors"][0]
        .as_str()
        .unwrap()
        .starts_with("Project is not releasable"));
}

#[test]
fn test_dry_run_release_changes_nothing() {
    let (fixture, ids) = populated();
    ReviewTransaction::run(&fixture.ctx, fixture.opts("review")).unwrap();
    SubmissionTransaction::run(&fixture.ctx, fixture.opts("submit")).unwrap();

    let release =
        ReleaseTransaction::run(&fixture.ctx, fixture.opts("release").dry_run(true)).unwrap();
    assert!(release.success(), "{}", release.json);
    assert_eq!(
        release.json["message"],
        "Dry run successful. 2 project files would have been released."
    );
    assert_eq!(fixture.node(&ids[2]).unwrap().state(), Some("submitted"));
    assert!(fixture.index.get(&ids[2]).unwrap().unwrap().version.is_none());
    assert!(!fixture.project_node().get_bool("released"));
}

mod dry_runs {
    use super::*;
    use sheepdog::transactions::close::{close_transaction, commit_dry_run};
    use sheepdog::transactions::deletion::DeletionTransaction;
    use sheepdog::transactions::upload::UploadTransaction;

    #[test]
    fn test_commit_dry_run_replays_upload() {
        let fixture = TestFixture::new().expect("Failed to create fixture");
        let dry_run = UploadTransaction::run(
            &fixture.ctx,
            fixture.opts("create").dry_run(true),
            json!([fixture.case_doc("case-1")]),
        )
        .unwrap();
        assert!(dry_run.success());
        assert!(fixture.find("case", "case-1").is_none());

        let committed =
            commit_dry_run(&fixture.ctx, fixture.opts("commit"), dry_run.transaction_id).unwrap();
        assert_eq!(committed.code, 201, "{}", committed.json);
        assert_ne!(committed.transaction_id, dry_run.transaction_id);
        assert!(fixture.find("case", "case-1").is_some());
        assert_eq!(
            fixture.log(&dry_run).committed_by,
            Some(committed.transaction_id)
        );

        let err = commit_dry_run(&fixture.ctx, fixture.opts("commit"), dry_run.transaction_id)
            .expect_err("second commit");
        assert!(err.to_string().contains("committed already"), "{}", err);
    }

    #[test]
    fn test_closed_dry_run_cannot_be_committed() {
        let fixture = TestFixture::new().expect("Failed to create fixture");
        let dry_run = UploadTransaction::run(
            &fixture.ctx,
            fixture.opts("create").dry_run(true),
            json!(fixture.case_doc("case-1")),
        )
        .unwrap();

        let closed = close_transaction(
            &fixture.ctx,
            &fixture.program,
            &fixture.project,
            dry_run.transaction_id,
        )
        .unwrap();
        assert_eq!(closed["message"], "Closed transaction.");
        assert!(fixture.log(&dry_run).closed);

        let err = commit_dry_run(&fixture.ctx, fixture.opts("commit"), dry_run.transaction_id)
            .expect_err("closed log");
        assert_eq!(err.to_string(), "Unable to commit closed transaction log.");
        assert!(close_transaction(
            &fixture.ctx,
            &fixture.program,
            &fixture.project,
            dry_run.transaction_id
        )
        .is_err());
    }

    #[test]
    fn test_only_dry_runs_can_be_closed_or_committed() {
        let fixture = TestFixture::new().expect("Failed to create fixture");
        let real = fixture
            .upload("create", json!(fixture.case_doc("case-1")))
            .unwrap();

        let err = close_transaction(&fixture.ctx, &fixture.program, &fixture.project, real.transaction_id)
            .expect_err("not a dry run");
        assert!(err.to_string().contains("not a dry run"));

        let err = commit_dry_run(&fixture.ctx, fixture.opts("commit"), real.transaction_id)
            .expect_err("not a dry run");
        assert!(err.to_string().contains("not a dry_run"));
    }

    #[test]
    fn test_failed_dry_run_cannot_be_committed() {
        let fixture = TestFixture::new().expect("Failed to create fixture");
        let dry_run = UploadTransaction::run(
            &fixture.ctx,
            fixture.opts("create").dry_run(true),
            json!(fixture.sample_doc("sample-1", "missing")),
        )
        .unwrap();
        assert_eq!(dry_run.code, 400);

        let err = commit_dry_run(&fixture.ctx, fixture.opts("commit"), dry_run.transaction_id)
            .expect_err("failed log");
        assert!(err.to_string().starts_with("Unable to commit transaction log in state"));
    }

    #[test]
    fn test_commit_dry_run_deletion() {
        let fixture = TestFixture::new().expect("Failed to create fixture");
        let ids = fixture.must_upload(json!(fixture.case_doc("case-1")));
        let dry_run = DeletionTransaction::run(
            &fixture.ctx,
            fixture.opts("delete").dry_run(true),
            &ids,
        )
        .unwrap();
        assert!(fixture.node(&ids[0]).is_some());

        let committed =
            commit_dry_run(&fixture.ctx, fixture.opts("commit"), dry_run.transaction_id).unwrap();
        assert_eq!(committed.code, 200, "{}", committed.json);
        assert!(fixture.node(&ids[0]).is_none());
        assert_eq!(
            fixture.log(&committed).canonical_json,
            fixture.log(&dry_run).canonical_json
        );
    }

    #[test]
    fn test_commit_dry_run_field_deletion_keeps_node() {
        let fixture = TestFixture::new().expect("Failed to create fixture");
        let mut doc = fixture.case_doc("case-1");
        doc["disease_type"] = json!("Glioma");
        let ids = fixture.must_upload(doc);

        let dry_run = DeletionTransaction::run_fields(
            &fixture.ctx,
            fixture.opts("delete").dry_run(true),
            &ids,
            &["disease_type".to_string()],
        )
        .unwrap();
        assert!(dry_run.success(), "{}", dry_run.json);
        assert_eq!(
            fixture.log(&dry_run).canonical_json,
            vec![json!({"id": ids[0], "fields": ["disease_type"]})]
        );

        let committed =
            commit_dry_run(&fixture.ctx, fixture.opts("commit"), dry_run.transaction_id).unwrap();
        assert_eq!(committed.code, 200, "{}", committed.json);
        let case = fixture.node(&ids[0]).expect("node kept");
        assert_eq!(case.get("disease_type"), None);
        assert_eq!(case.submitter_id(), Some("case-1"));
    }

    #[test]
    fn test_commit_unknown_log_is_not_found() {
        let fixture = TestFixture::new().expect("Failed to create fixture");
        let real = fixture
            .upload("create", json!(fixture.case_doc("case-1")))
            .unwrap();
        let other = TestFixture::new().expect("Failed to create fixture");
        let err = commit_dry_run(&other.ctx, other.opts("commit"), real.transaction_id)
            .expect_err("log lives in another store");
        assert_eq!(err.status_code(), 404);
    }
}
