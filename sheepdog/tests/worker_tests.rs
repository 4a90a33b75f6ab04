//! Scheduling transactions on the background worker

#[path = "testutils/mod.rs"]
mod testutils;

use serde_json::{json, Value};
use sheepdog::transactions::review::ReviewTransaction;
use sheepdog::transactions::upload::UploadTransaction;
use sheepdog::txn::{TransactionId, TransactionLog, TransactionLogState};
use sheepdog::worker::TransactionWorker;
use sheepdog::SubmissionConfig;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use testutils::test_fixture::TestFixture;

fn transaction_id(response: &Value) -> TransactionId {
    serde_json::from_value(response["transaction_id"].clone()).expect("transaction id")
}

/// Poll until the log leaves `pending`
fn wait_for_log(fixture: &TestFixture, id: TransactionId) -> TransactionLog {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let log = fixture.ctx.logs.get(id).unwrap().expect("claimed log");
        if log.state.is_terminal() {
            return log;
        }
        assert!(Instant::now() < deadline, "transaction {} never finished", id);
        thread::sleep(Duration::from_millis(20));
    }
}

fn sync_fixture() -> TestFixture {
    let mut config = SubmissionConfig::testing();
    config.use_async_workers = false;
    TestFixture::with_config(config).expect("Failed to create fixture")
}

#[test]
fn test_async_upload_returns_before_completion() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let worker = TransactionWorker::new(fixture.ctx.clone()).unwrap();

    let response = worker
        .upload(fixture.opts("create"), json!(fixture.case_doc("case-1")))
        .expect("scheduled");
    assert_eq!(response["code"], 200);
    assert_eq!(response["message"], "Transaction submitted.");

    let log = wait_for_log(&fixture, transaction_id(&response));
    assert_eq!(log.state, TransactionLogState::Succeeded);
    assert_eq!(log.entities.len(), 1);
    assert!(fixture.find("case", "case-1").is_some());

    worker.shutdown(Duration::from_secs(5));
}

#[test]
fn test_async_delete_uses_claimed_log() {
    let fixture = TestFixture::new().expect("Failed to create fixture");
    let ids = fixture.must_upload(json!(fixture.case_doc("case-1")));
    let worker = TransactionWorker::new(fixture.ctx.clone()).unwrap();

    let response = worker.delete(fixture.opts("delete"), ids.clone()).unwrap();
    let log = wait_for_log(&fixture, transaction_id(&response));

    assert_eq!(log.role, "delete");
    assert_eq!(log.state, TransactionLogState::Succeeded);
    assert!(fixture.node(&ids[0]).is_none());
    worker.shutdown(Duration::from_secs(5));
}

#[test]
fn test_sync_mode_returns_transaction_response() {
    let fixture = sync_fixture();
    let worker = TransactionWorker::new(fixture.ctx.clone()).unwrap();

    let response = worker
        .bulk_upload(
            fixture.opts("create"),
            json!([{"name": "cases", "doc_format": "json", "doc": [fixture.case_doc("case-1")]}]),
        )
        .unwrap();

    assert_eq!(response["code"], 201, "{}", response);
    assert_eq!(response["created_entity_count"], 1);
    assert!(fixture.find("case", "case-1").is_some());
}

#[test]
fn test_full_queue_refuses_new_transactions() {
    let mut config = SubmissionConfig::testing();
    config.async_max_queue_len = 1;
    let fixture = TestFixture::with_config(config).expect("Failed to create fixture");
    let worker = TransactionWorker::new(fixture.ctx.clone()).unwrap();
    assert_eq!(worker.available_slots(), 1);

    let (release, blocked) = mpsc::channel::<()>();
    let docs = json!(fixture.case_doc("case-1"));
    let first = worker
        .submit(fixture.opts("create"), move |ctx, opts| {
            blocked.recv().ok();
            UploadTransaction::run(ctx, opts, docs)
        })
        .expect("first transaction scheduled");

    let err = worker
        .upload(fixture.opts("create"), json!(fixture.case_doc("case-2")))
        .expect_err("queue is full");
    assert_eq!(err.status_code(), 503);
    assert!(err.to_string().contains("too many asynchronous tasks"));

    release.send(()).unwrap();
    let log = wait_for_log(&fixture, transaction_id(&first));
    assert_eq!(log.state, TransactionLogState::Succeeded);
    assert!(fixture.find("case", "case-2").is_none());
    worker.shutdown(Duration::from_secs(5));
}

#[test]
fn test_rejected_job_closes_claimed_log() {
    let fixture = sync_fixture();
    ReviewTransaction::run(&fixture.ctx, fixture.opts("review")).unwrap();
    let worker = TransactionWorker::new(fixture.ctx.clone()).unwrap();

    let err = worker
        .upload(fixture.opts("create"), json!(fixture.case_doc("case-1")))
        .expect_err("project under review");
    assert_eq!(err.status_code(), 400);

    let logs = fixture
        .ctx
        .logs
        .list(&fixture.program, &fixture.project)
        .unwrap();
    let upload_log = logs
        .iter()
        .find(|log| log.role == "create")
        .expect("claimed upload log");
    assert_eq!(upload_log.state, TransactionLogState::Failed);
    assert!(upload_log.timestamp.is_some());
}
