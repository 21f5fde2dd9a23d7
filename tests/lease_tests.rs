// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Lease semantics: file lock compatibility across workers, claim expiry
//! recovery, and retry exhaustion.

mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde_json::json;

use conductor_core::domain::lock::AccessMode;
use conductor_core::domain::store::Store as _;
use conductor_core::domain::task::TaskStatus;

use common::*;

/// Two readers on the same path execute concurrently.
#[tokio::test]
async fn test_shared_reads_dispatch_together() {
    let (router, _) = build_app(
        test_config(),
        vec![plan_response(json!([
            {"step_id": "t1", "description": "summarize", "role": "analyst",
             "file_dependencies": {"data.csv": "read", "out1.md": "write"}},
            {"step_id": "t2", "description": "chart", "role": "analyst",
             "file_dependencies": {"data.csv": "read", "out2.md": "write"}}
        ]))],
    );
    submit(&router, "two readers").await;

    let first = poll(&router, "analyst", "w1").await;
    let second = poll(&router, "analyst", "w2").await;
    assert!(first.is_some());
    assert!(second.is_some(), "read leases on the same path must coexist");
}

/// A writer excludes a reader: the second task stays queued until the first
/// reports, and the two never hold incompatible leases simultaneously.
#[tokio::test]
async fn test_write_excludes_read_until_release() {
    let (router, _) = build_app(
        test_config(),
        vec![plan_response(json!([
            {"step_id": "t1", "description": "rewrite the doc", "role": "analyst",
             "file_dependencies": {"shared.md": "write"}},
            {"step_id": "t2", "description": "quote the doc", "role": "analyst",
             "file_dependencies": {"shared.md": "read"}}
        ]))],
    );
    let body = submit(&router, "writer then reader").await;
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    let writer_task = poll(&router, "analyst", "w1").await.expect("writer dispatch");
    assert_eq!(writer_task["step_id"], "t1");

    // The reader's lease conflicts, so the poll comes back empty.
    assert!(poll(&router, "analyst", "w2").await.is_none());

    report(&router, &workflow_id, "t1", "w1", "completed", "rewritten").await;

    // Leases were released with the report; the reader dispatches now.
    let reader_task = poll(&router, "analyst", "w2").await.expect("reader dispatch");
    assert_eq!(reader_task["step_id"], "t2");
}

/// The conflict answer is order-insensitive: whoever holds first wins.
#[tokio::test]
async fn test_lock_conflict_order_insensitive() {
    let (_, state) = build_app(test_config(), vec![]);
    let ttl = Duration::seconds(60);

    // read held -> write conflicts
    let granted = state
        .store
        .acquire_lock("doc.md", AccessMode::Read, "w1", "wf", "s1", ttl)
        .await
        .unwrap();
    assert!(granted.is_granted());
    let outcome = state
        .store
        .acquire_lock("doc.md", AccessMode::Write, "w2", "wf", "s2", ttl)
        .await
        .unwrap();
    assert!(!outcome.is_granted());
    state.store.release_locks("w1", None).await.unwrap();

    // write held -> read conflicts
    let granted = state
        .store
        .acquire_lock("doc.md", AccessMode::Write, "w2", "wf", "s2", ttl)
        .await
        .unwrap();
    assert!(granted.is_granted());
    let outcome = state
        .store
        .acquire_lock("doc.md", AccessMode::Read, "w1", "wf", "s1", ttl)
        .await
        .unwrap();
    assert!(!outcome.is_granted());

    // After release the same request succeeds.
    state.store.release_locks("w2", None).await.unwrap();
    let granted = state
        .store
        .acquire_lock("doc.md", AccessMode::Read, "w1", "wf", "s1", ttl)
        .await
        .unwrap();
    assert!(granted.is_granted());
}

/// Claim expiry: a vanished worker's task reverts to READY, its leases are
/// released, and another worker picks it up. The stale worker's late report
/// is refused.
#[tokio::test]
async fn test_claim_expiry_recovers_task_and_leases() {
    let (router, state) = build_app(
        test_config(),
        vec![plan_response(json!([
            {"step_id": "only", "description": "guarded task", "role": "analyst",
             "file_dependencies": {"target.md": "exclusive"}}
        ]))],
    );
    let body = submit(&router, "abandoned task").await;
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    poll(&router, "analyst", "ghost-worker").await.expect("initial dispatch");

    // Nothing to reclaim while the lease is fresh.
    let reclaimed = state
        .store
        .sweep_expired_claims(Utc::now(), state.config.claim_ttl())
        .await
        .unwrap();
    assert!(reclaimed.is_empty());

    // Past the TTL the sweep reverts the task and frees its leases.
    let later = Utc::now() + state.config.claim_ttl() + Duration::seconds(1);
    let reclaimed = state
        .store
        .sweep_expired_claims(later, state.config.claim_ttl())
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].status, TaskStatus::Ready);

    let retry = poll(&router, "analyst", "live-worker").await;
    assert!(retry.is_some(), "reclaimed task must be claimable again");

    // The ghost's report no longer matches the claim.
    let (status, ack) =
        report(&router, &workflow_id, "only", "ghost-worker", "completed", "late").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(ack["accepted"], false);

    // The live worker's report lands normally.
    let (status, ack) =
        report(&router, &workflow_id, "only", "live-worker", "completed", "fresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["accepted"], true);
}

/// Retry exhaustion fails the task, the workflow, and the project.
#[tokio::test]
async fn test_retry_exhaustion_cascades_to_project() {
    let mut config = test_config();
    config.max_retries = 1;

    let plan = plan_response(json!([
        {"step_id": "only", "description": "doomed task", "role": "analyst"}
    ]));
    let (router, _) = build_app(config, vec![plan]);

    let (status, body) = send(
        &router,
        "POST",
        "/v1/tasks",
        Some(TOKEN),
        Some(json!({
            "user_request": "doomed request",
            "project_id": "proj-doom",
            "metadata": {"project_name": "Doom Project"},
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    // First failure: retried.
    poll(&router, "analyst", "w1").await.unwrap();
    let (_, ack) = report(&router, &workflow_id, "only", "w1", "failed", "boom").await;
    assert_eq!(ack["workflow_status"], "IN_PROGRESS");

    // Second failure: retries exhausted.
    poll(&router, "analyst", "w1").await.unwrap();
    let (_, ack) = report(&router, &workflow_id, "only", "w1", "failed", "boom again").await;
    assert_eq!(ack["workflow_status"], "FAILED");
    assert_eq!(ack["audit_triggered"], false);

    let (_, view) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/status", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(view["status"], "FAILED");
    assert_eq!(view["failed_tasks"], 1);

    let (_, project) = send(
        &router,
        "GET",
        "/v1/projects/proj-doom/status",
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(project["status"], "FAILED");
    assert_eq!(project["failed_workflows"], 1);
}

/// Leases released by an expiry sweep free the path for other holders.
#[tokio::test]
async fn test_expired_lock_sweep_frees_path() {
    let (_, state) = build_app(test_config(), vec![]);

    let granted = state
        .store
        .acquire_lock("tmp.md", AccessMode::Write, "w1", "wf", "s1", Duration::seconds(1))
        .await
        .unwrap();
    assert!(granted.is_granted());

    let swept = state
        .store
        .sweep_expired_locks(Utc::now() + Duration::seconds(2))
        .await
        .unwrap();
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].path, "tmp.md");

    let granted = state
        .store
        .acquire_lock("tmp.md", AccessMode::Write, "w2", "wf", "s2", Duration::seconds(60))
        .await
        .unwrap();
    assert!(granted.is_granted());
}
