// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The audit/rework loop: targeted resets with cascade, the rework-cycle
//! bound, and graceful degradation when the auditor is unavailable.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::*;

fn three_step_plan() -> String {
    plan_response(json!([
        {"step_id": "t1", "description": "research the topic", "role": "analyst"},
        {"step_id": "t2", "description": "analyze findings", "role": "analyst",
         "dependencies": ["t1"]},
        {"step_id": "t3", "description": "write the summary", "role": "writer",
         "dependencies": ["t2"]}
    ]))
}

async fn run_chain(router: &axum::Router, workflow_id: &str) -> serde_json::Value {
    let t1 = poll(router, "analyst", "w1").await.expect("t1 dispatch");
    assert_eq!(t1["step_id"], "t1");
    report(router, workflow_id, "t1", "w1", "completed", "t1 findings").await;

    let t2 = poll(router, "analyst", "w1").await.expect("t2 dispatch");
    assert_eq!(t2["step_id"], "t2");
    report(router, workflow_id, "t2", "w1", "completed", "t2 analysis").await;

    let t3 = poll(router, "writer", "w2").await.expect("t3 dispatch");
    assert_eq!(t3["step_id"], "t3");
    let (status, ack) =
        report(router, workflow_id, "t3", "w2", "completed", "t3 summary").await;
    assert_eq!(status, StatusCode::OK);
    ack
}

/// Full audit rework cycle: a failing audit resets t2 with cascade, t3 is
/// reset with it, t1 stays COMPLETED; after re-completion a second audit
/// passes and the workflow finalizes.
#[tokio::test]
async fn test_audit_rework_cycle() {
    let (router, _) = build_app(
        test_config(),
        vec![three_step_plan(), audit_fail("t2", true), audit_pass()],
    );
    let body = submit(&router, "report with rework").await;
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    // First completion triggers the failing audit; its directives are
    // applied before the report call returns.
    let ack = run_chain(&router, &workflow_id).await;
    assert_eq!(ack["audit_triggered"], true);
    assert_eq!(ack["workflow_status"], "IN_PROGRESS");

    let (_, view) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/status", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(view["completed_tasks"], 1); // t1 survives
    assert_eq!(view["ready_tasks"], 1); // t2, deps already complete
    assert_eq!(view["pending_tasks"], 1); // t3, waiting on t2
    assert_eq!(view["rework_cycles"], 1);

    // The reset task carries the audit feedback for the worker's prompt.
    let t2 = poll(&router, "analyst", "w3").await.expect("t2 redispatch");
    assert_eq!(t2["step_id"], "t2");
    assert_eq!(t2["rework_note"], "insufficient detail");
    report(&router, &workflow_id, "t2", "w3", "completed", "t2 revised").await;

    let t3 = poll(&router, "writer", "w3").await.expect("t3 redispatch");
    assert!(t3["rework_note"].as_str().unwrap().contains("upstream"));
    let (_, ack) =
        report(&router, &workflow_id, "t3", "w3", "completed", "t3 revised").await;
    assert_eq!(ack["workflow_status"], "COMPLETED");

    // Two audit reports, fail then pass, in order.
    let (_, audits) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/audit", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    let audits = audits.as_array().unwrap();
    assert_eq!(audits.len(), 2);
    assert_eq!(audits[0]["is_successful"], false);
    assert_eq!(audits[1]["is_successful"], true);

    // The artifact is built from the latest results.
    let (_, artifact) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/result", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    let text = artifact["artifact"].as_str().unwrap();
    assert!(text.contains("t2 revised"));
    assert!(!text.contains("t2 analysis"));
}

/// The rework budget bounds the loop: with max_rework_cycles = 1, a second
/// failing audit finalizes anyway and the report is preserved.
#[tokio::test]
async fn test_rework_cycles_bounded() {
    let mut config = test_config();
    config.max_rework_cycles = 1;

    let plan = plan_response(json!([
        {"step_id": "only", "description": "solo task", "role": "analyst"}
    ]));
    let (router, _) = build_app(
        config,
        vec![plan, audit_fail("only", true), audit_fail("only", true)],
    );
    let body = submit(&router, "stubborn workflow").await;
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    // Cycle 1: audit fails, task resets.
    poll(&router, "analyst", "w1").await.unwrap();
    let (_, ack) = report(&router, &workflow_id, "only", "w1", "completed", "v1").await;
    assert_eq!(ack["workflow_status"], "IN_PROGRESS");

    // Cycle 2: the budget is spent, so the failing verdict finalizes.
    poll(&router, "analyst", "w1").await.unwrap();
    let (_, ack) = report(&router, &workflow_id, "only", "w1", "completed", "v2").await;
    assert_eq!(ack["workflow_status"], "COMPLETED");

    let (_, audits) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/audit", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    let audits = audits.as_array().unwrap();
    assert_eq!(audits.len(), 2);
    // The final report kept its failing verdict even though we finalized.
    assert_eq!(audits[1]["is_successful"], false);

    let (status, _) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/result", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

/// Auditor unavailable: the workflow finalizes with a pass-with-note report
/// rather than failing because the auditor failed.
#[tokio::test]
async fn test_audit_unavailable_finalizes() {
    let plan = plan_response(json!([
        {"step_id": "only", "description": "solo task", "role": "analyst"}
    ]));
    // No audit response scripted: the gateway errors out.
    let (router, _) = build_app(test_config(), vec![plan]);
    let body = submit(&router, "unaudited workflow").await;
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    poll(&router, "analyst", "w1").await.unwrap();
    let (_, ack) = report(&router, &workflow_id, "only", "w1", "completed", "answer").await;
    assert_eq!(ack["workflow_status"], "COMPLETED");

    let (_, audits) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/audit", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    let audits = audits.as_array().unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0]["is_successful"], true);
    assert!(audits[0]["feedback"]
        .as_str()
        .unwrap()
        .contains("audit unavailable"));
}

/// A failing audit whose directives all name unknown steps degrades to a
/// pass: nothing actionable.
#[tokio::test]
async fn test_audit_with_unknown_directives_finalizes() {
    let plan = plan_response(json!([
        {"step_id": "only", "description": "solo task", "role": "analyst"}
    ]));
    let (router, _) = build_app(test_config(), vec![plan, audit_fail("ghost_step", true)]);
    let body = submit(&router, "phantom directive").await;
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    poll(&router, "analyst", "w1").await.unwrap();
    let (_, ack) = report(&router, &workflow_id, "only", "w1", "completed", "answer").await;
    assert_eq!(ack["workflow_status"], "COMPLETED");
}

/// Admin reset endpoint drives the same rework path as the auditor.
#[tokio::test]
async fn test_admin_reset_endpoint() {
    let (router, _) = build_app(
        test_config(),
        vec![three_step_plan(), audit_pass(), audit_pass()],
    );
    let body = submit(&router, "resettable workflow").await;
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();
    run_chain(&router, &workflow_id).await;

    let (status, reset) = send(
        &router,
        "POST",
        &format!("/v1/workflows/{}/reset", workflow_id),
        Some(TOKEN),
        Some(json!({
            "directives": [
                {"step_id": "t3", "reason": "stakeholder asked for changes"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reset["reset_steps"], json!(["t3"]));

    let t3 = poll(&router, "writer", "w9").await.expect("t3 redispatch");
    assert_eq!(t3["rework_note"], "stakeholder asked for changes");
}
