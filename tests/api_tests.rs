// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! API surface tests: authentication, input validation, status views, and
//! the submit contract.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::*;

#[tokio::test]
async fn test_health_is_open() {
    let (router, _) = build_app(test_config(), vec![]);
    let (status, body) = send(&router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&router, "GET", "/health/readiness", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "reachable");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let (router, _) = build_app(test_config(), vec![]);
    let (status, _) = send(&router, "GET", "/v1/workers/status", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_token_is_unauthorized() {
    let (router, _) = build_app(test_config(), vec![]);
    let (status, _) = send(
        &router,
        "GET",
        "/v1/workers/status",
        Some("not-the-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_role_is_bad_request() {
    let (router, _) = build_app(test_config(), vec![]);
    let (status, body) = send(
        &router,
        "GET",
        "/v1/tasks/ready?role=wizard&worker_id=w1",
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn test_empty_worker_id_is_bad_request() {
    let (router, _) = build_app(test_config(), vec![]);
    let (status, _) = send(
        &router,
        "GET",
        "/v1/tasks/ready?role=analyst&worker_id=",
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_user_request_is_bad_request() {
    let (router, _) = build_app(test_config(), vec![]);
    let (status, _) = send(
        &router,
        "POST",
        "/v1/tasks",
        Some(TOKEN),
        Some(json!({ "user_request": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_returns_persisted_graph() {
    let (router, _) = build_app(
        test_config(),
        vec![plan_response(json!([
            {"step_id": "research", "description": "gather data", "role": "researcher"},
            {"step_id": "write", "description": "write the report", "role": "writer",
             "dependencies": ["research"]}
        ]))],
    );

    let body = submit(&router, "Write a market report for Q3").await;
    assert_eq!(body["total_tasks"], 2);
    assert_eq!(body["name"], "write_a_market_report_for_q3");
    assert!(body["workflow_id"].as_str().is_some());

    let statuses: Vec<&str> = body["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["status"].as_str().unwrap())
        .collect();
    assert!(statuses.contains(&"READY"));
    assert!(statuses.contains(&"PENDING"));
}

#[tokio::test]
async fn test_resubmitting_never_reuses_workflow_ids() {
    let plan = plan_response(json!([
        {"step_id": "only", "description": "do it", "role": "analyst"}
    ]));
    let (router, _) = build_app(test_config(), vec![plan.clone(), plan]);

    let first = submit(&router, "same request").await;
    let second = submit(&router, "same request").await;
    assert_ne!(first["workflow_id"], second["workflow_id"]);
}

#[tokio::test]
async fn test_workflow_status_view() {
    let (router, _) = build_app(
        test_config(),
        vec![plan_response(json!([
            {"step_id": "a", "description": "first", "role": "analyst"},
            {"step_id": "b", "description": "second", "role": "analyst",
             "dependencies": ["a"]}
        ]))],
    );
    let body = submit(&router, "two step job").await;
    let workflow_id = body["workflow_id"].as_str().unwrap();

    let (status, view) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/status", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "IN_PROGRESS");
    assert_eq!(view["total_tasks"], 2);
    assert_eq!(view["ready_tasks"], 1);
    assert_eq!(view["pending_tasks"], 1);
}

#[tokio::test]
async fn test_unknown_workflow_is_not_found() {
    let (router, _) = build_app(test_config(), vec![]);
    let (status, body) = send(
        &router,
        "GET",
        "/v1/workflows/no-such-id/status",
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_workers_status_reflects_claims() {
    let (router, _) = build_app(
        test_config(),
        vec![plan_response(json!([
            {"step_id": "only", "description": "solo task", "role": "analyst"}
        ]))],
    );
    submit(&router, "one task").await;

    let (_, before) = send(&router, "GET", "/v1/workers/status", Some(TOKEN), None).await;
    assert_eq!(before["total_active"], 0);

    let task = poll(&router, "analyst", "worker-9").await.unwrap();
    assert_eq!(task["step_id"], "only");

    let (_, after) = send(&router, "GET", "/v1/workers/status", Some(TOKEN), None).await;
    assert_eq!(after["total_active"], 1);
    assert_eq!(after["worker_tasks"]["worker-9"]["step_id"], "only");
}

#[tokio::test]
async fn test_result_endpoint_404_until_finalized() {
    let (router, _) = build_app(
        test_config(),
        vec![
            plan_response(json!([
                {"step_id": "only", "description": "solo", "role": "analyst"}
            ])),
            audit_pass(),
        ],
    );
    let body = submit(&router, "one shot").await;
    let workflow_id = body["workflow_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/result", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    poll(&router, "analyst", "w1").await.unwrap();
    let (status, ack) = report(&router, &workflow_id, "only", "w1", "completed", "answer").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["workflow_status"], "COMPLETED");
    assert_eq!(ack["audit_triggered"], true);

    let (status, artifact) = send(
        &router,
        "GET",
        &format!("/v1/workflows/{}/result", workflow_id),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(artifact["artifact"].as_str().unwrap().contains("answer"));
}
