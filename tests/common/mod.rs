// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Shared test harness: a scripted LLM provider and an in-memory app
//! builder, plus helpers for driving the router the way workers do.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

use conductor_core::domain::config::ConductorConfig;
use conductor_core::domain::llm::{
    GenerationOptions, GenerationResponse, LlmError, LlmProvider,
};
use conductor_core::infrastructure::{InMemoryStore, LlmGateway};
use conductor_core::presentation::{app, AppState};

pub const TOKEN: &str = "test-token";

/// LLM provider that replays a scripted sequence of responses. Once the
/// script runs dry it returns provider errors, which the planner and auditor
/// degrade gracefully (fallback plan / pass-with-note).
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, LlmError> {
        match self.responses.lock().unwrap().pop_front() {
            Some(text) => Ok(GenerationResponse {
                text,
                tokens_used: 1,
            }),
            None => Err(LlmError::Provider("script exhausted".into())),
        }
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

pub fn test_config() -> ConductorConfig {
    ConductorConfig {
        auth_token: TOKEN.to_string(),
        // One attempt per structured call keeps scripted tests deterministic.
        llm: conductor_core::domain::config::LlmConfig {
            max_attempts: 1,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn build_app(config: ConductorConfig, responses: Vec<String>) -> (Router, Arc<AppState>) {
    let config = Arc::new(config);
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(LlmGateway::with_provider(
        Arc::new(ScriptedProvider::new(responses)),
        &config.llm,
    ));
    let state = AppState::build(config, store, gateway).expect("state assembly");
    (app(state.clone()), state)
}

pub async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

/// Submit a request and return the response body (assumes success).
pub async fn submit(router: &Router, user_request: &str) -> Value {
    let (status, body) = send(
        router,
        "POST",
        "/v1/tasks",
        Some(TOKEN),
        Some(json!({ "user_request": user_request })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "submit failed: {}", body);
    body
}

/// Poll as a worker; `None` on 204.
pub async fn poll(router: &Router, role: &str, worker_id: &str) -> Option<Value> {
    let uri = format!("/v1/tasks/ready?role={}&worker_id={}", role, worker_id);
    let (status, body) = send(router, "GET", &uri, Some(TOKEN), None).await;
    match status {
        StatusCode::OK => Some(body),
        StatusCode::NO_CONTENT => None,
        other => panic!("unexpected poll status {}: {}", other, body),
    }
}

/// Report a task outcome; returns (status, body).
pub async fn report(
    router: &Router,
    workflow_id: &str,
    step_id: &str,
    worker_id: &str,
    status: &str,
    final_result: &str,
) -> (StatusCode, Value) {
    send(
        router,
        "POST",
        "/v1/results",
        Some(TOKEN),
        Some(json!({
            "workflow_id": workflow_id,
            "step_id": step_id,
            "worker_id": worker_id,
            "status": status,
            "final_result": final_result,
            "ra_history": [
                {"thought": "assess the task", "action": "execute", "observation": "done"}
            ],
            "execution_time": 0.5,
        })),
    )
    .await
}

/// A plan the scripted provider can hand to the planner.
pub fn plan_response(steps: Value) -> String {
    steps.to_string()
}

/// A passing audit verdict.
pub fn audit_pass() -> String {
    json!({
        "is_successful": true,
        "feedback": "work satisfies the request",
        "rework_directives": [],
        "confidence": 0.92,
    })
    .to_string()
}

/// A failing audit verdict resetting `step_id`.
pub fn audit_fail(step_id: &str, cascade: bool) -> String {
    json!({
        "is_successful": false,
        "feedback": "output does not satisfy the request",
        "rework_directives": [
            {"step_id": step_id, "reason": "insufficient detail", "cascade": cascade}
        ],
        "confidence": 0.85,
    })
    .to_string()
}
