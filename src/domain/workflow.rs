// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Workflow Domain Model
//!
//! A workflow owns the task graph produced from a single user request. Its
//! status is never stored independently of its tasks: it is derived from the
//! task rows and recomputed inside the same transaction that mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::task::{TaskStatus, TaskStep};

/// Aggregated workflow status, derived from task statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowStatus::Pending => "PENDING",
            WorkflowStatus::InProgress => "IN_PROGRESS",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

impl WorkflowStatus {
    /// The status rule:
    /// COMPLETED iff every task is COMPLETED (an empty graph is COMPLETED);
    /// FAILED iff any task is FAILED; IN_PROGRESS iff any task is IN_PROGRESS
    /// or READY; PENDING otherwise.
    pub fn derive(tasks: &[TaskStep]) -> Self {
        if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
            return WorkflowStatus::Completed;
        }
        if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
            return WorkflowStatus::Failed;
        }
        if tasks
            .iter()
            .any(|t| matches!(t.status, TaskStatus::InProgress | TaskStatus::Ready))
        {
            return WorkflowStatus::InProgress;
        }
        WorkflowStatus::Pending
    }
}

/// One user request, owning an ordered-by-dependency set of tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub name: String,
    pub user_request: String,
    pub project_id: Option<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Audit-triggered reset cycles consumed so far.
    #[serde(default)]
    pub rework_cycles: u32,
    /// Synthesized deliverable, persisted when the workflow finalizes.
    pub artifact: Option<String>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, user_request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: Uuid::new_v4().to_string(),
            name: name.into(),
            user_request: user_request.into(),
            project_id: None,
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
            rework_cycles: 0,
            artifact: None,
        }
    }

    pub fn with_project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Maximum length of a derived workflow name.
const MAX_NAME_LEN: usize = 64;

/// Derive a workflow name from the leading tokens of the user request.
///
/// Non-alphanumerics become underscores, everything is lowercased, and the
/// result is capped at [`MAX_NAME_LEN`] characters. Falls back to "workflow"
/// when the request has no usable characters.
pub fn derive_name(user_request: &str) -> String {
    let mut name = String::with_capacity(MAX_NAME_LEN);
    for token in user_request.split_whitespace().take(6) {
        let sanitized: String = token
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect();
        let sanitized = sanitized.trim_matches('_');
        if sanitized.is_empty() {
            continue;
        }
        if !name.is_empty() {
            name.push('_');
        }
        name.push_str(sanitized);
        if name.len() >= MAX_NAME_LEN {
            break;
        }
    }
    name.truncate(MAX_NAME_LEN);
    let name = name.trim_matches('_').to_string();
    if name.is_empty() {
        "workflow".to_string()
    } else {
        name
    }
}
