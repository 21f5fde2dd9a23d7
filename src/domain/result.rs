// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Worker results: the reasoning-acting trace a worker produces while
//! executing a task, plus the report envelope it posts back to the server.
//! Result rows are append-only; the latest successful row per step wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reasoning-acting iteration recorded by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaIteration {
    pub thought: String,
    pub action: String,
    pub observation: Option<String>,
}

/// Persisted execution trace for one completed (or failed) task attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub workflow_id: String,
    pub task_step_id: String,
    pub iterations: Vec<RaIteration>,
    pub final_result: String,
    pub source_worker: String,
    /// Wall-clock execution duration reported by the worker, in seconds.
    pub execution_time: f64,
    pub created_at: DateTime<Utc>,
}

/// Outcome a worker reports for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Completed,
    Failed,
}

/// The report a worker posts to `POST /v1/results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub workflow_id: String,
    pub step_id: String,
    pub worker_id: String,
    pub status: ReportedStatus,
    pub final_result: String,
    #[serde(default)]
    pub ra_history: Vec<RaIteration>,
    #[serde(default)]
    pub execution_time: f64,
}

impl WorkerReport {
    pub fn into_result(self, created_at: DateTime<Utc>) -> TaskResult {
        TaskResult {
            workflow_id: self.workflow_id,
            task_step_id: self.step_id,
            iterations: self.ra_history,
            final_result: self.final_result,
            source_worker: self.worker_id,
            execution_time: self.execution_time,
            created_at,
        }
    }
}
