// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store Contract - Transactional Persistence Abstraction
//!
//! Every component coordinates shared state exclusively through this trait.
//! Each operation is atomic with respect to every other operation: the
//! in-memory implementation serializes behind one mutex, the Postgres
//! implementation runs each operation in a single transaction (the claim uses
//! `FOR UPDATE SKIP LOCKED` so concurrent pollers never receive the same
//! task).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::audit::{AuditReport, ReworkDirective};
use crate::domain::lock::{AccessMode, FileLock};
use crate::domain::project::{Project, ProjectStatus};
use crate::domain::result::{TaskResult, WorkerReport};
use crate::domain::task::{Role, TaskStatus, TaskStep};
use crate::domain::workflow::{Workflow, WorkflowStatus};

/// Store failure kinds. Mapped to HTTP statuses only at the API boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Aggregated view of one workflow, computed from current task rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusView {
    pub workflow_id: String,
    pub name: String,
    pub project_id: Option<String>,
    pub status: WorkflowStatus,
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub ready_tasks: usize,
    pub in_progress_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub rework_cycles: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStatusView {
    pub fn compute(workflow: &Workflow, tasks: &[TaskStep]) -> Self {
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        Self {
            workflow_id: workflow.workflow_id.clone(),
            name: workflow.name.clone(),
            project_id: workflow.project_id.clone(),
            status: WorkflowStatus::derive(tasks),
            total_tasks: tasks.len(),
            pending_tasks: count(TaskStatus::Pending),
            ready_tasks: count(TaskStatus::Ready),
            in_progress_tasks: count(TaskStatus::InProgress),
            completed_tasks: count(TaskStatus::Completed),
            failed_tasks: count(TaskStatus::Failed),
            rework_cycles: workflow.rework_cycles,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        }
    }
}

/// Aggregated view of one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectStatusView {
    pub project_id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub workflow_count: usize,
    pub completed_workflows: usize,
    pub in_progress_workflows: usize,
    pub failed_workflows: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What `record_result` did, returned from the same transaction.
#[derive(Debug, Clone)]
pub struct ResultOutcome {
    pub task_status: TaskStatus,
    pub workflow_status: WorkflowStatus,
    /// Steps promoted PENDING -> READY by this completion.
    pub newly_ready: Vec<String>,
    /// True when a reported failure was re-queued instead of failed.
    pub retry_scheduled: bool,
}

/// What a rework reset did.
#[derive(Debug, Clone)]
pub struct ReworkOutcome {
    /// Steps reset to PENDING (directive targets plus cascade).
    pub reset_steps: Vec<String>,
    /// Rework cycles consumed by the workflow after this reset.
    pub rework_cycles: u32,
}

/// Result of a lease acquisition attempt. Conflicts are returned immediately;
/// the store never blocks a caller waiting for a lease.
#[derive(Debug, Clone)]
pub enum LockOutcome {
    Granted(FileLock),
    Conflict {
        path: String,
        held_by: String,
        held_mode: AccessMode,
    },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockOutcome::Granted(_))
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Cheap readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    // ── workflows ────────────────────────────────────────────────────────────

    /// Persist a workflow and its tasks atomically. Rejects with
    /// `InvalidPlan` when the dependency set references unknown step ids or
    /// contains a cycle. Tasks arriving as READY are stored as such (the
    /// planner marks dependency-free tasks READY in the same transaction).
    async fn create_workflow(
        &self,
        workflow: Workflow,
        tasks: Vec<TaskStep>,
    ) -> Result<Workflow, StoreError>;

    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, StoreError>;

    async fn list_tasks_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<TaskStep>, StoreError>;

    async fn get_task(&self, workflow_id: &str, step_id: &str) -> Result<TaskStep, StoreError>;

    async fn workflow_status_view(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowStatusView, StoreError>;

    /// Recompute the workflow status from current task rows and cascade to
    /// the owning project; returns the recomputed status. The mutating
    /// operations below already do this internally; this entry point exists
    /// for callers that changed nothing but need the derivation re-checked.
    async fn cas_update_statuses(&self, workflow_id: &str) -> Result<WorkflowStatus, StoreError>;

    // ── dispatch ─────────────────────────────────────────────────────────────

    /// Atomically claim the oldest READY task for `role`: set IN_PROGRESS,
    /// `claimed_by`, `claimed_at`, and return it. Tie-break: oldest
    /// `updated_at`, then lexicographic `step_id`. Under concurrent callers
    /// each task is returned to at most one of them.
    async fn claim_next_ready(
        &self,
        role: &Role,
        worker_id: &str,
    ) -> Result<Option<TaskStep>, StoreError>;

    /// Revert a claim this worker holds: back to READY, claim cleared,
    /// `updated_at` bumped so the task re-queues behind its peers. `Conflict`
    /// when the worker no longer holds the claim.
    async fn release_claim(
        &self,
        workflow_id: &str,
        step_id: &str,
        worker_id: &str,
    ) -> Result<(), StoreError>;

    // ── results ──────────────────────────────────────────────────────────────

    /// Ingest a worker report in one transaction: verify the reporter still
    /// holds the claim (`Conflict` otherwise), append the result row, update
    /// the task (COMPLETED, or retry-or-FAILED bounded by `max_retries`),
    /// release the worker's leases for this step, promote dependents, and
    /// recompute workflow + project statuses.
    async fn record_result(
        &self,
        report: &WorkerReport,
        max_retries: u32,
    ) -> Result<ResultOutcome, StoreError>;

    /// Latest successful result per step, in dependency order.
    async fn workflow_results(&self, workflow_id: &str) -> Result<Vec<TaskResult>, StoreError>;

    // ── audit & finalize ─────────────────────────────────────────────────────

    async fn record_audit(&self, report: &AuditReport) -> Result<(), StoreError>;

    async fn list_audits(&self, workflow_id: &str) -> Result<Vec<AuditReport>, StoreError>;

    /// Reset the directive targets (plus cascade closure for directives with
    /// `cascade`) to PENDING with the rework note attached, clear claims,
    /// bump retry counts, re-promote dependency-free resets to READY, and
    /// consume one rework cycle. Directives naming unknown steps are ignored.
    async fn reset_tasks_for_rework(
        &self,
        workflow_id: &str,
        directives: &[ReworkDirective],
    ) -> Result<ReworkOutcome, StoreError>;

    /// Mark the workflow finalized: persist the synthesized artifact and
    /// cascade status to the owning project.
    async fn finalize_workflow(
        &self,
        workflow_id: &str,
        artifact: &str,
    ) -> Result<(), StoreError>;

    async fn workflow_artifact(&self, workflow_id: &str) -> Result<Option<String>, StoreError>;

    // ── projects ─────────────────────────────────────────────────────────────

    async fn upsert_project(&self, project_id: &str, name: &str) -> Result<Project, StoreError>;

    async fn project_status_view(
        &self,
        project_id: &str,
    ) -> Result<ProjectStatusView, StoreError>;

    // ── file leases ──────────────────────────────────────────────────────────

    /// Acquire a lease on `path`. Serialized per path; expired rows on the
    /// path are reaped before the compatibility check. Non-blocking: a
    /// conflict is reported in the outcome, never waited out.
    async fn acquire_lock(
        &self,
        path: &str,
        mode: AccessMode,
        holder: &str,
        workflow_id: &str,
        step_id: &str,
        ttl: Duration,
    ) -> Result<LockOutcome, StoreError>;

    /// Release this holder's leases; when `step_id` is given, only the leases
    /// taken for that step. Returns how many were released.
    async fn release_locks(
        &self,
        holder: &str,
        step_id: Option<&str>,
    ) -> Result<usize, StoreError>;

    async fn sweep_expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<FileLock>, StoreError>;

    // ── lease recovery & monitoring ──────────────────────────────────────────

    /// Revert IN_PROGRESS tasks whose claim lease expired: back to READY,
    /// claim cleared, the holder's leases for the step released. Returns the
    /// reverted tasks.
    async fn sweep_expired_claims(
        &self,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> Result<Vec<TaskStep>, StoreError>;

    /// All IN_PROGRESS tasks across workflows, for the worker status view.
    async fn in_progress_tasks(&self) -> Result<Vec<TaskStep>, StoreError>;
}
