// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Postgres store.
//!
//! Each trait operation runs in a single transaction. The claim is one
//! `UPDATE ... WHERE id = (SELECT ... FOR UPDATE SKIP LOCKED) RETURNING`
//! statement, so concurrent pollers on the same role never receive the same
//! task. Lease operations serialize per path with a transaction-scoped
//! advisory lock on the path key.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::{HashMap, HashSet};

use crate::domain::audit::{AuditReport, ReworkDirective};
use crate::domain::lock::{AccessMode, FileLock};
use crate::domain::project::{Project, ProjectStatus};
use crate::domain::result::{ReportedStatus, TaskResult, WorkerReport};
use crate::domain::store::{
    LockOutcome, ProjectStatusView, ResultOutcome, ReworkOutcome, Store, StoreError,
    WorkflowStatusView,
};
use crate::domain::task::{self, Role, TaskStatus, TaskStep};
use crate::domain::workflow::{Workflow, WorkflowStatus};

use super::super::db::Database;

const TASK_COLUMNS: &str = "workflow_id, step_id, description, role, dependencies, \
     file_dependencies, status, claimed_by, claimed_at, retry_count, rework_note, \
     fast_mode, created_at, updated_at";

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn load_tasks_tx(
        tx: &mut Transaction<'static, Postgres>,
        workflow_id: &str,
        for_update: bool,
    ) -> Result<Vec<TaskStep>, StoreError> {
        let suffix = if for_update { " FOR UPDATE" } else { "" };
        let sql = format!(
            "SELECT {} FROM tasks WHERE workflow_id = $1 ORDER BY id ASC{}",
            TASK_COLUMNS, suffix
        );
        let rows = sqlx::query(&sql)
            .bind(workflow_id)
            .fetch_all(&mut **tx)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Promote PENDING tasks whose dependencies are all COMPLETED.
    /// Caller must already hold row locks on the workflow's tasks.
    async fn promote_tx(
        tx: &mut Transaction<'static, Postgres>,
        tasks: &[TaskStep],
    ) -> Result<Vec<String>, StoreError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let completed: HashSet<&str> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.step_id.as_str())
            .collect();

        let mut promoted = Vec::new();
        for t in tasks {
            if t.status == TaskStatus::Pending && t.deps_satisfied(&completed) {
                promoted.push(t.step_id.clone());
            }
        }
        for step_id in &promoted {
            sqlx::query(
                "UPDATE tasks SET status = 'READY', updated_at = NOW() \
                 WHERE workflow_id = $1 AND step_id = $2",
            )
            .bind(&tasks[0].workflow_id)
            .bind(step_id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(promoted)
    }

    /// Recompute workflow status from task rows and cascade to the project.
    async fn refresh_statuses_tx(
        tx: &mut Transaction<'static, Postgres>,
        workflow_id: &str,
    ) -> Result<WorkflowStatus, StoreError> {
        let rows = sqlx::query("SELECT status FROM tasks WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_all(&mut **tx)
            .await?;
        let statuses: Vec<TaskStatus> = rows
            .iter()
            .map(|r| parse_task_status(r.try_get::<String, _>("status")?.as_str()))
            .collect::<Result<_, _>>()?;

        // Reuse the domain rule through a synthetic task list.
        let status = derive_workflow_status(&statuses);

        let row = sqlx::query(
            "UPDATE workflows SET status = $2, \
             updated_at = CASE WHEN status <> $2 THEN NOW() ELSE updated_at END \
             WHERE workflow_id = $1 RETURNING project_id",
        )
        .bind(workflow_id)
        .bind(status.to_string())
        .fetch_one(&mut **tx)
        .await?;

        if let Some(project_id) = row.try_get::<Option<String>, _>("project_id")? {
            let rows = sqlx::query("SELECT status FROM workflows WHERE project_id = $1")
                .bind(&project_id)
                .fetch_all(&mut **tx)
                .await?;
            let statuses: Vec<WorkflowStatus> = rows
                .iter()
                .map(|r| parse_workflow_status(r.try_get::<String, _>("status")?.as_str()))
                .collect::<Result<_, _>>()?;
            let derived = ProjectStatus::derive(&statuses);
            sqlx::query(
                "UPDATE projects SET status = $2, \
                 updated_at = CASE WHEN status <> $2 THEN NOW() ELSE updated_at END \
                 WHERE project_id = $1",
            )
            .bind(&project_id)
            .bind(derived.to_string())
            .execute(&mut **tx)
            .await?;
        }
        Ok(status)
    }

    async fn release_locks_tx(
        tx: &mut Transaction<'static, Postgres>,
        holder: &str,
        step_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let result = match step_id {
            Some(step) => {
                sqlx::query(
                    "DELETE FROM file_locks WHERE holder_worker_id = $1 AND task_step_id = $2",
                )
                .bind(holder)
                .bind(step)
                .execute(&mut **tx)
                .await?
            }
            None => {
                sqlx::query("DELETE FROM file_locks WHERE holder_worker_id = $1")
                    .bind(holder)
                    .execute(&mut **tx)
                    .await?
            }
        };
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_workflow(
        &self,
        mut workflow: Workflow,
        tasks: Vec<TaskStep>,
    ) -> Result<Workflow, StoreError> {
        task::validate_graph(&tasks).map_err(|e| StoreError::InvalidPlan(e.to_string()))?;
        workflow.status = WorkflowStatus::derive(&tasks);

        let mut tx = self.begin().await?;

        let metadata = serde_json::to_value(&workflow.metadata)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        sqlx::query(
            "INSERT INTO workflows \
             (workflow_id, name, user_request, project_id, status, metadata, rework_cycles, \
              artifact, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&workflow.workflow_id)
        .bind(&workflow.name)
        .bind(&workflow.user_request)
        .bind(&workflow.project_id)
        .bind(workflow.status.to_string())
        .bind(&metadata)
        .bind(workflow.rework_cycles as i32)
        .bind(&workflow.artifact)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("workflow already exists: {}", workflow.workflow_id))
            }
            _ => StoreError::from(e),
        })?;

        for t in &tasks {
            let dependencies = serde_json::to_value(&t.dependencies)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let file_dependencies = serde_json::to_value(&t.file_dependencies)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            sqlx::query(
                "INSERT INTO tasks \
                 (workflow_id, step_id, description, role, dependencies, file_dependencies, \
                  status, claimed_by, claimed_at, retry_count, rework_note, fast_mode, \
                  created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            )
            .bind(&workflow.workflow_id)
            .bind(&t.step_id)
            .bind(&t.description)
            .bind(t.role.as_str())
            .bind(&dependencies)
            .bind(&file_dependencies)
            .bind(t.status.to_string())
            .bind(&t.claimed_by)
            .bind(t.claimed_at)
            .bind(t.retry_count as i32)
            .bind(&t.rework_note)
            .bind(t.fast_mode)
            .bind(t.created_at)
            .bind(t.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(workflow)
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, StoreError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))?;
        workflow_from_row(&row)
    }

    async fn list_tasks_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<TaskStep>, StoreError> {
        self.get_workflow(workflow_id).await?;
        let sql = format!(
            "SELECT {} FROM tasks WHERE workflow_id = $1 ORDER BY id ASC",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn get_task(&self, workflow_id: &str, step_id: &str) -> Result<TaskStep, StoreError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE workflow_id = $1 AND step_id = $2",
            TASK_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(workflow_id)
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("task {}/{}", workflow_id, step_id)))?;
        task_from_row(&row)
    }

    async fn workflow_status_view(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowStatusView, StoreError> {
        let workflow = self.get_workflow(workflow_id).await?;
        let tasks = self.list_tasks_by_workflow(workflow_id).await?;
        Ok(WorkflowStatusView::compute(&workflow, &tasks))
    }

    async fn cas_update_statuses(&self, workflow_id: &str) -> Result<WorkflowStatus, StoreError> {
        let mut tx = self.begin().await?;
        self.get_workflow(workflow_id).await?;
        let status = Self::refresh_statuses_tx(&mut tx, workflow_id).await?;
        tx.commit().await?;
        Ok(status)
    }

    async fn claim_next_ready(
        &self,
        role: &Role,
        worker_id: &str,
    ) -> Result<Option<TaskStep>, StoreError> {
        let mut tx = self.begin().await?;
        let sql = format!(
            "UPDATE tasks SET status = 'IN_PROGRESS', claimed_by = $2, \
             claimed_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM tasks \
                 WHERE status = 'READY' AND role = $1 \
                 ORDER BY updated_at ASC, step_id ASC \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             RETURNING {}",
            TASK_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(role.as_str())
            .bind(worker_id)
            .fetch_optional(&mut *tx)
            .await?;

        let claimed = match row {
            Some(row) => {
                let t = task_from_row(&row)?;
                Self::refresh_statuses_tx(&mut tx, &t.workflow_id).await?;
                Some(t)
            }
            None => None,
        };
        tx.commit().await?;
        Ok(claimed)
    }

    async fn release_claim(
        &self,
        workflow_id: &str,
        step_id: &str,
        worker_id: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "UPDATE tasks SET status = 'READY', claimed_by = NULL, claimed_at = NULL, \
             updated_at = NOW() \
             WHERE workflow_id = $1 AND step_id = $2 AND status = 'IN_PROGRESS' \
               AND claimed_by = $3",
        )
        .bind(workflow_id)
        .bind(step_id)
        .bind(worker_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "claim on {}/{} not held by {}",
                workflow_id, step_id, worker_id
            )));
        }
        Self::refresh_statuses_tx(&mut tx, workflow_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_result(
        &self,
        report: &WorkerReport,
        max_retries: u32,
    ) -> Result<ResultOutcome, StoreError> {
        let mut tx = self.begin().await?;

        let sql = format!(
            "SELECT {} FROM tasks WHERE workflow_id = $1 AND step_id = $2 FOR UPDATE",
            TASK_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&report.workflow_id)
            .bind(&report.step_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("task {}/{}", report.workflow_id, report.step_id))
            })?;
        let current = task_from_row(&row)?;

        if current.status != TaskStatus::InProgress
            || current.claimed_by.as_deref() != Some(report.worker_id.as_str())
        {
            return Err(StoreError::Conflict(format!(
                "report for {}/{} from {} does not match the active claim",
                report.workflow_id, report.step_id, report.worker_id
            )));
        }

        let (new_status, retry_scheduled) = match report.status {
            ReportedStatus::Completed => (TaskStatus::Completed, false),
            ReportedStatus::Failed if current.retry_count < max_retries => {
                (TaskStatus::Ready, true)
            }
            ReportedStatus::Failed => (TaskStatus::Failed, false),
        };

        let iterations = serde_json::to_value(&report.ra_history)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        sqlx::query(
            "INSERT INTO task_results \
             (workflow_id, task_step_id, iterations, final_result, source_worker, \
              execution_time, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW())",
        )
        .bind(&report.workflow_id)
        .bind(&report.step_id)
        .bind(&iterations)
        .bind(&report.final_result)
        .bind(&report.worker_id)
        .bind(report.execution_time)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE tasks SET status = $3, claimed_by = NULL, claimed_at = NULL, \
             retry_count = retry_count + $4, updated_at = NOW() \
             WHERE workflow_id = $1 AND step_id = $2",
        )
        .bind(&report.workflow_id)
        .bind(&report.step_id)
        .bind(new_status.to_string())
        .bind(if retry_scheduled { 1i32 } else { 0i32 })
        .execute(&mut *tx)
        .await?;

        Self::release_locks_tx(&mut tx, &report.worker_id, Some(&report.step_id)).await?;

        let newly_ready = if new_status == TaskStatus::Completed {
            let tasks = Self::load_tasks_tx(&mut tx, &report.workflow_id, true).await?;
            Self::promote_tx(&mut tx, &tasks).await?
        } else {
            Vec::new()
        };

        let workflow_status = Self::refresh_statuses_tx(&mut tx, &report.workflow_id).await?;
        tx.commit().await?;

        Ok(ResultOutcome {
            task_status: new_status,
            workflow_status,
            newly_ready,
            retry_scheduled,
        })
    }

    async fn workflow_results(&self, workflow_id: &str) -> Result<Vec<TaskResult>, StoreError> {
        let tasks = self.list_tasks_by_workflow(workflow_id).await?;
        let order = task::validate_graph(&tasks)
            .unwrap_or_else(|_| tasks.iter().map(|t| t.step_id.clone()).collect());

        let rows = sqlx::query(
            "SELECT DISTINCT ON (task_step_id) \
             workflow_id, task_step_id, iterations, final_result, source_worker, \
             execution_time, created_at \
             FROM task_results WHERE workflow_id = $1 \
             ORDER BY task_step_id, id DESC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_step: HashMap<String, TaskResult> = HashMap::new();
        for row in &rows {
            let result = result_from_row(row)?;
            by_step.insert(result.task_step_id.clone(), result);
        }

        Ok(order
            .into_iter()
            .filter_map(|step_id| by_step.remove(&step_id))
            .collect())
    }

    async fn record_audit(&self, report: &AuditReport) -> Result<(), StoreError> {
        self.get_workflow(&report.workflow_id).await?;
        let directives = serde_json::to_value(&report.rework_directives)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        sqlx::query(
            "INSERT INTO audit_reports \
             (workflow_id, is_successful, feedback, rework_directives, confidence, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&report.workflow_id)
        .bind(report.is_successful)
        .bind(&report.feedback)
        .bind(&directives)
        .bind(report.confidence)
        .bind(report.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audits(&self, workflow_id: &str) -> Result<Vec<AuditReport>, StoreError> {
        self.get_workflow(workflow_id).await?;
        let rows = sqlx::query(
            "SELECT workflow_id, is_successful, feedback, rework_directives, confidence, \
             created_at FROM audit_reports WHERE workflow_id = $1 ORDER BY id ASC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn reset_tasks_for_rework(
        &self,
        workflow_id: &str,
        directives: &[ReworkDirective],
    ) -> Result<ReworkOutcome, StoreError> {
        let mut tx = self.begin().await?;

        let workflow_row = sqlx::query(
            "SELECT rework_cycles FROM workflows WHERE workflow_id = $1 FOR UPDATE",
        )
        .bind(workflow_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))?;
        let current_cycles = workflow_row.try_get::<i32, _>("rework_cycles")? as u32;

        let tasks = Self::load_tasks_tx(&mut tx, workflow_id, true).await?;
        let known: HashSet<&str> = tasks.iter().map(|t| t.step_id.as_str()).collect();

        let mut reasons: HashMap<String, String> = HashMap::new();
        let mut cascade_roots: HashSet<String> = HashSet::new();
        for d in directives {
            if !known.contains(d.step_id.as_str()) {
                continue;
            }
            reasons.insert(d.step_id.clone(), d.reason.clone());
            if d.cascade {
                cascade_roots.insert(d.step_id.clone());
            }
        }

        if reasons.is_empty() {
            tx.commit().await?;
            return Ok(ReworkOutcome {
                reset_steps: Vec::new(),
                rework_cycles: current_cycles,
            });
        }

        let cascaded = task::transitive_dependents(&tasks, &cascade_roots);
        let mut reset_steps: HashSet<String> = reasons.keys().cloned().collect();
        reset_steps.extend(cascaded.iter().cloned());

        for t in tasks.iter().filter(|t| reset_steps.contains(&t.step_id)) {
            if let Some(holder) = &t.claimed_by {
                Self::release_locks_tx(&mut tx, holder, Some(&t.step_id)).await?;
            }
            let note = reasons
                .get(&t.step_id)
                .cloned()
                .unwrap_or_else(|| "reset after rework of an upstream dependency".to_string());
            sqlx::query(
                "UPDATE tasks SET status = 'PENDING', claimed_by = NULL, claimed_at = NULL, \
                 retry_count = retry_count + 1, rework_note = $3, updated_at = NOW() \
                 WHERE workflow_id = $1 AND step_id = $2",
            )
            .bind(workflow_id)
            .bind(&t.step_id)
            .bind(&note)
            .execute(&mut *tx)
            .await?;
        }

        let tasks = Self::load_tasks_tx(&mut tx, workflow_id, false).await?;
        Self::promote_tx(&mut tx, &tasks).await?;

        sqlx::query(
            "UPDATE workflows SET rework_cycles = rework_cycles + 1, artifact = NULL, \
             updated_at = NOW() WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .execute(&mut *tx)
        .await?;

        Self::refresh_statuses_tx(&mut tx, workflow_id).await?;
        tx.commit().await?;

        let mut reset_steps: Vec<String> = reset_steps.into_iter().collect();
        reset_steps.sort_unstable();
        Ok(ReworkOutcome {
            reset_steps,
            rework_cycles: current_cycles + 1,
        })
    }

    async fn finalize_workflow(
        &self,
        workflow_id: &str,
        artifact: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            "UPDATE workflows SET artifact = $2, status = 'COMPLETED', updated_at = NOW() \
             WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .bind(artifact)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("workflow {}", workflow_id)));
        }
        Self::refresh_statuses_tx(&mut tx, workflow_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn workflow_artifact(&self, workflow_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT artifact FROM workflows WHERE workflow_id = $1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))?;
        Ok(row.try_get("artifact")?)
    }

    async fn upsert_project(&self, project_id: &str, name: &str) -> Result<Project, StoreError> {
        let row = sqlx::query(
            "INSERT INTO projects (project_id, name, status, created_at, updated_at) \
             VALUES ($1, $2, 'PENDING', NOW(), NOW()) \
             ON CONFLICT (project_id) DO UPDATE SET project_id = EXCLUDED.project_id \
             RETURNING project_id, name, status, created_at, updated_at",
        )
        .bind(project_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        project_from_row(&row)
    }

    async fn project_status_view(
        &self,
        project_id: &str,
    ) -> Result<ProjectStatusView, StoreError> {
        let row = sqlx::query(
            "SELECT project_id, name, status, created_at, updated_at \
             FROM projects WHERE project_id = $1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("project {}", project_id)))?;
        let project = project_from_row(&row)?;

        let rows = sqlx::query("SELECT status FROM workflows WHERE project_id = $1")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        let statuses: Vec<WorkflowStatus> = rows
            .iter()
            .map(|r| parse_workflow_status(r.try_get::<String, _>("status")?.as_str()))
            .collect::<Result<_, _>>()?;
        let count = |status: WorkflowStatus| statuses.iter().filter(|s| **s == status).count();

        Ok(ProjectStatusView {
            project_id: project.project_id,
            name: project.name,
            status: ProjectStatus::derive(&statuses),
            workflow_count: statuses.len(),
            completed_workflows: count(WorkflowStatus::Completed),
            in_progress_workflows: count(WorkflowStatus::InProgress),
            failed_workflows: count(WorkflowStatus::Failed),
            created_at: project.created_at,
            updated_at: project.updated_at,
        })
    }

    async fn acquire_lock(
        &self,
        path: &str,
        mode: AccessMode,
        holder: &str,
        workflow_id: &str,
        step_id: &str,
        ttl: Duration,
    ) -> Result<LockOutcome, StoreError> {
        let mut tx = self.begin().await?;

        // Serialize all lease work on this path for the transaction's
        // lifetime, including first-acquisition races where no row exists yet
        // to lock.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM file_locks WHERE path = $1 AND expires_at <= NOW()")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        let expires_at = Utc::now() + ttl;
        let refreshed = sqlx::query(
            "UPDATE file_locks SET expires_at = $5 \
             WHERE path = $1 AND holder_worker_id = $2 AND task_step_id = $3 AND mode = $4 \
             RETURNING path, holder_worker_id, workflow_id, task_step_id, mode, acquired_at, \
                       expires_at",
        )
        .bind(path)
        .bind(holder)
        .bind(step_id)
        .bind(mode.to_string())
        .bind(expires_at)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = refreshed {
            let lock = lock_from_row(&row)?;
            tx.commit().await?;
            return Ok(LockOutcome::Granted(lock));
        }

        let holders = sqlx::query(
            "SELECT holder_worker_id, task_step_id, mode FROM file_locks WHERE path = $1",
        )
        .bind(path)
        .fetch_all(&mut *tx)
        .await?;
        for row in &holders {
            let held_by: String = row.try_get("holder_worker_id")?;
            let held_step: String = row.try_get("task_step_id")?;
            let held_mode = parse_mode(row.try_get::<String, _>("mode")?.as_str())?;
            if held_by == holder && held_step == step_id {
                continue;
            }
            if !mode.compatible_with(held_mode) {
                tx.commit().await?;
                return Ok(LockOutcome::Conflict {
                    path: path.to_string(),
                    held_by,
                    held_mode,
                });
            }
        }

        let row = sqlx::query(
            "INSERT INTO file_locks \
             (path, holder_worker_id, workflow_id, task_step_id, mode, acquired_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), $6) \
             RETURNING path, holder_worker_id, workflow_id, task_step_id, mode, acquired_at, \
                       expires_at",
        )
        .bind(path)
        .bind(holder)
        .bind(workflow_id)
        .bind(step_id)
        .bind(mode.to_string())
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;
        let lock = lock_from_row(&row)?;
        tx.commit().await?;
        Ok(LockOutcome::Granted(lock))
    }

    async fn release_locks(
        &self,
        holder: &str,
        step_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let mut tx = self.begin().await?;
        let released = Self::release_locks_tx(&mut tx, holder, step_id).await?;
        tx.commit().await?;
        Ok(released)
    }

    async fn sweep_expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<FileLock>, StoreError> {
        let rows = sqlx::query(
            "DELETE FROM file_locks WHERE expires_at <= $1 \
             RETURNING path, holder_worker_id, workflow_id, task_step_id, mode, acquired_at, \
                       expires_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(lock_from_row).collect()
    }

    async fn sweep_expired_claims(
        &self,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> Result<Vec<TaskStep>, StoreError> {
        let mut tx = self.begin().await?;

        let cutoff = now - claim_ttl;
        let sql = format!(
            "SELECT {} FROM tasks \
             WHERE status = 'IN_PROGRESS' AND (claimed_at IS NULL OR claimed_at <= $1) \
             FOR UPDATE SKIP LOCKED",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await?;
        let expired: Vec<TaskStep> = rows
            .iter()
            .map(task_from_row)
            .collect::<Result<_, _>>()?;

        let mut reverted = Vec::new();
        let mut touched: HashSet<String> = HashSet::new();
        for t in expired {
            if let Some(holder) = &t.claimed_by {
                Self::release_locks_tx(&mut tx, holder, Some(&t.step_id)).await?;
            }
            sqlx::query(
                "UPDATE tasks SET status = 'READY', claimed_by = NULL, claimed_at = NULL, \
                 updated_at = NOW() WHERE workflow_id = $1 AND step_id = $2",
            )
            .bind(&t.workflow_id)
            .bind(&t.step_id)
            .execute(&mut *tx)
            .await?;
            touched.insert(t.workflow_id.clone());

            let mut reclaimed = t.clone();
            reclaimed.status = TaskStatus::Ready;
            reclaimed.claimed_by = None;
            reclaimed.claimed_at = None;
            reverted.push(reclaimed);
        }
        for workflow_id in touched {
            Self::refresh_statuses_tx(&mut tx, &workflow_id).await?;
        }
        tx.commit().await?;
        Ok(reverted)
    }

    async fn in_progress_tasks(&self) -> Result<Vec<TaskStep>, StoreError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE status = 'IN_PROGRESS' ORDER BY claimed_at ASC",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(task_from_row).collect()
    }
}

// ── row mapping ──────────────────────────────────────────────────────────────

fn parse_task_status(s: &str) -> Result<TaskStatus, StoreError> {
    s.parse()
        .map_err(|e: String| StoreError::Unavailable(format!("corrupt task row: {}", e)))
}

fn parse_workflow_status(s: &str) -> Result<WorkflowStatus, StoreError> {
    match s {
        "PENDING" => Ok(WorkflowStatus::Pending),
        "IN_PROGRESS" => Ok(WorkflowStatus::InProgress),
        "COMPLETED" => Ok(WorkflowStatus::Completed),
        "FAILED" => Ok(WorkflowStatus::Failed),
        other => Err(StoreError::Unavailable(format!(
            "corrupt workflow status: {}",
            other
        ))),
    }
}

fn parse_mode(s: &str) -> Result<AccessMode, StoreError> {
    s.parse()
        .map_err(|e: String| StoreError::Unavailable(format!("corrupt lock row: {}", e)))
}

fn parse_project_status(s: &str) -> Result<ProjectStatus, StoreError> {
    match s {
        "PENDING" => Ok(ProjectStatus::Pending),
        "IN_PROGRESS" => Ok(ProjectStatus::InProgress),
        "COMPLETED" => Ok(ProjectStatus::Completed),
        "FAILED" => Ok(ProjectStatus::Failed),
        other => Err(StoreError::Unavailable(format!(
            "corrupt project status: {}",
            other
        ))),
    }
}

/// The workflow status rule applied to bare statuses (no task rows needed).
fn derive_workflow_status(statuses: &[TaskStatus]) -> WorkflowStatus {
    if statuses.iter().all(|s| *s == TaskStatus::Completed) {
        return WorkflowStatus::Completed;
    }
    if statuses.iter().any(|s| *s == TaskStatus::Failed) {
        return WorkflowStatus::Failed;
    }
    if statuses
        .iter()
        .any(|s| matches!(s, TaskStatus::InProgress | TaskStatus::Ready))
    {
        return WorkflowStatus::InProgress;
    }
    WorkflowStatus::Pending
}

fn task_from_row(row: &PgRow) -> Result<TaskStep, StoreError> {
    let dependencies: serde_json::Value = row.try_get("dependencies")?;
    let file_dependencies: serde_json::Value = row.try_get("file_dependencies")?;
    Ok(TaskStep {
        workflow_id: row.try_get("workflow_id")?,
        step_id: row.try_get("step_id")?,
        description: row.try_get("description")?,
        role: Role::new(row.try_get::<String, _>("role")?),
        dependencies: serde_json::from_value(dependencies)
            .map_err(|e| StoreError::Unavailable(format!("corrupt dependencies: {}", e)))?,
        file_dependencies: serde_json::from_value(file_dependencies)
            .map_err(|e| StoreError::Unavailable(format!("corrupt file_dependencies: {}", e)))?,
        status: parse_task_status(row.try_get::<String, _>("status")?.as_str())?,
        claimed_by: row.try_get("claimed_by")?,
        claimed_at: row.try_get("claimed_at")?,
        retry_count: row.try_get::<i32, _>("retry_count")? as u32,
        rework_note: row.try_get("rework_note")?,
        fast_mode: row.try_get("fast_mode")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn workflow_from_row(row: &PgRow) -> Result<Workflow, StoreError> {
    let metadata: serde_json::Value = row.try_get("metadata")?;
    Ok(Workflow {
        workflow_id: row.try_get("workflow_id")?,
        name: row.try_get("name")?,
        user_request: row.try_get("user_request")?,
        project_id: row.try_get("project_id")?,
        status: parse_workflow_status(row.try_get::<String, _>("status")?.as_str())?,
        metadata: serde_json::from_value(metadata)
            .map_err(|e| StoreError::Unavailable(format!("corrupt metadata: {}", e)))?,
        rework_cycles: row.try_get::<i32, _>("rework_cycles")? as u32,
        artifact: row.try_get("artifact")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn result_from_row(row: &PgRow) -> Result<TaskResult, StoreError> {
    let iterations: serde_json::Value = row.try_get("iterations")?;
    Ok(TaskResult {
        workflow_id: row.try_get("workflow_id")?,
        task_step_id: row.try_get("task_step_id")?,
        iterations: serde_json::from_value(iterations)
            .map_err(|e| StoreError::Unavailable(format!("corrupt iterations: {}", e)))?,
        final_result: row.try_get("final_result")?,
        source_worker: row.try_get("source_worker")?,
        execution_time: row.try_get("execution_time")?,
        created_at: row.try_get("created_at")?,
    })
}

fn audit_from_row(row: &PgRow) -> Result<AuditReport, StoreError> {
    let directives: serde_json::Value = row.try_get("rework_directives")?;
    Ok(AuditReport {
        workflow_id: row.try_get("workflow_id")?,
        is_successful: row.try_get("is_successful")?,
        feedback: row.try_get("feedback")?,
        rework_directives: serde_json::from_value(directives)
            .map_err(|e| StoreError::Unavailable(format!("corrupt directives: {}", e)))?,
        confidence: row.try_get("confidence")?,
        created_at: row.try_get("created_at")?,
    })
}

fn lock_from_row(row: &PgRow) -> Result<FileLock, StoreError> {
    Ok(FileLock {
        path: row.try_get("path")?,
        holder_worker_id: row.try_get("holder_worker_id")?,
        workflow_id: row.try_get("workflow_id")?,
        task_step_id: row.try_get("task_step_id")?,
        mode: parse_mode(row.try_get::<String, _>("mode")?.as_str())?,
        acquired_at: row.try_get("acquired_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn project_from_row(row: &PgRow) -> Result<Project, StoreError> {
    Ok(Project {
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        status: parse_project_status(row.try_get::<String, _>("status")?.as_str())?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
