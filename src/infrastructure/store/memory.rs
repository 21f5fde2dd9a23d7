// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory store.
//!
//! Backs development mode and the test suite. One mutex guards the whole
//! state, which makes every store operation trivially serializable; the
//! concurrency guarantees the Postgres implementation gets from row locking
//! fall out of the critical section here.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

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

#[derive(Default)]
struct State {
    projects: HashMap<String, Project>,
    workflows: HashMap<String, Workflow>,
    /// workflow_id -> tasks in insertion order.
    tasks: HashMap<String, Vec<TaskStep>>,
    /// Append-only result history.
    results: Vec<TaskResult>,
    /// Append-only audit history.
    audits: Vec<AuditReport>,
    locks: Vec<FileLock>,
}

impl State {
    /// Promote PENDING tasks whose dependencies are all COMPLETED.
    fn promote(&mut self, workflow_id: &str) -> Vec<String> {
        let Some(tasks) = self.tasks.get_mut(workflow_id) else {
            return Vec::new();
        };
        let completed: HashSet<String> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.step_id.clone())
            .collect();
        let completed_refs: HashSet<&str> = completed.iter().map(|s| s.as_str()).collect();

        let now = Utc::now();
        let mut promoted = Vec::new();
        for t in tasks.iter_mut() {
            if t.status == TaskStatus::Pending && t.deps_satisfied(&completed_refs) {
                t.status = TaskStatus::Ready;
                t.updated_at = now;
                promoted.push(t.step_id.clone());
            }
        }
        promoted
    }

    /// Recompute the workflow status from its tasks and cascade to the
    /// owning project.
    fn refresh_statuses(&mut self, workflow_id: &str) {
        let Some(tasks) = self.tasks.get(workflow_id) else {
            return;
        };
        let status = WorkflowStatus::derive(tasks);
        let project_id = match self.workflows.get_mut(workflow_id) {
            Some(workflow) => {
                if workflow.status != status {
                    workflow.status = status;
                    workflow.updated_at = Utc::now();
                }
                workflow.project_id.clone()
            }
            None => None,
        };

        if let Some(project_id) = project_id {
            let statuses: Vec<WorkflowStatus> = self
                .workflows
                .values()
                .filter(|w| w.project_id.as_deref() == Some(project_id.as_str()))
                .map(|w| w.status)
                .collect();
            if let Some(project) = self.projects.get_mut(&project_id) {
                let derived = ProjectStatus::derive(&statuses);
                if project.status != derived {
                    project.status = derived;
                    project.updated_at = Utc::now();
                }
            }
        }
    }

    fn release_locks_for(&mut self, holder: &str, step_id: Option<&str>) -> usize {
        let before = self.locks.len();
        self.locks.retain(|l| {
            let held = l.holder_worker_id == holder
                && step_id.map_or(true, |s| l.task_step_id == s);
            !held
        });
        before - self.locks.len()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("state mutex poisoned".to_string()))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn create_workflow(
        &self,
        mut workflow: Workflow,
        tasks: Vec<TaskStep>,
    ) -> Result<Workflow, StoreError> {
        task::validate_graph(&tasks).map_err(|e| StoreError::InvalidPlan(e.to_string()))?;

        let mut state = self.lock()?;
        if state.workflows.contains_key(&workflow.workflow_id) {
            return Err(StoreError::Conflict(format!(
                "workflow already exists: {}",
                workflow.workflow_id
            )));
        }
        workflow.status = WorkflowStatus::derive(&tasks);
        state.tasks.insert(workflow.workflow_id.clone(), tasks);
        state
            .workflows
            .insert(workflow.workflow_id.clone(), workflow.clone());
        state.refresh_statuses(&workflow.workflow_id);
        Ok(workflow)
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, StoreError> {
        let state = self.lock()?;
        state
            .workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))
    }

    async fn list_tasks_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<TaskStep>, StoreError> {
        let state = self.lock()?;
        state
            .tasks
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))
    }

    async fn get_task(&self, workflow_id: &str, step_id: &str) -> Result<TaskStep, StoreError> {
        let state = self.lock()?;
        state
            .tasks
            .get(workflow_id)
            .and_then(|tasks| tasks.iter().find(|t| t.step_id == step_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task {}/{}", workflow_id, step_id)))
    }

    async fn workflow_status_view(
        &self,
        workflow_id: &str,
    ) -> Result<WorkflowStatusView, StoreError> {
        let state = self.lock()?;
        let workflow = state
            .workflows
            .get(workflow_id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))?;
        let tasks = state.tasks.get(workflow_id).cloned().unwrap_or_default();
        Ok(WorkflowStatusView::compute(workflow, &tasks))
    }

    async fn cas_update_statuses(&self, workflow_id: &str) -> Result<WorkflowStatus, StoreError> {
        let mut state = self.lock()?;
        if !state.workflows.contains_key(workflow_id) {
            return Err(StoreError::NotFound(format!("workflow {}", workflow_id)));
        }
        state.refresh_statuses(workflow_id);
        Ok(state
            .workflows
            .get(workflow_id)
            .map(|w| w.status)
            .unwrap_or(WorkflowStatus::Pending))
    }

    async fn claim_next_ready(
        &self,
        role: &Role,
        worker_id: &str,
    ) -> Result<Option<TaskStep>, StoreError> {
        let mut state = self.lock()?;

        // Oldest updated_at first, step id as tie-break, across workflows.
        let mut candidate: Option<(String, String, DateTime<Utc>)> = None;
        for tasks in state.tasks.values() {
            for t in tasks {
                if t.status != TaskStatus::Ready || &t.role != role {
                    continue;
                }
                let key = (t.updated_at, t.step_id.clone());
                let beats = match &candidate {
                    None => true,
                    Some((_, cur_step, cur_at)) => key < (*cur_at, cur_step.clone()),
                };
                if beats {
                    candidate = Some((t.workflow_id.clone(), t.step_id.clone(), t.updated_at));
                }
            }
        }

        let Some((workflow_id, step_id, _)) = candidate else {
            return Ok(None);
        };

        let now = Utc::now();
        let claimed = {
            let tasks = state.tasks.get_mut(&workflow_id).expect("candidate workflow");
            let t = tasks
                .iter_mut()
                .find(|t| t.step_id == step_id)
                .expect("candidate task");
            t.status = TaskStatus::InProgress;
            t.claimed_by = Some(worker_id.to_string());
            t.claimed_at = Some(now);
            t.updated_at = now;
            t.clone()
        };
        state.refresh_statuses(&workflow_id);
        Ok(Some(claimed))
    }

    async fn release_claim(
        &self,
        workflow_id: &str,
        step_id: &str,
        worker_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let tasks = state
            .tasks
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))?;
        let t = tasks
            .iter_mut()
            .find(|t| t.step_id == step_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {}/{}", workflow_id, step_id)))?;

        if t.status != TaskStatus::InProgress || t.claimed_by.as_deref() != Some(worker_id) {
            return Err(StoreError::Conflict(format!(
                "claim on {}/{} not held by {}",
                workflow_id, step_id, worker_id
            )));
        }
        t.status = TaskStatus::Ready;
        t.claimed_by = None;
        t.claimed_at = None;
        t.updated_at = Utc::now();
        state.refresh_statuses(workflow_id);
        Ok(())
    }

    async fn record_result(
        &self,
        report: &WorkerReport,
        max_retries: u32,
    ) -> Result<ResultOutcome, StoreError> {
        let mut state = self.lock()?;
        if !state.workflows.contains_key(&report.workflow_id) {
            return Err(StoreError::NotFound(format!(
                "workflow {}",
                report.workflow_id
            )));
        }

        let now = Utc::now();
        let (task_status, retry_scheduled) = {
            let tasks = state
                .tasks
                .get_mut(&report.workflow_id)
                .ok_or_else(|| StoreError::NotFound(format!("workflow {}", report.workflow_id)))?;
            let t = tasks
                .iter_mut()
                .find(|t| t.step_id == report.step_id)
                .ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "task {}/{}",
                        report.workflow_id, report.step_id
                    ))
                })?;

            // Stale workers cannot overwrite a claim they no longer hold.
            if t.status != TaskStatus::InProgress
                || t.claimed_by.as_deref() != Some(report.worker_id.as_str())
            {
                return Err(StoreError::Conflict(format!(
                    "report for {}/{} from {} does not match the active claim",
                    report.workflow_id, report.step_id, report.worker_id
                )));
            }

            let retry_scheduled = match report.status {
                ReportedStatus::Completed => {
                    t.status = TaskStatus::Completed;
                    false
                }
                ReportedStatus::Failed if t.retry_count < max_retries => {
                    t.retry_count += 1;
                    t.status = TaskStatus::Ready;
                    true
                }
                ReportedStatus::Failed => {
                    t.status = TaskStatus::Failed;
                    false
                }
            };
            t.claimed_by = None;
            t.claimed_at = None;
            t.updated_at = now;
            (t.status, retry_scheduled)
        };

        state.results.push(report.clone().into_result(now));
        state.release_locks_for(&report.worker_id, Some(&report.step_id));

        let newly_ready = if task_status == TaskStatus::Completed {
            state.promote(&report.workflow_id)
        } else {
            Vec::new()
        };
        state.refresh_statuses(&report.workflow_id);

        let workflow_status = state
            .workflows
            .get(&report.workflow_id)
            .map(|w| w.status)
            .unwrap_or(WorkflowStatus::Pending);

        Ok(ResultOutcome {
            task_status,
            workflow_status,
            newly_ready,
            retry_scheduled,
        })
    }

    async fn workflow_results(&self, workflow_id: &str) -> Result<Vec<TaskResult>, StoreError> {
        let state = self.lock()?;
        let tasks = state
            .tasks
            .get(workflow_id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))?;

        let order = task::validate_graph(tasks)
            .unwrap_or_else(|_| tasks.iter().map(|t| t.step_id.clone()).collect());

        let mut out = Vec::new();
        for step_id in order {
            // Latest row wins: rework appends a fresh result for the step.
            if let Some(result) = state
                .results
                .iter()
                .rev()
                .find(|r| r.workflow_id == workflow_id && r.task_step_id == step_id)
            {
                out.push(result.clone());
            }
        }
        Ok(out)
    }

    async fn record_audit(&self, report: &AuditReport) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.workflows.contains_key(&report.workflow_id) {
            return Err(StoreError::NotFound(format!(
                "workflow {}",
                report.workflow_id
            )));
        }
        state.audits.push(report.clone());
        Ok(())
    }

    async fn list_audits(&self, workflow_id: &str) -> Result<Vec<AuditReport>, StoreError> {
        let state = self.lock()?;
        if !state.workflows.contains_key(workflow_id) {
            return Err(StoreError::NotFound(format!("workflow {}", workflow_id)));
        }
        let mut audits: Vec<AuditReport> = state
            .audits
            .iter()
            .filter(|a| a.workflow_id == workflow_id)
            .cloned()
            .collect();
        audits.sort_by_key(|a| a.created_at);
        Ok(audits)
    }

    async fn reset_tasks_for_rework(
        &self,
        workflow_id: &str,
        directives: &[ReworkDirective],
    ) -> Result<ReworkOutcome, StoreError> {
        let mut state = self.lock()?;
        if !state.workflows.contains_key(workflow_id) {
            return Err(StoreError::NotFound(format!("workflow {}", workflow_id)));
        }

        let snapshot = state.tasks.get(workflow_id).cloned().unwrap_or_default();
        let known: HashSet<&str> = snapshot.iter().map(|t| t.step_id.as_str()).collect();

        // Directive targets, unknown step ids dropped.
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
            let cycles = state
                .workflows
                .get(workflow_id)
                .map(|w| w.rework_cycles)
                .unwrap_or(0);
            return Ok(ReworkOutcome {
                reset_steps: Vec::new(),
                rework_cycles: cycles,
            });
        }

        let cascaded = task::transitive_dependents(&snapshot, &cascade_roots);
        let mut reset_steps: HashSet<String> = reasons.keys().cloned().collect();
        reset_steps.extend(cascaded.iter().cloned());

        let now = Utc::now();
        let mut released: Vec<(String, String)> = Vec::new();
        {
            let tasks = state.tasks.get_mut(workflow_id).expect("checked above");
            for t in tasks.iter_mut() {
                if !reset_steps.contains(&t.step_id) {
                    continue;
                }
                if let Some(holder) = t.claimed_by.take() {
                    released.push((holder, t.step_id.clone()));
                }
                t.status = TaskStatus::Pending;
                t.claimed_at = None;
                t.retry_count += 1;
                t.updated_at = now;
                t.rework_note = Some(match reasons.get(&t.step_id) {
                    Some(reason) => reason.clone(),
                    None => "reset after rework of an upstream dependency".to_string(),
                });
            }
        }
        for (holder, step_id) in released {
            state.release_locks_for(&holder, Some(&step_id));
        }

        state.promote(workflow_id);
        let rework_cycles = {
            let workflow = state.workflows.get_mut(workflow_id).expect("checked above");
            workflow.rework_cycles += 1;
            workflow.artifact = None;
            workflow.updated_at = now;
            workflow.rework_cycles
        };
        state.refresh_statuses(workflow_id);

        let mut reset_steps: Vec<String> = reset_steps.into_iter().collect();
        reset_steps.sort_unstable();
        Ok(ReworkOutcome {
            reset_steps,
            rework_cycles,
        })
    }

    async fn finalize_workflow(
        &self,
        workflow_id: &str,
        artifact: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        {
            let workflow = state
                .workflows
                .get_mut(workflow_id)
                .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))?;
            workflow.artifact = Some(artifact.to_string());
            workflow.status = WorkflowStatus::Completed;
            workflow.updated_at = Utc::now();
        }
        state.refresh_statuses(workflow_id);
        Ok(())
    }

    async fn workflow_artifact(&self, workflow_id: &str) -> Result<Option<String>, StoreError> {
        let state = self.lock()?;
        state
            .workflows
            .get(workflow_id)
            .map(|w| w.artifact.clone())
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))
    }

    async fn upsert_project(&self, project_id: &str, name: &str) -> Result<Project, StoreError> {
        let mut state = self.lock()?;
        let project = state
            .projects
            .entry(project_id.to_string())
            .or_insert_with(|| Project::new(project_id, name));
        Ok(project.clone())
    }

    async fn project_status_view(
        &self,
        project_id: &str,
    ) -> Result<ProjectStatusView, StoreError> {
        let state = self.lock()?;
        let project = state
            .projects
            .get(project_id)
            .ok_or_else(|| StoreError::NotFound(format!("project {}", project_id)))?;

        let statuses: Vec<WorkflowStatus> = state
            .workflows
            .values()
            .filter(|w| w.project_id.as_deref() == Some(project_id))
            .map(|w| w.status)
            .collect();
        let count = |status: WorkflowStatus| statuses.iter().filter(|s| **s == status).count();

        Ok(ProjectStatusView {
            project_id: project.project_id.clone(),
            name: project.name.clone(),
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
        let mut state = self.lock()?;
        let now = Utc::now();

        // Reap dead leases on this path before judging compatibility.
        state
            .locks
            .retain(|l| !(l.path == path && l.is_expired(now)));

        // Re-acquisition by the same holder for the same step refreshes the
        // lease instead of conflicting with itself.
        if let Some(own) = state.locks.iter_mut().find(|l| {
            l.path == path
                && l.holder_worker_id == holder
                && l.task_step_id == step_id
                && l.mode == mode
        }) {
            own.expires_at = now + ttl;
            return Ok(LockOutcome::Granted(own.clone()));
        }

        if let Some(blocker) = state.locks.iter().find(|l| {
            l.path == path
                && !(l.holder_worker_id == holder && l.task_step_id == step_id)
                && !mode.compatible_with(l.mode)
        }) {
            return Ok(LockOutcome::Conflict {
                path: path.to_string(),
                held_by: blocker.holder_worker_id.clone(),
                held_mode: blocker.mode,
            });
        }

        let lock = FileLock::new(path, holder, workflow_id, step_id, mode, ttl);
        state.locks.push(lock.clone());
        Ok(LockOutcome::Granted(lock))
    }

    async fn release_locks(
        &self,
        holder: &str,
        step_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        Ok(state.release_locks_for(holder, step_id))
    }

    async fn sweep_expired_locks(&self, now: DateTime<Utc>) -> Result<Vec<FileLock>, StoreError> {
        let mut state = self.lock()?;
        let (expired, live): (Vec<FileLock>, Vec<FileLock>) = state
            .locks
            .drain(..)
            .partition(|l| l.is_expired(now));
        state.locks = live;
        Ok(expired)
    }

    async fn sweep_expired_claims(
        &self,
        now: DateTime<Utc>,
        claim_ttl: Duration,
    ) -> Result<Vec<TaskStep>, StoreError> {
        let mut state = self.lock()?;
        let mut reverted = Vec::new();
        let mut released: Vec<(String, String)> = Vec::new();
        let mut touched_workflows: HashSet<String> = HashSet::new();

        for tasks in state.tasks.values_mut() {
            for t in tasks.iter_mut() {
                if t.status != TaskStatus::InProgress {
                    continue;
                }
                let expired = t
                    .claimed_at
                    .map_or(true, |claimed_at| claimed_at + claim_ttl <= now);
                if !expired {
                    continue;
                }
                if let Some(holder) = t.claimed_by.take() {
                    released.push((holder, t.step_id.clone()));
                }
                t.status = TaskStatus::Ready;
                t.claimed_at = None;
                t.updated_at = now;
                touched_workflows.insert(t.workflow_id.clone());
                reverted.push(t.clone());
            }
        }
        for (holder, step_id) in released {
            state.release_locks_for(&holder, Some(&step_id));
        }
        for workflow_id in touched_workflows {
            state.refresh_statuses(&workflow_id);
        }
        Ok(reverted)
    }

    async fn in_progress_tasks(&self) -> Result<Vec<TaskStep>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .tasks
            .values()
            .flatten()
            .filter(|t| t.status == TaskStatus::InProgress)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::result::RaIteration;

    fn report(workflow: &str, step: &str, worker: &str, status: ReportedStatus) -> WorkerReport {
        WorkerReport {
            workflow_id: workflow.to_string(),
            step_id: step.to_string(),
            worker_id: worker.to_string(),
            status,
            final_result: format!("{} output", step),
            ra_history: vec![RaIteration {
                thought: "work it out".into(),
                action: "do the step".into(),
                observation: None,
            }],
            execution_time: 0.1,
        }
    }

    fn two_step_workflow() -> (Workflow, Vec<TaskStep>) {
        let workflow = Workflow::new("test", "request");
        let wid = workflow.workflow_id.clone();
        let mut a = TaskStep::new(&wid, "a", "first", Role::new("analyst"));
        a.status = TaskStatus::Ready;
        let b = TaskStep::new(&wid, "b", "second", Role::new("writer"))
            .with_dependencies(vec!["a".to_string()]);
        (workflow, vec![a, b])
    }

    #[tokio::test]
    async fn test_create_rejects_cycle() {
        let store = InMemoryStore::new();
        let workflow = Workflow::new("bad", "request");
        let wid = workflow.workflow_id.clone();
        let a = TaskStep::new(&wid, "a", "x", Role::new("analyst"))
            .with_dependencies(vec!["b".to_string()]);
        let b = TaskStep::new(&wid, "b", "y", Role::new("analyst"))
            .with_dependencies(vec!["a".to_string()]);
        let err = store.create_workflow(workflow, vec![a, b]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn test_claim_then_stale_report_conflicts() {
        let store = InMemoryStore::new();
        let (workflow, tasks) = two_step_workflow();
        let wid = workflow.workflow_id.clone();
        store.create_workflow(workflow, tasks).await.unwrap();

        let claimed = store
            .claim_next_ready(&Role::new("analyst"), "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.step_id, "a");

        // A different worker reporting on the same step is stale.
        let err = store
            .record_result(&report(&wid, "a", "w2", ReportedStatus::Completed), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_completion_promotes_dependents() {
        let store = InMemoryStore::new();
        let (workflow, tasks) = two_step_workflow();
        let wid = workflow.workflow_id.clone();
        store.create_workflow(workflow, tasks).await.unwrap();

        store.claim_next_ready(&Role::new("analyst"), "w1").await.unwrap();
        let outcome = store
            .record_result(&report(&wid, "a", "w1", ReportedStatus::Completed), 2)
            .await
            .unwrap();
        assert_eq!(outcome.newly_ready, vec!["b".to_string()]);
        assert_eq!(outcome.workflow_status, WorkflowStatus::InProgress);
    }

    #[tokio::test]
    async fn test_failure_requeues_then_fails() {
        let store = InMemoryStore::new();
        let workflow = Workflow::new("retry", "request");
        let wid = workflow.workflow_id.clone();
        let mut a = TaskStep::new(&wid, "a", "only", Role::new("analyst"));
        a.status = TaskStatus::Ready;
        store.create_workflow(workflow, vec![a]).await.unwrap();

        let role = Role::new("analyst");
        store.claim_next_ready(&role, "w1").await.unwrap().unwrap();
        let outcome = store
            .record_result(&report(&wid, "a", "w1", ReportedStatus::Failed), 1)
            .await
            .unwrap();
        assert!(outcome.retry_scheduled);
        assert_eq!(outcome.task_status, TaskStatus::Ready);

        store.claim_next_ready(&role, "w1").await.unwrap().unwrap();
        let outcome = store
            .record_result(&report(&wid, "a", "w1", ReportedStatus::Failed), 1)
            .await
            .unwrap();
        assert!(!outcome.retry_scheduled);
        assert_eq!(outcome.task_status, TaskStatus::Failed);
        assert_eq!(outcome.workflow_status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_lock_conflict_and_release() {
        let store = InMemoryStore::new();
        let ttl = Duration::seconds(60);
        let granted = store
            .acquire_lock("/p", AccessMode::Read, "w1", "wf", "s1", ttl)
            .await
            .unwrap();
        assert!(granted.is_granted());

        let conflict = store
            .acquire_lock("/p", AccessMode::Write, "w2", "wf", "s2", ttl)
            .await
            .unwrap();
        assert!(!conflict.is_granted());

        store.release_locks("w1", None).await.unwrap();
        let granted = store
            .acquire_lock("/p", AccessMode::Write, "w2", "wf", "s2", ttl)
            .await
            .unwrap();
        assert!(granted.is_granted());
    }
}
