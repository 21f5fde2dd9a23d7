// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Result Handler
//!
//! Entry point for worker reports. Persisting the result, releasing the
//! worker's leases, promoting dependents, and recomputing statuses all
//! happen inside one store transaction (`Store::record_result`). When that
//! transaction reports the workflow complete, the audit runs outside any
//! transaction and its verdict is applied in a follow-on transaction:
//! finalize with a synthesized artifact, or reset the directed tasks.

use std::sync::Arc;
use tracing::info;

use crate::domain::config::ConductorConfig;
use crate::domain::result::{TaskResult, WorkerReport};
use crate::domain::store::{Store, StoreError};
use crate::domain::workflow::{Workflow, WorkflowStatus};

use super::auditor::{AuditDecision, Auditor};

/// Acknowledgement returned to the reporting worker.
#[derive(Debug)]
pub struct ResultAck {
    pub accepted: bool,
    pub workflow_status: WorkflowStatus,
    pub audit_triggered: bool,
}

pub struct ResultHandler {
    store: Arc<dyn Store>,
    auditor: Arc<Auditor>,
    config: Arc<ConductorConfig>,
}

impl ResultHandler {
    pub fn new(
        store: Arc<dyn Store>,
        auditor: Arc<Auditor>,
        config: Arc<ConductorConfig>,
    ) -> Self {
        Self {
            store,
            auditor,
            config,
        }
    }

    pub async fn handle_report(&self, report: WorkerReport) -> Result<ResultAck, StoreError> {
        let outcome = self
            .store
            .record_result(&report, self.config.max_retries)
            .await?;

        if outcome.retry_scheduled {
            info!(
                workflow_id = %report.workflow_id,
                step_id = %report.step_id,
                "reported failure re-queued for retry"
            );
        }
        if !outcome.newly_ready.is_empty() {
            info!(
                workflow_id = %report.workflow_id,
                promoted = ?outcome.newly_ready,
                "dependents promoted to READY"
            );
        }

        let mut workflow_status = outcome.workflow_status;
        let mut audit_triggered = false;
        if workflow_status == WorkflowStatus::Completed {
            audit_triggered = true;
            workflow_status = self.run_audit_cycle(&report.workflow_id).await?;
        }

        Ok(ResultAck {
            accepted: true,
            workflow_status,
            audit_triggered,
        })
    }

    /// Audit a just-completed workflow and apply the verdict.
    async fn run_audit_cycle(&self, workflow_id: &str) -> Result<WorkflowStatus, StoreError> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        let tasks = self.store.list_tasks_by_workflow(workflow_id).await?;
        let results = self.store.workflow_results(workflow_id).await?;

        match self.auditor.audit(&workflow, &tasks, &results).await {
            AuditDecision::Finalize { report } => {
                self.store.record_audit(&report).await?;
                let artifact = synthesize(&workflow, &results);
                self.store.finalize_workflow(workflow_id, &artifact).await?;
                info!(workflow_id, "workflow finalized");
                Ok(WorkflowStatus::Completed)
            }
            AuditDecision::Rework { report, directives } => {
                self.store.record_audit(&report).await?;
                let outcome = self
                    .store
                    .reset_tasks_for_rework(workflow_id, &directives)
                    .await?;

                if outcome.reset_steps.is_empty() {
                    // Every directive was stale by the time we applied it.
                    let artifact = synthesize(&workflow, &results);
                    self.store.finalize_workflow(workflow_id, &artifact).await?;
                    return Ok(WorkflowStatus::Completed);
                }

                info!(
                    workflow_id,
                    reset = ?outcome.reset_steps,
                    cycle = outcome.rework_cycles,
                    "workflow reset for rework"
                );
                Ok(self.store.get_workflow(workflow_id).await?.status)
            }
        }
    }
}

/// The synthesizer: a pure fold over completed results in dependency order.
pub fn synthesize(workflow: &Workflow, results: &[TaskResult]) -> String {
    let mut out = format!("# {}\n", workflow.name);
    for result in results {
        out.push_str(&format!(
            "\n## {} ({})\n\n{}\n",
            result.task_step_id, result.source_worker, result.final_result
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_synthesize_orders_and_labels() {
        let workflow = Workflow::new("report", "make a report");
        let results = vec![
            TaskResult {
                workflow_id: workflow.workflow_id.clone(),
                task_step_id: "research".into(),
                iterations: vec![],
                final_result: "facts".into(),
                source_worker: "w1".into(),
                execution_time: 1.0,
                created_at: Utc::now(),
            },
            TaskResult {
                workflow_id: workflow.workflow_id.clone(),
                task_step_id: "write".into(),
                iterations: vec![],
                final_result: "prose".into(),
                source_worker: "w2".into(),
                execution_time: 2.0,
                created_at: Utc::now(),
            },
        ];
        let artifact = synthesize(&workflow, &results);
        let research_at = artifact.find("facts").unwrap();
        let write_at = artifact.find("prose").unwrap();
        assert!(research_at < write_at);
        assert!(artifact.starts_with("# report"));
    }

    #[test]
    fn test_synthesize_empty_results() {
        let workflow = Workflow::new("empty", "nothing");
        assert_eq!(synthesize(&workflow, &[]), "# empty\n");
    }
}
