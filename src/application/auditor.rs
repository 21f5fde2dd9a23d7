// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Auditor
//!
//! The quality gate over a completed workflow. Asks the gateway for a
//! structured verdict and applies the audit policy:
//!
//! - a passing verdict finalizes the workflow
//! - a failing verdict becomes targeted rework directives; directives naming
//!   unknown steps are discarded, and a failing verdict with nothing
//!   actionable left degrades to a pass
//! - after `max_rework_cycles` resets the workflow finalizes regardless of
//!   the verdict (the report is still preserved for inspection)
//! - a gateway failure is treated as a pass with a note: finalizing
//!   unaudited output beats failing the workflow because the auditor failed

use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::audit::{AuditReport, ReworkDirective};
use crate::domain::config::ConductorConfig;
use crate::domain::result::TaskResult;
use crate::domain::task::TaskStep;
use crate::domain::workflow::Workflow;
use crate::infrastructure::llm::LlmGateway;

/// Raw verdict shape requested from the LLM.
#[derive(Debug, Deserialize)]
struct AuditOutcome {
    is_successful: bool,
    feedback: String,
    #[serde(default)]
    rework_directives: Vec<ReworkDirective>,
    confidence: f64,
}

const AUDIT_SCHEMA_HINT: &str = r#"{
  "is_successful": true,
  "feedback": "overall quality assessment",
  "rework_directives": [
    {"step_id": "step to redo", "reason": "what was wrong", "cascade": true}
  ],
  "confidence": 0.0
}"#;

/// What the result handler should do with the workflow.
#[derive(Debug)]
pub enum AuditDecision {
    Finalize { report: AuditReport },
    Rework {
        report: AuditReport,
        directives: Vec<ReworkDirective>,
    },
}

pub struct Auditor {
    gateway: Arc<LlmGateway>,
    config: Arc<ConductorConfig>,
}

impl Auditor {
    pub fn new(gateway: Arc<LlmGateway>, config: Arc<ConductorConfig>) -> Self {
        Self { gateway, config }
    }

    pub async fn audit(
        &self,
        workflow: &Workflow,
        tasks: &[TaskStep],
        results: &[TaskResult],
    ) -> AuditDecision {
        let prompt = self.audit_prompt(workflow, tasks, results);

        let outcome = match self
            .gateway
            .structured::<AuditOutcome>(&prompt, AUDIT_SCHEMA_HINT)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    workflow_id = %workflow.workflow_id,
                    "audit unavailable ({}), finalizing unaudited",
                    e
                );
                return AuditDecision::Finalize {
                    report: AuditReport::pass_with_note(
                        &workflow.workflow_id,
                        format!("audit unavailable: {}", e),
                    ),
                };
            }
        };

        let known: HashSet<&str> = tasks.iter().map(|t| t.step_id.as_str()).collect();
        let mut directives = Vec::new();
        for d in outcome.rework_directives {
            if known.contains(d.step_id.as_str()) {
                directives.push(d);
            } else {
                warn!(
                    workflow_id = %workflow.workflow_id,
                    step_id = %d.step_id,
                    "audit directive names unknown step, discarding"
                );
            }
        }

        let report = AuditReport {
            workflow_id: workflow.workflow_id.clone(),
            is_successful: outcome.is_successful,
            feedback: outcome.feedback,
            rework_directives: directives.clone(),
            confidence: outcome.confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
        };

        if workflow.rework_cycles >= self.config.max_rework_cycles {
            info!(
                workflow_id = %workflow.workflow_id,
                cycles = workflow.rework_cycles,
                "rework budget exhausted, finalizing regardless of verdict"
            );
            return AuditDecision::Finalize { report };
        }

        if report.is_successful {
            if report.confidence < self.config.audit_confidence_threshold {
                warn!(
                    workflow_id = %workflow.workflow_id,
                    confidence = report.confidence,
                    threshold = self.config.audit_confidence_threshold,
                    "audit passed below the confidence threshold"
                );
            }
            return AuditDecision::Finalize { report };
        }

        if directives.is_empty() {
            // Failing verdict with nothing actionable degrades to a pass.
            info!(
                workflow_id = %workflow.workflow_id,
                "audit failed without actionable directives, finalizing"
            );
            return AuditDecision::Finalize { report };
        }

        AuditDecision::Rework { report, directives }
    }

    fn audit_prompt(
        &self,
        workflow: &Workflow,
        tasks: &[TaskStep],
        results: &[TaskResult],
    ) -> String {
        let mut prompt = format!(
            "You are a quality auditor for a multi-agent workflow.\n\
             Judge whether the combined results satisfy the original request.\n\n\
             ORIGINAL REQUEST: {}\n\nTASK RESULTS:\n",
            workflow.user_request
        );
        for result in results {
            let role = tasks
                .iter()
                .find(|t| t.step_id == result.task_step_id)
                .map(|t| t.role.as_str())
                .unwrap_or("unknown");
            prompt.push_str(&format!(
                "--- step '{}' (role: {}) ---\n{}\n\n",
                result.task_step_id, role, result.final_result
            ));
        }
        prompt.push_str(
            "Evaluate completeness, correctness, and coherence. If work must be \
             redone, name the specific step_ids and why. Only reference step_ids \
             that appear above.",
        );
        prompt
    }
}
