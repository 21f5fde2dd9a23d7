// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Audit reports: the quality gate's verdict over a completed workflow.
//! Reports are append-only; one row per completion attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_cascade() -> bool {
    true
}

/// A targeted rework instruction from the auditor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReworkDirective {
    pub step_id: String,
    pub reason: String,
    /// When true, every task transitively depending on `step_id` is reset too.
    #[serde(default = "default_cascade")]
    pub cascade: bool,
}

/// Verdict over one workflow completion attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub workflow_id: String,
    pub is_successful: bool,
    pub feedback: String,
    #[serde(default)]
    pub rework_directives: Vec<ReworkDirective>,
    /// Auditor self-confidence in [0, 1].
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl AuditReport {
    /// A passing report produced without (or despite) the LLM, e.g. when the
    /// gateway exhausted its retries. Finalizing unaudited output beats
    /// failing the workflow because the auditor failed.
    pub fn pass_with_note(workflow_id: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            is_successful: true,
            feedback: note.into(),
            rework_directives: Vec::new(),
            confidence: 0.0,
            created_at: Utc::now(),
        }
    }
}
