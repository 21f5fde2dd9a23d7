// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Optional grouping of workflows under a stable external key. Project status
//! derives from workflow statuses exactly the way workflow status derives
//! from task statuses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::workflow::WorkflowStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectStatus::Pending => "PENDING",
            ProjectStatus::InProgress => "IN_PROGRESS",
            ProjectStatus::Completed => "COMPLETED",
            ProjectStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

impl ProjectStatus {
    pub fn derive(workflows: &[WorkflowStatus]) -> Self {
        if workflows.iter().all(|s| *s == WorkflowStatus::Completed) {
            return ProjectStatus::Completed;
        }
        if workflows.iter().any(|s| *s == WorkflowStatus::Failed) {
            return ProjectStatus::Failed;
        }
        if workflows.iter().any(|s| *s == WorkflowStatus::InProgress) {
            return ProjectStatus::InProgress;
        }
        ProjectStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub project_id: String,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            name: name.into(),
            status: ProjectStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_project_is_completed() {
        // Mirrors the workflow rule: nothing outstanding means complete.
        assert_eq!(ProjectStatus::derive(&[]), ProjectStatus::Completed);
    }

    #[test]
    fn test_failed_workflow_fails_project() {
        let statuses = vec![WorkflowStatus::Completed, WorkflowStatus::Failed];
        assert_eq!(ProjectStatus::derive(&statuses), ProjectStatus::Failed);
    }

    #[test]
    fn test_in_progress_propagates() {
        let statuses = vec![WorkflowStatus::Completed, WorkflowStatus::InProgress];
        assert_eq!(ProjectStatus::derive(&statuses), ProjectStatus::InProgress);
    }

    #[test]
    fn test_pending_only() {
        let statuses = vec![WorkflowStatus::Pending, WorkflowStatus::Pending];
        assert_eq!(ProjectStatus::derive(&statuses), ProjectStatus::Pending);
    }
}
