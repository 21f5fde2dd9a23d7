// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task Domain Model
//!
//! A task is the unit of execution inside a workflow: one node of the
//! dependency graph, executed by exactly one worker at a time. Tasks mutate
//! only through the scheduler and the result handler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::domain::lock::AccessMode;

// ============================================================================
// Value Objects
// ============================================================================

/// Worker capability tag used for dispatch filtering.
///
/// Roles are a closed set loaded from configuration at startup; adding a role
/// is a configuration change, not a code change. Workers advertise their role
/// when polling and the server never negotiates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Ready => "READY",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "READY" => Ok(TaskStatus::Ready),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

// ============================================================================
// Entity: TaskStep
// ============================================================================

/// One node in a workflow's task graph.
///
/// # Invariants
/// - `dependencies` only reference step ids within the same workflow
/// - `status == InProgress` implies `claimed_by` is set
/// - `status == Ready` implies every dependency is `Completed`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    /// Unique within the owning workflow.
    pub step_id: String,
    pub workflow_id: String,
    pub description: String,
    pub role: Role,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Declared file access: path -> requested lease mode.
    #[serde(default)]
    pub file_dependencies: BTreeMap<String, AccessMode>,
    pub status: TaskStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    /// Audit feedback attached when the task was reset for rework. Workers
    /// include it in their prompt context on re-execution.
    pub rework_note: Option<String>,
    /// Advisory hint for workers to reduce RA iterations.
    #[serde(default)]
    pub fast_mode: bool,
}

impl TaskStep {
    pub fn new(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        description: impl Into<String>,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            workflow_id: workflow_id.into(),
            description: description.into(),
            role,
            dependencies: Vec::new(),
            file_dependencies: BTreeMap::new(),
            status: TaskStatus::Pending,
            claimed_by: None,
            claimed_at: None,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            rework_note: None,
            fast_mode: false,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_file_dependencies(mut self, files: BTreeMap<String, AccessMode>) -> Self {
        self.file_dependencies = files;
        self
    }

    /// A task is claimable only out of READY.
    pub fn is_claimable(&self) -> bool {
        self.status == TaskStatus::Ready
    }

    /// Whether every dependency appears in `completed`.
    pub fn deps_satisfied(&self, completed: &HashSet<&str>) -> bool {
        self.dependencies.iter().all(|d| completed.contains(d.as_str()))
    }
}

// ============================================================================
// Graph validation
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle involving steps: {0:?}")]
    Cycle(Vec<String>),
}

/// Validate a task graph and return its steps in dependency order.
///
/// Checks step-id uniqueness, dependency closure, and acyclicity (Kahn's
/// algorithm). The returned order is stable: ties break on lexicographic
/// step id, which also fixes the synthesis concatenation order.
pub fn validate_graph(tasks: &[TaskStep]) -> Result<Vec<String>, GraphError> {
    let mut known: HashSet<&str> = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !known.insert(task.step_id.as_str()) {
            return Err(GraphError::DuplicateStepId(task.step_id.clone()));
        }
    }

    let mut indegree: HashMap<&str, usize> = HashMap::with_capacity(tasks.len());
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        indegree.entry(task.step_id.as_str()).or_insert(0);
        for dep in &task.dependencies {
            if dep == &task.step_id {
                return Err(GraphError::SelfDependency(task.step_id.clone()));
            }
            if !known.contains(dep.as_str()) {
                return Err(GraphError::UnknownDependency {
                    step: task.step_id.clone(),
                    dependency: dep.clone(),
                });
            }
            *indegree.entry(task.step_id.as_str()).or_insert(0) += 1;
            dependents.entry(dep.as_str()).or_default().push(task.step_id.as_str());
        }
    }

    let mut frontier: Vec<&str> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    frontier.sort_unstable();
    let mut queue: VecDeque<&str> = frontier.into();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        let mut unblocked = Vec::new();
        for next in dependents.get(id).into_iter().flatten() {
            let deg = indegree.get_mut(next).expect("indegree seeded for all steps");
            *deg -= 1;
            if *deg == 0 {
                unblocked.push(*next);
            }
        }
        unblocked.sort_unstable();
        for next in unblocked {
            queue.push_back(next);
        }
    }

    if order.len() != tasks.len() {
        let stuck: Vec<String> = indegree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        return Err(GraphError::Cycle(stuck));
    }

    Ok(order)
}

/// Transitive dependents of `roots` within `tasks` (excluding the roots).
///
/// Used by audit rework to cascade resets to every task whose result was
/// derived from a reset step.
pub fn transitive_dependents(tasks: &[TaskStep], roots: &HashSet<String>) -> HashSet<String> {
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        for dep in &task.dependencies {
            dependents.entry(dep.as_str()).or_default().push(task.step_id.as_str());
        }
    }

    let mut out: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = roots.iter().map(|s| s.as_str()).collect();
    while let Some(id) = queue.pop_front() {
        for next in dependents.get(id).into_iter().flatten() {
            if !roots.contains(*next) && out.insert((*next).to_string()) {
                queue.push_back(next);
            }
        }
    }
    out
}
