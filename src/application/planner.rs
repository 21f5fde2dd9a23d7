// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Planner
//!
//! Turns a user request into a validated, persisted task graph. The LLM
//! proposes the graph; the planner validates it (unique step ids, dependency
//! closure, acyclicity, known roles) and falls back to a single-analyst plan
//! when the proposal cannot be salvaged, so submission always makes forward
//! progress. Dependency-free tasks are marked READY in the same transaction
//! that persists the workflow.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::config::ConductorConfig;
use crate::domain::lock::AccessMode;
use crate::domain::store::{Store, StoreError};
use crate::domain::task::{self, Role, TaskStatus, TaskStep};
use crate::domain::workflow::{self, Workflow};
use crate::infrastructure::llm::LlmGateway;

/// One step as proposed by the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannedStep {
    pub step_id: String,
    pub description: String,
    pub role: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub file_dependencies: BTreeMap<String, AccessMode>,
}

/// A submission, after the API layer has unwrapped the request body.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    pub user_request: String,
    pub metadata: HashMap<String, serde_json::Value>,
    pub project_id: Option<String>,
}

const PLAN_SCHEMA_HINT: &str = r#"[
  {
    "step_id": "short_unique_id",
    "description": "clear, specific task description",
    "role": "one of the available roles",
    "dependencies": ["step_ids that must complete first"],
    "file_dependencies": {"path/to/file": "read|write|exclusive"}
  }
]"#;

pub struct Planner {
    store: Arc<dyn Store>,
    gateway: Arc<LlmGateway>,
    config: Arc<ConductorConfig>,
}

impl Planner {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<LlmGateway>,
        config: Arc<ConductorConfig>,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Plan the request and persist the resulting workflow.
    ///
    /// LLM and validation failures never surface: they degrade to the
    /// fallback plan. Only store errors propagate.
    pub async fn plan_and_save(
        &self,
        request: PlanRequest,
    ) -> Result<(Workflow, Vec<TaskStep>), StoreError> {
        let name = self.workflow_name(&request);
        let fast_mode = self.fast_mode(&request);

        let project_id = match &request.project_id {
            Some(project_id) => {
                let project_name = request
                    .metadata
                    .get("project_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or(project_id);
                self.store.upsert_project(project_id, project_name).await?;
                Some(project_id.clone())
            }
            None => None,
        };

        let workflow = Workflow::new(name, request.user_request.clone())
            .with_project(project_id)
            .with_metadata(request.metadata.clone());

        let mut tasks = match self.propose_plan(&request).await {
            Ok(steps) => steps
                .into_iter()
                .map(|s| {
                    TaskStep::new(&workflow.workflow_id, s.step_id, s.description, Role::new(s.role))
                        .with_dependencies(s.dependencies)
                        .with_file_dependencies(s.file_dependencies)
                })
                .collect(),
            Err(reason) => {
                warn!(
                    workflow_id = %workflow.workflow_id,
                    "planning failed ({}), falling back to single-task plan",
                    reason
                );
                self.fallback_tasks(&workflow)
            }
        };

        for t in &mut tasks {
            t.fast_mode = fast_mode;
            if t.dependencies.is_empty() {
                t.status = TaskStatus::Ready;
            }
        }

        let workflow = self.store.create_workflow(workflow, tasks.clone()).await?;
        info!(
            workflow_id = %workflow.workflow_id,
            tasks = tasks.len(),
            ready = tasks.iter().filter(|t| t.status == TaskStatus::Ready).count(),
            "workflow planned and persisted"
        );
        Ok((workflow, tasks))
    }

    /// Ask the gateway for a plan and validate it. The error string names
    /// what disqualified the proposal.
    async fn propose_plan(&self, request: &PlanRequest) -> Result<Vec<PlannedStep>, String> {
        let prompt = self.planning_prompt(request);
        let steps: Vec<PlannedStep> = self
            .gateway
            .structured(&prompt, PLAN_SCHEMA_HINT)
            .await
            .map_err(|e| e.to_string())?;

        if steps.is_empty() {
            return Err("planner produced an empty graph".to_string());
        }
        for s in &steps {
            if !self.config.is_known_role(&s.role.trim().to_ascii_lowercase()) {
                return Err(format!("unknown role '{}' in step '{}'", s.role, s.step_id));
            }
        }

        // Shape-check the graph before anything is persisted.
        let probe: Vec<TaskStep> = steps
            .iter()
            .map(|s| {
                TaskStep::new(
                    "probe",
                    s.step_id.clone(),
                    s.description.clone(),
                    Role::new(s.role.clone()),
                )
                .with_dependencies(s.dependencies.clone())
            })
            .collect();
        task::validate_graph(&probe).map_err(|e| e.to_string())?;

        Ok(steps)
    }

    fn planning_prompt(&self, request: &PlanRequest) -> String {
        let roles = self.config.roles.join(", ");
        let mut prompt = format!(
            "You are an expert workflow planner in a multi-agent coordination system.\n\
             Break the user request into specific, actionable tasks with proper \
             dependencies and role assignments.\n\n\
             AVAILABLE ROLES: {roles}\n\n\
             PLANNING PRINCIPLES:\n\
             1. Break complex requests into manageable, specific tasks\n\
             2. Declare a dependency wherever one task needs another's output\n\
             3. Leave independent tasks free of dependencies so they can run in parallel\n\
             4. Research comes before analysis, analysis before writing, review last\n\
             5. Declare every file a task will touch in file_dependencies with the \
             least access it needs (read < write < exclusive)\n\n\
             USER REQUEST: {request}\n",
            roles = roles,
            request = request.user_request
        );
        if !request.metadata.is_empty() {
            if let Ok(context) = serde_json::to_string_pretty(&request.metadata) {
                prompt.push_str("\nADDITIONAL CONTEXT:\n");
                prompt.push_str(&context);
                prompt.push('\n');
            }
        }
        prompt
    }

    /// The guaranteed-progress plan: one analyst task carrying the raw
    /// request.
    fn fallback_tasks(&self, workflow: &Workflow) -> Vec<TaskStep> {
        vec![TaskStep::new(
            &workflow.workflow_id,
            "fallback_task",
            format!("Complete the user request: {}", workflow.user_request),
            Role::new("analyst"),
        )]
    }

    fn workflow_name(&self, request: &PlanRequest) -> String {
        request
            .metadata
            .get("workflow_name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| workflow::derive_name(&request.user_request))
    }

    fn fast_mode(&self, request: &PlanRequest) -> bool {
        request
            .metadata
            .get("fast_mode")
            .and_then(|v| v.as_bool())
            .unwrap_or(self.config.fast_mode_default)
    }
}
