// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Scheduler
//!
//! Not a background loop: a set of deterministic operations triggered by
//! workflow creation, worker polls, and task completions. Promotion and the
//! retry policy live inside the store's transactions; this service owns
//! dispatch (atomic claim + lease acquisition) and the expiry sweeps.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::config::ConductorConfig;
use crate::domain::lock::FileLock;
use crate::domain::store::{Store, StoreError};
use crate::domain::task::{Role, TaskStep};

use super::locks::LockService;

/// What one sweep pass reclaimed.
#[derive(Debug, Default)]
pub struct SweepSummary {
    pub reclaimed_tasks: Vec<TaskStep>,
    pub expired_locks: Vec<FileLock>,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    locks: Arc<LockService>,
    config: Arc<ConductorConfig>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        locks: Arc<LockService>,
        config: Arc<ConductorConfig>,
    ) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    /// Dispatch for a polling worker: atomically claim the oldest READY task
    /// of the role, then acquire its declared file leases.
    ///
    /// On a lease conflict the claim is rolled back (the task re-queues
    /// behind its peers) and the next READY task is tried, so one contended
    /// path never blocks the whole role queue. Returns `None` when nothing
    /// dispatchable remains; the worker retries after its backoff.
    pub async fn poll(
        &self,
        role: &Role,
        worker_id: &str,
    ) -> Result<Option<TaskStep>, StoreError> {
        let mut seen: HashSet<(String, String)> = HashSet::new();

        loop {
            let Some(task) = self.store.claim_next_ready(role, worker_id).await? else {
                return Ok(None);
            };

            // Claiming a task we already bounced this poll means every
            // remaining candidate is lease-blocked. Put it back and report
            // empty rather than spinning.
            if !seen.insert((task.workflow_id.clone(), task.step_id.clone())) {
                self.store
                    .release_claim(&task.workflow_id, &task.step_id, worker_id)
                    .await?;
                return Ok(None);
            }

            match self.locks.acquire_for_task(&task, worker_id).await? {
                None => {
                    info!(
                        workflow_id = %task.workflow_id,
                        step_id = %task.step_id,
                        worker = worker_id,
                        role = %role,
                        "task dispatched"
                    );
                    return Ok(Some(task));
                }
                Some(conflict) => {
                    warn!(
                        workflow_id = %task.workflow_id,
                        step_id = %task.step_id,
                        path = %conflict.path,
                        held_by = %conflict.held_by,
                        "lease conflict, re-queueing task"
                    );
                    self.store
                        .release_claim(&task.workflow_id, &task.step_id, worker_id)
                        .await?;
                }
            }
        }
    }

    /// Reclaim leases from the dead: expired claims revert to READY (their
    /// holder's file leases are released by the store in the same
    /// transaction) and expired file leases are dropped.
    pub async fn sweep_expired(&self) -> Result<SweepSummary, StoreError> {
        let now = Utc::now();
        let reclaimed_tasks = self
            .store
            .sweep_expired_claims(now, self.config.claim_ttl())
            .await?;
        for t in &reclaimed_tasks {
            warn!(
                workflow_id = %t.workflow_id,
                step_id = %t.step_id,
                "claim expired, task reverted to READY"
            );
        }
        let expired_locks = self.locks.sweep_expired(now).await?;
        Ok(SweepSummary {
            reclaimed_tasks,
            expired_locks,
        })
    }
}
