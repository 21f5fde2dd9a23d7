// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lock Service
//!
//! Application-level coordination of file leases. The compatibility matrix
//! lives in the domain (`AccessMode::compatible_with`); per-path
//! serialization lives in the store. This service handles the all-or-nothing
//! acquisition of a task's declared file set: a conflict on any path rolls
//! back the paths already granted, so a task never executes holding a
//! partial set.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::config::ConductorConfig;
use crate::domain::lock::{AccessMode, FileLock};
use crate::domain::store::{LockOutcome, Store, StoreError};
use crate::domain::task::TaskStep;

/// Why a task's lease set could not be granted.
#[derive(Debug)]
pub struct LeaseConflict {
    pub path: String,
    pub requested: AccessMode,
    pub held_by: String,
    pub held_mode: AccessMode,
}

pub struct LockService {
    store: Arc<dyn Store>,
    config: Arc<ConductorConfig>,
}

impl LockService {
    pub fn new(store: Arc<dyn Store>, config: Arc<ConductorConfig>) -> Self {
        Self { store, config }
    }

    /// Acquire every lease a task declares, or none of them.
    ///
    /// Returns `Ok(None)` when all leases were granted, `Ok(Some(conflict))`
    /// when a path was contended (already-granted paths are released before
    /// returning). Conflicts are reported immediately; there is no waiting.
    pub async fn acquire_for_task(
        &self,
        task: &TaskStep,
        worker_id: &str,
    ) -> Result<Option<LeaseConflict>, StoreError> {
        for (path, mode) in &task.file_dependencies {
            let outcome = self
                .store
                .acquire_lock(
                    path,
                    *mode,
                    worker_id,
                    &task.workflow_id,
                    &task.step_id,
                    self.config.lock_ttl(),
                )
                .await?;

            match outcome {
                LockOutcome::Granted(_) => {
                    debug!(%path, mode = %mode, worker = worker_id, "lease granted");
                }
                LockOutcome::Conflict {
                    path,
                    held_by,
                    held_mode,
                } => {
                    self.store
                        .release_locks(worker_id, Some(&task.step_id))
                        .await?;
                    return Ok(Some(LeaseConflict {
                        path,
                        requested: *mode,
                        held_by,
                        held_mode,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Release every lease this worker holds for the step. Called on every
    /// exit path from a task: report, claim expiry, rework reset.
    pub async fn release_for(&self, worker_id: &str, step_id: &str) -> Result<usize, StoreError> {
        self.store.release_locks(worker_id, Some(step_id)).await
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileLock>, StoreError> {
        let expired = self.store.sweep_expired_locks(now).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "reaped expired file leases");
        }
        Ok(expired)
    }
}
