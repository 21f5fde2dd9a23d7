// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! File Lease Domain Model
//!
//! Conductor serializes conflicting file operations across workers with
//! application-level leases, independent of any OS-level locking. A lease is
//! time-bounded so that a crashed worker cannot hold a path forever; the
//! sweep reclaims expired rows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Requested access mode for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
    Exclusive,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::Exclusive => "exclusive",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AccessMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(AccessMode::Read),
            "write" => Ok(AccessMode::Write),
            "exclusive" => Ok(AccessMode::Exclusive),
            other => Err(format!("unknown access mode: {}", other)),
        }
    }
}

impl AccessMode {
    /// The compatibility matrix: concurrent readers only. Write and exclusive
    /// block everything, including each other.
    pub fn compatible_with(self, held: AccessMode) -> bool {
        matches!((held, self), (AccessMode::Read, AccessMode::Read))
    }
}

/// An active lease row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
    pub path: String,
    pub holder_worker_id: String,
    pub workflow_id: String,
    pub task_step_id: String,
    pub mode: AccessMode,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl FileLock {
    pub fn new(
        path: impl Into<String>,
        holder: impl Into<String>,
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        mode: AccessMode,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            path: path.into(),
            holder_worker_id: holder.into(),
            workflow_id: workflow_id.into(),
            task_step_id: step_id.into(),
            mode,
            acquired_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
