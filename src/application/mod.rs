// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod auditor;
pub mod locks;
pub mod planner;
pub mod result_handler;
pub mod scheduler;

pub use auditor::{AuditDecision, Auditor};
pub use locks::LockService;
pub use planner::{PlanRequest, Planner};
pub use result_handler::{ResultAck, ResultHandler};
pub use scheduler::Scheduler;
