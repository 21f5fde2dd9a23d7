// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conductor
//!
//! Centralized coordination server for multi-agent workflows.
//!
//! Conductor turns a user request into a dependency-ordered graph of tasks,
//! hands each task to exactly one role-specialized external worker over a
//! pull-based HTTP API, and gates workflow completion on an automated quality
//! audit that can reset tasks for rework.
//!
//! # Architecture
//!
//! - **domain** — entities, value objects, the store contract, domain errors
//! - **application** — planner, scheduler, result handler, auditor, lock service
//! - **infrastructure** — Postgres and in-memory stores, LLM provider adapters
//! - **presentation** — the axum API surface and bearer authentication

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;
