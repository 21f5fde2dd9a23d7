// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod llm;
pub mod store;

pub use db::Database;
pub use llm::{GatewayError, LlmGateway};
pub use store::{InMemoryStore, PostgresStore};
