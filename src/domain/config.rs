// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Server Configuration
//!
//! One process-wide configuration loaded at startup from YAML with
//! environment overrides. Treated as immutable after init; a runtime reload
//! is semantically a full restart.

use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_claim_ttl_secs() -> u64 {
    600
}

fn default_lock_ttl_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_rework_cycles() -> u32 {
    2
}

fn default_audit_confidence_threshold() -> f64 {
    0.6
}

fn default_roles() -> Vec<String> {
    [
        "researcher",
        "analyst",
        "writer",
        "developer",
        "tester",
        "architect",
        "auditor",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_llm_provider() -> String {
    "anthropic".to_string()
}

fn default_llm_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_llm_max_tokens() -> u32 {
    4096
}

fn default_llm_max_attempts() -> u32 {
    3
}

/// LLM provider selection and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider type: "anthropic" or "openai".
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// Override the provider's default endpoint (e.g. an OpenAI-compatible
    /// gateway). Empty means the provider default.
    #[serde(default)]
    pub endpoint: String,

    /// API key, either a literal or "env:VAR_NAME".
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,

    /// Attempts per structured-output call before giving up.
    #[serde(default = "default_llm_max_attempts")]
    pub max_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            endpoint: String::new(),
            api_key: String::new(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            max_attempts: default_llm_max_attempts(),
        }
    }
}

impl LlmConfig {
    /// Resolve the API key, supporting the "env:VAR_NAME" indirection.
    pub fn resolve_api_key(&self) -> anyhow::Result<String> {
        if let Some(var) = self.api_key.strip_prefix("env:") {
            std::env::var(var)
                .map_err(|_| anyhow::anyhow!("environment variable not set: {}", var))
        } else {
            Ok(self.api_key.clone())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// Shared bearer secret for all workers; compared in constant time.
    /// Literal or "env:VAR_NAME".
    #[serde(default)]
    pub auth_token: String,

    /// Postgres connection string. Empty selects the in-memory store.
    #[serde(default)]
    pub database_url: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub llm: LlmConfig,

    /// Seconds an unreported claim survives before the sweep re-queues it.
    #[serde(default = "default_claim_ttl_secs")]
    pub claim_ttl_secs: u64,

    /// Seconds a file lease survives without release.
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Reported failures re-queued per task before it fails for good.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Audit reset cycles per workflow before finalizing regardless.
    #[serde(default = "default_max_rework_cycles")]
    pub max_rework_cycles: u32,

    #[serde(default = "default_audit_confidence_threshold")]
    pub audit_confidence_threshold: f64,

    /// Default for the advisory fast-mode hint on submitted workflows.
    #[serde(default)]
    pub fast_mode_default: bool,

    /// Closed role set; poll requests outside it are rejected.
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            database_url: String::new(),
            host: default_host(),
            port: default_port(),
            llm: LlmConfig::default(),
            claim_ttl_secs: default_claim_ttl_secs(),
            lock_ttl_secs: default_lock_ttl_secs(),
            max_retries: default_max_retries(),
            max_rework_cycles: default_max_rework_cycles(),
            audit_confidence_threshold: default_audit_confidence_threshold(),
            fast_mode_default: false,
            roles: default_roles(),
        }
    }
}

impl ConductorConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load from an explicit path, else `CONDUCTOR_CONFIG_PATH`, else
    /// defaults. Environment overrides are applied either way.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = path {
            Self::load(path)?
        } else if let Ok(env_path) = std::env::var("CONDUCTOR_CONFIG_PATH") {
            Self::load(Path::new(&env_path))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CONDUCTOR_AUTH_TOKEN") {
            self.auth_token = v;
        }
        if let Ok(v) = std::env::var("CONDUCTOR_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("CONDUCTOR_LLM_MODEL") {
            self.llm.model = v;
        }
    }

    /// Resolve the bearer secret, supporting "env:VAR_NAME".
    pub fn resolve_auth_token(&self) -> anyhow::Result<String> {
        if let Some(var) = self.auth_token.strip_prefix("env:") {
            std::env::var(var)
                .map_err(|_| anyhow::anyhow!("environment variable not set: {}", var))
        } else {
            Ok(self.auth_token.clone())
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.auth_token.is_empty() {
            anyhow::bail!("auth_token must be configured");
        }
        if self.roles.is_empty() {
            anyhow::bail!("at least one role must be configured");
        }
        // The planner's fallback plan assigns the analyst role.
        if !self.roles.iter().any(|r| r == "analyst") {
            anyhow::bail!("role set must include 'analyst' (planner fallback role)");
        }
        if !(0.0..=1.0).contains(&self.audit_confidence_threshold) {
            anyhow::bail!(
                "audit_confidence_threshold must be in [0, 1], got {}",
                self.audit_confidence_threshold
            );
        }
        if self.claim_ttl_secs == 0 || self.lock_ttl_secs == 0 {
            anyhow::bail!("claim_ttl_secs and lock_ttl_secs must be positive");
        }
        Ok(())
    }

    pub fn is_known_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn claim_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_ttl_secs as i64)
    }

    pub fn lock_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lock_ttl_secs as i64)
    }
}
