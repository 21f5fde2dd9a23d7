// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Gateway - Structured Output with Validation Retries
//
// Stateless call layer between the planner/auditor and the provider
// adapters. Each structured call validates the raw output against the
// requested type; on validation failure it re-prompts with the validation
// error appended, up to the configured attempt budget. No business logic
// lives here.

pub mod anthropic;
pub mod openai;

use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::warn;

use crate::domain::config::LlmConfig;
use crate::domain::llm::{GenerationOptions, LlmError, LlmProvider};

use anthropic::AnthropicAdapter;
use openai::OpenAiAdapter;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The provider answered but never produced output matching the schema.
    #[error("schema validation failed after {attempts} attempts: {last_error}")]
    SchemaFailure { attempts: u32, last_error: String },

    #[error("llm provider error: {0}")]
    Provider(#[from] LlmError),
}

pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    options: GenerationOptions,
    max_attempts: u32,
}

impl LlmGateway {
    /// Build the configured provider adapter.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = config.resolve_api_key()?;
        let endpoint = Some(config.endpoint.clone());
        let provider: Arc<dyn LlmProvider> = match config.provider.as_str() {
            "anthropic" => Arc::new(AnthropicAdapter::new(
                endpoint,
                api_key,
                config.model.clone(),
            )),
            "openai" => Arc::new(OpenAiAdapter::new(endpoint, api_key, config.model.clone())),
            other => anyhow::bail!("unsupported llm provider: {}", other),
        };
        Ok(Self::with_provider(provider, config))
    }

    /// Wrap an existing provider; used by tests to script responses.
    pub fn with_provider(provider: Arc<dyn LlmProvider>, config: &LlmConfig) -> Self {
        Self {
            provider,
            options: GenerationOptions {
                max_tokens: Some(config.max_tokens),
                ..GenerationOptions::default()
            },
            max_attempts: config.max_attempts.max(1),
        }
    }

    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.provider.health_check().await
    }

    /// Generate a value of type `T`, re-prompting with the validation error
    /// on malformed output.
    pub async fn structured<T: DeserializeOwned>(
        &self,
        prompt: &str,
        schema_hint: &str,
    ) -> Result<T, GatewayError> {
        let base = format!(
            "{prompt}\n\nRespond with a single JSON value and nothing else. \
             The JSON must match this shape:\n{schema_hint}"
        );

        let mut feedback: Option<String> = None;
        let mut last_error = String::new();
        let mut provider_error: Option<LlmError> = None;

        for attempt in 1..=self.max_attempts {
            let full_prompt = match &feedback {
                Some(error) => format!(
                    "{base}\n\nYour previous response was invalid: {error}\n\
                     Correct it and respond with valid JSON only."
                ),
                None => base.clone(),
            };

            let response = match self.provider.generate(&full_prompt, &self.options).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, max = self.max_attempts, "llm call failed: {}", e);
                    provider_error = Some(e);
                    continue;
                }
            };
            provider_error = None;

            let raw = extract_json(&response.text);
            match serde_json::from_str::<T>(raw) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        attempt,
                        max = self.max_attempts,
                        "llm output failed validation: {}",
                        e
                    );
                    last_error = e.to_string();
                    feedback = Some(last_error.clone());
                }
            }
        }

        if let Some(e) = provider_error {
            return Err(GatewayError::Provider(e));
        }
        Err(GatewayError::SchemaFailure {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

/// Pull the JSON payload out of a model response: strips markdown fences and
/// any prose before the first bracket.
fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    let without_fence = if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        rest.rsplit_once("```").map(|(body, _)| body).unwrap_or(rest)
    } else {
        trimmed
    };

    let start = without_fence
        .find(|c| c == '{' || c == '[')
        .unwrap_or(0);
    let end = without_fence
        .rfind(|c| c == '}' || c == ']')
        .map(|i| i + 1)
        .unwrap_or(without_fence.len());
    without_fence[start..end.max(start)].trim()
}
