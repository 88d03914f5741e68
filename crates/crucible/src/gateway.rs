//! Model Gateway: chat and schema-constrained extraction over rig agents.
//!
//! The gateway owns all model-call retry logic. Transient transport and
//! rate-limit errors are retried with exponential backoff (2s, 4s, 8s, …)
//! up to a bounded attempt count; exhaustion surfaces as a single typed
//! error. Nothing above this layer retries a model call.
//!
//! Schema-constrained extraction works by embedding the schemars-generated
//! JSON Schema in the prompt and parsing the response fail-closed: output
//! that does not deserialize into the target type is a `SchemaParse`
//! error, never a partial recovery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::cost::{estimate_tokens, CostLedger};
use crate::sanitize::strip_code_fences;

/// Type alias for agents built from OpenAI-compatible endpoints.
pub type OaiAgent = rig::agent::Agent<openai::completion::CompletionModel>;

/// Typed failures surfaced by the gateway after its own retry budget.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-class failure that survived all retries.
    #[error("model transport error after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    /// Rate limiting that survived all retries.
    #[error("model rate limited after {attempts} attempts: {message}")]
    RateLimit { attempts: u32, message: String },

    /// Structured output did not match the requested schema.
    #[error("schema parse failure for {type_name}: {message}")]
    SchemaParse {
        type_name: &'static str,
        message: String,
    },

    /// The model returned no usable content.
    #[error("model returned empty content")]
    EmptyResponse,

    /// The session cost cap has been reached.
    #[error("budget exceeded: ${spent:.2} >= ${limit:.2}")]
    BudgetExceeded { spent: f64, limit: f64 },
}

/// Unstructured chat boundary; the seam every agent is built on.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, system: &str, user: &str) -> Result<String, GatewayError>;
}

/// Production gateway backed by a rig OpenAI-compatible client.
pub struct ModelGateway {
    client: openai::CompletionsClient,
    model: String,
    temperature: f64,
    max_retries: u32,
    cost: Arc<Mutex<CostLedger>>,
}

impl ModelGateway {
    pub fn new(
        client: openai::CompletionsClient,
        model: impl Into<String>,
        max_retries: u32,
        cost: Arc<Mutex<CostLedger>>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: 0.0,
            max_retries,
            cost,
        }
    }

    fn build_agent(&self, preamble: &str) -> OaiAgent {
        self.client
            .agent(&self.model)
            .preamble(preamble)
            .temperature(self.temperature)
            .build()
    }
}

#[async_trait]
impl ChatModel for ModelGateway {
    async fn chat(&self, system: &str, user: &str) -> Result<String, GatewayError> {
        if let Some((spent, limit)) = self.cost.lock().await.over_budget() {
            return Err(GatewayError::BudgetExceeded { spent, limit });
        }

        let agent = self.build_agent(system);
        let response = prompt_with_retry(&agent, user, self.max_retries).await?;
        if response.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }

        let mut cost = self.cost.lock().await;
        cost.record_usage(
            &self.model,
            estimate_tokens(system) + estimate_tokens(user),
            estimate_tokens(&response),
        );
        if let Some((spent, limit)) = cost.over_budget() {
            return Err(GatewayError::BudgetExceeded { spent, limit });
        }
        Ok(response)
    }
}

/// Schema-constrained chat: demand a `T`-shaped JSON payload and parse it
/// fail-closed.
pub async fn extract<T>(model: &dyn ChatModel, system: &str, user: &str) -> Result<T, GatewayError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = schemars::schema_for!(T);
    let schema_json = serde_json::to_string_pretty(&schema).unwrap_or_default();
    let framed = format!(
        "{user}\n\nRespond with STRICT JSON ONLY matching this JSON Schema. \
         No prose, no markdown fences.\n{schema_json}"
    );

    let raw = model.chat(system, &framed).await?;
    let body = strip_code_fences(&raw);
    serde_json::from_str(&body).map_err(|e| GatewayError::SchemaParse {
        type_name: std::any::type_name::<T>(),
        message: e.to_string(),
    })
}

/// Prompt an agent with exponential backoff on transient HTTP errors.
///
/// Retries connection errors, 429, 502, 503 and timeouts with backoff
/// 2s, 4s, 8s, … Non-transient errors fail immediately.
async fn prompt_with_retry(
    agent: &impl Prompt,
    prompt: &str,
    max_retries: u32,
) -> Result<String, GatewayError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match agent.prompt(prompt).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                let message = e.to_string();
                let lower = message.to_ascii_lowercase();
                let rate_limited = lower.contains("429") || lower.contains("rate limit");
                let transient = rate_limited
                    || lower.contains("502")
                    || lower.contains("503")
                    || lower.contains("connection")
                    || lower.contains("timed out")
                    || lower.contains("timeout");

                if !transient || attempts > max_retries {
                    return Err(if rate_limited {
                        GatewayError::RateLimit { attempts, message }
                    } else {
                        GatewayError::Transport { attempts, message }
                    });
                }

                let backoff = Duration::from_secs(2u64.saturating_pow(attempts.min(6)));
                warn!(
                    attempt = attempts,
                    backoff_secs = backoff.as_secs(),
                    "transient model error — retrying: {message}"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
