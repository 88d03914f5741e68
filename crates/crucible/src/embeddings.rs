//! Embedding Gateway: maps text to a fixed-dimension vector.
//!
//! Talks to an OpenAI-compatible `/embeddings` endpoint. Newlines are
//! replaced with spaces before submission — the same normalization is
//! applied to stored documents and queries so the two are comparable.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::gateway::GatewayError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The embedding boundary: text in, fixed-dimension vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError>;
}

/// Normalize text before embedding.
pub fn normalize_for_embedding(text: &str) -> String {
    text.replace('\n', " ")
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Production embedder over an OpenAI-compatible HTTP endpoint.
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_retries,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let input = normalize_for_embedding(text);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let sent = self
                .http
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .timeout(REQUEST_TIMEOUT)
                .json(&serde_json::json!({ "model": self.model, "input": input }))
                .send()
                .await;

            let retryable_message = match sent {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: EmbeddingResponse =
                        resp.json().await.map_err(|e| GatewayError::SchemaParse {
                            type_name: "EmbeddingResponse",
                            message: e.to_string(),
                        })?;
                    let vector = parsed
                        .data
                        .into_iter()
                        .next()
                        .map(|d| d.embedding)
                        .unwrap_or_default();
                    if vector.is_empty() {
                        return Err(GatewayError::SchemaParse {
                            type_name: "EmbeddingResponse",
                            message: "empty embedding vector".into(),
                        });
                    }
                    return Ok(vector);
                }
                Ok(resp)
                    if resp.status().as_u16() == 429 || resp.status().is_server_error() =>
                {
                    format!("embedding endpoint returned {}", resp.status())
                }
                Ok(resp) => {
                    return Err(GatewayError::Transport {
                        attempts,
                        message: format!("embedding endpoint returned {}", resp.status()),
                    });
                }
                Err(e) => e.to_string(),
            };

            if attempts > self.max_retries {
                return Err(GatewayError::Transport {
                    attempts,
                    message: retryable_message,
                });
            }
            let backoff = Duration::from_secs(2u64.saturating_pow(attempts.min(6)));
            warn!(
                attempt = attempts,
                backoff_secs = backoff.as_secs(),
                "transient embedding error — retrying: {retryable_message}"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}
