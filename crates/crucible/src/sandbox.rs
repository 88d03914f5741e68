//! Sandbox vendor boundary: lease, write files, execute, release.
//!
//! The vendor is abstracted behind `SandboxProvider`/`SandboxLease` so the
//! arbiter (and tests) never touch HTTP directly. The wire shape mirrors
//! the vendor contract: a command that exits nonzero comes back as a
//! structured `CommandExit` error carrying the same stdout/stderr/exit_code
//! fields a zero exit would — classification happens above this layer.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Failures at the sandbox boundary.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Network-level failure talking to the vendor.
    #[error("sandbox transport error: {0}")]
    Transport(String),

    /// The vendor rejected a request.
    #[error("sandbox vendor error ({status}): {message}")]
    Vendor { status: u16, message: String },

    /// The command ran and exited nonzero.
    #[error("command exited with code {exit_code}")]
    CommandExit {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },

    /// The vendor reported the command hit its timeout.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

/// Captured output of a command that exited zero.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// A leased, isolated execution environment.
#[async_trait]
pub trait SandboxLease: Send + Sync {
    /// Vendor-assigned environment id, for logging.
    fn id(&self) -> &str;

    /// Write a complete file at `path`, creating intermediate directories.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    /// Run a shell command with a vendor-side timeout.
    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError>;

    /// Release the environment. Callers treat failures as best-effort.
    async fn release(&self) -> Result<(), SandboxError>;
}

/// Source of fresh sandbox leases; one lease per execution.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn lease(&self) -> Result<Box<dyn SandboxLease>, SandboxError>;
}

#[derive(Debug, Deserialize)]
struct LeaseResponse {
    sandbox_id: String,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    timed_out: bool,
}

/// Production provider over the vendor's HTTP API.
pub struct HttpSandboxProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSandboxProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/v1/sandboxes{suffix}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SandboxProvider for HttpSandboxProvider {
    async fn lease(&self) -> Result<Box<dyn SandboxLease>, SandboxError> {
        let resp = self
            .http
            .post(self.url(""))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SandboxError::Vendor {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let lease: LeaseResponse = resp
            .json()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        Ok(Box::new(HttpSandboxLease {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            sandbox_id: lease.sandbox_id,
        }))
    }
}

struct HttpSandboxLease {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    sandbox_id: String,
}

impl HttpSandboxLease {
    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/v1/sandboxes/{}{suffix}",
            self.base_url.trim_end_matches('/'),
            self.sandbox_id
        )
    }
}

#[async_trait]
impl SandboxLease for HttpSandboxLease {
    fn id(&self) -> &str {
        &self.sandbox_id
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let resp = self
            .http
            .post(self.url("/files"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "path": path,
                "content": content,
                "create_dirs": true,
            }))
            .send()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SandboxError::Vendor {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn run_command(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SandboxError> {
        let resp = self
            .http
            .post(self.url("/exec"))
            .bearer_auth(&self.api_key)
            // Client-side grace on top of the vendor-side timeout so a
            // hung vendor still returns control to the arbiter.
            .timeout(timeout + Duration::from_secs(10))
            .json(&serde_json::json!({
                "command": command,
                "timeout_secs": timeout.as_secs(),
            }))
            .send()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SandboxError::Vendor {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let exec: ExecResponse = resp
            .json()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        if exec.timed_out {
            return Err(SandboxError::Timeout(timeout));
        }
        if exec.exit_code != 0 {
            return Err(SandboxError::CommandExit {
                stdout: exec.stdout,
                stderr: exec.stderr,
                exit_code: exec.exit_code,
            });
        }
        Ok(ExecOutput {
            stdout: exec.stdout,
            stderr: exec.stderr,
            exit_code: exec.exit_code,
        })
    }

    async fn release(&self) -> Result<(), SandboxError> {
        let resp = self
            .http
            .delete(self.url(""))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| SandboxError::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SandboxError::Vendor {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_compose_without_double_slashes() {
        let provider = HttpSandboxProvider::new("http://localhost:7010/", "key");
        assert_eq!(provider.url(""), "http://localhost:7010/v1/sandboxes");

        let lease = HttpSandboxLease {
            http: reqwest::Client::new(),
            base_url: "http://localhost:7010".into(),
            api_key: "key".into(),
            sandbox_id: "sb-42".into(),
        };
        assert_eq!(
            lease.url("/exec"),
            "http://localhost:7010/v1/sandboxes/sb-42/exec"
        );
    }

    #[test]
    fn exec_response_defaults_are_lenient() {
        let exec: ExecResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(exec.exit_code, 0);
        assert!(!exec.timed_out);
        assert!(exec.stdout.is_empty());
    }
}
