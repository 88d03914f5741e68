//! Process configuration, loaded once at startup from the environment.
//!
//! The two API keys are required; everything else has a default. Changing
//! any value requires a restart — nothing re-reads the environment after
//! `CrucibleConfig::from_env` returns.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Default model for all three roles; override per role via env.
const DEFAULT_MODEL: &str = "gpt-4-turbo";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_MODEL_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_SANDBOX_BASE_URL: &str = "http://localhost:7010";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BUDGET_USD: f64 = 50.0;
const DEFAULT_GATEWAY_MAX_RETRIES: u32 = 4;

/// Top-level configuration for one crucible process.
#[derive(Debug, Clone)]
pub struct CrucibleConfig {
    /// API key for the model provider (required).
    pub model_api_key: String,
    /// OpenAI-compatible base URL for chat and embeddings.
    pub model_base_url: String,
    /// API key for the sandbox vendor (required).
    pub sandbox_api_key: String,
    /// Base URL of the sandbox vendor's API.
    pub sandbox_base_url: String,
    /// Model id used by the Actor.
    pub actor_model: String,
    /// Model id used by the Adversary (curriculum + killer tests).
    pub adversary_model: String,
    /// Model id used by the prompt Evolver.
    pub evolver_model: String,
    /// Embedding model id.
    pub embed_model: String,
    /// Root for all persisted state: skills, ledgers, debug artifacts.
    pub data_dir: PathBuf,
    /// When set, every intermediate artifact is dumped to disk.
    pub debug: bool,
    /// Environment tag stamped into skill metadata.
    pub env_tag: String,
    /// Bounded attempts per cycle.
    pub max_attempts: u32,
    /// Hard wall-clock timeout for sandbox command execution.
    pub sandbox_timeout: Duration,
    /// Hard USD cap; exceeding it aborts the cycle and exits loop mode.
    pub budget_limit_usd: f64,
    /// Retries the model gateway performs on transient errors.
    pub gateway_max_retries: u32,
}

impl CrucibleConfig {
    /// Load configuration, failing fast when a required key is absent.
    pub fn from_env() -> Result<Self> {
        let model_api_key = std::env::var("CRUCIBLE_MODEL_API_KEY")
            .context("CRUCIBLE_MODEL_API_KEY is required")?;
        let sandbox_api_key = std::env::var("CRUCIBLE_SANDBOX_API_KEY")
            .context("CRUCIBLE_SANDBOX_API_KEY is required")?;

        Ok(Self {
            model_api_key,
            model_base_url: env_or("CRUCIBLE_MODEL_BASE_URL", DEFAULT_MODEL_BASE_URL),
            sandbox_api_key,
            sandbox_base_url: env_or("CRUCIBLE_SANDBOX_BASE_URL", DEFAULT_SANDBOX_BASE_URL),
            actor_model: env_or("CRUCIBLE_ACTOR_MODEL", DEFAULT_MODEL),
            adversary_model: env_or("CRUCIBLE_ADVERSARY_MODEL", DEFAULT_MODEL),
            evolver_model: env_or("CRUCIBLE_EVOLVER_MODEL", DEFAULT_MODEL),
            embed_model: env_or("CRUCIBLE_EMBED_MODEL", DEFAULT_EMBED_MODEL),
            data_dir: PathBuf::from(env_or("CRUCIBLE_DATA_DIR", DEFAULT_DATA_DIR)),
            debug: bool_from_env("CRUCIBLE_DEBUG", false),
            env_tag: env_or("CRUCIBLE_ENV_TAG", "development"),
            max_attempts: u32_from_env("CRUCIBLE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            sandbox_timeout: Duration::from_secs(u64_from_env(
                "CRUCIBLE_SANDBOX_TIMEOUT_SECS",
                DEFAULT_SANDBOX_TIMEOUT_SECS,
            )),
            budget_limit_usd: f64_from_env("CRUCIBLE_BUDGET_USD", DEFAULT_BUDGET_USD),
            gateway_max_retries: u32_from_env(
                "CRUCIBLE_GATEWAY_MAX_RETRIES",
                DEFAULT_GATEWAY_MAX_RETRIES,
            ),
        })
    }

    pub fn skills_path(&self) -> PathBuf {
        self.data_dir.join("skills.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("prompt_ledger.json")
    }

    pub fn cost_path(&self) -> PathBuf {
        self.data_dir.join("cost_ledger.json")
    }

    pub fn debug_root(&self) -> PathBuf {
        self.data_dir.join("debug")
    }
}

fn env_or(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn u32_from_env(var: &str, default: u32) -> u32 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn u64_from_env(var: &str, default: u64) -> u64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn f64_from_env(var: &str, default: f64) -> f64 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .unwrap_or(default)
}

fn bool_from_env(var: &str, default: bool) -> bool {
    std::env::var(var)
        .ok()
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize the tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_required_keys_fail_startup() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("CRUCIBLE_MODEL_API_KEY");
        std::env::remove_var("CRUCIBLE_SANDBOX_API_KEY");
        let err = CrucibleConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("CRUCIBLE_MODEL_API_KEY"));
    }

    #[test]
    fn bool_parsing_accepts_common_truthy_forms() {
        for value in ["1", "true", "YES", "On"] {
            std::env::set_var("CRUCIBLE_TEST_BOOL", value);
            assert!(bool_from_env("CRUCIBLE_TEST_BOOL", false), "{value}");
        }
        std::env::set_var("CRUCIBLE_TEST_BOOL", "0");
        assert!(!bool_from_env("CRUCIBLE_TEST_BOOL", true));
        std::env::remove_var("CRUCIBLE_TEST_BOOL");
    }

    #[test]
    fn numeric_parsing_rejects_zero_and_garbage() {
        std::env::set_var("CRUCIBLE_TEST_U32", "0");
        assert_eq!(u32_from_env("CRUCIBLE_TEST_U32", 3), 3);
        std::env::set_var("CRUCIBLE_TEST_U32", "nope");
        assert_eq!(u32_from_env("CRUCIBLE_TEST_U32", 3), 3);
        std::env::set_var("CRUCIBLE_TEST_U32", "7");
        assert_eq!(u32_from_env("CRUCIBLE_TEST_U32", 3), 7);
        std::env::remove_var("CRUCIBLE_TEST_U32");
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("CRUCIBLE_MODEL_API_KEY", "sk-test");
        std::env::set_var("CRUCIBLE_SANDBOX_API_KEY", "sb-test");
        std::env::set_var("CRUCIBLE_DATA_DIR", "/tmp/crucible-test");
        let config = CrucibleConfig::from_env().unwrap();
        assert_eq!(
            config.skills_path(),
            PathBuf::from("/tmp/crucible-test/skills.json")
        );
        assert_eq!(
            config.ledger_path(),
            PathBuf::from("/tmp/crucible-test/prompt_ledger.json")
        );
        std::env::remove_var("CRUCIBLE_DATA_DIR");
    }
}
