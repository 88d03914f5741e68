//! Prompt Ledger: append-only versioned instructions with run statistics.
//!
//! The head version is what the Actor runs with. Statistics are mutated
//! only through `record_run`; earlier versions are never rewritten. The
//! whole history persists as one JSON array written atomically (temp file,
//! then rename); an empty or corrupt blob reinitializes with genesis.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::prompts;

/// Minimum runs on the head before evolution may be considered.
pub const EVOLUTION_MIN_RUNS: u32 = 5;
/// Success rate below which an evidenced head is considered degraded.
pub const EVOLUTION_RATE_FLOOR: f64 = 0.6;

/// One immutable snapshot of the Actor's system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    pub version_id: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub parent_version: Option<u32>,
    #[serde(default)]
    pub change_summary: String,
    #[serde(default)]
    pub runs: u32,
    #[serde(default)]
    pub successes: u32,
    #[serde(default)]
    pub success_rate: f64,
}

/// The append-only prompt history.
#[derive(Debug)]
pub struct PromptLedger {
    path: PathBuf,
    history: Vec<PromptVersion>,
}

impl PromptLedger {
    /// Open the ledger at `path`, writing genesis if the blob is missing,
    /// empty, or corrupt.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let history = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str::<Vec<PromptVersion>>(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt prompt ledger — reinitializing");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };

        let mut ledger = Self { path, history };
        if ledger.history.is_empty() {
            ledger.history.push(genesis());
            ledger.save();
        }
        ledger
    }

    /// Content of the head version.
    pub fn current_prompt(&self) -> &str {
        &self.head().content
    }

    pub fn head(&self) -> &PromptVersion {
        self.history.last().expect("ledger always holds genesis")
    }

    pub fn versions(&self) -> &[PromptVersion] {
        &self.history
    }

    /// Record one cycle's outcome against the head version and persist.
    pub fn record_run(&mut self, success: bool) {
        let head = self.head_mut();
        head.runs += 1;
        if success {
            head.successes += 1;
        }
        head.success_rate = f64::from(head.successes) / f64::from(head.runs);
        self.save();
    }

    /// Hysteresis gate: evolve only with enough evidence of degradation.
    pub fn should_evolve(&self) -> bool {
        let head = self.head();
        head.runs >= EVOLUTION_MIN_RUNS && head.success_rate < EVOLUTION_RATE_FLOOR
    }

    /// Append a new head derived from the current one, statistics zeroed.
    pub fn append_version(&mut self, content: String, change_summary: String) -> &PromptVersion {
        let parent = self.head();
        let next = PromptVersion {
            version_id: parent.version_id + 1,
            content,
            created_at: Utc::now(),
            parent_version: Some(parent.version_id),
            change_summary,
            runs: 0,
            successes: 0,
            success_rate: 0.0,
        };
        info!(version = next.version_id, parent = ?next.parent_version, "prompt evolved");
        self.history.push(next);
        self.save();
        self.head()
    }

    fn head_mut(&mut self) -> &mut PromptVersion {
        self.history.last_mut().expect("ledger always holds genesis")
    }

    /// Persist the history; failures are logged and the in-memory state
    /// stays authoritative for this process.
    fn save(&self) {
        if let Err(e) = self.try_save() {
            warn!(path = %self.path.display(), error = %e, "failed to persist prompt ledger");
        }
    }

    fn try_save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.history)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn genesis() -> PromptVersion {
    PromptVersion {
        version_id: 0,
        content: prompts::GENESIS_ACTOR_PROMPT.to_string(),
        created_at: Utc::now(),
        parent_version: None,
        change_summary: "Genesis prompt".to_string(),
        runs: 0,
        successes: 0,
        success_rate: 0.0,
    }
}
