//! Session cost accounting with a hard budget cap.
//!
//! Token counts are estimated at len/4 — precise enough to stop a runaway
//! loop, which is the only job this ledger has. Spend is persisted so the
//! cap holds across process restarts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-1K-token USD prices, input then output.
const PRICING: &[(&str, f64, f64)] = &[
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-4o", 0.005, 0.015),
    ("gpt-3.5-turbo", 0.0005, 0.0015),
];
const DEFAULT_PRICING: (f64, f64) = (0.01, 0.03);

/// Accumulated usage for the ledger's lifetime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCost {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
}

/// Tracks model spend against a hard USD cap.
#[derive(Debug)]
pub struct CostLedger {
    path: PathBuf,
    session: SessionCost,
    budget_limit_usd: f64,
}

/// Rough token count for a piece of text.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() / 4) as u64
}

impl CostLedger {
    /// Load prior spend from `path`; a missing or corrupt file starts the
    /// session at zero.
    pub fn open(path: impl AsRef<Path>, budget_limit_usd: f64) -> Self {
        let path = path.as_ref().to_path_buf();
        let session = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt cost ledger — starting fresh");
                SessionCost::default()
            }),
            Err(_) => SessionCost::default(),
        };
        Self {
            path,
            session,
            budget_limit_usd,
        }
    }

    /// Record one model call's usage and persist.
    pub fn record_usage(&mut self, model: &str, input_tokens: u64, output_tokens: u64) {
        let (input_price, output_price) = PRICING
            .iter()
            .find(|(name, _, _)| *name == model)
            .map(|(_, i, o)| (*i, *o))
            .unwrap_or(DEFAULT_PRICING);

        let cost = (input_tokens as f64 / 1000.0) * input_price
            + (output_tokens as f64 / 1000.0) * output_price;

        self.session.input_tokens += input_tokens;
        self.session.output_tokens += output_tokens;
        self.session.total_tokens += input_tokens + output_tokens;
        self.session.total_cost_usd += cost;

        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), error = %e, "failed to persist cost ledger");
        }
    }

    /// `Some((spent, limit))` when the cap has been reached.
    pub fn over_budget(&self) -> Option<(f64, f64)> {
        (self.session.total_cost_usd >= self.budget_limit_usd)
            .then_some((self.session.total_cost_usd, self.budget_limit_usd))
    }

    pub fn session(&self) -> &SessionCost {
        &self.session
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
