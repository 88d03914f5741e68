//! Prompt Evolver: rewrites the Actor's instructions from failure data.
//!
//! The evolver only acts when the ledger's hysteresis gate opens. A failed
//! or empty evolution leaves the ledger exactly as it was — a broken
//! evolver must never lose a working prompt.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gateway::{self, ChatModel, GatewayError};
use crate::ledger::PromptLedger;
use crate::prompts;

/// Bounded window of failure logs shown to the evolver.
pub const FAILURE_WINDOW: usize = 5;

/// Structured output of one evolution call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PromptEvolution {
    /// Why the previous prompt failed.
    pub analysis: String,
    /// The new, improved system prompt.
    pub optimized_prompt: String,
    /// Brief summary of what changed.
    pub change_summary: String,
}

/// Drives prompt evolution against the ledger.
pub struct Evolver {
    model: Arc<dyn ChatModel>,
}

impl Evolver {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Possibly evolve the ledger head. Returns whether a new version was
    /// appended.
    pub async fn step(&self, ledger: &mut PromptLedger, recent_failures: &[String]) -> bool {
        if !ledger.should_evolve() {
            return false;
        }
        let head = ledger.head();
        info!(
            version = head.version_id,
            runs = head.runs,
            success_rate = head.success_rate,
            "prompt performance degraded — evolving"
        );

        match self
            .evolve_prompt(ledger.current_prompt(), recent_failures)
            .await
        {
            Ok(evolution) if evolution.optimized_prompt.trim().is_empty() => {
                warn!("evolver returned an empty prompt — ledger unchanged");
                false
            }
            Ok(evolution) => {
                info!(summary = %evolution.change_summary, "prompt evolution accepted");
                ledger.append_version(evolution.optimized_prompt, evolution.change_summary);
                true
            }
            Err(e) => {
                warn!(error = %e, "prompt evolution failed — ledger unchanged");
                false
            }
        }
    }

    async fn evolve_prompt(
        &self,
        current_prompt: &str,
        recent_failures: &[String],
    ) -> Result<PromptEvolution, GatewayError> {
        let window = recent_failures
            .iter()
            .take(FAILURE_WINDOW)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");

        let user = format!(
            "### Current system prompt:\n{current_prompt}\n\n\
             ### Recent failure logs:\n{window}\n\n\
             Rewrite the system prompt to fix these recurring errors."
        );
        gateway::extract::<PromptEvolution>(self.model.as_ref(), prompts::EVOLVER_PREAMBLE, &user)
            .await
    }
}
