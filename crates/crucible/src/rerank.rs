//! Model-driven second-stage filter over vector-store candidates.
//!
//! The vector store returns candidates by cosine similarity; the re-ranker
//! asks a model to pick the genuinely relevant subset. Every failure mode
//! degrades to the similarity ordering — a broken re-ranker must never
//! make retrieval worse than single-stage.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::gateway::{self, ChatModel};
use crate::prompts;
use crate::types::Skill;

/// Structured output of the re-ranking call.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReRankSelection {
    /// Ids of the selected skills, most relevant first.
    pub selected_ids: Vec<String>,
    pub reasoning: String,
}

/// Second-stage retrieval filter.
pub struct ReRanker {
    model: Arc<dyn ChatModel>,
}

impl ReRanker {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Filter `candidates` down to at most `top_k` skills.
    ///
    /// A candidate list of length ≤ `top_k` is returned unchanged without
    /// a model call. Unknown ids in the model's selection are dropped; an
    /// empty intersection or a failed call falls back to the top `top_k`
    /// by similarity order.
    pub async fn rerank(&self, query: &str, candidates: Vec<Skill>, top_k: usize) -> Vec<Skill> {
        if candidates.len() <= top_k {
            return candidates;
        }

        let listing: String = candidates
            .iter()
            .map(|s| format!("ID: {}\nDocstring: {}\n", s.name, s.docstring))
            .collect();
        let user = format!(
            "### Task:\n{query}\n\n### Candidate skills:\n{listing}\n\
             Select the top {top_k} skills most likely to help solve the task."
        );

        match gateway::extract::<ReRankSelection>(
            self.model.as_ref(),
            prompts::RERANK_PREAMBLE,
            &user,
        )
        .await
        {
            Ok(selection) => {
                // Preserve the model's order; drop ids it hallucinated.
                let mut picked: Vec<Skill> = Vec::new();
                for id in &selection.selected_ids {
                    if picked.iter().any(|s| &s.name == id) {
                        continue;
                    }
                    if let Some(skill) = candidates.iter().find(|c| &c.name == id) {
                        picked.push(skill.clone());
                    }
                }
                if picked.is_empty() {
                    warn!("re-rank selected no known ids — keeping similarity order");
                    return candidates.into_iter().take(top_k).collect();
                }
                picked.truncate(top_k);
                info!(
                    selected = picked.len(),
                    from = candidates.len(),
                    "re-rank complete"
                );
                picked
            }
            Err(e) => {
                warn!(error = %e, "re-rank failed — keeping similarity order");
                candidates.into_iter().take(top_k).collect()
            }
        }
    }
}
