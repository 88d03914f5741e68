//! The Adversary: curriculum generation and killer-test synthesis.
//!
//! Two jobs, one stance — break the Actor. `generate_curriculum` invents
//! tasks at a declared difficulty tier; `generate_adversarial_tests`
//! receives a full `Solution` and produces failing-first tests aimed at
//! the edge cases its reasoning glossed over.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gateway::{self, ChatModel, GatewayError};
use crate::prompts;
use crate::types::{FileArtifact, Solution, Task};

/// Shape the model fills in for a curriculum task.
///
/// The id and status never come from the model: a fresh collision-resistant
/// id is assigned and the status is normalized to pending on construction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct CurriculumDraft {
    description: String,
    #[serde(default)]
    requirements: Vec<String>,
    #[serde(default)]
    initial_files: Vec<FileArtifact>,
}

/// Structured attack plan returned by the model.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AdversarialTestPlan {
    /// Complete, standalone test sources.
    pub test_files: Vec<FileArtifact>,
    #[serde(default)]
    pub explanation: String,
}

/// The critic-agent boundary used by the orchestrator.
#[async_trait]
pub trait Adversary: Send + Sync {
    /// Generate a new task at the given difficulty (clamped to 1..=10).
    async fn generate_curriculum(&self, difficulty: u8) -> Result<Task, GatewayError>;

    /// Generate tests designed to break the given solution.
    async fn generate_adversarial_tests(
        &self,
        solution: &Solution,
    ) -> Result<Vec<FileArtifact>, GatewayError>;
}

/// Production Adversary over the model gateway.
pub struct CrucibleAdversary {
    model: Arc<dyn ChatModel>,
}

impl CrucibleAdversary {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Adversary for CrucibleAdversary {
    async fn generate_curriculum(&self, difficulty: u8) -> Result<Task, GatewayError> {
        let difficulty = difficulty.clamp(1, 10);
        info!(difficulty, "generating curriculum task");

        let draft: CurriculumDraft = gateway::extract(
            self.model.as_ref(),
            &prompts::curriculum_preamble(difficulty),
            "Generate a new task. Return it as a structured object.",
        )
        .await?;

        let mut task = Task::new(draft.description);
        task.requirements = draft.requirements;
        task.initial_files = draft.initial_files;
        info!(task_id = %task.id, "curriculum task generated");
        Ok(task)
    }

    async fn generate_adversarial_tests(
        &self,
        solution: &Solution,
    ) -> Result<Vec<FileArtifact>, GatewayError> {
        info!(task_id = %solution.task_id, "generating adversarial tests");

        let patch_content: String = solution
            .patches
            .iter()
            .map(|p| format!("--- {} ---\n{}\n", p.file_path, p.full_content))
            .collect();
        let user = format!(
            "### Author's reasoning:\n{}\n\n### Proposed files:\n{}\n\
             Write pytest files that expose flaws in this solution.",
            solution.reasoning, patch_content
        );

        let plan: AdversarialTestPlan = gateway::extract(
            self.model.as_ref(),
            prompts::ADVERSARY_ATTACK_PREAMBLE,
            &user,
        )
        .await?;

        info!(
            task_id = %solution.task_id,
            test_files = plan.test_files.len(),
            "adversarial test plan ready"
        );
        Ok(plan.test_files)
    }
}
