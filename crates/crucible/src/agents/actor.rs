//! The Actor: consumes a task, retrieves skills, produces a `Solution`.
//!
//! The Actor's system prompt is the prompt ledger's head — never a
//! hard-coded constant — so evolution takes effect on the very next solve.
//! Memory failures degrade to an empty skill list; a task must remain
//! solvable when retrieval is down.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::gateway::{self, ChatModel, GatewayError};
use crate::ledger::PromptLedger;
use crate::memory::SkillMemory;
use crate::prompts;
use crate::types::{Solution, Task};

/// How many skills are pulled into the solve context.
const SKILL_RETRIEVAL_LIMIT: usize = 3;

/// The builder-agent boundary used by the orchestrator.
#[async_trait]
pub trait Actor: Send + Sync {
    async fn solve(&self, task: &Task) -> Result<Solution, GatewayError>;
}

/// Production Actor over the model gateway and skill memory.
pub struct CrucibleActor {
    model: Arc<dyn ChatModel>,
    memory: Arc<dyn SkillMemory>,
    ledger: Arc<Mutex<PromptLedger>>,
}

impl CrucibleActor {
    pub fn new(
        model: Arc<dyn ChatModel>,
        memory: Arc<dyn SkillMemory>,
        ledger: Arc<Mutex<PromptLedger>>,
    ) -> Self {
        Self {
            model,
            memory,
            ledger,
        }
    }
}

#[async_trait]
impl Actor for CrucibleActor {
    async fn solve(&self, task: &Task) -> Result<Solution, GatewayError> {
        info!(task_id = %task.id, "actor received task");

        let skills = match self
            .memory
            .retrieve_relevant_skills(&task.description, SKILL_RETRIEVAL_LIMIT)
            .await
        {
            Ok(skills) => skills,
            Err(e) => {
                warn!(error = %e, "skill retrieval failed — solving without memory");
                Vec::new()
            }
        };

        let head_prompt = {
            let ledger = self.ledger.lock().await;
            ledger.current_prompt().to_string()
        };
        let system = format!(
            "{head_prompt}\n\n### Memory (learned skills):\n{}",
            prompts::format_skills(&skills)
        );
        let user = prompts::format_task_context(task);

        let mut solution: Solution = gateway::extract(self.model.as_ref(), &system, &user).await?;
        // The model may echo a stale or invented id; the task is the truth.
        solution.task_id = task.id.clone();

        info!(
            task_id = %task.id,
            patches = solution.patches.len(),
            "actor produced solution"
        );
        Ok(solution)
    }
}
