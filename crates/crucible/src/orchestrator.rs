//! Cycle orchestration: Solve → Attack → Verify with bounded retries.
//!
//! One `run_cycle` call takes a task from generation to a terminal
//! verdict. The original task record is never mutated; retries solve a
//! derived copy carrying the previous attempt's output in a feedback
//! envelope. On success exactly one skill is consolidated; on any
//! terminal verdict the prompt ledger records the run, and terminal
//! failures give the evolver a chance to rewrite the Actor's prompt.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::agents::{Actor, Adversary};
use crate::arbiter::Arbiter;
use crate::artifacts::DebugArtifacts;
use crate::evolver::{Evolver, FAILURE_WINDOW};
use crate::gateway::GatewayError;
use crate::ledger::PromptLedger;
use crate::memory::SkillMemory;
use crate::metrics::RunMetrics;
use crate::sanitize::{strip_code_fences, truncate_middle, MAX_FEEDBACK_BYTES};
use crate::state::{CycleState, CycleStateMachine};
use crate::types::{FileArtifact, Skill, Task, TestResult, TestStatus};

/// Cap on each stderr entry kept in the cross-cycle failure window.
const FAILURE_ENTRY_CAP_BYTES: usize = 2 * 1024;

/// Terminal verdict of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Success,
    Failed,
}

/// Drives cycles across the Actor, Adversary, Arbiter and memory.
pub struct CycleEngine {
    actor: Arc<dyn Actor>,
    adversary: Arc<dyn Adversary>,
    arbiter: Arc<dyn Arbiter>,
    memory: Arc<dyn SkillMemory>,
    ledger: Arc<Mutex<PromptLedger>>,
    evolver: Evolver,
    artifacts: DebugArtifacts,
    max_attempts: u32,
    difficulty: u8,
    /// Bounded window of recent failure output, carried across cycles to
    /// feed prompt evolution.
    recent_failures: VecDeque<String>,
}

impl CycleEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        actor: Arc<dyn Actor>,
        adversary: Arc<dyn Adversary>,
        arbiter: Arc<dyn Arbiter>,
        memory: Arc<dyn SkillMemory>,
        ledger: Arc<Mutex<PromptLedger>>,
        evolver: Evolver,
        artifacts: DebugArtifacts,
        max_attempts: u32,
        difficulty: u8,
    ) -> Self {
        Self {
            actor,
            adversary,
            arbiter,
            memory,
            ledger,
            evolver,
            artifacts,
            max_attempts: max_attempts.max(1),
            difficulty,
            recent_failures: VecDeque::new(),
        }
    }

    /// Execute one full cycle. With no description, the Adversary's
    /// curriculum generator supplies the task.
    ///
    /// Budget exhaustion aborts the cycle with an error; everything else
    /// resolves to a terminal `CycleOutcome`.
    pub async fn run_cycle(&mut self, task_description: Option<&str>) -> Result<CycleOutcome> {
        let mut machine = CycleStateMachine::new();

        let task = match task_description {
            Some(description) => {
                let task = Task::new(description);
                info!(task_id = %task.id, "starting user task");
                task
            }
            None => {
                let task = self.adversary.generate_curriculum(self.difficulty).await?;
                info!(task_id = %task.id, "starting autonomous task");
                task
            }
        };
        self.artifacts.save(
            &task.id,
            "task_definition",
            &format!(
                "Description: {}\nRequirements: {:?}",
                task.description, task.requirements
            ),
            "txt",
        );

        let mut attempts = 0u32;
        let mut previous_feedback: Option<String> = None;
        let mut attempt_results: Vec<TestResult> = Vec::new();
        let mut success = false;

        while attempts < self.max_attempts && !success {
            attempts += 1;
            machine.set_attempt(attempts);
            machine.advance(CycleState::Solve, previous_feedback.as_deref().map(|_| "retrying with feedback"))?;
            info!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                task_id = %task.id,
                "attempt started"
            );

            // The only cross-attempt state inside the task payload.
            let attempt_task = match &previous_feedback {
                Some(feedback) => task.with_feedback(feedback),
                None => task.clone(),
            };

            // --- Solve ---
            let solution = match self.actor.solve(&attempt_task).await {
                Ok(solution) if !solution.patches.is_empty() => solution,
                Ok(_) => {
                    warn!(attempt = attempts, "actor produced no patches");
                    previous_feedback = Some("actor produced no patches".to_string());
                    self.fail_agent_attempt(&mut machine, attempts, "actor produced no patches")?;
                    continue;
                }
                Err(e @ GatewayError::BudgetExceeded { .. }) => {
                    error!(error = %e, "budget exhausted — aborting cycle");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "actor failed");
                    previous_feedback = Some("actor produced no patches".to_string());
                    self.fail_agent_attempt(&mut machine, attempts, "actor failure")?;
                    continue;
                }
            };

            // --- Attack ---
            machine.advance(CycleState::Attack, None)?;
            let adversarial_tests = match self.adversary.generate_adversarial_tests(&solution).await
            {
                Ok(tests) => tests,
                Err(e @ GatewayError::BudgetExceeded { .. }) => {
                    error!(error = %e, "budget exhausted — aborting cycle");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "adversary failed");
                    previous_feedback = Some("adversary produced no tests".to_string());
                    self.fail_agent_attempt(&mut machine, attempts, "adversary failure")?;
                    continue;
                }
            };

            // --- Verify ---
            machine.advance(CycleState::Verify, None)?;
            let source_files: Vec<FileArtifact> = solution
                .patches
                .iter()
                .map(|p| FileArtifact::new(p.file_path.as_str(), strip_code_fences(&p.full_content)))
                .collect();
            let test_files: Vec<FileArtifact> = adversarial_tests
                .iter()
                .map(|t| FileArtifact::new(t.file_path.as_str(), strip_code_fences(&t.content)))
                .collect();

            let result = self.arbiter.execute(&source_files, &test_files).await;

            if result.status == TestStatus::Passed {
                machine.advance(CycleState::Consolidate, Some("all adversarial tests passed"))?;
                self.consolidate(&task, &source_files).await;
                attempt_results.push(result);
                success = true;
            } else {
                warn!(
                    attempt = attempts,
                    status = %result.status,
                    exit_code = result.exit_code,
                    "verification failed"
                );
                let combined = format!("STDOUT:\n{}\n\nSTDERR:\n{}", result.stdout, result.stderr);
                self.artifacts.save(
                    &task.id,
                    &format!("attempt_{attempts}_failure_log"),
                    &combined,
                    "log",
                );
                self.push_failure(&result);
                previous_feedback = Some(truncate_middle(&combined, MAX_FEEDBACK_BYTES));

                if attempts >= self.max_attempts {
                    machine.advance(CycleState::GiveUp, Some("attempts exhausted"))?;
                } else {
                    machine.advance(CycleState::Retry, Some("verification failed"))?;
                }
                attempt_results.push(result);
            }
        }

        tracing::debug!(
            task_id = %task.id,
            transitions = machine.history().len(),
            terminal = %machine.current(),
            "cycle state machine closed"
        );
        self.finish_cycle(&task, success, &attempt_results, attempts)
            .await;
        if success {
            Ok(CycleOutcome::Success)
        } else {
            Ok(CycleOutcome::Failed)
        }
    }

    /// Route an agent failure (model error, empty output) through the
    /// state machine, giving up when this was the last attempt.
    fn fail_agent_attempt(
        &self,
        machine: &mut CycleStateMachine,
        attempts: u32,
        reason: &str,
    ) -> Result<()> {
        machine.advance(CycleState::Retry, Some(reason))?;
        if attempts >= self.max_attempts {
            machine.advance(CycleState::GiveUp, Some("attempts exhausted"))?;
        }
        Ok(())
    }

    /// Build and store the skill for a verified solution.
    ///
    /// Only the first patch becomes the skill body; multi-file solutions
    /// are verified in full but memorized by their primary file.
    async fn consolidate(&self, task: &Task, source_files: &[FileArtifact]) {
        let code = source_files
            .first()
            .map(|f| f.content.clone())
            .unwrap_or_default();
        let skill = Skill {
            name: format!("skill_{}", task.short_id()),
            code,
            docstring: task.description.clone(),
            tags: vec!["verified".to_string(), "auto-generated".to_string()],
            embedding: None,
        };

        self.artifacts
            .save(&task.id, "final_solution_code", &skill.code, "py");
        if let Ok(json) = serde_json::to_string_pretty(&skill) {
            self.artifacts
                .save(&task.id, "final_solution_skill", &json, "json");
        }

        if let Err(e) = self.memory.store_skill(skill).await {
            warn!(error = %e, "skill store failed — verified solution not memorized");
        }
    }

    /// Ledger bookkeeping, evolution, and cycle-level reporting.
    async fn finish_cycle(
        &mut self,
        task: &Task,
        success: bool,
        attempt_results: &[TestResult],
        attempts: u32,
    ) {
        {
            let mut ledger = self.ledger.lock().await;
            ledger.record_run(success);
        }

        if !success {
            self.artifacts.save(&task.id, "final_status", "FAILED", "txt");
            let window: Vec<String> = self.recent_failures.iter().cloned().collect();
            let mut ledger = self.ledger.lock().await;
            if self.evolver.step(&mut ledger, &window).await {
                info!(version = ledger.head().version_id, "actor prompt evolved");
            }
        }

        let metrics = RunMetrics::from_results(attempt_results);
        let outcomes: Vec<bool> = attempt_results
            .iter()
            .map(|r| r.status == TestStatus::Passed)
            .collect();
        info!(
            task_id = %task.id,
            attempts,
            passed = metrics.passed,
            failed = metrics.failed,
            errors = metrics.errors,
            skipped = metrics.skipped,
            success_rate = metrics.success_rate,
            avg_duration_ms = metrics.avg_duration_ms,
            pass_at_k = crate::metrics::pass_at_k(&outcomes),
            "cycle metrics"
        );

        if success {
            info!(task_id = %task.id, "cycle complete: success");
        } else {
            warn!(task_id = %task.id, "cycle complete: failed");
        }
    }

    /// Keep a bounded window of failure output for the evolver.
    fn push_failure(&mut self, result: &TestResult) {
        let output = if result.stderr.trim().is_empty() {
            &result.stdout
        } else {
            &result.stderr
        };
        if self.recent_failures.len() >= FAILURE_WINDOW {
            self.recent_failures.pop_front();
        }
        self.recent_failures
            .push_back(truncate_middle(output, FAILURE_ENTRY_CAP_BYTES));
    }
}
