//! System prompt constants for each agent role, plus context formatters.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content
//! changes, so a logged agent response can be traced back to the exact
//! instructions that produced it. The Actor's prompt is NOT here — it
//! lives in the prompt ledger and evolves; `GENESIS_ACTOR_PROMPT` is only
//! the version-0 seed.

use crate::types::{Skill, Task};

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.0.0";

/// Version-0 content of the prompt ledger.
pub const GENESIS_ACTOR_PROMPT: &str = "\
You are Crucible, an elite autonomous software engineer.
Your goal is to solve the given task by producing complete file contents.
Analyze the requirements, consult your learned skills, and write robust,
well-tested code. Every patch must be a full file body at its path — no
partial snippets, no placeholders, no markdown fences.";

/// Adversary preamble for killer-test generation.
pub const ADVERSARY_ATTACK_PREAMBLE: &str = "\
You are a red-team security engineer and QA lead.
You receive a proposed solution (reasoning plus full file contents) and
produce tests designed to BREAK it: edge cases, boundary conditions,
invalid inputs, and states the author did not consider. Each test file
must be a complete, standalone pytest source. Assert the behavior the
task actually requires, so a correct implementation passes and a flawed
one fails. No conversational wrapping, no markdown fences.";

/// Evolver preamble for prompt rewriting.
pub const EVOLVER_PREAMBLE: &str = "\
You are a prompt engineer optimizing the system prompt of an autonomous
code agent. The agent is failing tasks. Analyze the failure logs to find
the root cause, diagnose why the current prompt failed to prevent it, and
rewrite the prompt to explicitly address those weaknesses. Keep the
rewritten prompt concise but strict.";

/// Re-ranker preamble for second-stage skill retrieval.
pub const RERANK_PREAMBLE: &str = "\
You are a senior engineer acting as a retrieval system.
Given a task and a list of candidate skills, select the ones most likely
to help solve the task and discard the rest. Return only skill ids that
appear in the candidate list.";

/// Difficulty-tiered preamble for curriculum generation.
pub fn curriculum_preamble(difficulty: u8) -> String {
    format!(
        "You are the taskmaster for an autonomous software engineer.\n\
         Generate a coding challenge that pushes the agent's limits.\n\
         Current difficulty level: {difficulty}/10.\n\n\
         - Level 1-3: basic algorithms and data structures.\n\
         - Level 4-7: system design, APIs, multi-file refactoring.\n\
         - Level 8-10: concurrency, security vulnerabilities, performance optimization.",
    )
}

/// Format retrieved skills for injection into the Actor's system prompt.
pub fn format_skills(skills: &[Skill]) -> String {
    if skills.is_empty() {
        return "No relevant past skills found.".to_string();
    }
    let mut out = String::new();
    for (i, skill) in skills.iter().enumerate() {
        out.push_str(&format!(
            "[Skill #{}: {}]\nDescription: {}\nCode:\n{}\n\n",
            i + 1,
            skill.name,
            skill.docstring,
            skill.code,
        ));
    }
    out.trim_end().to_string()
}

/// Format the task body (description, requirements, files) for the Actor.
pub fn format_task_context(task: &Task) -> String {
    let mut out = String::new();
    out.push_str(&format!("### Task:\n{}\n\n", task.description));

    if !task.requirements.is_empty() {
        out.push_str("### Requirements:\n");
        for req in &task.requirements {
            out.push_str(&format!("- {req}\n"));
        }
        out.push('\n');
    }

    if !task.initial_files.is_empty() {
        out.push_str("### Current codebase:\n");
        for file in &task.initial_files {
            out.push_str(&format!("--- {} ---\n{}\n\n", file.file_path, file.content));
        }
    }

    out.push_str("Provide your solution now.");
    out
}
