//! Core data model shared by every subsystem.
//!
//! A `Task` is frozen once constructed; retries never mutate the original
//! record — the orchestrator derives a per-attempt copy with an appended
//! feedback envelope instead. Ids are UUID v4 and join every artifact a
//! cycle produces.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Literal prefix of the feedback envelope appended on retries.
pub const FEEDBACK_HEADER: &str = "PREVIOUS FAILURE FEEDBACK:";

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Strict verdict classes for a sandbox execution.
///
/// `Error` is reserved for infrastructure problems (timeout, vendor
/// failure) and is distinct from `Failed`, which means the test runner ran
/// and reported assertion failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// A complete file body at a relative POSIX-style path.
///
/// There is no partial-diff representation anywhere in the loop; writes
/// replace the file at `file_path`, creating intermediate directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileArtifact {
    pub file_path: String,
    pub content: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "python".to_string()
}

impl FileArtifact {
    pub fn new(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            content: content.into(),
            language: default_language(),
        }
    }
}

/// A unit of work for the Actor: a feature request or bug report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub initial_files: Vec<FileArtifact>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            requirements: Vec::new(),
            initial_files: Vec::new(),
            status: TaskStatus::Pending,
        }
    }

    /// First 8 characters of the id, used in skill names and log lines.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }

    /// Derive the task used for a retry attempt: same record, with the
    /// prior attempt's output appended under the feedback header.
    ///
    /// The envelope is the only cross-attempt state carried inside the
    /// task payload.
    pub fn with_feedback(&self, feedback: &str) -> Self {
        let mut next = self.clone();
        next.description = format!("{}\n\n{FEEDBACK_HEADER}\n{feedback}", self.description);
        next
    }
}

/// A full-file replacement proposed by the Actor.
///
/// `explanation` is advisory chain-of-thought and is never executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Patch {
    pub file_path: String,
    pub full_content: String,
    #[serde(default)]
    pub explanation: String,
}

/// The Actor's proposed resolution for one attempt of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Solution {
    /// Always overwritten with the originating task's id by the Actor.
    #[serde(default)]
    pub task_id: String,
    pub patches: Vec<Patch>,
    #[serde(default)]
    pub reasoning: String,
}

/// The Arbiter's strict evaluation of a solution against the test files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub status: TestStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Wall-clock duration when measurable, else 0.
    pub duration_ms: u64,
}

/// A verified, reusable artifact extracted from a passing solution.
///
/// `name` is the identity: inserting a skill with an existing name
/// overwrites it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub code: String,
    pub docstring: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}
