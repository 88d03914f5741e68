//! Crucible: an adversarial self-improvement loop for coding agents.
//!
//! One cycle drives a task through Solve (Actor generates patches) →
//! Attack (Adversary synthesizes killer tests) → Verify (Arbiter executes
//! both in a disposable sandbox) with bounded retries and failure feedback.
//! Verified solutions are consolidated into a semantically indexed skill
//! store; a versioned prompt ledger rewrites the Actor's instructions when
//! its success rate degrades.

pub mod agents;
pub mod arbiter;
pub mod artifacts;
pub mod config;
pub mod cost;
pub mod embeddings;
pub mod evolver;
pub mod gateway;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod prompts;
pub mod rerank;
pub mod sandbox;
pub mod sanitize;
pub mod state;
pub mod types;
pub mod vector_store;
