//! End-to-end cycle scenarios over scripted agents.
//!
//! The Actor, Adversary and Arbiter are replaced with hand-rolled scripted
//! implementations of their traits; the prompt ledger, skill-memory seam
//! and state machine are the real ones, persisted under temp directories.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crucible::agents::{Actor, Adversary};
use crucible::arbiter::Arbiter;
use crucible::artifacts::DebugArtifacts;
use crucible::evolver::Evolver;
use crucible::gateway::{ChatModel, GatewayError};
use crucible::ledger::PromptLedger;
use crucible::memory::SkillMemory;
use crucible::orchestrator::{CycleEngine, CycleOutcome};
use crucible::types::{
    FileArtifact, Patch, Skill, Solution, Task, TestResult, TestStatus, FEEDBACK_HEADER,
};

// --- Scripted collaborators -------------------------------------------------

struct ScriptedActor {
    solutions: Mutex<VecDeque<Solution>>,
    seen_descriptions: Mutex<Vec<String>>,
    seen_task_ids: Mutex<Vec<String>>,
}

impl ScriptedActor {
    fn new(solutions: Vec<Solution>) -> Arc<Self> {
        Arc::new(Self {
            solutions: Mutex::new(solutions.into()),
            seen_descriptions: Mutex::new(Vec::new()),
            seen_task_ids: Mutex::new(Vec::new()),
        })
    }

    fn descriptions(&self) -> Vec<String> {
        self.seen_descriptions.lock().unwrap().clone()
    }

    fn task_ids(&self) -> Vec<String> {
        self.seen_task_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl Actor for ScriptedActor {
    async fn solve(&self, task: &Task) -> Result<Solution, GatewayError> {
        self.seen_descriptions
            .lock()
            .unwrap()
            .push(task.description.clone());
        self.seen_task_ids.lock().unwrap().push(task.id.clone());
        let mut solution = self
            .solutions
            .lock()
            .unwrap()
            .pop_front()
            .expect("actor called more times than scripted");
        solution.task_id = task.id.clone();
        Ok(solution)
    }
}

struct ScriptedAdversary {
    test_files: Vec<FileArtifact>,
}

#[async_trait]
impl Adversary for ScriptedAdversary {
    async fn generate_curriculum(&self, _difficulty: u8) -> Result<Task, GatewayError> {
        Ok(Task::new("scripted curriculum task"))
    }

    async fn generate_adversarial_tests(
        &self,
        _solution: &Solution,
    ) -> Result<Vec<FileArtifact>, GatewayError> {
        Ok(self.test_files.clone())
    }
}

struct ScriptedArbiter {
    results: Mutex<VecDeque<TestResult>>,
    executions: AtomicUsize,
}

impl ScriptedArbiter {
    fn new(results: Vec<TestResult>) -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(results.into()),
            executions: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Arbiter for ScriptedArbiter {
    async fn execute(&self, _files: &[FileArtifact], _test_files: &[FileArtifact]) -> TestResult {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .expect("arbiter called more times than scripted")
    }
}

struct RecordingMemory {
    stored: Mutex<Vec<Skill>>,
}

impl RecordingMemory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stored: Mutex::new(Vec::new()),
        })
    }

    fn stored(&self) -> Vec<Skill> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl SkillMemory for RecordingMemory {
    async fn store_skill(&self, skill: Skill) -> anyhow::Result<()> {
        self.stored.lock().unwrap().push(skill);
        Ok(())
    }

    async fn retrieve_relevant_skills(
        &self,
        _query: &str,
        _limit: usize,
    ) -> anyhow::Result<Vec<Skill>> {
        Ok(Vec::new())
    }
}

/// Evolver-side chat model: canned response plus a call counter.
struct EvolverChat {
    response: Option<String>,
    calls: AtomicUsize,
}

impl EvolverChat {
    fn evolving() -> Arc<Self> {
        Arc::new(Self {
            response: Some(
                r#"{"analysis": "the actor ignores edge cases", "optimized_prompt": "Cover every edge case before writing code.", "change_summary": "added edge-case rule"}"#
                    .to_string(),
            ),
            calls: AtomicUsize::new(0),
        })
    }

    fn unreachable_endpoint() -> Arc<Self> {
        Arc::new(Self {
            response: None,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChatModel for EvolverChat {
    async fn chat(&self, _system: &str, _user: &str) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Some(json) => Ok(json.clone()),
            None => Err(GatewayError::Transport {
                attempts: 1,
                message: "connection refused".into(),
            }),
        }
    }
}

// --- Fixtures ---------------------------------------------------------------

fn add_solution(body: &str) -> Solution {
    Solution {
        task_id: String::new(),
        patches: vec![Patch {
            file_path: "lib.py".into(),
            full_content: body.into(),
            explanation: "implements add".into(),
        }],
        reasoning: "sum the arguments".into(),
    }
}

fn empty_solution() -> Solution {
    Solution {
        task_id: String::new(),
        patches: vec![],
        reasoning: String::new(),
    }
}

fn adversary_with_tests() -> Arc<ScriptedAdversary> {
    Arc::new(ScriptedAdversary {
        test_files: vec![FileArtifact::new(
            "test_lib.py",
            "from lib import add\n\ndef test_add():\n    assert add(2, 3) == 5\n",
        )],
    })
}

fn passed() -> TestResult {
    TestResult {
        test_id: "exec-1".into(),
        status: TestStatus::Passed,
        stdout: "1 passed".into(),
        stderr: String::new(),
        exit_code: 0,
        duration_ms: 120,
    }
}

fn failed(stderr: &str) -> TestResult {
    TestResult {
        test_id: "exec-1".into(),
        status: TestStatus::Failed,
        stdout: "1 failed".into(),
        stderr: stderr.into(),
        exit_code: 1,
        duration_ms: 90,
    }
}

fn timed_out() -> TestResult {
    TestResult {
        test_id: "exec-1".into(),
        status: TestStatus::Error,
        stdout: String::new(),
        stderr: "Execution Timed Out".into(),
        exit_code: 124,
        duration_ms: 30_000,
    }
}

struct Harness {
    engine: CycleEngine,
    actor: Arc<ScriptedActor>,
    arbiter: Arc<ScriptedArbiter>,
    memory: Arc<RecordingMemory>,
    ledger: Arc<tokio::sync::Mutex<PromptLedger>>,
    evolver_chat: Arc<EvolverChat>,
    _dir: tempfile::TempDir,
}

fn harness(
    solutions: Vec<Solution>,
    results: Vec<TestResult>,
    max_attempts: u32,
    evolver_chat: Arc<EvolverChat>,
    seed_ledger: impl FnOnce(&mut PromptLedger),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let actor = ScriptedActor::new(solutions);
    let arbiter = ScriptedArbiter::new(results);
    let memory = RecordingMemory::new();

    let mut ledger = PromptLedger::open(dir.path().join("prompt_ledger.json"));
    seed_ledger(&mut ledger);
    let ledger = Arc::new(tokio::sync::Mutex::new(ledger));

    let engine = CycleEngine::new(
        actor.clone(),
        adversary_with_tests(),
        arbiter.clone(),
        memory.clone(),
        ledger.clone(),
        Evolver::new(evolver_chat.clone()),
        DebugArtifacts::new(dir.path().join("debug"), false),
        max_attempts,
        5,
    );

    Harness {
        engine,
        actor,
        arbiter,
        memory,
        ledger,
        evolver_chat,
        _dir: dir,
    }
}

// --- Scenarios --------------------------------------------------------------

#[tokio::test]
async fn happy_path_stores_one_skill_and_records_a_success() {
    let mut h = harness(
        vec![add_solution("def add(a, b):\n    return a + b\n")],
        vec![passed()],
        3,
        EvolverChat::unreachable_endpoint(),
        |_| {},
    );

    let outcome = h.engine.run_cycle(Some("write add(a,b)")).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Success);

    let stored = h.memory.stored();
    assert_eq!(stored.len(), 1);
    let task_id = &h.actor.task_ids()[0];
    assert_eq!(stored[0].name, format!("skill_{}", &task_id[..8]));
    assert_eq!(stored[0].docstring, "write add(a,b)");
    assert_eq!(
        stored[0].tags,
        vec!["verified".to_string(), "auto-generated".to_string()]
    );
    assert_eq!(stored[0].code, "def add(a, b):\n    return a + b");

    let ledger = h.ledger.lock().await;
    assert_eq!(ledger.head().runs, 1);
    assert_eq!(ledger.head().successes, 1);
}

#[tokio::test]
async fn fenced_patches_are_sanitized_before_the_arbiter() {
    let mut h = harness(
        vec![add_solution(
            "```python\ndef add(a, b):\n    return a + b\n```",
        )],
        vec![passed()],
        3,
        EvolverChat::unreachable_endpoint(),
        |_| {},
    );

    h.engine.run_cycle(Some("write add")).await.unwrap();
    let stored = h.memory.stored();
    assert_eq!(stored[0].code, "def add(a, b):\n    return a + b");
    assert!(!stored[0].code.contains("```"));
}

#[tokio::test]
async fn retry_carries_the_feedback_envelope_then_succeeds() {
    let mut h = harness(
        vec![
            add_solution("def add(a, b):\n    return a - b\n"),
            add_solution("def add(a, b):\n    return a + b\n"),
        ],
        vec![failed("AssertionError: assert -1 == 5"), passed()],
        3,
        EvolverChat::unreachable_endpoint(),
        |_| {},
    );

    let outcome = h.engine.run_cycle(Some("write add(a,b)")).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Success);

    let descriptions = h.actor.descriptions();
    assert_eq!(descriptions.len(), 2);
    assert!(!descriptions[0].contains(FEEDBACK_HEADER));
    assert!(descriptions[1].contains(FEEDBACK_HEADER));
    assert!(descriptions[1].contains("AssertionError: assert -1 == 5"));

    // Second attempt solved a derived task, not a mutated original.
    assert!(descriptions[1].starts_with("write add(a,b)"));
    assert_eq!(h.arbiter.executions.load(Ordering::SeqCst), 2);

    let ledger = h.ledger.lock().await;
    assert_eq!(ledger.head().runs, 1);
    assert_eq!(ledger.head().successes, 1);
}

#[tokio::test]
async fn give_up_after_max_attempts_stores_nothing() {
    let mut h = harness(
        vec![
            add_solution("wrong 1"),
            add_solution("wrong 2"),
            add_solution("wrong 3"),
        ],
        vec![
            failed("AssertionError one"),
            failed("AssertionError two"),
            failed("AssertionError three"),
        ],
        3,
        EvolverChat::unreachable_endpoint(),
        |_| {},
    );

    let outcome = h.engine.run_cycle(Some("impossible task")).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Failed);
    assert!(h.memory.stored().is_empty());
    assert_eq!(h.arbiter.executions.load(Ordering::SeqCst), 3);

    let ledger = h.ledger.lock().await;
    assert_eq!(ledger.head().runs, 1);
    assert_eq!(ledger.head().successes, 0);
}

#[tokio::test]
async fn timeout_feedback_reaches_the_next_attempt() {
    let mut h = harness(
        vec![add_solution("while True: pass"), add_solution("pass")],
        vec![timed_out(), failed("still wrong")],
        2,
        EvolverChat::unreachable_endpoint(),
        |_| {},
    );

    let outcome = h.engine.run_cycle(Some("terminate quickly")).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Failed);

    let descriptions = h.actor.descriptions();
    assert!(descriptions[1].contains(FEEDBACK_HEADER));
    assert!(descriptions[1].contains("Execution Timed Out"));
}

#[tokio::test]
async fn actor_without_patches_burns_an_attempt_with_synthesized_feedback() {
    let mut h = harness(
        vec![empty_solution(), empty_solution()],
        vec![],
        2,
        EvolverChat::unreachable_endpoint(),
        |_| {},
    );

    let outcome = h.engine.run_cycle(Some("anything")).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Failed);
    // The arbiter never ran; both attempts died in Solve.
    assert_eq!(h.arbiter.executions.load(Ordering::SeqCst), 0);

    let descriptions = h.actor.descriptions();
    assert!(descriptions[1].contains(FEEDBACK_HEADER));
    assert!(descriptions[1].contains("actor produced no patches"));
}

#[tokio::test]
async fn degraded_head_evolves_after_a_failed_cycle() {
    let mut h = harness(
        vec![add_solution("wrong")],
        vec![failed("AssertionError: broken again")],
        1,
        EvolverChat::evolving(),
        |ledger| {
            // Seed: 5 runs, 2 successes — evidenced and degraded.
            for i in 0..5 {
                ledger.record_run(i < 2);
            }
        },
    );

    let outcome = h.engine.run_cycle(Some("hard task")).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Failed);

    let ledger = h.ledger.lock().await;
    assert_eq!(ledger.versions().len(), 2);
    let head = ledger.head();
    assert_eq!(head.version_id, 1);
    assert_eq!(head.parent_version, Some(0));
    assert_eq!(head.runs, 0);
    assert_eq!(head.successes, 0);
    assert!(!head.change_summary.is_empty());
    // The run itself was recorded against the old head before evolution.
    assert_eq!(ledger.versions()[0].runs, 6);
}

#[tokio::test]
async fn no_evolution_below_the_run_threshold() {
    let mut h = harness(
        vec![add_solution("wrong")],
        vec![failed("AssertionError")],
        1,
        EvolverChat::evolving(),
        |ledger| {
            for _ in 0..3 {
                ledger.record_run(false);
            }
        },
    );

    let outcome = h.engine.run_cycle(Some("task")).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Failed);

    let ledger = h.ledger.lock().await;
    assert_eq!(ledger.versions().len(), 1);
    assert_eq!(ledger.head().runs, 4);
    // The hysteresis gate fired before any evolver model call.
    assert_eq!(h.evolver_chat.calls.load(Ordering::SeqCst), 0);
}
