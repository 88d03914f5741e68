//! Sandbox Arbiter: strict, exit-code-driven verdicts on generated code.
//!
//! Every execution gets a fresh lease, a hard wall-clock timeout enforced
//! here (not only by the vendor), and a classification that depends solely
//! on the exit code — never on which vendor branch returned it. The lease
//! is released on every exit path; release failures are logged, never
//! propagated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::sandbox::{SandboxError, SandboxLease, SandboxProvider};
use crate::sanitize::truncate_middle;
use crate::types::{FileArtifact, TestResult, TestStatus};

/// Hard wall-clock timeout default for one test run.
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Cap on captured stdout/stderr carried in a `TestResult`.
const OUTPUT_CAP_BYTES: usize = 64 * 1024;

/// Exit code pytest uses when no tests were collected.
const NO_TESTS_EXIT: i32 = 5;
/// Conventional exit code for a killed, overtime process.
const TIMEOUT_EXIT: i32 = 124;

const TEST_COMMAND: &str = "python -m pytest . -v -p no:cacheprovider --tb=short";
const INSTALL_COMMAND: &str = "pip install -r requirements.txt";

/// Verdict boundary used by the orchestrator.
#[async_trait]
pub trait Arbiter: Send + Sync {
    /// Execute `files` + `test_files` in a fresh environment and classify
    /// the outcome. Infrastructure problems fold into `TestStatus::Error`
    /// rather than propagating.
    async fn execute(&self, files: &[FileArtifact], test_files: &[FileArtifact]) -> TestResult;
}

/// Production arbiter over a sandbox vendor.
pub struct SandboxArbiter {
    provider: Arc<dyn SandboxProvider>,
    timeout: Duration,
}

impl SandboxArbiter {
    pub fn new(provider: Arc<dyn SandboxProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    async fn run_leased(
        &self,
        lease: &dyn SandboxLease,
        execution_id: &str,
        files: &[FileArtifact],
        test_files: &[FileArtifact],
        started: Instant,
    ) -> TestResult {
        for file in files.iter().chain(test_files.iter()) {
            if let Err(e) = lease.write_file(&file.file_path, &file.content).await {
                warn!(execution_id, path = %file.file_path, error = %e, "file write failed");
                return infra_error(
                    execution_id,
                    format!("Infrastructure Error: failed to write {}: {e}", file.file_path),
                    elapsed_ms(started),
                );
            }
        }

        if files.iter().any(|f| f.file_path == "requirements.txt") {
            info!(execution_id, "installing dependencies");
            match tokio::time::timeout(self.timeout, lease.run_command(INSTALL_COMMAND, self.timeout))
                .await
            {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    // Install failures are infrastructure, not test failures.
                    let detail = match e {
                        SandboxError::CommandExit { stderr, .. } => stderr,
                        other => other.to_string(),
                    };
                    return infra_error(
                        execution_id,
                        format!("Infrastructure Error: dependency install failed: {detail}"),
                        elapsed_ms(started),
                    );
                }
                Err(_) => return timeout_result(execution_id, self.timeout),
            }
        }

        info!(execution_id, command = TEST_COMMAND, "running tests");
        match tokio::time::timeout(self.timeout, lease.run_command(TEST_COMMAND, self.timeout)).await
        {
            // Arbiter-enforced wall clock fired first.
            Err(_elapsed) => timeout_result(execution_id, self.timeout),
            Ok(Ok(output)) => classify(
                execution_id,
                output.exit_code,
                output.stdout,
                output.stderr,
                elapsed_ms(started),
            ),
            // Nonzero exits arrive on the vendor's error branch but carry
            // the same fields; classify them by exit code all the same.
            Ok(Err(SandboxError::CommandExit {
                stdout,
                stderr,
                exit_code,
            })) => classify(execution_id, exit_code, stdout, stderr, elapsed_ms(started)),
            Ok(Err(SandboxError::Timeout(_))) => timeout_result(execution_id, self.timeout),
            Ok(Err(e)) => infra_error(
                execution_id,
                format!("Infrastructure Error: {e}"),
                elapsed_ms(started),
            ),
        }
    }
}

#[async_trait]
impl Arbiter for SandboxArbiter {
    async fn execute(&self, files: &[FileArtifact], test_files: &[FileArtifact]) -> TestResult {
        let execution_id = format!("exec-{}", Uuid::new_v4());
        let started = Instant::now();
        info!(
            execution_id = %execution_id,
            files = files.len(),
            test_files = test_files.len(),
            "spawning sandbox"
        );

        let lease = match self.provider.lease().await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "sandbox lease failed");
                return infra_error(
                    &execution_id,
                    format!("Infrastructure Error: {e}"),
                    elapsed_ms(started),
                );
            }
        };

        let result = self
            .run_leased(lease.as_ref(), &execution_id, files, test_files, started)
            .await;

        // Cleanup on every exit path; never propagate release failures.
        if let Err(e) = lease.release().await {
            warn!(execution_id = %execution_id, sandbox = lease.id(), error = %e, "sandbox release failed");
        }

        info!(
            execution_id = %execution_id,
            status = %result.status,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "arbiter verdict"
        );
        result
    }
}

/// Classify an execution purely by its exit code.
pub fn classify(
    test_id: &str,
    exit_code: i32,
    stdout: String,
    stderr: String,
    duration_ms: u64,
) -> TestResult {
    let status = match exit_code {
        0 => TestStatus::Passed,
        NO_TESTS_EXIT => TestStatus::Skipped,
        TIMEOUT_EXIT => TestStatus::Error,
        _ => TestStatus::Failed,
    };
    TestResult {
        test_id: test_id.to_string(),
        status,
        stdout: truncate_middle(&stdout, OUTPUT_CAP_BYTES),
        stderr: truncate_middle(&stderr, OUTPUT_CAP_BYTES),
        exit_code,
        duration_ms,
    }
}

fn timeout_result(test_id: &str, timeout: Duration) -> TestResult {
    TestResult {
        test_id: test_id.to_string(),
        status: TestStatus::Error,
        stdout: String::new(),
        stderr: "Execution Timed Out".to_string(),
        exit_code: TIMEOUT_EXIT,
        duration_ms: timeout.as_millis() as u64,
    }
}

fn infra_error(test_id: &str, stderr: String, duration_ms: u64) -> TestResult {
    TestResult {
        test_id: test_id.to_string(),
        status: TestStatus::Error,
        stdout: String::new(),
        stderr,
        exit_code: 1,
        duration_ms,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ExecOutput;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc as StdArc;
    use std::sync::Mutex;

    /// What the scripted lease should do when the test command runs.
    #[derive(Clone)]
    enum Script {
        Exit {
            stdout: &'static str,
            stderr: &'static str,
            code: i32,
        },
        Hang,
        VendorFailure,
    }

    struct ScriptedLease {
        script: Script,
        released: StdArc<AtomicBool>,
        written: StdArc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl SandboxLease for ScriptedLease {
        fn id(&self) -> &str {
            "sb-test"
        }

        async fn write_file(&self, path: &str, _content: &str) -> Result<(), SandboxError> {
            self.written.lock().unwrap().push(path.to_string());
            Ok(())
        }

        async fn run_command(
            &self,
            command: &str,
            _timeout: Duration,
        ) -> Result<ExecOutput, SandboxError> {
            // Dependency installs succeed in every script.
            if command.starts_with("pip install") {
                return Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                });
            }
            match &self.script {
                Script::Exit {
                    stdout,
                    stderr,
                    code: 0,
                } => Ok(ExecOutput {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    exit_code: 0,
                }),
                Script::Exit {
                    stdout,
                    stderr,
                    code,
                } => Err(SandboxError::CommandExit {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    exit_code: *code,
                }),
                Script::Hang => {
                    // Longer than any arbiter timeout used in tests.
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!("hang script should be cancelled by the arbiter timeout")
                }
                Script::VendorFailure => Err(SandboxError::Vendor {
                    status: 500,
                    message: "microvm pool exhausted".into(),
                }),
            }
        }

        async fn release(&self) -> Result<(), SandboxError> {
            self.released.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct ScriptedProvider {
        script: Script,
        released: StdArc<AtomicBool>,
        written: StdArc<Mutex<Vec<String>>>,
        leases: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Script) -> Self {
            Self {
                script,
                released: StdArc::new(AtomicBool::new(false)),
                written: StdArc::new(Mutex::new(Vec::new())),
                leases: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SandboxProvider for ScriptedProvider {
        async fn lease(&self) -> Result<Box<dyn SandboxLease>, SandboxError> {
            self.leases.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedLease {
                script: self.script.clone(),
                released: self.released.clone(),
                written: self.written.clone(),
            }))
        }
    }

    fn files() -> Vec<FileArtifact> {
        vec![FileArtifact::new("lib.py", "def add(a, b):\n    return a + b\n")]
    }

    fn tests_files() -> Vec<FileArtifact> {
        vec![FileArtifact::new(
            "test_lib.py",
            "from lib import add\n\ndef test_add():\n    assert add(2, 3) == 5\n",
        )]
    }

    #[test]
    fn classification_follows_the_exit_code_table() {
        assert_eq!(
            classify("t", 0, String::new(), String::new(), 0).status,
            TestStatus::Passed
        );
        assert_eq!(
            classify("t", 1, String::new(), String::new(), 0).status,
            TestStatus::Failed
        );
        assert_eq!(
            classify("t", 5, String::new(), String::new(), 0).status,
            TestStatus::Skipped
        );
        assert_eq!(
            classify("t", 124, String::new(), String::new(), 0).status,
            TestStatus::Error
        );
        assert_eq!(
            classify("t", 2, String::new(), String::new(), 0).status,
            TestStatus::Failed
        );
    }

    #[tokio::test]
    async fn passing_run_is_classified_passed_and_released() {
        let provider = StdArc::new(ScriptedProvider::new(Script::Exit {
            stdout: "2 passed",
            stderr: "",
            code: 0,
        }));
        let arbiter = SandboxArbiter::new(provider.clone(), Duration::from_secs(30));

        let result = arbiter.execute(&files(), &tests_files()).await;
        assert_eq!(result.status, TestStatus::Passed);
        assert_eq!(result.exit_code, 0);
        assert!(provider.released.load(Ordering::SeqCst));

        let written = provider.written.lock().unwrap();
        assert_eq!(*written, vec!["lib.py".to_string(), "test_lib.py".to_string()]);
    }

    #[tokio::test]
    async fn nonzero_exit_from_the_error_branch_is_failed_not_error() {
        let provider = StdArc::new(ScriptedProvider::new(Script::Exit {
            stdout: "1 failed",
            stderr: "AssertionError: assert 4 == 5",
            code: 1,
        }));
        let arbiter = SandboxArbiter::new(provider.clone(), Duration::from_secs(30));

        let result = arbiter.execute(&files(), &tests_files()).await;
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("AssertionError"));
        assert!(provider.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn no_tests_collected_is_skipped() {
        let provider = StdArc::new(ScriptedProvider::new(Script::Exit {
            stdout: "no tests ran",
            stderr: "",
            code: 5,
        }));
        let arbiter = SandboxArbiter::new(provider, Duration::from_secs(30));

        let result = arbiter.execute(&[], &[]).await;
        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.exit_code, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn overtime_execution_yields_error_124_and_still_releases() {
        let provider = StdArc::new(ScriptedProvider::new(Script::Hang));
        let arbiter = SandboxArbiter::new(provider.clone(), Duration::from_secs(30));

        let result = arbiter.execute(&files(), &tests_files()).await;
        assert_eq!(result.status, TestStatus::Error);
        assert_eq!(result.exit_code, 124);
        assert_eq!(result.stderr, "Execution Timed Out");
        assert!(provider.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn vendor_failure_is_error_exit_1() {
        let provider = StdArc::new(ScriptedProvider::new(Script::VendorFailure));
        let arbiter = SandboxArbiter::new(provider.clone(), Duration::from_secs(30));

        let result = arbiter.execute(&files(), &tests_files()).await;
        assert_eq!(result.status, TestStatus::Error);
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("Infrastructure Error"));
        assert!(provider.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn consecutive_executions_use_fresh_leases() {
        let provider = StdArc::new(ScriptedProvider::new(Script::Exit {
            stdout: "ok",
            stderr: "",
            code: 0,
        }));
        let arbiter = SandboxArbiter::new(provider.clone(), Duration::from_secs(30));

        arbiter.execute(&files(), &tests_files()).await;
        arbiter.execute(&files(), &tests_files()).await;
        assert_eq!(provider.leases.load(Ordering::SeqCst), 2);
    }
}
