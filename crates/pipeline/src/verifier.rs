use async_trait::async_trait;
use common::config::VerifierConfig;
use common::errors::{RemedyError, RemedyResult};
use remedy_core::VerificationResult;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One stage of the verification battery. `check` returns `Ok(())` for a
/// pass and `Err(RemedyError::Validation { .. })` for a fail; any other
/// error is an infrastructure problem, not a verdict.
#[async_trait]
pub trait VerifierStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, file_path: &Path, content: &str) -> RemedyResult<()>;
}

/// Ordered verification battery. First failure short-circuits; a stage
/// that exceeds its budget counts as failed, and cancellation aborts
/// between stages.
pub struct Verifier {
    stages: Vec<Arc<dyn VerifierStage>>,
    stage_timeout: Duration,
}

impl Verifier {
    pub fn new(stages: Vec<Arc<dyn VerifierStage>>, config: &VerifierConfig) -> Self {
        Self {
            stages,
            stage_timeout: Duration::from_secs(config.stage_timeout_secs),
        }
    }

    pub async fn verify(
        &self,
        file_path: &Path,
        content: &str,
        cancel: &CancellationToken,
    ) -> RemedyResult<VerificationResult> {
        let started = Instant::now();
        for stage in &self.stages {
            if cancel.is_cancelled() {
                return Err(RemedyError::Timeout("verification cancelled".into()));
            }
            let elapsed_ms = || started.elapsed().as_millis() as u64;
            match tokio::time::timeout(self.stage_timeout, stage.check(file_path, content)).await {
                Ok(Ok(())) => {
                    debug!(stage = stage.name(), "stage passed");
                }
                Ok(Err(RemedyError::Validation { stage: s, detail })) => {
                    info!(stage = %s, %detail, "verification failed");
                    return Ok(VerificationResult::fail(s, detail, elapsed_ms()));
                }
                Ok(Err(other)) => return Err(other),
                Err(_) => {
                    info!(stage = stage.name(), "stage timed out, counted as failure");
                    return Ok(VerificationResult::fail(
                        stage.name(),
                        format!("exceeded {}s budget", self.stage_timeout.as_secs()),
                        elapsed_ms(),
                    ));
                }
            }
        }
        Ok(VerificationResult::pass(started.elapsed().as_millis() as u64))
    }
}

/// Cheap structural validity check: bracket/paren/brace balance and no
/// unterminated string on any line.
pub struct SyntaxStage;

#[async_trait]
impl VerifierStage for SyntaxStage {
    fn name(&self) -> &'static str {
        "syntax"
    }

    async fn check(&self, _file_path: &Path, content: &str) -> RemedyResult<()> {
        let mut depth: i64 = 0;
        for (i, ch) in content.chars().enumerate() {
            match ch {
                '{' | '(' | '[' => depth += 1,
                '}' | ')' | ']' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(RemedyError::Validation {
                            stage: "syntax".into(),
                            detail: format!("unbalanced close delimiter at offset {i}"),
                        });
                    }
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(RemedyError::Validation {
                stage: "syntax".into(),
                detail: format!("{depth} unclosed delimiters"),
            });
        }
        Ok(())
    }
}

/// Rejects content carrying unresolved merge markers or dynamic code
/// construction that a fix might have introduced.
pub struct LintStage;

const LINT_REJECT_MARKERS: &[&str] = &["<<<<<<<", ">>>>>>>", "eval(", "new Function"];

#[async_trait]
impl VerifierStage for LintStage {
    fn name(&self) -> &'static str {
        "lint"
    }

    async fn check(&self, _file_path: &Path, content: &str) -> RemedyResult<()> {
        for marker in LINT_REJECT_MARKERS {
            if content.contains(marker) {
                return Err(RemedyError::Validation {
                    stage: "lint".into(),
                    detail: format!("forbidden token {marker:?}"),
                });
            }
        }
        Ok(())
    }
}

/// Executes a set of already-selected test files. Implementations wrap
/// whatever harness the host project uses.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self, test_files: &[std::path::PathBuf]) -> RemedyResult<()>;
}

/// Runs only the test files relevant to the changed file, ranked by
/// dependency proximity: same directory and shared file stem score
/// highest, everything unrelated is skipped.
pub struct TestsStage {
    runner: Arc<dyn TestRunner>,
    known_tests: Vec<std::path::PathBuf>,
}

impl TestsStage {
    pub fn new(runner: Arc<dyn TestRunner>, known_tests: Vec<std::path::PathBuf>) -> Self {
        Self {
            runner,
            known_tests,
        }
    }

    fn proximity(changed: &Path, test: &Path) -> u32 {
        let mut score = 0;
        let stem = changed
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let test_name = test
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if !stem.is_empty() && test_name.contains(&stem) {
            score += 2;
        }
        if changed.parent() == test.parent() {
            score += 1;
        }
        score
    }

    fn select(&self, changed: &Path) -> Vec<std::path::PathBuf> {
        let mut ranked: Vec<(u32, &std::path::PathBuf)> = self
            .known_tests
            .iter()
            .map(|t| (Self::proximity(changed, t), t))
            .filter(|(score, _)| *score > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl VerifierStage for TestsStage {
    fn name(&self) -> &'static str {
        "tests"
    }

    async fn check(&self, file_path: &Path, _content: &str) -> RemedyResult<()> {
        let selected = self.select(file_path);
        if selected.is_empty() {
            debug!(file = %file_path.display(), "no related tests, stage passes vacuously");
            return Ok(());
        }
        self.runner.run(&selected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowStage;

    #[async_trait]
    impl VerifierStage for SlowStage {
        fn name(&self) -> &'static str {
            "tests"
        }

        async fn check(&self, _file_path: &Path, _content: &str) -> RemedyResult<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn battery(stages: Vec<Arc<dyn VerifierStage>>, timeout_secs: u64) -> Verifier {
        Verifier::new(
            stages,
            &VerifierConfig {
                stage_timeout_secs: timeout_secs,
                snapshot_grace_secs: 60,
            },
        )
    }

    #[tokio::test]
    async fn clean_content_passes_the_battery() {
        let verifier = battery(vec![Arc::new(SyntaxStage), Arc::new(LintStage)], 5);
        let result = verifier
            .verify(
                Path::new("a.rs"),
                "fn main() { let v = vec![1]; }\n",
                &CancellationToken::new(),
            )
            .await
            .expect("verify");
        assert!(result.passed);
        assert!(result.failed_stage.is_none());
    }

    #[tokio::test]
    async fn first_failure_short_circuits() {
        let verifier = battery(vec![Arc::new(SyntaxStage), Arc::new(LintStage)], 5);
        let result = verifier
            .verify(Path::new("a.rs"), "fn main() { }}\n", &CancellationToken::new())
            .await
            .expect("verify");
        assert!(!result.passed);
        assert_eq!(result.failed_stage.as_deref(), Some("syntax"));
    }

    #[tokio::test]
    async fn lint_rejects_dynamic_execution() {
        let verifier = battery(vec![Arc::new(LintStage)], 5);
        let result = verifier
            .verify(Path::new("a.js"), "eval(user_input)", &CancellationToken::new())
            .await
            .expect("verify");
        assert_eq!(result.failed_stage.as_deref(), Some("lint"));
    }

    #[tokio::test(start_paused = true)]
    async fn stage_timeout_counts_as_failure() {
        let verifier = battery(vec![Arc::new(SlowStage)], 1);
        let result = verifier
            .verify(Path::new("a.rs"), "fn main() {}", &CancellationToken::new())
            .await
            .expect("verify");
        assert!(!result.passed);
        assert_eq!(result.failed_stage.as_deref(), Some("tests"));
    }

    #[tokio::test]
    async fn related_tests_are_selected_by_proximity() {
        use std::path::PathBuf;
        use std::sync::Mutex as StdMutex;

        struct RecordingRunner {
            seen: StdMutex<Vec<PathBuf>>,
        }

        #[async_trait]
        impl TestRunner for RecordingRunner {
            async fn run(&self, test_files: &[PathBuf]) -> RemedyResult<()> {
                self.seen
                    .lock()
                    .expect("lock")
                    .extend(test_files.iter().cloned());
                Ok(())
            }
        }

        let runner = Arc::new(RecordingRunner {
            seen: StdMutex::new(Vec::new()),
        });
        let stage = TestsStage::new(
            runner.clone(),
            vec![
                PathBuf::from("tests/parser_test.rs"),
                PathBuf::from("tests/network_test.rs"),
            ],
        );
        stage
            .check(Path::new("src/parser.rs"), "")
            .await
            .expect("check");
        let seen = runner.seen.lock().expect("lock").clone();
        assert_eq!(seen, vec![PathBuf::from("tests/parser_test.rs")]);
    }

    #[tokio::test]
    async fn cancellation_aborts_between_stages() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let verifier = battery(vec![Arc::new(SyntaxStage)], 5);
        let err = verifier
            .verify(Path::new("a.rs"), "fn main() {}", &cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, RemedyError::Timeout(_)));
    }
}
