//! Post-apply validation: static syntax checks, then the optional test suite.
//!
//! Both stages only read the tree. The first failure short-circuits.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::syntax::{SyntaxCheck, check_in_process};
use crate::core::types::{TestOutcome, ValidationResult};
use crate::io::config::ValidateConfig;
use crate::io::process::{run_command_with_timeout, truncate_log};
use crate::io::snapshot::Snapshot;

/// Parameters for one test-suite run.
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub workdir: PathBuf,
    pub command: Vec<String>,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Abstraction over test-suite execution.
pub trait TestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestOutcome>;
}

/// Runs the configured test command as a child process.
pub struct CommandTestRunner;

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &TestRequest) -> Result<TestOutcome> {
        let (program, args) = request
            .command
            .split_first()
            .context("test command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        let output = run_command_with_timeout(
            cmd,
            None,
            request.timeout,
            request.output_limit_bytes,
        )
        .with_context(|| format!("run test command {program}"))?;
        write_test_log(
            &request.log_path,
            &output.render_log("tests"),
            request.output_limit_bytes,
        )?;

        if output.success() {
            Ok(TestOutcome::Pass)
        } else {
            warn!(exit = %output.exit_description(), "test suite failed");
            Ok(TestOutcome::Fail)
        }
    }
}

/// Inputs for [`validate`].
#[derive(Debug, Clone, Copy)]
pub struct ValidateRequest<'a> {
    pub root: &'a Path,
    /// Post-apply image of the tracked tree.
    pub tree: &'a Snapshot,
    pub cfg: &'a ValidateConfig,
    /// Remaining cycle budget for the test suite.
    pub test_timeout: Duration,
    pub test_log_path: &'a Path,
}

/// Validate the tree: syntax first, then tests.
#[instrument(skip_all, fields(files = request.tree.len()))]
pub fn validate<T: TestRunner>(request: &ValidateRequest<'_>, tests: &T) -> ValidationResult {
    if let Err(failure) = check_syntax(request) {
        warn!(failure = %failure, "syntax check failed");
        return ValidationResult::failed(failure);
    }

    if request.cfg.test_command.is_empty() {
        debug!("no test command configured");
        return ValidationResult::passed();
    }

    let test_request = TestRequest {
        workdir: request.root.to_path_buf(),
        command: request.cfg.test_command.clone(),
        log_path: request.test_log_path.to_path_buf(),
        timeout: request.test_timeout,
        output_limit_bytes: request.cfg.output_limit_bytes,
    };
    match tests.run(&test_request) {
        Ok(TestOutcome::Pass) => {
            info!("test suite passed");
            ValidationResult::passed()
        }
        Ok(TestOutcome::Fail) => ValidationResult::failed(format!(
            "test suite failed (see {})",
            request.test_log_path.display()
        )),
        Err(err) => ValidationResult::failed(format!("test suite could not run: {err:#}")),
    }
}

fn check_syntax(request: &ValidateRequest<'_>) -> Result<(), String> {
    for (rel, content) in request.tree.files() {
        let Some(check) = Path::new(rel)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| request.cfg.checks.get(ext))
        else {
            continue;
        };
        let outcome = match check_in_process(check, content) {
            Some(outcome) => outcome,
            None => run_command_check(request, check, rel),
        };
        outcome.map_err(|detail| format!("syntax error in {rel}: {detail}"))?;
        debug!(path = %rel, "syntax ok");
    }
    Ok(())
}

fn run_command_check(
    request: &ValidateRequest<'_>,
    check: &SyntaxCheck,
    rel: &str,
) -> Result<(), String> {
    let SyntaxCheck::Command { command } = check else {
        return Ok(());
    };
    let abs = request.root.join(rel);
    let argv: Vec<String> = command
        .iter()
        .map(|arg| arg.replace("{path}", &abs.to_string_lossy()))
        .collect();
    let Some((program, args)) = argv.split_first() else {
        return Err("empty check command".to_string());
    };
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(request.root);

    let output = run_command_with_timeout(
        cmd,
        None,
        Duration::from_secs(request.cfg.check_timeout_secs),
        request.cfg.output_limit_bytes,
    )
    .map_err(|err| format!("check command {program} could not run: {err:#}"))?;
    if output.success() {
        return Ok(());
    }
    let detail = output.last_line();
    Err(if detail.is_empty() {
        output.exit_description()
    } else {
        detail
    })
}

fn write_test_log(path: &Path, log: &str, output_limit: usize) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create test log dir {}", parent.display()))?;
    }
    fs::write(path, truncate_log(log, output_limit))
        .with_context(|| format!("write test log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::io::config::FilterConfig;
    use crate::io::snapshot::{SnapshotStore, load_filter};

    struct FakeTestRunner {
        outcome: TestOutcome,
        calls: Cell<u32>,
    }

    impl TestRunner for FakeTestRunner {
        fn run(&self, _request: &TestRequest) -> Result<TestOutcome> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.outcome)
        }
    }

    fn fake(outcome: TestOutcome) -> FakeTestRunner {
        FakeTestRunner {
            outcome,
            calls: Cell::new(0),
        }
    }

    fn delimiter_config() -> ValidateConfig {
        let mut cfg = ValidateConfig::default();
        cfg.checks.insert(
            "py".to_string(),
            SyntaxCheck::Delimiters {
                line_comment: Some("#".to_string()),
            },
        );
        cfg
    }

    fn run<T: TestRunner>(root: &Path, cfg: &ValidateConfig, tests: &T) -> ValidationResult {
        let filter = load_filter(root, &FilterConfig::default()).expect("filter");
        let tree = SnapshotStore::new(root, filter).capture();
        let log_path = root.join(".mutator").join("tests.log");
        validate(
            &ValidateRequest {
                root,
                tree: &tree,
                cfg,
                test_timeout: Duration::from_secs(10),
                test_log_path: &log_path,
            },
            tests,
        )
    }

    #[test]
    fn clean_tree_passes_without_test_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.py"), "x = 1\n").expect("write");
        fs::write(temp.path().join("c.json"), "{}").expect("write");
        let tests = fake(TestOutcome::Fail);
        let result = run(temp.path(), &delimiter_config(), &tests);
        assert_eq!(result, ValidationResult::passed());
        assert_eq!(tests.calls.get(), 0);
    }

    #[test]
    fn syntax_failure_short_circuits_tests() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("a.py"), "x = 1\nsyntax error here(((").expect("write");
        let mut cfg = delimiter_config();
        cfg.test_command = vec!["true".to_string()];
        let tests = fake(TestOutcome::Pass);
        let result = run(temp.path(), &cfg, &tests);
        assert!(!result.ok);
        assert!(result.failures[0].starts_with("syntax error in a.py"));
        assert_eq!(tests.calls.get(), 0);
    }

    #[test]
    fn invalid_json_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("data.json"), "{\"a\":").expect("write");
        let result = run(temp.path(), &delimiter_config(), &fake(TestOutcome::Pass));
        assert!(result.failures[0].contains("data.json"));
    }

    #[test]
    fn failing_suite_fails_validation() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = delimiter_config();
        cfg.test_command = vec!["pytest".to_string()];
        let tests = fake(TestOutcome::Fail);
        let result = run(temp.path(), &cfg, &tests);
        assert!(!result.ok);
        assert!(result.failures[0].starts_with("test suite failed"));
        assert_eq!(tests.calls.get(), 1);
    }

    #[test]
    fn command_checks_substitute_the_file_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("good.py"), "ok\n").expect("write");
        fs::write(temp.path().join("bad.py"), "BAD\n").expect("write");
        let mut cfg = ValidateConfig::default();
        cfg.checks.insert(
            "py".to_string(),
            SyntaxCheck::Command {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "if grep -q BAD \"$1\"; then echo \"bad token in $1\" >&2; exit 1; fi"
                        .to_string(),
                    "check".to_string(),
                    "{path}".to_string(),
                ],
            },
        );
        let result = run(temp.path(), &cfg, &fake(TestOutcome::Pass));
        assert!(!result.ok);
        assert!(result.failures[0].starts_with("syntax error in bad.py: bad token in"));
    }

    fn python3_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success())
    }

    /// Verifies the built-in `py` check parses with python3 and writes no
    /// bytecode next to the checked file.
    #[test]
    fn default_python_check_parses_with_python3() {
        if !python3_available() {
            eprintln!("python3 not on PATH; skipping");
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = ValidateConfig::default();

        fs::write(temp.path().join("a.py"), "x = 1\nsyntax error here(((").expect("write");
        let result = run(temp.path(), &cfg, &fake(TestOutcome::Pass));
        assert!(!result.ok);
        assert!(
            result.failures[0].starts_with("syntax error in a.py: SyntaxError"),
            "{:?}",
            result.failures
        );

        fs::write(temp.path().join("a.py"), "x = 2\n").expect("write");
        let result = run(temp.path(), &cfg, &fake(TestOutcome::Pass));
        assert_eq!(result, ValidationResult::passed());
        assert!(!temp.path().join("__pycache__").exists());
    }

    #[test]
    fn command_runner_writes_log_and_reports_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let request = TestRequest {
            workdir: temp.path().to_path_buf(),
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo 1 failed; exit 1".to_string(),
            ],
            log_path: temp.path().join("logs").join("tests.log"),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 1_000,
        };
        let outcome = CommandTestRunner.run(&request).expect("run");
        assert_eq!(outcome, TestOutcome::Fail);
        let log = fs::read_to_string(&request.log_path).expect("log");
        assert!(log.contains("1 failed"));
    }
}
