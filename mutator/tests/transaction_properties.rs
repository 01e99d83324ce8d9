//! Cycle-level tests for the transactional guarantees of `run_cycle`.
//!
//! Each test drives one or more full cycles against a scratch project with
//! scripted proposer and test collaborators, then checks the tree, the stall
//! state and the artifacts left in `.mutator/`.

use std::fs;
use std::process::Command;

use mutator::core::error::{AcquisitionError, CycleStartError};
use mutator::core::types::{TestOutcome, TransactionStatus};
use mutator::cycle::{reset_stall, run_cycle};
use mutator::io::audit::{AuditEntry, AuditLog};
use mutator::io::config::ValidateConfig;
use mutator::io::lock::TreeLock;
use mutator::io::validator::{TestRequest, TestRunner};
use mutator::test_support::{ScriptedSource, ScriptedTestRunner, TestTree};

const WRITE_X2: &str =
    r#"{"action":"modify_files","changes":[{"path":"a.py","content":"x = 2\n"}]}"#;

fn passing() -> ScriptedTestRunner {
    ScriptedTestRunner::always(TestOutcome::Pass)
}

fn tree_with_a() -> TestTree {
    let tree = TestTree::new();
    tree.write("a.py", "x = 1\n");
    tree
}

/// Verifies a syntax failure rolls the edited file back byte-for-byte.
#[test]
fn syntax_error_is_rolled_back() {
    let tree = tree_with_a();
    let source = ScriptedSource::new(vec![
        r#"{"action":"modify_files","changes":[{"path":"a.py","content":"x = 1\nsyntax error here((("}]}"#,
    ]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert!(outcome.reason.contains("syntax error in a.py"), "{}", outcome.reason);
    assert_eq!(tree.read("a.py"), "x = 1\n");
    assert!(outcome.changed_files.is_empty());
    assert_eq!(tree.stall_state().consecutive_failures, 1);
}

/// Verifies a valid write is committed and left on disk.
#[test]
fn valid_write_is_committed() {
    let tree = tree_with_a();
    let source = ScriptedSource::new(vec![WRITE_X2]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::Committed);
    assert_eq!(outcome.changed_files, vec!["a.py".to_string()]);
    assert_eq!(tree.read("a.py"), "x = 2\n");
    let state = tree.stall_state();
    assert_eq!(state.consecutive_failures, 0);
    assert!(state.last_proposal_digest.is_some());
    assert_eq!(state.next_cycle, 2);
}

/// Verifies a patch that matches nothing commits with an empty diff and a warning.
#[test]
fn unmatched_patch_commits_without_changes() {
    let tree = tree_with_a();
    let source = ScriptedSource::new(vec![
        r#"{"action":"patch_files","changes":[{"path":"a.py","search":"ZZZ","replace":"YYY"}]}"#,
    ]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::Committed);
    assert!(outcome.changed_files.is_empty());
    assert!(outcome.reason.contains("matched nothing"), "{}", outcome.reason);
    assert_eq!(tree.read("a.py"), "x = 1\n");
    assert!(!tree.paths().cycles_dir.join("1").join("changes.diff").exists());
    // A commit that changes nothing is not progress.
    assert_eq!(tree.stall_state().consecutive_failures, 1);
}

/// Verifies a path outside the root is rejected and nothing is written anywhere.
#[test]
fn escaping_path_is_rejected() {
    let tree = tree_with_a();
    let before = tree.files();
    let source = ScriptedSource::new(vec![
        r#"{"action":"modify_files","changes":[{"path":"../outside.py","content":"evil"}]}"#,
    ]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert!(outcome.reason.contains("PathEscape"), "{}", outcome.reason);
    let parent = tree.root().parent().expect("parent");
    assert!(!parent.join("outside.py").exists());
    assert_eq!(tree.files(), before);
}

/// Verifies engine state is never a valid target.
#[test]
fn protected_path_is_rejected() {
    let tree = tree_with_a();
    let config_before = fs::read_to_string(&tree.paths().config_path).expect("config");
    let source = ScriptedSource::new(vec![
        r#"{"action":"modify_files","changes":[{"path":".mutator/config.toml","content":"stall_limit = 99\n"}]}"#,
    ]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert!(outcome.reason.contains("Protected"), "{}", outcome.reason);
    let config_after = fs::read_to_string(&tree.paths().config_path).expect("config");
    assert_eq!(config_after, config_before);
}

/// Verifies rollback removes created files and directories and restores edits.
#[test]
fn rollback_restores_tree_exactly() {
    let tree = tree_with_a();
    tree.write("lib/util.py", "def f():\n    return 1\n");
    let before = tree.files();
    let source = ScriptedSource::new(vec![
        r#"{"action":"create_files","changes":[
            {"path":"pkg/deep/new.py","content":"y = 1\n"},
            {"path":"lib/util.py","content":"def f(:\n"}
        ]}"#,
    ]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert_eq!(tree.files(), before);
    assert!(!tree.exists("pkg/deep/new.py"));
    assert!(!tree.exists("pkg"));
    assert_eq!(tree.read("lib/util.py"), "def f():\n    return 1\n");
}

/// Verifies a failing test suite rolls back an otherwise valid change.
#[test]
fn test_failure_rolls_back() {
    let tree = tree_with_a();
    tree.update_config(|cfg| cfg.validate.test_command = vec!["pytest".to_string()]);
    let source = ScriptedSource::new(vec![WRITE_X2]);
    let tests = ScriptedTestRunner::always(TestOutcome::Fail);

    let outcome = run_cycle(tree.root(), &source, &tests).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert!(outcome.reason.contains("test suite failed"), "{}", outcome.reason);
    assert_eq!(tests.calls(), 1);
    assert_eq!(tree.read("a.py"), "x = 1\n");
}

struct PanickingRunner;

impl TestRunner for PanickingRunner {
    fn run(&self, _request: &TestRequest) -> anyhow::Result<TestOutcome> {
        panic!("runner exploded");
    }
}

/// Verifies a panic inside validation still ends in a rollback.
#[test]
fn validator_panic_rolls_back() {
    let tree = tree_with_a();
    tree.update_config(|cfg| cfg.validate.test_command = vec!["pytest".to_string()]);
    let source = ScriptedSource::new(vec![WRITE_X2]);

    let outcome = run_cycle(tree.root(), &source, &PanickingRunner).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert!(outcome.reason.contains("runner exploded"), "{}", outcome.reason);
    assert_eq!(tree.read("a.py"), "x = 1\n");
}

/// Verifies committed content is what the next cycle's proposer sees.
#[test]
fn commit_is_visible_to_next_cycle() {
    let tree = tree_with_a();
    let source = ScriptedSource::new(vec![
        WRITE_X2,
        r#"{"action":"modify_files","changes":[{"path":"a.py","content":"x = 3\n"}]}"#,
    ]);

    run_cycle(tree.root(), &source, &passing()).expect("cycle 1");
    run_cycle(tree.root(), &source, &passing()).expect("cycle 2");

    let prompts = source.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("x = 1"));
    assert!(prompts[1].contains("x = 2"));
    assert!(!prompts[1].contains("x = 1"));
    // History from cycle 1 reaches the proposer in cycle 2.
    assert!(prompts[1].contains("cycle 1 committed"));
    assert_eq!(tree.read("a.py"), "x = 3\n");
}

/// Verifies a proposal identical to the last committed one is skipped untouched.
#[test]
fn repeated_proposal_is_skipped() {
    let tree = tree_with_a();
    let source = ScriptedSource::repeating(WRITE_X2);
    let tests = passing();

    let first = run_cycle(tree.root(), &source, &tests).expect("cycle 1");
    tree.write("a.py", "x = 1\n");
    let second = run_cycle(tree.root(), &source, &tests).expect("cycle 2");

    assert_eq!(first.status, TransactionStatus::Committed);
    assert_eq!(second.status, TransactionStatus::SkippedRedundant);
    assert_eq!(tree.read("a.py"), "x = 1\n");
    assert_eq!(tree.stall_state().consecutive_failures, 1);
}

/// Verifies the stall limit skips the proposer until the counter is reset.
#[test]
fn stall_limit_halts_until_reset() {
    let tree = tree_with_a();
    let source = ScriptedSource::failing(AcquisitionError::Failed("exit 1: boom".to_string()));
    let tests = passing();

    for _ in 0..3 {
        let outcome = run_cycle(tree.root(), &source, &tests).expect("cycle");
        assert_eq!(outcome.status, TransactionStatus::NoProposal);
    }
    let calls_before_stall = source.calls();

    let stalled = run_cycle(tree.root(), &source, &tests).expect("stalled cycle");
    assert_eq!(stalled.status, TransactionStatus::SkippedStalled);
    assert!(stalled.human_help.is_some());
    assert_eq!(source.calls(), calls_before_stall);
    assert_eq!(tree.stall_state().consecutive_failures, 3);

    let cleared = reset_stall(tree.root()).expect("reset");
    assert_eq!(cleared.consecutive_failures, 0);
    let resumed = run_cycle(tree.root(), &source, &tests).expect("resumed cycle");
    assert_eq!(resumed.status, TransactionStatus::NoProposal);
    assert!(source.calls() > calls_before_stall);
}

/// Verifies a reply that is not a valid action is not retried and changes nothing.
#[test]
fn malformed_reply_yields_no_proposal() {
    let tree = tree_with_a();
    let before = tree.files();
    let source = ScriptedSource::new(vec!["print('hello')"]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::NoProposal);
    assert!(outcome.reason.contains("malformed"), "{}", outcome.reason);
    assert_eq!(source.calls(), 1);
    assert_eq!(tree.files(), before);
}

/// Verifies executable code is refused while the sandbox is disabled.
#[test]
fn legacy_code_is_refused_without_sandbox() {
    let tree = tree_with_a();
    tree.update_config(|cfg| cfg.mode = mutator::core::proposal::ReplyMode::Legacy);
    let source = ScriptedSource::new(vec!["open('a.py', 'w').write('x = 9\\n')"]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert!(outcome.reason.contains("ExecutionDisabled"), "{}", outcome.reason);
    assert_eq!(tree.read("a.py"), "x = 1\n");
}

/// Verifies a human-help request commits trivially and surfaces the message.
#[test]
fn human_help_is_surfaced() {
    let tree = tree_with_a();
    let source = ScriptedSource::new(vec![
        r#"{"action":"human_help","message_to_human":"Which parser should I target?"}"#,
    ]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::Committed);
    assert_eq!(
        outcome.human_help.as_deref(),
        Some("Which parser should I target?")
    );
    assert_eq!(tree.stall_state().consecutive_failures, 1);
}

/// Verifies each cycle leaves its artifacts and one audit record.
#[test]
fn cycle_writes_artifacts_and_audit_record() {
    let tree = tree_with_a();
    let source = ScriptedSource::new(vec![WRITE_X2]);

    run_cycle(tree.root(), &source, &passing()).expect("cycle");

    let cycle_dir = tree.paths().cycles_dir.join("1");
    for name in [
        "request.md",
        "reply.txt",
        "proposal.json",
        "outcome.json",
        "changes.diff",
    ] {
        assert!(cycle_dir.join(name).exists(), "missing {name}");
    }
    let diff = fs::read_to_string(cycle_dir.join("changes.diff")).expect("diff");
    assert!(diff.contains("-x = 1"));
    assert!(diff.contains("+x = 2"));

    let audit = AuditLog::new(&tree.paths().audit_path, &tree.config().audit);
    let entries = audit.read_entries().expect("entries");
    let transactions: Vec<_> = entries
        .iter()
        .filter_map(|entry| match entry {
            AuditEntry::Transaction {
                cycle,
                outcome_status,
                changed_files,
                ..
            } => Some((*cycle, *outcome_status, changed_files.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(
        transactions,
        vec![(1, TransactionStatus::Committed, vec!["a.py".to_string()])]
    );
}

/// Verifies a held lock refuses to start a second cycle.
#[test]
fn held_lock_refuses_cycle() {
    let tree = tree_with_a();
    let _held = TreeLock::acquire(&tree.paths().lock_path).expect("lock");
    let source = ScriptedSource::new(vec![WRITE_X2]);

    let err = run_cycle(tree.root(), &source, &passing()).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<CycleStartError>(),
        Some(CycleStartError::Locked { .. })
    ));
    assert_eq!(source.calls(), 0);
    assert_eq!(tree.read("a.py"), "x = 1\n");
}

/// Verifies rollback restores tracked files that are not valid UTF-8 byte-for-byte.
#[test]
fn rollback_restores_non_utf8_file_bytes() {
    let tree = tree_with_a();
    let notes = tree.root().join("notes.txt");
    fs::write(&notes, b"caf\xe9\n").expect("write notes");
    let source = ScriptedSource::new(vec![
        r#"{"action":"modify_files","changes":[
            {"path":"notes.txt","content":"new\n"},
            {"path":"a.py","content":"x = (\n"}
        ]}"#,
    ]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::RolledBack);
    assert_eq!(tree.read("a.py"), "x = 1\n");
    assert_eq!(fs::read(&notes).expect("read notes"), b"caf\xe9\n");
}

/// Verifies a patch replacement containing `$` is written literally.
#[test]
fn patch_replacement_keeps_dollar_signs() {
    let tree = TestTree::new();
    tree.write("a.py", "price = 0\nlabel = 0\n");
    let source = ScriptedSource::new(vec![
        r#"{"action":"patch_files","changes":[{"path":"a.py","search":"^label = 0$","replace":"label = '$price'"}]}"#,
    ]);

    let outcome = run_cycle(tree.root(), &source, &passing()).expect("cycle");

    assert_eq!(outcome.status, TransactionStatus::Committed);
    assert_eq!(tree.read("a.py"), "price = 0\nlabel = '$price'\n");
}

/// Verifies cycles checked with the built-in python3 parser roll back a
/// broken file, commit a valid one and leave no bytecode behind.
#[test]
fn default_python_check_gates_commits() {
    if !Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
    {
        eprintln!("python3 not on PATH; skipping");
        return;
    }
    let tree = tree_with_a();
    tree.update_config(|cfg| cfg.validate.checks = ValidateConfig::default().checks);
    let source = ScriptedSource::new(vec![
        r#"{"action":"modify_files","changes":[{"path":"a.py","content":"x = 1\nsyntax error here((("}]}"#,
        WRITE_X2,
    ]);

    let broken = run_cycle(tree.root(), &source, &passing()).expect("cycle 1");
    assert_eq!(broken.status, TransactionStatus::RolledBack);
    assert!(broken.reason.contains("SyntaxError"), "{}", broken.reason);
    assert_eq!(tree.read("a.py"), "x = 1\n");

    let valid = run_cycle(tree.root(), &source, &passing()).expect("cycle 2");
    assert_eq!(valid.status, TransactionStatus::Committed);
    assert_eq!(tree.read("a.py"), "x = 2\n");
    assert!(!tree.root().join("__pycache__").exists());
}
