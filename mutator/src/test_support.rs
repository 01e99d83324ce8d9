//! Test-only helpers: a scratch project tree and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::Result;

use crate::core::error::AcquisitionError;
use crate::core::stall::StallState;
use crate::core::syntax::SyntaxCheck;
use crate::core::types::TestOutcome;
use crate::io::config::{EngineConfig, load_config, write_config};
use crate::io::init::{EnginePaths, InitOptions, init_engine};
use crate::io::snapshot::{SnapshotStore, load_filter};
use crate::io::source::{ProposalRequest, ProposalSource};
use crate::io::stall_store::load_stall_state;
use crate::io::validator::{TestRequest, TestRunner};

/// An initialized project in a temp directory.
///
/// Python files are checked with the in-process delimiter scan and proposer
/// retries do not sleep, so tests need no external toolchain.
pub struct TestTree {
    temp: tempfile::TempDir,
}

impl TestTree {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let tree = Self { temp };
        init_engine(tree.root(), &InitOptions::default()).expect("init engine");
        tree.update_config(|cfg| {
            cfg.proposer.command = vec!["true".to_string()];
            cfg.proposer.backoff_ms = 0;
            cfg.validate.checks.insert(
                "py".to_string(),
                SyntaxCheck::Delimiters {
                    line_comment: Some("#".to_string()),
                },
            );
        });
        tree
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> EnginePaths {
        EnginePaths::new(self.root())
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write file");
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).expect("read file")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.root().join(rel).exists()
    }

    /// Current tracked files and contents.
    pub fn files(&self) -> BTreeMap<String, String> {
        let cfg = self.config();
        let filter = load_filter(self.root(), &cfg.filter).expect("filter");
        SnapshotStore::new(self.root(), filter)
            .capture()
            .files()
            .clone()
    }

    pub fn config(&self) -> EngineConfig {
        load_config(&self.paths().config_path).expect("load config")
    }

    pub fn update_config(&self, update: impl FnOnce(&mut EngineConfig)) {
        let mut cfg = self.config();
        update(&mut cfg);
        write_config(&self.paths().config_path, &cfg).expect("write config");
    }

    pub fn stall_state(&self) -> StallState {
        load_stall_state(&self.paths().stall_path).expect("load stall state")
    }
}

impl Default for TestTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Proposal source that replays canned replies in order.
pub struct ScriptedSource {
    replies: RefCell<VecDeque<Result<String, AcquisitionError>>>,
    repeat_last: bool,
    calls: Cell<u32>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::from_results(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn from_results(replies: Vec<Result<String, AcquisitionError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            repeat_last: false,
            calls: Cell::new(0),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// Return `reply` on every call.
    pub fn repeating(reply: &str) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![reply])
        }
    }

    /// Fail every call with `err`.
    pub fn failing(err: AcquisitionError) -> Self {
        Self {
            repeat_last: true,
            ..Self::from_results(vec![Err(err)])
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    /// Requests received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl ProposalSource for ScriptedSource {
    fn propose(&self, request: &ProposalRequest) -> Result<String, AcquisitionError> {
        self.calls.set(self.calls.get() + 1);
        self.prompts.borrow_mut().push(request.prompt.clone());
        let mut replies = self.replies.borrow_mut();
        let next = if self.repeat_last && replies.len() == 1 {
            replies.front().cloned()
        } else {
            replies.pop_front()
        };
        next.unwrap_or_else(|| Err(AcquisitionError::Failed("script exhausted".to_string())))
    }
}

/// Test runner that returns scripted outcomes without spawning anything.
pub struct ScriptedTestRunner {
    outcomes: RefCell<VecDeque<TestOutcome>>,
    fallback: TestOutcome,
    calls: Cell<u32>,
}

impl ScriptedTestRunner {
    pub fn always(outcome: TestOutcome) -> Self {
        Self::sequence(Vec::new(), outcome)
    }

    pub fn sequence(outcomes: Vec<TestOutcome>, fallback: TestOutcome) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            fallback,
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, _request: &TestRequest) -> Result<TestOutcome> {
        self.calls.set(self.calls.get() + 1);
        Ok(self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(self.fallback))
    }
}
