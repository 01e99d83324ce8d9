//! Engine configuration stored under `.mutator/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::proposal::ReplyMode;
use crate::core::stall::DEFAULT_STALL_LIMIT;
use crate::core::syntax::SyntaxCheck;

const PY_PARSE_SNIPPET: &str =
    "import ast,sys; ast.parse(open(sys.argv[1], encoding='utf-8').read(), sys.argv[1])";

/// Engine configuration (TOML).
///
/// Edited by humans; every field has a default so a partial file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// How proposer replies are interpreted.
    pub mode: ReplyMode,

    /// Consecutive unproductive cycles before the engine stops proposing.
    pub stall_limit: u32,

    /// Total per-cycle wall-clock budget in seconds (proposer + validation).
    pub cycle_timeout_secs: u64,

    /// Directories (relative to the root) that proposals may never write.
    pub protected: Vec<String>,

    pub filter: FilterConfig,
    pub proposer: ProposerConfig,
    pub validate: ValidateConfig,
    pub sandbox: SandboxConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FilterConfig {
    /// File extensions (without dot) that are snapshotted and may be mutated.
    pub extensions: Vec<String>,
    /// Additional gitignore-style patterns.
    pub ignore: Vec<String>,
    /// Also honor the root `.gitignore`.
    pub use_gitignore: bool,
    /// Directory names pruned at any depth.
    pub exclude_dirs: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            extensions: ["py", "md", "txt", "json", "toml", "yaml", "yml"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            ignore: Vec::new(),
            use_gitignore: true,
            exclude_dirs: [
                ".git",
                ".mutator",
                "target",
                "__pycache__",
                "node_modules",
                ".venv",
                "venv",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProposerConfig {
    /// Command that reads the request on stdin and prints a reply on stdout.
    pub command: Vec<String>,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    /// Attempts before the cycle gives up with `no_proposal`.
    pub max_attempts: u32,
    /// Linear backoff unit between attempts.
    pub backoff_ms: u64,
    /// Truncate captured proposer output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Upper bound on file contents embedded in the request.
    pub context_budget_bytes: usize,
}

impl Default for ProposerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 300,
            max_attempts: 3,
            backoff_ms: 2_000,
            output_limit_bytes: 1_000_000,
            context_budget_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ValidateConfig {
    /// Test suite command; empty disables stage 2.
    pub test_command: Vec<String>,
    /// Truncate test and check output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Timeout for each external syntax check.
    pub check_timeout_secs: u64,
    /// Syntax check per file extension. Entries in the file override the
    /// built-in checks one extension at a time.
    #[serde(deserialize_with = "merge_over_default_checks")]
    pub checks: BTreeMap<String, SyntaxCheck>,
}

fn default_checks() -> BTreeMap<String, SyntaxCheck> {
    let mut checks = BTreeMap::new();
    checks.insert(
        "py".to_string(),
        SyntaxCheck::Command {
            command: vec![
                "python3".to_string(),
                "-c".to_string(),
                PY_PARSE_SNIPPET.to_string(),
                "{path}".to_string(),
            ],
        },
    );
    checks.insert("json".to_string(), SyntaxCheck::Json);
    checks.insert("toml".to_string(), SyntaxCheck::Toml);
    checks
}

fn merge_over_default_checks<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, SyntaxCheck>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut checks = default_checks();
    checks.extend(BTreeMap::<String, SyntaxCheck>::deserialize(deserializer)?);
    Ok(checks)
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            test_command: Vec::new(),
            output_limit_bytes: 100_000,
            check_timeout_secs: 60,
            checks: default_checks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Allow `ExecutableCode` proposals to run at all. Rollback only covers
    /// tracked files; anything else the code writes stays.
    pub enabled: bool,
    /// Interpreter that reads the source on stdin.
    pub interpreter: Vec<String>,
    /// Optional isolation prefix (e.g. a namespace or container launcher).
    pub wrapper: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// `PATH` exposed to the child; everything else is cleared.
    pub path_env: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interpreter: vec!["python3".to_string(), "-".to_string()],
            wrapper: Vec::new(),
            timeout_secs: 120,
            output_limit_bytes: 100_000,
            path_env: "/usr/local/bin:/usr/bin:/bin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AuditConfig {
    /// Trim the audit log once it grows beyond this size.
    pub max_bytes: u64,
    /// Share of `max_bytes` retained after trimming.
    pub keep_percent: u8,
    /// Characters of recent history included in proposer requests.
    pub excerpt_chars: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_bytes: 2 * 1024 * 1024,
            keep_percent: 70,
            excerpt_chars: 8_000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ReplyMode::Json,
            stall_limit: DEFAULT_STALL_LIMIT,
            cycle_timeout_secs: 30 * 60,
            protected: vec![".mutator".to_string(), ".git".to_string()],
            filter: FilterConfig::default(),
            proposer: ProposerConfig::default(),
            validate: ValidateConfig::default(),
            sandbox: SandboxConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stall_limit == 0 {
            return Err(anyhow!("stall_limit must be > 0"));
        }
        if self.cycle_timeout_secs == 0 {
            return Err(anyhow!("cycle_timeout_secs must be > 0"));
        }
        if self.filter.extensions.is_empty() {
            return Err(anyhow!("filter.extensions must not be empty"));
        }
        if self.proposer.timeout_secs == 0 {
            return Err(anyhow!("proposer.timeout_secs must be > 0"));
        }
        if self.proposer.max_attempts == 0 {
            return Err(anyhow!("proposer.max_attempts must be > 0"));
        }
        if self.proposer.output_limit_bytes == 0 {
            return Err(anyhow!("proposer.output_limit_bytes must be > 0"));
        }
        if self.validate.output_limit_bytes == 0 {
            return Err(anyhow!("validate.output_limit_bytes must be > 0"));
        }
        if self.validate.check_timeout_secs == 0 {
            return Err(anyhow!("validate.check_timeout_secs must be > 0"));
        }
        for (ext, check) in &self.validate.checks {
            if let SyntaxCheck::Command { command } = check
                && command.first().is_none_or(|program| program.trim().is_empty())
            {
                return Err(anyhow!(
                    "validate.checks.{ext}.command must be a non-empty array"
                ));
            }
        }
        if self.sandbox.enabled
            && self
                .sandbox
                .interpreter
                .first()
                .is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!("sandbox.interpreter must be a non-empty array"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.audit.keep_percent == 0 || self.audit.keep_percent > 100 {
            return Err(anyhow!("audit.keep_percent must be in 1..=100"));
        }
        Ok(())
    }

    /// The proposer command, or an error naming the missing setting.
    pub fn proposer_command(&self) -> Result<&[String]> {
        match self.proposer.command.first() {
            Some(program) if !program.trim().is_empty() => Ok(&self.proposer.command),
            _ => Err(anyhow!(
                "proposer.command must be set in .mutator/config.toml before running cycles"
            )),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf, "toml.tmp")
}

/// Write `contents` next to `path` and rename it into place.
pub(crate) fn write_atomic(path: &Path, contents: &str, tmp_extension: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension(tmp_extension);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let mut cfg = EngineConfig::default();
        cfg.proposer.command = vec!["model-cli".to_string(), "--json".to_string()];
        cfg.validate.checks.insert(
            "py".to_string(),
            SyntaxCheck::Delimiters {
                line_comment: Some("#".to_string()),
            },
        );
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "mode = \"legacy\"\n[proposer]\ncommand = [\"cat\"]\n[validate.checks.py]\nkind = \"delimiters\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.mode, ReplyMode::Legacy);
        assert_eq!(cfg.stall_limit, DEFAULT_STALL_LIMIT);
        assert_eq!(cfg.proposer.max_attempts, 3);
        assert_eq!(
            cfg.validate.checks.get("py"),
            Some(&SyntaxCheck::Delimiters {
                line_comment: Some("#".to_string())
            })
        );
        // Overriding one extension keeps the built-in checks for the others.
        assert_eq!(cfg.validate.checks.get("json"), Some(&SyntaxCheck::Json));
        assert_eq!(cfg.validate.checks.get("toml"), Some(&SyntaxCheck::Toml));
        assert_eq!(cfg.proposer_command().expect("command"), ["cat".to_string()]);
    }

    #[test]
    fn rejects_invalid_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "stall_limit = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("stall_limit"));
    }

    #[test]
    fn missing_proposer_command_is_reported() {
        let err = EngineConfig::default().proposer_command().unwrap_err();
        assert!(err.to_string().contains("proposer.command"));
    }
}
