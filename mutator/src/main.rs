//! Transactional self-mutation engine CLI.
//!
//! Operates on the current directory: `.mutator/` holds config, goal, stall
//! state, the audit log and per-cycle artifacts.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mutator::check::check_tree;
use mutator::core::error::CycleStartError;
use mutator::core::stall::is_stalled;
use mutator::cycle::reset_stall;
use mutator::exit_codes;
use mutator::io::config::load_config;
use mutator::io::init::{EnginePaths, InitOptions, init_engine};
use mutator::io::source::CommandProposalSource;
use mutator::io::stall_store::load_stall_state;
use mutator::io::validator::CommandTestRunner;
use mutator::logging;
use mutator::looping::{LoopStop, run_cycles};

#[derive(Parser)]
#[command(
    name = "mutator",
    version,
    about = "Snapshot, propose, apply, validate, and commit or roll back"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.mutator/` with default config, goal and state files.
    Init {
        /// Overwrite existing config and goal.
        #[arg(short, long)]
        force: bool,
        /// Initial goal text written to `.mutator/GOAL.md`.
        #[arg(long)]
        goal: Option<String>,
    },
    /// Run mutation cycles.
    Cycle {
        /// Number of cycles to run; stops early once stalled.
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: u32,
    },
    /// Validate the current tree without mutating it.
    Check,
    /// Print cycle counter and stall state.
    Status,
    /// Clear the consecutive-failure counter.
    Reset,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            match err.downcast_ref::<CycleStartError>() {
                Some(CycleStartError::Locked { .. }) => exit_codes::LOCKED,
                None => exit_codes::INVALID,
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force, goal } => cmd_init(&root, force, goal),
        Command::Cycle { iterations } => cmd_cycle(&root, iterations),
        Command::Check => cmd_check(&root),
        Command::Status => cmd_status(&root),
        Command::Reset => cmd_reset(&root),
    }
}

fn cmd_init(root: &Path, force: bool, goal: Option<String>) -> Result<i32> {
    let paths = init_engine(root, &InitOptions { force, goal })?;
    println!("initialized {}", paths.engine_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_cycle(root: &Path, iterations: u32) -> Result<i32> {
    let paths = EnginePaths::new(root);
    paths.ensure_initialized()?;
    let cfg = load_config(&paths.config_path)?;
    let source = CommandProposalSource::from_config(cfg.proposer_command()?, &cfg.proposer);

    let summary = run_cycles(root, &source, &CommandTestRunner, iterations, |outcome| {
        println!("{}", outcome.summary_line());
        if let Some(help) = &outcome.human_help {
            println!("  human help: {help}");
        }
    })?;
    if summary.stop == LoopStop::Stalled {
        println!("stalled; fix the tree or run `mutator reset`");
    }
    Ok(exit_codes::OK)
}

fn cmd_check(root: &Path) -> Result<i32> {
    let result = check_tree(root, &CommandTestRunner)?;
    if result.ok {
        println!("ok");
        return Ok(exit_codes::OK);
    }
    for failure in &result.failures {
        println!("{failure}");
    }
    Ok(exit_codes::CHECK_FAILED)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let paths = EnginePaths::new(root);
    paths.ensure_initialized()?;
    let cfg = load_config(&paths.config_path)?;
    let state = load_stall_state(&paths.stall_path)?;
    println!("next cycle: {}", state.next_cycle);
    println!(
        "consecutive failures: {}/{}",
        state.consecutive_failures, cfg.stall_limit
    );
    println!(
        "last proposal: {}",
        state.last_proposal_digest.as_deref().unwrap_or("none")
    );
    println!(
        "cycle timeout: {:?}",
        Duration::from_secs(cfg.cycle_timeout_secs)
    );
    if is_stalled(&state, cfg.stall_limit) {
        println!("stalled");
    }
    Ok(exit_codes::OK)
}

fn cmd_reset(root: &Path) -> Result<i32> {
    let state = reset_stall(root)?;
    println!("stall counter cleared; next cycle {}", state.next_cycle);
    Ok(exit_codes::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_with_goal() {
        let cli = Cli::parse_from(["mutator", "init", "--goal", "speed up parser"]);
        match cli.command {
            Command::Init { force, goal } => {
                assert!(!force);
                assert_eq!(goal.as_deref(), Some("speed up parser"));
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn parse_cycle_defaults_to_one_iteration() {
        let cli = Cli::parse_from(["mutator", "cycle"]);
        assert!(matches!(cli.command, Command::Cycle { iterations: 1 }));
    }

    #[test]
    fn parse_cycle_iterations() {
        let cli = Cli::parse_from(["mutator", "cycle", "-n", "5"]);
        assert!(matches!(cli.command, Command::Cycle { iterations: 5 }));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Cli::try_parse_from(["mutator", "select"]).is_err());
    }
}
