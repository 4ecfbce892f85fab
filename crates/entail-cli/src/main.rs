//! Entail CLI
//!
//! Command-line interface for:
//! - Validating program JSON with the guardrail (`check`)
//! - Compiling and evaluating one program (`solve`)
//! - Running the iterative refinement loop from a file of scripted
//!   proposals (`refine`)

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use z3::{Config, Context};

use entail_dsl::guardrail::{self, GuardrailConfig};
use entail_dsl::program::Program;
use entail_loop::{Policy, QueueProposer, Session, SessionConfig, TailSummarizer, Terminal};
use entail_solver::{evaluate, Compiler, Mode, Status};

#[derive(Parser)]
#[command(name = "entail")]
#[command(author, version, about = "Entail: symbolic core for iterative logic refinement")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the guardrail over a program JSON file and report every finding.
    Check {
        /// Input program JSON
        input: PathBuf,
    },

    /// Compile a program and print the solver's verdict.
    Solve {
        /// Input program JSON
        input: PathBuf,
        /// Tolerate blocking guardrail findings and compile anyway
        #[arg(long)]
        lenient: bool,
        /// Per-check solver timeout in milliseconds
        #[arg(long, default_value_t = 10_000)]
        solver_timeout_ms: u64,
    },

    /// Run the refinement loop. The first program in the file seeds the
    /// session; the rest are served as scripted proposals, in order.
    Refine {
        /// JSON array of programs
        input: PathBuf,
        /// Question forwarded to the proposer as context
        #[arg(long, default_value = "")]
        question: String,
        /// Session config JSON file; individual flags below override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Maximum iteration index before the session is exhausted
        #[arg(long)]
        max_iters: Option<usize>,
        /// Guardrail policy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
        /// Per-check solver timeout in milliseconds
        #[arg(long)]
        solver_timeout_ms: Option<u64>,
        /// Proposer timeout in milliseconds
        #[arg(long)]
        proposer_timeout_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    FailFast,
    AutoRetry,
    FallbackToPrevious,
}

impl From<PolicyArg> for Policy {
    fn from(value: PolicyArg) -> Self {
        match value {
            PolicyArg::FailFast => Policy::FailFast,
            PolicyArg::AutoRetry => Policy::AutoRetry,
            PolicyArg::FallbackToPrevious => Policy::FallbackToPrevious,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Check { input } => check(&input),
        Commands::Solve {
            input,
            lenient,
            solver_timeout_ms,
        } => solve(&input, lenient, solver_timeout_ms),
        Commands::Refine {
            input,
            question,
            config,
            max_iters,
            policy,
            solver_timeout_ms,
            proposer_timeout_ms,
        } => {
            let config = load_session_config(
                config.as_ref(),
                max_iters,
                policy.map(Policy::from),
                solver_timeout_ms,
                proposer_timeout_ms,
            )?;
            refine(&input, &question, config)
        }
    }
}

fn load_session_config(
    path: Option<&PathBuf>,
    max_iters: Option<usize>,
    policy: Option<Policy>,
    solver_timeout_ms: Option<u64>,
    proposer_timeout_ms: Option<u64>,
) -> Result<SessionConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading session config from {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing session config from {}", path.display()))?
        }
        None => SessionConfig::default(),
    };
    if let Some(value) = max_iters {
        config.max_iters = value;
    }
    if let Some(value) = policy {
        config.policy = value;
    }
    if let Some(value) = solver_timeout_ms {
        config.solver_timeout_ms = value;
    }
    if let Some(value) = proposer_timeout_ms {
        config.proposer_timeout_ms = value;
    }
    Ok(config)
}

fn load_program(path: &PathBuf) -> Result<Program> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading program from {}", path.display()))?;
    Program::from_json(&text).with_context(|| format!("parsing program from {}", path.display()))
}

fn check(input: &PathBuf) -> Result<()> {
    let program = load_program(input)?;
    let config = GuardrailConfig::default();
    let report = guardrail::validate(&program, &config);

    for issue in &report.issues {
        let tag = if config.advisory.contains(&issue.kind) {
            issue.kind.as_str().yellow().bold()
        } else {
            issue.kind.as_str().red().bold()
        };
        println!("{} {}", tag, issue.detail);
    }
    if report.ok {
        println!(
            "{} {} ({} finding(s), all advisory)",
            "ok".green().bold(),
            input.display(),
            report.issues.len()
        );
        Ok(())
    } else {
        Err(anyhow!(
            "guardrail reported {} finding(s)",
            report.issues.len()
        ))
    }
}

fn solve(input: &PathBuf, lenient: bool, solver_timeout_ms: u64) -> Result<()> {
    let program = load_program(input)?;
    let mode = if lenient { Mode::Lenient } else { Mode::Strict };

    let ctx = Context::new(&Config::new());
    let model = Compiler::new(&ctx, mode)
        .compile(&program)
        .map_err(|err| anyhow!("{err}"))?;
    let feedback = evaluate(&model, Duration::from_millis(solver_timeout_ms));

    print_status(feedback.status);
    if !feedback.conflicting_axioms.is_empty() {
        println!(
            "  {} conflicting: {}",
            "→".yellow(),
            feedback.conflicting_axioms.join(", ")
        );
    }
    if !feedback.missing_links.is_empty() {
        println!(
            "  {} missing links: {}",
            "→".yellow(),
            feedback.missing_links.join(", ")
        );
    }
    Ok(())
}

fn refine(input: &PathBuf, question: &str, config: SessionConfig) -> Result<()> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("reading proposals from {}", input.display()))?;
    let mut programs: Vec<Program> =
        serde_json::from_str(&text).with_context(|| "parsing JSON array of programs")?;
    if programs.is_empty() {
        return Err(anyhow!("{} contains no programs", input.display()));
    }
    let seed = programs.remove(0);

    let mut proposer = QueueProposer::new(programs);
    let summarizer = TailSummarizer::default();
    let outcome = Session::new(config, &mut proposer, &summarizer, question).run(seed);

    for record in &outcome.history {
        println!(
            "iteration {}: {} (fingerprint {})",
            record.index,
            record.feedback.status.as_str().bold(),
            record.fingerprint
        );
    }
    match &outcome.terminal {
        Terminal::Converged => println!("{} query entailed", "converged".green().bold()),
        Terminal::Stalled => println!("{} diagnostics repeating", "stalled".yellow().bold()),
        Terminal::Exhausted => println!("{} iteration cap reached", "exhausted".yellow().bold()),
        Terminal::Failed { reason } => println!("{} {}", "failed".red().bold(), reason),
    }
    if let Some(best) = outcome.best_index {
        let record = &outcome.history[best];
        println!(
            "best iteration: {} ({})",
            best,
            record.feedback.status.as_str()
        );
    }

    match outcome.terminal {
        Terminal::Failed { reason } => Err(anyhow!(reason)),
        _ => Ok(()),
    }
}

fn print_status(status: Status) {
    let tag = match status {
        Status::ConsistentEntails => status.as_str().green().bold(),
        Status::ConsistentNoEntailment => status.as_str().yellow().bold(),
        Status::Inconsistent => status.as_str().red().bold(),
        Status::Unknown => status.as_str().normal().bold(),
    };
    println!("{tag}");
}
