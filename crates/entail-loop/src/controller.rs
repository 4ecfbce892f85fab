//! Iteration controller: an explicit finite state machine around the
//! propose → validate → solve → evaluate cycle.
//!
//! One session is sequential by construction (each proposal depends on the
//! previous feedback) and owns everything it touches: its history, its
//! proposer handle, and a fresh solver context per compilation. Nothing is
//! shared across sessions, so independent cases can run on independent
//! threads with no coordination.
//!
//! Termination does not depend on proposer behavior: the fingerprint-based
//! stall detector and the iteration cap guarantee a terminal state within
//! `max_iters + 1` evaluated iterations.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use z3::{Config, Context};

use entail_dsl::digest::fnv1a64_digest_bytes;
use entail_dsl::guardrail::{self, GuardrailConfig, GuardrailIssue, GuardrailReport};
use entail_dsl::program::Program;
use entail_solver::{evaluate, Compiler, Feedback, Mode, Status};

use crate::proposer::{ProposalContext, Proposer, Summarizer};

/// What the controller does when the guardrail blocks a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Terminate the session on the first blocking finding.
    #[default]
    FailFast,
    /// Ask the proposer for a corrected program once per iteration, passing
    /// the findings along as context.
    AutoRetry,
    /// Tolerate the findings and compile leniently.
    FallbackToPrevious,
}

/// Session options. Deserializable from JSON with every field optional, so
/// a config file only has to spell out what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_iters: usize,
    pub policy: Policy,
    pub solver_timeout_ms: u64,
    pub proposer_timeout_ms: u64,
    pub guardrail: GuardrailConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iters: 3,
            policy: Policy::default(),
            solver_timeout_ms: 10_000,
            proposer_timeout_ms: 30_000,
            guardrail: GuardrailConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn solver_timeout(&self) -> Duration {
        Duration::from_millis(self.solver_timeout_ms)
    }

    pub fn proposer_timeout(&self) -> Duration {
        Duration::from_millis(self.proposer_timeout_ms)
    }
}

/// One evaluated iteration. Append-only: records are never edited after
/// creation, and failed iterations (validation or compile errors) never
/// produce a record at all.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub index: usize,
    pub program: Program,
    pub guardrail: GuardrailReport,
    pub feedback: Feedback,
    /// Digest of `(status, sorted missing_links, sorted conflicting_axioms)`.
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// The query is entailed.
    Converged,
    /// Two consecutive identical fingerprints, or an A → B → A oscillation.
    Stalled,
    /// The iteration cap was reached.
    Exhausted,
    /// Unrecoverable error; history up to the last good iteration survives.
    Failed { reason: String },
}

/// Final result of one session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub terminal: Terminal,
    /// Index into `history` of the best iteration (see [`best_iteration`]);
    /// `None` only when no iteration was ever evaluated.
    pub best_index: Option<usize>,
    pub history: Vec<IterationRecord>,
}

/// Fingerprint of one iteration's diagnostics. Fields are kept sorted so the
/// digest is independent of solver-internal ordering.
pub fn fingerprint(feedback: &Feedback) -> String {
    let links: BTreeSet<&String> = feedback.missing_links.iter().collect();
    let axioms: BTreeSet<&String> = feedback.conflicting_axioms.iter().collect();
    let canonical = format!(
        "status={};links={:?};axioms={:?}",
        feedback.status.as_str(),
        links,
        axioms
    );
    fnv1a64_digest_bytes(canonical.as_bytes())
}

/// Pick the most useful iteration from a history: entailment beats a clean
/// near-miss, a near-miss beats an inconsistency, anything decided beats
/// `unknown`. Ties go to the earliest index, preferring stability over late
/// oscillation.
pub fn best_iteration(history: &[IterationRecord]) -> Option<usize> {
    history
        .iter()
        .enumerate()
        .min_by_key(|(index, record)| {
            let rank = match record.feedback.status {
                Status::ConsistentEntails => (0usize, 0usize),
                Status::ConsistentNoEntailment => (1, record.feedback.missing_links.len()),
                Status::Inconsistent => (2, record.feedback.conflicting_axioms.len()),
                Status::Unknown => (3, 0),
            };
            (rank, *index)
        })
        .map(|(index, _)| index)
}

pub struct Session<'a, P: Proposer, S: Summarizer> {
    config: SessionConfig,
    proposer: &'a mut P,
    summarizer: &'a S,
    question: String,
}

impl<'a, P: Proposer, S: Summarizer> Session<'a, P, S> {
    pub fn new(
        config: SessionConfig,
        proposer: &'a mut P,
        summarizer: &'a S,
        question: impl Into<String>,
    ) -> Self {
        Self {
            config,
            proposer,
            summarizer,
            question: question.into(),
        }
    }

    /// Run the session to a terminal state, seeded with the upstream
    /// pipeline's program as the iteration-0 proposal.
    pub fn run(&mut self, seed: Program) -> SessionOutcome {
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut current = seed;
        let mut retry_used = false;

        loop {
            // VALIDATING
            let report = guardrail::validate(&current, &self.config.guardrail);
            let blocked = !report.ok;
            let mut lenient = false;
            if blocked {
                let issues: Vec<GuardrailIssue> =
                    report.blocking(&self.config.guardrail).cloned().collect();
                tracing::debug!(issues = issues.len(), "guardrail blocked proposal");
                match self.config.policy {
                    Policy::FailFast => {
                        return outcome(
                            history,
                            Terminal::Failed {
                                reason: describe_issues(&issues),
                            },
                        );
                    }
                    Policy::AutoRetry if !retry_used => {
                        retry_used = true;
                        match self.repropose(&history, Some(&issues)) {
                            Ok(next) => {
                                current = next;
                                continue;
                            }
                            Err(reason) => {
                                return outcome(history, Terminal::Failed { reason });
                            }
                        }
                    }
                    Policy::AutoRetry => {
                        return outcome(
                            history,
                            Terminal::Failed {
                                reason: format!(
                                    "retry budget exhausted; guardrail still reports: {}",
                                    describe_issues(&issues)
                                ),
                            },
                        );
                    }
                    Policy::FallbackToPrevious => {
                        lenient = true;
                    }
                }
            }

            // SOLVING — fresh context per compilation, never reused.
            let mode = if lenient { Mode::Lenient } else { Mode::Strict };
            let ctx = Context::new(&Config::new());
            let compiled = Compiler::new(&ctx, mode)
                .with_guardrail(self.config.guardrail.clone())
                .compile(&current);
            let feedback = match compiled {
                Ok(model) => evaluate(&model, self.config.solver_timeout()),
                Err(err) if self.config.policy == Policy::AutoRetry && !retry_used => {
                    retry_used = true;
                    tracing::debug!(error = %err, "compile failed, requesting corrected proposal");
                    match self.repropose(&history, None) {
                        Ok(next) => {
                            current = next;
                            continue;
                        }
                        Err(reason) => {
                            return outcome(history, Terminal::Failed { reason });
                        }
                    }
                }
                Err(err) => {
                    return outcome(
                        history,
                        Terminal::Failed {
                            reason: err.to_string(),
                        },
                    );
                }
            };

            // EVALUATING — commit the record before deciding what is next.
            let record = IterationRecord {
                index: history.len(),
                fingerprint: fingerprint(&feedback),
                program: current.clone(),
                guardrail: report,
                feedback,
            };
            tracing::debug!(
                index = record.index,
                status = record.feedback.status.as_str(),
                fingerprint = %record.fingerprint,
                "iteration evaluated"
            );
            history.push(record);
            retry_used = false;

            let last = &history[history.len() - 1];
            if last.feedback.status == Status::ConsistentEntails {
                return outcome(history, Terminal::Converged);
            }
            if is_stalled(&history) {
                return outcome(history, Terminal::Stalled);
            }
            if last.index >= self.config.max_iters {
                return outcome(history, Terminal::Exhausted);
            }

            // AWAITING_PROPOSAL
            match self.repropose(&history, None) {
                Ok(next) => current = next,
                Err(reason) => {
                    return outcome(history, Terminal::Failed { reason });
                }
            }
        }
    }

    fn repropose(
        &mut self,
        history: &[IterationRecord],
        issues: Option<&[GuardrailIssue]>,
    ) -> Result<Program, String> {
        let summary = if history.is_empty() {
            None
        } else {
            Some(self.summarizer.summarize(history))
        };
        let last = history.last();
        let context = ProposalContext {
            question: &self.question,
            prior_program: last.map(|r| &r.program),
            prior_feedback: last.map(|r| &r.feedback),
            guardrail_issues: issues.unwrap_or(&[]),
            history_summary: summary.as_deref(),
        };
        self.proposer
            .propose(&context, self.config.proposer_timeout())
            .map_err(|err| err.to_string())
    }
}

/// Stall: the newest fingerprint repeats the previous one, or the one from
/// two iterations back (oscillation A → B → A).
fn is_stalled(history: &[IterationRecord]) -> bool {
    let Some(last) = history.last() else {
        return false;
    };
    let n = history.len();
    let repeat = n >= 2 && history[n - 2].fingerprint == last.fingerprint;
    let oscillation = n >= 3 && history[n - 3].fingerprint == last.fingerprint;
    repeat || oscillation
}

fn describe_issues(issues: &[GuardrailIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.kind.as_str(), i.detail))
        .collect::<Vec<_>>()
        .join("; ")
}

fn outcome(history: Vec<IterationRecord>, terminal: Terminal) -> SessionOutcome {
    SessionOutcome {
        terminal,
        best_index: best_iteration(&history),
        history,
    }
}
