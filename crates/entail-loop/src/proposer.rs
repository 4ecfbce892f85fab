//! External capability seams for the iteration loop.
//!
//! The loop does not know whether proposals come from a language model, a
//! human, or a fixture; it only sees the [`Proposer`] trait. Both seams take
//! an explicit timeout and return typed outcomes, so the controller never
//! blocks indefinitely on an external party.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;

use entail_dsl::guardrail::GuardrailIssue;
use entail_dsl::program::Program;
use entail_solver::Feedback;

use crate::controller::IterationRecord;

/// Everything the loop can tell a proposer about where the session stands.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProposalContext<'a> {
    pub question: &'a str,
    pub prior_program: Option<&'a Program>,
    pub prior_feedback: Option<&'a Feedback>,
    /// Non-empty only on an in-iteration retry after a validation failure.
    pub guardrail_issues: &'a [GuardrailIssue],
    pub history_summary: Option<&'a str>,
}

#[derive(Debug, Error)]
pub enum ProposeError {
    #[error("proposer did not answer within {0:?}")]
    Timeout(Duration),
    #[error("proposer failed: {0}")]
    Failed(String),
}

/// Source of candidate programs.
pub trait Proposer {
    fn propose(
        &mut self,
        context: &ProposalContext<'_>,
        timeout: Duration,
    ) -> Result<Program, ProposeError>;
}

/// Renders history into an opaque blob the proposer can use as context. The
/// loop never inspects the output.
pub trait Summarizer {
    fn summarize(&self, history: &[IterationRecord]) -> String;
}

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

/// Returns the same program on every call. Exercises the stall detector.
#[derive(Debug, Clone)]
pub struct EchoProposer {
    pub program: Program,
}

impl Proposer for EchoProposer {
    fn propose(
        &mut self,
        _context: &ProposalContext<'_>,
        _timeout: Duration,
    ) -> Result<Program, ProposeError> {
        Ok(self.program.clone())
    }
}

/// Hands out a scripted sequence of programs, then repeats the last one.
#[derive(Debug, Clone, Default)]
pub struct QueueProposer {
    queue: VecDeque<Program>,
    last: Option<Program>,
}

impl QueueProposer {
    pub fn new(programs: impl IntoIterator<Item = Program>) -> Self {
        Self {
            queue: programs.into_iter().collect(),
            last: None,
        }
    }
}

impl Proposer for QueueProposer {
    fn propose(
        &mut self,
        _context: &ProposalContext<'_>,
        _timeout: Duration,
    ) -> Result<Program, ProposeError> {
        if let Some(next) = self.queue.pop_front() {
            self.last = Some(next.clone());
            return Ok(next);
        }
        self.last
            .clone()
            .ok_or_else(|| ProposeError::Failed("queue proposer has no programs".to_string()))
    }
}

/// Always times out. Exercises the proposer-timeout path.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeoutProposer;

impl Proposer for TimeoutProposer {
    fn propose(
        &mut self,
        _context: &ProposalContext<'_>,
        timeout: Duration,
    ) -> Result<Program, ProposeError> {
        Err(ProposeError::Timeout(timeout))
    }
}
