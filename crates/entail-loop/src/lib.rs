//! Iterative refinement loop over the symbolic backend.
//!
//! A session feeds proposals from an external [`Proposer`] through the
//! guardrail, the constraint compiler and the feedback interpreter, keeping
//! an append-only history and terminating via an explicit state machine
//! (convergence, stall/oscillation detection, iteration cap, typed failure).

pub mod controller;
pub mod proposer;
pub mod summary;

pub use controller::{
    best_iteration, fingerprint, IterationRecord, Policy, Session, SessionConfig, SessionOutcome,
    Terminal,
};
pub use proposer::{
    EchoProposer, ProposalContext, ProposeError, Proposer, QueueProposer, Summarizer,
    TimeoutProposer,
};
pub use summary::TailSummarizer;
