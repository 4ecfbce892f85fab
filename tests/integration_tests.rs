//! Integration tests for the complete Entail pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Program JSON → Guardrail → Constraint Compiler → Feedback Interpreter
//! - Seed program → Iteration Controller → terminal state
//!
//! Run with: cargo test --test integration_tests

use std::time::Duration;

use z3::{Config, Context};

use entail_dsl::program::Program;
use entail_loop::{EchoProposer, QueueProposer, Session, SessionConfig, TailSummarizer, Terminal};
use entail_solver::{evaluate, Compiler, Mode, Status};

const TIMEOUT: Duration = Duration::from_secs(5);

fn program(text: &str) -> Program {
    Program::from_json(text).expect("test program JSON")
}

fn feedback_for(p: &Program) -> entail_solver::Feedback {
    let ctx = Context::new(&Config::new());
    let model = Compiler::new(&ctx, Mode::Strict).compile(p).expect("compile");
    evaluate(&model, TIMEOUT)
}

// ============================================================================
// Contractual liability scenario (Italian civil law, art. 1218 c.c. shape)
// ============================================================================

/// Valid contract between debtor `d` and contract `c`, a breach, and a
/// patrimonial damage `x` — but no causal nexus between breach and damage.
fn liability_case(with_nexus: bool) -> Program {
    let nexus_fact = if with_nexus {
        r#", {"predicate": "NessoCausale", "args": ["d", "x"], "value": true}"#
    } else {
        ""
    };
    program(&format!(
        r#"{{
            "version": "1.0",
            "sorts": [
                {{"name": "Soggetto"}},
                {{"name": "Debitore", "extends": "Soggetto"}},
                {{"name": "Contratto"}},
                {{"name": "Danno"}}
            ],
            "constants": [
                {{"name": "d", "sort": "Debitore"}},
                {{"name": "c", "sort": "Contratto"}},
                {{"name": "x", "sort": "Danno"}}
            ],
            "predicates": [
                {{"name": "ContrattoValido", "arity": 2, "arg_sorts": ["Soggetto", "Contratto"]}},
                {{"name": "Inadempimento", "arity": 2, "arg_sorts": ["Soggetto", "Contratto"]}},
                {{"name": "DannoPatrimoniale", "arity": 1, "arg_sorts": ["Danno"]}},
                {{"name": "NessoCausale", "arity": 2, "arg_sorts": ["Soggetto", "Danno"]}},
                {{"name": "ResponsabilitaContrattuale", "arity": 3,
                  "arg_sorts": ["Soggetto", "Danno", "Contratto"]}}
            ],
            "facts": [
                {{"predicate": "ContrattoValido", "args": ["d", "c"], "value": true}},
                {{"predicate": "Inadempimento", "args": ["d", "c"], "value": true}},
                {{"predicate": "DannoPatrimoniale", "args": ["x"], "value": true}}
                {nexus_fact}
            ],
            "rules": [
                {{"id": "r1",
                  "condition": "Inadempimento(d, c) and DannoPatrimoniale(x) and NessoCausale(d, x)",
                  "conclusion": "ResponsabilitaContrattuale(d, x, c)"}}
            ],
            "query": "ResponsabilitaContrattuale(d, x, c)"
        }}"#
    ))
}

#[test]
fn missing_causal_nexus_is_the_reported_gap() {
    let feedback = feedback_for(&liability_case(false));
    assert_eq!(feedback.status, Status::ConsistentNoEntailment);
    assert_eq!(feedback.missing_links, vec!["NessoCausale"]);
    assert!(feedback.conflicting_axioms.is_empty());
}

#[test]
fn adding_the_nexus_fact_entails_liability() {
    let feedback = feedback_for(&liability_case(true));
    assert_eq!(feedback.status, Status::ConsistentEntails);
    assert!(feedback.missing_links.is_empty());
}

#[test]
fn refinement_session_converges_once_the_nexus_arrives() {
    let mut proposer = QueueProposer::new(vec![liability_case(true)]);
    let summarizer = TailSummarizer::default();
    let outcome = Session::new(
        SessionConfig::default(),
        &mut proposer,
        &summarizer,
        "e' configurabile la responsabilita contrattuale del debitore?",
    )
    .run(liability_case(false));

    assert_eq!(outcome.terminal, Terminal::Converged);
    assert_eq!(outcome.history.len(), 2);
    assert_eq!(
        outcome.history[0].feedback.missing_links,
        vec!["NessoCausale"]
    );
    assert_eq!(
        outcome.history[1].feedback.status,
        Status::ConsistentEntails
    );
    assert_eq!(outcome.best_index, Some(1));
}

// ============================================================================
// Cross-cutting verdict properties
// ============================================================================

#[test]
fn asserted_query_fact_is_always_entailed() {
    let feedback = feedback_for(&program(
        r#"{
            "version": "1.0",
            "sorts": [{"name": "Contratto"}],
            "constants": [{"name": "c", "sort": "Contratto"}],
            "predicates": [{"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}],
            "facts": [{"predicate": "Valido", "args": ["c"], "value": true}],
            "query": "Valido(c)"
        }"#,
    ));
    assert_eq!(feedback.status, Status::ConsistentEntails);
}

#[test]
fn opposite_unconditional_rules_are_inconsistent() {
    let feedback = feedback_for(&program(
        r#"{
            "version": "1.0",
            "predicates": [{"name": "P", "arity": 0}],
            "rules": [
                {"id": "r1", "condition": "true", "conclusion": "P"},
                {"id": "r2", "condition": "true", "conclusion": "not P"}
            ]
        }"#,
    ));
    assert_eq!(feedback.status, Status::Inconsistent);
    assert_eq!(feedback.conflicting_axioms, vec!["r1", "r2"]);
}

#[test]
fn verdict_is_independent_of_collection_order() {
    let reference = liability_case(true);
    let mut permuted = reference.clone();
    permuted.predicates.reverse();
    permuted.facts.reverse();
    permuted.rules.reverse();
    permuted.constants.reverse();
    permuted.sorts.reverse();

    let a = feedback_for(&reference);
    let b = feedback_for(&permuted);
    assert_eq!(a.status, b.status);
    assert_eq!(a.missing_links, b.missing_links);
    assert_eq!(a.conflicting_axioms, b.conflicting_axioms);
}

#[test]
fn identical_proposals_stall_rather_than_loop() {
    let case = liability_case(false);
    let mut proposer = EchoProposer {
        program: case.clone(),
    };
    let summarizer = TailSummarizer::default();
    let outcome = Session::new(SessionConfig::default(), &mut proposer, &summarizer, "q")
        .run(case);
    assert_eq!(outcome.terminal, Terminal::Stalled);
    assert_eq!(outcome.history.len(), 2);
    // Both iterations point at the same gap; the earlier one is "best".
    assert_eq!(outcome.best_index, Some(0));
}

#[test]
fn programs_survive_a_json_round_trip_through_the_pipeline() {
    let case = liability_case(false);
    let text = case.to_json().expect("serialize");
    let reparsed = Program::from_json(&text).expect("reparse");
    assert_eq!(case, reparsed);

    let a = feedback_for(&case);
    let b = feedback_for(&reparsed);
    assert_eq!(a, b);
}
