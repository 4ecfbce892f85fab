//! Feedback interpreter: runs the solver checks and distills structured
//! feedback from the verdicts.
//!
//! Every assertion is guarded by a tracking literal named after its label, so
//! an unsat core maps straight back to fact/rule/axiom identifiers. All
//! output vectors are sorted; `evaluate` is a pure function of its model and
//! timeout, retaining no state between calls.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use z3::ast::Bool;
use z3::{Params, SatResult, Solver};

use crate::compile::CompiledModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The base assertions alone are unsatisfiable.
    Inconsistent,
    /// The query follows logically from the base assertions.
    ConsistentEntails,
    /// Consistent, but the query is not a consequence.
    ConsistentNoEntailment,
    /// The solver timed out or declined to decide.
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Inconsistent => "inconsistent",
            Status::ConsistentEntails => "consistent_entails",
            Status::ConsistentNoEntailment => "consistent_no_entailment",
            Status::Unknown => "unknown",
        }
    }
}

/// Structured verdict for one compiled program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub status: Status,
    /// Rule/axiom identifiers from the unsat core (facts as a fallback when
    /// the core names no rule or axiom). Sorted. Empty unless inconsistent.
    pub conflicting_axioms: Vec<String>,
    /// Predicates whose truth would flip a no-entailment verdict. Sorted.
    /// Diagnostic only: neither minimal nor unique.
    pub missing_links: Vec<String>,
    /// One deterministic human-readable line restating the verdict and its
    /// diagnostics. For display only; never parsed back.
    pub summary: String,
}

impl Feedback {
    /// Build a verdict; the summary line is derived from the other fields.
    pub fn new(
        status: Status,
        conflicting_axioms: Vec<String>,
        missing_links: Vec<String>,
    ) -> Self {
        let summary = render_summary(status, &conflicting_axioms, &missing_links);
        Self {
            status,
            conflicting_axioms,
            missing_links,
            summary,
        }
    }

    fn with_status(status: Status) -> Self {
        Self::new(status, Vec::new(), Vec::new())
    }
}

fn render_summary(status: Status, conflicting: &[String], links: &[String]) -> String {
    match status {
        Status::Inconsistent => {
            if conflicting.is_empty() {
                "the asserted base is mutually inconsistent".to_string()
            } else {
                format!(
                    "the asserted base is mutually inconsistent; in conflict: {}",
                    conflicting.join(", ")
                )
            }
        }
        Status::ConsistentEntails => {
            "the query follows from the asserted base".to_string()
        }
        Status::ConsistentNoEntailment => {
            if links.is_empty() {
                "the base is consistent but the query does not follow".to_string()
            } else {
                format!(
                    "the base is consistent but the query does not follow; candidate missing links: {}",
                    links.join(", ")
                )
            }
        }
        Status::Unknown => "the solver could not decide within the timeout".to_string(),
    }
}

/// Evaluate a compiled model under a wall-clock budget.
pub fn evaluate(model: &CompiledModel<'_>, timeout: Duration) -> Feedback {
    let ctx = model.context();

    let mut params = Params::new(ctx);
    let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    params.set_u32("timeout", timeout_ms);
    // Fixed seeds: identical inputs must yield identical verdicts run-to-run.
    params.set_u32("random_seed", 0);
    params.set_u32("sat.random_seed", 0);
    params.set_bool("unsat_core", true);

    let solver = Solver::new(ctx);
    solver.set_params(&params);

    // Guard each assertion with a tracking literal named by its label so the
    // unsat core is a list of labels.
    let mut tracked: BTreeMap<String, Bool<'_>> = BTreeMap::new();
    for assertion in &model.assertions {
        let track = Bool::new_const(ctx, assertion.label.as_str());
        solver.assert(&track.implies(&assertion.formula));
        tracked.insert(assertion.label.clone(), track);
    }
    let assumptions: Vec<Bool<'_>> = tracked.values().cloned().collect();

    match solver.check_assumptions(&assumptions) {
        SatResult::Unsat => {
            let core: Vec<String> = solver
                .get_unsat_core()
                .into_iter()
                .map(|lit| {
                    // Labels contain `:`/`(`, so Z3 prints them |quoted|.
                    let text = lit.to_string();
                    text.strip_prefix('|')
                        .and_then(|t| t.strip_suffix('|'))
                        .map_or(text.clone(), str::to_string)
                })
                .collect();
            tracing::debug!(core = ?core, "base assertions inconsistent");
            return Feedback::new(Status::Inconsistent, core_identifiers(&core), Vec::new());
        }
        SatResult::Unknown => {
            tracing::debug!("consistency check undecided");
            return Feedback::with_status(Status::Unknown);
        }
        SatResult::Sat => {}
    }

    let Some(query) = &model.query else {
        // No query: the consistency verdict is all there is to report.
        return Feedback::with_status(Status::ConsistentNoEntailment);
    };

    // Entailment: base ∧ ¬query unsatisfiable means the query follows.
    solver.push();
    solver.assert(&query.not());
    let entailment = solver.check_assumptions(&assumptions);
    match entailment {
        SatResult::Unsat => {
            solver.pop(1);
            return Feedback::with_status(Status::ConsistentEntails);
        }
        SatResult::Unknown => {
            solver.pop(1);
            tracing::debug!("entailment check undecided");
            return Feedback::with_status(Status::Unknown);
        }
        SatResult::Sat => {}
    }

    // Still inside the ¬query frame: a candidate is a missing link when
    // additionally forcing it true closes the countermodel.
    let mut missing_links = Vec::new();
    for (name, atom) in &model.link_candidates {
        solver.push();
        solver.assert(atom);
        if solver.check_assumptions(&assumptions) == SatResult::Unsat {
            missing_links.push(name.clone());
        }
        solver.pop(1);
    }
    solver.pop(1);

    tracing::debug!(missing_links = ?missing_links, "no entailment");
    Feedback::new(Status::ConsistentNoEntailment, Vec::new(), missing_links)
}

/// Map unsat-core labels back to program identifiers. Rules and axioms are
/// what the proposer can edit, so they take precedence; facts are reported
/// only when the core names no rule or axiom at all.
fn core_identifiers(core: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = core
        .iter()
        .filter_map(|label| {
            label
                .strip_prefix("rule:")
                .or_else(|| label.strip_prefix("axiom:"))
                .map(str::to_string)
        })
        .collect();
    if ids.is_empty() {
        ids = core
            .iter()
            .filter_map(|label| label.strip_prefix("fact:").map(str::to_string))
            .collect();
    }
    ids.sort();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{Compiler, Mode};
    use entail_dsl::program::Program;
    use z3::{Config, Context};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn feedback_for(text: &str) -> Feedback {
        let program = Program::from_json(text).expect("test program JSON");
        let ctx = Context::new(&Config::new());
        let model = Compiler::new(&ctx, Mode::Strict)
            .compile(&program)
            .expect("compile");
        evaluate(&model, TIMEOUT)
    }

    #[test]
    fn entailed_query_is_reported() {
        let feedback = feedback_for(
            r#"{
                "version": "1.0",
                "sorts": [{"name": "Contratto"}],
                "constants": [{"name": "c", "sort": "Contratto"}],
                "predicates": [
                    {"name": "Firmato", "arity": 1, "arg_sorts": ["Contratto"]},
                    {"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}
                ],
                "facts": [{"predicate": "Firmato", "args": ["c"]}],
                "rules": [{"id": "r1", "condition": "Firmato(c)", "conclusion": "Valido(c)"}],
                "query": "Valido(c)"
            }"#,
        );
        assert_eq!(feedback.status, Status::ConsistentEntails);
        assert!(feedback.conflicting_axioms.is_empty());
        assert!(feedback.missing_links.is_empty());
        assert_eq!(feedback.summary, "the query follows from the asserted base");
    }

    #[test]
    fn contradictory_rules_name_the_culprits() {
        let feedback = feedback_for(
            r#"{
                "version": "1.0",
                "sorts": [{"name": "Contratto"}],
                "constants": [{"name": "c", "sort": "Contratto"}],
                "predicates": [{"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}],
                "axioms": [
                    {"id": "a1", "formula": "Valido(c)"},
                    {"id": "a2", "formula": "not Valido(c)"}
                ]
            }"#,
        );
        assert_eq!(feedback.status, Status::Inconsistent);
        assert_eq!(feedback.conflicting_axioms, vec!["a1", "a2"]);
        assert_eq!(
            feedback.summary,
            "the asserted base is mutually inconsistent; in conflict: a1, a2"
        );
    }

    #[test]
    fn axiom_outranks_fact_in_core_attribution() {
        let feedback = feedback_for(
            r#"{
                "version": "1.0",
                "sorts": [{"name": "Contratto"}],
                "constants": [{"name": "c", "sort": "Contratto"}],
                "predicates": [{"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}],
                "facts": [{"predicate": "Valido", "args": ["c"], "value": true}],
                "axioms": [{"id": "a1", "formula": "not Valido(c)"}]
            }"#,
        );
        assert_eq!(feedback.status, Status::Inconsistent);
        // The axiom is in the core, so it wins over the fact fallback.
        assert_eq!(feedback.conflicting_axioms, vec!["a1"]);
    }

    #[test]
    fn missing_premise_shows_up_as_missing_link() {
        let feedback = feedback_for(
            r#"{
                "version": "1.0",
                "sorts": [{"name": "Contratto"}],
                "constants": [{"name": "c", "sort": "Contratto"}],
                "predicates": [
                    {"name": "Firmato", "arity": 1, "arg_sorts": ["Contratto"]},
                    {"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}
                ],
                "rules": [{"id": "r1", "condition": "Firmato(c)", "conclusion": "Valido(c)"}],
                "query": "Valido(c)"
            }"#,
        );
        assert_eq!(feedback.status, Status::ConsistentNoEntailment);
        assert_eq!(feedback.missing_links, vec!["Firmato"]);
        assert_eq!(
            feedback.summary,
            "the base is consistent but the query does not follow; candidate missing links: Firmato"
        );
    }

    #[test]
    fn absent_query_defaults_to_no_entailment() {
        let feedback = feedback_for(
            r#"{
                "version": "1.0",
                "sorts": [{"name": "Contratto"}],
                "constants": [{"name": "c", "sort": "Contratto"}],
                "predicates": [{"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}],
                "facts": [{"predicate": "Valido", "args": ["c"]}]
            }"#,
        );
        assert_eq!(feedback.status, Status::ConsistentNoEntailment);
        assert!(feedback.missing_links.is_empty());
    }

    #[test]
    fn evaluate_is_deterministic() {
        let text = r#"{
            "version": "1.0",
            "sorts": [{"name": "Contratto"}],
            "constants": [{"name": "c", "sort": "Contratto"}],
            "predicates": [
                {"name": "Firmato", "arity": 1, "arg_sorts": ["Contratto"]},
                {"name": "Registrato", "arity": 1, "arg_sorts": ["Contratto"]},
                {"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}
            ],
            "facts": [{"predicate": "Firmato", "args": ["c"]}],
            "rules": [
                {"id": "r1", "condition": "Firmato(c) and Registrato(c)", "conclusion": "Valido(c)"}
            ],
            "query": "Valido(c)"
        }"#;
        let first = feedback_for(text);
        let second = feedback_for(text);
        assert_eq!(first, second);
        // Firmato is already a fact, so only the unestablished conjunct can
        // flip the verdict.
        assert_eq!(first.missing_links, vec!["Registrato"]);
    }

    #[test]
    fn core_identifier_mapping_prefers_rules_and_axioms() {
        let core = vec![
            "fact:Valido(c)".to_string(),
            "axiom:a1".to_string(),
            "rule:r2".to_string(),
        ];
        assert_eq!(core_identifiers(&core), vec!["a1", "r2"]);

        let facts_only = vec!["fact:Valido(c)".to_string()];
        assert_eq!(core_identifiers(&facts_only), vec!["Valido(c)"]);
    }
}
