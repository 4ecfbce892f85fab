//! Guardrail: static, read-only validation of a [`Program`].
//!
//! The guardrail runs before compilation and reports *all* findings in one
//! pass; it never short-circuits and never repairs the program. Findings are
//! structured data, not errors: the iteration loop decides what to do with
//! them according to its configured policy.
//!
//! `validate` is pure and idempotent: identical input yields identical
//! output.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::expr::{render_atom, Expr};
use crate::program::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    UndeclaredPredicate,
    ArityMismatch,
    SortMismatch,
    QueryIssue,
    Contradiction,
    DuplicateId,
    /// A rule/axiom expression string failed to parse. Recovered from the
    /// original pipeline's RULE_PARSE_ERROR; the compiler fails hard on the
    /// same input, the guardrail only reports it.
    ParseFailure,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::UndeclaredPredicate => "undeclared_predicate",
            IssueKind::ArityMismatch => "arity_mismatch",
            IssueKind::SortMismatch => "sort_mismatch",
            IssueKind::QueryIssue => "query_issue",
            IssueKind::Contradiction => "contradiction",
            IssueKind::DuplicateId => "duplicate_id",
            IssueKind::ParseFailure => "parse_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailIssue {
    pub kind: IssueKind,
    pub detail: String,
}

/// Which issue kinds are advisory (reported but not blocking).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailConfig {
    pub advisory: BTreeSet<IssueKind>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        // The contradiction check is a conservative heuristic that flags
        // rather than passes when in doubt; by default it must not block
        // compilation, or the solver never gets to report `inconsistent`
        // with a proper unsat core.
        let mut advisory = BTreeSet::new();
        advisory.insert(IssueKind::Contradiction);
        Self { advisory }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailReport {
    pub ok: bool,
    pub issues: Vec<GuardrailIssue>,
}

impl GuardrailReport {
    /// Issues that are not in the advisory subset.
    pub fn blocking<'a>(
        &'a self,
        config: &'a GuardrailConfig,
    ) -> impl Iterator<Item = &'a GuardrailIssue> {
        self.issues
            .iter()
            .filter(move |i| !config.advisory.contains(&i.kind))
    }
}

/// Validate a program. Read-only; accumulates every finding.
pub fn validate(program: &Program, config: &GuardrailConfig) -> GuardrailReport {
    let mut issues = Vec::new();

    check_declarations(program, &mut issues);

    for fact in &program.facts {
        check_atom(
            program,
            &fact.predicate,
            &fact.args,
            AtomOrigin::Fact,
            &mut issues,
        );
    }

    let mut clauses: Vec<Clause> = Vec::new();
    for rule in &program.rules {
        let condition = parse_clause_expr(
            program,
            &rule.condition,
            &format!("rule `{}` condition", rule.id),
            AtomOrigin::Rule,
            &mut issues,
        );
        let conclusion = parse_clause_expr(
            program,
            &rule.conclusion,
            &format!("rule `{}` conclusion", rule.id),
            AtomOrigin::Rule,
            &mut issues,
        );
        clauses.push(Clause {
            id: &rule.id,
            condition,
            conclusion,
        });
    }
    for axiom in &program.axioms {
        let formula = parse_clause_expr(
            program,
            &axiom.formula,
            &format!("axiom `{}`", axiom.id),
            AtomOrigin::Axiom,
            &mut issues,
        );
        // An axiom behaves like a rule with condition `true`.
        clauses.push(Clause {
            id: &axiom.id,
            condition: Some(Expr::True),
            conclusion: formula,
        });
    }

    check_query(program, &mut issues);
    check_contradictions(&clauses, &mut issues);
    check_duplicate_ids(program, &mut issues);

    let ok = issues.iter().all(|i| config.advisory.contains(&i.kind));
    GuardrailReport { ok, issues }
}

// ============================================================================
// Declaration hygiene
// ============================================================================

fn check_declarations(program: &Program, issues: &mut Vec<GuardrailIssue>) {
    for sort in &program.sorts {
        if let Some(parent) = &sort.extends {
            if program.sort(parent).is_none() {
                issues.push(GuardrailIssue {
                    kind: IssueKind::SortMismatch,
                    detail: format!(
                        "sort `{}` extends undeclared sort `{}`",
                        sort.name, parent
                    ),
                });
            }
        }
        if sort_chain_cycles(program, &sort.name) {
            issues.push(GuardrailIssue {
                kind: IssueKind::SortMismatch,
                detail: format!("sort `{}` participates in an extension cycle", sort.name),
            });
        }
    }

    for pred in &program.predicates {
        if pred.arg_sorts.len() != pred.arity {
            issues.push(GuardrailIssue {
                kind: IssueKind::ArityMismatch,
                detail: format!(
                    "predicate `{}` declares arity {} but {} argument sorts",
                    pred.name,
                    pred.arity,
                    pred.arg_sorts.len()
                ),
            });
        }
        for sort_name in &pred.arg_sorts {
            if program.sort(sort_name).is_none() {
                issues.push(GuardrailIssue {
                    kind: IssueKind::SortMismatch,
                    detail: format!(
                        "predicate `{}` references undeclared sort `{}`",
                        pred.name, sort_name
                    ),
                });
            }
        }
    }

    for constant in &program.constants {
        if program.sort(&constant.sort).is_none() {
            issues.push(GuardrailIssue {
                kind: IssueKind::SortMismatch,
                detail: format!(
                    "constant `{}` references undeclared sort `{}`",
                    constant.name, constant.sort
                ),
            });
        }
    }
}

fn sort_chain_cycles(program: &Program, start: &str) -> bool {
    let mut current = start;
    for _ in 0..=program.sorts.len() {
        match program.sort(current).and_then(|s| s.extends.as_deref()) {
            Some(parent) => {
                if parent == start {
                    return true;
                }
                current = parent;
            }
            None => return false,
        }
    }
    true
}

// ============================================================================
// Atom references
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomOrigin {
    Fact,
    Rule,
    Axiom,
    Query,
}

fn check_atom(
    program: &Program,
    predicate: &str,
    args: &[String],
    origin: AtomOrigin,
    issues: &mut Vec<GuardrailIssue>,
) {
    let Some(decl) = program.predicate(predicate) else {
        // Runtime-only boolean flags (0-arity facts) are the one tolerated
        // form of undeclared predicate; everything else is a finding. Query
        // atoms are reported under query_issue per the validator taxonomy.
        if origin == AtomOrigin::Fact && args.is_empty() {
            return;
        }
        let kind = if origin == AtomOrigin::Query {
            IssueKind::QueryIssue
        } else {
            IssueKind::UndeclaredPredicate
        };
        issues.push(GuardrailIssue {
            kind,
            detail: format!("atom references undeclared predicate `{predicate}`"),
        });
        return;
    };

    if args.len() != decl.arity {
        issues.push(GuardrailIssue {
            kind: IssueKind::ArityMismatch,
            detail: format!(
                "atom `{}` has {} arguments, predicate `{}` declares arity {}",
                render_atom(predicate, args),
                args.len(),
                predicate,
                decl.arity
            ),
        });
        return;
    }

    for (index, arg) in args.iter().enumerate() {
        // Sort checking applies only when both sides are resolvable: the
        // argument names a declared constant and the predicate declares a
        // sort at this position.
        let Some(constant) = program.constant(arg) else {
            continue;
        };
        let Some(declared_sort) = decl.arg_sorts.get(index) else {
            continue;
        };
        if !program.sort_compatible(&constant.sort, declared_sort) {
            issues.push(GuardrailIssue {
                kind: IssueKind::SortMismatch,
                detail: format!(
                    "argument {} of `{}` is `{}: {}`, expected sort `{}`",
                    index,
                    render_atom(predicate, args),
                    arg,
                    constant.sort,
                    declared_sort
                ),
            });
        }
    }
}

fn parse_clause_expr(
    program: &Program,
    text: &str,
    what: &str,
    origin: AtomOrigin,
    issues: &mut Vec<GuardrailIssue>,
) -> Option<Expr> {
    match Expr::parse(text) {
        Ok(expr) => {
            for atom in expr.atoms() {
                check_atom(program, atom.predicate, atom.args, origin, issues);
            }
            Some(expr)
        }
        Err(err) => {
            issues.push(GuardrailIssue {
                kind: IssueKind::ParseFailure,
                detail: format!("{what}: {err}"),
            });
            None
        }
    }
}

// ============================================================================
// Query
// ============================================================================

fn check_query(program: &Program, issues: &mut Vec<GuardrailIssue>) {
    // An absent query is allowed (the feedback interpreter then defaults to
    // consistent_no_entailment); a present-but-empty one is a finding.
    let Some(query) = program.query.as_deref() else {
        return;
    };
    if query.trim().is_empty() {
        issues.push(GuardrailIssue {
            kind: IssueKind::QueryIssue,
            detail: "query is structurally empty".to_string(),
        });
        return;
    }
    match Expr::parse(query) {
        Ok(expr) => {
            for atom in expr.atoms() {
                check_atom(program, atom.predicate, atom.args, AtomOrigin::Query, issues);
            }
        }
        Err(err) => {
            issues.push(GuardrailIssue {
                kind: IssueKind::QueryIssue,
                detail: format!("query does not parse: {err}"),
            });
        }
    }
}

// ============================================================================
// Contradiction heuristic
// ============================================================================

struct Clause<'a> {
    id: &'a str,
    condition: Option<Expr>,
    conclusion: Option<Expr>,
}

/// Signed ground conclusion: `P(..)` or `not P(..)`.
fn conclusion_polarity(expr: &Expr) -> Option<(bool, String)> {
    match expr {
        Expr::Atom { predicate, args } => Some((true, render_atom(predicate, args))),
        Expr::Not { inner } => match inner.as_ref() {
            Expr::Atom { predicate, args } => Some((false, render_atom(predicate, args))),
            _ => None,
        },
        _ => None,
    }
}

fn condition_atom_set(expr: &Expr) -> BTreeSet<String> {
    expr.atoms()
        .into_iter()
        .map(|a| render_atom(a.predicate, a.args))
        .collect()
}

/// Conservative syntactic overlap: identical conditions, or one condition's
/// atom set subsuming the other's. `true` (empty set) overlaps everything.
fn conditions_overlap(a: &Expr, b: &Expr) -> bool {
    if a.render() == b.render() {
        return true;
    }
    let set_a = condition_atom_set(a);
    let set_b = condition_atom_set(b);
    set_a.is_subset(&set_b) || set_b.is_subset(&set_a)
}

fn check_contradictions(clauses: &[Clause<'_>], issues: &mut Vec<GuardrailIssue>) {
    for (i, first) in clauses.iter().enumerate() {
        let (Some(cond_a), Some(concl_a)) = (&first.condition, &first.conclusion) else {
            continue;
        };
        let Some((pol_a, atom_a)) = conclusion_polarity(concl_a) else {
            continue;
        };
        for second in clauses.iter().skip(i + 1) {
            let (Some(cond_b), Some(concl_b)) = (&second.condition, &second.conclusion) else {
                continue;
            };
            let Some((pol_b, atom_b)) = conclusion_polarity(concl_b) else {
                continue;
            };
            if atom_a == atom_b && pol_a != pol_b && conditions_overlap(cond_a, cond_b) {
                issues.push(GuardrailIssue {
                    kind: IssueKind::Contradiction,
                    detail: format!(
                        "`{}` and `{}` conclude `{}` with opposite polarity under overlapping conditions",
                        first.id, second.id, atom_a
                    ),
                });
            }
        }
    }
}

// ============================================================================
// Identifiers
// ============================================================================

fn check_duplicate_ids(program: &Program, issues: &mut Vec<GuardrailIssue>) {
    let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
    for id in program
        .rules
        .iter()
        .map(|r| r.id.as_str())
        .chain(program.axioms.iter().map(|a| a.id.as_str()))
    {
        *seen.entry(id).or_insert(0) += 1;
    }
    for (id, count) in seen {
        if count > 1 {
            issues.push(GuardrailIssue {
                kind: IssueKind::DuplicateId,
                detail: format!("identifier `{id}` is used by {count} rules/axioms"),
            });
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
