//! Constraint compiler: lowers a validated [`Program`] into labeled Z3
//! assertions.
//!
//! One compilation owns one name→symbol table. Every textual reference to a
//! predicate resolves to the same solver symbol; a symbol is created at most
//! once per compilation and never shared across compilations (contexts are
//! per-iteration, see the loop crate).
//!
//! Assertions are labeled (`fact:…`, `rule:<id>`, `axiom:<id>`) and sorted by
//! label before they leave the compiler, so downstream solver verdicts do not
//! depend on the iteration order of the program's collections.

use std::collections::BTreeMap;

use thiserror::Error;
use z3::ast::{Ast, Bool, Dynamic};
use z3::{Context, FuncDecl, Symbol};

use entail_dsl::expr::{render_atom, Expr, ParseError};
use entail_dsl::guardrail::{self, GuardrailConfig, GuardrailIssue, GuardrailReport};
use entail_dsl::program::Program;

/// How the compiler treats guardrail findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Refuse to compile when the guardrail reports a blocking issue.
    #[default]
    Strict,
    /// Compile anyway; undeclared symbols are created on first use.
    Lenient,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("guardrail reported {} blocking issue(s): {}", .issues.len(), issue_digest(.issues))]
    Guardrail { issues: Vec<GuardrailIssue> },
    #[error("cannot parse {location}: {source}")]
    Expr {
        location: String,
        #[source]
        source: ParseError,
    },
    #[error("predicate `{predicate}` is not declared")]
    UndeclaredPredicate { predicate: String },
    #[error("atom `{atom}` has {found} arguments, predicate declares {expected}")]
    ArityMismatch {
        atom: String,
        expected: usize,
        found: usize,
    },
    #[error("constant `{constant}` used at sort `{expected}` but resolves to sort `{found}`")]
    SortClash {
        constant: String,
        expected: String,
        found: String,
    },
    #[error("solver lowering failed: {0}")]
    Lowering(String),
}

fn issue_digest(issues: &[GuardrailIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{}: {}", i.kind.as_str(), i.detail))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One assertion with the stable label used for unsat-core attribution.
#[derive(Debug, Clone)]
pub struct LabeledAssertion<'ctx> {
    pub label: String,
    pub formula: Bool<'ctx>,
}

/// Result of one compilation. Borrowed from a single [`Context`]; a model is
/// consumed by at most one evaluation pass and then dropped with its context.
#[derive(Debug)]
pub struct CompiledModel<'ctx> {
    ctx: &'ctx Context,
    /// Sorted by label.
    pub assertions: Vec<LabeledAssertion<'ctx>>,
    /// Lowered query, if the program carries one.
    pub query: Option<Bool<'ctx>>,
    /// Candidate atoms for the missing-link heuristic, keyed by predicate
    /// name (sorted), each paired with its lowered ground instance.
    pub link_candidates: BTreeMap<String, Bool<'ctx>>,
    /// What the guardrail said about the source program.
    pub guardrail: GuardrailReport,
}

impl<'ctx> CompiledModel<'ctx> {
    pub fn context(&self) -> &'ctx Context {
        self.ctx
    }
}

/// Closed representation of a solver-level predicate symbol.
enum PredicateSymbol<'ctx> {
    NullaryAtom(Bool<'ctx>),
    Relation {
        decl: FuncDecl<'ctx>,
        /// Root sort name per argument position.
        domain: Vec<String>,
    },
}

/// Fallback sort for constants and argument positions the program leaves
/// unsorted.
const DEFAULT_SORT: &str = "Individuo";

struct SymbolTable<'ctx> {
    ctx: &'ctx Context,
    sorts: BTreeMap<String, z3::Sort<'ctx>>,
    predicates: BTreeMap<String, PredicateSymbol<'ctx>>,
    /// constant name → (root sort name, solver constant)
    constants: BTreeMap<String, (String, Dynamic<'ctx>)>,
}

pub struct Compiler<'ctx> {
    ctx: &'ctx Context,
    mode: Mode,
    guardrail: GuardrailConfig,
}

impl<'ctx> Compiler<'ctx> {
    pub fn new(ctx: &'ctx Context, mode: Mode) -> Self {
        Self {
            ctx,
            mode,
            guardrail: GuardrailConfig::default(),
        }
    }

    pub fn with_guardrail(mut self, config: GuardrailConfig) -> Self {
        self.guardrail = config;
        self
    }

    pub fn compile(&self, program: &Program) -> Result<CompiledModel<'ctx>, CompileError> {
        let report = guardrail::validate(program, &self.guardrail);
        if self.mode == Mode::Strict && !report.ok {
            let issues = report.blocking(&self.guardrail).cloned().collect();
            return Err(CompileError::Guardrail { issues });
        }

        let mut table = SymbolTable {
            ctx: self.ctx,
            sorts: BTreeMap::new(),
            predicates: BTreeMap::new(),
            constants: BTreeMap::new(),
        };

        let mut assertions = Vec::new();

        for fact in &program.facts {
            let atom = table.lower_atom(program, &fact.predicate, &fact.args)?;
            let formula = if fact.value { atom } else { atom.not() };
            assertions.push(LabeledAssertion {
                label: format!("fact:{}", render_atom(&fact.predicate, &fact.args)),
                formula,
            });
        }

        for rule in &program.rules {
            let condition = self.parse(&rule.condition, || format!("rule `{}` condition", rule.id))?;
            let conclusion =
                self.parse(&rule.conclusion, || format!("rule `{}` conclusion", rule.id))?;
            let lhs = table.lower_expr(program, &condition)?;
            let rhs = table.lower_expr(program, &conclusion)?;
            assertions.push(LabeledAssertion {
                label: format!("rule:{}", rule.id),
                formula: lhs.implies(&rhs),
            });
        }

        for axiom in &program.axioms {
            let formula = self.parse(&axiom.formula, || format!("axiom `{}`", axiom.id))?;
            assertions.push(LabeledAssertion {
                label: format!("axiom:{}", axiom.id),
                formula: table.lower_expr(program, &formula)?,
            });
        }

        // Stable submission order regardless of how the program's collections
        // were ordered on the wire.
        assertions.sort_by(|a, b| a.label.cmp(&b.label));

        let parsed_query = match program.query.as_deref() {
            Some(text) if !text.trim().is_empty() => {
                Some(self.parse(text, || "query".to_string())?)
            }
            _ => None,
        };
        let query = match &parsed_query {
            Some(expr) => Some(table.lower_expr(program, expr)?),
            None => None,
        };

        let link_candidates = match &parsed_query {
            Some(expr) => link_candidates(program, expr, &mut table)?,
            None => BTreeMap::new(),
        };

        tracing::debug!(
            assertions = assertions.len(),
            candidates = link_candidates.len(),
            has_query = query.is_some(),
            "compiled program"
        );

        Ok(CompiledModel {
            ctx: self.ctx,
            assertions,
            query,
            link_candidates,
            guardrail: report,
        })
    }

    fn parse(
        &self,
        text: &str,
        location: impl Fn() -> String,
    ) -> Result<Expr, CompileError> {
        Expr::parse(text).map_err(|source| CompileError::Expr {
            location: location(),
            source,
        })
    }
}

/// Candidate atoms whose truth might flip a `consistent_no_entailment`
/// verdict: the atoms in conditions of rules that conclude one of the query's
/// predicates, minus the query's own predicates. When no rule concludes a
/// query predicate, the query's own atoms are the candidates (nothing in the
/// program can derive them, so they are the gap by definition).
fn link_candidates<'ctx>(
    program: &Program,
    query: &Expr,
    table: &mut SymbolTable<'ctx>,
) -> Result<BTreeMap<String, Bool<'ctx>>, CompileError> {
    let query_predicates: Vec<&str> = query.atoms().iter().map(|a| a.predicate).collect();

    let mut candidates = BTreeMap::new();
    let mut any_rule_concludes_query = false;
    for rule in &program.rules {
        let Ok(conclusion) = Expr::parse(&rule.conclusion) else {
            continue;
        };
        let concludes_query = conclusion
            .atoms()
            .iter()
            .any(|a| query_predicates.contains(&a.predicate));
        if !concludes_query {
            continue;
        }
        any_rule_concludes_query = true;
        let Ok(condition) = Expr::parse(&rule.condition) else {
            continue;
        };
        for atom in condition.atoms() {
            if query_predicates.contains(&atom.predicate) {
                continue;
            }
            if !candidates.contains_key(atom.predicate) {
                let lowered = table.lower_atom(program, atom.predicate, atom.args)?;
                candidates.insert(atom.predicate.to_string(), lowered);
            }
        }
    }

    if !any_rule_concludes_query {
        for atom in query.atoms() {
            if !candidates.contains_key(atom.predicate) {
                let lowered = table.lower_atom(program, atom.predicate, atom.args)?;
                candidates.insert(atom.predicate.to_string(), lowered);
            }
        }
    }

    Ok(candidates)
}

impl<'ctx> SymbolTable<'ctx> {
    /// Root ancestor of a declared sort. Extension chains collapse to their
    /// root so a subsort constant can fill a supersort argument position.
    fn root_sort_name(program: &Program, name: &str) -> String {
        let mut current = name;
        for _ in 0..=program.sorts.len() {
            match program.sort(current).and_then(|s| s.extends.as_deref()) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current.to_string()
    }

    fn sort(&mut self, root_name: &str) -> &z3::Sort<'ctx> {
        let ctx = self.ctx;
        self.sorts
            .entry(root_name.to_string())
            .or_insert_with(|| z3::Sort::uninterpreted(ctx, Symbol::String(root_name.to_string())))
    }

    /// Resolve (creating if needed) the solver constant for an argument name
    /// expected at `expected_root` sort.
    fn constant(
        &mut self,
        program: &Program,
        name: &str,
        expected_root: &str,
    ) -> Result<Dynamic<'ctx>, CompileError> {
        if let Some((root, ast)) = self.constants.get(name) {
            if root != expected_root {
                return Err(CompileError::SortClash {
                    constant: name.to_string(),
                    expected: expected_root.to_string(),
                    found: root.clone(),
                });
            }
            return Ok(ast.clone());
        }

        let root = match program.constant(name) {
            Some(decl) => Self::root_sort_name(program, &decl.sort),
            // Unknown argument names are declared on first use at the sort
            // the position demands; the guardrail owns reporting them.
            None => expected_root.to_string(),
        };
        if root != expected_root {
            return Err(CompileError::SortClash {
                constant: name.to_string(),
                expected: expected_root.to_string(),
                found: root,
            });
        }

        let sort = self.sort(&root).clone();
        let ast = FuncDecl::new(self.ctx, name, &[], &sort).apply(&[]);
        self.constants
            .insert(name.to_string(), (root, ast.clone()));
        Ok(ast)
    }

    fn predicate_symbol(
        &mut self,
        program: &Program,
        predicate: &str,
        observed_arity: usize,
    ) -> Result<&PredicateSymbol<'ctx>, CompileError> {
        if !self.predicates.contains_key(predicate) {
            let symbol = match program.predicate(predicate) {
                Some(decl) => {
                    if decl.arity == 0 {
                        PredicateSymbol::NullaryAtom(Bool::new_const(self.ctx, predicate))
                    } else {
                        let domain: Vec<String> = (0..decl.arity)
                            .map(|i| match decl.arg_sorts.get(i) {
                                Some(s) => Self::root_sort_name(program, s),
                                None => DEFAULT_SORT.to_string(),
                            })
                            .collect();
                        let sorts: Vec<z3::Sort<'ctx>> =
                            domain.iter().map(|d| self.sort(d).clone()).collect();
                        let sort_refs: Vec<&z3::Sort<'ctx>> = sorts.iter().collect();
                        PredicateSymbol::Relation {
                            decl: FuncDecl::new(
                                self.ctx,
                                predicate,
                                &sort_refs,
                                &z3::Sort::bool(self.ctx),
                            ),
                            domain,
                        }
                    }
                }
                None if observed_arity == 0 => {
                    // Runtime-only boolean flags.
                    PredicateSymbol::NullaryAtom(Bool::new_const(self.ctx, predicate))
                }
                None => {
                    let domain: Vec<String> =
                        (0..observed_arity).map(|_| DEFAULT_SORT.to_string()).collect();
                    let sorts: Vec<z3::Sort<'ctx>> =
                        domain.iter().map(|d| self.sort(d).clone()).collect();
                    let sort_refs: Vec<&z3::Sort<'ctx>> = sorts.iter().collect();
                    PredicateSymbol::Relation {
                        decl: FuncDecl::new(
                            self.ctx,
                            predicate,
                            &sort_refs,
                            &z3::Sort::bool(self.ctx),
                        ),
                        domain,
                    }
                }
            };
            self.predicates.insert(predicate.to_string(), symbol);
        }
        Ok(&self.predicates[predicate])
    }

    fn lower_atom(
        &mut self,
        program: &Program,
        predicate: &str,
        args: &[String],
    ) -> Result<Bool<'ctx>, CompileError> {
        // Two-phase: resolve the symbol's domain first, then the argument
        // constants, so the borrow of `self.predicates` does not outlive the
        // constant lookups.
        let domain = match self.predicate_symbol(program, predicate, args.len())? {
            PredicateSymbol::NullaryAtom(b) => {
                if !args.is_empty() {
                    return Err(CompileError::ArityMismatch {
                        atom: render_atom(predicate, args),
                        expected: 0,
                        found: args.len(),
                    });
                }
                return Ok(b.clone());
            }
            PredicateSymbol::Relation { domain, .. } => domain.clone(),
        };

        if args.len() != domain.len() {
            return Err(CompileError::ArityMismatch {
                atom: render_atom(predicate, args),
                expected: domain.len(),
                found: args.len(),
            });
        }

        let mut lowered_args: Vec<Dynamic<'ctx>> = Vec::with_capacity(args.len());
        for (arg, expected_root) in args.iter().zip(&domain) {
            lowered_args.push(self.constant(program, arg, expected_root)?);
        }

        let PredicateSymbol::Relation { decl, .. } = &self.predicates[predicate] else {
            return Err(CompileError::Lowering(format!(
                "predicate `{predicate}` changed shape mid-compilation"
            )));
        };
        let arg_refs: Vec<&dyn Ast<'ctx>> =
            lowered_args.iter().map(|a| a as &dyn Ast<'ctx>).collect();
        decl.apply(&arg_refs).as_bool().ok_or_else(|| {
            CompileError::Lowering(format!(
                "application of `{predicate}` did not produce a boolean term"
            ))
        })
    }

    fn lower_expr(&mut self, program: &Program, expr: &Expr) -> Result<Bool<'ctx>, CompileError> {
        match expr {
            Expr::True => Ok(Bool::from_bool(self.ctx, true)),
            Expr::False => Ok(Bool::from_bool(self.ctx, false)),
            Expr::Atom { predicate, args } => self.lower_atom(program, predicate, args),
            Expr::Not { inner } => Ok(self.lower_expr(program, inner)?.not()),
            Expr::And { left, right } => {
                let l = self.lower_expr(program, left)?;
                let r = self.lower_expr(program, right)?;
                Ok(Bool::and(self.ctx, &[&l, &r]))
            }
            Expr::Or { left, right } => {
                let l = self.lower_expr(program, left)?;
                let r = self.lower_expr(program, right)?;
                Ok(Bool::or(self.ctx, &[&l, &r]))
            }
            Expr::Implies { left, right } => {
                let l = self.lower_expr(program, left)?;
                let r = self.lower_expr(program, right)?;
                Ok(l.implies(&r))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::Config;

    fn program(text: &str) -> Program {
        Program::from_json(text).expect("test program JSON")
    }

    const LEGAL: &str = r#"{
        "version": "1.0",
        "sorts": [
            {"name": "Soggetto"},
            {"name": "Debitore", "extends": "Soggetto"},
            {"name": "Contratto"}
        ],
        "constants": [
            {"name": "d", "sort": "Debitore"},
            {"name": "c", "sort": "Contratto"}
        ],
        "predicates": [
            {"name": "Inadempimento", "arity": 2, "arg_sorts": ["Soggetto", "Contratto"]},
            {"name": "Mora", "arity": 1, "arg_sorts": ["Soggetto"]}
        ],
        "facts": [{"predicate": "Inadempimento", "args": ["d", "c"]}],
        "rules": [{"id": "r1", "condition": "Inadempimento(d, c)", "conclusion": "Mora(d)"}],
        "query": "Mora(d)"
    }"#;

    #[test]
    fn compiles_and_labels_assertions_sorted() {
        let ctx = Context::new(&Config::new());
        let model = Compiler::new(&ctx, Mode::Strict)
            .compile(&program(LEGAL))
            .expect("compile");
        let labels: Vec<&str> = model.assertions.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["fact:Inadempimento(d,c)", "rule:r1"]);
        assert!(model.query.is_some());
    }

    #[test]
    fn subsort_constant_fills_supersort_position() {
        // `d: Debitore` used where `Soggetto` is declared; roots coincide.
        let ctx = Context::new(&Config::new());
        assert!(Compiler::new(&ctx, Mode::Strict)
            .compile(&program(LEGAL))
            .is_ok());
    }

    #[test]
    fn strict_mode_refuses_blocking_guardrail_issues() {
        let ctx = Context::new(&Config::new());
        let p = program(
            r#"{
                "version": "1.0",
                "rules": [{"id": "r1", "condition": "Ghost(x)", "conclusion": "Ghost(x)"}]
            }"#,
        );
        let err = Compiler::new(&ctx, Mode::Strict).compile(&p).unwrap_err();
        assert!(matches!(err, CompileError::Guardrail { .. }));
    }

    #[test]
    fn lenient_mode_creates_symbols_on_first_use() {
        let ctx = Context::new(&Config::new());
        let p = program(
            r#"{
                "version": "1.0",
                "rules": [{"id": "r1", "condition": "Ghost(x)", "conclusion": "Ghost(x)"}]
            }"#,
        );
        let model = Compiler::new(&ctx, Mode::Lenient).compile(&p).expect("compile");
        assert_eq!(model.assertions.len(), 1);
        assert!(!model.guardrail.ok);
    }

    #[test]
    fn repeated_references_share_one_symbol() {
        let ctx = Context::new(&Config::new());
        let p = program(
            r#"{
                "version": "1.0",
                "sorts": [{"name": "Contratto"}],
                "constants": [{"name": "c", "sort": "Contratto"}],
                "predicates": [{"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}],
                "facts": [{"predicate": "Valido", "args": ["c"]}],
                "rules": [{"id": "r1", "condition": "Valido(c)", "conclusion": "Valido(c)"}],
                "query": "Valido(c)"
            }"#,
        );
        let model = Compiler::new(&ctx, Mode::Strict).compile(&p).expect("compile");
        // Same symbol means the fact and the query are literally the same
        // term, so the trivial entailment holds at the solver level.
        let fact = &model.assertions[0].formula;
        let query = model.query.as_ref().expect("query");
        assert_eq!(fact.to_string(), query.to_string());
    }

    #[test]
    fn candidates_come_from_rule_conditions() {
        let ctx = Context::new(&Config::new());
        let model = Compiler::new(&ctx, Mode::Strict)
            .compile(&program(LEGAL))
            .expect("compile");
        let names: Vec<&String> = model.link_candidates.keys().collect();
        assert_eq!(names, vec!["Inadempimento"]);
    }

    #[test]
    fn query_atoms_are_fallback_candidates() {
        let ctx = Context::new(&Config::new());
        let p = program(
            r#"{
                "version": "1.0",
                "sorts": [{"name": "Contratto"}],
                "constants": [{"name": "c", "sort": "Contratto"}],
                "predicates": [{"name": "Valido", "arity": 1, "arg_sorts": ["Contratto"]}],
                "query": "Valido(c)"
            }"#,
        );
        let model = Compiler::new(&ctx, Mode::Strict).compile(&p).expect("compile");
        let names: Vec<&String> = model.link_candidates.keys().collect();
        assert_eq!(names, vec!["Valido"]);
    }

    #[test]
    fn conflicting_constant_sorts_are_an_error() {
        let ctx = Context::new(&Config::new());
        let p = program(
            r#"{
                "version": "1.0",
                "sorts": [{"name": "Soggetto"}, {"name": "Contratto"}],
                "constants": [{"name": "c", "sort": "Contratto"}],
                "predicates": [{"name": "Capace", "arity": 1, "arg_sorts": ["Soggetto"]}],
                "facts": [{"predicate": "Capace", "args": ["c"]}]
            }"#,
        );
        // Guardrail flags this in strict mode; lenient mode must still refuse
        // rather than hand Z3 an ill-sorted application.
        let err = Compiler::new(&ctx, Mode::Lenient).compile(&p).unwrap_err();
        assert!(matches!(err, CompileError::SortClash { .. }));
    }

    #[test]
    fn malformed_rule_expression_fails_even_in_lenient_mode() {
        let ctx = Context::new(&Config::new());
        let p = program(
            r#"{
                "version": "1.0",
                "rules": [{"id": "r1", "condition": "P and", "conclusion": "true"}]
            }"#,
        );
        let err = Compiler::new(&ctx, Mode::Lenient).compile(&p).unwrap_err();
        assert!(matches!(err, CompileError::Expr { .. }));
    }
}
