//! Typed in-memory model of a logic program.
//!
//! Programs arrive from untrusted proposers (a language model, a human, a
//! test fixture) as JSON. Everything past [`Program::from_json`] is treated
//! as *structurally* well-formed but still semantically unvalidated: the
//! guardrail runs separately and never repairs anything silently.
//!
//! Wire contract:
//! - unknown JSON fields are ignored,
//! - missing required fields are a [`StructuralError`], never a guardrail
//!   issue,
//! - a `Program` is immutable once constructed; the iteration loop never
//!   mutates one in place.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current wire format version accepted by the pipeline.
pub const PROGRAM_VERSION: &str = "1.0";

/// A named type tag. Sorts may declare a parent (`extends`), single level of
/// extension only; cycles are rejected by the guardrail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Static declaration of a predicate symbol.
///
/// `allow_undeclared_instances` marks predicates whose atom arguments may
/// appear without a matching constant declaration (e.g. preprocessing-derived
/// symbols); the compiler auto-declares those as fresh constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredicateDecl {
    pub name: String,
    pub arity: usize,
    #[serde(default)]
    pub arg_sorts: Vec<String>,
    #[serde(default)]
    pub allow_undeclared_instances: bool,
}

/// A named individual of a declared sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    pub sort: String,
}

fn default_true() -> bool {
    true
}

/// A ground atomic assertion. Bare boolean flags are facts with no args.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_true")]
    pub value: bool,
}

/// `condition implies conclusion`, universally closed over free symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub condition: String,
    pub conclusion: String,
}

/// A formula asserted unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Axiom {
    pub id: String,
    pub formula: String,
}

/// One versioned instance of the logic DSL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub version: String,
    #[serde(default)]
    pub sorts: Vec<Sort>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub predicates: Vec<PredicateDecl>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub axioms: Vec<Axiom>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Malformed program on the wire. Fatal at parse time, never retried
/// internally.
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("malformed program JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Program {
    /// The only trusted entry point for externally-sourced programs.
    pub fn from_json(text: &str) -> Result<Program, StructuralError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, StructuralError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn predicate(&self, name: &str) -> Option<&PredicateDecl> {
        self.predicates.iter().find(|p| p.name == name)
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn sort(&self, name: &str) -> Option<&Sort> {
        self.sorts.iter().find(|s| s.name == name)
    }

    /// True when `actual` is `declared` or extends it (single-level chains
    /// are walked transitively, with a hop cap in case of declaration
    /// cycles; cycles themselves are a guardrail finding).
    pub fn sort_compatible(&self, actual: &str, declared: &str) -> bool {
        let mut current = actual;
        for _ in 0..=self.sorts.len() {
            if current == declared {
                return true;
            }
            match self.sort(current).and_then(|s| s.extends.as_deref()) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
        false
    }

    /// Stable identity digest of this program (see [`crate::digest`]).
    pub fn digest(&self) -> String {
        // Struct field order is fixed, so the JSON rendering is stable for
        // identical programs.
        let text = serde_json::to_string(self).unwrap_or_default();
        crate::digest::fnv1a64_digest_bytes(text.as_bytes())
    }
}
