//! Entail logic-program DSL (versioned JSON dialect)
//!
//! This crate defines the typed program model exchanged with untrusted
//! proposers, the boolean expression surface syntax embedded in rule and
//! query strings, and the guardrail validator that vets a program before it
//! reaches the constraint compiler.
//!
//! The model is deliberately dumb: construction and validation are separate
//! steps, validation never mutates, and everything downstream can rely on
//! canonical renderings (see [`expr::Expr::render`]) for identity checks.

pub mod digest;
pub mod expr;
pub mod guardrail;
pub mod program;
