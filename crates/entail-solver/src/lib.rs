//! Symbolic backend: constraint compilation and verdict interpretation.
//!
//! The compiler lowers a validated program into labeled Z3 assertions; the
//! feedback interpreter runs the consistency and entailment checks and maps
//! unsat cores back to program identifiers. Neither half retains state
//! between calls, and a compiled model never outlives the single solver
//! context it was built against.

pub mod compile;
pub mod feedback;

pub use compile::{CompileError, CompiledModel, Compiler, Mode};
pub use feedback::{evaluate, Feedback, Status};
