//! Deterministic history summarizer.

use crate::controller::IterationRecord;
use crate::proposer::Summarizer;

/// Summarizes the tail of the session history, newest last. Output is plain
/// text, stable for identical histories, and intentionally free of solver
/// internals: the proposer sees verdicts and diagnostics, nothing else.
#[derive(Debug, Clone, Copy)]
pub struct TailSummarizer {
    /// How many trailing iterations to include.
    pub window: usize,
}

impl Default for TailSummarizer {
    fn default() -> Self {
        Self { window: 3 }
    }
}

impl Summarizer for TailSummarizer {
    fn summarize(&self, history: &[IterationRecord]) -> String {
        let start = history.len().saturating_sub(self.window);
        let mut lines = Vec::with_capacity(history.len() - start);
        for record in &history[start..] {
            let mut line = format!(
                "iteration {}: status={}",
                record.index,
                record.feedback.status.as_str()
            );
            if !record.feedback.missing_links.is_empty() {
                line.push_str(&format!(
                    " missing_links=[{}]",
                    record.feedback.missing_links.join(", ")
                ));
            }
            if !record.feedback.conflicting_axioms.is_empty() {
                line.push_str(&format!(
                    " conflicting_axioms=[{}]",
                    record.feedback.conflicting_axioms.join(", ")
                ));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entail_dsl::guardrail::GuardrailReport;
    use entail_dsl::program::Program;
    use entail_solver::{Feedback, Status};

    fn record(index: usize, status: Status, links: &[&str]) -> IterationRecord {
        IterationRecord {
            index,
            program: Program::from_json(r#"{"version": "1.0"}"#).unwrap(),
            guardrail: GuardrailReport {
                ok: true,
                issues: Vec::new(),
            },
            feedback: Feedback::new(
                status,
                Vec::new(),
                links.iter().map(|s| s.to_string()).collect(),
            ),
            fingerprint: String::new(),
        }
    }

    #[test]
    fn keeps_only_the_trailing_window() {
        let history = vec![
            record(0, Status::ConsistentNoEntailment, &["A"]),
            record(1, Status::ConsistentNoEntailment, &["B"]),
            record(2, Status::ConsistentNoEntailment, &["C"]),
            record(3, Status::Inconsistent, &[]),
        ];
        let summary = TailSummarizer::default().summarize(&history);
        assert!(!summary.contains("iteration 0"));
        assert!(summary.contains("iteration 1"));
        assert!(summary.contains("iteration 3: status=inconsistent"));
    }

    #[test]
    fn summary_is_deterministic() {
        let history = vec![record(0, Status::ConsistentNoEntailment, &["NessoCausale"])];
        let summarizer = TailSummarizer::default();
        assert_eq!(summarizer.summarize(&history), summarizer.summarize(&history));
        assert_eq!(
            summarizer.summarize(&history),
            "iteration 0: status=consistent_no_entailment missing_links=[NessoCausale]"
        );
    }
}
