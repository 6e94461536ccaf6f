//! Common outcome types and reporting for smoketest cases.

use serde::Serialize;

/// Result of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    /// Registry name of the scenario
    pub name: &'static str,
    /// Whether every check in the scenario held
    pub success: bool,
    /// Wall-clock duration of the run in milliseconds
    pub elapsed_ms: u64,
    /// Observed-result description, or the failure
    pub message: String,
}

impl CaseOutcome {
    /// One-line rendering used in non-quiet runs.
    pub fn render(&self) -> String {
        let verdict = if self.success { "ok" } else { "FAILED" };
        format!(
            "{:<16} {} ({} ms): {}",
            self.name, verdict, self.elapsed_ms, self.message
        )
    }
}

/// Print the aggregate pass/fail line.
pub fn print_summary(outcomes: &[CaseOutcome]) {
    let passed = outcomes.iter().filter(|o| o.success).count();
    println!("smoketest: {passed}/{} scenarios passed", outcomes.len());
}
