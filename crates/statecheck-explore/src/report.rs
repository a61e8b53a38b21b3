//! Format search reports for human consumption.

use crate::search::{SearchOutcome, SearchReport, Violation};

/// Format a search report for human consumption.
pub fn format_report(report: &SearchReport) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  Statecheck Search Report\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    // Summary
    output.push_str(&format!("Outcome:                {}\n", outcome_text(report.outcome)));
    output.push_str(&format!("Distinct states:        {}\n", report.states));
    output.push_str(&format!("Transitions:            {}\n", report.transitions));
    output.push_str(&format!("Steps:                  {}\n", report.steps));
    output.push_str(&format!("Max depth:              {}\n", report.max_depth));
    output.push_str(&format!("Violations:             {}\n", report.violations.len()));
    output.push('\n');

    output.push_str("─── State Space ───────────────────────────────────────────────────────\n");
    output.push_str(&format!("New states:             {}\n", report.new_states));
    output.push_str(&format!("Revisited states:       {}\n", report.seen_states));
    output.push_str(&format!("End states:             {}\n", report.end_states));
    output.push_str(&format!("Backtracks:             {}\n", report.backtracks));
    output.push_str(&format!("Object ids (SGOIDs):    {}\n", report.sgoids));
    if report.snapshots > 0 {
        output.push_str(&format!("Snapshot round trips:   {}\n", report.snapshots));
    }
    output.push('\n');

    if !report.violations.is_empty() {
        output
            .push_str("─── Violations Found ──────────────────────────────────────────────────\n");
        for (i, violation) in report.violations.iter().enumerate() {
            output.push_str(&format!("\n{}. State #{}\n", i + 1, violation.state_id));
            output.push_str(&format_violation(violation));
        }
        output.push('\n');
    } else {
        output
            .push_str("─── No Violations Found ───────────────────────────────────────────────\n");
        output.push_str("Every explored state satisfied the checked property.\n\n");
    }

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");

    output
}

fn outcome_text(outcome: SearchOutcome) -> &'static str {
    match outcome {
        SearchOutcome::Exhausted => "state space exhausted",
        SearchOutcome::EndStateReached => "stopped at first end state",
        SearchOutcome::Stopped => "stopped on request",
    }
}

/// Format a violation with the path that leads to it.
pub fn format_violation(violation: &Violation) -> String {
    let mut output = String::new();

    output.push_str(&format!("   Message:      {}\n", violation.message));
    output.push_str(&format!("   Depth:        {}\n", violation.depth));

    if !violation.trace.is_empty() {
        output.push_str("\n   Trace:\n");
        for (i, line) in violation.trace.iter().take(20).enumerate() {
            output.push_str(&format!("     [{}] {}\n", i + 1, line));
        }
        if violation.trace.len() > 20 {
            output.push_str(&format!(
                "     ... and {} more transitions\n",
                violation.trace.len() - 20
            ));
        }
    }

    output
}
