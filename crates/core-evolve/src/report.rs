//! Change report rendering.
//!
//! The report is plain text with a fixed section order: header (timestamp,
//! benchmark, function, result, fitness, generations), the weighted-line
//! table, the per-line diff, the numbered original source, and the final
//! variant source.

use core_program::{Program, WeightedLine};
use core_localize::{WEIGHT_FAIL_ONLY, WEIGHT_SHARED};

/// One differing line position between patient and variant. `before` is
/// `None` for an addition, `after` is `None` for a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    /// 1-based line number.
    pub line: u32,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// Positional per-line comparison of the patient against a variant,
/// including additions and deletions where lengths differ.
pub fn diff(patient: &Program, variant: &Program) -> Vec<DiffEntry> {
    let span = patient.line_count().max(variant.line_count());
    let mut entries = Vec::new();
    for index in 0..span {
        let before = patient.line_body(index);
        let after = variant.line_body(index);
        if before != after {
            entries.push(DiffEntry {
                line: index as u32 + 1,
                before: before.map(str::to_string),
                after: after.map(str::to_string),
            });
        }
    }
    entries
}

pub struct ReportContext<'a> {
    pub benchmark: &'a str,
    pub function_name: &'a str,
    pub success: bool,
    pub final_fitness: f64,
    pub max_fitness: f64,
    pub generations_run: u32,
    pub generation_budget: u32,
    pub discovery_generation: Option<u32>,
    pub weights: &'a [WeightedLine],
    pub patient: &'a Program,
    pub best: &'a Program,
    pub diff: &'a [DiffEntry],
}

pub fn render(ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    let rule = "=".repeat(64);

    out.push_str(&format!("{rule}\n  AUTOMATED PROGRAM REPAIR REPORT\n{rule}\n"));
    out.push_str(&format!(
        "Timestamp:   {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!("Benchmark:   {}\n", ctx.benchmark));
    out.push_str(&format!("Function:    {}\n", ctx.function_name));
    out.push_str(&format!(
        "Result:      {}\n",
        if ctx.success { "SUCCESS" } else { "FAILURE" }
    ));
    out.push_str(&format!(
        "Fitness:     {} / {}\n",
        ctx.final_fitness, ctx.max_fitness
    ));
    out.push_str(&format!(
        "Generations: {} of {}\n",
        ctx.generations_run, ctx.generation_budget
    ));
    if let Some(found) = ctx.discovery_generation {
        out.push_str(&format!("Repair found in generation {found}\n"));
    }

    out.push_str("\n--- Fault Localization ---\n");
    if ctx.weights.is_empty() {
        out.push_str("No lines were covered by the test battery.\n");
    } else {
        out.push_str(&format!("{:<8} {:<8} Status\n", "Line", "Weight"));
        for entry in ctx.weights {
            out.push_str(&format!(
                "{:<8} {:<8} {}\n",
                entry.line,
                entry.weight,
                weight_status(entry.weight)
            ));
        }
    }

    out.push_str("\n--- Changes ---\n");
    if ctx.diff.is_empty() {
        out.push_str("No lines differ from the patient.\n");
    } else {
        for entry in ctx.diff {
            out.push_str(&format!("Line {}:\n", entry.line));
            out.push_str(&format!(
                "  BEFORE: {}\n",
                entry.before.as_deref().unwrap_or("<none>")
            ));
            out.push_str(&format!(
                "  AFTER:  {}\n",
                entry.after.as_deref().unwrap_or("<none>")
            ));
        }
    }

    out.push_str("\n--- Original Program ---\n");
    push_numbered(&mut out, ctx.patient);

    if ctx.success {
        out.push_str("\n--- Repaired Program ---\n");
        push_numbered(&mut out, ctx.best);
    } else if !ctx.diff.is_empty() {
        out.push_str("\n--- Best Attempt ---\n");
        push_numbered(&mut out, ctx.best);
    }

    out
}

fn weight_status(weight: f64) -> &'static str {
    if weight == WEIGHT_FAIL_ONLY {
        "HIGHLY SUSPICIOUS (fail only)"
    } else if weight == WEIGHT_SHARED {
        "suspicious (fail and pass)"
    } else {
        "safe (pass only)"
    }
}

fn push_numbered(out: &mut String, program: &Program) {
    for index in 0..program.line_count() {
        if let Some(body) = program.line_body(index) {
            out.push_str(&format!("{:>4} | {}\n", index + 1, body));
        }
    }
}
