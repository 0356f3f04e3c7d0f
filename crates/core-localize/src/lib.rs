//! Fault localization by differential execution tracing.
//!
//! Two coverage sets are collected against the original patient: `P`, the
//! lines executed by at least one positive test, and `F`, the lines executed
//! by at least one negative test. Each line in `P ∪ F` is then weighted:
//!
//! - `1.0`: in `F` but not `P`. Exclusively on the failure path, mutating
//!   here is maximally likely to fix without regression.
//! - `0.1`: in both. Shared path, mutation is risky but possibly necessary.
//! - `0.0`: in `P` only. Editing cannot influence the failing tests.
//!
//! Localization runs once per repair session; weights are regenerated only if
//! the patient changes.

use std::collections::BTreeSet;

use core_battery::TestBattery;
use core_program::WeightedLine;
use core_sandbox::{Executor, Handle, SandboxError};
use tracing::{debug, info};

pub const WEIGHT_FAIL_ONLY: f64 = 1.0;
pub const WEIGHT_SHARED: f64 = 0.1;
pub const WEIGHT_PASS_ONLY: f64 = 0.0;

/// Trace the battery against a staged patient and derive per-line weights,
/// ordered by line number.
pub fn localize(
    executor: &dyn Executor,
    handle: &Handle,
    battery: &TestBattery,
) -> Result<Vec<WeightedLine>, SandboxError> {
    let mut pass_lines = BTreeSet::new();
    for case in &battery.positive {
        pass_lines.extend(executor.trace(handle, &battery.function_name, &case.inputs)?);
    }
    let mut fail_lines = BTreeSet::new();
    for case in &battery.negative {
        fail_lines.extend(executor.trace(handle, &battery.function_name, &case.inputs)?);
    }

    let weights: Vec<WeightedLine> = pass_lines
        .union(&fail_lines)
        .map(|&line| {
            let weight = if fail_lines.contains(&line) {
                if pass_lines.contains(&line) {
                    WEIGHT_SHARED
                } else {
                    WEIGHT_FAIL_ONLY
                }
            } else {
                WEIGHT_PASS_ONLY
            };
            WeightedLine::new(line, weight)
        })
        .collect();

    for entry in &weights {
        debug!(target: "localize", line = entry.line, weight = entry.weight, "line_weighted");
    }
    info!(
        target: "localize",
        pass_lines = pass_lines.len(),
        fail_lines = fail_lines.len(),
        suspicious = weights.iter().filter(|w| w.weight > 0.0).count(),
        "localization_complete"
    );
    Ok(weights)
}
