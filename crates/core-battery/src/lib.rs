//! Weighted test batteries and the fitness harness.
//!
//! A battery pairs two ordered lists of test cases with their weights:
//! positive cases anchor behaviour the patient already gets right, negative
//! cases describe the bug. Negative weight is expected to dominate positive
//! weight so the search gradient slopes toward fixing the bug rather than
//! merely preserving what already works.
//!
//! Fitness is the weighted count of passing cases. The harness never
//! short-circuits: every case runs on every evaluation, so the score is
//! monotone in the number of passing tests and the driver can observe
//! incremental progress.

use std::fs;
use std::path::Path;
use std::time::Duration;

use core_sandbox::{Executor, InvokeOutcome, SandboxError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BatteryError {
    #[error("failed to read test battery from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed test battery: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestLabel {
    Positive,
    Negative,
}

/// A single test case: argument list, reference value, and its label.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub inputs: Vec<Value>,
    pub expected: Value,
    pub label: TestLabel,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CaseFile {
    input: Vec<Value>,
    expected: Value,
    #[serde(default)]
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupFile {
    weight: f64,
    cases: Vec<CaseFile>,
}

#[derive(Debug, Deserialize)]
struct BatteryFile {
    function_name: String,
    #[serde(default)]
    max_fitness: Option<f64>,
    positive_tests: GroupFile,
    negative_tests: GroupFile,
}

/// The structured test set driving one repair session.
#[derive(Debug, Clone)]
pub struct TestBattery {
    pub function_name: String,
    pub positive_weight: f64,
    pub negative_weight: f64,
    pub positive: Vec<TestCase>,
    pub negative: Vec<TestCase>,
}

impl TestBattery {
    pub fn from_json(text: &str) -> Result<Self, BatteryError> {
        let file: BatteryFile = serde_json::from_str(text)?;
        let battery = Self {
            function_name: file.function_name,
            positive_weight: file.positive_tests.weight,
            negative_weight: file.negative_tests.weight,
            positive: into_cases(file.positive_tests.cases, TestLabel::Positive),
            negative: into_cases(file.negative_tests.cases, TestLabel::Negative),
        };
        if battery.negative_weight <= battery.positive_weight {
            warn!(
                target: "battery",
                positive = battery.positive_weight,
                negative = battery.negative_weight,
                "negative_weight_not_dominant"
            );
        }
        if let Some(declared) = file.max_fitness
            && (declared - battery.max_fitness()).abs() > f64::EPSILON
        {
            warn!(
                target: "battery",
                declared,
                computed = battery.max_fitness(),
                "declared_max_fitness_ignored"
            );
        }
        Ok(battery)
    }

    pub fn from_file(path: &Path) -> Result<Self, BatteryError> {
        let text = fs::read_to_string(path).map_err(|source| BatteryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Upper fitness bound: `|positive| * w_pos + |negative| * w_neg`.
    pub fn max_fitness(&self) -> f64 {
        self.positive.len() as f64 * self.positive_weight
            + self.negative.len() as f64 * self.negative_weight
    }

    pub fn weight_of(&self, label: TestLabel) -> f64 {
        match label {
            TestLabel::Positive => self.positive_weight,
            TestLabel::Negative => self.negative_weight,
        }
    }

    /// All cases in declaration order, positives first.
    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.positive.iter().chain(self.negative.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }
}

fn into_cases(cases: Vec<CaseFile>, label: TestLabel) -> Vec<TestCase> {
    cases
        .into_iter()
        .map(|case| TestCase {
            inputs: case.input,
            expected: case.expected,
            label,
            note: case.note,
        })
        .collect()
}

/// Run the battery against one candidate and return its summed fitness.
///
/// Any non-`ok` outcome on a case, or an `ok` value that is not structurally
/// equal to the reference, contributes zero; the remaining cases still run.
pub fn evaluate(
    executor: &mut dyn Executor,
    battery: &TestBattery,
    source: &str,
    deadline: Duration,
) -> Result<f64, SandboxError> {
    let handle = executor.load(source)?;
    let mut fitness = 0.0;
    for (index, case) in battery.cases().enumerate() {
        // Fresh deep copy per case; a candidate mutating its arguments must
        // not leak state into later cases.
        let args = case.inputs.clone();
        let outcome = executor.invoke(&handle, &battery.function_name, &args, deadline)?;
        let passed = match &outcome {
            InvokeOutcome::Ok(value) => values_equal(value, &case.expected),
            _ => false,
        };
        if passed {
            fitness += battery.weight_of(case.label);
        } else {
            debug!(
                target: "battery",
                candidate = handle.id(),
                case = index,
                label = ?case.label,
                "case_failed"
            );
        }
    }
    Ok(fitness)
}

/// Structural equality by value. Numbers compare numerically across the
/// integer/float divide, matching the equality the reference values were
/// authored under.
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_sandbox::{DEFAULT_PYTHON, Sandbox};
    use serde_json::json;

    const BATTERY: &str = r#"{
        "function_name": "find_max",
        "max_fitness": 21.0,
        "positive_tests": {
            "weight": 1.0,
            "cases": [
                { "input": [[5, 5, 5]], "expected": 5 },
                { "input": [[42]], "expected": 42, "note": "singleton" }
            ]
        },
        "negative_tests": {
            "weight": 10.0,
            "cases": [
                { "input": [[1, 2, 3, 4]], "expected": 4 }
            ]
        }
    }"#;

    #[test]
    fn parses_schema_and_computes_max_fitness() {
        let battery = TestBattery::from_json(BATTERY).unwrap();
        assert_eq!(battery.function_name, "find_max");
        assert_eq!(battery.positive.len(), 2);
        assert_eq!(battery.negative.len(), 1);
        assert_eq!(battery.max_fitness(), 12.0);
        assert_eq!(battery.positive[1].note.as_deref(), Some("singleton"));
        assert_eq!(battery.cases().count(), 3);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            TestBattery::from_json("{ not json"),
            Err(BatteryError::Malformed(_))
        ));
        assert!(matches!(
            TestBattery::from_json(r#"{"function_name": "f"}"#),
            Err(BatteryError::Malformed(_))
        ));
    }

    #[test]
    fn empty_battery_has_zero_bound() {
        let battery = TestBattery::from_json(
            r#"{
                "function_name": "f",
                "positive_tests": { "weight": 1.0, "cases": [] },
                "negative_tests": { "weight": 10.0, "cases": [] }
            }"#,
        )
        .unwrap();
        assert!(battery.is_empty());
        assert_eq!(battery.max_fitness(), 0.0);
    }

    #[test]
    fn value_equality_is_structural() {
        assert!(values_equal(&json!(4), &json!(4.0)));
        assert!(values_equal(&json!([1, [2, 3]]), &json!([1.0, [2, 3]])));
        assert!(values_equal(&json!({"a": 1}), &json!({"a": 1.0})));
        assert!(values_equal(&json!(null), &json!(null)));
        assert!(!values_equal(&json!(true), &json!(1)));
        assert!(!values_equal(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(!values_equal(&json!({"a": 1}), &json!({"b": 1})));
    }

    #[test]
    fn buggy_patient_scores_only_its_positives() {
        let battery = TestBattery::from_json(BATTERY).unwrap();
        let buggy = "def find_max(numbers):\n    current = numbers[0]\n    for n in numbers[1:]:\n        if n < current:\n            current = n\n    return current\n";
        let mut sandbox = Sandbox::new(DEFAULT_PYTHON).unwrap();
        let fitness = evaluate(
            &mut sandbox,
            &battery,
            buggy,
            core_sandbox::DEFAULT_DEADLINE,
        )
        .unwrap();
        assert_eq!(fitness, 2.0);
    }

    #[test]
    fn repaired_candidate_reaches_the_bound() {
        let battery = TestBattery::from_json(BATTERY).unwrap();
        let repaired = "def find_max(numbers):\n    current = numbers[0]\n    for n in numbers[1:]:\n        if n > current:\n            current = n\n    return current\n";
        let mut sandbox = Sandbox::new(DEFAULT_PYTHON).unwrap();
        let fitness = evaluate(
            &mut sandbox,
            &battery,
            repaired,
            core_sandbox::DEFAULT_DEADLINE,
        )
        .unwrap();
        assert_eq!(fitness, battery.max_fitness());
    }

    #[test]
    fn timeout_on_one_case_does_not_stop_the_rest() {
        let battery = TestBattery::from_json(
            r#"{
                "function_name": "f",
                "positive_tests": {
                    "weight": 1.0,
                    "cases": [ { "input": [0], "expected": 0 } ]
                },
                "negative_tests": {
                    "weight": 10.0,
                    "cases": [ { "input": [3], "expected": 3 } ]
                }
            }"#,
        )
        .unwrap();
        // Spins forever on the first case, returns promptly on the second.
        let source = "def f(x):\n    while x == 0:\n        pass\n    return x\n";
        let mut sandbox = Sandbox::new(DEFAULT_PYTHON).unwrap();
        let fitness = evaluate(
            &mut sandbox,
            &battery,
            source,
            std::time::Duration::from_millis(300),
        )
        .unwrap();
        assert_eq!(fitness, 10.0);
    }
}
