//! Mutation engine: weighted target selection, the operator draw, the syntax
//! filter, and one-point crossover.
//!
//! `mutate` applies one randomly drawn operator to a weighted line of the
//! variant and accepts the result only if it still parses; `crossover`
//! exchanges line-sequence tails between two parents. Both report failure
//! rather than returning an invalid program, and callers retry a bounded
//! number of times. Blind line edits in a whitespace-significant language are
//! structurally fragile; the validator filter plus retries is what keeps the
//! search productive without reasoning about indentation.
//!
//! All randomness flows through a caller-owned [`fastrand::Rng`] so a seeded
//! run replays exactly.

use core_program::{Program, WeightedLine};
use core_syntax::SyntaxValidator;
use thiserror::Error;
use tracing::trace;

mod edits;

/// Retry budget callers give `mutate` before giving up on a variant.
pub const MUTATION_RETRIES: usize = 10;
/// Pivot attempts before a crossover is declared structurally invalid.
const CROSSOVER_PIVOT_RETRIES: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutateError {
    #[error("no localized line is available for mutation")]
    NoCandidates,
    #[error("target line carries no comparison operator")]
    NoComparison,
    #[error("target line carries no boolean connective")]
    NoConnective,
    #[error("mutated program no longer parses")]
    SyntaxRejected,
    #[error("crossover needs at least two lines in both parents")]
    CrossoverDegenerate,
    #[error("no crossover pivot produced a parseable offspring")]
    CrossoverRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Delete,
    Insert,
    Swap,
    Expression,
    Boolean,
}

/// Operator multiset for the per-call draw. Comparison and connective flips
/// are doubly weighted; they address the most common real-world defects.
const OPERATOR_DRAW: [Operator; 7] = [
    Operator::Delete,
    Operator::Insert,
    Operator::Swap,
    Operator::Expression,
    Operator::Expression,
    Operator::Boolean,
    Operator::Boolean,
];

/// Apply one random operator to `variant`, steered by suspiciousness weights.
///
/// Target selection is roulette-wheel over the non-zero weights; when every
/// weight is zero, all localized lines count equally. The result is passed
/// through the syntax validator and rejected on failure.
pub fn mutate(
    variant: &Program,
    weights: &[WeightedLine],
    validator: &mut dyn SyntaxValidator,
    rng: &mut fastrand::Rng,
) -> Result<Program, MutateError> {
    let candidates = candidate_positions(weights, variant.line_count());
    if candidates.is_empty() {
        return Err(MutateError::NoCandidates);
    }
    let operator = OPERATOR_DRAW[rng.usize(0..OPERATOR_DRAW.len())];
    let target = roulette(&candidates, rng);
    let mutated = match operator {
        Operator::Delete => edits::delete(variant, target, validator.no_op_statement()),
        Operator::Insert => {
            let source = uniform_source(&candidates, rng);
            edits::insert(variant, target, source)
        }
        Operator::Swap => {
            let source = uniform_source(&candidates, rng);
            edits::swap(variant, target, source)
        }
        Operator::Expression => {
            let body = variant.line_body(target).ok_or(MutateError::NoCandidates)?;
            let flipped = edits::expression(body, rng)?;
            variant.with_line_body(target, &flipped)
        }
        Operator::Boolean => {
            let body = variant.line_body(target).ok_or(MutateError::NoCandidates)?;
            let swapped = edits::boolean(body, rng)?;
            variant.with_line_body(target, &swapped)
        }
    };
    if !validator.is_valid(&mutated.to_source()) {
        return Err(MutateError::SyntaxRejected);
    }
    trace!(target: "mutate", op = ?operator, line = target + 1, "mutation_accepted");
    Ok(mutated)
}

/// One-point crossover over line sequences.
///
/// Picks a pivot in `[1, min(|A|, |B|) - 1]` and exchanges tails. When both
/// offspring parse they are returned as a pair; when exactly one parses it is
/// returned duplicated; when neither does, further pivots are tried before
/// reporting failure.
pub fn crossover(
    parent_a: &Program,
    parent_b: &Program,
    validator: &mut dyn SyntaxValidator,
    rng: &mut fastrand::Rng,
) -> Result<(Program, Program), MutateError> {
    let limit = parent_a.line_count().min(parent_b.line_count());
    if limit <= 1 {
        return Err(MutateError::CrossoverDegenerate);
    }
    for _ in 0..CROSSOVER_PIVOT_RETRIES {
        let pivot = rng.usize(1..limit);
        let child_a = splice(parent_a, parent_b, pivot);
        let child_b = splice(parent_b, parent_a, pivot);
        let a_valid = validator.is_valid(&child_a.to_source());
        let b_valid = validator.is_valid(&child_b.to_source());
        match (a_valid, b_valid) {
            (true, true) => {
                trace!(target: "mutate", pivot, "crossover_accepted");
                return Ok((child_a, child_b));
            }
            (true, false) => return Ok((child_a.clone(), child_a)),
            (false, true) => return Ok((child_b.clone(), child_b)),
            (false, false) => continue,
        }
    }
    Err(MutateError::CrossoverRejected)
}

fn splice(head: &Program, tail: &Program, pivot: usize) -> Program {
    let mut lines = head.lines()[..pivot].to_vec();
    lines.extend_from_slice(&tail.lines()[pivot..]);
    Program::from_lines(lines)
}

/// 0-based candidate positions with their selection weights, confined to the
/// variant's current bounds. Falls back to uniform weight over all localized
/// lines when no positively weighted line is usable.
fn candidate_positions(weights: &[WeightedLine], line_count: usize) -> Vec<(usize, f64)> {
    let in_bounds = |w: &&WeightedLine| w.line >= 1 && (w.line as usize) <= line_count;
    let candidates: Vec<(usize, f64)> = weights
        .iter()
        .filter(|w| w.weight > 0.0)
        .filter(in_bounds)
        .map(|w| (w.line as usize - 1, w.weight))
        .collect();
    if !candidates.is_empty() {
        return candidates;
    }
    weights
        .iter()
        .filter(in_bounds)
        .map(|w| (w.line as usize - 1, 1.0))
        .collect()
}

/// Roulette-wheel draw: the first candidate whose running weight sum exceeds
/// a uniform draw over the total.
fn roulette(candidates: &[(usize, f64)], rng: &mut fastrand::Rng) -> usize {
    let total: f64 = candidates.iter().map(|(_, weight)| weight).sum();
    let draw = rng.f64() * total;
    let mut running = 0.0;
    for &(position, weight) in candidates {
        running += weight;
        if running > draw {
            return position;
        }
    }
    // Accumulated rounding can leave the draw on the boundary.
    candidates[candidates.len() - 1].0
}

fn uniform_source(candidates: &[(usize, f64)], rng: &mut fastrand::Rng) -> usize {
    candidates[rng.usize(0..candidates.len())].0
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_syntax::PythonSyntax;

    const PATIENT: &str = "def find_max(numbers):\n    current = numbers[0]\n    for n in numbers[1:]:\n        if n < current:\n            current = n\n    return current\n";

    fn weights() -> Vec<WeightedLine> {
        vec![
            WeightedLine::new(2, 0.1),
            WeightedLine::new(3, 0.1),
            WeightedLine::new(4, 1.0),
            WeightedLine::new(6, 0.0),
        ]
    }

    #[test]
    fn mutation_results_always_parse() {
        let program = Program::from_source(PATIENT);
        let weights = weights();
        let mut validator = PythonSyntax::new().unwrap();
        let mut rng = fastrand::Rng::with_seed(11);
        let mut accepted = 0;
        for _ in 0..64 {
            if let Ok(mutant) = mutate(&program, &weights, &mut validator, &mut rng) {
                accepted += 1;
                assert!(validator.is_valid(&mutant.to_source()));
                // delete/swap/expression/boolean keep the count; insert adds one.
                let delta = mutant.line_count() as i64 - program.line_count() as i64;
                assert!(delta == 0 || delta == 1, "unexpected length delta {delta}");
            }
        }
        assert!(accepted > 0, "no mutation accepted in 64 draws");
    }

    #[test]
    fn mutation_replays_under_a_fixed_seed() {
        let program = Program::from_source(PATIENT);
        let weights = weights();
        let mut validator = PythonSyntax::new().unwrap();
        let one: Vec<_> = {
            let mut rng = fastrand::Rng::with_seed(42);
            (0..16)
                .map(|_| mutate(&program, &weights, &mut validator, &mut rng).ok())
                .collect()
        };
        let two: Vec<_> = {
            let mut rng = fastrand::Rng::with_seed(42);
            (0..16)
                .map(|_| mutate(&program, &weights, &mut validator, &mut rng).ok())
                .collect()
        };
        assert_eq!(one, two);
    }

    #[test]
    fn all_zero_weights_fall_back_to_every_localized_line() {
        let zero = vec![WeightedLine::new(2, 0.0), WeightedLine::new(4, 0.0)];
        assert_eq!(
            candidate_positions(&zero, 6),
            vec![(1, 1.0), (3, 1.0)]
        );
    }

    #[test]
    fn candidates_outside_the_variant_are_dropped() {
        let weights = vec![WeightedLine::new(2, 1.0), WeightedLine::new(40, 1.0)];
        assert_eq!(candidate_positions(&weights, 6), vec![(1, 1.0)]);
    }

    #[test]
    fn no_usable_candidate_is_a_failure() {
        let program = Program::from_source(PATIENT);
        let mut validator = PythonSyntax::new().unwrap();
        let mut rng = fastrand::Rng::with_seed(3);
        assert_eq!(
            mutate(&program, &[], &mut validator, &mut rng),
            Err(MutateError::NoCandidates)
        );
    }

    #[test]
    fn roulette_returns_first_position_exceeding_the_draw() {
        let mut rng = fastrand::Rng::with_seed(5);
        assert_eq!(roulette(&[(3, 1.0)], &mut rng), 3);
        // A dominant weight wins effectively always.
        let skewed = [(0, 1000.0), (9, 0.001)];
        let hits = (0..64).filter(|_| roulette(&skewed, &mut rng) == 0).count();
        assert!(hits >= 60, "dominant weight drawn only {hits}/64 times");
    }

    #[test]
    fn crossover_below_two_lines_fails() {
        let single = Program::from_source("x = 1\n");
        let other = Program::from_source(PATIENT);
        let mut validator = PythonSyntax::new().unwrap();
        let mut rng = fastrand::Rng::with_seed(9);
        assert_eq!(
            crossover(&single, &other, &mut validator, &mut rng),
            Err(MutateError::CrossoverDegenerate)
        );
    }

    #[test]
    fn crossover_offspring_swap_tails() {
        let parent_a = Program::from_source("def f(x):\n    y = x + 1\n    return y\n");
        let parent_b = Program::from_source("def f(x):\n    y = x - 1\n    return y\n");
        let mut validator = PythonSyntax::new().unwrap();
        let mut rng = fastrand::Rng::with_seed(13);
        let (child_a, child_b) = crossover(&parent_a, &parent_b, &mut validator, &mut rng).unwrap();
        assert_eq!(child_a.line_count(), 3);
        assert_eq!(child_b.line_count(), 3);
        assert!(validator.is_valid(&child_a.to_source()));
        assert!(validator.is_valid(&child_b.to_source()));
    }
}
