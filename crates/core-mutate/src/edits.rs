//! The five line-level edit operators.
//!
//! Structural edits (delete, insert, swap) transform whole line sequences and
//! always preserve each touched position's original indentation so block
//! structure survives in a whitespace-significant language. Token edits
//! (expression, boolean) rewrite a single operator occurrence within one
//! line's body.

use std::sync::LazyLock;

use core_program::{Program, indent_prefix, is_blank};
use regex::Regex;

use crate::MutateError;

/// Comparison operators with their substitution sets. Ordered longest first;
/// scanning honors this order so `<=` is never read as `<` followed by `=`.
const COMPARISONS: &[(&str, [&str; 3])] = &[
    ("<=", [">=", "<", "=="]),
    (">=", ["<=", ">", "=="]),
    ("==", ["!=", "<=", ">="]),
    ("!=", ["==", "<", ">"]),
    ("<", [">", "<=", "!="]),
    (">", ["<", ">=", "!="]),
];

static CONNECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(and|or)\b").expect("literal pattern"));

/// Replace line `target` with the language no-op, keeping the original
/// leading whitespace. Line count is preserved and no suite is left empty.
pub(crate) fn delete(program: &Program, target: usize, no_op: &str) -> Program {
    match program.line_body(target) {
        Some(body) => {
            let replacement = format!("{}{}", indent_prefix(body), no_op);
            program.with_line_body(target, &replacement)
        }
        None => program.clone(),
    }
}

/// Insert the content of line `source` after line `target`, stripped of its
/// own indentation and re-indented to match the target. Grows the program by
/// one line.
pub(crate) fn insert(program: &Program, target: usize, source: usize) -> Program {
    let (Some(target_body), Some(source_body)) =
        (program.line_body(target), program.line_body(source))
    else {
        return program.clone();
    };
    let inserted = format!("{}{}", indent_prefix(target_body), source_body.trim_start());
    program.with_line_inserted_after(target, &inserted)
}

/// Exchange the content of lines `a` and `b` while keeping each position's
/// original indentation. A blank endpoint makes the operator a no-op.
pub(crate) fn swap(program: &Program, a: usize, b: usize) -> Program {
    let (Some(body_a), Some(body_b)) = (program.line_body(a), program.line_body(b)) else {
        return program.clone();
    };
    if a == b || is_blank(body_a) || is_blank(body_b) {
        return program.clone();
    }
    let new_a = format!("{}{}", indent_prefix(body_a), body_b.trim_start());
    let new_b = format!("{}{}", indent_prefix(body_b), body_a.trim_start());
    program.with_line_body(a, &new_a).with_line_body(b, &new_b)
}

/// All comparison-operator occurrences in a line body, longest match first at
/// each position.
fn comparison_sites(body: &str) -> Vec<(usize, &'static str)> {
    let mut sites = Vec::new();
    let mut at = 0;
    while at < body.len() {
        let rest = &body[at..];
        match COMPARISONS.iter().find(|(op, _)| rest.starts_with(op)) {
            Some(&(op, _)) => {
                sites.push((at, op));
                at += op.len();
            }
            None => at += rest.chars().next().map_or(1, char::len_utf8),
        }
    }
    sites
}

/// Flip one comparison operator on the line to a uniform choice from its
/// substitution set.
pub(crate) fn expression(body: &str, rng: &mut fastrand::Rng) -> Result<String, MutateError> {
    let sites = comparison_sites(body);
    if sites.is_empty() {
        return Err(MutateError::NoComparison);
    }
    let (at, op) = sites[rng.usize(0..sites.len())];
    let replacements = COMPARISONS
        .iter()
        .find(|(name, _)| *name == op)
        .map(|(_, set)| set)
        .ok_or(MutateError::NoComparison)?;
    let replacement = replacements[rng.usize(0..replacements.len())];
    Ok(format!(
        "{}{}{}",
        &body[..at],
        replacement,
        &body[at + op.len()..]
    ))
}

/// Swap a single word-bounded `and`/`or` connective on the line.
pub(crate) fn boolean(body: &str, rng: &mut fastrand::Rng) -> Result<String, MutateError> {
    let sites: Vec<_> = CONNECTIVE.find_iter(body).collect();
    if sites.is_empty() {
        return Err(MutateError::NoConnective);
    }
    let site = &sites[rng.usize(0..sites.len())];
    let swapped = if site.as_str() == "and" { "or" } else { "and" };
    Ok(format!(
        "{}{}{}",
        &body[..site.start()],
        swapped,
        &body[site.end()..]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str =
        "def clamp(x):\n    if x < 0:\n        return 0\n    return x\n";

    #[test]
    fn delete_preserves_line_count_and_indentation() {
        let program = Program::from_source(SOURCE);
        let deleted = delete(&program, 2, "pass");
        assert_eq!(deleted.line_count(), program.line_count());
        assert_eq!(deleted.line(2), Some("        pass\n"));
    }

    #[test]
    fn insert_reindents_donor_content() {
        let program = Program::from_source(SOURCE);
        let grown = insert(&program, 2, 3);
        assert_eq!(grown.line_count(), program.line_count() + 1);
        assert_eq!(grown.line(3), Some("        return x\n"));
        // Everything after the insertion point shifts down unchanged.
        assert_eq!(grown.line(4), Some("    return x\n"));
    }

    #[test]
    fn swap_exchanges_content_but_not_indentation() {
        let program = Program::from_source(SOURCE);
        let swapped = swap(&program, 1, 3);
        assert_eq!(swapped.line(1), Some("    return x\n"));
        assert_eq!(swapped.line(3), Some("    if x < 0:\n"));
    }

    #[test]
    fn swap_with_blank_endpoint_is_a_no_op() {
        let program = Program::from_source("x = 1\n\ny = 2\n");
        assert_eq!(swap(&program, 0, 1), program);
        assert_eq!(swap(&program, 2, 2), program);
    }

    #[test]
    fn comparison_scan_prefers_longer_operators() {
        assert_eq!(comparison_sites("if a <= b:"), vec![(5, "<=")]);
        assert_eq!(comparison_sites("if a < b != c:"), vec![(5, "<"), (9, "!=")]);
        assert!(comparison_sites("total += n").is_empty());
    }

    #[test]
    fn expression_flip_stays_in_the_substitution_set() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..32 {
            let flipped = expression("    if n < current:", &mut rng).unwrap();
            assert!(
                ["    if n > current:", "    if n <= current:", "    if n != current:"]
                    .contains(&flipped.as_str()),
                "unexpected flip: {flipped}"
            );
        }
    }

    #[test]
    fn expression_without_comparison_fails() {
        let mut rng = fastrand::Rng::with_seed(7);
        assert!(matches!(
            expression("    total = total + n", &mut rng),
            Err(MutateError::NoComparison)
        ));
    }

    #[test]
    fn boolean_swaps_exactly_one_connective() {
        let mut rng = fastrand::Rng::with_seed(7);
        for _ in 0..32 {
            let swapped = boolean("return a and b or c", &mut rng).unwrap();
            assert!(
                ["return a or b or c", "return a and b and c"].contains(&swapped.as_str()),
                "unexpected swap: {swapped}"
            );
        }
    }

    #[test]
    fn boolean_requires_word_boundaries() {
        let mut rng = fastrand::Rng::with_seed(7);
        assert!(matches!(
            boolean("return android", &mut rng),
            Err(MutateError::NoConnective)
        ));
        assert!(matches!(
            boolean("sort(values)", &mut rng),
            Err(MutateError::NoConnective)
        ));
    }
}
