//! Syntax validation for candidate programs.
//!
//! Mutation operates on raw lines of a whitespace-significant language, so a
//! large share of raw edits produce text that no longer parses. This crate is
//! the single authority that keeps the approach sound: every operator output
//! is parsed with the reference grammar and rejected unless it forms a legal
//! program. Validation never executes anything.
//!
//! The validator is a trait so that patient languages other than Python can be
//! plugged in; alongside the grammar each implementation names the language's
//! indentation-preserving no-op statement, which the DELETE operator uses to
//! vacate a line without collapsing its block.

use thiserror::Error;
use tracing::trace;
use tree_sitter::Parser;

#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("grammar rejected by tree-sitter runtime: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),
}

pub trait SyntaxValidator {
    /// Whether the concatenated source parses as a legal program.
    fn is_valid(&mut self, source: &str) -> bool;

    /// The statement substituted for a deleted line, before re-indentation.
    fn no_op_statement(&self) -> &'static str;
}

/// Python validator backed by the tree-sitter reference grammar.
pub struct PythonSyntax {
    parser: Parser,
}

impl PythonSyntax {
    pub fn new() -> Result<Self, SyntaxError> {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into())?;
        Ok(Self { parser })
    }
}

impl SyntaxValidator for PythonSyntax {
    fn is_valid(&mut self, source: &str) -> bool {
        let valid = match self.parser.parse(source, None) {
            Some(tree) => !tree.root_node().has_error(),
            None => false,
        };
        if !valid {
            trace!(target: "syntax", bytes = source.len(), "parse_rejected");
        }
        valid
    }

    fn no_op_statement(&self) -> &'static str {
        "pass"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PythonSyntax {
        PythonSyntax::new().unwrap()
    }

    #[test]
    fn accepts_well_formed_function() {
        let mut v = validator();
        assert!(v.is_valid("def f(x):\n    if x < 0:\n        return -x\n    return x\n"));
    }

    #[test]
    fn accepts_empty_source() {
        let mut v = validator();
        assert!(v.is_valid(""));
    }

    #[test]
    fn rejects_empty_suite() {
        let mut v = validator();
        assert!(!v.is_valid("def f(x):\nreturn x\n"));
    }

    #[test]
    fn rejects_broken_operator() {
        let mut v = validator();
        assert!(!v.is_valid("def f(x):\n    return x -< 1\n"));
    }

    #[test]
    fn rejects_dangling_block_header() {
        let mut v = validator();
        assert!(!v.is_valid("def f(x):\n"));
    }

    #[test]
    fn no_op_keeps_block_structure() {
        let mut v = validator();
        let no_op = v.no_op_statement();
        assert!(v.is_valid(&format!("def f(x):\n    if x:\n        {no_op}\n    return x\n")));
    }
}
