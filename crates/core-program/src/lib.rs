//! Line-sequence representation of a patient program and its variants.
//!
//! A program is an immutable ordered sequence of source lines. Each line is
//! stored verbatim, including its leading indentation and (except possibly the
//! final line) its terminating newline, so that serializing a sequence back to
//! source reproduces the file byte-for-byte. Mutation operators never edit a
//! program in place; every edit builds a new sequence.
//!
//! Lines are addressed externally by their 1-based line number as they appear
//! in the patient; all internal indexing is 0-based.

use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("failed to read program source from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// An ordered sequence of source lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    lines: Vec<String>,
}

/// A patient line number paired with its suspiciousness weight.
///
/// Weights come from fault localization and take one of three values:
/// 1.0 for lines on failing traces only, 0.1 for lines shared between
/// failing and passing traces, 0.0 for lines on passing traces only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedLine {
    /// 1-based line number in the patient.
    pub line: u32,
    pub weight: f64,
}

impl WeightedLine {
    pub fn new(line: u32, weight: f64) -> Self {
        Self { line, weight }
    }
}

impl Program {
    /// Construct a program from in-memory source, splitting on newlines while
    /// keeping each line's terminator attached.
    pub fn from_source(source: &str) -> Self {
        Self {
            lines: source.split_inclusive('\n').map(str::to_string).collect(),
        }
    }

    /// Read a program from a file.
    pub fn from_file(path: &Path) -> Result<Self, ProgramError> {
        let source = fs::read_to_string(path).map_err(|source| ProgramError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_source(&source))
    }

    /// Rebuild a program from an already-split line sequence. Callers are
    /// responsible for keeping terminators attached.
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Concatenate the line sequence back into source text.
    pub fn to_source(&self) -> String {
        self.lines.concat()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// The full line sequence, terminators included.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// A single line by 0-based index, terminator included.
    pub fn line(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(String::as_str)
    }

    /// A single line by 0-based index with the terminator stripped.
    pub fn line_body(&self, idx: usize) -> Option<&str> {
        self.lines.get(idx).map(|l| l.strip_suffix('\n').unwrap_or(l))
    }

    /// Replace the body of line `idx`, preserving the original terminator.
    /// Returns a new program; `idx` must be in bounds.
    pub fn with_line_body(&self, idx: usize, body: &str) -> Program {
        let mut lines = self.lines.clone();
        let terminated = self.lines[idx].ends_with('\n');
        lines[idx] = if terminated {
            format!("{body}\n")
        } else {
            body.to_string()
        };
        Program { lines }
    }

    /// Insert a new line after `idx`. The inserted line always receives a
    /// newline terminator; if `idx` was the final, unterminated line it gains
    /// one so the sequence stays well formed.
    pub fn with_line_inserted_after(&self, idx: usize, body: &str) -> Program {
        let mut lines = self.lines.clone();
        if !lines[idx].ends_with('\n') {
            lines[idx].push('\n');
        }
        lines.insert(idx + 1, format!("{body}\n"));
        Program { lines }
    }
}

/// The maximal leading whitespace run of a line.
pub fn indent_prefix(line: &str) -> &str {
    let end = line
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(line.len());
    &line[..end]
}

/// True when a line has no content beyond whitespace.
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}
