//! Readers for expected diagnostics
//!
//! Source files carry expectations in comments:
//!
//! ```text
//! // :: error: (assignment.type.incompatible) :: warning: (cast.unsafe)
//! x = y;
//! void m() { // :: error: (override.return.invalid)
//! ```
//!
//! A `// ::` line applies to the next line that is neither a comment nor blank; `// `
//! lines directly after it continue its last message when that message has no
//! parentheses. The trailing `{ // ::` form applies to its own line. `.out` files hold one `file:line: kind: (message)` per line.

use crate::diagnostic::TestDiagnostic;
use qualflow_core::DiagnosticKind;
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const MARKER: &str = "// ::";
const TRAILING_MARKER: &str = "{ // ::";

#[derive(Debug, Error)]
pub enum DiagnosticParseError {
    #[error("line {line}: unknown diagnostic kind `{kind}`")]
    UnknownKind { line: u32, kind: String },

    #[error("line {line}: malformed diagnostic `{text}`")]
    Malformed { line: u32, text: String },

    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, DiagnosticParseError>;

#[derive(Debug)]
pub struct DiagnosticReader {
    /// `kind: (message)` or `kind: message`
    body: Regex,
    /// `file:line: rest`
    out_line: Regex,
}

impl DiagnosticReader {
    pub fn new() -> Result<Self> {
        Ok(Self {
            body: Regex::new(r"^([a-z-]+):\s*(.*)$")?,
            out_line: Regex::new(r"^(.+?):(\d+): (.*)$")?,
        })
    }

    /// Expected diagnostics written as comments in `source`
    pub fn read_source(&self, filename: &str, source: &str) -> Result<Vec<TestDiagnostic>> {
        let mut found = Vec::new();
        let mut pending: Vec<(u32, String)> = Vec::new();
        let mut after_marker = false;

        for (index, raw) in source.lines().enumerate() {
            let line = index as u32 + 1;
            let trimmed = raw.trim();
            if let Some(rest) = trimmed.strip_prefix(MARKER) {
                pending.extend(split_markers(rest).map(|text| (line, text)));
                after_marker = true;
            } else if let Some(rest) = trimmed.strip_prefix("//") {
                match pending.last_mut() {
                    Some((_, text)) if after_marker && !is_parenthesized(text) => {
                        text.push(' ');
                        text.push_str(rest.trim());
                    }
                    _ => after_marker = false,
                }
            } else if trimmed.is_empty() {
                after_marker = false;
            } else {
                if let Some(at) = trimmed.find(TRAILING_MARKER) {
                    let rest = &trimmed[at + TRAILING_MARKER.len()..];
                    pending.extend(split_markers(rest).map(|text| (line, text)));
                }
                for (written_at, text) in pending.drain(..) {
                    let mut d = self.parse_body(written_at, &text)?;
                    d.filename = filename.to_string();
                    d.line = line;
                    found.push(d);
                }
                after_marker = false;
            }
        }
        debug!(file = filename, expected = found.len(), "read source expectations");
        Ok(found)
    }

    /// Expected diagnostics in `.out` form
    pub fn read_out(&self, text: &str) -> Result<Vec<TestDiagnostic>> {
        let mut found = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = index as u32 + 1;
            let raw = raw.trim_end();
            if raw.trim().is_empty() {
                continue;
            }
            let caps = self.out_line.captures(raw).ok_or_else(|| DiagnosticParseError::Malformed {
                line,
                text: raw.to_string(),
            })?;
            let reported_line = caps[2].parse().map_err(|_| DiagnosticParseError::Malformed {
                line,
                text: raw.to_string(),
            })?;
            let mut d = self.parse_body(line, &caps[3])?;
            d.filename = caps[1].to_string();
            d.line = reported_line;
            found.push(d);
        }
        Ok(found)
    }

    pub fn read_out_file(&self, path: &Path) -> Result<Vec<TestDiagnostic>> {
        let text = std::fs::read_to_string(path).map_err(|source| DiagnosticParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.read_out(&text)
    }

    /// `kind: (message)` with file and line left empty
    fn parse_body(&self, line: u32, text: &str) -> Result<TestDiagnostic> {
        let text = text.trim();
        let caps = self.body.captures(text).ok_or_else(|| DiagnosticParseError::Malformed {
            line,
            text: text.to_string(),
        })?;
        let (kind, is_fixable) = parse_kind(&caps[1]).ok_or_else(|| DiagnosticParseError::UnknownKind {
            line,
            kind: caps[1].to_string(),
        })?;
        let rest = caps[2].trim();
        let (message, omit_parentheses) = match rest.strip_prefix('(').and_then(|r| r.split_once(')')) {
            Some((inner, _)) => (inner.trim().to_string(), false),
            None => (rest.to_string(), true),
        };
        if message.is_empty() {
            return Err(DiagnosticParseError::Malformed {
                line,
                text: text.to_string(),
            });
        }
        Ok(TestDiagnostic {
            filename: String::new(),
            line: 0,
            kind,
            message,
            is_fixable,
            omit_parentheses,
        })
    }
}

/// `kind: (message)`: the closing parenthesis ends the message, so it takes no continuation
fn is_parenthesized(text: &str) -> bool {
    text.split_once(':')
        .is_some_and(|(_, rest)| rest.trim_start().starts_with('('))
}

fn split_markers(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split("::").map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

fn parse_kind(text: &str) -> Option<(DiagnosticKind, bool)> {
    Some(match text {
        "error" => (DiagnosticKind::Error, false),
        "warning" => (DiagnosticKind::Warning, false),
        "fixable-error" => (DiagnosticKind::Error, true),
        "fixable-warning" => (DiagnosticKind::Warning, true),
        "other" => (DiagnosticKind::Other, false),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader() -> DiagnosticReader {
        DiagnosticReader::new().unwrap()
    }

    fn lines(found: &[TestDiagnostic]) -> Vec<(u32, &str)> {
        found.iter().map(|d| (d.line, d.message.as_str())).collect()
    }

    #[test]
    fn test_marker_applies_to_next_code_line() {
        let source = "class A {\n  // :: error: (assignment.type.incompatible)\n  // unrelated note\n\n  x = y;\n}\n";
        let found = reader().read_source("A.java", source).unwrap();
        assert_eq!(lines(&found), vec![(5, "assignment.type.incompatible")]);
        assert_eq!(found[0].filename, "A.java");
    }

    #[test]
    fn test_several_markers_on_one_line() {
        let source = "// :: error: (a.b) :: warning: (c.d)\nfoo();\n";
        let found = reader().read_source("A.java", source).unwrap();
        assert_eq!(lines(&found), vec![(2, "a.b"), (2, "c.d")]);
        assert_eq!(found[1].kind, DiagnosticKind::Warning);
    }

    #[test]
    fn test_continuation_lines() {
        let source = "// :: error: found @NonDet\n//     required @Det\nint x = y;\n";
        let found = reader().read_source("A.java", source).unwrap();
        assert_eq!(found[0].message, "found @NonDet required @Det");
        assert!(found[0].omit_parentheses);
        assert_eq!(found[0].line, 3);
    }

    #[test]
    fn test_parenthesized_marker_takes_no_continuation() {
        let source = "// :: error: (assignment.type.incompatible)\n// found @NonDet\nint x = y;\n";
        let found = reader().read_source("A.java", source).unwrap();
        assert_eq!(lines(&found), vec![(3, "assignment.type.incompatible")]);
        assert!(!found[0].omit_parentheses);
    }

    #[test]
    fn test_trailing_marker() {
        let source = "class B extends A {\n  int m() { // :: fixable-error: (override.return.invalid)\n  }\n}\n";
        let found = reader().read_source("B.java", source).unwrap();
        assert_eq!(lines(&found), vec![(2, "override.return.invalid")]);
        assert!(found[0].is_fixable);
    }

    #[test]
    fn test_out_lines() {
        let text = "A.java:4: error: (argument.type.incompatible)\n\nA.java:12: warning: format.excess.arguments\n";
        let found = reader().read_out(text).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], TestDiagnostic::new("A.java", 4, DiagnosticKind::Error, "argument.type.incompatible"));
        assert_eq!(found[1].line, 12);
        assert!(found[1].omit_parentheses);
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = reader().read_out("A.java:4: error: (x)\nnot a diagnostic\n").unwrap_err();
        assert!(matches!(err, DiagnosticParseError::Malformed { line: 2, .. }), "{err}");
        let err = reader().read_source("A.java", "// :: fatal: (x)\nfoo();\n").unwrap_err();
        assert!(matches!(err, DiagnosticParseError::UnknownKind { line: 1, ref kind } if kind == "fatal"));
    }
}
