//! Diagnostics reported against the checked program

use crate::hir::{DeclAnnotation, Span};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Error,
    Warning,
    Other,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Other => "other",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub kind: DiagnosticKind,
    /// Message key such as `assignment.type.incompatible`
    pub key: String,
    pub message: String,
    /// Type system that reported it
    pub system: String,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.kind == DiagnosticKind::Error
    }

    fn sort_key(&self) -> (&str, u32, &str, &str) {
        (&self.file, self.line, &self.key, &self.message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}: ({})", self.file, self.line, self.kind, self.key)?;
        if !self.message.is_empty() {
            write!(f, " {}", self.message)?;
        }
        Ok(())
    }
}

/// Does one `@SuppressWarnings` entry silence `key` of `system`?
fn suppresses(entry: &str, system: &str, key: &str) -> bool {
    match entry.split_once(':') {
        Some((sys, k)) => sys == system && (k == key || key.starts_with(&format!("{}.", k))),
        None => entry == "all" || entry == system || entry == key,
    }
}

/// Collects the diagnostics of one type system over one unit, honoring suppressions
#[derive(Debug)]
pub struct DiagnosticSink {
    file: String,
    system: String,
    scopes: Vec<Vec<String>>,
    global: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new(file: &str, system: &str) -> Self {
        Self {
            file: file.to_string(),
            system: system.to_string(),
            scopes: Vec::new(),
            global: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Keys (or `system:key` entries) suppressed everywhere
    pub fn with_suppressed(mut self, entries: &[String]) -> Self {
        self.global = entries.to_vec();
        self
    }

    /// Enter a declaration; its `@SuppressWarnings` entries apply until the matching pop
    pub fn push_scope(&mut self, annotations: &[DeclAnnotation]) {
        let entries = annotations
            .iter()
            .filter(|a| a.name == "SuppressWarnings")
            .flat_map(|a| a.strings_arg("value"))
            .collect();
        self.scopes.push(entries);
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn is_suppressed(&self, key: &str) -> bool {
        self.global
            .iter()
            .chain(self.scopes.iter().flatten())
            .any(|entry| suppresses(entry, &self.system, key))
    }

    pub fn report(&mut self, kind: DiagnosticKind, key: &str, span: Span, message: impl Into<String>) {
        if self.is_suppressed(key) {
            return;
        }
        self.diagnostics.push(Diagnostic {
            file: self.file.clone(),
            line: span.line,
            kind,
            key: key.to_string(),
            message: message.into(),
            system: self.system.clone(),
        });
    }

    pub fn error(&mut self, key: &str, span: Span, message: impl Into<String>) {
        self.report(DiagnosticKind::Error, key, span, message);
    }

    pub fn warning(&mut self, key: &str, span: Span, message: impl Into<String>) {
        self.report(DiagnosticKind::Warning, key, span, message);
    }

    /// Sorted by position, duplicates removed
    pub fn finish(self) -> Vec<Diagnostic> {
        sorted(self.diagnostics)
    }
}

/// Sort by file, line and key, dropping exact duplicates
pub fn sorted(mut diagnostics: Vec<Diagnostic>) -> Vec<Diagnostic> {
    diagnostics.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then(a.system.cmp(&b.system)));
    diagnostics.dedup();
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::AnnotationArg;

    fn suppress(values: &[&str]) -> DeclAnnotation {
        DeclAnnotation::new("SuppressWarnings").arg(
            "value",
            AnnotationArg::Strings(values.iter().map(|v| v.to_string()).collect()),
        )
    }

    #[test]
    fn test_scoped_suppression() {
        let mut sink = DiagnosticSink::new("A.java", "determinism");
        sink.push_scope(&[suppress(&["determinism:invalid.type.on.conditional"])]);
        sink.error("invalid.type.on.conditional", Span::line(3), "");
        sink.error("assignment.type.incompatible", Span::line(4), "");
        sink.pop_scope();
        sink.error("invalid.type.on.conditional", Span::line(9), "");

        let out = sink.finish();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].line, 4);
        assert_eq!(out[1].line, 9);
    }

    #[test]
    fn test_suppress_whole_system() {
        let mut sink = DiagnosticSink::new("A.java", "format");
        sink.push_scope(&[suppress(&["format"])]);
        sink.warning("format.indirect.arguments", Span::line(1), "");
        assert!(sink.finish().is_empty());

        let mut other = DiagnosticSink::new("A.java", "index");
        other.push_scope(&[suppress(&["format"])]);
        other.warning("array.access.unsafe.low", Span::line(1), "");
        assert_eq!(other.finish().len(), 1);
    }

    #[test]
    fn test_sorted_and_deduplicated() {
        let mut sink = DiagnosticSink::new("A.java", "value");
        sink.error("b.key", Span::line(5), "x");
        sink.error("a.key", Span::line(5), "x");
        sink.error("a.key", Span::line(5), "x");
        sink.error("z.key", Span::line(1), "");
        let out = sink.finish();
        let keys: Vec<&str> = out.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["z.key", "a.key", "b.key"]);
        insta::assert_snapshot!(out[1].to_string(), @"A.java:5: error: (a.key) x");
        insta::assert_snapshot!(out[0].to_string(), @"A.java:1: error: (z.key)");
    }
}
