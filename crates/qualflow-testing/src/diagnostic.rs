use qualflow_core::{Diagnostic, DiagnosticKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// One expected or reported diagnostic, compared by file, line, kind and message only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDiagnostic {
    pub filename: String,
    pub line: u32,
    pub kind: DiagnosticKind,
    /// Usually a message key such as `assignment.type.incompatible`
    pub message: String,
    /// Written as `fixable-error` / `fixable-warning`
    #[serde(default)]
    pub is_fixable: bool,
    /// The message was written without surrounding parentheses
    #[serde(default)]
    pub omit_parentheses: bool,
}

impl TestDiagnostic {
    pub fn new(filename: &str, line: u32, kind: DiagnosticKind, message: &str) -> Self {
        Self {
            filename: filename.to_string(),
            line,
            kind,
            message: message.to_string(),
            is_fixable: false,
            omit_parentheses: false,
        }
    }

    fn identity(&self) -> (&str, u32, DiagnosticKind, &str) {
        (&self.filename, self.line, self.kind, &self.message)
    }

    fn kind_text(&self) -> String {
        if self.is_fixable {
            format!("fixable-{}", self.kind)
        } else {
            self.kind.to_string()
        }
    }
}

impl PartialEq for TestDiagnostic {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for TestDiagnostic {}

impl Hash for TestDiagnostic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for TestDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.omit_parentheses {
            write!(f, "{}:{}: {}: {}", self.filename, self.line, self.kind_text(), self.message)
        } else {
            write!(f, "{}:{}: {}: ({})", self.filename, self.line, self.kind_text(), self.message)
        }
    }
}

/// Reported diagnostics are compared by message key
impl From<&Diagnostic> for TestDiagnostic {
    fn from(d: &Diagnostic) -> Self {
        TestDiagnostic::new(&d.file, d.line, d.kind, &d.key)
    }
}
