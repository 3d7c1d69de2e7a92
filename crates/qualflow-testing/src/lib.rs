//! # Qualflow Testing
//!
//! Expected-diagnostic files for checker tests: parse `// ::` source comments and `.out`
//! files, convert reported diagnostics, and compare the two.

mod diagnostic;
mod reader;
mod result;

pub use diagnostic::TestDiagnostic;
pub use reader::{DiagnosticParseError, DiagnosticReader};
pub use result::TypecheckResult;

use qualflow_core::Diagnostic;

/// Compare a checker's report against expectations
pub fn compare_reported(expected: Vec<TestDiagnostic>, reported: &[Diagnostic]) -> TypecheckResult {
    TypecheckResult::compare(expected, reported.iter().map(TestDiagnostic::from).collect())
}
