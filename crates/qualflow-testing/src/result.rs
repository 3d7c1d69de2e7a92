use crate::diagnostic::TestDiagnostic;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Outcome of comparing expected diagnostics against what a checker reported
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypecheckResult {
    pub expected: Vec<TestDiagnostic>,
    pub actual: Vec<TestDiagnostic>,
    /// Expected but not reported
    pub missing: Vec<TestDiagnostic>,
    /// Reported but not expected
    pub unexpected: Vec<TestDiagnostic>,
}

impl TypecheckResult {
    /// Match the two lists as multisets: a diagnostic expected twice must be reported twice
    pub fn compare(expected: Vec<TestDiagnostic>, actual: Vec<TestDiagnostic>) -> Self {
        let mut available: HashMap<&TestDiagnostic, usize> = HashMap::new();
        for d in &actual {
            *available.entry(d).or_default() += 1;
        }
        let mut missing = Vec::new();
        for d in &expected {
            match available.get_mut(d) {
                Some(n) if *n > 0 => *n -= 1,
                _ => missing.push(d.clone()),
            }
        }
        let mut unexpected = Vec::new();
        for d in &actual {
            if let Some(n) = available.get_mut(d) {
                if *n > 0 {
                    *n -= 1;
                    unexpected.push(d.clone());
                }
            }
        }
        Self {
            expected,
            actual,
            missing,
            unexpected,
        }
    }

    pub fn failed(&self) -> bool {
        !self.missing.is_empty() || !self.unexpected.is_empty()
    }

    pub fn summary(&self) -> String {
        if !self.failed() {
            return format!("all {} expected diagnostics found", self.expected.len());
        }
        let mut out = String::new();
        for (label, list) in [("missing", &self.missing), ("unexpected", &self.unexpected)] {
            if list.is_empty() {
                continue;
            }
            let noun = if list.len() == 1 { "diagnostic" } else { "diagnostics" };
            let _ = writeln!(out, "{} {} {}:", list.len(), label, noun);
            for d in list {
                let _ = writeln!(out, "  {}", d);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qualflow_core::DiagnosticKind;

    fn err(line: u32, key: &str) -> TestDiagnostic {
        TestDiagnostic::new("A.java", line, DiagnosticKind::Error, key)
    }

    #[test]
    fn test_exact_match() {
        let result = TypecheckResult::compare(vec![err(1, "a")], vec![err(1, "a")]);
        assert!(!result.failed());
        assert_eq!(result.summary(), "all 1 expected diagnostics found");
    }

    #[test]
    fn test_missing_and_unexpected() {
        let result = TypecheckResult::compare(vec![err(1, "a"), err(2, "b")], vec![err(2, "b"), err(3, "c")]);
        assert_eq!(result.missing, vec![err(1, "a")]);
        assert_eq!(result.unexpected, vec![err(3, "c")]);
        assert_eq!(
            result.summary(),
            "1 missing diagnostic:\n  A.java:1: error: (a)\n1 unexpected diagnostic:\n  A.java:3: error: (c)\n"
        );
    }

    #[test]
    fn test_duplicates_count() {
        let result = TypecheckResult::compare(vec![err(1, "a"), err(1, "a")], vec![err(1, "a")]);
        assert_eq!(result.missing, vec![err(1, "a")]);
        assert!(result.unexpected.is_empty());
    }
}
