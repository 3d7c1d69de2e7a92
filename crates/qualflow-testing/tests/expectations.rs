//! Expectations read from disk and matched against real checker output

use qualflow_core::hir::MethodSig;
use qualflow_core::prelude::*;
use qualflow_testing::{compare_reported, DiagnosticReader, TestDiagnostic, TypecheckResult};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use tempfile::TempDir;

fn string_format() -> MethodSig {
    MethodSig::new("java.lang.String", "format", &["java.lang.String", "java.lang.Object[]"])
}

/// `String.format("%d", "x")` on line 4 and `String.format("%s %s", 1)` on line 5
fn formats() -> HirModule {
    let b = HirBuilder::new();
    let body = vec![
        b.at(4).eval(b.call(None, string_format(), vec![b.string("%d"), b.string("x")], AnnotatedType::string())),
        b.at(5).eval(b.call(None, string_format(), vec![b.string("%s %s"), b.int(1)], AnnotatedType::string())),
    ];
    let method = b.at(3).method("m", vec![], AnnotatedType::void(), body);
    HirModule {
        file: "Fmt.java".into(),
        classes: vec![b.at(1).class("Fmt", vec![], vec![method])],
    }
}

fn report() -> CheckReport {
    Checker::new(CheckerOptions::default().with_checkers(["format"]))
        .unwrap()
        .check(&formats())
        .unwrap()
}

#[test]
fn test_out_file_matches_report() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Fmt.out");
    std::fs::write(
        &path,
        "Fmt.java:4: error: (argument.type.incompatible)\nFmt.java:5: warning: (format.missing.arguments)\n",
    )
    .unwrap();
    let expected = DiagnosticReader::new().unwrap().read_out_file(&path).unwrap();
    let result = compare_reported(expected, &report().diagnostics);
    assert!(!result.failed(), "{}", result.summary());
}

#[test]
fn test_source_comments_match_report() {
    let source = "\
class Fmt {
  void m() {
    // :: error: (argument.type.incompatible)
    String.format(\"%d\", \"x\");
    String.format(\"%s %s\", 1); // :: warning: (format.missing.arguments)
  }
}
";
    let mut expected = DiagnosticReader::new().unwrap().read_source("Fmt.java", source).unwrap();
    assert_eq!(expected.len(), 1, "a trailing marker without `{{` is a plain comment");
    expected.push(TestDiagnostic::new("Fmt.java", 5, DiagnosticKind::Warning, "format.missing.arguments"));
    let result = compare_reported(expected, &report().diagnostics);
    assert!(!result.failed(), "{}", result.summary());
}

#[test]
fn test_mismatch_is_described() {
    let expected = vec![TestDiagnostic::new("Fmt.java", 4, DiagnosticKind::Error, "format.string.invalid")];
    let result = compare_reported(expected, &report().diagnostics);
    assert!(result.failed());
    assert_eq!(result.missing.len(), 1);
    assert_eq!(result.unexpected.len(), 2);
    assert!(result.summary().starts_with("1 missing diagnostic:\n  Fmt.java:4: error: (format.string.invalid)"));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = TempDir::new().unwrap();
    let err = DiagnosticReader::new()
        .unwrap()
        .read_out_file(&dir.path().join("absent.out"))
        .unwrap_err();
    assert!(err.to_string().contains("absent.out"), "{err}");
}

#[derive(Debug, Clone)]
struct Key(String);

impl Arbitrary for Key {
    fn arbitrary(g: &mut Gen) -> Self {
        let words = ["argument", "type", "incompatible", "format", "array", "access", "unsafe", "high"];
        let n = usize::arbitrary(g) % 3 + 1;
        let parts: Vec<&str> = (0..n).map(|_| *g.choose(&words).unwrap_or(&"type")).collect();
        Key(parts.join("."))
    }
}

#[quickcheck]
fn prop_rendered_out_line_reads_back(line: u16, key: Key, warning: bool) -> bool {
    let kind = if warning { DiagnosticKind::Warning } else { DiagnosticKind::Error };
    let d = TestDiagnostic::new("A.java", u32::from(line), kind, &key.0);
    let read = DiagnosticReader::new().unwrap().read_out(&d.to_string()).unwrap();
    read == vec![d]
}

#[quickcheck]
fn prop_comparison_partitions_both_sides(expected: Vec<u8>, actual: Vec<u8>) -> bool {
    let diag = |line: &u8| TestDiagnostic::new("A.java", u32::from(*line % 8), DiagnosticKind::Error, "k");
    let result = TypecheckResult::compare(expected.iter().map(diag).collect(), actual.iter().map(diag).collect());
    let matched = expected.len() - result.missing.len();
    matched == actual.len() - result.unexpected.len() && (result.failed() == (matched != expected.len() || matched != actual.len()))
}
