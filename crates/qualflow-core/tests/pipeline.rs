//! End-to-end runs of the checker pipeline over small units

use qualflow_core::checkers::format::FORMAT;
use qualflow_core::hir::{BinOp, HirClass, MethodSig};
use qualflow_core::prelude::*;
use tempfile::TempDir;

fn string_format() -> MethodSig {
    MethodSig::new("java.lang.String", "format", &["java.lang.String", "java.lang.Object[]"])
}

fn int() -> AnnotatedType {
    AnnotatedType::primitive(qualflow_core::types::PrimitiveKind::Int)
}

/// `class Logger { String fmt; void init() { fmt = "%d"; } void log() { String.format(fmt, 3); } }`
fn logger(b: &HirBuilder) -> HirModule {
    let init = b.at(3).method(
        "init",
        vec![],
        AnnotatedType::void(),
        vec![b.assign(b.field_access(b.this(), "fmt"), b.string("%d"))],
    );
    let log = b.at(6).method(
        "log",
        vec![],
        AnnotatedType::void(),
        vec![b.eval(b.call(
            None,
            string_format(),
            vec![b.field_access(b.this(), "fmt"), b.int(3)],
            AnnotatedType::string(),
        ))],
    );
    HirModule {
        file: "Logger.java".into(),
        classes: vec![b.at(1).class("Logger", vec![b.field_decl("fmt", AnnotatedType::string())], vec![init, log])],
    }
}

#[test]
fn test_inference_reaches_fixed_point() {
    let b = HirBuilder::new();
    let module = logger(&b);
    let options = CheckerOptions::default().with_checkers(["format"]).with_inference(true);
    let dir = TempDir::new().unwrap();

    let first = Checker::new(options.clone()).unwrap().check(&module).unwrap();
    assert_eq!(first.keys(), vec!["format.string.invalid"]);
    let summary = first.inference.unwrap();
    assert!(summary.changed());
    let inferred = &summary.classes["Logger"].fields["fmt"]["format"];
    assert!(inferred.is(FORMAT), "{inferred}");

    summary.write_json(dir.path(), "Logger").unwrap();
    let seed = InferenceStorage::read_json(dir.path(), "Logger").unwrap();
    assert_eq!(seed.as_ref(), Some(&summary));

    let second = Checker::new(options).unwrap().with_inference_seed(seed).check(&module).unwrap();
    assert!(second.diagnostics.is_empty(), "{:?}", second.diagnostics);
    let again = second.inference.unwrap();
    assert!(!again.changed());
    assert_eq!(again, summary);
}

#[test]
fn test_missing_summary_reads_as_none() {
    let dir = TempDir::new().unwrap();
    assert!(InferenceStorage::read_json(dir.path(), "Nothing").unwrap().is_none());
}

#[test]
fn test_nested_loops_converge_under_every_system() {
    let b = HirBuilder::new();
    let inner = b.while_stmt(
        b.binary(BinOp::Lt, b.var("k"), b.var("i")),
        vec![
            b.assign(b.var("k"), b.binary(BinOp::Add, b.var("k"), b.int(1))),
            b.if_stmt(
                b.binary(BinOp::Gt, b.var("k"), b.int(5)),
                vec![b.brk()],
                Some(vec![b.eval(b.index(b.var("a"), b.var("i")))]),
            ),
        ],
    );
    let body = vec![
        b.local("k", int(), Some(b.int(0))),
        b.index_loop("i", "a", vec![inner]),
        b.ret(Some(b.var("k"))),
    ];
    let method = b.method("spin", vec![b.param("a", AnnotatedType::array(int()))], int(), body);
    let module = HirModule {
        file: "Spin.java".into(),
        classes: vec![b.class("Spin", vec![], vec![method])],
    };
    let checker = Checker::new(CheckerOptions::default()).unwrap();
    assert_eq!(checker.systems().len(), 6);
    let report = checker.check(&module).unwrap();
    assert!(report.keys().iter().all(|k| !k.starts_with("array.access")), "{:?}", report.keys());
}

#[test]
fn test_unit_survives_json_transport() {
    let b = HirBuilder::new();
    let module = logger(&b);
    let text = serde_json::to_string(&module).unwrap();
    let decoded: HirModule = serde_json::from_str(&text).unwrap();
    let checker = Checker::new(CheckerOptions::default().with_checkers(["format"])).unwrap();
    assert_eq!(checker.check(&decoded).unwrap().keys(), checker.check(&module).unwrap().keys());
}

#[test]
fn test_rendered_diagnostics() {
    let b = HirBuilder::new();
    let body = vec![
        b.at(4).eval(b.call(None, string_format(), vec![b.string("%d"), b.string("x")], AnnotatedType::string())),
        b.at(5).eval(b.call(None, string_format(), vec![b.string("%s %s"), b.int(1)], AnnotatedType::string())),
    ];
    let method = b.at(3).method("m", vec![], AnnotatedType::void(), body);
    let class: HirClass = b.class("Fmt", vec![], vec![method]);
    let module = HirModule {
        file: "Fmt.java".into(),
        classes: vec![class],
    };
    let report = Checker::new(CheckerOptions::default().with_checkers(["format"]))
        .unwrap()
        .check(&module)
        .unwrap();
    let rendered: Vec<String> = report.diagnostics.iter().map(ToString::to_string).collect();
    insta::assert_snapshot!(rendered.join("\n"), @r"
    Fmt.java:4: error: (argument.type.incompatible) in varargs position: found java.lang.String, required INT
    Fmt.java:5: warning: (format.missing.arguments) expected 2 arguments, found 1
    ");
}
