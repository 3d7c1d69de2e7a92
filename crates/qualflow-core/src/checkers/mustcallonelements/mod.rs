//! Obligations on the elements of resource arrays
//!
//! `@MustCallOnElements({"close"})` on an array means `close` must still be called on
//! every element. Obligations are opened and discharged only by the loops that
//! [`ObligationLoops`] recognizes.

mod loops;

pub use loops::{LoopEffect, ObligationLoop, ObligationLoops};

use super::build_hierarchy;
use crate::checker::{TypeSystem, UnitContext};
use crate::dataflow::{FlowExpr, RefinementRules, Store};
use crate::error::{CheckerError, Result};
use crate::factory::{DefaultingPolicy, TypeContext, TypeUseLocation};
use crate::hierarchy::{GraphHierarchy, HierarchyBuilder, QualifierHierarchy};
use crate::hir::{ExprKind, HirExpr, HirMethod, HirModule, HirStmt, StmtKind};
use crate::qualifier::{Payload, Qualifier};
use crate::types::{AnnotatedType, ClassTable};
use crate::visitor::{ConsistencyRules, VisitContext};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use tracing::trace;

pub const NAME: &str = "mustcallonelements";

pub const MUST_CALL_ON_ELEMENTS_UNKNOWN: &str = "MustCallOnElementsUnknown";
pub const MUST_CALL_ON_ELEMENTS: &str = "MustCallOnElements";

pub fn system() -> Result<TypeSystem> {
    Ok(TypeSystem::new(NAME, Box::new(hierarchy()?), Box::new(MustCallOnElementsRules)))
}

pub fn hierarchy() -> Result<MustCallOnElementsHierarchy> {
    let graph = build_hierarchy(
        NAME,
        HierarchyBuilder::new(NAME)
            .qualifier(MUST_CALL_ON_ELEMENTS_UNKNOWN, &[])
            .qualifier(MUST_CALL_ON_ELEMENTS, &[MUST_CALL_ON_ELEMENTS_UNKNOWN]),
    )?;
    Ok(MustCallOnElementsHierarchy::new(graph))
}

/// `@MustCallOnElements` with its methods sorted and deduplicated
pub fn must_call_on_elements<I, S>(methods: I) -> Qualifier
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let methods: BTreeSet<String> = methods.into_iter().map(Into::into).collect();
    Qualifier::with_strings(MUST_CALL_ON_ELEMENTS, methods)
}

/// Outstanding methods of a `@MustCallOnElements` qualifier, whichever payload it was written with
fn methods(q: &Qualifier) -> Vec<String> {
    match q.payload() {
        Payload::Str(method) => vec![method.clone()],
        _ => q.strings().to_vec(),
    }
}

#[derive(Debug)]
pub struct MustCallOnElementsHierarchy {
    graph: GraphHierarchy,
    bottom: Qualifier,
    /// Canonical qualifier per method list; few distinct lists occur in practice
    canonical: RefCell<HashMap<Vec<String>, Qualifier>>,
}

impl MustCallOnElementsHierarchy {
    fn new(graph: GraphHierarchy) -> Self {
        Self {
            graph,
            bottom: must_call_on_elements(Vec::<String>::new()),
            canonical: RefCell::new(HashMap::new()),
        }
    }

    fn canonical(&self, methods: impl IntoIterator<Item = String>) -> Qualifier {
        let key: Vec<String> = methods.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        self.canonical
            .borrow_mut()
            .entry(key)
            .or_insert_with_key(|key| must_call_on_elements(key.iter().cloned()))
            .clone()
    }
}

impl QualifierHierarchy for MustCallOnElementsHierarchy {
    fn name(&self) -> &str {
        self.graph.name()
    }

    fn top(&self) -> &Qualifier {
        self.graph.top()
    }

    fn bottom(&self) -> &Qualifier {
        &self.bottom
    }

    fn owns(&self, q: &Qualifier) -> bool {
        self.graph.owns(q)
    }

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool {
        if sub.is(MUST_CALL_ON_ELEMENTS) && sup.is(MUST_CALL_ON_ELEMENTS) {
            let outstanding = methods(sup);
            return methods(sub).iter().all(|m| outstanding.contains(m));
        }
        self.graph.is_subtype(sub, sup)
    }

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if a.is(MUST_CALL_ON_ELEMENTS) && b.is(MUST_CALL_ON_ELEMENTS) {
            return self.canonical(methods(a).into_iter().chain(methods(b)));
        }
        self.graph.least_upper_bound(a, b)
    }

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if a.is(MUST_CALL_ON_ELEMENTS) && b.is(MUST_CALL_ON_ELEMENTS) {
            let theirs = methods(b);
            return self.canonical(methods(a).into_iter().filter(|m| theirs.contains(m)));
        }
        if a.is(MUST_CALL_ON_ELEMENTS) {
            return a.clone();
        }
        if b.is(MUST_CALL_ON_ELEMENTS) {
            return b.clone();
        }
        self.graph.greatest_lower_bound(a, b)
    }
}

#[derive(Debug, Default)]
pub struct MustCallOnElementsRules;

impl MustCallOnElementsRules {
    fn set_in_both(then_store: &mut Store, else_store: &mut Store, array: &FlowExpr, q: Qualifier) {
        for store in [then_store, else_store] {
            store.clear_value(array);
            store.insert_value(array.clone(), q.clone());
        }
    }
}

impl MustCallOnElementsRules {
    /// Qualifier of the array in `i < arr.length` without flow refinement. Field arrays
    /// drop out of the store once an impure call in the loop body clears fields.
    fn declared(cx: &TypeContext<'_, '_>, cond: &HirExpr, found: &ObligationLoop) -> Result<Qualifier> {
        let ExprKind::Binary { right, .. } = &cond.kind else {
            return Err(Self::not_a_loop_condition(found));
        };
        let ExprKind::ArrayLength(array) = &right.skip_casts().kind else {
            return Err(Self::not_a_loop_condition(found));
        };
        Ok(cx.factory().type_in(cx, array).qualifier(cx.hierarchy()))
    }

    fn not_a_loop_condition(found: &ObligationLoop) -> CheckerError {
        CheckerError::internal(
            NAME,
            format!("condition at line {} does not compare against {}.length", found.line, found.array),
        )
    }
}

impl DefaultingPolicy for MustCallOnElementsRules {
    fn default_qualifier(
        &self,
        h: &dyn QualifierHierarchy,
        _classes: &ClassTable,
        _location: TypeUseLocation,
        _ty: &AnnotatedType,
    ) -> Qualifier {
        h.bottom().clone()
    }
}

impl RefinementRules for MustCallOnElementsRules {
    fn prepare_unit(&self, module: &HirModule, classes: &ClassTable, unit: &mut UnitContext) {
        unit.obligation_loops = ObligationLoops::scan(module, classes);
    }

    fn after_comparison(
        &self,
        cx: &TypeContext<'_, '_>,
        unit: &UnitContext,
        cond: &HirExpr,
        then_store: &mut Store,
        else_store: &mut Store,
    ) -> Result<()> {
        let Some(found) = unit.obligation_loops.get(cond.id) else {
            return Ok(());
        };
        let h = cx.hierarchy();
        let updated = match &found.effect {
            LoopEffect::Open(opened) => {
                let current = then_store.value(&found.array).cloned().unwrap_or_else(|| h.bottom().clone());
                h.least_upper_bound(&current, &must_call_on_elements(opened.iter().cloned()))
            }
            LoopEffect::Close(called) => {
                let current = match then_store.value(&found.array) {
                    Some(q) => q.clone(),
                    None => Self::declared(cx, cond, found)?,
                };
                if current.is(MUST_CALL_ON_ELEMENTS) {
                    must_call_on_elements(methods(&current).into_iter().filter(|m| m != called))
                } else {
                    current
                }
            }
        };
        trace!(array = %found.array, %updated, line = found.line, "obligation loop condition");
        Self::set_in_both(then_store, else_store, &found.array, updated);
        Ok(())
    }
}

impl ConsistencyRules for MustCallOnElementsRules {
    fn check_loop(&self, cx: &mut VisitContext<'_, '_, '_>, stmt: &HirStmt) {
        if !matches!(stmt.kind, StmtKind::For { .. }) || !cx.options().warn_partial_loops {
            return;
        }
        let Some(reason) = cx.unit().obligation_loops.partial(stmt.id).map(str::to_string) else {
            return;
        };
        let message = format!("loop over array elements is not a recognized obligation loop: {}", reason);
        cx.warning("mustcallonelements.loop.unrecognized", stmt.span, message);
    }

    fn check_method_exit(&self, cx: &mut VisitContext<'_, '_, '_>, method: &HirMethod, exit: Option<&Store>) {
        let (Some(exit), Some(body)) = (exit, method.body.as_deref()) else {
            return;
        };
        let owned = loops::owned_locals(body);
        let mut leaked = Vec::new();
        for (expr, q) in exit.iter() {
            let FlowExpr::Local(name) = expr else {
                continue;
            };
            if owned.contains(name) && q.is(MUST_CALL_ON_ELEMENTS) && !methods(q).is_empty() {
                leaked.push((name.clone(), methods(q)));
            }
        }
        for (name, outstanding) in leaked {
            cx.error(
                "required.method.not.called",
                method.span,
                format!(
                    "@MustCallOnElements({}) of array {} not discharged before {} returns",
                    outstanding.join(", "),
                    name,
                    method.name
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::{CheckReport, Checker};
    use crate::config::CheckerOptions;
    use crate::hir::{BinOp, HirBuilder, MethodSig, UnaryOp};
    use crate::types::PrimitiveKind;

    fn socket() -> AnnotatedType {
        AnnotatedType::declared("java.net.Socket", vec![])
    }

    fn sockets() -> AnnotatedType {
        AnnotatedType::array(socket())
    }

    fn run(b: &HirBuilder, body: Vec<HirStmt>) -> Result<CheckReport> {
        let params = vec![b.param("n", AnnotatedType::primitive(PrimitiveKind::Int))];
        let method = b.method("m", params, AnnotatedType::void(), body);
        let module = HirModule {
            file: "Pool.java".into(),
            classes: vec![b.class("Pool", vec![b.field_decl("shared", sockets())], vec![method])],
        };
        Checker::new(CheckerOptions::default().with_checkers([NAME]))?.check(&module)
    }

    fn allocate(b: &HirBuilder) -> HirStmt {
        b.index_loop(
            "i",
            "arr",
            vec![b.assign(b.index(b.var("arr"), b.var("i")), b.new_object(socket(), vec![]))],
        )
    }

    fn close_all(b: &HirBuilder, array: HirExpr) -> HirStmt {
        let close = MethodSig::new("java.net.Socket", "close", &[]);
        let call = b.call(Some(b.index(array.clone(), b.var("j"))), close, vec![], AnnotatedType::void());
        let init = b.local("j", AnnotatedType::primitive(PrimitiveKind::Int), Some(b.int(0)));
        let cond = b.binary(BinOp::Lt, b.var("j"), b.length(array));
        let update = b.eval(b.unary(UnaryOp::PreInc, b.var("j")));
        b.for_stmt(vec![init], Some(cond), vec![update], vec![b.eval(call)])
    }

    #[test]
    fn test_lattice_is_set_inclusion() {
        let h = hierarchy().unwrap();
        let close = must_call_on_elements(["close"]);
        let both = must_call_on_elements(["flush", "close"]);
        assert!(h.is_subtype(h.bottom(), &close));
        assert!(h.is_subtype(&close, &both));
        assert!(!h.is_subtype(&both, &close));
        assert!(h.is_subtype(&both, h.top()));
        assert_eq!(h.least_upper_bound(&close, &must_call_on_elements(["flush"])), both);
        assert_eq!(&h.greatest_lower_bound(&close, &must_call_on_elements(["flush"])), h.bottom());
        assert_eq!(h.greatest_lower_bound(h.top(), &close), close);
        assert_eq!(both.strings(), ["close".to_string(), "flush".to_string()]);
    }

    #[test]
    fn test_unclosed_elements_are_reported() {
        let b = HirBuilder::new();
        let body = vec![
            b.at(2).local("arr", sockets(), Some(b.new_array(sockets(), b.var("n")))),
            allocate(&b),
        ];
        let report = run(&b, body).unwrap();
        assert_eq!(report.keys(), vec!["required.method.not.called"]);
    }

    #[test]
    fn test_closing_loop_discharges() {
        let b = HirBuilder::new();
        let body = vec![
            b.at(2).local("arr", sockets(), Some(b.new_array(sockets(), b.var("n")))),
            allocate(&b),
            close_all(&b, b.var("arr")),
        ];
        let report = run(&b, body).unwrap();
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    }

    #[test]
    fn test_partial_loop_warns() {
        let b = HirBuilder::new();
        let body = vec![
            b.at(2).local("arr", sockets(), Some(b.new_array(sockets(), b.var("n")))),
            b.at(3).index_loop("i", "arr", vec![b.assign(b.index(b.var("arr"), b.var("i")), b.null())]),
        ];
        let report = run(&b, body).unwrap();
        assert_eq!(report.keys(), vec!["mustcallonelements.loop.unrecognized"]);
        assert_eq!(report.diagnostics[0].line, 3);
    }

    #[test]
    fn test_field_array_opened_then_closed() {
        let b = HirBuilder::new();
        let shared = || b.field_access(b.this(), "shared");
        let open = {
            let init = b.local("i", AnnotatedType::primitive(PrimitiveKind::Int), Some(b.int(0)));
            let cond = b.binary(BinOp::Lt, b.var("i"), b.length(shared()));
            let update = b.eval(b.unary(UnaryOp::PreInc, b.var("i")));
            let store = b.assign(b.index(shared(), b.var("i")), b.new_object(socket(), vec![]));
            b.for_stmt(vec![init], Some(cond), vec![update], vec![store])
        };
        let body = vec![
            b.at(2).assign(shared(), b.new_array(sockets(), b.var("n"))),
            open,
            close_all(&b, shared()),
        ];
        let report = run(&b, body).unwrap();
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    }

    #[test]
    fn test_closing_untracked_field_falls_back_to_declaration() {
        let b = HirBuilder::new();
        let body = vec![close_all(&b, b.field_access(b.this(), "shared"))];
        let report = run(&b, body).unwrap();
        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    }
}
