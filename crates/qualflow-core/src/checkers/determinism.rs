//! Determinism type system
//!
//! `@NonDet` values may differ between runs, `@OrderNonDet` collections hold the same
//! elements in a possibly different order, and `@Det` values are the same every run.
//! `@PolyDet` parameters take the determinism of their arguments.

use super::build_hierarchy;
use crate::checker::TypeSystem;
use crate::dataflow::{RefineContext, RefinementRules};
use crate::error::Result;
use crate::factory::{DefaultingPolicy, MethodType, Operand, TypeContext, TypeUseLocation};
use crate::hierarchy::{HierarchyBuilder, QualifierHierarchy};
use crate::hir::{BinOp, ClassKind, ExprKind, HirExpr, Literal, MethodSig, Span};
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable, TypeKind};
use crate::visitor::{ConsistencyRules, VisitContext};

pub const NAME: &str = "determinism";

pub const NON_DET: &str = "NonDet";
pub const ORDER_NON_DET: &str = "OrderNonDet";
pub const DET: &str = "Det";
pub const POLY_DET: &str = "PolyDet";

/// Side table of `PolyDet` expressions that have been sorted in place
pub const SORTED_POLY: &str = "sorted_poly";

pub fn system() -> Result<TypeSystem> {
    let hierarchy = build_hierarchy(
        NAME,
        HierarchyBuilder::new(NAME)
            .qualifier(NON_DET, &[])
            .qualifier(ORDER_NON_DET, &[NON_DET])
            .qualifier(DET, &[ORDER_NON_DET])
            .polymorphic(POLY_DET),
    )?;
    Ok(TypeSystem::new(NAME, Box::new(hierarchy), Box::new(DeterminismRules)))
}

fn q(name: &str) -> Qualifier {
    Qualifier::new(name)
}

/// Signatures of the in-place sorts, and which operand they sort
fn sorted_operand<'e>(sig: &MethodSig, receiver: Option<&'e HirExpr>, args: &'e [HirExpr]) -> Option<&'e HirExpr> {
    let by_arg = [
        MethodSig::new("java.util.Collections", "sort", &["java.util.List"]),
        MethodSig::new("java.util.Collections", "sort", &["java.util.List", "java.util.Comparator"]),
        MethodSig::new("java.util.Arrays", "sort", &["java.lang.Object[]"]),
        MethodSig::new("java.util.Arrays", "sort", &["int[]"]),
    ];
    if by_arg.contains(sig) {
        return args.first();
    }
    if *sig == MethodSig::new("java.util.List", "sort", &["java.util.Comparator"]) {
        return receiver;
    }
    None
}

#[derive(Debug, Default)]
pub struct DeterminismRules;

impl DeterminismRules {
    fn is_collection_like(classes: &ClassTable, ty: &AnnotatedType) -> bool {
        ty.is_array()
            || ty
                .class_name()
                .is_some_and(|name| classes.is_collection(name) || classes.is_iterator(name))
    }

    fn is_set(classes: &ClassTable, ty: &AnnotatedType) -> bool {
        ty.class_name()
            .is_some_and(|name| classes.is_subclass(name, "java.util.Set"))
    }
}

impl DefaultingPolicy for DeterminismRules {
    fn default_qualifier(
        &self,
        h: &dyn QualifierHierarchy,
        classes: &ClassTable,
        location: TypeUseLocation,
        ty: &AnnotatedType,
    ) -> Qualifier {
        let immutable_kind = ty
            .class_name()
            .and_then(|name| classes.kind_of(name))
            .is_some_and(|kind| matches!(kind, ClassKind::Enum | ClassKind::Annotation));
        if immutable_kind {
            return q(DET);
        }
        match location {
            TypeUseLocation::Local => h.top().clone(),
            TypeUseLocation::Parameter | TypeUseLocation::Return | TypeUseLocation::Receiver => q(POLY_DET),
            _ => q(DET),
        }
    }

    fn literal_qualifier(&self, _h: &dyn QualifierHierarchy, _literal: &Literal) -> Option<Qualifier> {
        Some(q(DET))
    }

    fn adjust_method_type(&self, h: &dyn QualifierHierarchy, method: &mut MethodType) {
        if !method.defaulted_return {
            return;
        }
        let mut has_poly = false;
        let mut inputs: Vec<AnnotatedType> = method.params.clone();
        inputs.extend(method.receiver.clone());
        for ty in inputs.iter_mut() {
            ty.for_each_mut(&mut |t| has_poly |= t.annotations.iter().any(|a| h.is_polymorphic(a)));
        }
        if !has_poly {
            method.ret.replace_annotation(q(DET), h);
        }
    }
}

impl RefinementRules for DeterminismRules {
    fn binary(&self, cx: &TypeContext<'_, '_>, _op: BinOp, left: &Operand<'_>, right: &Operand<'_>) -> Option<Qualifier> {
        Some(cx.hierarchy().least_upper_bound(&left.qualifier, &right.qualifier))
    }

    fn substitute_poly(&self, _h: &dyn QualifierHierarchy, poly: &Qualifier, resolved: &Qualifier) -> Qualifier {
        if resolved.is(ORDER_NON_DET) {
            match poly.str_value() {
                Some("up") => return q(NON_DET),
                Some("down") => return q(DET),
                _ => {}
            }
        }
        resolved.clone()
    }

    fn annotate_expr(&self, cx: &TypeContext<'_, '_>, expr: &HirExpr, ty: &mut AnnotatedType) {
        let h = cx.hierarchy();
        match &expr.kind {
            ExprKind::ArrayAccess { array, .. } => {
                let array_q = cx.qualifier_of(array);
                if array_q.is(ORDER_NON_DET) || array_q.is(NON_DET) {
                    ty.replace_annotation(q(NON_DET), h);
                } else if h.is_polymorphic(&array_q) {
                    ty.replace_annotation(Qualifier::with_str(POLY_DET, "up"), h);
                }
            }
            ExprKind::Call {
                receiver,
                method,
                args,
                ..
            } => {
                let classes = cx.classes();
                if method.name == "equals" && args.len() == 1 {
                    if let Some(receiver) = receiver {
                        let both_unordered_sets = [receiver.as_ref(), &args[0]].into_iter().all(|e| {
                            let ety = cx.type_of(e);
                            ety.qualifier(h).is(ORDER_NON_DET) && Self::is_set(classes, &ety)
                        });
                        if both_unordered_sets {
                            ty.replace_annotation(q(DET), h);
                            return;
                        }
                    }
                }
                if ty.qualifier(h).is(ORDER_NON_DET) && !Self::is_collection_like(classes, ty) {
                    ty.replace_annotation(q(NON_DET), h);
                }
            }
            _ => {}
        }
    }

    fn after_call(&self, cx: &mut RefineContext<'_, '_, '_>, call: &HirExpr) -> Result<()> {
        let ExprKind::Call {
            receiver,
            method,
            args,
            ..
        } = &call.kind
        else {
            return Ok(());
        };
        let Some(sorted) = sorted_operand(method, receiver.as_deref(), args) else {
            return Ok(());
        };
        let current = cx.current(sorted);
        if current.is(ORDER_NON_DET) {
            cx.replace(sorted, q(DET));
        } else if cx.hierarchy().is_polymorphic(&current) {
            cx.replace(sorted, Qualifier::with_str(POLY_DET, "down"));
            cx.add_fact(SORTED_POLY, sorted);
        }
        Ok(())
    }
}

impl ConsistencyRules for DeterminismRules {
    fn is_valid_use(&self, cx: &mut VisitContext<'_, '_, '_>, ty: &AnnotatedType, span: Span) -> bool {
        let h = cx.hierarchy();
        let classes = cx.classes();
        let Some(primary) = ty.primary(h).cloned() else {
            return true;
        };

        if primary.is(ORDER_NON_DET)
            && matches!(ty.kind, TypeKind::Declared { .. } | TypeKind::Primitive(_))
            && !Self::is_collection_like(classes, ty)
        {
            cx.error(
                "ordernondet.on.noncollection.and.nonarray",
                span,
                format!("{} is not a collection, iterator or array", ty),
            );
            return false;
        }

        let mut valid = true;
        for arg in ty.type_args() {
            let Some(arg_q) = arg.effective(h) else {
                continue;
            };
            if h.is_subtype(arg_q, &primary) {
                continue;
            }
            valid = false;
            if matches!(arg.kind, TypeKind::TypeVar { .. } | TypeKind::Wildcard { .. }) {
                cx.error(
                    "invalid.upper.bound.on.type.argument",
                    span,
                    format!("upper bound {} of a type argument of {} type", arg_q, primary),
                );
            } else {
                cx.error(
                    "invalid.element.type",
                    span,
                    format!("element type {} in {} collection", arg_q, primary),
                );
            }
        }

        if let Some(component) = ty.component() {
            if let Some(component_q) = component.primary(h) {
                if !h.is_subtype(component_q, &primary) {
                    valid = false;
                    cx.error(
                        "invalid.array.component.type",
                        span,
                        format!("component type {} in {} array", component_q, primary),
                    );
                }
            }
        }
        valid
    }

    fn check_condition(&self, cx: &mut VisitContext<'_, '_, '_>, cond: &HirExpr) {
        let found = cx.types().qualifier_of(cond);
        if !cx.hierarchy().is_subtype(&found, &q(DET)) {
            cx.error("invalid.type.on.conditional", cond.span, format!("found: {}, required: @Det", found));
        }
    }

    fn check_array_store(&self, cx: &mut VisitContext<'_, '_, '_>, target: &HirExpr, _value: &HirExpr) {
        let ExprKind::ArrayAccess { array, index } = &target.kind else {
            return;
        };
        let array_q = cx.types().qualifier_of(array);
        let index_q = cx.types().qualifier_of(index);
        if !cx.hierarchy().is_subtype(&index_q, &array_q) {
            cx.error(
                "invalid.array.assignment",
                target.span,
                format!("index {} is less deterministic than array {}", index_q, array_q),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Checker;
    use crate::config::CheckerOptions;
    use crate::hir::{HirBuilder, HirModule};
    use crate::types::PrimitiveKind;

    fn list(qual: &str) -> AnnotatedType {
        AnnotatedType::declared("java.util.List", vec![AnnotatedType::declared("java.lang.Integer", vec![])]).with(q(qual))
    }

    fn check(classes: Vec<crate::hir::HirClass>) -> Vec<String> {
        let module = HirModule {
            file: "Det.java".into(),
            classes,
        };
        let checker = Checker::new(CheckerOptions::default().with_checkers([NAME])).unwrap();
        checker.check(&module).unwrap().diagnostics.iter().map(|d| format!("{}:{}", d.line, d.key)).collect()
    }

    #[test]
    fn test_poly_substitution() {
        let rules = DeterminismRules;
        let sys = system().unwrap();
        let h = sys.hierarchy();
        let up = Qualifier::with_str(POLY_DET, "up");
        let down = Qualifier::with_str(POLY_DET, "down");
        assert_eq!(rules.substitute_poly(h, &up, &q(ORDER_NON_DET)), q(NON_DET));
        assert_eq!(rules.substitute_poly(h, &down, &q(ORDER_NON_DET)), q(DET));
        assert_eq!(rules.substitute_poly(h, &q(POLY_DET), &q(ORDER_NON_DET)), q(ORDER_NON_DET));
        assert_eq!(rules.substitute_poly(h, &up, &q(DET)), q(DET));
    }

    #[test]
    fn test_sort_refines_order_nondet_list() {
        let b = HirBuilder::new();
        let sort = MethodSig::new("java.util.Collections", "sort", &["java.util.List"]);
        let sorted = b.method(
            "sorted",
            vec![b.param("l", list(ORDER_NON_DET))],
            AnnotatedType::void(),
            vec![
                b.at(3).eval(b.call(None, sort.clone(), vec![b.var("l")], AnnotatedType::void())),
                b.at(4).local("d", list(DET), Some(b.var("l"))),
            ],
        );
        let unsorted = b.method(
            "unsorted",
            vec![b.param("l", list(ORDER_NON_DET))],
            AnnotatedType::void(),
            vec![b.at(8).local("d", list(DET), Some(b.var("l")))],
        );
        let class = b.class("C", vec![], vec![sorted, unsorted]);
        assert_eq!(check(vec![class]), vec!["8:assignment.type.incompatible"]);
    }

    #[test]
    fn test_nondet_condition_and_ordernondet_on_int() {
        let b = HirBuilder::new();
        let int = AnnotatedType::primitive(PrimitiveKind::Int);
        let method = b.method(
            "m",
            vec![
                b.param("x", int.clone().with(q(NON_DET))),
                b.param("y", int.clone().with(q(ORDER_NON_DET))),
            ],
            AnnotatedType::void(),
            vec![b.at(5).if_stmt(b.binary(BinOp::Gt, b.var("x"), b.int(0)), vec![], None)],
        );
        let class = b.class("C", vec![], vec![method]);
        let found = check(vec![class]);
        assert!(found.iter().any(|d| d == "5:invalid.type.on.conditional"), "{found:?}");
        assert!(found.iter().any(|d| d.ends_with("ordernondet.on.noncollection.and.nonarray")), "{found:?}");
    }

    #[test]
    fn test_static_method_without_params_returns_det() {
        let sys = system().unwrap();
        let h = sys.hierarchy();
        let mut mt = MethodType {
            receiver: None,
            params: vec![],
            ret: AnnotatedType::primitive(PrimitiveKind::Int).with(q(POLY_DET)),
            defaulted_return: true,
        };
        DeterminismRules.adjust_method_type(h, &mut mt);
        assert_eq!(mt.ret.primary(h), Some(&q(DET)));

        let mut with_param = MethodType {
            receiver: None,
            params: vec![AnnotatedType::primitive(PrimitiveKind::Int).with(q(POLY_DET))],
            ret: AnnotatedType::primitive(PrimitiveKind::Int).with(q(POLY_DET)),
            defaulted_return: true,
        };
        DeterminismRules.adjust_method_type(h, &mut with_param);
        assert_eq!(with_param.ret.primary(h), Some(&q(POLY_DET)));
    }
}
