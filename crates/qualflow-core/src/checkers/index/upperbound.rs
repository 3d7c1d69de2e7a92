//! Upper bounds of integral expressions relative to array lengths
//!
//! `@LTLengthOf({"a"})` holds for values below `a.length`, `@LTEqLengthOf({"a"})` for
//! values at most `a.length`. Listing more arrays makes a qualifier more precise.

use super::{lowerbound, sequence_name};
use crate::checkers::build_hierarchy;
use crate::checker::TypeSystem;
use crate::dataflow::{RefineContext, RefinementRules};
use crate::dependent::{DependentContext, Subsequence};
use crate::error::Result;
use crate::factory::{DefaultingPolicy, Operand, TypeContext, TypeUseLocation};
use crate::hierarchy::{GraphHierarchy, HierarchyBuilder, QualifierHierarchy};
use crate::hir::{BinOp, ExprKind, HirClass, HirExpr, HirField};
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable};
use crate::visitor::{ConsistencyRules, VisitContext};
use std::collections::BTreeSet;

pub const NAME: &str = "upperbound";

pub const UPPER_BOUND_UNKNOWN: &str = "UpperBoundUnknown";
pub const LTEQ_LENGTH_OF: &str = "LTEqLengthOf";
pub const LT_LENGTH_OF: &str = "LTLengthOf";
pub const UPPER_BOUND_BOTTOM: &str = "UpperBoundBottom";

pub fn system() -> Result<TypeSystem> {
    Ok(TypeSystem::new(NAME, Box::new(hierarchy()?), Box::new(UpperBoundRules)))
}

pub fn hierarchy() -> Result<UpperBoundHierarchy> {
    let graph = build_hierarchy(
        NAME,
        HierarchyBuilder::new(NAME)
            .qualifier(UPPER_BOUND_UNKNOWN, &[])
            .qualifier(LTEQ_LENGTH_OF, &[UPPER_BOUND_UNKNOWN])
            .qualifier(LT_LENGTH_OF, &[LTEQ_LENGTH_OF])
            .qualifier(UPPER_BOUND_BOTTOM, &[LT_LENGTH_OF]),
    )?;
    Ok(UpperBoundHierarchy { graph })
}

pub fn lt_length_of<I, S>(arrays: I) -> Qualifier
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    sequence_qualifier(LT_LENGTH_OF, arrays)
}

pub fn lteq_length_of<I, S>(arrays: I) -> Qualifier
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    sequence_qualifier(LTEQ_LENGTH_OF, arrays)
}

fn sequence_qualifier<I, S>(name: &str, arrays: I) -> Qualifier
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let sorted: BTreeSet<String> = arrays.into_iter().map(Into::into).collect();
    Qualifier::with_strings(name, sorted)
}

fn is_sequence(q: &Qualifier) -> bool {
    q.is(LT_LENGTH_OF) || q.is(LTEQ_LENGTH_OF)
}

#[derive(Debug, Clone)]
pub struct UpperBoundHierarchy {
    graph: GraphHierarchy,
}

impl QualifierHierarchy for UpperBoundHierarchy {
    fn name(&self) -> &str {
        self.graph.name()
    }

    fn top(&self) -> &Qualifier {
        self.graph.top()
    }

    fn bottom(&self) -> &Qualifier {
        self.graph.bottom()
    }

    fn owns(&self, q: &Qualifier) -> bool {
        self.graph.owns(q)
    }

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool {
        if is_sequence(sub) && is_sequence(sup) {
            return self.graph.is_subtype(sub, sup) && sup.strings().iter().all(|a| sub.strings().contains(a));
        }
        self.graph.is_subtype(sub, sup)
    }

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if is_sequence(a) && is_sequence(b) {
            let common: Vec<&String> = a.strings().iter().filter(|s| b.strings().contains(s)).collect();
            if common.is_empty() {
                return self.top().clone();
            }
            let name = if a.is(LT_LENGTH_OF) && b.is(LT_LENGTH_OF) {
                LT_LENGTH_OF
            } else {
                LTEQ_LENGTH_OF
            };
            return sequence_qualifier(name, common.into_iter().cloned());
        }
        self.graph.least_upper_bound(a, b)
    }

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if is_sequence(a) && is_sequence(b) {
            let both = a.strings().iter().chain(b.strings()).cloned();
            return match (a.is(LT_LENGTH_OF), b.is(LT_LENGTH_OF)) {
                (true, true) => lt_length_of(both),
                (false, false) => lteq_length_of(both),
                // A non-strict bound never becomes strict; the strict side is kept as is
                (true, false) => a.clone(),
                (false, true) => b.clone(),
            };
        }
        self.graph.greatest_lower_bound(a, b)
    }
}

#[derive(Debug, Default)]
pub struct UpperBoundRules;

impl UpperBoundRules {
    /// Array whose length `expr` is
    fn length_of(expr: &HirExpr) -> Option<String> {
        match &expr.skip_casts().kind {
            ExprKind::ArrayLength(array) => sequence_name(array),
            _ => None,
        }
    }

    /// Known lower bound of an operand: its constant, else what `lowerbound` proved
    fn minimum(cx: &TypeContext<'_, '_>, operand: &Operand<'_>) -> Option<i64> {
        if let Some(c) = operand.constant {
            return Some(c);
        }
        let q = cx.subchecker_value(lowerbound::NAME, operand.expr?)?;
        match q.name() {
            lowerbound::POSITIVE => Some(1),
            lowerbound::NON_NEGATIVE => Some(0),
            _ => None,
        }
    }

    /// `base - amount` where `amount` is at least `min`
    fn lowered(h: &dyn QualifierHierarchy, base: &Qualifier, min: i64) -> Qualifier {
        match min {
            m if m >= 1 && is_sequence(base) => lt_length_of(base.strings().iter().cloned()),
            0 => base.clone(),
            _ => h.top().clone(),
        }
    }
}

impl DefaultingPolicy for UpperBoundRules {
    fn default_qualifier(
        &self,
        h: &dyn QualifierHierarchy,
        _classes: &ClassTable,
        _location: TypeUseLocation,
        _ty: &AnnotatedType,
    ) -> Qualifier {
        h.top().clone()
    }

    fn dependent_qualifiers(&self) -> &'static [&'static str] {
        &[LT_LENGTH_OF, LTEQ_LENGTH_OF]
    }
}

impl RefinementRules for UpperBoundRules {
    fn binary(&self, cx: &TypeContext<'_, '_>, op: BinOp, left: &Operand<'_>, right: &Operand<'_>) -> Option<Qualifier> {
        let h = cx.hierarchy();
        match op {
            BinOp::Sub => {
                let min = Self::minimum(cx, right);
                if let (Some(array), Some(c)) = (left.expr.and_then(Self::length_of), min) {
                    return Some(if c >= 1 {
                        lt_length_of([array])
                    } else if c == 0 {
                        lteq_length_of([array])
                    } else {
                        h.top().clone()
                    });
                }
                Some(min.map_or_else(|| h.top().clone(), |m| Self::lowered(h, &left.qualifier, m)))
            }
            BinOp::Add => {
                let (base, amount) = match (left.constant, right.constant) {
                    (_, Some(c)) => (&left.qualifier, c),
                    (Some(c), None) => (&right.qualifier, c),
                    (None, None) => return Some(h.top().clone()),
                };
                Some(match amount {
                    1 if base.is(LT_LENGTH_OF) => lteq_length_of(base.strings().iter().cloned()),
                    a if a <= 0 => Self::lowered(h, base, a.saturating_neg()),
                    _ => h.top().clone(),
                })
            }
            _ => None,
        }
    }

    fn annotate_expr(&self, cx: &TypeContext<'_, '_>, expr: &HirExpr, ty: &mut AnnotatedType) {
        if let Some(array) = Self::length_of(expr) {
            ty.replace_annotation(lteq_length_of([array]), cx.hierarchy());
        }
    }

    fn refine_gt(&self, cx: &mut RefineContext<'_, '_, '_>, greater: &Operand<'_>, lesser: &Operand<'_>) {
        let bound = match greater.expr.and_then(Self::length_of) {
            Some(array) => lt_length_of([array]),
            None if is_sequence(&greater.qualifier) => lt_length_of(greater.qualifier.strings().iter().cloned()),
            None => return,
        };
        cx.refine_operand(lesser, bound);
    }

    fn refine_gte(&self, cx: &mut RefineContext<'_, '_, '_>, greater: &Operand<'_>, lesser: &Operand<'_>) {
        let bound = match greater.expr.and_then(Self::length_of) {
            Some(array) => lteq_length_of([array]),
            None if is_sequence(&greater.qualifier) => greater.qualifier.clone(),
            None => return,
        };
        cx.refine_operand(lesser, bound);
    }
}

impl ConsistencyRules for UpperBoundRules {
    fn check_array_access(&self, cx: &mut VisitContext<'_, '_, '_>, access: &HirExpr) {
        let ExprKind::ArrayAccess { array, index } = &access.kind else {
            return;
        };
        let Some(name) = sequence_name(array) else {
            return;
        };
        let found = cx.types().qualifier_of(index);
        let safe = found.is(LT_LENGTH_OF) && found.strings().contains(&name);
        if !safe && found != *cx.hierarchy().bottom() {
            cx.warning(
                "array.access.unsafe.high",
                access.span,
                format!("index may be too large for {}: found {}", name, found),
            );
        }
    }

    fn check_field(&self, cx: &mut VisitContext<'_, '_, '_>, class: &HirClass, field: &HirField) {
        let Some(subsequence) = Subsequence::from_field(field) else {
            return;
        };
        let standardized = subsequence.standardized(cx.factory().dependent_helper(), &DependentContext::for_class(class));
        for err in standardized.errors() {
            cx.error("expression.unparsable.type.invalid", field.span, err.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Checker;
    use crate::config::CheckerOptions;
    use crate::hir::{AnnotationArg, DeclAnnotation, HirBuilder, HirModule, HirParam, HirStmt};
    use crate::types::PrimitiveKind;

    fn int() -> AnnotatedType {
        AnnotatedType::primitive(PrimitiveKind::Int)
    }

    fn high_warnings(b: &HirBuilder, params: Vec<HirParam>, body: Vec<HirStmt>) -> Vec<u32> {
        let method = b.method("m", params, AnnotatedType::void(), body);
        let module = HirModule {
            file: "High.java".into(),
            classes: vec![b.class("High", vec![], vec![method])],
        };
        let checker = Checker::new(CheckerOptions::default().with_checkers(["index"])).unwrap();
        let report = checker.check(&module).unwrap();
        report
            .diagnostics
            .iter()
            .filter(|d| d.key == "array.access.unsafe.high")
            .map(|d| d.line)
            .collect()
    }

    #[test]
    fn test_sequence_lattice() {
        let h = hierarchy().unwrap();
        let ab = lt_length_of(["a", "b"]);
        let a = lt_length_of(["a"]);
        assert!(h.is_subtype(&ab, &a));
        assert!(!h.is_subtype(&a, &ab));
        assert!(h.is_subtype(&a, &lteq_length_of(["a"])));
        assert!(!h.is_subtype(&lteq_length_of(["a"]), &a));
        assert_eq!(h.least_upper_bound(&ab, &lteq_length_of(["b", "c"])), lteq_length_of(["b"]));
        assert_eq!(&h.least_upper_bound(&a, &lt_length_of(["c"])), h.top());
        assert_eq!(h.greatest_lower_bound(&a, &lt_length_of(["c"])), lt_length_of(["a", "c"]));
        assert_eq!(h.greatest_lower_bound(&lteq_length_of(["a"]), &lteq_length_of(["c"])), lteq_length_of(["a", "c"]));
        assert_eq!(h.greatest_lower_bound(&a, &lteq_length_of(["c"])), a);
        assert_eq!(h.greatest_lower_bound(&lteq_length_of(["a", "c"]), &a), a);
    }

    #[test]
    fn test_non_strict_guard_does_not_prove_access() {
        let b = HirBuilder::new();
        let array = AnnotatedType::array(int());
        let body = vec![b.at(2).if_stmt(
            b.binary(BinOp::Le, b.var("i"), b.length(b.var("b"))),
            vec![b.at(3).eval(b.index(b.var("b"), b.var("i")))],
            None,
        )];
        let params = vec![
            b.param("a", array.clone()),
            b.param("b", array),
            b.param("i", int().with(lt_length_of(["a"]))),
        ];
        assert_eq!(high_warnings(&b, params, body), vec![3]);
    }

    #[test]
    fn test_loop_and_guard() {
        let b = HirBuilder::new();
        let array = AnnotatedType::array(int());
        let body = vec![
            b.index_loop("i", "a", vec![b.at(2).eval(b.index(b.var("a"), b.var("i")))]),
            b.at(3).eval(b.index(b.var("a"), b.var("j"))),
            b.at(4).if_stmt(
                b.binary(BinOp::Le, b.var("j"), b.binary(BinOp::Sub, b.length(b.var("a")), b.int(1))),
                vec![b.at(5).eval(b.index(b.var("a"), b.var("j")))],
                None,
            ),
        ];
        let params = vec![b.param("a", array), b.param("j", int())];
        assert_eq!(high_warnings(&b, params, body), vec![3]);
    }

    #[test]
    fn test_declared_bound_is_standardized() {
        let b = HirBuilder::new();
        let array = AnnotatedType::array(int());
        let bounded = int().with(lt_length_of(["#1"]));
        let body = vec![b.at(2).eval(b.index(b.var("a"), b.var("i")))];
        let params = vec![b.param("a", array), b.param("i", bounded)];
        assert!(high_warnings(&b, params, body).is_empty());
    }

    #[test]
    fn test_unparsable_subsequence_is_reported() {
        let b = HirBuilder::new();
        let mut field = b.field_decl("sub", AnnotatedType::array(int()));
        field.annotations.push(
            DeclAnnotation::new("HasSubsequence")
                .arg("subsequence", AnnotationArg::Str("arr".into()))
                .arg("from", AnnotationArg::Str("start +".into()))
                .arg("to", AnnotationArg::Str("end".into())),
        );
        let module = HirModule {
            file: "Sub.java".into(),
            classes: vec![b.class("Sub", vec![field, b.field_decl("arr", AnnotatedType::array(int()))], vec![])],
        };
        let checker = Checker::new(CheckerOptions::default().with_checkers([NAME])).unwrap();
        let keys: Vec<String> = checker.check(&module).unwrap().keys().into_iter().map(String::from).collect();
        assert_eq!(
            keys,
            vec!["expression.unparsable.type.invalid", "expression.unparsable.type.invalid"]
        );
    }
}
