//! Lower bounds of integral expressions, used to prove array indices non-negative

use crate::checkers::build_hierarchy;
use crate::checker::TypeSystem;
use crate::dataflow::{refine_to_glb, RefineContext, RefinementRules};
use crate::error::Result;
use crate::factory::{DefaultingPolicy, Operand, TypeContext, TypeUseLocation};
use crate::hierarchy::{HierarchyBuilder, QualifierHierarchy};
use crate::hir::{BinOp, ExprKind, HirExpr, Literal};
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable};
use crate::visitor::{ConsistencyRules, VisitContext};

pub const NAME: &str = "lowerbound";

pub const LOWER_BOUND_UNKNOWN: &str = "LowerBoundUnknown";
pub const GTE_NEGATIVE_ONE: &str = "GTENegativeOne";
pub const NON_NEGATIVE: &str = "NonNegative";
pub const POSITIVE: &str = "Positive";
pub const LOWER_BOUND_BOTTOM: &str = "LowerBoundBottom";
pub const POLY_LOWER_BOUND: &str = "PolyLowerBound";

pub fn system() -> Result<TypeSystem> {
    let hierarchy = build_hierarchy(
        NAME,
        HierarchyBuilder::new(NAME)
            .qualifier(LOWER_BOUND_UNKNOWN, &[])
            .qualifier(GTE_NEGATIVE_ONE, &[LOWER_BOUND_UNKNOWN])
            .qualifier(NON_NEGATIVE, &[GTE_NEGATIVE_ONE])
            .qualifier(POSITIVE, &[NON_NEGATIVE])
            .qualifier(LOWER_BOUND_BOTTOM, &[POSITIVE])
            .polymorphic(POLY_LOWER_BOUND),
    )?;
    Ok(TypeSystem::new(NAME, Box::new(hierarchy), Box::new(LowerBoundRules)))
}

/// Strongest lower-bound qualifier describing `value`
pub fn classify(value: i64) -> Qualifier {
    Qualifier::new(match value {
        v if v >= 1 => POSITIVE,
        0 => NON_NEGATIVE,
        -1 => GTE_NEGATIVE_ONE,
        _ => LOWER_BOUND_UNKNOWN,
    })
}

/// Smallest value a qualifier admits, if it bounds anything
fn minimum(q: &Qualifier) -> Option<i64> {
    match q.name() {
        POSITIVE => Some(1),
        NON_NEGATIVE => Some(0),
        GTE_NEGATIVE_ONE => Some(-1),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct LowerBoundRules;

impl LowerBoundRules {
    /// Qualifier of a value known to be at least `min(q) + delta`
    fn shifted(h: &dyn QualifierHierarchy, q: &Qualifier, delta: i64) -> Qualifier {
        if q == h.bottom() {
            return q.clone();
        }
        match minimum(q) {
            Some(min) => classify(min.saturating_add(delta)),
            None if delta == 0 => q.clone(),
            None => h.top().clone(),
        }
    }

    fn is_length(expr: &HirExpr) -> bool {
        match &expr.kind {
            ExprKind::ArrayLength(_) => true,
            ExprKind::Call { method, args, .. } => {
                args.is_empty() && matches!(method.name.as_str(), "length" | "size")
            }
            _ => false,
        }
    }
}

impl DefaultingPolicy for LowerBoundRules {
    fn default_qualifier(
        &self,
        h: &dyn QualifierHierarchy,
        _classes: &ClassTable,
        _location: TypeUseLocation,
        _ty: &AnnotatedType,
    ) -> Qualifier {
        h.top().clone()
    }

    fn literal_qualifier(&self, _h: &dyn QualifierHierarchy, literal: &Literal) -> Option<Qualifier> {
        match literal {
            Literal::Int(v) => Some(classify(*v)),
            Literal::Char(_) => Some(Qualifier::new(NON_NEGATIVE)),
            _ => None,
        }
    }
}

impl RefinementRules for LowerBoundRules {
    fn binary(&self, cx: &TypeContext<'_, '_>, op: BinOp, left: &Operand<'_>, right: &Operand<'_>) -> Option<Qualifier> {
        let h = cx.hierarchy();
        let (l, r) = (&left.qualifier, &right.qualifier);
        match op {
            BinOp::Add => Some(match (left.constant, right.constant) {
                (_, Some(c)) => Self::shifted(h, l, c),
                (Some(c), None) => Self::shifted(h, r, c),
                (None, None) => match (minimum(l), minimum(r)) {
                    (Some(a), Some(b)) => classify(a + b),
                    _ => h.top().clone(),
                },
            }),
            BinOp::Sub => Some(match right.constant {
                Some(c) => Self::shifted(h, l, c.saturating_neg()),
                None => h.top().clone(),
            }),
            BinOp::Mul => Some(match (minimum(l), minimum(r)) {
                (Some(a), Some(b)) if a >= 0 && b >= 0 => classify(a * b),
                _ => h.top().clone(),
            }),
            BinOp::Div | BinOp::Rem => Some(match (minimum(l), minimum(r)) {
                (Some(a), Some(b)) if a >= 0 && b >= 1 => Qualifier::new(NON_NEGATIVE),
                _ => h.top().clone(),
            }),
            _ => None,
        }
    }

    fn annotate_expr(&self, cx: &TypeContext<'_, '_>, expr: &HirExpr, ty: &mut AnnotatedType) {
        if Self::is_length(expr) {
            ty.replace_annotation(Qualifier::new(NON_NEGATIVE), cx.hierarchy());
        }
    }

    fn refine_gt(&self, cx: &mut RefineContext<'_, '_, '_>, greater: &Operand<'_>, lesser: &Operand<'_>) {
        let bound = match lesser.constant {
            Some(c) => Some(c.saturating_add(1)),
            None => minimum(&lesser.qualifier).map(|m| m + 1),
        };
        if let Some(bound) = bound {
            let q = classify(bound);
            if minimum(&q).is_some() {
                cx.refine_operand(greater, q);
            }
        }
    }

    fn refine_gte(&self, cx: &mut RefineContext<'_, '_, '_>, greater: &Operand<'_>, lesser: &Operand<'_>) {
        let q = match lesser.constant {
            Some(c) => classify(c),
            None => lesser.qualifier.clone(),
        };
        if minimum(&q).is_some() {
            cx.refine_operand(greater, q);
        }
    }

    fn refine_equal(&self, cx: &mut RefineContext<'_, '_, '_>, left: &Operand<'_>, right: &Operand<'_>, equal: bool) {
        if equal {
            refine_to_glb(cx, left, right);
            return;
        }
        for (subject, other) in [(left, right), (right, left)] {
            let lifted = match (other.constant, subject.qualifier.name()) {
                (Some(0), NON_NEGATIVE) => POSITIVE,
                (Some(-1), GTE_NEGATIVE_ONE) => NON_NEGATIVE,
                _ => continue,
            };
            cx.refine_operand(subject, Qualifier::new(lifted));
        }
    }
}

impl ConsistencyRules for LowerBoundRules {
    fn check_array_access(&self, cx: &mut VisitContext<'_, '_, '_>, access: &HirExpr) {
        let ExprKind::ArrayAccess { index, .. } = &access.kind else {
            return;
        };
        let found = cx.types().qualifier_of(index);
        if !cx.hierarchy().is_subtype(&found, &Qualifier::new(NON_NEGATIVE)) {
            cx.warning(
                "array.access.unsafe.low",
                access.span,
                format!("index {} may be negative: found {}", FlowExprText(index), found),
            );
        }
    }
}

/// Source-like rendering of an index expression for messages
struct FlowExprText<'e>(&'e HirExpr);

impl std::fmt::Display for FlowExprText<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match crate::dataflow::FlowExpr::from_tree(self.0) {
            Some(fe) => write!(f, "{}", fe),
            None => match self.0.int_literal() {
                Some(v) => write!(f, "{}", v),
                None => f.write_str("expression"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::Checker;
    use crate::config::CheckerOptions;
    use crate::hir::{HirBuilder, HirModule, HirStmt};
    use crate::types::PrimitiveKind;

    fn int() -> AnnotatedType {
        AnnotatedType::primitive(PrimitiveKind::Int)
    }

    fn int_array() -> AnnotatedType {
        AnnotatedType::array(int())
    }

    fn warnings(b: &HirBuilder, params: Vec<crate::hir::HirParam>, body: Vec<HirStmt>) -> Vec<u32> {
        let method = b.method("m", params, AnnotatedType::void(), body);
        let module = HirModule {
            file: "Low.java".into(),
            classes: vec![b.class("Low", vec![], vec![method])],
        };
        let checker = Checker::new(CheckerOptions::default().with_checkers(["value", NAME])).unwrap();
        let report = checker.check(&module).unwrap();
        report
            .diagnostics
            .iter()
            .filter(|d| d.key == "array.access.unsafe.low")
            .map(|d| d.line)
            .collect()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(5), Qualifier::new(POSITIVE));
        assert_eq!(classify(0), Qualifier::new(NON_NEGATIVE));
        assert_eq!(classify(-1), Qualifier::new(GTE_NEGATIVE_ONE));
        assert_eq!(classify(-2), Qualifier::new(LOWER_BOUND_UNKNOWN));
    }

    #[test]
    fn test_guarded_index_is_safe() {
        let b = HirBuilder::new();
        let body = vec![
            b.at(2).if_stmt(
                b.binary(BinOp::Gt, b.var("i"), b.int(-1)),
                vec![b.at(3).eval(b.index(b.var("a"), b.var("i")))],
                None,
            ),
            b.at(5).eval(b.index(b.var("a"), b.var("i"))),
        ];
        let found = warnings(&b, vec![b.param("a", int_array()), b.param("i", int())], body);
        assert_eq!(found, vec![5]);
    }

    #[test]
    fn test_counting_loop_index_is_safe() {
        let b = HirBuilder::new();
        let body = vec![b.index_loop("i", "a", vec![b.at(3).eval(b.index(b.var("a"), b.var("i")))])];
        let found = warnings(&b, vec![b.param("a", int_array())], body);
        assert!(found.is_empty(), "{found:?}");
    }

    #[test]
    fn test_subtracting_a_constant() {
        let b = HirBuilder::new();
        let body = vec![
            b.at(2).local("n", int(), Some(b.length(b.var("a")))),
            b.at(3).local("k", int(), Some(b.binary(BinOp::Sub, b.var("n"), b.int(1)))),
            b.at(4).eval(b.index(b.var("a"), b.var("k"))),
            b.at(5).if_stmt(
                b.binary(BinOp::Ne, b.var("n"), b.int(0)),
                vec![b.at(6).eval(b.index(b.var("a"), b.binary(BinOp::Sub, b.var("n"), b.int(1))))],
                None,
            ),
        ];
        let found = warnings(&b, vec![b.param("a", int_array())], body);
        assert_eq!(found, vec![4]);
    }
}
