//! Constant values of integral expressions
//!
//! `@IntVal({..})` lists every value an expression may have. Lists longer than
//! [`MAX_VALUES`] widen to `@UnknownVal`.

use crate::checkers::build_hierarchy;
use crate::checker::TypeSystem;
use crate::dataflow::{refine_to_glb, RefineContext, RefinementRules};
use crate::error::Result;
use crate::factory::{DefaultingPolicy, Operand, TypeContext, TypeUseLocation};
use crate::hierarchy::{GraphHierarchy, HierarchyBuilder, QualifierHierarchy};
use crate::hir::{BinOp, Literal};
use crate::qualifier::{Payload, Qualifier};
use crate::types::{AnnotatedType, ClassTable};
use crate::visitor::ConsistencyRules;

pub const NAME: &str = "value";

pub const UNKNOWN_VAL: &str = "UnknownVal";
pub const INT_VAL: &str = "IntVal";
pub const BOTTOM_VAL: &str = "BottomVal";

pub const MAX_VALUES: usize = 10;

pub fn system() -> Result<TypeSystem> {
    Ok(TypeSystem::new(NAME, Box::new(hierarchy()?), Box::new(ValueRules)))
}

pub fn hierarchy() -> Result<ValueHierarchy> {
    let graph = build_hierarchy(
        NAME,
        HierarchyBuilder::new(NAME)
            .qualifier(UNKNOWN_VAL, &[])
            .qualifier(INT_VAL, &[UNKNOWN_VAL])
            .qualifier(BOTTOM_VAL, &[INT_VAL]),
    )?;
    Ok(ValueHierarchy { graph })
}

/// `@IntVal` with its values sorted and deduplicated
pub fn int_val(values: impl IntoIterator<Item = i64>) -> Qualifier {
    let mut values: Vec<i64> = values.into_iter().collect();
    values.sort_unstable();
    values.dedup();
    Qualifier::with_payload(INT_VAL, Payload::Ints(values))
}

#[derive(Debug, Clone)]
pub struct ValueHierarchy {
    graph: GraphHierarchy,
}

impl ValueHierarchy {
    fn widen(&self, values: Vec<i64>) -> Qualifier {
        let q = int_val(values);
        if q.ints().len() > MAX_VALUES {
            self.top().clone()
        } else {
            q
        }
    }
}

impl QualifierHierarchy for ValueHierarchy {
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
        if sub.is(INT_VAL) && sup.is(INT_VAL) {
            return sub.ints().iter().all(|v| sup.ints().contains(v));
        }
        self.graph.is_subtype(sub, sup)
    }

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if a.is(INT_VAL) && b.is(INT_VAL) {
            return self.widen(a.ints().iter().chain(b.ints()).copied().collect());
        }
        self.graph.least_upper_bound(a, b)
    }

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if a.is(INT_VAL) && b.is(INT_VAL) {
            let common: Vec<i64> = a.ints().iter().copied().filter(|v| b.ints().contains(v)).collect();
            if common.is_empty() {
                return self.bottom().clone();
            }
            return int_val(common);
        }
        self.graph.greatest_lower_bound(a, b)
    }
}

#[derive(Debug, Default)]
pub struct ValueRules;

impl ValueRules {
    /// Values of `operand`, if finitely many are known
    fn values(operand: &Operand<'_>) -> Option<Vec<i64>> {
        if operand.qualifier.is(INT_VAL) {
            return Some(operand.qualifier.ints().to_vec());
        }
        operand.constant.map(|c| vec![c])
    }

    /// Keep the values of `subject` for which `keep` holds against `bound`
    fn filter(cx: &mut RefineContext<'_, '_, '_>, subject: &Operand<'_>, bound: Option<i64>, keep: impl Fn(i64, i64) -> bool) {
        let (Some(bound), Some(values)) = (bound, Self::values(subject)) else {
            return;
        };
        let kept: Vec<i64> = values.into_iter().filter(|v| keep(*v, bound)).collect();
        let refined = if kept.is_empty() {
            cx.hierarchy().bottom().clone()
        } else {
            int_val(kept)
        };
        cx.refine_operand(subject, refined);
    }
}

impl DefaultingPolicy for ValueRules {
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
            Literal::Int(v) => Some(int_val([*v])),
            Literal::Char(c) => Some(int_val([i64::from(u32::from(*c))])),
            _ => None,
        }
    }
}

impl RefinementRules for ValueRules {
    fn binary(&self, cx: &TypeContext<'_, '_>, op: BinOp, left: &Operand<'_>, right: &Operand<'_>) -> Option<Qualifier> {
        let fold: fn(i64, i64) -> Option<i64> = match op {
            BinOp::Add => i64::checked_add,
            BinOp::Sub => i64::checked_sub,
            BinOp::Mul => i64::checked_mul,
            _ => return None,
        };
        let (lhs, rhs) = (Self::values(left)?, Self::values(right)?);
        let mut out = Vec::with_capacity(lhs.len() * rhs.len());
        for a in &lhs {
            for b in &rhs {
                out.push(fold(*a, *b)?);
            }
        }
        let q = int_val(out);
        Some(if q.ints().len() > MAX_VALUES {
            cx.hierarchy().top().clone()
        } else {
            q
        })
    }

    fn refine_gt(&self, cx: &mut RefineContext<'_, '_, '_>, greater: &Operand<'_>, lesser: &Operand<'_>) {
        Self::filter(cx, greater, lesser.constant, |v, bound| v > bound);
        Self::filter(cx, lesser, greater.constant, |v, bound| v < bound);
    }

    fn refine_gte(&self, cx: &mut RefineContext<'_, '_, '_>, greater: &Operand<'_>, lesser: &Operand<'_>) {
        Self::filter(cx, greater, lesser.constant, |v, bound| v >= bound);
        Self::filter(cx, lesser, greater.constant, |v, bound| v <= bound);
    }

    fn refine_equal(&self, cx: &mut RefineContext<'_, '_, '_>, left: &Operand<'_>, right: &Operand<'_>, equal: bool) {
        if equal {
            refine_to_glb(cx, left, right);
            return;
        }
        Self::filter(cx, left, right.constant, |v, bound| v != bound);
        Self::filter(cx, right, left.constant, |v, bound| v != bound);
    }
}

impl ConsistencyRules for ValueRules {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lub_widens_past_limit() {
        let h = hierarchy().unwrap();
        let small = h.least_upper_bound(&int_val([1, 2]), &int_val([2, 3]));
        assert_eq!(small, int_val([1, 2, 3]));
        let wide = h.least_upper_bound(&int_val(0..6), &int_val(6..12));
        assert_eq!(&wide, h.top());
    }

    #[test]
    fn test_glb_of_disjoint_is_bottom() {
        let h = hierarchy().unwrap();
        assert_eq!(h.greatest_lower_bound(&int_val([1, 2]), &int_val([2, 5])), int_val([2]));
        assert_eq!(&h.greatest_lower_bound(&int_val([1]), &int_val([2])), h.bottom());
    }

    #[test]
    fn test_literals() {
        let h = hierarchy().unwrap();
        assert_eq!(ValueRules.literal_qualifier(&h, &Literal::Int(-4)), Some(int_val([-4])));
        assert_eq!(ValueRules.literal_qualifier(&h, &Literal::Char('A')), Some(int_val([65])));
        assert_eq!(ValueRules.literal_qualifier(&h, &Literal::Str("x".into())), None);
    }

    proptest! {
        #[test]
        fn prop_lub_is_upper_bound(a in prop::collection::vec(-20i64..20, 0..8), b in prop::collection::vec(-20i64..20, 0..8)) {
            let h = hierarchy().unwrap();
            let (x, y) = (int_val(a), int_val(b));
            let lub = h.least_upper_bound(&x, &y);
            prop_assert!(h.is_subtype(&x, &lub));
            prop_assert!(h.is_subtype(&y, &lub));
            prop_assert_eq!(lub, h.least_upper_bound(&y, &x));
        }
    }
}
