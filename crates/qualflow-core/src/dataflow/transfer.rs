//! Refinement hooks a type system plugs into the transfer function

use super::expr::FlowExpr;
use super::store::Store;
use crate::checker::UnitContext;
use crate::error::Result;
use crate::factory::{Operand, TypeContext};
use crate::hierarchy::QualifierHierarchy;
use crate::hir::{BinOp, HirExpr, HirModule};
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable};

/// The store being refined plus everything needed to type expressions
pub struct RefineContext<'r, 'c, 'a> {
    types: &'r TypeContext<'c, 'a>,
    store: &'r mut Store,
    unit: &'r UnitContext,
}

impl<'r, 'c, 'a> RefineContext<'r, 'c, 'a> {
    pub fn new(types: &'r TypeContext<'c, 'a>, store: &'r mut Store, unit: &'r UnitContext) -> Self {
        Self { types, store, unit }
    }

    pub fn types(&self) -> &TypeContext<'c, 'a> {
        self.types
    }

    pub fn hierarchy(&self) -> &'a dyn QualifierHierarchy {
        self.types.hierarchy()
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        self.store
    }

    pub fn unit(&self) -> &UnitContext {
        self.unit
    }

    /// What is currently known about `expr`: its store entry, else its type
    pub fn current(&self, expr: &HirExpr) -> Qualifier {
        FlowExpr::from_tree(expr)
            .and_then(|fe| self.store.value(&fe).cloned())
            .unwrap_or_else(|| self.types.qualifier_of(expr))
    }

    /// Meet `q` with the current value of `expr`. Untrackable expressions are left alone.
    pub fn refine(&mut self, expr: &HirExpr, q: Qualifier) {
        let Some(fe) = FlowExpr::from_tree(expr) else {
            return;
        };
        let refined = self.hierarchy().greatest_lower_bound(&self.current(expr), &q);
        self.store.insert_value(fe, refined);
    }

    pub fn refine_operand(&mut self, operand: &Operand<'_>, q: Qualifier) {
        if let Some(expr) = operand.expr {
            self.refine(expr, q);
        }
    }

    /// Overwrite the value of `expr`, forgetting what it was
    pub fn replace(&mut self, expr: &HirExpr, q: Qualifier) {
        if let Some(fe) = FlowExpr::from_tree(expr) {
            self.store.clear_value(&fe);
            self.store.insert_value(fe, q);
        }
    }

    pub fn add_fact(&mut self, table: &str, expr: &HirExpr) {
        if let Some(fe) = FlowExpr::from_tree(expr) {
            self.store.add_fact(table, fe);
        }
    }
}

/// Meet both operands with each other
pub fn refine_to_glb(cx: &mut RefineContext<'_, '_, '_>, left: &Operand<'_>, right: &Operand<'_>) {
    let glb = cx.hierarchy().greatest_lower_bound(&left.qualifier, &right.qualifier);
    cx.refine_operand(left, glb.clone());
    cx.refine_operand(right, glb);
}

/// Flow refinement rules of a type system. Every hook defaults to "learn nothing".
pub trait RefinementRules {
    /// Qualifier of `left op right` for arithmetic and comparison operators
    fn binary(&self, _cx: &TypeContext<'_, '_>, _op: BinOp, _left: &Operand<'_>, _right: &Operand<'_>) -> Option<Qualifier> {
        None
    }

    /// Adjust the type the factory computed for `expr`
    fn annotate_expr(&self, _cx: &TypeContext<'_, '_>, _expr: &HirExpr, _ty: &mut AnnotatedType) {}

    /// Concrete qualifier for polymorphic `poly` once the call site binds it to `resolved`
    fn substitute_poly(&self, _h: &dyn QualifierHierarchy, _poly: &Qualifier, resolved: &Qualifier) -> Qualifier {
        resolved.clone()
    }

    /// Facts learned from `greater > lesser` holding
    fn refine_gt(&self, _cx: &mut RefineContext<'_, '_, '_>, _greater: &Operand<'_>, _lesser: &Operand<'_>) {}

    /// Facts learned from `greater >= lesser` holding
    fn refine_gte(&self, _cx: &mut RefineContext<'_, '_, '_>, _greater: &Operand<'_>, _lesser: &Operand<'_>) {}

    /// Facts learned from `left == right` being `equal`
    fn refine_equal(&self, cx: &mut RefineContext<'_, '_, '_>, left: &Operand<'_>, right: &Operand<'_>, equal: bool) {
        if equal {
            refine_to_glb(cx, left, right);
        }
    }

    /// Runs on the store after every call node
    fn after_call(&self, _cx: &mut RefineContext<'_, '_, '_>, _call: &HirExpr) -> Result<()> {
        Ok(())
    }

    /// Runs after the comparison refinements of `cond`, with both branch stores
    fn after_comparison(
        &self,
        _cx: &TypeContext<'_, '_>,
        _unit: &UnitContext,
        _cond: &HirExpr,
        _then_store: &mut Store,
        _else_store: &mut Store,
    ) -> Result<()> {
        Ok(())
    }

    /// Fill the per-unit context before any method is analyzed
    fn prepare_unit(&self, _module: &HirModule, _classes: &ClassTable, _unit: &mut UnitContext) {}
}

/// Refine both branch stores of the comparison `left op right`
#[allow(clippy::too_many_arguments)]
pub fn refine_comparison<R: RefinementRules + ?Sized>(
    rules: &R,
    types: &TypeContext<'_, '_>,
    unit: &UnitContext,
    op: BinOp,
    left: &HirExpr,
    right: &HirExpr,
    then_store: &mut Store,
    else_store: &mut Store,
) {
    let l = types.operand(left);
    let r = types.operand(right);
    {
        let mut cx = RefineContext::new(types, then_store, unit);
        match op {
            BinOp::Gt => rules.refine_gt(&mut cx, &l, &r),
            BinOp::Lt => rules.refine_gt(&mut cx, &r, &l),
            BinOp::Ge => rules.refine_gte(&mut cx, &l, &r),
            BinOp::Le => rules.refine_gte(&mut cx, &r, &l),
            BinOp::Eq => rules.refine_equal(&mut cx, &l, &r, true),
            BinOp::Ne => rules.refine_equal(&mut cx, &l, &r, false),
            _ => {}
        }
    }
    let mut cx = RefineContext::new(types, else_store, unit);
    match op {
        BinOp::Gt => rules.refine_gte(&mut cx, &r, &l),
        BinOp::Lt => rules.refine_gte(&mut cx, &l, &r),
        BinOp::Ge => rules.refine_gt(&mut cx, &r, &l),
        BinOp::Le => rules.refine_gt(&mut cx, &l, &r),
        BinOp::Eq => rules.refine_equal(&mut cx, &l, &r, false),
        BinOp::Ne => rules.refine_equal(&mut cx, &l, &r, true),
        _ => {}
    }
}
