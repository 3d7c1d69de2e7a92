//! Qualifier polymorphism and viewpoint adaptation

use super::{AnnotatedTypeFactory, MethodType, TypeContext};
use crate::hir::{ExprKind, HirExpr, MethodSig};
use crate::qualifier::Qualifier;
use crate::types::AnnotatedType;

impl<'a> AnnotatedTypeFactory<'a> {
    /// Declared type of the method a call resolves to, before polymorphism is resolved
    pub fn invoked_method_type(&self, sig: &MethodSig, ret: &AnnotatedType, has_receiver: bool) -> MethodType {
        match self.module().method(sig) {
            Some((class, method)) => self.method_type(class, method),
            None => self.library_method_type(sig, ret, !has_receiver),
        }
    }

    /// Type of the invoked method at this call site, with polymorphic qualifiers
    /// replaced by what the actual receiver and arguments bind them to
    pub fn resolved_call(&self, tcx: &TypeContext<'_, 'a>, call: &HirExpr) -> Option<MethodType> {
        let ExprKind::Call {
            receiver,
            method,
            args,
            ret_type,
        } = &call.kind
        else {
            return None;
        };
        let in_unit = self.module().method(method).is_some();
        let mut mt = self.invoked_method_type(method, ret_type, receiver.is_some() || in_unit);
        let receiver_q = match receiver {
            Some(receiver) => Some(tcx.qualifier_of(receiver)),
            None if mt.receiver.is_some() && !tcx.method().is_static() => {
                Some(self.receiver_type(tcx.method()).qualifier(self.hierarchy()))
            }
            None => None,
        };
        self.resolve_polymorphism(tcx, &mut mt, receiver_q, args);
        Some(mt)
    }

    fn resolve_polymorphism(
        &self,
        tcx: &TypeContext<'_, 'a>,
        mt: &mut MethodType,
        receiver_q: Option<Qualifier>,
        args: &[HirExpr],
    ) {
        let h = self.hierarchy();
        if h.polymorphic().is_none() {
            return;
        }

        let mut actuals: Vec<Qualifier> = Vec::new();
        if let (Some(formal), Some(actual)) = (&mt.receiver, receiver_q) {
            if formal.primary(h).is_some_and(|q| h.is_polymorphic(q)) {
                actuals.push(actual);
            }
        }
        for (i, arg) in args.iter().enumerate() {
            let arg_ty = tcx.type_of(arg);
            let Some(formal) = mt.formal_for_arg(i, args.len(), &arg_ty) else {
                continue;
            };
            if formal.primary(h).is_some_and(|q| h.is_polymorphic(q)) {
                actuals.push(arg_ty.qualifier(h));
            }
        }

        let resolved = actuals
            .into_iter()
            .reduce(|a, b| h.least_upper_bound(&a, &b))
            .unwrap_or_else(|| h.top().clone());
        // Polymorphic actuals (the caller's own poly parameters) keep the formal as written
        if h.is_polymorphic(&resolved) {
            return;
        }

        let rules = self.rules();
        let mut substitute = |ty: &mut AnnotatedType| {
            ty.for_each_mut(&mut |t| {
                for q in t.annotations.iter_mut() {
                    if h.is_polymorphic(q) {
                        *q = rules.substitute_poly(h, q, &resolved);
                    }
                }
            })
        };
        if let Some(receiver) = mt.receiver.as_mut() {
            substitute(receiver);
        }
        mt.params.iter_mut().for_each(&mut substitute);
        substitute(&mut mt.ret);
    }

    /// Adapt a member type to the qualifier of the receiver it is accessed through
    pub fn viewpoint_adapt(&self, ty: &mut AnnotatedType, receiver_q: &Qualifier) {
        let h = self.hierarchy();
        if h.is_polymorphic(receiver_q) {
            return;
        }
        let rules = self.rules();
        ty.for_each_mut(&mut |t| {
            for q in t.annotations.iter_mut() {
                if h.is_polymorphic(q) {
                    *q = rules.substitute_poly(h, q, receiver_q);
                }
            }
        });
    }
}
