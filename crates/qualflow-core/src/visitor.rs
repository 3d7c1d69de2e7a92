//! Consistency checking
//!
//! Walks every class, field and method of a unit and checks that each value flowing into
//! a typed location is a subtype of the location's qualifier. Type systems add their own
//! checks through [`ConsistencyRules`].

use crate::checker::UnitContext;
use crate::config::CheckerOptions;
use crate::dataflow::{AnalysisResult, Store};
use crate::dependent::DependentTypesHelper;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::factory::{AnnotatedTypeFactory, MethodContext, MethodType, TypeContext, TypeUseLocation};
use crate::hierarchy::QualifierHierarchy;
use crate::hir::{
    ExprKind, HirClass, HirExpr, HirField, HirMethod, HirModule, HirStmt, MethodSig, NodeId, Span, StmtKind,
};
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable, TypeKind};
use crate::wpi::{InferenceSite, InferenceStorage};
use tracing::trace;

/// What a consistency rule can see and where it reports
pub struct VisitContext<'v, 'c, 'a> {
    types: &'v TypeContext<'c, 'a>,
    unit: &'v UnitContext,
    options: &'v CheckerOptions,
    sink: &'v mut DiagnosticSink,
    flow: Option<&'v AnalysisResult>,
}

impl<'v, 'c, 'a> VisitContext<'v, 'c, 'a> {
    pub fn types(&self) -> &TypeContext<'c, 'a> {
        self.types
    }

    pub fn factory(&self) -> &'c AnnotatedTypeFactory<'a> {
        self.types.factory()
    }

    pub fn hierarchy(&self) -> &'a dyn QualifierHierarchy {
        self.types.hierarchy()
    }

    pub fn classes(&self) -> &'a ClassTable {
        self.types.classes()
    }

    pub fn unit(&self) -> &UnitContext {
        self.unit
    }

    pub fn options(&self) -> &CheckerOptions {
        self.options
    }

    /// Store in effect just before `id` executes, if the method was analyzed
    pub fn store_before(&self, id: NodeId) -> Option<&Store> {
        self.flow?.store_before(id)
    }

    pub fn report(&mut self, kind: DiagnosticKind, key: &str, span: Span, message: impl Into<String>) {
        self.sink.report(kind, key, span, message);
    }

    pub fn error(&mut self, key: &str, span: Span, message: impl Into<String>) {
        self.sink.error(key, span, message);
    }

    pub fn warning(&mut self, key: &str, span: Span, message: impl Into<String>) {
        self.sink.warning(key, span, message);
    }
}

/// Type-system specific checks. Each hook reports through the context.
pub trait ConsistencyRules {
    /// Check the qualifiers written on (or defaulted onto) one type use. Returning false
    /// skips the remaining checks of that position.
    fn is_valid_use(&self, _cx: &mut VisitContext<'_, '_, '_>, _ty: &AnnotatedType, _span: Span) -> bool {
        true
    }

    /// Condition of `if`, `while`, `for` or `?:`
    fn check_condition(&self, _cx: &mut VisitContext<'_, '_, '_>, _cond: &HirExpr) {}

    fn check_array_access(&self, _cx: &mut VisitContext<'_, '_, '_>, _access: &HirExpr) {}

    fn check_array_store(&self, _cx: &mut VisitContext<'_, '_, '_>, _target: &HirExpr, _value: &HirExpr) {}

    fn check_call(&self, _cx: &mut VisitContext<'_, '_, '_>, _call: &HirExpr) {}

    fn check_field(&self, _cx: &mut VisitContext<'_, '_, '_>, _class: &HirClass, _field: &HirField) {}

    fn check_loop(&self, _cx: &mut VisitContext<'_, '_, '_>, _stmt: &HirStmt) {}

    /// `exit` is the store at the end of the method, `None` if the end is unreachable
    fn check_method_exit(&self, _cx: &mut VisitContext<'_, '_, '_>, _method: &HirMethod, _exit: Option<&Store>) {}
}

fn no_flow(_: &HirExpr) -> Option<Qualifier> {
    None
}

/// Checks one unit against one type system
pub struct BaseTypeVisitor<'v, 'a> {
    factory: &'v AnnotatedTypeFactory<'a>,
    unit: &'v UnitContext,
    options: &'v CheckerOptions,
    sink: DiagnosticSink,
    inference: Option<&'v mut InferenceStorage>,
}

impl<'v, 'a> BaseTypeVisitor<'v, 'a> {
    pub fn new(
        factory: &'v AnnotatedTypeFactory<'a>,
        unit: &'v UnitContext,
        options: &'v CheckerOptions,
        inference: Option<&'v mut InferenceStorage>,
    ) -> Self {
        let sink = DiagnosticSink::new(&factory.module().file, factory.system_name()).with_suppressed(&options.suppress);
        Self {
            factory,
            unit,
            options,
            sink,
            inference,
        }
    }

    pub fn visit_module(mut self, module: &HirModule) -> Vec<Diagnostic> {
        for class in &module.classes {
            self.visit_class(class);
        }
        self.sink.finish()
    }

    fn visit_class(&mut self, class: &HirClass) {
        self.sink.push_scope(&class.annotations);
        for field in &class.fields {
            self.visit_field(class, field);
        }
        for method in &class.methods {
            self.visit_method(class, method);
        }
        self.sink.pop_scope();
    }

    fn visit_field(&mut self, class: &HirClass, field: &HirField) {
        self.sink.push_scope(&field.annotations);
        let ctx = MethodContext::for_class(class);
        let tcx = TypeContext::new(self.factory, &ctx, &no_flow);
        let declared = self.factory.field_type(class, field);
        let mut walker = MethodWalker {
            tcx: &tcx,
            unit: self.unit,
            options: self.options,
            sink: &mut self.sink,
            inference: self.inference.as_deref_mut(),
            flow: None,
            method_type: None,
            sig: None,
        };
        walker.validate(&declared, field.span);
        let rules = self.factory.rules();
        rules.check_field(&mut walker.cx(), class, field);
        if let Some(init) = &field.init {
            walker.walk_expr(init);
            walker.check_assignment(init, &declared, field.span);
            if field.ty.primary(self.factory.hierarchy()).is_none() {
                walker.infer(InferenceSite::field(&class.name, &field.name), init);
            }
        }
        self.sink.pop_scope();
    }

    fn visit_method(&mut self, class: &HirClass, method: &HirMethod) {
        self.sink.push_scope(&method.annotations);
        let ctx = MethodContext::new(class, method);
        let sig = method.signature(&class.name);
        let mt = self.factory.method_type(class, method);
        let flow = self.factory.flow_result(&sig);
        let oracle = |e: &HirExpr| flow.and_then(|f| f.value(e.id).cloned());
        let tcx = TypeContext::new(self.factory, &ctx, &oracle);

        let mut walker = MethodWalker {
            tcx: &tcx,
            unit: self.unit,
            options: self.options,
            sink: &mut self.sink,
            inference: self.inference.as_deref_mut(),
            flow,
            method_type: Some(&mt),
            sig: Some(sig.clone()),
        };
        if let Some(receiver) = &mt.receiver {
            walker.validate(receiver, method.span);
        }
        for param in &mt.params {
            walker.validate(param, method.span);
        }
        if !matches!(mt.ret.kind, TypeKind::Void) {
            walker.validate(&mt.ret, method.span);
        }
        walker.check_overrides(class, method, &mt);

        if let Some(body) = &method.body {
            trace!(method = %sig, "visiting");
            walker.walk_stmts(body);
            let exit = flow.and_then(|f| f.exit_store.as_ref());
            let rules = self.factory.rules();
            rules.check_method_exit(&mut walker.cx(), method, exit);
        }
        self.sink.pop_scope();
    }
}

/// Walks the statements of one method (or the initializers of one class)
struct MethodWalker<'w, 'c, 'a> {
    tcx: &'w TypeContext<'c, 'a>,
    unit: &'w UnitContext,
    options: &'w CheckerOptions,
    sink: &'w mut DiagnosticSink,
    inference: Option<&'w mut InferenceStorage>,
    flow: Option<&'w AnalysisResult>,
    method_type: Option<&'w MethodType>,
    sig: Option<MethodSig>,
}

impl<'w, 'c, 'a> MethodWalker<'w, 'c, 'a> {
    fn cx(&mut self) -> VisitContext<'_, 'c, 'a> {
        VisitContext {
            types: self.tcx,
            unit: self.unit,
            options: self.options,
            sink: &mut *self.sink,
            flow: self.flow,
        }
    }

    fn factory(&self) -> &'c AnnotatedTypeFactory<'a> {
        self.tcx.factory()
    }

    fn hierarchy(&self) -> &'a dyn QualifierHierarchy {
        self.tcx.hierarchy()
    }

    /// Well-formedness of one type use: one qualifier per hierarchy per position, the
    /// system's own validity rules, and parseable dependent expressions
    fn validate(&mut self, ty: &AnnotatedType, span: Span) {
        let h = self.hierarchy();
        let mut positions: Vec<Vec<Qualifier>> = Vec::new();
        ty.clone()
            .for_each_mut(&mut |t| positions.push(t.annotations.iter().filter(|q| h.owns(q)).cloned().collect()));

        for owned in &positions {
            if owned.len() > 1 {
                let names: Vec<String> = owned.iter().map(ToString::to_string).collect();
                self.sink.error("type.invalid", span, format!("multiple annotations found: {}", names.join(" ")));
                return;
            }
        }
        let rules = self.factory().rules();
        if !rules.is_valid_use(&mut self.cx(), ty, span) {
            return;
        }
        for q in positions.iter().flatten() {
            for err in DependentTypesHelper::errors(q) {
                self.sink.error("expression.unparsable.type.invalid", span, err.to_string());
            }
        }
    }

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool {
        self.hierarchy().is_subtype(sub, sup)
    }

    /// `assignment.type.incompatible` unless `value` fits `declared`
    fn check_assignment(&mut self, value: &HirExpr, declared: &AnnotatedType, span: Span) {
        self.check_compatible(value, declared, span, "assignment.type.incompatible");
    }

    fn check_compatible(&mut self, value: &HirExpr, declared: &AnnotatedType, span: Span, key: &str) {
        let h = self.hierarchy();
        let found = self.tcx.type_of(value);
        if !self.is_subtype(&found.qualifier(h), &declared.qualifier(h)) {
            let message = format!(
                "found: {}, required: {}",
                found.restricted_to(h),
                declared.restricted_to(h)
            );
            self.sink.error(key, span, message);
        }
    }

    /// Record an observation for whole-program inference
    fn infer(&mut self, site: InferenceSite, value: &HirExpr) {
        let system = self.factory().system_name();
        if !self.options.wpi_enabled_for(system) {
            return;
        }
        if value.skip_casts().is_null_literal() && self.options.ignore_null_assignments {
            return;
        }
        let q = self.tcx.qualifier_of(value);
        let h = self.hierarchy();
        if let Some(storage) = self.inference.as_deref_mut() {
            storage.record(site, system, q, h);
        }
    }

    fn check_overrides(&mut self, class: &HirClass, method: &HirMethod, mt: &MethodType) {
        let factory = self.factory();
        let h = self.hierarchy();
        let sig = method.signature(&class.name);
        for sup_name in &class.supertypes {
            let Some(sup) = factory.module().class(sup_name) else {
                continue;
            };
            let Some(overridden) = sup
                .methods
                .iter()
                .find(|m| !m.is_static && m.name == method.name && m.signature(&sup.name).params == sig.params)
            else {
                continue;
            };
            let sup_mt = factory.method_type(sup, overridden);
            let ret = mt.ret.qualifier(h);
            let sup_ret = sup_mt.ret.qualifier(h);
            if !matches!(mt.ret.kind, TypeKind::Void) && !h.is_subtype(&ret, &sup_ret) {
                self.sink.error(
                    "override.return.invalid",
                    method.span,
                    format!("{} in {} cannot override {} in {}: found {}, required {}", method.name, class.name, overridden.name, sup.name, ret, sup_ret),
                );
            }
            for ((param, ty), sup_ty) in method.params.iter().zip(&mt.params).zip(&sup_mt.params) {
                let mine = ty.qualifier(h);
                let theirs = sup_ty.qualifier(h);
                if !h.is_subtype(&theirs, &mine) {
                    self.sink.error(
                        "override.param.invalid",
                        method.span,
                        format!("parameter {}: found {}, required {}", param.name, mine, theirs),
                    );
                }
            }
        }
    }

    fn walk_stmts(&mut self, stmts: &[HirStmt]) {
        for stmt in stmts {
            self.walk_stmt(stmt);
        }
    }

    fn walk_stmt(&mut self, stmt: &HirStmt) {
        let rules = self.factory().rules();
        match &stmt.kind {
            StmtKind::Local { name, ty, init } => {
                let declared = self.factory().declare(ty, TypeUseLocation::Local, self.tcx.method().dependent());
                self.validate(&declared, stmt.span);
                if let Some(init) = init {
                    self.walk_expr(init);
                    let declared = self.factory().variable_type(self.tcx.method(), name);
                    self.check_assignment(init, &declared, stmt.span);
                }
            }
            StmtKind::Assign { target, value } => {
                self.walk_target(target);
                self.walk_expr(value);
                let declared = self.factory().type_in(self.tcx, target);
                self.check_assignment(value, &declared, stmt.span);
                if matches!(target.kind, ExprKind::ArrayAccess { .. }) {
                    rules.check_array_store(&mut self.cx(), target, value);
                }
                if let Some(site) = self.field_site(target) {
                    self.infer(site, value);
                }
            }
            StmtKind::Expr(expr) => self.walk_expr(expr),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => {
                self.walk_expr(cond);
                rules.check_condition(&mut self.cx(), cond);
                self.walk_stmts(then_body);
                if let Some(else_body) = else_body {
                    self.walk_stmts(else_body);
                }
            }
            StmtKind::While { cond, body } => {
                self.walk_expr(cond);
                rules.check_condition(&mut self.cx(), cond);
                self.walk_stmts(body);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                rules.check_loop(&mut self.cx(), stmt);
                self.walk_stmts(init);
                if let Some(cond) = cond {
                    self.walk_expr(cond);
                    rules.check_condition(&mut self.cx(), cond);
                }
                self.walk_stmts(update);
                self.walk_stmts(body);
            }
            StmtKind::Return(Some(value)) => {
                self.walk_expr(value);
                if let Some(mt) = self.method_type {
                    self.check_compatible(value, &mt.ret, stmt.span, "return.type.incompatible");
                }
                let unwritten = self
                    .tcx
                    .method()
                    .method()
                    .is_some_and(|m| m.ret_type.primary(self.hierarchy()).is_none());
                if let (true, Some(sig)) = (unwritten, self.sig.clone()) {
                    self.infer(InferenceSite::ret(&sig), value);
                }
            }
            StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Block(stmts) => self.walk_stmts(stmts),
        }
    }

    /// Inference site of an assignment to an unannotated field declared in this unit
    fn field_site(&self, target: &HirExpr) -> Option<InferenceSite> {
        let ExprKind::Field { receiver, name } = &target.kind else {
            return None;
        };
        let receiver_ty = self.factory().type_in(self.tcx, receiver);
        let class = self.factory().module().class(receiver_ty.class_name()?)?;
        let field = class.field(name)?;
        field
            .ty
            .primary(self.hierarchy())
            .is_none()
            .then(|| InferenceSite::field(&class.name, &field.name))
    }

    fn walk_target(&mut self, target: &HirExpr) {
        match &target.kind {
            ExprKind::Field { receiver, .. } => self.walk_expr(receiver),
            ExprKind::ArrayAccess { array, index } => {
                self.walk_expr(array);
                self.walk_expr(index);
                let rules = self.factory().rules();
                rules.check_array_access(&mut self.cx(), target);
            }
            _ => {}
        }
    }

    fn walk_expr(&mut self, expr: &HirExpr) {
        let rules = self.factory().rules();
        let h = self.hierarchy();
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::This => {}
            ExprKind::Field { receiver, .. } | ExprKind::ArrayLength(receiver) => self.walk_expr(receiver),
            ExprKind::ArrayAccess { array, index } => {
                self.walk_expr(array);
                self.walk_expr(index);
                rules.check_array_access(&mut self.cx(), expr);
            }
            ExprKind::Binary { left, right, .. } => {
                self.walk_expr(left);
                self.walk_expr(right);
            }
            ExprKind::Unary { operand, .. } => self.walk_expr(operand),
            ExprKind::Call {
                receiver,
                method,
                args,
                ..
            } => {
                if let Some(receiver) = receiver {
                    self.walk_expr(receiver);
                }
                args.iter().for_each(|a| self.walk_expr(a));
                self.check_invocation(expr, receiver.as_deref(), method, args);
                rules.check_call(&mut self.cx(), expr);
            }
            ExprKind::New { ty, args } => {
                args.iter().for_each(|a| self.walk_expr(a));
                let declared = self.factory().declare(ty, TypeUseLocation::NewObject, self.tcx.method().dependent());
                self.validate(&declared, expr.span);
            }
            ExprKind::NewArray { ty, length, elements } => {
                if let Some(length) = length {
                    self.walk_expr(length);
                }
                elements.iter().for_each(|e| self.walk_expr(e));
                let declared = self.factory().declare(ty, TypeUseLocation::NewObject, self.tcx.method().dependent());
                self.validate(&declared, expr.span);
            }
            ExprKind::Cast { ty, expr: inner } => {
                self.walk_expr(inner);
                if let Some(target) = ty.primary(h) {
                    let found = self.tcx.qualifier_of(inner);
                    if !h.is_subtype(&found, target) {
                        self.sink
                            .warning("cast.unsafe", expr.span, format!("{} may not be {}", found, target));
                    }
                }
            }
            ExprKind::InstanceOf { expr: inner, ty } => {
                self.walk_expr(inner);
                if let Some(tested) = ty.primary(h) {
                    let found = self.tcx.qualifier_of(inner);
                    if !h.is_subtype(&found, tested) {
                        self.sink.warning(
                            "instanceof.unsafe",
                            expr.span,
                            format!("{} cannot be tested for {} at run time", found, tested),
                        );
                    }
                }
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                self.walk_expr(cond);
                rules.check_condition(&mut self.cx(), cond);
                self.walk_expr(then_expr);
                self.walk_expr(else_expr);
            }
        }
    }

    /// Receiver and argument compatibility of one call, plus inference of the callee's
    /// parameters when it is declared in this unit
    fn check_invocation(&mut self, call: &HirExpr, receiver: Option<&HirExpr>, sig: &MethodSig, args: &[HirExpr]) {
        let h = self.hierarchy();
        let Some(mt) = self.factory().resolved_call(self.tcx, call) else {
            return;
        };
        if let (Some(receiver), Some(formal)) = (receiver, &mt.receiver) {
            let actual = self.tcx.qualifier_of(receiver);
            let required = formal.qualifier(h);
            if !h.is_subtype(&actual, &required) {
                self.sink.error(
                    "method.invocation.invalid",
                    call.span,
                    format!("call to {} not allowed on receiver: found {}, required {}", sig.name, actual, required),
                );
            }
        }
        for (i, arg) in args.iter().enumerate() {
            let arg_ty = self.tcx.type_of(arg);
            let Some(formal) = mt.formal_for_arg(i, args.len(), &arg_ty) else {
                continue;
            };
            self.check_compatible(arg, formal, arg.span, "argument.type.incompatible");
        }

        let Some((_, callee)) = self.factory().module().method(sig) else {
            return;
        };
        for (param, arg) in callee.params.iter().zip(args) {
            if param.ty.primary(h).is_none() {
                self.infer(InferenceSite::param(sig, &param.name), arg);
            }
        }
    }
}
