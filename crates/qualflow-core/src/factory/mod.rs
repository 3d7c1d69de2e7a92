//! Annotated type factory
//!
//! Computes the annotated type of every declaration and expression for one type system:
//! written qualifiers first, then whole-program inference seeds, then defaults, then
//! the system's tree annotator. Expression types can be refined further by flow values,
//! which callers pass in through a [`TypeContext`].

mod context;
mod defaults;
mod poly;

pub use context::{MethodContext, Operand, TypeContext};
pub use defaults::{apply_defaults, DefaultingPolicy, TypeUseLocation};

use crate::checker::{TypeRules, TypeSystem};
use crate::dataflow::AnalysisResult;
use crate::dependent::{DependentContext, DependentTypesHelper};
use crate::hierarchy::QualifierHierarchy;
use crate::hir::{BinOp, ExprKind, HirClass, HirExpr, HirField, HirMethod, HirModule, Literal, MethodSig, NodeId, UnaryOp};
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable, PrimitiveKind};
use crate::wpi::{InferenceSite, InferenceStorage};
use std::collections::HashMap;
use std::rc::Rc;

/// Declared type of a method after defaulting
#[derive(Debug, Clone, PartialEq)]
pub struct MethodType {
    pub receiver: Option<AnnotatedType>,
    pub params: Vec<AnnotatedType>,
    pub ret: AnnotatedType,
    /// True if the return type had no written qualifier of this hierarchy
    pub defaulted_return: bool,
}

impl MethodType {
    /// Formal parameter matching argument `index`, expanding a trailing varargs array
    pub fn formal_for_arg(&self, index: usize, arg_count: usize, arg: &AnnotatedType) -> Option<&AnnotatedType> {
        let last = self.params.len().checked_sub(1)?;
        if index < last {
            return self.params.get(index);
        }
        let varargs = &self.params[last];
        match varargs.component() {
            Some(component) if arg_count != self.params.len() || !(arg.is_array() || arg.is_null()) => {
                Some(component)
            }
            _ if index == last => Some(varargs),
            _ => None,
        }
    }
}

/// Flow values one type system computed, made available to the systems that run after it
#[derive(Debug, Clone, Default)]
pub struct SubcheckerFacts {
    pub system: String,
    pub values: HashMap<NodeId, Qualifier>,
}

pub struct AnnotatedTypeFactory<'a> {
    system: &'a TypeSystem,
    module: &'a HirModule,
    classes: &'a ClassTable,
    dependent: DependentTypesHelper,
    upstream: Vec<Rc<SubcheckerFacts>>,
    seed: Option<&'a InferenceStorage>,
    flow: HashMap<MethodSig, AnalysisResult>,
}

impl<'a> AnnotatedTypeFactory<'a> {
    pub fn new(system: &'a TypeSystem, module: &'a HirModule, classes: &'a ClassTable) -> Self {
        Self {
            system,
            module,
            classes,
            dependent: DependentTypesHelper::for_classes(&module.classes),
            upstream: Vec::new(),
            seed: None,
            flow: HashMap::new(),
        }
    }

    /// Facts of type systems that already ran on this unit
    pub fn with_upstream(mut self, upstream: Vec<Rc<SubcheckerFacts>>) -> Self {
        self.upstream = upstream;
        self
    }

    /// Qualifiers inferred by a previous whole-program inference round
    pub fn with_seed(mut self, seed: Option<&'a InferenceStorage>) -> Self {
        self.seed = seed;
        self
    }

    pub fn system_name(&self) -> &'a str {
        self.system.name()
    }

    pub fn hierarchy(&self) -> &'a dyn QualifierHierarchy {
        self.system.hierarchy()
    }

    pub fn rules(&self) -> &'a dyn TypeRules {
        self.system.rules()
    }

    pub fn module(&self) -> &'a HirModule {
        self.module
    }

    pub fn classes(&self) -> &'a ClassTable {
        self.classes
    }

    pub fn dependent_helper(&self) -> &DependentTypesHelper {
        &self.dependent
    }

    pub fn upstream(&self, system: &str) -> Option<&SubcheckerFacts> {
        self.upstream.iter().find(|f| f.system == system).map(Rc::as_ref)
    }

    /// A single integer constant any upstream system proved for `expr`
    pub fn upstream_constant(&self, expr: &HirExpr) -> Option<i64> {
        self.upstream.iter().find_map(|facts| match facts.values.get(&expr.id)?.ints() {
            [v] => Some(*v),
            _ => None,
        })
    }

    pub fn record_flow(&mut self, sig: MethodSig, result: AnalysisResult) {
        self.flow.insert(sig, result);
    }

    pub fn flow_result(&self, sig: &MethodSig) -> Option<&AnalysisResult> {
        self.flow.get(sig)
    }

    /// Every flow value computed by this system, for downstream systems
    pub fn facts(&self) -> SubcheckerFacts {
        let mut values = HashMap::new();
        for result in self.flow.values() {
            values.extend(result.node_values.iter().map(|(k, v)| (*k, v.clone())));
        }
        SubcheckerFacts {
            system: self.system_name().to_string(),
            values,
        }
    }

    /// Written type with dependent expressions standardized and defaults applied
    pub fn declare(&self, written: &AnnotatedType, location: TypeUseLocation, cx: &DependentContext) -> AnnotatedType {
        let mut ty = written.clone();
        self.standardize_dependent(&mut ty, cx);
        apply_defaults(&mut ty, location, self.hierarchy(), self.classes, self.rules());
        ty
    }

    fn declare_seeded(
        &self,
        written: &AnnotatedType,
        location: TypeUseLocation,
        cx: &DependentContext,
        site: InferenceSite,
    ) -> AnnotatedType {
        let h = self.hierarchy();
        let mut ty = written.clone();
        if ty.primary(h).is_none() {
            if let Some(q) = self.seed.and_then(|s| s.lookup(&site, self.system_name())) {
                ty.annotations.push(q.clone());
            }
        }
        self.declare(&ty, location, cx)
    }

    fn defaulted(&self, ty: AnnotatedType, location: TypeUseLocation) -> AnnotatedType {
        self.declare(&ty, location, &DependentContext::default())
    }

    fn standardize_dependent(&self, ty: &mut AnnotatedType, cx: &DependentContext) {
        let names = self.rules().dependent_qualifiers();
        if names.is_empty() {
            return;
        }
        let helper = &self.dependent;
        ty.for_each_mut(&mut |t| {
            for q in t.annotations.iter_mut() {
                if names.iter().any(|n| *n == q.name()) {
                    *q = helper.standardize_qualifier(q, cx);
                }
            }
        });
    }

    pub fn field_type(&self, class: &HirClass, field: &HirField) -> AnnotatedType {
        self.declare_seeded(
            &field.ty,
            TypeUseLocation::Field,
            &DependentContext::for_class(class),
            InferenceSite::field(&class.name, &field.name),
        )
    }

    pub fn method_type(&self, class: &HirClass, method: &HirMethod) -> MethodType {
        let h = self.hierarchy();
        let cx = DependentContext::for_method(class, method);
        let sig = method.signature(&class.name);
        let receiver = (!method.is_static).then(|| {
            let written = method
                .receiver
                .clone()
                .unwrap_or_else(|| AnnotatedType::declared(&class.name, Vec::new()));
            self.declare(&written, TypeUseLocation::Receiver, &cx)
        });
        let params = method
            .params
            .iter()
            .map(|p| {
                self.declare_seeded(&p.ty, TypeUseLocation::Parameter, &cx, InferenceSite::param(&sig, &p.name))
            })
            .collect();
        let mut mt = MethodType {
            receiver,
            params,
            ret: self.declare_seeded(&method.ret_type, TypeUseLocation::Return, &cx, InferenceSite::ret(&sig)),
            defaulted_return: method.ret_type.primary(h).is_none(),
        };
        self.rules().adjust_method_type(h, &mut mt);
        mt
    }

    /// Type of a method outside the unit, reconstructed from its erased signature
    pub fn library_method_type(&self, sig: &MethodSig, ret: &AnnotatedType, is_static: bool) -> MethodType {
        let h = self.hierarchy();
        let receiver = (!is_static).then(|| {
            self.defaulted(AnnotatedType::declared(&sig.owner, Vec::new()), TypeUseLocation::Receiver)
        });
        let params = sig
            .params
            .iter()
            .map(|p| self.defaulted(AnnotatedType::from_erased(p), TypeUseLocation::Parameter))
            .collect();
        let mut mt = MethodType {
            receiver,
            params,
            ret: self.defaulted(ret.clone(), TypeUseLocation::Return),
            defaulted_return: ret.primary(h).is_none(),
        };
        self.rules().adjust_method_type(h, &mut mt);
        mt
    }

    pub fn receiver_type(&self, ctx: &MethodContext<'_>) -> AnnotatedType {
        match ctx.method() {
            Some(method) => match self.method_type(ctx.class(), method).receiver {
                Some(receiver) => receiver,
                None => self.defaulted(AnnotatedType::declared(&ctx.class().name, Vec::new()), TypeUseLocation::Receiver),
            },
            None => self.defaulted(AnnotatedType::declared(&ctx.class().name, Vec::new()), TypeUseLocation::Receiver),
        }
    }

    /// Declared type of a local or parameter visible in `ctx`
    pub fn variable_type(&self, ctx: &MethodContext<'_>, name: &str) -> AnnotatedType {
        if let Some(written) = ctx.local(name) {
            return self.declare(written, TypeUseLocation::Local, ctx.dependent());
        }
        if let (Some((index, _)), Some(method)) = (ctx.param(name), ctx.method()) {
            if let Some(ty) = self.method_type(ctx.class(), method).params.into_iter().nth(index) {
                return ty;
            }
        }
        AnnotatedType::object().with(self.hierarchy().top().clone())
    }

    /// True if `call` cannot write to the heap
    pub fn is_side_effect_free(&self, call: &HirExpr) -> bool {
        let ExprKind::Call { method, .. } = &call.kind else {
            return true;
        };
        if let Some((_, decl)) = self.module.method(method) {
            return decl.has_annotation("Pure") || decl.has_annotation("SideEffectFree");
        }
        let immutable_owner = method.owner == "java.lang.String"
            || (self.classes.is_subclass(&method.owner, "java.lang.Number") && method.owner.starts_with("java.lang."));
        immutable_owner || matches!(method.name.as_str(), "equals" | "hashCode" | "toString" | "length" | "size")
    }

    /// Annotated type of `expr` without its own flow refinement. Subexpressions are
    /// looked up through `tcx`, so their refined values do participate.
    pub fn type_in(&self, tcx: &TypeContext<'_, 'a>, expr: &HirExpr) -> AnnotatedType {
        let h = self.hierarchy();
        let mut ty = match &expr.kind {
            ExprKind::Literal(lit) => self.literal_type(lit),
            ExprKind::Var(name) => self.variable_type(tcx.method(), name),
            ExprKind::This => self.receiver_type(tcx.method()),
            ExprKind::Field { receiver, name } => self.field_access_type(tcx, receiver, name),
            ExprKind::ArrayAccess { array, .. } => match tcx.type_of(array).component() {
                Some(component) => component.clone(),
                None => AnnotatedType::object().with(h.top().clone()),
            },
            ExprKind::ArrayLength(_) => {
                self.defaulted(AnnotatedType::primitive(PrimitiveKind::Int), TypeUseLocation::Other)
            }
            ExprKind::Binary { op, left, right } => self.binary_type(tcx, *op, left, right),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } if operand.int_literal().is_some() => match expr.int_literal() {
                Some(v) => self.literal_type(&Literal::Int(v)),
                None => tcx.type_of(operand),
            },
            ExprKind::Unary { operand, .. } => tcx.type_of(operand),
            ExprKind::Call { ret_type, .. } => match self.resolved_call(tcx, expr) {
                Some(mt) => mt.ret,
                None => self.defaulted(ret_type.clone(), TypeUseLocation::Return),
            },
            ExprKind::New { ty, .. } | ExprKind::NewArray { ty, .. } => {
                self.declare(ty, TypeUseLocation::NewObject, tcx.method().dependent())
            }
            ExprKind::Cast { ty, expr: inner } => {
                let mut cast = self.declare(ty, TypeUseLocation::Other, tcx.method().dependent());
                if ty.primary(h).is_none() {
                    cast.replace_annotation(tcx.qualifier_of(inner), h);
                }
                cast
            }
            ExprKind::InstanceOf { .. } => {
                self.defaulted(AnnotatedType::primitive(PrimitiveKind::Boolean), TypeUseLocation::Other)
            }
            ExprKind::Conditional {
                then_expr,
                else_expr,
                ..
            } => {
                let mut ty = tcx.type_of(then_expr);
                let lub = h.least_upper_bound(&ty.qualifier(h), &tcx.qualifier_of(else_expr));
                ty.replace_annotation(lub, h);
                ty
            }
        };
        self.rules().annotate_expr(tcx, expr, &mut ty);
        ty
    }

    pub fn literal_type(&self, lit: &Literal) -> AnnotatedType {
        let h = self.hierarchy();
        let ty = match lit {
            Literal::Int(_) => AnnotatedType::primitive(PrimitiveKind::Int),
            Literal::Float(_) => AnnotatedType::primitive(PrimitiveKind::Double),
            Literal::Bool(_) => AnnotatedType::primitive(PrimitiveKind::Boolean),
            Literal::Char(_) => AnnotatedType::primitive(PrimitiveKind::Char),
            Literal::Str(_) => AnnotatedType::string(),
            Literal::Null => AnnotatedType::null(),
        };
        let q = match self.rules().literal_qualifier(h, lit) {
            Some(q) => q,
            None if matches!(lit, Literal::Null) => h.bottom().clone(),
            None => self.rules().default_qualifier(h, self.classes, TypeUseLocation::Other, &ty),
        };
        ty.with(q)
    }

    fn field_access_type(&self, tcx: &TypeContext<'_, 'a>, receiver: &HirExpr, name: &str) -> AnnotatedType {
        let h = self.hierarchy();
        let receiver_ty = tcx.type_of(receiver);
        let declared = receiver_ty
            .class_name()
            .and_then(|owner| self.module.class(owner))
            .and_then(|class| Some((class, class.field(name)?)));
        let mut ty = match declared {
            Some((class, field)) => self.field_type(class, field),
            None => self.defaulted(AnnotatedType::object(), TypeUseLocation::Field),
        };
        self.viewpoint_adapt(&mut ty, &receiver_ty.qualifier(h));
        ty
    }

    fn binary_type(&self, tcx: &TypeContext<'_, 'a>, op: BinOp, left: &HirExpr, right: &HirExpr) -> AnnotatedType {
        let h = self.hierarchy();
        let boolean = op.is_relational() || op.is_equality() || matches!(op, BinOp::And | BinOp::Or);
        let left_ty = tcx.type_of(left);
        let mut ty = if boolean {
            AnnotatedType::primitive(PrimitiveKind::Boolean)
        } else if op == BinOp::Add && (is_string(&left_ty) || is_string(&tcx.type_of(right))) {
            AnnotatedType::string()
        } else {
            left_ty
        };
        let q = match self.rules().binary(tcx, op, &tcx.operand(left), &tcx.operand(right)) {
            Some(q) => q,
            None if boolean => self.rules().default_qualifier(h, self.classes, TypeUseLocation::Other, &ty),
            None => h.top().clone(),
        };
        ty.replace_annotation(q, h);
        ty
    }
}

fn is_string(ty: &AnnotatedType) -> bool {
    ty.class_name() == Some("java.lang.String")
}
