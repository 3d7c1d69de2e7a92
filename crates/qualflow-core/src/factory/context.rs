//! Scopes and typing contexts handed to type-system rules

use super::AnnotatedTypeFactory;
use crate::dependent::DependentContext;
use crate::hierarchy::QualifierHierarchy;
use crate::hir::{HirClass, HirExpr, HirMethod, HirParam, HirStmt, MethodSig, StmtKind};
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable};
use std::collections::HashMap;

/// The class and (optionally) method whose code is being typed
#[derive(Debug, Clone)]
pub struct MethodContext<'a> {
    class: &'a HirClass,
    method: Option<&'a HirMethod>,
    locals: HashMap<String, &'a AnnotatedType>,
    dependent: DependentContext,
}

impl<'a> MethodContext<'a> {
    pub fn new(class: &'a HirClass, method: &'a HirMethod) -> Self {
        let mut locals = HashMap::new();
        if let Some(body) = &method.body {
            collect_locals(body, &mut locals);
        }
        let mut dependent = DependentContext::for_method(class, method);
        dependent.locals = locals.keys().cloned().collect();
        Self {
            class,
            method: Some(method),
            locals,
            dependent,
        }
    }

    /// Context for field initializers
    pub fn for_class(class: &'a HirClass) -> Self {
        Self {
            class,
            method: None,
            locals: HashMap::new(),
            dependent: DependentContext::for_class(class),
        }
    }

    pub fn class(&self) -> &'a HirClass {
        self.class
    }

    pub fn method(&self) -> Option<&'a HirMethod> {
        self.method
    }

    pub fn signature(&self) -> Option<MethodSig> {
        self.method.map(|m| m.signature(&self.class.name))
    }

    pub fn is_static(&self) -> bool {
        self.method.is_some_and(|m| m.is_static)
    }

    /// Written type of a local declared anywhere in the body
    pub fn local(&self, name: &str) -> Option<&'a AnnotatedType> {
        self.locals.get(name).copied()
    }

    pub fn param(&self, name: &str) -> Option<(usize, &'a HirParam)> {
        self.method?.params.iter().enumerate().find(|(_, p)| p.name == name)
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.locals.contains_key(name)
    }

    pub fn dependent(&self) -> &DependentContext {
        &self.dependent
    }
}

fn collect_locals<'a>(stmts: &'a [HirStmt], out: &mut HashMap<String, &'a AnnotatedType>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Local { name, ty, .. } => {
                out.entry(name.clone()).or_insert(ty);
            }
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                collect_locals(then_body, out);
                if let Some(else_body) = else_body {
                    collect_locals(else_body, out);
                }
            }
            StmtKind::While { body, .. } | StmtKind::Block(body) => collect_locals(body, out),
            StmtKind::For {
                init, update, body, ..
            } => {
                collect_locals(init, out);
                collect_locals(update, out);
                collect_locals(body, out);
            }
            _ => {}
        }
    }
}

/// One operand of a binary operation or comparison
#[derive(Debug, Clone)]
pub struct Operand<'e> {
    /// `None` for operands that do not appear in the tree, such as the `1` of `i++`
    pub expr: Option<&'e HirExpr>,
    pub qualifier: Qualifier,
    /// Known integer value, from a literal or an upstream constant-value system
    pub constant: Option<i64>,
}

impl<'e> Operand<'e> {
    pub fn synthetic(qualifier: Qualifier, constant: Option<i64>) -> Self {
        Self {
            expr: None,
            qualifier,
            constant,
        }
    }
}

type Oracle<'c> = &'c dyn Fn(&HirExpr) -> Option<Qualifier>;

/// Typing context: the factory, the enclosing method, and where refined values of
/// already-evaluated subexpressions come from
pub struct TypeContext<'c, 'a> {
    factory: &'c AnnotatedTypeFactory<'a>,
    method: &'c MethodContext<'a>,
    oracle: Oracle<'c>,
}

impl<'c, 'a> TypeContext<'c, 'a> {
    pub fn new(factory: &'c AnnotatedTypeFactory<'a>, method: &'c MethodContext<'a>, oracle: Oracle<'c>) -> Self {
        Self {
            factory,
            method,
            oracle,
        }
    }

    pub fn factory(&self) -> &'c AnnotatedTypeFactory<'a> {
        self.factory
    }

    pub fn method(&self) -> &'c MethodContext<'a> {
        self.method
    }

    pub fn hierarchy(&self) -> &'a dyn QualifierHierarchy {
        self.factory.hierarchy()
    }

    pub fn classes(&self) -> &'a ClassTable {
        self.factory.classes()
    }

    /// Refined value of a subexpression, if the analysis has one
    pub fn flow_value(&self, expr: &HirExpr) -> Option<Qualifier> {
        (self.oracle)(expr)
    }

    /// Type of `expr` with its primary qualifier refined by flow
    pub fn type_of(&self, expr: &HirExpr) -> AnnotatedType {
        let mut ty = self.factory.type_in(self, expr);
        if let Some(q) = self.flow_value(expr) {
            ty.replace_annotation(q, self.hierarchy());
        }
        ty
    }

    pub fn qualifier_of(&self, expr: &HirExpr) -> Qualifier {
        match self.flow_value(expr) {
            Some(q) => q,
            None => self.factory.type_in(self, expr).qualifier(self.hierarchy()),
        }
    }

    /// Value an upstream type system computed for `expr`
    pub fn subchecker_value(&self, system: &str, expr: &HirExpr) -> Option<&'c Qualifier> {
        self.factory.upstream(system)?.values.get(&expr.id)
    }

    /// Integer value of `expr`: a literal, or a single constant from an upstream system
    pub fn constant(&self, expr: &HirExpr) -> Option<i64> {
        expr.int_literal().or_else(|| self.factory.upstream_constant(expr))
    }

    pub fn operand<'e>(&self, expr: &'e HirExpr) -> Operand<'e> {
        Operand {
            expr: Some(expr),
            qualifier: self.qualifier_of(expr),
            constant: self.constant(expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirBuilder;
    use crate::types::PrimitiveKind;

    #[test]
    fn test_locals_collected_from_nested_blocks() {
        let b = HirBuilder::new();
        let int = AnnotatedType::primitive(PrimitiveKind::Int);
        let body = vec![
            b.local("a", int.clone(), None),
            b.if_stmt(b.var("c"), vec![b.local("b", int.clone(), None)], None),
            b.index_loop("i", "arr", vec![]),
        ];
        let method = b.method("m", vec![b.param("p", int.clone())], AnnotatedType::void(), body);
        let class = b.class("C", vec![b.field_decl("f", int)], vec![]);
        let ctx = MethodContext::new(&class, &method);

        for name in ["a", "b", "i"] {
            assert!(ctx.is_local(name), "{name} should be a local");
        }
        assert_eq!(ctx.param("p").map(|(i, _)| i), Some(0));
        assert!(ctx.local("p").is_none());
        assert_eq!(ctx.dependent().fields, vec!["f".to_string()]);
        assert_eq!(ctx.signature().map(|s| s.to_string()), Some("C.m(int)".to_string()));
    }
}
