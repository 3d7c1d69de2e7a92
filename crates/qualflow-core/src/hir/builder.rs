//! Programmatic tree construction with fresh node ids

use super::*;
use crate::types::AnnotatedType;
use std::cell::Cell;

/// Allocates node ids and stamps the current line on every node it creates.
///
/// Methods take `&self` so nested construction reads naturally:
/// `b.binary(BinOp::Lt, b.var("i"), b.length(b.var("a")))`.
#[derive(Debug)]
pub struct HirBuilder {
    next_id: Cell<u32>,
    line: Cell<u32>,
}

impl HirBuilder {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            line: Cell::new(1),
        }
    }

    /// Set the line stamped on subsequently created nodes
    pub fn at(&self, line: u32) -> &Self {
        self.line.set(line);
        self
    }

    fn span(&self) -> Span {
        Span::line(self.line.get())
    }

    fn fresh(&self) -> NodeId {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        NodeId(id)
    }

    pub fn expr(&self, kind: ExprKind) -> HirExpr {
        HirExpr {
            id: self.fresh(),
            span: self.span(),
            kind,
        }
    }

    pub fn stmt(&self, kind: StmtKind) -> HirStmt {
        HirStmt {
            id: self.fresh(),
            span: self.span(),
            kind,
        }
    }

    pub fn int(&self, value: i64) -> HirExpr {
        self.expr(ExprKind::Literal(Literal::Int(value)))
    }

    pub fn string(&self, value: &str) -> HirExpr {
        self.expr(ExprKind::Literal(Literal::Str(value.to_string())))
    }

    pub fn boolean(&self, value: bool) -> HirExpr {
        self.expr(ExprKind::Literal(Literal::Bool(value)))
    }

    pub fn null(&self) -> HirExpr {
        self.expr(ExprKind::Literal(Literal::Null))
    }

    pub fn var(&self, name: &str) -> HirExpr {
        self.expr(ExprKind::Var(name.to_string()))
    }

    pub fn this(&self) -> HirExpr {
        self.expr(ExprKind::This)
    }

    pub fn field_access(&self, receiver: HirExpr, name: &str) -> HirExpr {
        self.expr(ExprKind::Field {
            receiver: Box::new(receiver),
            name: name.to_string(),
        })
    }

    pub fn index(&self, array: HirExpr, index: HirExpr) -> HirExpr {
        self.expr(ExprKind::ArrayAccess {
            array: Box::new(array),
            index: Box::new(index),
        })
    }

    pub fn length(&self, array: HirExpr) -> HirExpr {
        self.expr(ExprKind::ArrayLength(Box::new(array)))
    }

    pub fn binary(&self, op: BinOp, left: HirExpr, right: HirExpr) -> HirExpr {
        self.expr(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(&self, op: UnaryOp, operand: HirExpr) -> HirExpr {
        self.expr(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn call(
        &self,
        receiver: Option<HirExpr>,
        method: MethodSig,
        args: Vec<HirExpr>,
        ret_type: AnnotatedType,
    ) -> HirExpr {
        self.expr(ExprKind::Call {
            receiver: receiver.map(Box::new),
            method,
            args,
            ret_type,
        })
    }

    pub fn new_object(&self, ty: AnnotatedType, args: Vec<HirExpr>) -> HirExpr {
        self.expr(ExprKind::New { ty, args })
    }

    pub fn new_array(&self, ty: AnnotatedType, length: HirExpr) -> HirExpr {
        self.expr(ExprKind::NewArray {
            ty,
            length: Some(Box::new(length)),
            elements: Vec::new(),
        })
    }

    pub fn cast(&self, ty: AnnotatedType, expr: HirExpr) -> HirExpr {
        self.expr(ExprKind::Cast {
            ty,
            expr: Box::new(expr),
        })
    }

    pub fn instance_of(&self, expr: HirExpr, ty: AnnotatedType) -> HirExpr {
        self.expr(ExprKind::InstanceOf {
            expr: Box::new(expr),
            ty,
        })
    }

    pub fn conditional(&self, cond: HirExpr, then_expr: HirExpr, else_expr: HirExpr) -> HirExpr {
        self.expr(ExprKind::Conditional {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        })
    }

    pub fn local(&self, name: &str, ty: AnnotatedType, init: Option<HirExpr>) -> HirStmt {
        self.stmt(StmtKind::Local {
            name: name.to_string(),
            ty,
            init,
        })
    }

    pub fn assign(&self, target: HirExpr, value: HirExpr) -> HirStmt {
        self.stmt(StmtKind::Assign { target, value })
    }

    pub fn eval(&self, expr: HirExpr) -> HirStmt {
        self.stmt(StmtKind::Expr(expr))
    }

    pub fn if_stmt(
        &self,
        cond: HirExpr,
        then_body: Vec<HirStmt>,
        else_body: Option<Vec<HirStmt>>,
    ) -> HirStmt {
        self.stmt(StmtKind::If {
            cond,
            then_body,
            else_body,
        })
    }

    pub fn while_stmt(&self, cond: HirExpr, body: Vec<HirStmt>) -> HirStmt {
        self.stmt(StmtKind::While { cond, body })
    }

    pub fn for_stmt(
        &self,
        init: Vec<HirStmt>,
        cond: Option<HirExpr>,
        update: Vec<HirStmt>,
        body: Vec<HirStmt>,
    ) -> HirStmt {
        self.stmt(StmtKind::For {
            init,
            cond,
            update,
            body,
        })
    }

    pub fn ret(&self, value: Option<HirExpr>) -> HirStmt {
        self.stmt(StmtKind::Return(value))
    }

    pub fn brk(&self) -> HirStmt {
        self.stmt(StmtKind::Break)
    }

    pub fn cont(&self) -> HirStmt {
        self.stmt(StmtKind::Continue)
    }

    /// The canonical `for (int i = 0; i < arr.length; i++) { body }` loop
    pub fn index_loop(&self, index: &str, array: &str, body: Vec<HirStmt>) -> HirStmt {
        let init = self.local(
            index,
            AnnotatedType::primitive(crate::types::PrimitiveKind::Int),
            Some(self.int(0)),
        );
        let cond = self.binary(BinOp::Lt, self.var(index), self.length(self.var(array)));
        let update = self.eval(self.unary(UnaryOp::PostInc, self.var(index)));
        self.for_stmt(vec![init], Some(cond), vec![update], body)
    }

    pub fn param(&self, name: &str, ty: AnnotatedType) -> HirParam {
        HirParam {
            name: name.to_string(),
            ty,
        }
    }

    pub fn method(
        &self,
        name: &str,
        params: Vec<HirParam>,
        ret_type: AnnotatedType,
        body: Vec<HirStmt>,
    ) -> HirMethod {
        HirMethod {
            name: name.to_string(),
            params,
            ret_type,
            receiver: None,
            is_static: false,
            annotations: Vec::new(),
            body: Some(body),
            span: self.span(),
        }
    }

    pub fn field_decl(&self, name: &str, ty: AnnotatedType) -> HirField {
        HirField {
            name: name.to_string(),
            ty,
            annotations: Vec::new(),
            is_static: false,
            is_final: false,
            init: None,
            span: self.span(),
        }
    }

    /// `static final` field with an initializer
    pub fn constant_decl(&self, name: &str, ty: AnnotatedType, init: HirExpr) -> HirField {
        HirField {
            is_static: true,
            is_final: true,
            init: Some(init),
            ..self.field_decl(name, ty)
        }
    }

    pub fn class(&self, name: &str, fields: Vec<HirField>, methods: Vec<HirMethod>) -> HirClass {
        HirClass {
            name: name.to_string(),
            kind: ClassKind::Class,
            supertypes: Vec::new(),
            annotations: Vec::new(),
            fields,
            methods,
            span: self.span(),
        }
    }
}

impl Default for HirBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_fresh_and_lines_stamped() {
        let b = HirBuilder::new();
        b.at(7);
        let cond = b.binary(BinOp::Lt, b.var("i"), b.int(3));
        let ExprKind::Binary { left, right, .. } = &cond.kind else {
            panic!("expected binary");
        };
        assert_ne!(left.id, right.id);
        assert_ne!(cond.id, left.id);
        assert_eq!(cond.span.line, 7);
    }

    #[test]
    fn test_index_loop_shape() {
        let b = HirBuilder::new();
        let stmt = b.index_loop("i", "arr", vec![]);
        let StmtKind::For { init, cond, update, .. } = &stmt.kind else {
            panic!("expected for loop");
        };
        assert_eq!(init.len(), 1);
        assert_eq!(update.len(), 1);
        assert!(matches!(
            cond.as_ref().map(|c| &c.kind),
            Some(ExprKind::Binary { op: BinOp::Lt, .. })
        ));
    }
}
