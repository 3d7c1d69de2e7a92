//! Recognition of loops that open or discharge obligations on every array element
//!
//! Only one shape counts:
//!
//! ```text
//! for (int i = 0; i < arr.length; i++) { arr[i] = new R(..); }   // opens R's obligations
//! for (int i = 0; i < arr.length; i++) { arr[i].close(); }        // discharges close
//! ```
//!
//! Anything else is an ordinary loop. A loop with the right header whose body touches
//! `arr[i]` in some other way is remembered as a partial match so it can be reported.

use crate::dataflow::FlowExpr;
use crate::hir::{BinOp, ExprKind, HirExpr, HirModule, HirStmt, NodeId, StmtKind, UnaryOp};
use crate::types::ClassTable;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

/// What a recognized loop does to the array's elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEffect {
    /// Every element receives a fresh resource carrying these must-call methods
    Open(Vec<String>),
    /// Every element has this method called on it
    Close(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObligationLoop {
    pub array: FlowExpr,
    pub effect: LoopEffect,
    pub line: u32,
}

/// Recognized loops of one unit, keyed by the id of their `i < arr.length` condition
#[derive(Debug, Default)]
pub struct ObligationLoops {
    loops: HashMap<NodeId, ObligationLoop>,
    /// Loop statements whose header matched but whose body did not, with the reason
    partial: HashMap<NodeId, String>,
}

impl ObligationLoops {
    pub fn scan(module: &HirModule, classes: &ClassTable) -> Self {
        let mut found = Self::default();
        for class in &module.classes {
            for method in &class.methods {
                if let Some(body) = &method.body {
                    found.scan_stmts(body, classes);
                }
            }
        }
        debug!(
            file = %module.file,
            loops = found.loops.len(),
            partial = found.partial.len(),
            "matched obligation loops"
        );
        found
    }

    pub fn get(&self, condition: NodeId) -> Option<&ObligationLoop> {
        self.loops.get(&condition)
    }

    /// Why the loop statement `stmt` only partially matched, if it did
    pub fn partial(&self, stmt: NodeId) -> Option<&str> {
        self.partial.get(&stmt).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn clear(&mut self) {
        self.loops.clear();
        self.partial.clear();
    }

    fn scan_stmts(&mut self, stmts: &[HirStmt], classes: &ClassTable) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::For {
                    init,
                    cond,
                    update,
                    body,
                } => {
                    self.match_loop(stmt, init, cond.as_ref(), update, body, classes);
                    self.scan_stmts(body, classes);
                }
                StmtKind::If {
                    then_body,
                    else_body,
                    ..
                } => {
                    self.scan_stmts(then_body, classes);
                    if let Some(else_body) = else_body {
                        self.scan_stmts(else_body, classes);
                    }
                }
                StmtKind::While { body, .. } | StmtKind::Block(body) => self.scan_stmts(body, classes),
                _ => {}
            }
        }
    }

    fn match_loop(
        &mut self,
        stmt: &HirStmt,
        init: &[HirStmt],
        cond: Option<&HirExpr>,
        update: &[HirStmt],
        body: &[HirStmt],
        classes: &ClassTable,
    ) {
        let Some(header) = LoopHeader::recognize(init, cond, update) else {
            return;
        };
        let body = single_statement(body);
        let effect = body.and_then(|s| header.effect_of(s, classes));
        match effect {
            Some(effect) => {
                trace!(line = stmt.span.line, array = %header.array, ?effect, "obligation loop");
                self.loops.insert(
                    header.condition,
                    ObligationLoop {
                        array: header.array,
                        effect,
                        line: stmt.span.line,
                    },
                );
            }
            None => {
                let touches = body.is_some_and(|s| header.touches_element(s));
                if touches {
                    let reason = match body.map(|s| &s.kind) {
                        Some(StmtKind::Assign { .. }) => "the assigned value is not a new resource",
                        _ => "the body neither allocates nor closes the element",
                    };
                    self.partial.insert(stmt.id, reason.to_string());
                }
            }
        }
    }
}

/// `for (int i = 0; i < arr.length; i++)`
struct LoopHeader {
    index: String,
    array: FlowExpr,
    condition: NodeId,
}

impl LoopHeader {
    fn recognize(init: &[HirStmt], cond: Option<&HirExpr>, update: &[HirStmt]) -> Option<Self> {
        let [init] = init else {
            return None;
        };
        let index = match &init.kind {
            StmtKind::Local {
                name,
                init: Some(zero),
                ..
            } if zero.int_literal() == Some(0) => name.clone(),
            StmtKind::Assign { target, value } if value.int_literal() == Some(0) => target.as_var()?.to_string(),
            _ => return None,
        };

        let cond = cond?;
        let ExprKind::Binary {
            op: BinOp::Lt,
            left,
            right,
        } = &cond.kind
        else {
            return None;
        };
        if left.as_var() != Some(index.as_str()) {
            return None;
        }
        let ExprKind::ArrayLength(array) = &right.kind else {
            return None;
        };
        let array = FlowExpr::from_tree(array)?;

        let [update] = update else {
            return None;
        };
        let StmtKind::Expr(HirExpr {
            kind: ExprKind::Unary { op, operand },
            ..
        }) = &update.kind
        else {
            return None;
        };
        if !matches!(op, UnaryOp::PostInc | UnaryOp::PreInc) || operand.as_var() != Some(index.as_str()) {
            return None;
        }

        Some(Self {
            index,
            array,
            condition: cond.id,
        })
    }

    /// True if `expr` is exactly `arr[i]`
    fn is_element(&self, expr: &HirExpr) -> bool {
        let ExprKind::ArrayAccess { array, index } = &expr.skip_casts().kind else {
            return false;
        };
        index.as_var() == Some(self.index.as_str()) && FlowExpr::from_tree(array).as_ref() == Some(&self.array)
    }

    fn effect_of(&self, stmt: &HirStmt, classes: &ClassTable) -> Option<LoopEffect> {
        match &stmt.kind {
            StmtKind::Assign { target, value } if self.is_element(target) => {
                let ExprKind::New { ty, .. } = &value.kind else {
                    return None;
                };
                let methods = classes.must_call_methods(ty.class_name()?);
                (!methods.is_empty()).then_some(LoopEffect::Open(methods))
            }
            StmtKind::Expr(HirExpr {
                kind:
                    ExprKind::Call {
                        receiver: Some(receiver),
                        method,
                        args,
                        ..
                    },
                ..
            }) if args.is_empty() && self.is_element(receiver) => Some(LoopEffect::Close(method.name.clone())),
            _ => None,
        }
    }

    fn touches_element(&self, stmt: &HirStmt) -> bool {
        let mut found = false;
        for_each_expr(stmt, &mut |e| found |= self.is_element(e));
        found
    }
}

fn single_statement(body: &[HirStmt]) -> Option<&HirStmt> {
    match body {
        [only] => match &only.kind {
            StmtKind::Block(inner) => single_statement(inner),
            _ => Some(only),
        },
        _ => None,
    }
}

fn for_each_expr(stmt: &HirStmt, f: &mut dyn FnMut(&HirExpr)) {
    match &stmt.kind {
        StmtKind::Local { init, .. } => {
            if let Some(init) = init {
                visit_expr(init, f);
            }
        }
        StmtKind::Assign { target, value } => {
            visit_expr(target, f);
            visit_expr(value, f);
        }
        StmtKind::Expr(e) | StmtKind::Return(Some(e)) => visit_expr(e, f),
        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            visit_expr(cond, f);
            then_body.iter().for_each(|s| for_each_expr(s, f));
            if let Some(else_body) = else_body {
                else_body.iter().for_each(|s| for_each_expr(s, f));
            }
        }
        StmtKind::While { cond, body } => {
            visit_expr(cond, f);
            body.iter().for_each(|s| for_each_expr(s, f));
        }
        StmtKind::For {
            init,
            cond,
            update,
            body,
        } => {
            if let Some(cond) = cond {
                visit_expr(cond, f);
            }
            init.iter().chain(update).chain(body).for_each(|s| for_each_expr(s, f));
        }
        StmtKind::Block(body) => body.iter().for_each(|s| for_each_expr(s, f)),
        StmtKind::Return(None) | StmtKind::Break | StmtKind::Continue => {}
    }
}

fn visit_expr(expr: &HirExpr, f: &mut dyn FnMut(&HirExpr)) {
    f(expr);
    match &expr.kind {
        ExprKind::Field { receiver, .. } => visit_expr(receiver, f),
        ExprKind::ArrayAccess { array, index } => {
            visit_expr(array, f);
            visit_expr(index, f);
        }
        ExprKind::ArrayLength(e) | ExprKind::Unary { operand: e, .. } | ExprKind::Cast { expr: e, .. } => {
            visit_expr(e, f)
        }
        ExprKind::InstanceOf { expr, .. } => visit_expr(expr, f),
        ExprKind::Binary { left, right, .. } => {
            visit_expr(left, f);
            visit_expr(right, f);
        }
        ExprKind::Call { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                visit_expr(receiver, f);
            }
            args.iter().for_each(|a| visit_expr(a, f));
        }
        ExprKind::New { args, .. } => args.iter().for_each(|a| visit_expr(a, f)),
        ExprKind::NewArray { length, elements, .. } => {
            if let Some(length) = length {
                visit_expr(length, f);
            }
            elements.iter().for_each(|e| visit_expr(e, f));
        }
        ExprKind::Conditional {
            cond,
            then_expr,
            else_expr,
        } => {
            visit_expr(cond, f);
            visit_expr(then_expr, f);
            visit_expr(else_expr, f);
        }
        ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::This => {}
    }
}

/// Locals declared in `body` that the method does not hand back to its caller
pub(super) fn owned_locals(body: &[HirStmt]) -> BTreeSet<String> {
    let mut declared = BTreeSet::new();
    let mut returned = BTreeSet::new();
    collect_locals(body, &mut declared, &mut returned);
    declared.retain(|name| !returned.contains(name));
    declared
}

fn collect_locals(stmts: &[HirStmt], declared: &mut BTreeSet<String>, returned: &mut BTreeSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Local { name, .. } => {
                declared.insert(name.clone());
            }
            StmtKind::Return(Some(value)) => {
                if let Some(name) = value.skip_casts().as_var() {
                    returned.insert(name.to_string());
                }
            }
            StmtKind::If {
                then_body,
                else_body,
                ..
            } => {
                collect_locals(then_body, declared, returned);
                if let Some(else_body) = else_body {
                    collect_locals(else_body, declared, returned);
                }
            }
            StmtKind::For { init, body, .. } => {
                collect_locals(init, declared, returned);
                collect_locals(body, declared, returned);
            }
            StmtKind::While { body, .. } | StmtKind::Block(body) => collect_locals(body, declared, returned),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{HirBuilder, MethodSig};
    use crate::types::AnnotatedType;

    fn socket() -> AnnotatedType {
        AnnotatedType::declared("java.net.Socket", vec![])
    }

    fn scan(b: &HirBuilder, body: Vec<HirStmt>) -> ObligationLoops {
        let method = b.method("m", vec![], AnnotatedType::void(), body);
        let module = HirModule {
            file: "Loops.java".into(),
            classes: vec![b.class("Loops", vec![], vec![method])],
        };
        ObligationLoops::scan(&module, &ClassTable::for_module(&module))
    }

    fn cond_id(stmt: &HirStmt) -> NodeId {
        match &stmt.kind {
            StmtKind::For { cond: Some(c), .. } => c.id,
            _ => panic!("not a for loop"),
        }
    }

    #[test]
    fn test_opening_and_closing_loops() {
        let b = HirBuilder::new();
        let close = MethodSig::new("java.net.Socket", "close", &[]);
        let open = b.index_loop(
            "i",
            "arr",
            vec![b.assign(b.index(b.var("arr"), b.var("i")), b.new_object(socket(), vec![]))],
        );
        let discharge = b.index_loop(
            "j",
            "arr",
            vec![b.eval(b.call(Some(b.index(b.var("arr"), b.var("j"))), close, vec![], AnnotatedType::void()))],
        );
        let (open_id, close_id) = (cond_id(&open), cond_id(&discharge));
        let loops = scan(&b, vec![open, discharge]);
        assert_eq!(loops.len(), 2);
        assert_eq!(loops.get(open_id).unwrap().effect, LoopEffect::Open(vec!["close".into()]));
        assert_eq!(loops.get(close_id).unwrap().effect, LoopEffect::Close("close".into()));
        assert_eq!(loops.get(open_id).unwrap().array, FlowExpr::local("arr"));
    }

    #[test]
    fn test_wrong_shape_is_ignored() {
        let b = HirBuilder::new();
        let cond = b.binary(BinOp::Le, b.var("i"), b.length(b.var("arr")));
        let init = b.local("i", AnnotatedType::primitive(crate::types::PrimitiveKind::Int), Some(b.int(0)));
        let update = b.eval(b.unary(UnaryOp::PostInc, b.var("i")));
        let body = vec![b.assign(b.index(b.var("arr"), b.var("i")), b.new_object(socket(), vec![]))];
        let stmt = b.for_stmt(vec![init], Some(cond), vec![update], body);
        let id = stmt.id;
        let loops = scan(&b, vec![stmt]);
        assert!(loops.is_empty());
        assert!(loops.partial(id).is_none());
    }

    #[test]
    fn test_partial_match_is_remembered() {
        let b = HirBuilder::new();
        let stmt = b.index_loop("i", "arr", vec![b.assign(b.index(b.var("arr"), b.var("i")), b.null())]);
        let id = stmt.id;
        let loops = scan(&b, vec![stmt]);
        assert!(loops.is_empty());
        assert_eq!(loops.partial(id), Some("the assigned value is not a new resource"));
    }

    #[test]
    fn test_resource_without_obligation_is_not_a_loop() {
        let b = HirBuilder::new();
        let string = AnnotatedType::string();
        let stmt = b.index_loop(
            "i",
            "arr",
            vec![b.assign(b.index(b.var("arr"), b.var("i")), b.new_object(string, vec![]))],
        );
        assert!(scan(&b, vec![stmt]).is_empty());
    }

    #[test]
    fn test_returned_locals_are_not_owned() {
        let b = HirBuilder::new();
        let array = AnnotatedType::array(socket());
        let body = vec![
            b.local("kept", array.clone(), None),
            b.local("given", array, None),
            b.ret(Some(b.var("given"))),
        ];
        assert_eq!(owned_locals(&body).into_iter().collect::<Vec<_>>(), vec!["kept".to_string()]);
    }
}
