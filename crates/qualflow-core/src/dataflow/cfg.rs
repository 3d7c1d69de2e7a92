//! Control flow graph construction from method bodies
//!
//! Expressions are flattened into one node per subexpression in evaluation order, so
//! the analysis can attach a value to every tree. Conditions that steer control flow
//! (`&&`, `||`, `!` in branch position) are lowered into separate blocks.

use crate::hir::{BinOp, ExprKind, HirExpr, HirStmt, NodeId, Span, StmtKind, UnaryOp};
use crate::types::AnnotatedType;
use std::collections::{HashMap, HashSet};

/// Unique identifier for a basic block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// A node in a basic block. The set of node kinds is closed.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Evaluation of an expression whose operands have already been evaluated
    Value(HirExpr),
    /// Store an evaluated value into a local, field or array element
    Assign {
        tree: NodeId,
        span: Span,
        target: HirExpr,
        value: HirExpr,
    },
    LocalDecl {
        tree: NodeId,
        span: Span,
        name: String,
        ty: AnnotatedType,
        init: Option<HirExpr>,
    },
    Return {
        tree: NodeId,
        span: Span,
        value: Option<HirExpr>,
    },
}

impl Node {
    /// Identity of the syntax node this CFG node stands for
    pub fn tree(&self) -> NodeId {
        match self {
            Node::Value(expr) => expr.id,
            Node::Assign { tree, .. } | Node::LocalDecl { tree, .. } | Node::Return { tree, .. } => {
                *tree
            }
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Node::Value(expr) => expr.span,
            Node::Assign { span, .. } | Node::LocalDecl { span, .. } | Node::Return { span, .. } => {
                *span
            }
        }
    }
}

/// How a basic block terminates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Goto(BlockId),
    /// Two-way branch on the value of the last node, `condition`
    Branch {
        condition: NodeId,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Jump to the exit block
    Return,
    /// Nothing follows (dead code after `break`, `continue` or `return`)
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub id: BlockId,
    pub nodes: Vec<Node>,
    pub terminator: Option<Terminator>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            terminator: None,
            predecessors: Vec::new(),
            successors: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Cfg {
    pub blocks: HashMap<BlockId, BasicBlock>,
    pub entry: BlockId,
    pub exit: BlockId,
    next_block_id: usize,
}

impl Cfg {
    pub fn new() -> Self {
        let mut cfg = Self {
            blocks: HashMap::new(),
            entry: BlockId(0),
            exit: BlockId(0),
            next_block_id: 0,
        };
        cfg.entry = cfg.new_block();
        cfg.exit = cfg.new_block();
        cfg
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.blocks.insert(id, BasicBlock::new(id));
        id
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if let Some(block) = self.blocks.get_mut(&from) {
            if !block.successors.contains(&to) {
                block.successors.push(to);
            }
        }
        if let Some(block) = self.blocks.get_mut(&to) {
            if !block.predecessors.contains(&from) {
                block.predecessors.push(from);
            }
        }
    }

    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        if let Some(b) = self.blocks.get_mut(&block) {
            b.terminator = Some(terminator);
        }
    }

    pub fn add_node(&mut self, block: BlockId, node: Node) {
        if let Some(b) = self.blocks.get_mut(&block) {
            b.nodes.push(node);
        }
    }

    fn is_open(&self, block: BlockId) -> bool {
        self.blocks.get(&block).is_some_and(|b| b.terminator.is_none())
    }

    /// Blocks in reverse postorder from the entry
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();
        self.dfs_postorder(self.entry, &mut visited, &mut postorder);
        postorder.reverse();
        postorder
    }

    fn dfs_postorder(&self, block: BlockId, visited: &mut HashSet<BlockId>, postorder: &mut Vec<BlockId>) {
        if !visited.insert(block) {
            return;
        }
        if let Some(b) = self.blocks.get(&block) {
            for &succ in &b.successors {
                self.dfs_postorder(succ, visited, postorder);
            }
        }
        postorder.push(block);
    }

    /// Every node of the graph, in block-id order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        let mut ids: Vec<&BlockId> = self.blocks.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.blocks.get(id))
            .flat_map(|b| b.nodes.iter())
    }
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing a CFG from a method body
pub struct CfgBuilder {
    cfg: Cfg,
    current_block: BlockId,
    loop_stack: Vec<LoopContext>,
}

struct LoopContext {
    continue_block: BlockId,
    break_block: BlockId,
}

impl CfgBuilder {
    pub fn new() -> Self {
        let cfg = Cfg::new();
        let entry = cfg.entry;
        Self {
            cfg,
            current_block: entry,
            loop_stack: Vec::new(),
        }
    }

    pub fn build_body(mut self, body: &[HirStmt]) -> Cfg {
        self.build_stmts(body);
        if self.cfg.is_open(self.current_block) {
            let exit = self.cfg.exit;
            self.cfg.set_terminator(self.current_block, Terminator::Return);
            self.cfg.add_edge(self.current_block, exit);
        }
        self.cfg
    }

    fn build_stmts(&mut self, stmts: &[HirStmt]) {
        for stmt in stmts {
            self.build_stmt(stmt);
        }
    }

    fn build_stmt(&mut self, stmt: &HirStmt) {
        match &stmt.kind {
            StmtKind::Local { name, ty, init } => {
                if let Some(init) = init {
                    self.emit_expr(init);
                }
                self.push(Node::LocalDecl {
                    tree: stmt.id,
                    span: stmt.span,
                    name: name.clone(),
                    ty: ty.clone(),
                    init: init.clone(),
                });
            }
            StmtKind::Assign { target, value } => {
                self.emit_target(target);
                self.emit_expr(value);
                self.push(Node::Assign {
                    tree: stmt.id,
                    span: stmt.span,
                    target: target.clone(),
                    value: value.clone(),
                });
            }
            StmtKind::Expr(expr) => self.emit_expr(expr),
            StmtKind::If {
                cond,
                then_body,
                else_body,
            } => self.build_if(cond, then_body, else_body.as_deref()),
            StmtKind::While { cond, body } => self.build_loop(&[], Some(cond), &[], body),
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => self.build_loop(init, cond.as_ref(), update, body),
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.emit_expr(value);
                }
                self.push(Node::Return {
                    tree: stmt.id,
                    span: stmt.span,
                    value: value.clone(),
                });
                let exit = self.cfg.exit;
                self.cfg.set_terminator(self.current_block, Terminator::Return);
                self.cfg.add_edge(self.current_block, exit);
                self.start_dead_block();
            }
            StmtKind::Break => {
                if let Some(target) = self.loop_stack.last().map(|l| l.break_block) {
                    self.jump(target);
                }
                self.start_dead_block();
            }
            StmtKind::Continue => {
                if let Some(target) = self.loop_stack.last().map(|l| l.continue_block) {
                    self.jump(target);
                }
                self.start_dead_block();
            }
            StmtKind::Block(stmts) => self.build_stmts(stmts),
        }
    }

    fn push(&mut self, node: Node) {
        self.cfg.add_node(self.current_block, node);
    }

    fn jump(&mut self, target: BlockId) {
        self.cfg.set_terminator(self.current_block, Terminator::Goto(target));
        self.cfg.add_edge(self.current_block, target);
    }

    /// Terminate the current block as dead and continue in a fresh, unreachable one
    fn start_dead_block(&mut self) {
        if self.cfg.is_open(self.current_block) {
            self.cfg.set_terminator(self.current_block, Terminator::Unreachable);
        }
        self.current_block = self.cfg.new_block();
    }

    /// Post-order evaluation of `expr` and all of its subexpressions
    fn emit_expr(&mut self, expr: &HirExpr) {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::This => {}
            ExprKind::Field { receiver, .. } => self.emit_expr(receiver),
            ExprKind::ArrayAccess { array, index } => {
                self.emit_expr(array);
                self.emit_expr(index);
            }
            ExprKind::ArrayLength(array) => self.emit_expr(array),
            ExprKind::Binary { left, right, .. } => {
                self.emit_expr(left);
                self.emit_expr(right);
            }
            ExprKind::Unary { operand, .. } => self.emit_expr(operand),
            ExprKind::Call { receiver, args, .. } => {
                if let Some(receiver) = receiver {
                    self.emit_expr(receiver);
                }
                args.iter().for_each(|a| self.emit_expr(a));
            }
            ExprKind::New { args, .. } => args.iter().for_each(|a| self.emit_expr(a)),
            ExprKind::NewArray {
                length, elements, ..
            } => {
                if let Some(length) = length {
                    self.emit_expr(length);
                }
                elements.iter().for_each(|e| self.emit_expr(e));
            }
            ExprKind::Cast { expr: inner, .. } | ExprKind::InstanceOf { expr: inner, .. } => {
                self.emit_expr(inner)
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                self.emit_expr(cond);
                self.emit_expr(then_expr);
                self.emit_expr(else_expr);
            }
        }
        self.push(Node::Value(expr.clone()));
    }

    /// The operands of an assignment target. The target itself is written, not read.
    fn emit_target(&mut self, target: &HirExpr) {
        match &target.kind {
            ExprKind::Field { receiver, .. } => self.emit_expr(receiver),
            ExprKind::ArrayAccess { array, index } => {
                self.emit_expr(array);
                self.emit_expr(index);
            }
            _ => {}
        }
    }

    /// Lower `cond` so control reaches `then_block` when it holds and `else_block` otherwise
    fn build_cond(&mut self, cond: &HirExpr, then_block: BlockId, else_block: BlockId) {
        match &cond.kind {
            ExprKind::Binary {
                op: BinOp::And,
                left,
                right,
            } => {
                let rhs = self.cfg.new_block();
                self.build_cond(left, rhs, else_block);
                self.current_block = rhs;
                self.build_cond(right, then_block, else_block);
            }
            ExprKind::Binary {
                op: BinOp::Or,
                left,
                right,
            } => {
                let rhs = self.cfg.new_block();
                self.build_cond(left, then_block, rhs);
                self.current_block = rhs;
                self.build_cond(right, then_block, else_block);
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.build_cond(operand, else_block, then_block),
            _ => {
                self.emit_expr(cond);
                self.cfg.set_terminator(
                    self.current_block,
                    Terminator::Branch {
                        condition: cond.id,
                        then_block,
                        else_block,
                    },
                );
                self.cfg.add_edge(self.current_block, then_block);
                self.cfg.add_edge(self.current_block, else_block);
            }
        }
    }

    fn build_if(&mut self, cond: &HirExpr, then_body: &[HirStmt], else_body: Option<&[HirStmt]>) {
        let then_block = self.cfg.new_block();
        let else_block = self.cfg.new_block();
        let merge_block = self.cfg.new_block();

        self.build_cond(cond, then_block, else_block);

        self.current_block = then_block;
        self.build_stmts(then_body);
        if self.cfg.is_open(self.current_block) {
            self.jump(merge_block);
        }

        self.current_block = else_block;
        if let Some(else_body) = else_body {
            self.build_stmts(else_body);
        }
        if self.cfg.is_open(self.current_block) {
            self.jump(merge_block);
        }

        self.current_block = merge_block;
    }

    /// `while` and `for` loops. A missing condition loops until `break`.
    fn build_loop(&mut self, init: &[HirStmt], cond: Option<&HirExpr>, update: &[HirStmt], body: &[HirStmt]) {
        self.build_stmts(init);

        let header_block = self.cfg.new_block();
        let body_block = self.cfg.new_block();
        let update_block = self.cfg.new_block();
        let exit_block = self.cfg.new_block();

        self.jump(header_block);

        self.current_block = header_block;
        match cond {
            Some(cond) => self.build_cond(cond, body_block, exit_block),
            None => self.jump(body_block),
        }

        self.loop_stack.push(LoopContext {
            continue_block: update_block,
            break_block: exit_block,
        });
        self.current_block = body_block;
        self.build_stmts(body);
        self.loop_stack.pop();
        if self.cfg.is_open(self.current_block) {
            self.jump(update_block);
        }

        // Back edge
        self.current_block = update_block;
        self.build_stmts(update);
        if self.cfg.is_open(self.current_block) {
            self.jump(header_block);
        }

        self.current_block = exit_block;
    }
}

impl Default for CfgBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::HirBuilder;
    use crate::types::PrimitiveKind;

    fn int() -> AnnotatedType {
        AnnotatedType::primitive(PrimitiveKind::Int)
    }

    #[test]
    fn test_cfg_straight_line() {
        let b = HirBuilder::new();
        let body = vec![
            b.local("x", int(), Some(b.binary(BinOp::Add, b.int(1), b.int(2)))),
            b.ret(Some(b.var("x"))),
        ];
        let cfg = CfgBuilder::new().build_body(&body);
        let entry = &cfg.blocks[&cfg.entry];
        // 1, 2, 1 + 2, decl x, x, return
        assert_eq!(entry.nodes.len(), 6);
        assert!(matches!(entry.nodes[3], Node::LocalDecl { .. }));
        assert_eq!(entry.terminator, Some(Terminator::Return));
        assert!(entry.successors.contains(&cfg.exit));
    }

    #[test]
    fn test_cfg_if_statement() {
        let b = HirBuilder::new();
        let cond = b.binary(BinOp::Gt, b.var("x"), b.int(0));
        let cond_id = cond.id;
        let body = vec![b.if_stmt(cond, vec![b.ret(Some(b.int(1)))], Some(vec![b.ret(Some(b.int(0)))]))];
        let cfg = CfgBuilder::new().build_body(&body);

        let entry = &cfg.blocks[&cfg.entry];
        assert!(matches!(
            entry.terminator,
            Some(Terminator::Branch { condition, .. }) if condition == cond_id
        ));
        assert_eq!(entry.successors.len(), 2);
    }

    #[test]
    fn test_short_circuit_conditions_are_lowered() {
        let b = HirBuilder::new();
        let cond = b.binary(
            BinOp::And,
            b.binary(BinOp::Gt, b.var("x"), b.int(0)),
            b.unary(UnaryOp::Not, b.binary(BinOp::Eq, b.var("y"), b.int(1))),
        );
        let body = vec![b.if_stmt(cond, vec![b.eval(b.var("x"))], None)];
        let cfg = CfgBuilder::new().build_body(&body);

        let branches = cfg
            .blocks
            .values()
            .filter(|bb| matches!(bb.terminator, Some(Terminator::Branch { .. })))
            .count();
        assert_eq!(branches, 2);
        // The && node itself is never evaluated as a value
        assert!(!cfg
            .nodes()
            .any(|n| matches!(n, Node::Value(e) if matches!(e.kind, ExprKind::Binary { op: BinOp::And, .. }))));
    }

    #[test]
    fn test_for_loop_has_back_edge_through_update() {
        let b = HirBuilder::new();
        let body = vec![b.index_loop("i", "a", vec![b.eval(b.index(b.var("a"), b.var("i")))])];
        let cfg = CfgBuilder::new().build_body(&body);

        let rpo = cfg.reverse_postorder();
        assert_eq!(rpo[0], cfg.entry);
        let header = cfg.blocks[&cfg.entry].successors[0];
        let header_block = &cfg.blocks[&header];
        assert!(matches!(header_block.terminator, Some(Terminator::Branch { .. })));
        // entry and the update block both reach the header
        assert_eq!(header_block.predecessors.len(), 2);
    }

    #[test]
    fn test_break_and_continue() {
        let b = HirBuilder::new();
        let body = vec![b.while_stmt(
            b.boolean(true),
            vec![b.if_stmt(b.var("done"), vec![b.brk()], Some(vec![b.cont()]))],
        )];
        let cfg = CfgBuilder::new().build_body(&body);
        assert!(cfg
            .blocks
            .values()
            .any(|bb| bb.terminator == Some(Terminator::Unreachable) || bb.predecessors.is_empty()));
        assert!(cfg.blocks.len() >= 7);
    }

    #[test]
    fn test_assignment_target_is_not_read() {
        let b = HirBuilder::new();
        let target = b.index(b.var("a"), b.var("i"));
        let target_id = target.id;
        let body = vec![b.assign(target, b.int(3))];
        let cfg = CfgBuilder::new().build_body(&body);
        assert!(!cfg.nodes().any(|n| matches!(n, Node::Value(e) if e.id == target_id)));
        assert!(cfg.nodes().any(|n| matches!(n, Node::Assign { .. })));
    }
}
