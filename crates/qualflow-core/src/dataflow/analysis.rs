//! Per-method forward analysis over qualifier stores

use super::cfg::{BasicBlock, BlockId, CfgBuilder, Node};
use super::expr::FlowExpr;
use super::solver::{BlockOutput, DataflowAnalysis, FixpointSolver};
use super::store::Store;
use super::transfer::{refine_comparison, RefineContext};
use crate::checker::UnitContext;
use crate::error::{CheckerError, Result};
use crate::factory::{AnnotatedTypeFactory, MethodContext, Operand, TypeContext};
use crate::hierarchy::QualifierHierarchy;
use crate::hir::{BinOp, ExprKind, HirExpr, Literal, NodeId, UnaryOp};
use crate::qualifier::Qualifier;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    NotStarted,
    Running,
    Converged,
}

/// Stores flowing out of one node
enum Stores {
    Regular(Store),
    Conditional { then_store: Store, else_store: Store },
}

impl Stores {
    fn merged(self, h: &dyn QualifierHierarchy) -> Store {
        match self {
            Stores::Regular(store) => store,
            Stores::Conditional {
                then_store,
                else_store,
            } => then_store.least_upper_bound(&else_store, h),
        }
    }
}

/// Everything the analysis of one method proved
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub state: AnalysisState,
    /// Value of every evaluated tree, joined over all visits
    pub node_values: HashMap<NodeId, Qualifier>,
    pub stores_before: HashMap<NodeId, Store>,
    pub block_inputs: HashMap<BlockId, Store>,
    /// `None` when the end of the method is unreachable
    pub exit_store: Option<Store>,
    /// Store at each `return` statement
    pub return_stores: HashMap<NodeId, Store>,
    pub iterations: usize,
}

impl AnalysisResult {
    pub fn value(&self, id: NodeId) -> Option<&Qualifier> {
        self.node_values.get(&id)
    }

    pub fn store_before(&self, id: NodeId) -> Option<&Store> {
        self.stores_before.get(&id)
    }
}

/// The qualifier an assignment leaves behind: the assigned value if it fits the declared
/// type, else the declared type (the visitor reports the mismatch)
fn assigned_value(h: &dyn QualifierHierarchy, value: Qualifier, declared: &Qualifier) -> Qualifier {
    if h.is_subtype(&value, declared) {
        value
    } else {
        declared.clone()
    }
}

pub struct FlowAnalysis<'f, 'a> {
    factory: &'f AnnotatedTypeFactory<'a>,
    method: &'f MethodContext<'a>,
    unit: &'f UnitContext,
    max_visits: usize,
    state: AnalysisState,
    node_values: HashMap<NodeId, Qualifier>,
    stores_before: HashMap<NodeId, Store>,
    return_stores: HashMap<NodeId, Store>,
}

impl<'f, 'a> FlowAnalysis<'f, 'a> {
    pub fn new(
        factory: &'f AnnotatedTypeFactory<'a>,
        method: &'f MethodContext<'a>,
        unit: &'f UnitContext,
        max_visits: usize,
    ) -> Self {
        Self {
            factory,
            method,
            unit,
            max_visits,
            state: AnalysisState::NotStarted,
            node_values: HashMap::new(),
            stores_before: HashMap::new(),
            return_stores: HashMap::new(),
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    pub fn run(mut self) -> Result<AnalysisResult> {
        let method = self.method;
        let body = method.method().and_then(|m| m.body.as_deref()).unwrap_or(&[]);
        let cfg = CfgBuilder::new().build_body(body);
        let name = method
            .signature()
            .map(|s| s.to_string())
            .unwrap_or_else(|| method.class().name.clone());

        self.state = AnalysisState::Running;
        let solved = FixpointSolver::new(self.max_visits).solve(&mut self, &cfg)?;
        if !solved.converged {
            return Err(CheckerError::NoFixpoint {
                method: name,
                visits: solved.iterations,
            });
        }
        self.state = AnalysisState::Converged;
        debug!(
            system = self.factory.system_name(),
            method = %name,
            iterations = solved.iterations,
            "converged"
        );

        let exit_store = solved.in_facts.get(&cfg.exit).cloned();
        Ok(AnalysisResult {
            state: self.state,
            node_values: self.node_values,
            stores_before: self.stores_before,
            block_inputs: solved.in_facts,
            exit_store,
            return_stores: self.return_stores,
            iterations: solved.iterations,
        })
    }

    fn record_value(&mut self, id: NodeId, value: Qualifier) {
        let h = self.factory.hierarchy();
        self.node_values
            .entry(id)
            .and_modify(|v| *v = h.least_upper_bound(v, &value))
            .or_insert(value);
    }

    fn transfer_node(&mut self, node: &Node, store: Store) -> Result<Stores> {
        match node {
            Node::Value(expr) => self.transfer_expr(expr, store),
            Node::Assign { target, value, .. } => {
                let mut store = store;
                let h = self.factory.hierarchy();
                let (v, declared) = {
                    let values = &self.node_values;
                    let oracle = |e: &HirExpr| values.get(&e.id).cloned();
                    let tcx = TypeContext::new(self.factory, self.method, &oracle);
                    (tcx.qualifier_of(value), self.factory.type_in(&tcx, target).qualifier(h))
                };
                if let Some(fe) = FlowExpr::from_tree(target) {
                    store.clear_dependents(&fe);
                    store.insert_value(fe, assigned_value(h, v, &declared));
                }
                Ok(Stores::Regular(store))
            }
            Node::LocalDecl { name, init, .. } => {
                let mut store = store;
                let local = FlowExpr::local(name);
                store.clear_value(&local);
                store.clear_dependents(&local);
                if let Some(init) = init {
                    let h = self.factory.hierarchy();
                    let v = {
                        let values = &self.node_values;
                        let oracle = |e: &HirExpr| values.get(&e.id).cloned();
                        let tcx = TypeContext::new(self.factory, self.method, &oracle);
                        tcx.qualifier_of(init)
                    };
                    let declared = self.factory.variable_type(self.method, name).qualifier(h);
                    store.insert_value(local, assigned_value(h, v, &declared));
                }
                Ok(Stores::Regular(store))
            }
            Node::Return { tree, .. } => {
                self.return_stores.insert(*tree, store.clone());
                Ok(Stores::Regular(store))
            }
        }
    }

    fn transfer_expr(&mut self, expr: &HirExpr, mut store: Store) -> Result<Stores> {
        let h = self.factory.hierarchy();
        let rules = self.factory.rules();
        let (value, out) = {
            let values = &self.node_values;
            let oracle = |e: &HirExpr| values.get(&e.id).cloned();
            let tcx = TypeContext::new(self.factory, self.method, &oracle);
            match &expr.kind {
                ExprKind::Binary { op, left, right } if op.is_relational() || op.is_equality() => {
                    let value = self.factory.type_in(&tcx, expr).qualifier(h);
                    let mut then_store = store.clone();
                    let mut else_store = store;
                    refine_comparison(rules, &tcx, self.unit, *op, left, right, &mut then_store, &mut else_store);
                    rules.after_comparison(&tcx, self.unit, expr, &mut then_store, &mut else_store)?;
                    (
                        value,
                        Stores::Conditional {
                            then_store,
                            else_store,
                        },
                    )
                }
                ExprKind::Unary { op, operand } if op.is_update() => {
                    let tracked = FlowExpr::from_tree(operand);
                    let old = tracked
                        .as_ref()
                        .and_then(|fe| store.value(fe).cloned())
                        .unwrap_or_else(|| tcx.qualifier_of(operand));
                    let delta = if op.is_increment() { 1 } else { -1 };
                    let one = Operand::synthetic(self.factory.literal_type(&Literal::Int(delta)).qualifier(h), Some(delta));
                    let current = Operand {
                        expr: Some(operand.as_ref()),
                        qualifier: old.clone(),
                        constant: tcx.constant(operand),
                    };
                    let updated = rules
                        .binary(&tcx, BinOp::Add, &current, &one)
                        .unwrap_or_else(|| h.top().clone());
                    let declared = self.factory.type_in(&tcx, operand).qualifier(h);
                    let stored = assigned_value(h, updated, &declared);
                    if let Some(fe) = tracked {
                        store.clear_dependents(&fe);
                        store.insert_value(fe, stored.clone());
                    }
                    let value = match op {
                        UnaryOp::PreInc | UnaryOp::PreDec => stored,
                        _ => old,
                    };
                    (value, Stores::Regular(store))
                }
                ExprKind::Call { .. } => {
                    let value = self.factory.type_in(&tcx, expr).qualifier(h);
                    if !self.factory.is_side_effect_free(expr) {
                        store.clear_fields();
                    }
                    {
                        let mut cx = RefineContext::new(&tcx, &mut store, self.unit);
                        rules.after_call(&mut cx, expr)?;
                    }
                    (value, Stores::Regular(store))
                }
                _ => {
                    // The oracle still holds this tree's value from the previous visit
                    let value = match FlowExpr::from_tree(expr).and_then(|fe| store.value(&fe).cloned()) {
                        Some(q) => q,
                        None => self.factory.type_in(&tcx, expr).qualifier(h),
                    };
                    (value, Stores::Regular(store))
                }
            }
        };
        self.record_value(expr.id, value);
        Ok(out)
    }
}

impl DataflowAnalysis for FlowAnalysis<'_, '_> {
    type Fact = Store;
    type Error = CheckerError;

    fn initial_fact(&self) -> Store {
        let h = self.factory.hierarchy();
        let mut store = Store::new();
        let Some(method) = self.method.method() else {
            return store;
        };
        let mt = self.factory.method_type(self.method.class(), method);
        for (param, ty) in method.params.iter().zip(&mt.params) {
            store.insert_value(FlowExpr::local(&param.name), ty.qualifier(h));
        }
        if let Some(receiver) = &mt.receiver {
            store.insert_value(FlowExpr::This, receiver.qualifier(h));
        }
        store
    }

    fn join(&self, a: &Store, b: &Store) -> Store {
        a.least_upper_bound(b, self.factory.hierarchy())
    }

    fn covers(&self, current: &Store, incoming: &Store) -> bool {
        current.is_superset_of(incoming, self.factory.hierarchy())
    }

    fn transfer(&mut self, block: &BasicBlock, input: &Store) -> Result<BlockOutput<Store>> {
        let h = self.factory.hierarchy();
        let mut stores = Stores::Regular(input.clone());
        for node in &block.nodes {
            let store = stores.merged(h);
            self.stores_before.insert(node.tree(), store.clone());
            stores = self.transfer_node(node, store)?;
        }
        Ok(match stores {
            Stores::Regular(store) => BlockOutput::Regular(store),
            Stores::Conditional {
                then_store,
                else_store,
            } => BlockOutput::Conditional {
                then_fact: then_store,
                else_fact: else_store,
            },
        })
    }
}
