//! Flow expressions: the trees a store can attach refined values to

use crate::hir::{ExprKind, HirExpr};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trackable expression: a local, `this`, a field path, an array element or an
/// array length. Fields must be written explicitly (`this.f`); the front end resolves
/// implicit field references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FlowExpr {
    Local(String),
    This,
    Field {
        receiver: Box<FlowExpr>,
        name: String,
    },
    ArrayElement {
        array: Box<FlowExpr>,
        index: Box<FlowExpr>,
    },
    Length(Box<FlowExpr>),
    /// Integer constant, only as an array index
    Constant(i64),
}

impl FlowExpr {
    pub fn local(name: &str) -> Self {
        FlowExpr::Local(name.to_string())
    }

    pub fn field(receiver: FlowExpr, name: &str) -> Self {
        FlowExpr::Field {
            receiver: Box::new(receiver),
            name: name.to_string(),
        }
    }

    /// The flow expression denoted by `expr`, if it is trackable
    pub fn from_tree(expr: &HirExpr) -> Option<FlowExpr> {
        match &expr.kind {
            ExprKind::Var(name) => Some(FlowExpr::Local(name.clone())),
            ExprKind::This => Some(FlowExpr::This),
            ExprKind::Field { receiver, name } => Some(FlowExpr::Field {
                receiver: Box::new(FlowExpr::from_tree(receiver)?),
                name: name.clone(),
            }),
            ExprKind::ArrayAccess { array, index } => {
                let index = match index.int_literal() {
                    Some(v) => FlowExpr::Constant(v),
                    None => FlowExpr::from_tree(index)?,
                };
                Some(FlowExpr::ArrayElement {
                    array: Box::new(FlowExpr::from_tree(array)?),
                    index: Box::new(index),
                })
            }
            ExprKind::ArrayLength(array) => Some(FlowExpr::Length(Box::new(FlowExpr::from_tree(array)?))),
            ExprKind::Cast { expr, .. } => FlowExpr::from_tree(expr),
            _ => None,
        }
    }

    /// True if the value may change when the heap is written
    pub fn depends_on_heap(&self) -> bool {
        match self {
            FlowExpr::Local(_) | FlowExpr::This | FlowExpr::Constant(_) => false,
            FlowExpr::Field { .. } | FlowExpr::ArrayElement { .. } => true,
            FlowExpr::Length(array) => array.depends_on_heap(),
        }
    }

    /// True if `other` occurs strictly inside this expression
    pub fn contains(&self, other: &FlowExpr) -> bool {
        let inner: Vec<&FlowExpr> = match self {
            FlowExpr::Field { receiver, .. } => vec![receiver.as_ref()],
            FlowExpr::ArrayElement { array, index } => vec![array.as_ref(), index.as_ref()],
            FlowExpr::Length(array) => vec![array.as_ref()],
            _ => Vec::new(),
        };
        inner.into_iter().any(|e| e == other || e.contains(other))
    }
}

impl fmt::Display for FlowExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowExpr::Local(name) => f.write_str(name),
            FlowExpr::This => f.write_str("this"),
            FlowExpr::Field { receiver, name } => write!(f, "{}.{}", receiver, name),
            FlowExpr::ArrayElement { array, index } => write!(f, "{}[{}]", array, index),
            FlowExpr::Length(array) => write!(f, "{}.length", array),
            FlowExpr::Constant(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{BinOp, HirBuilder};

    #[test]
    fn test_from_tree() {
        let b = HirBuilder::new();
        let e = b.index(b.field_access(b.this(), "arr"), b.var("i"));
        let fe = FlowExpr::from_tree(&e).unwrap();
        assert_eq!(fe.to_string(), "this.arr[i]");
        assert!(fe.depends_on_heap());

        let len = FlowExpr::from_tree(&b.length(b.var("a"))).unwrap();
        assert_eq!(len.to_string(), "a.length");
        assert!(!len.depends_on_heap());

        let constant = FlowExpr::from_tree(&b.index(b.var("a"), b.int(0))).unwrap();
        assert_eq!(constant.to_string(), "a[0]");
    }

    #[test]
    fn test_untrackable() {
        let b = HirBuilder::new();
        assert!(FlowExpr::from_tree(&b.binary(BinOp::Add, b.var("a"), b.int(1))).is_none());
        assert!(FlowExpr::from_tree(&b.index(b.var("a"), b.binary(BinOp::Add, b.var("i"), b.int(1)))).is_none());
        assert!(FlowExpr::from_tree(&b.int(3)).is_none());
    }

    #[test]
    fn test_contains() {
        let b = HirBuilder::new();
        let e = FlowExpr::from_tree(&b.index(b.var("a"), b.var("i"))).unwrap();
        assert!(e.contains(&FlowExpr::local("i")));
        assert!(e.contains(&FlowExpr::local("a")));
        assert!(!e.contains(&e));
        assert!(!FlowExpr::local("i").contains(&FlowExpr::local("i")));
    }
}
