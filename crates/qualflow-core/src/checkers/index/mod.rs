//! Array index checking
//!
//! Three cooperating systems run in order: `value` tracks constants, `lowerbound`
//! proves indices non-negative, and `upperbound` proves them below the array length.
//! Later systems read the flow values of earlier ones.

pub mod lowerbound;
pub mod upperbound;
pub mod value;

use crate::checker::TypeSystem;
use crate::dataflow::FlowExpr;
use crate::error::Result;
use crate::hir::HirExpr;

pub fn systems() -> Result<Vec<TypeSystem>> {
    Ok(vec![value::system()?, lowerbound::system()?, upperbound::system()?])
}

/// Name under which an array appears in dependent qualifiers, e.g. `a` or `this.arr`
pub(crate) fn sequence_name(expr: &HirExpr) -> Option<String> {
    FlowExpr::from_tree(expr.skip_casts()).map(|fe| fe.to_string())
}
