//! Flow-sensitive refinement
//!
//! Method bodies are lowered to a control flow graph, then a forward analysis computes a
//! store of refined qualifiers before every node. The type system contributes refinement
//! rules; everything else here is shared.

mod analysis;
pub mod cfg;
mod expr;
pub mod solver;
mod store;
mod transfer;

pub use analysis::{AnalysisResult, AnalysisState, FlowAnalysis};
pub use cfg::{BasicBlock, BlockId, Cfg, CfgBuilder, Node, Terminator};
pub use expr::FlowExpr;
pub use solver::{BlockOutput, DataflowAnalysis, FixpointResult, FixpointSolver};
pub use store::{AbstractValue, Store};
pub use transfer::{refine_comparison, refine_to_glb, RefineContext, RefinementRules};
