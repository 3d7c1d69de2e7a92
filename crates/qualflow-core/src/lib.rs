//! # Qualflow Core
//!
//! Pluggable type-qualifier checking over a Java-like HIR.
//!
//! A type system is a qualifier hierarchy plus rules: defaults for unannotated types,
//! flow refinements, and consistency checks. The [`Checker`] runs an ordered pipeline of
//! systems over a [`HirModule`]; each system refines qualifiers with a worklist dataflow
//! analysis and then walks the tree reporting diagnostics.
//!
//! ## Modules
//!
//! - **[`hierarchy`]** - Qualifier lattices and their subtyping, LUB and GLB
//! - **[`dataflow`]** - CFG construction, abstract stores and the fixpoint solver
//! - **[`factory`]** - Annotated types, defaulting and polymorphic qualifiers
//! - **[`visitor`]** - Assignability, overriding and validity checks
//! - **[`checkers`]** - The bundled determinism, format, index and must-call-on-elements systems
//! - **[`wpi`]** - Whole-program inference of missing annotations
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qualflow_core::prelude::*;
//!
//! # fn main() -> qualflow_core::Result<()> {
//! let module: HirModule = serde_json::from_str(&std::fs::read_to_string("Unit.json").unwrap()).unwrap();
//! let checker = Checker::new(CheckerOptions::default().with_checkers(["format"]))?;
//! for d in checker.check(&module)?.diagnostics {
//!     println!("{d}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod checker;
pub mod checkers;
pub mod config;
pub mod dataflow;
pub mod dependent;
pub mod diagnostics;
pub mod error;
pub mod factory;
pub mod hierarchy;
pub mod hir;
pub mod qualifier;
pub mod types;
pub mod visitor;
pub mod wpi;

pub use checker::{CheckReport, Checker, TypeSystem};
pub use config::CheckerOptions;
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use error::{CheckerError, Result};
pub use hir::HirModule;
pub use qualifier::Qualifier;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::checker::{CheckReport, Checker, TypeSystem};
    pub use crate::config::CheckerOptions;
    pub use crate::diagnostics::{Diagnostic, DiagnosticKind};
    pub use crate::error::{CheckerError, Result};
    pub use crate::hierarchy::{GraphHierarchy, HierarchyBuilder, QualifierHierarchy};
    pub use crate::hir::{HirBuilder, HirModule};
    pub use crate::qualifier::{Payload, Qualifier};
    pub use crate::types::{AnnotatedType, ClassTable};
    pub use crate::wpi::InferenceStorage;
}
