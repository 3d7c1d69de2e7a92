//! Qualifier hierarchies
//!
//! Every type system owns one hierarchy: a finite-height lattice with a single top and a
//! single bottom. Fixpoint iteration over stores relies on the lattice laws holding for
//! every pair of owned qualifiers.

mod graph;

pub use graph::{GraphHierarchy, HierarchyBuilder};

use crate::qualifier::Qualifier;
use std::fmt;
use thiserror::Error;

/// Subtyping, LUB and GLB over the qualifiers of one type system
pub trait QualifierHierarchy: fmt::Debug {
    /// Name of the type system this hierarchy belongs to
    fn name(&self) -> &str;

    fn top(&self) -> &Qualifier;

    fn bottom(&self) -> &Qualifier;

    /// The polymorphic marker, if the hierarchy has one
    fn polymorphic(&self) -> Option<&Qualifier> {
        None
    }

    /// True if `q` belongs to this hierarchy
    fn owns(&self, q: &Qualifier) -> bool;

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool;

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier;

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier;

    /// True if `q` is the polymorphic marker, compared ignoring its payload
    fn is_polymorphic(&self, q: &Qualifier) -> bool {
        self.polymorphic().is_some_and(|p| p.same_name(q))
    }
}

/// Malformed hierarchy configuration. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("qualifier `{qualifier}` names unknown supertype `{parent}`")]
    UnknownParent { qualifier: String, parent: String },

    #[error("qualifier `{0}` is declared more than once")]
    Duplicate(String),

    #[error("subtyping cycle through `{0}`")]
    Cycle(String),

    #[error("expected exactly one top qualifier, found {}", describe(.0))]
    Tops(Vec<String>),

    #[error("expected exactly one bottom qualifier, found {}", describe(.0))]
    Bottoms(Vec<String>),

    #[error("`{a}` and `{b}` have no unique {bound}")]
    NotALattice {
        bound: &'static str,
        a: String,
        b: String,
    },
}

fn describe(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
