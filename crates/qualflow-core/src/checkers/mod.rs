//! Bundled type systems

pub mod determinism;
pub mod format;
pub mod index;
pub mod mustcallonelements;

use crate::checker::TypeSystem;
use crate::error::{CheckerError, Result};
use crate::hierarchy::{GraphHierarchy, HierarchyBuilder};

/// The type systems a checker name stands for, in the order they must run
pub fn build(name: &str) -> Result<Vec<TypeSystem>> {
    Ok(match name {
        determinism::NAME => vec![determinism::system()?],
        format::NAME => vec![format::system()?],
        "index" => index::systems()?,
        index::value::NAME => vec![index::value::system()?],
        index::lowerbound::NAME => vec![index::lowerbound::system()?],
        index::upperbound::NAME => vec![index::upperbound::system()?],
        mustcallonelements::NAME => vec![mustcallonelements::system()?],
        other => return Err(CheckerError::UnknownChecker(other.to_string())),
    })
}

pub(crate) fn build_hierarchy(system: &str, builder: HierarchyBuilder) -> Result<GraphHierarchy> {
    builder.build().map_err(|source| CheckerError::Hierarchy {
        system: system.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_expands_in_order() {
        let systems = build("index").unwrap();
        let names: Vec<&str> = systems.iter().map(TypeSystem::name).collect();
        assert_eq!(names, vec!["value", "lowerbound", "upperbound"]);
    }

    #[test]
    fn test_unknown_checker() {
        let err = build("nullness").unwrap_err();
        assert!(matches!(err, CheckerError::UnknownChecker(name) if name == "nullness"));
    }

    #[test]
    fn test_every_bundled_hierarchy_builds() {
        for name in crate::config::ALL_CHECKERS {
            assert!(!build(name).unwrap().is_empty(), "{name}");
        }
    }
}
