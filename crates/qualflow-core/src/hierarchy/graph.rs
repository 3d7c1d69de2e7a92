//! Hierarchies defined by a subtyping graph over qualifier names

use super::{HierarchyError, QualifierHierarchy};
use crate::qualifier::Qualifier;
use indexmap::IndexMap;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Declares qualifiers and their direct supertypes, then validates the result as a lattice
#[derive(Debug, Clone)]
pub struct HierarchyBuilder {
    name: String,
    declared: IndexMap<String, Vec<String>>,
    polymorphic: Option<String>,
    duplicate: Option<String>,
}

impl HierarchyBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared: IndexMap::new(),
            polymorphic: None,
            duplicate: None,
        }
    }

    /// Declare `name` with its direct supertypes. Tops have no supertypes.
    pub fn qualifier(mut self, name: &str, supertypes: &[&str]) -> Self {
        if self.declared.contains_key(name) && self.duplicate.is_none() {
            self.duplicate = Some(name.to_string());
        }
        self.declared.insert(
            name.to_string(),
            supertypes.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Declare the polymorphic qualifier. It is placed directly below top and above bottom.
    pub fn polymorphic(mut self, name: &str) -> Self {
        self.polymorphic = Some(name.to_string());
        self
    }

    pub fn build(self) -> Result<GraphHierarchy, HierarchyError> {
        if let Some(dup) = self.duplicate {
            return Err(HierarchyError::Duplicate(dup));
        }
        if let Some(poly) = &self.polymorphic {
            if self.declared.contains_key(poly) {
                return Err(HierarchyError::Duplicate(poly.clone()));
            }
        }
        for (qualifier, parents) in &self.declared {
            if let Some(parent) = parents.iter().find(|p| !self.declared.contains_key(*p)) {
                return Err(HierarchyError::UnknownParent {
                    qualifier: qualifier.clone(),
                    parent: parent.clone(),
                });
            }
        }

        // Edges point from subtype to supertype.
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: IndexMap<String, NodeIndex> = IndexMap::new();
        for name in self.declared.keys() {
            nodes.insert(name.clone(), graph.add_node(name.clone()));
        }
        for (qualifier, parents) in &self.declared {
            for parent in parents {
                graph.add_edge(nodes[qualifier], nodes[parent], ());
            }
        }
        if let Err(cycle) = toposort(&graph, None) {
            return Err(HierarchyError::Cycle(graph[cycle.node_id()].clone()));
        }

        let tops = extremes(&graph, Direction::Outgoing);
        if tops.len() != 1 {
            return Err(HierarchyError::Tops(tops));
        }
        let bottoms = extremes(&graph, Direction::Incoming);
        if bottoms.len() != 1 {
            return Err(HierarchyError::Bottoms(bottoms));
        }
        let top = nodes[&tops[0]];
        let bottom = nodes[&bottoms[0]];

        let mut poly = None;
        if let Some(name) = &self.polymorphic {
            let idx = graph.add_node(name.clone());
            graph.add_edge(idx, top, ());
            graph.add_edge(bottom, idx, ());
            nodes.insert(name.clone(), idx);
            poly = Some(idx.index());
        }

        let n = graph.node_count();
        let mut supers = vec![vec![false; n]; n];
        for (i, row) in supers.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = i == j
                    || has_path_connecting(&graph, NodeIndex::new(i), NodeIndex::new(j), None);
            }
        }

        let names: Vec<String> = (0..n).map(|i| graph[NodeIndex::new(i)].clone()).collect();
        let lub = bound_table(&supers, &names, true)?;
        let glb = bound_table(&supers, &names, false)?;

        Ok(GraphHierarchy {
            name: self.name,
            index: names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect(),
            qualifiers: names.into_iter().map(Qualifier::new).collect(),
            supers,
            lub,
            glb,
            top: top.index(),
            bottom: bottom.index(),
            poly,
        })
    }
}

fn extremes(graph: &DiGraph<String, ()>, dir: Direction) -> Vec<String> {
    graph
        .node_indices()
        .filter(|&idx| graph.neighbors_directed(idx, dir).next().is_none())
        .map(|idx| graph[idx].clone())
        .collect()
}

/// Precompute the unique least upper (or greatest lower) bound of every pair
fn bound_table(
    supers: &[Vec<bool>],
    names: &[String],
    upper: bool,
) -> Result<Vec<Vec<usize>>, HierarchyError> {
    let n = supers.len();
    let above = |a: usize, b: usize| if upper { supers[a][b] } else { supers[b][a] };

    let mut table = vec![vec![0; n]; n];
    for i in 0..n {
        for j in 0..n {
            let common: Vec<usize> = (0..n).filter(|&k| above(i, k) && above(j, k)).collect();
            let tightest: Vec<usize> = common
                .iter()
                .copied()
                .filter(|&k| !common.iter().any(|&m| m != k && above(m, k)))
                .collect();
            match tightest.as_slice() {
                [only] => table[i][j] = *only,
                _ => {
                    return Err(HierarchyError::NotALattice {
                        bound: if upper {
                            "least upper bound"
                        } else {
                            "greatest lower bound"
                        },
                        a: names[i].clone(),
                        b: names[j].clone(),
                    })
                }
            }
        }
    }
    Ok(table)
}

/// A lattice over payload-free qualifiers. Payloads are ignored for ordering purposes.
#[derive(Debug, Clone)]
pub struct GraphHierarchy {
    name: String,
    qualifiers: Vec<Qualifier>,
    index: HashMap<String, usize>,
    supers: Vec<Vec<bool>>,
    lub: Vec<Vec<usize>>,
    glb: Vec<Vec<usize>>,
    top: usize,
    bottom: usize,
    poly: Option<usize>,
}

impl GraphHierarchy {
    /// All declared qualifiers, in declaration order with the polymorphic marker last
    pub fn qualifiers(&self) -> &[Qualifier] {
        &self.qualifiers
    }

    /// The payload-free qualifier registered under `name`
    pub fn canonical(&self, name: &str) -> Option<&Qualifier> {
        self.index.get(name).map(|&i| &self.qualifiers[i])
    }

    fn index_of(&self, q: &Qualifier) -> Option<usize> {
        self.index.get(q.name()).copied()
    }
}

impl QualifierHierarchy for GraphHierarchy {
    fn name(&self) -> &str {
        &self.name
    }

    fn top(&self) -> &Qualifier {
        &self.qualifiers[self.top]
    }

    fn bottom(&self) -> &Qualifier {
        &self.qualifiers[self.bottom]
    }

    fn polymorphic(&self) -> Option<&Qualifier> {
        self.poly.map(|i| &self.qualifiers[i])
    }

    fn owns(&self, q: &Qualifier) -> bool {
        self.index.contains_key(q.name())
    }

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool {
        match (self.index_of(sub), self.index_of(sup)) {
            (Some(a), Some(b)) => self.supers[a][b],
            _ => false,
        }
    }

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if a == b {
            return a.clone();
        }
        match (self.index_of(a), self.index_of(b)) {
            (Some(i), Some(j)) if i == j => self.qualifiers[i].clone(),
            (Some(i), Some(j)) if self.supers[i][j] => b.clone(),
            (Some(i), Some(j)) if self.supers[j][i] => a.clone(),
            (Some(i), Some(j)) => self.qualifiers[self.lub[i][j]].clone(),
            _ => self.top().clone(),
        }
    }

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if a == b {
            return a.clone();
        }
        match (self.index_of(a), self.index_of(b)) {
            (Some(i), Some(j)) if i == j => self.qualifiers[i].clone(),
            (Some(i), Some(j)) if self.supers[i][j] => a.clone(),
            (Some(i), Some(j)) if self.supers[j][i] => b.clone(),
            (Some(i), Some(j)) => self.qualifiers[self.glb[i][j]].clone(),
            _ => self.bottom().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn diamond() -> GraphHierarchy {
        HierarchyBuilder::new("diamond")
            .qualifier("Top", &[])
            .qualifier("Left", &["Top"])
            .qualifier("Right", &["Top"])
            .qualifier("Bottom", &["Left", "Right"])
            .polymorphic("Poly")
            .build()
            .unwrap()
    }

    fn q(name: &str) -> Qualifier {
        Qualifier::new(name)
    }

    #[test]
    fn test_top_bottom_and_poly() {
        let h = diamond();
        assert_eq!(h.top(), &q("Top"));
        assert_eq!(h.bottom(), &q("Bottom"));
        assert_eq!(h.polymorphic(), Some(&q("Poly")));
        assert!(h.is_subtype(&q("Poly"), &q("Top")));
        assert!(h.is_subtype(&q("Bottom"), &q("Poly")));
        assert!(!h.is_subtype(&q("Poly"), &q("Left")));
    }

    #[test]
    fn test_lub_and_glb_of_incomparable() {
        let h = diamond();
        assert_eq!(h.least_upper_bound(&q("Left"), &q("Right")), q("Top"));
        assert_eq!(h.greatest_lower_bound(&q("Left"), &q("Right")), q("Bottom"));
        assert_eq!(h.least_upper_bound(&q("Poly"), &q("Left")), q("Top"));
    }

    #[test]
    fn test_poly_payload_compared_ignoring_values() {
        let h = diamond();
        let up = Qualifier::with_str("Poly", "up");
        let down = Qualifier::with_str("Poly", "down");
        assert!(h.is_subtype(&up, &down));
        assert!(h.is_subtype(&up, &q("Poly")));
        assert_eq!(h.least_upper_bound(&up, &down), q("Poly"));
        assert_eq!(h.least_upper_bound(&down, &up), q("Poly"));
        assert_eq!(h.least_upper_bound(&up, &q("Bottom")), up);
    }

    #[test]
    fn test_multiple_tops_rejected() {
        let err = HierarchyBuilder::new("bad")
            .qualifier("A", &[])
            .qualifier("B", &[])
            .qualifier("C", &["A", "B"])
            .build()
            .unwrap_err();
        assert_eq!(err, HierarchyError::Tops(vec!["A".into(), "B".into()]));
        assert!(err.to_string().contains("exactly one top"));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let err = HierarchyBuilder::new("bad")
            .qualifier("A", &["Missing"])
            .build()
            .unwrap_err();
        assert!(matches!(err, HierarchyError::UnknownParent { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = HierarchyBuilder::new("bad")
            .qualifier("A", &["B"])
            .qualifier("B", &["A"])
            .build()
            .unwrap_err();
        assert!(matches!(err, HierarchyError::Cycle(_)));
    }

    #[test]
    fn test_non_lattice_rejected() {
        let err = HierarchyBuilder::new("bowtie")
            .qualifier("Top", &[])
            .qualifier("A", &["Top"])
            .qualifier("B", &["Top"])
            .qualifier("C", &["A", "B"])
            .qualifier("D", &["A", "B"])
            .qualifier("Bottom", &["C", "D"])
            .build()
            .unwrap_err();
        assert!(matches!(err, HierarchyError::NotALattice { .. }));
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = HierarchyBuilder::new("dup")
            .qualifier("A", &[])
            .qualifier("A", &[])
            .build()
            .unwrap_err();
        assert_eq!(err, HierarchyError::Duplicate("A".into()));
    }

    proptest! {
        #[test]
        fn prop_lub_is_upper_bound_and_commutative(i in 0usize..5, j in 0usize..5) {
            let h = diamond();
            let a = h.qualifiers()[i].clone();
            let b = h.qualifiers()[j].clone();
            let lub = h.least_upper_bound(&a, &b);
            prop_assert!(h.is_subtype(&a, &lub));
            prop_assert!(h.is_subtype(&b, &lub));
            prop_assert_eq!(lub.clone(), h.least_upper_bound(&b, &a));
            if h.is_subtype(&a, &b) {
                prop_assert_eq!(lub, b);
            }
        }

        #[test]
        fn prop_glb_is_lower_bound(i in 0usize..5, j in 0usize..5) {
            let h = diamond();
            let a = h.qualifiers()[i].clone();
            let b = h.qualifiers()[j].clone();
            let glb = h.greatest_lower_bound(&a, &b);
            prop_assert!(h.is_subtype(&glb, &a));
            prop_assert!(h.is_subtype(&glb, &b));
        }
    }
}
