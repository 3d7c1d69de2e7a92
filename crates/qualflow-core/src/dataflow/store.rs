//! Abstract stores
//!
//! A store maps flow expressions to the qualifier the analysis has proven for them at a
//! program point, plus named side tables of facts (for example "this expression was
//! sorted"). Expressions without an entry fall back to their declared type.

use super::expr::FlowExpr;
use crate::hierarchy::QualifierHierarchy;
use crate::qualifier::Qualifier;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The qualifier proven for one expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbstractValue {
    qualifier: Qualifier,
}

impl AbstractValue {
    pub fn new(qualifier: Qualifier) -> Self {
        Self { qualifier }
    }

    pub fn qualifier(&self) -> &Qualifier {
        &self.qualifier
    }

    pub fn least_upper_bound(&self, other: &AbstractValue, h: &dyn QualifierHierarchy) -> AbstractValue {
        AbstractValue::new(h.least_upper_bound(&self.qualifier, &other.qualifier))
    }

    pub fn is_subtype_of(&self, other: &AbstractValue, h: &dyn QualifierHierarchy) -> bool {
        h.is_subtype(&self.qualifier, &other.qualifier)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Store {
    values: BTreeMap<FlowExpr, AbstractValue>,
    side_tables: BTreeMap<String, BTreeSet<FlowExpr>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, expr: &FlowExpr) -> Option<&AbstractValue> {
        self.values.get(expr)
    }

    pub fn value(&self, expr: &FlowExpr) -> Option<&Qualifier> {
        self.values.get(expr).map(AbstractValue::qualifier)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.side_tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowExpr, &Qualifier)> {
        self.values.iter().map(|(k, v)| (k, v.qualifier()))
    }

    /// Replace whatever is known about `expr`
    pub fn insert_value(&mut self, expr: FlowExpr, q: Qualifier) {
        self.values.insert(expr, AbstractValue::new(q));
    }

    /// Meet `q` with what is already known about `expr`
    pub fn refine_value(&mut self, expr: FlowExpr, q: Qualifier, h: &dyn QualifierHierarchy) {
        let refined = match self.values.get(&expr) {
            Some(current) => h.greatest_lower_bound(current.qualifier(), &q),
            None => q,
        };
        self.values.insert(expr, AbstractValue::new(refined));
    }

    pub fn clear_value(&mut self, expr: &FlowExpr) {
        self.values.remove(expr);
        for facts in self.side_tables.values_mut() {
            facts.remove(expr);
        }
    }

    /// Forget every expression built from `expr`, such as `a[i]` after `i` changes
    pub fn clear_dependents(&mut self, expr: &FlowExpr) {
        self.values.retain(|k, _| !k.contains(expr));
        for facts in self.side_tables.values_mut() {
            facts.retain(|k| !k.contains(expr));
        }
    }

    /// Forget everything that reads the heap. Used after calls that may have side effects.
    pub fn clear_fields(&mut self) {
        self.values.retain(|k, _| !k.depends_on_heap());
        for facts in self.side_tables.values_mut() {
            facts.retain(|k| !k.depends_on_heap());
        }
    }

    pub fn add_fact(&mut self, table: &str, expr: FlowExpr) {
        self.side_tables.entry(table.to_string()).or_default().insert(expr);
    }

    pub fn has_fact(&self, table: &str, expr: &FlowExpr) -> bool {
        self.side_tables.get(table).is_some_and(|t| t.contains(expr))
    }

    /// Merge two stores at a join point. Only expressions known on both sides survive.
    pub fn least_upper_bound(&self, other: &Store, h: &dyn QualifierHierarchy) -> Store {
        let values = self
            .values
            .iter()
            .filter_map(|(k, v)| Some((k.clone(), v.least_upper_bound(other.values.get(k)?, h))))
            .collect();
        let side_tables = self
            .side_tables
            .iter()
            .filter_map(|(name, facts)| {
                let theirs = other.side_tables.get(name)?;
                let common: BTreeSet<FlowExpr> = facts.intersection(theirs).cloned().collect();
                (!common.is_empty()).then(|| (name.clone(), common))
            })
            .collect();
        Store { values, side_tables }
    }

    /// True when this store is no more precise than `other`: every fact recorded here
    /// also holds, at least as precisely, in `other`. Propagating `other` into a block
    /// whose input already satisfies this changes nothing.
    pub fn is_superset_of(&self, other: &Store, h: &dyn QualifierHierarchy) -> bool {
        let values_covered = self.values.iter().all(|(k, mine)| {
            other
                .values
                .get(k)
                .is_some_and(|theirs| theirs.is_subtype_of(mine, h))
        });
        let facts_covered = self
            .side_tables
            .iter()
            .all(|(name, facts)| facts.iter().all(|e| other.has_fact(name, e)));
        values_covered && facts_covered
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.iter().map(|(k, q)| format!("{} -> {}", k, q)).collect();
        write!(f, "{{{}}}", entries.join(", "))?;
        for (name, facts) in &self.side_tables {
            let facts: Vec<String> = facts.iter().map(ToString::to_string).collect();
            write!(f, " {}: [{}]", name, facts.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{GraphHierarchy, HierarchyBuilder};
    use proptest::prelude::*;

    fn det() -> GraphHierarchy {
        HierarchyBuilder::new("determinism")
            .qualifier("NonDet", &[])
            .qualifier("OrderNonDet", &["NonDet"])
            .qualifier("Det", &["OrderNonDet"])
            .build()
            .unwrap()
    }

    fn q(name: &str) -> Qualifier {
        Qualifier::new(name)
    }

    #[test]
    fn test_lub_keeps_common_keys() {
        let h = det();
        let mut a = Store::new();
        a.insert_value(FlowExpr::local("x"), q("Det"));
        a.insert_value(FlowExpr::local("y"), q("Det"));
        let mut b = Store::new();
        b.insert_value(FlowExpr::local("x"), q("OrderNonDet"));

        let merged = a.least_upper_bound(&b, &h);
        assert_eq!(merged.value(&FlowExpr::local("x")), Some(&q("OrderNonDet")));
        assert_eq!(merged.value(&FlowExpr::local("y")), None);
    }

    #[test]
    fn test_refine_takes_glb() {
        let h = det();
        let mut s = Store::new();
        s.insert_value(FlowExpr::local("x"), q("OrderNonDet"));
        s.refine_value(FlowExpr::local("x"), q("NonDet"), &h);
        assert_eq!(s.value(&FlowExpr::local("x")), Some(&q("OrderNonDet")));
        s.refine_value(FlowExpr::local("x"), q("Det"), &h);
        assert_eq!(s.value(&FlowExpr::local("x")), Some(&q("Det")));
    }

    #[test]
    fn test_clear_fields_keeps_locals() {
        let mut s = Store::new();
        s.insert_value(FlowExpr::local("x"), q("Det"));
        s.insert_value(FlowExpr::field(FlowExpr::This, "f"), q("Det"));
        s.add_fact("sorted", FlowExpr::field(FlowExpr::This, "f"));
        s.clear_fields();
        assert!(s.value(&FlowExpr::local("x")).is_some());
        assert!(s.value(&FlowExpr::field(FlowExpr::This, "f")).is_none());
        assert!(!s.has_fact("sorted", &FlowExpr::field(FlowExpr::This, "f")));
    }

    #[test]
    fn test_clear_dependents() {
        let mut s = Store::new();
        let elem = FlowExpr::ArrayElement {
            array: Box::new(FlowExpr::local("a")),
            index: Box::new(FlowExpr::local("i")),
        };
        s.insert_value(elem.clone(), q("Det"));
        s.insert_value(FlowExpr::local("i"), q("Det"));
        s.clear_dependents(&FlowExpr::local("i"));
        assert!(s.get(&elem).is_none());
        assert!(s.get(&FlowExpr::local("i")).is_some());
    }

    #[test]
    fn test_superset_means_less_precise() {
        let h = det();
        let mut loose = Store::new();
        loose.insert_value(FlowExpr::local("x"), q("NonDet"));
        let mut tight = loose.clone();
        tight.insert_value(FlowExpr::local("x"), q("Det"));
        tight.insert_value(FlowExpr::local("y"), q("Det"));

        assert!(loose.is_superset_of(&tight, &h));
        assert!(!tight.is_superset_of(&loose, &h));
        assert!(Store::new().is_superset_of(&tight, &h));
        assert_eq!(tight.to_string(), "{x -> @Det, y -> @Det}");
    }

    fn arb_store() -> impl Strategy<Value = Store> {
        let names = prop::sample::select(vec!["a", "b", "c", "d"]);
        let quals = prop::sample::select(vec!["NonDet", "OrderNonDet", "Det"]);
        prop::collection::vec((names, quals), 0..4).prop_map(|entries| {
            let mut s = Store::new();
            for (n, qn) in entries {
                s.insert_value(FlowExpr::local(n), Qualifier::new(qn));
            }
            s
        })
    }

    proptest! {
        #[test]
        fn prop_lub_covers_both_inputs(a in arb_store(), b in arb_store()) {
            let h = det();
            let merged = a.least_upper_bound(&b, &h);
            prop_assert!(merged.is_superset_of(&a, &h));
            prop_assert!(merged.is_superset_of(&b, &h));
            prop_assert_eq!(merged.clone(), b.least_upper_bound(&a, &h));
        }

        #[test]
        fn prop_superset_is_reflexive(a in arb_store()) {
            let h = det();
            prop_assert!(a.is_superset_of(&a, &h));
            prop_assert_eq!(a.least_upper_bound(&a, &h), a);
        }
    }
}
