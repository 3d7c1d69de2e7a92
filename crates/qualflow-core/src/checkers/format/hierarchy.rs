use super::{ConversionCategory, FORMAT, INVALID_FORMAT};
use crate::hierarchy::{GraphHierarchy, QualifierHierarchy};
use crate::qualifier::{Payload, Qualifier};

/// Format-string qualifiers. `Format` compares its category lists and
/// `InvalidFormat` merges its messages; everything else follows the graph.
#[derive(Debug, Clone)]
pub struct FormatHierarchy {
    graph: GraphHierarchy,
}

impl FormatHierarchy {
    pub fn new(graph: GraphHierarchy) -> Self {
        Self { graph }
    }
}

pub(super) fn format_qualifier(categories: Vec<ConversionCategory>) -> Qualifier {
    Qualifier::with_payload(FORMAT, Payload::Categories(categories))
}

fn merge_messages(a: &Qualifier, b: &Qualifier, joiner: &str) -> Qualifier {
    let left = a.str_value().unwrap_or_default();
    let right = b.str_value().unwrap_or_default();
    if left == right || left.contains(right) {
        return a.clone();
    }
    if right.contains(left) {
        return b.clone();
    }
    Qualifier::with_str(INVALID_FORMAT, format!("({} {} {})", left, joiner, right))
}

impl QualifierHierarchy for FormatHierarchy {
    fn name(&self) -> &str {
        self.graph.name()
    }

    fn top(&self) -> &Qualifier {
        self.graph.top()
    }

    fn bottom(&self) -> &Qualifier {
        self.graph.bottom()
    }

    fn owns(&self, q: &Qualifier) -> bool {
        self.graph.owns(q)
    }

    fn is_subtype(&self, sub: &Qualifier, sup: &Qualifier) -> bool {
        if sub.is(FORMAT) && sup.is(FORMAT) {
            let (subs, sups) = (sub.categories(), sup.categories());
            return subs.len() == sups.len() && sups.iter().zip(subs).all(|(p, b)| p.is_subset_of(*b));
        }
        self.graph.is_subtype(sub, sup)
    }

    fn least_upper_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if a.is(FORMAT) && b.is(FORMAT) {
            let (x, y) = (a.categories(), b.categories());
            if x.len() != y.len() {
                return self.top().clone();
            }
            let merged = x.iter().zip(y).map(|(p, q)| ConversionCategory::intersect(*p, *q)).collect();
            return format_qualifier(merged);
        }
        if a.is(INVALID_FORMAT) && b.is(INVALID_FORMAT) {
            return merge_messages(a, b, "or");
        }
        self.graph.least_upper_bound(a, b)
    }

    fn greatest_lower_bound(&self, a: &Qualifier, b: &Qualifier) -> Qualifier {
        if a.is(FORMAT) && b.is(FORMAT) {
            let (x, y) = (a.categories(), b.categories());
            if x.len() != y.len() {
                return self.bottom().clone();
            }
            let merged = x.iter().zip(y).map(|(p, q)| ConversionCategory::union(*p, *q)).collect();
            return format_qualifier(merged);
        }
        if a.is(INVALID_FORMAT) && b.is(INVALID_FORMAT) {
            return merge_messages(a, b, "and");
        }
        self.graph.greatest_lower_bound(a, b)
    }
}
