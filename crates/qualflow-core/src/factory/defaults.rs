//! Defaulting: which qualifier an unannotated position receives

use super::MethodType;
use crate::hierarchy::QualifierHierarchy;
use crate::hir::Literal;
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable, TypeKind};

/// Where a type is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeUseLocation {
    Field,
    Parameter,
    Return,
    Receiver,
    Local,
    TypeArgument,
    ArrayComponent,
    UpperBound,
    LowerBound,
    /// The type written in `new T(..)` or `new T[..]`
    NewObject,
    Other,
}

/// A type system's defaulting rules
pub trait DefaultingPolicy {
    /// Qualifier for an unannotated position of type `ty` at `location`
    fn default_qualifier(
        &self,
        h: &dyn QualifierHierarchy,
        classes: &ClassTable,
        location: TypeUseLocation,
        ty: &AnnotatedType,
    ) -> Qualifier;

    /// Qualifier of a literal, if it differs from the default for [`TypeUseLocation::Other`]
    fn literal_qualifier(&self, _h: &dyn QualifierHierarchy, _literal: &Literal) -> Option<Qualifier> {
        None
    }

    /// Last chance to rewrite a declared method's type after defaulting
    fn adjust_method_type(&self, _h: &dyn QualifierHierarchy, _method: &mut MethodType) {}

    /// Qualifiers whose string payloads are dependent expressions
    fn dependent_qualifiers(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Give every unannotated position of `ty` a qualifier of `h`
///
/// Type variables and wildcards without a primary annotation stay that way; their
/// bounds are defaulted instead. Lower bounds that are the null type become bottom.
pub fn apply_defaults<P: DefaultingPolicy + ?Sized>(
    ty: &mut AnnotatedType,
    location: TypeUseLocation,
    h: &dyn QualifierHierarchy,
    classes: &ClassTable,
    policy: &P,
) {
    let needs_primary = !matches!(
        ty.kind,
        TypeKind::TypeVar { .. } | TypeKind::Wildcard { .. } | TypeKind::Void
    );
    if needs_primary && ty.primary(h).is_none() {
        let q = if location == TypeUseLocation::LowerBound && ty.is_null() {
            h.bottom().clone()
        } else {
            policy.default_qualifier(h, classes, location, ty)
        };
        ty.annotations.push(q);
    }
    match &mut ty.kind {
        TypeKind::Declared { args, .. } => {
            for arg in args {
                apply_defaults(arg, TypeUseLocation::TypeArgument, h, classes, policy);
            }
        }
        TypeKind::Array(component) => {
            apply_defaults(component, TypeUseLocation::ArrayComponent, h, classes, policy)
        }
        TypeKind::TypeVar { upper, lower, .. } => {
            apply_defaults(upper, TypeUseLocation::UpperBound, h, classes, policy);
            apply_defaults(lower, TypeUseLocation::LowerBound, h, classes, policy);
        }
        TypeKind::Wildcard {
            extends,
            super_bound,
        } => {
            apply_defaults(extends, TypeUseLocation::UpperBound, h, classes, policy);
            apply_defaults(super_bound, TypeUseLocation::LowerBound, h, classes, policy);
        }
        TypeKind::Intersection(parts) => {
            for part in parts {
                apply_defaults(part, location, h, classes, policy);
            }
        }
        TypeKind::Primitive(_) | TypeKind::Null | TypeKind::Void => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::HierarchyBuilder;

    struct ByLocation;

    impl DefaultingPolicy for ByLocation {
        fn default_qualifier(
            &self,
            _h: &dyn QualifierHierarchy,
            _classes: &ClassTable,
            location: TypeUseLocation,
            _ty: &AnnotatedType,
        ) -> Qualifier {
            match location {
                TypeUseLocation::Local => Qualifier::new("Top"),
                _ => Qualifier::new("Bottom"),
            }
        }
    }

    #[test]
    fn test_defaults_reach_every_position() {
        let h = HierarchyBuilder::new("t")
            .qualifier("Top", &[])
            .qualifier("Bottom", &["Top"])
            .build()
            .unwrap();
        let classes = ClassTable::with_builtins();
        let mut ty = AnnotatedType::declared(
            "java.util.List",
            vec![AnnotatedType::wildcard(AnnotatedType::string())],
        );
        apply_defaults(&mut ty, TypeUseLocation::Local, &h, &classes, &ByLocation);

        assert_eq!(ty.primary(&h), Some(&Qualifier::new("Top")));
        let wildcard = &ty.type_args()[0];
        assert!(wildcard.primary(&h).is_none());
        assert_eq!(wildcard.effective(&h), Some(&Qualifier::new("Bottom")));
    }

    #[test]
    fn test_written_annotations_are_kept() {
        let h = HierarchyBuilder::new("t")
            .qualifier("Top", &[])
            .qualifier("Bottom", &["Top"])
            .build()
            .unwrap();
        let classes = ClassTable::with_builtins();
        let mut ty = AnnotatedType::string().with(Qualifier::new("Bottom"));
        apply_defaults(&mut ty, TypeUseLocation::Local, &h, &classes, &ByLocation);
        assert_eq!(ty.annotations.len(), 1);
        assert_eq!(ty.primary(&h), Some(&Qualifier::new("Bottom")));
    }
}
