//! Annotated types
//!
//! The qualifier-decorated structural type of an expression or declaration. Every
//! component (type argument, array component, type-variable bound) carries its own
//! annotations. A single type can hold qualifiers of several hierarchies at once; each
//! type system only looks at the ones its hierarchy owns.

mod classes;

pub use classes::{ClassInfo, ClassTable};

use crate::hierarchy::QualifierHierarchy;
use crate::qualifier::Qualifier;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

pub type AnnotationSet = SmallVec<[Qualifier; 2]>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotatedType {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub annotations: AnnotationSet,
    pub kind: TypeKind,
}

fn is_empty(set: &AnnotationSet) -> bool {
    set.is_empty()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Primitive(PrimitiveKind),
    Declared {
        name: String,
        #[serde(default)]
        args: Vec<AnnotatedType>,
    },
    Array(Box<AnnotatedType>),
    TypeVar {
        name: String,
        upper: Box<AnnotatedType>,
        lower: Box<AnnotatedType>,
    },
    Wildcard {
        extends: Box<AnnotatedType>,
        super_bound: Box<AnnotatedType>,
    },
    Intersection(Vec<AnnotatedType>),
    Null,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
        }
    }

    pub fn boxed(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "java.lang.Boolean",
            PrimitiveKind::Byte => "java.lang.Byte",
            PrimitiveKind::Char => "java.lang.Character",
            PrimitiveKind::Short => "java.lang.Short",
            PrimitiveKind::Int => "java.lang.Integer",
            PrimitiveKind::Long => "java.lang.Long",
            PrimitiveKind::Float => "java.lang.Float",
            PrimitiveKind::Double => "java.lang.Double",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "boolean" => PrimitiveKind::Boolean,
            "byte" => PrimitiveKind::Byte,
            "char" => PrimitiveKind::Char,
            "short" => PrimitiveKind::Short,
            "int" => PrimitiveKind::Int,
            "long" => PrimitiveKind::Long,
            "float" => PrimitiveKind::Float,
            "double" => PrimitiveKind::Double,
            _ => return None,
        })
    }
}

impl AnnotatedType {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            annotations: AnnotationSet::new(),
            kind,
        }
    }

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::new(TypeKind::Primitive(kind))
    }

    pub fn declared(name: &str, args: Vec<AnnotatedType>) -> Self {
        Self::new(TypeKind::Declared {
            name: name.to_string(),
            args,
        })
    }

    pub fn array(component: AnnotatedType) -> Self {
        Self::new(TypeKind::Array(Box::new(component)))
    }

    pub fn type_var(name: &str, upper: AnnotatedType) -> Self {
        Self::new(TypeKind::TypeVar {
            name: name.to_string(),
            upper: Box::new(upper),
            lower: Box::new(AnnotatedType::null()),
        })
    }

    pub fn wildcard(extends: AnnotatedType) -> Self {
        Self::new(TypeKind::Wildcard {
            extends: Box::new(extends),
            super_bound: Box::new(AnnotatedType::null()),
        })
    }

    pub fn null() -> Self {
        Self::new(TypeKind::Null)
    }

    pub fn void() -> Self {
        Self::new(TypeKind::Void)
    }

    pub fn string() -> Self {
        Self::declared("java.lang.String", Vec::new())
    }

    pub fn object() -> Self {
        Self::declared("java.lang.Object", Vec::new())
    }

    /// Reconstruct an unannotated type from an erased name such as `int[]`
    pub fn from_erased(name: &str) -> Self {
        if let Some(component) = name.strip_suffix("[]") {
            return Self::array(Self::from_erased(component));
        }
        match PrimitiveKind::from_name(name) {
            Some(kind) => Self::primitive(kind),
            None if name == "void" => Self::void(),
            None => Self::declared(name, Vec::new()),
        }
    }

    /// Add a qualifier, builder style
    pub fn with(mut self, q: Qualifier) -> Self {
        self.annotations.push(q);
        self
    }

    /// The primary qualifier belonging to `h`
    pub fn primary(&self, h: &dyn QualifierHierarchy) -> Option<&Qualifier> {
        self.annotations.iter().find(|q| h.owns(q))
    }

    /// The primary qualifier or, for type variables and wildcards without one, the
    /// qualifier of the upper bound
    pub fn effective(&self, h: &dyn QualifierHierarchy) -> Option<&Qualifier> {
        if let Some(q) = self.primary(h) {
            return Some(q);
        }
        match &self.kind {
            TypeKind::TypeVar { upper, .. } => upper.effective(h),
            TypeKind::Wildcard { extends, .. } => extends.effective(h),
            TypeKind::Intersection(parts) => parts.iter().find_map(|p| p.effective(h)),
            _ => None,
        }
    }

    /// Effective qualifier, falling back to top
    pub fn qualifier(&self, h: &dyn QualifierHierarchy) -> Qualifier {
        self.effective(h).cloned().unwrap_or_else(|| h.top().clone())
    }

    /// Replace whatever qualifier of `h` this type carries
    pub fn replace_annotation(&mut self, q: Qualifier, h: &dyn QualifierHierarchy) {
        self.annotations.retain(|a| !h.owns(a));
        self.annotations.push(q);
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|q| q.is(name))
    }

    /// Copy of this type keeping only the qualifiers of `h`, at every depth
    pub fn restricted_to(&self, h: &dyn QualifierHierarchy) -> AnnotatedType {
        let mut ty = self.clone();
        ty.for_each_mut(&mut |t| t.annotations.retain(|q| h.owns(q)));
        ty
    }

    /// Visit this type and every component type, outermost first
    pub fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut AnnotatedType)) {
        f(self);
        match &mut self.kind {
            TypeKind::Declared { args, .. } => args.iter_mut().for_each(|a| a.for_each_mut(f)),
            TypeKind::Array(component) => component.for_each_mut(f),
            TypeKind::TypeVar { upper, lower, .. } => {
                upper.for_each_mut(f);
                lower.for_each_mut(f);
            }
            TypeKind::Wildcard {
                extends,
                super_bound,
            } => {
                extends.for_each_mut(f);
                super_bound.for_each_mut(f);
            }
            TypeKind::Intersection(parts) => parts.iter_mut().for_each(|p| p.for_each_mut(f)),
            TypeKind::Primitive(_) | TypeKind::Null | TypeKind::Void => {}
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, TypeKind::Primitive(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, TypeKind::Array(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, TypeKind::Null)
    }

    pub fn component(&self) -> Option<&AnnotatedType> {
        match &self.kind {
            TypeKind::Array(component) => Some(component),
            _ => None,
        }
    }

    pub fn type_args(&self) -> &[AnnotatedType] {
        match &self.kind {
            TypeKind::Declared { args, .. } => args,
            _ => &[],
        }
    }

    /// Name of the declared class, if this is a declared type
    pub fn class_name(&self) -> Option<&str> {
        match &self.kind {
            TypeKind::Declared { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Erased name as used in method signatures
    pub fn erased_name(&self) -> String {
        match &self.kind {
            TypeKind::Primitive(p) => p.name().to_string(),
            TypeKind::Declared { name, .. } => name.clone(),
            TypeKind::Array(component) => format!("{}[]", component.erased_name()),
            TypeKind::TypeVar { upper, .. } => upper.erased_name(),
            TypeKind::Wildcard { extends, .. } => extends.erased_name(),
            TypeKind::Intersection(parts) => parts
                .first()
                .map(AnnotatedType::erased_name)
                .unwrap_or_else(|| "java.lang.Object".to_string()),
            TypeKind::Null => "null".to_string(),
            TypeKind::Void => "void".to_string(),
        }
    }

    /// Class name after boxing primitives, used for argument-category checks
    pub fn boxed_name(&self) -> Option<String> {
        match &self.kind {
            TypeKind::Primitive(p) => Some(p.boxed().to_string()),
            TypeKind::Declared { name, .. } => Some(name.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for AnnotatedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let annos = || -> String {
            self.annotations
                .iter()
                .map(|q| format!("{} ", q))
                .collect::<String>()
        };
        match &self.kind {
            TypeKind::Array(component) => {
                let annos = annos();
                if annos.is_empty() {
                    write!(f, "{}[]", component)
                } else {
                    write!(f, "{} {}[]", component, annos.trim_end())
                }
            }
            TypeKind::Declared { name, args } => {
                let short = name.rsplit('.').next().unwrap_or(name);
                write!(f, "{}{}", annos(), short)?;
                if !args.is_empty() {
                    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                    write!(f, "<{}>", args.join(", "))?;
                }
                Ok(())
            }
            TypeKind::Wildcard { extends, .. } => write!(f, "{}? extends {}", annos(), extends),
            TypeKind::TypeVar { name, .. } => write!(f, "{}{}", annos(), name),
            TypeKind::Intersection(parts) => {
                let parts: Vec<String> = parts.iter().map(ToString::to_string).collect();
                write!(f, "{}{}", annos(), parts.join(" & "))
            }
            _ => write!(f, "{}{}", annos(), self.erased_name()),
        }
    }
}
