//! Format string type system
//!
//! A `@Format([..])` string is a valid format string whose specifiers expect arguments of
//! the listed categories. String literals get their qualifier by parsing; calls to
//! formatting methods are checked against the categories of their format argument.

mod category;
mod hierarchy;
mod parser;

pub use category::ConversionCategory;
pub use hierarchy::FormatHierarchy;
pub use parser::FormatParser;

use super::build_hierarchy;
use crate::checker::TypeSystem;
use crate::dataflow::RefinementRules;
use crate::error::{CheckerError, Result};
use crate::factory::{DefaultingPolicy, TypeUseLocation};
use crate::hierarchy::{HierarchyBuilder, QualifierHierarchy};
use crate::hir::{ExprKind, HirExpr, Literal, MethodSig};
use crate::qualifier::Qualifier;
use crate::types::{AnnotatedType, ClassTable};
use crate::visitor::{ConsistencyRules, VisitContext};
use hierarchy::format_qualifier;

pub const NAME: &str = "format";

pub const UNKNOWN_FORMAT: &str = "UnknownFormat";
pub const FORMAT: &str = "Format";
pub const INVALID_FORMAT: &str = "InvalidFormat";
pub const FORMAT_BOTTOM: &str = "FormatBottom";

/// Annotation marking a method whose first `String` parameter is a format string
pub const FORMAT_METHOD: &str = "FormatMethod";

const MISSING_FORMAT: &str = "(is a @Format annotation missing?)";

pub fn hierarchy() -> Result<FormatHierarchy> {
    let graph = build_hierarchy(
        NAME,
        HierarchyBuilder::new(NAME)
            .qualifier(UNKNOWN_FORMAT, &[])
            .qualifier(FORMAT, &[UNKNOWN_FORMAT])
            .qualifier(INVALID_FORMAT, &[UNKNOWN_FORMAT])
            .qualifier(FORMAT_BOTTOM, &[FORMAT, INVALID_FORMAT]),
    )?;
    Ok(FormatHierarchy::new(graph))
}

pub fn system() -> Result<TypeSystem> {
    let parser = FormatParser::new().map_err(|e| CheckerError::internal(NAME, e.to_string()))?;
    Ok(TypeSystem::new(NAME, Box::new(hierarchy()?), Box::new(FormatRules { parser })))
}

/// How the arguments after the format string reach the formatter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationType {
    /// Arguments passed one by one
    Vararg,
    /// A single array holds the arguments
    Array,
    /// A single null array (`null` or `(Object[]) null`)
    NullArray,
}

#[derive(Debug)]
pub struct FormatRules {
    parser: FormatParser,
}

impl FormatRules {
    /// Position of the format string among the arguments of `call`, if it formats
    fn format_index(cx: &VisitContext<'_, '_, '_>, sig: &MethodSig) -> Option<usize> {
        let library = matches!(
            (sig.owner.as_str(), sig.name.as_str()),
            ("java.lang.String", "format")
                | ("java.io.PrintStream", "printf" | "format")
                | ("java.util.Formatter", "format")
        );
        let annotated = cx
            .factory()
            .module()
            .method(sig)
            .is_some_and(|(_, m)| m.has_annotation(FORMAT_METHOD));
        if !library && !annotated {
            return None;
        }
        let skip = usize::from(sig.params.first().is_some_and(|p| p == "java.util.Locale"));
        sig.params
            .iter()
            .skip(skip)
            .position(|p| p == "java.lang.String")
            .map(|i| i + skip)
    }

    fn invocation_type(cx: &VisitContext<'_, '_, '_>, args: &[HirExpr]) -> InvocationType {
        let [only] = args else {
            return InvocationType::Vararg;
        };
        let ty = cx.types().type_of(only);
        if only.skip_casts().is_null_literal() && (ty.is_array() || ty.is_null()) {
            InvocationType::NullArray
        } else if ty.is_array() {
            InvocationType::Array
        } else {
            InvocationType::Vararg
        }
    }

    fn accepts(classes: &ClassTable, category: ConversionCategory, arg: &AnnotatedType) -> bool {
        let (Some(types), Some(boxed)) = (category.types(), arg.boxed_name()) else {
            return true;
        };
        types.iter().any(|t| classes.is_subclass(&boxed, t))
    }

    fn check_arguments(
        cx: &mut VisitContext<'_, '_, '_>,
        call: &HirExpr,
        categories: &[ConversionCategory],
        args: &[HirExpr],
    ) {
        match Self::invocation_type(cx, args) {
            InvocationType::Vararg => {
                if args.len() < categories.len() {
                    cx.warning(
                        "format.missing.arguments",
                        call.span,
                        format!("expected {} arguments, found {}", categories.len(), args.len()),
                    );
                } else if args.len() > categories.len() {
                    cx.warning(
                        "format.excess.arguments",
                        call.span,
                        format!("expected {} arguments, found {}", categories.len(), args.len()),
                    );
                }
                let classes = cx.classes();
                for (i, (category, arg)) in categories.iter().zip(args).enumerate() {
                    match category {
                        ConversionCategory::Unused => {
                            cx.warning("format.argument.unused", arg.span, format!("argument {}", i + 1))
                        }
                        ConversionCategory::Null => {
                            cx.error("format.specifier.null", arg.span, format!("argument {}", i + 1))
                        }
                        ConversionCategory::General => {}
                        _ => {
                            if arg.is_null_literal() {
                                continue;
                            }
                            let ty = cx.types().type_of(arg);
                            if !Self::accepts(classes, *category, &ty) {
                                cx.error(
                                    "argument.type.incompatible",
                                    arg.span,
                                    format!("in varargs position: found {}, required {}", ty.erased_name(), category),
                                );
                            }
                        }
                    }
                }
            }
            InvocationType::Array | InvocationType::NullArray => {
                let span = args.first().map_or(call.span, |a| a.span);
                for category in categories {
                    match category {
                        ConversionCategory::Null => cx.error("format.specifier.null", span, ""),
                        ConversionCategory::Unused => cx.warning("format.argument.unused", span, ""),
                        _ => {}
                    }
                }
                cx.warning("format.indirect.arguments", span, "");
            }
        }
    }
}

impl DefaultingPolicy for FormatRules {
    fn default_qualifier(
        &self,
        h: &dyn QualifierHierarchy,
        _classes: &ClassTable,
        _location: TypeUseLocation,
        _ty: &AnnotatedType,
    ) -> Qualifier {
        h.top().clone()
    }

    fn literal_qualifier(&self, _h: &dyn QualifierHierarchy, literal: &Literal) -> Option<Qualifier> {
        let Literal::Str(text) = literal else {
            return None;
        };
        Some(match self.parser.categories(text) {
            Ok(categories) => format_qualifier(categories),
            Err(message) => Qualifier::with_str(INVALID_FORMAT, message),
        })
    }
}

impl RefinementRules for FormatRules {}

impl ConsistencyRules for FormatRules {
    fn check_call(&self, cx: &mut VisitContext<'_, '_, '_>, call: &HirExpr) {
        let ExprKind::Call { method, args, .. } = &call.kind else {
            return;
        };
        let Some(index) = Self::format_index(cx, method) else {
            return;
        };
        let Some(format) = args.get(index) else {
            return;
        };
        let q = cx.types().qualifier_of(format);
        if q.is(FORMAT) {
            let categories = q.categories().to_vec();
            Self::check_arguments(cx, call, &categories, &args[index + 1..]);
        } else if q.is(INVALID_FORMAT) {
            let message = q.str_value().unwrap_or_default().to_string();
            cx.error("format.string.invalid", format.span, message);
        } else if !q.is(FORMAT_BOTTOM) {
            cx.error("format.string.invalid", format.span, MISSING_FORMAT);
        }
    }
}
