//! Dependent type expressions
//!
//! Qualifiers such as `@LTLengthOf("arr")` carry expressions that refer to program
//! state. Before they are compared, the strings are parsed, standardized to the form the
//! store uses (`#1` becomes the parameter name, a bare field becomes `this.f`) and
//! constant-folded. An expression that cannot be parsed is not fatal: it is replaced by
//! an error string that travels inside the payload and is reported where it is used.

use crate::hir::{HirClass, HirField, HirMethod};
use crate::qualifier::{Payload, Qualifier};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependentExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected `{0}`")]
    Unexpected(String),
    #[error("parameter #{0} does not exist")]
    NoSuchParameter(usize),
    #[error("`{0}` is not in scope")]
    NotInScope(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependentExpr {
    Int(i64),
    This,
    Name(String),
    /// 1-based formal parameter reference, `#1`
    Param(usize),
    Field(Box<DependentExpr>, String),
    Length(Box<DependentExpr>),
    Neg(Box<DependentExpr>),
    Add(Box<DependentExpr>, Box<DependentExpr>),
    Sub(Box<DependentExpr>, Box<DependentExpr>),
}

impl fmt::Display for DependentExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependentExpr::Int(v) => write!(f, "{}", v),
            DependentExpr::This => f.write_str("this"),
            DependentExpr::Name(n) => f.write_str(n),
            DependentExpr::Param(i) => write!(f, "#{}", i),
            DependentExpr::Field(r, name) => write!(f, "{}.{}", r, name),
            DependentExpr::Length(r) => write!(f, "{}.length", r),
            DependentExpr::Neg(e) => write!(f, "-{}", e),
            DependentExpr::Add(a, b) => write!(f, "{} + {}", a, b),
            DependentExpr::Sub(a, b) => write!(f, "{} - {}", a, b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Param(usize),
    Dot,
    Plus,
    Minus,
    LParen,
    RParen,
}

fn tokenize(text: &str) -> Result<Vec<Token>, DependentExprError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '#' => {
                chars.next();
                let digits = take_while(&mut chars, |c| c.is_ascii_digit());
                let index = digits
                    .parse()
                    .map_err(|_| DependentExprError::Unexpected("#".to_string()))?;
                tokens.push(Token::Param(index));
            }
            c if c.is_ascii_digit() => {
                let digits = take_while(&mut chars, |c| c.is_ascii_digit());
                let value = digits
                    .parse()
                    .map_err(|_| DependentExprError::Unexpected(digits.clone()))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let ident = take_while(&mut chars, |c| c.is_alphanumeric() || c == '_' || c == '$');
                tokens.push(Token::Ident(ident));
            }
            other => return Err(DependentExprError::Unexpected(other.to_string())),
        }
    }
    Ok(tokens)
}

fn take_while(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    pred: impl Fn(char) -> bool,
) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !pred(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn sum(&mut self) -> Result<DependentExpr, DependentExprError> {
        let mut lhs = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    lhs = DependentExpr::Add(Box::new(lhs), Box::new(self.term()?));
                }
                Some(Token::Minus) => {
                    self.next();
                    lhs = DependentExpr::Sub(Box::new(lhs), Box::new(self.term()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn term(&mut self) -> Result<DependentExpr, DependentExprError> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            return Ok(DependentExpr::Neg(Box::new(self.term()?)));
        }
        let mut expr = match self.next() {
            Some(Token::Int(v)) => DependentExpr::Int(v),
            Some(Token::Param(i)) => DependentExpr::Param(i),
            Some(Token::Ident(name)) if name == "this" => DependentExpr::This,
            Some(Token::Ident(name)) => DependentExpr::Name(name),
            Some(Token::LParen) => {
                let inner = self.sum()?;
                match self.next() {
                    Some(Token::RParen) => inner,
                    Some(other) => return Err(DependentExprError::Unexpected(describe(&other))),
                    None => return Err(DependentExprError::UnexpectedEnd),
                }
            }
            Some(other) => return Err(DependentExprError::Unexpected(describe(&other))),
            None => return Err(DependentExprError::UnexpectedEnd),
        };
        while self.peek() == Some(&Token::Dot) {
            self.next();
            match self.next() {
                Some(Token::Ident(name)) if name == "length" => {
                    expr = DependentExpr::Length(Box::new(expr));
                }
                Some(Token::Ident(name)) => expr = DependentExpr::Field(Box::new(expr), name),
                Some(other) => return Err(DependentExprError::Unexpected(describe(&other))),
                None => return Err(DependentExprError::UnexpectedEnd),
            }
        }
        Ok(expr)
    }
}

fn describe(tok: &Token) -> String {
    match tok {
        Token::Ident(s) => s.clone(),
        Token::Int(v) => v.to_string(),
        Token::Param(i) => format!("#{}", i),
        Token::Dot => ".".into(),
        Token::Plus => "+".into(),
        Token::Minus => "-".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
    }
}

/// Parse a dependent expression such as `this.arr.length - 1` or `#2`
pub fn parse(text: &str) -> Result<DependentExpr, DependentExprError> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };
    let expr = parser.sum()?;
    match parser.next() {
        None => Ok(expr),
        Some(tok) => Err(DependentExprError::Unexpected(describe(&tok))),
    }
}

/// Names visible where a dependent expression is written
#[derive(Debug, Clone, Default)]
pub struct DependentContext {
    /// Enclosing class, the only one whose constants are folded
    pub class: String,
    pub params: Vec<String>,
    pub locals: Vec<String>,
    pub fields: Vec<String>,
}

impl DependentContext {
    pub fn for_class(class: &HirClass) -> Self {
        Self {
            class: class.name.clone(),
            fields: class.fields.iter().map(|f| f.name.clone()).collect(),
            ..Self::default()
        }
    }

    fn in_scope(&self, name: &str) -> bool {
        [&self.locals, &self.params, &self.fields]
            .into_iter()
            .any(|names| names.iter().any(|n| n == name))
    }

    pub fn for_method(class: &HirClass, method: &HirMethod) -> Self {
        Self {
            params: method.params.iter().map(|p| p.name.clone()).collect(),
            ..Self::for_class(class)
        }
    }
}

impl DependentExpr {
    /// Resolve parameter indices and implicit `this`
    pub fn standardize(self, cx: &DependentContext) -> Result<DependentExpr, DependentExprError> {
        Ok(match self {
            DependentExpr::Param(i) => {
                let name = i
                    .checked_sub(1)
                    .and_then(|idx| cx.params.get(idx))
                    .ok_or(DependentExprError::NoSuchParameter(i))?;
                DependentExpr::Name(name.clone())
            }
            DependentExpr::Name(name) => {
                if cx.locals.contains(&name) || cx.params.contains(&name) {
                    DependentExpr::Name(name)
                } else if cx.fields.contains(&name) {
                    DependentExpr::Field(Box::new(DependentExpr::This), name)
                } else {
                    return Err(DependentExprError::NotInScope(name));
                }
            }
            DependentExpr::Field(r, name) => match *r {
                // `Cls.f`, a static field of the enclosing class
                DependentExpr::Name(c) if c == cx.class && !cx.in_scope(&c) => {
                    DependentExpr::Field(Box::new(DependentExpr::Name(c)), name)
                }
                r => DependentExpr::Field(Box::new(r.standardize(cx)?), name),
            },
            DependentExpr::Length(r) => DependentExpr::Length(Box::new(r.standardize(cx)?)),
            DependentExpr::Neg(e) => DependentExpr::Neg(Box::new(e.standardize(cx)?)),
            DependentExpr::Add(a, b) => {
                DependentExpr::Add(Box::new(a.standardize(cx)?), Box::new(b.standardize(cx)?))
            }
            DependentExpr::Sub(a, b) => {
                DependentExpr::Sub(Box::new(a.standardize(cx)?), Box::new(b.standardize(cx)?))
            }
            leaf @ (DependentExpr::Int(_) | DependentExpr::This) => leaf,
        })
    }

    /// Fold integer terms, substituting the constant fields of `class`. Bare names are
    /// locals or parameters after standardization and are never substituted.
    pub fn optimize(self, class: &str, constants: &BTreeMap<String, i64>) -> DependentExpr {
        let mut terms = Vec::new();
        self.flatten(true, &mut terms);

        let mut constant = 0i64;
        let mut rest: Vec<(bool, DependentExpr)> = Vec::new();
        for (positive, term) in terms {
            let value = match &term {
                DependentExpr::Int(v) => Some(*v),
                DependentExpr::Field(r, n) => match &**r {
                    DependentExpr::This => constants.get(n).copied(),
                    DependentExpr::Name(c) if c == class => constants.get(n).copied(),
                    _ => None,
                },
                _ => None,
            };
            match value {
                Some(v) if positive => constant = constant.saturating_add(v),
                Some(v) => constant = constant.saturating_sub(v),
                None => rest.push((positive, term)),
            }
        }

        let mut out: Option<DependentExpr> = None;
        for (positive, term) in rest {
            out = Some(match (out, positive) {
                (None, true) => term,
                (None, false) => DependentExpr::Neg(Box::new(term)),
                (Some(acc), true) => DependentExpr::Add(Box::new(acc), Box::new(term)),
                (Some(acc), false) => DependentExpr::Sub(Box::new(acc), Box::new(term)),
            });
        }
        match out {
            None => DependentExpr::Int(constant),
            Some(acc) if constant > 0 => {
                DependentExpr::Add(Box::new(acc), Box::new(DependentExpr::Int(constant)))
            }
            Some(acc) if constant < 0 => {
                DependentExpr::Sub(Box::new(acc), Box::new(DependentExpr::Int(-constant)))
            }
            Some(acc) => acc,
        }
    }

    fn flatten(self, positive: bool, out: &mut Vec<(bool, DependentExpr)>) {
        match self {
            DependentExpr::Add(a, b) => {
                a.flatten(positive, out);
                b.flatten(positive, out);
            }
            DependentExpr::Sub(a, b) => {
                a.flatten(positive, out);
                b.flatten(!positive, out);
            }
            DependentExpr::Neg(e) => e.flatten(!positive, out),
            term => out.push((positive, term)),
        }
    }
}

/// An unparsable expression, carried as a string inside a qualifier payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentTypesError {
    pub expression: String,
    pub message: String,
}

const ERROR_PREFIX: &str = "[error for expression: ";

impl DependentTypesError {
    pub fn new(expression: &str, error: &DependentExprError) -> Self {
        Self {
            expression: expression.to_string(),
            message: error.to_string(),
        }
    }

    pub fn is_expression_error(text: &str) -> bool {
        text.starts_with(ERROR_PREFIX)
    }

    pub fn from_payload(text: &str) -> Option<Self> {
        let body = text.strip_prefix(ERROR_PREFIX)?.strip_suffix(']')?;
        let (expression, message) = body.split_once("; error: ")?;
        Some(Self {
            expression: expression.to_string(),
            message: message.to_string(),
        })
    }
}

impl fmt::Display for DependentTypesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}; error: {}]", ERROR_PREFIX, self.expression, self.message)
    }
}

/// Standardizes the string payloads of dependent qualifiers
#[derive(Debug, Clone, Default)]
pub struct DependentTypesHelper {
    /// Class name to its constant fields
    constants: BTreeMap<String, BTreeMap<String, i64>>,
}

impl DependentTypesHelper {
    pub fn new(constants: BTreeMap<String, BTreeMap<String, i64>>) -> Self {
        Self { constants }
    }

    /// `static final` fields with integer literal initializers, per class
    pub fn for_classes(classes: &[HirClass]) -> Self {
        let constants = classes
            .iter()
            .map(|c| {
                let fields = c
                    .fields
                    .iter()
                    .filter(|f| f.is_static && f.is_final)
                    .filter_map(|f| Some((f.name.clone(), f.init.as_ref()?.int_literal()?)))
                    .collect();
                (c.name.clone(), fields)
            })
            .collect();
        Self { constants }
    }

    pub fn standardize(&self, text: &str, cx: &DependentContext) -> String {
        if DependentTypesError::is_expression_error(text) {
            return text.to_string();
        }
        match parse(text).and_then(|e| e.standardize(cx)) {
            Ok(expr) => {
                let none = BTreeMap::new();
                let constants = self.constants.get(&cx.class).unwrap_or(&none);
                expr.optimize(&cx.class, constants).to_string()
            }
            Err(err) => DependentTypesError::new(text, &err).to_string(),
        }
    }

    /// Standardize every expression of a string-list qualifier, keeping the list sorted
    pub fn standardize_qualifier(&self, q: &Qualifier, cx: &DependentContext) -> Qualifier {
        match q.payload() {
            Payload::Strings(values) => {
                let mut out: Vec<String> = values.iter().map(|v| self.standardize(v, cx)).collect();
                out.sort();
                out.dedup();
                Qualifier::with_strings(q.name(), out)
            }
            _ => q.clone(),
        }
    }

    /// Errors embedded in a qualifier's payload
    pub fn errors(q: &Qualifier) -> Vec<DependentTypesError> {
        q.strings()
            .iter()
            .filter_map(|s| DependentTypesError::from_payload(s))
            .collect()
    }
}

/// `@HasSubsequence(subsequence = .., from = .., to = ..)` on an array field: the
/// subsequence object views `array[from..to]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subsequence {
    pub array: String,
    pub from: String,
    pub to: String,
}

impl Subsequence {
    pub fn from_field(field: &HirField) -> Option<Subsequence> {
        let anno = field.annotations.iter().find(|a| a.name == "HasSubsequence")?;
        Some(Subsequence {
            array: anno.str_arg("subsequence")?.to_string(),
            from: anno.str_arg("from")?.to_string(),
            to: anno.str_arg("to")?.to_string(),
        })
    }

    /// Standardize all three expressions in the declaring class's scope
    pub fn standardized(&self, helper: &DependentTypesHelper, cx: &DependentContext) -> Subsequence {
        Subsequence {
            array: helper.standardize(&self.array, cx),
            from: helper.standardize(&self.from, cx),
            to: helper.standardize(&self.to, cx),
        }
    }

    pub fn errors(&self) -> Vec<DependentTypesError> {
        [&self.array, &self.from, &self.to]
            .into_iter()
            .filter_map(|s| DependentTypesError::from_payload(s))
            .collect()
    }

    /// Negate an additive expression by flipping signs. Multiplication is not understood.
    pub fn negate_string(s: &str) -> String {
        let (mut out, rest) = match s.strip_prefix('-') {
            Some(rest) => (String::new(), rest),
            None => ("-".to_string(), s),
        };
        out.extend(rest.chars().map(|c| match c {
            '+' => '-',
            '-' => '+',
            other => other,
        }));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{AnnotationArg, DeclAnnotation, HirBuilder};
    use crate::types::{AnnotatedType, PrimitiveKind};

    fn cx() -> DependentContext {
        DependentContext {
            class: "Pool".into(),
            params: vec!["a".into(), "n".into()],
            locals: vec!["i".into()],
            fields: vec!["arr".into(), "size".into()],
        }
    }

    #[test]
    fn test_parse_and_display() {
        let e = parse("this.arr.length - 1").unwrap();
        assert_eq!(e.to_string(), "this.arr.length - 1");
        assert_eq!(parse("#2").unwrap(), DependentExpr::Param(2));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("a +"), Err(DependentExprError::UnexpectedEnd));
        assert!(matches!(parse("a * b"), Err(DependentExprError::Unexpected(_))));
        assert!(matches!(parse("(a"), Err(DependentExprError::UnexpectedEnd)));
    }

    #[test]
    fn test_standardize_params_and_fields() {
        let helper = DependentTypesHelper::default();
        assert_eq!(helper.standardize("#1", &cx()), "a");
        assert_eq!(helper.standardize("arr", &cx()), "this.arr");
        assert_eq!(helper.standardize("i", &cx()), "i");
        assert_eq!(helper.standardize("arr.length", &cx()), "this.arr.length");
    }

    fn pool_constants(fields: &[(&str, i64)]) -> DependentTypesHelper {
        let fields = fields.iter().map(|(n, v)| (n.to_string(), *v)).collect();
        DependentTypesHelper::new(BTreeMap::from([("Pool".to_string(), fields)]))
    }

    #[test]
    fn test_optimize_folds_constants() {
        let helper = pool_constants(&[("size", 4)]);
        assert_eq!(helper.standardize("i + 1 - 1", &cx()), "i");
        assert_eq!(helper.standardize("size + 2", &cx()), "6");
        assert_eq!(helper.standardize("Pool.size - 1", &cx()), "3");
        assert_eq!(helper.standardize("i - 3 + 1", &cx()), "i - 2");
    }

    #[test]
    fn test_parameter_shadows_constant_of_same_name() {
        let helper = pool_constants(&[("n", 4)]);
        assert_eq!(helper.standardize("n + 1", &cx()), "n + 1");
        let other_class = DependentContext {
            class: "Other".into(),
            ..cx()
        };
        assert_eq!(pool_constants(&[("size", 4)]).standardize("size", &other_class), "this.size");
    }

    #[test]
    fn test_only_static_final_literals_are_constants() {
        let b = HirBuilder::new();
        let int = || AnnotatedType::primitive(PrimitiveKind::Int);
        let mut counter = b.field_decl("count", int());
        counter.is_static = true;
        counter.init = Some(b.int(3));
        let pool = b.class("Pool", vec![b.constant_decl("size", int(), b.int(4)), counter], vec![]);
        let other = b.class("Other", vec![b.constant_decl("limit", int(), b.int(9))], vec![]);
        let helper = DependentTypesHelper::for_classes(&[pool.clone(), other]);
        let cx = DependentContext::for_class(&pool);
        assert_eq!(helper.standardize("size - 1", &cx), "3");
        assert_eq!(helper.standardize("count", &cx), "this.count");
        assert!(DependentTypesError::is_expression_error(&helper.standardize("limit", &cx)));
    }

    #[test]
    fn test_unparsable_becomes_error_payload() {
        let helper = DependentTypesHelper::default();
        let out = helper.standardize("#7", &cx());
        assert!(DependentTypesError::is_expression_error(&out));
        let err = DependentTypesError::from_payload(&out).unwrap();
        assert_eq!(err.expression, "#7");
        assert!(err.message.contains("#7"));
        // already-encoded errors are left alone
        assert_eq!(helper.standardize(&out, &cx()), out);
    }

    #[test]
    fn test_standardize_qualifier_sorts() {
        let helper = DependentTypesHelper::default();
        let q = Qualifier::with_strings("LTLengthOf", ["#1", "arr", "a"]);
        let std = helper.standardize_qualifier(&q, &cx());
        assert_eq!(std.strings(), ["a", "this.arr"]);
    }

    #[test]
    fn test_subsequence_from_field() {
        let b = HirBuilder::new();
        let mut field = b.field_decl(
            "data",
            AnnotatedType::array(AnnotatedType::primitive(PrimitiveKind::Int)),
        );
        field.annotations.push(
            DeclAnnotation::new("HasSubsequence")
                .arg("from", AnnotationArg::Str("f".into()))
                .arg("to", AnnotationArg::Str("t".into()))
                .arg("subsequence", AnnotationArg::Str("arr".into())),
        );
        let sub = Subsequence::from_field(&field).unwrap();
        assert_eq!(sub.array, "arr");
        assert_eq!(sub.from, "f");
        assert_eq!(sub.to, "t");
    }

    #[test]
    fn test_negate_string() {
        assert_eq!(Subsequence::negate_string("i+1"), "-i-1");
        assert_eq!(Subsequence::negate_string("-start"), "start");
        assert_eq!(Subsequence::negate_string("a - b"), "-a + b");
        assert_eq!(Subsequence::negate_string("2*x"), "-2*x");
    }
}
