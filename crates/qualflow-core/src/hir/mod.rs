//! Host-language tree model
//!
//! The front end (parser, name resolution, erasure) is an external collaborator. It hands
//! the checker an already-resolved tree: every statement and expression carries the
//! identity of its syntax node and a source line, calls carry the resolved method
//! signature, and written types carry whatever qualifiers appeared in the source.

mod builder;

pub use builder::HirBuilder;

use crate::types::AnnotatedType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a syntax node. Side tables key on this, never on structural equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
}

impl Span {
    pub fn line(line: u32) -> Self {
        Self { line }
    }
}

/// One compilation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirModule {
    pub file: String,
    pub classes: Vec<HirClass>,
}

impl HirModule {
    pub fn class(&self, name: &str) -> Option<&HirClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Resolve a call target declared in this unit
    pub fn method(&self, sig: &MethodSig) -> Option<(&HirClass, &HirMethod)> {
        let class = self.class(&sig.owner)?;
        let method = class.methods.iter().find(|m| m.signature(&class.name) == *sig)?;
        Some((class, method))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Interface,
    Enum,
    Annotation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirClass {
    pub name: String,
    pub kind: ClassKind,
    #[serde(default)]
    pub supertypes: Vec<String>,
    #[serde(default)]
    pub annotations: Vec<DeclAnnotation>,
    #[serde(default)]
    pub fields: Vec<HirField>,
    #[serde(default)]
    pub methods: Vec<HirMethod>,
    #[serde(default)]
    pub span: Span,
}

impl HirClass {
    pub fn field(&self, name: &str) -> Option<&HirField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirField {
    pub name: String,
    pub ty: AnnotatedType,
    #[serde(default)]
    pub annotations: Vec<DeclAnnotation>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub init: Option<HirExpr>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirParam {
    pub name: String,
    pub ty: AnnotatedType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirMethod {
    pub name: String,
    #[serde(default)]
    pub params: Vec<HirParam>,
    pub ret_type: AnnotatedType,
    /// Explicit receiver annotation, if written
    #[serde(default)]
    pub receiver: Option<AnnotatedType>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub annotations: Vec<DeclAnnotation>,
    /// `None` for abstract and interface methods
    #[serde(default)]
    pub body: Option<Vec<HirStmt>>,
    #[serde(default)]
    pub span: Span,
}

impl HirMethod {
    pub fn signature(&self, owner: &str) -> MethodSig {
        MethodSig {
            owner: owner.to_string(),
            name: self.name.clone(),
            params: self.params.iter().map(|p| p.ty.erased_name()).collect(),
        }
    }

    pub fn has_annotation(&self, name: &str) -> bool {
        self.annotations.iter().any(|a| a.name == name)
    }
}

/// Declaration annotation such as `@HasSubsequence(...)` or `@SuppressWarnings(...)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclAnnotation {
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, AnnotationArg>,
}

impl DeclAnnotation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, key: &str, value: AnnotationArg) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }

    pub fn str_arg(&self, key: &str) -> Option<&str> {
        match self.args.get(key)? {
            AnnotationArg::Str(s) => Some(s),
            _ => None,
        }
    }

    /// A string or string-list argument, as a list
    pub fn strings_arg(&self, key: &str) -> Vec<String> {
        match self.args.get(key) {
            Some(AnnotationArg::Str(s)) => vec![s.clone()],
            Some(AnnotationArg::Strings(v)) => v.clone(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnotationArg {
    Str(String),
    Strings(Vec<String>),
    Int(i64),
}

/// Resolved method identity: declaring type, name and erased parameter types
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodSig {
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl MethodSig {
    pub fn new(owner: &str, name: &str, params: &[&str]) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.owner, self.name, self.params.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirStmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Local {
        name: String,
        ty: AnnotatedType,
        init: Option<HirExpr>,
    },
    Assign {
        target: HirExpr,
        value: HirExpr,
    },
    Expr(HirExpr),
    If {
        cond: HirExpr,
        then_body: Vec<HirStmt>,
        else_body: Option<Vec<HirStmt>>,
    },
    While {
        cond: HirExpr,
        body: Vec<HirStmt>,
    },
    For {
        init: Vec<HirStmt>,
        cond: Option<HirExpr>,
        update: Vec<HirStmt>,
        body: Vec<HirStmt>,
    },
    Return(Option<HirExpr>),
    Break,
    Continue,
    Block(Vec<HirStmt>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HirExpr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    Var(String),
    This,
    Field {
        receiver: Box<HirExpr>,
        name: String,
    },
    ArrayAccess {
        array: Box<HirExpr>,
        index: Box<HirExpr>,
    },
    ArrayLength(Box<HirExpr>),
    Binary {
        op: BinOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    /// `receiver` is `None` for static calls and calls on the implicit `this`
    Call {
        receiver: Option<Box<HirExpr>>,
        method: MethodSig,
        args: Vec<HirExpr>,
        ret_type: AnnotatedType,
    },
    New {
        ty: AnnotatedType,
        args: Vec<HirExpr>,
    },
    NewArray {
        ty: AnnotatedType,
        length: Option<Box<HirExpr>>,
        elements: Vec<HirExpr>,
    },
    Cast {
        ty: AnnotatedType,
        expr: Box<HirExpr>,
    },
    InstanceOf {
        expr: Box<HirExpr>,
        ty: AnnotatedType,
    },
    Conditional {
        cond: Box<HirExpr>,
        then_expr: Box<HirExpr>,
        else_expr: Box<HirExpr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    BitAnd,
    BitOr,
}

impl BinOp {
    pub fn is_relational(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnaryOp {
    pub fn is_increment(self) -> bool {
        matches!(self, UnaryOp::PreInc | UnaryOp::PostInc)
    }

    pub fn is_update(self) -> bool {
        matches!(
            self,
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec
        )
    }
}

impl HirExpr {
    /// Strip casts that do not change the value, e.g. `(Object[]) null`
    pub fn skip_casts(&self) -> &HirExpr {
        match &self.kind {
            ExprKind::Cast { expr, .. } => expr.skip_casts(),
            _ => self,
        }
    }

    pub fn as_var(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Var(name) => Some(name),
            _ => None,
        }
    }

    pub fn int_literal(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::Literal(Literal::Int(v)) => Some(*v),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => operand.int_literal().map(|v| -v),
            _ => None,
        }
    }

    pub fn is_null_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal(Literal::Null))
    }
}
