//! Syntax tree
//!
//! Produced by the parser, walked by the interpreter. Function bodies are
//! shared (`Rc<FnDef>`) between the tree and every closure created from them.

use std::rc::Rc;

use crate::error::{SourceLocation, WardenError};

/// Line/column of a token, both 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

/// Named piece of source text, kept alive by every function defined in it
#[derive(Debug)]
pub struct SourceText {
    pub name: String,
    pub text: String,
}

impl SourceText {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        SourceText { name: name.into(), text: text.into() }
    }

    pub fn line(&self, line: u32) -> Option<&str> {
        self.text.lines().nth(line.checked_sub(1)? as usize)
    }

    pub fn location(&self, pos: Pos) -> SourceLocation {
        SourceLocation { source: self.name.clone(), line: pos.line, column: pos.column }
    }

    /// Source error at `pos`, quoting the offending line.
    pub fn error(&self, pos: Pos, message: impl Into<String>) -> WardenError {
        WardenError::source_error(
            self.location(pos),
            message,
            self.line(pos.line).map(str::to_string),
        )
    }
}

/// Parsed unit of source, ready to run
#[derive(Debug, Clone)]
pub struct Program {
    pub source: Rc<SourceText>,
    pub body: Rc<[Stmt]>,
    /// Names declared with `export`, in declaration order
    pub exports: Vec<String>,
}

#[derive(Debug)]
pub struct FnDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Debug)]
pub enum StmtKind {
    Let { name: String, init: Option<Expr> },
    Export { name: String, init: Expr },
    Fn { name: String, def: Rc<FnDef> },
    Assign { target: Expr, value: Expr },
    If { cond: Expr, then: Vec<Stmt>, otherwise: Option<Vec<Stmt>> },
    While { cond: Expr, body: Vec<Stmt> },
    Return(Option<Expr>),
    Throw(Expr),
    Try { body: Vec<Stmt>, binding: String, handler: Vec<Stmt> },
    Expr(Expr),
}

#[derive(Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Debug)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Ident(String),
    List(Vec<Expr>),
    Record(Vec<(String, Expr)>),
    Member { object: Box<Expr>, name: String },
    Index { object: Box<Expr>, index: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Function(Rc<FnDef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}
