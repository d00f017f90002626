//! The tagged-variant intermediate representation consumed by the backend.
//!
//! A front end turns portable kernel source into a [ParsedFunction]; nothing
//! in this crate depends on the source grammar. Calls into the portable vector
//! vocabulary are ordinary [Expr::Call]s whose callee is spelled
//! `simd.<Op>` (e.g. `simd.Load`, `simd.MulAdd`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of the callee names in the portable vector vocabulary.
pub const VOCABULARY_PREFIX: &str = "simd.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFunction {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Vec<Ret>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
}

/// A declared result. Unnamed results are given positional names on lowering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ret {
    pub name: Option<String>,
    pub ty: ParamType,
}

/// The semantic type of a parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    ScalarInt,
    ScalarFloat,
    /// A slice of the kernel's element type.
    Array,
    /// A vector of the kernel's element type.
    Vector,
}

/// Source position, carried only by constructs the backend may reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Loc {
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `lhs op rhs`, covering `:=`, `=` and every compound assignment.
    Assign {
        lhs: Vec<Expr>,
        op: AssignOp,
        rhs: Vec<Expr>,
    },
    /// `var name T [= init]`.
    VarDecl {
        name: String,
        ty: DeclType,
        init: Option<Expr>,
    },
    IncDec {
        target: Expr,
        inc: bool,
    },
    Expr(Expr),
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    /// `for key, value := range over`, where `over` is an integer count or an
    /// array.
    Range {
        key: Option<String>,
        value: Option<String>,
        over: Expr,
        body: Vec<Stmt>,
    },
    If {
        init: Option<Box<Stmt>>,
        cond: Expr,
        then: Vec<Stmt>,
        /// Either another [Stmt::If] or a [Stmt::Block].
        els: Option<Box<Stmt>>,
    },
    Block(Vec<Stmt>),
    Return(Vec<Expr>),
    Break,
    Continue,
    /// A construct outside the kernel dialect, preserved so the backend can
    /// report it.
    Unsupported {
        kind: String,
        loc: Loc,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignOp {
    Define,
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndNot,
}

/// Declared type of a local variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclType {
    Int,
    Int32,
    Int64,
    Uint8,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Bool,
    /// The kernel's generic element type.
    Elem,
    Vector,
    Mask,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(String),
    Lit(Literal),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        base: Box<Expr>,
        lo: Option<Box<Expr>>,
        hi: Option<Box<Expr>>,
    },
    Field {
        base: Box<Expr>,
        field: String,
    },
    Paren(Box<Expr>),
    Deref(Box<Expr>),
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Unsupported {
        kind: String,
        loc: Loc,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    AndNot,
    LogAnd,
    LogOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
    Addr,
}

impl ParsedFunction {
    pub fn new(name: impl Into<String>) -> Self {
        ParsedFunction {
            name: name.into(),
            params: vec![],
            returns: vec![],
            body: vec![],
        }
    }

    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.params.push(Param {
            name: name.into(),
            ty,
        });
        self
    }

    pub fn returns(mut self, ty: ParamType) -> Self {
        self.returns.push(Ret { name: None, ty });
        self
    }

    pub fn body(mut self, body: Vec<Stmt>) -> Self {
        self.body = body;
        self
    }
}

impl Stmt {
    pub fn define(name: impl Into<String>, rhs: Expr) -> Self {
        Stmt::Assign {
            lhs: vec![Expr::ident(name)],
            op: AssignOp::Define,
            rhs: vec![rhs],
        }
    }

    pub fn assign(lhs: Expr, rhs: Expr) -> Self {
        Stmt::Assign {
            lhs: vec![lhs],
            op: AssignOp::Assign,
            rhs: vec![rhs],
        }
    }

    pub fn compound(op: AssignOp, lhs: Expr, rhs: Expr) -> Self {
        Stmt::Assign {
            lhs: vec![lhs],
            op,
            rhs: vec![rhs],
        }
    }

    pub fn var(name: impl Into<String>, ty: DeclType) -> Self {
        Stmt::VarDecl {
            name: name.into(),
            ty,
            init: None,
        }
    }

    pub fn incr(name: impl Into<String>) -> Self {
        Stmt::IncDec {
            target: Expr::ident(name),
            inc: true,
        }
    }

    /// `for name := start; name < bound; name += step { body }`
    pub fn counting_loop(
        name: &str,
        start: Expr,
        bound: Expr,
        step: Expr,
        body: Vec<Stmt>,
    ) -> Self {
        Stmt::For {
            init: Some(Box::new(Stmt::define(name, start))),
            cond: Some(Expr::binary(BinOp::Lt, Expr::ident(name), bound)),
            post: Some(Box::new(Stmt::compound(
                AssignOp::Add,
                Expr::ident(name),
                step,
            ))),
            body,
        }
    }

    pub fn is_loop(&self) -> bool {
        matches!(self, Stmt::For { .. } | Stmt::Range { .. })
    }

    /// Returns `true` if `name` is read or written anywhere in this statement.
    pub fn mentions(&self, name: &str) -> bool {
        let in_block = |b: &[Stmt]| b.iter().any(|s| s.mentions(name));
        match self {
            Stmt::Assign { lhs, rhs, .. } => {
                lhs.iter().chain(rhs).any(|e| e.mentions(name))
            }
            Stmt::VarDecl { name: n, init, .. } => {
                n == name || init.as_ref().is_some_and(|e| e.mentions(name))
            }
            Stmt::IncDec { target, .. } => target.mentions(name),
            Stmt::Expr(e) => e.mentions(name),
            Stmt::For {
                init,
                cond,
                post,
                body,
            } => {
                init.as_ref().is_some_and(|s| s.mentions(name))
                    || cond.as_ref().is_some_and(|e| e.mentions(name))
                    || post.as_ref().is_some_and(|s| s.mentions(name))
                    || in_block(body)
            }
            Stmt::Range {
                key,
                value,
                over,
                body,
            } => {
                key.as_deref() == Some(name)
                    || value.as_deref() == Some(name)
                    || over.mentions(name)
                    || in_block(body)
            }
            Stmt::If {
                init,
                cond,
                then,
                els,
            } => {
                init.as_ref().is_some_and(|s| s.mentions(name))
                    || cond.mentions(name)
                    || in_block(then)
                    || els.as_ref().is_some_and(|s| s.mentions(name))
            }
            Stmt::Block(b) => in_block(b),
            Stmt::Return(es) => es.iter().any(|e| e.mentions(name)),
            Stmt::Break | Stmt::Continue | Stmt::Unsupported { .. } => false,
        }
    }

    /// Calls `f` on this statement and every statement nested inside it,
    /// in source order.
    pub fn walk(&self, f: &mut dyn FnMut(&Stmt)) {
        f(self);
        let nested: Vec<&Stmt> = match self {
            Stmt::For {
                init, post, body, ..
            } => init
                .iter()
                .map(|s| s.as_ref())
                .chain(body)
                .chain(post.iter().map(|s| s.as_ref()))
                .collect(),
            Stmt::Range { body, .. } | Stmt::Block(body) => body.iter().collect(),
            Stmt::If {
                init, then, els, ..
            } => init
                .iter()
                .map(|s| s.as_ref())
                .chain(then)
                .chain(els.iter().map(|s| s.as_ref()))
                .collect(),
            _ => vec![],
        };
        for s in nested {
            s.walk(f);
        }
    }

    /// Expressions appearing directly in this statement, not in nested ones.
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Stmt::Assign { lhs, rhs, .. } => lhs.iter().chain(rhs).collect(),
            Stmt::VarDecl { init, .. } => init.iter().collect(),
            Stmt::IncDec { target, .. } => vec![target],
            Stmt::Expr(e) => vec![e],
            Stmt::For { cond, .. } => cond.iter().collect(),
            Stmt::Range { over, .. } => vec![over],
            Stmt::If { cond, .. } => vec![cond],
            Stmt::Return(es) => es.iter().collect(),
            Stmt::Block(_) | Stmt::Break | Stmt::Continue | Stmt::Unsupported { .. } => vec![],
        }
    }

    /// A short, human-readable name for the statement kind.
    pub fn kind_name(&self) -> &str {
        match self {
            Stmt::Assign { .. } => "assignment",
            Stmt::VarDecl { .. } => "declaration",
            Stmt::IncDec { .. } => "increment",
            Stmt::Expr(_) => "expression statement",
            Stmt::For { .. } => "for loop",
            Stmt::Range { .. } => "range loop",
            Stmt::If { .. } => "if",
            Stmt::Block(_) => "block",
            Stmt::Return(_) => "return",
            Stmt::Break => "break",
            Stmt::Continue => "continue",
            Stmt::Unsupported { kind, .. } => kind,
        }
    }
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn int(v: i64) -> Self {
        Expr::Lit(Literal::Int(v))
    }

    pub fn float(v: f64) -> Self {
        Expr::Lit(Literal::Float(v))
    }

    pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            func: func.into(),
            args,
        }
    }

    /// A call into the portable vector vocabulary, e.g. `Expr::simd("Load", ..)`.
    pub fn simd(op: &str, args: Vec<Expr>) -> Self {
        Expr::call(format!("{VOCABULARY_PREFIX}{op}"), args)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn index(base: Expr, index: Expr) -> Self {
        Expr::Index {
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    /// `base[lo:]`
    pub fn slice_from(base: Expr, lo: Expr) -> Self {
        Expr::Slice {
            base: Box::new(base),
            lo: Some(Box::new(lo)),
            hi: None,
        }
    }

    pub fn len_of(name: &str) -> Self {
        Expr::call("len", vec![Expr::ident(name)])
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(n) => Some(n),
            _ => None,
        }
    }

    /// Returns `(op, args)` if this is a call into the portable vocabulary.
    pub fn as_simd_call(&self) -> Option<(&str, &[Expr])> {
        match self {
            Expr::Call { func, args } => func
                .strip_prefix(VOCABULARY_PREFIX)
                .map(|op| (op, args.as_slice())),
            _ => None,
        }
    }

    /// Calls `f` on this expression and every subexpression, outermost first.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Ident(_) | Expr::Lit(_) | Expr::Unsupported { .. } => {}
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Unary { expr, .. } | Expr::Paren(expr) | Expr::Deref(expr) => expr.walk(f),
            Expr::Index { base, index } => {
                base.walk(f);
                index.walk(f);
            }
            Expr::Slice { base, lo, hi } => {
                base.walk(f);
                for e in lo.iter().chain(hi.iter()) {
                    e.walk(f);
                }
            }
            Expr::Field { base, .. } => base.walk(f),
            Expr::Call { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
        }
    }

    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Expr::Ident(n) => n == name,
            Expr::Lit(_) | Expr::Unsupported { .. } => false,
            Expr::Binary { lhs, rhs, .. } => lhs.mentions(name) || rhs.mentions(name),
            Expr::Unary { expr, .. } | Expr::Paren(expr) | Expr::Deref(expr) => {
                expr.mentions(name)
            }
            Expr::Index { base, index } => base.mentions(name) || index.mentions(name),
            Expr::Slice { base, lo, hi } => {
                base.mentions(name)
                    || lo.as_ref().is_some_and(|e| e.mentions(name))
                    || hi.as_ref().is_some_and(|e| e.mentions(name))
            }
            Expr::Field { base, .. } => base.mentions(name),
            Expr::Call { args, .. } => args.iter().any(|a| a.mentions(name)),
        }
    }
}

impl BinOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::LogAnd | BinOp::LogOr)
    }

    /// The C spelling. [BinOp::AndNot] is handled by the caller, since it
    /// needs a unary complement on its right operand.
    pub fn c_op(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And | BinOp::AndNot => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::LogAnd => "&&",
            BinOp::LogOr => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

impl AssignOp {
    /// The C compound-assignment spelling, or `None` for `:=`.
    pub fn c_op(&self) -> Option<&'static str> {
        match self {
            AssignOp::Define => None,
            AssignOp::Assign => Some("="),
            AssignOp::Add => Some("+="),
            AssignOp::Sub => Some("-="),
            AssignOp::Mul => Some("*="),
            AssignOp::Div => Some("/="),
            AssignOp::Rem => Some("%="),
            AssignOp::And | AssignOp::AndNot => Some("&="),
            AssignOp::Or => Some("|="),
            AssignOp::Xor => Some("^="),
            AssignOp::Shl => Some("<<="),
            AssignOp::Shr => Some(">>="),
        }
    }

    /// The binary operator a compound assignment applies, if any.
    pub fn binop(&self) -> Option<BinOp> {
        match self {
            AssignOp::Define | AssignOp::Assign => None,
            AssignOp::Add => Some(BinOp::Add),
            AssignOp::Sub => Some(BinOp::Sub),
            AssignOp::Mul => Some(BinOp::Mul),
            AssignOp::Div => Some(BinOp::Div),
            AssignOp::Rem => Some(BinOp::Rem),
            AssignOp::And => Some(BinOp::And),
            AssignOp::Or => Some(BinOp::Or),
            AssignOp::Xor => Some(BinOp::Xor),
            AssignOp::Shl => Some(BinOp::Shl),
            AssignOp::Shr => Some(BinOp::Shr),
            AssignOp::AndNot => Some(BinOp::AndNot),
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_simd_call_strips_prefix() {
        let e = Expr::simd("Load", vec![Expr::ident("a")]);
        let (op, args) = e.as_simd_call().unwrap();
        assert_eq!(op, "Load");
        assert_eq!(args, &[Expr::ident("a")]);
        assert!(Expr::call("len", vec![]).as_simd_call().is_none());
    }

    #[test]
    fn test_mentions_looks_through_loops_and_slices() {
        let s = Stmt::counting_loop(
            "i",
            Expr::int(0),
            Expr::len_of("a"),
            Expr::int(1),
            vec![Stmt::compound(
                AssignOp::Add,
                Expr::ident("sum"),
                Expr::index(Expr::slice_from(Expr::ident("b"), Expr::int(2)), Expr::ident("i")),
            )],
        );
        assert!(s.mentions("sum"));
        assert!(s.mentions("b"));
        assert!(s.mentions("a"));
        assert!(!s.mentions("c"));
    }

    #[test]
    fn test_walk_visits_nested_statements_and_calls() {
        let s = Stmt::Range {
            key: Some("i".into()),
            value: None,
            over: Expr::ident("n"),
            body: vec![Stmt::If {
                init: None,
                cond: Expr::binary(BinOp::Gt, Expr::len_of("a"), Expr::int(0)),
                then: vec![Stmt::Break],
                els: Some(Box::new(Stmt::Block(vec![Stmt::Continue]))),
            }],
        };
        let mut kinds = vec![];
        s.walk(&mut |s| kinds.push(s.kind_name().to_string()));
        assert_eq!(kinds, vec!["range loop", "if", "break", "block", "continue"]);

        let mut calls = 0;
        s.walk(&mut |s| {
            for e in s.exprs() {
                e.walk(&mut |e| calls += matches!(e, Expr::Call { .. }) as usize);
            }
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_function_survives_bincode() {
        let f = ParsedFunction::new("k")
            .param("a", ParamType::Array)
            .returns(ParamType::ScalarFloat)
            .body(vec![Stmt::Return(vec![Expr::float(1.5)])]);
        let bytes = bincode::serialize(&f).unwrap();
        let back: ParsedFunction = bincode::deserialize(&bytes).unwrap();
        assert_eq!(f, back);
    }
}
