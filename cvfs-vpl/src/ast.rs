//! Syntax tree for VPL programs.

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Var(String),
    List(Vec<Expr>),
    Index { target: Box<Expr>, index: Box<Expr> },
    Call { function: String, args: Vec<Arg> },
}

/// Call argument, positional or `name=value`
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `NAME = EXPR`
    Assign { name: String, value: Expr },
    /// `NAME.append(EXPR)`
    Append { name: String, value: Expr },
    /// `FOR NAME IN EXPR:` + indented body
    For { var: String, iterable: Expr, body: Vec<Stmt> },
    /// `IF EXPR > EXPR:` + indented body
    If { lhs: Expr, rhs: Expr, body: Vec<Stmt> },
    /// `RETURN [EXPR]`
    Return(Option<Expr>),
    /// A bare expression, evaluated for its side effects
    Expr(Expr),
    /// A line that failed to lex or parse; reported when execution reaches it
    Invalid { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// 1-based source line
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}
