use strum_macros::Display;

use crate::span::Span;

/// Declared type of a variable, parameter or function result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TypeName {
    Integer,
    Float,
    String,
    Key,
    Vector,
    Rotation,
    List,
}

impl TypeName {
    /// Map a type keyword to its type (`quaternion` is an alias of `rotation`)
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "integer" => Some(TypeName::Integer),
            "float" => Some(TypeName::Float),
            "string" => Some(TypeName::String),
            "key" => Some(TypeName::Key),
            "vector" => Some(TypeName::Vector),
            "rotation" | "quaternion" => Some(TypeName::Rotation),
            "list" => Some(TypeName::List),
            _ => None,
        }
    }
}

/// A name together with where it was written
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }
}

/// A whole script: globals, user functions and states
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub globals: Vec<GlobalItem>,
    pub states: Vec<StateDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlobalItem {
    Variable(VarDecl),
    Function(FunctionDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub ty: TypeName,
    pub name: Ident,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: TypeName,
    pub name: Ident,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub ret: Option<TypeName>,
    pub name: Ident,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

/// `default { ... }` or `state name { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct StateDecl {
    pub name: Ident,
    pub handlers: Vec<Handler>,
    pub span: Span,
}

impl StateDecl {
    pub fn is_default(&self) -> bool {
        self.name.name == "default"
    }
}

/// An event handler inside a state
#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    pub name: Ident,
    pub params: Vec<Param>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Empty,
    Decl(VarDecl),
    Expr(Expr),
    Block(Block),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Expr>,
        cond: Option<Expr>,
        step: Vec<Expr>,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    StateChange(Ident),
    Jump(Ident),
    Label(Ident),
}

/// Component selector for `.x`, `.y`, `.z` and `.s`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Field {
    X,
    Y,
    Z,
    S,
}

impl Field {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" => Some(Field::X),
            "y" => Some(Field::Y),
            "z" => Some(Field::Z),
            "s" => Some(Field::S),
            _ => None,
        }
    }
}

/// Assignable place: a variable or one component of it
#[derive(Debug, Clone, PartialEq)]
pub struct LValue {
    pub name: Ident,
    pub field: Option<Field>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum UnaryOp {
    #[strum(serialize = "-")]
    Neg,
    #[strum(serialize = "!")]
    Not,
    #[strum(serialize = "~")]
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BinaryOp {
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "/")]
    Div,
    #[strum(serialize = "%")]
    Mod,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "&")]
    BitAnd,
    #[strum(serialize = "|")]
    BitOr,
    #[strum(serialize = "^")]
    BitXor,
    #[strum(serialize = "<<")]
    Shl,
    #[strum(serialize = ">>")]
    Shr,
}

/// `=` or a compound assignment operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AssignOp {
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = "+=")]
    Add,
    #[strum(serialize = "-=")]
    Sub,
    #[strum(serialize = "*=")]
    Mul,
    #[strum(serialize = "/=")]
    Div,
    #[strum(serialize = "%=")]
    Mod,
}

impl AssignOp {
    /// The arithmetic part of a compound assignment
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Mod => Some(BinaryOp::Mod),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal exactly as written (decimal or `0x` hex)
    Integer(String),
    /// Float literal exactly as written (`1.`, `.5`, `2e3`, `1.5f` ...)
    Float(String),
    /// String literal with escapes already resolved
    Str(String),
    Ident(String),
    Vector(Vec<Expr>),
    Rotation(Vec<Expr>),
    List(Vec<Expr>),
    Call {
        name: Ident,
        args: Vec<Expr>,
    },
    Member {
        target: Box<Expr>,
        field: Field,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: LValue,
        value: Box<Expr>,
    },
    IncDec {
        target: LValue,
        increment: bool,
        prefix: bool,
    },
    Cast {
        ty: TypeName,
        operand: Box<Expr>,
    },
}
