use std::rc::Rc;
use std::sync::Arc;

use relic_asm::BranchKind;
use relic_types::{Qualifiers, SourceLocation};

use crate::ast::expression::Expression;
use crate::ast::type_expression::TypeExpression;

/// Preference for how far a branch should be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceHint {
    /// Let layout decide: long first, shrink when the distance allows.
    #[default]
    Default,
    /// Force the relative/short form; out-of-range distances are errors.
    Short,
    /// Force the absolute/long form.
    Long,
}

/// `#[name(args...)]` attached before a statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: Arc<str>,
    pub arguments: Vec<Expression>,
    pub location: SourceLocation,
}

/// One `name : Type` function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncParameter {
    pub name: Arc<str>,
    pub ty: TypeExpression,
    pub location: SourceLocation,
}

/// One enum member, with an optional explicit value.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumItem {
    pub name: Arc<str>,
    pub value: Option<Expression>,
    pub location: SourceLocation,
}

/// One struct or union member.
#[derive(Debug, Clone, PartialEq)]
pub struct StructItem {
    pub name: Arc<str>,
    pub ty: TypeExpression,
    pub location: SourceLocation,
}

/// Whether a record type lays its members out sequentially or overlapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructKind {
    Struct,
    Union,
}

/// A statement node produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    pub location: SourceLocation,
}

/// The closed universe of statement payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// Attributes applied to a single statement.
    Attribution {
        attributes: Vec<Attribute>,
        body: Box<Statement>,
    },
    /// `bank name [@ addr] : [kind; size];` — possibly several per
    /// statement, pairwise with their optional address expressions.
    Bank {
        names: Vec<Arc<str>>,
        addresses: Vec<Option<Expression>>,
        ty: TypeExpression,
    },
    /// `{ ... }`
    Block(Vec<Statement>),
    /// `goto`/`return`/`break`/`continue`, optionally conditional.
    Branch {
        distance_hint: DistanceHint,
        kind: BranchKind,
        destination: Option<Box<Expression>>,
        return_value: Option<Box<Expression>>,
        condition: Option<Box<Expression>>,
    },
    /// `config { key = value, ... }`
    Config { items: Vec<(Arc<str>, Expression)> },
    /// `do { ... } while (cond);`
    DoWhile {
        distance_hint: DistanceHint,
        body: Box<Statement>,
        condition: Box<Expression>,
    },
    /// `enum Name : Underlying { ... }`
    Enum {
        name: Arc<str>,
        underlying_type: TypeExpression,
        items: Vec<EnumItem>,
    },
    /// An expression evaluated for effect (assignment, call, `x++`, ...).
    ExpressionStatement(Box<Expression>),
    /// One parsed source file; the import manager splices every reachable
    /// file into the program before compilation starts.
    File {
        statements: Vec<Statement>,
        original_path: Arc<str>,
        canonical_path: Arc<str>,
        description: Arc<str>,
    },
    /// `for counter in sequence { ... }`
    For {
        distance_hint: DistanceHint,
        counter: Box<Expression>,
        sequence: Box<Expression>,
        body: Box<Statement>,
    },
    /// `[inline] [far] func name(params) [: return] { ... }`
    Func {
        far: bool,
        inline: bool,
        name: Arc<str>,
        parameters: Vec<FuncParameter>,
        return_type: Option<TypeExpression>,
        body: Rc<Statement>,
    },
    /// `if cond { ... } [else ...]`
    If {
        distance_hint: DistanceHint,
        condition: Box<Expression>,
        body: Box<Statement>,
        alternative: Option<Box<Statement>>,
    },
    /// `import "path";` — the referenced file becomes a recursive import
    /// edge of the enclosing module scope.
    ImportReference {
        original_path: Arc<str>,
        canonical_path: Arc<str>,
        description: Arc<str>,
    },
    /// `in bank [@ addr] { ... }`
    In {
        pieces: Vec<Arc<str>>,
        dest: Option<Box<Expression>>,
        body: Box<Statement>,
    },
    /// `inline for` — compile-time repetition of the body.
    InlineFor {
        name: Arc<str>,
        sequence: Box<Expression>,
        body: Box<Statement>,
    },
    /// `name:`
    Label { name: Arc<str>, far: bool },
    /// `let name = expr;` / `let name(params) = expr;`
    Let {
        name: Arc<str>,
        parameters: Vec<Arc<str>>,
        value: Box<Expression>,
    },
    /// `namespace Name { ... }`
    Namespace {
        name: Arc<str>,
        body: Box<Statement>,
    },
    /// `struct Name { ... }` / `union Name { ... }`
    Struct {
        kind: StructKind,
        name: Arc<str>,
        items: Vec<StructItem>,
    },
    /// `typealias Name = T;`
    TypeAlias { name: Arc<str>, ty: TypeExpression },
    /// `var`/`const`/`writeonly`/`extern` declarations; possibly several
    /// names per statement, pairwise with optional `@` addresses.
    Var {
        qualifiers: Qualifiers,
        names: Vec<Arc<str>>,
        addresses: Vec<Option<Expression>>,
        ty: Option<TypeExpression>,
        value: Option<Box<Expression>>,
    },
    /// `while cond { ... }`
    While {
        distance_hint: DistanceHint,
        condition: Box<Expression>,
        body: Box<Statement>,
    },
}

impl Statement {
    pub fn new(kind: StatementKind, location: SourceLocation) -> Statement {
        Statement { kind, location }
    }

    /// A short noun phrase for diagnostics, e.g. ``function `main` ``.
    pub fn description(&self) -> String {
        match &self.kind {
            StatementKind::Attribution { body, .. } => body.description(),
            StatementKind::Bank { names, .. } => match names.first() {
                Some(name) => format!("bank `{}`", name),
                None => "bank declaration".into(),
            },
            StatementKind::Block(..) => "block statement".into(),
            StatementKind::Branch { kind, .. } => format!("{:?} statement", kind).to_lowercase(),
            StatementKind::Config { .. } => "config directive".into(),
            StatementKind::DoWhile { .. } => "do-while statement".into(),
            StatementKind::Enum { name, .. } => format!("enum `{}`", name),
            StatementKind::ExpressionStatement(..) => "expression statement".into(),
            StatementKind::File { description, .. } => description.to_string(),
            StatementKind::For { .. } => "for statement".into(),
            StatementKind::Func { name, .. } => format!("function `{}`", name),
            StatementKind::If { .. } => "if statement".into(),
            StatementKind::ImportReference { description, .. } => description.to_string(),
            StatementKind::In { pieces, .. } => format!("in `{}` block", pieces.join(".")),
            StatementKind::InlineFor { .. } => "inline for statement".into(),
            StatementKind::Label { name, .. } => format!("label `{}`", name),
            StatementKind::Let { name, .. } => format!("let declaration `{}`", name),
            StatementKind::Namespace { name, .. } => format!("namespace `{}`", name),
            StatementKind::Struct { kind, name, .. } => match kind {
                StructKind::Struct => format!("struct `{}`", name),
                StructKind::Union => format!("union `{}`", name),
            },
            StatementKind::TypeAlias { name, .. } => format!("type alias `{}`", name),
            StatementKind::Var { qualifiers, names, .. } => {
                let noun = if qualifiers.contains(Qualifiers::CONST) {
                    "constant"
                } else {
                    "variable"
                };
                match names.first() {
                    Some(name) => format!("{} `{}`", noun, name),
                    None => format!("{} declaration", noun),
                }
            }
            StatementKind::While { .. } => "while statement".into(),
        }
    }
}
