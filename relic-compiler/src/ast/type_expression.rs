use std::sync::Arc;

use relic_types::{DefinitionId, Qualifiers, SourceLocation};

use crate::ast::expression::Expression;

/// A type expression node. Like expressions, children are owned and clone
/// is deep.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpression {
    pub kind: TypeExpressionKind,
    pub location: SourceLocation,
}

/// The closed universe of type expression payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpressionKind {
    /// `[T; n]`, or `[T]` with a size inferred from an initializer.
    Array {
        element_type: Box<TypeExpression>,
        size: Option<Box<Expression>>,
    },
    /// `T in holder` — a value of type `T` stored in the named register.
    DesignatedStorage {
        element_type: Box<TypeExpression>,
        holder: Box<Expression>,
    },
    /// `[far] func(params) [: return]`
    Function {
        far: bool,
        parameter_types: Vec<TypeExpression>,
        return_type: Option<Box<TypeExpression>>,
    },
    /// A dotted, not yet resolved type path.
    Identifier(Vec<Arc<str>>),
    /// `*T`, `*const T`, `far *T`, ...
    Pointer {
        element_type: Box<TypeExpression>,
        qualifiers: Qualifiers,
    },
    /// A type path bound to its definition.
    ResolvedIdentifier(DefinitionId),
    /// `(A, B, C)`; the empty tuple is the unit type.
    Tuple(Vec<TypeExpression>),
    /// `typeof(expr)`
    TypeOf(Box<Expression>),
}

impl TypeExpression {
    pub fn new(kind: TypeExpressionKind, location: SourceLocation) -> TypeExpression {
        TypeExpression { kind, location }
    }

    /// The unit type `()`.
    pub fn unit(location: SourceLocation) -> TypeExpression {
        TypeExpression::new(TypeExpressionKind::Tuple(Vec::new()), location)
    }

    /// A resolved reference to a type definition.
    pub fn resolved(id: DefinitionId, location: SourceLocation) -> TypeExpression {
        TypeExpression::new(TypeExpressionKind::ResolvedIdentifier(id), location)
    }

    pub fn as_resolved_identifier(&self) -> Option<DefinitionId> {
        match &self.kind {
            TypeExpressionKind::ResolvedIdentifier(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(&self.kind, TypeExpressionKind::Tuple(items) if items.is_empty())
    }
}
