use std::sync::Arc;

use relic_types::{BinaryOperator, DefinitionId, Qualifiers, SourceLocation, UnaryOperator};

use crate::ast::statement::Statement;
use crate::ast::type_expression::TypeExpression;

/// When an expression's value becomes known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvaluationContext {
    /// Fully folded during semantic analysis.
    CompileTime,
    /// Known once layout has assigned every address.
    LinkTime,
    /// Computed by the emitted program.
    RunTime,
}

/// Queries over a resolved type, evaluated at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeQueryKind {
    /// Storage size in bytes.
    SizeOf,
    /// Alignment in bytes (always 1 on the supported targets).
    AlignOf,
}

/// Semantic annotations filled in once during analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionInfo {
    pub context: EvaluationContext,
    pub ty: TypeExpression,
    pub qualifiers: Qualifiers,
}

impl ExpressionInfo {
    pub fn new(context: EvaluationContext, ty: TypeExpression, qualifiers: Qualifiers) -> Self {
        ExpressionInfo {
            context,
            ty,
            qualifiers,
        }
    }
}

/// An expression node. Children are owned exclusively; `clone` is deep and
/// total, and preserves locations and any resolved [`ExpressionInfo`].
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub location: SourceLocation,
    pub info: Option<Box<ExpressionInfo>>,
}

/// The closed universe of expression payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    /// `[expr for name in sequence]`
    ArrayComprehension {
        expression: Box<Expression>,
        name: Arc<str>,
        sequence: Box<Expression>,
    },
    /// `[value; size]`
    ArrayPadLiteral {
        value: Box<Expression>,
        size: Box<Expression>,
    },
    /// `[a, b, c]`
    ArrayLiteral(Vec<Expression>),
    BinaryOperator {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    BooleanLiteral(bool),
    Call {
        /// Whether the call site requested inline expansion.
        inlined: bool,
        function: Box<Expression>,
        arguments: Vec<Expression>,
    },
    Cast {
        operand: Box<Expression>,
        ty: Box<TypeExpression>,
    },
    /// `embed "path"` — folded to a string literal holding the file bytes.
    Embed { original_path: Arc<str> },
    FieldAccess {
        operand: Box<Expression>,
        field: Arc<str>,
    },
    /// A dotted, not yet resolved path.
    Identifier(Vec<Arc<str>>),
    IntegerLiteral(i128),
    /// `offsetof(Type, field)`
    OffsetOf {
        ty: Box<TypeExpression>,
        field: Arc<str>,
    },
    /// `start .. end [by step]`
    RangeLiteral {
        start: Box<Expression>,
        end: Box<Expression>,
        step: Option<Box<Expression>>,
    },
    /// An identifier bound to its definition.
    ResolvedIdentifier(DefinitionId),
    /// A statement evaluated for effect, yielding `result`; produced when
    /// inlined calls appear in expression position.
    SideEffect {
        statement: Box<Statement>,
        result: Box<Expression>,
    },
    StringLiteral(Arc<str>),
    StructLiteral {
        ty: Box<TypeExpression>,
        /// Field initializers in source order.
        items: Vec<(Arc<str>, Expression)>,
    },
    TupleLiteral(Vec<Expression>),
    /// A type in value position, e.g. as a `let` argument.
    TypeOf(Box<TypeExpression>),
    /// `sizeof(T)` / `alignof(T)`
    TypeQuery {
        kind: TypeQueryKind,
        ty: Box<TypeExpression>,
    },
    UnaryOperator {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
}

impl Expression {
    pub fn new(kind: ExpressionKind, location: SourceLocation) -> Expression {
        Expression {
            kind,
            location,
            info: None,
        }
    }

    pub fn with_info(
        kind: ExpressionKind,
        location: SourceLocation,
        info: ExpressionInfo,
    ) -> Expression {
        Expression {
            kind,
            location,
            info: Some(Box::new(info)),
        }
    }

    /// Integer literal shorthand, without type info.
    pub fn integer(value: i128, location: SourceLocation) -> Expression {
        Expression::new(ExpressionKind::IntegerLiteral(value), location)
    }

    /// Boolean literal shorthand, without type info.
    pub fn boolean(value: bool, location: SourceLocation) -> Expression {
        Expression::new(ExpressionKind::BooleanLiteral(value), location)
    }

    pub fn as_integer_literal(&self) -> Option<i128> {
        match &self.kind {
            ExpressionKind::IntegerLiteral(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_boolean_literal(&self) -> Option<bool> {
        match &self.kind {
            ExpressionKind::BooleanLiteral(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_string_literal(&self) -> Option<&Arc<str>> {
        match &self.kind {
            ExpressionKind::StringLiteral(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_resolved_identifier(&self) -> Option<DefinitionId> {
        match &self.kind {
            ExpressionKind::ResolvedIdentifier(id) => Some(*id),
            _ => None,
        }
    }

    /// The annotated evaluation context, defaulting to compile-time for
    /// bare literals produced by the parser.
    pub fn context(&self) -> EvaluationContext {
        self.info
            .as_ref()
            .map(|info| info.context)
            .unwrap_or(EvaluationContext::CompileTime)
    }

    /// The annotated type, if analysis has run over this node.
    pub fn ty(&self) -> Option<&TypeExpression> {
        self.info.as_ref().map(|info| &info.ty)
    }

    pub fn qualifiers(&self) -> Qualifiers {
        self.info
            .as_ref()
            .map(|info| info.qualifiers)
            .unwrap_or(Qualifiers::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Expression {
        let location = SourceLocation::line("main.wiz", 4);
        Expression::new(
            ExpressionKind::BinaryOperator {
                op: BinaryOperator::Addition,
                left: Box::new(Expression::integer(1, location.clone())),
                right: Box::new(Expression::new(
                    ExpressionKind::UnaryOperator {
                        op: UnaryOperator::SignedNegation,
                        operand: Box::new(Expression::integer(2, location.clone())),
                    },
                    location.clone(),
                )),
            },
            location,
        )
    }

    #[test]
    fn clone_is_structurally_equal_and_preserves_locations() {
        let original = sample();
        let copy = original.clone();
        assert_eq!(original, copy);
        assert_eq!(original.location, copy.location);
    }

    #[test]
    fn clone_is_independent() {
        let original = sample();
        let mut copy = original.clone();
        if let ExpressionKind::BinaryOperator { left, .. } = &mut copy.kind {
            **left = Expression::integer(99, SourceLocation::empty());
        }
        // Mutating the clone leaves the original untouched.
        if let ExpressionKind::BinaryOperator { left, .. } = &original.kind {
            assert_eq!(left.as_integer_literal(), Some(1));
        } else {
            unreachable!();
        }
    }
}
