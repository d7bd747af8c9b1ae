//! Constant folding and identifier resolution.
//!
//! `reduce_expression` rewrites an expression into an equivalent, simpler
//! one: identifiers bind to their definitions, compile-time arithmetic
//! folds through the checked 128-bit algebra, casts narrow when provably
//! safe, and sequence operations (indexing, concatenation, comprehension)
//! evaluate when their operands are literals. Every folded node takes the
//! source location of the expression that drove the fold.

use std::sync::Arc;

use relic_types::{
    apply_boolean_comparison_op, apply_integer_arithmetic_op, apply_integer_comparison_op,
    int::ArithmeticResult, is_valid_arithmetic_op, is_valid_comparison_op, BinaryOperator,
    DefinitionId, Qualifiers, SourceLocation, UnaryOperator,
};

use crate::ast::{
    EvaluationContext, Expression, ExpressionInfo, ExpressionKind, TypeExpression,
    TypeExpressionKind, TypeQueryKind,
};
use crate::builtins::{Builtins, BuiltinType, Property};
use crate::compiler::Compiler;
use crate::definition::DefinitionKind;

/// Replaces every free occurrence of the single-piece identifier `name`
/// with `value`. Used for `let` parameters and comprehension counters.
fn substitute(expression: &Expression, name: &str, value: &Expression) -> Expression {
    let mut result = expression.clone();
    substitute_in_place(&mut result, name, value);
    result
}

fn substitute_in_place(expression: &mut Expression, name: &str, value: &Expression) {
    if let ExpressionKind::Identifier(pieces) = &expression.kind {
        if pieces.len() == 1 && &*pieces[0] == name {
            let location = expression.location.clone();
            *expression = value.clone();
            expression.location = location;
            return;
        }
    }
    match &mut expression.kind {
        ExpressionKind::ArrayComprehension {
            expression: inner,
            name: bound,
            sequence,
        } => {
            substitute_in_place(sequence, name, value);
            // The comprehension's own counter shadows outer bindings.
            if &**bound != name {
                substitute_in_place(inner, name, value);
            }
        }
        ExpressionKind::ArrayPadLiteral { value: item, size } => {
            substitute_in_place(item, name, value);
            substitute_in_place(size, name, value);
        }
        ExpressionKind::ArrayLiteral(items) | ExpressionKind::TupleLiteral(items) => {
            for item in items {
                substitute_in_place(item, name, value);
            }
        }
        ExpressionKind::BinaryOperator { left, right, .. } => {
            substitute_in_place(left, name, value);
            substitute_in_place(right, name, value);
        }
        ExpressionKind::Call {
            function,
            arguments,
            ..
        } => {
            substitute_in_place(function, name, value);
            for argument in arguments {
                substitute_in_place(argument, name, value);
            }
        }
        ExpressionKind::Cast { operand, .. }
        | ExpressionKind::FieldAccess { operand, .. }
        | ExpressionKind::UnaryOperator { operand, .. } => {
            substitute_in_place(operand, name, value);
        }
        ExpressionKind::RangeLiteral { start, end, step } => {
            substitute_in_place(start, name, value);
            substitute_in_place(end, name, value);
            if let Some(step) = step {
                substitute_in_place(step, name, value);
            }
        }
        ExpressionKind::StructLiteral { items, .. } => {
            for (_, item) in items {
                substitute_in_place(item, name, value);
            }
        }
        ExpressionKind::SideEffect { result, .. } => {
            substitute_in_place(result, name, value);
        }
        _ => {}
    }
}

fn combine_context(left: EvaluationContext, right: EvaluationContext) -> EvaluationContext {
    left.max(right)
}

impl Compiler {
    // ----- entry points -------------------------------------------------

    /// Reduces with diagnostics suppressed; used by speculative folds such
    /// as `#[if]` checks and array-length inference.
    pub(crate) fn reduce_expression_quiet(&mut self, expression: &Expression) -> Option<Expression> {
        self.quiet_depth += 1;
        let result = self.reduce_expression(expression);
        self.quiet_depth -= 1;
        result
    }

    pub(crate) fn fold_error(&mut self, message: String, location: SourceLocation) {
        if self.quiet_depth == 0 {
            self.report.plain_error(message, location);
        }
    }

    // ----- typed literal constructors -----------------------------------

    pub(crate) fn builtin_type_expression(
        &self,
        builtin: BuiltinType,
        location: &SourceLocation,
    ) -> TypeExpression {
        TypeExpression::resolved(self.builtins.get(builtin), location.clone())
    }

    pub(crate) fn make_integer(
        &self,
        value: i128,
        ty: TypeExpression,
        location: SourceLocation,
    ) -> Expression {
        Expression::with_info(
            ExpressionKind::IntegerLiteral(value),
            location,
            ExpressionInfo::new(EvaluationContext::CompileTime, ty, Qualifiers::empty()),
        )
    }

    pub(crate) fn make_iexpr_integer(&self, value: i128, location: SourceLocation) -> Expression {
        let ty = self.builtin_type_expression(BuiltinType::IExpr, &location);
        self.make_integer(value, ty, location)
    }

    pub(crate) fn make_boolean(&self, value: bool, location: SourceLocation) -> Expression {
        let ty = self.builtin_type_expression(BuiltinType::Bool, &location);
        Expression::with_info(
            ExpressionKind::BooleanLiteral(value),
            location,
            ExpressionInfo::new(EvaluationContext::CompileTime, ty, Qualifiers::empty()),
        )
    }

    fn string_type(&self, length: usize, location: &SourceLocation) -> TypeExpression {
        TypeExpression::new(
            TypeExpressionKind::Array {
                element_type: Box::new(self.builtin_type_expression(BuiltinType::U8, location)),
                size: Some(Box::new(Expression::integer(
                    length as i128,
                    location.clone(),
                ))),
            },
            location.clone(),
        )
    }

    // ----- identifier resolution ----------------------------------------

    pub(crate) fn raise_unresolved_identifier(
        &mut self,
        pieces: &[Arc<str>],
        index: usize,
        location: &SourceLocation,
    ) {
        let partial = pieces[..=index.min(pieces.len() - 1)].join(".");
        if index == 0 {
            self.fold_error(
                format!("could not resolve identifier `{}`", partial),
                location.clone(),
            );
        } else {
            self.fold_error(
                format!(
                    "could not resolve identifier `{}` (`{}` has no member `{}`)",
                    pieces.join("."),
                    pieces[..index].join("."),
                    pieces[index]
                ),
                location.clone(),
            );
        }
    }

    /// Binds a dotted path against the current scope. Returns the deepest
    /// definition reached and how many pieces it consumed; remaining
    /// pieces are value member accesses.
    pub(crate) fn resolve_identifier(
        &mut self,
        pieces: &[Arc<str>],
        location: &SourceLocation,
    ) -> Option<(DefinitionId, usize)> {
        let results = self
            .scopes
            .find_unqualified_definitions(self.current_scope, &pieces[0]);
        let mut definition = match results.as_slice() {
            [] => {
                self.raise_unresolved_identifier(pieces, 0, location);
                return None;
            }
            [single] => *single,
            [first, ..] => {
                // Distinct imported definitions under one name: ambiguous.
                self.fold_error(
                    format!("reference to `{}` is ambiguous", pieces[0]),
                    location.clone(),
                );
                *first
            }
        };

        let mut consumed = 1;
        while consumed < pieces.len() {
            let environment = match &self.definitions.get(definition).kind {
                DefinitionKind::Namespace { environment } => *environment,
                DefinitionKind::Enum(enum_definition) => enum_definition.environment,
                _ => break,
            };
            let members = self.scopes.find_member_definitions(environment, &pieces[consumed]);
            match members.first() {
                Some(&next) => {
                    definition = next;
                    consumed += 1;
                }
                None => {
                    self.raise_unresolved_identifier(pieces, consumed, location);
                    return None;
                }
            }
        }
        Some((definition, consumed))
    }

    /// The enum definition owning `member` (enum members know their scope,
    /// the scope belongs to exactly one enum).
    fn enum_of_member(&self, member: DefinitionId) -> Option<DefinitionId> {
        let parent = self.definitions.get(member).parent_scope?;
        self.definitions
            .iter()
            .find(|(_, definition)| match &definition.kind {
                DefinitionKind::Enum(enum_definition) => enum_definition.environment == parent,
                _ => false,
            })
            .map(|(id, _)| id)
    }

    /// Produces the reduced expression standing for a reference to
    /// `definition`, with the reference's source location.
    pub(crate) fn resolve_definition_expression(
        &mut self,
        definition: DefinitionId,
        location: &SourceLocation,
    ) -> Option<Expression> {
        match &self.definitions.get(definition).kind {
            DefinitionKind::Let(let_definition) => {
                if !let_definition.parameters.is_empty() {
                    let name = self.definitions.get(definition).name.clone();
                    self.fold_error(
                        format!("`{}` is a function-like `let` and requires arguments", name),
                        location.clone(),
                    );
                    return None;
                }
                self.ensure_definition_resolved(definition);
                let DefinitionKind::Let(let_definition) = &self.definitions.get(definition).kind
                else {
                    unreachable!();
                };
                if !let_definition.evaluated {
                    return None;
                }
                let mut expression = let_definition.expression.clone();
                expression.location = location.clone();
                Some(expression)
            }
            DefinitionKind::EnumMember(member) => {
                let value = match member.value {
                    Some(value) => value,
                    None => {
                        if let Some(owner) = self.enum_of_member(definition) {
                            self.ensure_definition_resolved(owner);
                        }
                        match &self.definitions.get(definition).kind {
                            DefinitionKind::EnumMember(member) => member.value?,
                            _ => return None,
                        }
                    }
                };
                let owner = self.enum_of_member(definition)?;
                let ty = TypeExpression::resolved(owner, location.clone());
                Some(self.make_integer(value, ty, location.clone()))
            }
            DefinitionKind::Var(_) => {
                self.ensure_definition_resolved(definition);
                let DefinitionKind::Var(var) = &self.definitions.get(definition).kind else {
                    unreachable!();
                };
                let qualifiers = var.qualifiers;
                let resolved = var.resolved_type.clone()?;
                // A var with designated storage is an alias for its holder.
                if let TypeExpressionKind::DesignatedStorage { holder, .. } = &resolved.kind {
                    let holder = (**holder).clone();
                    return self.reduce_expression(&holder);
                }
                Some(Expression::with_info(
                    ExpressionKind::ResolvedIdentifier(definition),
                    location.clone(),
                    ExpressionInfo::new(
                        EvaluationContext::RunTime,
                        resolved,
                        qualifiers | Qualifiers::LVALUE,
                    ),
                ))
            }
            DefinitionKind::BuiltinRegister(register) => {
                let ty = TypeExpression::resolved(register.value_type, location.clone());
                Some(Expression::with_info(
                    ExpressionKind::ResolvedIdentifier(definition),
                    location.clone(),
                    ExpressionInfo::new(EvaluationContext::RunTime, ty, Qualifiers::LVALUE),
                ))
            }
            DefinitionKind::Func(_) => {
                self.ensure_definition_resolved(definition);
                let DefinitionKind::Func(func) = &self.definitions.get(definition).kind else {
                    unreachable!();
                };
                let ty = func.resolved_signature.clone().unwrap_or_else(|| {
                    TypeExpression::new(
                        TypeExpressionKind::Function {
                            far: func.far,
                            parameter_types: Vec::new(),
                            return_type: None,
                        },
                        location.clone(),
                    )
                });
                Some(Expression::with_info(
                    ExpressionKind::ResolvedIdentifier(definition),
                    location.clone(),
                    ExpressionInfo::new(EvaluationContext::LinkTime, ty, Qualifiers::empty()),
                ))
            }
            DefinitionKind::BuiltinVoidIntrinsic | DefinitionKind::BuiltinLoadIntrinsic => {
                Some(Expression::with_info(
                    ExpressionKind::ResolvedIdentifier(definition),
                    location.clone(),
                    ExpressionInfo::new(
                        EvaluationContext::RunTime,
                        TypeExpression::unit(location.clone()),
                        Qualifiers::empty(),
                    ),
                ))
            }
            DefinitionKind::Bank(_) => Some(Expression::with_info(
                ExpressionKind::ResolvedIdentifier(definition),
                location.clone(),
                ExpressionInfo::new(
                    EvaluationContext::CompileTime,
                    TypeExpression::unit(location.clone()),
                    Qualifiers::empty(),
                ),
            )),
            DefinitionKind::Namespace { .. } => {
                let name = self.definitions.get(definition).name.clone();
                self.fold_error(
                    format!("namespace `{}` cannot be used as a value", name),
                    location.clone(),
                );
                None
            }
            // Any type-like definition appears in value position as a
            // `typeof` handle so member properties can resolve.
            _ => {
                let ty = TypeExpression::resolved(definition, location.clone());
                let typeof_type = self.builtin_type_expression(BuiltinType::TypeOf, location);
                Some(Expression::with_info(
                    ExpressionKind::TypeOf(Box::new(ty)),
                    location.clone(),
                    ExpressionInfo::new(
                        EvaluationContext::CompileTime,
                        typeof_type,
                        Qualifiers::empty(),
                    ),
                ))
            }
        }
    }

    /// `expr.field` over an already-reduced expression.
    fn resolve_value_member_expression(
        &mut self,
        expression: Expression,
        field: &Arc<str>,
        location: &SourceLocation,
    ) -> Option<Expression> {
        // Member access on a type handle: integer bounds and enum members.
        if let ExpressionKind::TypeOf(ty) = &expression.kind {
            if let Some(id) = ty.as_resolved_identifier() {
                match &self.definitions.get(id).kind {
                    DefinitionKind::BuiltinIntegerType(int) => {
                        let (min, max) = (int.min, int.max);
                        match Builtins::find_property(field) {
                            Some(Property::MinValue) => {
                                let ty = (**ty).clone();
                                return Some(self.make_integer(min, ty, location.clone()));
                            }
                            Some(Property::MaxValue) => {
                                let ty = (**ty).clone();
                                return Some(self.make_integer(max, ty, location.clone()));
                            }
                            _ => {}
                        }
                    }
                    DefinitionKind::Enum(enum_definition) => {
                        let environment = enum_definition.environment;
                        if let Some(&member) = self
                            .scopes
                            .find_member_definitions(environment, field)
                            .first()
                        {
                            return self.resolve_definition_expression(member, location);
                        }
                    }
                    _ => {}
                }
            }
        }

        // `len` over sequence literals and array-typed values.
        if Builtins::find_property(field) == Some(Property::Len) {
            match &expression.kind {
                ExpressionKind::StringLiteral(value) => {
                    return Some(self.make_iexpr_integer(value.len() as i128, location.clone()));
                }
                ExpressionKind::ArrayLiteral(items) => {
                    return Some(self.make_iexpr_integer(items.len() as i128, location.clone()));
                }
                _ => {
                    if let Some(TypeExpressionKind::Array {
                        size: Some(size), ..
                    }) = expression.ty().map(|ty| &ty.kind)
                    {
                        if let Some(length) = size.as_integer_literal() {
                            return Some(self.make_iexpr_integer(length, location.clone()));
                        }
                    }
                }
            }
        }

        // Struct member access on an lvalue.
        if let Some(ty) = expression.ty().cloned() {
            let stripped = self.strip_type_alias(&ty);
            if let Some(id) = stripped.as_resolved_identifier() {
                if let DefinitionKind::Struct(struct_definition) = &self.definitions.get(id).kind {
                    let environment = struct_definition.environment;
                    if let Some(&member) = self
                        .scopes
                        .find_member_definitions(environment, field)
                        .first()
                    {
                        self.ensure_definition_resolved(member);
                        if let DefinitionKind::StructMember(member_definition) =
                            &self.definitions.get(member).kind
                        {
                            let member_type = member_definition.resolved_type.clone()?;
                            let qualifiers = expression.qualifiers();
                            let context = expression.context();
                            return Some(Expression::with_info(
                                ExpressionKind::FieldAccess {
                                    operand: Box::new(expression),
                                    field: field.clone(),
                                },
                                location.clone(),
                                ExpressionInfo::new(context, member_type, qualifiers),
                            ));
                        }
                    }
                    self.fold_error(
                        format!(
                            "`{}` has no member named `{}`",
                            self.definitions.get(id).name,
                            field
                        ),
                        location.clone(),
                    );
                    return None;
                }
            }
        }

        self.fold_error(
            format!("expression has no member named `{}`", field),
            location.clone(),
        );
        None
    }

    // ----- the folder ---------------------------------------------------

    /// Returns an equivalent, reduced expression, or `None` after
    /// reporting what went wrong.
    pub(crate) fn reduce_expression(&mut self, expression: &Expression) -> Option<Expression> {
        let location = expression.location.clone();
        match &expression.kind {
            ExpressionKind::IntegerLiteral(value) => Some(match &expression.info {
                Some(_) => expression.clone(),
                None => self.make_iexpr_integer(*value, location),
            }),
            ExpressionKind::BooleanLiteral(value) => Some(match &expression.info {
                Some(_) => expression.clone(),
                None => self.make_boolean(*value, location),
            }),
            ExpressionKind::StringLiteral(value) => {
                let ty = self.string_type(value.len(), &location);
                Some(Expression::with_info(
                    ExpressionKind::StringLiteral(value.clone()),
                    location,
                    ExpressionInfo::new(EvaluationContext::CompileTime, ty, Qualifiers::empty()),
                ))
            }
            ExpressionKind::Identifier(pieces) => {
                // Command-line defines shadow nothing: they apply only when
                // scope lookup finds no result.
                if pieces.len() == 1
                    && self
                        .scopes
                        .find_unqualified_definitions(self.current_scope, &pieces[0])
                        .is_empty()
                {
                    if let Some(define) = self.builtins.define_expression(&pieces[0]).cloned() {
                        return self.reduce_expression(&define);
                    }
                }
                let pieces = pieces.clone();
                let (definition, consumed) = self.resolve_identifier(&pieces, &location)?;
                let mut result = self.resolve_definition_expression(definition, &location)?;
                for field in &pieces[consumed..] {
                    result = self.resolve_value_member_expression(result, field, &location)?;
                }
                Some(result)
            }
            ExpressionKind::ResolvedIdentifier(definition) => {
                self.resolve_definition_expression(*definition, &location)
            }
            ExpressionKind::UnaryOperator { op, operand } => {
                if *op == UnaryOperator::Grouping {
                    return self.reduce_expression(operand);
                }
                let operand = self.reduce_expression(operand)?;
                self.reduce_unary(*op, operand, location)
            }
            ExpressionKind::BinaryOperator { op, left, right } => {
                let op = *op;
                if matches!(op, BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr) {
                    return self.reduce_logical(op, left, right, location);
                }
                let left = self.reduce_expression(left)?;
                let right = self.reduce_expression(right)?;
                self.reduce_binary(op, left, right, location)
            }
            ExpressionKind::Call {
                inlined,
                function,
                arguments,
            } => self.reduce_call(*inlined, function, arguments, location),
            ExpressionKind::Cast { operand, ty } => {
                let operand = self.reduce_expression(operand)?;
                let target = self.reduce_type_expression(ty)?;
                self.reduce_cast(operand, target, location)
            }
            ExpressionKind::Embed { original_path } => {
                let path = original_path.clone();
                let data = match self.embed_cache.get(&path) {
                    Some(data) => Some(data.clone()),
                    None => match self.embed_loader.load(&path) {
                        Some(data) => {
                            self.embed_cache.insert(path.clone(), data.clone());
                            Some(data)
                        }
                        None => None,
                    },
                };
                let Some(data) = data else {
                    self.fold_error(
                        format!("could not embed file \"{}\"", path),
                        location,
                    );
                    return None;
                };
                let u8_type = self.builtin_type_expression(BuiltinType::U8, &location);
                let items: Vec<Expression> = data
                    .iter()
                    .map(|&byte| self.make_integer(byte as i128, u8_type.clone(), location.clone()))
                    .collect();
                let ty = TypeExpression::new(
                    TypeExpressionKind::Array {
                        element_type: Box::new(u8_type),
                        size: Some(Box::new(Expression::integer(
                            items.len() as i128,
                            location.clone(),
                        ))),
                    },
                    location.clone(),
                );
                Some(Expression::with_info(
                    ExpressionKind::ArrayLiteral(items),
                    location,
                    ExpressionInfo::new(EvaluationContext::CompileTime, ty, Qualifiers::empty()),
                ))
            }
            ExpressionKind::FieldAccess { operand, field } => {
                let operand = self.reduce_expression(operand)?;
                let field = field.clone();
                self.resolve_value_member_expression(operand, &field, &location)
            }
            ExpressionKind::OffsetOf { ty, field } => {
                let resolved = self.reduce_type_expression(ty)?;
                let stripped = self.strip_type_alias(&resolved);
                let Some(id) = stripped.as_resolved_identifier() else {
                    self.fold_error("offsetof requires a struct type".into(), location);
                    return None;
                };
                let DefinitionKind::Struct(struct_definition) = &self.definitions.get(id).kind
                else {
                    self.fold_error("offsetof requires a struct type".into(), location);
                    return None;
                };
                let environment = struct_definition.environment;
                self.struct_size(id, &location);
                let member = self
                    .scopes
                    .find_member_definitions(environment, field)
                    .first()
                    .copied();
                let Some(member) = member else {
                    self.fold_error(
                        format!("`{}` has no member named `{}`", self.definitions.get(id).name, field),
                        location,
                    );
                    return None;
                };
                match &self.definitions.get(member).kind {
                    DefinitionKind::StructMember(member) => {
                        let offset = member.offset? as i128;
                        Some(self.make_iexpr_integer(offset, location))
                    }
                    _ => None,
                }
            }
            ExpressionKind::TypeQuery { kind, ty } => {
                let resolved = self.reduce_type_expression(ty)?;
                match kind {
                    TypeQueryKind::SizeOf => {
                        let size = self.type_storage_size(&resolved, &location)?;
                        Some(self.make_iexpr_integer(size as i128, location))
                    }
                    TypeQueryKind::AlignOf => Some(self.make_iexpr_integer(1, location)),
                }
            }
            ExpressionKind::TypeOf(ty) => {
                let resolved = self.reduce_type_expression(ty)?;
                let typeof_type = self.builtin_type_expression(BuiltinType::TypeOf, &location);
                Some(Expression::with_info(
                    ExpressionKind::TypeOf(Box::new(resolved)),
                    location,
                    ExpressionInfo::new(
                        EvaluationContext::CompileTime,
                        typeof_type,
                        Qualifiers::empty(),
                    ),
                ))
            }
            ExpressionKind::RangeLiteral { start, end, step } => {
                let start = self.reduce_expression(start)?;
                let end = self.reduce_expression(end)?;
                let step = match step {
                    Some(step) => Some(Box::new(self.reduce_expression(step)?)),
                    None => None,
                };
                let range_type = self.builtin_type_expression(BuiltinType::Range, &location);
                Some(Expression::with_info(
                    ExpressionKind::RangeLiteral {
                        start: Box::new(start),
                        end: Box::new(end),
                        step,
                    },
                    location,
                    ExpressionInfo::new(
                        EvaluationContext::CompileTime,
                        range_type,
                        Qualifiers::empty(),
                    ),
                ))
            }
            ExpressionKind::ArrayLiteral(items) => {
                let mut reduced = Vec::with_capacity(items.len());
                for item in items {
                    reduced.push(self.reduce_expression(item)?);
                }
                let element_type = reduced
                    .first()
                    .and_then(|item| item.ty().cloned())
                    .unwrap_or_else(|| TypeExpression::unit(location.clone()));
                let ty = TypeExpression::new(
                    TypeExpressionKind::Array {
                        element_type: Box::new(element_type),
                        size: Some(Box::new(Expression::integer(
                            reduced.len() as i128,
                            location.clone(),
                        ))),
                    },
                    location.clone(),
                );
                Some(Expression::with_info(
                    ExpressionKind::ArrayLiteral(reduced),
                    location,
                    ExpressionInfo::new(EvaluationContext::CompileTime, ty, Qualifiers::empty()),
                ))
            }
            ExpressionKind::ArrayPadLiteral { value, size } => {
                let value = self.reduce_expression(value)?;
                let size = self.reduce_expression(size)?;
                let Some(count) = size.as_integer_literal() else {
                    self.fold_error(
                        "array pad literal requires a compile-time size".into(),
                        location,
                    );
                    return None;
                };
                if count < 0 {
                    self.fold_error("array pad literal size cannot be negative".into(), location);
                    return None;
                }
                let items = vec![value; count as usize];
                let array = Expression::new(ExpressionKind::ArrayLiteral(items), location);
                self.reduce_expression(&array)
            }
            ExpressionKind::ArrayComprehension {
                expression: inner,
                name,
                sequence,
            } => {
                let sequence = self.reduce_expression(sequence)?;
                let values = self.sequence_values(&sequence, &location)?;
                let mut items = Vec::with_capacity(values.len());
                for value in values {
                    let substituted = substitute(inner, name, &value);
                    items.push(self.reduce_expression(&substituted)?);
                }
                let array = Expression::new(ExpressionKind::ArrayLiteral(items), location);
                self.reduce_expression(&array)
            }
            ExpressionKind::StructLiteral { ty, items } => {
                let resolved = self.reduce_type_expression(ty)?;
                let mut reduced = Vec::with_capacity(items.len());
                for (name, item) in items {
                    reduced.push((name.clone(), self.reduce_expression(item)?));
                }
                Some(Expression::with_info(
                    ExpressionKind::StructLiteral {
                        ty: Box::new(resolved.clone()),
                        items: reduced,
                    },
                    location,
                    ExpressionInfo::new(
                        EvaluationContext::CompileTime,
                        resolved,
                        Qualifiers::empty(),
                    ),
                ))
            }
            ExpressionKind::TupleLiteral(items) => {
                let mut reduced = Vec::with_capacity(items.len());
                let mut types = Vec::with_capacity(items.len());
                for item in items {
                    let item = self.reduce_expression(item)?;
                    types.push(item.ty().cloned().unwrap_or_else(|| {
                        TypeExpression::unit(location.clone())
                    }));
                    reduced.push(item);
                }
                let ty = TypeExpression::new(TypeExpressionKind::Tuple(types), location.clone());
                Some(Expression::with_info(
                    ExpressionKind::TupleLiteral(reduced),
                    location,
                    ExpressionInfo::new(EvaluationContext::CompileTime, ty, Qualifiers::empty()),
                ))
            }
            ExpressionKind::SideEffect { statement, result } => {
                let result = self.reduce_expression(result)?;
                let info = result.info.clone();
                Some(Expression {
                    kind: ExpressionKind::SideEffect {
                        statement: statement.clone(),
                        result: Box::new(result),
                    },
                    location,
                    info,
                })
            }
        }
    }

    /// The concrete item expressions of a reduced sequence (range, array
    /// or string literal), for comprehensions and `inline for`.
    pub(crate) fn sequence_values(
        &mut self,
        sequence: &Expression,
        location: &SourceLocation,
    ) -> Option<Vec<Expression>> {
        match &sequence.kind {
            ExpressionKind::RangeLiteral { start, end, step } => {
                let start = start.as_integer_literal()?;
                let end = end.as_integer_literal()?;
                let step = match step {
                    Some(step) => step.as_integer_literal()?,
                    None => 1,
                };
                if step == 0 {
                    self.fold_error("range step cannot be zero".into(), location.clone());
                    return None;
                }
                let mut values = Vec::new();
                let mut current = start;
                while (step > 0 && current <= end) || (step < 0 && current >= end) {
                    values.push(self.make_iexpr_integer(current, location.clone()));
                    current = match current.checked_add(step) {
                        Some(next) => next,
                        None => break,
                    };
                    if values.len() > 0x10000 {
                        self.fold_error(
                            "compile-time sequence is too long".into(),
                            location.clone(),
                        );
                        return None;
                    }
                }
                Some(values)
            }
            ExpressionKind::ArrayLiteral(items) => Some(items.clone()),
            ExpressionKind::StringLiteral(value) => Some(
                value
                    .as_bytes()
                    .iter()
                    .map(|&byte| self.make_iexpr_integer(byte as i128, location.clone()))
                    .collect(),
            ),
            _ => {
                self.fold_error(
                    "expression is not a compile-time sequence".into(),
                    location.clone(),
                );
                None
            }
        }
    }

    fn reduce_unary(
        &mut self,
        op: UnaryOperator,
        operand: Expression,
        location: SourceLocation,
    ) -> Option<Expression> {
        use UnaryOperator::*;
        match op {
            LogicalNegation => {
                if let Some(value) = operand.as_boolean_literal() {
                    return Some(self.make_boolean(!value, location));
                }
                // `!(a < b)` becomes `a >= b` so branch lowering sees a
                // plain comparison; `!!x` collapses to `x`.
                if let ExpressionKind::BinaryOperator {
                    op: inner_op,
                    left,
                    right,
                } = &operand.kind
                {
                    if let Some(negated) = inner_op.negated_comparison() {
                        let rewritten = Expression::new(
                            ExpressionKind::BinaryOperator {
                                op: negated,
                                left: left.clone(),
                                right: right.clone(),
                            },
                            location,
                        );
                        return self.reduce_expression(&rewritten);
                    }
                }
                if let ExpressionKind::UnaryOperator {
                    op: LogicalNegation,
                    operand: inner,
                } = &operand.kind
                {
                    return Some((**inner).clone());
                }
                let ty = self.builtin_type_expression(BuiltinType::Bool, &location);
                let context = operand.context();
                Some(Expression::with_info(
                    ExpressionKind::UnaryOperator {
                        op,
                        operand: Box::new(operand),
                    },
                    location,
                    ExpressionInfo::new(context, ty, Qualifiers::empty()),
                ))
            }
            SignedNegation => {
                if let Some(value) = operand.as_integer_literal() {
                    let (status, negated) = relic_types::int::checked_sub(0, value);
                    if status != ArithmeticResult::Success {
                        self.fold_error("signed negation of this value overflows".into(), location);
                        return None;
                    }
                    let ty = operand
                        .ty()
                        .cloned()
                        .unwrap_or_else(|| self.builtin_type_expression(BuiltinType::IExpr, &location));
                    return Some(self.make_integer(negated, ty, location));
                }
                self.keep_unary(op, operand, location)
            }
            BitwiseNegation => {
                if let Some(value) = operand.as_integer_literal() {
                    // Mask to the operand's type width when it has one, so
                    // `~(0 as u8)` folds to 0xFF rather than -1.
                    let ty = operand.ty().cloned();
                    let folded = match ty.as_ref().and_then(|ty| self.integer_type_bounds(ty)) {
                        Some((min, _max, size)) if min == 0 => {
                            let mask = if size >= 16 { u128::MAX } else { (1u128 << (size * 8)) - 1 };
                            ((value as u128) ^ mask) as i128 & mask as i128
                        }
                        _ => !value,
                    };
                    let ty = ty.unwrap_or_else(|| {
                        self.builtin_type_expression(BuiltinType::IExpr, &location)
                    });
                    return Some(self.make_integer(folded, ty, location));
                }
                self.keep_unary(op, operand, location)
            }
            LowByte | HighByte | BankByte => {
                if let Some(value) = operand.as_integer_literal() {
                    let folded = match op {
                        LowByte => value & 0xFF,
                        HighByte => (value >> 8) & 0xFF,
                        _ => (value >> 16) & 0xFF,
                    };
                    let ty = self.builtin_type_expression(BuiltinType::U8, &location);
                    return Some(self.make_integer(folded, ty, location));
                }
                let ty = self.builtin_type_expression(BuiltinType::U8, &location);
                let context = combine_context(operand.context(), EvaluationContext::LinkTime);
                Some(Expression::with_info(
                    ExpressionKind::UnaryOperator {
                        op,
                        operand: Box::new(operand),
                    },
                    location,
                    ExpressionInfo::new(context, ty, Qualifiers::empty()),
                ))
            }
            AddressOf | FarAddressOf => {
                if !operand.qualifiers().contains(Qualifiers::LVALUE) {
                    self.fold_error(
                        "cannot take the address of a non-addressable expression".into(),
                        location,
                    );
                    return None;
                }
                let mut qualifiers = Qualifiers::empty();
                if op == FarAddressOf {
                    qualifiers |= Qualifiers::FAR;
                }
                let pointee = operand
                    .ty()
                    .cloned()
                    .unwrap_or_else(|| TypeExpression::unit(location.clone()));
                let ty = TypeExpression::new(
                    TypeExpressionKind::Pointer {
                        element_type: Box::new(pointee),
                        qualifiers,
                    },
                    location.clone(),
                );
                Some(Expression::with_info(
                    ExpressionKind::UnaryOperator {
                        op,
                        operand: Box::new(operand),
                    },
                    location,
                    ExpressionInfo::new(EvaluationContext::LinkTime, ty, Qualifiers::empty()),
                ))
            }
            Indirection => {
                let pointee = match operand.ty().map(|ty| &ty.kind) {
                    Some(TypeExpressionKind::Pointer { element_type, .. }) => {
                        (**element_type).clone()
                    }
                    _ => {
                        self.fold_error(
                            "indirection requires a pointer-typed operand".into(),
                            location,
                        );
                        return None;
                    }
                };
                Some(Expression::with_info(
                    ExpressionKind::UnaryOperator {
                        op,
                        operand: Box::new(operand),
                    },
                    location,
                    ExpressionInfo::new(
                        EvaluationContext::RunTime,
                        pointee,
                        Qualifiers::LVALUE,
                    ),
                ))
            }
            PreIncrement | PostIncrement | PreDecrement | PostDecrement => {
                self.keep_unary(op, operand, location)
            }
            Grouping => unreachable!("grouping handled by the caller"),
        }
    }

    fn keep_unary(
        &mut self,
        op: UnaryOperator,
        operand: Expression,
        location: SourceLocation,
    ) -> Option<Expression> {
        let info = operand.info.clone();
        Some(Expression {
            kind: ExpressionKind::UnaryOperator {
                op,
                operand: Box::new(operand),
            },
            location,
            info,
        })
    }

    fn reduce_logical(
        &mut self,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
        location: SourceLocation,
    ) -> Option<Expression> {
        let left = self.reduce_expression(left)?;
        match (op, left.as_boolean_literal()) {
            (BinaryOperator::LogicalAnd, Some(false)) => {
                return Some(self.make_boolean(false, location))
            }
            (BinaryOperator::LogicalAnd, Some(true))
            | (BinaryOperator::LogicalOr, Some(false)) => {
                let right = self.reduce_expression(right)?;
                let mut result = right;
                result.location = location;
                return Some(result);
            }
            (BinaryOperator::LogicalOr, Some(true)) => {
                return Some(self.make_boolean(true, location))
            }
            _ => {}
        }
        let right = self.reduce_expression(right)?;
        let ty = self.builtin_type_expression(BuiltinType::Bool, &location);
        let context = combine_context(left.context(), right.context());
        Some(Expression::with_info(
            ExpressionKind::BinaryOperator {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
            ExpressionInfo::new(context, ty, Qualifiers::empty()),
        ))
    }

    /// Result type of a folded or run-time arithmetic pair: a sized type
    /// wins over `iexpr`; two different sized types conflict.
    fn combine_arithmetic_type(
        &mut self,
        left: &Expression,
        right: &Expression,
        location: &SourceLocation,
    ) -> Option<TypeExpression> {
        let left_ty = left.ty().cloned();
        let right_ty = right.ty().cloned();
        let left_sized = left_ty
            .as_ref()
            .and_then(|ty| self.integer_type_bounds(ty))
            .is_some();
        let right_sized = right_ty
            .as_ref()
            .and_then(|ty| self.integer_type_bounds(ty))
            .is_some();
        match (left_sized, right_sized) {
            (true, true) => {
                let left_ty = left_ty.unwrap();
                let right_ty = right_ty.unwrap();
                if self.is_type_equivalent(&left_ty, &right_ty) {
                    Some(left_ty)
                } else {
                    self.fold_error(
                        format!(
                            "left-hand side of expression has type `{}`, while right-hand side has type `{}`",
                            self.type_name(&left_ty),
                            self.type_name(&right_ty)
                        ),
                        location.clone(),
                    );
                    None
                }
            }
            (true, false) => left_ty,
            (false, true) => right_ty,
            (false, false) => Some(self.builtin_type_expression(BuiltinType::IExpr, location)),
        }
    }

    fn reduce_binary(
        &mut self,
        op: BinaryOperator,
        left: Expression,
        right: Expression,
        location: SourceLocation,
    ) -> Option<Expression> {
        use BinaryOperator::*;

        if op == Indexing {
            return self.reduce_indexing(left, right, location);
        }
        if op == BitIndexing {
            let ty = self.builtin_type_expression(BuiltinType::Bool, &location);
            let context = combine_context(left.context(), right.context());
            return Some(Expression::with_info(
                ExpressionKind::BinaryOperator {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                location,
                ExpressionInfo::new(context, ty, Qualifiers::LVALUE),
            ));
        }
        if op == Concatenation {
            if let (Some(a), Some(b)) = (left.as_string_literal(), right.as_string_literal()) {
                let joined: Arc<str> = Arc::from(format!("{}{}", a, b));
                let literal = Expression::new(ExpressionKind::StringLiteral(joined), location);
                return self.reduce_expression(&literal);
            }
            if let (
                ExpressionKind::ArrayLiteral(a),
                ExpressionKind::ArrayLiteral(b),
            ) = (&left.kind, &right.kind)
            {
                let mut items = a.clone();
                items.extend(b.iter().cloned());
                let literal = Expression::new(ExpressionKind::ArrayLiteral(items), location);
                return self.reduce_expression(&literal);
            }
            self.fold_error(
                "concatenation requires compile-time sequences".into(),
                location,
            );
            return None;
        }

        if is_valid_arithmetic_op(op) {
            if let (Some(a), Some(b)) = (left.as_integer_literal(), right.as_integer_literal()) {
                let (status, value) = apply_integer_arithmetic_op(op, a, b);
                return match status {
                    ArithmeticResult::Success => {
                        let ty = self.combine_arithmetic_type(&left, &right, &location)?;
                        // Folded results must still fit a sized type.
                        if !self.can_narrow_value(value, &ty) {
                            self.fold_error(
                                format!(
                                    "result of {} overflows the type `{}`",
                                    op.name(),
                                    self.type_name(&ty)
                                ),
                                location,
                            );
                            return None;
                        }
                        Some(self.make_integer(value, ty, location))
                    }
                    ArithmeticResult::Overflow => {
                        self.fold_error(
                            format!("overflow in compile-time {}", op.name()),
                            location,
                        );
                        None
                    }
                    ArithmeticResult::DivideByZero => {
                        self.fold_error(
                            format!("division by zero in compile-time {}", op.name()),
                            location,
                        );
                        None
                    }
                };
            }
            let ty = self.combine_arithmetic_type(&left, &right, &location)?;
            let context = combine_context(left.context(), right.context());
            return Some(Expression::with_info(
                ExpressionKind::BinaryOperator {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                location,
                ExpressionInfo::new(context, ty, Qualifiers::empty()),
            ));
        }

        if is_valid_comparison_op(op) {
            if let (Some(a), Some(b)) = (left.as_integer_literal(), right.as_integer_literal()) {
                return Some(self.make_boolean(apply_integer_comparison_op(op, a, b), location));
            }
            if let (Some(a), Some(b)) = (left.as_boolean_literal(), right.as_boolean_literal()) {
                return Some(self.make_boolean(apply_boolean_comparison_op(op, a, b), location));
            }
            let ty = self.builtin_type_expression(BuiltinType::Bool, &location);
            let context = combine_context(left.context(), right.context());
            return Some(Expression::with_info(
                ExpressionKind::BinaryOperator {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                location,
                ExpressionInfo::new(context, ty, Qualifiers::empty()),
            ));
        }

        // Assignment, rotates and anything else that only means something
        // at instruction selection: keep the node, typed by its left side.
        let info = left.info.clone();
        Some(Expression {
            kind: ExpressionKind::BinaryOperator {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
            info,
        })
    }

    fn reduce_indexing(
        &mut self,
        left: Expression,
        right: Expression,
        location: SourceLocation,
    ) -> Option<Expression> {
        if let Some(index) = right.as_integer_literal() {
            match &left.kind {
                ExpressionKind::StringLiteral(value) => {
                    let bytes = value.as_bytes();
                    return match bytes.get(index as usize) {
                        Some(&byte) => {
                            let ty = self.builtin_type_expression(BuiltinType::U8, &location);
                            Some(self.make_integer(byte as i128, ty, location))
                        }
                        None => {
                            self.fold_error(
                                format!(
                                    "index {} is out of bounds for a sequence of length {}",
                                    index,
                                    bytes.len()
                                ),
                                location,
                            );
                            None
                        }
                    };
                }
                ExpressionKind::ArrayLiteral(items) => {
                    return match items.get(index as usize) {
                        Some(item) => {
                            let mut item = item.clone();
                            item.location = location;
                            Some(item)
                        }
                        None => {
                            self.fold_error(
                                format!(
                                    "index {} is out of bounds for a sequence of length {}",
                                    index,
                                    items.len()
                                ),
                                location,
                            );
                            None
                        }
                    };
                }
                _ => {}
            }
        }

        // Run-time indexing: element-typed lvalue.
        let element_type = match left.ty().map(|ty| &ty.kind) {
            Some(TypeExpressionKind::Array { element_type, .. }) => (**element_type).clone(),
            Some(TypeExpressionKind::Pointer { element_type, .. }) => (**element_type).clone(),
            _ => {
                self.fold_error("expression cannot be indexed".into(), location);
                return None;
            }
        };
        let qualifiers = left.qualifiers() | Qualifiers::LVALUE;
        Some(Expression::with_info(
            ExpressionKind::BinaryOperator {
                op: BinaryOperator::Indexing,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
            ExpressionInfo::new(EvaluationContext::RunTime, element_type, qualifiers),
        ))
    }

    fn reduce_call(
        &mut self,
        inlined: bool,
        function: &Expression,
        arguments: &[Expression],
        location: SourceLocation,
    ) -> Option<Expression> {
        // Function-like lets substitute before any other reduction.
        if let ExpressionKind::Identifier(pieces) = &function.kind {
            let pieces = pieces.clone();
            if let Some((definition, consumed)) = {
                self.quiet_depth += 1;
                let result = self.resolve_identifier(&pieces, &location);
                self.quiet_depth -= 1;
                result
            } {
                if consumed == pieces.len() {
                    if let DefinitionKind::Let(let_definition) =
                        &self.definitions.get(definition).kind
                    {
                        let parameters = let_definition.parameters.clone();
                        if !parameters.is_empty() {
                            return self.reduce_let_call(
                                definition,
                                &parameters,
                                arguments,
                                location,
                            );
                        }
                    }
                    match &self.definitions.get(definition).kind {
                        DefinitionKind::BuiltinLoadIntrinsic => {
                            if let Some(result) =
                                self.try_reduce_definition_query(definition, arguments, &location)
                            {
                                return result;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let function = self.reduce_expression(function)?;
        let mut reduced_arguments = Vec::with_capacity(arguments.len());
        for argument in arguments {
            reduced_arguments.push(self.reduce_expression(argument)?);
        }

        // Calls keep the callee's return type when it is known.
        let return_type = match function.ty().map(|ty| &ty.kind) {
            Some(TypeExpressionKind::Function { return_type, .. }) => match return_type {
                Some(return_type) => {
                    let mut ty = (**return_type).clone();
                    if let TypeExpressionKind::DesignatedStorage { element_type, .. } = &ty.kind {
                        ty = (**element_type).clone();
                    }
                    ty
                }
                None => TypeExpression::unit(location.clone()),
            },
            _ => TypeExpression::unit(location.clone()),
        };
        Some(Expression::with_info(
            ExpressionKind::Call {
                inlined,
                function: Box::new(function),
                arguments: reduced_arguments,
            },
            location,
            ExpressionInfo::new(EvaluationContext::RunTime, return_type, Qualifiers::empty()),
        ))
    }

    fn reduce_let_call(
        &mut self,
        definition: DefinitionId,
        parameters: &[Arc<str>],
        arguments: &[Expression],
        location: SourceLocation,
    ) -> Option<Expression> {
        let name = self.definitions.get(definition).name.clone();
        if parameters.len() != arguments.len() {
            self.fold_error(
                format!(
                    "`{}` expects {} argument(s), but {} were provided",
                    name,
                    parameters.len(),
                    arguments.len()
                ),
                location,
            );
            return None;
        }
        let mut folded_arguments = Vec::with_capacity(arguments.len());
        for argument in arguments {
            folded_arguments.push(self.reduce_expression(argument)?);
        }
        let DefinitionKind::Let(let_definition) = &self.definitions.get(definition).kind else {
            unreachable!();
        };
        let mut body = let_definition.expression.clone();
        for (parameter, argument) in parameters.iter().zip(&folded_arguments) {
            body = substitute(&body, parameter, argument);
        }
        if !self.enter_let_expression(&name, &location) {
            return None;
        }
        let result = self.reduce_expression(&body);
        self.exit_let_expression();
        result.map(|mut result| {
            result.location = location;
            result
        })
    }

    /// `has_def("name")` and `get_def("name")` fold against the current
    /// scope. Returns `None` when `definition` is neither.
    fn try_reduce_definition_query(
        &mut self,
        definition: DefinitionId,
        arguments: &[Expression],
        location: &SourceLocation,
    ) -> Option<Option<Expression>> {
        let name = self.definitions.get(definition).name.clone();
        let query_kind = match &*name {
            "has_def" => true,
            "get_def" => false,
            _ => return None,
        };
        let argument = match arguments.first() {
            Some(argument) => self.reduce_expression(argument),
            None => None,
        };
        let Some(argument) = argument else {
            self.fold_error(
                format!("`{}` requires a compile-time string argument", name),
                location.clone(),
            );
            return Some(None);
        };
        let Some(target) = argument.as_string_literal().cloned() else {
            self.fold_error(
                format!("`{}` requires a compile-time string argument", name),
                location.clone(),
            );
            return Some(None);
        };
        let pieces: Vec<Arc<str>> = target.split('.').map(Arc::from).collect();
        self.quiet_depth += 1;
        let resolved = self.resolve_identifier(&pieces, location);
        self.quiet_depth -= 1;
        if query_kind {
            Some(Some(self.make_boolean(resolved.is_some(), location.clone())))
        } else {
            match resolved {
                Some((found, consumed)) if consumed == pieces.len() => {
                    Some(self.resolve_definition_expression(found, location))
                }
                _ => {
                    self.fold_error(
                        format!("could not resolve identifier `{}`", target),
                        location.clone(),
                    );
                    Some(None)
                }
            }
        }
    }

    fn reduce_cast(
        &mut self,
        operand: Expression,
        target: TypeExpression,
        location: SourceLocation,
    ) -> Option<Expression> {
        if let Some(value) = operand.as_integer_literal() {
            if self.integer_type_bounds(&target).is_some() {
                if !self.can_narrow_value(value, &target) {
                    self.fold_error(
                        format!(
                            "value {} cannot be narrowed to `{}`",
                            value,
                            self.type_name(&target)
                        ),
                        location,
                    );
                    return None;
                }
                return Some(self.make_integer(value, target, location));
            }
            // Integer to pointer: keep the value, adopt the type.
            if matches!(target.kind, TypeExpressionKind::Pointer { .. }) {
                return Some(self.make_integer(value, target, location));
            }
        }
        if let Some(value) = operand.as_boolean_literal() {
            if self.integer_type_bounds(&target).is_some() {
                return Some(self.make_integer(value as i128, target, location));
            }
        }
        let context = operand.context();
        let qualifiers = operand.qualifiers();
        Some(Expression::with_info(
            ExpressionKind::Cast {
                operand: Box::new(operand),
                ty: Box::new(target.clone()),
            },
            location,
            ExpressionInfo::new(context, target, qualifiers),
        ))
    }

    // ----- type expressions ---------------------------------------------

    /// Canonicalizes a type expression: binds identifiers, folds sizes,
    /// resolves `typeof`.
    pub(crate) fn reduce_type_expression(&mut self, ty: &TypeExpression) -> Option<TypeExpression> {
        let location = ty.location.clone();
        match &ty.kind {
            TypeExpressionKind::Identifier(pieces) => {
                let pieces = pieces.clone();
                let (definition, consumed) = self.resolve_identifier(&pieces, &location)?;
                if consumed != pieces.len() {
                    self.raise_unresolved_identifier(&pieces, consumed, &location);
                    return None;
                }
                if !self.definitions.get(definition).is_type() {
                    self.fold_error(
                        format!("`{}` is not a type", pieces.join(".")),
                        location,
                    );
                    return None;
                }
                Some(TypeExpression::resolved(definition, location))
            }
            TypeExpressionKind::ResolvedIdentifier(..) => Some(ty.clone()),
            TypeExpressionKind::Array { element_type, size } => {
                let element = self.reduce_type_expression(element_type)?;
                let size = match size {
                    Some(size) => Some(Box::new(self.reduce_expression(size)?)),
                    None => None,
                };
                Some(TypeExpression::new(
                    TypeExpressionKind::Array {
                        element_type: Box::new(element),
                        size,
                    },
                    location,
                ))
            }
            TypeExpressionKind::Pointer {
                element_type,
                qualifiers,
            } => {
                let element = self.reduce_type_expression(element_type)?;
                Some(TypeExpression::new(
                    TypeExpressionKind::Pointer {
                        element_type: Box::new(element),
                        qualifiers: *qualifiers,
                    },
                    location,
                ))
            }
            TypeExpressionKind::Tuple(items) => {
                let mut reduced = Vec::with_capacity(items.len());
                for item in items {
                    reduced.push(self.reduce_type_expression(item)?);
                }
                Some(TypeExpression::new(TypeExpressionKind::Tuple(reduced), location))
            }
            TypeExpressionKind::Function {
                far,
                parameter_types,
                return_type,
            } => {
                let mut parameters = Vec::with_capacity(parameter_types.len());
                for parameter in parameter_types {
                    parameters.push(self.reduce_type_expression(parameter)?);
                }
                let return_type = match return_type {
                    Some(return_type) => {
                        Some(Box::new(self.reduce_type_expression(return_type)?))
                    }
                    None => None,
                };
                Some(TypeExpression::new(
                    TypeExpressionKind::Function {
                        far: *far,
                        parameter_types: parameters,
                        return_type,
                    },
                    location,
                ))
            }
            TypeExpressionKind::DesignatedStorage {
                element_type,
                holder,
            } => {
                let element = self.reduce_type_expression(element_type)?;
                let holder = self.reduce_expression(holder)?;
                Some(TypeExpression::new(
                    TypeExpressionKind::DesignatedStorage {
                        element_type: Box::new(element),
                        holder: Box::new(holder),
                    },
                    location,
                ))
            }
            TypeExpressionKind::TypeOf(expression) => {
                let folded = self.reduce_expression(expression)?;
                match folded.ty().cloned() {
                    Some(ty) => Some(ty),
                    None => {
                        self.fold_error(
                            "could not determine the type of this expression".into(),
                            location,
                        );
                        None
                    }
                }
            }
        }
    }
}
