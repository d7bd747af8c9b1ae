//! Pass 2 — type resolution — and the type utilities every later pass
//! leans on.
//!
//! Definitions resolve on demand and memoize, so forward references work
//! in any declaration order; a resolution stack catches cycles
//! (`recursive definition`). Aliases stay as resolved identifiers and are
//! stripped lazily wherever sizes or equivalence matter.

use std::sync::Arc;

use relic_types::SourceLocation;

use crate::ast::{Expression, TypeExpression, TypeExpressionKind};
use crate::bank::Bank;
use crate::compiler::{Compiler, MAX_LET_RECURSION_DEPTH};
use crate::definition::DefinitionKind;
use crate::report::ReportErrorFlags;
use relic_types::DefinitionId;

impl Compiler {
    // ----- pass 2 -------------------------------------------------------

    pub(crate) fn resolve_definition_types(&mut self) {
        for id in self.definitions.ids().collect::<Vec<_>>() {
            if !self.report.alive() {
                return;
            }
            self.ensure_definition_resolved(id);
        }
    }

    /// Resolves one definition's declared types (and, for `let`s, its
    /// value), memoizing the result. Reentrant references are recursive
    /// definitions.
    pub(crate) fn ensure_definition_resolved(&mut self, id: DefinitionId) {
        if self.type_resolution_stack.contains(&id) {
            let definition = self.definitions.get(id);
            let (name, declaration) = (definition.name.clone(), definition.declaration.clone());
            self.report.error(
                format!("recursive definition of `{}`", name),
                declaration.clone(),
                ReportErrorFlags::CONTINUED,
            );
            self.report.plain_error(
                format!("`{}` depends on itself while being evaluated", name),
                declaration,
            );
            return;
        }
        self.type_resolution_stack.push(id);
        self.resolve_definition_type_inner(id);
        self.type_resolution_stack.pop();
    }

    fn resolve_definition_type_inner(&mut self, id: DefinitionId) {
        let definition = self.definitions.get(id);
        let parent_scope = definition.parent_scope;
        let declaration = definition.declaration.clone();

        // Resolution happens in the scope the definition was declared in.
        let saved_scope = self.current_scope;
        if let Some(scope) = parent_scope {
            self.current_scope = scope;
        }

        match &definition.kind {
            DefinitionKind::Var(var) => {
                if var.resolved_type.is_some() {
                    self.current_scope = saved_scope;
                    return;
                }
                let declared = var.type_expression.clone();
                let initializer = var.initializer.clone();

                let mut resolved = match &declared {
                    Some(ty) => self.reduce_type_expression(ty),
                    None => None,
                };
                if resolved.is_none() {
                    // Infer from the initializer expression.
                    if let Some(initializer) = &initializer {
                        if declared.is_none() {
                            let folded = self.reduce_expression(initializer);
                            resolved = folded.and_then(|e| e.ty().cloned());
                            if resolved.is_none() {
                                self.report.plain_error(
                                    format!(
                                        "could not infer a type for {}",
                                        self.definitions.get(id).description
                                    ),
                                    declaration.clone(),
                                );
                            }
                        }
                    } else if declared.is_none() {
                        self.report.plain_error(
                            format!(
                                "{} must have a type or an initializer",
                                self.definitions.get(id).description
                            ),
                            declaration.clone(),
                        );
                    }
                }

                // Fill an inferred array length from the initializer.
                if let Some(TypeExpression {
                    kind: TypeExpressionKind::Array { size, .. },
                    location,
                }) = &mut resolved
                {
                    if size.is_none() {
                        if let Some(initializer) = &initializer {
                            if let Some(length) = self.sequence_literal_length(initializer) {
                                *size = Some(Box::new(Expression::integer(
                                    length as i128,
                                    location.clone(),
                                )));
                            }
                        }
                    }
                }

                if let DefinitionKind::Var(var) = &mut self.definitions.get_mut(id).kind {
                    var.resolved_type = resolved;
                }
                let storage_size = {
                    let resolved = match &self.definitions.get(id).kind {
                        DefinitionKind::Var(var) => var.resolved_type.clone(),
                        _ => None,
                    };
                    resolved.and_then(|ty| self.type_storage_size(&ty, &declaration))
                };
                if let DefinitionKind::Var(var) = &mut self.definitions.get_mut(id).kind {
                    var.storage_size = storage_size;
                }
            }
            DefinitionKind::Func(func) => {
                if func.resolved_signature.is_some() {
                    self.current_scope = saved_scope;
                    return;
                }
                let far = func.far;
                let parameters = func.parameters.clone();
                let return_type = func.return_type.clone();

                let mut parameter_types = Vec::with_capacity(parameters.len());
                for &parameter in &parameters {
                    self.ensure_definition_resolved(parameter);
                    let resolved = match &self.definitions.get(parameter).kind {
                        DefinitionKind::Var(var) => var.resolved_type.clone(),
                        _ => None,
                    };
                    if let Some(resolved) = resolved {
                        parameter_types.push(resolved);
                    }
                }
                let resolved_return = match &return_type {
                    Some(ty) => self.reduce_type_expression(ty).map(Box::new),
                    None => None,
                };
                let signature = TypeExpression::new(
                    TypeExpressionKind::Function {
                        far,
                        parameter_types,
                        return_type: resolved_return,
                    },
                    declaration.clone(),
                );
                if let DefinitionKind::Func(func) = &mut self.definitions.get_mut(id).kind {
                    func.resolved_signature = Some(signature);
                }
            }
            DefinitionKind::Let(let_definition) => {
                if let_definition.evaluated || !let_definition.parameters.is_empty() {
                    self.current_scope = saved_scope;
                    return;
                }
                let name = self.definitions.get(id).name.clone();
                let expression = let_definition.expression.clone();
                if self.enter_let_expression(&name, &declaration) {
                    let folded = self.reduce_expression(&expression);
                    self.exit_let_expression();
                    if let Some(folded) = folded {
                        if let DefinitionKind::Let(let_definition) =
                            &mut self.definitions.get_mut(id).kind
                        {
                            let_definition.expression = folded;
                            let_definition.evaluated = true;
                        }
                    }
                }
            }
            DefinitionKind::Enum(enum_definition) => {
                if enum_definition.resolved_underlying_type.is_some() {
                    self.current_scope = saved_scope;
                    return;
                }
                let underlying = enum_definition.underlying_type.clone();
                let members = enum_definition.members.clone();
                let resolved = self.reduce_type_expression(&underlying);
                if let DefinitionKind::Enum(enum_definition) =
                    &mut self.definitions.get_mut(id).kind
                {
                    enum_definition.resolved_underlying_type = resolved;
                }
                let mut next_value: i128 = 0;
                for member in members {
                    let expression = match &self.definitions.get(member).kind {
                        DefinitionKind::EnumMember(member) => member.expression.clone(),
                        _ => None,
                    };
                    let value = match expression {
                        Some(expression) => {
                            let folded = self.reduce_expression(&expression);
                            match folded.as_ref().and_then(|e| e.as_integer_literal()) {
                                Some(value) => value,
                                None => {
                                    self.report.plain_error(
                                        format!(
                                            "value of {} must be a compile-time integer",
                                            self.definitions.get(member).description
                                        ),
                                        self.definitions.get(member).declaration.clone(),
                                    );
                                    next_value
                                }
                            }
                        }
                        None => next_value,
                    };
                    next_value = value.wrapping_add(1);
                    if let DefinitionKind::EnumMember(member) =
                        &mut self.definitions.get_mut(member).kind
                    {
                        member.value = Some(value);
                    }
                }
            }
            DefinitionKind::Struct(_) => {
                // Member types resolve on their own; forcing the size here
                // surfaces recursive layouts early.
                self.struct_size(id, &declaration);
            }
            DefinitionKind::StructMember(member) => {
                if member.resolved_type.is_some() {
                    self.current_scope = saved_scope;
                    return;
                }
                let ty = member.type_expression.clone();
                let resolved = self.reduce_type_expression(&ty);
                if let DefinitionKind::StructMember(member) =
                    &mut self.definitions.get_mut(id).kind
                {
                    member.resolved_type = resolved;
                }
            }
            DefinitionKind::TypeAlias {
                resolved_type: Some(_),
                ..
            } => {}
            DefinitionKind::TypeAlias {
                type_expression, ..
            } => {
                let ty = type_expression.clone();
                let resolved = self.reduce_type_expression(&ty);
                if let DefinitionKind::TypeAlias { resolved_type, .. } =
                    &mut self.definitions.get_mut(id).kind
                {
                    *resolved_type = resolved;
                }
            }
            DefinitionKind::Bank(bank) => {
                if bank.bank.is_some() {
                    self.current_scope = saved_scope;
                    return;
                }
                let ty = bank.type_expression.clone();
                let name = self.definitions.get(id).name.clone();
                self.resolve_bank_definition(id, &name, &ty, &declaration);
            }
            _ => {}
        }

        self.current_scope = saved_scope;
    }

    fn resolve_bank_definition(
        &mut self,
        id: DefinitionId,
        name: &Arc<str>,
        ty: &TypeExpression,
        declaration: &SourceLocation,
    ) {
        let TypeExpressionKind::Array { element_type, size } = &ty.kind else {
            self.report.plain_error(
                format!("bank `{}` must have an array type like `[vardata; 256]`", name),
                declaration.clone(),
            );
            return;
        };
        let element = self.reduce_type_expression(element_type);
        let kind = element
            .as_ref()
            .and_then(|ty| ty.as_resolved_identifier())
            .and_then(|def| match &self.definitions.get(def).kind {
                DefinitionKind::BuiltinBankType(kind) => Some(*kind),
                _ => None,
            });
        let Some(kind) = kind else {
            self.report.plain_error(
                format!(
                    "bank `{}` must use a bank element type (`vardata`, `prgdata`, `constdata`, `chrdata`, `varinitdata`)",
                    name
                ),
                declaration.clone(),
            );
            return;
        };
        let capacity = match size {
            Some(size) => {
                let folded = self.reduce_expression(size);
                match folded.as_ref().and_then(|e| e.as_integer_literal()) {
                    Some(value) if value > 0 => Some(value as usize),
                    _ => {
                        self.report.plain_error(
                            format!("bank `{}` must have a positive compile-time size", name),
                            declaration.clone(),
                        );
                        None
                    }
                }
            }
            None => {
                self.report.plain_error(
                    format!("bank `{}` must declare a size", name),
                    declaration.clone(),
                );
                None
            }
        };
        let Some(capacity) = capacity else { return };
        let bank_id = self.banks.create(
            name.clone(),
            kind,
            None,
            capacity,
            Bank::DEFAULT_PAD_VALUE,
        );
        if let DefinitionKind::Bank(bank) = &mut self.definitions.get_mut(id).kind {
            bank.bank = Some(bank_id);
            bank.kind = Some(kind);
        }
    }

    // ----- let recursion guard ------------------------------------------

    pub(crate) fn enter_let_expression(&mut self, name: &Arc<str>, location: &SourceLocation) -> bool {
        if let Some((_, previous)) = self
            .let_stack
            .iter()
            .find(|(existing, _)| existing == name)
            .cloned()
        {
            self.report.error(
                format!("recursive definition of `{}`", name),
                location.clone(),
                ReportErrorFlags::CONTINUED,
            );
            self.report.plain_error(
                format!("`{}` was first evaluated here", name),
                previous,
            );
            return false;
        }
        if self.let_stack.len() >= MAX_LET_RECURSION_DEPTH {
            self.report.plain_error(
                format!(
                    "evaluation of `{}` exceeded the maximum recursion depth of {}",
                    name, MAX_LET_RECURSION_DEPTH
                ),
                location.clone(),
            );
            return false;
        }
        self.let_stack.push((name.clone(), location.clone()));
        true
    }

    pub(crate) fn exit_let_expression(&mut self) {
        self.let_stack.pop().expect("let stack underflow");
    }

    // ----- type utilities -----------------------------------------------

    /// Follows type aliases to the underlying type expression.
    pub(crate) fn strip_type_alias(&mut self, ty: &TypeExpression) -> TypeExpression {
        let mut current = ty.clone();
        for _ in 0..64 {
            let Some(id) = current.as_resolved_identifier() else {
                return current;
            };
            if !matches!(&self.definitions.get(id).kind, DefinitionKind::TypeAlias { .. }) {
                return current;
            }
            self.ensure_definition_resolved(id);
            match &self.definitions.get(id).kind {
                DefinitionKind::TypeAlias {
                    resolved_type: Some(resolved),
                    ..
                } => current = resolved.clone(),
                _ => return current,
            }
        }
        current
    }

    /// Size in bytes a value of `ty` occupies in storage, or `None` with a
    /// diagnostic when the type has no storage representation.
    pub(crate) fn type_storage_size(
        &mut self,
        ty: &TypeExpression,
        location: &SourceLocation,
    ) -> Option<usize> {
        let ty = self.strip_type_alias(ty);
        match &ty.kind {
            TypeExpressionKind::ResolvedIdentifier(id) => {
                let id = *id;
                match &self.definitions.get(id).kind {
                    DefinitionKind::BuiltinBoolType => Some(1),
                    DefinitionKind::BuiltinIntegerType(int) => Some(int.size),
                    DefinitionKind::Struct(_) => self.struct_size(id, location),
                    DefinitionKind::Enum(_) => {
                        self.ensure_definition_resolved(id);
                        let underlying = match &self.definitions.get(id).kind {
                            DefinitionKind::Enum(enum_definition) => {
                                enum_definition.resolved_underlying_type.clone()
                            }
                            _ => None,
                        };
                        underlying.and_then(|ty| self.type_storage_size(&ty, location))
                    }
                    _ => {
                        let name = self.definitions.get(id).name.clone();
                        self.report.plain_error(
                            format!("type `{}` has no storage size", name),
                            location.clone(),
                        );
                        None
                    }
                }
            }
            TypeExpressionKind::Array { element_type, size } => {
                let element = self.type_storage_size(element_type, location)?;
                let length = size
                    .as_deref()
                    .and_then(|size| size.as_integer_literal())
                    .or_else(|| {
                        // Sizes written in source may still need a fold.
                        size.as_deref().and_then(|size| {
                            self.reduce_expression_quiet(size)
                                .and_then(|e| e.as_integer_literal())
                        })
                    });
                match length {
                    Some(length) if length >= 0 => Some(element * length as usize),
                    _ => {
                        self.report.plain_error(
                            "array type must have a compile-time length".into(),
                            location.clone(),
                        );
                        None
                    }
                }
            }
            TypeExpressionKind::Pointer { qualifiers, .. } => {
                let id = if qualifiers.contains(relic_types::Qualifiers::FAR) {
                    self.platform.far_pointer_sized_type()
                } else {
                    self.platform.pointer_sized_type()
                };
                match &self.definitions.get(id).kind {
                    DefinitionKind::BuiltinIntegerType(int) => Some(int.size),
                    _ => Some(2),
                }
            }
            TypeExpressionKind::Tuple(items) if items.is_empty() => Some(0),
            TypeExpressionKind::DesignatedStorage { .. } => Some(0),
            _ => {
                self.report.plain_error(
                    format!("type `{}` has no storage size", self.type_name(&ty)),
                    location.clone(),
                );
                None
            }
        }
    }

    /// Computes (and caches) a struct or union's layout.
    pub(crate) fn struct_size(
        &mut self,
        id: DefinitionId,
        location: &SourceLocation,
    ) -> Option<usize> {
        let (kind, members, cached) = match &self.definitions.get(id).kind {
            DefinitionKind::Struct(struct_definition) => (
                struct_definition.kind,
                struct_definition.members.clone(),
                struct_definition.size,
            ),
            _ => return None,
        };
        if let Some(size) = cached {
            return Some(size);
        }
        if self.type_resolution_stack.contains(&id) {
            let definition = self.definitions.get(id);
            let (name, declaration) = (definition.name.clone(), definition.declaration.clone());
            self.report.plain_error(
                format!("recursive definition of `{}`", name),
                declaration,
            );
            return None;
        }
        self.type_resolution_stack.push(id);

        let mut total = 0usize;
        let mut largest = 0usize;
        let mut resolved_all = true;
        for member in members {
            self.ensure_definition_resolved(member);
            let member_type = match &self.definitions.get(member).kind {
                DefinitionKind::StructMember(member) => member.resolved_type.clone(),
                _ => None,
            };
            let member_size = member_type.and_then(|ty| self.type_storage_size(&ty, location));
            let Some(member_size) = member_size else {
                resolved_all = false;
                continue;
            };
            let offset = match kind {
                crate::ast::StructKind::Struct => {
                    let offset = total;
                    total += member_size;
                    offset
                }
                crate::ast::StructKind::Union => {
                    largest = largest.max(member_size);
                    0
                }
            };
            if let DefinitionKind::StructMember(member) =
                &mut self.definitions.get_mut(member).kind
            {
                member.offset = Some(offset);
            }
        }
        self.type_resolution_stack.pop();

        if !resolved_all {
            return None;
        }
        let size = match kind {
            crate::ast::StructKind::Struct => total,
            crate::ast::StructKind::Union => largest,
        };
        if let DefinitionKind::Struct(struct_definition) = &mut self.definitions.get_mut(id).kind {
            struct_definition.size = Some(size);
        }
        Some(size)
    }

    /// Whether `ty` is an integer type (sized or `iexpr`).
    pub(crate) fn is_integer_type(&mut self, ty: &TypeExpression) -> bool {
        let ty = self.strip_type_alias(ty);
        match ty.as_resolved_identifier() {
            Some(id) => matches!(
                &self.definitions.get(id).kind,
                DefinitionKind::BuiltinIntegerType(..)
                    | DefinitionKind::BuiltinIntegerExpressionType
            ),
            None => false,
        }
    }

    /// Whether `ty` is the boolean type.
    pub(crate) fn is_boolean_type(&mut self, ty: &TypeExpression) -> bool {
        let ty = self.strip_type_alias(ty);
        match ty.as_resolved_identifier() {
            Some(id) => matches!(
                &self.definitions.get(id).kind,
                DefinitionKind::BuiltinBoolType
            ),
            None => false,
        }
    }

    /// Bounds of a sized integer type; `None` for `iexpr` and non-ints.
    pub(crate) fn integer_type_bounds(&mut self, ty: &TypeExpression) -> Option<(i128, i128, usize)> {
        let ty = self.strip_type_alias(ty);
        let id = ty.as_resolved_identifier()?;
        match &self.definitions.get(id).kind {
            DefinitionKind::BuiltinIntegerType(int) => Some((int.min, int.max, int.size)),
            _ => None,
        }
    }

    /// Whether a compile-time `value` fits into `ty`.
    pub(crate) fn can_narrow_value(&mut self, value: i128, ty: &TypeExpression) -> bool {
        match self.integer_type_bounds(ty) {
            Some((min, max, _)) => min <= value && value <= max,
            // iexpr and unknown targets accept anything; selection ranges
            // catch the rest.
            None => true,
        }
    }

    /// A human-readable name for diagnostics.
    pub(crate) fn type_name(&self, ty: &TypeExpression) -> String {
        match &ty.kind {
            TypeExpressionKind::Array { element_type, size } => {
                let size = size
                    .as_deref()
                    .and_then(|size| size.as_integer_literal())
                    .map(|size| format!("; {}", size))
                    .unwrap_or_default();
                format!("[{}{}]", self.type_name(element_type), size)
            }
            TypeExpressionKind::DesignatedStorage { element_type, .. } => {
                format!("{} in <register>", self.type_name(element_type))
            }
            TypeExpressionKind::Function { far, .. } => {
                if *far {
                    "far func".into()
                } else {
                    "func".into()
                }
            }
            TypeExpressionKind::Identifier(pieces) => pieces.join("."),
            TypeExpressionKind::Pointer {
                element_type,
                qualifiers,
            } => {
                let mut name = String::new();
                if qualifiers.contains(relic_types::Qualifiers::FAR) {
                    name.push_str("far ");
                }
                name.push('*');
                if qualifiers.contains(relic_types::Qualifiers::CONST) {
                    name.push_str("const ");
                }
                name.push_str(&self.type_name(element_type));
                name
            }
            TypeExpressionKind::ResolvedIdentifier(id) => {
                self.definitions.get(*id).name.to_string()
            }
            TypeExpressionKind::Tuple(items) => {
                let items = items
                    .iter()
                    .map(|item| self.type_name(item))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({})", items)
            }
            TypeExpressionKind::TypeOf(..) => "typeof(...)".into(),
        }
    }

    /// Structural equivalence after alias stripping.
    pub(crate) fn is_type_equivalent(&mut self, left: &TypeExpression, right: &TypeExpression) -> bool {
        let left = self.strip_type_alias(left);
        let right = self.strip_type_alias(right);
        match (&left.kind, &right.kind) {
            (
                TypeExpressionKind::ResolvedIdentifier(a),
                TypeExpressionKind::ResolvedIdentifier(b),
            ) => a == b,
            (
                TypeExpressionKind::Array {
                    element_type: a,
                    size: a_size,
                },
                TypeExpressionKind::Array {
                    element_type: b,
                    size: b_size,
                },
            ) => {
                self.is_type_equivalent(a, b)
                    && a_size.as_deref().and_then(Expression::as_integer_literal)
                        == b_size.as_deref().and_then(Expression::as_integer_literal)
            }
            (
                TypeExpressionKind::Pointer {
                    element_type: a,
                    qualifiers: a_quals,
                },
                TypeExpressionKind::Pointer {
                    element_type: b,
                    qualifiers: b_quals,
                },
            ) => a_quals == b_quals && self.is_type_equivalent(a, b),
            (TypeExpressionKind::Tuple(a), TypeExpressionKind::Tuple(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(a, b)| self.is_type_equivalent(&a.clone(), &b.clone()))
            }
            _ => false,
        }
    }

    /// The byte size of an expression's annotated type, defaulting to 1
    /// when unannotated or `iexpr`.
    pub(crate) fn expression_value_size(&mut self, expression: &Expression) -> usize {
        let Some(ty) = expression.ty().cloned() else {
            return 1;
        };
        let ty = self.strip_type_alias(&ty);
        if let Some(id) = ty.as_resolved_identifier() {
            match &self.definitions.get(id).kind {
                DefinitionKind::BuiltinIntegerType(int) => return int.size,
                DefinitionKind::BuiltinBoolType => return 1,
                DefinitionKind::BuiltinRegister(register) => return register.size,
                _ => {}
            }
        }
        let location = expression.location.clone();
        self.type_storage_size(&ty, &location).unwrap_or(1)
    }

    /// Length of a compile-time sequence literal (array or string), if the
    /// expression is one.
    pub(crate) fn sequence_literal_length(&mut self, expression: &Expression) -> Option<usize> {
        let folded = self.reduce_expression_quiet(expression)?;
        match &folded.kind {
            crate::ast::ExpressionKind::ArrayLiteral(items) => Some(items.len()),
            crate::ast::ExpressionKind::StringLiteral(value) => Some(value.len()),
            _ => None,
        }
    }
}
