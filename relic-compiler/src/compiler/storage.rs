//! Pass 3 — storage reservation.
//!
//! Walks the statement tree with the `in`-block bank context, reserving
//! RAM variables and explicitly placed constants immediately. Constants
//! without an explicit `@` that share a bank with code are deferred to IR
//! layout (they become `Var` IR nodes in pass 4), so data interleaves with
//! code in declaration order instead of fighting it for addresses.

use relic_types::{DefinitionId, Qualifiers, SourceLocation};

use crate::ast::{Expression, ExpressionKind, Statement, StatementKind, TypeExpression, TypeExpressionKind};
use crate::bank::{BankId, ReservationNode};
use crate::compiler::Compiler;
use crate::definition::DefinitionKind;

impl Compiler {
    pub(crate) fn reserve_storage(&mut self, statement: &Statement) {
        self.reserve_storage_statement(statement);
    }

    /// Resolves an `in` statement header to its bank and optional seek
    /// destination.
    pub(crate) fn resolve_in_statement(
        &mut self,
        pieces: &[std::sync::Arc<str>],
        dest: Option<&Expression>,
        location: &SourceLocation,
    ) -> Option<(BankId, Option<usize>)> {
        let (definition, consumed) = self.resolve_identifier(pieces, location)?;
        if consumed != pieces.len() {
            self.raise_unresolved_identifier(pieces, consumed, location);
            return None;
        }
        self.ensure_definition_resolved(definition);
        let bank = match &self.definitions.get(definition).kind {
            DefinitionKind::Bank(bank) => bank.bank,
            _ => {
                self.fold_error(
                    format!("`{}` is not a bank", pieces.join(".")),
                    location.clone(),
                );
                return None;
            }
        }?;
        let dest = match dest {
            Some(dest) => {
                let folded = self.reduce_expression(dest)?;
                match folded.as_integer_literal() {
                    Some(value) if value >= 0 => Some(value as usize),
                    _ => {
                        self.fold_error(
                            "`in` destination must be a non-negative compile-time address".into(),
                            folded.location,
                        );
                        return None;
                    }
                }
            }
            None => None,
        };
        Some((bank, dest))
    }

    fn reserve_storage_statement(&mut self, statement: &Statement) {
        if !self.report.alive() {
            return;
        }
        match &statement.kind {
            StatementKind::Attribution { attributes, body } => {
                if !self.conditional_compilation_enabled(attributes) {
                    return;
                }
                self.reserve_storage_statement(body);
            }
            StatementKind::File { statements, .. } => {
                let scope = self
                    .find_statement_scope(statement)
                    .expect("file scope bound in pass 1");
                self.enter_scope(scope);
                for child in statements {
                    self.reserve_storage_statement(child);
                }
                self.exit_scope();
            }
            StatementKind::Block(children) => {
                let scope = self
                    .find_statement_scope(statement)
                    .expect("block scope bound in pass 1");
                self.enter_scope(scope);
                for child in children {
                    self.reserve_storage_statement(child);
                }
                self.exit_scope();
            }
            StatementKind::Namespace { body, .. } => {
                self.reserve_storage_statement(body);
            }
            StatementKind::Func { body, .. } => {
                self.reserve_storage_statement(body);
            }
            StatementKind::In {
                pieces,
                dest,
                body,
            } => {
                let resolved =
                    self.resolve_in_statement(pieces, dest.as_deref(), &statement.location);
                let Some((bank, dest)) = resolved else {
                    return;
                };
                if let Some(dest) = dest {
                    let location = statement.location.clone();
                    let bank_ref = self.banks.get_mut(bank);
                    bank_ref.absolute_seek(&mut self.report, dest, &location);
                }
                self.push_bank(Some(bank));
                self.reserve_storage_statement(body);
                self.pop_bank();
            }
            StatementKind::If {
                body, alternative, ..
            } => {
                self.reserve_storage_statement(body);
                if let Some(alternative) = alternative {
                    self.reserve_storage_statement(alternative);
                }
            }
            StatementKind::While { body, .. }
            | StatementKind::DoWhile { body, .. }
            | StatementKind::For { body, .. } => {
                self.reserve_storage_statement(body);
            }
            StatementKind::Var { names, .. } => {
                for name in names {
                    let definition = self
                        .scopes
                        .find_local_member_definition(self.current_scope, name);
                    if let Some(definition) = definition {
                        self.reserve_variable_storage(definition, &statement.location);
                    }
                }
            }
            StatementKind::Bank { names, .. } => {
                for name in names {
                    let definition = self
                        .scopes
                        .find_local_member_definition(self.current_scope, name);
                    if let Some(definition) = definition {
                        self.resolve_bank_origin(definition);
                    }
                }
            }
            _ => {}
        }
    }

    fn resolve_bank_origin(&mut self, definition: DefinitionId) {
        self.ensure_definition_resolved(definition);
        let (bank, address_expression) = match &self.definitions.get(definition).kind {
            DefinitionKind::Bank(bank) => (bank.bank, bank.address_expression.clone()),
            _ => return,
        };
        let (Some(bank), Some(address_expression)) = (bank, address_expression) else {
            return;
        };
        let folded = self.reduce_expression(&address_expression);
        match folded.as_ref().and_then(|e| e.as_integer_literal()) {
            Some(origin) if origin >= 0 => {
                self.banks.get_mut(bank).set_origin(origin as usize);
            }
            _ => {
                let location = address_expression.location.clone();
                self.report.plain_error(
                    "bank address must be a non-negative compile-time integer".into(),
                    location,
                );
            }
        }
    }

    /// Places one variable. RAM variables and explicitly addressed
    /// constants reserve now; other stored-bank constants defer to layout.
    fn reserve_variable_storage(&mut self, definition: DefinitionId, location: &SourceLocation) {
        self.ensure_definition_resolved(definition);
        let (qualifiers, resolved_type, storage_size, address_expression, initializer, description) = {
            let def = self.definitions.get(definition);
            let DefinitionKind::Var(var) = &def.kind else {
                return;
            };
            (
                var.qualifiers,
                var.resolved_type.clone(),
                var.storage_size,
                var.address_expression.clone(),
                var.initializer.clone(),
                def.description.clone(),
            )
        };

        let Some(resolved_type) = resolved_type else {
            return;
        };
        // Register-designated storage occupies no memory.
        if matches!(resolved_type.kind, TypeExpressionKind::DesignatedStorage { .. }) {
            return;
        }

        let explicit_address = match &address_expression {
            Some(expression) => {
                let folded = self.reduce_expression(expression);
                match folded.as_ref().and_then(|e| e.as_integer_literal()) {
                    Some(value) if value >= 0 => Some(value as usize),
                    _ => {
                        self.report.plain_error(
                            format!(
                                "address of {} must be a non-negative compile-time integer",
                                description
                            ),
                            location.clone(),
                        );
                        return;
                    }
                }
            }
            None => None,
        };

        // Serialize the initializer up front; deferred constants keep the
        // bytes on the definition until layout writes them.
        let init_data = match &initializer {
            Some(initializer) => {
                let folded = self.reduce_expression(initializer);
                match folded {
                    Some(folded) => {
                        let mut bytes = Vec::new();
                        if self.serialize_constant_initializer(&folded, &resolved_type, &mut bytes)
                        {
                            Some(bytes)
                        } else {
                            return;
                        }
                    }
                    None => return,
                }
            }
            None => None,
        };
        if let DefinitionKind::Var(var) = &mut self.definitions.get_mut(definition).kind {
            var.init_data = init_data.clone();
        }

        if qualifiers.contains(Qualifiers::EXTERN) {
            // Externs only record their address; nothing is reserved.
            if let Some(address) = explicit_address {
                if let DefinitionKind::Var(var) = &mut self.definitions.get_mut(definition).kind {
                    var.address = Some(crate::definition::Address {
                        relative_position: None,
                        absolute_position: Some(address),
                        bank: None,
                    });
                }
            }
            return;
        }

        let Some(size) = storage_size else {
            return;
        };
        let Some(bank) = self.current_bank else {
            self.report.plain_error(
                format!("{} must be declared inside an `in` block", description),
                location.clone(),
            );
            return;
        };

        let is_const = qualifiers.contains(Qualifiers::CONST);
        let bank_stored = self.banks.get(bank).kind().is_stored();

        if init_data.is_some() && !is_const && !bank_stored {
            self.report.plain_error(
                format!(
                    "{} has an initializer, which requires an initialized-data bank",
                    description
                ),
                location.clone(),
            );
            return;
        }
        if is_const && init_data.is_none() {
            self.report.plain_error(
                format!("{} must have an initializer", description),
                location.clone(),
            );
            return;
        }

        let needs_rom = is_const || init_data.is_some();
        if needs_rom && explicit_address.is_none() {
            // Deferred: placed by layout, between any surrounding code.
            return;
        }

        let node = ReservationNode::Definition(definition);
        {
            let location = location.clone();
            if let Some(address) = explicit_address {
                let bank_ref = self.banks.get_mut(bank);
                if !bank_ref.absolute_seek(&mut self.report, address, &location) {
                    return;
                }
            }
            let address = self.banks.get(bank).address();
            let reserved = {
                let bank_ref = self.banks.get_mut(bank);
                if needs_rom {
                    bank_ref.reserve_rom(&mut self.report, &description, node, location.clone(), size)
                } else {
                    bank_ref.reserve_ram(&mut self.report, &description, node, location.clone(), size)
                }
            };
            if !reserved {
                return;
            }
            if let Some(init_data) = &init_data {
                let start = address.relative_position.unwrap_or(0);
                let bank_ref = self.banks.get_mut(bank);
                bank_ref.set_relative_position(start);
                bank_ref.write(&mut self.report, &description, node, location, init_data);
            }
            if let DefinitionKind::Var(var) = &mut self.definitions.get_mut(definition).kind {
                var.address = Some(address);
                var.reserved = true;
            }
        }
    }

    /// Serializes a folded constant expression as the raw bytes of `ty`.
    pub(crate) fn serialize_constant_initializer(
        &mut self,
        expression: &Expression,
        ty: &TypeExpression,
        out: &mut Vec<u8>,
    ) -> bool {
        let ty = self.strip_type_alias(ty);
        let location = expression.location.clone();

        if let Some((min, max, size)) = self.integer_type_bounds(&ty) {
            let Some(value) = expression.as_integer_literal() else {
                self.report.plain_error(
                    "initializer must be a compile-time integer".into(),
                    location,
                );
                return false;
            };
            if value < min || value > max {
                self.report.plain_error(
                    format!(
                        "initializer value {} cannot be narrowed to `{}`",
                        value,
                        self.type_name(&ty)
                    ),
                    location,
                );
                return false;
            }
            let raw = value as u128;
            out.extend_from_slice(&raw.to_le_bytes()[..size]);
            return true;
        }

        match &ty.kind {
            TypeExpressionKind::ResolvedIdentifier(id) => {
                let id = *id;
                match &self.definitions.get(id).kind {
                    DefinitionKind::BuiltinBoolType => match expression.as_boolean_literal() {
                        Some(value) => {
                            out.push(value as u8);
                            true
                        }
                        None => {
                            self.report.plain_error(
                                "initializer must be a compile-time boolean".into(),
                                location,
                            );
                            false
                        }
                    },
                    DefinitionKind::Enum(_) => {
                        self.ensure_definition_resolved(id);
                        let underlying = match &self.definitions.get(id).kind {
                            DefinitionKind::Enum(enum_definition) => {
                                enum_definition.resolved_underlying_type.clone()
                            }
                            _ => None,
                        };
                        match underlying {
                            Some(underlying) => {
                                self.serialize_constant_initializer(expression, &underlying, out)
                            }
                            None => false,
                        }
                    }
                    DefinitionKind::Struct(_) => {
                        self.serialize_struct_initializer(expression, id, out)
                    }
                    _ => {
                        self.report.plain_error(
                            format!("cannot serialize a value of type `{}`", self.type_name(&ty)),
                            location,
                        );
                        false
                    }
                }
            }
            TypeExpressionKind::Array { element_type, size } => {
                let declared_length = size
                    .as_deref()
                    .and_then(|size| size.as_integer_literal())
                    .map(|length| length as usize);
                match &expression.kind {
                    ExpressionKind::ArrayLiteral(items) => {
                        if let Some(declared) = declared_length {
                            if items.len() != declared {
                                self.report.plain_error(
                                    format!(
                                        "initializer has {} element(s), but the type `{}` holds {}",
                                        items.len(),
                                        self.type_name(&ty),
                                        declared
                                    ),
                                    location,
                                );
                                return false;
                            }
                        }
                        for item in items {
                            if !self.serialize_constant_initializer(item, element_type, out) {
                                return false;
                            }
                        }
                        true
                    }
                    ExpressionKind::StringLiteral(value) => {
                        if let Some(declared) = declared_length {
                            if value.len() != declared {
                                self.report.plain_error(
                                    format!(
                                        "initializer has {} byte(s), but the type `{}` holds {}",
                                        value.len(),
                                        self.type_name(&ty),
                                        declared
                                    ),
                                    location,
                                );
                                return false;
                            }
                        }
                        out.extend_from_slice(value.as_bytes());
                        true
                    }
                    _ => {
                        self.report.plain_error(
                            "initializer must be a compile-time array".into(),
                            location,
                        );
                        false
                    }
                }
            }
            TypeExpressionKind::Pointer { qualifiers, .. } => {
                let pointer_type = if qualifiers.contains(Qualifiers::FAR) {
                    self.platform.far_pointer_sized_type()
                } else {
                    self.platform.pointer_sized_type()
                };
                let pointer_type = TypeExpression::resolved(pointer_type, location);
                self.serialize_constant_initializer(expression, &pointer_type, out)
            }
            _ => {
                self.report.plain_error(
                    format!("cannot serialize a value of type `{}`", self.type_name(&ty)),
                    location,
                );
                false
            }
        }
    }

    fn serialize_struct_initializer(
        &mut self,
        expression: &Expression,
        struct_id: DefinitionId,
        out: &mut Vec<u8>,
    ) -> bool {
        let location = expression.location.clone();
        let Some(total) = self.struct_size(struct_id, &location) else {
            return false;
        };
        let ExpressionKind::StructLiteral { items, .. } = &expression.kind else {
            self.report.plain_error(
                "initializer must be a compile-time struct literal".into(),
                location,
            );
            return false;
        };
        let environment = match &self.definitions.get(struct_id).kind {
            DefinitionKind::Struct(struct_definition) => struct_definition.environment,
            _ => return false,
        };

        let base = out.len();
        out.resize(base + total, 0);
        for (name, value) in items.clone() {
            let member = self
                .scopes
                .find_member_definitions(environment, &name)
                .first()
                .copied();
            let Some(member) = member else {
                self.report.plain_error(
                    format!(
                        "`{}` has no member named `{}`",
                        self.definitions.get(struct_id).name,
                        name
                    ),
                    value.location.clone(),
                );
                return false;
            };
            self.ensure_definition_resolved(member);
            let (member_type, offset) = match &self.definitions.get(member).kind {
                DefinitionKind::StructMember(member) => {
                    (member.resolved_type.clone(), member.offset)
                }
                _ => (None, None),
            };
            let (Some(member_type), Some(offset)) = (member_type, offset) else {
                return false;
            };
            let mut bytes = Vec::new();
            if !self.serialize_constant_initializer(&value, &member_type, &mut bytes) {
                return false;
            }
            out[base + offset..base + offset + bytes.len()].copy_from_slice(&bytes);
        }
        true
    }
}
