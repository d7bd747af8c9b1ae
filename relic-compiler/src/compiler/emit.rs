//! Pass 4 — IR emission.
//!
//! Statements lower into the IR stream: relocation scopes for `in`
//! blocks, labels, and `Code` nodes holding a selected instruction with
//! its operand roots. Sub-expressions lower bottom-up into
//! [`InstructionOperand`] trees; control flow goes through the platform's
//! test-and-branch lowering with anonymous labels for targets; inline
//! calls splice the callee's body under a fresh inline site.

use std::sync::Arc;

use itertools::Itertools;
use relic_asm::{BranchKind, InstructionOperand, InstructionType};
use relic_types::{BinaryOperator, DefinitionId, Qualifiers, SourceLocation, UnaryOperator};

use crate::ast::{
    DistanceHint, Expression, ExpressionKind, Statement, StatementKind, TypeExpressionKind,
};
use crate::builtins::Builtins;
use crate::compiler::{Compiler, PendingFunctionAttributes};
use crate::definition::{Definition, DefinitionKind, FuncDefinition, FuncReturnKind};
use crate::ir::{IrNode, IrNodeKind, OperandRoot};
use crate::report::ReportErrorFlags;

impl Compiler {
    pub(crate) fn emit_program_ir(&mut self, program: &Statement) {
        self.emit_statement_ir(program);
    }

    // ----- operand lowering ---------------------------------------------

    /// Lowers a reduced expression into an operand tree. With `quiet`,
    /// failures return `None` silently (used for dest/source equivalence
    /// probing).
    pub(crate) fn create_operand_from_expression(
        &mut self,
        expression: &Expression,
        quiet: bool,
    ) -> Option<InstructionOperand> {
        let result = self.create_operand_inner(expression);
        if result.is_none() && !quiet {
            self.report.plain_error(
                "expression cannot be used as an instruction operand".into(),
                expression.location.clone(),
            );
        }
        result
    }

    fn placeholder_address(&self) -> InstructionOperand {
        InstructionOperand::placeholder(self.platform.placeholder_value())
    }

    fn definition_address_operand(&mut self, definition: DefinitionId) -> InstructionOperand {
        let address = self.definitions.get(definition).address();
        match address.and_then(|address| address.absolute_position) {
            Some(absolute) => InstructionOperand::integer(absolute as i128),
            None => self.placeholder_address(),
        }
    }

    fn create_operand_inner(&mut self, expression: &Expression) -> Option<InstructionOperand> {
        match &expression.kind {
            ExpressionKind::IntegerLiteral(value) => Some(InstructionOperand::integer(*value)),
            ExpressionKind::BooleanLiteral(value) => Some(InstructionOperand::boolean(*value)),
            ExpressionKind::ResolvedIdentifier(definition) => {
                let definition = *definition;
                match &self.definitions.get(definition).kind {
                    DefinitionKind::BuiltinRegister(..) => {
                        Some(InstructionOperand::Register(definition))
                    }
                    DefinitionKind::Var(var) => {
                        let far = var.qualifiers.contains(Qualifiers::FAR);
                        let size = var.storage_size.unwrap_or(1);
                        let resolved = var.resolved_type.clone();
                        let address = self.definition_address_operand(definition);
                        // Arrays and structs are addressed per element or
                        // member; a whole-value operand uses the scalar
                        // size when the type has one.
                        let size = match resolved.map(|ty| ty.kind) {
                            Some(TypeExpressionKind::Array { .. }) => size,
                            _ => size.max(1),
                        };
                        Some(InstructionOperand::Dereference {
                            far,
                            operand: Box::new(address),
                            size,
                        })
                    }
                    DefinitionKind::Func(..) => Some(self.definition_address_operand(definition)),
                    _ => None,
                }
            }
            ExpressionKind::UnaryOperator { op, operand } => {
                let op = *op;
                match op {
                    UnaryOperator::AddressOf | UnaryOperator::FarAddressOf => {
                        let inner = self.create_operand_inner(operand)?;
                        match inner {
                            InstructionOperand::Dereference { operand, .. } => Some(*operand),
                            _ => None,
                        }
                    }
                    UnaryOperator::Indirection => {
                        let inner = self.create_operand_inner(operand)?;
                        let far = operand
                            .ty()
                            .map(|ty| match &ty.kind {
                                TypeExpressionKind::Pointer { qualifiers, .. } => {
                                    qualifiers.contains(Qualifiers::FAR)
                                }
                                _ => false,
                            })
                            .unwrap_or(false);
                        let size = self.expression_value_size(expression);
                        Some(InstructionOperand::Dereference {
                            far,
                            operand: Box::new(inner),
                            size,
                        })
                    }
                    UnaryOperator::LowByte | UnaryOperator::HighByte | UnaryOperator::BankByte => {
                        let inner = self.create_operand_inner(operand)?;
                        match inner {
                            InstructionOperand::Integer { value, placeholder } => {
                                let computed = match op {
                                    UnaryOperator::LowByte => value & 0xFF,
                                    UnaryOperator::HighByte => (value >> 8) & 0xFF,
                                    _ => (value >> 16) & 0xFF,
                                };
                                Some(InstructionOperand::Integer {
                                    value: computed,
                                    placeholder,
                                })
                            }
                            other => Some(InstructionOperand::Unary {
                                op,
                                operand: Box::new(other),
                            }),
                        }
                    }
                    _ => {
                        let inner = self.create_operand_inner(operand)?;
                        Some(InstructionOperand::Unary {
                            op,
                            operand: Box::new(inner),
                        })
                    }
                }
            }
            ExpressionKind::BinaryOperator { op, left, right } => match op {
                BinaryOperator::Indexing => self.create_indexing_operand(left, right),
                BinaryOperator::BitIndexing => {
                    let left = self.create_operand_inner(left)?;
                    let right = self.create_operand_inner(right)?;
                    Some(InstructionOperand::BitIndex {
                        operand: Box::new(left),
                        subscript: Box::new(right),
                    })
                }
                _ => {
                    let left = self.create_operand_inner(left)?;
                    let right = self.create_operand_inner(right)?;
                    Some(InstructionOperand::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    })
                }
            },
            ExpressionKind::Cast { operand, ty } => {
                let target_size = {
                    let ty = (**ty).clone();
                    let location = expression.location.clone();
                    self.type_storage_size(&ty, &location)
                };
                let inner = self.create_operand_inner(operand)?;
                match (inner, target_size) {
                    (
                        InstructionOperand::Dereference { far, operand, .. },
                        Some(size),
                    ) if size > 0 => Some(InstructionOperand::Dereference { far, operand, size }),
                    (inner, _) => Some(inner),
                }
            }
            ExpressionKind::FieldAccess { operand, field } => {
                self.create_field_access_operand(operand, field, &expression.location)
            }
            _ => None,
        }
    }

    fn create_indexing_operand(
        &mut self,
        left: &Expression,
        right: &Expression,
    ) -> Option<InstructionOperand> {
        let element_size = left
            .ty()
            .and_then(|ty| match &ty.kind {
                TypeExpressionKind::Array { element_type, .. }
                | TypeExpressionKind::Pointer { element_type, .. } => {
                    let element_type = (**element_type).clone();
                    let location = left.location.clone();
                    self.type_storage_size(&element_type, &location)
                }
                _ => None,
            })
            .unwrap_or(1);
        let far = left.qualifiers().contains(Qualifiers::FAR)
            || left
                .ty()
                .map(|ty| match &ty.kind {
                    TypeExpressionKind::Pointer { qualifiers, .. } => {
                        qualifiers.contains(Qualifiers::FAR)
                    }
                    _ => false,
                })
                .unwrap_or(false);

        let base = self.create_operand_inner(left)?;
        let base_address = match base {
            // Indexing a memory value addresses its first byte.
            InstructionOperand::Dereference { operand, .. } => *operand,
            InstructionOperand::Register(register) => InstructionOperand::Register(register),
            other => other,
        };
        let subscript = self.create_operand_inner(right)?;

        match (&base_address, &subscript) {
            (
                InstructionOperand::Integer {
                    value: base_value,
                    placeholder: false,
                },
                InstructionOperand::Integer {
                    value: index,
                    placeholder: false,
                },
            ) => Some(InstructionOperand::Dereference {
                far,
                operand: Box::new(InstructionOperand::integer(
                    base_value + index * element_size as i128,
                )),
                size: element_size,
            }),
            _ => Some(InstructionOperand::Index {
                far,
                operand: Box::new(base_address),
                subscript: Box::new(subscript),
                subscript_scale: element_size,
                size: element_size,
            }),
        }
    }

    fn create_field_access_operand(
        &mut self,
        base: &Expression,
        field: &Arc<str>,
        location: &SourceLocation,
    ) -> Option<InstructionOperand> {
        let struct_id = base.ty().cloned().and_then(|ty| {
            let stripped = self.strip_type_alias(&ty);
            stripped.as_resolved_identifier()
        })?;
        let environment = match &self.definitions.get(struct_id).kind {
            DefinitionKind::Struct(struct_definition) => struct_definition.environment,
            _ => return None,
        };
        let member = self
            .scopes
            .find_member_definitions(environment, field)
            .first()
            .copied()?;
        self.ensure_definition_resolved(member);
        let (offset, member_type) = match &self.definitions.get(member).kind {
            DefinitionKind::StructMember(member) => {
                (member.offset, member.resolved_type.clone())
            }
            _ => (None, None),
        };
        let offset = offset?;
        let size = member_type.and_then(|ty| self.type_storage_size(&ty, location))?;

        let base_operand = self.create_operand_inner(base)?;
        match base_operand {
            InstructionOperand::Dereference { far, operand, .. } => match *operand {
                InstructionOperand::Integer { value, placeholder } => {
                    Some(InstructionOperand::Dereference {
                        far,
                        operand: Box::new(InstructionOperand::Integer {
                            value: value + offset as i128,
                            placeholder,
                        }),
                        size,
                    })
                }
                other => Some(InstructionOperand::Dereference {
                    far,
                    operand: Box::new(InstructionOperand::Binary {
                        op: BinaryOperator::Addition,
                        left: Box::new(other),
                        right: Box::new(InstructionOperand::integer(offset as i128)),
                    }),
                    size,
                }),
            },
            _ => None,
        }
    }

    // ----- instruction emission -----------------------------------------

    fn describe_instruction_type(&self, instruction_type: InstructionType) -> String {
        match instruction_type {
            InstructionType::Branch(kind) => format!("{:?}", kind).to_lowercase(),
            InstructionType::Unary(op) => op.name(),
            InstructionType::Binary(op) => op.name(),
            InstructionType::VoidIntrinsic(definition)
            | InstructionType::LoadIntrinsic(definition) => {
                format!("intrinsic `{}`", self.definitions.get(definition).name)
            }
        }
    }

    fn raise_selection_error(
        &mut self,
        instruction_type: InstructionType,
        roots: &[OperandRoot],
        location: &SourceLocation,
    ) {
        let operands = roots
            .iter()
            .map(|root| root.operand.describe(&self.definitions))
            .join(", ");
        let candidates: Vec<String> = self
            .builtins
            .instruction_set
            .find_by_type(instruction_type)
            .iter()
            .map(|instruction| instruction.signature.describe_operands(&self.definitions))
            .collect();
        let message = format!(
            "could not generate code for {} with operands ({})",
            self.describe_instruction_type(instruction_type),
            operands
        );
        if candidates.is_empty() {
            self.report.plain_error(message, location.clone());
            return;
        }
        self.report
            .error(message, location.clone(), ReportErrorFlags::CONTINUED);
        let last = candidates.len() - 1;
        for (index, candidate) in candidates.into_iter().enumerate() {
            let flags = if index == last {
                ReportErrorFlags::empty()
            } else {
                ReportErrorFlags::CONTINUED
            };
            self.report.error(
                format!("candidate form: ({})", candidate),
                location.clone(),
                flags,
            );
        }
    }

    fn lower_operand_roots(&mut self, operands: Vec<Expression>) -> Option<Vec<OperandRoot>> {
        let mut roots = Vec::with_capacity(operands.len());
        for expression in operands {
            let operand = self.create_operand_from_expression(&expression, false)?;
            roots.push(OperandRoot::new(Some(expression), operand));
        }
        Some(roots)
    }

    /// Selects and emits one instruction. Returns whether a form matched.
    pub(crate) fn emit_instruction(
        &mut self,
        instruction_type: InstructionType,
        operands: Vec<Expression>,
        location: &SourceLocation,
    ) -> bool {
        let Some(roots) = self.lower_operand_roots(operands) else {
            return false;
        };
        let operand_refs: Vec<&InstructionOperand> =
            roots.iter().map(|root| &root.operand).collect();
        let selected = self
            .builtins
            .instruction_set
            .select(instruction_type, self.mode_flags, &operand_refs)
            .map(|(index, _)| index);
        drop(operand_refs);
        match selected {
            Some(index) => {
                self.ir.push(IrNode::new(
                    IrNodeKind::Code {
                        instruction: index,
                        operand_roots: roots,
                        short_form: None,
                        branch_target: None,
                    },
                    location.clone(),
                ));
                true
            }
            None => {
                self.raise_selection_error(instruction_type, &roots, location);
                false
            }
        }
    }

    /// Emits a branch, choosing between short and long forms: an explicit
    /// hint forces one; otherwise the long form is taken pessimistically
    /// and layout shrinks it when the distance allows.
    fn emit_branch_instruction(
        &mut self,
        kind: BranchKind,
        operands: Vec<Expression>,
        distance_hint: DistanceHint,
        location: &SourceLocation,
    ) -> bool {
        let Some(roots) = self.lower_operand_roots(operands) else {
            return false;
        };
        let instruction_type = InstructionType::Branch(kind);
        let operand_refs: Vec<&InstructionOperand> =
            roots.iter().map(|root| &root.operand).collect();
        let candidates = self
            .builtins
            .instruction_set
            .matching(instruction_type, self.mode_flags, &operand_refs);
        if candidates.is_empty() {
            drop(operand_refs);
            self.raise_selection_error(instruction_type, &roots, location);
            return false;
        }

        // Size up every matching form; ties keep declaration order.
        let mut short = candidates[0];
        let mut long = candidates[0];
        let mut short_size = usize::MAX;
        let mut long_size = 0usize;
        for &candidate in &candidates {
            let instruction = self.builtins.instruction_set.get(candidate);
            let Some(captures) = instruction.signature.extract(&operand_refs) else {
                continue;
            };
            let size = instruction.size(&captures);
            if size < short_size {
                short_size = size;
                short = candidate;
            }
            if size > long_size {
                long_size = size;
                long = candidate;
            }
        }
        drop(operand_refs);

        let (instruction, short_form) = match distance_hint {
            DistanceHint::Short => (short, None),
            DistanceHint::Long => (long, None),
            DistanceHint::Default => {
                if short == long || short_size == long_size {
                    (long, None)
                } else {
                    (long, Some(short))
                }
            }
        };
        self.ir.push(IrNode::new(
            IrNodeKind::Code {
                instruction,
                operand_roots: roots,
                short_form,
                branch_target: Some(0),
            },
            location.clone(),
        ));
        true
    }

    // ----- labels --------------------------------------------------------

    pub(crate) fn create_anonymous_label(&mut self) -> DefinitionId {
        let name = self.generate_anonymous_label_name();
        let definition = Definition::new(
            DefinitionKind::Func(FuncDefinition::default()),
            name.clone(),
            SourceLocation::empty(),
            Arc::from(format!("label `{}`", name)),
        );
        self.scopes
            .add_definition(
                &mut self.definitions,
                &mut self.report,
                self.current_scope,
                definition,
            )
            .expect("anonymous label names are unique")
    }

    fn emit_label(&mut self, definition: DefinitionId, location: &SourceLocation) {
        self.ir.push(IrNode::new(
            IrNodeKind::Label(definition),
            location.clone(),
        ));
    }

    fn label_reference(&mut self, definition: DefinitionId, location: &SourceLocation) -> Expression {
        self.resolve_definition_expression(definition, location)
            .expect("labels resolve to link-time expressions")
    }

    // ----- conditional lowering ------------------------------------------

    /// Emits `goto destination if condition` (negated when asked),
    /// using the platform's test-and-branch lowering for comparisons and
    /// short-circuit expansion for the logical connectives.
    fn emit_branch_on_condition(
        &mut self,
        destination: &Expression,
        condition: &Expression,
        negated: bool,
        distance_hint: DistanceHint,
        location: &SourceLocation,
    ) -> bool {
        match &condition.kind {
            ExpressionKind::BooleanLiteral(value) => {
                if *value != negated {
                    self.emit_branch_instruction(
                        BranchKind::Goto,
                        vec![destination.clone()],
                        distance_hint,
                        location,
                    )
                } else {
                    true
                }
            }
            ExpressionKind::UnaryOperator {
                op: UnaryOperator::LogicalNegation,
                operand,
            } => self.emit_branch_on_condition(destination, operand, !negated, distance_hint, location),
            ExpressionKind::BinaryOperator {
                op: op @ (BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr),
                left,
                right,
            } => {
                // De Morgan under negation turns `&&` into `||` and back.
                let effective_and = (*op == BinaryOperator::LogicalAnd) != negated;
                if effective_and {
                    let skip = self.create_anonymous_label();
                    let skip_reference = self.label_reference(skip, location);
                    if !self.emit_branch_on_condition(
                        &skip_reference,
                        left,
                        !negated,
                        DistanceHint::Default,
                        location,
                    ) {
                        return false;
                    }
                    let ok = self.emit_branch_on_condition(
                        destination,
                        right,
                        negated,
                        distance_hint,
                        location,
                    );
                    self.emit_label(skip, location);
                    ok
                } else {
                    self.emit_branch_on_condition(
                        destination,
                        left,
                        negated,
                        DistanceHint::Default,
                        location,
                    ) && self.emit_branch_on_condition(
                        destination,
                        right,
                        negated,
                        distance_hint,
                        location,
                    )
                }
            }
            ExpressionKind::BinaryOperator { op, left, right }
                if relic_types::is_valid_comparison_op(*op) =>
            {
                let op = if negated {
                    match op.negated_comparison() {
                        Some(negated_op) => negated_op,
                        None => return false,
                    }
                } else {
                    *op
                };
                self.emit_test_and_branch(destination, op, left, right, distance_hint, location)
            }
            // A plain flag or boolean lvalue: branch on its value.
            _ => {
                let flag_expression = condition.clone();
                self.emit_branch_instruction(
                    BranchKind::Goto,
                    vec![
                        destination.clone(),
                        flag_expression,
                        self.make_boolean(!negated, location.clone()),
                    ],
                    distance_hint,
                    location,
                )
            }
        }
    }

    fn emit_test_and_branch(
        &mut self,
        destination: &Expression,
        op: BinaryOperator,
        left: &Expression,
        right: &Expression,
        distance_hint: DistanceHint,
        location: &SourceLocation,
    ) -> bool {
        let operand_size = if left.as_integer_literal().is_some() {
            self.expression_value_size(right)
        } else {
            self.expression_value_size(left)
        };
        let lowering =
            self.platform
                .get_test_and_branch(op, operand_size, left, right, distance_hint);
        let Some(lowering) = lowering else {
            self.report.plain_error(
                format!(
                    "{} between these operands is not supported by this platform",
                    op.name()
                ),
                location.clone(),
            );
            return false;
        };

        if let Some((test_type, test_operands)) = lowering.test {
            if !self.emit_instruction(test_type, test_operands, location) {
                return false;
            }
        }

        let needs_fail_label = lowering.branches.iter().any(|branch| !branch.success);
        let fail_label = if needs_fail_label {
            Some(self.create_anonymous_label())
        } else {
            None
        };

        for branch in &lowering.branches {
            let target = if branch.success {
                destination.clone()
            } else {
                let fail = fail_label.expect("fail label created above");
                self.label_reference(fail, location)
            };
            let flag = self
                .resolve_definition_expression(branch.flag, location)
                .expect("platform flags resolve");
            let value = self.make_boolean(branch.value, location.clone());
            if !self.emit_branch_instruction(
                BranchKind::Goto,
                vec![target, flag, value],
                if branch.success { distance_hint } else { DistanceHint::Default },
                location,
            ) {
                return false;
            }
        }
        if let Some(fail) = fail_label {
            self.emit_label(fail, location);
        }
        true
    }

    // ----- assignments and calls -----------------------------------------

    fn check_assignment_narrowing(&mut self, dest: &Expression, source: &Expression) -> bool {
        let Some(value) = source.as_integer_literal() else {
            return true;
        };
        let Some(dest_type) = dest.ty().cloned() else {
            return true;
        };
        if self.can_narrow_value(value, &dest_type) {
            true
        } else {
            let type_name = self.type_name(&dest_type);
            self.report.plain_error(
                format!("value {} cannot be narrowed to `{}`", value, type_name),
                source.location.clone(),
            );
            false
        }
    }

    fn emit_assignment(
        &mut self,
        dest: &Expression,
        source: &Expression,
        location: &SourceLocation,
    ) -> bool {
        if !dest.qualifiers().contains(Qualifiers::LVALUE) {
            self.report.plain_error(
                "left-hand side of assignment is not assignable".into(),
                dest.location.clone(),
            );
            return false;
        }
        if !self.check_assignment_narrowing(dest, source) {
            return false;
        }

        match &source.kind {
            ExpressionKind::Call {
                inlined,
                function,
                arguments,
            } => self.emit_call(*inlined, Some(dest), function, arguments, location),
            ExpressionKind::SideEffect { statement, result } => {
                self.emit_statement_ir(statement);
                let result = (**result).clone();
                self.emit_assignment(dest, &result, location)
            }
            ExpressionKind::BinaryOperator { op, left, right }
                if relic_types::is_valid_arithmetic_op(*op)
                    || matches!(
                        op,
                        BinaryOperator::AdditionWithCarry
                            | BinaryOperator::SubtractionWithCarry
                            | BinaryOperator::LeftRotate
                            | BinaryOperator::RightRotate
                            | BinaryOperator::LeftRotateWithCarry
                            | BinaryOperator::RightRotateWithCarry
                    ) =>
            {
                let op = *op;
                let dest_operand = self.create_operand_from_expression(dest, true);
                let left_operand = self.create_operand_from_expression(left, true);
                let in_place = match (&dest_operand, &left_operand) {
                    (Some(dest_operand), Some(left_operand)) => dest_operand == left_operand,
                    _ => false,
                };
                if !in_place {
                    // Load the left side first, then operate in place.
                    if !self.emit_assignment(dest, left, location) {
                        return false;
                    }
                }
                self.emit_instruction(
                    InstructionType::Binary(op),
                    vec![dest.clone(), (**right).clone()],
                    location,
                )
            }
            _ => {
                let dest_operand = self.create_operand_from_expression(dest, true);
                let source_operand = self.create_operand_from_expression(source, true);
                if let (Some(dest_operand), Some(source_operand)) =
                    (&dest_operand, &source_operand)
                {
                    if dest_operand == source_operand {
                        return true;
                    }
                }
                self.emit_instruction(
                    InstructionType::Binary(BinaryOperator::Assignment),
                    vec![dest.clone(), source.clone()],
                    location,
                )
            }
        }
    }

    fn emit_call(
        &mut self,
        inlined: bool,
        result_dest: Option<&Expression>,
        function: &Expression,
        arguments: &[Expression],
        location: &SourceLocation,
    ) -> bool {
        let Some(definition) = function.as_resolved_identifier() else {
            self.report.plain_error(
                "called expression is not a function".into(),
                function.location.clone(),
            );
            return false;
        };
        match &self.definitions.get(definition).kind {
            DefinitionKind::BuiltinVoidIntrinsic => {
                if result_dest.is_some() {
                    let name = self.definitions.get(definition).name.clone();
                    self.report.plain_error(
                        format!("intrinsic `{}` does not produce a value", name),
                        location.clone(),
                    );
                    return false;
                }
                self.emit_instruction(
                    InstructionType::VoidIntrinsic(definition),
                    arguments.to_vec(),
                    location,
                )
            }
            DefinitionKind::BuiltinLoadIntrinsic => {
                let Some(dest) = result_dest else {
                    let name = self.definitions.get(definition).name.clone();
                    self.report.plain_error(
                        format!("intrinsic `{}` must be assigned somewhere", name),
                        location.clone(),
                    );
                    return false;
                };
                let mut operands = vec![dest.clone()];
                operands.extend(arguments.iter().cloned());
                self.emit_instruction(
                    InstructionType::LoadIntrinsic(definition),
                    operands,
                    location,
                )
            }
            DefinitionKind::Func(func) => {
                let func = func.clone();
                if func.inline || inlined {
                    self.emit_inline_call(definition, &func, result_dest, arguments, location)
                } else {
                    self.emit_function_call(definition, &func, result_dest, arguments, location)
                }
            }
            _ => {
                let name = self.definitions.get(definition).name.clone();
                self.report.plain_error(
                    format!("`{}` is not callable", name),
                    location.clone(),
                );
                false
            }
        }
    }

    /// Binds one argument to a parameter's designated storage.
    fn emit_argument_pass(
        &mut self,
        parameter: DefinitionId,
        argument: &Expression,
        location: &SourceLocation,
    ) -> bool {
        self.ensure_definition_resolved(parameter);
        let holder = self.resolve_definition_expression(parameter, location);
        match holder {
            Some(holder) if holder.qualifiers().contains(Qualifiers::LVALUE) => {
                self.emit_assignment(&holder, argument, location)
            }
            _ => {
                let name = self.definitions.get(parameter).name.clone();
                self.report.plain_error(
                    format!(
                        "parameter `{}` must use register storage (`: T in reg`) to be passed at run time",
                        name
                    ),
                    location.clone(),
                );
                false
            }
        }
    }

    /// The register expression a function's return value lives in.
    fn return_holder(&mut self, func: &FuncDefinition) -> Option<Expression> {
        let signature = func.resolved_signature.as_ref()?;
        let TypeExpressionKind::Function { return_type, .. } = &signature.kind else {
            return None;
        };
        let return_type = return_type.as_deref()?;
        match &return_type.kind {
            TypeExpressionKind::DesignatedStorage { holder, .. } => {
                let holder = (**holder).clone();
                self.reduce_expression(&holder)
            }
            _ => None,
        }
    }

    fn emit_function_call(
        &mut self,
        definition: DefinitionId,
        func: &FuncDefinition,
        result_dest: Option<&Expression>,
        arguments: &[Expression],
        location: &SourceLocation,
    ) -> bool {
        if arguments.len() != func.parameters.len() {
            let name = self.definitions.get(definition).name.clone();
            self.report.plain_error(
                format!(
                    "`{}` expects {} argument(s), but {} were provided",
                    name,
                    func.parameters.len(),
                    arguments.len()
                ),
                location.clone(),
            );
            return false;
        }
        for (&parameter, argument) in func.parameters.iter().zip(arguments) {
            if !self.emit_argument_pass(parameter, argument, location) {
                return false;
            }
        }
        let kind = if func.far {
            BranchKind::FarCall
        } else {
            BranchKind::Call
        };
        let target = self
            .resolve_definition_expression(definition, location)
            .expect("function definitions resolve");
        if !self.emit_branch_instruction(kind, vec![target], DistanceHint::Default, location) {
            return false;
        }
        if let Some(dest) = result_dest {
            match self.return_holder(func) {
                Some(holder) => {
                    return self.emit_assignment(dest, &holder, location);
                }
                None => {
                    self.report.plain_error(
                        "function does not return a value in a register".into(),
                        location.clone(),
                    );
                    return false;
                }
            }
        }
        true
    }

    fn emit_inline_call(
        &mut self,
        definition: DefinitionId,
        func: &FuncDefinition,
        result_dest: Option<&Expression>,
        arguments: &[Expression],
        location: &SourceLocation,
    ) -> bool {
        if arguments.len() != func.parameters.len() {
            let name = self.definitions.get(definition).name.clone();
            self.report.plain_error(
                format!(
                    "`{}` expects {} argument(s), but {} were provided",
                    name,
                    func.parameters.len(),
                    arguments.len()
                ),
                location.clone(),
            );
            return false;
        }
        let Some(body) = func.body.clone() else {
            let name = self.definitions.get(definition).name.clone();
            self.report.plain_error(
                format!("`{}` has no body to inline", name),
                location.clone(),
            );
            return false;
        };
        if self.inline_depth() >= 64 {
            let name = self.definitions.get(definition).name.clone();
            self.report.error(
                format!("inline expansion of `{}` recurses too deeply", name),
                location.clone(),
                ReportErrorFlags::FATAL,
            );
            return false;
        }

        for (&parameter, argument) in func.parameters.iter().zip(arguments) {
            if !self.emit_argument_pass(parameter, argument, location) {
                return false;
            }
        }

        // The body expands under a fresh inline site so its blocks and
        // labels get their own scopes and addresses at every call site.
        self.enter_inline_site();
        let saved_scope = self.current_scope;
        if let Some(environment) = func.environment {
            self.current_scope = environment;
        }
        let return_label = self.create_anonymous_label();
        let saved_return = self.return_label.replace(return_label);
        let saved_function = self.current_function.replace(definition);

        self.reserve_definitions(&body, PendingFunctionAttributes::default());
        if self.report.alive() {
            self.emit_statement_ir(&body);
        }
        self.emit_label(return_label, location);

        self.current_function = saved_function;
        self.return_label = saved_return;
        self.current_scope = saved_scope;
        self.exit_inline_site();

        if let Some(dest) = result_dest {
            match self.return_holder(func) {
                Some(holder) => return self.emit_assignment(dest, &holder, location),
                None => {
                    self.report.plain_error(
                        "function does not return a value in a register".into(),
                        location.clone(),
                    );
                    return false;
                }
            }
        }
        true
    }

    // ----- returns -------------------------------------------------------

    fn return_kind_of(func: &FuncDefinition) -> BranchKind {
        match func.return_kind {
            FuncReturnKind::Irq => BranchKind::IrqReturn,
            FuncReturnKind::Nmi => BranchKind::NmiReturn,
            FuncReturnKind::Subroutine => {
                if func.far {
                    BranchKind::FarReturn
                } else {
                    BranchKind::Return
                }
            }
        }
    }

    fn emit_return(
        &mut self,
        return_value: Option<&Expression>,
        condition: Option<&Expression>,
        distance_hint: DistanceHint,
        location: &SourceLocation,
    ) -> bool {
        let func = self
            .current_function
            .and_then(|id| self.definitions.get(id).as_func().cloned());
        let Some(func) = func else {
            self.report.plain_error(
                "return statement outside of a function".into(),
                location.clone(),
            );
            return false;
        };

        if let Some(condition) = condition {
            let condition = match self.reduce_expression(condition) {
                Some(condition) => condition,
                None => return false,
            };
            // Conditional returns skip over the return when the condition
            // fails. (Platforms with conditional return forms still win:
            // the skip branch plus return pair stays correct, and flag
            // conditions that match a direct form select it below.)
            let skip = self.create_anonymous_label();
            let skip_reference = self.label_reference(skip, location);
            if !self.emit_branch_on_condition(
                &skip_reference,
                &condition,
                true,
                DistanceHint::Default,
                location,
            ) {
                return false;
            }
            let ok = self.emit_return(return_value, None, distance_hint, location);
            self.emit_label(skip, location);
            return ok;
        }

        if let Some(value) = return_value {
            let value = match self.reduce_expression(value) {
                Some(value) => value,
                None => return false,
            };
            match self.return_holder(&func) {
                Some(holder) => {
                    if !self.emit_assignment(&holder, &value, location) {
                        return false;
                    }
                }
                None => {
                    self.report.plain_error(
                        "function does not declare a register return value".into(),
                        location.clone(),
                    );
                    return false;
                }
            }
        }

        // Inside an inline expansion, return jumps to the expansion's end.
        if let Some(return_label) = self.return_label {
            let target = self.label_reference(return_label, location);
            return self.emit_branch_instruction(
                BranchKind::Goto,
                vec![target],
                distance_hint,
                location,
            );
        }
        self.emit_branch_instruction(
            Self::return_kind_of(&func),
            Vec::new(),
            distance_hint,
            location,
        )
    }

    fn has_unconditional_return(&self, statement: &Statement) -> bool {
        match &statement.kind {
            StatementKind::Block(children) => children
                .last()
                .map(|last| self.has_unconditional_return(last))
                .unwrap_or(false),
            StatementKind::Attribution { body, .. } => self.has_unconditional_return(body),
            StatementKind::Branch {
                kind,
                condition: None,
                ..
            } => matches!(
                kind,
                BranchKind::Return
                    | BranchKind::FarReturn
                    | BranchKind::IrqReturn
                    | BranchKind::NmiReturn
                    | BranchKind::Goto
                    | BranchKind::FarGoto
            ),
            StatementKind::If {
                body,
                alternative: Some(alternative),
                ..
            } => self.has_unconditional_return(body) && self.has_unconditional_return(alternative),
            _ => false,
        }
    }

    // ----- statement dispatch --------------------------------------------

    pub(crate) fn emit_statement_ir(&mut self, statement: &Statement) {
        if !self.report.alive() {
            return;
        }
        let location = statement.location.clone();
        match &statement.kind {
            StatementKind::Attribution { attributes, body } => {
                if !self.conditional_compilation_enabled(attributes) {
                    return;
                }
                let mut mode = self.mode_flags;
                let mut mode_changed = false;
                for attribute in attributes {
                    if &*attribute.name == "if" {
                        continue;
                    }
                    if Builtins::find_function_attribute(&attribute.name).is_some() {
                        continue; // applied to the function in pass 1
                    }
                    match self.builtins.find_mode_attribute(&attribute.name).cloned() {
                        Some(mode_attribute) => {
                            mode = self.builtins.apply_mode_attribute(mode, &mode_attribute);
                            mode_changed = true;
                        }
                        None => {
                            self.report.plain_error(
                                format!("unknown attribute `{}`", attribute.name),
                                attribute.location.clone(),
                            );
                        }
                    }
                }
                if mode_changed {
                    self.push_mode_flags(mode);
                    self.emit_statement_ir(body);
                    self.pop_mode_flags();
                } else {
                    self.emit_statement_ir(body);
                }
            }
            StatementKind::File { statements, .. } => {
                let scope = self
                    .find_statement_scope(statement)
                    .expect("file scope bound in pass 1");
                self.enter_scope(scope);
                for child in statements {
                    self.emit_statement_ir(child);
                }
                self.exit_scope();
            }
            StatementKind::Block(children) => {
                let scope = self.get_or_create_statement_scope(statement);
                self.enter_scope(scope);
                for child in children {
                    self.emit_statement_ir(child);
                }
                self.exit_scope();
            }
            StatementKind::Namespace { body, .. } => {
                self.emit_statement_ir(body);
            }
            StatementKind::In {
                pieces,
                dest,
                body,
            } => {
                let resolved = self.resolve_in_statement(pieces, dest.as_deref(), &location);
                let Some((bank, dest)) = resolved else {
                    return;
                };
                self.ir.push(IrNode::new(
                    IrNodeKind::PushRelocation {
                        bank,
                        address: dest,
                    },
                    location.clone(),
                ));
                self.push_bank(Some(bank));
                self.emit_statement_ir(body);
                self.pop_bank();
                self.ir
                    .push(IrNode::new(IrNodeKind::PopRelocation, location));
            }
            StatementKind::Func { name, inline, body, .. } => {
                if *inline {
                    return; // expanded at call sites only
                }
                let definition = self
                    .scopes
                    .find_local_member_definition(self.current_scope, name);
                let Some(definition) = definition else {
                    return;
                };
                self.ensure_definition_resolved(definition);
                let func = match self.definitions.get(definition).as_func() {
                    Some(func) => func.clone(),
                    None => return,
                };
                let saved_function = self.current_function.replace(definition);
                self.emit_label(definition, &location);
                self.emit_statement_ir(body);
                if !func.fallthrough && !self.has_unconditional_return(body) {
                    self.emit_branch_instruction(
                        Self::return_kind_of(&func),
                        Vec::new(),
                        DistanceHint::Default,
                        &location,
                    );
                }
                self.current_function = saved_function;
            }
            StatementKind::Label { name, .. } => {
                let definition = self
                    .scopes
                    .find_local_member_definition(self.current_scope, name);
                if let Some(definition) = definition {
                    self.emit_label(definition, &location);
                }
            }
            StatementKind::Var { names, .. } => {
                // Deferred constants become inline storage in the stream.
                for name in names {
                    let definition = self
                        .scopes
                        .find_local_member_definition(self.current_scope, name);
                    let Some(definition) = definition else { continue };
                    let deferred = match &self.definitions.get(definition).kind {
                        DefinitionKind::Var(var) => {
                            !var.reserved
                                && !var.qualifiers.contains(Qualifiers::EXTERN)
                                && var.storage_size.is_some()
                                && (var.qualifiers.contains(Qualifiers::CONST)
                                    || var.init_data.is_some())
                        }
                        _ => false,
                    };
                    if deferred {
                        self.ir
                            .push(IrNode::new(IrNodeKind::Var(definition), location.clone()));
                    }
                }
            }
            StatementKind::ExpressionStatement(expression) => {
                let Some(folded) = self.reduce_expression(expression) else {
                    return;
                };
                self.emit_expression_statement(&folded, &location);
            }
            StatementKind::Branch {
                distance_hint,
                kind,
                destination,
                return_value,
                condition,
            } => {
                self.emit_branch_statement(
                    *distance_hint,
                    *kind,
                    destination.as_deref(),
                    return_value.as_deref(),
                    condition.as_deref(),
                    &location,
                );
            }
            StatementKind::If {
                distance_hint,
                condition,
                body,
                alternative,
            } => {
                let Some(condition) = self.reduce_expression(condition) else {
                    return;
                };
                match alternative {
                    None => {
                        let end = self.create_anonymous_label();
                        let end_reference = self.label_reference(end, &location);
                        self.emit_branch_on_condition(
                            &end_reference,
                            &condition,
                            true,
                            *distance_hint,
                            &location,
                        );
                        self.emit_statement_ir(body);
                        self.emit_label(end, &location);
                    }
                    Some(alternative) => {
                        let other = self.create_anonymous_label();
                        let end = self.create_anonymous_label();
                        let other_reference = self.label_reference(other, &location);
                        self.emit_branch_on_condition(
                            &other_reference,
                            &condition,
                            true,
                            *distance_hint,
                            &location,
                        );
                        self.emit_statement_ir(body);
                        let end_reference = self.label_reference(end, &location);
                        self.emit_branch_instruction(
                            BranchKind::Goto,
                            vec![end_reference],
                            DistanceHint::Default,
                            &location,
                        );
                        self.emit_label(other, &location);
                        self.emit_statement_ir(alternative);
                        self.emit_label(end, &location);
                    }
                }
            }
            StatementKind::While {
                distance_hint,
                condition,
                body,
            } => {
                let Some(condition) = self.reduce_expression(condition) else {
                    return;
                };
                let top = self.create_anonymous_label();
                let end = self.create_anonymous_label();
                self.emit_label(top, &location);
                let end_reference = self.label_reference(end, &location);
                self.emit_branch_on_condition(
                    &end_reference,
                    &condition,
                    true,
                    *distance_hint,
                    &location,
                );
                let saved_break = self.break_label.replace(end);
                let saved_continue = self.continue_label.replace(top);
                self.emit_statement_ir(body);
                self.break_label = saved_break;
                self.continue_label = saved_continue;
                let top_reference = self.label_reference(top, &location);
                self.emit_branch_instruction(
                    BranchKind::Goto,
                    vec![top_reference],
                    DistanceHint::Default,
                    &location,
                );
                self.emit_label(end, &location);
            }
            StatementKind::DoWhile {
                distance_hint,
                body,
                condition,
            } => {
                let Some(condition) = self.reduce_expression(condition) else {
                    return;
                };
                let top = self.create_anonymous_label();
                let check = self.create_anonymous_label();
                let end = self.create_anonymous_label();
                self.emit_label(top, &location);
                let saved_break = self.break_label.replace(end);
                let saved_continue = self.continue_label.replace(check);
                self.emit_statement_ir(body);
                self.break_label = saved_break;
                self.continue_label = saved_continue;
                self.emit_label(check, &location);
                let top_reference = self.label_reference(top, &location);
                self.emit_branch_on_condition(
                    &top_reference,
                    &condition,
                    false,
                    *distance_hint,
                    &location,
                );
                self.emit_label(end, &location);
            }
            StatementKind::For {
                distance_hint,
                counter,
                sequence,
                body,
            } => {
                self.emit_for_statement(distance_hint, counter, sequence, body, &location);
            }
            StatementKind::InlineFor {
                name,
                sequence,
                body,
            } => {
                self.emit_inline_for(name, sequence, body, &location);
            }
            StatementKind::Config { items } => {
                for (key, value) in items {
                    let Some(folded) = self.reduce_expression(value) else {
                        continue;
                    };
                    self.config.add(&mut self.report, key.clone(), folded);
                }
            }
            // Declarations carry no code.
            StatementKind::Bank { .. }
            | StatementKind::Enum { .. }
            | StatementKind::Struct { .. }
            | StatementKind::TypeAlias { .. }
            | StatementKind::Let { .. }
            | StatementKind::ImportReference { .. } => {}
        }
    }

    fn emit_expression_statement(&mut self, expression: &Expression, location: &SourceLocation) {
        match &expression.kind {
            ExpressionKind::BinaryOperator {
                op: BinaryOperator::Assignment,
                left,
                right,
            } => {
                self.emit_assignment(left, right, location);
            }
            ExpressionKind::UnaryOperator {
                op:
                    op @ (UnaryOperator::PreIncrement
                    | UnaryOperator::PostIncrement
                    | UnaryOperator::PreDecrement
                    | UnaryOperator::PostDecrement),
                operand,
            } => {
                self.emit_instruction(
                    InstructionType::Unary(*op),
                    vec![(**operand).clone()],
                    location,
                );
            }
            ExpressionKind::Call {
                inlined,
                function,
                arguments,
            } => {
                self.emit_call(*inlined, None, function, arguments, location);
            }
            ExpressionKind::SideEffect { statement, result } => {
                self.emit_statement_ir(statement);
                let result = (**result).clone();
                if !matches!(result.kind, ExpressionKind::TupleLiteral(ref items) if items.is_empty())
                {
                    self.emit_expression_statement(&result, location);
                }
            }
            _ => {
                self.report.plain_error(
                    "expression statement has no effect".into(),
                    location.clone(),
                );
            }
        }
    }

    fn emit_branch_statement(
        &mut self,
        distance_hint: DistanceHint,
        kind: BranchKind,
        destination: Option<&Expression>,
        return_value: Option<&Expression>,
        condition: Option<&Expression>,
        location: &SourceLocation,
    ) {
        match kind {
            BranchKind::Return | BranchKind::FarReturn | BranchKind::IrqReturn | BranchKind::NmiReturn => {
                self.emit_return(return_value, condition, distance_hint, location);
            }
            BranchKind::Break | BranchKind::Continue => {
                let target = if kind == BranchKind::Break {
                    self.break_label
                } else {
                    self.continue_label
                };
                let Some(target) = target else {
                    self.report.plain_error(
                        format!(
                            "`{}` statement outside of a loop",
                            if kind == BranchKind::Break { "break" } else { "continue" }
                        ),
                        location.clone(),
                    );
                    return;
                };
                let target_reference = self.label_reference(target, location);
                match condition {
                    Some(condition) => {
                        let Some(condition) = self.reduce_expression(condition) else {
                            return;
                        };
                        self.emit_branch_on_condition(
                            &target_reference,
                            &condition,
                            false,
                            distance_hint,
                            location,
                        );
                    }
                    None => {
                        self.emit_branch_instruction(
                            BranchKind::Goto,
                            vec![target_reference],
                            distance_hint,
                            location,
                        );
                    }
                }
            }
            BranchKind::Goto | BranchKind::FarGoto | BranchKind::Call | BranchKind::FarCall => {
                let Some(destination) = destination else {
                    self.report.plain_error(
                        "branch statement requires a destination".into(),
                        location.clone(),
                    );
                    return;
                };
                let Some(destination) = self.reduce_expression(destination) else {
                    return;
                };
                match condition {
                    Some(condition) => {
                        let Some(condition) = self.reduce_expression(condition) else {
                            return;
                        };
                        self.emit_branch_on_condition(
                            &destination,
                            &condition,
                            false,
                            distance_hint,
                            location,
                        );
                    }
                    None => {
                        self.emit_branch_instruction(
                            kind,
                            vec![destination],
                            distance_hint,
                            location,
                        );
                    }
                }
            }
        }
    }

    fn emit_for_statement(
        &mut self,
        distance_hint: &DistanceHint,
        counter: &Expression,
        sequence: &Expression,
        body: &Statement,
        location: &SourceLocation,
    ) {
        let Some(counter) = self.reduce_expression(counter) else {
            return;
        };
        let Some(sequence) = self.reduce_expression(sequence) else {
            return;
        };
        let ExpressionKind::RangeLiteral { start, end, step } = &sequence.kind else {
            self.report.plain_error(
                "`for` requires a compile-time range".into(),
                sequence.location.clone(),
            );
            return;
        };
        let step = step
            .as_deref()
            .and_then(Expression::as_integer_literal)
            .unwrap_or(1);
        if step == 0 {
            self.report
                .plain_error("`for` step cannot be zero".into(), location.clone());
            return;
        }

        if !self.emit_assignment(&counter, start, location) {
            return;
        }
        let top = self.create_anonymous_label();
        let check = self.create_anonymous_label();
        let done = self.create_anonymous_label();
        self.emit_label(top, location);

        let saved_break = self.break_label.replace(done);
        let saved_continue = self.continue_label.replace(check);
        self.emit_statement_ir(body);
        self.break_label = saved_break;
        self.continue_label = saved_continue;

        self.emit_label(check, location);
        // Inclusive ranges stop after the body has run for `end`.
        let done_reference = self.label_reference(done, location);
        let comparison = Expression::new(
            ExpressionKind::BinaryOperator {
                op: BinaryOperator::Equal,
                left: Box::new(counter.clone()),
                right: Box::new((**end).clone()),
            },
            location.clone(),
        );
        let Some(comparison) = self.reduce_expression(&comparison) else {
            return;
        };
        self.emit_branch_on_condition(&done_reference, &comparison, false, *distance_hint, location);

        let stepped = Expression::new(
            ExpressionKind::BinaryOperator {
                op: if step >= 0 {
                    BinaryOperator::Addition
                } else {
                    BinaryOperator::Subtraction
                },
                left: Box::new(counter.clone()),
                right: Box::new(Expression::integer(step.abs(), location.clone())),
            },
            location.clone(),
        );
        let Some(stepped) = self.reduce_expression(&stepped) else {
            return;
        };
        if !self.emit_assignment(&counter, &stepped, location) {
            return;
        }
        let top_reference = self.label_reference(top, location);
        self.emit_branch_instruction(
            BranchKind::Goto,
            vec![top_reference],
            DistanceHint::Default,
            location,
        );
        self.emit_label(done, location);
    }

    /// Compile-time repetition: the body is re-reserved and re-emitted
    /// under a fresh inline site per iteration, with the counter bound as
    /// a `let` in a wrapper scope.
    fn emit_inline_for(
        &mut self,
        name: &Arc<str>,
        sequence: &Expression,
        body: &Statement,
        location: &SourceLocation,
    ) {
        let Some(sequence) = self.reduce_expression(sequence) else {
            return;
        };
        let Some(values) = self.sequence_values(&sequence, location) else {
            return;
        };
        for value in values {
            self.enter_inline_site();
            let scope_name = self.generate_block_name();
            let scope = self.scopes.create(Some(self.current_scope), scope_name);
            self.scopes.add_definition(
                &mut self.definitions,
                &mut self.report,
                scope,
                Definition::new(
                    DefinitionKind::Let(crate::definition::LetDefinition {
                        parameters: Vec::new(),
                        expression: value,
                        evaluated: true,
                    }),
                    name.clone(),
                    location.clone(),
                    Arc::from(format!("inline for counter `{}`", name)),
                ),
            );
            self.enter_scope(scope);
            self.reserve_definitions(body, PendingFunctionAttributes::default());
            if self.report.alive() {
                self.emit_statement_ir(body);
            }
            self.exit_scope();
            self.exit_inline_site();
            if !self.report.alive() {
                return;
            }
        }
    }
}
