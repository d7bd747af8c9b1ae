//! Pass 5 — code generation.
//!
//! Layout replays the IR against the banks, binding label addresses and
//! advancing positions by encoded size, iterating until a fixpoint. The
//! monovariant that guarantees termination: branches start on their long
//! form and may only shrink, never re-grow. The emit pass then replays
//! the stream once more, re-lowering link-time operands now that every
//! address is bound, reserving the bytes and writing them.

use relic_asm::{EncodingState, InstructionOperand};
use relic_types::{DefinitionId, SourceLocation};

use crate::ast::ExpressionKind;
use crate::bank::{BankId, ReservationNode};
use crate::compiler::Compiler;
use crate::definition::{Address, DefinitionKind};
use crate::ir::{IrNodeKind, OperandRoot};
use crate::report::ReportErrorFlags;

fn operand_has_placeholder(operand: &InstructionOperand) -> bool {
    match operand {
        InstructionOperand::Integer { placeholder, .. }
        | InstructionOperand::Boolean { placeholder, .. } => *placeholder,
        InstructionOperand::Register(..) => false,
        InstructionOperand::Unary { operand, .. } => operand_has_placeholder(operand),
        InstructionOperand::Binary { left, right, .. } => {
            operand_has_placeholder(left) || operand_has_placeholder(right)
        }
        InstructionOperand::Dereference { operand, .. } => operand_has_placeholder(operand),
        InstructionOperand::Index {
            operand, subscript, ..
        } => operand_has_placeholder(operand) || operand_has_placeholder(subscript),
        InstructionOperand::BitIndex { operand, subscript } => {
            operand_has_placeholder(operand) || operand_has_placeholder(subscript)
        }
    }
}

impl Compiler {
    pub(crate) fn generate_code(&mut self) {
        let snapshot: Vec<(BankId, usize)> = self
            .banks
            .iter()
            .map(|bank| (bank.id(), bank.relative_position()))
            .collect();

        let branch_count = self
            .ir
            .iter()
            .filter(|node| matches!(node.kind, IrNodeKind::Code { branch_target: Some(_), .. }))
            .count();
        let max_iterations = branch_count + 2;

        let mut iteration = 0;
        loop {
            iteration += 1;
            let changed = self.layout_pass(&snapshot, iteration == 1);
            if !self.report.alive() {
                return;
            }
            if !changed {
                break;
            }
            if iteration > max_iterations {
                self.report.error(
                    "branch layout failed to converge".into(),
                    SourceLocation::empty(),
                    ReportErrorFlags::FATAL | ReportErrorFlags::INTERNAL_ERROR,
                );
                return;
            }
        }

        self.emit_pass(&snapshot);
    }

    fn reset_banks(&mut self, snapshot: &[(BankId, usize)]) {
        for &(bank, position) in snapshot {
            self.banks.get_mut(bank).set_relative_position(position);
        }
    }

    /// Replays a relocation seek. Diagnostics only fire on the first
    /// iteration; later iterations replay silently.
    fn replay_seek(&mut self, bank: BankId, address: usize, first: bool, location: &SourceLocation) {
        if first {
            let bank = self.banks.get_mut(bank);
            bank.absolute_seek(&mut self.report, address, location);
        } else {
            let bank = self.banks.get_mut(bank);
            match bank.origin() {
                Some(origin) if address >= origin => {
                    bank.set_relative_position(address - origin);
                }
                _ => {}
            }
        }
    }

    /// The branch target's absolute address, when known this iteration.
    fn branch_target_address(&self, root: &OperandRoot) -> Option<usize> {
        let expression = root.expression.as_ref()?;
        match &expression.kind {
            ExpressionKind::ResolvedIdentifier(definition) => self
                .definitions
                .get(*definition)
                .address()
                .and_then(|address| address.absolute_position),
            ExpressionKind::IntegerLiteral(value) if *value >= 0 => Some(*value as usize),
            _ => None,
        }
    }

    fn layout_pass(&mut self, snapshot: &[(BankId, usize)], first: bool) -> bool {
        self.reset_banks(snapshot);
        let mut changed = false;
        let mut bank_stack: Vec<Option<BankId>> = Vec::new();
        let mut current: Option<BankId> = None;

        for index in 0..self.ir.len() {
            if !self.report.alive() {
                return false;
            }
            let location = self.ir[index].location.clone();
            match &self.ir[index].kind {
                IrNodeKind::PushRelocation { bank, address } => {
                    let (bank, address) = (*bank, *address);
                    bank_stack.push(current);
                    current = Some(bank);
                    if let Some(address) = address {
                        self.replay_seek(bank, address, first, &location);
                    }
                }
                IrNodeKind::PopRelocation => {
                    current = bank_stack.pop().unwrap_or(None);
                }
                IrNodeKind::Label(definition) => {
                    let definition = *definition;
                    let Some(bank) = current else {
                        if first {
                            self.report.plain_error(
                                "label is not inside an `in` block".into(),
                                location,
                            );
                        }
                        continue;
                    };
                    let address = self.banks.get(bank).address();
                    changed |= self.bind_definition_address(definition, address);
                }
                IrNodeKind::Var(definition) => {
                    let definition = *definition;
                    let Some(bank) = current else {
                        if first {
                            self.report.plain_error(
                                "storage is not inside an `in` block".into(),
                                location,
                            );
                        }
                        continue;
                    };
                    let size = match &self.definitions.get(definition).kind {
                        DefinitionKind::Var(var) => var.storage_size.unwrap_or(0),
                        _ => 0,
                    };
                    let address = self.banks.get(bank).address();
                    changed |= self.bind_definition_address(definition, address);
                    let position = self.banks.get(bank).relative_position();
                    self.banks
                        .get_mut(bank)
                        .set_relative_position(position + size);
                }
                IrNodeKind::Code { .. } => {
                    let Some(bank) = current else {
                        if first {
                            self.report.plain_error(
                                "executable code is not inside an `in` block".into(),
                                location,
                            );
                        }
                        continue;
                    };

                    // Branch relaxation: shrink to the short form once the
                    // distance provably fits. Never grows back.
                    let relax = {
                        let IrNodeKind::Code {
                            operand_roots,
                            short_form,
                            branch_target,
                            ..
                        } = &self.ir[index].kind
                        else {
                            unreachable!();
                        };
                        match (short_form, branch_target) {
                            (Some(short), Some(target_index)) => {
                                let target = operand_roots
                                    .get(*target_index)
                                    .and_then(|root| self.branch_target_address(root));
                                let origin = self.banks.get(bank).address().absolute_position;
                                match (target, origin) {
                                    (Some(target), Some(position)) => {
                                        let short = *short;
                                        let instruction = self.builtins.instruction_set.get(short);
                                        let operand_refs: Vec<&InstructionOperand> = operand_roots
                                            .iter()
                                            .map(|root| &root.operand)
                                            .collect();
                                        instruction
                                            .signature
                                            .extract(&operand_refs)
                                            .map(|captures| instruction.size(&captures))
                                            .zip(instruction.encoding.relative_range)
                                            .and_then(|(size, (min, max))| {
                                                let distance = target as i128
                                                    - (position + size) as i128;
                                                if min <= distance && distance <= max {
                                                    Some(short)
                                                } else {
                                                    None
                                                }
                                            })
                                    }
                                    _ => None,
                                }
                            }
                            _ => None,
                        }
                    };
                    if let Some(short) = relax {
                        if let IrNodeKind::Code {
                            instruction,
                            short_form,
                            ..
                        } = &mut self.ir[index].kind
                        {
                            *instruction = short;
                            *short_form = None;
                            changed = true;
                        }
                    }

                    let size = {
                        let IrNodeKind::Code {
                            instruction,
                            operand_roots,
                            ..
                        } = &self.ir[index].kind
                        else {
                            unreachable!();
                        };
                        let instruction = self.builtins.instruction_set.get(*instruction);
                        let operand_refs: Vec<&InstructionOperand> =
                            operand_roots.iter().map(|root| &root.operand).collect();
                        instruction
                            .signature
                            .extract(&operand_refs)
                            .map(|captures| instruction.size(&captures))
                    };
                    let Some(size) = size else {
                        self.report.error(
                            "selected instruction no longer matches its operands".into(),
                            location,
                            ReportErrorFlags::FATAL | ReportErrorFlags::INTERNAL_ERROR,
                        );
                        return false;
                    };
                    let position = self.banks.get(bank).relative_position();
                    self.banks
                        .get_mut(bank)
                        .set_relative_position(position + size);
                }
            }
        }
        changed
    }

    fn bind_definition_address(&mut self, definition: DefinitionId, address: Address) -> bool {
        let definition = self.definitions.get_mut(definition);
        match &mut definition.kind {
            DefinitionKind::Func(func) => {
                if func.address != Some(address) {
                    func.address = Some(address);
                    true
                } else {
                    false
                }
            }
            DefinitionKind::Var(var) => {
                if var.address != Some(address) {
                    var.address = Some(address);
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    fn emit_pass(&mut self, snapshot: &[(BankId, usize)]) {
        self.reset_banks(snapshot);
        let mut bank_stack: Vec<Option<BankId>> = Vec::new();
        let mut current: Option<BankId> = None;

        for index in 0..self.ir.len() {
            if !self.report.alive() {
                return;
            }
            let location = self.ir[index].location.clone();
            match &self.ir[index].kind {
                IrNodeKind::PushRelocation { bank, address } => {
                    let (bank, address) = (*bank, *address);
                    bank_stack.push(current);
                    current = Some(bank);
                    if let Some(address) = address {
                        self.replay_seek(bank, address, false, &location);
                    }
                }
                IrNodeKind::PopRelocation => {
                    current = bank_stack.pop().unwrap_or(None);
                }
                IrNodeKind::Label(..) => {}
                IrNodeKind::Var(definition) => {
                    let definition = *definition;
                    let Some(bank) = current else { continue };
                    let (size, init_data, description) =
                        match &self.definitions.get(definition).kind {
                            DefinitionKind::Var(var) => (
                                var.storage_size.unwrap_or(0),
                                var.init_data.clone(),
                                self.definitions.get(definition).description.clone(),
                            ),
                            _ => continue,
                        };
                    let node = ReservationNode::Definition(definition);
                    let start = self.banks.get(bank).relative_position();
                    let reserved = {
                        let bank = self.banks.get_mut(bank);
                        bank.reserve_rom(&mut self.report, &description, node, location.clone(), size)
                    };
                    if !reserved {
                        return;
                    }
                    if let Some(init_data) = init_data {
                        let bank = self.banks.get_mut(bank);
                        bank.set_relative_position(start);
                        bank.write(&mut self.report, &description, node, location, &init_data);
                    }
                }
                IrNodeKind::Code { .. } => {
                    let Some(bank) = current else { continue };

                    // Re-lower operands that carried link-time
                    // placeholders; addresses are bound now.
                    let recreate: Vec<(usize, crate::ast::Expression)> = {
                        let IrNodeKind::Code { operand_roots, .. } = &self.ir[index].kind else {
                            unreachable!();
                        };
                        operand_roots
                            .iter()
                            .enumerate()
                            .filter(|(_, root)| operand_has_placeholder(&root.operand))
                            .filter_map(|(root_index, root)| {
                                root.expression
                                    .clone()
                                    .map(|expression| (root_index, expression))
                            })
                            .collect()
                    };
                    for (root_index, expression) in recreate {
                        if let Some(operand) = self.create_operand_from_expression(&expression, true)
                        {
                            if let IrNodeKind::Code { operand_roots, .. } =
                                &mut self.ir[index].kind
                            {
                                operand_roots[root_index].operand = operand;
                            }
                        }
                    }
                    // Anything still carrying a placeholder was never
                    // assigned an address; emitting it would bake the
                    // stand-in value into the image.
                    let unresolved = {
                        let IrNodeKind::Code { operand_roots, .. } = &self.ir[index].kind else {
                            unreachable!();
                        };
                        operand_roots
                            .iter()
                            .any(|root| operand_has_placeholder(&root.operand))
                    };
                    if unresolved {
                        self.report.plain_error(
                            "operand could not be resolved to an address".into(),
                            location,
                        );
                        continue;
                    }

                    let write_result = {
                        let IrNodeKind::Code {
                            instruction,
                            operand_roots,
                            ..
                        } = &self.ir[index].kind
                        else {
                            unreachable!();
                        };
                        let instruction = self.builtins.instruction_set.get(*instruction);
                        let operand_refs: Vec<&InstructionOperand> =
                            operand_roots.iter().map(|root| &root.operand).collect();
                        let Some(captures) = instruction.signature.extract(&operand_refs) else {
                            self.report.error(
                                "selected instruction no longer matches its operands".into(),
                                location.clone(),
                                ReportErrorFlags::FATAL | ReportErrorFlags::INTERNAL_ERROR,
                            );
                            return;
                        };
                        let bank_ref = self.banks.get(bank);
                        let state = EncodingState {
                            relative_position: bank_ref.relative_position(),
                            absolute_position: bank_ref.address().absolute_position,
                        };
                        let mut buffer = Vec::new();
                        (instruction.encoding.write)(
                            &mut buffer,
                            &state,
                            &instruction.options,
                            &captures,
                        )
                        .map(|()| buffer)
                    };
                    match write_result {
                        Ok(buffer) => {
                            let node = ReservationNode::Ir(index);
                            let start = self.banks.get(bank).relative_position();
                            let reserved = {
                                let bank = self.banks.get_mut(bank);
                                bank.reserve(
                                    &mut self.report,
                                    "instruction",
                                    node,
                                    location.clone(),
                                    buffer.len(),
                                )
                            };
                            if !reserved {
                                return;
                            }
                            let bank = self.banks.get_mut(bank);
                            bank.set_relative_position(start);
                            bank.write(&mut self.report, "instruction", node, location, &buffer);
                        }
                        Err(error) => {
                            self.report.plain_error(error.to_string(), location);
                        }
                    }
                }
            }
        }
    }
}
