use std::collections::HashMap;

use crate::mode_flags::ModeFlags;
use crate::operand::InstructionOperand;
use crate::signature::{Instruction, InstructionType};

/// The instruction registry a platform populates during
/// `reserve_definitions` and the compiler queries during IR emission.
///
/// Instructions are indexed by [`InstructionType`] for O(1) candidate
/// lookup. Selection walks the candidates in declaration order and keeps
/// the most specific signature (the minimum under `is_subset_of`), so ties
/// between incomparable forms resolve to whichever the platform declared
/// first.
#[derive(Debug, Default)]
pub struct InstructionSet {
    instructions: Vec<Instruction>,
    by_type: HashMap<InstructionType, Vec<usize>>,
}

impl InstructionSet {
    /// An empty registry.
    pub fn new() -> InstructionSet {
        InstructionSet::default()
    }

    /// Registers an instruction, keeping declaration order.
    pub fn add(&mut self, instruction: Instruction) {
        let index = self.instructions.len();
        self.by_type
            .entry(instruction.signature.instruction_type)
            .or_default()
            .push(index);
        self.instructions.push(instruction);
    }

    /// Number of registered instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether no instructions have been registered.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The instruction behind a handle previously returned by
    /// [`select`](Self::select) or [`matching`](Self::matching).
    pub fn get(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }

    /// All instructions implementing `instruction_type`, in declaration
    /// order. Used for candidate listings when selection fails.
    pub fn find_by_type(&self, instruction_type: InstructionType) -> Vec<&Instruction> {
        self.by_type
            .get(&instruction_type)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&index| &self.instructions[index])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Handles of every instruction matching the operation, mode and
    /// operands, in declaration order. Branch emission uses this to find
    /// short and long forms of the same operation.
    pub fn matching(
        &self,
        instruction_type: InstructionType,
        mode_flags: ModeFlags,
        operands: &[&InstructionOperand],
    ) -> Vec<usize> {
        self.by_type
            .get(&instruction_type)
            .map(|indices| {
                indices
                    .iter()
                    .copied()
                    .filter(|&index| {
                        self.instructions[index].signature.matches(mode_flags, operands)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Selects the most specific instruction matching the operation, mode
    /// and operands, or `None` when no form matches. Returns a stable
    /// handle alongside the instruction so IR nodes can refer back to it.
    pub fn select(
        &self,
        instruction_type: InstructionType,
        mode_flags: ModeFlags,
        operands: &[&InstructionOperand],
    ) -> Option<(usize, &Instruction)> {
        let indices = self.by_type.get(&instruction_type)?;
        let mut best: Option<usize> = None;
        for &index in indices {
            let candidate = &self.instructions[index];
            if !candidate.signature.matches(mode_flags, operands) {
                continue;
            }
            best = match best {
                None => Some(index),
                Some(current) => {
                    let current_instruction = &self.instructions[current];
                    if candidate.signature.is_subset_of(&current_instruction.signature)
                        && !current_instruction.signature.is_subset_of(&candidate.signature)
                    {
                        Some(index)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best.map(|index| (index, &self.instructions[index]))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use relic_types::BinaryOperator;

    use super::*;
    use crate::encoding::InstructionEncoding;
    use crate::pattern::InstructionOperandPattern;
    use crate::signature::{InstructionOptions, InstructionSignature};

    static TEST_ENCODING: InstructionEncoding = InstructionEncoding {
        size: |options, _| options.opcode.len(),
        write: |buffer, _, options, _| {
            buffer.extend_from_slice(&options.opcode);
            Ok(())
        },
        relative_range: None,
    };

    fn assign(patterns: Vec<InstructionOperandPattern>, opcode: u8) -> Instruction {
        Instruction::new(
            InstructionSignature::new(
                InstructionType::Binary(BinaryOperator::Assignment),
                ModeFlags::NONE,
                patterns.into_iter().map(Arc::new).collect(),
            ),
            &TEST_ENCODING,
            InstructionOptions::opcode(vec![opcode]),
        )
    }

    fn registry() -> InstructionSet {
        let mut set = InstructionSet::new();
        // Wide form first so selection must prefer the narrow one by
        // specificity, not declaration order.
        set.add(assign(
            vec![
                InstructionOperandPattern::Register(relic_types::DefinitionId(0)),
                InstructionOperandPattern::IntegerRange { min: 0, max: 0xFFFF },
            ],
            0xAD,
        ));
        set.add(assign(
            vec![
                InstructionOperandPattern::Register(relic_types::DefinitionId(0)),
                InstructionOperandPattern::IntegerRange { min: 0, max: 0xFF },
            ],
            0xA5,
        ));
        set
    }

    #[test]
    fn selects_most_specific_form() {
        let set = registry();
        let dest = InstructionOperand::Register(relic_types::DefinitionId(0));
        let small = InstructionOperand::integer(0x12);
        let (_, selected) = set
            .select(
                InstructionType::Binary(BinaryOperator::Assignment),
                ModeFlags::NONE,
                &[&dest, &small],
            )
            .unwrap();
        assert_eq!(selected.options.opcode, vec![0xA5]);

        let large = InstructionOperand::integer(0x1234);
        let (_, selected) = set
            .select(
                InstructionType::Binary(BinaryOperator::Assignment),
                ModeFlags::NONE,
                &[&dest, &large],
            )
            .unwrap();
        assert_eq!(selected.options.opcode, vec![0xAD]);
    }

    #[test]
    fn selection_is_deterministic() {
        let set = registry();
        let dest = InstructionOperand::Register(relic_types::DefinitionId(0));
        let operand = InstructionOperand::integer(0x34);
        let operands = [&dest, &operand];
        let ty = InstructionType::Binary(BinaryOperator::Assignment);
        let (first, _) = set.select(ty, ModeFlags::NONE, &operands).unwrap();
        for _ in 0..16 {
            let (again, _) = set.select(ty, ModeFlags::NONE, &operands).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn mode_flags_gate_candidates() {
        let mut set = InstructionSet::new();
        let mut gated = assign(
            vec![
                InstructionOperandPattern::Register(relic_types::DefinitionId(0)),
                InstructionOperandPattern::IntegerRange { min: 0, max: 0xFF },
            ],
            0x01,
        );
        gated.signature.required_mode_flags = ModeFlags::bit(2);
        set.add(gated);

        let dest = InstructionOperand::Register(relic_types::DefinitionId(0));
        let operand = InstructionOperand::integer(1);
        let ty = InstructionType::Binary(BinaryOperator::Assignment);
        assert!(set.select(ty, ModeFlags::NONE, &[&dest, &operand]).is_none());
        assert!(set
            .select(ty, ModeFlags::bit(2), &[&dest, &operand])
            .is_some());
    }

    #[test]
    fn no_match_reports_candidates() {
        let set = registry();
        let ty = InstructionType::Binary(BinaryOperator::Assignment);
        assert_eq!(set.find_by_type(ty).len(), 2);
        assert!(set
            .find_by_type(InstructionType::Binary(BinaryOperator::Addition))
            .is_empty());
    }
}
