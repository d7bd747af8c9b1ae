use std::sync::Arc;

use relic_types::{BinaryOperator, DefinitionId, UnaryOperator};

use crate::encoding::InstructionEncoding;
use crate::mode_flags::ModeFlags;
use crate::operand::{InstructionOperand, RegisterNamer};
use crate::pattern::InstructionOperandPattern;

/// Control transfer kinds an instruction can implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter)]
pub enum BranchKind {
    /// `break` out of the innermost loop.
    Break,
    /// `continue` the innermost loop.
    Continue,
    /// Unconditional or conditional jump within the near address space.
    Goto,
    /// Jump across the far address space.
    FarGoto,
    /// Subroutine call.
    Call,
    /// Far subroutine call.
    FarCall,
    /// Subroutine return.
    Return,
    /// Far subroutine return.
    FarReturn,
    /// Return from an IRQ handler.
    IrqReturn,
    /// Return from an NMI handler.
    NmiReturn,
}

/// What high-level operation an instruction implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstructionType {
    /// A control transfer of the given kind.
    Branch(BranchKind),
    /// An in-place unary operation (`++`, `--`, `-`, `~`, ...).
    Unary(UnaryOperator),
    /// A binary operation (`=`, `+`, `-`, ..., with the destination as the
    /// first operand).
    Binary(BinaryOperator),
    /// A platform intrinsic called for effect, keyed by its definition.
    VoidIntrinsic(DefinitionId),
    /// A platform intrinsic that produces a value into a destination
    /// operand, keyed by its definition.
    LoadIntrinsic(DefinitionId),
}

/// Operands captured per operand root during pattern extraction.
pub type CaptureList<'a> = Vec<&'a InstructionOperand>;

/// Per-instruction encoding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionOptions {
    /// Base opcode bytes emitted before encoded parameters.
    pub opcode: Vec<u8>,
    /// For each encoding parameter, the index of the capture that feeds it
    /// (indexes into the flattened capture lists, operand-root order).
    pub parameter: Vec<usize>,
    /// Flag registers whose values are undefined after this instruction.
    pub affected_flags: Vec<DefinitionId>,
}

impl InstructionOptions {
    /// Options with opcode bytes only.
    pub fn opcode(opcode: Vec<u8>) -> InstructionOptions {
        InstructionOptions {
            opcode,
            parameter: Vec::new(),
            affected_flags: Vec::new(),
        }
    }

    /// Options with opcode bytes and capture-fed parameters.
    pub fn with_parameter(opcode: Vec<u8>, parameter: Vec<usize>) -> InstructionOptions {
        InstructionOptions {
            opcode,
            parameter,
            affected_flags: Vec::new(),
        }
    }
}

/// What an instruction matches: an operation, a required CPU mode mask, and
/// one pattern per operand.
#[derive(Debug, Clone)]
pub struct InstructionSignature {
    /// Operation implemented.
    pub instruction_type: InstructionType,
    /// Mode flags that must all be active for this form to be selectable.
    pub required_mode_flags: ModeFlags,
    /// One pattern per operand, in operand order. Shared between
    /// instructions, so they are reference-counted.
    pub operand_patterns: Vec<Arc<InstructionOperandPattern>>,
}

impl InstructionSignature {
    /// Creates a signature over shared operand patterns.
    pub fn new(
        instruction_type: InstructionType,
        required_mode_flags: ModeFlags,
        operand_patterns: Vec<Arc<InstructionOperandPattern>>,
    ) -> InstructionSignature {
        InstructionSignature {
            instruction_type,
            required_mode_flags,
            operand_patterns,
        }
    }

    /// Whether this signature matches the current mode and the given
    /// operand roots.
    pub fn matches(&self, mode_flags: ModeFlags, operands: &[&InstructionOperand]) -> bool {
        mode_flags.contains(self.required_mode_flags)
            && self.operand_patterns.len() == operands.len()
            && self
                .operand_patterns
                .iter()
                .zip(operands)
                .all(|(pattern, operand)| pattern.matches(operand))
    }

    /// Extracts capture lists, one per operand root. Returns `None` when the
    /// operands do not match after all (selection always re-extracts from
    /// the chosen signature).
    pub fn extract<'a>(
        &self,
        operands: &[&'a InstructionOperand],
    ) -> Option<Vec<CaptureList<'a>>> {
        if self.operand_patterns.len() != operands.len() {
            return None;
        }
        let mut capture_lists = Vec::with_capacity(operands.len());
        for (pattern, operand) in self.operand_patterns.iter().zip(operands) {
            let mut captures = Vec::new();
            if !pattern.extract(operand, &mut captures) {
                return None;
            }
            capture_lists.push(captures);
        }
        Some(capture_lists)
    }

    /// Specificity partial order: `self` accepts no operand set that
    /// `other` rejects, requires at least the other's mode flags, and
    /// implements the same operation.
    pub fn is_subset_of(&self, other: &InstructionSignature) -> bool {
        self.instruction_type == other.instruction_type
            && self.required_mode_flags.contains(other.required_mode_flags)
            && self.operand_patterns.len() == other.operand_patterns.len()
            && self
                .operand_patterns
                .iter()
                .zip(&other.operand_patterns)
                .all(|(pattern, other_pattern)| pattern.is_subset_of(other_pattern))
    }

    /// Renders the operand pattern list for candidate diagnostics.
    pub fn describe_operands(&self, namer: &dyn RegisterNamer) -> String {
        self.operand_patterns
            .iter()
            .map(|pattern| pattern.describe(namer))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A selectable machine instruction: a signature plus its encoding and
/// encoding parameters.
#[derive(Debug, Clone)]
pub struct Instruction {
    /// What this instruction matches.
    pub signature: InstructionSignature,
    /// How it is sized and serialized.
    pub encoding: &'static InstructionEncoding,
    /// Encoding parameters (opcode bytes, capture routing, clobbers).
    pub options: InstructionOptions,
}

impl Instruction {
    /// Creates an instruction.
    pub fn new(
        signature: InstructionSignature,
        encoding: &'static InstructionEncoding,
        options: InstructionOptions,
    ) -> Instruction {
        Instruction {
            signature,
            encoding,
            options,
        }
    }

    /// Size in bytes given the extracted captures.
    pub fn size(&self, captures: &[CaptureList<'_>]) -> usize {
        (self.encoding.size)(&self.options, captures)
    }
}
