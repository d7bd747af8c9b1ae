//! The Sony SPC700, the SNES audio coprocessor.

use std::sync::Arc;

use relic_asm::{
    BranchKind, Instruction, InstructionEncoding, InstructionOperandPattern, InstructionOptions,
    InstructionSignature, InstructionType, ModeFlags,
};
use relic_types::{BinaryOperator, DefinitionId, UnaryOperator};

use crate::ast::{DistanceHint, Expression};
use crate::builtins::BuiltinType;
use crate::platform::{
    encodings, Platform, PlatformBranch, PlatformContext, PlatformTestAndBranch,
};

/// SPC700 target definition.
pub struct Spc700Platform {
    pointer_sized_type: Option<DefinitionId>,
    a: Option<DefinitionId>,
    x: Option<DefinitionId>,
    y: Option<DefinitionId>,
    zero: Option<DefinitionId>,
    carry: Option<DefinitionId>,
    cmp: Option<DefinitionId>,
}

type Pattern = Arc<InstructionOperandPattern>;

fn reg(id: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Register(id))
}

fn flag_value(value: bool) -> Pattern {
    Arc::new(InstructionOperandPattern::Boolean(value))
}

fn imm8() -> Pattern {
    Arc::new(InstructionOperandPattern::IntegerRange { min: 0, max: 0xFF }.captured())
}

fn addr16() -> Pattern {
    Arc::new(InstructionOperandPattern::IntegerRange { min: 0, max: 0xFFFF }.captured())
}

/// Direct page access.
fn dp() -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(InstructionOperandPattern::IntegerRange { min: 0, max: 0xFF }.captured()),
        size: 1,
    })
}

/// Absolute access.
fn abs() -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0, max: 0xFFFF }.captured(),
        ),
        size: 1,
    })
}

/// `*(x as *u8)` indirect access.
fn deref_x(x: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(InstructionOperandPattern::Register(x)),
        size: 1,
    })
}

impl Spc700Platform {
    pub fn new() -> Spc700Platform {
        Spc700Platform {
            pointer_sized_type: None,
            a: None,
            x: None,
            y: None,
            zero: None,
            carry: None,
            cmp: None,
        }
    }

    fn add_instructions(&self, context: &mut PlatformContext<'_>) {
        let a = self.a.unwrap();
        let x = self.x.unwrap();
        let y = self.y.unwrap();
        let zero = self.zero.unwrap();
        let carry = self.carry.unwrap();

        let set = &mut context.builtins.instruction_set;
        let mut add = |ty: InstructionType,
                       patterns: Vec<Pattern>,
                       encoding: &'static InstructionEncoding,
                       opcode: Vec<u8>,
                       parameter: Vec<usize>| {
            set.add(Instruction::new(
                InstructionSignature::new(ty, ModeFlags::NONE, patterns),
                encoding,
                InstructionOptions::with_parameter(opcode, parameter),
            ));
        };

        let assign = InstructionType::Binary(BinaryOperator::Assignment);

        // mov loads and stores.
        for (target, imm_op, dp_op, abs_op) in [
            (a, 0xE8u8, 0xE4u8, 0xE5u8),
            (x, 0xCD, 0xF8, 0xE9),
            (y, 0x8D, 0xEB, 0xEC),
        ] {
            add(assign, vec![reg(target), imm8()], &encodings::U8_OPERAND, vec![imm_op], vec![0]);
            add(assign, vec![reg(target), dp()], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
            add(assign, vec![reg(target), abs()], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
        }
        for (source, dp_op, abs_op) in [(a, 0xC4u8, 0xC5u8), (x, 0xD8, 0xC9), (y, 0xCB, 0xCC)] {
            add(assign, vec![dp(), reg(source)], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
            add(assign, vec![abs(), reg(source)], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
        }
        add(assign, vec![reg(a), deref_x(x)], &encodings::IMPLIED, vec![0xE6], vec![]);
        add(assign, vec![deref_x(x), reg(a)], &encodings::IMPLIED, vec![0xC6], vec![]);
        for (dest, source, opcode) in [
            (a, x, 0x7Du8),
            (a, y, 0xDD),
            (x, a, 0x5D),
            (y, a, 0xFD),
        ] {
            add(assign, vec![reg(dest), reg(source)], &encodings::IMPLIED, vec![opcode], vec![]);
        }

        // Arithmetic and logic on the accumulator.
        for (op, prefix, imm_op, dp_op, abs_op) in [
            (BinaryOperator::Addition, Some(0x60u8), 0x88u8, 0x84u8, 0x85u8),
            (BinaryOperator::AdditionWithCarry, None, 0x88, 0x84, 0x85),
            (BinaryOperator::Subtraction, Some(0x80), 0xA8, 0xA4, 0xA5),
            (BinaryOperator::SubtractionWithCarry, None, 0xA8, 0xA4, 0xA5),
            (BinaryOperator::BitwiseOr, None, 0x08, 0x04, 0x05),
            (BinaryOperator::BitwiseAnd, None, 0x28, 0x24, 0x25),
            (BinaryOperator::BitwiseXor, None, 0x48, 0x44, 0x45),
        ] {
            let opcode = |code: u8| match prefix {
                Some(prefix) => vec![prefix, code],
                None => vec![code],
            };
            let ty = InstructionType::Binary(op);
            add(ty, vec![reg(a), imm8()], &encodings::U8_OPERAND, opcode(imm_op), vec![0]);
            add(ty, vec![reg(a), dp()], &encodings::U8_OPERAND, opcode(dp_op), vec![0]);
            add(ty, vec![reg(a), abs()], &encodings::U16_OPERAND, opcode(abs_op), vec![0]);
        }

        // Shifts repeat their one-byte opcode.
        for (op, opcode) in [
            (BinaryOperator::LeftShift, 0x1Cu8),
            (BinaryOperator::LogicalLeftShift, 0x1C),
            (BinaryOperator::LogicalRightShift, 0x5C),
            (BinaryOperator::LeftRotateWithCarry, 0x3C),
            (BinaryOperator::RightRotateWithCarry, 0x7C),
        ] {
            let count = Arc::new(InstructionOperandPattern::IntegerRange { min: 0, max: 8 }.captured());
            add(
                InstructionType::Binary(op),
                vec![reg(a), count],
                &encodings::REPEATED_IMPLIED,
                vec![opcode],
                vec![0],
            );
        }

        // Increments and decrements.
        for (register, inc_op, dec_op) in [(a, 0xBCu8, 0x9Cu8), (x, 0x3D, 0x1D), (y, 0xFC, 0xDC)] {
            for op in [UnaryOperator::PreIncrement, UnaryOperator::PostIncrement] {
                add(InstructionType::Unary(op), vec![reg(register)], &encodings::IMPLIED, vec![inc_op], vec![]);
            }
            for op in [UnaryOperator::PreDecrement, UnaryOperator::PostDecrement] {
                add(InstructionType::Unary(op), vec![reg(register)], &encodings::IMPLIED, vec![dec_op], vec![]);
            }
        }
        add(
            InstructionType::Unary(UnaryOperator::PreIncrement),
            vec![dp()],
            &encodings::U8_OPERAND,
            vec![0xAB],
            vec![0],
        );
        add(
            InstructionType::Unary(UnaryOperator::PreDecrement),
            vec![dp()],
            &encodings::U8_OPERAND,
            vec![0x8B],
            vec![0],
        );

        // cmp intrinsic.
        let cmp = InstructionType::VoidIntrinsic(self.cmp.unwrap());
        for (left, imm_op, dp_op, abs_op) in [
            (a, 0x68u8, 0x64u8, 0x65u8),
            (x, 0xC8, 0x3E, 0x1E),
            (y, 0xAD, 0x7E, 0x5E),
        ] {
            add(cmp, vec![reg(left), imm8()], &encodings::U8_OPERAND, vec![imm_op], vec![0]);
            add(cmp, vec![reg(left), dp()], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
            add(cmp, vec![reg(left), abs()], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
        }

        // Control flow.
        let goto = InstructionType::Branch(BranchKind::Goto);
        add(goto, vec![addr16()], &encodings::U16_OPERAND, vec![0x5F], vec![0]);
        add(goto, vec![addr16()], &encodings::PC_RELATIVE_I8, vec![0x2F], vec![0]);
        for (flag, value, opcode) in [
            (zero, true, 0xF0u8),
            (zero, false, 0xD0),
            (carry, true, 0xB0),
            (carry, false, 0x90),
        ] {
            add(
                goto,
                vec![addr16(), reg(flag), flag_value(value)],
                &encodings::PC_RELATIVE_I8,
                vec![opcode],
                vec![0],
            );
        }
        add(
            InstructionType::Branch(BranchKind::Call),
            vec![addr16()],
            &encodings::U16_OPERAND,
            vec![0x3F],
            vec![0],
        );
        add(InstructionType::Branch(BranchKind::Return), vec![], &encodings::IMPLIED, vec![0x6F], vec![]);
        add(InstructionType::Branch(BranchKind::IrqReturn), vec![], &encodings::IMPLIED, vec![0x7F], vec![]);
        add(InstructionType::Branch(BranchKind::NmiReturn), vec![], &encodings::IMPLIED, vec![0x7F], vec![]);

        // Carry flag assignment.
        add(assign, vec![reg(carry), flag_value(false)], &encodings::IMPLIED, vec![0x60], vec![]);
        add(assign, vec![reg(carry), flag_value(true)], &encodings::IMPLIED, vec![0x80], vec![]);
    }
}

impl Default for Spc700Platform {
    fn default() -> Self {
        Spc700Platform::new()
    }
}

impl Platform for Spc700Platform {
    fn name(&self) -> &'static str {
        "spc700"
    }

    fn reserve_definitions(&mut self, context: &mut PlatformContext<'_>) {
        let u8_type = context.builtins.get(BuiltinType::U8);
        let u16_type = context.builtins.get(BuiltinType::U16);
        let bool_type = context.builtins.get(BuiltinType::Bool);

        self.pointer_sized_type = Some(u16_type);
        self.a = Some(context.add_register("a", u8_type, 1));
        self.x = Some(context.add_register("x", u8_type, 1));
        self.y = Some(context.add_register("y", u8_type, 1));
        self.zero = Some(context.add_register("zero", bool_type, 0));
        self.carry = Some(context.add_register("carry", bool_type, 0));
        self.cmp = Some(context.add_void_intrinsic("cmp"));

        let nop = context.add_void_intrinsic("nop");
        let sleep = context.add_void_intrinsic("sleep");
        let stop = context.add_void_intrinsic("stop");

        self.add_instructions(context);

        let set = &mut context.builtins.instruction_set;
        for (intrinsic, opcode) in [(nop, 0x00u8), (sleep, 0xEF), (stop, 0xFF)] {
            set.add(Instruction::new(
                InstructionSignature::new(InstructionType::VoidIntrinsic(intrinsic), ModeFlags::NONE, vec![]),
                &encodings::IMPLIED,
                InstructionOptions::opcode(vec![opcode]),
            ));
        }
    }

    fn pointer_sized_type(&self) -> DefinitionId {
        self.pointer_sized_type.expect("reserve_definitions ran")
    }

    fn far_pointer_sized_type(&self) -> DefinitionId {
        self.pointer_sized_type.expect("reserve_definitions ran")
    }

    fn get_test_and_branch(
        &self,
        op: BinaryOperator,
        operand_size: usize,
        left: &Expression,
        right: &Expression,
        _distance_hint: DistanceHint,
    ) -> Option<PlatformTestAndBranch> {
        if operand_size != 1 {
            return None;
        }
        let (op, left, right) =
            if left.as_integer_literal().is_some() && right.as_integer_literal().is_none() {
                (op.reversed_comparison()?, right, left)
            } else {
                (op, left, right)
            };

        let zero = self.zero?;
        let carry = self.carry?;
        use BinaryOperator::*;
        // cmp leaves carry set when left >= right, like the 6502.
        let branches = match op {
            Equal => vec![PlatformBranch::new(zero, true, true)],
            NotEqual => vec![PlatformBranch::new(zero, false, true)],
            LessThan => vec![PlatformBranch::new(carry, false, true)],
            GreaterThanOrEqual => vec![PlatformBranch::new(carry, true, true)],
            LessThanOrEqual => vec![
                PlatformBranch::new(zero, true, true),
                PlatformBranch::new(carry, false, true),
            ],
            GreaterThan => vec![
                PlatformBranch::new(zero, true, false),
                PlatformBranch::new(carry, true, true),
            ],
            _ => return None,
        };
        Some(PlatformTestAndBranch {
            test: Some((
                InstructionType::VoidIntrinsic(self.cmp?),
                vec![left.clone(), right.clone()],
            )),
            branches,
        })
    }

    fn zero_flag(&self) -> DefinitionId {
        self.zero.expect("reserve_definitions ran")
    }

    fn placeholder_value(&self) -> i128 {
        0xFFFF
    }
}
