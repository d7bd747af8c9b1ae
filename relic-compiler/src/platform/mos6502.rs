//! The MOS 6502 family: NES/Famicom, Atari 2600, and (via the HuC6280
//! revision) the PC Engine.

use std::sync::Arc;

use relic_asm::{
    Instruction, InstructionEncoding, InstructionOperandPattern, InstructionOptions,
    InstructionSignature, InstructionType, ModeFlags,
};
use relic_types::{BinaryOperator, DefinitionId, UnaryOperator};

use crate::ast::{DistanceHint, Expression};
use crate::builtins::BuiltinType;
use crate::platform::{
    encodings, Platform, PlatformBranch, PlatformContext, PlatformTestAndBranch,
};

/// Which member of the 6502 family is targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mos6502Revision {
    Base6502,
    Base65C02,
    Rockwell65C02,
    Wdc65C02,
    Huc6280,
}

impl Mos6502Revision {
    fn has_65c02_extensions(self) -> bool {
        !matches!(self, Mos6502Revision::Base6502)
    }
}

/// 6502 target definition.
pub struct Mos6502Platform {
    revision: Mos6502Revision,
    pointer_sized_type: Option<DefinitionId>,
    a: Option<DefinitionId>,
    x: Option<DefinitionId>,
    y: Option<DefinitionId>,
    s: Option<DefinitionId>,
    zero: Option<DefinitionId>,
    carry: Option<DefinitionId>,
    nointerrupt: Option<DefinitionId>,
    decimal: Option<DefinitionId>,
    overflow: Option<DefinitionId>,
    negative: Option<DefinitionId>,
    cmp: Option<DefinitionId>,
    bit: Option<DefinitionId>,
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

fn shift_count() -> Pattern {
    Arc::new(InstructionOperandPattern::IntegerRange { min: 0, max: 8 }.captured())
}

/// Zero page access: `*(nn as *u8)`.
fn dp() -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(InstructionOperandPattern::IntegerRange { min: 0, max: 0xFF }.captured()),
        size: 1,
    })
}

/// Absolute access: `*(nnnn as *u8)`.
fn abs() -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0, max: 0xFFFF }.captured(),
        ),
        size: 1,
    })
}

/// Indexed access: `*((nn + index) as *u8)` with an 8- or 16-bit base.
fn indexed(base_max: i128, index: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Index {
        far: false,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0, max: base_max }.captured(),
        ),
        subscript: Box::new(InstructionOperandPattern::Register(index)),
        subscript_scale: 1,
        size: 1,
    })
}

/// Indirect indexed: `*((*(nn as *u16) + y) as *u8)`.
fn indirect_indexed(index: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Index {
        far: false,
        operand: Box::new(InstructionOperandPattern::Dereference {
            far: false,
            operand: Box::new(
                InstructionOperandPattern::IntegerRange { min: 0, max: 0xFF }.captured(),
            ),
            size: 2,
        }),
        subscript: Box::new(InstructionOperandPattern::Register(index)),
        subscript_scale: 1,
        size: 1,
    })
}

/// Indexed indirect: `*(*((nn + x) as *u16) as *u8)`.
fn indexed_indirect(index: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(InstructionOperandPattern::Index {
            far: false,
            operand: Box::new(
                InstructionOperandPattern::IntegerRange { min: 0, max: 0xFF }.captured(),
            ),
            subscript: Box::new(InstructionOperandPattern::Register(index)),
            subscript_scale: 1,
            size: 2,
        }),
        size: 1,
    })
}

/// Jump through a 16-bit vector: `goto *(nnnn as *u16)`.
fn indirect_jump_target() -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0, max: 0xFFFF }.captured(),
        ),
        size: 2,
    })
}

impl Mos6502Platform {
    pub fn new(revision: Mos6502Revision) -> Mos6502Platform {
        Mos6502Platform {
            revision,
            pointer_sized_type: None,
            a: None,
            x: None,
            y: None,
            s: None,
            zero: None,
            carry: None,
            nointerrupt: None,
            decimal: None,
            overflow: None,
            negative: None,
            cmp: None,
            bit: None,
        }
    }

    #[allow(clippy::too_many_lines)]
    fn add_instructions(&self, context: &mut PlatformContext<'_>) {
        let a = self.a.unwrap();
        let x = self.x.unwrap();
        let y = self.y.unwrap();
        let s = self.s.unwrap();
        let zero = self.zero.unwrap();
        let carry = self.carry.unwrap();
        let negative = self.negative.unwrap();
        let overflow = self.overflow.unwrap();
        let nointerrupt = self.nointerrupt.unwrap();
        let decimal = self.decimal.unwrap();

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

        // Loads into each register, with every addressing mode the CPU has.
        for (target, imm_op, dp_op, abs_op) in [
            (a, 0xA9u8, 0xA5u8, 0xADu8),
            (x, 0xA2, 0xA6, 0xAE),
            (y, 0xA0, 0xA4, 0xAC),
        ] {
            add(assign, vec![reg(target), imm8()], &encodings::U8_OPERAND, vec![imm_op], vec![0]);
            add(assign, vec![reg(target), dp()], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
            add(assign, vec![reg(target), abs()], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
        }
        add(assign, vec![reg(a), indexed(0xFF, x)], &encodings::U8_OPERAND, vec![0xB5], vec![0]);
        add(assign, vec![reg(a), indexed(0xFFFF, x)], &encodings::U16_OPERAND, vec![0xBD], vec![0]);
        add(assign, vec![reg(a), indexed(0xFFFF, y)], &encodings::U16_OPERAND, vec![0xB9], vec![0]);
        add(assign, vec![reg(a), indexed_indirect(x)], &encodings::U8_OPERAND, vec![0xA1], vec![0]);
        add(assign, vec![reg(a), indirect_indexed(y)], &encodings::U8_OPERAND, vec![0xB1], vec![0]);
        add(assign, vec![reg(x), indexed(0xFF, y)], &encodings::U8_OPERAND, vec![0xB6], vec![0]);
        add(assign, vec![reg(x), indexed(0xFFFF, y)], &encodings::U16_OPERAND, vec![0xBE], vec![0]);
        add(assign, vec![reg(y), indexed(0xFF, x)], &encodings::U8_OPERAND, vec![0xB4], vec![0]);
        add(assign, vec![reg(y), indexed(0xFFFF, x)], &encodings::U16_OPERAND, vec![0xBC], vec![0]);

        // Stores.
        for (source, dp_op, abs_op) in [(a, 0x85u8, 0x8Du8), (x, 0x86, 0x8E), (y, 0x84, 0x8C)] {
            add(assign, vec![dp(), reg(source)], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
            add(assign, vec![abs(), reg(source)], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
        }
        add(assign, vec![indexed(0xFF, x), reg(a)], &encodings::U8_OPERAND, vec![0x95], vec![0]);
        add(assign, vec![indexed(0xFFFF, x), reg(a)], &encodings::U16_OPERAND, vec![0x9D], vec![0]);
        add(assign, vec![indexed(0xFFFF, y), reg(a)], &encodings::U16_OPERAND, vec![0x99], vec![0]);
        add(assign, vec![indexed_indirect(x), reg(a)], &encodings::U8_OPERAND, vec![0x81], vec![0]);
        add(assign, vec![indirect_indexed(y), reg(a)], &encodings::U8_OPERAND, vec![0x91], vec![0]);
        add(assign, vec![indexed(0xFF, y), reg(x)], &encodings::U8_OPERAND, vec![0x96], vec![0]);
        add(assign, vec![indexed(0xFF, x), reg(y)], &encodings::U8_OPERAND, vec![0x94], vec![0]);

        // Transfers.
        for (dest, source, opcode) in [
            (a, x, 0x8Au8),
            (a, y, 0x98),
            (x, a, 0xAA),
            (y, a, 0xA8),
            (x, s, 0xBA),
            (s, x, 0x9A),
        ] {
            add(assign, vec![reg(dest), reg(source)], &encodings::IMPLIED, vec![opcode], vec![]);
        }

        // Flag manipulation.
        for (flag, value, opcode) in [
            (carry, false, 0x18u8),
            (carry, true, 0x38),
            (nointerrupt, false, 0x58),
            (nointerrupt, true, 0x78),
            (decimal, false, 0xD8),
            (decimal, true, 0xF8),
            (overflow, false, 0xB8),
        ] {
            add(
                assign,
                vec![reg(flag), flag_value(value)],
                &encodings::IMPLIED,
                vec![opcode],
                vec![],
            );
        }

        // Accumulator arithmetic. Plain add/subtract pre-set the carry; the
        // with-carry forms use it.
        for (op, prefix, imm_op, dp_op, abs_op, abs_x, abs_y, dp_x) in [
            (BinaryOperator::Addition, Some(0x18u8), 0x69u8, 0x65u8, 0x6Du8, 0x7Du8, 0x79u8, 0x75u8),
            (BinaryOperator::AdditionWithCarry, None, 0x69, 0x65, 0x6D, 0x7D, 0x79, 0x75),
            (BinaryOperator::Subtraction, Some(0x38), 0xE9, 0xE5, 0xED, 0xFD, 0xF9, 0xF5),
            (BinaryOperator::SubtractionWithCarry, None, 0xE9, 0xE5, 0xED, 0xFD, 0xF9, 0xF5),
            (BinaryOperator::BitwiseOr, None, 0x09, 0x05, 0x0D, 0x1D, 0x19, 0x15),
            (BinaryOperator::BitwiseAnd, None, 0x29, 0x25, 0x2D, 0x3D, 0x39, 0x35),
            (BinaryOperator::BitwiseXor, None, 0x49, 0x45, 0x4D, 0x5D, 0x59, 0x55),
        ] {
            let opcode = |code: u8| match prefix {
                Some(prefix) => vec![prefix, code],
                None => vec![code],
            };
            let ty = InstructionType::Binary(op);
            add(ty, vec![reg(a), imm8()], &encodings::U8_OPERAND, opcode(imm_op), vec![0]);
            add(ty, vec![reg(a), dp()], &encodings::U8_OPERAND, opcode(dp_op), vec![0]);
            add(ty, vec![reg(a), abs()], &encodings::U16_OPERAND, opcode(abs_op), vec![0]);
            add(ty, vec![reg(a), indexed(0xFF, x)], &encodings::U8_OPERAND, opcode(dp_x), vec![0]);
            add(ty, vec![reg(a), indexed(0xFFFF, x)], &encodings::U16_OPERAND, opcode(abs_x), vec![0]);
            add(ty, vec![reg(a), indexed(0xFFFF, y)], &encodings::U16_OPERAND, opcode(abs_y), vec![0]);
        }

        // Shifts and rotates on the accumulator repeat the one-byte opcode.
        for (op, opcode) in [
            (BinaryOperator::LeftShift, 0x0Au8),
            (BinaryOperator::LogicalLeftShift, 0x0A),
            (BinaryOperator::LogicalRightShift, 0x4A),
            (BinaryOperator::LeftRotateWithCarry, 0x2A),
            (BinaryOperator::RightRotateWithCarry, 0x6A),
        ] {
            add(
                InstructionType::Binary(op),
                vec![reg(a), shift_count()],
                &encodings::REPEATED_IMPLIED,
                vec![opcode],
                vec![0],
            );
        }

        // Single-shift read-modify-write on memory.
        for (op, dp_op, abs_op) in [
            (BinaryOperator::LeftShift, 0x06u8, 0x0Eu8),
            (BinaryOperator::LogicalLeftShift, 0x06, 0x0E),
            (BinaryOperator::LogicalRightShift, 0x46, 0x4E),
            (BinaryOperator::LeftRotateWithCarry, 0x26, 0x2E),
            (BinaryOperator::RightRotateWithCarry, 0x66, 0x6E),
        ] {
            let one = Arc::new(InstructionOperandPattern::exact_integer(1));
            let ty = InstructionType::Binary(op);
            add(ty, vec![dp(), one.clone()], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
            add(ty, vec![abs(), one], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
        }

        // Increments and decrements.
        for op in [UnaryOperator::PreIncrement, UnaryOperator::PostIncrement] {
            let ty = InstructionType::Unary(op);
            add(ty, vec![reg(x)], &encodings::IMPLIED, vec![0xE8], vec![]);
            add(ty, vec![reg(y)], &encodings::IMPLIED, vec![0xC8], vec![]);
            add(ty, vec![dp()], &encodings::U8_OPERAND, vec![0xE6], vec![0]);
            add(ty, vec![abs()], &encodings::U16_OPERAND, vec![0xEE], vec![0]);
            add(ty, vec![indexed(0xFF, x)], &encodings::U8_OPERAND, vec![0xF6], vec![0]);
            add(ty, vec![indexed(0xFFFF, x)], &encodings::U16_OPERAND, vec![0xFE], vec![0]);
        }
        for op in [UnaryOperator::PreDecrement, UnaryOperator::PostDecrement] {
            let ty = InstructionType::Unary(op);
            add(ty, vec![reg(x)], &encodings::IMPLIED, vec![0xCA], vec![]);
            add(ty, vec![reg(y)], &encodings::IMPLIED, vec![0x88], vec![]);
            add(ty, vec![dp()], &encodings::U8_OPERAND, vec![0xC6], vec![0]);
            add(ty, vec![abs()], &encodings::U16_OPERAND, vec![0xCE], vec![0]);
            add(ty, vec![indexed(0xFF, x)], &encodings::U8_OPERAND, vec![0xD6], vec![0]);
            add(ty, vec![indexed(0xFFFF, x)], &encodings::U16_OPERAND, vec![0xDE], vec![0]);
        }

        // a = ~a is an exclusive-or against 0xFF.
        add(
            InstructionType::Unary(UnaryOperator::BitwiseNegation),
            vec![reg(a)],
            &encodings::IMPLIED,
            vec![0x49, 0xFF],
            vec![],
        );

        // Comparison and bit-test intrinsics.
        let cmp = InstructionType::VoidIntrinsic(self.cmp.unwrap());
        for (left, imm_op, dp_op, abs_op) in [
            (a, 0xC9u8, 0xC5u8, 0xCDu8),
            (x, 0xE0, 0xE4, 0xEC),
            (y, 0xC0, 0xC4, 0xCC),
        ] {
            add(cmp, vec![reg(left), imm8()], &encodings::U8_OPERAND, vec![imm_op], vec![0]);
            add(cmp, vec![reg(left), dp()], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
            add(cmp, vec![reg(left), abs()], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
        }
        add(cmp, vec![reg(a), indexed(0xFFFF, x)], &encodings::U16_OPERAND, vec![0xDD], vec![0]);
        add(cmp, vec![reg(a), indexed(0xFFFF, y)], &encodings::U16_OPERAND, vec![0xD9], vec![0]);
        let bit = InstructionType::VoidIntrinsic(self.bit.unwrap());
        add(bit, vec![dp()], &encodings::U8_OPERAND, vec![0x24], vec![0]);
        add(bit, vec![abs()], &encodings::U16_OPERAND, vec![0x2C], vec![0]);

        // Unconditional control flow.
        let goto = InstructionType::Branch(relic_asm::BranchKind::Goto);
        add(goto, vec![addr16()], &encodings::U16_OPERAND, vec![0x4C], vec![0]);
        add(goto, vec![indirect_jump_target()], &encodings::U16_OPERAND, vec![0x6C], vec![0]);
        add(
            InstructionType::Branch(relic_asm::BranchKind::Call),
            vec![addr16()],
            &encodings::U16_OPERAND,
            vec![0x20],
            vec![0],
        );
        add(InstructionType::Branch(relic_asm::BranchKind::Return), vec![], &encodings::IMPLIED, vec![0x60], vec![]);
        add(InstructionType::Branch(relic_asm::BranchKind::IrqReturn), vec![], &encodings::IMPLIED, vec![0x40], vec![]);
        add(InstructionType::Branch(relic_asm::BranchKind::NmiReturn), vec![], &encodings::IMPLIED, vec![0x40], vec![]);

        // Conditional branches: destination, flag, required value.
        for (flag, value, opcode) in [
            (zero, true, 0xF0u8),
            (zero, false, 0xD0),
            (carry, true, 0xB0),
            (carry, false, 0x90),
            (negative, true, 0x30),
            (negative, false, 0x10),
            (overflow, true, 0x70),
            (overflow, false, 0x50),
        ] {
            add(
                goto,
                vec![addr16(), reg(flag), flag_value(value)],
                &encodings::PC_RELATIVE_I8,
                vec![opcode],
                vec![0],
            );
        }

        if self.revision.has_65c02_extensions() {
            // bra: a short unconditional goto, relaxable against jmp.
            add(goto, vec![addr16()], &encodings::PC_RELATIVE_I8, vec![0x80], vec![0]);
            // stz.
            let zero_value = Arc::new(InstructionOperandPattern::exact_integer(0));
            add(assign, vec![dp(), zero_value.clone()], &encodings::U8_OPERAND, vec![0x64], vec![0]);
            add(assign, vec![abs(), zero_value], &encodings::U16_OPERAND, vec![0x9C], vec![0]);
            // inc/dec a.
            for op in [UnaryOperator::PreIncrement, UnaryOperator::PostIncrement] {
                add(InstructionType::Unary(op), vec![reg(a)], &encodings::IMPLIED, vec![0x1A], vec![]);
            }
            for op in [UnaryOperator::PreDecrement, UnaryOperator::PostDecrement] {
                add(InstructionType::Unary(op), vec![reg(a)], &encodings::IMPLIED, vec![0x3A], vec![]);
            }
        }
    }
}

impl Platform for Mos6502Platform {
    fn name(&self) -> &'static str {
        match self.revision {
            Mos6502Revision::Base6502 => "6502",
            Mos6502Revision::Base65C02 => "65c02",
            Mos6502Revision::Rockwell65C02 => "rockwell65c02",
            Mos6502Revision::Wdc65C02 => "wdc65c02",
            Mos6502Revision::Huc6280 => "huc6280",
        }
    }

    fn reserve_definitions(&mut self, context: &mut PlatformContext<'_>) {
        let u8_type = context.builtins.get(BuiltinType::U8);
        let u16_type = context.builtins.get(BuiltinType::U16);
        let bool_type = context.builtins.get(BuiltinType::Bool);

        self.pointer_sized_type = Some(u16_type);
        self.a = Some(context.add_register("a", u8_type, 1));
        self.x = Some(context.add_register("x", u8_type, 1));
        self.y = Some(context.add_register("y", u8_type, 1));
        self.s = Some(context.add_register("s", u8_type, 1));
        self.zero = Some(context.add_register("zero", bool_type, 0));
        self.carry = Some(context.add_register("carry", bool_type, 0));
        self.nointerrupt = Some(context.add_register("nointerrupt", bool_type, 0));
        self.decimal = Some(context.add_register("decimal", bool_type, 0));
        self.overflow = Some(context.add_register("overflow", bool_type, 0));
        self.negative = Some(context.add_register("negative", bool_type, 0));
        self.cmp = Some(context.add_void_intrinsic("cmp"));
        self.bit = Some(context.add_void_intrinsic("bit"));

        let nop = context.add_void_intrinsic("nop");
        let push = context.add_void_intrinsic("push");
        let pop = context.add_load_intrinsic("pop");

        self.add_instructions(context);

        // Stack and miscellany live outside the main table builder so the
        // intrinsic handles stay in scope.
        let a = self.a.unwrap();
        let set = &mut context.builtins.instruction_set;
        set.add(Instruction::new(
            InstructionSignature::new(InstructionType::VoidIntrinsic(nop), ModeFlags::NONE, vec![]),
            &encodings::IMPLIED,
            InstructionOptions::opcode(vec![0xEA]),
        ));
        set.add(Instruction::new(
            InstructionSignature::new(
                InstructionType::VoidIntrinsic(push),
                ModeFlags::NONE,
                vec![reg(a)],
            ),
            &encodings::IMPLIED,
            InstructionOptions::opcode(vec![0x48]),
        ));
        set.add(Instruction::new(
            InstructionSignature::new(
                InstructionType::LoadIntrinsic(pop),
                ModeFlags::NONE,
                vec![reg(a)],
            ),
            &encodings::IMPLIED,
            InstructionOptions::opcode(vec![0x68]),
        ));
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
        // Put the literal on the right so cmp's operand patterns apply.
        let (op, left, right) =
            if left.as_integer_literal().is_some() && right.as_integer_literal().is_none() {
                (op.reversed_comparison()?, right, left)
            } else {
                (op, left, right)
            };

        let zero = self.zero?;
        let carry = self.carry?;
        use BinaryOperator::*;
        let branches = match op {
            Equal => vec![PlatformBranch::new(zero, true, true)],
            NotEqual => vec![PlatformBranch::new(zero, false, true)],
            // cmp leaves carry set when left >= right, unsigned.
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
