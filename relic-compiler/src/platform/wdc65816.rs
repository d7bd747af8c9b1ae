//! The WDC 65816: the 6502 grown to 16-bit registers and a 24-bit address
//! space, with run-time register width controlled by the `m`/`x` status
//! bits. Widths surface as two register names each (`a`/`aa`, `x`/`xx`,
//! `y`/`yy`) plus the `mem8`/`mem16` and `idx8`/`idx16` mode attributes;
//! instruction forms carry the mode mask they require.

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

/// WDC 65816 target definition.
pub struct Wdc65816Platform {
    pointer_sized_type: Option<DefinitionId>,
    far_pointer_sized_type: Option<DefinitionId>,
    a: Option<DefinitionId>,
    aa: Option<DefinitionId>,
    x: Option<DefinitionId>,
    xx: Option<DefinitionId>,
    y: Option<DefinitionId>,
    yy: Option<DefinitionId>,
    zero: Option<DefinitionId>,
    carry: Option<DefinitionId>,
    negative: Option<DefinitionId>,
    overflow: Option<DefinitionId>,
    decimal: Option<DefinitionId>,
    nointerrupt: Option<DefinitionId>,
    cmp: Option<DefinitionId>,
    mem8: ModeFlags,
    mem16: ModeFlags,
    idx8: ModeFlags,
    idx16: ModeFlags,
}

type Pattern = Arc<InstructionOperandPattern>;

fn reg(id: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Register(id))
}

fn flag_value(value: bool) -> Pattern {
    Arc::new(InstructionOperandPattern::Boolean(value))
}

fn imm(max: i128) -> Pattern {
    Arc::new(InstructionOperandPattern::IntegerRange { min: 0, max }.captured())
}

fn deref(base_max: i128, far: bool, size: usize) -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0, max: base_max }.captured(),
        ),
        size,
    })
}

fn indexed(base_max: i128, index: DefinitionId, far: bool, size: usize) -> Pattern {
    Arc::new(InstructionOperandPattern::Index {
        far,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0, max: base_max }.captured(),
        ),
        subscript: Box::new(InstructionOperandPattern::Register(index)),
        subscript_scale: 1,
        size,
    })
}

impl Wdc65816Platform {
    pub fn new() -> Wdc65816Platform {
        Wdc65816Platform {
            pointer_sized_type: None,
            far_pointer_sized_type: None,
            a: None,
            aa: None,
            x: None,
            xx: None,
            y: None,
            yy: None,
            zero: None,
            carry: None,
            negative: None,
            overflow: None,
            decimal: None,
            nointerrupt: None,
            cmp: None,
            mem8: ModeFlags::NONE,
            mem16: ModeFlags::NONE,
            idx8: ModeFlags::NONE,
            idx16: ModeFlags::NONE,
        }
    }

    #[allow(clippy::too_many_lines)]
    fn add_instructions(&self, context: &mut PlatformContext<'_>) {
        let zero = self.zero.unwrap();
        let carry = self.carry.unwrap();
        let negative = self.negative.unwrap();
        let overflow = self.overflow.unwrap();
        let decimal = self.decimal.unwrap();
        let nointerrupt = self.nointerrupt.unwrap();

        let set = &mut context.builtins.instruction_set;
        let mut add = |ty: InstructionType,
                       mode: ModeFlags,
                       patterns: Vec<Pattern>,
                       encoding: &'static InstructionEncoding,
                       opcode: Vec<u8>,
                       parameter: Vec<usize>| {
            set.add(Instruction::new(
                InstructionSignature::new(ty, mode, patterns),
                encoding,
                InstructionOptions::with_parameter(opcode, parameter),
            ));
        };

        let assign = InstructionType::Binary(BinaryOperator::Assignment);
        let none = ModeFlags::NONE;

        // Accumulator widths: (register, byte width, required mode,
        // immediate encoding, immediate ceiling).
        let accumulators = [
            (self.a.unwrap(), 1usize, self.mem8, &encodings::U8_OPERAND, 0xFFi128),
            (self.aa.unwrap(), 2, self.mem16, &encodings::U16_OPERAND, 0xFFFF),
        ];
        let x_indexes = [
            (self.x.unwrap(), 1usize, self.idx8, &encodings::U8_OPERAND, 0xFFi128),
            (self.xx.unwrap(), 2, self.idx16, &encodings::U16_OPERAND, 0xFFFF),
        ];
        let y_indexes = [
            (self.y.unwrap(), 1usize, self.idx8, &encodings::U8_OPERAND, 0xFFi128),
            (self.yy.unwrap(), 2, self.idx16, &encodings::U16_OPERAND, 0xFFFF),
        ];

        // Accumulator loads, stores and arithmetic in both widths. Direct
        // page, absolute and long addressing keep one opcode per form; the
        // operand width follows the m flag.
        for &(acc, size, mode, imm_encoding, imm_max) in &accumulators {
            let xi = if size == 1 { self.x.unwrap() } else { self.xx.unwrap() };
            let yi = if size == 1 { self.y.unwrap() } else { self.yy.unwrap() };

            add(assign, mode, vec![reg(acc), imm(imm_max)], imm_encoding, vec![0xA9], vec![0]);
            add(assign, mode, vec![reg(acc), deref(0xFF, false, size)], &encodings::U8_OPERAND, vec![0xA5], vec![0]);
            add(assign, mode, vec![reg(acc), deref(0xFFFF, false, size)], &encodings::U16_OPERAND, vec![0xAD], vec![0]);
            add(assign, mode, vec![reg(acc), deref(0xFFFFFF, true, size)], &encodings::U24_OPERAND, vec![0xAF], vec![0]);
            add(assign, mode, vec![reg(acc), indexed(0xFFFF, xi, false, size)], &encodings::U16_OPERAND, vec![0xBD], vec![0]);
            add(assign, mode, vec![reg(acc), indexed(0xFFFF, yi, false, size)], &encodings::U16_OPERAND, vec![0xB9], vec![0]);
            add(assign, mode, vec![reg(acc), indexed(0xFFFFFF, xi, true, size)], &encodings::U24_OPERAND, vec![0xBF], vec![0]);
            add(assign, mode, vec![deref(0xFF, false, size), reg(acc)], &encodings::U8_OPERAND, vec![0x85], vec![0]);
            add(assign, mode, vec![deref(0xFFFF, false, size), reg(acc)], &encodings::U16_OPERAND, vec![0x8D], vec![0]);
            add(assign, mode, vec![deref(0xFFFFFF, true, size), reg(acc)], &encodings::U24_OPERAND, vec![0x8F], vec![0]);
            add(assign, mode, vec![indexed(0xFFFF, xi, false, size), reg(acc)], &encodings::U16_OPERAND, vec![0x9D], vec![0]);
            add(assign, mode, vec![indexed(0xFFFF, yi, false, size), reg(acc)], &encodings::U16_OPERAND, vec![0x99], vec![0]);

            for (op, prefix, code) in [
                (BinaryOperator::Addition, Some(0x18u8), 0x69u8),
                (BinaryOperator::AdditionWithCarry, None, 0x69),
                (BinaryOperator::Subtraction, Some(0x38), 0xE9),
                (BinaryOperator::SubtractionWithCarry, None, 0xE9),
                (BinaryOperator::BitwiseOr, None, 0x09),
                (BinaryOperator::BitwiseAnd, None, 0x29),
                (BinaryOperator::BitwiseXor, None, 0x49),
            ] {
                let opcode = |code: u8| match prefix {
                    Some(prefix) => vec![prefix, code],
                    None => vec![code],
                };
                let ty = InstructionType::Binary(op);
                add(ty, mode, vec![reg(acc), imm(imm_max)], imm_encoding, opcode(code), vec![0]);
                add(ty, mode, vec![reg(acc), deref(0xFF, false, size)], &encodings::U8_OPERAND, opcode(code - 4), vec![0]);
                add(ty, mode, vec![reg(acc), deref(0xFFFF, false, size)], &encodings::U16_OPERAND, opcode(code + 4), vec![0]);
            }

            for (op, opcode) in [
                (BinaryOperator::LeftShift, 0x0Au8),
                (BinaryOperator::LogicalLeftShift, 0x0A),
                (BinaryOperator::LogicalRightShift, 0x4A),
                (BinaryOperator::LeftRotateWithCarry, 0x2A),
                (BinaryOperator::RightRotateWithCarry, 0x6A),
            ] {
                let count =
                    Arc::new(InstructionOperandPattern::IntegerRange { min: 0, max: 16 }.captured());
                add(
                    InstructionType::Binary(op),
                    mode,
                    vec![reg(acc), count],
                    &encodings::REPEATED_IMPLIED,
                    vec![opcode],
                    vec![0],
                );
            }

            for op in [UnaryOperator::PreIncrement, UnaryOperator::PostIncrement] {
                add(InstructionType::Unary(op), mode, vec![reg(acc)], &encodings::IMPLIED, vec![0x1A], vec![]);
            }
            for op in [UnaryOperator::PreDecrement, UnaryOperator::PostDecrement] {
                add(InstructionType::Unary(op), mode, vec![reg(acc)], &encodings::IMPLIED, vec![0x3A], vec![]);
            }
        }

        // Index register loads/stores and steps.
        for (indexes, imm_op, dp_op, abs_op, store_dp, store_abs, inc_op, dec_op) in [
            (&x_indexes, 0xA2u8, 0xA6u8, 0xAEu8, 0x86u8, 0x8Eu8, 0xE8u8, 0xCAu8),
            (&y_indexes, 0xA0, 0xA4, 0xAC, 0x84, 0x8C, 0xC8, 0x88),
        ] {
            for &(index, size, mode, imm_encoding, imm_max) in indexes.iter() {
                add(assign, mode, vec![reg(index), imm(imm_max)], imm_encoding, vec![imm_op], vec![0]);
                add(assign, mode, vec![reg(index), deref(0xFF, false, size)], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
                add(assign, mode, vec![reg(index), deref(0xFFFF, false, size)], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
                add(assign, mode, vec![deref(0xFF, false, size), reg(index)], &encodings::U8_OPERAND, vec![store_dp], vec![0]);
                add(assign, mode, vec![deref(0xFFFF, false, size), reg(index)], &encodings::U16_OPERAND, vec![store_abs], vec![0]);
                for op in [UnaryOperator::PreIncrement, UnaryOperator::PostIncrement] {
                    add(InstructionType::Unary(op), mode, vec![reg(index)], &encodings::IMPLIED, vec![inc_op], vec![]);
                }
                for op in [UnaryOperator::PreDecrement, UnaryOperator::PostDecrement] {
                    add(InstructionType::Unary(op), mode, vec![reg(index)], &encodings::IMPLIED, vec![dec_op], vec![]);
                }
            }
        }

        // Transfers between same-width register names.
        for (dest, source, opcode) in [
            (self.a.unwrap(), self.x.unwrap(), 0x8Au8),
            (self.a.unwrap(), self.y.unwrap(), 0x98),
            (self.x.unwrap(), self.a.unwrap(), 0xAA),
            (self.y.unwrap(), self.a.unwrap(), 0xA8),
            (self.aa.unwrap(), self.xx.unwrap(), 0x8A),
            (self.aa.unwrap(), self.yy.unwrap(), 0x98),
            (self.xx.unwrap(), self.aa.unwrap(), 0xAA),
            (self.yy.unwrap(), self.aa.unwrap(), 0xA8),
            (self.xx.unwrap(), self.yy.unwrap(), 0x9B),
            (self.yy.unwrap(), self.xx.unwrap(), 0xBB),
        ] {
            add(assign, none, vec![reg(dest), reg(source)], &encodings::IMPLIED, vec![opcode], vec![]);
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
            add(assign, none, vec![reg(flag), flag_value(value)], &encodings::IMPLIED, vec![opcode], vec![]);
        }

        // cmp/cpx/cpy in both widths.
        let cmp = InstructionType::VoidIntrinsic(self.cmp.unwrap());
        for (registers, imm_op, dp_op, abs_op) in [
            (&accumulators, 0xC9u8, 0xC5u8, 0xCDu8),
            (&x_indexes, 0xE0, 0xE4, 0xEC),
            (&y_indexes, 0xC0, 0xC4, 0xCC),
        ] {
            for &(register, size, mode, imm_encoding, imm_max) in registers.iter() {
                add(cmp, mode, vec![reg(register), imm(imm_max)], imm_encoding, vec![imm_op], vec![0]);
                add(cmp, mode, vec![reg(register), deref(0xFF, false, size)], &encodings::U8_OPERAND, vec![dp_op], vec![0]);
                add(cmp, mode, vec![reg(register), deref(0xFFFF, false, size)], &encodings::U16_OPERAND, vec![abs_op], vec![0]);
            }
        }

        // Control flow. bra/brl/jmp relax against each other; jml and jsl
        // cover the far space.
        let goto = InstructionType::Branch(BranchKind::Goto);
        add(goto, none, vec![imm(0xFFFF)], &encodings::U16_OPERAND, vec![0x4C], vec![0]);
        add(goto, none, vec![imm(0xFFFF)], &encodings::PC_RELATIVE_I16, vec![0x82], vec![0]);
        add(goto, none, vec![imm(0xFFFF)], &encodings::PC_RELATIVE_I8, vec![0x80], vec![0]);
        add(
            InstructionType::Branch(BranchKind::FarGoto),
            none,
            vec![imm(0xFFFFFF)],
            &encodings::U24_OPERAND,
            vec![0x5C],
            vec![0],
        );
        add(
            InstructionType::Branch(BranchKind::Call),
            none,
            vec![imm(0xFFFF)],
            &encodings::U16_OPERAND,
            vec![0x20],
            vec![0],
        );
        add(
            InstructionType::Branch(BranchKind::FarCall),
            none,
            vec![imm(0xFFFFFF)],
            &encodings::U24_OPERAND,
            vec![0x22],
            vec![0],
        );
        add(InstructionType::Branch(BranchKind::Return), none, vec![], &encodings::IMPLIED, vec![0x60], vec![]);
        add(InstructionType::Branch(BranchKind::FarReturn), none, vec![], &encodings::IMPLIED, vec![0x6B], vec![]);
        add(InstructionType::Branch(BranchKind::IrqReturn), none, vec![], &encodings::IMPLIED, vec![0x40], vec![]);
        add(InstructionType::Branch(BranchKind::NmiReturn), none, vec![], &encodings::IMPLIED, vec![0x40], vec![]);

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
                none,
                vec![imm(0xFFFF), reg(flag), flag_value(value)],
                &encodings::PC_RELATIVE_I8,
                vec![opcode],
                vec![0],
            );
        }
    }
}

impl Default for Wdc65816Platform {
    fn default() -> Self {
        Wdc65816Platform::new()
    }
}

impl Platform for Wdc65816Platform {
    fn name(&self) -> &'static str {
        "wdc65816"
    }

    fn reserve_definitions(&mut self, context: &mut PlatformContext<'_>) {
        let u8_type = context.builtins.get(BuiltinType::U8);
        let u16_type = context.builtins.get(BuiltinType::U16);
        let u24_type = context.builtins.get(BuiltinType::U24);
        let bool_type = context.builtins.get(BuiltinType::Bool);

        self.pointer_sized_type = Some(u16_type);
        self.far_pointer_sized_type = Some(u24_type);
        self.a = Some(context.add_register("a", u8_type, 1));
        self.aa = Some(context.add_register("aa", u16_type, 2));
        self.x = Some(context.add_register("x", u8_type, 1));
        self.xx = Some(context.add_register("xx", u16_type, 2));
        self.y = Some(context.add_register("y", u8_type, 1));
        self.yy = Some(context.add_register("yy", u16_type, 2));
        self.zero = Some(context.add_register("zero", bool_type, 0));
        self.carry = Some(context.add_register("carry", bool_type, 0));
        self.negative = Some(context.add_register("negative", bool_type, 0));
        self.overflow = Some(context.add_register("overflow", bool_type, 0));
        self.decimal = Some(context.add_register("decimal", bool_type, 0));
        self.nointerrupt = Some(context.add_register("nointerrupt", bool_type, 0));
        self.cmp = Some(context.add_void_intrinsic("cmp"));

        self.mem8 = ModeFlags::bit(context.builtins.add_mode_attribute("mem8", 0));
        self.mem16 = ModeFlags::bit(context.builtins.add_mode_attribute("mem16", 0));
        self.idx8 = ModeFlags::bit(context.builtins.add_mode_attribute("idx8", 1));
        self.idx16 = ModeFlags::bit(context.builtins.add_mode_attribute("idx16", 1));

        let sep = context.add_void_intrinsic("sep");
        let rep = context.add_void_intrinsic("rep");
        let nop = context.add_void_intrinsic("nop");

        self.add_instructions(context);

        let set = &mut context.builtins.instruction_set;
        for (intrinsic, opcode) in [(sep, 0xE2u8), (rep, 0xC2)] {
            set.add(Instruction::new(
                InstructionSignature::new(
                    InstructionType::VoidIntrinsic(intrinsic),
                    ModeFlags::NONE,
                    vec![imm(0xFF)],
                ),
                &encodings::U8_OPERAND,
                InstructionOptions::with_parameter(vec![opcode], vec![0]),
            ));
        }
        set.add(Instruction::new(
            InstructionSignature::new(InstructionType::VoidIntrinsic(nop), ModeFlags::NONE, vec![]),
            &encodings::IMPLIED,
            InstructionOptions::opcode(vec![0xEA]),
        ));
    }

    fn pointer_sized_type(&self) -> DefinitionId {
        self.pointer_sized_type.expect("reserve_definitions ran")
    }

    fn far_pointer_sized_type(&self) -> DefinitionId {
        self.far_pointer_sized_type.expect("reserve_definitions ran")
    }

    fn get_test_and_branch(
        &self,
        op: BinaryOperator,
        operand_size: usize,
        left: &Expression,
        right: &Expression,
        _distance_hint: DistanceHint,
    ) -> Option<PlatformTestAndBranch> {
        if operand_size > 2 {
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
