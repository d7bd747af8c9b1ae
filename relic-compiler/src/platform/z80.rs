//! The Zilog Z80, as found in the Master System and Game Gear. Shares the
//! 8080-derived opcode matrix with the Game Boy core but adds the ix/iy
//! index registers and displaced addressing.

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

/// Z80 target definition.
pub struct Z80Platform {
    pointer_sized_type: Option<DefinitionId>,
    a: Option<DefinitionId>,
    /// b, c, d, e, h, l in operand-code order.
    r8: Vec<DefinitionId>,
    bc: Option<DefinitionId>,
    de: Option<DefinitionId>,
    hl: Option<DefinitionId>,
    sp: Option<DefinitionId>,
    ix: Option<DefinitionId>,
    iy: Option<DefinitionId>,
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

fn imm16() -> Pattern {
    Arc::new(InstructionOperandPattern::IntegerRange { min: 0, max: 0xFFFF }.captured())
}

fn deref_pair(pair: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(InstructionOperandPattern::Register(pair)),
        size: 1,
    })
}

fn deref_abs(size: usize) -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0, max: 0xFFFF }.captured(),
        ),
        size,
    })
}

/// `*((ix + d) as *u8)` with a signed displacement.
fn displaced(index: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Index {
        far: false,
        operand: Box::new(InstructionOperandPattern::Register(index)),
        subscript: Box::new(
            InstructionOperandPattern::IntegerRange { min: -128, max: 127 }.captured(),
        ),
        subscript_scale: 1,
        size: 1,
    })
}

impl Z80Platform {
    pub fn new() -> Z80Platform {
        Z80Platform {
            pointer_sized_type: None,
            a: None,
            r8: Vec::new(),
            bc: None,
            de: None,
            hl: None,
            sp: None,
            ix: None,
            iy: None,
            zero: None,
            carry: None,
            cmp: None,
        }
    }

    fn r8_codes(&self) -> Vec<(Pattern, u8)> {
        let mut codes: Vec<(Pattern, u8)> = self
            .r8
            .iter()
            .enumerate()
            .map(|(index, &id)| (reg(id), index as u8))
            .collect();
        codes.push((deref_pair(self.hl.unwrap()), 6));
        codes.push((reg(self.a.unwrap()), 7));
        codes
    }

    #[allow(clippy::too_many_lines)]
    fn add_instructions(&self, context: &mut PlatformContext<'_>) {
        let a = self.a.unwrap();
        let bc = self.bc.unwrap();
        let de = self.de.unwrap();
        let hl = self.hl.unwrap();
        let sp = self.sp.unwrap();
        let ix = self.ix.unwrap();
        let iy = self.iy.unwrap();
        let zero = self.zero.unwrap();
        let carry = self.carry.unwrap();
        let r8_codes = self.r8_codes();

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

        // 8-bit load matrix.
        for (dest_pattern, dest_code) in &r8_codes {
            let dest_code = *dest_code;
            add(
                assign,
                vec![dest_pattern.clone(), imm8()],
                &encodings::U8_OPERAND,
                vec![0x06 + dest_code * 8],
                vec![0],
            );
            for (source_pattern, source_code) in &r8_codes {
                let source_code = *source_code;
                if dest_code == 6 && source_code == 6 {
                    continue;
                }
                add(
                    assign,
                    vec![dest_pattern.clone(), source_pattern.clone()],
                    &encodings::IMPLIED,
                    vec![0x40 + dest_code * 8 + source_code],
                    vec![],
                );
            }
        }

        // 16-bit loads, including the index registers.
        for (pair, opcode) in [(bc, vec![0x01u8]), (de, vec![0x11]), (hl, vec![0x21]), (sp, vec![0x31])] {
            add(assign, vec![reg(pair), imm16()], &encodings::U16_OPERAND, opcode, vec![0]);
        }
        add(assign, vec![reg(ix), imm16()], &encodings::U16_OPERAND, vec![0xDD, 0x21], vec![0]);
        add(assign, vec![reg(iy), imm16()], &encodings::U16_OPERAND, vec![0xFD, 0x21], vec![0]);
        add(assign, vec![reg(sp), reg(hl)], &encodings::IMPLIED, vec![0xF9], vec![]);

        // Accumulator and pair transfers through memory.
        add(assign, vec![reg(a), deref_pair(bc)], &encodings::IMPLIED, vec![0x0A], vec![]);
        add(assign, vec![reg(a), deref_pair(de)], &encodings::IMPLIED, vec![0x1A], vec![]);
        add(assign, vec![deref_pair(bc), reg(a)], &encodings::IMPLIED, vec![0x02], vec![]);
        add(assign, vec![deref_pair(de), reg(a)], &encodings::IMPLIED, vec![0x12], vec![]);
        add(assign, vec![reg(a), deref_abs(1)], &encodings::U16_OPERAND, vec![0x3A], vec![0]);
        add(assign, vec![deref_abs(1), reg(a)], &encodings::U16_OPERAND, vec![0x32], vec![0]);
        add(assign, vec![reg(hl), deref_abs(2)], &encodings::U16_OPERAND, vec![0x2A], vec![0]);
        add(assign, vec![deref_abs(2), reg(hl)], &encodings::U16_OPERAND, vec![0x22], vec![0]);

        // ix/iy displaced accesses.
        for (index, prefix) in [(ix, 0xDDu8), (iy, 0xFD)] {
            add(assign, vec![reg(a), displaced(index)], &encodings::I8_OPERAND, vec![prefix, 0x7E], vec![0]);
            add(assign, vec![displaced(index), reg(a)], &encodings::I8_OPERAND, vec![prefix, 0x77], vec![0]);
        }

        // Accumulator arithmetic.
        for (op, imm_op, r8_base) in [
            (BinaryOperator::Addition, 0xC6u8, 0x80u8),
            (BinaryOperator::AdditionWithCarry, 0xCE, 0x88),
            (BinaryOperator::Subtraction, 0xD6, 0x90),
            (BinaryOperator::SubtractionWithCarry, 0xDE, 0x98),
            (BinaryOperator::BitwiseAnd, 0xE6, 0xA0),
            (BinaryOperator::BitwiseXor, 0xEE, 0xA8),
            (BinaryOperator::BitwiseOr, 0xF6, 0xB0),
        ] {
            let ty = InstructionType::Binary(op);
            add(ty, vec![reg(a), imm8()], &encodings::U8_OPERAND, vec![imm_op], vec![0]);
            for (source_pattern, source_code) in &r8_codes {
                add(
                    ty,
                    vec![reg(a), source_pattern.clone()],
                    &encodings::IMPLIED,
                    vec![r8_base + *source_code],
                    vec![],
                );
            }
        }
        for (pair, opcode) in [(bc, 0x09u8), (de, 0x19), (hl, 0x29), (sp, 0x39)] {
            add(
                InstructionType::Binary(BinaryOperator::Addition),
                vec![reg(hl), reg(pair)],
                &encodings::IMPLIED,
                vec![opcode],
                vec![],
            );
        }

        // Increments and decrements.
        for (ops, base) in [
            (
                &[UnaryOperator::PreIncrement, UnaryOperator::PostIncrement][..],
                0x04u8,
            ),
            (
                &[UnaryOperator::PreDecrement, UnaryOperator::PostDecrement][..],
                0x05,
            ),
        ] {
            for op in ops {
                for (pattern, code) in &r8_codes {
                    add(
                        InstructionType::Unary(*op),
                        vec![pattern.clone()],
                        &encodings::IMPLIED,
                        vec![base + *code * 8],
                        vec![],
                    );
                }
            }
        }
        for (pair, inc_op, dec_op) in [
            (bc, vec![0x03u8], vec![0x0Bu8]),
            (de, vec![0x13], vec![0x1B]),
            (hl, vec![0x23], vec![0x2B]),
            (sp, vec![0x33], vec![0x3B]),
            (ix, vec![0xDD, 0x23], vec![0xDD, 0x2B]),
            (iy, vec![0xFD, 0x23], vec![0xFD, 0x2B]),
        ] {
            for op in [UnaryOperator::PreIncrement, UnaryOperator::PostIncrement] {
                add(InstructionType::Unary(op), vec![reg(pair)], &encodings::IMPLIED, inc_op.clone(), vec![]);
            }
            for op in [UnaryOperator::PreDecrement, UnaryOperator::PostDecrement] {
                add(InstructionType::Unary(op), vec![reg(pair)], &encodings::IMPLIED, dec_op.clone(), vec![]);
            }
        }

        // cp intrinsic.
        let cmp = InstructionType::VoidIntrinsic(self.cmp.unwrap());
        add(cmp, vec![reg(a), imm8()], &encodings::U8_OPERAND, vec![0xFE], vec![0]);
        for (pattern, code) in &r8_codes {
            add(cmp, vec![reg(a), pattern.clone()], &encodings::IMPLIED, vec![0xB8 + *code], vec![]);
        }

        // Control flow: jp/jr with relaxation, call, returns.
        let goto = InstructionType::Branch(BranchKind::Goto);
        add(goto, vec![imm16()], &encodings::U16_OPERAND, vec![0xC3], vec![0]);
        add(goto, vec![imm16()], &encodings::PC_RELATIVE_I8, vec![0x18], vec![0]);
        add(goto, vec![reg(hl)], &encodings::IMPLIED, vec![0xE9], vec![]);
        for (flag, value, jp_op, jr_op) in [
            (zero, true, 0xCAu8, Some(0x28u8)),
            (zero, false, 0xC2, Some(0x20)),
            (carry, true, 0xDA, Some(0x38)),
            (carry, false, 0xD2, Some(0x30)),
        ] {
            add(
                goto,
                vec![imm16(), reg(flag), flag_value(value)],
                &encodings::U16_OPERAND,
                vec![jp_op],
                vec![0],
            );
            if let Some(jr_op) = jr_op {
                add(
                    goto,
                    vec![imm16(), reg(flag), flag_value(value)],
                    &encodings::PC_RELATIVE_I8,
                    vec![jr_op],
                    vec![0],
                );
            }
        }
        add(
            InstructionType::Branch(BranchKind::Call),
            vec![imm16()],
            &encodings::U16_OPERAND,
            vec![0xCD],
            vec![0],
        );
        let ret = InstructionType::Branch(BranchKind::Return);
        add(ret, vec![], &encodings::IMPLIED, vec![0xC9], vec![]);
        for (flag, value, opcode) in [
            (zero, true, 0xC8u8),
            (zero, false, 0xC0),
            (carry, true, 0xD8),
            (carry, false, 0xD0),
        ] {
            add(ret, vec![reg(flag), flag_value(value)], &encodings::IMPLIED, vec![opcode], vec![]);
        }
        add(InstructionType::Branch(BranchKind::IrqReturn), vec![], &encodings::IMPLIED, vec![0xED, 0x4D], vec![]);
        add(InstructionType::Branch(BranchKind::NmiReturn), vec![], &encodings::IMPLIED, vec![0xED, 0x45], vec![]);

        // Carry flag assignment.
        add(assign, vec![reg(carry), flag_value(true)], &encodings::IMPLIED, vec![0x37], vec![]);
        add(assign, vec![reg(carry), flag_value(false)], &encodings::IMPLIED, vec![0x37, 0x3F], vec![]);
    }
}

impl Default for Z80Platform {
    fn default() -> Self {
        Z80Platform::new()
    }
}

impl Platform for Z80Platform {
    fn name(&self) -> &'static str {
        "z80"
    }

    fn reserve_definitions(&mut self, context: &mut PlatformContext<'_>) {
        let u8_type = context.builtins.get(BuiltinType::U8);
        let u16_type = context.builtins.get(BuiltinType::U16);
        let bool_type = context.builtins.get(BuiltinType::Bool);

        self.pointer_sized_type = Some(u16_type);
        self.a = Some(context.add_register("a", u8_type, 1));
        for name in ["b", "c", "d", "e", "h", "l"] {
            let id = context.add_register(name, u8_type, 1);
            self.r8.push(id);
        }
        self.bc = Some(context.add_register("bc", u16_type, 2));
        self.de = Some(context.add_register("de", u16_type, 2));
        self.hl = Some(context.add_register("hl", u16_type, 2));
        self.sp = Some(context.add_register("sp", u16_type, 2));
        self.ix = Some(context.add_register("ix", u16_type, 2));
        self.iy = Some(context.add_register("iy", u16_type, 2));
        self.zero = Some(context.add_register("zero", bool_type, 0));
        self.carry = Some(context.add_register("carry", bool_type, 0));
        self.cmp = Some(context.add_void_intrinsic("cmp"));

        let nop = context.add_void_intrinsic("nop");
        let halt = context.add_void_intrinsic("halt");
        let disable_interrupts = context.add_void_intrinsic("disable_interrupt");
        let enable_interrupts = context.add_void_intrinsic("enable_interrupt");
        let push = context.add_void_intrinsic("push");
        let pop = context.add_void_intrinsic("pop");

        self.add_instructions(context);

        let set = &mut context.builtins.instruction_set;
        for (intrinsic, opcode) in [
            (nop, vec![0x00u8]),
            (halt, vec![0x76]),
            (disable_interrupts, vec![0xF3]),
            (enable_interrupts, vec![0xFB]),
        ] {
            set.add(Instruction::new(
                InstructionSignature::new(InstructionType::VoidIntrinsic(intrinsic), ModeFlags::NONE, vec![]),
                &encodings::IMPLIED,
                InstructionOptions::opcode(opcode),
            ));
        }
        for (pair, push_op, pop_op) in [
            (self.bc.unwrap(), vec![0xC5u8], vec![0xC1u8]),
            (self.de.unwrap(), vec![0xD5], vec![0xD1]),
            (self.hl.unwrap(), vec![0xE5], vec![0xE1]),
            (self.ix.unwrap(), vec![0xDD, 0xE5], vec![0xDD, 0xE1]),
            (self.iy.unwrap(), vec![0xFD, 0xE5], vec![0xFD, 0xE1]),
        ] {
            set.add(Instruction::new(
                InstructionSignature::new(
                    InstructionType::VoidIntrinsic(push),
                    ModeFlags::NONE,
                    vec![reg(pair)],
                ),
                &encodings::IMPLIED,
                InstructionOptions::opcode(push_op),
            ));
            set.add(Instruction::new(
                InstructionSignature::new(
                    InstructionType::VoidIntrinsic(pop),
                    ModeFlags::NONE,
                    vec![reg(pair)],
                ),
                &encodings::IMPLIED,
                InstructionOptions::opcode(pop_op),
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
        // cp borrows like the Game Boy: carry set when a < operand.
        let branches = match op {
            Equal => vec![PlatformBranch::new(zero, true, true)],
            NotEqual => vec![PlatformBranch::new(zero, false, true)],
            LessThan => vec![PlatformBranch::new(carry, true, true)],
            GreaterThanOrEqual => vec![PlatformBranch::new(carry, false, true)],
            LessThanOrEqual => vec![
                PlatformBranch::new(zero, true, true),
                PlatformBranch::new(carry, true, true),
            ],
            GreaterThan => vec![
                PlatformBranch::new(zero, true, false),
                PlatformBranch::new(carry, false, true),
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
