//! The Game Boy CPU (Sharp SM83): Z80-flavored core with high-page loads
//! and the CB-prefixed bit operations.

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

/// Game Boy target definition.
pub struct GameBoyPlatform {
    pointer_sized_type: Option<DefinitionId>,
    a: Option<DefinitionId>,
    /// b, c, d, e, h, l in SM83 operand-code order.
    r8: Vec<DefinitionId>,
    bc: Option<DefinitionId>,
    de: Option<DefinitionId>,
    hl: Option<DefinitionId>,
    sp: Option<DefinitionId>,
    zero: Option<DefinitionId>,
    carry: Option<DefinitionId>,
    cmp: Option<DefinitionId>,
    bit: Option<DefinitionId>,
    swap: Option<DefinitionId>,
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

/// `*(rr as *u8)` through a 16-bit register pair.
fn deref_pair(pair: DefinitionId) -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(InstructionOperandPattern::Register(pair)),
        size: 1,
    })
}

/// `*(nnnn as *u8)`.
fn deref_abs() -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0, max: 0xFFFF }.captured(),
        ),
        size: 1,
    })
}

/// `*(0xFFnn as *u8)` — the `ldh` high page.
fn deref_high_page() -> Pattern {
    Arc::new(InstructionOperandPattern::Dereference {
        far: false,
        operand: Box::new(
            InstructionOperandPattern::IntegerRange { min: 0xFF00, max: 0xFFFF }.captured(),
        ),
        size: 1,
    })
}

/// `operand $ bit` over a register or `(hl)`.
fn bit_of(operand: &InstructionOperandPattern) -> Pattern {
    Arc::new(InstructionOperandPattern::BitIndex {
        operand: Box::new(operand.clone()),
        subscript: Box::new(InstructionOperandPattern::IntegerRange { min: 0, max: 7 }.captured()),
    })
}

impl GameBoyPlatform {
    pub fn new() -> GameBoyPlatform {
        GameBoyPlatform {
            pointer_sized_type: None,
            a: None,
            r8: Vec::new(),
            bc: None,
            de: None,
            hl: None,
            sp: None,
            zero: None,
            carry: None,
            cmp: None,
            bit: None,
            swap: None,
        }
    }

    /// SM83 3-bit operand codes for b, c, d, e, h, l, (hl), a.
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

        // ld r, r' and ld r, n over the 8-bit operand matrix.
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
                    continue; // ld (hl), (hl) is the halt slot.
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

        // 16-bit immediate loads.
        for (pair, opcode) in [(bc, 0x01u8), (de, 0x11), (hl, 0x21), (sp, 0x31)] {
            add(assign, vec![reg(pair), imm16()], &encodings::U16_OPERAND, vec![opcode], vec![0]);
        }
        add(assign, vec![reg(sp), reg(hl)], &encodings::IMPLIED, vec![0xF9], vec![]);

        // Accumulator loads/stores through pairs and absolute addresses.
        // The high page is more specific than the absolute form, so `ldh`
        // wins automatically for 0xFF00..0xFFFF.
        add(assign, vec![reg(a), deref_pair(bc)], &encodings::IMPLIED, vec![0x0A], vec![]);
        add(assign, vec![reg(a), deref_pair(de)], &encodings::IMPLIED, vec![0x1A], vec![]);
        add(assign, vec![deref_pair(bc), reg(a)], &encodings::IMPLIED, vec![0x02], vec![]);
        add(assign, vec![deref_pair(de), reg(a)], &encodings::IMPLIED, vec![0x12], vec![]);
        add(assign, vec![reg(a), deref_abs()], &encodings::U16_OPERAND, vec![0xFA], vec![0]);
        add(assign, vec![deref_abs(), reg(a)], &encodings::U16_OPERAND, vec![0xEA], vec![0]);
        add(assign, vec![reg(a), deref_high_page()], &encodings::HIGH_PAGE_OPERAND, vec![0xF0], vec![0]);
        add(assign, vec![deref_high_page(), reg(a)], &encodings::HIGH_PAGE_OPERAND, vec![0xE0], vec![0]);

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
                    vec![r8_base + source_code],
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
            (bc, 0x03u8, 0x0Bu8),
            (de, 0x13, 0x1B),
            (hl, 0x23, 0x2B),
            (sp, 0x33, 0x3B),
        ] {
            for op in [UnaryOperator::PreIncrement, UnaryOperator::PostIncrement] {
                add(InstructionType::Unary(op), vec![reg(pair)], &encodings::IMPLIED, vec![inc_op], vec![]);
            }
            for op in [UnaryOperator::PreDecrement, UnaryOperator::PostDecrement] {
                add(InstructionType::Unary(op), vec![reg(pair)], &encodings::IMPLIED, vec![dec_op], vec![]);
            }
        }

        // cp intrinsic.
        let cmp = InstructionType::VoidIntrinsic(self.cmp.unwrap());
        add(cmp, vec![reg(a), imm8()], &encodings::U8_OPERAND, vec![0xFE], vec![0]);
        for (pattern, code) in &r8_codes {
            add(cmp, vec![reg(a), pattern.clone()], &encodings::IMPLIED, vec![0xB8 + *code], vec![]);
        }

        // CB-prefixed bit operations: test, set, reset, swap.
        let bit = InstructionType::VoidIntrinsic(self.bit.unwrap());
        let swap = InstructionType::VoidIntrinsic(self.swap.unwrap());
        for (pattern, code) in &r8_codes {
            add(
                bit,
                vec![bit_of(pattern)],
                &encodings::BIT_INDEX_STEP8,
                vec![0xCB, 0x40 + *code],
                vec![0],
            );
            add(
                assign,
                vec![bit_of(pattern), flag_value(true)],
                &encodings::BIT_INDEX_STEP8,
                vec![0xCB, 0xC0 + *code],
                vec![0],
            );
            add(
                assign,
                vec![bit_of(pattern), flag_value(false)],
                &encodings::BIT_INDEX_STEP8,
                vec![0xCB, 0x80 + *code],
                vec![0],
            );
            add(swap, vec![pattern.clone()], &encodings::IMPLIED, vec![0xCB, 0x30 + *code], vec![]);
        }

        // Rotates on the accumulator.
        for (op, opcode) in [
            (BinaryOperator::LeftRotateWithCarry, 0x17u8),
            (BinaryOperator::RightRotateWithCarry, 0x1F),
            (BinaryOperator::LeftRotate, 0x07),
            (BinaryOperator::RightRotate, 0x0F),
        ] {
            let one = Arc::new(InstructionOperandPattern::exact_integer(1));
            add(InstructionType::Binary(op), vec![reg(a), one], &encodings::IMPLIED, vec![opcode], vec![]);
        }
        // CB-prefixed shifts over any 8-bit operand (single shift).
        for (op, base) in [
            (BinaryOperator::LeftShift, 0x20u8),
            (BinaryOperator::LogicalLeftShift, 0x20),
            (BinaryOperator::RightShift, 0x28),
            (BinaryOperator::LogicalRightShift, 0x38),
        ] {
            for (pattern, code) in &r8_codes {
                let one = Arc::new(InstructionOperandPattern::exact_integer(1));
                add(
                    InstructionType::Binary(op),
                    vec![pattern.clone(), one],
                    &encodings::IMPLIED,
                    vec![0xCB, base + *code],
                    vec![],
                );
            }
        }

        // Control flow: jp/jr pairs, call, returns.
        let goto = InstructionType::Branch(BranchKind::Goto);
        add(goto, vec![imm16()], &encodings::U16_OPERAND, vec![0xC3], vec![0]);
        add(goto, vec![imm16()], &encodings::PC_RELATIVE_I8, vec![0x18], vec![0]);
        add(goto, vec![reg(hl)], &encodings::IMPLIED, vec![0xE9], vec![]);
        for (flag, value, jp_op, jr_op) in [
            (zero, true, 0xCAu8, 0x28u8),
            (zero, false, 0xC2, 0x20),
            (carry, true, 0xDA, 0x38),
            (carry, false, 0xD2, 0x30),
        ] {
            add(
                goto,
                vec![imm16(), reg(flag), flag_value(value)],
                &encodings::U16_OPERAND,
                vec![jp_op],
                vec![0],
            );
            add(
                goto,
                vec![imm16(), reg(flag), flag_value(value)],
                &encodings::PC_RELATIVE_I8,
                vec![jr_op],
                vec![0],
            );
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
        add(InstructionType::Branch(BranchKind::IrqReturn), vec![], &encodings::IMPLIED, vec![0xD9], vec![]);
        add(InstructionType::Branch(BranchKind::NmiReturn), vec![], &encodings::IMPLIED, vec![0xD9], vec![]);

        // Carry flag assignment.
        add(assign, vec![reg(carry), flag_value(true)], &encodings::IMPLIED, vec![0x37], vec![]);
        // ccf only toggles; setting false goes through scf+ccf.
        add(assign, vec![reg(carry), flag_value(false)], &encodings::IMPLIED, vec![0x37, 0x3F], vec![]);
    }
}

impl Default for GameBoyPlatform {
    fn default() -> Self {
        GameBoyPlatform::new()
    }
}

impl Platform for GameBoyPlatform {
    fn name(&self) -> &'static str {
        "gb"
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
        self.zero = Some(context.add_register("zero", bool_type, 0));
        self.carry = Some(context.add_register("carry", bool_type, 0));
        self.cmp = Some(context.add_void_intrinsic("cmp"));
        self.bit = Some(context.add_void_intrinsic("bit"));
        self.swap = Some(context.add_void_intrinsic("swap"));

        let nop = context.add_void_intrinsic("nop");
        let halt = context.add_void_intrinsic("halt");
        let stop = context.add_void_intrinsic("stop");
        let disable_interrupts = context.add_void_intrinsic("disable_interrupt");
        let enable_interrupts = context.add_void_intrinsic("enable_interrupt");
        let push = context.add_void_intrinsic("push");
        let pop = context.add_void_intrinsic("pop");

        self.add_instructions(context);

        let set = &mut context.builtins.instruction_set;
        for (intrinsic, opcode) in [
            (nop, vec![0x00u8]),
            (halt, vec![0x76]),
            (stop, vec![0x10, 0x00]),
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
            (self.bc.unwrap(), 0xC5u8, 0xC1u8),
            (self.de.unwrap(), 0xD5, 0xD1),
            (self.hl.unwrap(), 0xE5, 0xE1),
        ] {
            set.add(Instruction::new(
                InstructionSignature::new(
                    InstructionType::VoidIntrinsic(push),
                    ModeFlags::NONE,
                    vec![reg(pair)],
                ),
                &encodings::IMPLIED,
                InstructionOptions::opcode(vec![push_op]),
            ));
            set.add(Instruction::new(
                InstructionSignature::new(
                    InstructionType::VoidIntrinsic(pop),
                    ModeFlags::NONE,
                    vec![reg(pair)],
                ),
                &encodings::IMPLIED,
                InstructionOptions::opcode(vec![pop_op]),
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
        // cp sets carry when a < operand (borrow), the inverse of the 6502.
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
