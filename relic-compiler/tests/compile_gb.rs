//! Game Boy target: jr/jp branch relaxation and borrow-style compares.

mod common;

use common::*;
use relic_compiler::ast::{Expression, ExpressionKind, Statement, StatementKind};
use relic_types::{BinaryOperator, Qualifiers};

fn rom_bank() -> Statement {
    bank("rom", Some(0x0000), "prgdata", 0x4000, 2)
}

fn pad_literal(value: i128, size: i128, line: usize) -> Expression {
    Expression::new(
        ExpressionKind::ArrayPadLiteral {
            value: Box::new(int(value, line)),
            size: Box::new(int(size, line)),
        },
        loc(line),
    )
}

#[test]
fn backward_branch_relaxes_to_jr() {
    // while true { nop(); }  =>  NOP; JR -3; RET
    let body = Statement::new(
        StatementKind::While {
            distance_hint: relic_compiler::ast::DistanceHint::Default,
            condition: Box::new(boolean(true, 4)),
            body: Box::new(block(vec![call_statement("nop", 5)], 4)),
        },
        loc(4),
    );
    let (compiler, _sink, ok) = compile(
        "gb",
        vec![
            rom_bank(),
            in_bank("rom", None, vec![func("main", vec![body], 3)], 3),
        ],
    );
    assert!(ok);
    let bank = compiler.banks().iter().next().unwrap();
    assert_eq!(&bank.data()[0..4], &[0x00, 0x18, 0xFD, 0xC9]);
}

#[test]
fn long_distance_keeps_jp() {
    // A goto over a 0x200-byte constant cannot reach with jr.
    let label = Statement::new(
        StatementKind::Label {
            name: std::sync::Arc::from("start"),
            far: false,
        },
        loc(4),
    );
    let goto = Statement::new(
        StatementKind::Branch {
            distance_hint: relic_compiler::ast::DistanceHint::Default,
            kind: relic_asm::BranchKind::Goto,
            destination: Some(Box::new(ident("start", 8))),
            return_value: None,
            condition: None,
        },
        loc(8),
    );
    let filler = Statement::new(
        StatementKind::Var {
            qualifiers: Qualifiers::CONST,
            names: vec![std::sync::Arc::from("filler")],
            addresses: vec![None],
            ty: Some(array_type("u8", 0x200, 6)),
            value: Some(Box::new(pad_literal(0, 0x200, 6))),
        },
        loc(6),
    );
    let (compiler, _sink, ok) = compile(
        "gb",
        vec![
            rom_bank(),
            in_bank(
                "rom",
                None,
                vec![
                    func("main", vec![label], 3),
                    filler,
                    func("far_entry", vec![goto], 7),
                ],
                3,
            ),
        ],
    );
    assert!(ok);
    let bank = compiler.banks().iter().next().unwrap();
    // main: RET at 0; filler fills 0x0001..0x0201; far_entry: JP $0000.
    assert_eq!(bank.data()[0], 0xC9);
    assert_eq!(&bank.data()[0x201..0x204], &[0xC3, 0x00, 0x00]);
}

#[test]
fn compare_uses_borrow_carry() {
    // if a < 0x10 { a = 1; }  =>  CP #$10; JR NC, +2; LD A, $01; RET
    let body = Statement::new(
        StatementKind::If {
            distance_hint: relic_compiler::ast::DistanceHint::Default,
            condition: Box::new(binary(
                BinaryOperator::LessThan,
                ident("a", 4),
                int(0x10, 4),
                4,
            )),
            body: Box::new(block(vec![assign(ident("a", 5), int(1, 5), 5)], 4)),
            alternative: None,
        },
        loc(4),
    );
    let (compiler, _sink, ok) = compile(
        "gb",
        vec![
            rom_bank(),
            in_bank("rom", None, vec![func("main", vec![body], 3)], 3),
        ],
    );
    assert!(ok);
    let bank = compiler.banks().iter().next().unwrap();
    // The skip branch is the negation of `<`: carry clear on the SM83.
    assert_eq!(
        &bank.data()[0..7],
        &[0xFE, 0x10, 0x30, 0x02, 0x3E, 0x01, 0xC9]
    );
}
