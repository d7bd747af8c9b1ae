//! End-to-end compilation against the 6502 target: machine code bytes,
//! constant placement, and placement diagnostics.

mod common;

use common::*;
use relic_types::BinaryOperator;

fn prg_bank() -> relic_compiler::ast::Statement {
    bank("rom", Some(0x8000), "prgdata", 0x8000, 2)
}

#[test]
fn load_immediate_and_implicit_return() {
    // func main() { a = 0x55; }  =>  LDA #$55; RTS
    let (compiler, _sink, ok) = compile(
        "6502",
        vec![
            prg_bank(),
            in_bank(
                "rom",
                None,
                vec![func("main", vec![assign(ident("a", 4), int(0x55, 4), 4)], 3)],
                3,
            ),
        ],
    );
    assert!(ok);
    let bank = compiler.banks().iter().next().unwrap();
    assert_eq!(&bank.data()[0..3], &[0xA9, 0x55, 0x60]);
    assert_eq!(bank.calculate_used_size(), 3);
}

#[test]
fn let_binding_folds_into_initializers() {
    // let x = 1 + 2 * 3; const t : [u8; 1] @ 0x8000 = [x];
    let value = binary(
        BinaryOperator::Addition,
        int(1, 2),
        binary(BinaryOperator::Multiplication, int(2, 2), int(3, 2), 2),
        2,
    );
    let (compiler, _sink, ok) = compile(
        "6502",
        vec![
            prg_bank(),
            let_statement("x", value, 2),
            in_bank(
                "rom",
                None,
                vec![const_var(
                    "t",
                    array_type("u8", 1, 4),
                    Some(0x8000),
                    array(vec![ident("x", 4)], 4),
                    4,
                )],
                3,
            ),
        ],
    );
    assert!(ok);
    let bank = compiler.banks().iter().next().unwrap();
    assert_eq!(bank.data()[0], 7);
}

#[test]
fn overlapping_explicit_addresses_are_diagnosed() {
    let (_compiler, sink, ok) = compile(
        "6502",
        vec![
            prg_bank(),
            in_bank(
                "rom",
                None,
                vec![
                    const_var(
                        "first",
                        array_type("u8", 4, 4),
                        Some(0x8000),
                        array(vec![int(1, 4), int(2, 4), int(3, 4), int(4, 4)], 4),
                        4,
                    ),
                    const_var(
                        "second",
                        array_type("u8", 4, 5),
                        Some(0x8002),
                        array(vec![int(5, 5), int(6, 5), int(7, 5), int(8, 5)], 5),
                        5,
                    ),
                ],
                3,
            ),
        ],
    );
    assert!(!ok);
    let rendered = sink.rendered();
    assert!(rendered
        .iter()
        .any(|line| line.contains("overlap conflict encountered at absolute address 0x8002")));
    assert!(rendered
        .iter()
        .any(|line| line.contains("previously reserved here, by constant `first`")));
}

#[test]
fn recursive_lets_are_diagnosed() {
    // let a = b; let b = a;
    let (_compiler, sink, ok) = compile(
        "6502",
        vec![
            let_statement("a", ident("b", 1), 1),
            let_statement("b", ident("a", 2), 2),
        ],
    );
    assert!(!ok);
    assert!(sink
        .rendered()
        .iter()
        .any(|line| line.contains("recursive definition of `a`")));
}

#[test]
fn comparison_lowers_to_cmp_and_flag_branch() {
    // if a == 0x10 { a = 1; }  =>  CMP #$10; BNE +2; LDA #$01; RTS
    let body = relic_compiler::ast::Statement::new(
        relic_compiler::ast::StatementKind::If {
            distance_hint: relic_compiler::ast::DistanceHint::Default,
            condition: Box::new(binary(
                BinaryOperator::Equal,
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
        "6502",
        vec![
            prg_bank(),
            in_bank("rom", None, vec![func("main", vec![body], 3)], 3),
        ],
    );
    assert!(ok);
    let bank = compiler.banks().iter().next().unwrap();
    assert_eq!(
        &bank.data()[0..7],
        &[0xC9, 0x10, 0xD0, 0x02, 0xA9, 0x01, 0x60]
    );
}

#[test]
fn goto_label_emits_absolute_jump() {
    use relic_asm::BranchKind;
    use relic_compiler::ast::{Statement, StatementKind};

    let label = Statement::new(
        StatementKind::Label {
            name: std::sync::Arc::from("top"),
            far: false,
        },
        loc(4),
    );
    let goto = Statement::new(
        StatementKind::Branch {
            distance_hint: relic_compiler::ast::DistanceHint::Default,
            kind: BranchKind::Goto,
            destination: Some(Box::new(ident("top", 6))),
            return_value: None,
            condition: None,
        },
        loc(6),
    );
    let (compiler, _sink, ok) = compile(
        "6502",
        vec![
            prg_bank(),
            in_bank(
                "rom",
                None,
                vec![func(
                    "main",
                    vec![label, assign(ident("a", 5), int(0, 5), 5), goto],
                    3,
                )],
                3,
            ),
        ],
    );
    assert!(ok);
    let bank = compiler.banks().iter().next().unwrap();
    // LDA #$00 at 0x8000, then JMP $8000.
    assert_eq!(&bank.data()[0..5], &[0xA9, 0x00, 0x4C, 0x00, 0x80]);
}

#[test]
fn stores_select_absolute_addressing() {
    // var target : u8 @ 0x0200 (in RAM); main() { target = a; }
    use relic_compiler::ast::{Statement, StatementKind};
    use relic_types::Qualifiers;

    let ram = bank("ram", Some(0x0000), "vardata", 0x800, 1);
    let var = Statement::new(
        StatementKind::Var {
            qualifiers: Qualifiers::empty(),
            names: vec![std::sync::Arc::from("target")],
            addresses: vec![Some(int(0x0200, 4))],
            ty: Some(type_ident("u8", 4)),
            value: None,
        },
        loc(4),
    );
    let (compiler, _sink, ok) = compile(
        "6502",
        vec![
            ram,
            prg_bank(),
            in_bank("ram", None, vec![var], 3),
            in_bank(
                "rom",
                None,
                vec![func("main", vec![assign(ident("target", 6), ident("a", 6), 6)], 5)],
                5,
            ),
        ],
    );
    assert!(ok);
    let rom = compiler.banks().iter().nth(1).unwrap();
    // STA $0200; RTS.
    assert_eq!(&rom.data()[0..4], &[0x8D, 0x00, 0x02, 0x60]);
}

#[test]
fn calls_emit_jsr_to_resolved_address() {
    let (compiler, _sink, ok) = compile(
        "6502",
        vec![
            prg_bank(),
            in_bank(
                "rom",
                None,
                vec![
                    func("helper", vec![assign(ident("a", 4), int(1, 4), 4)], 3),
                    func("main", vec![call_statement("helper", 6)], 5),
                ],
                3,
            ),
        ],
    );
    assert!(ok);
    let bank = compiler.banks().iter().next().unwrap();
    // helper: LDA #$01; RTS  (0x8000..0x8003)
    // main:   JSR $8000; RTS (0x8003..0x8007)
    assert_eq!(&bank.data()[0..3], &[0xA9, 0x01, 0x60]);
    assert_eq!(&bank.data()[3..7], &[0x20, 0x00, 0x80, 0x60]);
}
