//! Container formats: bit-exact headers, padding and checksums.

mod common;

use common::*;
use relic_compiler::format::{OutputFormatCollection, OutputFormatContext};

fn generate(
    compiler: &mut relic_compiler::Compiler,
    format_name: &str,
    output_name: &str,
) -> Vec<u8> {
    let (report, config, banks, _definitions, _scopes) = compiler.output_parts();
    let formats = OutputFormatCollection::new();
    let format = formats.find(format_name).expect("format is registered");
    let mut context =
        OutputFormatContext::new(config, output_name, format_name, banks.iter().collect());
    assert!(format.generate(report, &mut context));
    context.data
}

#[test]
fn gb_header_title_cart_type_and_checksums() {
    let (mut compiler, _sink, ok) = compile(
        "gb",
        vec![config(
            vec![
                ("title", string("HELLO", 2)),
                ("cart_type", string("rom", 3)),
            ],
            2,
        )],
    );
    assert!(ok);
    let data = generate(&mut compiler, "gb", "hello.gb");
    assert_eq!(data.len(), 32 * 1024);

    // Logo bitmap starts the header block.
    assert_eq!(&data[0x104..0x108], &[0xCE, 0xED, 0x66, 0x66]);
    // Title padded with zeros to 15 characters.
    let mut title = [0u8; 15];
    title[0..5].copy_from_slice(b"HELLO");
    assert_eq!(&data[0x134..0x143], &title);
    // Plain ROM cart.
    assert_eq!(data[0x147], 0x00);
    // 32 KiB rom size code.
    assert_eq!(data[0x148], 0x00);

    // Header checksum recomputed independently.
    let mut checksum: u8 = 0;
    for &byte in &data[0x134..0x14D] {
        checksum = checksum.wrapping_sub(byte).wrapping_sub(1);
    }
    assert_eq!(data[0x14D], checksum);

    // Global checksum skips its own slots.
    let mut global: u16 = 0;
    for (index, &byte) in data.iter().enumerate() {
        if index != 0x14E && index != 0x14F {
            global = global.wrapping_add(byte as u16);
        }
    }
    assert_eq!(data[0x14E], (global >> 8) as u8);
    assert_eq!(data[0x14F], (global & 0xFF) as u8);
}

#[test]
fn ines_header_and_bank_padding() {
    let (mut compiler, _sink, ok) = compile(
        "6502",
        vec![
            bank("prg", Some(0x8000), "prgdata", 0x4000, 2),
            bank("chr", None, "chrdata", 0x2000, 3),
        ],
    );
    assert!(ok);
    let data = generate(&mut compiler, "nes", "game.nes");
    assert_eq!(data.len(), 16 + 16384 + 8192);
    assert_eq!(&data[0..4], b"NES\x1A");
    assert_eq!(data[4], 1);
    assert_eq!(data[5], 1);
    assert_eq!(data[6], 0);
}

#[test]
fn binary_trim_truncates_last_stored_bank() {
    let (mut compiler, _sink, ok) = compile(
        "6502",
        vec![
            bank("rom", Some(0x8000), "prgdata", 0x100, 2),
            config(vec![("trim", boolean(true, 3))], 3),
            in_bank(
                "rom",
                None,
                vec![const_var(
                    "t",
                    array_type("u8", 2, 5),
                    Some(0x8000),
                    array(vec![int(0xAB, 5), int(0xCD, 5)], 5),
                    5,
                )],
                4,
            ),
        ],
    );
    assert!(ok);
    let data = generate(&mut compiler, "bin", "out.bin");
    assert_eq!(data, vec![0xAB, 0xCD]);
}

#[test]
fn sms_header_signature_and_checksum() {
    let (mut compiler, _sink, ok) = compile("z80", vec![]);
    assert!(ok);
    let data = generate(&mut compiler, "sms", "game.sms");
    assert_eq!(data.len(), 0x2000);
    assert_eq!(&data[0x1FF0..0x1FFA], b"TMR SEGA  ");
    // Version/size byte: overseas bit plus the 8 KiB checksum range code.
    assert_eq!(data[0x1FFF], 0x4A);

    let mut checksum: u16 = 0;
    for (index, &byte) in data.iter().enumerate() {
        if !(0x1FF0..0x2000).contains(&index) {
            checksum = checksum.wrapping_add(byte as u16);
        }
    }
    assert_eq!(data[0x1FFA], (checksum >> 8) as u8);
    assert_eq!(data[0x1FFB], (checksum & 0xFF) as u8);
}

#[test]
fn snes_header_and_complemented_checksum() {
    let (mut compiler, _sink, ok) = compile(
        "wdc65816",
        vec![config(vec![("title", string("RELIC TEST", 2))], 2)],
    );
    assert!(ok);
    let data = generate(&mut compiler, "sfc", "game.sfc");
    assert_eq!(data.len(), 128 * 1024);

    // Default lorom header placement.
    assert_eq!(data[0x7FD6], 0x20);
    assert_eq!(data[0x7FDA], 0x33);
    assert_eq!(&data[0x7FC0..0x7FCA], b"RELIC TEST");
    // Title space-padded to 21 characters.
    assert_eq!(data[0x7FCA], b' ');

    let checksum = data[0x7FDE] as u16 | ((data[0x7FDF] as u16) << 8);
    let complement = data[0x7FDC] as u16 | ((data[0x7FDD] as u16) << 8);
    assert_eq!(checksum ^ 0xFFFF, complement);
}

#[test]
fn smc_prepends_copier_header() {
    let (mut compiler, _sink, ok) = compile("wdc65816", vec![]);
    assert!(ok);
    let data = generate(&mut compiler, "smc", "game.smc");
    assert_eq!(data.len(), 128 * 1024 + 0x200);
    // 8 KiB block count, little-endian.
    assert_eq!(data[0], 16);
    assert_eq!(data[1], 0);
}

#[test]
fn output_is_deterministic_across_runs() {
    let build = || {
        let (mut compiler, _sink, ok) = compile(
            "gb",
            vec![config(vec![("title", string("SAME", 2))], 2)],
        );
        assert!(ok);
        generate(&mut compiler, "gb", "same.gb")
    };
    assert_eq!(build(), build());
}
