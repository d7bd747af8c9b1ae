//! Symbol file generation on top of finished output images.

mod common;

use common::*;
use relic_compiler::format::debug::{DebugFormatCollection, DebugFormatContext};
use relic_compiler::format::{OutputFormatCollection, OutputFormatContext};

fn symbol_lines(
    compiler: &mut relic_compiler::Compiler,
    format_name: &str,
    debug_format_name: &str,
    output_name: &str,
) -> Vec<String> {
    let (report, config, banks, definitions, scopes) = compiler.output_parts();
    let formats = OutputFormatCollection::new();
    let format = formats.find(format_name).expect("format is registered");
    let mut output_context =
        OutputFormatContext::new(config, output_name, format_name, banks.iter().collect());
    assert!(format.generate(report, &mut output_context));

    let debug_formats = DebugFormatCollection::new();
    let debug_format = debug_formats
        .find(debug_format_name)
        .expect("debug format is registered");
    let mut context =
        DebugFormatContext::new(config, output_name, &output_context, definitions, scopes);
    let mut buffer = Vec::new();
    assert!(debug_format.generate(report, &mut context, &mut buffer));
    String::from_utf8(buffer)
        .expect("symbol files are ascii")
        .lines()
        .map(str::to_owned)
        .collect()
}

#[test]
fn mlb_labels_subtract_the_ines_header() {
    let (mut compiler, _sink, ok) = compile(
        "6502",
        vec![
            bank("prg", Some(0x8000), "prgdata", 0x4000, 2),
            in_bank(
                "prg",
                None,
                vec![func("main", vec![assign(ident("a", 4), int(1, 4), 4)], 3)],
                3,
            ),
        ],
    );
    assert!(ok);
    let lines = symbol_lines(&mut compiler, "nes", "mlb", "game.nes");
    assert!(lines.iter().any(|line| line == "P:0:main"));

    assert_eq!(
        DebugFormatCollection::new()
            .find("mlb")
            .unwrap()
            .debug_file_name("game.nes"),
        "game.mlb"
    );
}

#[test]
fn rgbds_symbols_have_bank_and_address() {
    let (mut compiler, _sink, ok) = compile(
        "gb",
        vec![
            bank("rom", Some(0x0000), "prgdata", 0x4000, 2),
            in_bank(
                "rom",
                None,
                vec![func("main", vec![assign(ident("a", 4), int(1, 4), 4)], 3)],
                3,
            ),
        ],
    );
    assert!(ok);
    let lines = symbol_lines(&mut compiler, "gb", "rgbds", "game.gb");
    assert!(lines.iter().any(|line| line == "00:0000 main"));
}

#[test]
fn wla_symbols_start_with_a_labels_section() {
    let (mut compiler, _sink, ok) = compile(
        "gb",
        vec![
            bank("rom", Some(0x0000), "prgdata", 0x4000, 2),
            in_bank(
                "rom",
                None,
                vec![func("main", vec![assign(ident("a", 4), int(1, 4), 4)], 3)],
                3,
            ),
        ],
    );
    assert!(ok);
    let lines = symbol_lines(&mut compiler, "gb", "wla", "game.gb");
    assert_eq!(lines[0], "[labels]");
    assert!(lines.iter().any(|line| line == "00:0000 main"));
}
