use std::collections::HashMap;
use std::sync::OnceLock;

use crate::bank::BankKind;
use crate::format::{OutputFormat, OutputFormatContext};
use crate::report::Report;

const HEADER_SIZE: usize = 16;
const PRG_ROM_BANK_SIZE: usize = 16 * 1024;
const CHR_ROM_BANK_SIZE: usize = 8 * 1024;
const PRG_RAM_BANK_SIZE: usize = 8 * 1024;

const HEADER_SIGNATURE: &[u8; 4] = b"NES\x1A";

fn cart_types() -> &'static HashMap<&'static str, u8> {
    static CART_TYPES: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    CART_TYPES.get_or_init(|| {
        HashMap::from([
            ("nrom", 0),
            ("sxrom", 1),
            ("mmc1", 1),
            ("uxrom", 2),
            ("cnrom", 3),
            ("txrom", 4),
            ("mmc3", 4),
            ("mmc6", 4),
            ("exrom", 5),
            ("mmc5", 5),
            ("axrom", 7),
            ("pxrom", 9),
            ("mmc2", 9),
            ("fxrom", 10),
            ("mmc4", 10),
            ("color-dreams", 11),
            ("cprom", 13),
            ("24c02", 16),
            ("ss8806", 18),
            ("n163", 19),
            ("vrc4a", 21),
            ("vrc4c", 21),
            ("vrc2a", 22),
            ("vrc2b", 23),
            ("vrc4e", 23),
            ("vrc6a", 24),
            ("vrc4b", 25),
            ("vrc4d", 25),
            ("vrc6b", 26),
            ("action-53", 28),
            ("unrom-512", 30),
            ("bnrom", 34),
            ("rambo1", 64),
            ("gxrom", 66),
            ("mxrom", 66),
            ("after-burner", 68),
            ("fme7", 69),
            ("sunsoft5b", 69),
            ("codemasters", 71),
            ("vrc3", 73),
            ("vrc1", 75),
            ("n109", 79),
            ("vrc7", 85),
            ("gtrom", 111),
            ("txsrom", 118),
            ("tqrom", 119),
            ("24c01", 159),
            ("dxrom", 206),
            ("n118", 206),
            ("n175", 210),
            ("n340", 210),
            ("action52", 228),
            ("codemasters-quattro", 232),
        ])
    })
}

/// iNES container: 16-byte header, PRG banks padded to 16 KiB, CHR banks
/// padded to 8 KiB.
pub struct NesOutputFormat;

impl OutputFormat for NesOutputFormat {
    fn generate(&self, report: &mut Report, context: &mut OutputFormatContext<'_>) -> bool {
        // https://wiki.nesdev.com/w/index.php/INES
        context.file_header_prefix_size = HEADER_SIZE;
        context.data.resize(HEADER_SIZE, 0);

        for bank in &context.banks {
            if bank.kind().is_stored() && bank.kind() != BankKind::CharacterRom {
                context.bank_offsets.insert(bank.id(), context.data.len());
                context.data.extend_from_slice(bank.data());
            }
        }
        let mut prg_size = context.data.len() - HEADER_SIZE;
        let padded_prg_size =
            (prg_size + PRG_ROM_BANK_SIZE - 1) / PRG_ROM_BANK_SIZE * PRG_ROM_BANK_SIZE;
        if prg_size < padded_prg_size {
            context.data.resize(padded_prg_size + HEADER_SIZE, 0xFF);
            prg_size = padded_prg_size;
        }

        for bank in &context.banks {
            if bank.kind() == BankKind::CharacterRom {
                context.bank_offsets.insert(bank.id(), context.data.len());
                context.data.extend_from_slice(bank.data());
            }
        }
        let mut chr_size = context.data.len() - prg_size - HEADER_SIZE;
        let padded_chr_size =
            (chr_size + CHR_ROM_BANK_SIZE - 1) / CHR_ROM_BANK_SIZE * CHR_ROM_BANK_SIZE;
        if chr_size < padded_chr_size {
            context
                .data
                .resize(padded_chr_size + prg_size + HEADER_SIZE, 0xFF);
            chr_size = padded_chr_size;
        }

        context.data[0..4].copy_from_slice(HEADER_SIGNATURE);
        context.data[4] = (prg_size / PRG_ROM_BANK_SIZE) as u8;
        context.data[5] = (chr_size / CHR_ROM_BANK_SIZE) as u8;

        let mut mapper: u8 = 0;
        if let Some((entry, cart_type)) = context.config.check_string(report, "cart_type", false) {
            match cart_types().get(&*cart_type) {
                Some(&value) => mapper = value,
                None => {
                    report.plain_error(
                        format!("`cart_type` of \"{}\" is not supported", cart_type),
                        entry.location.clone(),
                    );
                }
            }
        }
        if let Some((_, cart_type_id)) = context.config.check_integer(report, "cart_type_id", false)
        {
            mapper = cart_type_id as u8;
        }
        context.data[6] = (mapper & 0x0F) << 4;
        context.data[7] = (mapper >> 4) << 4;

        if let Some((_, true)) = context.config.check_boolean(report, "vertical_mirror", false) {
            context.data[6] |= 0x01;
        }
        if let Some((_, true)) = context.config.check_boolean(report, "battery", false) {
            context.data[6] |= 0x02;
        }
        if let Some((_, true)) = context.config.check_boolean(report, "four_screen", false) {
            context.data[6] |= 0x08;
        }
        if let Some((entry, prg_ram_size)) =
            context.config.check_integer(report, "prg_ram_size", false)
        {
            if prg_ram_size >= (PRG_RAM_BANK_SIZE * 255) as i128 {
                report.plain_error(
                    format!(
                        "`prg_ram_size` of {} is too big (must be no more than {} bytes)",
                        prg_ram_size,
                        PRG_RAM_BANK_SIZE * 255
                    ),
                    entry.location.clone(),
                );
            } else {
                let value = prg_ram_size.max(0) as usize;
                if value % PRG_RAM_BANK_SIZE != 0 {
                    report.plain_error(
                        format!(
                            "`prg_ram_size` of {} is not supported (must be divisible by {} bytes)",
                            value, PRG_RAM_BANK_SIZE
                        ),
                        entry.location.clone(),
                    );
                } else {
                    context.data[8] = (value / PRG_RAM_BANK_SIZE) as u8;
                }
            }
        }

        true
    }
}
