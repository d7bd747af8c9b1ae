use std::collections::HashMap;
use std::sync::OnceLock;

use relic_types::SourceLocation;

use crate::format::{floor_log2, strip_extension, OutputFormat, OutputFormatContext};
use crate::report::Report;

const ROM_BANK_SIZE: usize = 32 * 1024;
const MAX_TOTAL_ROM_SIZE: usize = 8 * 1024 * 1024;

const LOGO_BITMAP: [u8; 48] = [
    0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, 0x00, 0x0C, 0x00,
    0x0D, 0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, 0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD,
    0xD9, 0x99, 0xBB, 0xBB, 0x67, 0x63, 0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB,
    0xB9, 0x33, 0x3E,
];

fn cart_types() -> &'static HashMap<&'static str, u8> {
    static CART_TYPES: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    CART_TYPES.get_or_init(|| {
        HashMap::from([
            ("rom", 0x00),
            ("mbc1", 0x01),
            ("mbc1-ram", 0x02),
            ("mbc1-ram-battery", 0x03),
            ("mbc2", 0x05),
            ("mbc2-battery", 0x06),
            ("rom-ram", 0x08),
            ("rom-ram-battery", 0x09),
            ("mmm01", 0x0B),
            ("mmm01-ram", 0x0C),
            ("mmm01-ram-battery", 0x0D),
            ("mbc3-timer-battery", 0x0F),
            ("mbc3-timer-ram-battery", 0x10),
            ("mbc3", 0x11),
            ("mbc3-ram", 0x12),
            ("mbc3-ram-battery", 0x13),
            ("mbc4", 0x15),
            ("mbc4-ram", 0x16),
            ("mbc4-ram-battery", 0x17),
            ("mbc5", 0x19),
            ("mbc5-ram", 0x1A),
            ("mbc5-ram-battery", 0x1B),
            ("mbc5-rumble", 0x1C),
            ("mbc5-rumble-ram", 0x1D),
            ("mbc5-rumble-ram-battery", 0x1E),
            ("camera", 0xFC),
            ("tama5", 0xFD),
            ("huc3", 0xFE),
            ("huc1", 0xFF),
        ])
    })
}

/// Game Boy cartridge image with the 0x100..0x150 header: logo bitmap,
/// title, compatibility flags, cart type, ram size bucket, and the header
/// and global checksums.
pub struct GameBoyOutputFormat;

impl OutputFormat for GameBoyOutputFormat {
    fn generate(&self, report: &mut Report, context: &mut OutputFormatContext<'_>) -> bool {
        // http://problemkaputt.de/pandocs.htm#thecartridgeheader
        context.debug_bank_size = 0x4000;

        for bank in &context.banks {
            if bank.kind().is_stored() {
                context.bank_offsets.insert(bank.id(), context.data.len());
                context.data.extend_from_slice(bank.data());
            }
        }
        if context.data.len() < ROM_BANK_SIZE {
            context.data.resize(ROM_BANK_SIZE, 0xFF);
        }

        context.data[0x134..0x14D].fill(0);
        context.data[0x104..0x104 + LOGO_BITMAP.len()].copy_from_slice(&LOGO_BITMAP);
        context.data[0x14B] = 0x33;

        let title_max_length = if context.config.has("manufacturer") {
            11
        } else {
            15
        };
        match context
            .config
            .check_fixed_string(report, "title", title_max_length, false)
        {
            Some((_, title)) => {
                context.data[0x134..0x134 + title.len()].copy_from_slice(title.as_bytes());
            }
            None => {
                let mut fallback = strip_extension(context.output_name)
                    .to_uppercase()
                    .into_bytes();
                fallback.truncate(title_max_length);
                context.data[0x134..0x134 + fallback.len()].copy_from_slice(&fallback);
            }
        }
        if let Some((_, manufacturer)) =
            context.config.check_fixed_string(report, "manufacturer", 4, false)
        {
            context.data[0x13F..0x13F + manufacturer.len()]
                .copy_from_slice(manufacturer.as_bytes());
        }
        if let Some((_, true)) = context.config.check_boolean(report, "gbc_compatible", false) {
            context.data[0x143] = 0x80;
        }
        if let Some((_, true)) = context.config.check_boolean(report, "gbc_exclusive", false) {
            context.data[0x143] = 0xC0;
        }
        if let Some((_, licensee)) = context.config.check_fixed_string(report, "licensee", 2, false)
        {
            context.data[0x144..0x144 + licensee.len()].copy_from_slice(licensee.as_bytes());
        }
        if let Some((_, true)) = context.config.check_boolean(report, "sgb_compatible", false) {
            context.data[0x146] = 0x03;
        }
        if let Some((entry, cart_type)) = context.config.check_string(report, "cart_type", false) {
            match cart_types().get(&*cart_type) {
                Some(&value) => context.data[0x147] = value,
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
            context.data[0x147] = cart_type_id as u8;
        }
        if let Some((entry, ram_size)) = context.config.check_integer(report, "ram_size", false) {
            let setting = if ram_size > 32 * 1024 {
                report.plain_error(
                    format!("`ram_size` of {} is too large (max is 32 KiB)", ram_size),
                    entry.location.clone(),
                );
                0x00
            } else if ram_size > 8 * 1024 {
                0x03
            } else if ram_size > 2 * 1024 {
                0x02
            } else if ram_size > 0 {
                0x01
            } else {
                0x00
            };
            context.data[0x149] = setting;
        }
        if let Some((_, true)) = context.config.check_boolean(report, "international", false) {
            context.data[0x14A] = 0x01;
        }
        if let Some((_, old_licensee)) = context.config.check_integer(report, "old_licensee", false)
        {
            context.data[0x14B] = old_licensee as u8;
        }
        if let Some((_, version)) = context.config.check_integer(report, "version", false) {
            context.data[0x14C] = version as u8;
        }

        // Round the image up to the nearest power of two.
        let mut log_data_size = floor_log2(context.data.len());
        if context.data.len() > (1 << log_data_size) {
            log_data_size += 1;
            context.data.resize(1 << log_data_size, 0xFF);
        }
        if context.data.len() <= MAX_TOTAL_ROM_SIZE {
            context.data[0x148] = (log_data_size - floor_log2(ROM_BANK_SIZE)) as u8;
        } else {
            report.plain_error(
                format!(
                    "rom size of {} bytes is too large (max is {} bytes)",
                    context.data.len(),
                    MAX_TOTAL_ROM_SIZE
                ),
                SourceLocation::empty(),
            );
            return false;
        }

        let mut header_checksum: u8 = 0;
        for index in 0x134..0x14D {
            header_checksum = header_checksum
                .wrapping_sub(context.data[index])
                .wrapping_sub(1);
        }
        context.data[0x14D] = header_checksum;

        let mut global_checksum: u16 = 0;
        for (index, &byte) in context.data.iter().enumerate() {
            if index != 0x14E && index != 0x14F {
                global_checksum = global_checksum.wrapping_add(byte as u16);
            }
        }
        context.data[0x14E] = (global_checksum >> 8) as u8;
        context.data[0x14F] = (global_checksum & 0xFF) as u8;

        true
    }
}
