use std::collections::HashMap;
use std::sync::OnceLock;

use relic_types::SourceLocation;

use crate::format::{floor_log2, OutputFormat, OutputFormatContext};
use crate::report::Report;

const SNES_HEADER_SIZE: usize = 0x30;
const SNES_TITLE_MAX_LENGTH: usize = 21;
const MIN_ROM_SIZE: usize = 128 * 1024;
const MAX_TOTAL_ROM_SIZE: usize = 8 * 1024 * 1024;

const SMC_HEADER_SIZE: usize = 0x200;
const SMC_ROM_BLOCK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy)]
struct MapModeInfo {
    value: u8,
    header_address: usize,
}

fn map_modes() -> &'static HashMap<&'static str, MapModeInfo> {
    static MAP_MODES: OnceLock<HashMap<&'static str, MapModeInfo>> = OnceLock::new();
    MAP_MODES.get_or_init(|| {
        HashMap::from([
            ("lorom", MapModeInfo { value: 0x20, header_address: 0x7F00 }),
            ("hirom", MapModeInfo { value: 0x21, header_address: 0xFF00 }),
            ("sa1", MapModeInfo { value: 0x23, header_address: 0x7F00 }),
            ("sdd1", MapModeInfo { value: 0x22, header_address: 0x7F00 }),
            ("exhirom", MapModeInfo { value: 0x25, header_address: 0x40FF00 }),
            ("spc7110", MapModeInfo { value: 0x2A, header_address: 0x40FF00 }),
        ])
    })
}

fn expansion_settings() -> &'static HashMap<&'static str, u8> {
    static EXPANSION: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    EXPANSION.get_or_init(|| {
        HashMap::from([
            ("none", 0x00),
            ("dsp", 0x03),
            ("super-fx", 0x23),
            ("obc1", 0x23),
            ("sa1", 0x33),
            ("other", 0xE3),
            ("custom", 0xF3),
        ])
    })
}

fn region_settings() -> &'static HashMap<&'static str, u8> {
    static REGIONS: OnceLock<HashMap<&'static str, u8>> = OnceLock::new();
    REGIONS.get_or_init(|| {
        HashMap::from([
            ("ntsc", 0x01),
            ("pal", 0x02),
            ("japanese", 0x00),
            ("american", 0x01),
            ("european", 0x02),
            ("scandinavian", 0x03),
            ("french", 0x06),
            ("dutch", 0x07),
            ("spanish", 0x08),
            ("german", 0x09),
            ("italian", 0x0A),
            ("chinese", 0x0B),
            ("korean", 0x0D),
            ("canadian", 0x0F),
            ("brazilian", 0x10),
            ("australian", 0x11),
        ])
    })
}

/// Headerless SNES image (`.sfc`): internal header at the map-mode
/// address, power-of-two size rounding, and the complemented split-sum
/// checksum.
pub struct SnesOutputFormat;

impl OutputFormat for SnesOutputFormat {
    fn generate(&self, report: &mut Report, context: &mut OutputFormatContext<'_>) -> bool {
        // https://en.wikibooks.org/wiki/Super_NES_Programming/SNES_memory_map#The_SNES_header
        for bank in &context.banks {
            if bank.kind().is_stored() {
                context.bank_offsets.insert(bank.id(), context.data.len());
                context.data.extend_from_slice(bank.data());
            }
        }

        let mut map_mode_setting: u8 = 0x20;
        let mut header_address: usize = 0x7F00;
        if let Some((entry, map_mode)) = context.config.check_string(report, "map_mode", false) {
            match map_modes().get(&*map_mode) {
                Some(info) => {
                    map_mode_setting = info.value;
                    header_address = info.header_address;
                }
                None => {
                    report.plain_error(
                        format!("`map_mode` of \"{}\" is not supported", map_mode),
                        entry.location.clone(),
                    );
                }
            }
        }
        if let Some((_, true)) = context.config.check_boolean(report, "fastrom", false) {
            map_mode_setting |= 0x10;
        }

        let min_rom_size = (header_address + 0x100).max(MIN_ROM_SIZE);
        if context.data.len() < min_rom_size {
            context.data.resize(min_rom_size, 0xFF);
        }

        context.data[header_address + 0xB0..header_address + 0xB0 + SNES_HEADER_SIZE].fill(0);
        context.data[header_address + 0xC0..header_address + 0xC0 + SNES_TITLE_MAX_LENGTH]
            .fill(b' ');
        context.data[header_address + 0xD6] = map_mode_setting;
        context.data[header_address + 0xDA] = 0x33;
        context.data[header_address + 0xDC] = 0xFF;
        context.data[header_address + 0xDD] = 0xFF;

        if let Some((_, maker_code)) =
            context.config.check_fixed_string(report, "maker_code", 2, false)
        {
            context.data[header_address + 0xB0..header_address + 0xB0 + maker_code.len()]
                .copy_from_slice(maker_code.as_bytes());
        }
        if let Some((_, game_code)) =
            context.config.check_fixed_string(report, "game_code", 4, false)
        {
            context.data[header_address + 0xB2..header_address + 0xB2 + game_code.len()]
                .copy_from_slice(game_code.as_bytes());
        }
        if let Some((entry, expansion_ram_size)) =
            context.config.check_integer(report, "expansion_ram_size", false)
        {
            let value = expansion_ram_size.max(0) as usize;
            if value != 0 {
                let log_value = floor_log2(value);
                if value < 4096 {
                    report.plain_error(
                        format!(
                            "`expansion_ram_size` of \"{}\" is not supported (must be at least 4096 bytes)",
                            value
                        ),
                        entry.location.clone(),
                    );
                } else if value > (1 << log_value) {
                    report.plain_error(
                        format!(
                            "`expansion_ram_size` of \"{}\" is not supported (must be a power-of-two)",
                            value
                        ),
                        entry.location.clone(),
                    );
                } else {
                    context.data[header_address + 0xBD] = (log_value - floor_log2(4096)) as u8;
                }
            }
        }
        if let Some((_, special_version)) =
            context.config.check_integer(report, "special_version", false)
        {
            context.data[header_address + 0xBE] = special_version as u8;
        }
        if let Some((_, cart_subtype)) =
            context.config.check_integer(report, "cart_subtype", false)
        {
            context.data[header_address + 0xBF] = cart_subtype as u8;
        }
        if let Some((_, title)) =
            context
                .config
                .check_fixed_string(report, "title", SNES_TITLE_MAX_LENGTH, false)
        {
            context.data[header_address + 0xC0..header_address + 0xC0 + title.len()]
                .copy_from_slice(title.as_bytes());
        }

        {
            let mut cart_type_lower: u8 = 0x00;
            let mut cart_type_upper: u8 = 0x00;

            if let Some((entry, expansion)) =
                context.config.check_string(report, "expansion_type", false)
            {
                match expansion_settings().get(&*expansion) {
                    Some(&setting) => {
                        cart_type_lower = setting & 0x0F;
                        cart_type_upper = setting & 0xF0;
                    }
                    None => {
                        report.plain_error(
                            format!("`expansion_type` of \"{}\" is not supported", expansion),
                            entry.location.clone(),
                        );
                    }
                }
            }

            if let Some((entry, ram_size)) = context.config.check_integer(report, "ram_size", false)
            {
                let value = ram_size.max(0) as usize;
                if value != 0 {
                    let log_value = floor_log2(value);
                    if value < 4096 {
                        report.plain_error(
                            format!(
                                "`ram_size` of \"{}\" is not supported (must be at least 4096 bytes)",
                                value
                            ),
                            entry.location.clone(),
                        );
                    } else if value > (1 << log_value) {
                        report.plain_error(
                            format!(
                                "`ram_size` of \"{}\" is not supported (must be a power-of-two)",
                                value
                            ),
                            entry.location.clone(),
                        );
                    } else {
                        context.data[header_address + 0xD8] =
                            (log_value - floor_log2(4096)) as u8;
                        // RAM alongside an expansion chip is cart type
                        // 0x05; plain mapper-with-ram is 0x04.
                        cart_type_lower = if cart_type_lower >= 0x03 { 0x05 } else { 0x04 };
                    }
                }
            }

            if let Some((_, true)) = context.config.check_boolean(report, "battery", false) {
                cart_type_lower = match cart_type_lower {
                    0x00 | 0x01 => 0x02,
                    0x03 => 0x06,
                    0x04 => 0x05,
                    other => other,
                };
            }

            context.data[header_address + 0xD4] = cart_type_upper | cart_type_lower;
        }

        {
            let mut log_data_size = floor_log2(context.data.len());
            if context.data.len() > (1 << log_data_size) {
                log_data_size += 1;
                context.data.resize(1 << log_data_size, 0xFF);
            }
            if context.data.len() <= MAX_TOTAL_ROM_SIZE {
                context.data[header_address + 0xD7] = (log_data_size - floor_log2(1024)) as u8;
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
        }

        if let Some((entry, region)) = context.config.check_string(report, "region", false) {
            match region_settings().get(&*region) {
                Some(&setting) => context.data[header_address + 0xD9] = setting,
                None => {
                    report.plain_error(
                        format!("`region` of \"{}\" is not supported", region),
                        entry.location.clone(),
                    );
                }
            }
        }
        if let Some((_, rom_version)) = context.config.check_integer(report, "rom_version", false) {
            context.data[header_address + 0xDB] = rom_version as u8;
        }

        {
            // Non-power-of-two images checksum as the power-of-two part
            // plus the remainder repeated to fill it out.
            let data_size = context.data.len();
            let whole_size = 1usize << floor_log2(data_size);

            let mut checksum: u16 = 0;
            for &byte in &context.data[..whole_size] {
                checksum = checksum.wrapping_add(byte as u16);
            }

            let remainder_size = data_size - whole_size;
            if remainder_size != 0 {
                let repeat_size = 1usize << floor_log2(remainder_size);
                let repeat_count = if repeat_size != 0 {
                    remainder_size / repeat_size
                } else {
                    0
                };
                let mut repeat_checksum: u16 = 0;
                for &byte in &context.data[whole_size..whole_size + repeat_size] {
                    repeat_checksum = repeat_checksum.wrapping_add(byte as u16);
                }
                checksum =
                    checksum.wrapping_add(repeat_checksum.wrapping_mul(repeat_count as u16));
            }

            context.data[header_address + 0xDC] = (checksum as u8) ^ 0xFF;
            context.data[header_address + 0xDD] = ((checksum >> 8) as u8) ^ 0xFF;
            context.data[header_address + 0xDE] = checksum as u8;
            context.data[header_address + 0xDF] = (checksum >> 8) as u8;
        }

        true
    }
}

/// `.smc`: the `.sfc` image behind a 0x200-byte copier header carrying
/// the 8 KiB block count. Emulators mostly ignore everything else in it.
pub struct SnesSmcOutputFormat;

impl OutputFormat for SnesSmcOutputFormat {
    fn generate(&self, report: &mut Report, context: &mut OutputFormatContext<'_>) -> bool {
        if !SnesOutputFormat.generate(report, context) {
            return false;
        }

        let rom_size = context.data.len();
        let block_count = rom_size / SMC_ROM_BLOCK_SIZE;

        let mut header = vec![0u8; SMC_HEADER_SIZE];
        header[0] = block_count as u8;
        header[1] = (block_count >> 8) as u8;
        context.data.splice(0..0, header);
        for offset in context.bank_offsets.values_mut() {
            *offset += SMC_HEADER_SIZE;
        }
        context.file_header_prefix_size += SMC_HEADER_SIZE;

        true
    }
}
