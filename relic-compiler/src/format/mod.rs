//! Output formatters: translate the bank-structured memory image into a
//! bit-exact target container (iNES, Game Boy, SMS/Game Gear, SNES, or
//! raw binary).

pub mod debug;

mod binary;
mod gb;
mod nes;
mod sms;
mod snes;

pub use binary::BinaryOutputFormat;
pub use gb::GameBoyOutputFormat;
pub use nes::NesOutputFormat;
pub use sms::{SmsOutputFormat, SmsSystemType};
pub use snes::{SnesOutputFormat, SnesSmcOutputFormat};

use std::collections::HashMap;

use crate::bank::{Bank, BankId};
use crate::config::Config;
use crate::definition::Address;
use crate::report::Report;

/// Shared state while building one output image.
pub struct OutputFormatContext<'a> {
    pub config: &'a Config,
    /// Output file name, used for default titles and debug file names.
    pub output_name: &'a str,
    /// Stored-order view of the registered banks.
    pub banks: Vec<&'a Bank>,
    /// Registry name the format was selected under (`"sfc"`, `"nes"`...).
    pub format_name: &'a str,

    /// Offset of each emitted bank within `data`.
    pub bank_offsets: HashMap<BankId, usize>,
    /// The image being assembled.
    pub data: Vec<u8>,
    /// Bytes of container header before the first bank (16 for iNES).
    pub file_header_prefix_size: usize,
    /// Bank granularity used by debug formatters for bank numbers.
    pub debug_bank_size: usize,
}

impl<'a> OutputFormatContext<'a> {
    pub fn new(
        config: &'a Config,
        output_name: &'a str,
        format_name: &'a str,
        banks: Vec<&'a Bank>,
    ) -> OutputFormatContext<'a> {
        OutputFormatContext {
            config,
            output_name,
            banks,
            format_name,
            bank_offsets: HashMap::new(),
            data: Vec::new(),
            file_header_prefix_size: 0,
            debug_bank_size: 0x4000,
        }
    }

    /// Where `address` landed in the output image, when its bank was
    /// emitted.
    pub fn output_offset(&self, address: &Address) -> Option<usize> {
        let bank = address.bank?;
        let offset = self.bank_offsets.get(&bank)?;
        address
            .relative_position
            .map(|relative| relative + offset)
    }
}

/// One container format.
pub trait OutputFormat {
    /// Assembles `context.banks` into `context.data`. Returns `false`
    /// after reporting when the image cannot be produced.
    fn generate(&self, report: &mut Report, context: &mut OutputFormatContext<'_>) -> bool;
}

/// Name registry over the supported output formats.
pub struct OutputFormatCollection {
    formats: HashMap<&'static str, Box<dyn OutputFormat>>,
}

impl OutputFormatCollection {
    pub fn new() -> OutputFormatCollection {
        let mut formats: HashMap<&'static str, Box<dyn OutputFormat>> = HashMap::new();
        formats.insert("bin", Box::new(BinaryOutputFormat));
        formats.insert("gb", Box::new(GameBoyOutputFormat));
        formats.insert("nes", Box::new(NesOutputFormat));
        formats.insert("sms", Box::new(SmsOutputFormat::new(SmsSystemType::MasterSystem)));
        formats.insert("gg", Box::new(SmsOutputFormat::new(SmsSystemType::GameGear)));
        formats.insert("sfc", Box::new(SnesOutputFormat));
        formats.insert("smc", Box::new(SnesSmcOutputFormat));
        OutputFormatCollection { formats }
    }

    pub fn find(&self, name: &str) -> Option<&dyn OutputFormat> {
        self.formats.get(name).map(|format| format.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.formats.keys().copied()
    }
}

impl Default for OutputFormatCollection {
    fn default() -> Self {
        OutputFormatCollection::new()
    }
}

/// Largest power-of-two exponent with `2^n <= value`. `value` must be
/// nonzero.
pub(crate) fn floor_log2(value: usize) -> u32 {
    usize::BITS - 1 - value.leading_zeros()
}

/// `output.ext` becomes `output`; paths keep their directories.
pub(crate) fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(index) if !name[index + 1..].contains('/') => &name[..index],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2_and_extension_helpers() {
        assert_eq!(floor_log2(1), 0);
        assert_eq!(floor_log2(0x8000), 15);
        assert_eq!(floor_log2(0x8001), 15);
        assert_eq!(strip_extension("game.gb"), "game");
        assert_eq!(strip_extension("dir.v2/game"), "dir.v2/game");
    }
}
