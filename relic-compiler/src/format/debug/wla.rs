use std::io;

use relic_types::Qualifiers;

use crate::definition::DefinitionKind;
use crate::format::debug::{is_output_relative, qualified_name, DebugFormat, DebugFormatContext};
use crate::format::strip_extension;
use crate::report::Report;

/// WLA-DX `.sym` files with a `[labels]` section.
///
/// On the SNES formats the bank index is the upper 8 bits of the absolute
/// address; elsewhere it derives from the output offset and the debug bank
/// size.
pub struct WlaSymDebugFormat;

fn is_snes_related(context: &DebugFormatContext<'_>) -> bool {
    matches!(context.output_context.format_name, "sfc" | "smc")
}

impl DebugFormat for WlaSymDebugFormat {
    fn debug_file_name(&self, output_name: &str) -> String {
        format!("{}.sym", strip_extension(output_name))
    }

    fn generate(
        &self,
        report: &mut Report,
        context: &mut DebugFormatContext<'_>,
        writer: &mut dyn io::Write,
    ) -> bool {
        if let Err(error) = writeln!(writer, "[labels]") {
            report.plain_error(
                format!("could not write debug file: {}", error),
                relic_types::SourceLocation::empty(),
            );
            return false;
        }
        let snes = is_snes_related(context);
        for (id, definition) in context.definitions.iter() {
            let Some(address) = definition.address() else {
                continue;
            };
            let Some(absolute) = address.absolute_position else {
                continue;
            };
            if let DefinitionKind::Var(var) = &definition.kind {
                if var.qualifiers.contains(Qualifiers::EXTERN) {
                    continue;
                }
            }
            if address.relative_position.is_none() {
                continue;
            }

            let output_relative = !snes && is_output_relative(definition);
            let value = if output_relative {
                match context.output_context.output_offset(&address) {
                    Some(offset) => {
                        offset.saturating_sub(context.output_context.file_header_prefix_size)
                    }
                    None => continue,
                }
            } else {
                absolute
            };

            if context.address_ownership.contains_key(&value) {
                continue;
            }
            context.address_ownership.insert(value, id);

            let bank_index = if output_relative {
                value / context.output_context.debug_bank_size.max(1)
            } else {
                absolute >> 16
            };
            let line = format!(
                "{:02x}:{:04x} {}",
                bank_index & 0xFF,
                absolute & 0xFFFF,
                qualified_name(context.scopes, definition, true)
            );
            if let Err(error) = writeln!(writer, "{}", line) {
                report.plain_error(
                    format!("could not write debug file: {}", error),
                    relic_types::SourceLocation::empty(),
                );
                return false;
            }
        }
        true
    }
}
