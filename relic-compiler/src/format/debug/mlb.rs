use std::io;

use relic_types::Qualifiers;

use crate::definition::{Definition, DefinitionKind};
use crate::format::debug::{DebugFormat, DebugFormatContext};
use crate::format::strip_extension;
use crate::report::Report;

/// Mesen label files: one `T:address:name` line per label-type character.
pub struct MlbDebugFormat;

fn label_types(definition: &Definition) -> &'static str {
    match &definition.kind {
        DefinitionKind::Func(..) => "P",
        DefinitionKind::Var(var) => {
            let Some(address) = var.address else {
                return "";
            };
            let Some(absolute) = address.absolute_position else {
                return "";
            };
            if absolute < 0x800 {
                "R"
            } else if (0x6000..0x8000).contains(&absolute) {
                "SW"
            } else if var.qualifiers.contains(Qualifiers::EXTERN)
                || address.relative_position.is_none()
            {
                "G"
            } else if var.qualifiers.contains(Qualifiers::CONST) {
                "P"
            } else {
                ""
            }
        }
        _ => "",
    }
}

fn is_label_output_relative(definition: &Definition) -> bool {
    match &definition.kind {
        DefinitionKind::Func(..) => true,
        DefinitionKind::Var(var) => match var.address {
            Some(address) => {
                address.absolute_position.map_or(false, |absolute| {
                    !(absolute < 0x800 || (0x6000..0x8000).contains(&absolute))
                }) && address.relative_position.is_some()
                    && !var.qualifiers.contains(Qualifiers::EXTERN)
                    && var.qualifiers.contains(Qualifiers::CONST)
            }
            None => false,
        },
        _ => false,
    }
}

impl DebugFormat for MlbDebugFormat {
    fn debug_file_name(&self, output_name: &str) -> String {
        format!("{}.mlb", strip_extension(output_name))
    }

    fn generate(
        &self,
        report: &mut Report,
        context: &mut DebugFormatContext<'_>,
        writer: &mut dyn io::Write,
    ) -> bool {
        for (_, definition) in context.definitions.iter() {
            let Some(address) = definition.address() else {
                continue;
            };
            if address.absolute_position.is_none() {
                continue;
            }

            // Hardware registers and externs are skipped: mapper-related
            // definitions might alias each other, or alias ROM addresses.
            let types = label_types(definition);
            if types.is_empty() || types == "G" {
                continue;
            }

            let value = if is_label_output_relative(definition) {
                match context.output_context.output_offset(&address) {
                    // Mesen addresses PRG data past the 16-byte iNES header.
                    Some(offset) => offset.saturating_sub(16),
                    None => continue,
                }
            } else {
                match address.absolute_position {
                    Some(absolute) => absolute,
                    None => continue,
                }
            };

            let mut full_name = String::new();
            if let Some(parent) = definition.parent_scope {
                let prefix = context.scopes.full_name(parent);
                if !prefix.is_empty() {
                    full_name.push_str(&prefix);
                    full_name.push('.');
                }
            }
            full_name.push_str(&definition.name.replace('$', "__"));

            for label_type in types.chars() {
                if let Err(error) =
                    writeln!(writer, "{}:{:x}:{}", label_type, value, full_name)
                {
                    report.plain_error(
                        format!("could not write debug file: {}", error),
                        relic_types::SourceLocation::empty(),
                    );
                    return false;
                }
            }
        }
        true
    }
}
