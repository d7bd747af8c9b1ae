//! Debug formatters: textual symbol files for emulators, keyed by each
//! definition's placement in the output image.

mod mlb;
mod rgbds;
mod wla;

pub use mlb::MlbDebugFormat;
pub use rgbds::RgbdsSymDebugFormat;
pub use wla::WlaSymDebugFormat;

use std::collections::HashMap;
use std::io;

use relic_types::{DefinitionId, Qualifiers};

use crate::config::Config;
use crate::definition::{Definition, DefinitionKind, DefinitionPool};
use crate::format::OutputFormatContext;
use crate::report::Report;
use crate::symbol_table::ScopePool;

/// Shared state while writing one symbol file.
pub struct DebugFormatContext<'a> {
    pub config: &'a Config,
    pub output_name: &'a str,
    pub output_context: &'a OutputFormatContext<'a>,
    pub definitions: &'a DefinitionPool,
    pub scopes: &'a ScopePool,
    /// First definition seen at each address; later ones are skipped.
    pub address_ownership: HashMap<usize, DefinitionId>,
}

impl<'a> DebugFormatContext<'a> {
    pub fn new(
        config: &'a Config,
        output_name: &'a str,
        output_context: &'a OutputFormatContext<'a>,
        definitions: &'a DefinitionPool,
        scopes: &'a ScopePool,
    ) -> DebugFormatContext<'a> {
        DebugFormatContext {
            config,
            output_name,
            output_context,
            definitions,
            scopes,
            address_ownership: HashMap::new(),
        }
    }
}

/// One symbol file format.
pub trait DebugFormat {
    /// The file name this format wants next to `output_name`.
    fn debug_file_name(&self, output_name: &str) -> String;

    /// Writes the symbol file; IO failures are reported and abort the
    /// file.
    fn generate(
        &self,
        report: &mut Report,
        context: &mut DebugFormatContext<'_>,
        writer: &mut dyn io::Write,
    ) -> bool;
}

/// Name registry over the supported debug formats.
pub struct DebugFormatCollection {
    formats: Vec<(&'static str, Box<dyn DebugFormat>)>,
}

impl DebugFormatCollection {
    pub fn new() -> DebugFormatCollection {
        DebugFormatCollection {
            formats: vec![
                ("mlb", Box::new(MlbDebugFormat) as Box<dyn DebugFormat>),
                ("rgbds", Box::new(RgbdsSymDebugFormat)),
                ("wla", Box::new(WlaSymDebugFormat)),
            ],
        }
    }

    pub fn find(&self, name: &str) -> Option<&dyn DebugFormat> {
        self.formats
            .iter()
            .find(|(format_name, _)| *format_name == name)
            .map(|(_, format)| format.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.formats.iter().map(|(name, _)| *name)
    }
}

impl Default for DebugFormatCollection {
    fn default() -> Self {
        DebugFormatCollection::new()
    }
}

/// `parent.scope.name` with `$` and `%` made identifier-safe.
pub(crate) fn qualified_name(
    scopes: &ScopePool,
    definition: &Definition,
    skip_prefix_for_anonymous: bool,
) -> String {
    let mut full_name = String::new();
    let anonymous = definition.name.starts_with('$');
    if !(skip_prefix_for_anonymous && anonymous) {
        if let Some(parent) = definition.parent_scope {
            let prefix = scopes.full_name(parent);
            if !prefix.is_empty() {
                full_name.push_str(&prefix);
                full_name.push('.');
            }
        }
    }
    full_name.push_str(&definition.name);
    full_name.replace(['$', '%'], "__")
}

/// Whether the definition's address is relative to the output image (code
/// and constants) rather than a fixed hardware address.
pub(crate) fn is_output_relative(definition: &Definition) -> bool {
    match &definition.kind {
        DefinitionKind::Func(..) => true,
        DefinitionKind::Var(var) => {
            let Some(address) = var.address else {
                return false;
            };
            if address.absolute_position.is_some() {
                if var.qualifiers.contains(Qualifiers::EXTERN)
                    || address.relative_position.is_none()
                {
                    false
                } else {
                    var.qualifiers.contains(Qualifiers::CONST)
                }
            } else {
                false
            }
        }
        _ => false,
    }
}
