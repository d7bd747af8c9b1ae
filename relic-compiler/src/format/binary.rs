use crate::format::{OutputFormat, OutputFormatContext};
use crate::report::Report;

/// Headerless image: stored banks concatenated in declaration order. The
/// `trim` config entry truncates the final stored bank to its used size.
pub struct BinaryOutputFormat;

impl OutputFormat for BinaryOutputFormat {
    fn generate(&self, report: &mut Report, context: &mut OutputFormatContext<'_>) -> bool {
        let trim = context
            .config
            .check_boolean(report, "trim", false)
            .map(|(_, value)| value)
            .unwrap_or(false);

        let trimmed_bank_index = if trim {
            context
                .banks
                .iter()
                .rposition(|bank| bank.kind().is_stored())
        } else {
            None
        };

        for (index, bank) in context.banks.iter().enumerate() {
            let data = if trimmed_bank_index == Some(index) {
                bank.used_data()
            } else {
                bank.data()
            };
            context.bank_offsets.insert(bank.id(), context.data.len());
            context.data.extend_from_slice(data);
        }
        true
    }
}
