//! The `config { ... }` key/value map consumed by output formatters.
//!
//! Values are constant expressions folded during IR emission; formatters
//! type-check the entries they care about at generate time.

use std::collections::HashMap;
use std::sync::Arc;

use relic_types::SourceLocation;

use crate::ast::Expression;
use crate::report::{Report, ReportErrorFlags};

/// Configuration map with duplicate detection and typed accessors.
#[derive(Debug, Default)]
pub struct Config {
    items: HashMap<Arc<str>, Expression>,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    /// Adds an entry, diagnosing duplicates with both locations.
    pub fn add(&mut self, report: &mut Report, key: Arc<str>, value: Expression) -> bool {
        if let Some(previous) = self.items.get(&key) {
            report.error(
                format!("duplicate config entry for `{}`", key),
                value.location,
                ReportErrorFlags::CONTINUED,
            );
            report.plain_error(
                format!("previous entry for `{}` appeared here", key),
                previous.location.clone(),
            );
            false
        } else {
            self.items.insert(key, value);
            true
        }
    }

    pub fn get(&self, key: &str) -> Option<&Expression> {
        self.items.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    fn check_value(&self, report: &mut Report, key: &str, required: bool) -> Option<&Expression> {
        match self.get(key) {
            Some(value) => Some(value),
            None => {
                if required {
                    report.plain_error(
                        format!("missing required config entry `{}`", key),
                        SourceLocation::empty(),
                    );
                }
                None
            }
        }
    }

    /// The entry as a boolean literal, with its defining expression.
    pub fn check_boolean(
        &self,
        report: &mut Report,
        key: &str,
        required: bool,
    ) -> Option<(&Expression, bool)> {
        let value = self.check_value(report, key, required)?;
        match value.as_boolean_literal() {
            Some(literal) => Some((value, literal)),
            None => {
                report.plain_error(
                    format!(
                        "config entry `{}` must be a compile-time boolean literal",
                        key
                    ),
                    value.location.clone(),
                );
                None
            }
        }
    }

    /// The entry as an integer literal, with its defining expression.
    pub fn check_integer(
        &self,
        report: &mut Report,
        key: &str,
        required: bool,
    ) -> Option<(&Expression, i128)> {
        let value = self.check_value(report, key, required)?;
        match value.as_integer_literal() {
            Some(literal) => Some((value, literal)),
            None => {
                report.plain_error(
                    format!(
                        "config entry `{}` must be a compile-time integer literal",
                        key
                    ),
                    value.location.clone(),
                );
                None
            }
        }
    }

    /// The entry as a string literal, with its defining expression.
    pub fn check_string(
        &self,
        report: &mut Report,
        key: &str,
        required: bool,
    ) -> Option<(&Expression, Arc<str>)> {
        let value = self.check_value(report, key, required)?;
        match value.as_string_literal() {
            Some(literal) => Some((value, literal.clone())),
            None => {
                report.plain_error(
                    format!(
                        "config entry `{}` must be a compile-time string literal",
                        key
                    ),
                    value.location.clone(),
                );
                None
            }
        }
    }

    /// Like [`check_string`](Self::check_string), additionally bounding the
    /// length.
    pub fn check_fixed_string(
        &self,
        report: &mut Report,
        key: &str,
        max_length: usize,
        required: bool,
    ) -> Option<(&Expression, Arc<str>)> {
        let (value, literal) = self.check_string(report, key, required)?;
        if literal.len() <= max_length {
            Some((value, literal))
        } else {
            report.plain_error(
                format!(
                    "config entry `{}` of \"{}\" is too long (must be at most {} characters, but got {} characters)",
                    key,
                    literal,
                    max_length,
                    literal.len()
                ),
                value.location.clone(),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CollectingSink;

    fn fixture() -> (Config, Report, CollectingSink) {
        let sink = CollectingSink::new();
        (Config::new(), Report::new(Box::new(sink.clone())), sink)
    }

    #[test]
    fn duplicate_entries_are_diagnosed() {
        let (mut config, mut report, sink) = fixture();
        assert!(config.add(
            &mut report,
            Arc::from("title"),
            Expression::new(
                crate::ast::ExpressionKind::StringLiteral(Arc::from("HELLO")),
                SourceLocation::line("a.wiz", 1),
            ),
        ));
        assert!(!config.add(
            &mut report,
            Arc::from("title"),
            Expression::new(
                crate::ast::ExpressionKind::StringLiteral(Arc::from("WORLD")),
                SourceLocation::line("a.wiz", 2),
            ),
        ));
        let rendered = sink.rendered();
        assert!(rendered[0].contains("duplicate config entry for `title`"));
        assert!(rendered[1].contains("a.wiz:1"));
    }

    #[test]
    fn typed_accessors_enforce_literal_kinds() {
        let (mut config, mut report, sink) = fixture();
        config.add(
            &mut report,
            Arc::from("trim"),
            Expression::integer(1, SourceLocation::line("a.wiz", 3)),
        );
        assert!(config.check_boolean(&mut report, "trim", false).is_none());
        assert!(sink.rendered()[0].contains("must be a compile-time boolean literal"));
        assert_eq!(
            config
                .check_integer(&mut report, "trim", false)
                .map(|(_, value)| value),
            Some(1)
        );
        // Missing optional entries are quiet; missing required ones are not.
        assert!(config.check_string(&mut report, "title", false).is_none());
        let before = sink.rendered().len();
        assert!(config.check_string(&mut report, "title", true).is_none());
        assert_eq!(sink.rendered().len(), before + 1);
    }

    #[test]
    fn fixed_strings_bound_length() {
        let (mut config, mut report, sink) = fixture();
        config.add(
            &mut report,
            Arc::from("maker_code"),
            Expression::new(
                crate::ast::ExpressionKind::StringLiteral(Arc::from("TOOLONG")),
                SourceLocation::line("a.wiz", 4),
            ),
        );
        assert!(config
            .check_fixed_string(&mut report, "maker_code", 2, false)
            .is_none());
        assert!(sink.rendered()[0].contains("is too long"));
    }
}
