use core::fmt;
use std::sync::Arc;

/// A position in user source, attached to every AST node and diagnostic.
///
/// The display path is what the user typed (or `<stdin>`); the canonical path
/// uniquely identifies the file for import cycle detection. Lines are
/// 1-based; a line of 0 means "whole file".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceLocation {
    /// Path as shown in diagnostics.
    pub display_path: Arc<str>,
    /// Path after resolution against import directories.
    pub canonical_path: Arc<str>,
    /// 1-based line number, or 0 when no line applies.
    pub line: usize,
}

impl SourceLocation {
    /// An empty location, used for diagnostics that have no source anchor
    /// (e.g. config errors raised at output time).
    pub fn empty() -> Self {
        SourceLocation {
            display_path: Arc::from(""),
            canonical_path: Arc::from(""),
            line: 0,
        }
    }

    /// Location covering a whole file.
    pub fn file(path: &str) -> Self {
        SourceLocation {
            display_path: Arc::from(path),
            canonical_path: Arc::from(path),
            line: 0,
        }
    }

    /// Location at a specific line of a file.
    pub fn line(path: &str, line: usize) -> Self {
        SourceLocation {
            display_path: Arc::from(path),
            canonical_path: Arc::from(path),
            line,
        }
    }

    /// Whether this location names a file at all.
    pub fn is_empty(&self) -> bool {
        self.display_path.is_empty()
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        SourceLocation::empty()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_path.is_empty() {
            Ok(())
        } else if self.line == 0 {
            write!(f, "{}", self.display_path)
        } else {
            write!(f, "{}:{}", self.display_path, self.line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(SourceLocation::empty().to_string(), "");
        assert_eq!(SourceLocation::file("main.wiz").to_string(), "main.wiz");
        assert_eq!(SourceLocation::line("main.wiz", 12).to_string(), "main.wiz:12");
    }
}
