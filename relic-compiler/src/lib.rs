//! The relic compiler core: a retargetable compiler/assembler for 8/16-bit
//! CPU targets (6502 family, Z80, Game Boy, WDC 65816, SPC700).
//!
//! The crate consumes an already-parsed [`ast::Statement`] tree and drives
//! it through five passes: definition reservation, type resolution, storage
//! reservation, IR emission, and code generation. The resulting banks are
//! assembled into a target container by an [`format::OutputFormat`] and,
//! optionally, a textual symbol file by a [`format::debug::DebugFormat`].
//!
//! The lexer, parser, import manager, CLI driver and TTY logger are hosts'
//! responsibilities; their touch points are the statement tree, the
//! [`compiler::EmbedLoader`] callback and the [`report::DiagnosticSink`]
//! trait.

pub mod ast;
pub mod bank;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod definition;
pub mod format;
pub mod ir;
pub mod platform;
pub mod report;
pub mod symbol_table;

pub use bank::{Bank, BankId, BankKind};
pub use compiler::Compiler;
pub use config::Config;
pub use definition::{Address, Definition, DefinitionKind, DefinitionPool};
pub use report::{Report, ReportErrorFlags};
pub use symbol_table::{ScopeId, ScopePool};
