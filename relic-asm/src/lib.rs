//! Instruction model for the relic compiler: operand trees, operand
//! patterns with capture, instruction signatures with mode-flag masks,
//! size/write encodings, and the registry that performs most-specific
//! instruction selection.
//!
//! This crate is target-agnostic. Platforms construct patterns and
//! encodings; the compiler lowers expressions into [`InstructionOperand`]
//! trees and asks the [`InstructionSet`] for the best match.

mod encoding;
mod mode_flags;
mod operand;
mod pattern;
mod registry;
mod signature;

pub use encoding::{
    fit_unsigned, parameter_value, EncodingError, EncodingState, InstructionEncoding,
};
pub use mode_flags::ModeFlags;
pub use operand::{InstructionOperand, RegisterNamer};
pub use pattern::InstructionOperandPattern;
pub use registry::InstructionSet;
pub use signature::{
    BranchKind, CaptureList, Instruction, InstructionOptions, InstructionSignature,
    InstructionType,
};
