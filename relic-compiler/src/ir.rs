//! The deferred program: an ordered stream of relocation scopes, labels,
//! typed code nodes and inline storage, produced by pass 4 and consumed by
//! the layout and emit passes.

use relic_asm::InstructionOperand;
use relic_types::{DefinitionId, SourceLocation};

use crate::ast::Expression;
use crate::bank::BankId;

/// One lowered operand: the reduced expression it came from (kept so the
/// emit pass can re-evaluate link-time values once addresses are bound)
/// and the operand tree used for selection.
#[derive(Debug, Clone)]
pub struct OperandRoot {
    pub expression: Option<Expression>,
    pub operand: InstructionOperand,
}

impl OperandRoot {
    pub fn new(expression: Option<Expression>, operand: InstructionOperand) -> OperandRoot {
        OperandRoot {
            expression,
            operand,
        }
    }
}

/// An IR node.
#[derive(Debug)]
pub struct IrNode {
    pub kind: IrNodeKind,
    pub location: SourceLocation,
}

impl IrNode {
    pub fn new(kind: IrNodeKind, location: SourceLocation) -> IrNode {
        IrNode { kind, location }
    }
}

/// The IR node payloads.
#[derive(Debug)]
pub enum IrNodeKind {
    /// Enter a relocation scope: subsequent nodes place into `bank`,
    /// seeking to `address` first when present.
    PushRelocation {
        bank: BankId,
        address: Option<usize>,
    },
    /// Leave the innermost relocation scope.
    PopRelocation,
    /// Bind the definition's address to the current position.
    Label(DefinitionId),
    /// One selected instruction and its operands.
    Code {
        /// Handle into the builtin instruction set.
        instruction: usize,
        operand_roots: Vec<OperandRoot>,
        /// A smaller matching form layout may switch to when the branch
        /// distance allows; cleared once taken (branches never re-grow).
        short_form: Option<usize>,
        /// Operand-root index of the branch destination, for relaxation.
        branch_target: Option<usize>,
    },
    /// Storage interleaved with code; layout assigns the address, the emit
    /// pass reserves and writes any initializer bytes.
    Var(DefinitionId),
}
