use relic_types::{BinaryOperator, DefinitionId, UnaryOperator};

/// Resolves register definition handles to display names for diagnostics.
pub trait RegisterNamer {
    /// The source-level name of the register behind `id`.
    fn register_name(&self, id: DefinitionId) -> String;
}

/// A lowered operand tree, produced from a run-time or link-time expression
/// and matched against platform operand patterns.
///
/// Operands order structurally; the derived ordering is only used to give
/// capture lists and candidate listings a stable presentation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstructionOperand {
    /// A bit of another operand, e.g. `flag $ 3`.
    BitIndex {
        /// Operand holding the bits.
        operand: Box<InstructionOperand>,
        /// Bit position operand.
        subscript: Box<InstructionOperand>,
    },
    /// An unevaluated binary expression between two operands.
    Binary {
        /// Operator kind.
        op: BinaryOperator,
        /// Left side.
        left: Box<InstructionOperand>,
        /// Right side.
        right: Box<InstructionOperand>,
    },
    /// A boolean value, possibly only known at link time.
    Boolean {
        /// The value (representative when `placeholder`).
        value: bool,
        /// Whether the value stands in for a link-time result.
        placeholder: bool,
    },
    /// A memory access through an address operand.
    Dereference {
        /// Whether the access crosses the far (long) address space.
        far: bool,
        /// Address operand.
        operand: Box<InstructionOperand>,
        /// Access size in bytes.
        size: usize,
    },
    /// A subscripted memory access: `*(operand + subscript * scale)`.
    Index {
        /// Whether the access crosses the far (long) address space.
        far: bool,
        /// Base address operand.
        operand: Box<InstructionOperand>,
        /// Subscript operand.
        subscript: Box<InstructionOperand>,
        /// Multiplier applied to the subscript.
        subscript_scale: usize,
        /// Access size in bytes.
        size: usize,
    },
    /// An integer value, possibly only known at link time.
    Integer {
        /// The value (representative when `placeholder`).
        value: i128,
        /// Whether the value stands in for a link-time result.
        placeholder: bool,
    },
    /// A named machine register.
    Register(DefinitionId),
    /// An unevaluated unary expression over an operand.
    Unary {
        /// Operator kind.
        op: UnaryOperator,
        /// Inner operand.
        operand: Box<InstructionOperand>,
    },
}

impl InstructionOperand {
    /// Convenience constructor for a plain integer operand.
    pub fn integer(value: i128) -> InstructionOperand {
        InstructionOperand::Integer {
            value,
            placeholder: false,
        }
    }

    /// Convenience constructor for a link-time integer placeholder.
    pub fn placeholder(value: i128) -> InstructionOperand {
        InstructionOperand::Integer {
            value,
            placeholder: true,
        }
    }

    /// Convenience constructor for a plain boolean operand.
    pub fn boolean(value: bool) -> InstructionOperand {
        InstructionOperand::Boolean {
            value,
            placeholder: false,
        }
    }

    /// The integer payload, if this is an integer operand.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            InstructionOperand::Integer { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Renders the operand for diagnostics, resolving register names
    /// through `namer`.
    pub fn describe(&self, namer: &dyn RegisterNamer) -> String {
        match self {
            InstructionOperand::BitIndex { operand, subscript } => {
                format!("{} $ {}", operand.describe(namer), subscript.describe(namer))
            }
            InstructionOperand::Binary { op, left, right } => format!(
                "({} {} {})",
                left.describe(namer),
                op.symbol(),
                right.describe(namer)
            ),
            InstructionOperand::Boolean { value, .. } => value.to_string(),
            InstructionOperand::Dereference { far, operand, size } => format!(
                "{}*({} as *u{})",
                if *far { "far " } else { "" },
                operand.describe(namer),
                size * 8
            ),
            InstructionOperand::Index {
                far,
                operand,
                subscript,
                subscript_scale,
                size,
            } => {
                let scale = if *subscript_scale > 1 {
                    format!(" * {}", subscript_scale)
                } else {
                    String::new()
                };
                format!(
                    "{}*(({} + {}{}) as *u{})",
                    if *far { "far " } else { "" },
                    operand.describe(namer),
                    subscript.describe(namer),
                    scale,
                    size * 8
                )
            }
            InstructionOperand::Integer { value, .. } => value.to_string(),
            InstructionOperand::Register(id) => namer.register_name(*id),
            InstructionOperand::Unary { op, operand } => match op {
                UnaryOperator::PostIncrement | UnaryOperator::PostDecrement => {
                    format!("{}{}", operand.describe(namer), op.symbol())
                }
                _ => format!("{}{}", op.symbol(), operand.describe(namer)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Names;

    impl RegisterNamer for Names {
        fn register_name(&self, id: DefinitionId) -> String {
            format!("r{}", id.0)
        }
    }

    #[test]
    fn describe_renders_nested_operands() {
        let operand = InstructionOperand::Index {
            far: false,
            operand: Box::new(InstructionOperand::integer(0x2000)),
            subscript: Box::new(InstructionOperand::Register(DefinitionId(3))),
            subscript_scale: 1,
            size: 1,
        };
        assert_eq!(operand.describe(&Names), "*((8192 + r3) as *u8)");
    }

    #[test]
    fn structural_order_is_total() {
        let a = InstructionOperand::integer(1);
        let b = InstructionOperand::integer(2);
        let c = InstructionOperand::Register(DefinitionId(0));
        assert!(a < b);
        assert_ne!(a.cmp(&c), core::cmp::Ordering::Equal);
        assert_eq!(a.cmp(&a.clone()), core::cmp::Ordering::Equal);
    }
}
