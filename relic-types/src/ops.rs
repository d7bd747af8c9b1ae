use crate::int::{self, ArithmeticResult};

/// Binary operators of the source language.
///
/// Several of these never reach instruction selection (assignment and
/// indexing are handled structurally), but they share one universe so that
/// diagnostics and instruction signatures can name any of them. Variants
/// are named by [`symbol`](BinaryOperator::symbol) and
/// [`name`](BinaryOperator::name).
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOperator {
    Addition,
    AdditionWithCarry,
    Assignment,
    BitIndexing,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    Concatenation,
    Division,
    Equal,
    GreaterThan,
    GreaterThanOrEqual,
    Indexing,
    LeftRotate,
    LeftRotateWithCarry,
    LeftShift,
    LessThan,
    LessThanOrEqual,
    LogicalAnd,
    LogicalLeftShift,
    LogicalOr,
    LogicalRightShift,
    Modulo,
    Multiplication,
    NotEqual,
    RightRotate,
    RightRotateWithCarry,
    RightShift,
    Subtraction,
    SubtractionWithCarry,
}

impl BinaryOperator {
    /// Source symbol, as written in programs.
    pub fn symbol(self) -> &'static str {
        use BinaryOperator::*;
        match self {
            Addition => "+",
            AdditionWithCarry => "+#",
            Assignment => "=",
            BitIndexing => "$",
            BitwiseAnd => "&",
            BitwiseOr => "|",
            BitwiseXor => "^",
            Concatenation => "~",
            Division => "/",
            Equal => "==",
            GreaterThan => ">",
            GreaterThanOrEqual => ">=",
            Indexing => "[]",
            LeftRotate => "<<<<",
            LeftRotateWithCarry => "<<<<#",
            LeftShift => "<<",
            LessThan => "<",
            LessThanOrEqual => "<=",
            LogicalAnd => "&&",
            LogicalLeftShift => "<<<",
            LogicalOr => "||",
            LogicalRightShift => ">>>",
            Modulo => "%",
            Multiplication => "*",
            NotEqual => "!=",
            RightRotate => ">>>>",
            RightRotateWithCarry => ">>>>#",
            RightShift => ">>",
            Subtraction => "-",
            SubtractionWithCarry => "-#",
        }
    }

    /// Human-readable name used in diagnostics, e.g. ``addition `+` ``.
    pub fn name(self) -> String {
        use BinaryOperator::*;
        let noun = match self {
            Addition => "addition",
            AdditionWithCarry => "addition-with-carry",
            Assignment => "assignment",
            BitIndexing => "bit indexing",
            BitwiseAnd => "bitwise and",
            BitwiseOr => "bitwise or",
            BitwiseXor => "bitwise xor",
            Concatenation => "concatenation",
            Division => "division",
            Equal => "equality comparison",
            GreaterThan => "greater-than comparison",
            GreaterThanOrEqual => "greater-than-or-equal comparison",
            Indexing => "indexing",
            LeftRotate => "left rotate",
            LeftRotateWithCarry => "left rotate-with-carry",
            LeftShift => "arithmetic left shift",
            LessThan => "less-than comparison",
            LessThanOrEqual => "less-than-or-equal comparison",
            LogicalAnd => "logical and",
            LogicalLeftShift => "logical left shift",
            LogicalOr => "logical or",
            LogicalRightShift => "logical right shift",
            Modulo => "modulo",
            Multiplication => "multiplication",
            NotEqual => "inequality comparison",
            RightRotate => "right rotate",
            RightRotateWithCarry => "right rotate-with-carry",
            RightShift => "arithmetic right shift",
            Subtraction => "subtraction",
            SubtractionWithCarry => "subtraction-with-carry",
        };
        format!("{} `{}`", noun, self.symbol())
    }

    /// The comparison with swapped operand order, if this is a comparison.
    pub fn reversed_comparison(self) -> Option<BinaryOperator> {
        use BinaryOperator::*;
        match self {
            LessThan => Some(GreaterThan),
            GreaterThan => Some(LessThan),
            LessThanOrEqual => Some(GreaterThanOrEqual),
            GreaterThanOrEqual => Some(LessThanOrEqual),
            Equal => Some(Equal),
            NotEqual => Some(NotEqual),
            _ => None,
        }
    }

    /// The logically negated comparison, if this is a comparison.
    pub fn negated_comparison(self) -> Option<BinaryOperator> {
        use BinaryOperator::*;
        match self {
            LessThan => Some(GreaterThanOrEqual),
            GreaterThan => Some(LessThanOrEqual),
            LessThanOrEqual => Some(GreaterThan),
            GreaterThanOrEqual => Some(LessThan),
            Equal => Some(NotEqual),
            NotEqual => Some(Equal),
            _ => None,
        }
    }
}

/// Unary operators of the source language.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOperator {
    AddressOf,
    FarAddressOf,
    BitwiseNegation,
    Grouping,
    Indirection,
    LogicalNegation,
    PostDecrement,
    PostIncrement,
    PreDecrement,
    PreIncrement,
    SignedNegation,
    LowByte,
    HighByte,
    BankByte,
}

impl UnaryOperator {
    /// Source symbol, as written in programs.
    pub fn symbol(self) -> &'static str {
        use UnaryOperator::*;
        match self {
            AddressOf => "&",
            FarAddressOf => "far &",
            BitwiseNegation => "~",
            Grouping => "()",
            Indirection => "*",
            LogicalNegation => "!",
            PostDecrement | PreDecrement => "--",
            PostIncrement | PreIncrement => "++",
            SignedNegation => "-",
            LowByte => "<:",
            HighByte => ">:",
            BankByte => "#:",
        }
    }

    /// Human-readable name used in diagnostics.
    pub fn name(self) -> String {
        use UnaryOperator::*;
        let noun = match self {
            AddressOf => "address-of",
            FarAddressOf => "far address-of",
            BitwiseNegation => "bitwise negation",
            Grouping => "grouping",
            Indirection => "indirection",
            LogicalNegation => "logical negation",
            PostDecrement => "post-decrement",
            PostIncrement => "post-increment",
            PreDecrement => "pre-decrement",
            PreIncrement => "pre-increment",
            SignedNegation => "signed negation",
            LowByte => "low-byte access",
            HighByte => "high-byte access",
            BankByte => "bank-byte access",
        };
        format!("{} `{}`", noun, self.symbol())
    }
}

/// Whether `op` folds through [`apply_integer_arithmetic_op`].
pub fn is_valid_arithmetic_op(op: BinaryOperator) -> bool {
    use BinaryOperator::*;
    matches!(
        op,
        Addition
            | BitwiseAnd
            | BitwiseOr
            | BitwiseXor
            | Division
            | Modulo
            | Multiplication
            | LeftShift
            | RightShift
            | LogicalLeftShift
            | LogicalRightShift
            | Subtraction
    )
}

/// Whether `op` is one of the six ordered/equality comparisons.
pub fn is_valid_comparison_op(op: BinaryOperator) -> bool {
    use BinaryOperator::*;
    matches!(
        op,
        LessThan | GreaterThan | LessThanOrEqual | GreaterThanOrEqual | Equal | NotEqual
    )
}

fn shift_count(right: i128) -> u32 {
    if (0..128).contains(&right) {
        right as u32
    } else {
        128
    }
}

/// Applies an arithmetic operator in checked 128-bit arithmetic.
///
/// Panics if `op` is not a valid arithmetic operator; callers gate on
/// [`is_valid_arithmetic_op`] first.
pub fn apply_integer_arithmetic_op(
    op: BinaryOperator,
    left: i128,
    right: i128,
) -> (ArithmeticResult, i128) {
    use BinaryOperator::*;
    match op {
        Addition => int::checked_add(left, right),
        BitwiseAnd => (ArithmeticResult::Success, left & right),
        BitwiseOr => (ArithmeticResult::Success, left | right),
        BitwiseXor => (ArithmeticResult::Success, left ^ right),
        Division => int::checked_div(left, right),
        Modulo => int::checked_rem(left, right),
        Multiplication => int::checked_mul(left, right),
        LeftShift | LogicalLeftShift => int::checked_logical_left_shift(left, shift_count(right)),
        RightShift => (
            ArithmeticResult::Success,
            int::arithmetic_right_shift(left, shift_count(right)),
        ),
        LogicalRightShift => (
            ArithmeticResult::Success,
            int::logical_right_shift(left, shift_count(right)),
        ),
        Subtraction => int::checked_sub(left, right),
        _ => unreachable!("not an arithmetic operator: {:?}", op),
    }
}

/// Applies a comparison operator to two integers.
pub fn apply_integer_comparison_op(op: BinaryOperator, left: i128, right: i128) -> bool {
    use BinaryOperator::*;
    match op {
        LessThan => left < right,
        GreaterThan => left > right,
        LessThanOrEqual => left <= right,
        GreaterThanOrEqual => left >= right,
        Equal => left == right,
        NotEqual => left != right,
        _ => unreachable!("not a comparison operator: {:?}", op),
    }
}

/// Applies a comparison operator to two booleans (`false < true`).
pub fn apply_boolean_comparison_op(op: BinaryOperator, left: bool, right: bool) -> bool {
    apply_integer_comparison_op(op, left as i128, right as i128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BinaryOperator::Addition, 3, 4, 7)]
    #[case(BinaryOperator::Subtraction, 3, 4, -1)]
    #[case(BinaryOperator::Multiplication, -3, 4, -12)]
    #[case(BinaryOperator::Division, 7, 2, 3)]
    #[case(BinaryOperator::Modulo, 7, 2, 1)]
    #[case(BinaryOperator::BitwiseAnd, 0b1100, 0b1010, 0b1000)]
    #[case(BinaryOperator::BitwiseOr, 0b1100, 0b1010, 0b1110)]
    #[case(BinaryOperator::BitwiseXor, 0b1100, 0b1010, 0b0110)]
    #[case(BinaryOperator::LeftShift, 1, 4, 16)]
    #[case(BinaryOperator::RightShift, -16, 2, -4)]
    #[case(BinaryOperator::LogicalRightShift, -1, 127, 1)]
    fn arithmetic_folds(
        #[case] op: BinaryOperator,
        #[case] left: i128,
        #[case] right: i128,
        #[case] expected: i128,
    ) {
        assert_eq!(
            apply_integer_arithmetic_op(op, left, right),
            (ArithmeticResult::Success, expected)
        );
    }

    #[test]
    fn oversized_shift_counts_saturate() {
        assert_eq!(
            apply_integer_arithmetic_op(BinaryOperator::LogicalRightShift, -1, i128::MAX),
            (ArithmeticResult::Success, 0)
        );
        assert_eq!(
            apply_integer_arithmetic_op(BinaryOperator::RightShift, -1, i128::MAX),
            (ArithmeticResult::Success, -1)
        );
        assert_eq!(
            apply_integer_arithmetic_op(BinaryOperator::LeftShift, 1, -1).0,
            ArithmeticResult::Overflow
        );
    }

    #[test]
    fn comparison_negation_is_involutive() {
        use strum::IntoEnumIterator;
        for op in BinaryOperator::iter().filter(|op| is_valid_comparison_op(*op)) {
            let negated = op.negated_comparison().unwrap();
            assert_eq!(negated.negated_comparison(), Some(op));
            for (a, b) in [(1, 2), (2, 1), (2, 2)] {
                assert_eq!(
                    apply_integer_comparison_op(op, a, b),
                    !apply_integer_comparison_op(negated, a, b),
                );
            }
        }
    }
}
