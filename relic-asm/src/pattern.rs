use relic_types::{DefinitionId, UnaryOperator};

use crate::operand::{InstructionOperand, RegisterNamer};

/// A pattern over [`InstructionOperand`] trees.
///
/// Patterns drive both encoding selection (via [`matches`]) and parameter
/// extraction (via [`extract`], which records every operand matched by a
/// `Capture` node). `is_subset_of` defines the specificity partial order
/// used to pick the best instruction among several matches.
///
/// [`matches`]: InstructionOperandPattern::matches
/// [`extract`]: InstructionOperandPattern::extract
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstructionOperandPattern {
    /// Matches a bit-index operand whose parts match the sub-patterns.
    BitIndex {
        /// Pattern for the operand holding the bits.
        operand: Box<InstructionOperandPattern>,
        /// Pattern for the bit position.
        subscript: Box<InstructionOperandPattern>,
    },
    /// Matches a boolean operand with exactly this value.
    Boolean(bool),
    /// Matches whatever the inner pattern matches, and records the matched
    /// operand in the capture list.
    Capture(Box<InstructionOperandPattern>),
    /// Matches a dereference with the same width and farness.
    Dereference {
        /// Required farness.
        far: bool,
        /// Pattern for the address operand.
        operand: Box<InstructionOperandPattern>,
        /// Required access size in bytes.
        size: usize,
    },
    /// Matches an indexed access with the same width, farness and scale.
    Index {
        /// Required farness.
        far: bool,
        /// Pattern for the base address operand.
        operand: Box<InstructionOperandPattern>,
        /// Pattern for the subscript.
        subscript: Box<InstructionOperandPattern>,
        /// Required subscript scale.
        subscript_scale: usize,
        /// Required access size in bytes.
        size: usize,
    },
    /// Matches any integer with `value >= min`.
    IntegerAtLeast(i128),
    /// Matches any integer with `min <= value <= max`.
    IntegerRange {
        /// Inclusive lower bound.
        min: i128,
        /// Inclusive upper bound.
        max: i128,
    },
    /// Matches exactly this register.
    Register(DefinitionId),
    /// Matches a unary operand with the same operator.
    Unary {
        /// Required operator.
        op: UnaryOperator,
        /// Pattern for the inner operand.
        operand: Box<InstructionOperandPattern>,
    },
}

impl InstructionOperandPattern {
    /// Pattern matching exactly one integer value.
    pub fn exact_integer(value: i128) -> InstructionOperandPattern {
        InstructionOperandPattern::IntegerRange {
            min: value,
            max: value,
        }
    }

    /// Wraps `self` in a capture node.
    #[must_use]
    pub fn captured(self) -> InstructionOperandPattern {
        InstructionOperandPattern::Capture(Box::new(self))
    }

    /// Whether `operand` is matched by this pattern.
    pub fn matches(&self, operand: &InstructionOperand) -> bool {
        use InstructionOperandPattern as P;
        match (self, operand) {
            (
                P::BitIndex { operand, subscript },
                InstructionOperand::BitIndex {
                    operand: other_operand,
                    subscript: other_subscript,
                },
            ) => operand.matches(other_operand) && subscript.matches(other_subscript),
            (P::Boolean(value), InstructionOperand::Boolean { value: other, .. }) => {
                value == other
            }
            (P::Capture(inner), _) => inner.matches(operand),
            (
                P::Dereference {
                    far,
                    operand: inner,
                    size,
                },
                InstructionOperand::Dereference {
                    far: other_far,
                    operand: other_inner,
                    size: other_size,
                },
            ) => far == other_far && size == other_size && inner.matches(other_inner),
            (
                P::Index {
                    far,
                    operand: inner,
                    subscript,
                    subscript_scale,
                    size,
                },
                InstructionOperand::Index {
                    far: other_far,
                    operand: other_inner,
                    subscript: other_subscript,
                    subscript_scale: other_scale,
                    size: other_size,
                },
            ) => {
                far == other_far
                    && size == other_size
                    && subscript_scale == other_scale
                    && inner.matches(other_inner)
                    && subscript.matches(other_subscript)
            }
            (P::IntegerAtLeast(min), InstructionOperand::Integer { value, .. }) => value >= min,
            (P::IntegerRange { min, max }, InstructionOperand::Integer { value, .. }) => {
                min <= value && value <= max
            }
            (P::Register(id), InstructionOperand::Register(other)) => id == other,
            (
                P::Unary { op, operand: inner },
                InstructionOperand::Unary {
                    op: other_op,
                    operand: other_inner,
                },
            ) => op == other_op && inner.matches(other_inner),
            _ => false,
        }
    }

    /// Matches like [`matches`](Self::matches), appending every operand
    /// matched by a `Capture` node to `captures` in match order.
    ///
    /// On failure `captures` may hold partial results; callers discard it.
    pub fn extract<'a>(
        &self,
        operand: &'a InstructionOperand,
        captures: &mut Vec<&'a InstructionOperand>,
    ) -> bool {
        use InstructionOperandPattern as P;
        match (self, operand) {
            (P::Capture(inner), _) => {
                if inner.extract(operand, captures) {
                    captures.push(operand);
                    true
                } else {
                    false
                }
            }
            (
                P::BitIndex { operand, subscript },
                InstructionOperand::BitIndex {
                    operand: other_operand,
                    subscript: other_subscript,
                },
            ) => {
                operand.extract(other_operand, captures)
                    && subscript.extract(other_subscript, captures)
            }
            (
                P::Dereference { operand: inner, .. },
                InstructionOperand::Dereference {
                    operand: other_inner,
                    ..
                },
            ) if self.matches_shallow(operand) => inner.extract(other_inner, captures),
            (
                P::Index {
                    operand: inner,
                    subscript,
                    ..
                },
                InstructionOperand::Index {
                    operand: other_inner,
                    subscript: other_subscript,
                    ..
                },
            ) if self.matches_shallow(operand) => {
                inner.extract(other_inner, captures)
                    && subscript.extract(other_subscript, captures)
            }
            (
                P::Unary { op, operand: inner },
                InstructionOperand::Unary {
                    op: other_op,
                    operand: other_inner,
                },
            ) => op == other_op && inner.extract(other_inner, captures),
            _ => self.matches(operand),
        }
    }

    // Structural parameters only, without recursing into children.
    fn matches_shallow(&self, operand: &InstructionOperand) -> bool {
        use InstructionOperandPattern as P;
        match (self, operand) {
            (
                P::Dereference { far, size, .. },
                InstructionOperand::Dereference {
                    far: other_far,
                    size: other_size,
                    ..
                },
            ) => far == other_far && size == other_size,
            (
                P::Index {
                    far,
                    subscript_scale,
                    size,
                    ..
                },
                InstructionOperand::Index {
                    far: other_far,
                    subscript_scale: other_scale,
                    size: other_size,
                    ..
                },
            ) => far == other_far && size == other_size && subscript_scale == other_scale,
            _ => false,
        }
    }

    /// Whether every operand matched by `self` is also matched by `other`.
    ///
    /// `Capture` nodes are transparent on both sides, so capturing and
    /// non-capturing forms of the same pattern compare equal.
    pub fn is_subset_of(&self, other: &InstructionOperandPattern) -> bool {
        use InstructionOperandPattern as P;
        if let P::Capture(inner) = self {
            return inner.is_subset_of(other);
        }
        if let P::Capture(inner) = other {
            return self.is_subset_of(inner);
        }
        match (self, other) {
            (
                P::BitIndex { operand, subscript },
                P::BitIndex {
                    operand: other_operand,
                    subscript: other_subscript,
                },
            ) => operand.is_subset_of(other_operand) && subscript.is_subset_of(other_subscript),
            (P::Boolean(value), P::Boolean(other)) => value == other,
            (
                P::Dereference {
                    far,
                    operand: inner,
                    size,
                },
                P::Dereference {
                    far: other_far,
                    operand: other_inner,
                    size: other_size,
                },
            ) => far == other_far && size == other_size && inner.is_subset_of(other_inner),
            (
                P::Index {
                    far,
                    operand: inner,
                    subscript,
                    subscript_scale,
                    size,
                },
                P::Index {
                    far: other_far,
                    operand: other_inner,
                    subscript: other_subscript,
                    subscript_scale: other_scale,
                    size: other_size,
                },
            ) => {
                far == other_far
                    && size == other_size
                    && subscript_scale == other_scale
                    && inner.is_subset_of(other_inner)
                    && subscript.is_subset_of(other_subscript)
            }
            (P::IntegerAtLeast(min), P::IntegerAtLeast(other_min)) => min >= other_min,
            (P::IntegerAtLeast(min), P::IntegerRange { min: other_min, max }) => {
                *max == i128::MAX && min >= other_min
            }
            (P::IntegerRange { min, .. }, P::IntegerAtLeast(other_min)) => min >= other_min,
            (
                P::IntegerRange { min, max },
                P::IntegerRange {
                    min: other_min,
                    max: other_max,
                },
            ) => min >= other_min && max <= other_max,
            (P::Register(id), P::Register(other)) => id == other,
            (
                P::Unary { op, operand: inner },
                P::Unary {
                    op: other_op,
                    operand: other_inner,
                },
            ) => op == other_op && inner.is_subset_of(other_inner),
            _ => false,
        }
    }

    /// Renders the pattern for candidate listings in diagnostics.
    pub fn describe(&self, namer: &dyn RegisterNamer) -> String {
        use InstructionOperandPattern as P;
        match self {
            P::BitIndex { operand, subscript } => {
                format!("{} $ {}", operand.describe(namer), subscript.describe(namer))
            }
            P::Boolean(value) => value.to_string(),
            P::Capture(inner) => inner.describe(namer),
            P::Dereference { far, operand, size } => format!(
                "{}*({} as *u{})",
                if *far { "far " } else { "" },
                operand.describe(namer),
                size * 8
            ),
            P::Index {
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
            P::IntegerAtLeast(min) => format!("{{integer >= {}}}", min),
            P::IntegerRange { min, max } => {
                if min == max {
                    min.to_string()
                } else {
                    format!("{{integer {}..{}}}", min, max)
                }
            }
            P::Register(id) => namer.register_name(*id),
            P::Unary { op, operand } => format!("{}{}", op.symbol(), operand.describe(namer)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn imm_u8() -> InstructionOperandPattern {
        InstructionOperandPattern::IntegerRange { min: 0, max: 0xFF }
    }

    fn imm_u16() -> InstructionOperandPattern {
        InstructionOperandPattern::IntegerRange {
            min: 0,
            max: 0xFFFF,
        }
    }

    #[rstest]
    #[case(0, true)]
    #[case(0xFF, true)]
    #[case(0x100, false)]
    #[case(-1, false)]
    fn integer_range_bounds(#[case] value: i128, #[case] expected: bool) {
        assert_eq!(imm_u8().matches(&InstructionOperand::integer(value)), expected);
    }

    #[test]
    fn capture_records_matched_operand() {
        let pattern = InstructionOperandPattern::Dereference {
            far: false,
            operand: Box::new(imm_u16().captured()),
            size: 1,
        };
        let operand = InstructionOperand::Dereference {
            far: false,
            operand: Box::new(InstructionOperand::integer(0x1234)),
            size: 1,
        };
        let mut captures = Vec::new();
        assert!(pattern.extract(&operand, &mut captures));
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].as_integer(), Some(0x1234));
    }

    #[test]
    fn extract_fails_like_matches() {
        let pattern = imm_u8().captured();
        let mut captures = Vec::new();
        assert!(!pattern.extract(&InstructionOperand::integer(0x100), &mut captures));
    }

    #[test]
    fn subset_is_capture_transparent() {
        assert!(imm_u8().captured().is_subset_of(&imm_u16()));
        assert!(imm_u8().is_subset_of(&imm_u16().captured()));
        assert!(!imm_u16().is_subset_of(&imm_u8()));
    }

    #[test]
    fn at_least_subset_rules() {
        let p10 = InstructionOperandPattern::IntegerAtLeast(10);
        let p5 = InstructionOperandPattern::IntegerAtLeast(5);
        assert!(p10.is_subset_of(&p5));
        assert!(!p5.is_subset_of(&p10));
        assert!(imm_u8().is_subset_of(&InstructionOperandPattern::IntegerAtLeast(0)));
        assert!(!InstructionOperandPattern::IntegerAtLeast(0).is_subset_of(&imm_u8()));
    }

    proptest! {
        // Reflexivity and antisymmetry of the specificity order on ranges.
        #[test]
        fn range_subset_partial_order(a in -200i128..200, b in -200i128..200, c in -200i128..200, d in -200i128..200) {
            let r1 = InstructionOperandPattern::IntegerRange { min: a.min(b), max: a.max(b) };
            let r2 = InstructionOperandPattern::IntegerRange { min: c.min(d), max: c.max(d) };
            prop_assert!(r1.is_subset_of(&r1));
            if r1.is_subset_of(&r2) && r2.is_subset_of(&r1) {
                prop_assert_eq!(r1, r2);
            }
        }

        #[test]
        fn subset_implies_match_containment(value in -300i128..300, a in -200i128..200, b in -200i128..200) {
            let narrow = InstructionOperandPattern::IntegerRange { min: a.min(b), max: a.max(b) };
            let wide = InstructionOperandPattern::IntegerRange { min: -200, max: 200 };
            let operand = InstructionOperand::integer(value);
            if narrow.is_subset_of(&wide) && narrow.matches(&operand) {
                prop_assert!(wide.matches(&operand));
            }
        }
    }
}
