use crate::signature::{CaptureList, InstructionOptions};

/// Where the encoder is writing: the emitting bank's position at the first
/// byte of the instruction. Relative branch encoders subtract the
/// end-of-instruction address from the target captured operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingState {
    /// Offset from the start of the bank.
    pub relative_position: usize,
    /// Absolute address, when the bank's origin is known.
    pub absolute_position: Option<usize>,
}

/// Failures produced while serializing one instruction. The compiler turns
/// these into diagnostics at the instruction's source location.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    /// A relative branch target is outside the reachable range.
    #[error("branch distance of {distance} bytes is out of range ({min} to {max}) for this instruction")]
    BranchOutOfRange {
        /// Signed distance from the end of the instruction.
        distance: i128,
        /// Smallest encodable distance.
        min: i128,
        /// Largest encodable distance.
        max: i128,
    },
    /// A captured value does not fit the encoded field.
    #[error("operand value {value} does not fit in a {bits}-bit field")]
    ValueOutOfRange {
        /// The captured value.
        value: i128,
        /// Width of the destination field.
        bits: u32,
    },
    /// The absolute position of the current bank is required but unknown.
    #[error("instruction requires a bank with a known starting address")]
    UnknownPosition,
    /// A capture index in the options did not resolve to an integer; this
    /// indicates a defective platform table.
    #[error("internal: encoding parameter {0} is missing or not an integer")]
    MissingParameter(usize),
}

/// Size and serialization behavior of one instruction form.
///
/// `size` must be callable during layout, before label addresses are known
/// (placeholder operands carry representative values); `write` runs during
/// the final emit pass and appends exactly `size` bytes on success.
pub struct InstructionEncoding {
    /// Computes the encoded size in bytes.
    pub size: fn(&InstructionOptions, &[CaptureList<'_>]) -> usize,
    /// Appends the encoded bytes to `buffer`.
    pub write: fn(
        buffer: &mut Vec<u8>,
        state: &EncodingState,
        options: &InstructionOptions,
        captures: &[CaptureList<'_>],
    ) -> Result<(), EncodingError>,
    /// For relative-displacement encodings, the inclusive distance range
    /// measured from the end of the instruction. Layout consults this when
    /// deciding whether a branch without a distance hint can take the short
    /// form. `None` for absolute encodings.
    pub relative_range: Option<(i128, i128)>,
}

impl core::fmt::Debug for InstructionEncoding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InstructionEncoding").finish_non_exhaustive()
    }
}

/// Looks up the integer capture routed to encoding parameter `index`.
///
/// Capture lists are indexed in operand-root order; `options.parameter`
/// holds, per encoding parameter, the flattened capture index.
pub fn parameter_value(
    options: &InstructionOptions,
    captures: &[CaptureList<'_>],
    index: usize,
) -> Result<i128, EncodingError> {
    let capture_index = *options
        .parameter
        .get(index)
        .ok_or(EncodingError::MissingParameter(index))?;
    captures
        .iter()
        .flat_map(|list| list.iter())
        .nth(capture_index)
        .and_then(|operand| operand.as_integer())
        .ok_or(EncodingError::MissingParameter(index))
}

/// Range-checks `value` and returns its low `bytes * 8` bits.
pub fn fit_unsigned(value: i128, bytes: u32) -> Result<u64, EncodingError> {
    let bits = bytes * 8;
    if value < 0 || value >= (1i128 << bits) {
        Err(EncodingError::ValueOutOfRange { value, bits })
    } else {
        Ok(value as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::InstructionOperand;

    #[test]
    fn parameter_lookup_flattens_capture_lists() {
        let options = InstructionOptions::with_parameter(vec![0xA9], vec![1, 0]);
        let first = InstructionOperand::integer(0x12);
        let second = InstructionOperand::integer(0x34);
        let captures = vec![vec![&first], vec![&second]];
        assert_eq!(parameter_value(&options, &captures, 0), Ok(0x34));
        assert_eq!(parameter_value(&options, &captures, 1), Ok(0x12));
        assert!(matches!(
            parameter_value(&options, &captures, 2),
            Err(EncodingError::MissingParameter(2))
        ));
    }

    #[test]
    fn fit_unsigned_bounds() {
        assert_eq!(fit_unsigned(0xFF, 1), Ok(0xFF));
        assert!(fit_unsigned(0x100, 1).is_err());
        assert!(fit_unsigned(-1, 2).is_err());
        assert_eq!(fit_unsigned(0xFFFF, 2), Ok(0xFFFF));
    }
}
