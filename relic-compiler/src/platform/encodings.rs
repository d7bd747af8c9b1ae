//! Instruction encodings shared across platforms: fixed opcode strings,
//! little-endian immediates, PC-relative displacements, repeated opcodes
//! for shift-by-constant, and the CB-prefixed bit-index step used by the
//! Game Boy and Z80.
//!
//! Encodings are `static`s so instructions can hold them by reference for
//! the life of the process.

use relic_asm::{
    fit_unsigned, parameter_value, EncodingError, EncodingState, InstructionEncoding,
    InstructionOptions,
};

use relic_asm::CaptureList;

fn opcode_only(
    buffer: &mut Vec<u8>,
    options: &InstructionOptions,
) {
    buffer.extend_from_slice(&options.opcode);
}

/// Opcode bytes only.
pub static IMPLIED: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len(),
    write: |buffer, _, options, _| {
        opcode_only(buffer, options);
        Ok(())
    },
    relative_range: None,
};

/// Opcode bytes repeated `capture` times (shift-by-constant).
pub static REPEATED_IMPLIED: InstructionEncoding = InstructionEncoding {
    size: |options, captures| {
        let count = captures
            .iter()
            .flat_map(|list| list.iter())
            .next()
            .and_then(|operand| operand.as_integer())
            .unwrap_or(0);
        options.opcode.len() * count.max(0) as usize
    },
    write: |buffer, _, options, captures| {
        let count = parameter_value(options, captures, 0)?;
        for _ in 0..count.max(0) {
            opcode_only(buffer, options);
        }
        Ok(())
    },
    relative_range: None,
};

/// Opcode bytes, then one unsigned byte operand.
pub static U8_OPERAND: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len() + 1,
    write: |buffer, _, options, captures| {
        let value = parameter_value(options, captures, 0)?;
        opcode_only(buffer, options);
        buffer.push(fit_unsigned(value, 1)? as u8);
        Ok(())
    },
    relative_range: None,
};

/// Opcode bytes, then a signed byte operand (index displacements).
pub static I8_OPERAND: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len() + 1,
    write: |buffer, _, options, captures| {
        let value = parameter_value(options, captures, 0)?;
        if !(-128..=127).contains(&value) {
            return Err(EncodingError::ValueOutOfRange { value, bits: 8 });
        }
        opcode_only(buffer, options);
        buffer.push(value as i8 as u8);
        Ok(())
    },
    relative_range: None,
};

/// Opcode bytes, then a little-endian 16-bit operand.
pub static U16_OPERAND: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len() + 2,
    write: |buffer, _, options, captures| {
        let value = fit_unsigned(parameter_value(options, captures, 0)?, 2)?;
        opcode_only(buffer, options);
        buffer.extend_from_slice(&(value as u16).to_le_bytes());
        Ok(())
    },
    relative_range: None,
};

/// Opcode bytes, then a little-endian 24-bit operand (65816 long).
pub static U24_OPERAND: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len() + 3,
    write: |buffer, _, options, captures| {
        let value = fit_unsigned(parameter_value(options, captures, 0)?, 3)?;
        opcode_only(buffer, options);
        buffer.push((value & 0xFF) as u8);
        buffer.push(((value >> 8) & 0xFF) as u8);
        buffer.push(((value >> 16) & 0xFF) as u8);
        Ok(())
    },
    relative_range: None,
};

/// Opcode bytes, then two unsigned byte operands in capture order.
pub static U8_U8_OPERANDS: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len() + 2,
    write: |buffer, _, options, captures| {
        let first = fit_unsigned(parameter_value(options, captures, 0)?, 1)? as u8;
        let second = fit_unsigned(parameter_value(options, captures, 1)?, 1)? as u8;
        opcode_only(buffer, options);
        buffer.push(first);
        buffer.push(second);
        Ok(())
    },
    relative_range: None,
};

/// Opcode bytes, then the low byte of a high-page address
/// (`0xFF00..=0xFFFF`, Game Boy `ldh`).
pub static HIGH_PAGE_OPERAND: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len() + 1,
    write: |buffer, _, options, captures| {
        let value = parameter_value(options, captures, 0)?;
        if !(0xFF00..=0xFFFF).contains(&value) {
            return Err(EncodingError::ValueOutOfRange { value, bits: 8 });
        }
        opcode_only(buffer, options);
        buffer.push((value & 0xFF) as u8);
        Ok(())
    },
    relative_range: None,
};

fn relative_displacement(
    state: &EncodingState,
    options: &InstructionOptions,
    captures: &[CaptureList<'_>],
    operand_bytes: usize,
) -> Result<i128, EncodingError> {
    let destination = parameter_value(options, captures, 0)?;
    let base = state
        .absolute_position
        .ok_or(EncodingError::UnknownPosition)? as i128;
    Ok(destination - (base + (options.opcode.len() + operand_bytes) as i128))
}

/// Opcode bytes, then a signed 8-bit PC-relative displacement measured
/// from the end of the instruction.
pub static PC_RELATIVE_I8: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len() + 1,
    write: |buffer, state, options, captures| {
        let distance = relative_displacement(state, options, captures, 1)?;
        if !(-128..=127).contains(&distance) {
            return Err(EncodingError::BranchOutOfRange {
                distance,
                min: -128,
                max: 127,
            });
        }
        opcode_only(buffer, options);
        buffer.push(distance as i8 as u8);
        Ok(())
    },
    relative_range: Some((-128, 127)),
};

/// Opcode bytes, then a signed 16-bit PC-relative displacement (65816
/// `brl`).
pub static PC_RELATIVE_I16: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len() + 2,
    write: |buffer, state, options, captures| {
        let distance = relative_displacement(state, options, captures, 2)?;
        if !(-32768..=32767).contains(&distance) {
            return Err(EncodingError::BranchOutOfRange {
                distance,
                min: -32768,
                max: 32767,
            });
        }
        opcode_only(buffer, options);
        buffer.extend_from_slice(&(distance as i16 as u16).to_le_bytes());
        Ok(())
    },
    relative_range: Some((-32768, 32767)),
};

/// Two opcode bytes where the captured bit index scales the second byte by
/// 8 (Game Boy / Z80 `bit`/`res`/`set` through the CB prefix).
pub static BIT_INDEX_STEP8: InstructionEncoding = InstructionEncoding {
    size: |options, _| options.opcode.len(),
    write: |buffer, _, options, captures| {
        let bit = parameter_value(options, captures, 0)?;
        if !(0..8).contains(&bit) {
            return Err(EncodingError::ValueOutOfRange { value: bit, bits: 3 });
        }
        let last = options.opcode.len() - 1;
        buffer.extend_from_slice(&options.opcode[..last]);
        buffer.push(options.opcode[last] + (bit as u8) * 8);
        Ok(())
    },
    relative_range: None,
};

#[cfg(test)]
mod tests {
    use relic_asm::InstructionOperand;

    use super::*;

    fn write(
        encoding: &InstructionEncoding,
        opcode: Vec<u8>,
        parameter: Vec<usize>,
        captures: Vec<i128>,
        absolute: Option<usize>,
    ) -> Result<Vec<u8>, EncodingError> {
        let options = InstructionOptions::with_parameter(opcode, parameter);
        let operands: Vec<InstructionOperand> = captures
            .into_iter()
            .map(InstructionOperand::integer)
            .collect();
        let lists: Vec<CaptureList<'_>> = vec![operands.iter().collect()];
        let state = EncodingState {
            relative_position: 0,
            absolute_position: absolute,
        };
        let mut buffer = Vec::new();
        (encoding.write)(&mut buffer, &state, &options, &lists)?;
        Ok(buffer)
    }

    #[test]
    fn immediate_bytes_are_little_endian() {
        assert_eq!(
            write(&U16_OPERAND, vec![0xAD], vec![0], vec![0x1234], None).unwrap(),
            vec![0xAD, 0x34, 0x12]
        );
        assert_eq!(
            write(&U24_OPERAND, vec![0xAF], vec![0], vec![0x123456], None).unwrap(),
            vec![0xAF, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn relative_branch_measures_from_instruction_end() {
        // beq from 0x8000 to 0x8010: displacement = 0x8010 - 0x8002 = 0x0E.
        assert_eq!(
            write(&PC_RELATIVE_I8, vec![0xF0], vec![0], vec![0x8010], Some(0x8000)).unwrap(),
            vec![0xF0, 0x0E]
        );
        // Backward branch to itself: -2.
        assert_eq!(
            write(&PC_RELATIVE_I8, vec![0xF0], vec![0], vec![0x8000], Some(0x8000)).unwrap(),
            vec![0xF0, 0xFE]
        );
        assert!(matches!(
            write(&PC_RELATIVE_I8, vec![0xF0], vec![0], vec![0x9000], Some(0x8000)),
            Err(EncodingError::BranchOutOfRange { .. })
        ));
    }

    #[test]
    fn repeated_opcode_scales_with_count() {
        let options = InstructionOptions::with_parameter(vec![0x0A], vec![0]);
        let operand = InstructionOperand::integer(3);
        let lists: Vec<CaptureList<'_>> = vec![vec![&operand]];
        assert_eq!((REPEATED_IMPLIED.size)(&options, &lists), 3);
        assert_eq!(
            write(&REPEATED_IMPLIED, vec![0x0A], vec![0], vec![3], None).unwrap(),
            vec![0x0A, 0x0A, 0x0A]
        );
    }

    #[test]
    fn bit_index_scales_second_opcode_byte() {
        // set 3, a = CB C7 + 3*8 = CB DF.
        assert_eq!(
            write(&BIT_INDEX_STEP8, vec![0xCB, 0xC7], vec![0], vec![3], None).unwrap(),
            vec![0xCB, 0xDF]
        );
    }

    #[test]
    fn high_page_operand_keeps_low_byte() {
        assert_eq!(
            write(&HIGH_PAGE_OPERAND, vec![0xF0], vec![0], vec![0xFF44], None).unwrap(),
            vec![0xF0, 0x44]
        );
        assert!(write(&HIGH_PAGE_OPERAND, vec![0xF0], vec![0], vec![0x8000], None).is_err());
    }
}
