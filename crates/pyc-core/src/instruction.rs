//! Wordcode decoding and encoding.
//!
//! Since 3.6 every instruction occupies one or more 2-byte code units
//! (`opcode`, `arg`). Arguments wider than a byte are spread over
//! `EXTENDED_ARG` prefixes, which decoding folds into the instruction they
//! precede.

use serde::Serialize;

use crate::error::{CoreError, Result};
use crate::opcode::OpcodeTable;

/// Most `EXTENDED_ARG` prefixes a 32-bit argument needs.
const MAX_PREFIXES: u8 = 3;

/// One logical instruction with its `EXTENDED_ARG` prefixes folded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Instruction {
    /// Byte offset of the first code unit, prefixes included.
    pub offset: usize,
    pub opcode: u8,
    pub arg: u32,
    /// Number of `EXTENDED_ARG` prefixes in the source stream. Encoding
    /// emits at least this many so redundant prefixes survive a round trip.
    pub extended: u8,
}

impl Instruction {
    pub fn new(opcode: u8, arg: u32) -> Self {
        Self {
            offset: 0,
            opcode,
            arg,
            extended: 0,
        }
    }

    /// Prefixes required to carry `arg`.
    pub fn required_prefixes(arg: u32) -> u8 {
        match arg {
            0..=0xff => 0,
            0x100..=0xffff => 1,
            0x1_0000..=0xff_ffff => 2,
            _ => 3,
        }
    }

    /// Code units this instruction occupies.
    pub fn units(&self) -> usize {
        1 + usize::from(Self::required_prefixes(self.arg).max(self.extended).min(MAX_PREFIXES))
    }
}

/// Decode a wordcode stream.
pub fn decode_instructions(bytes: &[u8], table: &OpcodeTable) -> Result<Vec<Instruction>> {
    if bytes.len() % 2 != 0 {
        return Err(CoreError::OddLength(bytes.len()));
    }
    let extended_arg = table.extended_arg();
    let units = bytes.len() / 2;
    let mut out = Vec::with_capacity(units);
    let mut start = 0;
    let mut acc: u32 = 0;
    let mut prefixes: u8 = 0;

    for (index, unit) in bytes.chunks_exact(2).enumerate() {
        let (opcode, arg) = (unit[0], unit[1]);
        let value = (acc << 8) | u32::from(arg);
        if prefixes == 0 {
            start = index * 2;
        }
        let is_last = index + 1 == units;
        if opcode == extended_arg && !is_last && prefixes < MAX_PREFIXES {
            acc = value;
            prefixes += 1;
            continue;
        }
        out.push(Instruction {
            offset: start,
            opcode,
            arg: value,
            extended: prefixes,
        });
        acc = 0;
        prefixes = 0;
    }
    Ok(out)
}

/// Encode instructions back into wordcode. Offsets are ignored.
pub fn encode_instructions(instructions: &[Instruction], table: &OpcodeTable) -> Vec<u8> {
    let extended_arg = table.extended_arg();
    let mut out = Vec::with_capacity(instructions.len() * 2);
    for instruction in instructions {
        let prefixes = Instruction::required_prefixes(instruction.arg)
            .max(instruction.extended)
            .min(MAX_PREFIXES);
        for shift in (1..=prefixes).rev() {
            out.push(extended_arg);
            out.push((instruction.arg >> (8 * u32::from(shift))) as u8);
        }
        out.push(instruction.opcode);
        out.push(instruction.arg as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::PythonVersion;

    fn table() -> OpcodeTable {
        OpcodeTable::builtin(PythonVersion::Py3_12).unwrap()
    }

    #[test]
    fn decode_simple_stream() {
        // RESUME 0; LOAD_CONST 1; RETURN_VALUE
        let bytes = [151, 0, 100, 1, 83, 0];
        let decoded = decode_instructions(&bytes, &table()).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[1].opcode, 100);
        assert_eq!(decoded[1].arg, 1);
        assert_eq!(decoded[2].offset, 4);
    }

    #[test]
    fn extended_arg_folds() {
        // EXTENDED_ARG 1; LOAD_CONST 2  => LOAD_CONST 258
        let bytes = [144, 1, 100, 2];
        let decoded = decode_instructions(&bytes, &table()).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].arg, 258);
        assert_eq!(decoded[0].extended, 1);
        assert_eq!(decoded[0].offset, 0);
        assert_eq!(encode_instructions(&decoded, &table()), bytes);
    }

    #[test]
    fn redundant_prefix_survives() {
        let bytes = [144, 0, 100, 7];
        let decoded = decode_instructions(&bytes, &table()).unwrap();
        assert_eq!(decoded[0].arg, 7);
        assert_eq!(encode_instructions(&decoded, &table()), bytes);
    }

    #[test]
    fn trailing_extended_arg_is_kept() {
        let bytes = [100, 0, 144, 3];
        let decoded = decode_instructions(&bytes, &table()).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[1].opcode, 144);
        assert_eq!(encode_instructions(&decoded, &table()), bytes);
    }

    #[test]
    fn long_prefix_chains_roundtrip() {
        let bytes = [144, 1, 144, 2, 144, 3, 144, 4, 144, 5, 100, 6];
        let decoded = decode_instructions(&bytes, &table()).unwrap();
        assert_eq!(encode_instructions(&decoded, &table()), bytes);
    }

    #[test]
    fn encode_wide_argument() {
        let encoded = encode_instructions(&[Instruction::new(100, 0x0001_0203)], &table());
        assert_eq!(encoded, vec![144, 1, 144, 2, 100, 3]);
        assert_eq!(Instruction::new(100, 0x0001_0203).units(), 3);
    }

    #[test]
    fn odd_length_rejected() {
        assert!(matches!(
            decode_instructions(&[1, 0, 9], &table()),
            Err(CoreError::OddLength(3))
        ));
    }
}
