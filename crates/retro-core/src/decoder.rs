//! Instruction decoder and fixture encoder for the reference core.
//!
//! Decoding pulls bytes through a caller-supplied fetch closure so the same
//! code serves the live bus (with side effects) and side-effect-free peeks for
//! the disassembler.

use crate::encoding::{is_prefix, lookup, AddressingMode, OpcodeSpec, OpcodeTable};
use crate::timing::{cycle_cost, CycleCostKind};

/// Operand bytes following an opcode, already assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// No operand bytes.
    None,
    /// One operand byte (immediate, zero page, relative).
    Byte(u8),
    /// Two operand bytes assembled little-endian.
    Word(u16),
}

impl Operand {
    /// Operand as a byte; words are truncated.
    #[must_use]
    pub const fn byte(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Byte(value) => value,
            Self::Word(value) => value as u8,
        }
    }

    /// Operand as a word; bytes are zero-extended.
    #[must_use]
    pub const fn word(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Byte(value) => value as u16,
            Self::Word(value) => value,
        }
    }
}

/// A decoded, assigned instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    /// Table entry describing the operation.
    pub spec: &'static OpcodeSpec,
    /// Operand bytes.
    pub operand: Operand,
}

impl Instruction {
    /// Encoded width in bytes.
    #[must_use]
    pub const fn width(&self) -> u8 {
        self.spec.width()
    }
}

/// Result of decoding the bytes at one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decoded {
    /// Assigned instruction.
    Valid(Instruction),
    /// Unassigned opcode; executes as the documented no-op.
    Invalid {
        /// Table the opcode byte was looked up in.
        table: OpcodeTable,
        /// Unassigned opcode byte.
        opcode: u8,
    },
}

impl Decoded {
    /// Bytes consumed by this decode.
    #[must_use]
    pub const fn width(&self) -> u8 {
        match self {
            Self::Valid(instr) => instr.width(),
            Self::Invalid { table, .. } => table.prefix_bytes() + 1,
        }
    }

    /// Cost charged when the instruction does not transfer control.
    #[must_use]
    pub fn base_cycles(&self) -> u8 {
        match self {
            Self::Valid(instr) => instr.spec.cost.base(),
            Self::Invalid { table, .. } => invalid_opcode_cycles(*table),
        }
    }
}

/// Documented cost of an unassigned opcode in `table`.
#[must_use]
pub fn invalid_opcode_cycles(table: OpcodeTable) -> u8 {
    let kind = match table {
        OpcodeTable::Primary => CycleCostKind::InvalidOpcode,
        OpcodeTable::Ext => CycleCostKind::InvalidPrefixedOpcode,
    };
    cycle_cost(kind).unwrap_or(2)
}

/// Stateless instruction decoder.
pub struct Decoder;

impl Decoder {
    /// Decodes one instruction, pulling bytes in program order from `fetch`.
    ///
    /// Exactly [`Decoded::width`] bytes are pulled.
    pub fn decode_with(mut fetch: impl FnMut() -> u8) -> Decoded {
        let first = fetch();
        let (table, opcode) = if is_prefix(first) {
            (OpcodeTable::Ext, fetch())
        } else {
            (OpcodeTable::Primary, first)
        };

        let Some(spec) = lookup(table, opcode) else {
            return Decoded::Invalid { table, opcode };
        };

        let operand = match spec.mode.operand_bytes() {
            0 => Operand::None,
            1 => Operand::Byte(fetch()),
            _ => {
                let lo = fetch();
                let hi = fetch();
                Operand::Word(u16::from_le_bytes([lo, hi]))
            }
        };

        Decoded::Valid(Instruction { spec, operand })
    }

    /// Decodes from a byte slice; missing trailing bytes read as zero.
    #[must_use]
    pub fn decode_slice(bytes: &[u8]) -> Decoded {
        let mut iter = bytes.iter().copied();
        Self::decode_with(|| iter.next().unwrap_or(0))
    }
}

/// Encodes an instruction into the exact byte sequence the decoder accepts.
///
/// Used to build test fixtures and by the disassembler's raw-byte column.
#[must_use]
pub fn encode(instr: &Instruction) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(usize::from(instr.width()));
    if instr.spec.table == OpcodeTable::Ext {
        bytes.push(crate::encoding::PREFIX_EXT);
    }
    bytes.push(instr.spec.opcode);
    match instr.spec.mode {
        AddressingMode::Implied | AddressingMode::Accumulator => {}
        AddressingMode::Immediate | AddressingMode::ZeroPage | AddressingMode::Relative => {
            bytes.push(instr.operand.byte());
        }
        AddressingMode::Absolute | AddressingMode::AbsoluteX | AddressingMode::Indirect => {
            bytes.extend_from_slice(&instr.operand.word().to_le_bytes());
        }
    }
    bytes
}

/// Builds an instruction for `spec` with an operand of the right shape.
#[must_use]
pub const fn instruction(spec: &'static OpcodeSpec, operand: u16) -> Instruction {
    let operand = match spec.mode.operand_bytes() {
        0 => Operand::None,
        1 => Operand::Byte(operand as u8),
        _ => Operand::Word(operand),
    };
    Instruction { spec, operand }
}
