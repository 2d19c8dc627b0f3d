//! Instruction disassembly.
//!
//! Bytes are pulled through a caller-supplied peek function so that listing
//! memory never triggers device side effects.

use std::fmt;

use crate::decoder::{encode, Decoded, Decoder, Instruction};
use crate::encoding::{AddressingMode, OpcodeTable, PREFIX_EXT};
use crate::execute::branch_target;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single disassembled instruction row.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DisassemblyRow {
    /// Address of the first byte.
    pub addr: u16,
    /// Raw bytes, prefix included.
    pub bytes: Vec<u8>,
    /// Mnemonic, or `.byte` for an unassigned opcode.
    pub mnemonic: String,
    /// Formatted operand (e.g. `#$10`, `$1234,X`, `$8004`).
    pub operands: String,
    /// Whether the opcode is unassigned.
    pub is_illegal: bool,
}

impl fmt::Display for DisassemblyRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw: Vec<String> = self.bytes.iter().map(|b| format!("{b:02X}")).collect();
        write!(f, "{:04X}  {:<12} {}", self.addr, raw.join(" "), self.mnemonic)?;
        if !self.operands.is_empty() {
            write!(f, " {}", self.operands)?;
        }
        Ok(())
    }
}

fn format_operands(addr: u16, instr: &Instruction) -> String {
    let operand = instr.operand;
    match instr.spec.mode {
        AddressingMode::Implied => String::new(),
        AddressingMode::Accumulator => {
            if instr.spec.table == OpcodeTable::Ext {
                String::new()
            } else {
                "A".to_owned()
            }
        }
        AddressingMode::Immediate => format!("#${:02X}", operand.byte()),
        AddressingMode::ZeroPage => format!("${:02X}", operand.byte()),
        AddressingMode::Absolute => format!("${:04X}", operand.word()),
        AddressingMode::AbsoluteX => format!("${:04X},X", operand.word()),
        AddressingMode::Indirect => format!("(${:04X})", operand.word()),
        AddressingMode::Relative => {
            let next_pc = addr.wrapping_add(u16::from(instr.width()));
            format!("${:04X}", branch_target(next_pc, operand.byte()))
        }
    }
}

/// Disassembles the instruction at `addr`.
pub fn disassemble_one(addr: u16, mut peek: impl FnMut(u16) -> u8) -> DisassemblyRow {
    let mut cursor = addr;
    let decoded = Decoder::decode_with(|| {
        let byte = peek(cursor);
        cursor = cursor.wrapping_add(1);
        byte
    });

    match decoded {
        Decoded::Valid(instr) => DisassemblyRow {
            addr,
            bytes: encode(&instr),
            mnemonic: instr.spec.mnemonic.name().to_owned(),
            operands: format_operands(addr, &instr),
            is_illegal: false,
        },
        Decoded::Invalid { table, opcode } => {
            let bytes = match table {
                OpcodeTable::Primary => vec![opcode],
                OpcodeTable::Ext => vec![PREFIX_EXT, opcode],
            };
            let operands = bytes
                .iter()
                .map(|b| format!("${b:02X}"))
                .collect::<Vec<_>>()
                .join(",");
            DisassemblyRow {
                addr,
                bytes,
                mnemonic: ".byte".to_owned(),
                operands,
                is_illegal: true,
            }
        }
    }
}

/// Disassembles `count` consecutive instructions starting at `start`.
pub fn disassemble(start: u16, count: usize, mut peek: impl FnMut(u16) -> u8) -> Vec<DisassemblyRow> {
    let mut rows = Vec::with_capacity(count);
    let mut addr = start;
    for _ in 0..count {
        let row = disassemble_one(addr, &mut peek);
        addr = addr.wrapping_add(u16::try_from(row.bytes.len()).unwrap_or(1));
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{disassemble, disassemble_one};

    fn peek_from(bytes: &'static [u8], origin: u16) -> impl FnMut(u16) -> u8 {
        move |addr| {
            bytes
                .get(usize::from(addr.wrapping_sub(origin)))
                .copied()
                .unwrap_or(0xEA)
        }
    }

    #[rstest]
    #[case(&[0xA9, 0x10], "LDA", "#$10")]
    #[case(&[0xBD, 0x00, 0x20], "LDA", "$2000,X")]
    #[case(&[0x6C, 0xFC, 0xFF], "JMP", "($FFFC)")]
    #[case(&[0x0A], "ASL", "A")]
    #[case(&[0x42, 0x1A], "INA", "")]
    #[case(&[0x42, 0x53, 0x02], "TAM", "#$02")]
    #[case(&[0xD0, 0xFE], "BNE", "$8000")]
    fn formats_each_addressing_mode(
        #[case] bytes: &'static [u8],
        #[case] mnemonic: &str,
        #[case] operands: &str,
    ) {
        let row = disassemble_one(0x8000, peek_from(bytes, 0x8000));
        assert_eq!(row.mnemonic, mnemonic);
        assert_eq!(row.operands, operands);
        assert_eq!(row.bytes, bytes);
        assert!(!row.is_illegal);
    }

    #[test]
    fn unassigned_opcodes_render_as_bytes() {
        let row = disassemble_one(0x8000, peek_from(&[0x42, 0xEE], 0x8000));
        assert!(row.is_illegal);
        assert_eq!(row.mnemonic, ".byte");
        assert_eq!(row.operands, "$42,$EE");
    }

    #[test]
    fn listing_advances_by_instruction_width() {
        let rows = disassemble(0x8000, 3, peek_from(&[0xA9, 0x01, 0x8D, 0x00, 0x02, 0xCB], 0x8000));
        let addrs: Vec<u16> = rows.iter().map(|row| row.addr).collect();
        assert_eq!(addrs, vec![0x8000, 0x8002, 0x8005]);
        assert_eq!(rows[2].to_string(), "8005  CB           WAI");
    }
}
