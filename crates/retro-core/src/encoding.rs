//! Opcode table for the reference 8-bit core.
//!
//! The table is data: a machine with a different instruction set swaps this
//! file and the executor arms, the fetch/decode/charge harness stays the same.
//! Two dispatch tables exist, the primary table and the table selected by the
//! [`PREFIX_EXT`] escape byte.

use crate::timing::CycleCost;

/// Escape byte selecting the extended opcode table.
pub const PREFIX_EXT: u8 = 0x42;

/// Dispatch table an opcode lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OpcodeTable {
    /// Single opcode byte.
    Primary,
    /// Opcode byte preceded by [`PREFIX_EXT`].
    Ext,
}

impl OpcodeTable {
    /// Prefix bytes consumed before the opcode byte.
    #[must_use]
    pub const fn prefix_bytes(self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Ext => 1,
        }
    }
}

/// Operand addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AddressingMode {
    /// No operand.
    Implied,
    /// Operates on `A`, no operand bytes.
    Accumulator,
    /// One literal byte.
    Immediate,
    /// One byte addressing `0x0000..=0x00FF`.
    ZeroPage,
    /// Little-endian 16-bit address.
    Absolute,
    /// Little-endian 16-bit address plus `X`.
    AbsoluteX,
    /// Little-endian 16-bit pointer to a 16-bit target.
    Indirect,
    /// Signed 8-bit displacement from the next instruction.
    Relative,
}

impl AddressingMode {
    /// Number of operand bytes following the opcode.
    #[must_use]
    pub const fn operand_bytes(self) -> u8 {
        match self {
            Self::Implied | Self::Accumulator => 0,
            Self::Immediate | Self::ZeroPage | Self::Relative => 1,
            Self::Absolute | Self::AbsoluteX | Self::Indirect => 2,
        }
    }
}

/// Instruction mnemonics of the reference core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(missing_docs)]
pub enum Mnemonic {
    Nop,
    Lda,
    Ldx,
    Ldy,
    Sta,
    Stx,
    Sty,
    Stz,
    Tax,
    Txa,
    Tay,
    Tya,
    Tsx,
    Txs,
    Adc,
    Sbc,
    And,
    Ora,
    Eor,
    Cmp,
    Cpx,
    Cpy,
    Inx,
    Iny,
    Dex,
    Dey,
    Inc,
    Dec,
    Ina,
    Dea,
    Asl,
    Lsr,
    Clc,
    Sec,
    Cli,
    Sei,
    Clv,
    Cld,
    Sed,
    Pha,
    Pla,
    Php,
    Plp,
    Jmp,
    Jsr,
    Rts,
    Rti,
    Brk,
    Bra,
    Bpl,
    Bmi,
    Bvc,
    Bvs,
    Bcc,
    Bcs,
    Bne,
    Beq,
    Wai,
    Stp,
    Tam,
    Tma,
}

impl Mnemonic {
    /// Assembly spelling used by the disassembler.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Lda => "LDA",
            Self::Ldx => "LDX",
            Self::Ldy => "LDY",
            Self::Sta => "STA",
            Self::Stx => "STX",
            Self::Sty => "STY",
            Self::Stz => "STZ",
            Self::Tax => "TAX",
            Self::Txa => "TXA",
            Self::Tay => "TAY",
            Self::Tya => "TYA",
            Self::Tsx => "TSX",
            Self::Txs => "TXS",
            Self::Adc => "ADC",
            Self::Sbc => "SBC",
            Self::And => "AND",
            Self::Ora => "ORA",
            Self::Eor => "EOR",
            Self::Cmp => "CMP",
            Self::Cpx => "CPX",
            Self::Cpy => "CPY",
            Self::Inx => "INX",
            Self::Iny => "INY",
            Self::Dex => "DEX",
            Self::Dey => "DEY",
            Self::Inc => "INC",
            Self::Dec => "DEC",
            Self::Ina => "INA",
            Self::Dea => "DEA",
            Self::Asl => "ASL",
            Self::Lsr => "LSR",
            Self::Clc => "CLC",
            Self::Sec => "SEC",
            Self::Cli => "CLI",
            Self::Sei => "SEI",
            Self::Clv => "CLV",
            Self::Cld => "CLD",
            Self::Sed => "SED",
            Self::Pha => "PHA",
            Self::Pla => "PLA",
            Self::Php => "PHP",
            Self::Plp => "PLP",
            Self::Jmp => "JMP",
            Self::Jsr => "JSR",
            Self::Rts => "RTS",
            Self::Rti => "RTI",
            Self::Brk => "BRK",
            Self::Bra => "BRA",
            Self::Bpl => "BPL",
            Self::Bmi => "BMI",
            Self::Bvc => "BVC",
            Self::Bvs => "BVS",
            Self::Bcc => "BCC",
            Self::Bcs => "BCS",
            Self::Bne => "BNE",
            Self::Beq => "BEQ",
            Self::Wai => "WAI",
            Self::Stp => "STP",
            Self::Tam => "TAM",
            Self::Tma => "TMA",
        }
    }
}

/// One assigned opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpcodeSpec {
    /// Table the opcode byte is looked up in.
    pub table: OpcodeTable,
    /// Opcode byte.
    pub opcode: u8,
    /// Operation.
    pub mnemonic: Mnemonic,
    /// Operand form.
    pub mode: AddressingMode,
    /// Documented cost including any prefix byte.
    pub cost: CycleCost,
}

impl OpcodeSpec {
    /// Encoded width in bytes including prefix and operands.
    #[must_use]
    pub const fn width(&self) -> u8 {
        self.table.prefix_bytes() + 1 + self.mode.operand_bytes()
    }
}

const fn op(opcode: u8, mnemonic: Mnemonic, mode: AddressingMode, cycles: u8) -> OpcodeSpec {
    OpcodeSpec {
        table: OpcodeTable::Primary,
        opcode,
        mnemonic,
        mode,
        cost: CycleCost::Fixed(cycles),
    }
}

const fn branch(opcode: u8, mnemonic: Mnemonic) -> OpcodeSpec {
    OpcodeSpec {
        table: OpcodeTable::Primary,
        opcode,
        mnemonic,
        mode: AddressingMode::Relative,
        cost: CycleCost::Branch {
            not_taken: 2,
            taken: 3,
        },
    }
}

const fn ext(opcode: u8, mnemonic: Mnemonic, mode: AddressingMode, cycles: u8) -> OpcodeSpec {
    OpcodeSpec {
        table: OpcodeTable::Ext,
        opcode,
        mnemonic,
        mode,
        cost: CycleCost::Fixed(cycles),
    }
}

use AddressingMode::{
    Absolute, AbsoluteX, Accumulator, Immediate, Implied, Indirect, Relative, ZeroPage,
};

/// Single source-of-truth opcode table.
///
/// Any `(table, opcode)` pair not present here is an invalid opcode.
pub const OPCODE_TABLE: &[OpcodeSpec] = &[
    op(0xEA, Mnemonic::Nop, Implied, 2),
    op(0xA9, Mnemonic::Lda, Immediate, 2),
    op(0xA5, Mnemonic::Lda, ZeroPage, 3),
    op(0xAD, Mnemonic::Lda, Absolute, 4),
    op(0xBD, Mnemonic::Lda, AbsoluteX, 4),
    op(0xA2, Mnemonic::Ldx, Immediate, 2),
    op(0xA6, Mnemonic::Ldx, ZeroPage, 3),
    op(0xAE, Mnemonic::Ldx, Absolute, 4),
    op(0xA0, Mnemonic::Ldy, Immediate, 2),
    op(0xA4, Mnemonic::Ldy, ZeroPage, 3),
    op(0xAC, Mnemonic::Ldy, Absolute, 4),
    op(0x85, Mnemonic::Sta, ZeroPage, 3),
    op(0x8D, Mnemonic::Sta, Absolute, 4),
    op(0x9D, Mnemonic::Sta, AbsoluteX, 5),
    op(0x86, Mnemonic::Stx, ZeroPage, 3),
    op(0x8E, Mnemonic::Stx, Absolute, 4),
    op(0x84, Mnemonic::Sty, ZeroPage, 3),
    op(0x8C, Mnemonic::Sty, Absolute, 4),
    op(0xAA, Mnemonic::Tax, Implied, 2),
    op(0x8A, Mnemonic::Txa, Implied, 2),
    op(0xA8, Mnemonic::Tay, Implied, 2),
    op(0x98, Mnemonic::Tya, Implied, 2),
    op(0xBA, Mnemonic::Tsx, Implied, 2),
    op(0x9A, Mnemonic::Txs, Implied, 2),
    op(0x69, Mnemonic::Adc, Immediate, 2),
    op(0x65, Mnemonic::Adc, ZeroPage, 3),
    op(0x6D, Mnemonic::Adc, Absolute, 4),
    op(0xE9, Mnemonic::Sbc, Immediate, 2),
    op(0xE5, Mnemonic::Sbc, ZeroPage, 3),
    op(0xED, Mnemonic::Sbc, Absolute, 4),
    op(0x29, Mnemonic::And, Immediate, 2),
    op(0x09, Mnemonic::Ora, Immediate, 2),
    op(0x49, Mnemonic::Eor, Immediate, 2),
    op(0xC9, Mnemonic::Cmp, Immediate, 2),
    op(0xC5, Mnemonic::Cmp, ZeroPage, 3),
    op(0xCD, Mnemonic::Cmp, Absolute, 4),
    op(0xE0, Mnemonic::Cpx, Immediate, 2),
    op(0xC0, Mnemonic::Cpy, Immediate, 2),
    op(0xE8, Mnemonic::Inx, Implied, 2),
    op(0xC8, Mnemonic::Iny, Implied, 2),
    op(0xCA, Mnemonic::Dex, Implied, 2),
    op(0x88, Mnemonic::Dey, Implied, 2),
    op(0xE6, Mnemonic::Inc, ZeroPage, 5),
    op(0xEE, Mnemonic::Inc, Absolute, 6),
    op(0xC6, Mnemonic::Dec, ZeroPage, 5),
    op(0xCE, Mnemonic::Dec, Absolute, 6),
    op(0x0A, Mnemonic::Asl, Accumulator, 2),
    op(0x4A, Mnemonic::Lsr, Accumulator, 2),
    op(0x18, Mnemonic::Clc, Implied, 2),
    op(0x38, Mnemonic::Sec, Implied, 2),
    op(0x58, Mnemonic::Cli, Implied, 2),
    op(0x78, Mnemonic::Sei, Implied, 2),
    op(0xB8, Mnemonic::Clv, Implied, 2),
    op(0xD8, Mnemonic::Cld, Implied, 2),
    op(0xF8, Mnemonic::Sed, Implied, 2),
    op(0x48, Mnemonic::Pha, Implied, 3),
    op(0x68, Mnemonic::Pla, Implied, 4),
    op(0x08, Mnemonic::Php, Implied, 3),
    op(0x28, Mnemonic::Plp, Implied, 4),
    op(0x4C, Mnemonic::Jmp, Absolute, 3),
    op(0x6C, Mnemonic::Jmp, Indirect, 5),
    op(0x20, Mnemonic::Jsr, Absolute, 6),
    op(0x60, Mnemonic::Rts, Implied, 6),
    op(0x40, Mnemonic::Rti, Implied, 6),
    // BRK carries a signature byte that the handler may inspect.
    op(0x00, Mnemonic::Brk, Immediate, 7),
    op(0x80, Mnemonic::Bra, Relative, 3),
    branch(0x10, Mnemonic::Bpl),
    branch(0x30, Mnemonic::Bmi),
    branch(0x50, Mnemonic::Bvc),
    branch(0x70, Mnemonic::Bvs),
    branch(0x90, Mnemonic::Bcc),
    branch(0xB0, Mnemonic::Bcs),
    branch(0xD0, Mnemonic::Bne),
    branch(0xF0, Mnemonic::Beq),
    op(0xCB, Mnemonic::Wai, Implied, 3),
    op(0xDB, Mnemonic::Stp, Implied, 3),
    ext(0x1A, Mnemonic::Ina, Accumulator, 3),
    ext(0x3A, Mnemonic::Dea, Accumulator, 3),
    ext(0x64, Mnemonic::Stz, ZeroPage, 4),
    ext(0x9C, Mnemonic::Stz, Absolute, 5),
    ext(0x53, Mnemonic::Tam, Immediate, 6),
    ext(0x43, Mnemonic::Tma, Immediate, 5),
];

const fn build_lookup(table: OpcodeTable) -> [Option<u8>; 256] {
    let mut lookup = [None; 256];
    let mut index = 0;
    while index < OPCODE_TABLE.len() {
        let spec = OPCODE_TABLE[index];
        if spec.table as u8 == table as u8 {
            assert!(
                lookup[spec.opcode as usize].is_none(),
                "duplicate opcode in table"
            );
            lookup[spec.opcode as usize] = Some(index as u8);
        }
        index += 1;
    }
    lookup
}

const PRIMARY_LOOKUP: [Option<u8>; 256] = build_lookup(OpcodeTable::Primary);
const EXT_LOOKUP: [Option<u8>; 256] = build_lookup(OpcodeTable::Ext);

const _: () = assert!(OPCODE_TABLE.len() <= 256, "opcode index must fit in u8");
const _: () = assert!(
    PRIMARY_LOOKUP[PREFIX_EXT as usize].is_none(),
    "prefix byte cannot also be a primary opcode"
);

/// Returns `true` when `byte` escapes into a secondary table.
#[must_use]
pub const fn is_prefix(byte: u8) -> bool {
    byte == PREFIX_EXT
}

/// O(1) opcode lookup.
///
/// `None` means invalid opcode.
#[must_use]
pub fn lookup(table: OpcodeTable, opcode: u8) -> Option<&'static OpcodeSpec> {
    let index = match table {
        OpcodeTable::Primary => PRIMARY_LOOKUP[usize::from(opcode)],
        OpcodeTable::Ext => EXT_LOOKUP[usize::from(opcode)],
    }?;
    OPCODE_TABLE.get(usize::from(index))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{
        is_prefix, lookup, AddressingMode, Mnemonic, OpcodeTable, OPCODE_TABLE, PREFIX_EXT,
    };
    use crate::timing::CycleCost;

    #[test]
    fn table_contains_unique_table_opcode_pairs() {
        let pairs: HashSet<_> = OPCODE_TABLE
            .iter()
            .map(|spec| (spec.table, spec.opcode))
            .collect();
        assert_eq!(pairs.len(), OPCODE_TABLE.len());
    }

    #[test]
    fn every_table_entry_resolves_via_lookup() {
        for spec in OPCODE_TABLE {
            assert_eq!(lookup(spec.table, spec.opcode), Some(spec));
        }
    }

    #[test]
    fn prefix_byte_is_not_a_primary_opcode() {
        assert!(is_prefix(PREFIX_EXT));
        assert!(lookup(OpcodeTable::Primary, PREFIX_EXT).is_none());
    }

    #[test]
    fn unassigned_opcodes_are_invalid() {
        assert!(lookup(OpcodeTable::Primary, 0x02).is_none());
        assert!(lookup(OpcodeTable::Primary, 0xFF).is_none());
        assert!(lookup(OpcodeTable::Ext, 0xEA).is_none());
    }

    #[test]
    fn conditional_branches_have_two_costs_and_everything_else_one() {
        for spec in OPCODE_TABLE {
            let conditional = matches!(
                spec.mnemonic,
                Mnemonic::Bpl
                    | Mnemonic::Bmi
                    | Mnemonic::Bvc
                    | Mnemonic::Bvs
                    | Mnemonic::Bcc
                    | Mnemonic::Bcs
                    | Mnemonic::Bne
                    | Mnemonic::Beq
            );
            assert_eq!(
                matches!(spec.cost, CycleCost::Branch { .. }),
                conditional,
                "{:?}",
                spec.mnemonic
            );
        }
    }

    #[test]
    fn widths_include_prefix_and_operands() {
        let lda_abs = lookup(OpcodeTable::Primary, 0xAD).expect("LDA abs");
        assert_eq!(lda_abs.mode, AddressingMode::Absolute);
        assert_eq!(lda_abs.width(), 3);

        let stz_abs = lookup(OpcodeTable::Ext, 0x9C).expect("STZ abs");
        assert_eq!(stz_abs.width(), 4);

        let nop = lookup(OpcodeTable::Primary, 0xEA).expect("NOP");
        assert_eq!(nop.width(), 1);
    }
}
