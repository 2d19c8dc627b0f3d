//! Operand and effective-address resolution.

use crate::api::Bus;
use crate::decoder::Instruction;
use crate::encoding::{AddressingMode, Mnemonic};
use crate::state::{RegisterFile, FLAG_C, FLAG_N, FLAG_V, FLAG_Z};

/// Effective address of a memory-operand instruction.
///
/// `None` for modes that do not address memory. Indexed addresses wrap at
/// 16 bits.
#[must_use]
pub const fn effective_address(instr: &Instruction, regs: &RegisterFile) -> Option<u16> {
    match instr.spec.mode {
        AddressingMode::ZeroPage => Some(instr.operand.byte() as u16),
        AddressingMode::Absolute | AddressingMode::Indirect => Some(instr.operand.word()),
        AddressingMode::AbsoluteX => Some(instr.operand.word().wrapping_add(regs.x() as u16)),
        AddressingMode::Implied
        | AddressingMode::Accumulator
        | AddressingMode::Immediate
        | AddressingMode::Relative => None,
    }
}

/// Source operand value: immediate byte, accumulator or memory read.
pub fn read_operand<B: Bus>(bus: &mut B, instr: &Instruction, regs: &RegisterFile) -> u8 {
    match instr.spec.mode {
        AddressingMode::Immediate => instr.operand.byte(),
        AddressingMode::Accumulator => regs.a(),
        _ => effective_address(instr, regs).map_or(0, |addr| bus.read8(addr)),
    }
}

/// Target of a relative branch whose operand follows `next_pc`.
#[must_use]
pub const fn branch_target(next_pc: u16, offset: u8) -> u16 {
    next_pc.wrapping_add(offset as i8 as u16)
}

/// Condition of a conditional branch; `None` for anything else.
#[must_use]
pub const fn branch_condition(mnemonic: Mnemonic, regs: &RegisterFile) -> Option<bool> {
    let taken = match mnemonic {
        Mnemonic::Bpl => !regs.flag_is_set(FLAG_N),
        Mnemonic::Bmi => regs.flag_is_set(FLAG_N),
        Mnemonic::Bvc => !regs.flag_is_set(FLAG_V),
        Mnemonic::Bvs => regs.flag_is_set(FLAG_V),
        Mnemonic::Bcc => !regs.flag_is_set(FLAG_C),
        Mnemonic::Bcs => regs.flag_is_set(FLAG_C),
        Mnemonic::Bne => !regs.flag_is_set(FLAG_Z),
        Mnemonic::Beq => regs.flag_is_set(FLAG_Z),
        _ => return None,
    };
    Some(taken)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{branch_condition, branch_target, effective_address};
    use crate::decoder::{Decoded, Decoder};
    use crate::encoding::Mnemonic;
    use crate::state::{RegisterFile, FLAG_C, FLAG_Z};

    fn decode(bytes: &[u8]) -> crate::decoder::Instruction {
        match Decoder::decode_slice(bytes) {
            Decoded::Valid(instr) => instr,
            Decoded::Invalid { opcode, .. } => panic!("invalid opcode {opcode:#04x}"),
        }
    }

    #[test]
    fn indexed_address_wraps_at_sixteen_bits() {
        let mut regs = RegisterFile::default();
        regs.set_x(0x10);
        let instr = decode(&[0xBD, 0xF8, 0xFF]);
        assert_eq!(effective_address(&instr, &regs), Some(0x0008));
    }

    #[test]
    fn zero_page_and_immediate_modes() {
        let regs = RegisterFile::default();
        assert_eq!(effective_address(&decode(&[0xA5, 0x42]), &regs), Some(0x0042));
        assert_eq!(effective_address(&decode(&[0xA9, 0x42]), &regs), None);
    }

    #[rstest]
    #[case(0x1000, 0x05, 0x1005)]
    #[case(0x1000, 0xFE, 0x0FFE)]
    #[case(0xFFFF, 0x02, 0x0001)]
    fn branch_offsets_are_signed(#[case] next_pc: u16, #[case] offset: u8, #[case] target: u16) {
        assert_eq!(branch_target(next_pc, offset), target);
    }

    #[test]
    fn branch_conditions_read_flags() {
        let mut regs = RegisterFile::default();
        regs.set_flag(FLAG_Z, true);
        regs.set_flag(FLAG_C, false);
        assert_eq!(branch_condition(Mnemonic::Beq, &regs), Some(true));
        assert_eq!(branch_condition(Mnemonic::Bne, &regs), Some(false));
        assert_eq!(branch_condition(Mnemonic::Bcs, &regs), Some(false));
        assert_eq!(branch_condition(Mnemonic::Lda, &regs), None);
    }
}
