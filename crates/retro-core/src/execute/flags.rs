//! ALU operations and their status-flag effects.
//!
//! Arithmetic is binary; `D` is stored but never consulted.

use crate::state::{RegisterFile, FLAG_C, FLAG_V};

/// `A + value + C`, setting `N Z C V`.
pub fn adc(regs: &mut RegisterFile, value: u8) {
    let a = regs.a();
    let carry = u16::from(regs.flag_is_set(FLAG_C));
    let sum = u16::from(a) + u16::from(value) + carry;
    let [result, high] = sum.to_le_bytes();
    regs.set_flag(FLAG_C, high != 0);
    regs.set_flag(FLAG_V, (!(a ^ value) & (a ^ result) & 0x80) != 0);
    regs.set_a(result);
    regs.set_nz(result);
}

/// `A - value - !C`, setting `N Z C V`.
pub fn sbc(regs: &mut RegisterFile, value: u8) {
    adc(regs, !value);
}

/// Compares `lhs` with `value`: `C` when `lhs >= value`, `N Z` from the difference.
pub fn compare(regs: &mut RegisterFile, lhs: u8, value: u8) {
    regs.set_flag(FLAG_C, lhs >= value);
    regs.set_nz(lhs.wrapping_sub(value));
}

/// Shift left into `C`, setting `N Z`.
pub fn asl(regs: &mut RegisterFile, value: u8) -> u8 {
    regs.set_flag(FLAG_C, value & 0x80 != 0);
    let result = value << 1;
    regs.set_nz(result);
    result
}

/// Shift right into `C`, setting `N Z`.
pub fn lsr(regs: &mut RegisterFile, value: u8) -> u8 {
    regs.set_flag(FLAG_C, value & 0x01 != 0);
    let result = value >> 1;
    regs.set_nz(result);
    result
}
