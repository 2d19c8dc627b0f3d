/// `P` bit for carry/borrow.
pub const FLAG_C: u8 = 1 << 0;
/// `P` bit for zero result.
pub const FLAG_Z: u8 = 1 << 1;
/// `P` bit masking maskable interrupt sources.
pub const FLAG_I: u8 = 1 << 2;
/// `P` bit for the decimal latch (stored, arithmetic stays binary).
pub const FLAG_D: u8 = 1 << 3;
/// `P` bit distinguishing `BRK` from hardware entry in a pushed copy.
pub const FLAG_B: u8 = 1 << 4;
/// Unused `P` bit; always set in pushed copies.
pub const FLAG_UNUSED: u8 = 1 << 5;
/// `P` bit for signed overflow.
pub const FLAG_V: u8 = 1 << 6;
/// `P` bit for negative (sign) result.
pub const FLAG_N: u8 = 1 << 7;
/// Bits that live in the `P` register itself (`B` and bit 5 exist only on the stack).
pub const FLAGS_ACTIVE_MASK: u8 = FLAG_C | FLAG_Z | FLAG_I | FLAG_D | FLAG_V | FLAG_N;

/// Base address of the hardware stack page.
pub const STACK_BASE: u16 = 0x0100;
/// Stack pointer value after reset.
pub const SP_RESET: u8 = 0xFD;

/// Byte length of [`RegisterFile::to_bytes`].
pub const REGISTER_FILE_BYTES: usize = 7;

/// 8-bit data register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Register {
    A,
    X,
    Y,
}

impl Register {
    /// Ordered list of all data registers.
    pub const ALL: [Self; 3] = [Self::A, Self::X, Self::Y];
}

/// Architectural register file of the reference core.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RegisterFile {
    a: u8,
    x: u8,
    y: u8,
    sp: u8,
    p: u8,
    pc: u16,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: SP_RESET,
            p: FLAG_I,
            pc: 0,
        }
    }
}

impl RegisterFile {
    /// Reads a data register.
    #[must_use]
    pub const fn get(&self, reg: Register) -> u8 {
        match reg {
            Register::A => self.a,
            Register::X => self.x,
            Register::Y => self.y,
        }
    }

    /// Writes a data register.
    pub const fn set(&mut self, reg: Register, value: u8) {
        match reg {
            Register::A => self.a = value,
            Register::X => self.x = value,
            Register::Y => self.y = value,
        }
    }

    /// Reads the accumulator.
    #[must_use]
    pub const fn a(&self) -> u8 {
        self.a
    }

    /// Reads `X`.
    #[must_use]
    pub const fn x(&self) -> u8 {
        self.x
    }

    /// Reads `Y`.
    #[must_use]
    pub const fn y(&self) -> u8 {
        self.y
    }

    /// Writes the accumulator.
    pub const fn set_a(&mut self, value: u8) {
        self.a = value;
    }

    /// Writes `X`.
    pub const fn set_x(&mut self, value: u8) {
        self.x = value;
    }

    /// Writes `Y`.
    pub const fn set_y(&mut self, value: u8) {
        self.y = value;
    }

    /// Reads the `PC` register.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.pc
    }

    /// Writes the `PC` register.
    pub const fn set_pc(&mut self, value: u16) {
        self.pc = value;
    }

    /// Reads the `SP` register.
    #[must_use]
    pub const fn sp(&self) -> u8 {
        self.sp
    }

    /// Writes the `SP` register.
    pub const fn set_sp(&mut self, value: u8) {
        self.sp = value;
    }

    /// Reads the `P` register.
    #[must_use]
    pub const fn p(&self) -> u8 {
        self.p
    }

    /// Writes the `P` register; stack-only bits are dropped.
    pub const fn set_p(&mut self, value: u8) {
        self.p = value & FLAGS_ACTIVE_MASK;
    }

    /// Returns `true` when a specific `P` bit is set.
    #[must_use]
    pub const fn flag_is_set(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    /// Sets or clears a specific active `P` bit.
    pub const fn set_flag(&mut self, flag: u8, enabled: bool) {
        if enabled {
            self.p |= flag & FLAGS_ACTIVE_MASK;
        } else {
            self.p &= !(flag & FLAGS_ACTIVE_MASK);
        }
    }

    /// Updates `Z` and `N` from a result byte.
    pub const fn set_nz(&mut self, value: u8) {
        self.set_flag(FLAG_Z, value == 0);
        self.set_flag(FLAG_N, value & 0x80 != 0);
    }

    /// Value of `P` as pushed to the stack.
    #[must_use]
    pub const fn p_for_push(&self, brk: bool) -> u8 {
        let pushed = self.p | FLAG_UNUSED;
        if brk {
            pushed | FLAG_B
        } else {
            pushed
        }
    }

    /// Full stack address for the current `SP`.
    #[must_use]
    pub const fn stack_addr(&self) -> u16 {
        STACK_BASE | self.sp as u16
    }

    /// Fixed little-endian wire layout: `A X Y SP P PCL PCH`.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; REGISTER_FILE_BYTES] {
        let [pcl, pch] = self.pc.to_le_bytes();
        [self.a, self.x, self.y, self.sp, self.p, pcl, pch]
    }

    /// Inverse of [`Self::to_bytes`].
    #[must_use]
    pub const fn from_bytes(bytes: [u8; REGISTER_FILE_BYTES]) -> Self {
        Self {
            a: bytes[0],
            x: bytes[1],
            y: bytes[2],
            sp: bytes[3],
            p: bytes[4] & FLAGS_ACTIVE_MASK,
            pc: u16::from_le_bytes([bytes[5], bytes[6]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Register, RegisterFile, FLAGS_ACTIVE_MASK, FLAG_B, FLAG_C, FLAG_D, FLAG_I, FLAG_N,
        FLAG_UNUSED, FLAG_V, FLAG_Z, SP_RESET,
    };

    #[test]
    fn data_registers_track_each_register_independently() {
        let mut regs = RegisterFile::default();

        for (value, reg) in (0x10_u8..).zip(Register::ALL) {
            regs.set(reg, value);
        }

        assert_eq!(regs.a(), 0x10);
        assert_eq!(regs.x(), 0x11);
        assert_eq!(regs.y(), 0x12);
    }

    #[test]
    fn power_on_defaults_mask_interrupts() {
        let regs = RegisterFile::default();
        assert_eq!(regs.sp(), SP_RESET);
        assert!(regs.flag_is_set(FLAG_I));
        assert_eq!(regs.pc(), 0);
    }

    #[test]
    fn p_only_stores_active_bits() {
        let mut regs = RegisterFile::default();
        regs.set_p(u8::MAX);
        assert_eq!(regs.p(), FLAGS_ACTIVE_MASK);
        assert!(!regs.flag_is_set(FLAG_B));
    }

    #[test]
    fn individual_flags_can_be_set_and_cleared() {
        let mut regs = RegisterFile::default();

        for flag in [FLAG_C, FLAG_Z, FLAG_I, FLAG_D, FLAG_V, FLAG_N] {
            regs.set_flag(flag, true);
            assert!(regs.flag_is_set(flag));
        }

        for flag in [FLAG_C, FLAG_Z, FLAG_I, FLAG_D, FLAG_V, FLAG_N] {
            regs.set_flag(flag, false);
            assert!(!regs.flag_is_set(flag));
        }

        assert_eq!(regs.p(), 0);
    }

    #[test]
    fn pushed_flags_carry_stack_only_bits() {
        let mut regs = RegisterFile::default();
        regs.set_p(FLAG_C);
        assert_eq!(regs.p_for_push(false), FLAG_C | FLAG_UNUSED);
        assert_eq!(regs.p_for_push(true), FLAG_C | FLAG_UNUSED | FLAG_B);
    }

    #[test]
    fn nz_follows_result_byte() {
        let mut regs = RegisterFile::default();
        regs.set_nz(0);
        assert!(regs.flag_is_set(FLAG_Z));
        assert!(!regs.flag_is_set(FLAG_N));
        regs.set_nz(0x80);
        assert!(!regs.flag_is_set(FLAG_Z));
        assert!(regs.flag_is_set(FLAG_N));
    }

    #[test]
    fn wire_layout_roundtrips() {
        let mut regs = RegisterFile::default();
        regs.set(Register::A, 0x12);
        regs.set(Register::X, 0x34);
        regs.set(Register::Y, 0x56);
        regs.set_sp(0x78);
        regs.set_p(FLAG_N | FLAG_C);
        regs.set_pc(0xBEEF);

        let bytes = regs.to_bytes();
        assert_eq!(bytes, [0x12, 0x34, 0x56, 0x78, FLAG_N | FLAG_C, 0xEF, 0xBE]);
        assert_eq!(RegisterFile::from_bytes(bytes), regs);
    }

    #[test]
    fn stack_address_lives_in_page_one() {
        let mut regs = RegisterFile::default();
        regs.set_sp(0x42);
        assert_eq!(regs.stack_addr(), 0x0142);
    }
}
