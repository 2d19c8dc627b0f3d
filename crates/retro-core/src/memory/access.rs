//! Open-bus policy, access counters and byte-by-byte multi-byte helpers.

use crate::api::Bus;

/// Value returned by reads that nothing answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OpenBusPolicy {
    /// Last value seen on the data bus (read or written).
    #[default]
    LastValue,
    /// A fixed pull-up/pull-down pattern.
    Fixed(u8),
}

impl OpenBusPolicy {
    /// Resolves the open-bus value given the current data-bus latch.
    #[must_use]
    pub const fn value(self, latch: u8) -> u8 {
        match self {
            Self::LastValue => latch,
            Self::Fixed(pattern) => pattern,
        }
    }
}

/// Slow-path access counters. Not part of save states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BusStats {
    /// Reads that hit an unmapped bank.
    pub unmapped_reads: u64,
    /// Writes that hit an unmapped bank.
    pub unmapped_writes: u64,
    /// Writes dropped by read-only banks.
    pub ignored_writes: u64,
    /// Accesses dispatched to device handlers.
    pub device_accesses: u64,
}

impl BusStats {
    /// Unmapped accesses of either direction.
    #[must_use]
    pub const fn bus_faults(&self) -> u64 {
        self.unmapped_reads + self.unmapped_writes
    }
}

/// Reads a little-endian word as two independent byte accesses.
///
/// The high byte comes from `addr + 1` with 16-bit wraparound, so the two
/// halves may land on different pages and different banks.
pub fn read_u16_le<B: Bus + ?Sized>(bus: &mut B, addr: u16) -> u16 {
    let lo = bus.read8(addr);
    let hi = bus.read8(addr.wrapping_add(1));
    u16::from_le_bytes([lo, hi])
}

/// Writes a little-endian word as two independent byte accesses, low first.
pub fn write_u16_le<B: Bus + ?Sized>(bus: &mut B, addr: u16, value: u16) {
    let [lo, hi] = value.to_le_bytes();
    bus.write8(addr, lo);
    bus.write8(addr.wrapping_add(1), hi);
}
