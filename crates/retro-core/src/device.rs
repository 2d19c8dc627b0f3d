//! Memory-mapped device contract.
//!
//! Devices answer accesses to banks bound as [`crate::BankBinding::Device`] and
//! writes intercepted from ROM banks bound with
//! [`crate::WritePolicy::Device`]. Handlers receive a [`BusContext`] so they
//! can remap pages, request an earlier scheduler horizon and drive interrupt
//! lines without holding a reference to the whole machine.

use crate::fault::SnapshotError;
use crate::interrupt::InterruptController;
use crate::memory::PageTable;
use crate::scheduler::{AlarmId, Scheduler};

/// Four-byte tag identifying a device's save-state block.
pub type DeviceTag = [u8; 4];

/// Index of a device in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceId(pub usize);

/// Machine state a handler may touch during an access.
pub struct BusContext<'a> {
    /// Page table; handlers may call [`PageTable::map`].
    pub pages: &'a mut PageTable,
    /// Scheduler; handlers read `now()` and may call `set_event`.
    pub scheduler: &'a mut Scheduler,
    /// Interrupt lines.
    pub interrupts: &'a mut InterruptController,
}

/// A memory-mapped peripheral.
///
/// `check_state` must accept exactly the payloads `load_state` can apply, so
/// a restore can validate every block before mutating anything.
pub trait Device {
    /// Save-state block tag.
    fn tag(&self) -> DeviceTag;

    /// Called once after the device receives its id.
    fn attached(&mut self, _id: DeviceId, _ctx: &mut BusContext<'_>) {}

    /// Handles a read; `addr` is the full physical address.
    fn read(&mut self, addr: u32, ctx: &mut BusContext<'_>) -> u8;

    /// Handles a write; `addr` is the full physical address.
    fn write(&mut self, addr: u32, value: u8, ctx: &mut BusContext<'_>);

    /// Side-effect-free read for debuggers; `None` reads as open bus.
    fn peek(&self, _addr: u32) -> Option<u8> {
        None
    }

    /// Power-on/reset hook.
    fn reset(&mut self, _ctx: &mut BusContext<'_>) {}

    /// Catches the device up to `now` and returns the cycles until its next
    /// deadline, if it has one.
    ///
    /// Called from the scheduler slow path. The returned deadline replaces
    /// any `set_event` the device issued since the previous sync.
    fn sync(&mut self, _now: u64, _ctx: &mut BusContext<'_>) -> Option<u64> {
        None
    }

    /// Fires when an alarm this device registered expires.
    fn alarm(&mut self, _alarm: AlarmId, _now: u64, _ctx: &mut BusContext<'_>) {}

    /// Appends the device's save-state payload.
    fn save_state(&self, _out: &mut Vec<u8>) {}

    /// Validates a payload without applying it.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] when the payload cannot be applied.
    fn check_state(&self, payload: &[u8]) -> Result<(), SnapshotError> {
        if payload.is_empty() {
            Ok(())
        } else {
            Err(SnapshotError::corrupt(self.tag(), "unexpected payload"))
        }
    }

    /// Applies a payload previously accepted by [`Device::check_state`].
    fn load_state(&mut self, _payload: &[u8]) {}
}

/// Little-endian cursor shared by device and core state decoders.
#[derive(Debug, Clone)]
pub struct StateReader<'a> {
    tag: DeviceTag,
    bytes: &'a [u8],
}

impl<'a> StateReader<'a> {
    /// Wraps a block payload; `tag` names the block in errors.
    #[must_use]
    pub const fn new(tag: DeviceTag, bytes: &'a [u8]) -> Self {
        Self { tag, bytes }
    }

    /// Takes `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] when the payload is too short.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        if self.bytes.len() < len {
            return Err(SnapshotError::corrupt(self.tag, "payload too short"));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    /// Takes one byte.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] when the payload is exhausted.
    pub fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    /// Takes a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] when the payload is exhausted.
    pub fn u16(&mut self) -> Result<u16, SnapshotError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Takes a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] when the payload is exhausted.
    pub fn u64(&mut self) -> Result<u64, SnapshotError> {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    /// Takes a little-endian `i64`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] when the payload is exhausted.
    pub fn i64(&mut self) -> Result<i64, SnapshotError> {
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(raw))
    }

    /// Fails unless every byte was consumed.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] on trailing bytes.
    pub fn finish(self) -> Result<(), SnapshotError> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(SnapshotError::corrupt(self.tag, "trailing bytes"))
        }
    }
}
