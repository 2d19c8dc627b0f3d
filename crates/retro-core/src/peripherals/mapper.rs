//! Bank-switching cartridge controller.
//!
//! The controller owns a window of logical pages and a run of ROM banks.
//! Writes into any of its ROM banks are intercepted: the low four bits of
//! the physical address select the window register, the value selects the
//! ROM bank. The same registers can be read back through an I/O bank.
//!
//! Selects apply in program order, so of two selects aimed at one window
//! within an instruction the last one wins. Controllers that latch two
//! selects in the same bus cycle are not modelled and remain unverified.

use crate::api::Cpu;
use crate::device::{BusContext, Device, DeviceId, DeviceTag, StateReader};
use crate::fault::{ConfigError, SnapshotError};
use crate::machine::Machine;
use crate::memory::{BankBinding, BlockId, WritePolicy};

/// Save-state tag.
pub const MAPPER_TAG: DeviceTag = *b"MAPR";
/// Register-select bits taken from the physical address.
pub const MAPPER_REGISTER_MASK: u32 = 0x0F;

/// Static layout of a bank-switching cartridge.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MapperConfig {
    /// Physical bank holding ROM bank 0.
    pub rom_first_bank: u16,
    /// Number of switchable ROM banks.
    pub rom_banks: u16,
    /// Logical page controlled by each select register.
    pub windows: Vec<usize>,
}

/// Bank-select registers for each window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSwitchMapper {
    config: MapperConfig,
    selected: Vec<u16>,
}

impl BankSwitchMapper {
    /// Creates a controller with window `i` selecting ROM bank `i % rom_banks`.
    #[must_use]
    pub fn new(config: MapperConfig) -> Self {
        let selected = (0..config.windows.len())
            .map(|window| power_on_bank(window, config.rom_banks))
            .collect();
        Self { config, selected }
    }

    /// Currently selected ROM bank of each window.
    #[must_use]
    pub fn selected(&self) -> &[u16] {
        &self.selected
    }

    fn physical_bank(&self, rom_bank: u16) -> u16 {
        self.config.rom_first_bank.wrapping_add(rom_bank)
    }

    fn select(&mut self, window: usize, value: u8, ctx: &mut BusContext<'_>) {
        let Some(&page) = self.config.windows.get(window) else {
            tracing::trace!(window, value, "bank select for unwired window ignored");
            return;
        };
        let bank = u16::from(value) % self.config.rom_banks.max(1);
        self.selected[window] = bank;
        ctx.pages.map(page, self.physical_bank(bank));
    }

    fn register(addr: u32) -> usize {
        usize::try_from(addr & MAPPER_REGISTER_MASK).unwrap_or(usize::MAX)
    }
}

fn power_on_bank(window: usize, rom_banks: u16) -> u16 {
    u16::try_from(window).unwrap_or(0) % rom_banks.max(1)
}

impl Device for BankSwitchMapper {
    fn tag(&self) -> DeviceTag {
        MAPPER_TAG
    }

    fn read(&mut self, addr: u32, _ctx: &mut BusContext<'_>) -> u8 {
        self.peek(addr).unwrap_or(0xFF)
    }

    fn write(&mut self, addr: u32, value: u8, ctx: &mut BusContext<'_>) {
        self.select(Self::register(addr), value, ctx);
    }

    fn peek(&self, addr: u32) -> Option<u8> {
        self.selected
            .get(Self::register(addr))
            .map(|bank| bank.to_le_bytes()[0])
    }

    fn reset(&mut self, ctx: &mut BusContext<'_>) {
        for window in 0..self.config.windows.len() {
            let bank = power_on_bank(window, self.config.rom_banks);
            self.selected[window] = bank;
            ctx.pages.map(self.config.windows[window], self.physical_bank(bank));
        }
    }

    fn save_state(&self, out: &mut Vec<u8>) {
        out.push(u8::try_from(self.selected.len()).unwrap_or(u8::MAX));
        for bank in &self.selected {
            out.extend_from_slice(&bank.to_le_bytes());
        }
    }

    fn check_state(&self, payload: &[u8]) -> Result<(), SnapshotError> {
        let mut reader = StateReader::new(MAPPER_TAG, payload);
        let count = usize::from(reader.u8()?);
        if count != self.selected.len() {
            return Err(SnapshotError::corrupt(MAPPER_TAG, "window count mismatch"));
        }
        for _ in 0..count {
            if reader.u16()? >= self.config.rom_banks {
                return Err(SnapshotError::corrupt(MAPPER_TAG, "bank beyond rom"));
            }
        }
        reader.finish()
    }

    fn load_state(&mut self, payload: &[u8]) {
        for (slot, raw) in self
            .selected
            .iter_mut()
            .zip(payload.get(1..).unwrap_or_default().chunks_exact(2))
        {
            *slot = u16::from_le_bytes([raw[0], raw[1]]);
        }
    }
}

/// Attaches a mapper and binds `rom` to its banks with writes intercepted.
///
/// # Errors
///
/// Returns [`ConfigError`] when the ROM does not fit the bank table.
pub fn install_mapper<C: Cpu>(
    machine: &mut Machine<C>,
    rom: BlockId,
    config: MapperConfig,
) -> Result<DeviceId, ConfigError> {
    let first = config.rom_first_bank;
    let banks = config.rom_banks;
    let page_size = machine.geometry().page_size();
    let id = machine.attach_device(Box::new(BankSwitchMapper::new(config)));
    for index in 0..banks {
        let bank = first
            .checked_add(index)
            .ok_or(ConfigError::BankOutOfRange {
                bank: u16::MAX,
                count: usize::from(machine.config().bank_count),
            })?;
        machine.bind_bank(
            bank,
            BankBinding::Linear {
                block: rom,
                offset: usize::from(index) * page_size,
                write: WritePolicy::Device(id),
            },
        )?;
    }
    Ok(id)
}
