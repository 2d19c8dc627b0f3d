//! Fixed headless console layout around a cartridge image.
//!
//! | Page | Address         | Contents                                |
//! |------|-----------------|-----------------------------------------|
//! | 0    | `$0000-$1FFF`   | 8 KiB work RAM (zero page and stack)    |
//! | 2    | `$4000-$4003`   | interval timer on the IRQ line          |
//! | 3    | `$6000-$6002`   | frame signal on the NMI line            |
//! | 4, 5 | `$8000-$BFFF`   | switchable cartridge windows            |
//! | 7    | `$E000-$FFFF`   | last cartridge bank, fixed (vectors)    |
//!
//! Writes into a cartridge window select banks: register `n` (address low
//! nibble) picks the bank shown in window `n`.

use std::path::{Path, PathBuf};

use retro_core::peripherals::{
    install_mapper, FrameSignal, IntervalTimer, MapperConfig, TimerConfig,
};
use retro_core::{
    BankBinding, ConfigError, CoreConfig, Machine, SnapshotError, WritePolicy, NMI_SOURCE,
};
use thiserror::Error;

/// Physical bank of the work RAM.
pub const RAM_BANK: u16 = 0xF8;
/// Physical bank showing the last cartridge bank.
pub const FIXED_BANK: u16 = 0xF0;
/// Physical bank of the interval timer.
pub const TIMER_BANK: u16 = 0xFE;
/// Physical bank of the frame signal.
pub const FRAME_BANK: u16 = 0xFF;
/// Cartridge banks occupy physical banks `0..FIXED_BANK`.
pub const MAX_ROM_BANKS: u16 = FIXED_BANK;

const BANK_SIZE: usize = 0x2000;
const PAD_BYTE: u8 = 0xFF;

/// Failure while building or driving the console.
#[derive(Debug, Error)]
pub enum RunError {
    /// The cartridge image could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Image path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The cartridge image holds no bytes.
    #[error("cartridge image is empty")]
    EmptyImage,
    /// The cartridge image has more banks than the layout can place.
    #[error("cartridge image spans {banks} banks; at most {max} fit", max = MAX_ROM_BANKS)]
    ImageTooLarge {
        /// Banks in the padded image.
        banks: usize,
    },
    /// The machine rejected the layout.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A save state could not be written or restored.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Reads a cartridge image from disk and builds the console around it.
///
/// # Errors
///
/// Returns [`RunError`] when the file cannot be read or the image does not fit.
pub fn load(path: &Path, frame_budget_cycles: u32) -> Result<Machine, RunError> {
    let image = std::fs::read(path).map_err(|source| RunError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    build(image, frame_budget_cycles)
}

/// Builds the console around an in-memory cartridge image and resets it.
///
/// The image is padded with `$FF` up to a whole number of 8 KiB banks.
///
/// # Errors
///
/// Returns [`RunError`] for an empty or oversized image.
pub fn build(mut image: Vec<u8>, frame_budget_cycles: u32) -> Result<Machine, RunError> {
    if image.is_empty() {
        return Err(RunError::EmptyImage);
    }
    let banks = image.len().div_ceil(BANK_SIZE);
    let rom_banks = u16::try_from(banks)
        .ok()
        .filter(|&count| count <= MAX_ROM_BANKS)
        .ok_or(RunError::ImageTooLarge { banks })?;
    image.resize(banks * BANK_SIZE, PAD_BYTE);

    let config = CoreConfig {
        frame_budget_cycles,
        ..CoreConfig::default()
    };
    let mut machine = Machine::new(config)?;

    let ram = machine.add_ram("work", BANK_SIZE)?;
    machine.bind_block(RAM_BANK, ram, WritePolicy::Direct)?;

    let cart = machine.add_rom("cart", image)?;
    install_mapper(
        &mut machine,
        cart,
        MapperConfig {
            rom_first_bank: 0,
            rom_banks,
            windows: vec![4, 5],
        },
    )?;
    machine.bind_bank(
        FIXED_BANK,
        BankBinding::Linear {
            block: cart,
            offset: (banks - 1) * BANK_SIZE,
            write: WritePolicy::Ignore,
        },
    )?;

    let timer = machine.attach_device(Box::new(IntervalTimer::new(TimerConfig::default())));
    machine.bind_bank(TIMER_BANK, BankBinding::Device(timer))?;
    let frame = machine.attach_device(Box::new(FrameSignal::new(
        NMI_SOURCE,
        u64::from(frame_budget_cycles),
    )));
    machine.bind_bank(FRAME_BANK, BankBinding::Device(frame))?;

    machine.map(0, RAM_BANK);
    machine.map(2, TIMER_BANK);
    machine.map(3, FRAME_BANK);
    machine.map(7, FIXED_BANK);
    machine.reset();
    tracing::debug!(banks, frame_budget_cycles, "console built");
    Ok(machine)
}

#[cfg(test)]
mod tests {
    use super::{build, RunError, BANK_SIZE};
    use retro_core::Cpu;

    fn image(banks: usize) -> Vec<u8> {
        let mut image = vec![0xEA; banks * BANK_SIZE];
        let last = image.len();
        // Reset vector $E010.
        image[last - 4] = 0x10;
        image[last - 3] = 0xE0;
        image
    }

    #[test]
    fn reset_vector_comes_from_the_last_bank() {
        let machine = build(image(4), 1_000).expect("fits");
        assert_eq!(machine.cpu().pc(), 0xE010);
    }

    #[test]
    fn short_image_is_padded_to_a_bank() {
        let machine = build(vec![0xA9, 0x01], 1_000).expect("fits");
        assert_eq!(machine.peek(0xE000), 0xA9);
        assert_eq!(machine.peek(0xE002), 0xFF);
        assert_eq!(machine.cpu().pc(), 0xFFFF);
    }

    #[test]
    fn windows_switch_between_cartridge_banks() {
        let mut rom = image(3);
        rom[BANK_SIZE] = 0x11;
        let mut machine = build(rom, 1_000).expect("fits");
        assert_eq!(machine.peek(0x8000), 0xEA);
        machine.write(0x8000, 1);
        assert_eq!(machine.peek(0x8000), 0x11);
    }

    #[test]
    fn empty_and_oversized_images_are_rejected() {
        assert!(matches!(build(Vec::new(), 1_000), Err(RunError::EmptyImage)));
        assert!(matches!(
            build(vec![0; 241 * BANK_SIZE], 1_000),
            Err(RunError::ImageTooLarge { banks: 241 })
        ));
    }
}
