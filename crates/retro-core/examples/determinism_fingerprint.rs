//! Deterministic replay fingerprint used for cross-host comparison.
//!
//! Runs a fixed program with a timer, a frame signal and a bank-switched
//! cartridge, restores mid-run and prints an FNV-1a hash of the final
//! save state. Two hosts that print different hashes disagree somewhere.

use proptest as _;
use retro_core::peripherals::{
    install_mapper, FrameSignal, IntervalTimer, MapperConfig, TimerConfig,
};
use retro_core::{BankBinding, CoreConfig, Cpu, Machine, WritePolicy, NMI_SOURCE};
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

const PROGRAM: &[u8] = &[
    0xA9, 0x09, 0x8D, 0x00, 0x40, // LDA #$09; STA $4000
    0xA9, 0x01, 0x8D, 0x01, 0x40, // LDA #$01; STA $4001
    0x58, // CLI
    0xE6, 0x10, // loop: INC $10
    0xA5, 0x10, 0x8D, 0x00, 0x80, // LDA $10; STA $8000   cart bank
    0xAD, 0x00, 0x80, 0x85, 0x11, // LDA $8000; STA $11
    0x4C, 0x0B, 0xE0, // JMP loop
];
const NMI_HANDLER: &[u8] = &[0xAD, 0x00, 0x60, 0xE6, 0x21, 0x40];
const IRQ_HANDLER: &[u8] = &[0x8D, 0x02, 0x40, 0xE6, 0x20, 0x40];

fn console() -> Machine {
    let config = CoreConfig {
        frame_budget_cycles: 5_000,
        ..CoreConfig::default()
    };
    let mut machine = Machine::new(config).expect("default geometry");
    let ram = machine.add_ram("work", 0x2000).expect("aligned");
    machine
        .bind_block(0xF8, ram, WritePolicy::Direct)
        .expect("ram bank");

    let mut rom = vec![0xEA; 0x2000];
    rom[..PROGRAM.len()].copy_from_slice(PROGRAM);
    rom[0x80..0x80 + NMI_HANDLER.len()].copy_from_slice(NMI_HANDLER);
    rom[0x100..0x100 + IRQ_HANDLER.len()].copy_from_slice(IRQ_HANDLER);
    rom[0x1FFA..].copy_from_slice(&[0x80, 0xE0, 0x00, 0xE0, 0x00, 0xE1]);
    let rom = machine.add_rom("program", rom).expect("aligned");
    machine
        .bind_block(0xF0, rom, WritePolicy::Ignore)
        .expect("rom bank");

    let cart: Vec<u8> = (0..4_u8).flat_map(|bank| vec![0xC0 | bank; 0x2000]).collect();
    let cart = machine.add_rom("cart", cart).expect("aligned");
    install_mapper(
        &mut machine,
        cart,
        MapperConfig {
            rom_first_bank: 0,
            rom_banks: 4,
            windows: vec![4],
        },
    )
    .expect("cart banks");

    let timer = machine.attach_device(Box::new(IntervalTimer::new(TimerConfig {
        prescale: 64,
        ..TimerConfig::default()
    })));
    machine
        .bind_bank(0xFE, BankBinding::Device(timer))
        .expect("timer bank");
    let frame = machine.attach_device(Box::new(FrameSignal::new(NMI_SOURCE, 3_001)));
    machine
        .bind_bank(0xFF, BankBinding::Device(frame))
        .expect("frame bank");

    machine.map(0, 0xF8);
    machine.map(2, 0xFE);
    machine.map(3, 0xFF);
    machine.map(7, 0xF0);
    machine.reset();
    machine
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn fingerprint() -> String {
    let mut machine = console();
    for _ in 0..7 {
        machine.run_frame();
    }
    let checkpoint = machine.save_state();
    for _ in 0..5 {
        machine.run_frame();
    }
    machine
        .restore_state(&checkpoint)
        .expect("own snapshot restores");
    for _ in 0..11 {
        machine.run_frame();
    }

    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    hash_bytes(&mut hash, &machine.cpu().pc().to_le_bytes());
    hash_bytes(&mut hash, &machine.scheduler().now().to_le_bytes());
    hash_bytes(&mut hash, &machine.save_state());

    format!("{hash:016x}")
}

fn main() {
    println!("{}", fingerprint());
}
