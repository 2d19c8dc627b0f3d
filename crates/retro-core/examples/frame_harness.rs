//! Frame throughput harness for retro-core.
//!
//! Measures how many emulated frames per second one host thread sustains
//! with the fast-page path, device horizons and interrupt entry in play.
//!
//! ## Usage
//!
//! ```sh
//! cargo run -p retro-core --release --example frame_harness
//! ```
//!
//! ## Metrics
//!
//! - Instructions per second
//! - Emulated cycles per second
//! - Real-time factor against a 60 Hz console with the default frame budget
//!
//! One machine runs per thread to mirror a host that emulates several
//! consoles side by side.

#![allow(clippy::pedantic)]

use proptest as _;
use retro_core::peripherals::{IntervalTimer, TimerConfig};
use retro_core::{BankBinding, CoreConfig, Machine, WritePolicy, DEFAULT_FRAME_BUDGET_CYCLES};
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const FRAMES_PER_SECOND: f64 = 60.0;
const NUM_THREADS: usize = 4;

/// `INX; JMP $E000`
const NOP_LOOP: &[u8] = &[0xE8, 0x4C, 0x00, 0xE0];
/// `CLC; ADC #$03; EOR #$5A; ASL A; JMP $E000`
const ALU_LOOP: &[u8] = &[0x18, 0x69, 0x03, 0x49, 0x5A, 0x0A, 0x4C, 0x00, 0xE0];
/// `INC $10; LDA $10; STA $0300,X; INX; JMP $E000`
const MEMORY_LOOP: &[u8] = &[
    0xE6, 0x10, 0xA5, 0x10, 0x9D, 0x00, 0x03, 0xE8, 0x4C, 0x00, 0xE0,
];
/// Enables the interval timer, then spins on RAM while its IRQ fires.
const IRQ_LOOP: &[u8] = &[
    0xA9, 0x20, 0x8D, 0x00, 0x40, // LDA #$20; STA $4000
    0xA9, 0x01, 0x8D, 0x01, 0x40, // LDA #$01; STA $4001
    0x58, // CLI
    0xE6, 0x10, 0x4C, 0x0B, 0xE0, // INC $10; JMP $E00B
];
/// `STA $4002; INC $20; RTI`
const IRQ_HANDLER: &[u8] = &[0x8D, 0x02, 0x40, 0xE6, 0x20, 0x40];

#[derive(Debug, Clone, Copy)]
struct BenchmarkResult {
    name: &'static str,
    instructions_per_second: f64,
    cycles_per_second: f64,
    realtime_factor: f64,
}

fn build(program: &[u8]) -> Machine {
    let mut machine = Machine::new(CoreConfig::default()).expect("default geometry");
    let ram = machine.add_ram("work", 0x2000).expect("aligned");
    machine
        .bind_block(0xF8, ram, WritePolicy::Direct)
        .expect("ram bank");
    let mut rom = vec![0xEA; 0x2000];
    rom[..program.len()].copy_from_slice(program);
    rom[0x100..0x100 + IRQ_HANDLER.len()].copy_from_slice(IRQ_HANDLER);
    rom[0x1FFA..].copy_from_slice(&[0x00, 0xE1, 0x00, 0xE0, 0x00, 0xE1]);
    let rom = machine.add_rom("program", rom).expect("aligned");
    machine
        .bind_block(0xF0, rom, WritePolicy::Ignore)
        .expect("rom bank");
    let timer = machine.attach_device(Box::new(IntervalTimer::new(TimerConfig {
        prescale: 16,
        ..TimerConfig::default()
    })));
    machine
        .bind_bank(0xFE, BankBinding::Device(timer))
        .expect("timer bank");
    machine.map(0, 0xF8);
    machine.map(2, 0xFE);
    machine.map(7, 0xF0);
    machine.reset();
    machine
}

fn benchmark(name: &'static str, program: &'static [u8], duration: Duration) -> BenchmarkResult {
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let tx = tx.clone();
            thread::spawn(move || {
                let mut machine = build(program);
                let mut total_steps = 0u64;
                let mut total_cycles = 0u64;
                let start = Instant::now();

                while start.elapsed() < duration {
                    let outcome = machine.run_frame();
                    total_steps += outcome.steps;
                    total_cycles += outcome.cycles;
                }

                tx.send((total_steps, total_cycles)).ok();
            })
        })
        .collect();

    for h in handles {
        h.join().ok();
    }

    drop(tx);

    let mut total_steps = 0u64;
    let mut total_cycles = 0u64;
    for (steps, cycles) in rx {
        total_steps += steps;
        total_cycles += cycles;
    }

    let elapsed_secs = duration.as_secs_f64();
    let cycles_per_second = total_cycles as f64 / elapsed_secs;
    let realtime_cycles = f64::from(DEFAULT_FRAME_BUDGET_CYCLES) * FRAMES_PER_SECOND;

    BenchmarkResult {
        name,
        instructions_per_second: total_steps as f64 / elapsed_secs,
        cycles_per_second,
        realtime_factor: cycles_per_second / realtime_cycles,
    }
}

fn format_number(n: f64) -> String {
    if n >= 1_000_000.0 {
        format!("{:.2}M", n / 1_000_000.0)
    } else if n >= 1_000.0 {
        format!("{:.2}K", n / 1_000.0)
    } else {
        format!("{:.2}", n)
    }
}

fn print_results(results: &[BenchmarkResult]) {
    println!("\nretro-core frame harness");
    println!(
        "threads: {NUM_THREADS}, frame budget: {DEFAULT_FRAME_BUDGET_CYCLES} cycles, target: {FRAMES_PER_SECOND} Hz\n"
    );
    println!(
        "{:12} | {:>12} | {:>12} | {:>10}",
        "benchmark", "instr/sec", "cycles/sec", "x realtime"
    );
    println!("{}", "-".repeat(54));
    for result in results {
        println!(
            "{:12} | {:>12} | {:>12} | {:>10}",
            result.name,
            format_number(result.instructions_per_second),
            format_number(result.cycles_per_second),
            format_number(result.realtime_factor)
        );
    }
}

fn main() {
    let warmup = Duration::from_millis(500);
    let benchmark_duration = Duration::from_secs(3);

    println!("Running warmup for {:?}...", warmup);
    let _ = benchmark("nop_loop", NOP_LOOP, warmup);

    println!("Running benchmarks for {:?} each...", benchmark_duration);
    let results = [
        benchmark("nop_loop", NOP_LOOP, benchmark_duration),
        benchmark("alu_loop", ALU_LOOP, benchmark_duration),
        benchmark("memory_loop", MEMORY_LOOP, benchmark_duration),
        benchmark("irq_loop", IRQ_LOOP, benchmark_duration),
    ];

    print_results(&results);
}
