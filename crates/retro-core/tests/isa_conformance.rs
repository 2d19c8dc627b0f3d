//! Reference ISA conformance against a flat 64 KiB bus.

use proptest as _;
use retro_core::{lookup, Bus, Core, Cpu, Mnemonic, OpcodeTable, StepOutcome, OPCODE_TABLE};
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

const ORIGIN: u16 = 0x0200;

struct FlatBus {
    mem: Vec<u8>,
    mapping: [u8; 8],
}

impl Bus for FlatBus {
    fn read8(&mut self, addr: u16) -> u8 {
        self.mem[usize::from(addr)]
    }

    fn write8(&mut self, addr: u16, value: u8) {
        self.mem[usize::from(addr)] = value;
    }

    fn set_mapping(&mut self, page: u8, bank: u8) {
        if let Some(slot) = self.mapping.get_mut(usize::from(page)) {
            *slot = bank;
        }
    }

    fn mapping(&mut self, page: u8) -> u8 {
        self.mapping.get(usize::from(page)).copied().unwrap_or(0)
    }
}

fn boot(program: &[u8]) -> (Core, FlatBus) {
    let mut bus = FlatBus {
        mem: vec![0; 0x1_0000],
        mapping: [0; 8],
    };
    let start = usize::from(ORIGIN);
    bus.mem[start..start + program.len()].copy_from_slice(program);
    bus.mem[0xFFFC..0xFFFE].copy_from_slice(&ORIGIN.to_le_bytes());
    let mut core = Core::new();
    assert_eq!(core.reset(&mut bus), 7);
    (core, bus)
}

fn run(core: &mut Core, bus: &mut FlatBus, steps: usize) -> u32 {
    (0..steps).map(|_| core.step(bus).cycles()).sum()
}

#[rstest]
#[case::load_sets_negative(&[0xA9, 0x80], 1, (0x80, 0x00, 0x00), 0x84)]
#[case::adc_signed_overflow(&[0xA9, 0x7F, 0x69, 0x01], 2, (0x80, 0x00, 0x00), 0xC4)]
#[case::sbc_borrow(&[0x38, 0xA9, 0x00, 0xE9, 0x01], 3, (0xFF, 0x00, 0x00), 0x84)]
#[case::transfers(&[0xA2, 0x05, 0x8A, 0xA8, 0x88], 4, (0x05, 0x05, 0x04), 0x04)]
#[case::asl_carry_out(&[0xA9, 0x81, 0x0A], 2, (0x02, 0x00, 0x00), 0x05)]
#[case::lsr_to_zero(&[0xA9, 0x01, 0x4A], 2, (0x00, 0x00, 0x00), 0x07)]
#[case::compare_equal(&[0xA9, 0x10, 0xC9, 0x10], 2, (0x10, 0x00, 0x00), 0x07)]
#[case::dex_wraps(&[0xA2, 0x00, 0xCA], 2, (0x00, 0xFF, 0x00), 0x84)]
#[case::pha_pla(&[0xA9, 0x42, 0x48, 0xA9, 0x00, 0x68], 4, (0x42, 0x00, 0x00), 0x04)]
#[case::php_plp(&[0x38, 0xF8, 0x08, 0x18, 0xD8, 0x28], 6, (0x00, 0x00, 0x00), 0x0D)]
#[case::prefixed_ina(&[0xA9, 0xFE, 0x42, 0x1A, 0x42, 0x1A], 3, (0x00, 0x00, 0x00), 0x06)]
#[case::prefixed_dea(&[0x42, 0x3A], 1, (0xFF, 0x00, 0x00), 0x84)]
#[case::logic_ops(&[0xA9, 0xFF, 0x29, 0x0F, 0x09, 0x30, 0x49, 0x01], 4, (0x3E, 0x00, 0x00), 0x04)]
#[case::clv(&[0xA9, 0x7F, 0x69, 0x01, 0xB8], 3, (0x80, 0x00, 0x00), 0x84)]
#[case::cpy_less(&[0xA0, 0x01, 0xC0, 0x02], 2, (0x00, 0x00, 0x01), 0x84)]
fn register_effects(
    #[case] program: &[u8],
    #[case] steps: usize,
    #[case] (a, x, y): (u8, u8, u8),
    #[case] p: u8,
) {
    let (mut core, mut bus) = boot(program);
    run(&mut core, &mut bus, steps);
    let regs = core.registers();
    assert_eq!((regs.a(), regs.x(), regs.y()), (a, x, y));
    assert_eq!(regs.p(), p, "P = {:#04X}", regs.p());
}

#[test]
fn stores_and_memory_increments() {
    // LDA #$33; STA $0300; STA $0301; STZ $0301; INC $0302; INC $0302; LDX #$01; STA $0303,X
    let (mut core, mut bus) = boot(&[
        0xA9, 0x33, 0x8D, 0x00, 0x03, 0x8D, 0x01, 0x03, 0x42, 0x9C, 0x01, 0x03, 0xEE, 0x02,
        0x03, 0xEE, 0x02, 0x03, 0xA2, 0x01, 0x9D, 0x03, 0x03,
    ]);
    let cycles = run(&mut core, &mut bus, 8);
    assert_eq!(&bus.mem[0x0300..0x0305], &[0x33, 0x00, 0x02, 0x00, 0x33]);
    assert_eq!(cycles, 2 + 4 + 4 + 5 + 6 + 6 + 2 + 5);
}

#[test]
fn indexed_load_reads_base_plus_x() {
    // LDX #$02; LDA $0300,X
    let (mut core, mut bus) = boot(&[0xA2, 0x02, 0xBD, 0x00, 0x03]);
    bus.mem[0x0302] = 0x99;
    run(&mut core, &mut bus, 2);
    assert_eq!(core.registers().a(), 0x99);
}

#[test]
fn indirect_jump_reads_target_byte_by_byte() {
    // JMP ($03FF): low byte at $03FF, high byte at $0400.
    let (mut core, mut bus) = boot(&[0x6C, 0xFF, 0x03]);
    bus.mem[0x03FF] = 0x34;
    bus.mem[0x0400] = 0x12;
    assert_eq!(core.step(&mut bus), StepOutcome::Retired { cycles: 5 });
    assert_eq!(core.pc(), 0x1234);
}

#[test]
fn jsr_pushes_return_address_minus_one() {
    // JSR $0210 ... $0210: RTS
    let (mut core, mut bus) = boot(&[0x20, 0x10, 0x02]);
    bus.mem[0x0210] = 0x60;
    run(&mut core, &mut bus, 1);
    assert_eq!(core.pc(), 0x0210);
    assert_eq!(core.registers().sp(), 0xFB);
    assert_eq!(&bus.mem[0x01FC..0x01FE], &[0x02, 0x02]);
    run(&mut core, &mut bus, 1);
    assert_eq!(core.pc(), 0x0203);
    assert_eq!(core.registers().sp(), 0xFD);
}

#[test]
fn tam_and_tma_drive_the_bus_mapping() {
    // LDA #$07; TAM #$06; LDA #$00; TMA #$04
    let (mut core, mut bus) = boot(&[0xA9, 0x07, 0x42, 0x53, 0x06, 0xA9, 0x00, 0x42, 0x43, 0x04]);
    let cycles = run(&mut core, &mut bus, 4);
    assert_eq!(bus.mapping, [0, 7, 7, 0, 0, 0, 0, 0]);
    assert_eq!(core.registers().a(), 7);
    assert_eq!(cycles, 2 + 6 + 2 + 5);
}

#[test]
fn every_table_entry_charges_its_documented_cost() {
    for spec in OPCODE_TABLE {
        let found = lookup(spec.table, spec.opcode).expect("table entry is reachable");
        assert_eq!(found, spec);
        let mut bytes = Vec::new();
        if spec.table == OpcodeTable::Ext {
            bytes.push(0x42);
        }
        bytes.push(spec.opcode);
        // Operand bytes point into zero page to keep accesses harmless.
        bytes.extend(std::iter::repeat(0x00).take(usize::from(spec.mode.operand_bytes())));
        let (mut core, mut bus) = boot(&bytes);
        // Z set, N V C clear: BEQ BPL BVC BCC are taken, the rest fall through.
        core.registers_mut().set_p(0x06);
        let outcome = core.step(&mut bus);
        let expected = match spec.mnemonic {
            Mnemonic::Beq | Mnemonic::Bpl | Mnemonic::Bvc | Mnemonic::Bcc => {
                spec.cost.resolve(true)
            }
            _ => spec.cost.base(),
        };
        assert_eq!(
            outcome.cycles(),
            u32::from(expected),
            "{} {:?}",
            spec.mnemonic.name(),
            spec.mode
        );
    }
}
