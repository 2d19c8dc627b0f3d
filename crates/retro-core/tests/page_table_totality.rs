//! Every logical address resolves to exactly one page whose fast page agrees
//! with its bank binding, whatever sequence of `map()` calls came before.

use proptest::prelude::*;
use retro_core::{
    BankBinding, BlockId, BusContext, CoreConfig, Device, DeviceTag, FastPage, Machine,
    OpenBusPolicy, WritePolicy,
};
use rstest::rstest;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

const BANKS: u16 = 32;
const OPEN_BUS: u8 = 0xEE;
const DEVICE_VALUE: u8 = 0xD8;
const DEVICE_BANK: u16 = 8;

struct Register;

impl Device for Register {
    fn tag(&self) -> DeviceTag {
        *b"REG1"
    }

    fn read(&mut self, _addr: u32, _ctx: &mut BusContext<'_>) -> u8 {
        DEVICE_VALUE
    }

    fn write(&mut self, _addr: u32, _value: u8, _ctx: &mut BusContext<'_>) {}

    fn peek(&self, _addr: u32) -> Option<u8> {
        Some(DEVICE_VALUE)
    }
}

/// Banks 0..4 are RAM, 4..8 ROM, 8 a device, the rest unmapped.
fn machine(page_shift: u8) -> (Machine, BlockId, BlockId) {
    let config = CoreConfig {
        page_shift,
        bank_count: BANKS,
        open_bus: OpenBusPolicy::Fixed(OPEN_BUS),
        ..CoreConfig::default()
    };
    let mut machine = Machine::new(config).expect("valid shift");
    let page_size = machine.geometry().page_size();
    let ram = machine.add_ram("ram", 4 * page_size).expect("aligned");
    let rom: Vec<u8> = (0..4_u8)
        .flat_map(|page| vec![0x20 + page; page_size])
        .collect();
    let rom = machine.add_rom("rom", rom).expect("aligned");
    machine
        .bind_block(0, ram, WritePolicy::Direct)
        .expect("ram banks");
    machine
        .bind_block(4, rom, WritePolicy::Ignore)
        .expect("rom banks");
    let device = machine.attach_device(Box::new(Register));
    machine
        .bind_bank(DEVICE_BANK, BankBinding::Device(device))
        .expect("device bank");
    (machine, ram, rom)
}

#[derive(Debug, Clone)]
enum Op {
    Map { page: usize, bank: u16 },
    Write { addr: u16, value: u8 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0_usize..264, 0_u16..40).prop_map(|(page, bank)| Op::Map { page, bank }),
        (any::<u16>(), any::<u8>()).prop_map(|(addr, value)| Op::Write { addr, value }),
    ]
}

struct Model {
    page_size: usize,
    banks: Vec<u16>,
    ram: Vec<u8>,
}

impl Model {
    fn value(&self, bank: u16, offset: usize) -> u8 {
        match bank {
            0..=3 => self.ram[usize::from(bank) * self.page_size + offset],
            4..=7 => 0x20 + u8::try_from(bank - 4).expect("small"),
            DEVICE_BANK => DEVICE_VALUE,
            _ => OPEN_BUS,
        }
    }

    fn fast_page(&self, bank: u16, ram: BlockId, rom: BlockId) -> Option<FastPage> {
        match bank {
            0..=3 => Some(FastPage {
                block: ram,
                base: usize::from(bank) * self.page_size,
                writable: true,
            }),
            4..=7 => Some(FastPage {
                block: rom,
                base: usize::from(bank - 4) * self.page_size,
                writable: false,
            }),
            _ => None,
        }
    }
}

proptest! {
    #[test]
    fn fast_pages_always_match_the_bank_table(
        page_shift in 8_u8..=15,
        ops in prop::collection::vec(op(), 0..128),
    ) {
        let (mut machine, ram, rom) = machine(page_shift);
        let geometry = machine.geometry();
        let page_size = geometry.page_size();
        let mut model = Model {
            page_size,
            banks: vec![0; geometry.page_count()],
            ram: vec![0; 4 * page_size],
        };

        for op in ops {
            match op {
                Op::Map { page, bank } => {
                    machine.map(page, bank);
                    if let Some(slot) = model.banks.get_mut(page) {
                        *slot = bank;
                    }
                }
                Op::Write { addr, value } => {
                    machine.write(addr, value);
                    let bank = model.banks[geometry.page_of(addr)];
                    if bank < 4 {
                        let index = usize::from(bank) * page_size + geometry.offset_of(addr);
                        model.ram[index] = value;
                    }
                }
            }
        }

        let pages = machine.address_space().pages();
        prop_assert_eq!(pages.mapping(), model.banks.clone());
        for (page, &bank) in model.banks.iter().enumerate() {
            let base = u16::try_from(page << page_shift).expect("logical address");
            let last = base + u16::try_from(page_size - 1).expect("page fits");
            prop_assert_eq!(pages.fast_page(page), model.fast_page(bank, ram, rom));
            prop_assert_eq!(machine.peek(base), model.value(bank, 0));
            prop_assert_eq!(machine.peek(last), model.value(bank, page_size - 1));
        }
    }
}

#[rstest]
#[case(8, 256)]
#[case(13, 8)]
#[case(15, 2)]
fn geometry_divides_the_logical_space(#[case] page_shift: u8, #[case] pages: usize) {
    let (machine, _, _) = machine(page_shift);
    assert_eq!(machine.geometry().page_count(), pages);
    assert_eq!(machine.address_space().pages().page_count(), pages);
}

#[test]
fn rebinding_a_bank_refreshes_every_page_that_shows_it() {
    let (mut machine, ram, _) = machine(13);
    machine.map(1, 6);
    machine.map(3, 6);
    assert_eq!(machine.peek(0x2000), 0x22);

    machine
        .bind_bank(
            6,
            BankBinding::Linear {
                block: ram,
                offset: 0,
                write: WritePolicy::Direct,
            },
        )
        .expect("bank in range");
    machine.write(0x2005, 0x5A);

    assert_eq!(machine.peek(0x6005), 0x5A);
    assert_eq!(
        machine.address_space().pages().fast_page(3).map(|fast| fast.writable),
        Some(true)
    );
}

#[test]
fn unmapped_accesses_read_open_bus_and_count_as_faults() {
    let (mut machine, _, _) = machine(13);
    machine.map(2, 20);
    machine.write(0x4000, 1);
    assert_eq!(machine.read(0x4000), OPEN_BUS);
    let stats = machine.address_space().stats();
    assert_eq!(stats.unmapped_reads, 1);
    assert_eq!(stats.unmapped_writes, 1);
    assert_eq!(stats.bus_faults(), 2);
}
