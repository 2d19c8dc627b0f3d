//! No instruction may start at or past a device deadline before that
//! device has been synced.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use retro_core::{
    AlarmId, BankBinding, BusContext, CoreConfig, Device, DeviceId, DeviceTag, Machine,
    StopReason, TraceEvent, TraceSink, WritePolicy,
};
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use tempfile as _;
use thiserror as _;
use tracing as _;

/// Fires every `period` cycles; `due` is shared with the trace sink.
struct Metronome {
    period: u64,
    due: Rc<Cell<u64>>,
    fired: Rc<Cell<u64>>,
}

impl Device for Metronome {
    fn tag(&self) -> DeviceTag {
        *b"METR"
    }

    fn read(&mut self, _addr: u32, _ctx: &mut BusContext<'_>) -> u8 {
        0
    }

    fn write(&mut self, _addr: u32, _value: u8, _ctx: &mut BusContext<'_>) {}

    fn reset(&mut self, ctx: &mut BusContext<'_>) {
        self.due.set(ctx.scheduler.now() + self.period);
    }

    fn sync(&mut self, now: u64, _ctx: &mut BusContext<'_>) -> Option<u64> {
        while self.due.get() <= now {
            self.due.set(self.due.get() + self.period);
            self.fired.set(self.fired.get() + 1);
        }
        Some(self.due.get() - now)
    }
}

/// Records every instruction start that happens at or past the deadline.
struct Watchdog {
    due: Rc<Cell<u64>>,
    late: Rc<RefCell<Vec<(u64, u64)>>>,
}

impl TraceSink for Watchdog {
    fn on_event(&mut self, event: TraceEvent) {
        if let TraceEvent::InstructionStart { timestamp, .. } = event {
            if timestamp >= self.due.get() {
                self.late.borrow_mut().push((timestamp, self.due.get()));
            }
        }
    }
}

struct Rig {
    machine: Machine,
    fired: Rc<Cell<u64>>,
    late: Rc<RefCell<Vec<(u64, u64)>>>,
}

fn rig(program: &[u8], period: u64, budget: u32) -> Rig {
    let config = CoreConfig {
        frame_budget_cycles: budget,
        tracing_enabled: true,
        ..CoreConfig::default()
    };
    let mut machine = Machine::new(config).expect("default geometry");
    let ram = machine.add_ram("work", 0x2000).expect("aligned");
    machine
        .bind_block(0xF8, ram, WritePolicy::Direct)
        .expect("ram bank");
    let mut rom = vec![0xEA; 0x2000];
    rom[..program.len()].copy_from_slice(program);
    let jump = program.len();
    rom[jump..jump + 3].copy_from_slice(&[0x4C, 0x00, 0xE0]);
    rom[0x1FFC] = 0x00;
    rom[0x1FFD] = 0xE0;
    let rom = machine.add_rom("program", rom).expect("aligned");
    machine
        .bind_block(0xF0, rom, WritePolicy::Ignore)
        .expect("rom bank");

    let due = Rc::new(Cell::new(0));
    let fired = Rc::new(Cell::new(0));
    let late = Rc::new(RefCell::new(Vec::new()));
    let metronome = machine.attach_device(Box::new(Metronome {
        period,
        due: due.clone(),
        fired: fired.clone(),
    }));
    machine
        .bind_bank(0xFF, BankBinding::Device(metronome))
        .expect("device bank");
    machine.map(0, 0xF8);
    machine.map(2, 0xFF);
    machine.map(7, 0xF0);
    machine.reset();
    machine.set_trace_sink(Some(Box::new(Watchdog {
        due,
        late: late.clone(),
    })));
    Rig {
        machine,
        fired,
        late,
    }
}

/// Straight-line instructions of assorted widths and costs.
fn instruction() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        Just(vec![0xEA]),
        Just(vec![0xE8]),
        any::<u8>().prop_map(|value| vec![0xA9, value]),
        any::<u8>().prop_map(|zp| vec![0xE6, zp]),
        any::<u8>().prop_map(|zp| vec![0x85, zp]),
        Just(vec![0xAD, 0x00, 0x40]),
        Just(vec![0xEE, 0x00, 0x02]),
        Just(vec![0x42, 0x1A]),
    ]
}

proptest! {
    #[test]
    fn no_instruction_starts_past_an_unsynced_deadline(
        program in prop::collection::vec(instruction(), 1..64),
        period in 1_u64..400,
        budget in 50_u32..2_000,
        frames in 1_usize..6,
    ) {
        let bytes: Vec<u8> = program.into_iter().flatten().collect();
        let mut rig = rig(&bytes, period, budget);
        let start = rig.machine.scheduler().now();
        for _ in 0..frames {
            let outcome = rig.machine.run_frame();
            prop_assert_eq!(outcome.reason, StopReason::FrameComplete);
        }
        prop_assert!(rig.late.borrow().is_empty(), "late starts: {:?}", rig.late.borrow());
        let elapsed = rig.machine.scheduler().now() - start;
        prop_assert!(rig.fired.get() >= elapsed / period);
    }
}

#[test]
fn device_horizon_cuts_into_a_long_frame() {
    let mut rig = rig(&[0xEA], 100, 10_000);
    rig.machine.run_frame();
    assert!(rig.late.borrow().is_empty());
    assert!(rig.fired.get() >= 99);
    assert!(rig.machine.scheduler().next_event() <= 100);
}

/// Fires one alarm at `at`, which asks for another visit `follow_up` cycles
/// later. Every sync timestamp is recorded.
struct Echo {
    at: u64,
    follow_up: u64,
    fired_at: Rc<Cell<Option<u64>>>,
    syncs: Rc<RefCell<Vec<u64>>>,
}

impl Device for Echo {
    fn tag(&self) -> DeviceTag {
        *b"ECHO"
    }

    fn attached(&mut self, id: DeviceId, ctx: &mut BusContext<'_>) {
        let alarm = ctx.scheduler.register_alarm(id);
        ctx.scheduler.schedule_alarm(alarm, self.at);
    }

    fn read(&mut self, _addr: u32, _ctx: &mut BusContext<'_>) -> u8 {
        0
    }

    fn write(&mut self, _addr: u32, _value: u8, _ctx: &mut BusContext<'_>) {}

    fn sync(&mut self, now: u64, _ctx: &mut BusContext<'_>) -> Option<u64> {
        self.syncs.borrow_mut().push(now);
        None
    }

    fn alarm(&mut self, _alarm: AlarmId, now: u64, ctx: &mut BusContext<'_>) {
        self.fired_at.set(Some(now));
        ctx.scheduler.set_event(self.follow_up);
    }
}

#[test]
fn horizon_requested_from_an_alarm_handler_is_honoured() {
    let config = CoreConfig {
        frame_budget_cycles: 400,
        ..CoreConfig::default()
    };
    let mut machine = Machine::new(config).expect("default geometry");
    let mut rom = vec![0xEA; 0x2000];
    rom[0x100..0x103].copy_from_slice(&[0x4C, 0x00, 0xE0]);
    rom[0x1FFC] = 0x00;
    rom[0x1FFD] = 0xE0;
    let rom = machine.add_rom("program", rom).expect("aligned");
    machine
        .bind_block(0xF0, rom, WritePolicy::Ignore)
        .expect("rom bank");
    let fired_at = Rc::new(Cell::new(None));
    let syncs = Rc::new(RefCell::new(Vec::new()));
    let echo = machine.attach_device(Box::new(Echo {
        at: 100,
        follow_up: 10,
        fired_at: fired_at.clone(),
        syncs: syncs.clone(),
    }));
    machine
        .bind_bank(0xFF, BankBinding::Device(echo))
        .expect("device bank");
    machine.map(2, 0xFF);
    machine.map(7, 0xF0);
    machine.reset();

    let outcome = machine.run_frame();
    assert_eq!(outcome.reason, StopReason::FrameComplete);
    let fired = fired_at.get().expect("alarm fired inside the frame");
    assert!((100..103).contains(&fired), "alarm at {fired}");
    let syncs = syncs.borrow();
    assert!(
        syncs
            .iter()
            .any(|&at| (fired + 10..fired + 13).contains(&at)),
        "syncs at {syncs:?}"
    );
}
