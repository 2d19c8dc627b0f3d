//! Interval timer with a lazily caught-up down-counter.
//!
//! The counter is not ticked every cycle. Every register access and every
//! scheduler visit first replays the cycles elapsed since the last catch-up,
//! and register writes that move the next underflow earlier pull the
//! scheduler horizon in with `set_event`.
//!
//! Register map (low two bits of the physical address):
//!
//! | Offset | Read                   | Write                                  |
//! |--------|------------------------|----------------------------------------|
//! | 0      | current counter        | reload value                           |
//! | 1      | control                | control; bit 0 enables, enabling reloads |
//! | 2      | status; bit 0 = raised | any value acknowledges the interrupt   |
//! | 3      | reload value           | ignored                                |

use crate::device::{BusContext, Device, DeviceTag, StateReader};
use crate::fault::SnapshotError;

/// Save-state tag.
pub const TIMER_TAG: DeviceTag = *b"TIMR";
/// Counter/reload register.
pub const TIMER_COUNTER: u32 = 0;
/// Control register.
pub const TIMER_CONTROL: u32 = 1;
/// Status/acknowledge register.
pub const TIMER_STATUS: u32 = 2;
/// Reload readback register.
pub const TIMER_RELOAD: u32 = 3;
/// Control bit enabling the counter.
pub const TIMER_ENABLE: u8 = 0x01;

const STATE_BYTES: usize = 1 + 1 + 1 + 1 + 8 + 8;

/// Static timer wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TimerConfig {
    /// Interrupt source raised on underflow.
    pub irq_source: u8,
    /// CPU cycles per counter tick.
    pub prescale: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            irq_source: crate::interrupt::IRQ_SOURCE,
            prescale: 1024,
        }
    }
}

/// Down-counting interval timer raising a level interrupt on underflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTimer {
    config: TimerConfig,
    reload: u8,
    counter: u8,
    control: u8,
    raised: bool,
    phase: u64,
    last_sync: u64,
}

impl IntervalTimer {
    /// Creates a disabled timer.
    #[must_use]
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config: TimerConfig {
                prescale: config.prescale.max(1),
                ..config
            },
            reload: 0,
            counter: 0,
            control: 0,
            raised: false,
            phase: 0,
            last_sync: 0,
        }
    }

    /// Whether the counter is running.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.control & TIMER_ENABLE != 0
    }

    /// Counter value as of the last catch-up.
    #[must_use]
    pub const fn counter(&self) -> u8 {
        self.counter
    }

    /// Whether an unacknowledged underflow is holding the line.
    #[must_use]
    pub const fn raised(&self) -> bool {
        self.raised
    }

    fn prescale(&self) -> u64 {
        u64::from(self.config.prescale)
    }

    /// Replays the cycles elapsed since the last catch-up.
    fn catch_up(&mut self, now: u64, ctx: &mut BusContext<'_>) {
        let elapsed = now.saturating_sub(self.last_sync);
        self.last_sync = now;
        if !self.enabled() || elapsed == 0 {
            return;
        }
        let total = self.phase + elapsed;
        let ticks = total / self.prescale();
        self.phase = total % self.prescale();

        let counter = u64::from(self.counter);
        if ticks <= counter {
            self.counter = narrow(counter - ticks);
            return;
        }
        let period = u64::from(self.reload) + 1;
        let after_underflow = ticks - counter - 1;
        self.counter = narrow(u64::from(self.reload) - after_underflow % period);
        if !self.raised {
            tracing::trace!(now, "timer underflow");
        }
        self.raised = true;
        ctx.interrupts.assert(self.config.irq_source);
    }

    /// Cycles from the last catch-up until the next underflow.
    fn until_underflow(&self) -> Option<u64> {
        self.enabled()
            .then(|| (u64::from(self.counter) + 1) * self.prescale() - self.phase)
    }

    fn request_horizon(&self, ctx: &mut BusContext<'_>) {
        if let Some(cycles) = self.until_underflow() {
            ctx.scheduler.set_event(cycles);
        }
    }
}

fn narrow(value: u64) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}

fn register(addr: u32) -> u32 {
    addr & 0x03
}

impl Device for IntervalTimer {
    fn tag(&self) -> DeviceTag {
        TIMER_TAG
    }

    fn read(&mut self, addr: u32, ctx: &mut BusContext<'_>) -> u8 {
        self.catch_up(ctx.scheduler.now(), ctx);
        self.peek(addr).unwrap_or(0xFF)
    }

    fn write(&mut self, addr: u32, value: u8, ctx: &mut BusContext<'_>) {
        self.catch_up(ctx.scheduler.now(), ctx);
        match register(addr) {
            TIMER_COUNTER => self.reload = value,
            TIMER_CONTROL => {
                let starting = value & TIMER_ENABLE != 0 && !self.enabled();
                self.control = value;
                if starting {
                    self.counter = self.reload;
                    self.phase = 0;
                }
            }
            TIMER_STATUS => {
                self.raised = false;
                ctx.interrupts.clear(self.config.irq_source);
            }
            _ => {}
        }
        self.request_horizon(ctx);
    }

    fn peek(&self, addr: u32) -> Option<u8> {
        Some(match register(addr) {
            TIMER_COUNTER => self.counter,
            TIMER_CONTROL => self.control,
            TIMER_STATUS => u8::from(self.raised),
            _ => self.reload,
        })
    }

    fn reset(&mut self, ctx: &mut BusContext<'_>) {
        *self = Self::new(self.config);
        self.last_sync = ctx.scheduler.now();
        ctx.interrupts.clear(self.config.irq_source);
    }

    fn sync(&mut self, now: u64, ctx: &mut BusContext<'_>) -> Option<u64> {
        self.catch_up(now, ctx);
        self.until_underflow()
    }

    fn save_state(&self, out: &mut Vec<u8>) {
        out.push(self.reload);
        out.push(self.counter);
        out.push(self.control);
        out.push(u8::from(self.raised));
        out.extend_from_slice(&self.phase.to_le_bytes());
        out.extend_from_slice(&self.last_sync.to_le_bytes());
    }

    fn check_state(&self, payload: &[u8]) -> Result<(), SnapshotError> {
        let mut reader = StateReader::new(TIMER_TAG, payload);
        reader.take(3)?;
        if reader.u8()? > 1 {
            return Err(SnapshotError::corrupt(TIMER_TAG, "raised flag is not 0/1"));
        }
        if reader.u64()? >= self.prescale() {
            return Err(SnapshotError::corrupt(TIMER_TAG, "phase beyond prescale"));
        }
        reader.u64()?;
        reader.finish()
    }

    fn load_state(&mut self, payload: &[u8]) {
        if payload.len() != STATE_BYTES {
            return;
        }
        self.reload = payload[0];
        self.counter = payload[1];
        self.control = payload[2];
        self.raised = payload[3] != 0;
        let mut word = [0_u8; 8];
        word.copy_from_slice(&payload[4..12]);
        self.phase = u64::from_le_bytes(word);
        word.copy_from_slice(&payload[12..20]);
        self.last_sync = u64::from_le_bytes(word);
    }
}
