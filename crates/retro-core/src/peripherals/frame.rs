//! Periodic frame signal (vertical blank).
//!
//! Driven entirely by a scheduler alarm: every `period` cycles the device
//! sets its status flag and asserts its interrupt line, latching a fresh
//! request each period. Reading the status register returns the flag and
//! drops both.

use crate::device::{BusContext, Device, DeviceId, DeviceTag, StateReader};
use crate::fault::SnapshotError;
use crate::scheduler::AlarmId;

/// Save-state tag.
pub const FRAME_TAG: DeviceTag = *b"FRAM";
/// Status register; bit 7 is set while a frame is unacknowledged.
pub const FRAME_STATUS: u32 = 0;
/// Low byte of the frame counter.
pub const FRAME_COUNT_LO: u32 = 1;
/// High byte of the frame counter.
pub const FRAME_COUNT_HI: u32 = 2;
/// Status flag bit.
pub const FRAME_FLAG: u8 = 0x80;

/// Frame signal generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSignal {
    irq_source: u8,
    period: u64,
    alarm: Option<AlarmId>,
    due: u64,
    frames: u32,
    flag: bool,
}

impl FrameSignal {
    /// Creates a signal firing every `period` cycles on `irq_source`.
    #[must_use]
    pub fn new(irq_source: u8, period: u64) -> Self {
        Self {
            irq_source,
            period: period.max(1),
            alarm: None,
            due: 0,
            frames: 0,
            flag: false,
        }
    }

    /// Frames signalled since reset.
    #[must_use]
    pub const fn frames(&self) -> u32 {
        self.frames
    }

    /// Whether the current frame is unacknowledged.
    #[must_use]
    pub const fn flag(&self) -> bool {
        self.flag
    }

    fn arm(&mut self, at: u64, ctx: &mut BusContext<'_>) {
        self.due = at;
        if let Some(alarm) = self.alarm {
            ctx.scheduler.schedule_alarm(alarm, at);
        }
    }

    fn status(&self) -> u8 {
        if self.flag {
            FRAME_FLAG
        } else {
            0
        }
    }
}

impl Device for FrameSignal {
    fn tag(&self) -> DeviceTag {
        FRAME_TAG
    }

    fn attached(&mut self, id: DeviceId, ctx: &mut BusContext<'_>) {
        self.alarm = Some(ctx.scheduler.register_alarm(id));
        self.arm(ctx.scheduler.now() + self.period, ctx);
    }

    fn read(&mut self, addr: u32, ctx: &mut BusContext<'_>) -> u8 {
        let value = self.peek(addr).unwrap_or(0xFF);
        if addr & 0x03 == FRAME_STATUS {
            self.flag = false;
            ctx.interrupts.clear(self.irq_source);
        }
        value
    }

    fn write(&mut self, _addr: u32, _value: u8, _ctx: &mut BusContext<'_>) {}

    fn peek(&self, addr: u32) -> Option<u8> {
        let [lo, hi, ..] = self.frames.to_le_bytes();
        match addr & 0x03 {
            FRAME_STATUS => Some(self.status()),
            FRAME_COUNT_LO => Some(lo),
            FRAME_COUNT_HI => Some(hi),
            _ => None,
        }
    }

    fn reset(&mut self, ctx: &mut BusContext<'_>) {
        self.frames = 0;
        self.flag = false;
        ctx.interrupts.clear(self.irq_source);
        self.arm(ctx.scheduler.now() + self.period, ctx);
    }

    fn alarm(&mut self, alarm: AlarmId, now: u64, ctx: &mut BusContext<'_>) {
        if self.alarm != Some(alarm) {
            return;
        }
        self.frames = self.frames.wrapping_add(1);
        self.flag = true;
        ctx.interrupts.assert(self.irq_source);
        tracing::trace!(frame = self.frames, now, "frame signal");
        // Re-arm from the nominal deadline, not from `now`.
        self.arm(self.due + self.period, ctx);
    }

    fn save_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.frames.to_le_bytes());
        out.push(u8::from(self.flag));
        out.extend_from_slice(&self.due.to_le_bytes());
    }

    fn check_state(&self, payload: &[u8]) -> Result<(), SnapshotError> {
        let mut reader = StateReader::new(FRAME_TAG, payload);
        reader.take(4)?;
        if reader.u8()? > 1 {
            return Err(SnapshotError::corrupt(FRAME_TAG, "flag is not 0/1"));
        }
        reader.u64()?;
        reader.finish()
    }

    fn load_state(&mut self, payload: &[u8]) {
        if let [a, b, c, d, flag, ref due @ ..] = *payload {
            self.frames = u32::from_le_bytes([a, b, c, d]);
            self.flag = flag != 0;
            if let Ok(due) = <[u8; 8]>::try_from(due) {
                self.due = u64::from_le_bytes(due);
            }
        }
    }
}
