//! Cycle timestamp and event horizons.
//!
//! The run loop charges every instruction's cycles here and only leaves the
//! fast path when `next_event` reaches zero. Three relative horizons are kept:
//!
//! - `next_user_event`: end of the current host frame.
//! - `next_device_event`: earliest device deadline or alarm.
//! - `next_event`: the only value the hot loop tests. While a frame is
//!   running it is the minimum of the two; between frames only the device
//!   horizon counts, so stepping outside `run_frame` stays on the fast path.

use crate::device::{DeviceId, StateReader};
use crate::fault::SnapshotError;

/// Save-state block tag for scheduler state.
pub const SCHEDULER_TAG: [u8; 4] = *b"SCHD";

/// Handle to one alarm slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AlarmId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AlarmSlot {
    owner: DeviceId,
    deadline: Option<u64>,
}

/// Monotonic cycle clock plus event horizons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduler {
    timestamp: u64,
    next_event: i64,
    next_user_event: i64,
    next_device_event: i64,
    alarms: Vec<AlarmSlot>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn horizon(cycles: u64) -> i64 {
    i64::try_from(cycles).unwrap_or(i64::MAX)
}

impl Scheduler {
    /// Creates a scheduler at timestamp zero with no frame in progress.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timestamp: 0,
            next_event: 0,
            next_user_event: 0,
            next_device_event: i64::MAX,
            alarms: Vec::new(),
        }
    }

    /// Cycles elapsed since power-on.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.timestamp
    }

    /// Cycles until the hot loop must take the slow path.
    #[must_use]
    pub const fn next_event(&self) -> i64 {
        self.next_event
    }

    /// Cycles until the end of the current frame; negative after overshoot.
    #[must_use]
    pub const fn next_user_event(&self) -> i64 {
        self.next_user_event
    }

    /// Cycles until the earliest device deadline or alarm.
    #[must_use]
    pub const fn next_device_event(&self) -> i64 {
        self.next_device_event
    }

    /// `true` once the current frame's budget is spent.
    #[must_use]
    pub const fn user_horizon_reached(&self) -> bool {
        self.next_user_event <= 0
    }

    /// Cycles the last frame ran past its budget.
    #[must_use]
    pub fn overshoot(&self) -> u32 {
        if self.next_user_event < 0 {
            u32::try_from(self.next_user_event.unsigned_abs()).unwrap_or(u32::MAX)
        } else {
            0
        }
    }

    /// Starts a frame of `budget` cycles unless one is still in progress.
    ///
    /// Overshoot from the previous frame is deducted from the new one.
    /// Returns `true` when a new frame was started.
    pub fn begin_frame(&mut self, budget: u32) -> bool {
        let started = self.next_user_event <= 0;
        if started {
            self.next_user_event += i64::from(budget);
        }
        self.refresh_next_event();
        started
    }

    /// `true` while a frame's budget is still being spent.
    #[must_use]
    pub const fn frame_active(&self) -> bool {
        self.next_user_event > 0
    }

    fn refresh_next_event(&mut self) {
        self.next_event = if self.frame_active() {
            self.next_device_event.min(self.next_user_event)
        } else {
            self.next_device_event
        };
    }

    /// Advances the clock; returns `true` when the slow path is due.
    #[inline]
    pub fn charge(&mut self, cycles: u32) -> bool {
        let cycles = i64::from(cycles);
        self.timestamp += cycles.unsigned_abs();
        self.next_event -= cycles;
        self.next_user_event -= cycles;
        self.next_device_event = self.next_device_event.saturating_sub(cycles);
        self.next_event <= 0
    }

    /// Advances the clock without spending the current frame's budget.
    ///
    /// Used for reset sequences run outside `run_frame`.
    pub fn advance(&mut self, cycles: u32) {
        let cycles = i64::from(cycles);
        self.timestamp += cycles.unsigned_abs();
        self.next_device_event = self.next_device_event.saturating_sub(cycles);
        self.refresh_next_event();
    }

    /// Requests a slow-path visit no later than `cycles` from now.
    ///
    /// Called from device handlers after a register write moves a deadline
    /// earlier. Never pushes the horizon later.
    pub fn set_event(&mut self, cycles: u64) {
        let delta = horizon(cycles);
        self.next_device_event = self.next_device_event.min(delta);
        self.next_event = self.next_event.min(delta);
    }

    /// Cycles a parked core may skip before something can happen.
    ///
    /// Between frames with nothing scheduled the core advances one cycle.
    #[must_use]
    pub fn idle_cycles(&self) -> u32 {
        match u32::try_from(self.next_event.max(1)) {
            Ok(cycles) => cycles,
            Err(_) if self.frame_active() => u32::MAX,
            Err(_) => 1,
        }
    }

    /// Opens a slow-path visit: forgets the stale device horizon so that
    /// `set_event` calls made while syncing or firing alarms are collected
    /// by [`Self::finish_sync`].
    pub fn begin_sync(&mut self) {
        self.next_device_event = i64::MAX;
    }

    /// Installs fresh horizons after every device was synced.
    ///
    /// `device_deadline` is the earliest deadline any device reported, in
    /// cycles from now. Armed alarms and any `set_event` request made since
    /// [`Self::begin_sync`] are folded in here.
    pub fn finish_sync(&mut self, device_deadline: Option<u64>) {
        let alarm = self.earliest_alarm().map(|(_, at)| at.saturating_sub(self.timestamp));
        let reported = match (device_deadline, alarm) {
            (Some(a), Some(b)) => horizon(a.min(b)),
            (Some(a), None) | (None, Some(a)) => horizon(a),
            (None, None) => i64::MAX,
        };
        let device = reported.min(self.next_device_event);
        self.next_device_event = if device == i64::MAX { device } else { device.max(1) };
        self.refresh_next_event();
    }

    /// Allocates an alarm slot owned by `owner`.
    pub fn register_alarm(&mut self, owner: DeviceId) -> AlarmId {
        self.alarms.push(AlarmSlot {
            owner,
            deadline: None,
        });
        AlarmId(self.alarms.len() - 1)
    }

    /// Number of registered alarm slots.
    #[must_use]
    pub fn alarm_count(&self) -> usize {
        self.alarms.len()
    }

    /// Arms an alarm at absolute timestamp `at`.
    pub fn schedule_alarm(&mut self, alarm: AlarmId, at: u64) {
        let Some(slot) = self.alarms.get_mut(alarm.0) else {
            tracing::warn!(alarm = alarm.0, "schedule_alarm on unknown slot");
            return;
        };
        slot.deadline = Some(at);
        self.set_event(at.saturating_sub(self.timestamp));
    }

    /// Disarms an alarm.
    pub fn cancel_alarm(&mut self, alarm: AlarmId) {
        if let Some(slot) = self.alarms.get_mut(alarm.0) {
            slot.deadline = None;
        }
    }

    /// Absolute deadline of an armed alarm.
    #[must_use]
    pub fn alarm_deadline(&self, alarm: AlarmId) -> Option<u64> {
        self.alarms.get(alarm.0).and_then(|slot| slot.deadline)
    }

    /// Disarms and returns the earliest alarm due at or before now.
    pub fn pop_expired(&mut self) -> Option<(AlarmId, DeviceId)> {
        let (alarm, at) = self.earliest_alarm()?;
        if at > self.timestamp {
            return None;
        }
        let slot = &mut self.alarms[alarm.0];
        slot.deadline = None;
        Some((alarm, slot.owner))
    }

    fn earliest_alarm(&self) -> Option<(AlarmId, u64)> {
        self.alarms
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.deadline.map(|at| (AlarmId(index), at)))
            .min_by_key(|&(alarm, at)| (at, alarm))
    }

    /// Appends the serialized clock and alarm table.
    pub fn save_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.next_user_event.to_le_bytes());
        let count = u16::try_from(self.alarms.len()).unwrap_or(u16::MAX);
        out.extend_from_slice(&count.to_le_bytes());
        for slot in self.alarms.iter().take(usize::from(count)) {
            match slot.deadline {
                Some(at) => {
                    out.push(1);
                    out.extend_from_slice(&at.to_le_bytes());
                }
                None => {
                    out.push(0);
                    out.extend_from_slice(&0_u64.to_le_bytes());
                }
            }
        }
    }

    /// Validates a payload against this scheduler's alarm table.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] on a malformed payload or an alarm
    /// count that does not match the registered slots.
    pub fn parse_state(&self, payload: &[u8]) -> Result<SchedulerState, SnapshotError> {
        let mut reader = StateReader::new(SCHEDULER_TAG, payload);
        let timestamp = reader.u64()?;
        let next_user_event = reader.i64()?;
        let count = usize::from(reader.u16()?);
        if count != self.alarms.len() {
            return Err(SnapshotError::corrupt(
                SCHEDULER_TAG,
                format!("{count} alarms saved, {} registered", self.alarms.len()),
            ));
        }
        let mut deadlines = Vec::with_capacity(count);
        for _ in 0..count {
            let armed = reader.u8()?;
            let at = reader.u64()?;
            deadlines.push(match armed {
                0 => None,
                1 => Some(at),
                _ => return Err(SnapshotError::corrupt(SCHEDULER_TAG, "bad alarm flag")),
            });
        }
        reader.finish()?;
        Ok(SchedulerState {
            timestamp,
            next_user_event,
            deadlines,
        })
    }

    /// Applies a parsed state. Horizons are left for the next sync.
    pub fn apply_state(&mut self, state: SchedulerState) {
        self.timestamp = state.timestamp;
        self.next_user_event = state.next_user_event;
        for (slot, deadline) in self.alarms.iter_mut().zip(state.deadlines) {
            slot.deadline = deadline;
        }
        self.next_device_event = 0;
        self.next_event = 0;
    }
}

/// Validated scheduler payload awaiting [`Scheduler::apply_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    timestamp: u64,
    next_user_event: i64,
    deadlines: Vec<Option<u64>>,
}
