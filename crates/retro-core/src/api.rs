//! Public host-facing API contracts for embedding the core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::fault::{ConfigError, FaultCode, SnapshotError};
use crate::interrupt::InterruptRequest;
use crate::memory::{OpenBusPolicy, PageGeometry};
use crate::state::RunState;

/// Default cycle budget of one host frame.
pub const DEFAULT_FRAME_BUDGET_CYCLES: u32 = 29_780;
/// Default page shift (8 KiB pages, eight logical pages).
pub const DEFAULT_PAGE_SHIFT: u8 = 13;
/// Default size of the physical bank table.
pub const DEFAULT_BANK_COUNT: u16 = 256;

/// Top-level immutable configuration for a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CoreConfig {
    /// Address bits covered by one page.
    pub page_shift: u8,
    /// Entries in the physical bank table.
    pub bank_count: u16,
    /// Value returned by unanswered reads.
    pub open_bus: OpenBusPolicy,
    /// Cycle budget of one `run_frame` call.
    pub frame_budget_cycles: u32,
    /// Enables trace callback dispatch.
    pub tracing_enabled: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            page_shift: DEFAULT_PAGE_SHIFT,
            bank_count: DEFAULT_BANK_COUNT,
            open_bus: OpenBusPolicy::LastValue,
            frame_budget_cycles: DEFAULT_FRAME_BUDGET_CYCLES,
            tracing_enabled: false,
        }
    }
}

impl CoreConfig {
    /// Validated page geometry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PageShiftOutOfRange`] for an unsupported shift.
    pub const fn geometry(&self) -> Result<PageGeometry, ConfigError> {
        PageGeometry::new(self.page_shift)
    }
}

/// Memory and interrupt view the CPU executes against.
///
/// Multi-byte values are always assembled from single-byte accesses.
pub trait Bus {
    /// Reads one byte with side effects.
    fn read8(&mut self, addr: u16) -> u8;

    /// Writes one byte with side effects.
    fn write8(&mut self, addr: u16, value: u8);

    /// Acknowledges and returns the most urgent deliverable interrupt.
    ///
    /// `cpu_masked` is the CPU's interrupt-disable flag.
    fn poll_interrupt(&mut self, _cpu_masked: bool) -> Option<InterruptRequest> {
        None
    }

    /// Whether a core parked in wait-for-interrupt should resume.
    fn wake_pending(&mut self) -> bool {
        false
    }

    /// Notifies the interrupt controller that a handler returned.
    fn interrupt_return(&mut self) {}

    /// Points a logical page at a physical bank (`TAM`).
    fn set_mapping(&mut self, _page: u8, _bank: u8) {}

    /// Physical bank of a logical page (`TMA`); unmapped reads as zero.
    fn mapping(&mut self, _page: u8) -> u8 {
        0
    }
}

/// An instruction-set interpreter.
///
/// Implementations must be atomic per [`Cpu::step`]: interrupts are only
/// taken between steps.
pub trait Cpu {
    /// Validated save-state payload awaiting [`Cpu::apply_state`].
    type State;

    /// Executes one instruction or interrupt entry.
    fn step<B: Bus>(&mut self, bus: &mut B) -> StepOutcome;

    /// Runs the reset sequence and returns its cycle cost.
    fn reset<B: Bus>(&mut self, bus: &mut B) -> u32;

    /// Program counter of the next instruction.
    fn pc(&self) -> u16;

    /// Between-instruction execution state.
    fn run_state(&self) -> RunState;

    /// Appends the serialized architectural state.
    fn save_state(&self, out: &mut Vec<u8>);

    /// Validates a payload without touching `self`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] when the payload cannot be applied.
    fn parse_state(&self, payload: &[u8]) -> Result<Self::State, SnapshotError>;

    /// Applies a payload accepted by [`Cpu::parse_state`].
    fn apply_state(&mut self, state: Self::State);
}

/// Result of one [`Cpu::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// An instruction retired.
    Retired {
        /// Cycles charged, including the branch-taken difference.
        cycles: u32,
    },
    /// An unassigned opcode executed as the documented no-op.
    InvalidOpcode {
        /// Unassigned opcode byte.
        opcode: u8,
        /// Cycles charged.
        cycles: u32,
    },
    /// An interrupt was entered instead of executing an instruction.
    Interrupt {
        /// Acknowledged source.
        source: u8,
        /// Cycles charged for the entry sequence.
        cycles: u32,
    },
    /// The core is waiting or stopped and consumed no cycles.
    Parked {
        /// Why nothing executed.
        run_state: RunState,
    },
}

impl StepOutcome {
    /// Cycles this step charges.
    #[must_use]
    pub const fn cycles(self) -> u32 {
        match self {
            Self::Retired { cycles }
            | Self::InvalidOpcode { cycles, .. }
            | Self::Interrupt { cycles, .. } => cycles,
            Self::Parked { .. } => 0,
        }
    }

    /// In-band fault this step reported, if any.
    #[must_use]
    pub const fn fault(self) -> Option<FaultCode> {
        match self {
            Self::InvalidOpcode { .. } => Some(FaultCode::InvalidOpcode),
            _ => None,
        }
    }
}

/// Why `run_frame` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    /// The frame's cycle budget was spent.
    FrameComplete,
    /// The host requested a stop through a [`StopHandle`].
    StopRequested,
    /// Execution reached a breakpoint; the instruction there has not run.
    Breakpoint(u16),
    /// The core executed `STP` and will not resume without reset.
    CoreStopped,
}

/// Aggregated outcome of one `run_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunOutcome {
    /// Cycles charged during this call.
    pub cycles: u64,
    /// Instructions and interrupt entries executed.
    pub steps: u64,
    /// Why the call returned.
    pub reason: StopReason,
    /// Cycles run past the frame budget, carried into the next frame.
    pub overshoot: u32,
}

/// Stable snapshot wire-version identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u16)]
pub enum SnapshotVersion {
    /// Initial block layout.
    V1 = 1,
}

impl SnapshotVersion {
    /// Newest version this build writes.
    pub const CURRENT: Self = Self::V1;

    /// Converts a wire value to a known version.
    #[must_use]
    pub const fn from_u16(version: u16) -> Option<Self> {
        match version {
            1 => Some(Self::V1),
            _ => None,
        }
    }

    /// Wire value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Trace events emitted at step boundaries when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    /// About to execute at `pc`.
    InstructionStart {
        /// Program counter.
        pc: u16,
        /// Timestamp before the step.
        timestamp: u64,
    },
    /// An instruction retired.
    InstructionRetired {
        /// Program counter it started at.
        pc: u16,
        /// Cycles charged.
        cycles: u32,
    },
    /// An interrupt entry sequence ran.
    InterruptEntered {
        /// Acknowledged source.
        source: u8,
        /// Program counter that was interrupted.
        pc: u16,
    },
    /// An unassigned opcode executed as a no-op.
    InvalidOpcode {
        /// Program counter of the opcode.
        pc: u16,
        /// Opcode byte.
        opcode: u8,
    },
    /// The scheduler slow path ran.
    HorizonReached {
        /// Timestamp when devices were synced.
        timestamp: u64,
        /// Cycles until the next horizon after the sync.
        next_event: i64,
    },
}

/// Sink trait for trace hooks.
pub trait TraceSink {
    /// Records an event in execution order.
    fn on_event(&mut self, event: TraceEvent);
}

impl TraceSink for Vec<TraceEvent> {
    fn on_event(&mut self, event: TraceEvent) {
        self.push(event);
    }
}

/// Cooperative stop request shared with the host.
///
/// Checked between instructions only.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    /// Asks the run loop to return at the next instruction boundary.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether a stop is pending.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consumes a pending stop request.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}
