//! Cycle-accurate CPU interpreter, banked memory bus and event scheduler
//! for retro console emulators.
//!
//! A [`Machine`] owns a [`Cpu`], an [`AddressSpace`], a [`Scheduler`] and an
//! [`InterruptController`]. Hosts add memory blocks, bind them to physical
//! banks, attach [`Device`]s, then drive execution one frame at a time with
//! [`Machine::run_frame`].

/// Memory model: page geometry, bank bindings and the fast-page cache.
pub mod memory;
pub use memory::{
    read_u16_le, write_u16_le, AddressSpace, BankBinding, BlockId, BlockKind, BusStats, FastPage,
    MemoryBlock, OpenBusPolicy, PageGeometry, PageTable, Resolution, WritePolicy,
    LOGICAL_ADDRESS_BITS, MAX_PAGE_SHIFT, MIN_PAGE_SHIFT,
};

/// Memory-mapped device contract.
pub mod device;
pub use device::{BusContext, Device, DeviceId, DeviceTag, StateReader};

/// Cycle clock, frame and device horizons, and alarm slots.
pub mod scheduler;
pub use scheduler::{AlarmId, Scheduler, SchedulerState, SCHEDULER_TAG};

/// Prioritised interrupt sources.
pub mod interrupt;
pub use interrupt::{
    InterruptController, InterruptRequest, SourceConfig, Trigger, INTERRUPT_TAG, IRQ_SOURCE,
    IRQ_VECTOR, MAX_INTERRUPT_SOURCES, NMI_SOURCE, NMI_VECTOR,
};

/// Public host-facing API contract and integration types.
pub mod api;
pub use api::{
    Bus, CoreConfig, Cpu, RunOutcome, SnapshotVersion, StepOutcome, StopHandle, StopReason,
    TraceEvent, TraceSink, DEFAULT_BANK_COUNT, DEFAULT_FRAME_BUDGET_CYCLES, DEFAULT_PAGE_SHIFT,
};

/// Architectural CPU state.
pub mod state;
pub use state::{Register, RegisterFile, RunState};

/// Opcode tables.
pub mod encoding;
pub use encoding::{lookup, AddressingMode, Mnemonic, OpcodeSpec, OpcodeTable, OPCODE_TABLE};

/// Instruction decoding.
pub mod decoder;
pub use decoder::{Decoded, Decoder, Instruction, Operand};

/// Fault codes and error types.
pub mod fault;
pub use fault::{ConfigError, FaultCode, SnapshotError};

/// Instruction cycle-cost table.
pub mod timing;
pub use timing::{cycle_cost, CycleCost, CycleCostKind, CYCLE_COST_TABLE};

/// Reference interpreter core.
pub mod execute;
pub use execute::{Core, CoreState, CPU_TAG, RESET_VECTOR};

/// Side-effect-free disassembly.
pub mod disasm;
pub use disasm::{disassemble, disassemble_one, DisassemblyRow};

/// Machine assembly and the frame loop.
pub mod machine;
pub use machine::{Machine, SystemBus};

/// Save-state container.
pub mod snapshot;
pub use snapshot::{parse_blocks, Block, MAPPING_TAG, RAM_TAG, SNAPSHOT_MAGIC};

/// Reference devices.
pub mod peripherals;

#[cfg(test)]
use tempfile as _;
