//! Reference interpreter core.
//!
//! One [`Cpu::step`] is one of:
//! - an interrupt entry, when the bus reports a deliverable request;
//! - a full fetch, decode and execute of one instruction;
//! - nothing, when the core is parked by `WAI` or `STP`.
//!
//! Interrupts are only polled at the start of a step, so an instruction's
//! partial effects are never observable by a handler.

#![allow(clippy::cast_possible_wrap, clippy::cast_sign_loss, clippy::too_many_lines)]

mod flags;
mod helpers;

pub use helpers::{branch_condition, branch_target, effective_address, read_operand};

use crate::api::{Bus, Cpu, StepOutcome};
use crate::decoder::{invalid_opcode_cycles, Decoded, Decoder, Instruction};
use crate::device::StateReader;
use crate::encoding::{AddressingMode, Mnemonic};
use crate::fault::SnapshotError;
use crate::memory::read_u16_le;
use crate::state::{RegisterFile, RunState, FLAG_C, FLAG_D, FLAG_I, FLAG_V, REGISTER_FILE_BYTES};
use crate::timing::{cycle_cost, CycleCostKind};

/// Reset vector address.
pub const RESET_VECTOR: u16 = 0xFFFC;
/// Vector used by `BRK`.
pub const BRK_VECTOR: u16 = 0xFFFE;
/// Save-state block tag for CPU state.
pub const CPU_TAG: [u8; 4] = *b"REGS";
/// Serialized CPU state size: register file plus run state.
pub const CPU_STATE_BYTES: usize = REGISTER_FILE_BYTES + 1;

/// Validated CPU payload awaiting [`Cpu::apply_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreState {
    regs: RegisterFile,
    run_state: RunState,
}

/// The reference 8-bit interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Core {
    regs: RegisterFile,
    run_state: RunState,
    invalid_opcodes: u64,
}

fn interrupt_entry_cycles() -> u32 {
    u32::from(cycle_cost(CycleCostKind::InterruptEntry).unwrap_or(7))
}

impl Core {
    /// Creates a core with power-on registers; call [`Cpu::reset`] before running.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register file.
    #[must_use]
    pub const fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Register file, mutably (debuggers and test setup).
    #[must_use]
    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    /// Unassigned opcodes executed since creation.
    #[must_use]
    pub const fn invalid_opcode_count(&self) -> u64 {
        self.invalid_opcodes
    }

    fn push<B: Bus>(&mut self, bus: &mut B, value: u8) {
        bus.write8(self.regs.stack_addr(), value);
        self.regs.set_sp(self.regs.sp().wrapping_sub(1));
    }

    fn pull<B: Bus>(&mut self, bus: &mut B) -> u8 {
        self.regs.set_sp(self.regs.sp().wrapping_add(1));
        bus.read8(self.regs.stack_addr())
    }

    fn push_pc<B: Bus>(&mut self, bus: &mut B, pc: u16) {
        let [lo, hi] = pc.to_le_bytes();
        self.push(bus, hi);
        self.push(bus, lo);
    }

    fn pull_pc<B: Bus>(&mut self, bus: &mut B) -> u16 {
        let lo = self.pull(bus);
        let hi = self.pull(bus);
        u16::from_le_bytes([lo, hi])
    }

    fn enter_handler<B: Bus>(&mut self, bus: &mut B, vector: u16, brk: bool) {
        let pc = self.regs.pc();
        self.push_pc(bus, pc);
        let p = self.regs.p_for_push(brk);
        self.push(bus, p);
        self.regs.set_flag(FLAG_I, true);
        self.regs.set_flag(FLAG_D, false);
        let target = read_u16_le(bus, vector);
        self.regs.set_pc(target);
    }

    fn execute<B: Bus>(&mut self, bus: &mut B, instr: &Instruction) -> u32 {
        let spec = instr.spec;
        let next_pc = self.regs.pc();
        let mut taken = false;

        match spec.mnemonic {
            Mnemonic::Nop => {}
            Mnemonic::Lda => {
                let value = read_operand(bus, instr, &self.regs);
                self.regs.set_a(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Ldx => {
                let value = read_operand(bus, instr, &self.regs);
                self.regs.set_x(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Ldy => {
                let value = read_operand(bus, instr, &self.regs);
                self.regs.set_y(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Sta | Mnemonic::Stx | Mnemonic::Sty | Mnemonic::Stz => {
                let value = match spec.mnemonic {
                    Mnemonic::Sta => self.regs.a(),
                    Mnemonic::Stx => self.regs.x(),
                    Mnemonic::Sty => self.regs.y(),
                    _ => 0,
                };
                if let Some(addr) = effective_address(instr, &self.regs) {
                    bus.write8(addr, value);
                }
            }
            Mnemonic::Tax => {
                let value = self.regs.a();
                self.regs.set_x(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Txa => {
                let value = self.regs.x();
                self.regs.set_a(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Tay => {
                let value = self.regs.a();
                self.regs.set_y(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Tya => {
                let value = self.regs.y();
                self.regs.set_a(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Tsx => {
                let value = self.regs.sp();
                self.regs.set_x(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Txs => self.regs.set_sp(self.regs.x()),
            Mnemonic::Adc => {
                let value = read_operand(bus, instr, &self.regs);
                flags::adc(&mut self.regs, value);
            }
            Mnemonic::Sbc => {
                let value = read_operand(bus, instr, &self.regs);
                flags::sbc(&mut self.regs, value);
            }
            Mnemonic::And | Mnemonic::Ora | Mnemonic::Eor => {
                let value = read_operand(bus, instr, &self.regs);
                let a = self.regs.a();
                let result = match spec.mnemonic {
                    Mnemonic::And => a & value,
                    Mnemonic::Ora => a | value,
                    _ => a ^ value,
                };
                self.regs.set_a(result);
                self.regs.set_nz(result);
            }
            Mnemonic::Cmp | Mnemonic::Cpx | Mnemonic::Cpy => {
                let value = read_operand(bus, instr, &self.regs);
                let lhs = match spec.mnemonic {
                    Mnemonic::Cmp => self.regs.a(),
                    Mnemonic::Cpx => self.regs.x(),
                    _ => self.regs.y(),
                };
                flags::compare(&mut self.regs, lhs, value);
            }
            Mnemonic::Inx | Mnemonic::Dex => {
                let value = if spec.mnemonic == Mnemonic::Inx {
                    self.regs.x().wrapping_add(1)
                } else {
                    self.regs.x().wrapping_sub(1)
                };
                self.regs.set_x(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Iny | Mnemonic::Dey => {
                let value = if spec.mnemonic == Mnemonic::Iny {
                    self.regs.y().wrapping_add(1)
                } else {
                    self.regs.y().wrapping_sub(1)
                };
                self.regs.set_y(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Ina | Mnemonic::Dea => {
                let value = if spec.mnemonic == Mnemonic::Ina {
                    self.regs.a().wrapping_add(1)
                } else {
                    self.regs.a().wrapping_sub(1)
                };
                self.regs.set_a(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Inc | Mnemonic::Dec => {
                if let Some(addr) = effective_address(instr, &self.regs) {
                    let value = bus.read8(addr);
                    let result = if spec.mnemonic == Mnemonic::Inc {
                        value.wrapping_add(1)
                    } else {
                        value.wrapping_sub(1)
                    };
                    bus.write8(addr, result);
                    self.regs.set_nz(result);
                }
            }
            Mnemonic::Asl => {
                let a = self.regs.a();
                let result = flags::asl(&mut self.regs, a);
                self.regs.set_a(result);
            }
            Mnemonic::Lsr => {
                let a = self.regs.a();
                let result = flags::lsr(&mut self.regs, a);
                self.regs.set_a(result);
            }
            Mnemonic::Clc => self.regs.set_flag(FLAG_C, false),
            Mnemonic::Sec => self.regs.set_flag(FLAG_C, true),
            Mnemonic::Cli => self.regs.set_flag(FLAG_I, false),
            Mnemonic::Sei => self.regs.set_flag(FLAG_I, true),
            Mnemonic::Clv => self.regs.set_flag(FLAG_V, false),
            Mnemonic::Cld => self.regs.set_flag(FLAG_D, false),
            Mnemonic::Sed => self.regs.set_flag(FLAG_D, true),
            Mnemonic::Pha => {
                let value = self.regs.a();
                self.push(bus, value);
            }
            Mnemonic::Php => {
                let value = self.regs.p_for_push(true);
                self.push(bus, value);
            }
            Mnemonic::Pla => {
                let value = self.pull(bus);
                self.regs.set_a(value);
                self.regs.set_nz(value);
            }
            Mnemonic::Plp => {
                let value = self.pull(bus);
                self.regs.set_p(value);
            }
            Mnemonic::Jmp => {
                let target = match spec.mode {
                    AddressingMode::Indirect => read_u16_le(bus, instr.operand.word()),
                    _ => instr.operand.word(),
                };
                self.regs.set_pc(target);
            }
            Mnemonic::Jsr => {
                self.push_pc(bus, next_pc.wrapping_sub(1));
                self.regs.set_pc(instr.operand.word());
            }
            Mnemonic::Rts => {
                let pc = self.pull_pc(bus).wrapping_add(1);
                self.regs.set_pc(pc);
            }
            Mnemonic::Rti => {
                let p = self.pull(bus);
                self.regs.set_p(p);
                let pc = self.pull_pc(bus);
                self.regs.set_pc(pc);
                bus.interrupt_return();
            }
            Mnemonic::Brk => self.enter_handler(bus, BRK_VECTOR, true),
            Mnemonic::Bra => {
                self.regs
                    .set_pc(branch_target(next_pc, instr.operand.byte()));
            }
            Mnemonic::Bpl
            | Mnemonic::Bmi
            | Mnemonic::Bvc
            | Mnemonic::Bvs
            | Mnemonic::Bcc
            | Mnemonic::Bcs
            | Mnemonic::Bne
            | Mnemonic::Beq => {
                taken = branch_condition(spec.mnemonic, &self.regs).unwrap_or(false);
                if taken {
                    self.regs
                        .set_pc(branch_target(next_pc, instr.operand.byte()));
                }
            }
            Mnemonic::Wai => self.run_state = RunState::WaitingForInterrupt,
            Mnemonic::Stp => self.run_state = RunState::Stopped,
            Mnemonic::Tam => {
                let mask = instr.operand.byte();
                let bank = self.regs.a();
                for page in 0..8_u8 {
                    if mask & (1 << page) != 0 {
                        bus.set_mapping(page, bank);
                    }
                }
            }
            Mnemonic::Tma => {
                let mask = instr.operand.byte();
                if mask != 0 {
                    let page = u8::try_from(mask.trailing_zeros()).unwrap_or(0);
                    let bank = bus.mapping(page);
                    self.regs.set_a(bank);
                }
            }
        }

        u32::from(spec.cost.resolve(taken))
    }
}

impl Cpu for Core {
    type State = CoreState;

    fn step<B: Bus>(&mut self, bus: &mut B) -> StepOutcome {
        match self.run_state {
            RunState::Stopped => {
                return StepOutcome::Parked {
                    run_state: RunState::Stopped,
                }
            }
            RunState::WaitingForInterrupt => {
                if !bus.wake_pending() {
                    return StepOutcome::Parked {
                        run_state: RunState::WaitingForInterrupt,
                    };
                }
                self.run_state = RunState::Running;
            }
            RunState::Running => {}
        }

        if let Some(request) = bus.poll_interrupt(self.regs.flag_is_set(FLAG_I)) {
            self.enter_handler(bus, request.vector, false);
            return StepOutcome::Interrupt {
                source: request.source,
                cycles: interrupt_entry_cycles(),
            };
        }

        let mut pc = self.regs.pc();
        let decoded = Decoder::decode_with(|| {
            let byte = bus.read8(pc);
            pc = pc.wrapping_add(1);
            byte
        });
        self.regs.set_pc(pc);

        match decoded {
            Decoded::Valid(instr) => StepOutcome::Retired {
                cycles: self.execute(bus, &instr),
            },
            Decoded::Invalid { table, opcode } => {
                self.invalid_opcodes += 1;
                let at = pc.wrapping_sub(u16::from(decoded.width()));
                tracing::debug!(pc = at, opcode, ?table, "invalid opcode");
                StepOutcome::InvalidOpcode {
                    opcode,
                    cycles: u32::from(invalid_opcode_cycles(table)),
                }
            }
        }
    }

    fn reset<B: Bus>(&mut self, bus: &mut B) -> u32 {
        self.regs = RegisterFile::default();
        self.run_state = RunState::Running;
        let entry = read_u16_le(bus, RESET_VECTOR);
        self.regs.set_pc(entry);
        tracing::debug!(entry, "core reset");
        u32::from(cycle_cost(CycleCostKind::Reset).unwrap_or(7))
    }

    fn pc(&self) -> u16 {
        self.regs.pc()
    }

    fn run_state(&self) -> RunState {
        self.run_state
    }

    fn save_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.regs.to_bytes());
        out.push(self.run_state.as_u8());
    }

    fn parse_state(&self, payload: &[u8]) -> Result<CoreState, SnapshotError> {
        let mut reader = StateReader::new(CPU_TAG, payload);
        let mut raw = [0_u8; REGISTER_FILE_BYTES];
        raw.copy_from_slice(reader.take(REGISTER_FILE_BYTES)?);
        let run_state = RunState::from_u8(reader.u8()?)
            .ok_or_else(|| SnapshotError::corrupt(CPU_TAG, "unknown run state"))?;
        reader.finish()?;
        Ok(CoreState {
            regs: RegisterFile::from_bytes(raw),
            run_state,
        })
    }

    fn apply_state(&mut self, state: CoreState) {
        self.regs = state.regs;
        self.run_state = state.run_state;
    }
}
