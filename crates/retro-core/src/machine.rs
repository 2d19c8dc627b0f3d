//! A complete machine: CPU, address space, scheduler and interrupt controller.

use std::collections::BTreeSet;

use crate::api::{
    Bus, CoreConfig, Cpu, RunOutcome, StepOutcome, StopHandle, StopReason, TraceEvent, TraceSink,
};
use crate::device::{Device, DeviceId};
use crate::disasm::{disassemble, DisassemblyRow};
use crate::execute::Core;
use crate::fault::ConfigError;
use crate::interrupt::{InterruptController, InterruptRequest, SourceConfig};
use crate::memory::{AddressSpace, BankBinding, BlockId, BlockKind, PageGeometry, WritePolicy};
use crate::scheduler::Scheduler;
use crate::state::RunState;

/// The [`Bus`] a CPU sees while a machine steps it.
pub struct SystemBus<'a> {
    space: &'a mut AddressSpace,
    scheduler: &'a mut Scheduler,
    interrupts: &'a mut InterruptController,
}

impl<'a> SystemBus<'a> {
    /// Borrows the machine parts a step needs.
    pub fn new(
        space: &'a mut AddressSpace,
        scheduler: &'a mut Scheduler,
        interrupts: &'a mut InterruptController,
    ) -> Self {
        Self {
            space,
            scheduler,
            interrupts,
        }
    }
}

impl Bus for SystemBus<'_> {
    #[inline]
    fn read8(&mut self, addr: u16) -> u8 {
        self.space.read(addr, self.scheduler, self.interrupts)
    }

    #[inline]
    fn write8(&mut self, addr: u16, value: u8) {
        self.space.write(addr, value, self.scheduler, self.interrupts);
    }

    fn poll_interrupt(&mut self, cpu_masked: bool) -> Option<InterruptRequest> {
        self.interrupts.poll(cpu_masked)
    }

    fn wake_pending(&mut self) -> bool {
        self.interrupts.wake_pending()
    }

    fn interrupt_return(&mut self) {
        self.interrupts.complete();
    }

    fn set_mapping(&mut self, page: u8, bank: u8) {
        let page = usize::from(page);
        if page < self.space.pages().page_count() {
            self.space.pages_mut().map(page, u16::from(bank));
        }
    }

    fn mapping(&mut self, page: u8) -> u8 {
        self.space
            .pages()
            .bank_of(usize::from(page))
            .map_or(0, |bank| bank.to_le_bytes()[0])
    }
}

/// CPU plus everything it is wired to.
pub struct Machine<C: Cpu = Core> {
    pub(crate) config: CoreConfig,
    pub(crate) cpu: C,
    pub(crate) space: AddressSpace,
    pub(crate) scheduler: Scheduler,
    pub(crate) interrupts: InterruptController,
    stop: StopHandle,
    breakpoints: BTreeSet<u16>,
    resume_from: Option<u16>,
    trace: Option<Box<dyn TraceSink>>,
}

impl<C: Cpu + std::fmt::Debug> std::fmt::Debug for Machine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("config", &self.config)
            .field("cpu", &self.cpu)
            .field("space", &self.space)
            .field("scheduler", &self.scheduler)
            .field("interrupts", &self.interrupts)
            .field("breakpoints", &self.breakpoints)
            .finish_non_exhaustive()
    }
}

impl Machine<Core> {
    /// Builds a machine around the reference core.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid geometry.
    pub fn new(config: CoreConfig) -> Result<Self, ConfigError> {
        Self::with_cpu(Core::new(), config)
    }
}

impl<C: Cpu> Machine<C> {
    /// Builds a machine around `cpu` with the default NMI/IRQ wiring.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an invalid geometry.
    pub fn with_cpu(cpu: C, config: CoreConfig) -> Result<Self, ConfigError> {
        let geometry = config.geometry()?;
        Ok(Self {
            config,
            cpu,
            space: AddressSpace::new(geometry, config.bank_count, config.open_bus),
            scheduler: Scheduler::new(),
            interrupts: InterruptController::default(),
            stop: StopHandle::default(),
            breakpoints: BTreeSet::new(),
            resume_from: None,
            trace: None,
        })
    }

    /// Configuration the machine was built with.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Page geometry.
    #[must_use]
    pub const fn geometry(&self) -> PageGeometry {
        self.space.pages().geometry()
    }

    /// The CPU.
    #[must_use]
    pub const fn cpu(&self) -> &C {
        &self.cpu
    }

    /// The CPU, mutably.
    #[must_use]
    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    /// The address space.
    #[must_use]
    pub const fn address_space(&self) -> &AddressSpace {
        &self.space
    }

    /// The scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The interrupt controller.
    #[must_use]
    pub const fn interrupts(&self) -> &InterruptController {
        &self.interrupts
    }

    /// The interrupt controller, mutably (host-driven lines).
    #[must_use]
    pub fn interrupts_mut(&mut self) -> &mut InterruptController {
        &mut self.interrupts
    }

    /// Replaces the interrupt wiring.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TooManyInterruptSources`] beyond eight sources.
    pub fn wire_interrupts(&mut self, sources: &[SourceConfig]) -> Result<(), ConfigError> {
        self.interrupts = InterruptController::new(sources)?;
        Ok(())
    }

    /// Adds a zero-filled RAM block.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BlockNotPageAligned`] for a partial page.
    pub fn add_ram(&mut self, name: &str, len: usize) -> Result<BlockId, ConfigError> {
        self.space
            .pages_mut()
            .add_block(name, BlockKind::Ram, vec![0; len].into_boxed_slice())
    }

    /// Adds a ROM image.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BlockNotPageAligned`] for a partial page.
    pub fn add_rom(&mut self, name: &str, image: Vec<u8>) -> Result<BlockId, ConfigError> {
        self.space
            .pages_mut()
            .add_block(name, BlockKind::Rom, image.into_boxed_slice())
    }

    /// Binds consecutive banks from `first_bank` to every page of `block`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for banks or blocks out of range.
    pub fn bind_block(
        &mut self,
        first_bank: u16,
        block: BlockId,
        write: WritePolicy,
    ) -> Result<u16, ConfigError> {
        self.space.pages_mut().bind_block(first_bank, block, write)
    }

    /// Rebinds one physical bank.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for banks or blocks out of range, or a device
    /// binding that names no attached device.
    pub fn bind_bank(&mut self, bank: u16, binding: BankBinding) -> Result<(), ConfigError> {
        let device = match binding {
            BankBinding::Device(id)
            | BankBinding::Linear {
                write: WritePolicy::Device(id),
                ..
            } => Some(id),
            _ => None,
        };
        if let Some(id) = device {
            if id.0 >= self.space.devices().len() {
                return Err(ConfigError::UnknownDevice(id.0));
            }
        }
        self.space.pages_mut().bind_bank(bank, binding)
    }

    /// Points a logical page at a physical bank.
    pub fn map(&mut self, page: usize, bank: u16) {
        self.space.pages_mut().map(page, bank);
    }

    /// Attaches a device and runs its `attached` hook.
    pub fn attach_device(&mut self, device: Box<dyn Device>) -> DeviceId {
        let id = self.space.attach(device);
        self.space
            .with_device(id, &mut self.scheduler, &mut self.interrupts, |device, ctx| {
                device.attached(id, ctx);
            });
        id
    }

    /// Reads one byte with side effects, as the CPU would.
    pub fn read(&mut self, addr: u16) -> u8 {
        self.space
            .read(addr, &mut self.scheduler, &mut self.interrupts)
    }

    /// Writes one byte with side effects, as the CPU would.
    pub fn write(&mut self, addr: u16, value: u8) {
        self.space
            .write(addr, value, &mut self.scheduler, &mut self.interrupts);
    }

    /// Reads one byte without side effects.
    #[must_use]
    pub fn peek(&self, addr: u16) -> u8 {
        self.space.peek(addr)
    }

    /// Lists `count` instructions from `start` using side-effect-free reads.
    #[must_use]
    pub fn disassemble(&self, start: u16, count: usize) -> Vec<DisassemblyRow> {
        disassemble(start, count, |addr| self.space.peek(addr))
    }

    /// Handle the host can use to stop a running frame.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stops execution before the instruction at `pc`.
    pub fn add_breakpoint(&mut self, pc: u16) {
        self.breakpoints.insert(pc);
    }

    /// Removes a breakpoint; returns whether it existed.
    pub fn remove_breakpoint(&mut self, pc: u16) -> bool {
        self.breakpoints.remove(&pc)
    }

    /// Installs or removes the trace sink.
    pub fn set_trace_sink(&mut self, sink: Option<Box<dyn TraceSink>>) {
        self.trace = sink;
    }

    /// Takes the trace sink back.
    pub fn take_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.trace.take()
    }

    pub(crate) fn clear_resume(&mut self) {
        self.resume_from = None;
    }

    fn emit(&mut self, event: TraceEvent) {
        if !self.config.tracing_enabled {
            return;
        }
        if let Some(sink) = self.trace.as_mut() {
            sink.on_event(event);
        }
    }

    /// Resets devices and the CPU, then syncs every device.
    ///
    /// The clock keeps running; reset costs its documented cycles.
    pub fn reset(&mut self) {
        self.space
            .for_each_device(&mut self.scheduler, &mut self.interrupts, |_, device, ctx| {
                device.reset(ctx);
            });
        let cycles = {
            let mut bus = SystemBus::new(&mut self.space, &mut self.scheduler, &mut self.interrupts);
            self.cpu.reset(&mut bus)
        };
        self.resume_from = None;
        self.scheduler.advance(cycles);
        self.sync_devices();
    }

    /// Scheduler slow path: fires expired alarms, syncs every device and
    /// installs the next horizon.
    pub fn sync_devices(&mut self) {
        let now = self.scheduler.now();
        let Self {
            space,
            scheduler,
            interrupts,
            ..
        } = self;

        scheduler.begin_sync();
        let mut earliest: Option<u64> = None;
        space.for_each_device(scheduler, interrupts, |_, device, ctx| {
            if let Some(deadline) = device.sync(now, ctx) {
                earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
            }
        });

        while let Some((alarm, owner)) = scheduler.pop_expired() {
            space.with_device(owner, scheduler, interrupts, |device, ctx| {
                device.alarm(alarm, now, ctx);
            });
        }

        scheduler.finish_sync(earliest);
        let next_event = scheduler.next_event();
        self.emit(TraceEvent::HorizonReached {
            timestamp: now,
            next_event,
        });
    }

    /// Executes one step and services the scheduler if a horizon was crossed.
    ///
    /// A parked core skips ahead to the next horizon. Outside `run_frame`
    /// only device deadlines and alarms count as horizons.
    pub fn step(&mut self) -> StepOutcome {
        let pc = self.cpu.pc();
        let timestamp = self.scheduler.now();
        self.emit(TraceEvent::InstructionStart { pc, timestamp });

        let outcome = {
            let mut bus = SystemBus::new(&mut self.space, &mut self.scheduler, &mut self.interrupts);
            self.cpu.step(&mut bus)
        };

        let cycles = match outcome {
            StepOutcome::Parked { .. } => self.scheduler.idle_cycles(),
            StepOutcome::Retired { cycles } => {
                self.emit(TraceEvent::InstructionRetired { pc, cycles });
                cycles
            }
            StepOutcome::InvalidOpcode { opcode, cycles } => {
                self.emit(TraceEvent::InvalidOpcode { pc, opcode });
                cycles
            }
            StepOutcome::Interrupt { source, cycles } => {
                self.emit(TraceEvent::InterruptEntered { source, pc });
                cycles
            }
        };

        if self.scheduler.charge(cycles) {
            self.sync_devices();
        }
        outcome
    }

    /// Runs until the frame budget is spent, a stop is requested, a
    /// breakpoint is reached or the core stops.
    ///
    /// A frame cut short resumes where it left off on the next call; a
    /// finished frame's overshoot is deducted from the next one.
    pub fn run_frame(&mut self) -> RunOutcome {
        if self.scheduler.begin_frame(self.config.frame_budget_cycles) {
            tracing::trace!(now = self.scheduler.now(), "frame started");
        }
        let start = self.scheduler.now();
        let mut steps = 0_u64;

        let reason = loop {
            if self.scheduler.user_horizon_reached() {
                break StopReason::FrameComplete;
            }
            if self.stop.take() {
                break StopReason::StopRequested;
            }
            let pc = self.cpu.pc();
            if self.resume_from.take() != Some(pc) && self.breakpoints.contains(&pc) {
                self.resume_from = Some(pc);
                break StopReason::Breakpoint(pc);
            }
            if self.cpu.run_state() == RunState::Stopped {
                break StopReason::CoreStopped;
            }

            if !matches!(self.step(), StepOutcome::Parked { .. }) {
                steps += 1;
            }
        };

        RunOutcome {
            cycles: self.scheduler.now() - start,
            steps,
            reason,
            overshoot: self.scheduler.overshoot(),
        }
    }
}
