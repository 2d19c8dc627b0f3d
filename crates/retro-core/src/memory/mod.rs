//! Banked memory bus: page table, fast pages and handler dispatch.

/// Open-bus policy, counters and multi-byte access helpers.
pub mod access;
/// Page geometry, bank bindings and the fast-page cache.
pub mod map;

pub use access::{read_u16_le, write_u16_le, BusStats, OpenBusPolicy};
pub use map::{
    BankBinding, BlockId, BlockKind, FastPage, MemoryBlock, PageGeometry, PageTable, Resolution,
    WritePolicy, LOGICAL_ADDRESS_BITS, MAX_PAGE_SHIFT, MIN_PAGE_SHIFT,
};

use crate::device::{BusContext, Device, DeviceId};
use crate::fault::FaultCode;
use crate::interrupt::InterruptController;
use crate::scheduler::Scheduler;

/// Logical address space owned by one machine.
///
/// Reads and writes take the fast page when one exists and fall back to the
/// bank binding otherwise. The scheduler and interrupt controller are passed
/// per access so device handlers can borrow them alongside the page table.
pub struct AddressSpace {
    pages: PageTable,
    devices: Vec<Box<dyn Device>>,
    open_bus: OpenBusPolicy,
    latch: u8,
    stats: BusStats,
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pages", &self.pages)
            .field("devices", &self.devices.len())
            .field("open_bus", &self.open_bus)
            .field("latch", &self.latch)
            .field("stats", &self.stats)
            .finish()
    }
}

impl AddressSpace {
    /// Creates an empty address space.
    #[must_use]
    pub fn new(geometry: PageGeometry, bank_count: u16, open_bus: OpenBusPolicy) -> Self {
        Self {
            pages: PageTable::new(geometry, bank_count),
            devices: Vec::new(),
            open_bus,
            latch: 0,
            stats: BusStats::default(),
        }
    }

    /// Page table.
    #[must_use]
    pub const fn pages(&self) -> &PageTable {
        &self.pages
    }

    /// Page table, mutably.
    #[must_use]
    pub fn pages_mut(&mut self) -> &mut PageTable {
        &mut self.pages
    }

    /// Registers a device; ids are assigned in registration order.
    pub fn attach(&mut self, device: Box<dyn Device>) -> DeviceId {
        let id = DeviceId(self.devices.len());
        tracing::debug!(
            device = id.0,
            tag = %String::from_utf8_lossy(&device.tag()),
            "device attached"
        );
        self.devices.push(device);
        id
    }

    /// Attached devices in registration order.
    #[must_use]
    pub fn devices(&self) -> &[Box<dyn Device>] {
        &self.devices
    }

    /// Attached devices, mutably (save-state restore).
    #[must_use]
    pub fn devices_mut(&mut self) -> &mut [Box<dyn Device>] {
        &mut self.devices
    }

    /// Current data-bus latch.
    #[must_use]
    pub const fn latch(&self) -> u8 {
        self.latch
    }

    /// Overwrites the data-bus latch (save-state restore).
    pub const fn set_latch(&mut self, value: u8) {
        self.latch = value;
    }

    /// Value an unanswered read returns right now.
    #[must_use]
    pub const fn open_bus_value(&self) -> u8 {
        self.open_bus.value(self.latch)
    }

    /// Slow-path counters.
    #[must_use]
    pub const fn stats(&self) -> BusStats {
        self.stats
    }

    /// Runs `f` against one device with a handler context.
    pub fn with_device<R>(
        &mut self,
        id: DeviceId,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
        f: impl FnOnce(&mut dyn Device, &mut BusContext<'_>) -> R,
    ) -> Option<R> {
        let Self { pages, devices, .. } = self;
        let device = devices.get_mut(id.0)?;
        let mut ctx = BusContext {
            pages,
            scheduler,
            interrupts,
        };
        Some(f(device.as_mut(), &mut ctx))
    }

    /// Runs `f` against every device in registration order.
    pub fn for_each_device(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
        mut f: impl FnMut(DeviceId, &mut dyn Device, &mut BusContext<'_>),
    ) {
        let Self { pages, devices, .. } = self;
        let mut ctx = BusContext {
            pages,
            scheduler,
            interrupts,
        };
        for (index, device) in devices.iter_mut().enumerate() {
            f(DeviceId(index), device.as_mut(), &mut ctx);
        }
    }

    /// Reads one byte with full side effects.
    #[inline]
    pub fn read(
        &mut self,
        addr: u16,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) -> u8 {
        let value = match self.pages.read_fast(addr) {
            Some(value) => value,
            None => self.read_slow(addr, scheduler, interrupts),
        };
        self.latch = value;
        value
    }

    /// Writes one byte with full side effects.
    #[inline]
    pub fn write(
        &mut self,
        addr: u16,
        value: u8,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        self.latch = value;
        if !self.pages.write_fast(addr, value) {
            self.write_slow(addr, value, scheduler, interrupts);
        }
    }

    /// Reads without side effects: no latch update, no handler state change.
    #[must_use]
    pub fn peek(&self, addr: u16) -> u8 {
        if let Some(value) = self.pages.read_fast(addr) {
            return value;
        }
        match self.pages.resolve(addr) {
            Resolution::Device { device, physical } => self
                .devices
                .get(device.0)
                .and_then(|handler| handler.peek(physical))
                .unwrap_or_else(|| self.open_bus_value()),
            _ => self.open_bus_value(),
        }
    }

    fn read_slow(
        &mut self,
        addr: u16,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) -> u8 {
        match self.pages.resolve(addr) {
            Resolution::Device { device, physical } => {
                self.stats.device_accesses += 1;
                let open = self.open_bus_value();
                self.with_device(device, scheduler, interrupts, |handler, ctx| {
                    handler.read(physical, ctx)
                })
                .unwrap_or(open)
            }
            _ => {
                self.stats.unmapped_reads += 1;
                tracing::trace!(addr, fault = %FaultCode::BusFault, "read from unmapped bank");
                self.open_bus_value()
            }
        }
    }

    fn write_slow(
        &mut self,
        addr: u16,
        value: u8,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        match self.pages.resolve(addr) {
            Resolution::Device { device, physical }
            | Resolution::InterceptedWrite { device, physical } => {
                self.stats.device_accesses += 1;
                let handled = self.with_device(device, scheduler, interrupts, |handler, ctx| {
                    handler.write(physical, value, ctx);
                });
                if handled.is_none() {
                    tracing::warn!(addr, device = device.0, "write to detached device");
                }
            }
            Resolution::ReadOnly => {
                self.stats.ignored_writes += 1;
            }
            Resolution::Fast { .. } | Resolution::Unmapped => {
                self.stats.unmapped_writes += 1;
                tracing::trace!(addr, value, fault = %FaultCode::BusFault, "write to unmapped bank");
            }
        }
    }
}
