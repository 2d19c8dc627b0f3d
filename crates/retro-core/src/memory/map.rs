//! Logical page table, physical bank table and fast-page cache.

use crate::device::DeviceId;
use crate::fault::ConfigError;

/// Smallest supported page shift (256-byte pages).
pub const MIN_PAGE_SHIFT: u8 = 8;
/// Largest supported page shift (32 KiB pages).
pub const MAX_PAGE_SHIFT: u8 = 15;
/// Logical address width of the reference core.
pub const LOGICAL_ADDRESS_BITS: u8 = 16;

/// Fixed page geometry of one address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PageGeometry {
    page_shift: u8,
}

impl PageGeometry {
    /// Validates a page shift.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PageShiftOutOfRange`] outside `8..=15`.
    pub const fn new(page_shift: u8) -> Result<Self, ConfigError> {
        if page_shift < MIN_PAGE_SHIFT || page_shift > MAX_PAGE_SHIFT {
            return Err(ConfigError::PageShiftOutOfRange(page_shift));
        }
        Ok(Self { page_shift })
    }

    /// Address bits consumed by the in-page offset.
    #[must_use]
    pub const fn page_shift(self) -> u8 {
        self.page_shift
    }

    /// Page (and bank) size in bytes.
    #[must_use]
    pub const fn page_size(self) -> usize {
        1 << self.page_shift
    }

    /// Number of logical pages covering the 16-bit address space.
    #[must_use]
    pub const fn page_count(self) -> usize {
        1 << (LOGICAL_ADDRESS_BITS - self.page_shift)
    }

    /// Logical page holding `addr`.
    #[must_use]
    pub const fn page_of(self, addr: u16) -> usize {
        (addr >> self.page_shift) as usize
    }

    /// Offset of `addr` inside its page.
    #[must_use]
    pub const fn offset_of(self, addr: u16) -> usize {
        addr as usize & (self.page_size() - 1)
    }

    /// Physical address of `addr` when its page is mapped to `bank`.
    #[must_use]
    pub const fn physical(self, bank: u16, addr: u16) -> u32 {
        ((bank as u32) << self.page_shift) | self.offset_of(addr) as u32
    }
}

/// Index of a memory block inside its page table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Storage class of a memory block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BlockKind {
    /// Writable, captured in save states.
    Ram,
    /// Read-only image, never serialized.
    Rom,
}

/// Linear backing storage owned by the address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    name: String,
    kind: BlockKind,
    data: Box<[u8]>,
}

impl MemoryBlock {
    /// Block name used in logs and errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage class.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Raw contents.
    #[must_use]
    pub const fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw contents, for loaders and save-state restore.
    #[must_use]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// What happens to a write that lands in a linear bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WritePolicy {
    /// RAM: writes go straight to storage.
    Direct,
    /// ROM: writes are dropped.
    Ignore,
    /// ROM whose writes are intercepted by a bank controller.
    Device(DeviceId),
}

/// Binding of one physical bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BankBinding {
    /// Nothing answers; reads return the open-bus value.
    #[default]
    Unmapped,
    /// One page-sized slice of a memory block.
    Linear {
        /// Backing block.
        block: BlockId,
        /// Byte offset of the bank inside the block.
        offset: usize,
        /// Write handling for this bank.
        write: WritePolicy,
    },
    /// Memory-mapped I/O answered by a device.
    Device(DeviceId),
}

/// Cached direct access to the storage behind one logical page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FastPage {
    /// Backing block.
    pub block: BlockId,
    /// Byte offset of the page inside the block.
    pub base: usize,
    /// Writes may bypass handlers.
    pub writable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageEntry {
    bank: u16,
    fast: Option<FastPage>,
}

/// How one logical address resolves right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    /// Served from a fast page.
    Fast {
        /// Backing block.
        block: BlockId,
        /// Byte index inside the block.
        index: usize,
        /// Writes go straight to storage.
        writable: bool,
    },
    /// Served by a device handler.
    Device {
        /// Answering device.
        device: DeviceId,
        /// Full physical address passed to the handler.
        physical: u32,
    },
    /// Linear bank whose writes go to a bank controller (reads are fast).
    InterceptedWrite {
        /// Bank controller.
        device: DeviceId,
        /// Full physical address passed to the handler.
        physical: u32,
    },
    /// Linear read-only bank, writes dropped.
    ReadOnly,
    /// No backing; open bus.
    Unmapped,
}

/// Logical-to-physical page table with a fast-page cache per logical page.
///
/// Every mutation that can change what a logical page points at refreshes the
/// cache for each affected page before returning.
#[derive(Debug, Clone)]
pub struct PageTable {
    geometry: PageGeometry,
    pages: Vec<PageEntry>,
    banks: Vec<BankBinding>,
    blocks: Vec<MemoryBlock>,
}

impl PageTable {
    /// Creates a table with every page on bank 0 and every bank unmapped.
    #[must_use]
    pub fn new(geometry: PageGeometry, bank_count: u16) -> Self {
        Self {
            geometry,
            pages: vec![PageEntry { bank: 0, fast: None }; geometry.page_count()],
            banks: vec![BankBinding::Unmapped; usize::from(bank_count)],
            blocks: Vec::new(),
        }
    }

    /// Page geometry.
    #[must_use]
    pub const fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    /// Number of logical pages.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of physical banks.
    #[must_use]
    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    /// Adds a backing block.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BlockNotPageAligned`] when the length is not a
    /// non-zero multiple of the page size.
    pub fn add_block(
        &mut self,
        name: impl Into<String>,
        kind: BlockKind,
        data: Box<[u8]>,
    ) -> Result<BlockId, ConfigError> {
        let name = name.into();
        let page_size = self.geometry.page_size();
        if data.is_empty() || data.len() % page_size != 0 {
            return Err(ConfigError::BlockNotPageAligned {
                name,
                len: data.len(),
                page_size,
            });
        }
        let id = BlockId(self.blocks.len());
        tracing::debug!(block = id.0, %name, ?kind, len = data.len(), "memory block added");
        self.blocks.push(MemoryBlock { name, kind, data });
        Ok(id)
    }

    /// All blocks in registration order.
    #[must_use]
    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    /// One block.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&MemoryBlock> {
        self.blocks.get(id.0)
    }

    /// One block, mutably.
    #[must_use]
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut MemoryBlock> {
        self.blocks.get_mut(id.0)
    }

    /// Rebinds a physical bank and refreshes every page currently on it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BankOutOfRange`] for a bank beyond the table and
    /// [`ConfigError::BlockRangeOutOfBounds`] when a linear binding does not
    /// name a full page inside an existing block.
    pub fn bind_bank(&mut self, bank: u16, binding: BankBinding) -> Result<(), ConfigError> {
        let count = self.banks.len();
        if usize::from(bank) >= count {
            return Err(ConfigError::BankOutOfRange { bank, count });
        }
        if let BankBinding::Linear { block, offset, .. } = binding {
            let fits = self.blocks.get(block.0).is_some_and(|b| {
                offset % self.geometry.page_size() == 0
                    && offset + self.geometry.page_size() <= b.data.len()
            });
            if !fits {
                return Err(ConfigError::BlockRangeOutOfBounds {
                    block: block.0,
                    offset,
                });
            }
        }

        self.banks[usize::from(bank)] = binding;
        for page in 0..self.pages.len() {
            if self.pages[page].bank == bank {
                self.refresh(page);
            }
        }
        Ok(())
    }

    /// Binds consecutive banks starting at `first_bank` to every page of a block.
    ///
    /// Returns the number of banks bound.
    ///
    /// # Errors
    ///
    /// Same as [`Self::bind_bank`].
    pub fn bind_block(
        &mut self,
        first_bank: u16,
        block: BlockId,
        write: WritePolicy,
    ) -> Result<u16, ConfigError> {
        let len = self
            .blocks
            .get(block.0)
            .map(|b| b.data.len())
            .ok_or(ConfigError::BlockRangeOutOfBounds {
                block: block.0,
                offset: 0,
            })?;
        let pages = len / self.geometry.page_size();
        let count = u16::try_from(pages).map_err(|_| ConfigError::BankOutOfRange {
            bank: first_bank,
            count: self.banks.len(),
        })?;
        for index in 0..count {
            let bank = first_bank
                .checked_add(index)
                .ok_or(ConfigError::BankOutOfRange {
                    bank: u16::MAX,
                    count: self.banks.len(),
                })?;
            self.bind_bank(
                bank,
                BankBinding::Linear {
                    block,
                    offset: usize::from(index) * self.geometry.page_size(),
                    write,
                },
            )?;
        }
        Ok(count)
    }

    /// Current binding of a physical bank; out-of-range banks are unmapped.
    #[must_use]
    pub fn binding(&self, bank: u16) -> BankBinding {
        self.banks
            .get(usize::from(bank))
            .copied()
            .unwrap_or(BankBinding::Unmapped)
    }

    /// Points a logical page at a physical bank and refreshes its fast page.
    ///
    /// Out-of-range pages are ignored. Banks beyond the table resolve as open
    /// bus.
    pub fn map(&mut self, page: usize, bank: u16) {
        let Some(entry) = self.pages.get_mut(page) else {
            tracing::warn!(page, bank, "map() ignored: logical page out of range");
            return;
        };
        entry.bank = bank;
        self.refresh(page);
        tracing::trace!(page, bank, fast = self.pages[page].fast.is_some(), "page mapped");
    }

    /// Physical bank of a logical page.
    #[must_use]
    pub fn bank_of(&self, page: usize) -> Option<u16> {
        self.pages.get(page).map(|entry| entry.bank)
    }

    /// Physical banks of every logical page in page order.
    #[must_use]
    pub fn mapping(&self) -> Vec<u16> {
        self.pages.iter().map(|entry| entry.bank).collect()
    }

    /// Regenerates the fast page of every logical page from its bank.
    pub fn remap_all(&mut self) {
        for page in 0..self.pages.len() {
            self.refresh(page);
        }
    }

    /// Cached fast page of a logical page.
    #[must_use]
    pub fn fast_page(&self, page: usize) -> Option<FastPage> {
        self.pages.get(page).and_then(|entry| entry.fast)
    }

    /// Resolves a logical address in O(1).
    #[must_use]
    pub fn resolve(&self, addr: u16) -> Resolution {
        let page = self.geometry.page_of(addr);
        let entry = self.pages[page];
        let physical = self.geometry.physical(entry.bank, addr);
        if let Some(fast) = entry.fast {
            if !fast.writable {
                if let BankBinding::Linear {
                    write: WritePolicy::Device(device),
                    ..
                } = self.binding(entry.bank)
                {
                    return Resolution::InterceptedWrite { device, physical };
                }
                return Resolution::ReadOnly;
            }
            return Resolution::Fast {
                block: fast.block,
                index: fast.base + self.geometry.offset_of(addr),
                writable: fast.writable,
            };
        }
        match self.binding(entry.bank) {
            BankBinding::Device(device) => Resolution::Device { device, physical },
            BankBinding::Unmapped | BankBinding::Linear { .. } => Resolution::Unmapped,
        }
    }

    /// Reads through a fast page, if the page has one.
    #[inline]
    #[must_use]
    pub fn read_fast(&self, addr: u16) -> Option<u8> {
        let page = self.geometry.page_of(addr);
        let fast = self.pages[page].fast?;
        self.blocks[fast.block.0]
            .data
            .get(fast.base + self.geometry.offset_of(addr))
            .copied()
    }

    /// Writes through a writable fast page; returns `false` when the write
    /// must take the handler path.
    #[inline]
    pub fn write_fast(&mut self, addr: u16, value: u8) -> bool {
        let page = self.geometry.page_of(addr);
        let Some(fast) = self.pages[page].fast.filter(|fast| fast.writable) else {
            return false;
        };
        let index = fast.base + self.geometry.offset_of(addr);
        match self.blocks[fast.block.0].data.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn refresh(&mut self, page: usize) {
        let bank = self.pages[page].bank;
        self.pages[page].fast = match self.binding(bank) {
            BankBinding::Linear {
                block,
                offset,
                write,
            } => Some(FastPage {
                block,
                base: offset,
                writable: write == WritePolicy::Direct,
            }),
            BankBinding::Unmapped | BankBinding::Device(_) => None,
        };
    }
}
