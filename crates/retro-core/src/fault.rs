use thiserror::Error;

/// In-band fault codes observed while executing.
///
/// None of these stop emulation. They are reported through step outcomes,
/// trace events and counters so that the interpreter's hot path stays
/// branch-predictable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultCode {
    /// Access to a bank with no backing storage or device; resolved to open bus.
    #[error("access to unmapped bus region")]
    BusFault = 0x01,
    /// Fetched opcode has no table entry; executed as the documented no-op.
    #[error("invalid opcode executed as documented no-op")]
    InvalidOpcode = 0x02,
}

impl FaultCode {
    /// Converts a fault code to its stable byte value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable byte value back into a fault code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::BusFault),
            0x02 => Some(Self::InvalidOpcode),
            _ => None,
        }
    }
}

/// Errors raised while restoring or persisting a save state.
///
/// Every variant is raised before any live state is touched.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Header magic does not identify a save state.
    #[error("not a save state (bad magic)")]
    BadMagic,
    /// Snapshot was written by a newer core than this one supports.
    #[error("unsupported save-state version {found} (newest supported is {supported})")]
    UnsupportedVersion {
        /// Version stored in the snapshot header.
        found: u16,
        /// Newest version this build can read.
        supported: u16,
    },
    /// Snapshot ended before a header or block was complete.
    #[error("save state truncated at byte {offset}")]
    Truncated {
        /// Byte offset at which more data was expected.
        offset: usize,
    },
    /// A known block had a malformed payload.
    #[error("corrupt save-state block `{tag}`: {reason}")]
    Corrupt {
        /// Four-character block tag.
        tag: String,
        /// Human-readable reason.
        reason: String,
    },
    /// A required block was absent.
    #[error("save state is missing required block `{0}`")]
    MissingBlock(String),
    /// File I/O failed while reading or writing a snapshot.
    #[error("save-state i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SnapshotError {
    /// Builds a [`SnapshotError::Corrupt`] for a block tag.
    #[must_use]
    pub fn corrupt(tag: [u8; 4], reason: impl Into<String>) -> Self {
        Self::Corrupt {
            tag: String::from_utf8_lossy(&tag).into_owned(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while assembling a machine, never inside the run loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Page shift must leave between 2 and 256 logical pages.
    #[error("page shift {0} is outside 8..=15")]
    PageShiftOutOfRange(u8),
    /// Memory blocks must be a whole number of pages.
    #[error("block `{name}` is {len} bytes, not a multiple of the {page_size}-byte page")]
    BlockNotPageAligned {
        /// Block name.
        name: String,
        /// Block length in bytes.
        len: usize,
        /// Page size in bytes.
        page_size: usize,
    },
    /// Bank index is beyond the physical bank table.
    #[error("physical bank {bank} is beyond the {count}-entry bank table")]
    BankOutOfRange {
        /// Requested bank.
        bank: u16,
        /// Number of banks in the table.
        count: usize,
    },
    /// A block slice does not fit inside its block.
    #[error("block {block} has no page at offset {offset:#x}")]
    BlockRangeOutOfBounds {
        /// Block index.
        block: usize,
        /// Byte offset into the block.
        offset: usize,
    },
    /// Device id does not name an attached device.
    #[error("no device with id {0}")]
    UnknownDevice(usize),
    /// Interrupt source index is beyond the controller's line count.
    #[error("interrupt source {0} is beyond the controller's lines")]
    UnknownInterruptSource(u8),
    /// Every interrupt line is already wired.
    #[error("interrupt controller supports at most {0} sources")]
    TooManyInterruptSources(usize),
}
