//! Versioned save-state container.
//!
//! Layout: `RCSS` magic, little-endian `u16` version, then blocks of
//! `[tag: 4][len: u32 LE][payload]`. Core blocks come first (`REGS`, `MAPS`,
//! `SCHD`, `IRQC`, one `RAMB` per RAM block), then one block per device in
//! registration order under the device's own tag. Unknown blocks are skipped.
//!
//! Restore validates every block before touching live state, then re-runs
//! `map()` for every logical page so fast pages match the restored banks.
//! Horizons are not saved; the first step after a restore takes the slow
//! path and re-derives them.

use std::path::Path;

use crate::api::{Cpu, SnapshotVersion};
use crate::device::{DeviceTag, StateReader};
use crate::execute::CPU_TAG;
use crate::fault::SnapshotError;
use crate::interrupt::INTERRUPT_TAG;
use crate::machine::Machine;
use crate::memory::{BlockId, BlockKind};
use crate::scheduler::SCHEDULER_TAG;

/// Magic bytes opening every save state.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"RCSS";
/// Block tag for the page mapping and data-bus latch.
pub const MAPPING_TAG: DeviceTag = *b"MAPS";
/// Block tag for one RAM block.
pub const RAM_TAG: DeviceTag = *b"RAMB";

const HEADER_BYTES: usize = 6;
const BLOCK_HEADER_BYTES: usize = 8;

/// One block borrowed from a serialized save state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block<'a> {
    /// Block tag.
    pub tag: DeviceTag,
    /// Block payload.
    pub payload: &'a [u8],
}

fn push_block(out: &mut Vec<u8>, tag: DeviceTag, write: impl FnOnce(&mut Vec<u8>)) {
    out.extend_from_slice(&tag);
    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    write(out);
    let len = u32::try_from(out.len() - len_at - 4).unwrap_or(u32::MAX);
    out[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
}

/// Splits a save state into its blocks after checking magic and version.
///
/// # Errors
///
/// Returns [`SnapshotError::BadMagic`], [`SnapshotError::UnsupportedVersion`]
/// or [`SnapshotError::Truncated`].
pub fn parse_blocks(bytes: &[u8]) -> Result<(SnapshotVersion, Vec<Block<'_>>), SnapshotError> {
    if bytes.len() < SNAPSHOT_MAGIC.len() {
        return Err(SnapshotError::Truncated {
            offset: bytes.len(),
        });
    }
    if bytes[..4] != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    if bytes.len() < HEADER_BYTES {
        return Err(SnapshotError::Truncated {
            offset: bytes.len(),
        });
    }
    let found = u16::from_le_bytes([bytes[4], bytes[5]]);
    let version = SnapshotVersion::from_u16(found).ok_or(SnapshotError::UnsupportedVersion {
        found,
        supported: SnapshotVersion::CURRENT.as_u16(),
    })?;

    let mut blocks = Vec::new();
    let mut offset = HEADER_BYTES;
    while offset < bytes.len() {
        if bytes.len() - offset < BLOCK_HEADER_BYTES {
            return Err(SnapshotError::Truncated { offset });
        }
        let mut tag = [0_u8; 4];
        tag.copy_from_slice(&bytes[offset..offset + 4]);
        let mut len = [0_u8; 4];
        len.copy_from_slice(&bytes[offset + 4..offset + 8]);
        let len = usize::try_from(u32::from_le_bytes(len)).unwrap_or(usize::MAX);
        let start = offset + BLOCK_HEADER_BYTES;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= bytes.len())
            .ok_or(SnapshotError::Truncated { offset: start })?;
        blocks.push(Block {
            tag,
            payload: &bytes[start..end],
        });
        offset = end;
    }
    Ok((version, blocks))
}

fn take_block<'a>(
    blocks: &[Block<'a>],
    used: &mut [bool],
    tag: DeviceTag,
) -> Result<&'a [u8], SnapshotError> {
    let index = blocks
        .iter()
        .enumerate()
        .position(|(index, block)| !used[index] && block.tag == tag)
        .ok_or_else(|| SnapshotError::MissingBlock(String::from_utf8_lossy(&tag).into_owned()))?;
    used[index] = true;
    Ok(blocks[index].payload)
}

struct MappingState {
    latch: u8,
    banks: Vec<u16>,
}

fn parse_mapping(payload: &[u8], page_count: usize) -> Result<MappingState, SnapshotError> {
    let mut reader = StateReader::new(MAPPING_TAG, payload);
    let latch = reader.u8()?;
    let count = usize::from(reader.u16()?);
    if count != page_count {
        return Err(SnapshotError::corrupt(
            MAPPING_TAG,
            format!("{count} pages saved, geometry has {page_count}"),
        ));
    }
    let banks = (0..count)
        .map(|_| reader.u16())
        .collect::<Result<Vec<_>, _>>()?;
    reader.finish()?;
    Ok(MappingState { latch, banks })
}

impl<C: Cpu> Machine<C> {
    /// Serializes the whole machine.
    #[must_use]
    pub fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&SNAPSHOT_MAGIC);
        out.extend_from_slice(&SnapshotVersion::CURRENT.as_u16().to_le_bytes());

        push_block(&mut out, CPU_TAG, |out| self.cpu.save_state(out));
        push_block(&mut out, MAPPING_TAG, |out| {
            let mapping = self.space.pages().mapping();
            out.push(self.space.latch());
            let count = u16::try_from(mapping.len()).unwrap_or(u16::MAX);
            out.extend_from_slice(&count.to_le_bytes());
            for bank in mapping {
                out.extend_from_slice(&bank.to_le_bytes());
            }
        });
        push_block(&mut out, SCHEDULER_TAG, |out| self.scheduler.save_state(out));
        push_block(&mut out, INTERRUPT_TAG, |out| self.interrupts.save_state(out));
        for (index, block) in self.space.pages().blocks().iter().enumerate() {
            if block.kind() != BlockKind::Ram {
                continue;
            }
            push_block(&mut out, RAM_TAG, |out| {
                let index = u16::try_from(index).unwrap_or(u16::MAX);
                out.extend_from_slice(&index.to_le_bytes());
                out.extend_from_slice(block.data());
            });
        }
        for device in self.space.devices() {
            push_block(&mut out, device.tag(), |out| device.save_state(out));
        }
        out
    }

    /// Restores a save state produced by [`Self::save_state`].
    ///
    /// Either every block applies or nothing changes.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError`] for a bad header, a truncated or corrupt
    /// block, or a missing required block.
    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<(), SnapshotError> {
        let (version, blocks) = parse_blocks(bytes)?;
        let mut used = vec![false; blocks.len()];
        let mut take = |tag: DeviceTag| take_block(&blocks, &mut used, tag);

        let cpu = self.cpu.parse_state(take(CPU_TAG)?)?;
        let mapping = parse_mapping(take(MAPPING_TAG)?, self.space.pages().page_count())?;
        let scheduler = self.scheduler.parse_state(take(SCHEDULER_TAG)?)?;
        let interrupts = self.interrupts.parse_state(take(INTERRUPT_TAG)?)?;

        let mut ram: Vec<(BlockId, &[u8])> = Vec::new();
        for (index, block) in self.space.pages().blocks().iter().enumerate() {
            if block.kind() != BlockKind::Ram {
                continue;
            }
            let mut reader = StateReader::new(RAM_TAG, take(RAM_TAG)?);
            let saved_index = usize::from(reader.u16()?);
            if saved_index != index {
                return Err(SnapshotError::corrupt(
                    RAM_TAG,
                    format!("expected block {index}, found {saved_index}"),
                ));
            }
            let data = reader.take(block.data().len())?;
            reader.finish()?;
            ram.push((BlockId(index), data));
        }

        let mut device_payloads = Vec::with_capacity(self.space.devices().len());
        for device in self.space.devices() {
            let payload = take(device.tag())?;
            device.check_state(payload)?;
            device_payloads.push(payload);
        }

        let skipped = used.iter().filter(|&&used| !used).count();
        if skipped > 0 {
            tracing::debug!(skipped, "unknown save-state blocks ignored");
        }

        self.cpu.apply_state(cpu);
        self.scheduler.apply_state(scheduler);
        self.interrupts.apply_state(interrupts);
        for (id, data) in ram {
            if let Some(block) = self.space.pages_mut().block_mut(id) {
                block.data_mut().copy_from_slice(data);
            }
        }
        for (device, payload) in self.space.devices_mut().iter_mut().zip(device_payloads) {
            device.load_state(payload);
        }
        self.space.set_latch(mapping.latch);
        for (page, bank) in mapping.banks.into_iter().enumerate() {
            self.space.pages_mut().map(page, bank);
        }
        self.clear_resume();
        tracing::debug!(?version, now = self.scheduler.now(), "save state restored");
        Ok(())
    }

    /// Writes [`Self::save_state`] to a file.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Io`] when the file cannot be written.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        std::fs::write(path, self.save_state())?;
        Ok(())
    }

    /// Reads a file and restores it.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Io`] when the file cannot be read, otherwise
    /// as [`Self::restore_state`].
    pub fn load_from_path(&mut self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let bytes = std::fs::read(path)?;
        self.restore_state(&bytes)
    }
}
