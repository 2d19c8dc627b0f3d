//! Prioritised interrupt controller.
//!
//! Up to eight sources, lowest index most urgent. Each source is either
//! edge-triggered (every `assert`, or a rising edge through `set_line`,
//! latches a request that survives the line dropping again) or
//! level-triggered (pending exactly while the line is held). Non-maskable sources ignore both the CPU's interrupt-disable flag
//! and the controller mask.

use crate::device::StateReader;
use crate::fault::{ConfigError, SnapshotError};

/// Maximum number of interrupt sources.
pub const MAX_INTERRUPT_SOURCES: usize = 8;
/// Source index of the default non-maskable line.
pub const NMI_SOURCE: u8 = 0;
/// Source index of the default maskable line.
pub const IRQ_SOURCE: u8 = 1;
/// Vector of the default non-maskable line.
pub const NMI_VECTOR: u16 = 0xFFFA;
/// Vector of the default maskable line (shared with `BRK`).
pub const IRQ_VECTOR: u16 = 0xFFFE;
/// Save-state block tag for controller state.
pub const INTERRUPT_TAG: [u8; 4] = *b"IRQC";

/// How a source's line turns into a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Trigger {
    /// Latches on assertion; cleared when acknowledged.
    Edge,
    /// Pending while asserted; cleared only by deasserting.
    Level,
}

/// Static wiring of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SourceConfig {
    /// Trigger mode.
    pub trigger: Trigger,
    /// Whether the CPU flag and controller mask can hold it off.
    pub maskable: bool,
    /// Address of the little-endian handler vector.
    pub vector: u16,
}

impl SourceConfig {
    /// Edge-triggered non-maskable line at `vector`.
    #[must_use]
    pub const fn nmi(vector: u16) -> Self {
        Self {
            trigger: Trigger::Edge,
            maskable: false,
            vector,
        }
    }

    /// Level-triggered maskable line at `vector`.
    #[must_use]
    pub const fn irq(vector: u16) -> Self {
        Self {
            trigger: Trigger::Level,
            maskable: true,
            vector,
        }
    }
}

/// An acknowledged request the CPU must enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterruptRequest {
    /// Source index.
    pub source: u8,
    /// Handler vector address.
    pub vector: u16,
}

/// Pending, masked and in-service state for every source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptController {
    sources: Vec<SourceConfig>,
    pending: u8,
    lines: u8,
    mask: u8,
    in_service: u8,
}

impl Default for InterruptController {
    /// NMI on source 0 and IRQ on source 1 at the 6502 vectors.
    fn default() -> Self {
        Self {
            sources: vec![SourceConfig::nmi(NMI_VECTOR), SourceConfig::irq(IRQ_VECTOR)],
            pending: 0,
            lines: 0,
            mask: 0,
            in_service: 0,
        }
    }
}

const fn bit(source: u8) -> u8 {
    1 << source
}

impl InterruptController {
    /// Creates a controller wired with `sources`, in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TooManyInterruptSources`] beyond eight sources.
    pub fn new(sources: &[SourceConfig]) -> Result<Self, ConfigError> {
        if sources.len() > MAX_INTERRUPT_SOURCES {
            return Err(ConfigError::TooManyInterruptSources(MAX_INTERRUPT_SOURCES));
        }
        Ok(Self {
            sources: sources.to_vec(),
            pending: 0,
            lines: 0,
            mask: 0,
            in_service: 0,
        })
    }

    /// Wires one more source at the lowest priority.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TooManyInterruptSources`] when all lines are used.
    pub fn add_source(&mut self, config: SourceConfig) -> Result<u8, ConfigError> {
        let index = u8::try_from(self.sources.len())
            .ok()
            .filter(|&index| usize::from(index) < MAX_INTERRUPT_SOURCES)
            .ok_or(ConfigError::TooManyInterruptSources(MAX_INTERRUPT_SOURCES))?;
        self.sources.push(config);
        Ok(index)
    }

    /// Wiring of every source.
    #[must_use]
    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    fn config(&self, source: u8) -> Option<SourceConfig> {
        let config = self.sources.get(usize::from(source)).copied();
        if config.is_none() {
            tracing::debug!(source, "interrupt source not wired");
        }
        config
    }

    /// Asserts a source's line and latches its request.
    ///
    /// An edge source latches even when its line is already high, so a
    /// device re-asserting each period is never lost.
    pub fn assert(&mut self, source: u8) {
        let Some(config) = self.config(source) else {
            return;
        };
        let bit = bit(source);
        self.lines |= bit;
        self.pending |= bit;
        if config.trigger == Trigger::Edge {
            tracing::trace!(source, "edge request latched");
        }
    }

    /// Deasserts a source's line.
    ///
    /// A latched edge request stays pending until acknowledged.
    pub fn clear(&mut self, source: u8) {
        self.set_line(source, false);
    }

    /// Drives a source's line to `level`.
    ///
    /// Edge sources latch only on a low-to-high transition.
    pub fn set_line(&mut self, source: u8, level: bool) {
        let Some(config) = self.config(source) else {
            return;
        };
        let bit = bit(source);
        let was_high = self.lines & bit != 0;
        if level {
            self.lines |= bit;
        } else {
            self.lines &= !bit;
        }
        match config.trigger {
            Trigger::Edge => {
                if level && !was_high {
                    self.pending |= bit;
                }
            }
            Trigger::Level => {
                if level {
                    self.pending |= bit;
                } else {
                    self.pending &= !bit;
                }
            }
        }
    }

    /// Sets the controller mask; a set bit disables that maskable source.
    pub const fn set_mask(&mut self, mask: u8) {
        self.mask = mask;
    }

    /// Controller mask.
    #[must_use]
    pub const fn mask(&self) -> u8 {
        self.mask
    }

    /// Pending requests, one bit per source.
    #[must_use]
    pub const fn pending(&self) -> u8 {
        self.pending
    }

    /// Sources currently being serviced.
    #[must_use]
    pub const fn in_service(&self) -> u8 {
        self.in_service
    }

    /// Whether one source has a pending request.
    #[must_use]
    pub const fn is_pending(&self, source: u8) -> bool {
        source < 8 && self.pending & bit(source) != 0
    }

    fn deliverable(&self, cpu_masked: bool) -> u8 {
        let mut ready = 0_u8;
        for (index, config) in self.sources.iter().enumerate() {
            let bit = 1_u8 << index;
            if self.pending & bit == 0 {
                continue;
            }
            if config.maskable && (cpu_masked || self.mask & bit != 0) {
                continue;
            }
            ready |= bit;
        }
        ready
    }

    /// Highest-priority request deliverable now, without acknowledging it.
    #[must_use]
    pub fn peek(&self, cpu_masked: bool) -> Option<InterruptRequest> {
        let ready = self.deliverable(cpu_masked);
        if ready == 0 {
            return None;
        }
        // Sources are wired densely from index 0, so the bit index is in range.
        let source = u8::try_from(ready.trailing_zeros()).ok()?;
        let config = self.sources.get(usize::from(source))?;
        Some(InterruptRequest {
            source,
            vector: config.vector,
        })
    }

    /// Acknowledges and returns the highest-priority deliverable request.
    ///
    /// Edge requests are consumed; level requests stay pending while their
    /// line is held.
    pub fn poll(&mut self, cpu_masked: bool) -> Option<InterruptRequest> {
        let request = self.peek(cpu_masked)?;
        let bit = bit(request.source);
        if self.sources[usize::from(request.source)].trigger == Trigger::Edge {
            self.pending &= !bit;
        }
        self.in_service |= bit;
        tracing::trace!(source = request.source, vector = request.vector, "interrupt acknowledged");
        Some(request)
    }

    /// Whether a parked core waiting for an interrupt should wake.
    ///
    /// Ignores the CPU's interrupt-disable flag but honours the controller mask.
    #[must_use]
    pub fn wake_pending(&self) -> bool {
        self.deliverable(false) != 0
    }

    /// Retires the most urgent in-service source (return from interrupt).
    pub fn complete(&mut self) -> Option<u8> {
        if self.in_service == 0 {
            return None;
        }
        let source = u8::try_from(self.in_service.trailing_zeros()).ok()?;
        self.in_service &= !bit(source);
        Some(source)
    }

    /// Appends the serialized line, pending, mask and in-service bits.
    pub fn save_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[
            u8::try_from(self.sources.len()).unwrap_or(u8::MAX),
            self.lines,
            self.pending,
            self.mask,
            self.in_service,
        ]);
    }

    /// Validates a payload against this controller's wiring.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Corrupt`] on a malformed payload, a source
    /// count mismatch or bits set for unwired sources.
    pub fn parse_state(&self, payload: &[u8]) -> Result<[u8; 4], SnapshotError> {
        let mut reader = StateReader::new(INTERRUPT_TAG, payload);
        let count = reader.u8()?;
        if usize::from(count) != self.sources.len() {
            return Err(SnapshotError::corrupt(INTERRUPT_TAG, "source count mismatch"));
        }
        let bits = [reader.u8()?, reader.u8()?, reader.u8()?, reader.u8()?];
        reader.finish()?;
        let wired = u8::try_from((1_u16 << count) - 1).unwrap_or(u8::MAX);
        if bits.iter().any(|&value| value & !wired != 0) {
            return Err(SnapshotError::corrupt(INTERRUPT_TAG, "bits set for unwired sources"));
        }
        Ok(bits)
    }

    /// Applies bits accepted by [`Self::parse_state`].
    pub const fn apply_state(&mut self, bits: [u8; 4]) {
        let [lines, pending, mask, in_service] = bits;
        self.lines = lines;
        self.pending = pending;
        self.mask = mask;
        self.in_service = in_service;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{
        InterruptController, InterruptRequest, SourceConfig, Trigger, IRQ_SOURCE, IRQ_VECTOR,
        NMI_SOURCE, NMI_VECTOR,
    };
    use crate::fault::ConfigError;

    #[test]
    fn edge_request_survives_line_drop_until_acknowledged() {
        let mut irq = InterruptController::default();
        irq.assert(NMI_SOURCE);
        irq.clear(NMI_SOURCE);
        assert!(irq.is_pending(NMI_SOURCE));
        assert_eq!(
            irq.poll(true),
            Some(InterruptRequest {
                source: NMI_SOURCE,
                vector: NMI_VECTOR
            })
        );
        assert!(!irq.is_pending(NMI_SOURCE));
    }

    #[test]
    fn held_edge_line_does_not_retrigger() {
        let mut irq = InterruptController::default();
        irq.set_line(NMI_SOURCE, true);
        assert!(irq.poll(false).is_some());
        irq.set_line(NMI_SOURCE, true);
        assert!(!irq.is_pending(NMI_SOURCE));
        irq.set_line(NMI_SOURCE, false);
        irq.set_line(NMI_SOURCE, true);
        assert!(irq.is_pending(NMI_SOURCE));
    }

    #[test]
    fn edge_assert_latches_while_line_is_held() {
        let mut irq = InterruptController::default();
        irq.assert(NMI_SOURCE);
        assert!(irq.poll(false).is_some());
        irq.assert(NMI_SOURCE);
        assert!(irq.is_pending(NMI_SOURCE));
        assert_eq!(irq.poll(false).map(|r| r.source), Some(NMI_SOURCE));
    }

    #[test]
    fn level_request_stays_pending_while_held() {
        let mut irq = InterruptController::default();
        irq.assert(IRQ_SOURCE);
        assert_eq!(irq.poll(false).map(|r| r.vector), Some(IRQ_VECTOR));
        assert!(irq.is_pending(IRQ_SOURCE));
        irq.clear(IRQ_SOURCE);
        assert!(!irq.is_pending(IRQ_SOURCE));
    }

    #[rstest]
    #[case(true, 0x00, None)]
    #[case(false, 0x02, None)]
    #[case(false, 0x00, Some(IRQ_SOURCE))]
    fn maskable_source_respects_cpu_flag_and_controller_mask(
        #[case] cpu_masked: bool,
        #[case] mask: u8,
        #[case] expected: Option<u8>,
    ) {
        let mut irq = InterruptController::default();
        irq.set_mask(mask);
        irq.assert(IRQ_SOURCE);
        assert_eq!(irq.poll(cpu_masked).map(|r| r.source), expected);
    }

    #[test]
    fn non_maskable_ignores_every_mask() {
        let mut irq = InterruptController::default();
        irq.set_mask(0xFF);
        irq.assert(NMI_SOURCE);
        assert_eq!(irq.poll(true).map(|r| r.source), Some(NMI_SOURCE));
    }

    #[test]
    fn lower_index_wins_when_both_pending() {
        let mut irq = InterruptController::default();
        irq.assert(IRQ_SOURCE);
        irq.assert(NMI_SOURCE);
        assert_eq!(irq.poll(false).map(|r| r.source), Some(NMI_SOURCE));
        assert_eq!(irq.poll(false).map(|r| r.source), Some(IRQ_SOURCE));
    }

    #[test]
    fn wake_ignores_cpu_flag_but_not_controller_mask() {
        let mut irq = InterruptController::default();
        irq.assert(IRQ_SOURCE);
        assert!(irq.wake_pending());
        irq.set_mask(0x02);
        assert!(!irq.wake_pending());
    }

    #[test]
    fn complete_retires_most_urgent_in_service_source() {
        let mut irq = InterruptController::default();
        irq.assert(IRQ_SOURCE);
        irq.poll(false);
        irq.assert(NMI_SOURCE);
        irq.poll(false);
        assert_eq!(irq.in_service(), 0b11);
        assert_eq!(irq.complete(), Some(NMI_SOURCE));
        assert_eq!(irq.complete(), Some(IRQ_SOURCE));
        assert_eq!(irq.complete(), None);
    }

    #[test]
    fn unwired_sources_are_ignored() {
        let mut irq = InterruptController::default();
        irq.assert(5);
        assert_eq!(irq.pending(), 0);
    }

    #[test]
    fn wiring_is_limited_to_eight_sources() {
        let mut irq = InterruptController::new(&[]).expect("empty wiring");
        for expected in 0..8 {
            let index = irq
                .add_source(SourceConfig {
                    trigger: Trigger::Level,
                    maskable: true,
                    vector: 0xFFF0,
                })
                .expect("free line");
            assert_eq!(index, expected);
        }
        assert_eq!(
            irq.add_source(SourceConfig::irq(0xFFF0)),
            Err(ConfigError::TooManyInterruptSources(8))
        );
    }

    #[test]
    fn state_roundtrip_and_validation() {
        let mut irq = InterruptController::default();
        irq.assert(IRQ_SOURCE);
        irq.set_mask(0x01);
        let mut bytes = Vec::new();
        irq.save_state(&mut bytes);

        let mut fresh = InterruptController::default();
        let bits = fresh.parse_state(&bytes).expect("valid");
        fresh.apply_state(bits);
        assert_eq!(fresh, irq);

        let mut bad = bytes.clone();
        bad[2] = 0x80;
        assert!(fresh.parse_state(&bad).is_err());
        assert!(fresh.parse_state(&bytes[..3]).is_err());
    }
}
