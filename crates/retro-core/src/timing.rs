/// Documented cycle cost of one opcode table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CycleCost {
    /// Every execution costs the same.
    Fixed(u8),
    /// Conditional control flow with distinct not-taken and taken costs.
    Branch {
        /// Cost when the condition is false and `PC` falls through.
        not_taken: u8,
        /// Cost when the condition is true and `PC` is the target.
        taken: u8,
    },
}

impl CycleCost {
    /// Resolves the cost for a given branch outcome; fixed costs ignore it.
    #[must_use]
    pub const fn resolve(self, taken: bool) -> u8 {
        match self {
            Self::Fixed(cycles) => cycles,
            Self::Branch {
                not_taken,
                taken: taken_cycles,
            } => {
                if taken {
                    taken_cycles
                } else {
                    not_taken
                }
            }
        }
    }

    /// Cost charged when the instruction does not transfer control.
    #[must_use]
    pub const fn base(self) -> u8 {
        self.resolve(false)
    }
}

/// Dispatch sequences that cost cycles without being table opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleCostKind {
    /// Hardware interrupt entry (push `PC`/`P`, vector fetch).
    InterruptEntry,
    /// Reset sequence (vector fetch).
    Reset,
    /// Unassigned primary opcode executed as a no-op.
    InvalidOpcode,
    /// Unassigned prefixed opcode executed as a no-op.
    InvalidPrefixedOpcode,
}

/// Single source-of-truth cycle-cost table for non-opcode sequences.
pub const CYCLE_COST_TABLE: &[(CycleCostKind, u8)] = &[
    (CycleCostKind::InterruptEntry, 7),
    (CycleCostKind::Reset, 7),
    (CycleCostKind::InvalidOpcode, 2),
    (CycleCostKind::InvalidPrefixedOpcode, 3),
];

/// Looks up the cycle cost for a dispatch sequence.
#[must_use]
pub fn cycle_cost(kind: CycleCostKind) -> Option<u8> {
    CYCLE_COST_TABLE
        .iter()
        .find_map(|(entry_kind, cycles)| (*entry_kind == kind).then_some(*cycles))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{cycle_cost, CycleCost, CycleCostKind, CYCLE_COST_TABLE};

    #[test]
    fn table_contains_unique_kinds() {
        let kinds: HashSet<_> = CYCLE_COST_TABLE.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds.len(), CYCLE_COST_TABLE.len());
    }

    #[test]
    fn every_table_entry_resolves_via_lookup() {
        for (kind, expected_cycles) in CYCLE_COST_TABLE {
            assert_eq!(cycle_cost(*kind), Some(*expected_cycles));
        }
    }

    #[test]
    fn branch_costs_are_asymmetric() {
        let cost = CycleCost::Branch {
            not_taken: 2,
            taken: 3,
        };
        assert_eq!(cost.resolve(false), 2);
        assert_eq!(cost.resolve(true), 3);
        assert_eq!(cost.base(), 2);
    }

    #[test]
    fn fixed_costs_ignore_branch_outcome() {
        let cost = CycleCost::Fixed(6);
        assert_eq!(cost.resolve(true), 6);
        assert_eq!(cost.resolve(false), 6);
    }
}
