/// Execution state of a core between instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RunState {
    /// Ready to fetch the next instruction.
    #[default]
    Running,
    /// Parked by `WAI` until any interrupt becomes pending.
    WaitingForInterrupt,
    /// Parked by `STP`; only reset leaves this state.
    Stopped,
}

impl RunState {
    /// Stable byte value used in save states.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::WaitingForInterrupt => 1,
            Self::Stopped => 2,
        }
    }

    /// Inverse of [`Self::as_u8`].
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Running),
            1 => Some(Self::WaitingForInterrupt),
            2 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Returns `true` when the core will not fetch on the next step.
    #[must_use]
    pub const fn is_parked(self) -> bool {
        !matches!(self, Self::Running)
    }
}
