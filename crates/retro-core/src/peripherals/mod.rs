//! Reference devices built on the [`crate::Device`] contract.

/// Periodic frame signal driven by a scheduler alarm.
pub mod frame;
/// Bank-switching cartridge controller.
pub mod mapper;
/// Interval timer with lazy catch-up.
pub mod timer;

pub use frame::{FrameSignal, FRAME_FLAG, FRAME_TAG};
pub use mapper::{install_mapper, BankSwitchMapper, MapperConfig, MAPPER_TAG};
pub use timer::{IntervalTimer, TimerConfig, TIMER_ENABLE, TIMER_TAG};
