//! Architectural CPU state model primitives.

/// Register file types and storage model.
pub mod registers;
/// Between-instruction execution states.
pub mod run_state;

pub use registers::{
    Register, RegisterFile, FLAGS_ACTIVE_MASK, FLAG_B, FLAG_C, FLAG_D, FLAG_I, FLAG_N,
    FLAG_UNUSED, FLAG_V, FLAG_Z, REGISTER_FILE_BYTES, SP_RESET, STACK_BASE,
};
pub use run_state::RunState;
