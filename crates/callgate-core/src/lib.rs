//! Sliding-window rate-limit gate: clock, engine, error taxonomy, and the
//! in-process storage backend.
//!
//! This crate is the dependency-light core. The shared-memory and
//! distributed backends live in `callgate-shared` and `callgate-redis`;
//! `callgate` composes all three behind one facade with the sugar layer
//! (decorator, scope guard, async dispatch) on top.

mod clock;
mod error;
mod gate;
mod invariants;
mod local;
mod storage;
mod types;

pub use clock::{current_step, floor_to_frame, frame_diff};
pub use error::{classify_script_error, BackendError, ConfigError, GateError, LimitContext};
pub use gate::{Gate, GateConfig, SharedGate};
pub use local::Local;
pub use storage::Storage;
pub use types::{Frame, GateDict, GateLimits, GateState, StorageKind};
