//! The storage capability interface.
//!
//! Every backend — in-process, shared-memory, distributed — implements this
//! trait and satisfies the same atomicity, persistence and reentrance
//! contract through different primitives. Grounded on
//! `call_gate/storages/base_storage.py`'s `BaseStorage` abstract class,
//! expressed as a trait instead of a runtime class hierarchy.

use crate::error::GateError;
use crate::types::GateState;

/// Operations a gate storage backend must provide.
///
/// `slide`, `atomic_update` and `clear` are each a single critical section:
/// callers never observe a half-applied mutation.
pub trait Storage: Send + Sync {
    /// Shifts the ring right by `n` frames, discarding the `n` oldest and
    /// prepending `n` zeros, atomically adjusting the cached sum by the
    /// discarded total. `n >= capacity` must behave exactly like `clear`.
    ///
    /// # Errors
    /// Implementations may surface backend I/O failures as
    /// [`GateError::Backend`]; `n == 0` is a caller error and should not be
    /// called (the engine never calls `slide(0)`).
    fn slide(&self, n: u64) -> Result<(), GateError>;

    /// A consistent snapshot of the ring and the cached sum, read under one
    /// critical section.
    fn state(&self) -> Result<GateState, GateError>;

    /// The cached window sum.
    fn sum(&self) -> Result<i64, GateError>;

    /// Atomically applies `value` to the head frame and the sum, checking
    /// both limits and both overflow guards. No partial effects on failure.
    fn atomic_update(&self, value: i64, frame_limit: i64, gate_limit: i64) -> Result<(), GateError>;

    /// A copy of the full ring, newest first.
    fn as_list(&self) -> Result<Vec<i64>, GateError>;

    /// Resets every frame and the sum to zero.
    fn clear(&self) -> Result<(), GateError>;

    /// Releases backend resources (shared-memory unlink, redis connection
    /// close). Idempotent.
    fn close(&self) -> Result<(), GateError>;

    /// Directly overwrites the head frame, recomputing the sum from the
    /// delta (the original's `__setitem__`, always targeting index 0).
    fn set_head(&self, value: i64) -> Result<(), GateError>;

    /// Persisted current-frame anchor, if the backend retains one across
    /// restarts (only meaningful for the distributed backend; in-process and
    /// shared-memory backends return `Ok(None)`).
    fn get_timestamp(&self) -> Result<Option<chrono::DateTime<chrono::Utc>>, GateError>;

    /// Persists the current-frame anchor.
    fn set_timestamp(&self, ts: chrono::DateTime<chrono::Utc>) -> Result<(), GateError>;

    /// Clears the persisted anchor (called together with `clear`).
    fn clear_timestamp(&self) -> Result<(), GateError>;
}
