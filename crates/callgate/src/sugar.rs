//! Ergonomic wrappers around [`crate::Gate`]: a call-scoped guard and a
//! decorator-style wrapper for closures.
//!
//! The source's `CallGate.__call__` returns a single `_CallGateWrapper`
//! that is simultaneously a decorator, a sync context manager and an async
//! context manager, dispatching on how Python calls it. That one
//! polymorphic object splits here into the three concrete shapes Rust
//! actually has: a wrapper function ([`rate_limited`]), a scope guard
//! ([`GateGuard`]), and — for async callers — [`crate::async_dispatch`].

use std::sync::Arc;

use callgate_core::GateError;

use crate::backend::Gate;

/// Runs `value` through the gate's `update`, then calls `f` only if the
/// update did not throttle or error. Mirrors wrapping a function body in
/// `with gate:` in the source, where the `with` block's body never runs if
/// `__enter__` raised.
pub fn rate_limited<T>(gate: &Gate, value: i64, throw: bool, f: impl FnOnce() -> T) -> Result<T, GateError> {
    gate.update(value, throw)?;
    Ok(f())
}

/// A call-scoped guard: `update`s the gate on construction and intentionally
/// does nothing on drop.
///
/// The source's context-manager protocol (`__enter__`/`__exit__`,
/// `__aenter__`/`__aexit__`) are no-ops on exit in every storage backend
/// shown in the retrieved sources; there is no "undo" of a committed
/// update. `GateGuard` preserves that: once constructed, the update has
/// already happened, and dropping the guard does not roll it back even if
/// the caller's scope later panics.
pub struct GateGuard {
    gate: Arc<Gate>,
}

impl GateGuard {
    /// Updates `gate` by `value` and returns a guard over it. Returns the
    /// update's error instead of a guard if the update itself failed.
    pub fn enter(gate: Arc<Gate>, value: i64, throw: bool) -> Result<Self, GateError> {
        gate.update(value, throw)?;
        Ok(Self { gate })
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }
}

/// A reusable rate limiter over one gate and one fixed increment, the
/// closest Rust shape to the source's decorator usage
/// (`@gate(value=1, throw=True)` applied to a function).
pub struct Decorator {
    gate: Arc<Gate>,
    value: i64,
    throw: bool,
}

impl Decorator {
    pub fn new(gate: Arc<Gate>, value: i64, throw: bool) -> Self {
        Self { gate, value, throw }
    }

    /// Calls `f` if the gate admits `self.value`, else propagates the
    /// throttling/overflow error without calling `f`.
    pub fn call<T>(&self, f: impl FnOnce() -> T) -> Result<T, GateError> {
        rate_limited(&self.gate, self.value, self.throw, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callgate_core::GateConfig;
    use crate::backend::BackendSelector;

    fn gate(gate_limit: i64) -> Arc<Gate> {
        let cfg = GateConfig::new("sugar", 4.0, 1.0).with_gate_limit(gate_limit);
        Arc::new(Gate::open(cfg, BackendSelector::Local, 4).unwrap())
    }

    #[test]
    fn rate_limited_runs_closure_when_admitted() {
        let g = gate(10);
        let ran = rate_limited(&g, 1, true, || 42).unwrap();
        assert_eq!(ran, 42);
    }

    #[test]
    fn rate_limited_propagates_without_running_closure() {
        let g = gate(1);
        let mut ran = false;
        let err = rate_limited(&g, 5, true, || ran = true).unwrap_err();
        assert!(matches!(err, GateError::GateLimitExceeded(_)));
        assert!(!ran);
    }

    #[test]
    fn guard_commits_update_on_enter() {
        let g = gate(10);
        let guard = GateGuard::enter(Arc::clone(&g), 2, true).unwrap();
        assert_eq!(guard.gate().sum().unwrap(), 2);
        drop(guard);
        assert_eq!(g.sum().unwrap(), 2);
    }

    #[test]
    fn decorator_reuses_fixed_value_and_mode() {
        let g = gate(3);
        let d = Decorator::new(g, 2, true);
        d.call(|| ()).unwrap();
        assert!(d.call(|| ()).is_err());
    }
}
