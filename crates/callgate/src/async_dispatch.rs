//! Async bridge over the synchronous, mutex-guarded [`Gate`].
//!
//! The source's `@dual` decorator inspects, at call time, whether it was
//! awaited or called directly and picks a sync or async code path through
//! the same function body. Rust has no such dispatch; instead every
//! blocking call here goes through `tokio::task::spawn_blocking`, the
//! runtime's documented way to run mutex-guarded, non-async work without
//! stalling the executor (the same bridging role the source's dual
//! dispatch plays, achieved with a primitive `tokio` itself ships).

use std::sync::Arc;

use callgate_core::GateError;
use tokio::task::JoinError;

use crate::backend::Gate;

fn join_err(e: JoinError) -> GateError {
    callgate_core::GateError::Backend(callgate_core::BackendError::Other(format!(
        "gate task panicked: {e}"
    )))
}

/// An `Arc<Gate>` with `async` entry points for the handful of calls that
/// matter under load: `update` and `check_limits`. Everything else
/// (`data`, `sum`, `as_dict`, ...) is cheap enough that callers can use the
/// sync methods directly even from async code, same as the source treats
/// its property reads.
#[derive(Clone)]
pub struct AsyncGate(Arc<Gate>);

impl AsyncGate {
    pub fn new(gate: Arc<Gate>) -> Self {
        Self(gate)
    }

    pub fn inner(&self) -> &Arc<Gate> {
        &self.0
    }

    pub async fn update(&self, value: i64, throw: bool) -> Result<(), GateError> {
        let gate = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || gate.update(value, throw))
            .await
            .map_err(join_err)?
    }

    pub async fn check_limits(&self) -> Result<(), GateError> {
        let gate = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || gate.check_limits()).await.map_err(join_err)?
    }

    pub async fn clear(&self) -> Result<(), GateError> {
        let gate = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || gate.clear()).await.map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendSelector;
    use callgate_core::GateConfig;

    #[tokio::test]
    async fn update_runs_off_the_executor_thread() {
        let cfg = GateConfig::new("async", 4.0, 1.0).with_gate_limit(5);
        let gate = Arc::new(Gate::open(cfg, BackendSelector::Local, 4).unwrap());
        let async_gate = AsyncGate::new(gate);

        async_gate.update(2, true).await.unwrap();
        assert_eq!(async_gate.inner().sum().unwrap(), 2);

        let err = async_gate.update(10, true).await.unwrap_err();
        assert!(matches!(err, GateError::GateLimitExceeded(_)));
    }

    #[tokio::test]
    async fn clear_resets_through_the_bridge() {
        let cfg = GateConfig::new("async-clear", 4.0, 1.0);
        let gate = Arc::new(Gate::open(cfg, BackendSelector::Local, 4).unwrap());
        let async_gate = AsyncGate::new(gate);
        async_gate.update(1, true).await.unwrap();
        async_gate.clear().await.unwrap();
        assert_eq!(async_gate.inner().sum().unwrap(), 0);
    }
}
