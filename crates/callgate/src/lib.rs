//! A sliding-window rate-limit gate with pluggable storage.
//!
//! Three backends share one contract (`callgate_core::Storage`): an
//! in-process ring (`Local`), a memory-mapped file for sibling processes
//! (`callgate-shared`'s `Shared`), and a Redis-backed distributed ring
//! (`callgate-redis`'s `RedisStorage`). This crate composes all three
//! behind [`Gate`] and layers a decorator/scope-guard/async sugar on top.

mod async_dispatch;
mod backend;
mod persist;
mod sugar;

pub use async_dispatch::AsyncGate;
pub use backend::{BackendSelector, Gate};
pub use callgate_core::{
    classify_script_error, BackendError, ConfigError, Frame, GateConfig, GateDict, GateError, GateLimits, GateState,
    LimitContext, StorageKind,
};
pub use callgate_redis::{RedisBackendConfig, RedisTarget};
pub use persist::{from_dict, from_file};
pub use sugar::{rate_limited, Decorator, GateGuard};
