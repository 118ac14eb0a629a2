//! Enum-dispatch facade over the three storage backends.
//!
//! The source dispatches to a storage implementation through
//! `GateStorageType` plus `isinstance`/class lookup at runtime. Here the
//! three variants are known at compile time and dispatch is a `match`, so a
//! typo'd storage kind is a construction-time error instead of a runtime one.

use std::path::Path;

use callgate_core::{Frame, GateConfig, GateDict, GateError, GateLimits, GateState, Local, StorageKind};
use callgate_redis::{RedisBackendConfig, RedisStorage};
use callgate_shared::Shared;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Storage selection plus whatever each backend needs to locate its state.
#[derive(Clone)]
pub enum BackendSelector {
    /// `StorageKind::Simple` — the default, in-process backend.
    Local,
    /// `StorageKind::Shared` — a memory-mapped file visible to sibling
    /// processes.
    Shared,
    /// `StorageKind::Redis` — a distributed backend.
    Redis(RedisBackendConfig),
}

enum Backend {
    Local(callgate_core::Gate<Local>),
    Shared(callgate_core::Gate<Shared>),
    Redis(callgate_core::Gate<RedisStorage>),
}

/// A sliding-window rate-limit gate over any of the three backends.
///
/// This is the type most callers hold; the sugar layer in [`crate::sugar`]
/// and [`crate::async_dispatch`] is built entirely on the methods here.
pub struct Gate(Backend);

impl Gate {
    /// Builds a gate, opening or creating whatever storage `selector`
    /// names.
    pub fn open(config: GateConfig, selector: BackendSelector, capacity: usize) -> Result<Self, GateError> {
        let initial = config.initial_data.clone();
        match selector {
            BackendSelector::Local => {
                let storage = Local::new(&config.name, capacity, initial.as_deref());
                Ok(Self(Backend::Local(callgate_core::Gate::new(config, storage)?)))
            }
            BackendSelector::Shared => {
                let storage = Shared::new(&config.name, capacity, initial.as_deref())?;
                Ok(Self(Backend::Shared(callgate_core::Gate::new(config, storage)?)))
            }
            BackendSelector::Redis(redis_config) => {
                let storage = RedisStorage::connect(&config.name, capacity, initial.as_deref(), &redis_config)?;
                Ok(Self(Backend::Redis(callgate_core::Gate::new(config, storage)?)))
            }
        }
    }

    pub fn name(&self) -> &str {
        match &self.0 {
            Backend::Local(g) => g.name(),
            Backend::Shared(g) => g.name(),
            Backend::Redis(g) => g.name(),
        }
    }

    pub fn storage_kind(&self) -> StorageKind {
        match &self.0 {
            Backend::Local(g) => g.storage_kind(),
            Backend::Shared(g) => g.storage_kind(),
            Backend::Redis(g) => g.storage_kind(),
        }
    }

    pub fn limits(&self) -> GateLimits {
        match &self.0 {
            Backend::Local(g) => g.limits(),
            Backend::Shared(g) => g.limits(),
            Backend::Redis(g) => g.limits(),
        }
    }

    pub fn timezone(&self) -> Tz {
        match &self.0 {
            Backend::Local(g) => g.timezone(),
            Backend::Shared(g) => g.timezone(),
            Backend::Redis(g) => g.timezone(),
        }
    }

    pub fn current_dt(&self) -> Option<DateTime<Utc>> {
        match &self.0 {
            Backend::Local(g) => g.current_dt(),
            Backend::Shared(g) => g.current_dt(),
            Backend::Redis(g) => g.current_dt(),
        }
    }

    pub fn data(&self) -> Result<Vec<i64>, GateError> {
        match &self.0 {
            Backend::Local(g) => g.data(),
            Backend::Shared(g) => g.data(),
            Backend::Redis(g) => g.data(),
        }
    }

    pub fn sum(&self) -> Result<i64, GateError> {
        match &self.0 {
            Backend::Local(g) => g.sum(),
            Backend::Shared(g) => g.sum(),
            Backend::Redis(g) => g.sum(),
        }
    }

    pub fn state(&self) -> Result<GateState, GateError> {
        match &self.0 {
            Backend::Local(g) => g.state(),
            Backend::Shared(g) => g.state(),
            Backend::Redis(g) => g.state(),
        }
    }

    pub fn current_frame(&self) -> Result<Frame, GateError> {
        match &self.0 {
            Backend::Local(g) => g.current_frame(),
            Backend::Shared(g) => g.current_frame(),
            Backend::Redis(g) => g.current_frame(),
        }
    }

    pub fn last_frame(&self) -> Result<Frame, GateError> {
        match &self.0 {
            Backend::Local(g) => g.last_frame(),
            Backend::Shared(g) => g.last_frame(),
            Backend::Redis(g) => g.last_frame(),
        }
    }

    pub fn is_empty(&self) -> Result<bool, GateError> {
        match &self.0 {
            Backend::Local(g) => g.is_empty(),
            Backend::Shared(g) => g.is_empty(),
            Backend::Redis(g) => g.is_empty(),
        }
    }

    pub fn check_limits(&self) -> Result<(), GateError> {
        match &self.0 {
            Backend::Local(g) => g.check_limits(),
            Backend::Shared(g) => g.check_limits(),
            Backend::Redis(g) => g.check_limits(),
        }
    }

    pub fn update(&self, value: i64, throw: bool) -> Result<(), GateError> {
        match &self.0 {
            Backend::Local(g) => g.update(value, throw),
            Backend::Shared(g) => g.update(value, throw),
            Backend::Redis(g) => g.update(value, throw),
        }
    }

    pub fn clear(&self) -> Result<(), GateError> {
        match &self.0 {
            Backend::Local(g) => g.clear(),
            Backend::Shared(g) => g.clear(),
            Backend::Redis(g) => g.clear(),
        }
    }

    pub fn as_dict(&self) -> Result<GateDict, GateError> {
        match &self.0 {
            Backend::Local(g) => g.as_dict(),
            Backend::Shared(g) => g.as_dict(),
            Backend::Redis(g) => g.as_dict(),
        }
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), GateError> {
        match &self.0 {
            Backend::Local(g) => g.to_file(path),
            Backend::Shared(g) => g.to_file(path),
            Backend::Redis(g) => g.to_file(path),
        }
    }
}
