//! Reconstructing a [`crate::Gate`] from its `as_dict`/`to_file` shape.
//!
//! Grounded on `call_gate/gate.py`'s `to_file`/`from_file`, which round-trip
//! through the same dictionary `as_dict` produces. Picking a concrete
//! backend from a persisted [`StorageKind`] is facade-level, not
//! core-engine-level, since only the facade knows about all three backends —
//! this keeps `callgate-core` free of the shared-memory and Redis
//! dependencies.

use std::path::Path;

use callgate_core::{BackendError, ConfigError, GateConfig, GateDict, GateError, StorageKind};
use callgate_redis::RedisBackendConfig;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::backend::{BackendSelector, Gate};

/// Rebuilds a gate from a previously serialized [`GateDict`].
///
/// `redis_config` is required only when `dict.storage == StorageKind::Redis`
/// — the dictionary itself carries no connection information, by design.
pub fn from_dict(dict: GateDict, redis_config: Option<RedisBackendConfig>) -> Result<Gate, GateError> {
    let capacity = (dict.gate_size / dict.frame_step).round() as usize;
    let tz: Tz = dict
        .timezone
        .as_deref()
        .map(|s| s.parse::<Tz>().map_err(|_| ConfigError::UnknownTimezone(s.to_string())))
        .transpose()?
        .unwrap_or(Tz::UTC);

    let mut config = GateConfig::new(dict.name.clone(), dict.gate_size, dict.frame_step)
        .with_gate_limit(dict.gate_limit)
        .with_frame_limit(dict.frame_limit)
        .with_timezone(tz)
        .with_storage_kind(dict.storage)
        .with_initial_data(dict.data.clone());

    if let Some(raw) = &dict.current_dt {
        let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| ConfigError::InvalidTimestamp(e.to_string()))?
            .with_timezone(&Utc);
        config.initial_timestamp = Some(parsed);
    }

    let selector = match dict.storage {
        StorageKind::Simple => BackendSelector::Local,
        StorageKind::Shared => BackendSelector::Shared,
        StorageKind::Redis => {
            let redis_config = redis_config.ok_or_else(|| {
                GateError::Backend(BackendError::Other(
                    "persisted gate uses the redis backend; a RedisBackendConfig is required to reopen it".into(),
                ))
            })?;
            BackendSelector::Redis(redis_config)
        }
    };

    Gate::open(config, selector, capacity)
}

/// Reads and parses the JSON written by [`crate::backend::Gate::to_file`],
/// then reopens it the same way as [`from_dict`].
pub fn from_file(path: impl AsRef<Path>, redis_config: Option<RedisBackendConfig>) -> Result<Gate, GateError> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| GateError::Backend(BackendError::Other(format!("opening {}: {e}", path.display()))))?;
    let dict: GateDict = serde_json::from_reader(file)
        .map_err(|e| GateError::Backend(BackendError::Other(format!("parsing {}: {e}", path.display()))))?;
    from_dict(dict, redis_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use callgate_core::GateConfig as CoreConfig;

    #[test]
    fn round_trips_a_local_gate_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.json");

        let cfg = CoreConfig::new("roundtrip", 4.0, 1.0).with_gate_limit(10);
        let gate = Gate::open(cfg, BackendSelector::Local, 4).unwrap();
        gate.update(3, true).unwrap();
        gate.to_file(&path).unwrap();

        let reopened = from_file(&path, None).unwrap();
        assert_eq!(reopened.name(), "roundtrip");
        assert_eq!(reopened.data().unwrap()[0], 3);
        assert_eq!(reopened.limits().gate_limit, 10);
    }

    #[test]
    fn redis_dict_without_config_is_an_error() {
        let dict = GateDict {
            name: "r".into(),
            gate_size: 4.0,
            frame_step: 1.0,
            gate_limit: 0,
            frame_limit: 0,
            timezone: None,
            storage: StorageKind::Redis,
            data: vec![0, 0, 0, 0],
            current_dt: None,
            extra: serde_json::Map::new(),
        };
        assert!(from_dict(dict, None).is_err());
    }
}
