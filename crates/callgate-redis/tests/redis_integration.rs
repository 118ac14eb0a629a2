//! Exercises `RedisStorage` against a live Redis instance.
//!
//! Ignored by default — run with `cargo test -- --ignored` against a Redis
//! reachable at `REDIS_URL` (defaults to `redis://127.0.0.1:6379`).

use callgate_core::Storage;
use callgate_redis::{RedisBackendConfig, RedisStorage, RedisTarget};

fn config() -> RedisBackendConfig {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    RedisBackendConfig { target: RedisTarget::Single { url }, db: 15, lock_timeout_secs: 1 }
}

#[test]
#[ignore]
fn atomic_update_and_state_round_trip() {
    let storage = RedisStorage::connect("callgate-it-atomic", 4, None, &config()).unwrap();
    storage.clear().unwrap();
    storage.atomic_update(2, 0, 0).unwrap();
    storage.atomic_update(3, 0, 0).unwrap();
    let state = storage.state().unwrap();
    assert_eq!(state.sum, 5);
    assert_eq!(state.data[0], 5);
}

#[test]
#[ignore]
fn slide_shifts_across_restart() {
    let storage = RedisStorage::connect("callgate-it-slide", 4, Some(&[1, 2, 3, 4]), &config()).unwrap();
    assert_eq!(storage.sum().unwrap(), 10);
    storage.slide(1).unwrap();
    assert_eq!(storage.as_list().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(storage.sum().unwrap(), 6);
}

#[test]
#[ignore]
fn frame_limit_is_classified_not_backend_error() {
    let storage = RedisStorage::connect("callgate-it-limit", 2, None, &config()).unwrap();
    storage.clear().unwrap();
    let err = storage.atomic_update(5, 3, 0).unwrap_err();
    assert!(matches!(err, callgate_core::GateError::FrameLimitExceeded(_)));
}
