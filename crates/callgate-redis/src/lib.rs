//! Distributed storage backend: `StorageKind::Redis`.
//!
//! The ring and its sum live in two Redis keys, mutated only through
//! server-side Lua scripts so each primitive (`init`, `state`, `slide`,
//! `atomic_update`) is itself atomic from every client's point of view.
//! A reentrant distributed lock brackets each call the way the in-process
//! backend's mutex brackets its own. Grounded on
//! `call_gate/storages/redis.py`'s `RedisStorage` and `RedisReentrantLock`.
//!
//! The source dials a `Redis` client from free-form `**kwargs`, mixing
//! TLS, pool and cluster options into one dict. Here the connection target
//! is a typed [`RedisTarget`], selected once at construction; there is no
//! dynamic-kwargs path.

use std::thread;
use std::time::Duration;

use callgate_core::{classify_script_error, BackendError, GateError, GateState, LimitContext};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::{ConnectionLike, Script};
use tracing::{debug, warn};

/// Where to connect. `Cluster` carries the full node list; dispatch to
/// either one happens once, at [`RedisStorage::connect`].
#[derive(Debug, Clone)]
pub enum RedisTarget {
    Single { url: String },
    Cluster { urls: Vec<String> },
}

/// Typed connection parameters, replacing the source's dynamic Redis
/// kwargs dict.
#[derive(Debug, Clone)]
pub struct RedisBackendConfig {
    pub target: RedisTarget,
    /// Redis logical database index for a `Single` target (unused for
    /// `Cluster`, which has no `SELECT`). Defaults to 15, matching the
    /// source's default.
    pub db: i64,
    /// Distributed lock TTL and per-call extension window, in seconds.
    pub lock_timeout_secs: u64,
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            target: RedisTarget::Single { url: "redis://127.0.0.1:6379".to_string() },
            db: 15,
            lock_timeout_secs: 1,
        }
    }
}

fn redis_err(e: redis::RedisError) -> GateError {
    GateError::Backend(BackendError::Connection(e.to_string()))
}

fn connect(config: &RedisBackendConfig) -> Result<Box<dyn ConnectionLike + Send>, GateError> {
    match &config.target {
        RedisTarget::Single { url } => {
            let info = if url.contains("/0") || url.matches('/').count() > 2 {
                url.clone()
            } else {
                format!("{}/{}", url.trim_end_matches('/'), config.db)
            };
            let client = redis::Client::open(info).map_err(redis_err)?;
            let conn = client.get_connection().map_err(redis_err)?;
            Ok(Box::new(conn))
        }
        RedisTarget::Cluster { urls } => {
            let client = redis::cluster::ClusterClient::new(urls.clone()).map_err(redis_err)?;
            let conn = client.get_connection().map_err(redis_err)?;
            Ok(Box::new(conn))
        }
    }
}

/// Reentrant (same-process-owner) distributed lock keyed by gate name.
///
/// Acquisition spins with a short sleep rather than blocking the Redis
/// connection, mirroring the source's `time.sleep(0.01)` backoff. The
/// owner token combines this thread's id with a random UUID so two gates
/// with the same name in different threads never mistake each other's
/// reentrant hold for their own (the source uses `get_ident()` for the
/// same reason).
struct ReentrantLock {
    lock_key: String,
    owner_key: String,
    count_key: String,
    owner: String,
    timeout_secs: u64,
}

impl ReentrantLock {
    fn new(name: &str, timeout_secs: u64) -> Self {
        let owner = format!("{:?}:{}", thread::current().id(), uuid::Uuid::new_v4());
        Self {
            lock_key: format!("{{{name}}}:global_lock"),
            owner_key: format!("{{{name}}}:lock_owner"),
            count_key: format!("{{{name}}}:lock_count"),
            owner,
            timeout_secs,
        }
    }

    fn acquire(&self, conn: &mut dyn ConnectionLike) -> Result<(), GateError> {
        loop {
            let current_owner: Option<String> =
                redis::cmd("GET").arg(&self.owner_key).query(conn).map_err(redis_err)?;
            if current_owner.as_deref() == Some(self.owner.as_str()) {
                let _: i64 = redis::cmd("HINCRBY")
                    .arg(&self.count_key)
                    .arg(&self.owner)
                    .arg(1)
                    .query(conn)
                    .map_err(redis_err)?;
                let _: () = redis::cmd("EXPIRE")
                    .arg(&self.lock_key)
                    .arg(self.timeout_secs)
                    .query(conn)
                    .map_err(redis_err)?;
                let _: () = redis::cmd("EXPIRE")
                    .arg(&self.owner_key)
                    .arg(self.timeout_secs)
                    .query(conn)
                    .map_err(redis_err)?;
                return Ok(());
            }

            let acquired: bool = redis::cmd("SET")
                .arg(&self.lock_key)
                .arg("1")
                .arg("NX")
                .arg("EX")
                .arg(self.timeout_secs)
                .query(conn)
                .map_err(redis_err)?;
            if acquired {
                let _: () = redis::cmd("SET")
                    .arg(&self.owner_key)
                    .arg(&self.owner)
                    .arg("EX")
                    .arg(self.timeout_secs)
                    .query(conn)
                    .map_err(redis_err)?;
                let _: () = redis::cmd("HSET")
                    .arg(&self.count_key)
                    .arg(&self.owner)
                    .arg(1)
                    .query(conn)
                    .map_err(redis_err)?;
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn release(&self, conn: &mut dyn ConnectionLike) -> Result<(), GateError> {
        let count: i64 = redis::cmd("HINCRBY")
            .arg(&self.count_key)
            .arg(&self.owner)
            .arg(-1)
            .query(conn)
            .map_err(redis_err)?;
        if count <= 0 {
            let _: () = redis::cmd("DEL")
                .arg(&self.lock_key)
                .arg(&self.owner_key)
                .arg(&self.count_key)
                .query(conn)
                .map_err(redis_err)?;
        } else {
            let _: () = redis::cmd("EXPIRE")
                .arg(&self.lock_key)
                .arg(self.timeout_secs)
                .query(conn)
                .map_err(redis_err)?;
            let _: () = redis::cmd("EXPIRE")
                .arg(&self.owner_key)
                .arg(self.timeout_secs)
                .query(conn)
                .map_err(redis_err)?;
        }
        Ok(())
    }
}

const INIT_SCRIPT: &str = r"
local key_list = KEYS[1]
local key_sum = KEYS[2]
local capacity = tonumber(ARGV[1])
local provided = #ARGV - 1
local data = {}
local total = 0
if provided > 0 then
    for i = 2, math.min(#ARGV, capacity + 1) do
        table.insert(data, ARGV[i])
        total = total + tonumber(ARGV[i])
    end
    if provided < capacity then
        local pad = capacity - provided
        local padded = {}
        for i = 1, pad do
            table.insert(padded, '0')
        end
        for i = 1, #data do
            table.insert(padded, data[i])
        end
        data = padded
    end
else
    for i = 1, capacity do
        table.insert(data, '0')
    end
    total = 0
end
redis.call('DEL', key_list)
redis.call('DEL', key_sum)
for i = 1, #data do
    redis.call('RPUSH', key_list, data[i])
end
redis.call('SET', key_sum, total)
return total
";

const STATE_SCRIPT: &str = r"
local key_list = KEYS[1]
local key_sum = KEYS[2]
local data = redis.call('LRANGE', key_list, 0, -1)
local stored_sum = tonumber(redis.call('GET', key_sum) or '0')
local calculated_sum = 0
local numeric_data = {}
for i, v in ipairs(data) do
    local num = tonumber(v)
    numeric_data[i] = num
    calculated_sum = calculated_sum + num
end
if calculated_sum ~= stored_sum then
    return {err='Sum mismatch: calculated sum (' .. calculated_sum .. ') does not equal stored sum (' .. stored_sum .. ')'}
end
return {numeric_data, stored_sum}
";

const SLIDE_SCRIPT: &str = r"
local key_list = KEYS[1]
local key_sum = KEYS[2]
local n = tonumber(ARGV[1])
local removed_sum = 0
for i = 1, n do
    local val = redis.call('RPOP', key_list)
    if val then
        removed_sum = removed_sum + tonumber(val)
    end
    redis.call('LPUSH', key_list, '0')
end
local current_sum = tonumber(redis.call('GET', key_sum) or '0')
local new_sum = current_sum - removed_sum
redis.call('SET', key_sum, new_sum)
";

const ATOMIC_UPDATE_SCRIPT: &str = r"
local key_list = KEYS[1]
local key_sum = KEYS[2]
local inc_value = tonumber(ARGV[1])
local frame_limit = tonumber(ARGV[2])
local gate_limit = tonumber(ARGV[3])
local current_value = tonumber(redis.call('LINDEX', key_list, 0) or '0')
local new_value = current_value + inc_value
local current_sum = tonumber(redis.call('GET', key_sum) or '0')
local new_sum = current_sum + inc_value
if frame_limit > 0 and new_value > frame_limit then
  return {err='Frame limit exceeded'}
end
if gate_limit > 0 and new_sum > gate_limit then
  return {err='Gate limit exceeded'}
end
if new_sum < 0 then
  return {err='Gate overflow'}
end
if new_value < 0 then
  return {err='Frame overflow'}
end
redis.call('LSET', key_list, 0, new_value)
redis.call('SET', key_sum, new_sum)
return new_value
";

const SET_HEAD_SCRIPT: &str = r"
local key_list = KEYS[1]
local key_sum = KEYS[2]
local new_value = tonumber(ARGV[1])
local current_sum = tonumber(redis.call('GET', key_sum) or '0')
local old_value = tonumber(redis.call('LINDEX', key_list, 0) or '0')
local new_sum = current_sum - old_value + new_value
redis.call('LSET', key_list, 0, new_value)
redis.call('SET', key_sum, new_sum)
";

/// `StorageKind::Redis` — a ring shared by every process that points at the
/// same Redis keyspace.
pub struct RedisStorage {
    name: String,
    key_list: String,
    key_sum: String,
    key_timestamp: String,
    conn: Mutex<Box<dyn ConnectionLike + Send>>,
    lock: ReentrantLock,
    init_script: Script,
    state_script: Script,
    slide_script: Script,
    atomic_update_script: Script,
    set_head_script: Script,
}

impl RedisStorage {
    pub fn connect(
        name: impl Into<String>,
        capacity: usize,
        initial: Option<&[i64]>,
        config: &RedisBackendConfig,
    ) -> Result<Self, GateError> {
        let name = name.into();
        let conn = connect(config)?;
        let storage = Self {
            key_list: format!("{{{name}}}"),
            key_sum: format!("{{{name}}}:sum"),
            key_timestamp: format!("{{{name}}}:timestamp"),
            lock: ReentrantLock::new(&name, config.lock_timeout_secs),
            name,
            conn: Mutex::new(conn),
            init_script: Script::new(INIT_SCRIPT),
            state_script: Script::new(STATE_SCRIPT),
            slide_script: Script::new(SLIDE_SCRIPT),
            atomic_update_script: Script::new(ATOMIC_UPDATE_SCRIPT),
            set_head_script: Script::new(SET_HEAD_SCRIPT),
        };

        storage.with_lock(|conn| {
            let mut invocation = storage.init_script.key(&storage.key_list).key(&storage.key_sum).arg(capacity);
            if let Some(seed) = initial {
                for v in seed.iter().take(capacity) {
                    invocation = invocation.arg(v.to_string());
                }
            }
            let _total: i64 = invocation.invoke(conn).map_err(redis_err)?;
            Ok(())
        })?;

        Ok(storage)
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut dyn ConnectionLike) -> Result<T, GateError>) -> Result<T, GateError> {
        let mut conn = self.conn.lock();
        let conn: &mut dyn ConnectionLike = &mut **conn;
        self.lock.acquire(conn)?;
        let result = f(conn);
        if let Err(e) = self.lock.release(conn) {
            warn!(gate = %self.name, error = %e, "failed to release distributed lock");
        }
        result
    }

    fn classify(&self, limit: i64, err: redis::RedisError) -> GateError {
        let text = err.to_string();
        classify_script_error(&self.name, limit, &text)
            .unwrap_or_else(|| GateError::Backend(BackendError::Other(text)))
    }
}

impl callgate_core::Storage for RedisStorage {
    fn slide(&self, n: u64) -> Result<(), GateError> {
        self.with_lock(|conn| {
            debug!(gate = %self.name, n, "sliding via Lua script");
            self.slide_script
                .key(&self.key_list)
                .key(&self.key_sum)
                .arg(n)
                .invoke(conn)
                .map_err(redis_err)
        })
    }

    fn state(&self) -> Result<GateState, GateError> {
        self.with_lock(|conn| {
            let (data, sum): (Vec<i64>, i64) = self
                .state_script
                .key(&self.key_list)
                .key(&self.key_sum)
                .invoke(conn)
                .map_err(|e| self.classify(0, e))?;
            Ok(GateState { data, sum })
        })
    }

    fn sum(&self) -> Result<i64, GateError> {
        self.with_lock(|conn| {
            let value: Option<i64> = redis::cmd("GET").arg(&self.key_sum).query(conn).map_err(redis_err)?;
            Ok(value.unwrap_or(0))
        })
    }

    fn atomic_update(&self, value: i64, frame_limit: i64, gate_limit: i64) -> Result<(), GateError> {
        self.with_lock(|conn| {
            let _new_value: i64 = self
                .atomic_update_script
                .key(&self.key_list)
                .key(&self.key_sum)
                .arg(value)
                .arg(frame_limit)
                .arg(gate_limit)
                .invoke(conn)
                .map_err(|e| self.classify(frame_limit.max(gate_limit), e))?;
            Ok(())
        })
    }

    fn as_list(&self) -> Result<Vec<i64>, GateError> {
        self.with_lock(|conn| {
            let items: Vec<i64> = redis::cmd("LRANGE")
                .arg(&self.key_list)
                .arg(0)
                .arg(-1)
                .query(conn)
                .map_err(redis_err)?;
            Ok(items)
        })
    }

    fn clear(&self) -> Result<(), GateError> {
        self.with_lock(|conn| {
            let capacity: i64 = redis::cmd("LLEN").arg(&self.key_list).query(conn).map_err(redis_err)?;
            let _: () = redis::cmd("DEL").arg(&self.key_list).query(conn).map_err(redis_err)?;
            if capacity > 0 {
                let mut cmd = redis::cmd("RPUSH");
                cmd.arg(&self.key_list);
                for _ in 0..capacity {
                    cmd.arg(0);
                }
                let _: () = cmd.query(conn).map_err(redis_err)?;
            }
            let _: () = redis::cmd("SET").arg(&self.key_sum).arg(0).query(conn).map_err(redis_err)?;
            Ok(())
        })
    }

    fn close(&self) -> Result<(), GateError> {
        Ok(())
    }

    fn set_head(&self, value: i64) -> Result<(), GateError> {
        self.with_lock(|conn| {
            self.set_head_script
                .key(&self.key_list)
                .key(&self.key_sum)
                .arg(value)
                .invoke(conn)
                .map_err(redis_err)
        })
    }

    fn get_timestamp(&self) -> Result<Option<DateTime<Utc>>, GateError> {
        self.with_lock(|conn| {
            let raw: Option<i64> = redis::cmd("GET").arg(&self.key_timestamp).query(conn).map_err(redis_err)?;
            Ok(raw.and_then(DateTime::from_timestamp_micros))
        })
    }

    fn set_timestamp(&self, ts: DateTime<Utc>) -> Result<(), GateError> {
        self.with_lock(|conn| {
            redis::cmd("SET")
                .arg(&self.key_timestamp)
                .arg(ts.timestamp_micros())
                .query(conn)
                .map_err(redis_err)
        })
    }

    fn clear_timestamp(&self) -> Result<(), GateError> {
        self.with_lock(|conn| redis::cmd("DEL").arg(&self.key_timestamp).query(conn).map_err(redis_err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_target_builds_connection_string_with_db() {
        let cfg = RedisBackendConfig {
            target: RedisTarget::Single { url: "redis://127.0.0.1:6379".into() },
            db: 7,
            lock_timeout_secs: 1,
        };
        match &cfg.target {
            RedisTarget::Single { url } => assert_eq!(url, "redis://127.0.0.1:6379"),
            RedisTarget::Cluster { .. } => panic!("expected single target"),
        }
    }

    #[test]
    fn default_config_targets_db_fifteen() {
        let cfg = RedisBackendConfig::default();
        assert_eq!(cfg.db, 15);
    }
}
